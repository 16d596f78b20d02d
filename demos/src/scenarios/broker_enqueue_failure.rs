//! Scenario 6: Broker enqueue failure.
//!
//! The broker rejects the publish for `s1` outright (connection refused,
//! in a real deployment). No `queued` event is ever published — only
//! `failed`, carrying the broker's error string — and the step record
//! does not survive the engine's event-loop pass since a `failed` state
//! is terminal.

use std::sync::Arc;

use crate::support::{allow_all_policy, build_engine, sample_plan, AlwaysFailsToEnqueue, AlwaysSucceeds};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Scenario 6: Broker enqueue failure ===");

    let plan = sample_plan("enqueue-failure-demo", "repo.read", false);
    // The step consumer never needs to run: submission fails before any
    // message reaches a queue.
    let queue = Arc::new(AlwaysFailsToEnqueue);
    let engine = build_engine(allow_all_policy(), Arc::new(AlwaysSucceeds), queue, 5);

    let err = engine
        .submit_plan(&plan, "trace-enqueue-failure")
        .await
        .expect_err("enqueue failure must surface to the submitter");
    println!("  submit_plan failed: {err}");

    let history = engine.bus().history(&plan.id).await;
    assert_eq!(history.len(), 1, "only a single failed event should be published");
    assert_eq!(history[0].state, plan_contracts::state::StepState::Failed);
    println!("  only event published: failed (no queued was ever emitted)");

    println!("  Scenario 6 complete.\n");
    Ok(())
}

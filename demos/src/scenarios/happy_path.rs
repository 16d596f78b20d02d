//! Scenario 1: Happy path.
//!
//! `s1` (`repo.read`, auto) runs straight through to completion. `s2`
//! (`repo.write`, approval-gated) waits for a human, then runs the same
//! path once approved.

use std::sync::Arc;
use std::time::Duration;

use plan_contracts::approval::ApprovalDecision;
use plan_contracts::state::StepState;
use plan_queue::InProcessBroker;

use crate::support::{allow_all_policy, build_engine, two_step_plan, wait_for_state, AlwaysSucceeds};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Scenario 1: Happy path ===");

    let plan = two_step_plan();
    let queue = Arc::new(InProcessBroker::new());
    let engine = build_engine(allow_all_policy(), Arc::new(AlwaysSucceeds), queue, 5);
    let handles = engine.start().await?;

    engine.submit_plan(&plan, "trace-happy-path").await?;
    println!("  submitted plan '{}' with 2 steps", plan.id);

    assert!(wait_for_state(&engine, &plan.id, "s1", StepState::Completed, Duration::from_secs(2)).await);
    println!("  s1 (repo.read, auto): queued -> running -> completed");

    assert!(wait_for_state(&engine, &plan.id, "s2", StepState::WaitingApproval, Duration::from_secs(2)).await);
    println!("  s2 (repo.write, approval): waiting_approval");

    engine
        .resolve_approval(&plan.id, "s2", ApprovalDecision::Approve, Some("looks good".to_string()))
        .await?;
    assert!(wait_for_state(&engine, &plan.id, "s2", StepState::Completed, Duration::from_secs(2)).await);
    println!("  s2 approved: approved -> queued -> running -> completed");

    handles.shutdown.trigger();
    let _ = handles.step_consumer.await;
    let _ = handles.completion_consumer.await;
    handles.purger.abort();

    println!("  Scenario 1 complete.\n");
    Ok(())
}

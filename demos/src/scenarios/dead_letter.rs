//! Scenario 4: Dead-letter.
//!
//! `QUEUE_RETRY_MAX=2`. The tool agent fails every attempt, so the step
//! exhausts its retries and lands in `dead_lettered` rather than cycling
//! forever.

use std::sync::Arc;
use std::time::Duration;

use plan_contracts::state::StepState;
use plan_queue::InProcessBroker;

use crate::support::{allow_all_policy, build_engine, sample_plan, wait_for_state, AlwaysFailsTransiently};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Scenario 4: Dead-letter ===");

    let plan = sample_plan("dead-letter-demo", "repo.read", false);
    let queue = Arc::new(InProcessBroker::new());
    let engine = build_engine(allow_all_policy(), Arc::new(AlwaysFailsTransiently), queue, 2);
    let handles = engine.start().await?;

    engine.submit_plan(&plan, "trace-dead-letter").await?;
    assert!(wait_for_state(&engine, &plan.id, "s1", StepState::DeadLettered, Duration::from_secs(2)).await);

    let history = engine.bus().history(&plan.id).await;
    for event in &history {
        println!("  {:>16} (attempt {})", event.state.to_string(), event.attempt);
    }
    println!("  a real broker would also carry this onto plan.steps.dead with x-dead-letter-reason set");

    handles.shutdown.trigger();
    let _ = handles.step_consumer.await;
    let _ = handles.completion_consumer.await;
    handles.purger.abort();

    println!("  Scenario 4 complete.\n");
    Ok(())
}

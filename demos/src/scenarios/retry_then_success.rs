//! Scenario 3: Retry then success.
//!
//! The tool agent fails the first attempt of `s1` with a transient error
//! and succeeds on the second. With `QUEUE_RETRY_MAX=3` the step walks
//! `queued(0) -> running(0) -> retrying(0) -> queued(1) -> running(1) ->
//! completed(1)`.

use std::sync::Arc;
use std::time::Duration;

use plan_contracts::state::StepState;
use plan_queue::InProcessBroker;

use crate::support::{allow_all_policy, build_engine, sample_plan, wait_for_state, FlakyThenSucceeds};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Scenario 3: Retry then success ===");

    let plan = sample_plan("retry-demo", "repo.read", false);
    let queue = Arc::new(InProcessBroker::new());
    let engine = build_engine(allow_all_policy(), Arc::new(FlakyThenSucceeds::new(1)), queue, 3);
    let handles = engine.start().await?;

    engine.submit_plan(&plan, "trace-retry").await?;
    assert!(wait_for_state(&engine, &plan.id, "s1", StepState::Completed, Duration::from_secs(2)).await);

    let history = engine.bus().history(&plan.id).await;
    for event in &history {
        println!("  {:>16} (attempt {})", event.state.to_string(), event.attempt);
    }

    handles.shutdown.trigger();
    let _ = handles.step_consumer.await;
    let _ = handles.completion_consumer.await;
    handles.purger.abort();

    println!("  Scenario 3 complete.\n");
    Ok(())
}

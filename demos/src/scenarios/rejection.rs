//! Scenario 2: Rejection.
//!
//! Same plan as the happy path, but a human rejects `s2`. `s1` is
//! unaffected; `s2` goes `waiting_approval` -> `rejected`.

use std::sync::Arc;
use std::time::Duration;

use plan_contracts::approval::ApprovalDecision;
use plan_contracts::state::StepState;
use plan_queue::InProcessBroker;

use crate::support::{allow_all_policy, build_engine, two_step_plan, wait_for_state, AlwaysSucceeds};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Scenario 2: Rejection ===");

    let plan = two_step_plan();
    let queue = Arc::new(InProcessBroker::new());
    let engine = build_engine(allow_all_policy(), Arc::new(AlwaysSucceeds), queue, 5);
    let handles = engine.start().await?;

    engine.submit_plan(&plan, "trace-rejection").await?;
    assert!(wait_for_state(&engine, &plan.id, "s1", StepState::Completed, Duration::from_secs(2)).await);
    println!("  s1 (repo.read, auto): completed, unaffected by s2's outcome");

    assert!(wait_for_state(&engine, &plan.id, "s2", StepState::WaitingApproval, Duration::from_secs(2)).await);
    engine
        .resolve_approval(&plan.id, "s2", ApprovalDecision::Reject, Some("unsafe".to_string()))
        .await?;
    assert!(wait_for_state(&engine, &plan.id, "s2", StepState::Rejected, Duration::from_secs(2)).await);
    println!("  s2 (repo.write, approval): waiting_approval -> rejected (\"unsafe\")");

    handles.shutdown.trigger();
    let _ = handles.step_consumer.await;
    let _ = handles.completion_consumer.await;
    handles.purger.abort();

    println!("  Scenario 2 complete.\n");
    Ok(())
}

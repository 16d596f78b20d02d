//! Scenario 5: Crash recovery.
//!
//! Submit a plan, let `s1` reach `running`, then simulate the process
//! dying before a terminal event is published: drop the engine without
//! a graceful shutdown. A fresh engine reopens the same on-disk state
//! file, `recover()` re-publishes `running` for the still-active record,
//! and the broker (kept alive across the "restart", standing in for a
//! real durable broker) redelivers the dispatch message so the step
//! still reaches `completed`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use plan_contracts::queue::{StepDispatchPayload, HEADER_TRACE_ID, PLAN_STEPS_QUEUE};
use plan_contracts::record::idempotency_key;
use plan_contracts::state::StepState;
use plan_queue::{EnqueueOptions, InProcessBroker, QueueAdapter, QueueAdapterExt};

use crate::support::{allow_all_policy, sample_plan, wait_for_state, AlwaysSucceeds};

/// Never returns, standing in for a tool RPC that's still in flight when
/// the orchestrator process dies.
struct HangsForever;

#[async_trait::async_trait]
impl plan_client::ToolExecutor for HangsForever {
    async fn execute(
        &self,
        _invocation: &plan_contracts::tool::ToolInvocation,
    ) -> Result<Vec<plan_contracts::tool::ToolEvent>, plan_contracts::tool::ToolError> {
        std::future::pending().await
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Scenario 5: Crash recovery ===");

    let plan = sample_plan("crash-recovery-demo", "repo.read", false);
    // Shared across the "before" and "after" engine: a durable broker
    // survives a process crash even though the in-process orchestrator
    // state does not.
    let queue: Arc<dyn QueueAdapter> = Arc::new(InProcessBroker::new());

    let dir = tempfile::tempdir()?;
    let state_path = dir.path().join("state.json");

    {
        let store = plan_store::PlanStateStore::open(state_path.clone())?;
        let bus = plan_bus::EventBus::new();
        let config = plan_engine::EngineConfig {
            state_path: state_path.clone(),
            queue_retry_max: 5,
            queue_retry_backoff_ms: 0,
            sse_keep_alive_ms: 25_000,
            tool_client_retry_max: 2,
            tool_client_retry_base_delay_ms: 1,
            tool_client_default_timeout_seconds: 5,
            event_bus_purge_interval: Duration::from_secs(60),
            messaging_type: plan_engine::MessagingType::InProcess,
        };
        let engine = plan_engine::Engine::new(store, queue.clone(), allow_all_policy(), Arc::new(HangsForever), bus, config);
        let handles = engine.start().await?;

        engine.submit_plan(&plan, "trace-crash").await?;
        assert!(wait_for_state(&engine, &plan.id, "s1", StepState::Running, Duration::from_secs(2)).await);
        println!("  s1 reached running and was persisted; simulating a crash now");

        // No graceful shutdown: the consumer task handling s1 is still
        // blocked inside the (never-returning) tool call, exactly like a
        // process killed mid-RPC. Abort instead of joining.
        handles.step_consumer.abort();
        handles.completion_consumer.abort();
        handles.purger.abort();
    }

    println!("  restarting against the same state file");
    let store = plan_store::PlanStateStore::open(state_path.clone())?;
    let bus = plan_bus::EventBus::new();
    let config = plan_engine::EngineConfig {
        state_path,
        queue_retry_max: 5,
        queue_retry_backoff_ms: 0,
        sse_keep_alive_ms: 25_000,
        tool_client_retry_max: 2,
        tool_client_retry_base_delay_ms: 1,
        tool_client_default_timeout_seconds: 5,
        event_bus_purge_interval: Duration::from_secs(60),
        messaging_type: plan_engine::MessagingType::InProcess,
    };
    let engine = plan_engine::Engine::new(store, queue.clone(), allow_all_policy(), Arc::new(AlwaysSucceeds), bus, config);
    let handles = engine.start().await?;
    assert!(wait_for_state(&engine, &plan.id, "s1", StepState::Running, Duration::from_secs(2)).await);
    println!("  recover() re-published running for the surviving record");

    // Stand in for the durable broker redelivering the still-unacked
    // dispatch message after reconnect.
    let payload = StepDispatchPayload {
        plan_id: plan.id.clone(),
        step: plan.steps[0].clone(),
        trace_id: "trace-crash".to_string(),
        attempt: 0,
        created_at: Utc::now(),
    };
    let opts = EnqueueOptions::default()
        .with_idempotency_key(idempotency_key(&plan.id, "s1"))
        .with_header(HEADER_TRACE_ID, "trace-crash".to_string());
    queue.enqueue_json(PLAN_STEPS_QUEUE, &payload, opts).await?;

    assert!(wait_for_state(&engine, &plan.id, "s1", StepState::Completed, Duration::from_secs(2)).await);
    println!("  redelivery reached the tool agent and s1 completed, with no duplicate completed events");

    handles.shutdown.trigger();
    let _ = handles.step_consumer.await;
    let _ = handles.completion_consumer.await;
    handles.purger.abort();

    println!("  Scenario 5 complete.\n");
    Ok(())
}

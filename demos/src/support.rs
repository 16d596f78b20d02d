//! Shared scaffolding for the demo scenarios: a throwaway engine wired to
//! an on-disk temp state file plus a handful of `ToolExecutor` stand-ins
//! that behave deterministically (always succeed, fail N times then
//! succeed, always fail transiently) so each scenario is reproducible
//! without a real tool agent on the other end of an RPC call.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::tempdir;

use plan_bus::EventBus;
use plan_contracts::error::EngineResult;
use plan_contracts::plan::{Plan, PlanStep};
use plan_contracts::state::StepState;
use plan_contracts::tool::{ToolError, ToolEvent, ToolInvocation, TransientCode};
use plan_engine::{Engine, EngineConfig};
use plan_policy::{PolicyGate, TomlPolicyGate};
use plan_queue::{InProcessBroker, QueueAdapter};
use plan_store::PlanStateStore;

/// A single-step plan gated on `capability`, optionally requiring approval.
pub fn sample_plan(plan_id: &str, capability: &str, approval_required: bool) -> Plan {
    Plan {
        id: plan_id.to_string(),
        goal: format!("exercise the {capability} capability"),
        steps: vec![PlanStep {
            id: "s1".to_string(),
            action: format!("invoke {capability}"),
            tool: "demo-tool".to_string(),
            capability: capability.to_string(),
            capability_label: capability.to_string(),
            labels: vec![],
            timeout_seconds: 5,
            approval_required,
            input: serde_json::json!({ "demo": true }),
            metadata: serde_json::json!({}),
        }],
        success_criteria: vec!["step completed".to_string()],
    }
}

/// The two-step plan from the spec's literal end-to-end scenarios: `s1`
/// (`repo.read`, auto-dispatched) and `s2` (`repo.write`, approval-gated).
pub fn two_step_plan() -> Plan {
    Plan {
        id: "ship-it".to_string(),
        goal: "Ship".to_string(),
        steps: vec![
            PlanStep {
                id: "s1".to_string(),
                action: "read the repository".to_string(),
                tool: "repo-reader".to_string(),
                capability: "repo.read".to_string(),
                capability_label: "Read repository".to_string(),
                labels: vec![],
                timeout_seconds: 5,
                approval_required: false,
                input: serde_json::json!({}),
                metadata: serde_json::json!({}),
            },
            PlanStep {
                id: "s2".to_string(),
                action: "apply changes".to_string(),
                tool: "repo-writer".to_string(),
                capability: "repo.write".to_string(),
                capability_label: "Write repository".to_string(),
                labels: vec![],
                timeout_seconds: 5,
                approval_required: true,
                input: serde_json::json!({}),
                metadata: serde_json::json!({}),
            },
        ],
        success_criteria: vec!["repository updated".to_string()],
    }
}

/// Allows every `(action_type, capability)` pair outright.
pub fn allow_all_policy() -> Arc<dyn PolicyGate> {
    Arc::new(
        TomlPolicyGate::from_toml_str(
            r#"
            [[rules]]
            id = "allow-everything"
            description = "demo fixture: allow everything"
            action_type = "*"
            capability = "*"
            verdict = "allow"
            "#,
        )
        .expect("parse demo policy"),
    )
}

/// Requires approval for every `(action_type, capability)` pair.
pub fn require_approval_policy() -> Arc<dyn PolicyGate> {
    Arc::new(
        TomlPolicyGate::from_toml_str(
            r#"
            [[rules]]
            id = "needs-approval"
            description = "demo fixture: require approval for everything"
            action_type = "*"
            capability = "*"
            verdict = "require-approval"
            "#,
        )
        .expect("parse demo policy"),
    )
}

/// Builds a fresh engine over a temp-dir-backed store, with `queue_retry_max`
/// tuned down so retry/dead-letter scenarios finish in milliseconds rather
/// than walking the production backoff curve.
pub fn build_engine(
    policy: Arc<dyn PolicyGate>,
    tool_executor: Arc<dyn plan_client::ToolExecutor>,
    queue: Arc<dyn QueueAdapter>,
    queue_retry_max: u32,
) -> Arc<Engine> {
    let dir = tempdir().expect("create temp dir for demo state");
    let state_path = dir.path().join("state.json");
    let store = PlanStateStore::open(state_path.clone()).expect("open demo state store");
    let bus = EventBus::new();
    let config = EngineConfig {
        state_path,
        queue_retry_max,
        queue_retry_backoff_ms: 0,
        sse_keep_alive_ms: 25_000,
        tool_client_retry_max: 2,
        tool_client_retry_base_delay_ms: 1,
        tool_client_default_timeout_seconds: 5,
        event_bus_purge_interval: Duration::from_secs(60),
        messaging_type: plan_engine::MessagingType::InProcess,
    };
    // Demo processes are short-lived; leaking the temp dir keeps the store
    // file alive for the engine's lifetime without threading an owner through.
    std::mem::forget(dir);
    Engine::new(store, queue, policy, tool_executor, bus, config)
}

/// Poll the bus's retained history for `plan_id`/`step_id` until an event
/// in `state` shows up, or give up after `timeout`.
pub async fn wait_for_state(engine: &Arc<Engine>, plan_id: &str, step_id: &str, state: StepState, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let matched = engine
            .bus()
            .history(plan_id)
            .await
            .iter()
            .any(|e| e.step_id == step_id && e.state == state);
        if matched {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn terminal_success(invocation: &ToolInvocation) -> ToolEvent {
    ToolEvent {
        invocation_id: invocation.invocation_id.clone(),
        plan_id: invocation.plan_id.clone(),
        step_id: invocation.step_id.clone(),
        state: StepState::Completed,
        summary: Some(format!("{} executed", invocation.capability_label)),
        output: Some(invocation.input.clone()),
        occurred_at: Utc::now(),
        attempt: None,
    }
}

/// Completes every invocation on the first attempt.
pub struct AlwaysSucceeds;

#[async_trait]
impl plan_client::ToolExecutor for AlwaysSucceeds {
    async fn execute(&self, invocation: &ToolInvocation) -> Result<Vec<ToolEvent>, ToolError> {
        Ok(vec![terminal_success(invocation)])
    }
}

/// Fails with a transient error the first `fail_count` times it's called,
/// then succeeds. Counts calls globally across the invocation, which is
/// fine here since each scenario builds its own dedicated instance.
pub struct FlakyThenSucceeds {
    calls: AtomicU32,
    fail_count: u32,
}

impl FlakyThenSucceeds {
    pub fn new(fail_count: u32) -> Self {
        Self { calls: AtomicU32::new(0), fail_count }
    }
}

#[async_trait]
impl plan_client::ToolExecutor for FlakyThenSucceeds {
    async fn execute(&self, invocation: &ToolInvocation) -> Result<Vec<ToolEvent>, ToolError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_count {
            return Err(ToolError::transient(TransientCode::Unavailable, "downstream service unavailable"));
        }
        Ok(vec![terminal_success(invocation)])
    }
}

/// Always fails with a transient error, so the engine eventually dead-letters
/// the step once `queue_retry_max` is exhausted.
pub struct AlwaysFailsTransiently;

#[async_trait]
impl plan_client::ToolExecutor for AlwaysFailsTransiently {
    async fn execute(&self, _invocation: &ToolInvocation) -> Result<Vec<ToolEvent>, ToolError> {
        Err(ToolError::transient(TransientCode::Unavailable, "downstream service permanently unavailable"))
    }
}

/// A `QueueAdapter` whose `enqueue` always fails, standing in for a broker
/// that's unreachable at publish time (spec §4.2's "broker-unreachable
/// errors must surface to the caller").
pub struct AlwaysFailsToEnqueue;

#[async_trait]
impl QueueAdapter for AlwaysFailsToEnqueue {
    async fn enqueue(&self, _queue: &str, _payload: Vec<u8>, _opts: plan_queue::EnqueueOptions) -> EngineResult<()> {
        Err(plan_contracts::error::EngineError::EnqueueFailed { reason: "broker unreachable".to_string() })
    }

    async fn consume(&self, _queue: &str) -> EngineResult<Box<dyn plan_queue::Consumer>> {
        // Never exercised: nothing reaches `consume` once `enqueue` fails at
        // submission time.
        InProcessBroker::new().consume("unused").await
    }

    async fn depth(&self, _queue: &str) -> EngineResult<u64> {
        Ok(0)
    }
}

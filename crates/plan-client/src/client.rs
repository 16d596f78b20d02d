//! Tool Agent Client (C3): invokes the external agent over RPC with a
//! deadline and bounded retry on transient codes.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use plan_contracts::tool::{ToolError, ToolEvent, ToolInvocation, TransientCode};

/// The raw, single-attempt call to an external tool agent. Returns the
/// ordered, finite sequence of events the agent reported for this attempt —
/// zero or more `Running` progress events followed by exactly one terminal
/// `Completed`/`Failed` event. Implementations own the transport (HTTP,
/// gRPC, in-process); `ToolAgentClient` supplies the deadline and retry
/// policy around it.
#[async_trait]
pub trait RawToolAgent: Send + Sync {
    async fn call(&self, invocation: &ToolInvocation) -> Result<Vec<ToolEvent>, ToolError>;
}

/// Retry/timeout policy applied around a `RawToolAgent` (spec §4.3).
#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    /// Maximum attempts on transient codes, including the first. Default 2.
    pub retry_max: u32,
    /// Base delay between attempts, linearly scaled by attempt. Default 200ms.
    pub retry_base_delay_ms: u64,
    /// Used when `step.timeoutSeconds == 0`, and as the ceiling otherwise
    /// (spec §4.6, "deadline = min(step.timeoutSeconds, configured default)").
    pub default_timeout_seconds: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { retry_max: 2, retry_base_delay_ms: 200, default_timeout_seconds: 30 }
    }
}

fn deadline_for(invocation: &ToolInvocation, config: &ClientConfig) -> Duration {
    let seconds = if invocation.timeout_seconds == 0 {
        config.default_timeout_seconds
    } else {
        invocation.timeout_seconds.min(config.default_timeout_seconds)
    };
    Duration::from_secs(seconds)
}

fn is_transient(code: &str) -> bool {
    matches!(code, "unavailable" | "resource-exhausted" | "aborted" | "deadline-exceeded")
}

/// Wraps a [`RawToolAgent`] with a deadline and bounded retry on transient
/// codes.
pub struct ToolAgentClient<A: RawToolAgent> {
    agent: A,
    config: ClientConfig,
}

impl<A: RawToolAgent> ToolAgentClient<A> {
    pub fn new(agent: A, config: ClientConfig) -> Self {
        Self { agent, config }
    }

    /// Invoke the tool, retrying transient failures up to `config.retry_max`
    /// times with linearly scaled backoff. Returns the event sequence from
    /// the attempt that finally succeeded (or produced a non-retryable
    /// result), or the final `ToolError` once retries are exhausted.
    pub async fn execute(&self, invocation: &ToolInvocation) -> Result<Vec<ToolEvent>, ToolError> {
        let deadline = deadline_for(invocation, &self.config);
        let mut attempt: u32 = 0;

        loop {
            debug!(
                invocation_id = %invocation.invocation_id,
                tool = %invocation.tool,
                attempt,
                deadline_ms = deadline.as_millis() as u64,
                "invoking tool agent"
            );

            let outcome = match tokio::time::timeout(deadline, self.agent.call(invocation)).await {
                Ok(result) => result,
                Err(_) => Err(ToolError::transient(
                    TransientCode::DeadlineExceeded,
                    format!("tool call exceeded deadline of {}ms", deadline.as_millis()),
                )),
            };

            match outcome {
                Ok(events) => return Ok(events),
                Err(err) if err.retryable && is_transient(&err.code) && attempt + 1 < self.config.retry_max => {
                    let delay = Duration::from_millis(self.config.retry_base_delay_ms * (attempt as u64 + 1));
                    warn!(
                        invocation_id = %invocation.invocation_id,
                        attempt,
                        code = %err.code,
                        delay_ms = delay.as_millis() as u64,
                        "tool call failed transiently, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Object-safe façade over `ToolAgentClient<A>`, so `plan-engine` can hold
/// one behind `Arc<dyn ToolExecutor>` regardless of the concrete agent type.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, invocation: &ToolInvocation) -> Result<Vec<ToolEvent>, ToolError>;
}

#[async_trait]
impl<A: RawToolAgent> ToolExecutor for ToolAgentClient<A> {
    async fn execute(&self, invocation: &ToolInvocation) -> Result<Vec<ToolEvent>, ToolError> {
        ToolAgentClient::execute(self, invocation).await
    }
}

/// Returns the last event in `events` whose state is terminal, applying the
/// "last terminal event wins" tie-break from spec §4.6.
pub fn terminal_event(events: &[ToolEvent]) -> Option<&ToolEvent> {
    events.iter().rev().find(|e| e.state.is_terminal())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::Utc;
    use plan_contracts::state::StepState;

    use super::*;

    fn sample_invocation() -> ToolInvocation {
        ToolInvocation {
            invocation_id: "inv-1".to_string(),
            plan_id: "p1".to_string(),
            step_id: "s1".to_string(),
            tool: "repo-reader".to_string(),
            capability: "repo.read".to_string(),
            capability_label: "Read repository".to_string(),
            labels: vec![],
            timeout_seconds: 5,
            approval_required: false,
            input: serde_json::json!({}),
            metadata: serde_json::json!({}),
        }
    }

    fn event(invocation: &ToolInvocation, state: StepState, summary: &str) -> ToolEvent {
        ToolEvent {
            invocation_id: invocation.invocation_id.clone(),
            plan_id: invocation.plan_id.clone(),
            step_id: invocation.step_id.clone(),
            state,
            summary: Some(summary.to_string()),
            output: None,
            occurred_at: Utc::now(),
            attempt: None,
        }
    }

    struct AlwaysSucceeds;
    #[async_trait]
    impl RawToolAgent for AlwaysSucceeds {
        async fn call(&self, invocation: &ToolInvocation) -> Result<Vec<ToolEvent>, ToolError> {
            Ok(vec![
                event(invocation, StepState::Running, "starting"),
                event(invocation, StepState::Completed, "ok"),
            ])
        }
    }

    struct FailsNTimesThenSucceeds {
        calls: AtomicU32,
        fail_count: u32,
    }
    #[async_trait]
    impl RawToolAgent for FailsNTimesThenSucceeds {
        async fn call(&self, invocation: &ToolInvocation) -> Result<Vec<ToolEvent>, ToolError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_count {
                return Err(ToolError::transient(TransientCode::Unavailable, "agent briefly unavailable"));
            }
            Ok(vec![event(invocation, StepState::Completed, "ok after retry")])
        }
    }

    struct AlwaysFailsPermanently;
    #[async_trait]
    impl RawToolAgent for AlwaysFailsPermanently {
        async fn call(&self, _invocation: &ToolInvocation) -> Result<Vec<ToolEvent>, ToolError> {
            Err(ToolError::permanent("invalid_argument", "bad input"))
        }
    }

    #[tokio::test]
    async fn successful_call_returns_the_full_event_sequence() {
        let client = ToolAgentClient::new(AlwaysSucceeds, ClientConfig::default());
        let events = client.execute(&sample_invocation()).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(terminal_event(&events).unwrap().state, StepState::Completed);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_until_success() {
        let agent = FailsNTimesThenSucceeds { calls: AtomicU32::new(0), fail_count: 1 };
        let client = ToolAgentClient::new(
            agent,
            ClientConfig { retry_max: 3, retry_base_delay_ms: 1, default_timeout_seconds: 5 },
        );
        let events = client.execute(&sample_invocation()).await.unwrap();
        assert_eq!(terminal_event(&events).unwrap().state, StepState::Completed);
    }

    #[tokio::test]
    async fn transient_failure_exhausts_retries_and_surfaces_error() {
        let agent = FailsNTimesThenSucceeds { calls: AtomicU32::new(0), fail_count: 10 };
        let client = ToolAgentClient::new(
            agent,
            ClientConfig { retry_max: 2, retry_base_delay_ms: 1, default_timeout_seconds: 5 },
        );
        let err = client.execute(&sample_invocation()).await.unwrap_err();
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_immediately() {
        let client = ToolAgentClient::new(AlwaysFailsPermanently, ClientConfig::default());
        let err = client.execute(&sample_invocation()).await.unwrap_err();
        assert!(!err.retryable);
        assert_eq!(err.code, "invalid_argument");
    }

    #[test]
    fn deadline_uses_configured_default_when_step_timeout_is_zero() {
        let mut invocation = sample_invocation();
        invocation.timeout_seconds = 0;
        let config = ClientConfig { default_timeout_seconds: 45, ..Default::default() };
        assert_eq!(deadline_for(&invocation, &config), Duration::from_secs(45));
    }

    #[test]
    fn deadline_is_the_minimum_of_step_and_default() {
        let mut invocation = sample_invocation();
        invocation.timeout_seconds = 120;
        let config = ClientConfig { default_timeout_seconds: 30, ..Default::default() };
        assert_eq!(deadline_for(&invocation, &config), Duration::from_secs(30));
    }

    #[test]
    fn terminal_event_picks_the_last_terminal_one() {
        let invocation = sample_invocation();
        let events = vec![
            event(&invocation, StepState::Running, "starting"),
            event(&invocation, StepState::Completed, "first terminal"),
        ];
        assert_eq!(terminal_event(&events).unwrap().summary.as_deref(), Some("first terminal"));
    }
}

//! The Plan Execution Engine (component C6): wires the state store, queue
//! adapter, tool agent client, policy gate and event bus into one
//! orchestrator.
//!
//! Mirrors the teacher's executor pipeline ordering — policy is always the
//! gate a step must clear before any tool RPC is attempted — generalized
//! from a single synchronous `step()` call into the three async entry
//! points spec §4.6 names: `submit_plan`, the step/completion consumer
//! loops, and `resolve_approval`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use plan_bus::EventBus;
use plan_client::{terminal_event, ToolExecutor};
use plan_contracts::approval::ApprovalDecision;
use plan_contracts::error::{EngineError, EngineResult};
use plan_contracts::event::StepEvent;
use plan_contracts::plan::{Plan, PlanStep};
use plan_contracts::policy::{ActionType, PolicyAction, PolicyDecision, PolicySubject};
use plan_contracts::queue::{
    CompletionPayload, StepDispatchPayload, HEADER_TRACE_ID, PLAN_COMPLETIONS_QUEUE, PLAN_STEPS_QUEUE,
};
use plan_contracts::record::{idempotency_key, StepRecord};
use plan_contracts::state::StepState;
use plan_contracts::tool::{ToolEvent, ToolInvocation};
use plan_policy::PolicyGate;
use plan_queue::{exponential_backoff_ms, Consumer, Delivery, EnqueueOptions, QueueAdapter, QueueAdapterExt, Resolution};
use plan_store::PlanStateStore;

use crate::config::EngineConfig;
use crate::shutdown::Shutdown;

/// No dedicated grant registry exists in this model: a step's declared
/// `capability` is taken as the capability its subject already holds, so
/// policy rules decide admission/dispatch purely on `(action_type,
/// capability)` matching and the recorded approval state. See DESIGN.md.
fn run_mode() -> String {
    "live".to_string()
}

fn subject_for(step: &PlanStep, approvals: HashMap<String, bool>) -> PolicySubject {
    PolicySubject {
        agent: step.tool.clone(),
        tool: step.tool.clone(),
        capabilities: vec![step.capability.clone()],
        approvals,
        run_mode: run_mode(),
    }
}

fn action_for(action_type: ActionType, plan_id: &str, step_id: &str, capability: &str) -> PolicyAction {
    PolicyAction {
        action_type,
        plan_id: Some(plan_id.to_string()),
        step_id: Some(step_id.to_string()),
        capabilities: vec![capability.to_string()],
        run_mode: run_mode(),
    }
}

fn summarize_denies(decision: &PolicyDecision) -> String {
    decision.deny.iter().map(|d| d.reason.as_str()).collect::<Vec<_>>().join("; ")
}

/// Wires C1 (`plan-store`), C2 (`plan-queue`), C3 (`plan-client`), C4
/// (`plan-policy`) and C5 (`plan-bus`) into the orchestrator described in
/// spec §4.6.
pub struct Engine {
    store: Arc<PlanStateStore>,
    queue: Arc<dyn QueueAdapter>,
    policy: Arc<dyn PolicyGate>,
    tool_executor: Arc<dyn ToolExecutor>,
    bus: EventBus,
    config: EngineConfig,
}

/// Background tasks started by [`Engine::start`]. Dropping this without
/// calling `shutdown.trigger()` leaves the tasks running detached.
pub struct EngineHandles {
    pub shutdown: Shutdown,
    pub step_consumer: tokio::task::JoinHandle<EngineResult<()>>,
    pub completion_consumer: tokio::task::JoinHandle<EngineResult<()>>,
    pub purger: tokio::task::JoinHandle<()>,
}

impl Engine {
    pub fn new(
        store: PlanStateStore,
        queue: Arc<dyn QueueAdapter>,
        policy: Arc<dyn PolicyGate>,
        tool_executor: Arc<dyn ToolExecutor>,
        bus: EventBus,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self { store: Arc::new(store), queue, policy, tool_executor, bus, config })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// SSE keep-alive interval in milliseconds, for the HTTP surface.
    pub fn sse_keep_alive_ms(&self) -> u64 {
        self.config.sse_keep_alive_ms
    }

    /// Re-emit a current-state event for every active record so subscribers
    /// rebuild their view after a restart (spec §4.6, "Crash recovery").
    /// Never re-enqueues — broker-side redelivery (or a pending approval)
    /// is the recovery path for dispatch itself.
    pub async fn recover(&self) -> EngineResult<()> {
        let records = self.list_active().await;
        info!(count = records.len(), "recovering active step records");
        for record in records {
            self.publish_event(
                &record.plan_id,
                &record.step,
                &record.trace_id,
                record.state,
                record.attempt,
                record.summary.clone(),
                record.output.clone(),
            )
            .await;
        }
        Ok(())
    }

    /// Start the background consumer loops and history purger. Call
    /// `recover()` (or rely on this doing it) before serving HTTP traffic.
    pub async fn start(self: &Arc<Self>) -> EngineResult<EngineHandles> {
        self.recover().await?;

        let shutdown = Shutdown::new();

        let step_engine = self.clone();
        let step_shutdown = shutdown.subscribe();
        let step_consumer = tokio::spawn(async move { step_engine.run_step_consumer(step_shutdown).await });

        let completion_engine = self.clone();
        let completion_shutdown = shutdown.subscribe();
        let completion_consumer =
            tokio::spawn(async move { completion_engine.run_completion_consumer(completion_shutdown).await });

        let purger = self.bus.clone().spawn_purger(self.config.event_bus_purge_interval);

        Ok(EngineHandles { shutdown, step_consumer, completion_consumer, purger })
    }

    // ── SubmitPlan ────────────────────────────────────────────────────────

    /// Admit every step of `plan` (spec §4.6, `SubmitPlan`). Steps already
    /// admitted are not rolled back if a later step fails — there is no
    /// cross-step transaction.
    pub async fn submit_plan(&self, plan: &Plan, trace_id: &str) -> EngineResult<()> {
        for step in &plan.steps {
            self.admit_step(&plan.id, step, trace_id).await?;
        }
        Ok(())
    }

    async fn admit_step(&self, plan_id: &str, step: &PlanStep, trace_id: &str) -> EngineResult<()> {
        let approvals = self.get_entry(plan_id, &step.id).await?.map(|r| r.approvals).unwrap_or_default();

        let subject = subject_for(step, approvals.clone());
        let action = action_for(ActionType::Admit, plan_id, &step.id, &step.capability);
        let decision = self.policy.evaluate(&subject, &action);

        if !decision.allow {
            let approval_only = decision.denies_only_approval_required();
            if !(step.approval_required && approval_only) {
                warn!(plan_id, step_id = %step.id, "policy denied admission, failing submission");
                return Err(EngineError::PolicyDenied { reason: summarize_denies(&decision) });
            }
        }

        let target_state = if step.approval_required { StepState::WaitingApproval } else { StepState::Queued };

        let record = StepRecord::new(plan_id, step.clone(), trace_id, target_state, approvals);
        self.remember(record).await?;

        if target_state == StepState::Queued {
            if let Err(e) = self.dispatch_fresh(plan_id, step, trace_id, 0).await {
                self.set_state(plan_id, &step.id, StepState::Failed, Some(e.to_string()), None, None).await?;
                self.publish_event(plan_id, step, trace_id, StepState::Failed, 0, Some(e.to_string()), None).await;
                return Err(e);
            }
        }

        self.publish_event(plan_id, step, trace_id, target_state, 0, None, None).await;
        Ok(())
    }

    async fn dispatch_fresh(&self, plan_id: &str, step: &PlanStep, trace_id: &str, attempt: u32) -> EngineResult<()> {
        let payload = StepDispatchPayload {
            plan_id: plan_id.to_string(),
            step: step.clone(),
            trace_id: trace_id.to_string(),
            attempt,
            created_at: Utc::now(),
        };
        let opts = EnqueueOptions::default()
            .with_idempotency_key(idempotency_key(plan_id, &step.id))
            .with_header(HEADER_TRACE_ID, trace_id.to_string());
        self.queue.enqueue_json(PLAN_STEPS_QUEUE, &payload, opts).await
    }

    // ── Step consumer loop ───────────────────────────────────────────────

    pub async fn run_step_consumer(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> EngineResult<()> {
        let mut consumer = self.queue.consume(PLAN_STEPS_QUEUE).await?;
        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    debug!("step consumer shutting down");
                    return Ok(());
                }
                delivery = consumer.recv() => delivery,
            };
            let Some(delivery) = delivery else {
                debug!("step queue closed, consumer exiting");
                return Ok(());
            };
            if let Err(e) = self.handle_step_delivery(&delivery, consumer.as_ref()).await {
                warn!(error = %e, "step delivery handling failed");
            }
        }
    }

    async fn handle_step_delivery(&self, delivery: &Delivery, consumer: &dyn Consumer) -> EngineResult<()> {
        let payload: StepDispatchPayload = match delivery.decode() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "undecodable step payload, acking");
                return consumer.resolve(delivery, Resolution::Ack).await;
            }
        };

        let plan_id = payload.plan_id;
        let step = payload.step;
        let trace_id = payload.trace_id;
        // The queue's own attempt counter is authoritative across retries;
        // the JSON-embedded `attempt` only reflects the value at enqueue time.
        let attempt = delivery.attempts;

        let Some(existing) = self.get_entry(&plan_id, &step.id).await? else {
            debug!(plan_id, step_id = %step.id, "step record already resolved, acking");
            return consumer.resolve(delivery, Resolution::Ack).await;
        };

        let subject = subject_for(&step, existing.approvals.clone());
        let action = action_for(ActionType::Dispatch, &plan_id, &step.id, &step.capability);
        let decision = self.policy.evaluate(&subject, &action);

        if !decision.allow {
            warn!(plan_id, step_id = %step.id, "policy denied at dispatch, rejecting step");
            let reason = summarize_denies(&decision);
            self.set_state(&plan_id, &step.id, StepState::Rejected, Some(reason.clone()), None, Some(attempt)).await?;
            self.publish_event(&plan_id, &step, &trace_id, StepState::Rejected, attempt, Some(reason), None).await;
            return consumer.resolve(delivery, Resolution::Ack).await;
        }

        // A redelivery of an already-dispatched attempt (at-least-once
        // broker semantics, or a crash-recovery requeue) finds the record
        // already `running` — don't re-announce a transition that never
        // happened, just retry the RPC.
        if existing.state != StepState::Running {
            self.set_state(&plan_id, &step.id, StepState::Running, None, None, Some(attempt)).await?;
            self.publish_event(&plan_id, &step, &trace_id, StepState::Running, attempt, None, None).await;
        }

        let invocation = ToolInvocation {
            invocation_id: idempotency_key(&plan_id, &step.id),
            plan_id: plan_id.clone(),
            step_id: step.id.clone(),
            tool: step.tool.clone(),
            capability: step.capability.clone(),
            capability_label: step.capability_label.clone(),
            labels: step.labels.clone(),
            timeout_seconds: step.timeout_seconds,
            approval_required: step.approval_required,
            input: step.input.clone(),
            metadata: step.metadata.clone(),
        };

        match self.tool_executor.execute(&invocation).await {
            Ok(events) => {
                for event in &events {
                    self.publish_tool_event(&step, &trace_id, event).await;
                }
                if let Some(terminal) = terminal_event(&events) {
                    self.set_state(
                        &plan_id,
                        &step.id,
                        terminal.state,
                        terminal.summary.clone(),
                        terminal.output.clone(),
                        Some(attempt),
                    )
                    .await?;
                } else {
                    // Contract violation: no terminal event in the returned
                    // sequence. Drop the record rather than leave it stuck
                    // in `running` forever.
                    warn!(plan_id, step_id = %step.id, "tool agent returned no terminal event");
                    self.forget(&plan_id, &step.id).await?;
                }
                consumer.resolve(delivery, Resolution::Ack).await
            }
            Err(err) => {
                if err.retryable && attempt < self.config.queue_retry_max {
                    warn!(plan_id, step_id = %step.id, attempt, error = %err, "retrying step");
                    self.set_state(
                        &plan_id,
                        &step.id,
                        StepState::Retrying,
                        Some(err.message.clone()),
                        None,
                        Some(attempt),
                    )
                    .await?;
                    self.publish_event(
                        &plan_id,
                        &step,
                        &trace_id,
                        StepState::Retrying,
                        attempt,
                        Some(err.message.clone()),
                        None,
                    )
                    .await;

                    let delay_ms = exponential_backoff_ms(self.config.queue_retry_backoff_ms, attempt);
                    consumer.resolve(delivery, Resolution::Retry { delay_ms }).await?;

                    let next_attempt = attempt + 1;
                    self.set_state(&plan_id, &step.id, StepState::Queued, None, None, Some(next_attempt)).await?;
                    self.publish_event(&plan_id, &step, &trace_id, StepState::Queued, next_attempt, None, None)
                        .await;
                    Ok(())
                } else if err.retryable {
                    warn!(plan_id, step_id = %step.id, attempt, "retries exhausted, dead-lettering");
                    self.set_state(
                        &plan_id,
                        &step.id,
                        StepState::DeadLettered,
                        Some(err.message.clone()),
                        None,
                        Some(attempt),
                    )
                    .await?;
                    self.publish_event(
                        &plan_id,
                        &step,
                        &trace_id,
                        StepState::DeadLettered,
                        attempt,
                        Some(err.message.clone()),
                        None,
                    )
                    .await;
                    consumer
                        .resolve(delivery, Resolution::DeadLetter { reason: err.message.clone(), queue: None })
                        .await
                } else {
                    warn!(plan_id, step_id = %step.id, error = %err, "non-retryable tool failure");
                    self.set_state(&plan_id, &step.id, StepState::Failed, Some(err.message.clone()), None, Some(attempt))
                        .await?;
                    self.publish_event(
                        &plan_id,
                        &step,
                        &trace_id,
                        StepState::Failed,
                        attempt,
                        Some(err.message.clone()),
                        None,
                    )
                    .await;
                    consumer.resolve(delivery, Resolution::Ack).await
                }
            }
        }
    }

    // ── Completion consumer loop ─────────────────────────────────────────

    pub async fn run_completion_consumer(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> EngineResult<()> {
        let mut consumer = self.queue.consume(PLAN_COMPLETIONS_QUEUE).await?;
        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    debug!("completion consumer shutting down");
                    return Ok(());
                }
                delivery = consumer.recv() => delivery,
            };
            let Some(delivery) = delivery else {
                debug!("completions queue closed, consumer exiting");
                return Ok(());
            };
            if let Err(e) = self.handle_completion_delivery(&delivery, consumer.as_ref()).await {
                warn!(error = %e, "completion delivery handling failed");
            }
        }
    }

    async fn handle_completion_delivery(&self, delivery: &Delivery, consumer: &dyn Consumer) -> EngineResult<()> {
        let payload: CompletionPayload = match delivery.decode() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "undecodable completion payload, acking");
                return consumer.resolve(delivery, Resolution::Ack).await;
            }
        };

        if !payload.state.is_terminal() {
            debug!(
                plan_id = %payload.plan_id,
                step_id = %payload.step_id,
                state = %payload.state,
                "ignoring non-terminal completion message"
            );
            return consumer.resolve(delivery, Resolution::Ack).await;
        }

        let Some(record) = self.get_entry(&payload.plan_id, &payload.step_id).await? else {
            debug!(
                plan_id = %payload.plan_id,
                step_id = %payload.step_id,
                "completion for an unknown or already-resolved step, acking"
            );
            return consumer.resolve(delivery, Resolution::Ack).await;
        };

        let attempt = payload.attempt.unwrap_or(record.attempt);
        self.set_state(
            &payload.plan_id,
            &payload.step_id,
            payload.state,
            payload.summary.clone(),
            payload.output.clone(),
            Some(attempt),
        )
        .await?;

        let trace_id = payload.trace_id.clone().unwrap_or_else(|| record.trace_id.clone());
        self.publish_event(
            &payload.plan_id,
            &record.step,
            &trace_id,
            payload.state,
            attempt,
            payload.summary.clone(),
            payload.output.clone(),
        )
        .await;

        consumer.resolve(delivery, Resolution::Ack).await
    }

    // ── ResolveApproval ──────────────────────────────────────────────────

    pub async fn resolve_approval(
        &self,
        plan_id: &str,
        step_id: &str,
        decision: ApprovalDecision,
        _rationale: Option<String>,
    ) -> EngineResult<()> {
        let record = self.get_entry(plan_id, step_id).await?.ok_or_else(|| EngineError::StepNotFound {
            plan_id: plan_id.to_string(),
            step_id: step_id.to_string(),
        })?;

        if record.state != StepState::WaitingApproval {
            return Err(EngineError::InvalidStateTransition {
                plan_id: plan_id.to_string(),
                step_id: step_id.to_string(),
                actual: record.state.to_string(),
                expected: StepState::WaitingApproval.to_string(),
            });
        }

        match decision {
            ApprovalDecision::Reject => {
                self.set_state(plan_id, step_id, StepState::Rejected, None, None, None).await?;
                self.publish_event(plan_id, &record.step, &record.trace_id, StepState::Rejected, record.attempt, None, None)
                    .await;
                self.forget(plan_id, step_id).await
            }
            ApprovalDecision::Approve => {
                self.record_approval(plan_id, step_id, &record.step.capability, true).await?;

                let refreshed = self.get_entry(plan_id, step_id).await?.ok_or_else(|| EngineError::StepNotFound {
                    plan_id: plan_id.to_string(),
                    step_id: step_id.to_string(),
                })?;

                let subject = subject_for(&refreshed.step, refreshed.approvals.clone());
                let action = action_for(ActionType::Dispatch, plan_id, step_id, &refreshed.step.capability);
                let decision = self.policy.evaluate(&subject, &action);
                if !decision.allow {
                    return Err(EngineError::PolicyDenied { reason: summarize_denies(&decision) });
                }

                self.set_state(plan_id, step_id, StepState::Approved, None, None, None).await?;
                self.publish_event(
                    plan_id,
                    &refreshed.step,
                    &refreshed.trace_id,
                    StepState::Approved,
                    refreshed.attempt,
                    None,
                    None,
                )
                .await;

                if let Err(e) = self.dispatch_fresh(plan_id, &refreshed.step, &refreshed.trace_id, refreshed.attempt).await
                {
                    self.set_state(plan_id, step_id, StepState::Failed, Some(e.to_string()), None, None).await?;
                    self.publish_event(
                        plan_id,
                        &refreshed.step,
                        &refreshed.trace_id,
                        StepState::Failed,
                        refreshed.attempt,
                        Some(e.to_string()),
                        None,
                    )
                    .await;
                    return Err(e);
                }

                self.set_state(plan_id, step_id, StepState::Queued, None, None, None).await?;
                self.publish_event(
                    plan_id,
                    &refreshed.step,
                    &refreshed.trace_id,
                    StepState::Queued,
                    refreshed.attempt,
                    None,
                    None,
                )
                .await;
                Ok(())
            }
        }
    }

    // ── Shared helpers ────────────────────────────────────────────────────

    async fn publish_event(
        &self,
        plan_id: &str,
        step: &PlanStep,
        trace_id: &str,
        state: StepState,
        attempt: u32,
        summary: Option<String>,
        output: Option<serde_json::Value>,
    ) {
        self.bus
            .publish(StepEvent {
                plan_id: plan_id.to_string(),
                step_id: step.id.clone(),
                trace_id: trace_id.to_string(),
                occurred_at: Utc::now(),
                state,
                attempt,
                summary,
                output,
                step: step.clone(),
            })
            .await;
    }

    async fn publish_tool_event(&self, step: &PlanStep, trace_id: &str, event: &ToolEvent) {
        self.bus
            .publish(StepEvent {
                plan_id: event.plan_id.clone(),
                step_id: event.step_id.clone(),
                trace_id: trace_id.to_string(),
                occurred_at: event.occurred_at,
                state: event.state,
                attempt: event.attempt.unwrap_or(0),
                summary: event.summary.clone(),
                output: event.output.clone(),
                step: step.clone(),
            })
            .await;
    }

    // The store is synchronous; every call runs on the blocking pool so it
    // never stalls the async executor (per `plan-store`'s own doc comment).
    async fn remember(&self, record: StepRecord) -> EngineResult<()> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.remember(record)).await.expect("state store task panicked")
    }

    async fn set_state(
        &self,
        plan_id: &str,
        step_id: &str,
        state: StepState,
        summary: Option<String>,
        output: Option<serde_json::Value>,
        attempt: Option<u32>,
    ) -> EngineResult<()> {
        let store = self.store.clone();
        let plan_id = plan_id.to_string();
        let step_id = step_id.to_string();
        tokio::task::spawn_blocking(move || store.set_state(&plan_id, &step_id, state, summary, output, attempt))
            .await
            .expect("state store task panicked")
    }

    async fn record_approval(&self, plan_id: &str, step_id: &str, capability: &str, granted: bool) -> EngineResult<()> {
        let store = self.store.clone();
        let plan_id = plan_id.to_string();
        let step_id = step_id.to_string();
        let capability = capability.to_string();
        tokio::task::spawn_blocking(move || store.record_approval(&plan_id, &step_id, &capability, granted))
            .await
            .expect("state store task panicked")
    }

    async fn forget(&self, plan_id: &str, step_id: &str) -> EngineResult<()> {
        let store = self.store.clone();
        let plan_id = plan_id.to_string();
        let step_id = step_id.to_string();
        tokio::task::spawn_blocking(move || store.forget(&plan_id, &step_id)).await.expect("state store task panicked")
    }

    async fn list_active(&self) -> Vec<StepRecord> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.list_active()).await.expect("state store task panicked")
    }

    async fn get_entry(&self, plan_id: &str, step_id: &str) -> EngineResult<Option<StepRecord>> {
        let store = self.store.clone();
        let plan_id = plan_id.to_string();
        let step_id = step_id.to_string();
        Ok(tokio::task::spawn_blocking(move || store.get_entry(&plan_id, &step_id))
            .await
            .expect("state store task panicked"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::tempdir;

    use plan_contracts::tool::{ToolError, TransientCode};
    use plan_policy::TomlPolicyGate;
    use plan_queue::InProcessBroker;

    use super::*;

    fn sample_plan(approval_required: bool) -> Plan {
        Plan {
            id: "p1".to_string(),
            goal: "do a thing".to_string(),
            steps: vec![PlanStep {
                id: "s1".to_string(),
                action: "read the repo".to_string(),
                tool: "repo-reader".to_string(),
                capability: "repo.read".to_string(),
                capability_label: "Read repository".to_string(),
                labels: vec![],
                timeout_seconds: 5,
                approval_required,
                input: serde_json::json!({}),
                metadata: serde_json::json!({}),
            }],
            success_criteria: vec!["repo contents returned".to_string()],
        }
    }

    fn allow_all_policy() -> Arc<dyn PolicyGate> {
        Arc::new(
            TomlPolicyGate::from_toml_str(
                r#"
                [[rules]]
                id = "allow-everything"
                description = "test fixture: allow everything"
                action_type = "*"
                capability = "*"
                verdict = "allow"
                "#,
            )
            .unwrap(),
        )
    }

    fn deny_all_policy() -> Arc<dyn PolicyGate> {
        Arc::new(
            TomlPolicyGate::from_toml_str(
                r#"
                [[rules]]
                id = "deny-everything"
                description = "test fixture: deny everything"
                action_type = "*"
                capability = "*"
                verdict = "deny"
                deny_reason = "not on the list"
                "#,
            )
            .unwrap(),
        )
    }

    fn require_approval_policy() -> Arc<dyn PolicyGate> {
        Arc::new(
            TomlPolicyGate::from_toml_str(
                r#"
                [[rules]]
                id = "needs-approval"
                description = "test fixture: require approval for everything"
                action_type = "*"
                capability = "*"
                verdict = "require-approval"
                "#,
            )
            .unwrap(),
        )
    }

    struct AlwaysSucceeds;
    #[async_trait]
    impl ToolExecutor for AlwaysSucceeds {
        async fn execute(&self, invocation: &ToolInvocation) -> Result<Vec<ToolEvent>, ToolError> {
            Ok(vec![ToolEvent {
                invocation_id: invocation.invocation_id.clone(),
                plan_id: invocation.plan_id.clone(),
                step_id: invocation.step_id.clone(),
                state: StepState::Completed,
                summary: Some("done".to_string()),
                output: None,
                occurred_at: Utc::now(),
                attempt: None,
            }])
        }
    }

    struct FailsNTimesThenSucceeds {
        calls: AtomicU32,
        fail_count: u32,
    }
    #[async_trait]
    impl ToolExecutor for FailsNTimesThenSucceeds {
        async fn execute(&self, invocation: &ToolInvocation) -> Result<Vec<ToolEvent>, ToolError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_count {
                return Err(ToolError::transient(TransientCode::Unavailable, "briefly unavailable"));
            }
            Ok(vec![ToolEvent {
                invocation_id: invocation.invocation_id.clone(),
                plan_id: invocation.plan_id.clone(),
                step_id: invocation.step_id.clone(),
                state: StepState::Completed,
                summary: Some("done after retry".to_string()),
                output: None,
                occurred_at: Utc::now(),
                attempt: None,
            }])
        }
    }

    struct AlwaysFailsTransiently;
    #[async_trait]
    impl ToolExecutor for AlwaysFailsTransiently {
        async fn execute(&self, _invocation: &ToolInvocation) -> Result<Vec<ToolEvent>, ToolError> {
            Err(ToolError::transient(TransientCode::Unavailable, "never recovers"))
        }
    }

    fn test_engine(policy: Arc<dyn PolicyGate>, executor: Arc<dyn ToolExecutor>, retry_max: u32) -> Arc<Engine> {
        let dir = tempdir().unwrap();
        let store = PlanStateStore::open(dir.path().join("state.json")).unwrap();
        let queue: Arc<dyn QueueAdapter> = Arc::new(InProcessBroker::new());
        let bus = EventBus::new();
        let config = EngineConfig {
            state_path: dir.path().join("state.json"),
            queue_retry_max: retry_max,
            queue_retry_backoff_ms: 0,
            sse_keep_alive_ms: 25_000,
            tool_client_retry_max: 2,
            tool_client_retry_base_delay_ms: 1,
            tool_client_default_timeout_seconds: 5,
            event_bus_purge_interval: Duration::from_secs(60),
            messaging_type: crate::config::MessagingType::InProcess,
        };
        // Keep the temp dir alive for the store's lifetime by leaking it in
        // tests; acceptable since tests are short-lived processes.
        std::mem::forget(dir);
        Engine::new(store, queue, policy, executor, bus, config)
    }

    /// Poll `engine`'s bus history for `plan_id` until some event matches
    /// `state`, or give up after `timeout`.
    async fn wait_for_state(engine: &Arc<Engine>, plan_id: &str, state: StepState, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if engine.bus().history(plan_id).await.iter().any(|e| e.state == state) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn happy_path_runs_to_completion() {
        let engine = test_engine(allow_all_policy(), Arc::new(AlwaysSucceeds), 5);
        let shutdown = Shutdown::new();
        let consumer_engine = engine.clone();
        let rx = shutdown.subscribe();
        let handle = tokio::spawn(async move { consumer_engine.run_step_consumer(rx).await });

        engine.submit_plan(&sample_plan(false), "trace-1").await.unwrap();

        let completed = wait_for_state(&engine, "p1", StepState::Completed, Duration::from_secs(2)).await;
        assert!(completed);

        shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

        assert!(engine.get_entry("p1", "s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn submit_plan_with_approval_required_parks_in_waiting_approval() {
        let engine = test_engine(allow_all_policy(), Arc::new(AlwaysSucceeds), 5);
        engine.submit_plan(&sample_plan(true), "trace-1").await.unwrap();

        let record = engine.get_entry("p1", "s1").await.unwrap().unwrap();
        assert_eq!(record.state, StepState::WaitingApproval);
    }

    #[tokio::test]
    async fn policy_deny_fails_submission_for_non_approval_steps() {
        let engine = test_engine(deny_all_policy(), Arc::new(AlwaysSucceeds), 5);
        let err = engine.submit_plan(&sample_plan(false), "trace-1").await.unwrap_err();
        assert!(matches!(err, EngineError::PolicyDenied { .. }));
    }

    #[tokio::test]
    async fn approval_required_step_admits_despite_require_approval_policy() {
        let engine = test_engine(require_approval_policy(), Arc::new(AlwaysSucceeds), 5);
        engine.submit_plan(&sample_plan(true), "trace-1").await.unwrap();

        let record = engine.get_entry("p1", "s1").await.unwrap().unwrap();
        assert_eq!(record.state, StepState::WaitingApproval);
    }

    #[tokio::test]
    async fn resolve_approval_approve_dispatches_the_step() {
        let engine = test_engine(allow_all_policy(), Arc::new(AlwaysSucceeds), 5);
        engine.submit_plan(&sample_plan(true), "trace-1").await.unwrap();

        engine.resolve_approval("p1", "s1", ApprovalDecision::Approve, None).await.unwrap();

        let record = engine.get_entry("p1", "s1").await.unwrap().unwrap();
        assert_eq!(record.state, StepState::Queued);
        assert_eq!(engine.queue.depth(PLAN_STEPS_QUEUE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn resolve_approval_reject_forgets_the_step() {
        let engine = test_engine(allow_all_policy(), Arc::new(AlwaysSucceeds), 5);
        engine.submit_plan(&sample_plan(true), "trace-1").await.unwrap();

        engine.resolve_approval("p1", "s1", ApprovalDecision::Reject, None).await.unwrap();

        assert!(engine.get_entry("p1", "s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resolve_approval_on_non_waiting_step_is_a_conflict() {
        let engine = test_engine(allow_all_policy(), Arc::new(AlwaysSucceeds), 5);
        engine.submit_plan(&sample_plan(false), "trace-1").await.unwrap();

        let err = engine.resolve_approval("p1", "s1", ApprovalDecision::Approve, None).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn retry_then_success_completes_after_transient_failures() {
        let executor = Arc::new(FailsNTimesThenSucceeds { calls: AtomicU32::new(0), fail_count: 1 });
        let engine = test_engine(allow_all_policy(), executor, 5);
        let shutdown = Shutdown::new();
        let consumer_engine = engine.clone();
        let rx = shutdown.subscribe();
        let handle = tokio::spawn(async move { consumer_engine.run_step_consumer(rx).await });

        engine.submit_plan(&sample_plan(false), "trace-1").await.unwrap();

        let completed = wait_for_state(&engine, "p1", StepState::Completed, Duration::from_secs(2)).await;
        assert!(completed);

        shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

        let history = engine.bus().history("p1").await;
        assert!(history.iter().any(|e| e.state == StepState::Retrying));
        assert!(history.iter().any(|e| e.state == StepState::Completed));
    }

    #[tokio::test]
    async fn exhausted_retries_dead_letter_the_step() {
        let engine = test_engine(allow_all_policy(), Arc::new(AlwaysFailsTransiently), 1);
        let shutdown = Shutdown::new();
        let consumer_engine = engine.clone();
        let rx = shutdown.subscribe();
        let handle = tokio::spawn(async move { consumer_engine.run_step_consumer(rx).await });

        engine.submit_plan(&sample_plan(false), "trace-1").await.unwrap();

        let dead_lettered = wait_for_state(&engine, "p1", StepState::DeadLettered, Duration::from_secs(2)).await;
        assert!(dead_lettered);

        shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

        assert!(engine.get_entry("p1", "s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recover_reemits_events_for_active_records() {
        let engine = test_engine(allow_all_policy(), Arc::new(AlwaysSucceeds), 5);
        engine.submit_plan(&sample_plan(true), "trace-1").await.unwrap();

        engine.recover().await.unwrap();

        let history = engine.bus().history("p1").await;
        assert!(history.iter().filter(|e| e.state == StepState::WaitingApproval).count() >= 2);
    }
}

//! # plan-bus
//!
//! In-process pub/sub for `StepEvent`s, fanned out per plan (component C5).
//!
//! Each plan gets its own bounded history buffer and `tokio::sync::broadcast`
//! channel. A background task purges a plan's history `T` after its last
//! terminal event, so long-lived orchestrators don't accumulate state for
//! every plan they ever ran.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use plan_contracts::event::StepEvent;

/// History cap per plan (spec §4.5).
pub const HISTORY_CAP: usize = 200;

/// How long a plan's history survives after its last terminal event before
/// being purged (spec §4.5).
pub const TERMINAL_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Channel capacity for each plan's broadcast sender. Subscribers that fall
/// this far behind are dropped per spec §4.5 ("slow subscribers may be
/// dropped after a bounded queue fills").
const CHANNEL_CAPACITY: usize = 256;

struct PlanChannel {
    sender: broadcast::Sender<StepEvent>,
    history: Vec<StepEvent>,
    terminal_since: Option<DateTime<Utc>>,
}

impl PlanChannel {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender, history: Vec::new(), terminal_since: None }
    }
}

/// The event bus itself. Cheaply cloneable — internal state is
/// `Arc`-shared.
#[derive(Clone)]
pub struct EventBus {
    plans: Arc<RwLock<HashMap<String, PlanChannel>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self { plans: Arc::new(RwLock::new(HashMap::new())) }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `event` to its plan's history and notify current subscribers.
    /// Publishing to a plan with no subscribers is not an error — the event
    /// still lands in history for future `History`/SSE-replay callers.
    pub async fn publish(&self, event: StepEvent) {
        let mut plans = self.plans.write().await;
        let channel = plans.entry(event.plan_id.clone()).or_insert_with(PlanChannel::new);

        debug!(plan_id = %event.plan_id, step_id = %event.step_id, state = %event.state, "publishing event");

        channel.history.push(event.clone());
        if channel.history.len() > HISTORY_CAP {
            let overflow = channel.history.len() - HISTORY_CAP;
            channel.history.drain(0..overflow);
        }

        if event.state.is_terminal() {
            channel.terminal_since = Some(event.occurred_at);
        }

        // A send error just means there are currently no subscribers; the
        // event is still durable in `history`.
        let _ = channel.sender.send(event);
    }

    /// Subscribe to future events for `plan_id`. Does not replay history —
    /// callers that need a consistent view call `history` first (the SSE
    /// adapter in `plan-http` does exactly this).
    pub async fn subscribe(&self, plan_id: &str) -> broadcast::Receiver<StepEvent> {
        let mut plans = self.plans.write().await;
        plans.entry(plan_id.to_string()).or_insert_with(PlanChannel::new).sender.subscribe()
    }

    /// Ordered snapshot of every retained event for `plan_id`.
    pub async fn history(&self, plan_id: &str) -> Vec<StepEvent> {
        self.plans.read().await.get(plan_id).map(|c| c.history.clone()).unwrap_or_default()
    }

    /// The most recent event for a specific step, if any is retained.
    pub async fn latest(&self, plan_id: &str, step_id: &str) -> Option<StepEvent> {
        self.plans
            .read()
            .await
            .get(plan_id)?
            .history
            .iter()
            .rev()
            .find(|e| e.step_id == step_id)
            .cloned()
    }

    /// Drop history for any plan whose last terminal event is older than
    /// `TERMINAL_RETENTION`. Intended to run on a fixed interval from a
    /// background task owned by `plan-engine`.
    pub async fn purge_expired(&self, now: DateTime<Utc>) {
        let mut plans = self.plans.write().await;
        plans.retain(|plan_id, channel| {
            let expired = channel
                .terminal_since
                .map(|since| now.signed_duration_since(since).to_std().unwrap_or_default() >= TERMINAL_RETENTION)
                .unwrap_or(false);
            if expired {
                debug!(plan_id, "purging expired plan history");
            }
            !expired
        });
    }

    /// Spawn the background purge loop. Returns a handle the caller can
    /// abort on shutdown.
    pub fn spawn_purger(self, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.purge_expired(Utc::now()).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use plan_contracts::plan::PlanStep;
    use plan_contracts::state::StepState;

    use super::*;

    fn sample_event(plan_id: &str, step_id: &str, state: StepState) -> StepEvent {
        StepEvent {
            plan_id: plan_id.to_string(),
            step_id: step_id.to_string(),
            trace_id: "trace-1".to_string(),
            occurred_at: Utc::now(),
            state,
            attempt: 0,
            summary: None,
            output: None,
            step: PlanStep {
                id: step_id.to_string(),
                action: "do a thing".to_string(),
                tool: "some-tool".to_string(),
                capability: "repo.read".to_string(),
                capability_label: "Read repository".to_string(),
                labels: vec![],
                timeout_seconds: 30,
                approval_required: false,
                input: serde_json::json!({}),
                metadata: serde_json::json!({}),
            },
        }
    }

    #[tokio::test]
    async fn publish_then_history_returns_events_in_order() {
        let bus = EventBus::new();
        bus.publish(sample_event("p1", "s1", StepState::Queued)).await;
        bus.publish(sample_event("p1", "s1", StepState::Running)).await;

        let history = bus.history("p1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].state, StepState::Queued);
        assert_eq!(history[1].state, StepState::Running);
    }

    #[tokio::test]
    async fn subscribe_does_not_replay_prior_events() {
        let bus = EventBus::new();
        bus.publish(sample_event("p1", "s1", StepState::Queued)).await;

        let mut rx = bus.subscribe("p1").await;
        bus.publish(sample_event("p1", "s1", StepState::Running)).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.state, StepState::Running);
    }

    #[tokio::test]
    async fn history_is_capped_and_drops_oldest() {
        let bus = EventBus::new();
        for _ in 0..(HISTORY_CAP + 10) {
            bus.publish(sample_event("p1", "s1", StepState::Running)).await;
        }
        assert_eq!(bus.history("p1").await.len(), HISTORY_CAP);
    }

    #[tokio::test]
    async fn latest_returns_the_most_recent_event_for_a_step() {
        let bus = EventBus::new();
        bus.publish(sample_event("p1", "s1", StepState::Queued)).await;
        bus.publish(sample_event("p1", "s2", StepState::Queued)).await;
        bus.publish(sample_event("p1", "s1", StepState::Running)).await;

        let latest = bus.latest("p1", "s1").await.unwrap();
        assert_eq!(latest.state, StepState::Running);
    }

    #[tokio::test]
    async fn purge_expired_removes_plans_past_retention_after_terminal_event() {
        let bus = EventBus::new();
        bus.publish(sample_event("p1", "s1", StepState::Completed)).await;

        let far_future = Utc::now() + chrono::Duration::seconds(TERMINAL_RETENTION.as_secs() as i64 + 1);
        bus.purge_expired(far_future).await;

        assert!(bus.history("p1").await.is_empty());
    }

    #[tokio::test]
    async fn non_terminal_history_is_never_purged() {
        let bus = EventBus::new();
        bus.publish(sample_event("p1", "s1", StepState::Running)).await;

        let far_future = Utc::now() + chrono::Duration::seconds(TERMINAL_RETENTION.as_secs() as i64 + 1);
        bus.purge_expired(far_future).await;

        assert_eq!(bus.history("p1").await.len(), 1);
    }
}

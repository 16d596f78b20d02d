//! Wire payloads for the broker queues named in spec §6.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::PlanStep;
use crate::state::StepState;

pub const PLAN_STEPS_QUEUE: &str = "plan.steps";
pub const PLAN_COMPLETIONS_QUEUE: &str = "plan.completions";
pub const DEAD_LETTER_SUFFIX: &str = ".dead";

pub const HEADER_IDEMPOTENCY_KEY: &str = "x-idempotency-key";
pub const HEADER_TRACE_ID: &str = "trace-id";
pub const HEADER_ATTEMPTS: &str = "x-attempts";
pub const HEADER_DEAD_LETTER_REASON: &str = "x-dead-letter-reason";

/// Payload published to `plan.steps`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDispatchPayload {
    pub plan_id: String,
    pub step: PlanStep,
    pub trace_id: String,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

/// Payload published to `plan.completions`: an out-of-band terminal update
/// from an agent that outlived the orchestrator (spec §4.6, completion
/// consumer loop).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPayload {
    pub plan_id: String,
    pub step_id: String,
    pub state: StepState,
    pub summary: Option<String>,
    pub output: Option<serde_json::Value>,
    pub trace_id: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub attempt: Option<u32>,
    pub capability: Option<String>,
    pub tool: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub timeout_seconds: Option<u64>,
    pub approval_required: Option<bool>,
}

/// Returns the dead-letter queue name for a given source queue, e.g.
/// `plan.steps` -> `plan.steps.dead`.
pub fn dead_letter_queue(queue: &str) -> String {
    format!("{queue}{DEAD_LETTER_SUFFIX}")
}

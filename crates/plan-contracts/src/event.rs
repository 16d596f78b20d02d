//! `StepEvent`: the unit published by `plan-bus` (C5) for every state transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::PlanStep;
use crate::state::StepState;

/// A view of a step at the moment of one state transition.
///
/// One `StepEvent` is published per transition (spec §3, Invariants). The
/// embedded `step` is the immutable declared metadata; the remaining
/// fields mirror the `StepRecord` at publish time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEvent {
    pub plan_id: String,
    pub step_id: String,
    pub trace_id: String,
    pub occurred_at: DateTime<Utc>,
    pub state: StepState,
    pub attempt: u32,
    pub summary: Option<String>,
    pub output: Option<serde_json::Value>,
    pub step: PlanStep,
}

//! `StepRecord`: the durable, mutable-by-the-engine-only record that `plan-store`
//! persists for every active step.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::PlanStep;
use crate::state::StepState;

/// Compute the stable idempotency key for a step: `planId:stepId`.
///
/// Used as both the broker idempotency key (spec §4.2) and the dedupe key
/// the consumer loop checks against `plan-store` (spec §9, "At-least-once
/// + dedupe").
pub fn idempotency_key(plan_id: &str, step_id: &str) -> String {
    format!("{plan_id}:{step_id}")
}

/// The durable per-step record managed exclusively by `plan-store` and
/// mutated only by the engine (state transitions) and the approval resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub plan_id: String,
    pub step_id: String,
    /// Immutable snapshot of the step as declared in the plan.
    pub step: PlanStep,
    pub trace_id: String,
    pub state: StepState,
    pub summary: Option<String>,
    pub output: Option<serde_json::Value>,
    /// 0-based retry count; monotonic non-decreasing, incremented only on
    /// retry dispatch.
    pub attempt: u32,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// capability -> granted. Only ever set true via the approval endpoint,
    /// and only while `state == WaitingApproval`.
    #[serde(default)]
    pub approvals: HashMap<String, bool>,
}

impl StepRecord {
    pub fn new(
        plan_id: impl Into<String>,
        step: PlanStep,
        trace_id: impl Into<String>,
        initial_state: StepState,
        approvals: HashMap<String, bool>,
    ) -> Self {
        let plan_id = plan_id.into();
        let step_id = step.id.clone();
        let now = Utc::now();
        let idempotency_key = idempotency_key(&plan_id, &step_id);
        Self {
            plan_id,
            step_id,
            step,
            trace_id: trace_id.into(),
            state: initial_state,
            summary: None,
            output: None,
            attempt: 0,
            idempotency_key,
            created_at: now,
            updated_at: now,
            approvals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_is_plan_colon_step() {
        assert_eq!(idempotency_key("p1", "s1"), "p1:s1");
    }
}

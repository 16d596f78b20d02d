//! Plan and step definitions.
//!
//! A `Plan` is produced by the Planner (out of scope here — see `spec.md`
//! §1) and is read-only once it reaches the engine. `PlanStep` is immutable
//! after creation; the engine never rewrites a step's declared fields, only
//! the `StepRecord` that tracks its lifecycle.

use serde::{Deserialize, Serialize};

/// A single capability-gated tool invocation within a plan.
///
/// Immutable after the plan is created. `id` is unique within the owning
/// plan (not globally) — the pair `(planId, stepId)` is the engine's real
/// identity for a step, see `execution::idempotency_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    /// Unique within the plan.
    pub id: String,
    /// Human label, e.g. "Read repository contents".
    pub action: String,
    /// Tool agent identifier, e.g. "repo-reader".
    pub tool: String,
    /// Single permission token gating this step, e.g. "repo.write".
    pub capability: String,
    /// Human-readable label for `capability`.
    pub capability_label: String,
    /// Free-form tags.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Seconds before the tool RPC times out. 0 means "use the configured default".
    #[serde(default)]
    pub timeout_seconds: u64,
    /// Whether this step is gated behind human approval before dispatch.
    #[serde(default)]
    pub approval_required: bool,
    /// Opaque input passed to the tool agent.
    pub input: serde_json::Value,
    /// Opaque metadata, not interpreted by the engine.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// An ordered list of steps produced from a goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub goal: String,
    /// Must contain at least one step.
    pub steps: Vec<PlanStep>,
    /// Must be non-empty.
    pub success_criteria: Vec<String>,
}

impl Plan {
    /// Look up a step by id within this plan.
    pub fn step(&self, step_id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }
}

//! Goal-to-plan generation is explicitly out of scope here (spec §1,
//! "Planner (external)"). `Planner` is the seam the HTTP surface calls
//! through; `EchoPlanner` is the trivial stand-in this workspace ships so
//! `POST /plan` has something to submit in demos and tests.

use uuid::Uuid;

use plan_contracts::plan::{Plan, PlanStep};

/// Produces a validated [`Plan`] from a goal string. A real deployment
/// swaps this for whatever generates plans (an LLM call, a rules engine);
/// the engine itself never depends on how a `Plan` was produced.
pub trait Planner: Send + Sync {
    fn plan(&self, goal: &str) -> Plan;
}

/// Wraps the goal in a single auto-dispatched step against a generic
/// `goal.execute` capability. Good enough to exercise the engine end to
/// end; not a real planning implementation.
pub struct EchoPlanner;

impl Planner for EchoPlanner {
    fn plan(&self, goal: &str) -> Plan {
        let plan_id = Uuid::new_v4().to_string();
        let step = PlanStep {
            id: "s1".to_string(),
            action: goal.to_string(),
            tool: "echo".to_string(),
            capability: "goal.execute".to_string(),
            capability_label: "Execute goal".to_string(),
            labels: vec![],
            timeout_seconds: 0,
            approval_required: false,
            input: serde_json::json!({ "goal": goal }),
            metadata: serde_json::json!({}),
        };
        Plan {
            id: plan_id,
            goal: goal.to_string(),
            steps: vec![step],
            success_criteria: vec!["goal executed".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_planner_produces_one_auto_step() {
        let planner = EchoPlanner;
        let plan = planner.plan("ship the feature");
        assert_eq!(plan.steps.len(), 1);
        assert!(!plan.steps[0].approval_required);
        assert_eq!(plan.goal, "ship the feature");
    }
}

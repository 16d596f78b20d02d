//! Policy Gate (C4) contract types: the pure decision function's inputs
//! and output.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Who is asking. Built by the engine from the step's declared tool/capability
/// and the approvals currently on record for that step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySubject {
    pub agent: String,
    pub tool: String,
    pub capabilities: Vec<String>,
    /// capability -> granted, as currently on record in `plan-store`.
    pub approvals: HashMap<String, bool>,
    pub run_mode: String,
}

/// The kind of decision point being evaluated, per spec §4.4 "Usage points".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Evaluated once, at `SubmitPlan`.
    Admit,
    /// Evaluated just before dispatch (consumer pulls the message) and on
    /// the approval path.
    Dispatch,
}

/// What is being asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub plan_id: Option<String>,
    pub step_id: Option<String>,
    pub capabilities: Vec<String>,
    pub run_mode: String,
}

/// A single reason a request was denied. `capability` is set when the
/// denial is specifically about a missing/ungranted capability, so callers
/// can distinguish "approval_required" denials from hard denials per the
/// admission tie-break in spec §4.4/§4.6.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenyReason {
    pub reason: String,
    pub capability: Option<String>,
}

impl DenyReason {
    pub const APPROVAL_REQUIRED: &'static str = "approval_required";

    pub fn approval_required(capability: impl Into<String>) -> Self {
        Self {
            reason: Self::APPROVAL_REQUIRED.to_string(),
            capability: Some(capability.into()),
        }
    }

    pub fn is_approval_required(&self) -> bool {
        self.reason == Self::APPROVAL_REQUIRED
    }
}

/// The policy gate's verdict.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allow: bool,
    pub deny: Vec<DenyReason>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self { allow: true, deny: vec![] }
    }

    pub fn deny(reasons: Vec<DenyReason>) -> Self {
        Self { allow: false, deny: reasons }
    }

    /// True if every deny reason is exactly `approval_required`. Used by the
    /// admission tie-break in spec §4.4/§4.6: an approval-gated step whose
    /// only obstacle is missing approval is admitted to `waiting_approval`
    /// rather than rejected outright.
    pub fn denies_only_approval_required(&self) -> bool {
        !self.deny.is_empty() && self.deny.iter().all(DenyReason::is_approval_required)
    }
}

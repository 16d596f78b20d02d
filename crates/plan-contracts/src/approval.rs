//! The human decision that resolves a step parked in `waiting_approval`
//! (spec §4.6, `ResolveApproval`; spec §4.7, `POST .../approve`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject,
}

/// Body of `POST /plan/:planId/steps/:stepId/approve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub decision: ApprovalDecision,
    pub rationale: Option<String>,
}

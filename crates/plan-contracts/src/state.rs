//! The per-step lifecycle state machine.
//!
//! Edges are enumerated in `spec.md` §4.6. `StepState::can_transition_to`
//! is enforced by `plan-store`'s `PlanStateStore::set_state`, which is the
//! only place a record's state actually changes — every transition the
//! engine attempts is checked against this table before it's persisted.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Queued,
    Running,
    Retrying,
    WaitingApproval,
    Approved,
    Rejected,
    Completed,
    Failed,
    DeadLettered,
}

impl StepState {
    /// Terminal states are absorbing: no edge leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepState::Rejected | StepState::Completed | StepState::Failed | StepState::DeadLettered
        )
    }

    /// True if `self -> next` is a valid edge per the state machine in
    /// `spec.md` §4.6. Used defensively by the engine and by tests that
    /// assert a recorded event sequence is a valid walk.
    pub fn can_transition_to(self, next: StepState) -> bool {
        use StepState::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Queued, Running)
                // A step can also fail before ever reaching `running`, if the
                // broker rejects its dispatch enqueue outright (spec §4.6,
                // `SubmitPlan` step e) or its post-approval re-enqueue fails.
                | (Queued, Failed)
                | (Approved, Failed)
                // Policy is re-evaluated on every dispatch attempt (spec
                // §4.4), including the first one, before `running` is ever
                // published — a deny here rejects straight out of `queued`.
                | (Queued, Rejected)
                | (Running, Completed)
                | (Running, Retrying)
                | (Running, DeadLettered)
                | (Running, Failed)
                | (Running, Rejected)
                | (Retrying, Queued)
                | (WaitingApproval, Approved)
                | (WaitingApproval, Rejected)
                | (Approved, Queued)
        )
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepState::Queued => "queued",
            StepState::Running => "running",
            StepState::Retrying => "retrying",
            StepState::WaitingApproval => "waiting_approval",
            StepState::Approved => "approved",
            StepState::Rejected => "rejected",
            StepState::Completed => "completed",
            StepState::Failed => "failed",
            StepState::DeadLettered => "dead_lettered",
        };
        f.write_str(s)
    }
}

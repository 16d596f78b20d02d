//! The Tool Agent Client (C3) contract: what goes out over RPC and what
//! comes back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::StepState;

/// What the engine sends to a tool agent to execute one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub invocation_id: String,
    pub plan_id: String,
    pub step_id: String,
    pub tool: String,
    pub capability: String,
    pub capability_label: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub timeout_seconds: u64,
    pub approval_required: bool,
    pub input: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// One event in the finite sequence a tool agent emits while executing a step.
///
/// `state` is constrained to the subset of `StepState` a tool can legally
/// report: `Running` for progress, and one of `Completed`/`Failed` for the
/// terminal outcome. The consumer applies the "last terminal event wins"
/// tie-break from spec §4.6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolEvent {
    pub invocation_id: String,
    pub plan_id: String,
    pub step_id: String,
    pub state: StepState,
    pub summary: Option<String>,
    pub output: Option<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
    pub attempt: Option<u32>,
}

/// Transient RPC failure codes that the client retries on (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientCode {
    Unavailable,
    ResourceExhausted,
    Aborted,
    DeadlineExceeded,
}

/// A typed RPC failure. `retryable` drives the dispatch edges in §4.6.
#[derive(Debug, Clone, thiserror::Error)]
#[error("tool agent error ({code}): {message}")]
pub struct ToolError {
    pub retryable: bool,
    pub code: String,
    pub message: String,
    pub cause: Option<String>,
}

impl ToolError {
    pub fn transient(code: TransientCode, message: impl Into<String>) -> Self {
        let code_str = match code {
            TransientCode::Unavailable => "unavailable",
            TransientCode::ResourceExhausted => "resource-exhausted",
            TransientCode::Aborted => "aborted",
            TransientCode::DeadlineExceeded => "deadline-exceeded",
        };
        Self {
            retryable: true,
            code: code_str.to_string(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            code: code.into(),
            message: message.into(),
            cause: None,
        }
    }
}

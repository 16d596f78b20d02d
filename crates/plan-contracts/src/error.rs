//! Runtime error types for the plan execution engine.
//!
//! All fallible operations return `EngineResult<T>`. Error variants carry
//! enough context to produce actionable log lines and, on the HTTP surface,
//! actionable error bodies.

use thiserror::Error;

/// The unified error type for the engine and its components.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A policy rule denied the action outright (not merely "approval required").
    #[error("policy denied: {reason}")]
    PolicyDenied { reason: String },

    /// The broker could not accept a durable publish.
    #[error("queue enqueue failed: {reason}")]
    EnqueueFailed { reason: String },

    /// The state store could not durably persist a write.
    #[error("state store write failed: {reason}")]
    PersistFailed { reason: String },

    /// A step record was expected but not found.
    #[error("no active step record for {plan_id}/{step_id}")]
    StepNotFound { plan_id: String, step_id: String },

    /// An approval or dispatch was attempted against a step not in the
    /// expected state.
    #[error("step {plan_id}/{step_id} is in state {actual}, expected {expected}")]
    InvalidStateTransition {
        plan_id: String,
        step_id: String,
        actual: String,
        expected: String,
    },

    /// The tool agent call failed and retries (if any) were exhausted.
    #[error("tool agent call failed: {reason}")]
    ToolFailed { reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// Plan or step input failed basic structural validation.
    #[error("validation error: {reason}")]
    Validation { reason: String },
}

/// Convenience alias used throughout the engine crates.
pub type EngineResult<T> = Result<T, EngineError>;

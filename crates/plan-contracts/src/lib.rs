//! # plan-contracts
//!
//! Shared types, schemas, and contracts for the plan execution engine.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate — only data definitions, the step state machine, and error
//! types.

pub mod approval;
pub mod error;
pub mod event;
pub mod plan;
pub mod policy;
pub mod queue;
pub mod record;
pub mod state;
pub mod tool;

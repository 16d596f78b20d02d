//! # plan-store
//!
//! Durable, atomic per-step state store for the plan execution engine
//! (component C1).
//!
//! The store is deliberately synchronous: a single `Mutex` guards an
//! in-memory index, and every mutation persists the full snapshot to disk
//! before returning. Callers on the async side (`plan-engine`) wrap calls in
//! `tokio::task::spawn_blocking`.

mod file;
mod store;

pub use store::PlanStateStore;

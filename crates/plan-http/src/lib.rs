//! # plan-http
//!
//! The Plan HTTP Surface (component C7): a thin axum front door over
//! `plan-engine`. No business logic lives here beyond request validation
//! and response shaping — every decision is made by the `Engine`.

pub mod planner;
pub mod routes;
pub mod state;
pub mod tool_agent;

pub use planner::{EchoPlanner, Planner};
pub use routes::router;
pub use state::AppState;
pub use tool_agent::EchoToolAgent;

//! # plan-client
//!
//! Tool Agent Client (component C3): invokes the external agent over RPC
//! with a deadline and bounded retry on transient codes.

pub mod client;

pub use client::{terminal_event, ClientConfig, RawToolAgent, ToolAgentClient, ToolExecutor};

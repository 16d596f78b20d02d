//! # plan-queue
//!
//! Broker-backed queue abstraction with durable enqueue, at-least-once
//! consume, and dead-letter routing (component C2).

pub mod adapter;
pub mod memory;

pub use adapter::{
    exponential_backoff_ms, Consumer, Delivery, EnqueueOptions, QueueAdapter, QueueAdapterExt, Resolution,
};
pub use memory::InProcessBroker;

//! The `QueueAdapter` contract: a uniform API over a durable broker
//! (spec §4.2, component C2).
//!
//! Production deployments point this at RabbitMQ or Kafka; `InProcessBroker`
//! (see `memory.rs`) is the adapter used by tests, demos, and single-process
//! deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use plan_contracts::error::EngineResult;

/// Options accompanying a durable publish.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub idempotency_key: Option<String>,
    pub headers: HashMap<String, String>,
    pub delay_ms: Option<u64>,
}

impl EnqueueOptions {
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }
}

/// A message delivered to a consumer. Dropping a `Delivery` without calling
/// `ack`, `retry`, or `dead_letter` is a bug: spec §4.2 requires every
/// delivery to resolve to one of the three outcomes, treating an unresolved
/// handler exit as an implicit retry at the default delay.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: String,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub attempts: u32,
}

impl Delivery {
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }
}

/// Outcome a consumer applies to a `Delivery` once handling finishes.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Remove the message from redelivery.
    Ack,
    /// Reinsert the message, incrementing `attempts`, after `delay_ms`.
    Retry { delay_ms: u64 },
    /// Route the message to its dead-letter queue.
    DeadLetter { reason: String, queue: Option<String> },
}

/// A handle to an open consumer registration on one queue.
#[async_trait]
pub trait Consumer: Send {
    /// Block until the next delivery, or `None` once the adapter is shut
    /// down.
    async fn recv(&mut self) -> Option<Delivery>;

    /// Resolve a delivery previously returned by `recv`.
    async fn resolve(&self, delivery: &Delivery, resolution: Resolution) -> EngineResult<()>;
}

/// Uniform API over a durable broker (spec §4.2).
#[async_trait]
pub trait QueueAdapter: Send + Sync {
    /// Durable publish. Broker-unreachable errors must surface to the
    /// caller — spec §4.2 requires the engine to roll the step back to
    /// `failed` rather than silently retry the publish itself.
    async fn enqueue(&self, queue: &str, payload: Vec<u8>, opts: EnqueueOptions) -> EngineResult<()>;

    /// Register a consumer for `queue`. Queues are created idempotently on
    /// first use by either `enqueue` or `consume`.
    async fn consume(&self, queue: &str) -> EngineResult<Box<dyn Consumer>>;

    /// Best-effort backlog size.
    async fn depth(&self, queue: &str) -> EngineResult<u64>;
}

/// JSON convenience helpers layered over the byte-oriented `QueueAdapter`.
#[async_trait]
pub trait QueueAdapterExt: QueueAdapter {
    async fn enqueue_json<T: Serialize + Sync>(
        &self,
        queue: &str,
        payload: &T,
        opts: EnqueueOptions,
    ) -> EngineResult<()> {
        let bytes = serde_json::to_vec(payload).map_err(|e| {
            plan_contracts::error::EngineError::EnqueueFailed {
                reason: format!("failed to serialize payload: {e}"),
            }
        })?;
        self.enqueue(queue, bytes, opts).await
    }
}

impl<T: QueueAdapter + ?Sized> QueueAdapterExt for T {}

/// Exponential backoff used by the consumer loop between retry attempts
/// (spec §4.6, "Backoff"): `delay = base · 2^attempt`, saturating rather
/// than overflowing. `base_ms = 0` means immediate requeue (the default
/// when `QUEUE_RETRY_BACKOFF_MS` is unset).
pub fn exponential_backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    if base_ms == 0 {
        return 0;
    }
    base_ms.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_base_means_no_delay() {
        assert_eq!(exponential_backoff_ms(0, 5), 0);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(exponential_backoff_ms(200, 0), 200);
        assert_eq!(exponential_backoff_ms(200, 1), 400);
        assert_eq!(exponential_backoff_ms(200, 2), 800);
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        assert_eq!(exponential_backoff_ms(u64::MAX, 10), u64::MAX);
    }
}

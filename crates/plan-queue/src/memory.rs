//! `InProcessBroker`: a single-process `QueueAdapter` backed by Tokio
//! channels.
//!
//! The retrieval pack ships no RabbitMQ/Kafka client crate, so this adapter
//! stands in for a real broker in tests, demos, and single-process
//! deployments — the same shape a `lapin`- or `rdkafka`-backed adapter would
//! have, minus the network round trip. Swapping in a real broker means
//! implementing [`QueueAdapter`] again; nothing above it changes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, warn};
use uuid::Uuid;

use plan_contracts::error::{EngineError, EngineResult};
use plan_contracts::queue::{dead_letter_queue, HEADER_ATTEMPTS, HEADER_DEAD_LETTER_REASON};

use crate::adapter::{Consumer, Delivery, EnqueueOptions, QueueAdapter, Resolution};

struct QueueChannel {
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: AsyncMutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
    depth: AtomicI64,
}

impl QueueChannel {
    fn new() -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            sender,
            receiver: AsyncMutex::new(Some(receiver)),
            depth: AtomicI64::new(0),
        })
    }
}

type QueueMap = Arc<Mutex<HashMap<String, Arc<QueueChannel>>>>;

fn channel_for(queues: &QueueMap, queue: &str) -> Arc<QueueChannel> {
    let mut queues = queues.lock().unwrap_or_else(|e| e.into_inner());
    queues.entry(queue.to_string()).or_insert_with(QueueChannel::new).clone()
}

fn publish(queues: &QueueMap, queue: &str, delivery: Delivery) -> EngineResult<()> {
    let channel = channel_for(queues, queue);
    channel.depth.fetch_add(1, Ordering::SeqCst);
    channel.sender.send(delivery).map_err(|_| EngineError::EnqueueFailed {
        reason: format!("queue '{queue}' has no registered consumer channel"),
    })
}

/// In-process stand-in broker. Each queue name maps to its own unbounded
/// channel; "durability" is process lifetime only.
#[derive(Clone)]
pub struct InProcessBroker {
    queues: QueueMap,
}

impl Default for InProcessBroker {
    fn default() -> Self {
        Self { queues: Arc::new(Mutex::new(HashMap::new())) }
    }
}

impl InProcessBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cheap, cloneable handle sharing this broker's queue map. Consumers
    /// use this to publish retries and dead-letters without owning the
    /// broker outright.
    fn handle(&self) -> InProcessBrokerHandle {
        InProcessBrokerHandle { queues: self.queues.clone() }
    }
}

#[async_trait]
impl QueueAdapter for InProcessBroker {
    async fn enqueue(&self, queue: &str, payload: Vec<u8>, opts: EnqueueOptions) -> EngineResult<()> {
        let mut headers = opts.headers;
        if let Some(key) = &opts.idempotency_key {
            headers.insert(
                plan_contracts::queue::HEADER_IDEMPOTENCY_KEY.to_string(),
                key.clone(),
            );
        }
        headers.insert(HEADER_ATTEMPTS.to_string(), "0".to_string());

        let delivery = Delivery { id: Uuid::new_v4().to_string(), payload, headers, attempts: 0 };

        debug!(queue, idempotency_key = ?opts.idempotency_key, "enqueueing message");

        if let Some(delay_ms) = opts.delay_ms.filter(|d| *d > 0) {
            let queues = self.queues.clone();
            let target = queue.to_string();
            channel_for(&queues, queue).depth.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                let channel = channel_for(&queues, &target);
                if channel.sender.send(delivery).is_err() {
                    warn!(queue = %target, "delayed enqueue dropped: no consumer channel");
                }
            });
            return Ok(());
        }

        publish(&self.queues, queue, delivery)
    }

    async fn consume(&self, queue: &str) -> EngineResult<Box<dyn Consumer>> {
        let channel = channel_for(&self.queues, queue);
        let receiver = channel
            .receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| EngineError::ConfigError {
                reason: format!("queue '{queue}' already has an active consumer"),
            })?;

        Ok(Box::new(InProcessConsumer {
            queue: queue.to_string(),
            receiver,
            channel,
            handle: self.handle(),
        }))
    }

    async fn depth(&self, queue: &str) -> EngineResult<u64> {
        let depth = channel_for(&self.queues, queue).depth.load(Ordering::SeqCst);
        Ok(depth.max(0) as u64)
    }
}

/// Shared handle used by consumers to publish retries/dead-letters back
/// into the same broker's queue map.
#[derive(Clone)]
struct InProcessBrokerHandle {
    queues: QueueMap,
}

struct InProcessConsumer {
    queue: String,
    receiver: mpsc::UnboundedReceiver<Delivery>,
    channel: Arc<QueueChannel>,
    handle: InProcessBrokerHandle,
}

#[async_trait]
impl Consumer for InProcessConsumer {
    async fn recv(&mut self) -> Option<Delivery> {
        let delivery = self.receiver.recv().await;
        if delivery.is_some() {
            self.channel.depth.fetch_sub(1, Ordering::SeqCst);
        }
        delivery
    }

    async fn resolve(&self, delivery: &Delivery, resolution: Resolution) -> EngineResult<()> {
        match resolution {
            Resolution::Ack => Ok(()),
            Resolution::Retry { delay_ms } => {
                let mut headers = delivery.headers.clone();
                let attempts = delivery.attempts + 1;
                headers.insert(HEADER_ATTEMPTS.to_string(), attempts.to_string());
                let redelivery = Delivery {
                    id: delivery.id.clone(),
                    payload: delivery.payload.clone(),
                    headers,
                    attempts,
                };
                if delay_ms > 0 {
                    let queues = self.handle.queues.clone();
                    let queue = self.queue.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                        if let Err(e) = publish(&queues, &queue, redelivery) {
                            warn!(queue, error = %e, "failed to republish delayed retry");
                        }
                    });
                    Ok(())
                } else {
                    publish(&self.handle.queues, &self.queue, redelivery)
                }
            }
            Resolution::DeadLetter { reason, queue } => {
                let target = queue.unwrap_or_else(|| dead_letter_queue(&self.queue));
                let mut headers = delivery.headers.clone();
                headers.insert(HEADER_DEAD_LETTER_REASON.to_string(), reason.clone());
                headers.insert(HEADER_ATTEMPTS.to_string(), delivery.attempts.to_string());
                let dead = Delivery {
                    id: delivery.id.clone(),
                    payload: delivery.payload.clone(),
                    headers,
                    attempts: delivery.attempts,
                };
                debug!(queue = %target, reason, "dead-lettering message");
                publish(&self.handle.queues, &target, dead)
            }
        }
    }
}

//! Cooperative shutdown signal observed by the consumer loops between
//! messages (spec §5, "callers must pass a cancellation token/context").
//!
//! There is no `tokio-util::CancellationToken` in the dependency stack, so
//! this is a plain `broadcast` channel: every live loop holds a receiver
//! and selects on it alongside its next unit of work.

use tokio::sync::broadcast;

#[derive(Clone)]
pub struct Shutdown {
    sender: broadcast::Sender<()>,
}

impl Default for Shutdown {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self { sender }
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal every subscriber to stop after their current unit of work.
    /// A send with no subscribers is not an error.
    pub fn trigger(&self) {
        let _ = self.sender.send(());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_wakes_subscribers() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        shutdown.trigger();
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn trigger_with_no_subscribers_does_not_panic() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
    }
}

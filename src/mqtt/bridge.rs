//! Hand-off from the broker I/O task to the consumer context
//!
//! ```text
//! I/O task ──[Delivery]──► unbounded mpsc ──► ConsumerContext::run
//!                                              (callbacks execute here)
//! ```
//!
//! A single channel keeps every delivery in arrival order, which covers the
//! guarantee that messages for the same topic are never reordered. The
//! consumer processes one delivery at a time, so callback bodies never run
//! concurrently with each other.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::dispatcher::Delivery;

/// Sending half, owned by the I/O task
#[derive(Clone)]
pub struct BridgeSender {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl BridgeSender {
    /// Queues a delivery for the consumer context.
    ///
    /// Returns false when the consumer context is gone; the delivery is lost.
    pub fn send(&self, delivery: Delivery) -> bool {
        match self.tx.send(delivery) {
            Ok(()) => true,
            Err(e) => {
                debug!(
                    "Consumer context closed, dropping message on {}",
                    e.0.topic
                );
                false
            }
        }
    }
}

/// Receiving half: the single-threaded context where callbacks run
pub struct ConsumerContext {
    rx: mpsc::UnboundedReceiver<Delivery>,
    processed: u64,
}

pub fn channel() -> (BridgeSender, ConsumerContext) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BridgeSender { tx }, ConsumerContext { rx, processed: 0 })
}

impl ConsumerContext {
    /// Processes deliveries until cancelled or until the I/O side closes.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Consumer context started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Consumer context cancelled after {} deliveries", self.processed);
                    break;
                }
                delivery = self.rx.recv() => {
                    match delivery {
                        Some(delivery) => self.process(delivery),
                        None => {
                            info!("Broker side closed, consumer context stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Processes everything already queued without waiting.
    pub fn drain(&mut self) -> usize {
        let mut count = 0;
        while let Ok(delivery) = self.rx.try_recv() {
            self.process(delivery);
            count += 1;
        }
        count
    }

    /// Waits for the next delivery and processes it.
    pub async fn next(&mut self) -> Option<()> {
        let delivery = self.rx.recv().await?;
        self.process(delivery);
        Some(())
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    fn process(&mut self, delivery: Delivery) {
        let failures = delivery.dispatch();
        self.processed += 1;
        if failures > 0 {
            debug!(
                "{} of {} callbacks failed for {}",
                failures,
                delivery.callbacks.len(),
                delivery.topic
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::registry::{callback, Resolved};
    use std::sync::{Arc, Mutex};

    fn delivery(topic: &str, payload: &str, seen: Arc<Mutex<Vec<String>>>) -> Delivery {
        let cb = callback(move |t: &str, p: &str| {
            seen.lock().unwrap().push(format!("{t}={p}"));
            Ok(())
        });
        Delivery::new(
            topic.to_string(),
            payload.to_string(),
            Resolved {
                pattern: topic.to_string(),
                callbacks: vec![cb],
            },
        )
    }

    #[tokio::test]
    async fn deliveries_keep_arrival_order() {
        let (tx, mut consumer) = channel();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for payload in ["OPEN", "CLOSED", "OPEN"] {
            assert!(tx.send(delivery("zone/1", payload, seen.clone())));
        }
        assert!(tx.send(delivery("zone/2", "OPEN", seen.clone())));

        assert_eq!(consumer.drain(), 4);
        assert_eq!(consumer.processed(), 4);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["zone/1=OPEN", "zone/1=CLOSED", "zone/1=OPEN", "zone/2=OPEN"]
        );
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let (_tx, consumer) = channel();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(cancel.clone()));
        cancel.cancel();
        handle.await.expect("consumer task finished");
    }

    #[tokio::test]
    async fn send_after_consumer_dropped_is_lost() {
        let (tx, consumer) = channel();
        drop(consumer);
        let seen = Arc::new(Mutex::new(Vec::new()));
        assert!(!tx.send(delivery("t", "p", seen.clone())));
        assert!(seen.lock().unwrap().is_empty());
    }
}

//! The consensus-topic boundary and its in-process implementation.
//!
//! A topic is an append-only broadcast log: every published message is
//! delivered to every subscriber, in per-topic order, at least once.
//! Exactly-once is NOT promised — redeliveries happen, and consumers must
//! deduplicate by message id. Readers never mutate the log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Errors from the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The topic has been closed; no further publishes or subscribes.
    #[error("Topic closed")]
    Closed,

    /// A publish was not acknowledged.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Subscription setup failed.
    #[error("Subscribe failed: {0}")]
    Subscribe(String),
}

/// One message delivered from the topic.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The raw message bytes (UTF-8 JSON envelope).
    pub payload: Vec<u8>,
    /// Per-topic delivery sequence number. Redeliveries get fresh numbers.
    pub sequence: u64,
    /// When the transport handed this delivery to the subscriber.
    pub received_at: DateTime<Utc>,
}

/// A long-lived subscription to a topic.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    /// Receive the next delivery; `None` once the topic is closed.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

/// An append-only broadcast log with at-least-once delivery.
#[async_trait]
pub trait Topic: Send + Sync {
    /// Append a message; best-effort acknowledgement.
    async fn publish(&self, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Open a broadcast subscription delivering every published message.
    async fn subscribe(&self) -> Result<Subscription, TransportError>;
}

/// In-process topic: fans every publish out to every live subscriber.
///
/// Retains the full log so tests can force redeliveries and model the
/// at-least-once contract.
pub struct MemoryTopic {
    name: String,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Delivery>>>,
    log: Mutex<Vec<Vec<u8>>>,
    sequence: AtomicU64,
    closed: std::sync::atomic::AtomicBool,
}

impl MemoryTopic {
    /// Create a named topic.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscribers: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// The topic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of messages appended so far.
    pub fn len(&self) -> usize {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether nothing has been published yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Redeliver the `index`-th log entry to all subscribers with a fresh
    /// sequence number. Test aid modeling at-least-once duplication.
    pub fn redeliver(&self, index: usize) -> bool {
        let payload = {
            let log = self.log.lock().unwrap_or_else(|e| e.into_inner());
            match log.get(index) {
                Some(p) => p.clone(),
                None => return false,
            }
        };
        self.fan_out(payload);
        true
    }

    /// Close the topic: live subscriptions drain and then end.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn fan_out(&self, payload: Vec<u8>) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let delivery = Delivery {
            payload,
            sequence,
            received_at: Utc::now(),
        };
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        // Drop subscribers whose receiver has gone away.
        subscribers.retain(|tx| tx.send(delivery.clone()).is_ok());
        debug!(
            topic = %self.name,
            sequence,
            subscribers = subscribers.len(),
            "Delivered message"
        );
    }
}

#[async_trait]
impl Topic for MemoryTopic {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(payload.clone());
        self.fan_out(payload);
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        Ok(Subscription { rx })
    }
}

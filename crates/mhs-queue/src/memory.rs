//! # In-Memory Queue
//!
//! Single-process broker backed by a bounded `tokio::sync::mpsc` channel.
//! Suitable for tests and single-node operation; distributed deployments
//! plug a real broker in behind [`QueueAdaptor`].

use crate::adaptor::{QueueAdaptor, QueueError};
use crate::message::QueueMessage;
use crate::DEFAULT_QUEUE_CAPACITY;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// In-memory implementation of the queue adaptor.
pub struct InMemoryQueue {
    /// Queue name, used in log output.
    name: String,

    /// Publishing side.
    sender: mpsc::Sender<QueueMessage>,

    /// Consuming side. Competing consumers take turns on the lock.
    receiver: Mutex<mpsc::Receiver<QueueMessage>>,

    /// Total messages accepted.
    messages_published: AtomicU64,

    /// Channel capacity.
    capacity: usize,
}

impl InMemoryQueue {
    /// Create a queue with default capacity.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a queue with the given capacity.
    #[must_use]
    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            name: name.into(),
            sender,
            receiver: Mutex::new(receiver),
            messages_published: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Queue name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Messages currently waiting to be received.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.sender
            .max_capacity()
            .saturating_sub(self.sender.capacity())
    }

    /// Channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total messages accepted since creation.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl QueueAdaptor for InMemoryQueue {
    async fn send_async(&self, message: QueueMessage) -> Result<(), QueueError> {
        let message_id = message.properties.message_id().map(str::to_owned);
        match self.sender.try_send(message) {
            Ok(()) => {
                self.messages_published.fetch_add(1, Ordering::Relaxed);
                debug!(queue = %self.name, message_id = ?message_id, "Message published");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(queue = %self.name, message_id = ?message_id, "Queue full, message rejected");
                Err(QueueError::Rejected(format!("queue {} is full", self.name)))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    async fn send_sync(&self, message: QueueMessage) -> Result<(), QueueError> {
        let message_id = message.properties.message_id().map(str::to_owned);
        self.sender
            .send(message)
            .await
            .map_err(|_| QueueError::Closed)?;
        self.messages_published.fetch_add(1, Ordering::Relaxed);
        debug!(queue = %self.name, message_id = ?message_id, "Message published (confirmed)");
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<QueueMessage>, QueueError> {
        let mut receiver = self.receiver.lock().await;
        match tokio::time::timeout(timeout, receiver.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(QueueError::Closed),
            Err(_) => Ok(None),
        }
    }
}

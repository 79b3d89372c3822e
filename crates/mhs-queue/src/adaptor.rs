//! # Queue Adaptor Port
//!
//! The broker-facing interface. Transport internals of the real broker live
//! behind implementations of this trait.

use crate::message::QueueMessage;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors from queue operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The broker connection is closed.
    #[error("Queue closed")]
    Closed,

    /// The broker refused the message.
    #[error("Queue rejected message: {0}")]
    Rejected(String),

    /// The broker could not be reached.
    #[error("Queue connection error: {0}")]
    Connection(String),
}

/// Message-broker publish and receive.
///
/// Send and receive paths are independent; implementations must be safe to
/// share between every concurrent workflow.
#[async_trait]
pub trait QueueAdaptor: Send + Sync {
    /// Publish without waiting for broker confirmation.
    async fn send_async(&self, message: QueueMessage) -> Result<(), QueueError>;

    /// Publish and wait until the broker has accepted the message.
    async fn send_sync(&self, message: QueueMessage) -> Result<(), QueueError>;

    /// Block up to `timeout` for the next message.
    ///
    /// Returns `Ok(None)` when the timeout elapsed with nothing to deliver.
    async fn receive(&self, timeout: Duration) -> Result<Option<QueueMessage>, QueueError>;
}

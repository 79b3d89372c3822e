//! # MHS Queue - Message Broker Abstraction
//!
//! Queue adaptor used by the Message Handling Service for the inbound
//! acknowledgement channel and for parking asynchronous responses whose
//! original caller is no longer attached.
//!
//! ## Contract
//!
//! ```text
//! ┌──────────────┐   send_async / send_sync   ┌──────────────┐
//! │  Workflow    │ ─────────────────────────→ │    Queue     │
//! │  Engine      │                            │   Adaptor    │
//! └──────────────┘                            └──────────────┘
//!                                                    │
//!                                   receive(timeout) │
//!                                                    ↓
//!                                          ┌──────────────────┐
//!                                          │ Inbound listener │
//!                                          │ / poll retrieval │
//!                                          └──────────────────┘
//! ```
//!
//! - `send_async` is fire-and-forget: it never waits for broker capacity.
//! - `send_sync` waits until the broker has accepted the message.
//! - `receive` blocks up to a timeout and returns `None` when nothing arrived.
//!
//! Message properties carry the message id and correlation id used to match
//! inbound traffic to outstanding workflows.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adaptor;
pub mod memory;
pub mod message;

pub use adaptor::{QueueAdaptor, QueueError};
pub use memory::InMemoryQueue;
pub use message::{MessageProperties, QueueMessage};

/// Maximum messages buffered by the in-memory broker before `send_sync` waits.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Property name carrying the workflow message id.
pub const MESSAGE_ID_PROPERTY: &str = "message-id";

/// Property name carrying the caller's correlation id.
pub const CORRELATION_ID_PROPERTY: &str = "correlation-id";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacity() {
        assert_eq!(DEFAULT_QUEUE_CAPACITY, 1000);
    }
}

//! # Adapters Module
//!
//! Implementations of the outbound ports plus the inbound queue listener.

pub mod ack_listener;
pub mod http_transport;
pub mod memory_store;

pub use ack_listener::{
    AcknowledgementListener, ListenerOutcome, DEFAULT_MAX_REDELIVERIES, DEFAULT_RECEIVE_TIMEOUT,
    REDELIVERY_PROPERTY,
};
pub use http_transport::{HttpTransport, DEFAULT_HTTP_TIMEOUT};
pub use memory_store::InMemoryStateStore;

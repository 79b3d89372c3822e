//! # MHS Workflow Engine
//!
//! Reliable-delivery workflow engine of the Message Handling Service.
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! Accept an outbound clinical payload for a named interaction, wrap it in an
//! ebXML envelope, transmit it and drive the message to a terminal state:
//! - Synchronous: complete on the HTTP response
//! - Asynchronous express: complete on acceptance; the response arrives later
//! - Asynchronous reliable: retransmit until acknowledged or out of retries
//! - Intermediary reliable: as reliable, routed through a forwarding node
//!
//! ## Guarantees
//!
//! | Guarantee | Mechanism |
//! |-----------|-----------|
//! | Sequence ids never reused | Conditional write per increment |
//! | One terminal state per message | Compare-and-swap transitions |
//! | Retransmissions flagged | DuplicateElimination on every resend |
//! | No lost acknowledgement | Store is authoritative; wake-ups only shorten polling |
//!
//! ## Module Structure
//!
//! ```text
//! mhs-workflow/
//! ├── domain/          # Interaction, MessageRecord, MessageState, config, errors
//! ├── envelope/        # Request/ack builders, inbound parsing
//! ├── fault.rs         # SOAP / ebXML fault detection
//! ├── ports/           # WorkflowApi, StateStore, MessageTransport
//! ├── adapters/        # In-memory store, HTTP transport, ack listener
//! └── service/         # WorkflowEngine, sequences, state repository
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod domain;
pub mod envelope;
pub mod fault;
pub mod metrics;
pub mod ports;
pub mod service;

mod xml;

// Re-exports
pub use adapters::{AcknowledgementListener, HttpTransport, InMemoryStateStore, ListenerOutcome};
pub use domain::{
    AckDisposition, AckOutcome, AckPolicy, CompletionPolicy, ConfigError, EnvelopeError,
    InboundAcknowledgement, Interaction, InteractionDefinition, InteractionRegistry,
    MessageRecord, MessageState, OutboundMessage, OutboundRequest, PatternStrategy,
    RequestContext, RetryPolicy, RoutingTarget, SendError, StoreError, WorkflowConfig,
    WorkflowError, WorkflowOutcome, WorkflowPattern,
};
pub use envelope::{
    parse_inbound, parse_received_header, AckEnvelopeBuilder, EnvelopeBuilder, EnvelopeFields,
    ReceivedHeader, RequestEnvelopeBuilder,
};
pub use fault::{is_fault, parse_fault, EbxmlError, SoapFault};
pub use metrics::{MetricsSnapshot, WorkflowMetrics};
pub use ports::{
    CasOutcome, MessageTransport, MockReply, MockTransport, StateStore, TransportRequest,
    TransportResponse, WorkflowApi,
};
pub use service::{EnginePorts, WorkflowEngine};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    #[allow(clippy::const_is_empty)]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}

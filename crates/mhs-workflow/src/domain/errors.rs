//! # Domain Errors
//!
//! Error types for the workflow engine and the ports it drives.

use super::value_objects::MessageState;
use thiserror::Error;

/// Caller-visible workflow errors.
#[derive(Debug, Error, PartialEq)]
pub enum WorkflowError {
    /// Interaction name is not configured. Raised before any I/O.
    #[error("Unknown interaction: {0}")]
    UnknownInteraction(String),

    /// The remote party returned a protocol fault or negative acknowledgement.
    #[error("Remote fault for message {message_id}: {detail}")]
    RemoteFault {
        /// Message the fault refers to
        message_id: String,
        /// Fault code / description reported by the remote
        detail: String,
    },

    /// No acknowledgement or response arrived within the deadline.
    #[error("Timed out waiting on message {message_id} after {attempts} attempt(s)")]
    Timeout {
        /// Message that timed out
        message_id: String,
        /// Transmission attempts made
        attempts: u32,
    },

    /// Network or queue failure.
    #[error("Transport error for message {message_id}: {detail}")]
    TransportError {
        /// Message being delivered
        message_id: String,
        /// Underlying failure
        detail: String,
    },

    /// State store unreachable after bounded retries.
    #[error("Persistence error: {0}")]
    PersistenceError(#[from] StoreError),

    /// Envelope could not be rendered.
    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// The durable record is not in the state this workflow step requires.
    #[error("State conflict for message {message_id}: expected {expected}, found {actual:?}")]
    StateConflict {
        /// Message id
        message_id: String,
        /// State the step required
        expected: MessageState,
        /// State actually stored
        actual: Option<MessageState>,
    },

    /// A transition outside the state machine was requested.
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: MessageState,
        /// Attempted state
        to: MessageState,
    },

    /// A background workflow task ended abnormally.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkflowError {
    /// HTTP status class the request layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnknownInteraction(_) => 400,
            Self::RemoteFault { .. } | Self::TransportError { .. } => 502,
            Self::Timeout { .. } => 504,
            Self::StateConflict { .. } => 409,
            Self::PersistenceError(_)
            | Self::Envelope(_)
            | Self::InvalidTransition { .. }
            | Self::Internal(_) => 500,
        }
    }
}

/// Errors from the persisted state store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store could not be reached.
    #[error("State store unavailable: {0}")]
    Unavailable(String),

    /// Every compare-and-swap attempt lost to a concurrent writer.
    #[error("Contention on key {key}: gave up after {attempts} attempts")]
    Contention {
        /// Contended key
        key: String,
        /// Attempts made
        attempts: u32,
    },

    /// A record with this key already exists.
    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    /// Stored value could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors from the outbound transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Connection could not be established or was reset.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The transport's own timeout elapsed.
    #[error("Request timed out")]
    Timeout,

    /// The endpoint address is unusable.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Envelope rendering errors. Configuration or programming faults; never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// A required field is absent.
    #[error("Missing required envelope field: {0}")]
    MissingField(String),

    /// A flag field is neither "true" nor "false".
    #[error("Invalid flag value for {field}: {value}")]
    InvalidFlag {
        /// Field name
        field: String,
        /// Offending value
        value: String,
    },

    /// Template contains an unterminated placeholder.
    #[error("Malformed template near byte {0}")]
    MalformedTemplate(usize),
}

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Interaction document could not be parsed.
    #[error("Failed to parse interactions: {0}")]
    Parse(String),

    /// Two interactions share a name.
    #[error("Duplicate interaction: {0}")]
    DuplicateInteraction(String),

    /// Intermediary pattern configured without an intermediary endpoint.
    #[error("Interaction {0} uses an intermediary pattern but has no intermediary endpoint")]
    MissingIntermediary(String),

    /// Any other invalid setting.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

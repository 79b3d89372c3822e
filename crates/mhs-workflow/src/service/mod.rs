//! # Service Layer
//!
//! The workflow engine and the persistence helpers it drives.

pub mod engine;
pub mod pending;
pub mod sequence;
pub mod state;
pub mod store_retry;

pub use engine::{EnginePorts, WorkflowEngine, OUTCOME_PROPERTY, REASON_PROPERTY};
pub use pending::{AckWaiters, AttachedResponses};
pub use sequence::{
    interchange_key, message_key, SequenceGenerator, SequenceIds, TRANSACTION_ID_KEY,
};
pub use state::{MessageStateRepository, TransitionOutcome};
pub use store_retry::StoreRetry;

//! # Sequence Generator
//!
//! Persisted monotonic counters. Each `next` reads the current value and
//! compare-and-swaps `current + 1`; a lost race rereads and tries again, so
//! values may be skipped but are never issued twice.

use super::store_retry::StoreRetry;
use crate::domain::StoreError;
use crate::ports::outbound::{CasOutcome, StateStore};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

/// Global transaction id counter.
pub const TRANSACTION_ID_KEY: &str = "transaction_id";

/// Interchange sequence key for a sender/recipient pair.
pub fn interchange_key(sender: &str, recipient: &str) -> String {
    format!("SIS-{sender}-{recipient}")
}

/// Message sequence key for a sender/recipient pair.
pub fn message_key(sender: &str, recipient: &str) -> String {
    format!("SMS-{sender}-{recipient}")
}

/// Ids allocated for one outbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequenceIds {
    /// Interchange sequence id.
    pub interchange_id: u64,
    /// Message sequence id.
    pub message_sequence: u64,
    /// Transaction id.
    pub transaction_id: u64,
}

/// Issues strictly increasing numbers per key.
pub struct SequenceGenerator {
    store: Arc<dyn StateStore>,
    retry: StoreRetry,
    max_attempts: u32,
}

impl SequenceGenerator {
    /// Generator over `store`, giving up after `max_attempts` lost races.
    pub fn new(store: Arc<dyn StateStore>, retry: StoreRetry, max_attempts: u32) -> Self {
        Self {
            store,
            retry,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Next value for `key`, starting at 1.
    pub async fn next(&self, key: &str) -> Result<u64, StoreError> {
        let store = self.store.as_ref();

        for attempt in 1..=self.max_attempts {
            let current = self
                .retry
                .run("sequence_read", move || store.get(key))
                .await?;

            let next = match &current {
                None => 1,
                Some(value) => value
                    .as_u64()
                    .ok_or_else(|| StoreError::Serialization(format!("{key} is not a counter")))?
                    .checked_add(1)
                    .ok_or_else(|| StoreError::Serialization(format!("{key} overflowed")))?,
            };

            let expected = current.as_ref();
            let outcome = self
                .retry
                .run("sequence_cas", move || {
                    store.conditional_put(key, expected, Value::from(next))
                })
                .await?;

            match outcome {
                CasOutcome::Applied => {
                    trace!(key, value = next, attempt, "Sequence number issued");
                    return Ok(next);
                }
                CasOutcome::Conflict { .. } => {
                    trace!(key, attempt, "Sequence write lost race");
                }
            }
        }

        debug!(key, attempts = self.max_attempts, "Sequence contention");
        Err(StoreError::Contention {
            key: key.to_string(),
            attempts: self.max_attempts,
        })
    }

    /// Interchange, message and transaction ids for one message.
    pub async fn allocate(&self, sender: &str, recipient: &str) -> Result<SequenceIds, StoreError> {
        Ok(SequenceIds {
            interchange_id: self.next(&interchange_key(sender, recipient)).await?,
            message_sequence: self.next(&message_key(sender, recipient)).await?,
            transaction_id: self.next(TRANSACTION_ID_KEY).await?,
        })
    }
}

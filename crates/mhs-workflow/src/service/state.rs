//! # Message State Repository
//!
//! Durable `MessageRecord` projection keyed by message id. Every transition
//! is a compare-and-swap against the record as last read, so a writer
//! holding a stale prior state is rejected instead of applied.

use super::store_retry::StoreRetry;
use crate::domain::{MessageRecord, MessageState, StoreError, WorkflowError};
use crate::ports::outbound::{CasOutcome, StateStore};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

/// Lost races tolerated while the prior state still matches.
const TRANSITION_ATTEMPTS: u32 = 5;

/// Result of a conditional transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Written; the new record.
    Applied(MessageRecord),
    /// The stored state was not the expected prior state.
    Rejected {
        /// What is stored now.
        current: Option<MessageRecord>,
    },
}

/// Reads and conditionally writes message records.
pub struct MessageStateRepository {
    store: Arc<dyn StateStore>,
    retry: StoreRetry,
}

impl MessageStateRepository {
    /// Repository over `store`.
    pub fn new(store: Arc<dyn StateStore>, retry: StoreRetry) -> Self {
        Self { store, retry }
    }

    /// Insert a fresh record. Fails if the id is already taken.
    pub async fn create(&self, record: &MessageRecord) -> Result<(), StoreError> {
        let store = self.store.as_ref();
        let key = record.message_id.as_str();
        let value = encode(record)?;

        match self
            .retry
            .run("record_create", move || store.conditional_put(key, None, value.clone()))
            .await?
        {
            CasOutcome::Applied => {
                trace!(message_id = key, "Message record created");
                Ok(())
            }
            CasOutcome::Conflict { .. } => Err(StoreError::AlreadyExists(key.to_string())),
        }
    }

    /// Load a record.
    pub async fn load(&self, message_id: &str) -> Result<Option<MessageRecord>, StoreError> {
        Ok(self.load_raw(message_id).await?.map(|(record, _)| record))
    }

    async fn load_raw(&self, message_id: &str) -> Result<Option<(MessageRecord, Value)>, StoreError> {
        let store = self.store.as_ref();
        let raw = self
            .retry
            .run("record_read", move || store.get(message_id))
            .await?;
        raw.map(|value| decode(&value).map(|record| (record, value)))
            .transpose()
    }

    /// Move `message_id` from `from` to `to`, applying `update` to the
    /// stored record. Rejected when the stored state is not `from`.
    pub async fn transition<F>(
        &self,
        message_id: &str,
        from: MessageState,
        to: MessageState,
        update: F,
    ) -> Result<TransitionOutcome, WorkflowError>
    where
        F: Fn(&mut MessageRecord),
    {
        if !from.can_transition_to(to) {
            return Err(WorkflowError::InvalidTransition { from, to });
        }

        let store = self.store.as_ref();
        let mut loaded = self.load_raw(message_id).await?;

        for _ in 0..TRANSITION_ATTEMPTS {
            let Some((record, raw)) = loaded else {
                return Ok(TransitionOutcome::Rejected { current: None });
            };
            if record.state != from {
                debug!(
                    message_id,
                    expected = %from,
                    actual = %record.state,
                    "Transition rejected"
                );
                return Ok(TransitionOutcome::Rejected {
                    current: Some(record),
                });
            }

            let mut next = record;
            next.state = to;
            next.updated_at = Utc::now();
            update(&mut next);
            let value = encode(&next)?;

            let expected = Some(&raw);
            let outcome = self
                .retry
                .run("record_transition", move || {
                    store.conditional_put(message_id, expected, value.clone())
                })
                .await?;

            match outcome {
                CasOutcome::Applied => {
                    debug!(message_id, from = %from, to = %to, "State transition");
                    return Ok(TransitionOutcome::Applied(next));
                }
                CasOutcome::Conflict { current } => {
                    loaded = current
                        .map(|value| decode(&value).map(|record| (record, value)))
                        .transpose()?;
                }
            }
        }

        Err(StoreError::Contention {
            key: message_id.to_string(),
            attempts: TRANSITION_ATTEMPTS,
        }
        .into())
    }
}

fn encode(record: &MessageRecord) -> Result<Value, StoreError> {
    serde_json::to_value(record).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode(value: &Value) -> Result<MessageRecord, StoreError> {
    serde_json::from_value(value.clone()).map_err(|e| StoreError::Serialization(e.to_string()))
}

//! In-memory State Store Adapter
//!
//! Implements the `StateStore` port over a `RwLock<HashMap>`. Used by tests
//! and single-instance deployments; an outage can be simulated with
//! [`InMemoryStateStore::set_available`].

use crate::domain::StoreError;
use crate::ports::outbound::{CasOutcome, StateStore};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::trace;

/// In-memory `StateStore`.
pub struct InMemoryStateStore {
    entries: RwLock<HashMap<String, Value>>,
    available: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Read calls served, including failed ones.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Write calls served, including failed ones.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store offline".to_string()))
        }
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        Ok(self.entries.read().get(key).cloned())
    }

    async fn conditional_put(
        &self,
        key: &str,
        expected: Option<&Value>,
        value: Value,
    ) -> Result<CasOutcome, StoreError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;

        let mut entries = self.entries.write();
        let current = entries.get(key);
        if current != expected {
            trace!(key, "conditional put conflict");
            return Ok(CasOutcome::Conflict {
                current: current.cloned(),
            });
        }
        entries.insert(key.to_string(), value);
        Ok(CasOutcome::Applied)
    }

    async fn increment_and_get(&self, key: &str) -> Result<u64, StoreError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;

        let mut entries = self.entries.write();
        let next = match entries.get(key) {
            None => 1,
            Some(value) => value
                .as_u64()
                .ok_or_else(|| StoreError::Serialization(format!("{key} is not a counter")))?
                .checked_add(1)
                .ok_or_else(|| StoreError::Serialization(format!("{key} overflowed")))?,
        };
        entries.insert(key.to_string(), Value::from(next));
        Ok(next)
    }
}

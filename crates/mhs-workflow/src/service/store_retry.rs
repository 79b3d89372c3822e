//! Bounded retry for an unavailable state store.

use crate::domain::StoreError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Fixed-backoff retry applied to `StoreError::Unavailable` only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreRetry {
    attempts: u32,
    backoff: Duration,
}

impl StoreRetry {
    /// `attempts` total tries (at least one) separated by `backoff`.
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Total tries per operation.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Run `op`, retrying while the store is unavailable.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(StoreError::Unavailable(reason)) if attempt < self.attempts => {
                    warn!(operation, attempt, %reason, "State store unavailable, retrying");
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

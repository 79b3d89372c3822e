//! # Outbound Ports
//!
//! Traits for external dependencies (state store, network transport).

use crate::domain::{SendError, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;

/// Result of a compare-and-swap write.
#[derive(Clone, Debug, PartialEq)]
pub enum CasOutcome {
    /// Value written.
    Applied,
    /// Stored value did not match the expectation; nothing written.
    Conflict {
        /// What is stored now.
        current: Option<Value>,
    },
}

/// Persisted state store - outbound port.
///
/// Every mutation is atomic per key. Values are JSON documents.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a document.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write `value` only if the stored document equals `expected`
    /// (`None` = key must be absent).
    async fn conditional_put(
        &self,
        key: &str,
        expected: Option<&Value>,
        value: Value,
    ) -> Result<CasOutcome, StoreError>;

    /// Atomically increment a numeric document, creating it at 1.
    ///
    /// For backends with a native atomic counter. [`SequenceGenerator`]
    /// only relies on `get` and `conditional_put`, and both paths store the
    /// counter as the same plain integer, so they can share a key.
    ///
    /// [`SequenceGenerator`]: crate::service::SequenceGenerator
    async fn increment_and_get(&self, key: &str) -> Result<u64, StoreError>;
}

/// One HTTP exchange with a remote party.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportRequest {
    /// Message being carried.
    pub message_id: String,
    /// Target URL.
    pub endpoint: String,
    /// SOAPAction header.
    pub soap_action: String,
    /// Rendered envelope.
    pub body: String,
}

/// Raw response from the remote party.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status.
    pub status: u16,
    /// Response body, possibly empty.
    pub body: String,
}

impl TransportResponse {
    /// Response with a status and body.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body, or `None` when empty.
    pub fn body(&self) -> Option<&str> {
        (!self.body.trim().is_empty()).then_some(self.body.as_str())
    }
}

/// Network transport - outbound port.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Post an envelope and return the remote's response.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, SendError>;
}

// =============================================================================
// Mock Implementations for Testing
// =============================================================================

/// Scripted reply for [`MockTransport`].
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Answer immediately.
    Respond(TransportResponse),
    /// Answer after a delay.
    Delayed(Duration, TransportResponse),
    /// Fail the send.
    Fail(SendError),
}

/// Mock transport for testing. Records every request.
pub struct MockTransport {
    script: Mutex<VecDeque<MockReply>>,
    fallback: MockReply,
    requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    /// Answers `202 Accepted` with an empty body unless scripted.
    pub fn new() -> Self {
        Self::with_fallback(MockReply::Respond(TransportResponse::new(202, "")))
    }

    /// Use `reply` whenever the script is empty.
    pub fn with_fallback(fallback: MockReply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a reply for the next send.
    pub fn push_reply(&self, reply: MockReply) {
        self.script.lock().push_back(reply);
    }

    /// Requests seen so far.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }

    /// Number of sends.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageTransport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, SendError> {
        self.requests.lock().push(request);
        let reply = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match reply {
            MockReply::Respond(response) => Ok(response),
            MockReply::Delayed(delay, response) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            MockReply::Fail(err) => Err(err),
        }
    }
}

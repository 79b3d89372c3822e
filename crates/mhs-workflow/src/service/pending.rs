//! Pending waiters, the async-to-sync bridge between inbound
//! acknowledgements and the workflows waiting on them.
//!
//! - [`AttachedResponses`]: express callers still attached for a response
//! - [`AckWaiters`]: reliable drivers waiting for an acknowledgement
//!
//! Both are in-process wake-ups only. The state store stays authoritative.

use crate::domain::InboundAcknowledgement;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Notify};
use tracing::debug;

/// Callers waiting on the asynchronous response to a message.
#[derive(Default)]
pub struct AttachedResponses {
    pending: DashMap<String, oneshot::Sender<InboundAcknowledgement>>,
}

impl AttachedResponses {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register before sending so an early response is not missed.
    pub fn register(&self, message_id: &str) -> oneshot::Receiver<InboundAcknowledgement> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(message_id.to_string(), tx);
        debug!(message_id, "Caller attached for response");
        rx
    }

    /// Hand the response to the attached caller. `false` if nobody is
    /// attached or the caller went away.
    pub fn complete(&self, ack: InboundAcknowledgement) -> bool {
        let Some((_, sender)) = self.pending.remove(&ack.message_id) else {
            return false;
        };
        let message_id = ack.message_id.clone();
        match sender.send(ack) {
            Ok(()) => true,
            Err(_) => {
                debug!(message_id = %message_id, "Attached caller dropped");
                false
            }
        }
    }

    /// Detach a caller.
    pub fn cancel(&self, message_id: &str) {
        self.pending.remove(message_id);
    }

    /// Number of attached callers.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no caller is attached.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Wake-ups for drivers waiting on an acknowledgement.
#[derive(Default)]
pub struct AckWaiters {
    waiters: DashMap<String, Arc<Notify>>,
}

impl AckWaiters {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle the driver waits on.
    pub fn register(&self, message_id: &str) -> Arc<Notify> {
        self.waiters
            .entry(message_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Wake the driver for `message_id`, if any. A wake with nobody waiting
    /// is kept for the next wait.
    pub fn notify(&self, message_id: &str) {
        if let Some(notify) = self.waiters.get(message_id) {
            notify.notify_one();
        }
    }

    /// Drop the handle once the driver finishes.
    pub fn remove(&self, message_id: &str) {
        self.waiters.remove(message_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_attached_response_delivered() {
        let attached = AttachedResponses::new();
        let rx = attached.register("M1");
        assert!(attached.complete(InboundAcknowledgement::positive("M1").with_payload("<r/>")));
        let ack = rx.await.unwrap();
        assert_eq!(ack.payload.as_deref(), Some("<r/>"));
        assert!(attached.is_empty());
    }

    #[test]
    fn test_complete_without_caller() {
        let attached = AttachedResponses::new();
        assert!(!attached.complete(InboundAcknowledgement::positive("M1")));
    }

    #[test]
    fn test_dropped_caller() {
        let attached = AttachedResponses::new();
        drop(attached.register("M1"));
        assert!(!attached.complete(InboundAcknowledgement::positive("M1")));
    }

    #[tokio::test]
    async fn test_notify_before_wait_is_kept() {
        let waiters = AckWaiters::new();
        let notify = waiters.register("M1");
        waiters.notify("M1");
        tokio::time::timeout(Duration::from_secs(1), notify.notified())
            .await
            .unwrap();
    }

    #[test]
    fn test_notify_unknown_is_noop() {
        let waiters = AckWaiters::new();
        waiters.notify("nobody");
        waiters.remove("nobody");
    }
}

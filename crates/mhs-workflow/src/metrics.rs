//! Workflow counters. No exporter; read them through [`WorkflowMetrics::snapshot`].

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Engine metrics
#[derive(Debug, Default)]
pub struct WorkflowMetrics {
    // Outbound
    messages_sent: AtomicU64,
    retransmissions: AtomicU64,

    // Acknowledgements
    acks_applied: AtomicU64,
    duplicate_acks: AtomicU64,

    // Outcomes
    failures: AtomicU64,
    timeouts: AtomicU64,
}

/// Point-in-time copy of [`WorkflowMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Transmissions, including retransmissions.
    pub messages_sent: u64,
    /// Retransmissions after a missing acknowledgement.
    pub retransmissions: u64,
    /// Acknowledgements that drove a transition.
    pub acks_applied: u64,
    /// Acknowledgements for messages already in the outcome's state.
    pub duplicate_acks: u64,
    /// Workflows ending in FAILED for any reason.
    pub failures: u64,
    /// Workflows that timed out.
    pub timeouts: u64,
}

impl WorkflowMetrics {
    /// Zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transmission.
    pub fn record_send(&self, retransmission: bool) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        if retransmission {
            self.retransmissions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an applied acknowledgement.
    pub fn record_ack_applied(&self) {
        self.acks_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a duplicate acknowledgement.
    pub fn record_duplicate_ack(&self) {
        self.duplicate_acks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed workflow.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a timed-out workflow (also a failure).
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            acks_applied: self.acks_applied.load(Ordering::Relaxed),
            duplicate_acks: self.duplicate_acks.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

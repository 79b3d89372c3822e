//! # Domain Value Objects
//!
//! Message states, workflow patterns and the strategy set that parameterises
//! the shared workflow driver.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle state of an outbound message.
///
/// ```text
/// CREATED → SENT → COMPLETED
///             │ ↖
///             ↓   ╲ (retry)
///         AWAITING_ACK → ACKED | NACKED
///             │
///             ↓
///          EXPIRED → FAILED
/// ```
///
/// SENT may also go straight to ACKED/NACKED (acknowledgement raced the
/// driver) or FAILED (transport failure, remote fault).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageState {
    /// Admitted, nothing transmitted yet.
    #[default]
    Created,
    /// Handed to the transport.
    Sent,
    /// Transmitted, waiting for an acknowledgement or async response.
    AwaitingAck,
    /// Positively acknowledged.
    Acked,
    /// Negatively acknowledged.
    Nacked,
    /// Gave up.
    Failed,
    /// Retry bound exhausted without acknowledgement.
    Expired,
    /// Synchronous response received.
    Completed,
}

impl MessageState {
    /// Check if transition is valid.
    pub fn can_transition_to(&self, next: MessageState) -> bool {
        use MessageState::*;
        matches!(
            (self, next),
            (Created, Sent)
                | (Sent, Completed)
                | (Sent, AwaitingAck)
                | (Sent, Acked)
                | (Sent, Nacked)
                | (Sent, Failed)
                | (AwaitingAck, Acked)
                | (AwaitingAck, Nacked)
                | (AwaitingAck, Expired)
                | (AwaitingAck, Sent)
                | (Expired, Failed)
        )
    }

    /// Check if terminal state (eligible for archival).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Acked | Self::Nacked | Self::Failed | Self::Expired | Self::Completed
        )
    }

    /// Whether an inbound acknowledgement may still be applied.
    pub fn accepts_acknowledgement(&self) -> bool {
        matches!(self, Self::Sent | Self::AwaitingAck)
    }

    /// Wire name, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Sent => "SENT",
            Self::AwaitingAck => "AWAITING_ACK",
            Self::Acked => "ACKED",
            Self::Nacked => "NACKED",
            Self::Failed => "FAILED",
            Self::Expired => "EXPIRED",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messaging pattern configured for an interaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPattern {
    /// Request/response on one connection.
    Synchronous,
    /// Accepted immediately, response arrives on the inbound channel.
    AsyncExpress,
    /// Acknowledged delivery with retransmission.
    AsyncReliable,
    /// Acknowledged delivery via an intermediary.
    IntermediaryReliable,
}

impl WorkflowPattern {
    /// Reliable patterns require an acknowledgement before success.
    pub fn is_reliable(&self) -> bool {
        matches!(self, Self::AsyncReliable | Self::IntermediaryReliable)
    }

    /// Config/log name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Synchronous => "synchronous",
            Self::AsyncExpress => "async_express",
            Self::AsyncReliable => "async_reliable",
            Self::IntermediaryReliable => "intermediary_reliable",
        }
    }
}

impl fmt::Display for WorkflowPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When the caller is told the outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// Block for the transport response; terminal on first response.
    OnResponse,
    /// Report acceptance once the transport took the message.
    OnAcceptance,
    /// Report success only after ACKED.
    OnAcknowledgement,
}

/// Retransmission bound and per-attempt expiry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retransmissions after the first send.
    pub max_retries: u32,
    /// How long each attempt waits for its acknowledgement.
    pub expiry: Duration,
}

impl RetryPolicy {
    /// Single attempt, no retransmission.
    pub fn once(expiry: Duration) -> Self {
        Self {
            max_retries: 0,
            expiry,
        }
    }

    /// First send plus retransmissions.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Which endpoint the message is routed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutingTarget {
    /// The ultimate receiver.
    Receiver,
    /// A forwarding intermediary.
    Intermediary,
}

/// Strategy set selected per interaction at dispatch time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatternStrategy {
    /// Completion reporting.
    pub completion: CompletionPolicy,
    /// Retry mechanics.
    pub retry: RetryPolicy,
    /// Routing target.
    pub routing: RoutingTarget,
}

/// Envelope flags derived from the acknowledgement policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckPolicy {
    /// Ask the receiver for an ebXML acknowledgement.
    pub ack_requested: bool,
    /// Ask the receiver to discard already-processed copies.
    pub duplicate_elimination: bool,
    /// Ask for the reply on the same connection.
    pub sync_reply: bool,
}

impl AckPolicy {
    /// Defaults per pattern.
    pub fn for_pattern(pattern: WorkflowPattern) -> Self {
        Self {
            ack_requested: pattern.is_reliable(),
            duplicate_elimination: pattern.is_reliable(),
            sync_reply: matches!(
                pattern,
                WorkflowPattern::Synchronous | WorkflowPattern::AsyncReliable
            ),
        }
    }
}

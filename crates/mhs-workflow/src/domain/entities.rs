//! # Domain Entities
//!
//! Interactions, outbound messages, their durable projection and inbound
//! acknowledgements.

use super::value_objects::{
    AckPolicy, CompletionPolicy, MessageState, PatternStrategy, RetryPolicy, RoutingTarget,
    WorkflowPattern,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Immutable configuration for one interaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interaction {
    /// Interaction name used in the request path.
    pub name: String,
    /// Messaging pattern.
    pub pattern: WorkflowPattern,
    /// Ultimate receiver endpoint.
    pub endpoint: String,
    /// Intermediary endpoint for intermediary-reliable routing.
    pub intermediary_endpoint: Option<String>,
    /// ebXML service.
    pub service: String,
    /// ebXML action.
    pub action: String,
    /// Our party id.
    pub from_party_id: String,
    /// Remote party id.
    pub to_party_id: String,
    /// Collaboration protocol agreement id.
    pub cpa_id: String,
    /// Envelope flags.
    pub ack_policy: AckPolicy,
    /// Retransmissions after the first send (reliable patterns).
    pub retries: u32,
    /// Per-attempt acknowledgement expiry.
    pub expiry: Duration,
    /// Synchronous response deadline.
    pub deadline: Duration,
}

impl Interaction {
    /// Select the driver strategy for this interaction.
    pub fn strategy(&self) -> PatternStrategy {
        match self.pattern {
            WorkflowPattern::Synchronous => PatternStrategy {
                completion: CompletionPolicy::OnResponse,
                retry: RetryPolicy::once(self.deadline),
                routing: RoutingTarget::Receiver,
            },
            WorkflowPattern::AsyncExpress => PatternStrategy {
                completion: CompletionPolicy::OnAcceptance,
                retry: RetryPolicy::once(self.expiry),
                routing: RoutingTarget::Receiver,
            },
            WorkflowPattern::AsyncReliable => PatternStrategy {
                completion: CompletionPolicy::OnAcknowledgement,
                retry: RetryPolicy {
                    max_retries: self.retries,
                    expiry: self.expiry,
                },
                routing: RoutingTarget::Receiver,
            },
            WorkflowPattern::IntermediaryReliable => PatternStrategy {
                completion: CompletionPolicy::OnAcknowledgement,
                retry: RetryPolicy {
                    max_retries: self.retries,
                    expiry: self.expiry,
                },
                routing: RoutingTarget::Intermediary,
            },
        }
    }

    /// Endpoint for a routing target.
    ///
    /// Registry validation guarantees intermediary patterns carry an
    /// intermediary endpoint; the receiver endpoint is the fallback.
    pub fn endpoint_for(&self, routing: RoutingTarget) -> &str {
        match routing {
            RoutingTarget::Receiver => &self.endpoint,
            RoutingTarget::Intermediary => self
                .intermediary_endpoint
                .as_deref()
                .unwrap_or(&self.endpoint),
        }
    }

    /// SOAPAction header value.
    pub fn soap_action(&self) -> String {
        format!("{}/{}", self.service, self.action)
    }
}

/// Opaque correlation/routing metadata supplied by the request layer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Caller correlation id; becomes the ebXML conversation id.
    pub correlation_id: Option<String>,
    /// Caller-chosen message id (`?messageId=`).
    pub message_id: Option<String>,
    /// Interaction id as sent by the caller.
    pub interaction_id: Option<String>,
    /// Id of the inbound message this request answers, if any.
    pub inbound_message_id: Option<String>,
    /// Requesting system id.
    pub requesting_system: Option<String>,
    /// Origin system code.
    pub origin_system: Option<String>,
    /// Caller stays attached for an asynchronous response.
    #[serde(default)]
    pub wait_for_response: bool,
}

/// A request admitted by the request layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutboundRequest {
    /// Clinical payload.
    pub payload: String,
    /// Correlation metadata.
    pub context: RequestContext,
}

impl OutboundRequest {
    /// Request with empty context.
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            context: RequestContext::default(),
        }
    }

    /// Builder-style context.
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }
}

/// In-flight message, owned by the workflow driver.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    /// ebXML message id.
    pub message_id: String,
    /// Conversation id.
    pub conversation_id: String,
    /// Interchange sequence id.
    pub interchange_id: u64,
    /// Message sequence id.
    pub message_sequence: u64,
    /// Global transaction id.
    pub transaction_id: u64,
    /// Clinical payload.
    pub payload: String,
    /// Rendered envelope for the current attempt.
    pub envelope: String,
    /// Admission time.
    pub created_at: DateTime<Utc>,
    /// Last state written by this driver.
    pub state: MessageState,
    /// Transmission attempts so far.
    pub attempts: u32,
}

/// Durable projection of an outbound message, keyed by message id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Message id.
    pub message_id: String,
    /// Interaction name.
    pub interaction: String,
    /// Pattern the workflow runs.
    pub pattern: WorkflowPattern,
    /// Current state.
    pub state: MessageState,
    /// Transmission attempts.
    pub attempts: u32,
    /// Interchange sequence id.
    pub interchange_id: u64,
    /// Caller correlation id.
    pub correlation_id: Option<String>,
    /// When the current attempt stops waiting.
    pub expires_at: Option<DateTime<Utc>>,
    /// Admission time.
    pub created_at: DateTime<Utc>,
    /// Last write.
    pub updated_at: DateTime<Utc>,
    /// Last failure or negative acknowledgement reason.
    pub last_error: Option<String>,
}

impl MessageRecord {
    /// Fresh CREATED record for a message.
    pub fn new(
        message: &OutboundMessage,
        interaction: &Interaction,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            message_id: message.message_id.clone(),
            interaction: interaction.name.clone(),
            pattern: interaction.pattern,
            state: MessageState::Created,
            attempts: 0,
            interchange_id: message.interchange_id,
            correlation_id,
            expires_at: None,
            created_at: message.created_at,
            updated_at: message.created_at,
            last_error: None,
        }
    }
}

/// Outcome carried by an inbound acknowledgement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckOutcome {
    /// Receipt confirmed.
    Positive,
    /// Receipt refused.
    Negative {
        /// Error description from the remote.
        reason: String,
    },
}

impl AckOutcome {
    /// State this outcome drives the message to.
    pub fn target_state(&self) -> MessageState {
        match self {
            Self::Positive => MessageState::Acked,
            Self::Negative { .. } => MessageState::Nacked,
        }
    }

    /// Name used in queue properties.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "ack",
            Self::Negative { .. } => "nack",
        }
    }
}

/// Acknowledgement or asynchronous response correlated by message id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundAcknowledgement {
    /// Id of the message being acknowledged.
    pub message_id: String,
    /// Timestamp reported by the remote.
    pub timestamp: DateTime<Utc>,
    /// Positive or negative.
    pub outcome: AckOutcome,
    /// Response body for asynchronous responses.
    pub payload: Option<String>,
}

impl InboundAcknowledgement {
    /// Positive acknowledgement stamped now.
    pub fn positive(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            timestamp: Utc::now(),
            outcome: AckOutcome::Positive,
            payload: None,
        }
    }

    /// Negative acknowledgement stamped now.
    pub fn negative(message_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            timestamp: Utc::now(),
            outcome: AckOutcome::Negative {
                reason: reason.into(),
            },
            payload: None,
        }
    }

    /// Attach a response body.
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

/// What the caller gets back on success.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkflowOutcome {
    /// Synchronous response received.
    Completed {
        /// Message id
        message_id: String,
        /// Response body
        response: String,
    },
    /// Transport accepted the message; the response will be queued.
    Accepted {
        /// Message id
        message_id: String,
    },
    /// Asynchronous response delivered to the attached caller.
    Responded {
        /// Message id
        message_id: String,
        /// Response body, if the remote sent one
        response: Option<String>,
    },
    /// Reliable delivery acknowledged.
    Acknowledged {
        /// Message id
        message_id: String,
    },
}

impl WorkflowOutcome {
    /// Message id the outcome refers to.
    pub fn message_id(&self) -> &str {
        match self {
            Self::Completed { message_id, .. }
            | Self::Accepted { message_id }
            | Self::Responded { message_id, .. }
            | Self::Acknowledged { message_id } => message_id,
        }
    }

    /// HTTP status the request layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Accepted { .. } => 202,
            _ => 200,
        }
    }
}

/// Result of applying an inbound acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckDisposition {
    /// Drove the message to this state.
    Applied(MessageState),
    /// Message was already in the outcome's state.
    Duplicate,
    /// Message is in a state that no longer accepts acknowledgements.
    Ignored(MessageState),
    /// No record for this message id.
    Unknown,
}

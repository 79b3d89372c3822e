//! # Inbound Ports
//!
//! API trait defining what the workflow engine offers the request layer and
//! inbound listeners.

use crate::domain::{
    AckDisposition, InboundAcknowledgement, MessageRecord, OutboundRequest, WorkflowError,
    WorkflowOutcome,
};
use crate::envelope::inbound::ReceivedHeader;
use async_trait::async_trait;

/// Workflow API - inbound port.
#[async_trait]
pub trait WorkflowApi: Send + Sync {
    /// Run the interaction's workflow for one outbound request.
    ///
    /// Unknown interactions are rejected before any network or store call.
    async fn handle_outbound_message(
        &self,
        interaction: &str,
        request: OutboundRequest,
    ) -> Result<WorkflowOutcome, WorkflowError>;

    /// Apply an acknowledgement or asynchronous response.
    async fn handle_acknowledgement(
        &self,
        ack: InboundAcknowledgement,
    ) -> Result<AckDisposition, WorkflowError>;

    /// Durable state of a message, for poll-based retrieval.
    async fn poll_response(&self, message_id: &str) -> Result<Option<MessageRecord>, WorkflowError>;

    /// Acknowledgement envelope for a reliable message we received.
    fn acknowledge_inbound(&self, received: &ReceivedHeader) -> Result<String, WorkflowError>;
}

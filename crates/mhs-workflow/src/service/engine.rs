//! # Workflow Engine
//!
//! One state-machine driver for every messaging pattern, parameterised by
//! the interaction's [`PatternStrategy`]:
//!
//! | Completion | Driver | Reports |
//! |------------|--------|---------|
//! | `OnResponse` | synchronous | response body (COMPLETED) |
//! | `OnAcceptance` | express | acceptance, or the response if the caller stays attached |
//! | `OnAcknowledgement` | reliable | success only at ACKED |
//!
//! Reliable drivers and express expiry timers run as spawned tasks, so a
//! caller that goes away never cancels a workflow that is waiting on an
//! acknowledgement. All state changes are conditional transitions; the
//! in-process wake-ups only shorten the wait between store polls.

use super::pending::{AckWaiters, AttachedResponses};
use super::sequence::SequenceGenerator;
use super::state::{MessageStateRepository, TransitionOutcome};
use super::store_retry::StoreRetry;
use crate::domain::{
    AckDisposition, AckOutcome, CompletionPolicy, InboundAcknowledgement, Interaction,
    InteractionRegistry, MessageRecord, MessageState, OutboundMessage, OutboundRequest,
    PatternStrategy, RequestContext, SendError, StoreError, WorkflowConfig, WorkflowError,
    WorkflowOutcome, WorkflowPattern,
};
use crate::envelope::{
    fields, flag, parse_inbound, AckEnvelopeBuilder, EnvelopeBuilder, EnvelopeFields,
    ReceivedHeader, RequestEnvelopeBuilder,
};
use crate::fault::{is_fault, parse_fault};
use crate::metrics::WorkflowMetrics;
use crate::ports::inbound::WorkflowApi;
use crate::ports::outbound::{MessageTransport, StateStore, TransportRequest, TransportResponse};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use mhs_queue::{QueueAdaptor, QueueMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// Queue property carrying `ack` / `nack` on queued responses.
pub const OUTCOME_PROPERTY: &str = "outcome";

/// Queue property carrying the reason of a negative response.
pub const REASON_PROPERTY: &str = "reason";

/// Lost races tolerated while applying one acknowledgement.
const ACK_APPLY_ATTEMPTS: u32 = 3;

/// Outbound ports the engine drives.
pub struct EnginePorts {
    /// Persisted state store shared by every workflow instance.
    pub store: Arc<dyn StateStore>,
    /// Network transport.
    pub transport: Arc<dyn MessageTransport>,
    /// Queue receiving asynchronous responses for detached callers.
    pub response_queue: Arc<dyn QueueAdaptor>,
}

struct EngineInner {
    registry: Arc<InteractionRegistry>,
    config: WorkflowConfig,
    transport: Arc<dyn MessageTransport>,
    response_queue: Arc<dyn QueueAdaptor>,
    request_builder: RequestEnvelopeBuilder,
    ack_builder: AckEnvelopeBuilder,
    sequences: SequenceGenerator,
    records: MessageStateRepository,
    waiters: AckWaiters,
    attached: AttachedResponses,
    metrics: WorkflowMetrics,
}

/// Workflow engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

/// Everything a driver needs for one message.
struct Dispatch {
    interaction: Arc<Interaction>,
    strategy: PatternStrategy,
    message: OutboundMessage,
    fields: EnvelopeFields,
    context: RequestContext,
}

impl WorkflowEngine {
    /// Engine over `registry`, driving `ports`.
    pub fn new(
        registry: Arc<InteractionRegistry>,
        config: WorkflowConfig,
        ports: EnginePorts,
    ) -> Self {
        let retry = StoreRetry::new(config.store_retry_attempts, config.store_retry_backoff);
        let inner = EngineInner {
            sequences: SequenceGenerator::new(
                ports.store.clone(),
                retry,
                config.sequence_max_attempts,
            ),
            records: MessageStateRepository::new(ports.store, retry),
            registry,
            transport: ports.transport,
            response_queue: ports.response_queue,
            request_builder: RequestEnvelopeBuilder::new(),
            ack_builder: AckEnvelopeBuilder::new(),
            waiters: AckWaiters::new(),
            attached: AttachedResponses::new(),
            metrics: WorkflowMetrics::new(),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &WorkflowConfig {
        &self.inner.config
    }

    /// Configured interactions.
    pub fn registry(&self) -> &InteractionRegistry {
        &self.inner.registry
    }

    /// Engine counters.
    pub fn metrics(&self) -> &WorkflowMetrics {
        &self.inner.metrics
    }

    /// Run the named interaction's workflow for one request.
    pub async fn handle_outbound_message(
        &self,
        name: &str,
        request: OutboundRequest,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let Some(interaction) = self.inner.registry.get(name) else {
            warn!(interaction = name, "Unknown interaction");
            return Err(WorkflowError::UnknownInteraction(name.to_string()));
        };

        let message_id = request
            .context
            .message_id
            .clone()
            .unwrap_or_else(new_message_id);
        let span = info_span!(
            "workflow",
            interaction = %interaction.name,
            pattern = %interaction.pattern,
            message_id = %message_id,
            correlation_id = ?request.context.correlation_id,
            requesting_system = ?request.context.requesting_system
        );
        self.dispatch(interaction, message_id, request)
            .instrument(span)
            .await
    }

    async fn dispatch(
        &self,
        interaction: Arc<Interaction>,
        message_id: String,
        request: OutboundRequest,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let strategy = interaction.strategy();
        let ids = self
            .inner
            .sequences
            .allocate(&interaction.from_party_id, &interaction.to_party_id)
            .await?;

        let created_at = Utc::now();
        let conversation_id = request
            .context
            .correlation_id
            .clone()
            .unwrap_or_else(new_message_id);
        let fields = self.request_fields(
            &interaction,
            &message_id,
            &conversation_id,
            &created_at,
            &request.payload,
        );
        let envelope = self.inner.request_builder.build(&fields)?;

        let message = OutboundMessage {
            message_id,
            conversation_id,
            interchange_id: ids.interchange_id,
            message_sequence: ids.message_sequence,
            transaction_id: ids.transaction_id,
            payload: request.payload,
            envelope,
            created_at,
            state: MessageState::Created,
            attempts: 0,
        };

        let record = MessageRecord::new(
            &message,
            &interaction,
            request.context.correlation_id.clone(),
        );
        match self.inner.records.create(&record).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists(_)) => {
                let existing = self.inner.records.load(&message.message_id).await?;
                return Err(conflict(&message.message_id, MessageState::Created, existing));
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            interchange_id = ids.interchange_id,
            transaction_id = ids.transaction_id,
            "Message admitted"
        );

        let dispatch = Dispatch {
            interaction,
            strategy,
            message,
            fields,
            context: request.context,
        };

        match strategy.completion {
            CompletionPolicy::OnResponse => self.run_synchronous(dispatch).await,
            CompletionPolicy::OnAcceptance => self.run_express(dispatch).await,
            CompletionPolicy::OnAcknowledgement => {
                let engine = self.clone();
                tokio::spawn(
                    async move { engine.run_reliable(dispatch).await }.instrument(Span::current()),
                )
                .await
                .map_err(|e| WorkflowError::Internal(format!("reliable workflow task: {e}")))?
            }
        }
    }

    fn request_fields(
        &self,
        interaction: &Interaction,
        message_id: &str,
        conversation_id: &str,
        created_at: &DateTime<Utc>,
        payload: &str,
    ) -> EnvelopeFields {
        let policy = interaction.ack_policy;
        [
            (fields::FROM_PARTY_ID, interaction.from_party_id.clone()),
            (fields::TO_PARTY_ID, interaction.to_party_id.clone()),
            (fields::CPA_ID, interaction.cpa_id.clone()),
            (fields::CONVERSATION_ID, conversation_id.to_string()),
            (fields::MESSAGE_ID, message_id.to_string()),
            (fields::TIMESTAMP, wire_timestamp(created_at)),
            (fields::SERVICE, interaction.service.clone()),
            (fields::ACTION, interaction.action.clone()),
            (
                fields::DUPLICATE_ELIMINATION,
                flag(policy.duplicate_elimination),
            ),
            (fields::ACK_REQUESTED, flag(policy.ack_requested)),
            (fields::ACK_SOAP_ACTOR, self.inner.config.ack_actor.clone()),
            (fields::SYNC_REPLY, flag(policy.sync_reply)),
            (fields::PAYLOAD, payload.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    async fn transmit(&self, dispatch: &Dispatch) -> Result<TransportResponse, SendError> {
        let request = TransportRequest {
            message_id: dispatch.message.message_id.clone(),
            endpoint: dispatch
                .interaction
                .endpoint_for(dispatch.strategy.routing)
                .to_string(),
            soap_action: dispatch.interaction.soap_action(),
            body: dispatch.message.envelope.clone(),
        };
        self.inner.transport.send(request).await
    }

    async fn fail(
        &self,
        message_id: &str,
        from: MessageState,
        detail: &str,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.inner
            .records
            .transition(message_id, from, MessageState::Failed, |r| {
                r.last_error = Some(detail.to_string());
            })
            .await
    }

    // -------------------------------------------------------------------------
    // Synchronous
    // -------------------------------------------------------------------------

    async fn run_synchronous(&self, dispatch: Dispatch) -> Result<WorkflowOutcome, WorkflowError> {
        let message_id = dispatch.message.message_id.clone();
        let id = message_id.as_str();

        if let TransitionOutcome::Rejected { current } = self
            .inner
            .records
            .transition(id, MessageState::Created, MessageState::Sent, |r| {
                r.attempts = 1;
            })
            .await?
        {
            return Err(conflict(id, MessageState::Created, current));
        }
        self.inner.metrics.record_send(false);

        let deadline = dispatch.strategy.retry.expiry;
        let response = match tokio::time::timeout(deadline, self.transmit(&dispatch)).await {
            Err(_) | Ok(Err(SendError::Timeout)) => {
                self.fail(id, MessageState::Sent, "no response before deadline")
                    .await?;
                self.inner.metrics.record_timeout();
                warn!(deadline_ms = deadline.as_millis() as u64, "Synchronous deadline elapsed");
                return Err(WorkflowError::Timeout {
                    message_id,
                    attempts: 1,
                });
            }
            Ok(Err(e)) => {
                let detail = e.to_string();
                self.fail(id, MessageState::Sent, &detail).await?;
                self.inner.metrics.record_failure();
                warn!(error = %detail, "Synchronous transmission failed");
                return Err(WorkflowError::TransportError { message_id, detail });
            }
            Ok(Ok(response)) => response,
        };

        let fault = fault_detail(&response).or_else(|| {
            (!response.is_success()).then(|| format!("HTTP {}", response.status))
        });
        if let Some(detail) = fault {
            self.fail(id, MessageState::Sent, &detail).await?;
            self.inner.metrics.record_failure();
            warn!(status = response.status, fault = %detail, "Remote fault");
            return Err(WorkflowError::RemoteFault { message_id, detail });
        }

        match self
            .inner
            .records
            .transition(id, MessageState::Sent, MessageState::Completed, |_| {})
            .await?
        {
            TransitionOutcome::Applied(_) => {
                info!(status = response.status, "Synchronous response received");
                Ok(WorkflowOutcome::Completed {
                    message_id,
                    response: response.body,
                })
            }
            TransitionOutcome::Rejected { current } => {
                Err(conflict(id, MessageState::Sent, current))
            }
        }
    }

    // -------------------------------------------------------------------------
    // Asynchronous express
    // -------------------------------------------------------------------------

    async fn run_express(&self, dispatch: Dispatch) -> Result<WorkflowOutcome, WorkflowError> {
        let message_id = dispatch.message.message_id.clone();
        let id = message_id.as_str();

        if let TransitionOutcome::Rejected { current } = self
            .inner
            .records
            .transition(id, MessageState::Created, MessageState::Sent, |r| {
                r.attempts = 1;
            })
            .await?
        {
            return Err(conflict(id, MessageState::Created, current));
        }
        self.inner.metrics.record_send(false);

        let receiver = dispatch
            .context
            .wait_for_response
            .then(|| self.inner.attached.register(id));

        let response = match self.transmit(&dispatch).await {
            Ok(response) => response,
            Err(e) => {
                self.inner.attached.cancel(id);
                let detail = e.to_string();
                self.fail(id, MessageState::Sent, &detail).await?;
                warn!(error = %detail, "Express transmission failed");
                return Err(match e {
                    SendError::Timeout => {
                        self.inner.metrics.record_timeout();
                        WorkflowError::Timeout {
                            message_id,
                            attempts: 1,
                        }
                    }
                    _ => {
                        self.inner.metrics.record_failure();
                        WorkflowError::TransportError { message_id, detail }
                    }
                });
            }
        };

        let sync_ack = sync_acknowledgement(id, &response);
        let fault = if sync_ack.is_some() {
            None
        } else {
            fault_detail(&response).or_else(|| {
                (!response.is_success()).then(|| format!("HTTP {}", response.status))
            })
        };
        if let Some(detail) = fault {
            self.inner.attached.cancel(id);
            self.fail(id, MessageState::Sent, &detail).await?;
            self.inner.metrics.record_failure();
            warn!(status = response.status, fault = %detail, "Remote fault");
            return Err(WorkflowError::RemoteFault { message_id, detail });
        }

        let expiry = dispatch.strategy.retry.expiry;
        let expires_at = expiry_timestamp(expiry);
        match self
            .inner
            .records
            .transition(id, MessageState::Sent, MessageState::AwaitingAck, |r| {
                r.expires_at = expires_at;
            })
            .await?
        {
            TransitionOutcome::Applied(_) => self.spawn_expiry_timer(message_id.clone(), expiry),
            TransitionOutcome::Rejected { current } => debug!(
                state = ?current.map(|r| r.state),
                "Response arrived before acceptance was recorded"
            ),
        }
        if let Some(ack) = sync_ack {
            self.apply_sync_reply(ack).await;
        }

        let Some(receiver) = receiver else {
            info!("Express message accepted");
            return Ok(WorkflowOutcome::Accepted { message_id });
        };

        match tokio::time::timeout(dispatch.interaction.deadline, receiver).await {
            Ok(Ok(ack)) => match ack.outcome {
                AckOutcome::Positive => Ok(WorkflowOutcome::Responded {
                    message_id,
                    response: ack.payload,
                }),
                AckOutcome::Negative { reason } => Err(WorkflowError::RemoteFault {
                    message_id,
                    detail: reason,
                }),
            },
            _ => {
                self.inner.attached.cancel(id);
                info!("Caller detached; response will be queued");
                Ok(WorkflowOutcome::Accepted { message_id })
            }
        }
    }

    fn spawn_expiry_timer(&self, message_id: String, expiry: Duration) {
        let engine = self.clone();
        tokio::spawn(
            async move {
                tokio::time::sleep(expiry).await;
                if let Err(e) = engine.expire(&message_id).await {
                    warn!(message_id = %message_id, error = %e, "Expiry not recorded");
                }
            }
            .instrument(Span::current()),
        );
    }

    /// AWAITING_ACK → EXPIRED → FAILED. `false` if the response won.
    async fn expire(&self, message_id: &str) -> Result<bool, WorkflowError> {
        let records = &self.inner.records;
        if let TransitionOutcome::Rejected { .. } = records
            .transition(
                message_id,
                MessageState::AwaitingAck,
                MessageState::Expired,
                |_| {},
            )
            .await?
        {
            return Ok(false);
        }
        self.inner.attached.cancel(message_id);

        records
            .transition(message_id, MessageState::Expired, MessageState::Failed, |r| {
                r.last_error = Some("expired without response".to_string());
            })
            .await?;
        self.inner.metrics.record_timeout();
        info!("Message expired without response");
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Reliable (direct and via intermediary)
    // -------------------------------------------------------------------------

    async fn run_reliable(self, dispatch: Dispatch) -> Result<WorkflowOutcome, WorkflowError> {
        let message_id = dispatch.message.message_id.clone();
        let notify = self.inner.waiters.register(&message_id);
        let result = self.drive_reliable(dispatch, &notify).await;
        self.inner.waiters.remove(&message_id);
        result
    }

    async fn drive_reliable(
        &self,
        mut dispatch: Dispatch,
        notify: &Notify,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let message_id = dispatch.message.message_id.clone();
        let id = message_id.as_str();
        let retry = dispatch.strategy.retry;
        let total = retry.total_attempts();
        let records = &self.inner.records;

        let mut prior = MessageState::Created;
        let mut transport_failures = 0u32;
        let mut last_transport_error: Option<String> = None;

        for attempt in 1..=total {
            if attempt > 1 {
                dispatch
                    .fields
                    .insert(fields::DUPLICATE_ELIMINATION.to_string(), flag(true));
                dispatch.message.envelope = self.inner.request_builder.build(&dispatch.fields)?;
            }

            if let TransitionOutcome::Rejected { current } = records
                .transition(id, prior, MessageState::Sent, |r| {
                    r.attempts = attempt;
                    r.expires_at = None;
                })
                .await?
            {
                return self.settle(id, prior, current);
            }
            dispatch.message.state = MessageState::Sent;
            dispatch.message.attempts = attempt;
            self.inner.metrics.record_send(attempt > 1);
            info!(attempt, total, "Transmitting reliable message");

            let mut attempt_error = None;
            match self.transmit(&dispatch).await {
                Ok(response) => {
                    if let Some(ack) = sync_acknowledgement(id, &response) {
                        self.apply_sync_reply(ack).await;
                    } else if let Some(detail) = fault_detail(&response) {
                        warn!(attempt, fault = %detail, "Remote fault");
                        return match self.fail(id, MessageState::Sent, &detail).await? {
                            TransitionOutcome::Applied(_) => {
                                self.inner.metrics.record_failure();
                                Err(WorkflowError::RemoteFault {
                                    message_id: message_id.clone(),
                                    detail,
                                })
                            }
                            TransitionOutcome::Rejected { current } => {
                                self.settle(id, MessageState::Sent, current)
                            }
                        };
                    } else if !response.is_success() {
                        attempt_error = Some(format!("HTTP {}", response.status));
                    }
                }
                Err(e) => attempt_error = Some(e.to_string()),
            }
            if let Some(error) = &attempt_error {
                transport_failures += 1;
                last_transport_error = Some(error.clone());
                warn!(attempt, error = %error, "Transmission failed; counted as missing acknowledgement");
            }

            let expires_at = expiry_timestamp(retry.expiry);
            if let TransitionOutcome::Rejected { current } = records
                .transition(id, MessageState::Sent, MessageState::AwaitingAck, |r| {
                    r.expires_at = expires_at;
                    r.last_error = attempt_error.clone();
                })
                .await?
            {
                return self.settle(id, MessageState::Sent, current);
            }
            dispatch.message.state = MessageState::AwaitingAck;

            if let Some(record) = self.await_acknowledgement(id, notify, retry.expiry).await? {
                return self.settle(id, MessageState::AwaitingAck, Some(record));
            }
            debug!(attempt, "Acknowledgement window elapsed");
            prior = MessageState::AwaitingAck;
        }

        if let TransitionOutcome::Rejected { current } = records
            .transition(id, MessageState::AwaitingAck, MessageState::Expired, |_| {})
            .await?
        {
            return self.settle(id, MessageState::AwaitingAck, current);
        }
        let reason = format!("no acknowledgement after {total} attempt(s)");
        if let TransitionOutcome::Rejected { current } = records
            .transition(id, MessageState::Expired, MessageState::Failed, |r| {
                r.last_error = Some(reason.clone());
            })
            .await?
        {
            return self.settle(id, MessageState::Expired, current);
        }

        if transport_failures == total {
            self.inner.metrics.record_failure();
            let detail = last_transport_error.unwrap_or(reason);
            warn!(attempts = total, error = %detail, "Every transmission failed");
            Err(WorkflowError::TransportError { message_id, detail })
        } else {
            self.inner.metrics.record_timeout();
            warn!(attempts = total, "Reliable delivery timed out");
            Err(WorkflowError::Timeout {
                message_id,
                attempts: total,
            })
        }
    }

    /// Wait for the record to leave AWAITING_ACK, re-reading the store on
    /// every wake-up and at least every `ack_poll_interval`. `None` when
    /// the window elapses.
    async fn await_acknowledgement(
        &self,
        message_id: &str,
        notify: &Notify,
        window: Duration,
    ) -> Result<Option<MessageRecord>, WorkflowError> {
        let deadline = Instant::now() + window;
        let poll = self.inner.config.ack_poll_interval;

        loop {
            match self.inner.records.load(message_id).await? {
                None => return Err(conflict(message_id, MessageState::AwaitingAck, None)),
                Some(record) if record.state != MessageState::AwaitingAck => {
                    return Ok(Some(record))
                }
                Some(_) => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wait = (deadline - now).min(poll);
            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Turn whatever state another writer left behind into the caller's result.
    fn settle(
        &self,
        message_id: &str,
        expected: MessageState,
        current: Option<MessageRecord>,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let Some(record) = current else {
            return Err(conflict(message_id, expected, None));
        };
        match record.state {
            MessageState::Acked => {
                info!(attempts = record.attempts, "Message acknowledged");
                Ok(WorkflowOutcome::Acknowledged {
                    message_id: record.message_id,
                })
            }
            MessageState::Nacked => {
                self.inner.metrics.record_failure();
                let detail = record
                    .last_error
                    .unwrap_or_else(|| "negative acknowledgement".to_string());
                warn!(reason = %detail, "Message negatively acknowledged");
                Err(WorkflowError::RemoteFault {
                    message_id: record.message_id,
                    detail,
                })
            }
            MessageState::Failed | MessageState::Expired => Err(WorkflowError::Timeout {
                message_id: record.message_id,
                attempts: record.attempts,
            }),
            _ => Err(conflict(message_id, expected, Some(record))),
        }
    }

    /// Apply an acknowledgement that came back as the HTTP response body.
    async fn apply_sync_reply(&self, ack: InboundAcknowledgement) {
        if let Err(e) = self.handle_acknowledgement(ack).await {
            warn!(error = %e, "Failed to apply synchronous acknowledgement");
        }
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    /// Apply an acknowledgement or asynchronous response.
    pub async fn handle_acknowledgement(
        &self,
        ack: InboundAcknowledgement,
    ) -> Result<AckDisposition, WorkflowError> {
        let span = info_span!(
            "acknowledgement",
            message_id = %ack.message_id,
            outcome = ack.outcome.as_str()
        );
        self.apply_acknowledgement(ack).instrument(span).await
    }

    async fn apply_acknowledgement(
        &self,
        ack: InboundAcknowledgement,
    ) -> Result<AckDisposition, WorkflowError> {
        let target = ack.outcome.target_state();
        let reason = match &ack.outcome {
            AckOutcome::Negative { reason } => Some(reason.clone()),
            AckOutcome::Positive => None,
        };
        let mut current = self.inner.records.load(&ack.message_id).await?;

        for _ in 0..ACK_APPLY_ATTEMPTS {
            let Some(record) = current else {
                debug!("No record for acknowledged message");
                return Ok(AckDisposition::Unknown);
            };
            if record.state == target {
                self.inner.metrics.record_duplicate_ack();
                debug!("Duplicate acknowledgement");
                return Ok(AckDisposition::Duplicate);
            }
            if record.pattern == WorkflowPattern::Synchronous
                || !record.state.accepts_acknowledgement()
            {
                debug!(state = %record.state, "Acknowledgement ignored");
                return Ok(AckDisposition::Ignored(record.state));
            }

            match self
                .inner
                .records
                .transition(&ack.message_id, record.state, target, |r| {
                    if let Some(reason) = &reason {
                        r.last_error = Some(reason.clone());
                    }
                })
                .await?
            {
                TransitionOutcome::Applied(updated) => {
                    self.inner.metrics.record_ack_applied();
                    info!(state = %target, "Acknowledgement applied");
                    self.inner.waiters.notify(&ack.message_id);
                    self.deliver_response(ack, &updated).await;
                    return Ok(AckDisposition::Applied(target));
                }
                TransitionOutcome::Rejected { current: latest } => current = latest,
            }
        }

        Err(StoreError::Contention {
            key: ack.message_id,
            attempts: ACK_APPLY_ATTEMPTS,
        }
        .into())
    }

    /// Express responses go to the attached caller, else to the response queue.
    async fn deliver_response(&self, ack: InboundAcknowledgement, record: &MessageRecord) {
        if record.pattern != WorkflowPattern::AsyncExpress {
            return;
        }
        if self.inner.attached.complete(ack.clone()) {
            debug!("Response delivered to attached caller");
            return;
        }

        let mut message = QueueMessage::correlated(
            ack.payload.clone().unwrap_or_default(),
            &ack.message_id,
            record.correlation_id.as_deref(),
        );
        message
            .properties
            .insert(OUTCOME_PROPERTY, ack.outcome.as_str());
        if let AckOutcome::Negative { reason } = &ack.outcome {
            message.properties.insert(REASON_PROPERTY, reason.as_str());
        }
        match self.inner.response_queue.send_sync(message).await {
            Ok(()) => debug!("Response queued for retrieval"),
            Err(e) => warn!(error = %e, "Failed to queue response; still available by polling"),
        }
    }

    /// Durable state of a message.
    pub async fn poll_response(
        &self,
        message_id: &str,
    ) -> Result<Option<MessageRecord>, WorkflowError> {
        Ok(self.inner.records.load(message_id).await?)
    }

    /// Acknowledgement envelope for a reliable message we received.
    pub fn acknowledge_inbound(&self, received: &ReceivedHeader) -> Result<String, WorkflowError> {
        let now = Utc::now();
        let input: EnvelopeFields = [
            (fields::FROM_PARTY_ID, received.to_party_id.clone()),
            (fields::TO_PARTY_ID, received.from_party_id.clone()),
            (fields::CPA_ID, received.cpa_id.clone()),
            (fields::CONVERSATION_ID, received.conversation_id.clone()),
            (fields::MESSAGE_ID, new_message_id()),
            (fields::TIMESTAMP, wire_timestamp(&now)),
            (
                fields::RECEIVED_MESSAGE_TIMESTAMP,
                received.timestamp.clone(),
            ),
            (fields::RECEIVED_MESSAGE_ID, received.message_id.clone()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Ok(self.inner.ack_builder.build(&input)?)
    }
}

#[async_trait]
impl WorkflowApi for WorkflowEngine {
    async fn handle_outbound_message(
        &self,
        interaction: &str,
        request: OutboundRequest,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        WorkflowEngine::handle_outbound_message(self, interaction, request).await
    }

    async fn handle_acknowledgement(
        &self,
        ack: InboundAcknowledgement,
    ) -> Result<AckDisposition, WorkflowError> {
        WorkflowEngine::handle_acknowledgement(self, ack).await
    }

    async fn poll_response(&self, message_id: &str) -> Result<Option<MessageRecord>, WorkflowError> {
        WorkflowEngine::poll_response(self, message_id).await
    }

    fn acknowledge_inbound(&self, received: &ReceivedHeader) -> Result<String, WorkflowError> {
        WorkflowEngine::acknowledge_inbound(self, received)
    }
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string().to_uppercase()
}

fn wire_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn expiry_timestamp(expiry: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(expiry)
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
}

/// A 2xx body that is itself the acknowledgement of `message_id` (sync
/// reply). Takes precedence over fault detection, since a negative
/// acknowledgement is also an ebXML error list.
fn sync_acknowledgement(
    message_id: &str,
    response: &TransportResponse,
) -> Option<InboundAcknowledgement> {
    if !response.is_success() {
        return None;
    }
    response
        .body()
        .and_then(parse_inbound)
        .filter(|ack| ack.message_id == message_id)
}

fn fault_detail(response: &TransportResponse) -> Option<String> {
    let body = response.body();
    is_fault(body).then(|| {
        body.and_then(parse_fault)
            .map(|fault| fault.to_string())
            .unwrap_or_else(|| format!("HTTP {}", response.status))
    })
}

fn conflict(
    message_id: &str,
    expected: MessageState,
    current: Option<MessageRecord>,
) -> WorkflowError {
    WorkflowError::StateConflict {
        message_id: message_id.to_string(),
        expected,
        actual: current.map(|r| r.state),
    }
}

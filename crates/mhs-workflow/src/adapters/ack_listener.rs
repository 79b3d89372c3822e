//! Acknowledgement Listener
//!
//! Drains the inbound queue, parses acknowledgement envelopes and
//! asynchronous responses, and feeds them to the engine. A message the
//! engine fails to apply goes back on the queue for redelivery.

use crate::domain::{AckDisposition, WorkflowError};
use crate::envelope::parse_inbound;
use crate::ports::inbound::WorkflowApi;
use mhs_queue::{QueueAdaptor, QueueMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Default receive timeout between shutdown checks.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default redeliveries before an inbound message is abandoned.
pub const DEFAULT_MAX_REDELIVERIES: u32 = 5;

/// Queue property counting how often an inbound message was requeued.
pub const REDELIVERY_PROPERTY: &str = "redelivery_count";

/// Outcome of processing one queue message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerOutcome {
    /// Parsed and handed to the engine.
    Handled(AckDisposition),
    /// Body was not an acknowledgement or response envelope.
    Unparseable,
}

/// Background task feeding inbound acknowledgements to the engine.
pub struct AcknowledgementListener {
    queue: Arc<dyn QueueAdaptor>,
    api: Arc<dyn WorkflowApi>,
    receive_timeout: Duration,
    max_redeliveries: u32,
    processed: AtomicU64,
    rejected: AtomicU64,
    redelivered: AtomicU64,
    abandoned: AtomicU64,
}

impl AcknowledgementListener {
    /// Listener over `queue` delivering to `api`.
    pub fn new(queue: Arc<dyn QueueAdaptor>, api: Arc<dyn WorkflowApi>) -> Self {
        Self {
            queue,
            api,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            max_redeliveries: DEFAULT_MAX_REDELIVERIES,
            processed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            redelivered: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
        }
    }

    /// Builder-style receive timeout.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Builder-style redelivery limit.
    pub fn with_max_redeliveries(mut self, max_redeliveries: u32) -> Self {
        self.max_redeliveries = max_redeliveries;
        self
    }

    /// Messages handed to the engine.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Messages dropped as unparseable.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Messages put back on the queue after a failed apply.
    pub fn redelivered(&self) -> u64 {
        self.redelivered.load(Ordering::Relaxed)
    }

    /// Messages given up on after the redelivery limit.
    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    /// Parse one queue message and apply it.
    pub async fn process_one(
        &self,
        message: &QueueMessage,
    ) -> Result<ListenerOutcome, WorkflowError> {
        let Some(ack) = parse_inbound(&message.body) else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                queue_message_id = %message.id,
                "Inbound message is not an acknowledgement envelope"
            );
            return Ok(ListenerOutcome::Unparseable);
        };

        let message_id = ack.message_id.clone();
        let disposition = self.api.handle_acknowledgement(ack).await?;
        self.processed.fetch_add(1, Ordering::Relaxed);
        debug!(message_id = %message_id, ?disposition, "Inbound acknowledgement processed");
        Ok(ListenerOutcome::Handled(disposition))
    }

    /// Requeue a message whose apply failed, counting the attempt in
    /// [`REDELIVERY_PROPERTY`]. `false` once the limit is reached or the
    /// queue refuses it.
    pub async fn redeliver(&self, mut message: QueueMessage, cause: &WorkflowError) -> bool {
        let count = message
            .properties
            .get(REDELIVERY_PROPERTY)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);
        if count >= self.max_redeliveries {
            self.abandoned.fetch_add(1, Ordering::Relaxed);
            error!(
                queue_message_id = %message.id,
                redeliveries = count,
                error = %cause,
                "Inbound message abandoned"
            );
            return false;
        }

        let queue_message_id = message.id;
        message
            .properties
            .insert(REDELIVERY_PROPERTY, (count + 1).to_string());
        match self.queue.send_async(message).await {
            Ok(()) => {
                self.redelivered.fetch_add(1, Ordering::Relaxed);
                warn!(
                    queue_message_id = %queue_message_id,
                    redelivery = count + 1,
                    error = %cause,
                    "Inbound message requeued"
                );
                true
            }
            Err(e) => {
                self.abandoned.fetch_add(1, Ordering::Relaxed);
                error!(
                    queue_message_id = %queue_message_id,
                    error = %e,
                    "Inbound message could not be requeued"
                );
                false
            }
        }
    }

    /// Run until `shutdown` flips to `true` or the queue closes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Acknowledgement listener started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = self.queue.receive(self.receive_timeout) => match received {
                    Ok(Some(message)) => {
                        if let Err(e) = self.process_one(&message).await {
                            self.redeliver(message, &e).await;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "Inbound queue closed");
                        break;
                    }
                },
            }
        }
        info!(
            processed = self.processed(),
            rejected = self.rejected(),
            redelivered = self.redelivered(),
            abandoned = self.abandoned(),
            "Acknowledgement listener stopped"
        );
    }
}

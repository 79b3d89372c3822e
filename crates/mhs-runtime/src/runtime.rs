//! # Service Runtime
//!
//! Owns the engine, the inbound and response queues and the acknowledgement
//! listener task.

use crate::config::RuntimeConfig;
use mhs_queue::InMemoryQueue;
use mhs_workflow::adapters::{AcknowledgementListener, InMemoryStateStore};
use mhs_workflow::domain::InteractionRegistry;
use mhs_workflow::ports::{MessageTransport, StateStore, WorkflowApi};
use mhs_workflow::{EnginePorts, WorkflowEngine};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Time allowed for the listener to finish after shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The running service.
pub struct MhsRuntime {
    engine: WorkflowEngine,
    inbound: Arc<InMemoryQueue>,
    responses: Arc<InMemoryQueue>,
    listener: Arc<AcknowledgementListener>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl MhsRuntime {
    /// Wire the engine with an in-memory state store.
    pub fn new(
        config: &RuntimeConfig,
        registry: InteractionRegistry,
        transport: Arc<dyn MessageTransport>,
    ) -> Self {
        Self::with_store(config, registry, Arc::new(InMemoryStateStore::new()), transport)
    }

    /// Wire the engine over the given store and transport.
    pub fn with_store(
        config: &RuntimeConfig,
        registry: InteractionRegistry,
        store: Arc<dyn StateStore>,
        transport: Arc<dyn MessageTransport>,
    ) -> Self {
        let inbound = Arc::new(InMemoryQueue::with_capacity("inbound", config.queue_capacity));
        let responses = Arc::new(InMemoryQueue::with_capacity(
            "responses",
            config.queue_capacity,
        ));

        let engine = WorkflowEngine::new(
            Arc::new(registry),
            config.workflow.clone(),
            EnginePorts {
                store,
                transport,
                response_queue: responses.clone(),
            },
        );
        let api: Arc<dyn WorkflowApi> = Arc::new(engine.clone());
        let listener = Arc::new(AcknowledgementListener::new(inbound.clone(), api));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            engine,
            inbound,
            responses,
            listener,
            listener_task: Mutex::new(None),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Start the acknowledgement listener.
    pub fn start(&self) {
        info!("===========================================");
        info!("  Message Handling Service v{}", mhs_workflow::VERSION);
        info!("===========================================");

        let mut task = self.listener_task.lock();
        if task.is_some() {
            warn!("Runtime already started");
            return;
        }

        let listener = Arc::clone(&self.listener);
        let shutdown = self.shutdown_rx.clone();
        *task = Some(tokio::spawn(async move { listener.run(shutdown).await }));

        info!(
            interactions = ?self.engine.registry().names(),
            "Workflow engine ready"
        );
    }

    /// Stop the listener and log final counters.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }

        let task = self.listener_task.lock().take();
        if let Some(task) = task {
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Listener task failed"),
                Err(_) => warn!("Listener did not stop within grace period"),
            }
        }

        let metrics = self.engine.metrics().snapshot();
        match serde_json::to_string(&metrics) {
            Ok(json) => info!(metrics = %json, "Shutdown complete"),
            Err(e) => warn!(error = %e, "Shutdown complete; metrics not serializable"),
        }
    }

    /// The workflow engine.
    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// Queue the listener drains for acknowledgements and responses.
    pub fn inbound_queue(&self) -> Arc<InMemoryQueue> {
        Arc::clone(&self.inbound)
    }

    /// Queue receiving responses for detached express callers.
    pub fn response_queue(&self) -> Arc<InMemoryQueue> {
        Arc::clone(&self.responses)
    }

    /// The acknowledgement listener.
    pub fn listener(&self) -> Arc<AcknowledgementListener> {
        Arc::clone(&self.listener)
    }
}

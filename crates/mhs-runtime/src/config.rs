//! # Runtime Configuration
//!
//! Process settings layered over [`WorkflowConfig`], read from the
//! environment.

use anyhow::{Context, Result};
use mhs_workflow::adapters::DEFAULT_HTTP_TIMEOUT;
use mhs_workflow::domain::{InteractionRegistry, WorkflowConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Default interaction configuration path.
pub const DEFAULT_INTERACTIONS_FILE: &str = "config/interactions.json";

/// Default inbound/response queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = mhs_queue::DEFAULT_QUEUE_CAPACITY;

/// Complete process configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Interaction configuration document.
    pub interactions_file: PathBuf,
    /// Outbound HTTP request timeout.
    pub http_timeout: Duration,
    /// Capacity of the inbound and response queues.
    pub queue_capacity: usize,
    /// Engine settings.
    pub workflow: WorkflowConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            interactions_file: PathBuf::from(DEFAULT_INTERACTIONS_FILE),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workflow: WorkflowConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load from environment.
    ///
    /// - `MHS_INTERACTIONS_FILE`: interaction document path
    /// - `MHS_HTTP_TIMEOUT_MS`: outbound HTTP timeout
    /// - `MHS_QUEUE_CAPACITY`: queue capacity
    /// - engine settings via [`WorkflowConfig::from_env`]
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            workflow: WorkflowConfig::from_env().context("Invalid workflow configuration")?,
            ..Self::default()
        };

        if let Ok(path) = std::env::var("MHS_INTERACTIONS_FILE") {
            config.interactions_file = PathBuf::from(path);
        }
        if let Ok(raw) = std::env::var("MHS_HTTP_TIMEOUT_MS") {
            let ms: u64 = raw
                .parse()
                .with_context(|| format!("MHS_HTTP_TIMEOUT_MS={raw}"))?;
            config.http_timeout = Duration::from_millis(ms);
        }
        if let Ok(raw) = std::env::var("MHS_QUEUE_CAPACITY") {
            config.queue_capacity = raw
                .parse()
                .with_context(|| format!("MHS_QUEUE_CAPACITY={raw}"))?;
        }

        Ok(config)
    }

    /// Read and validate the interaction registry.
    pub fn load_registry(&self) -> Result<InteractionRegistry> {
        let document = std::fs::read_to_string(&self.interactions_file).with_context(|| {
            format!(
                "Failed to read interactions from {}",
                self.interactions_file.display()
            )
        })?;
        let registry = InteractionRegistry::from_json(&document, &self.workflow)
            .with_context(|| format!("Invalid interactions in {}", self.interactions_file.display()))?;
        info!(
            path = %self.interactions_file.display(),
            interactions = registry.len(),
            "Interaction registry loaded"
        );
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mhs_workflow::domain::WorkflowPattern;

    #[test]
    fn test_sample_interactions_parse() {
        let registry = InteractionRegistry::from_json(
            include_str!("../config/interactions.json"),
            &WorkflowConfig::default(),
        )
        .unwrap();

        assert_eq!(registry.len(), 4);
        let upload = registry.get("gp_summary_upload").unwrap();
        assert_eq!(upload.pattern, WorkflowPattern::AsyncReliable);
        assert_eq!(upload.retries, 3);
        assert!(registry
            .get("patient_demographics_update")
            .unwrap()
            .intermediary_endpoint
            .is_some());
    }

    #[test]
    fn test_missing_file_is_error() {
        let config = RuntimeConfig {
            interactions_file: PathBuf::from("/nonexistent/interactions.json"),
            ..RuntimeConfig::default()
        };
        let err = config.load_registry().unwrap_err();
        assert!(err.to_string().contains("/nonexistent/interactions.json"));
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.http_timeout, DEFAULT_HTTP_TIMEOUT);
        assert_eq!(config.interactions_file, PathBuf::from(DEFAULT_INTERACTIONS_FILE));
    }
}

//! # Workflow Configuration
//!
//! Engine tunables and the interaction registry built once at startup.

use super::entities::Interaction;
use super::errors::ConfigError;
use super::value_objects::{AckPolicy, WorkflowPattern};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// ebXML actor for the next receiving MSH.
pub const DEFAULT_ACK_ACTOR: &str = "urn:oasis:names:tc:ebxml-msg:actor:toPartyMSH";

/// Engine tunables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// Retry bound used when an interaction does not set one.
    pub default_retries: u32,
    /// Per-attempt acknowledgement expiry fallback.
    pub default_expiry: Duration,
    /// Synchronous response deadline fallback.
    pub default_sync_deadline: Duration,
    /// Attempts against an unavailable store before surfacing an error.
    pub store_retry_attempts: u32,
    /// Fixed pause between store attempts.
    pub store_retry_backoff: Duration,
    /// Compare-and-swap attempts per sequence number.
    pub sequence_max_attempts: u32,
    /// How often waiting drivers re-read the store.
    pub ack_poll_interval: Duration,
    /// Acknowledgement actor address placed in request envelopes.
    pub ack_actor: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            default_retries: 3,
            default_expiry: Duration::from_secs(30),
            default_sync_deadline: Duration::from_secs(30),
            store_retry_attempts: 3,
            store_retry_backoff: Duration::from_millis(100),
            sequence_max_attempts: 100,
            ack_poll_interval: Duration::from_millis(500),
            ack_actor: DEFAULT_ACK_ACTOR.to_string(),
        }
    }
}

impl WorkflowConfig {
    /// Defaults overridden by `MHS_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<u32>("MHS_DEFAULT_RETRIES")? {
            config.default_retries = v;
        }
        if let Some(v) = env_parse::<u64>("MHS_DEFAULT_EXPIRY_MS")? {
            config.default_expiry = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("MHS_SYNC_DEADLINE_MS")? {
            config.default_sync_deadline = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u32>("MHS_STORE_RETRY_ATTEMPTS")? {
            config.store_retry_attempts = v;
        }
        if let Some(v) = env_parse::<u64>("MHS_STORE_RETRY_BACKOFF_MS")? {
            config.store_retry_backoff = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u32>("MHS_SEQUENCE_MAX_ATTEMPTS")? {
            config.sequence_max_attempts = v;
        }
        if let Some(v) = env_parse::<u64>("MHS_ACK_POLL_INTERVAL_MS")? {
            config.ack_poll_interval = Duration::from_millis(v);
        }
        if let Ok(actor) = std::env::var("MHS_ACK_ACTOR") {
            config.ack_actor = actor;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "store_retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.sequence_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "sequence_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.ack_poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "ack_poll_interval must be non-zero".to_string(),
            ));
        }
        if self.default_expiry.is_zero() || self.default_sync_deadline.is_zero() {
            return Err(ConfigError::Invalid(
                "expiry and deadline must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Builder-style retry bound.
    pub fn with_default_retries(mut self, retries: u32) -> Self {
        self.default_retries = retries;
        self
    }

    /// Builder-style expiry.
    pub fn with_default_expiry(mut self, expiry: Duration) -> Self {
        self.default_expiry = expiry;
        self
    }

    /// Builder-style store retry settings.
    pub fn with_store_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.store_retry_attempts = attempts;
        self.store_retry_backoff = backoff;
        self
    }

    /// Builder-style poll interval.
    pub fn with_ack_poll_interval(mut self, interval: Duration) -> Self {
        self.ack_poll_interval = interval;
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{name}={raw}"))),
        Err(_) => Ok(None),
    }
}

/// Interaction as written in the configuration document.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InteractionDefinition {
    /// Interaction name.
    pub name: String,
    /// Messaging pattern.
    pub pattern: WorkflowPattern,
    /// Receiver endpoint.
    pub endpoint: String,
    /// Intermediary endpoint.
    #[serde(default)]
    pub intermediary_endpoint: Option<String>,
    /// ebXML service.
    pub service: String,
    /// ebXML action.
    pub action: String,
    /// Our party id.
    pub from_party_id: String,
    /// Remote party id.
    pub to_party_id: String,
    /// CPA id.
    pub cpa_id: String,
    /// Overrides for the pattern's envelope flags.
    #[serde(default)]
    pub ack_requested: Option<bool>,
    /// Duplicate elimination override.
    #[serde(default)]
    pub duplicate_elimination: Option<bool>,
    /// Sync reply override.
    #[serde(default)]
    pub sync_reply: Option<bool>,
    /// Retry bound.
    #[serde(default)]
    pub retries: Option<u32>,
    /// Expiry in milliseconds.
    #[serde(default)]
    pub expiry_ms: Option<u64>,
    /// Synchronous deadline in milliseconds.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl InteractionDefinition {
    /// Resolve against engine defaults.
    pub fn resolve(self, defaults: &WorkflowConfig) -> Interaction {
        let base = AckPolicy::for_pattern(self.pattern);
        Interaction {
            ack_policy: AckPolicy {
                ack_requested: self.ack_requested.unwrap_or(base.ack_requested),
                duplicate_elimination: self
                    .duplicate_elimination
                    .unwrap_or(base.duplicate_elimination),
                sync_reply: self.sync_reply.unwrap_or(base.sync_reply),
            },
            retries: self.retries.unwrap_or(defaults.default_retries),
            expiry: self
                .expiry_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.default_expiry),
            deadline: self
                .deadline_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.default_sync_deadline),
            name: self.name,
            pattern: self.pattern,
            endpoint: self.endpoint,
            intermediary_endpoint: self.intermediary_endpoint,
            service: self.service,
            action: self.action,
            from_party_id: self.from_party_id,
            to_party_id: self.to_party_id,
            cpa_id: self.cpa_id,
        }
    }
}

#[derive(Deserialize)]
struct InteractionDocument {
    interactions: Vec<InteractionDefinition>,
}

/// Immutable name → interaction map.
#[derive(Clone, Debug, Default)]
pub struct InteractionRegistry {
    interactions: HashMap<String, Arc<Interaction>>,
}

impl InteractionRegistry {
    /// Build from resolved interactions, validating each.
    pub fn new(interactions: impl IntoIterator<Item = Interaction>) -> Result<Self, ConfigError> {
        let mut map = HashMap::new();
        for interaction in interactions {
            if interaction.name.trim().is_empty() {
                return Err(ConfigError::Invalid("interaction name is empty".to_string()));
            }
            if interaction.endpoint.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "interaction {} has no endpoint",
                    interaction.name
                )));
            }
            if interaction.pattern == WorkflowPattern::IntermediaryReliable
                && interaction
                    .intermediary_endpoint
                    .as_deref()
                    .map_or(true, |e| e.trim().is_empty())
            {
                return Err(ConfigError::MissingIntermediary(interaction.name));
            }
            if map.contains_key(&interaction.name) {
                return Err(ConfigError::DuplicateInteraction(interaction.name));
            }
            map.insert(interaction.name.clone(), Arc::new(interaction));
        }
        Ok(Self { interactions: map })
    }

    /// Parse `{"interactions": [...]}` and resolve against `defaults`.
    pub fn from_json(json: &str, defaults: &WorkflowConfig) -> Result<Self, ConfigError> {
        let doc: InteractionDocument =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::new(doc.interactions.into_iter().map(|d| d.resolve(defaults)))
    }

    /// Look up an interaction.
    pub fn get(&self, name: &str) -> Option<Arc<Interaction>> {
        self.interactions.get(name).cloned()
    }

    /// Number of configured interactions.
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Whether no interactions are configured.
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Configured names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.interactions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

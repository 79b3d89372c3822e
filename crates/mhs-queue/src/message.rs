//! # Queue Messages
//!
//! Body plus broker properties. Properties are a string map so any broker
//! can carry them as application headers.

use crate::{CORRELATION_ID_PROPERTY, MESSAGE_ID_PROPERTY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Application properties attached to a queue message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperties {
    entries: BTreeMap<String, String>,
}

impl MessageProperties {
    /// Create an empty property set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Set a property, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Look up a property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Workflow message id, if present.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.get(MESSAGE_ID_PROPERTY)
    }

    /// Caller correlation id, if present.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.get(CORRELATION_ID_PROPERTY)
    }

    /// Iterate over all properties in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A message travelling through the queue adaptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Broker-level id, unique per published message.
    pub id: Uuid,
    /// Message body (envelope or clinical payload).
    pub body: String,
    /// Application properties.
    pub properties: MessageProperties,
}

impl QueueMessage {
    /// Create a message with a fresh broker id.
    #[must_use]
    pub fn new(body: impl Into<String>, properties: MessageProperties) -> Self {
        Self {
            id: Uuid::new_v4(),
            body: body.into(),
            properties,
        }
    }

    /// Create a message correlated to a workflow message id.
    #[must_use]
    pub fn correlated(
        body: impl Into<String>,
        message_id: &str,
        correlation_id: Option<&str>,
    ) -> Self {
        let mut properties = MessageProperties::new().with(MESSAGE_ID_PROPERTY, message_id);
        if let Some(correlation_id) = correlation_id {
            properties.insert(CORRELATION_ID_PROPERTY, correlation_id);
        }
        Self::new(body, properties)
    }
}

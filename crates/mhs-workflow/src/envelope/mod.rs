//! # Envelope Module
//!
//! ebXML envelope rendering (request and acknowledgement variants) and
//! parsing of inbound acknowledgement envelopes.
//!
//! Builders take a flat field map and are deterministic: ids and timestamps
//! are inputs, never generated here. Values are XML-escaped; the clinical
//! payload is embedded as CDATA.

pub mod ack;
pub mod inbound;
pub mod request;
pub mod template;

pub use ack::AckEnvelopeBuilder;
pub use inbound::{parse_inbound, parse_received_header, ReceivedHeader};
pub use request::RequestEnvelopeBuilder;
pub use template::{PlaceholderRenderer, TemplateRenderer};

use crate::domain::EnvelopeError;
use std::collections::BTreeMap;

/// Field map handed to a builder.
pub type EnvelopeFields = BTreeMap<String, String>;

/// Field names understood by the builders.
pub mod fields {
    /// Sending party id.
    pub const FROM_PARTY_ID: &str = "from_party_id";
    /// Receiving party id.
    pub const TO_PARTY_ID: &str = "to_party_id";
    /// CPA id.
    pub const CPA_ID: &str = "cpa_id";
    /// Conversation id.
    pub const CONVERSATION_ID: &str = "conversation_id";
    /// Message id.
    pub const MESSAGE_ID: &str = "message_id";
    /// Message timestamp.
    pub const TIMESTAMP: &str = "timestamp";
    /// ebXML service.
    pub const SERVICE: &str = "service";
    /// ebXML action.
    pub const ACTION: &str = "action";
    /// `"true"` / `"false"`.
    pub const DUPLICATE_ELIMINATION: &str = "duplicate_elimination";
    /// `"true"` / `"false"`.
    pub const ACK_REQUESTED: &str = "ack_requested";
    /// Actor for the AckRequested element.
    pub const ACK_SOAP_ACTOR: &str = "ack_soap_actor";
    /// `"true"` / `"false"`.
    pub const SYNC_REPLY: &str = "sync_reply";
    /// Clinical payload.
    pub const PAYLOAD: &str = "hl7_message";
    /// Timestamp of the message being acknowledged.
    pub const RECEIVED_MESSAGE_TIMESTAMP: &str = "received_message_timestamp";
    /// Id of the message being acknowledged.
    pub const RECEIVED_MESSAGE_ID: &str = "received_message_id";
}

/// Renders a wire envelope from a field map.
pub trait EnvelopeBuilder: Send + Sync {
    /// Render. Missing fields and malformed flags fail fast.
    fn build(&self, fields: &EnvelopeFields) -> Result<String, EnvelopeError>;
}

pub(crate) fn require<'a>(fields: &'a EnvelopeFields, name: &str) -> Result<&'a str, EnvelopeError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| EnvelopeError::MissingField(name.to_string()))
}

pub(crate) fn require_flag(fields: &EnvelopeFields, name: &str) -> Result<bool, EnvelopeError> {
    match require(fields, name)? {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(EnvelopeError::InvalidFlag {
            field: name.to_string(),
            value: other.to_string(),
        }),
    }
}

/// Flag value as the builders expect it.
pub fn flag(value: bool) -> String {
    if value { "true" } else { "false" }.to_string()
}

pub(crate) fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// `]]>` cannot appear inside a CDATA section; split it across two.
pub(crate) fn cdata(raw: &str) -> String {
    format!("<![CDATA[{}]]>", raw.replace("]]>", "]]]]><![CDATA[>"))
}

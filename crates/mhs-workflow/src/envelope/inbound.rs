//! Inbound acknowledgement / asynchronous response parsing.

use crate::domain::{AckOutcome, InboundAcknowledgement};
use crate::xml::{walk, Element, XmlEvent, EBXML_NS};
use chrono::{DateTime, Utc};

#[derive(Default)]
struct InboundScan {
    ref_to_message_id: Option<String>,
    acknowledgment: bool,
    ack_timestamp: Option<String>,
    header_timestamp: Option<String>,
    error_list: bool,
    errors: Vec<String>,
    body: String,
}

fn within(path: &[Element], local: &str) -> bool {
    path.iter().any(|e| e.is_in(EBXML_NS, local))
}

fn in_body(path: &[Element]) -> bool {
    path.len() > 2 && path[1].is("Body") && !within(path, "Manifest")
}

/// Parse an inbound ebXML envelope into an acknowledgement.
///
/// Returns `None` for anything that is not well-formed or carries no
/// `RefToMessageId`. An `ErrorList` makes the outcome negative; otherwise it
/// is positive, and body content (outside the manifest) becomes the payload
/// of an asynchronous response.
pub fn parse_inbound(document: &str) -> Option<InboundAcknowledgement> {
    let mut scan = InboundScan::default();

    walk(document, |event| match event {
        XmlEvent::Open(path) => {
            let Some(current) = path.last() else { return };
            if current.is_in(EBXML_NS, "Acknowledgment") {
                scan.acknowledgment = true;
            } else if current.is_in(EBXML_NS, "ErrorList") {
                scan.error_list = true;
            } else if current.is_in(EBXML_NS, "Error") && within(path, "ErrorList") {
                let code = current.attribute("errorCode").unwrap_or("Error");
                scan.errors.push(code.to_string());
            }
        }
        XmlEvent::Text(path, text) => {
            let Some(current) = path.last() else { return };
            if current.is_in(EBXML_NS, "RefToMessageId") {
                scan.ref_to_message_id.get_or_insert_with(|| text.trim().to_string());
            } else if current.is_in(EBXML_NS, "Timestamp") {
                if within(path, "Acknowledgment") {
                    scan.ack_timestamp.get_or_insert_with(|| text.trim().to_string());
                } else if within(path, "MessageData") {
                    scan.header_timestamp.get_or_insert_with(|| text.trim().to_string());
                }
            } else if current.is_in(EBXML_NS, "Description") && within(path, "ErrorList") {
                if let Some(last) = scan.errors.last_mut() {
                    last.push_str(": ");
                    last.push_str(text.trim());
                }
            } else if in_body(path) {
                scan.body.push_str(text);
            }
        }
        XmlEvent::Close => {}
    })
    .ok()?;

    let message_id = scan.ref_to_message_id.filter(|id| !id.is_empty())?;

    let timestamp = scan
        .ack_timestamp
        .or(scan.header_timestamp)
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let outcome = if scan.error_list {
        AckOutcome::Negative {
            reason: if scan.errors.is_empty() {
                "ErrorList".to_string()
            } else {
                scan.errors.join("; ")
            },
        }
    } else {
        AckOutcome::Positive
    };

    let payload = (!scan.acknowledgment && !scan.body.trim().is_empty()).then_some(scan.body);

    Some(InboundAcknowledgement {
        message_id,
        timestamp,
        outcome,
        payload,
    })
}

/// ebXML header of a message we received, as needed to acknowledge it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReceivedHeader {
    /// Sender party id.
    pub from_party_id: String,
    /// Recipient party id.
    pub to_party_id: String,
    /// CPA id.
    pub cpa_id: String,
    /// Conversation id.
    pub conversation_id: String,
    /// Received message id.
    pub message_id: String,
    /// Received message timestamp, verbatim.
    pub timestamp: String,
    /// Sender asked for an acknowledgement.
    pub ack_requested: bool,
}

/// Read the ebXML message header of an inbound message.
///
/// `None` unless the party ids, CPA id, conversation id, message id and
/// timestamp are all present.
pub fn parse_received_header(document: &str) -> Option<ReceivedHeader> {
    let mut from = None;
    let mut to = None;
    let mut cpa_id = None;
    let mut conversation_id = None;
    let mut message_id = None;
    let mut timestamp = None;
    let mut ack_requested = false;

    walk(document, |event| match event {
        XmlEvent::Open(path) => {
            if path.last().is_some_and(|e| e.is_in(EBXML_NS, "AckRequested")) {
                ack_requested = true;
            }
        }
        XmlEvent::Text(path, text) => {
            if !within(path, "MessageHeader") {
                return;
            }
            let Some(current) = path.last() else { return };
            let value = || text.trim().to_string();
            if current.is_in(EBXML_NS, "PartyId") {
                if within(path, "From") {
                    from.get_or_insert_with(value);
                } else if within(path, "To") {
                    to.get_or_insert_with(value);
                }
            } else if current.is_in(EBXML_NS, "CPAId") {
                cpa_id.get_or_insert_with(value);
            } else if current.is_in(EBXML_NS, "ConversationId") {
                conversation_id.get_or_insert_with(value);
            } else if current.is_in(EBXML_NS, "MessageId") {
                message_id.get_or_insert_with(value);
            } else if current.is_in(EBXML_NS, "Timestamp") {
                timestamp.get_or_insert_with(value);
            }
        }
        XmlEvent::Close => {}
    })
    .ok()?;

    Some(ReceivedHeader {
        from_party_id: from?,
        to_party_id: to?,
        cpa_id: cpa_id?,
        conversation_id: conversation_id?,
        message_id: message_id?,
        timestamp: timestamp?,
        ack_requested,
    })
}

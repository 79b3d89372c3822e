//! Acknowledgement envelope for inbound reliable messages.

use super::template::{PlaceholderRenderer, TemplateRenderer};
use super::{escape_xml, fields, require, EnvelopeBuilder, EnvelopeFields};
use crate::domain::EnvelopeError;
use std::sync::Arc;

const TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP:Envelope xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:SOAP="http://schemas.xmlsoap.org/soap/envelope/" xmlns:eb="http://www.oasis-open.org/committees/ebxml-msg/schema/msg-header-2_0.xsd">
<SOAP:Header>
<eb:MessageHeader SOAP:mustUnderstand="1" eb:version="2.0">
<eb:From><eb:PartyId eb:type="urn:nhs:names:partyType:ocs+serviceInstance">{{ from_party_id }}</eb:PartyId></eb:From>
<eb:To><eb:PartyId eb:type="urn:nhs:names:partyType:ocs+serviceInstance">{{ to_party_id }}</eb:PartyId></eb:To>
<eb:CPAId>{{ cpa_id }}</eb:CPAId>
<eb:ConversationId>{{ conversation_id }}</eb:ConversationId>
<eb:Service>urn:oasis:names:tc:ebxml-msg:service</eb:Service>
<eb:Action>Acknowledgment</eb:Action>
<eb:MessageData>
<eb:MessageId>{{ message_id }}</eb:MessageId>
<eb:Timestamp>{{ timestamp }}</eb:Timestamp>
<eb:RefToMessageId>{{ received_message_id }}</eb:RefToMessageId>
</eb:MessageData>
</eb:MessageHeader>
<eb:Acknowledgment SOAP:mustUnderstand="1" eb:version="2.0" SOAP:actor="urn:oasis:names:tc:ebxml-msg:actor:toPartyMSH">
<eb:Timestamp>{{ received_message_timestamp }}</eb:Timestamp>
<eb:RefToMessageId>{{ received_message_id }}</eb:RefToMessageId>
<eb:From><eb:PartyId eb:type="urn:nhs:names:partyType:ocs+serviceInstance">{{ from_party_id }}</eb:PartyId></eb:From>
</eb:Acknowledgment>
</SOAP:Header>
<SOAP:Body/>
</SOAP:Envelope>
"#;

const REQUIRED: [&str; 8] = [
    fields::FROM_PARTY_ID,
    fields::TO_PARTY_ID,
    fields::CPA_ID,
    fields::CONVERSATION_ID,
    fields::MESSAGE_ID,
    fields::TIMESTAMP,
    fields::RECEIVED_MESSAGE_TIMESTAMP,
    fields::RECEIVED_MESSAGE_ID,
];

/// Builds acknowledgement envelopes for messages we received.
#[derive(Clone)]
pub struct AckEnvelopeBuilder {
    renderer: Arc<dyn TemplateRenderer>,
}

impl AckEnvelopeBuilder {
    /// Builder backed by the placeholder renderer.
    pub fn new() -> Self {
        Self::with_renderer(Arc::new(PlaceholderRenderer))
    }

    /// Builder backed by another substitution service.
    pub fn with_renderer(renderer: Arc<dyn TemplateRenderer>) -> Self {
        Self { renderer }
    }
}

impl Default for AckEnvelopeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeBuilder for AckEnvelopeBuilder {
    fn build(&self, input: &EnvelopeFields) -> Result<String, EnvelopeError> {
        let mut values = EnvelopeFields::new();
        for name in REQUIRED {
            values.insert(name.to_string(), escape_xml(require(input, name)?));
        }
        self.renderer.render(TEMPLATE, &values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::parse_inbound;
    use crate::AckOutcome;

    fn ack_fields() -> EnvelopeFields {
        [
            (fields::FROM_PARTY_ID, "YES-0000806"),
            (fields::TO_PARTY_ID, "A91424-9199121"),
            (fields::CPA_ID, "S1001A1630"),
            (fields::CONVERSATION_ID, "C1"),
            (fields::MESSAGE_ID, "ACK-1"),
            (fields::TIMESTAMP, "2019-05-04T20:55:17Z"),
            (fields::RECEIVED_MESSAGE_TIMESTAMP, "2019-05-04T20:55:16Z"),
            (fields::RECEIVED_MESSAGE_ID, "M-1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_ack_is_deterministic() {
        let builder = AckEnvelopeBuilder::new();
        assert_eq!(
            builder.build(&ack_fields()).unwrap(),
            builder.build(&ack_fields()).unwrap()
        );
    }

    #[test]
    fn test_ack_references_received_message() {
        let envelope = AckEnvelopeBuilder::new().build(&ack_fields()).unwrap();
        let ack = parse_inbound(&envelope).unwrap();
        assert_eq!(ack.message_id, "M-1");
        assert_eq!(ack.outcome, AckOutcome::Positive);
        assert!(ack.payload.is_none());
    }

    #[test]
    fn test_ack_requires_received_id() {
        let mut input = ack_fields();
        input.remove(fields::RECEIVED_MESSAGE_ID);
        assert_eq!(
            AckEnvelopeBuilder::new().build(&input),
            Err(EnvelopeError::MissingField(
                fields::RECEIVED_MESSAGE_ID.to_string()
            ))
        );
    }

    #[test]
    fn test_ack_ignores_request_only_fields() {
        let mut input = ack_fields();
        input.insert(fields::SERVICE.to_string(), "ignored".to_string());
        let envelope = AckEnvelopeBuilder::new().build(&input).unwrap();
        assert!(!envelope.contains("ignored"));
        assert!(envelope.contains("<eb:Action>Acknowledgment</eb:Action>"));
    }
}

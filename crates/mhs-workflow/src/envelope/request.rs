//! Request envelope: ebXML message header plus the clinical payload.

use super::template::{PlaceholderRenderer, TemplateRenderer};
use super::{cdata, escape_xml, fields, require, require_flag, EnvelopeBuilder, EnvelopeFields};
use crate::domain::EnvelopeError;
use std::sync::Arc;

const TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP:Envelope xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:SOAP="http://schemas.xmlsoap.org/soap/envelope/" xmlns:eb="http://www.oasis-open.org/committees/ebxml-msg/schema/msg-header-2_0.xsd" xmlns:hl7ebxml="urn:hl7-org:transport/ebXML/DSTUv1.0">
<SOAP:Header>
<eb:MessageHeader SOAP:mustUnderstand="1" eb:version="2.0">
<eb:From><eb:PartyId eb:type="urn:nhs:names:partyType:ocs+serviceInstance">{{ from_party_id }}</eb:PartyId></eb:From>
<eb:To><eb:PartyId eb:type="urn:nhs:names:partyType:ocs+serviceInstance">{{ to_party_id }}</eb:PartyId></eb:To>
<eb:CPAId>{{ cpa_id }}</eb:CPAId>
<eb:ConversationId>{{ conversation_id }}</eb:ConversationId>
<eb:Service>{{ service }}</eb:Service>
<eb:Action>{{ action }}</eb:Action>
<eb:MessageData>
<eb:MessageId>{{ message_id }}</eb:MessageId>
<eb:Timestamp>{{ timestamp }}</eb:Timestamp>
</eb:MessageData>{{ duplicate_elimination_element }}
</eb:MessageHeader>{{ ack_requested_element }}{{ sync_reply_element }}
</SOAP:Header>
<SOAP:Body>
<eb:Manifest SOAP:mustUnderstand="1" eb:version="2.0">
<eb:Reference xlink:href="cid:{{ message_id }}" xmlns:xlink="http://www.w3.org/1999/xlink">
<eb:Description xml:lang="en">HL7 payload</eb:Description>
<hl7ebxml:Payload style="HL7" encoding="XML" version="3.0"/>
</eb:Reference>
</eb:Manifest>
<hl7ebxml:Content>{{ hl7_message }}</hl7ebxml:Content>
</SOAP:Body>
</SOAP:Envelope>
"#;

const SYNC_REPLY_ELEMENT: &str = "\n<eb:SyncReply SOAP:mustUnderstand=\"1\" eb:version=\"2.0\" SOAP:actor=\"http://schemas.xmlsoap.org/soap/actor/next\"/>";

const ESCAPED_FIELDS: [&str; 8] = [
    fields::FROM_PARTY_ID,
    fields::TO_PARTY_ID,
    fields::CPA_ID,
    fields::CONVERSATION_ID,
    fields::SERVICE,
    fields::ACTION,
    fields::MESSAGE_ID,
    fields::TIMESTAMP,
];

/// Builds outbound request envelopes.
#[derive(Clone)]
pub struct RequestEnvelopeBuilder {
    renderer: Arc<dyn TemplateRenderer>,
}

impl RequestEnvelopeBuilder {
    /// Builder backed by the placeholder renderer.
    pub fn new() -> Self {
        Self::with_renderer(Arc::new(PlaceholderRenderer))
    }

    /// Builder backed by another substitution service.
    pub fn with_renderer(renderer: Arc<dyn TemplateRenderer>) -> Self {
        Self { renderer }
    }
}

impl Default for RequestEnvelopeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeBuilder for RequestEnvelopeBuilder {
    fn build(&self, input: &EnvelopeFields) -> Result<String, EnvelopeError> {
        let mut values = EnvelopeFields::new();
        for name in ESCAPED_FIELDS {
            values.insert(name.to_string(), escape_xml(require(input, name)?));
        }

        let duplicate_elimination = require_flag(input, fields::DUPLICATE_ELIMINATION)?;
        let ack_requested = require_flag(input, fields::ACK_REQUESTED)?;
        let sync_reply = require_flag(input, fields::SYNC_REPLY)?;
        let ack_actor = escape_xml(require(input, fields::ACK_SOAP_ACTOR)?);
        let payload = require(input, fields::PAYLOAD)?;

        values.insert(
            "duplicate_elimination_element".to_string(),
            if duplicate_elimination {
                "\n<eb:DuplicateElimination/>".to_string()
            } else {
                String::new()
            },
        );
        values.insert(
            "ack_requested_element".to_string(),
            if ack_requested {
                format!(
                    "\n<eb:AckRequested SOAP:mustUnderstand=\"1\" eb:version=\"2.0\" eb:signed=\"false\" SOAP:actor=\"{ack_actor}\"/>"
                )
            } else {
                String::new()
            },
        );
        values.insert(
            "sync_reply_element".to_string(),
            if sync_reply {
                SYNC_REPLY_ELEMENT.to_string()
            } else {
                String::new()
            },
        );
        values.insert(fields::PAYLOAD.to_string(), cdata(payload));

        self.renderer.render(TEMPLATE, &values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::is_fault;

    fn request_fields() -> EnvelopeFields {
        [
            (fields::FROM_PARTY_ID, "A91424-9199121"),
            (fields::TO_PARTY_ID, "YES-0000806"),
            (fields::CPA_ID, "S1001A1630"),
            (fields::CONVERSATION_ID, "79F49A34-9798-404C-AEC4-FD38DD81C138"),
            (fields::MESSAGE_ID, "0C9D9E22-6E21-4BE5-9C7C-0B2B1C6E3C2A"),
            (fields::TIMESTAMP, "2019-05-04T20:55:16Z"),
            (fields::SERVICE, "urn:nhs:names:services:psis"),
            (fields::ACTION, "MCCI_IN010000UK13"),
            (fields::DUPLICATE_ELIMINATION, "true"),
            (fields::ACK_REQUESTED, "true"),
            (
                fields::ACK_SOAP_ACTOR,
                "urn:oasis:names:tc:ebxml-msg:actor:toPartyMSH",
            ),
            (fields::SYNC_REPLY, "false"),
            (fields::PAYLOAD, "<REPC_IN150016UK05 id=\"9446245796\"/>"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = RequestEnvelopeBuilder::new();
        let a = builder.build(&request_fields()).unwrap();
        let b = builder.build(&request_fields()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_flags_toggle_elements() {
        let builder = RequestEnvelopeBuilder::new();
        let envelope = builder.build(&request_fields()).unwrap();
        assert!(envelope.contains("<eb:DuplicateElimination/>"));
        assert!(envelope.contains("<eb:AckRequested"));
        assert!(!envelope.contains("<eb:SyncReply"));

        let mut input = request_fields();
        input.insert(fields::DUPLICATE_ELIMINATION.to_string(), "false".to_string());
        input.insert(fields::SYNC_REPLY.to_string(), "true".to_string());
        let envelope = builder.build(&input).unwrap();
        assert!(!envelope.contains("DuplicateElimination"));
        assert!(envelope.contains("<eb:SyncReply"));
    }

    #[test]
    fn test_payload_embedded_as_cdata() {
        let envelope = RequestEnvelopeBuilder::new()
            .build(&request_fields())
            .unwrap();
        assert!(envelope.contains("<![CDATA[<REPC_IN150016UK05 id=\"9446245796\"/>]]>"));
    }

    #[test]
    fn test_values_are_escaped() {
        let mut input = request_fields();
        input.insert(fields::CPA_ID.to_string(), "A&B<C>".to_string());
        let envelope = RequestEnvelopeBuilder::new().build(&input).unwrap();
        assert!(envelope.contains("<eb:CPAId>A&amp;B&lt;C&gt;</eb:CPAId>"));
    }

    #[test]
    fn test_output_is_well_formed_non_fault() {
        let envelope = RequestEnvelopeBuilder::new()
            .build(&request_fields())
            .unwrap();
        assert!(crate::xml::walk(&envelope, |_| {}).is_ok());
        assert!(!is_fault(Some(&envelope)));
    }

    #[test]
    fn test_missing_field_fails_fast() {
        let mut input = request_fields();
        input.remove(fields::ACTION);
        assert_eq!(
            RequestEnvelopeBuilder::new().build(&input),
            Err(EnvelopeError::MissingField(fields::ACTION.to_string()))
        );
    }

    #[test]
    fn test_malformed_flag_fails_fast() {
        let mut input = request_fields();
        input.insert(fields::ACK_REQUESTED.to_string(), "yes".to_string());
        assert_eq!(
            RequestEnvelopeBuilder::new().build(&input),
            Err(EnvelopeError::InvalidFlag {
                field: fields::ACK_REQUESTED.to_string(),
                value: "yes".to_string(),
            })
        );
    }
}

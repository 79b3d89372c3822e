//! # Workflow Integration Tests
//!
//! Drive the engine end to end over the in-memory store, the scripted mock
//! transport and in-memory queues.
//!
//! ## Test Categories
//!
//! 1. **Admission** - unknown interactions, sequence allocation
//! 2. **Reliable delivery** - retransmission, acknowledgement, expiry
//! 3. **Acknowledgements** - duplicates, negatives, listener path
//! 4. **Routing** - intermediary endpoint selection
//!
//! All timing tests run on a paused clock.

use mhs_queue::{InMemoryQueue, QueueAdaptor, QueueMessage};
use mhs_workflow::adapters::{AcknowledgementListener, InMemoryStateStore, ListenerOutcome};
use mhs_workflow::domain::{
    AckDisposition, AckPolicy, InboundAcknowledgement, InteractionRegistry, MessageState,
    OutboundRequest, RequestContext, SendError, WorkflowConfig, WorkflowError, WorkflowOutcome,
};
use mhs_workflow::envelope::ReceivedHeader;
use mhs_workflow::ports::{MockReply, MockTransport, TransportResponse, WorkflowApi};
use mhs_workflow::{EnginePorts, WorkflowEngine};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

// =============================================================================
// TEST HELPERS
// =============================================================================

const GP_SUMMARY: &str = "gp_summary_upload";
const PATIENT_NHS_NUMBER: &str = "9446245796";
const RECEIVER: &str = "http://receiver.local/reliablemessaging/reliablerequest";
const FORWARDER: &str = "http://forwarder.local/reliablemessaging/forwardreliable";

const INTERACTIONS: &str = r#"{
    "interactions": [
        {
            "name": "gp_summary_upload",
            "pattern": "async_reliable",
            "endpoint": "http://receiver.local/reliablemessaging/reliablerequest",
            "service": "urn:nhs:names:services:psis",
            "action": "REPC_IN150016UK05",
            "from_party_id": "A91424-9199121",
            "to_party_id": "YES-0000806",
            "cpa_id": "S1001A1630",
            "retries": 3,
            "expiry_ms": 1000
        },
        {
            "name": "forwarded_update",
            "pattern": "intermediary_reliable",
            "endpoint": "http://receiver.local/reliablemessaging/reliablerequest",
            "intermediary_endpoint": "http://forwarder.local/reliablemessaging/forwardreliable",
            "service": "urn:nhs:names:services:pdsquery",
            "action": "PRPA_IN100000UK01",
            "from_party_id": "A91424-9199121",
            "to_party_id": "YES-0000806",
            "cpa_id": "S20001A000182",
            "retries": 1,
            "expiry_ms": 1000
        },
        {
            "name": "lab_results_express",
            "pattern": "async_express",
            "endpoint": "http://receiver.local/reliablemessaging/queryrequest",
            "service": "urn:nhs:names:services:lab",
            "action": "POLB_IN050000UK01",
            "from_party_id": "A91424-9199121",
            "to_party_id": "YES-0000806",
            "cpa_id": "S3024519A3110234",
            "expiry_ms": 60000
        },
        {
            "name": "summary_care_record",
            "pattern": "synchronous",
            "endpoint": "http://receiver.local/sync",
            "service": "urn:nhs:names:services:pdsquery",
            "action": "QUPA_IN040000UK32",
            "from_party_id": "A91424-9199121",
            "to_party_id": "YES-0000806",
            "cpa_id": "S2001A",
            "deadline_ms": 5000
        }
    ]
}"#;

struct Harness {
    engine: WorkflowEngine,
    store: Arc<InMemoryStateStore>,
    transport: Arc<MockTransport>,
    responses: Arc<InMemoryQueue>,
}

fn make_harness_with(registry: InteractionRegistry, transport: MockTransport) -> Harness {
    let store = Arc::new(InMemoryStateStore::new());
    let transport = Arc::new(transport);
    let responses = Arc::new(InMemoryQueue::new("responses"));
    let engine = WorkflowEngine::new(
        Arc::new(registry),
        WorkflowConfig::default(),
        EnginePorts {
            store: store.clone(),
            transport: transport.clone(),
            response_queue: responses.clone(),
        },
    );
    Harness {
        engine,
        store,
        transport,
        responses,
    }
}

fn make_harness() -> Harness {
    let registry = InteractionRegistry::from_json(INTERACTIONS, &WorkflowConfig::default())
        .expect("valid interactions");
    make_harness_with(registry, MockTransport::new())
}

fn make_payload() -> String {
    format!(
        "<REPC_IN150016UK05><patient><id extension=\"{PATIENT_NHS_NUMBER}\"/></patient></REPC_IN150016UK05>"
    )
}

fn make_request(message_id: &str) -> OutboundRequest {
    OutboundRequest::new(make_payload()).with_context(RequestContext {
        message_id: Some(message_id.to_string()),
        correlation_id: Some(format!("CORR-{message_id}")),
        ..Default::default()
    })
}

/// Yield on the paused clock until `message_id` reaches `state`.
async fn wait_for_state(engine: &WorkflowEngine, message_id: &str, state: MessageState) {
    for _ in 0..1_000 {
        if let Some(record) = engine.poll_response(message_id).await.unwrap() {
            if record.state == state {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{message_id} never reached {state}");
}

/// ebXML acknowledgement carrying an error list for `message_id`.
fn negative_ack_envelope(message_id: &str) -> String {
    format!(
        r#"<SOAP:Envelope xmlns:SOAP="http://schemas.xmlsoap.org/soap/envelope/" xmlns:eb="http://www.oasis-open.org/committees/ebxml-msg/schema/msg-header-2_0.xsd">
<SOAP:Header>
<eb:MessageHeader eb:version="2.0">
<eb:MessageData>
<eb:MessageId>NACK-{message_id}</eb:MessageId>
<eb:Timestamp>2019-05-04T20:55:16Z</eb:Timestamp>
<eb:RefToMessageId>{message_id}</eb:RefToMessageId>
</eb:MessageData>
</eb:MessageHeader>
<eb:ErrorList eb:version="2.0" eb:highestSeverity="Error">
<eb:Error eb:errorCode="ValueNotRecognized" eb:severity="Error">
<eb:Description xml:lang="en-GB">unknown patient</eb:Description>
</eb:Error>
</eb:ErrorList>
</SOAP:Header>
<SOAP:Body/>
</SOAP:Envelope>"#
    )
}

fn received_header_for(message_id: &str) -> ReceivedHeader {
    ReceivedHeader {
        from_party_id: "A91424-9199121".to_string(),
        to_party_id: "YES-0000806".to_string(),
        cpa_id: "S1001A1630".to_string(),
        conversation_id: format!("CORR-{message_id}"),
        message_id: message_id.to_string(),
        timestamp: "2019-05-04T20:55:16Z".to_string(),
        ack_requested: false,
    }
}

// =============================================================================
// ADMISSION
// =============================================================================

#[tokio::test]
async fn test_unknown_interaction_touches_nothing() {
    let h = make_harness();

    let err = h
        .engine
        .handle_outbound_message("no_such_interaction", make_request("M-UNKNOWN"))
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::UnknownInteraction(ref name) if name == "no_such_interaction"));
    assert_eq!(err.status_code(), 400);
    assert_eq!(h.store.read_count(), 0);
    assert_eq!(h.store.write_count(), 0);
    assert_eq!(h.transport.request_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_messages_get_distinct_interchange_ids() {
    let h = make_harness();

    let mut handles = Vec::new();
    for i in 0..32 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .handle_outbound_message("summary_care_record", make_request(&format!("SYNC-{i}")))
                .await
                .unwrap()
                .message_id()
                .to_string()
        }));
    }

    let mut interchange_ids = HashSet::new();
    for handle in handles {
        let message_id = handle.await.unwrap();
        let record = h.engine.poll_response(&message_id).await.unwrap().unwrap();
        assert_eq!(record.state, MessageState::Completed);
        assert!(interchange_ids.insert(record.interchange_id));
    }
    assert_eq!(interchange_ids.len(), 32);
}

#[tokio::test(start_paused = true)]
async fn test_store_unavailable_is_persistence_error() {
    let h = make_harness();
    h.store.set_available(false);

    let err = h
        .engine
        .handle_outbound_message(GP_SUMMARY, make_request("M-DOWN"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::PersistenceError(_)));
    assert_eq!(h.transport.request_count(), 0);
}

// =============================================================================
// RELIABLE DELIVERY
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_reliable_message_fails_after_retries() {
    let h = make_harness();

    let err = h
        .engine
        .handle_outbound_message(GP_SUMMARY, make_request("M-NOACK"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        WorkflowError::Timeout {
            message_id: "M-NOACK".to_string(),
            attempts: 4
        }
    );
    assert_eq!(err.status_code(), 504);

    let sent = h.transport.requests();
    assert_eq!(sent.len(), 4);
    for request in &sent {
        assert_eq!(request.endpoint, RECEIVER);
        assert!(request.body.contains("<eb:DuplicateElimination/>"));
        assert!(request.body.contains(PATIENT_NHS_NUMBER));
    }

    let record = h.engine.poll_response("M-NOACK").await.unwrap().unwrap();
    assert_eq!(record.state, MessageState::Failed);
    assert_eq!(record.attempts, 4);
    assert!(record.last_error.is_some());

    let metrics = h.engine.metrics().snapshot();
    assert_eq!(metrics.messages_sent, 4);
    assert_eq!(metrics.retransmissions, 3);
    assert_eq!(metrics.timeouts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retransmissions_carry_duplicate_elimination() {
    let mut interaction = InteractionRegistry::from_json(INTERACTIONS, &WorkflowConfig::default())
        .unwrap()
        .get(GP_SUMMARY)
        .unwrap()
        .as_ref()
        .clone();
    interaction.ack_policy = AckPolicy {
        duplicate_elimination: false,
        ..interaction.ack_policy
    };
    interaction.retries = 2;
    let h = make_harness_with(
        InteractionRegistry::new([interaction]).unwrap(),
        MockTransport::new(),
    );

    let _ = h
        .engine
        .handle_outbound_message(GP_SUMMARY, make_request("M-DUP"))
        .await;

    let sent = h.transport.requests();
    assert_eq!(sent.len(), 3);
    assert!(!sent[0].body.contains("DuplicateElimination"));
    assert!(sent[1].body.contains("<eb:DuplicateElimination/>"));
    assert!(sent[2].body.contains("<eb:DuplicateElimination/>"));
}

#[tokio::test(start_paused = true)]
async fn test_acknowledged_reliable_message_succeeds() {
    let h = make_harness();
    let engine = h.engine.clone();
    let caller =
        tokio::spawn(async move { engine.handle_outbound_message(GP_SUMMARY, make_request("M-ACK")).await });

    wait_for_state(&h.engine, "M-ACK", MessageState::AwaitingAck).await;
    let writes_before = h.store.write_count();

    let first = h
        .engine
        .handle_acknowledgement(InboundAcknowledgement::positive("M-ACK"))
        .await
        .unwrap();
    assert_eq!(first, AckDisposition::Applied(MessageState::Acked));

    let outcome = caller.await.unwrap().unwrap();
    assert_eq!(
        outcome,
        WorkflowOutcome::Acknowledged {
            message_id: "M-ACK".to_string()
        }
    );
    assert_eq!(outcome.status_code(), 200);

    // Duplicate: no transition, no write.
    let writes_after_ack = h.store.write_count();
    assert_eq!(writes_after_ack, writes_before + 1);
    let duplicate = h
        .engine
        .handle_acknowledgement(InboundAcknowledgement::positive("M-ACK"))
        .await
        .unwrap();
    assert_eq!(duplicate, AckDisposition::Duplicate);
    assert_eq!(h.store.write_count(), writes_after_ack);

    let record = h.engine.poll_response("M-ACK").await.unwrap().unwrap();
    assert_eq!(record.state, MessageState::Acked);
    assert_eq!(record.attempts, 1);
    assert_eq!(h.transport.request_count(), 1);

    let metrics = h.engine.metrics().snapshot();
    assert_eq!(metrics.acks_applied, 1);
    assert_eq!(metrics.duplicate_acks, 1);
}

#[tokio::test(start_paused = true)]
async fn test_ack_after_retransmission() {
    let h = make_harness();
    let engine = h.engine.clone();
    let caller =
        tokio::spawn(async move { engine.handle_outbound_message(GP_SUMMARY, make_request("M-LATE")).await });

    // Let the first window lapse so the message is resent.
    for _ in 0..1_000 {
        if h.transport.request_count() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    wait_for_state(&h.engine, "M-LATE", MessageState::AwaitingAck).await;

    h.engine
        .handle_acknowledgement(InboundAcknowledgement::positive("M-LATE"))
        .await
        .unwrap();

    let outcome = caller.await.unwrap().unwrap();
    assert!(matches!(outcome, WorkflowOutcome::Acknowledged { .. }));
    let record = h.engine.poll_response("M-LATE").await.unwrap().unwrap();
    assert_eq!(record.attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_negative_acknowledgement_is_remote_fault() {
    let h = make_harness();
    let engine = h.engine.clone();
    let caller =
        tokio::spawn(async move { engine.handle_outbound_message(GP_SUMMARY, make_request("M-NACK")).await });

    wait_for_state(&h.engine, "M-NACK", MessageState::AwaitingAck).await;
    let disposition = h
        .engine
        .handle_acknowledgement(InboundAcknowledgement::negative(
            "M-NACK",
            "ValueNotRecognized: unknown patient",
        ))
        .await
        .unwrap();
    assert_eq!(disposition, AckDisposition::Applied(MessageState::Nacked));

    let err = caller.await.unwrap().unwrap_err();
    assert_eq!(
        err,
        WorkflowError::RemoteFault {
            message_id: "M-NACK".to_string(),
            detail: "ValueNotRecognized: unknown patient".to_string()
        }
    );
    let record = h.engine.poll_response("M-NACK").await.unwrap().unwrap();
    assert_eq!(record.state, MessageState::Nacked);

    // A positive ack after the negative one cannot change the outcome.
    let late = h
        .engine
        .handle_acknowledgement(InboundAcknowledgement::positive("M-NACK"))
        .await
        .unwrap();
    assert_eq!(late, AckDisposition::Ignored(MessageState::Nacked));
}

#[tokio::test(start_paused = true)]
async fn test_fault_response_stops_retransmission() {
    let h = make_harness();
    h.transport.push_reply(MockReply::Respond(TransportResponse::new(
        500,
        r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/"><SOAP-ENV:Body><SOAP-ENV:Fault><faultcode>SOAP-ENV:Client</faultcode><faultstring>Rejected</faultstring></SOAP-ENV:Fault></SOAP-ENV:Body></SOAP-ENV:Envelope>"#,
    )));

    let err = h
        .engine
        .handle_outbound_message(GP_SUMMARY, make_request("M-FAULT"))
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::RemoteFault { ref detail, .. } if detail.contains("Rejected")));
    assert_eq!(h.transport.request_count(), 1);
    let record = h.engine.poll_response("M-FAULT").await.unwrap().unwrap();
    assert_eq!(record.state, MessageState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_on_every_attempt() {
    let registry = InteractionRegistry::from_json(INTERACTIONS, &WorkflowConfig::default()).unwrap();
    let h = make_harness_with(
        registry,
        MockTransport::with_fallback(MockReply::Fail(SendError::Connection(
            "connection refused".to_string(),
        ))),
    );

    let err = h
        .engine
        .handle_outbound_message(GP_SUMMARY, make_request("M-DOWN"))
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::TransportError { ref detail, .. } if detail.contains("connection refused")));
    assert_eq!(h.transport.request_count(), 4);
    let record = h.engine.poll_response("M-DOWN").await.unwrap().unwrap();
    assert_eq!(record.state, MessageState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_transient_transport_failure_is_retried() {
    let h = make_harness();
    h.transport.push_reply(MockReply::Fail(SendError::Connection(
        "connection reset".to_string(),
    )));

    let engine = h.engine.clone();
    let caller =
        tokio::spawn(async move { engine.handle_outbound_message(GP_SUMMARY, make_request("M-FLAKY")).await });

    for _ in 0..1_000 {
        if h.transport.request_count() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    wait_for_state(&h.engine, "M-FLAKY", MessageState::AwaitingAck).await;
    h.engine
        .handle_acknowledgement(InboundAcknowledgement::positive("M-FLAKY"))
        .await
        .unwrap();

    assert!(matches!(
        caller.await.unwrap().unwrap(),
        WorkflowOutcome::Acknowledged { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_acknowledgement_in_http_response_body() {
    let h = make_harness();
    let ack_envelope = h
        .engine
        .acknowledge_inbound(&received_header_for("M-SYNCACK"))
        .unwrap();
    h.transport
        .push_reply(MockReply::Respond(TransportResponse::new(200, ack_envelope)));

    let outcome = h
        .engine
        .handle_outbound_message(GP_SUMMARY, make_request("M-SYNCACK"))
        .await
        .unwrap();

    assert!(matches!(outcome, WorkflowOutcome::Acknowledged { .. }));
    assert_eq!(h.transport.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_negative_acknowledgement_in_http_response_body() {
    let h = make_harness();
    h.transport.push_reply(MockReply::Respond(TransportResponse::new(
        200,
        negative_ack_envelope("M-SYNCNACK"),
    )));

    let err = h
        .engine
        .handle_outbound_message(GP_SUMMARY, make_request("M-SYNCNACK"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        WorkflowError::RemoteFault {
            message_id: "M-SYNCNACK".to_string(),
            detail: "ValueNotRecognized: unknown patient".to_string()
        }
    );
    assert_eq!(h.transport.request_count(), 1);
    let record = h.engine.poll_response("M-SYNCNACK").await.unwrap().unwrap();
    assert_eq!(record.state, MessageState::Nacked);
}

#[tokio::test(start_paused = true)]
async fn test_negative_response_body_for_other_message_is_fault() {
    let h = make_harness();
    h.transport.push_reply(MockReply::Respond(TransportResponse::new(
        200,
        negative_ack_envelope("SOMEONE-ELSE"),
    )));

    let err = h
        .engine
        .handle_outbound_message(GP_SUMMARY, make_request("M-OTHER"))
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::RemoteFault { .. }));
    let record = h.engine.poll_response("M-OTHER").await.unwrap().unwrap();
    assert_eq!(record.state, MessageState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_express_negative_response_body_is_nacked() {
    let h = make_harness();
    h.transport.push_reply(MockReply::Respond(TransportResponse::new(
        200,
        negative_ack_envelope("M-EXPNACK"),
    )));

    let outcome = h
        .engine
        .handle_outbound_message("lab_results_express", make_request("M-EXPNACK"))
        .await
        .unwrap();
    assert!(matches!(outcome, WorkflowOutcome::Accepted { .. }));

    let record = h.engine.poll_response("M-EXPNACK").await.unwrap().unwrap();
    assert_eq!(record.state, MessageState::Nacked);
    let queued = h
        .responses
        .receive(Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(queued.properties.get("outcome"), Some("nack"));
    assert_eq!(
        queued.properties.get("reason"),
        Some("ValueNotRecognized: unknown patient")
    );
}

#[tokio::test(start_paused = true)]
async fn test_acknowledgement_applied_by_another_instance() {
    let first = make_harness();
    let registry = InteractionRegistry::from_json(INTERACTIONS, &WorkflowConfig::default()).unwrap();
    let second = WorkflowEngine::new(
        Arc::new(registry),
        WorkflowConfig::default(),
        EnginePorts {
            store: first.store.clone(),
            transport: Arc::new(MockTransport::new()),
            response_queue: Arc::new(InMemoryQueue::new("other-responses")),
        },
    );

    let engine = first.engine.clone();
    let caller =
        tokio::spawn(async move { engine.handle_outbound_message(GP_SUMMARY, make_request("M-SHARED")).await });
    wait_for_state(&first.engine, "M-SHARED", MessageState::AwaitingAck).await;

    let disposition = second
        .handle_acknowledgement(InboundAcknowledgement::positive("M-SHARED"))
        .await
        .unwrap();
    assert_eq!(disposition, AckDisposition::Applied(MessageState::Acked));

    assert_eq!(
        caller.await.unwrap().unwrap(),
        WorkflowOutcome::Acknowledged {
            message_id: "M-SHARED".to_string()
        }
    );
    assert_eq!(first.transport.request_count(), 1);
}

// =============================================================================
// ROUTING
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_intermediary_reliable_routes_to_forwarder() {
    let h = make_harness();

    let err = h
        .engine
        .handle_outbound_message("forwarded_update", make_request("M-FWD"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Timeout { attempts: 2, .. }));

    let sent = h.transport.requests();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|r| r.endpoint == FORWARDER));
    assert_eq!(
        sent[0].soap_action,
        "urn:nhs:names:services:pdsquery/PRPA_IN100000UK01"
    );
}

// =============================================================================
// ACKNOWLEDGEMENT LISTENER
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_listener_applies_queued_acknowledgement() {
    let h = make_harness();
    let api: Arc<dyn WorkflowApi> = Arc::new(h.engine.clone());
    let inbound = Arc::new(InMemoryQueue::new("inbound"));
    let listener = AcknowledgementListener::new(inbound.clone(), api);

    let engine = h.engine.clone();
    let caller =
        tokio::spawn(async move { engine.handle_outbound_message(GP_SUMMARY, make_request("M-LISTEN")).await });
    wait_for_state(&h.engine, "M-LISTEN", MessageState::AwaitingAck).await;

    let envelope = h
        .engine
        .acknowledge_inbound(&received_header_for("M-LISTEN"))
        .unwrap();
    let outcome = listener
        .process_one(&QueueMessage::correlated(envelope, "M-LISTEN", None))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ListenerOutcome::Handled(AckDisposition::Applied(MessageState::Acked))
    );
    assert!(matches!(
        caller.await.unwrap().unwrap(),
        WorkflowOutcome::Acknowledged { .. }
    ));

    let garbage = listener
        .process_one(&QueueMessage::correlated("not xml", "M-LISTEN", None))
        .await
        .unwrap();
    assert_eq!(garbage, ListenerOutcome::Unparseable);
    assert_eq!(listener.processed(), 1);
    assert_eq!(listener.rejected(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_listener_run_stops_on_shutdown() {
    let h = make_harness();
    let api: Arc<dyn WorkflowApi> = Arc::new(h.engine.clone());
    let inbound = Arc::new(InMemoryQueue::new("inbound"));
    let listener = Arc::new(
        AcknowledgementListener::new(inbound.clone(), api)
            .with_receive_timeout(Duration::from_millis(50)),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = {
        let listener = listener.clone();
        tokio::spawn(async move { listener.run(shutdown_rx).await })
    };

    let envelope = h
        .engine
        .acknowledge_inbound(&received_header_for("NOT-OURS"))
        .unwrap();
    inbound
        .send_sync(QueueMessage::correlated(envelope, "NOT-OURS", None))
        .await
        .unwrap();

    for _ in 0..100 {
        if listener.processed() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(listener.processed(), 1);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.responses.depth(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_listener_redelivers_while_store_offline() {
    let h = make_harness();
    let outcome = h
        .engine
        .handle_outbound_message("lab_results_express", make_request("M-REDELIVER"))
        .await
        .unwrap();
    assert!(matches!(outcome, WorkflowOutcome::Accepted { .. }));

    let api: Arc<dyn WorkflowApi> = Arc::new(h.engine.clone());
    let inbound = Arc::new(InMemoryQueue::new("inbound"));
    let listener = Arc::new(
        AcknowledgementListener::new(inbound.clone(), api)
            .with_receive_timeout(Duration::from_millis(50))
            .with_max_redeliveries(1_000),
    );

    h.store.set_available(false);
    let envelope = h
        .engine
        .acknowledge_inbound(&received_header_for("M-REDELIVER"))
        .unwrap();
    inbound
        .send_sync(QueueMessage::correlated(envelope, "M-REDELIVER", None))
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = {
        let listener = listener.clone();
        tokio::spawn(async move { listener.run(shutdown_rx).await })
    };

    for _ in 0..1_000 {
        if listener.redelivered() >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(listener.redelivered() >= 1);
    assert_eq!(listener.processed(), 0);

    h.store.set_available(true);
    wait_for_state(&h.engine, "M-REDELIVER", MessageState::Acked).await;
    for _ in 0..100 {
        if listener.processed() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(listener.processed(), 1);
    assert_eq!(listener.abandoned(), 0);
    assert_eq!(h.responses.depth(), 1);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
}

//! End-to-end request/response lifecycles through the public API.

mod common;

use bytes::Bytes;
use common::{error_event, get, post, response, Call, Event, Harness, RecordingHandler};
use quicd_txn::{
    Direction, EgressState, ErrorCode, ErrorKind, IngressState, PriorityUpdate, StreamId,
    TransportDirection,
};

#[test]
fn test_get_answered_from_eom_callback() {
    let h = Harness::http2();
    let handler = RecordingHandler::scripted(&h.log, |txn, event| {
        if *event == Event::Eom {
            txn.send_headers(&response(200));
            txn.send_body(Bytes::from_static(b"hello"));
            txn.send_eom();
        }
    });
    let mut txn = h.transaction(1, TransportDirection::Downstream, handler);

    txn.on_ingress_headers_complete(get("/"));
    txn.on_ingress_eom();

    assert!(txn.is_detached());
    assert_eq!(txn.ingress_state(), IngressState::ReceivingDone);
    assert_eq!(txn.egress_state(), EgressState::SendingDone);
    assert_eq!(
        h.transport.calls(1),
        vec![
            Call::Headers {
                status: 200,
                eom: false
            },
            Call::Body { len: 5, eom: false },
            Call::Eom { trailers: false },
            Call::Detach,
        ]
    );
    assert_eq!(h.events(), vec![Event::Headers(0), Event::Eom, Event::Detached]);
    assert_eq!(h.transport.buffered.get(), 0);
}

#[test]
fn test_response_with_trailers() {
    let h = Harness::http2();
    let mut txn = h.downstream(1);
    txn.on_ingress_headers_complete(get("/"));
    txn.on_ingress_eom();

    txn.send_headers(&response(200));
    txn.send_body(Bytes::from_static(b"abc"));
    let mut trailers = http::HeaderMap::new();
    trailers.insert("x-checksum", http::HeaderValue::from_static("1234"));
    txn.send_trailers(trailers);
    txn.send_eom();

    // Trailers ride on the EOM, so the body itself does not end the stream.
    assert_eq!(
        h.transport.calls(1),
        vec![
            Call::Headers {
                status: 200,
                eom: false
            },
            Call::Body { len: 3, eom: false },
            Call::Eom { trailers: true },
            Call::Detach,
        ]
    );
}

#[test]
fn test_invalid_ingress_aborts_with_protocol_error() {
    let h = Harness::http2();
    let mut txn = h.downstream(1);

    txn.on_ingress_body(Bytes::from_static(b"x"), 0);

    assert!(txn.is_aborted());
    assert!(txn.is_detached());
    assert_eq!(
        h.transport.calls(1),
        vec![Call::Abort(ErrorCode::ProtocolError), Call::Detach]
    );
    assert_eq!(
        h.events(),
        vec![
            error_event(
                ErrorKind::IngressStateTransition,
                Direction::IngressAndEgress,
                Some(ErrorCode::ProtocolError)
            ),
            Event::Detached,
        ]
    );
}

#[test]
fn test_duplicate_eom_resets_stream() {
    let h = Harness::http2();
    let mut txn = h.downstream(1);
    txn.on_ingress_headers_complete(get("/"));
    txn.on_ingress_eom();
    txn.on_ingress_eom();

    assert!(h
        .transport
        .calls(1)
        .contains(&Call::Abort(ErrorCode::StreamClosed)));
    assert!(txn.is_detached());
}

#[test]
#[should_panic(expected = "invalid egress transition")]
fn test_body_after_eom_panics() {
    let h = Harness::http2();
    let mut txn = h.downstream(1);
    txn.on_ingress_headers_complete(get("/"));
    txn.send_headers(&response(200));
    txn.send_eom();
    txn.send_body(Bytes::from_static(b"late"));
}

#[test]
#[should_panic(expected = "headers cannot be sent")]
fn test_second_final_response_panics() {
    let h = Harness::http2();
    let mut txn = h.downstream(1);
    txn.on_ingress_headers_complete(get("/"));
    txn.send_headers(&response(200));
    txn.send_headers(&response(200));
}

#[test]
fn test_interim_response_allows_final_response() {
    let h = Harness::http2();
    let mut txn = h.downstream(1);
    txn.on_ingress_headers_complete(post("/upload", 0));

    txn.send_headers(&response(100));
    assert!(txn.extra_response_expected());
    assert!(txn.can_send_headers());
    txn.send_headers(&response(200));
    assert!(!txn.can_send_headers());
    assert_eq!(txn.last_response_status(), 200);
}

#[test]
fn test_pending_byte_events_delay_detach() {
    let h = Harness::http2();
    let mut txn = h.downstream(1);
    txn.increment_pending_byte_events();

    txn.on_ingress_headers_complete(get("/"));
    txn.on_ingress_eom();
    txn.send_headers_with_eom(&response(204));

    assert!(txn.is_ingress_complete() && txn.is_egress_complete());
    assert!(!txn.is_detached());
    assert!(!h.transport.calls(1).contains(&Call::Detach));

    txn.decrement_pending_byte_events();
    assert!(txn.is_detached());
    assert_eq!(h.events().last(), Some(&Event::Detached));
}

#[test]
fn test_tracked_eom_keeps_transaction_until_acknowledged() {
    let h = Harness::http2();
    h.transport.eom_byte_events.set(1);
    let mut table = h.table(TransportDirection::Downstream);
    table.create(StreamId(1), RecordingHandler::new(&h.log).boxed(), PriorityUpdate::default());

    table.with_transaction(StreamId(1), |txn| {
        txn.on_ingress_headers_complete(get("/"));
        txn.on_ingress_eom();
        txn.send_headers(&response(200));
        txn.send_body(Bytes::from_static(b"hello"));
        txn.send_eom();
    });

    let txn = table.get(StreamId(1)).expect("awaiting last byte ack");
    assert!(txn.is_ingress_complete() && txn.is_egress_complete());
    assert!(!txn.is_detached());
    assert!(!h.transport.calls(1).contains(&Call::Detach));

    table.with_transaction(StreamId(1), |txn| txn.decrement_pending_byte_events());
    assert!(!table.contains(StreamId(1)));
    assert_eq!(h.transport.calls(1).last(), Some(&Call::Detach));
    assert_eq!(h.events().last(), Some(&Event::Detached));
}

#[test]
fn test_repeated_request_headers_abort() {
    let h = Harness::http2();
    let mut txn = h.downstream(1);
    txn.on_ingress_headers_complete(get("/"));
    txn.on_ingress_headers_complete(get("/again"));

    assert!(txn.is_aborted());
    assert!(txn.is_detached());
    assert_eq!(
        h.transport.calls(1),
        vec![Call::Abort(ErrorCode::ProtocolError), Call::Detach]
    );
    assert_eq!(
        h.events(),
        vec![
            Event::Headers(0),
            error_event(
                ErrorKind::IngressStateTransition,
                Direction::IngressAndEgress,
                Some(ErrorCode::ProtocolError)
            ),
            Event::Detached,
        ]
    );
}

#[test]
fn test_headers_after_final_response_abort() {
    let h = Harness::http2();
    let mut txn = h.transaction(1, TransportDirection::Upstream, RecordingHandler::new(&h.log));
    txn.send_headers(&get("/"));

    txn.on_ingress_headers_complete(response(200));
    txn.on_ingress_headers_complete(response(200));

    assert!(txn.is_aborted());
    assert_eq!(
        h.events(),
        vec![
            Event::Headers(200),
            error_event(
                ErrorKind::IngressStateTransition,
                Direction::IngressAndEgress,
                Some(ErrorCode::ProtocolError)
            ),
            Event::Detached,
        ]
    );
}

#[test]
fn test_upstream_continue_then_final_response() {
    let h = Harness::http2();
    let handler = RecordingHandler::scripted(&h.log, |txn, event| {
        if *event == Event::Headers(100) {
            txn.send_body(Bytes::from_static(b"data"));
            txn.send_eom();
        }
    });
    let mut txn = h.transaction(1, TransportDirection::Upstream, handler);
    txn.send_headers(&post("/upload", 4).with_header("expect", "100-continue"));

    txn.on_ingress_headers_complete(response(100));
    assert!(txn.extra_response_expected());
    // An EOM after an interim response is not the end of the exchange.
    txn.on_ingress_eom();
    assert_eq!(txn.ingress_state(), IngressState::HeadersReceived);

    txn.on_ingress_headers_complete(response(200));
    txn.on_ingress_eom();

    assert!(txn.is_detached());
    assert_eq!(
        h.events(),
        vec![
            Event::Headers(100),
            Event::Headers(200),
            Event::Eom,
            Event::Detached
        ]
    );
    let calls = h.transport.calls(1);
    assert!(calls.contains(&Call::Body { len: 4, eom: false }));
    assert!(calls.contains(&Call::Eom { trailers: false }));
}

#[test]
fn test_default_abort_codes() {
    let h = Harness::http2();
    let mut downstream = h.downstream(1);
    downstream.send_abort();
    let mut upstream = h.transaction(3, TransportDirection::Upstream, RecordingHandler::new(&h.log));
    upstream.send_abort();

    assert_eq!(
        h.transport.calls(1),
        vec![Call::Abort(ErrorCode::InternalError), Call::Detach]
    );
    assert_eq!(
        h.transport.calls(3),
        vec![Call::Abort(ErrorCode::Cancel), Call::Detach]
    );
}

#[test]
fn test_connection_error_reaches_every_transaction() {
    let h = Harness::http2();
    let mut table = h.table(TransportDirection::Downstream);
    for id in [1, 3, 5] {
        table.create(StreamId(id), RecordingHandler::new(&h.log).boxed(), PriorityUpdate::default());
    }
    assert_eq!(table.len(), 3);

    let error = quicd_txn::HttpError::both(ErrorKind::Eof, "connection closed");
    table.on_connection_error(&error);

    assert!(table.is_empty());
    let errors = h
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::Error { .. }))
        .count();
    assert_eq!(errors, 3);
}

#[test]
fn test_goaway_is_forwarded() {
    let h = Harness::http2();
    let mut table = h.table(TransportDirection::Downstream);
    table.create(StreamId(1), RecordingHandler::new(&h.log).boxed(), PriorityUpdate::default());
    table.on_goaway(ErrorCode::NoError);
    assert_eq!(h.events(), vec![Event::Goaway(ErrorCode::NoError)]);
    assert!(table.contains(StreamId(1)));
}

// ============================================================================
// Push
// ============================================================================

#[test]
fn test_received_push_accepted_and_unlinked_on_completion() {
    let h = Harness::http2();
    let mut table = h.table(TransportDirection::Upstream);
    table.create(
        StreamId(1),
        RecordingHandler::new(&h.log).accepting_children().boxed(),
        PriorityUpdate::default(),
    );

    assert!(table.on_pushed_transaction(StreamId(1), StreamId(2), PriorityUpdate::default()));
    assert!(table.contains(StreamId(2)));
    let pushed = table.get(StreamId(2)).expect("pushed transaction");
    assert!(pushed.is_pushed());
    assert_eq!(pushed.egress_state(), EgressState::SendingDone);
    assert!(table
        .get(StreamId(1))
        .expect("parent")
        .pushed_transactions()
        .contains(&StreamId(2)));

    table.with_transaction(StreamId(2), |pushed| {
        pushed.on_ingress_headers_complete(response(200));
        pushed.on_ingress_eom();
    });

    assert!(!table.contains(StreamId(2)));
    assert!(table
        .get(StreamId(1))
        .expect("parent")
        .pushed_transactions()
        .is_empty());
    assert!(h.events().contains(&Event::Pushed(StreamId(2))));
}

#[test]
fn test_received_push_refused_without_handler() {
    let h = Harness::http2();
    let mut table = h.table(TransportDirection::Upstream);
    table.create(StreamId(3), RecordingHandler::new(&h.log).boxed(), PriorityUpdate::default());

    assert!(!table.on_pushed_transaction(StreamId(3), StreamId(4), PriorityUpdate::default()));
    assert!(!table.contains(StreamId(4)));
    assert_eq!(
        h.transport.calls(4),
        vec![Call::Abort(ErrorCode::RefusedStream), Call::Detach]
    );

    // No parent at all.
    assert!(!table.on_pushed_transaction(StreamId(99), StreamId(6), PriorityUpdate::default()));
    assert_eq!(
        h.transport.calls(6),
        vec![Call::Abort(ErrorCode::RefusedStream), Call::Detach]
    );
}

#[test]
fn test_push_on_live_stream_ignored() {
    let h = Harness::http2();
    let mut table = h.table(TransportDirection::Upstream);
    table.create(
        StreamId(1),
        RecordingHandler::new(&h.log).accepting_children().boxed(),
        PriorityUpdate::default(),
    );
    table.create(StreamId(3), RecordingHandler::new(&h.log).boxed(), PriorityUpdate::default());
    table.with_transaction(StreamId(3), |txn| txn.send_headers(&get("/live")));

    assert!(!table.on_pushed_transaction(StreamId(1), StreamId(3), PriorityUpdate::default()));
    assert_eq!(table.len(), 2);
    let live = table.get(StreamId(3)).expect("live transaction survives");
    assert!(!live.is_pushed());
    assert!(!live.is_aborted());
    assert_eq!(
        h.transport.calls(3),
        vec![Call::Headers {
            status: 0,
            eom: false
        }]
    );
    assert!(!h.events().contains(&Event::Pushed(StreamId(3))));
    assert!(table
        .get(StreamId(1))
        .expect("parent")
        .pushed_transactions()
        .is_empty());
}

#[test]
fn test_local_push_adopted_by_table() {
    let h = Harness::http2();
    h.transport.next_stream.set(Some(2));
    let mut table = h.table(TransportDirection::Downstream);
    table.create(StreamId(1), RecordingHandler::new(&h.log).boxed(), PriorityUpdate::default());

    let pushed_id = table
        .with_transaction(StreamId(1), |txn| {
            let pushed = txn
                .new_pushed_transaction(RecordingHandler::new(&h.log).boxed())
                .expect("push stream");
            pushed.send_headers(&response(200));
            pushed.id()
        })
        .expect("parent exists");
    assert_eq!(pushed_id, StreamId(2));
    assert!(table.contains(StreamId(2)));
    assert_eq!(
        table.get(StreamId(2)).expect("pushed").ingress_state(),
        IngressState::ReceivingDone
    );

    table.with_transaction(StreamId(2), |pushed| pushed.send_eom());
    assert!(!table.contains(StreamId(2)));
    assert!(table
        .get(StreamId(1))
        .expect("parent")
        .pushed_transactions()
        .is_empty());
}

#[test]
fn test_no_push_after_egress_eom() {
    let h = Harness::http2();
    h.transport.next_stream.set(Some(2));
    let mut txn = h.downstream(1);
    txn.on_ingress_headers_complete(get("/"));
    txn.send_headers_with_eom(&response(200));

    assert!(txn
        .new_pushed_transaction(RecordingHandler::new(&h.log).boxed())
        .is_none());
    assert!(txn.take_spawned().is_empty());
}

// ============================================================================
// Extended transactions
// ============================================================================

#[test]
fn test_remote_unidirectional_ex_transaction() {
    let h = Harness::http2();
    let mut table = h.table(TransportDirection::Downstream);
    table.create(
        StreamId(1),
        RecordingHandler::new(&h.log).accepting_children().boxed(),
        PriorityUpdate::default(),
    );

    assert!(table.on_ex_transaction(StreamId(1), StreamId(3), true));
    let ex = table.get(StreamId(3)).expect("ex transaction");
    assert!(ex.is_unidirectional());
    assert!(ex.is_remote_initiated());
    assert_eq!(ex.control_stream(), Some(StreamId(1)));
    assert_eq!(ex.egress_state(), EgressState::SendingDone);

    table.with_transaction(StreamId(3), |ex| {
        ex.on_ingress_headers_complete(get("/stream"));
        ex.on_ingress_eom();
    });
    assert!(!table.contains(StreamId(3)));
    assert!(table
        .get(StreamId(1))
        .expect("control")
        .ex_transactions()
        .is_empty());
}

#[test]
fn test_ex_transaction_refused_without_handler() {
    let h = Harness::http2();
    let mut table = h.table(TransportDirection::Downstream);
    table.create(StreamId(1), RecordingHandler::new(&h.log).boxed(), PriorityUpdate::default());

    assert!(!table.on_ex_transaction(StreamId(1), StreamId(3), false));
    assert_eq!(
        h.transport.calls(3),
        vec![Call::Abort(ErrorCode::RefusedStream), Call::Detach]
    );
    assert!(h.events().contains(&Event::Ex(StreamId(3))));
}

#[test]
fn test_ex_transaction_on_live_stream_ignored() {
    let h = Harness::http2();
    let mut table = h.table(TransportDirection::Downstream);
    table.create(
        StreamId(1),
        RecordingHandler::new(&h.log).accepting_children().boxed(),
        PriorityUpdate::default(),
    );
    table.create(StreamId(3), RecordingHandler::new(&h.log).boxed(), PriorityUpdate::default());
    table.with_transaction(StreamId(3), |txn| txn.on_ingress_headers_complete(get("/live")));

    assert!(!table.on_ex_transaction(StreamId(1), StreamId(3), true));
    assert_eq!(table.len(), 2);
    let live = table.get(StreamId(3)).expect("live transaction survives");
    assert_eq!(live.control_stream(), None);
    assert_eq!(live.ingress_state(), IngressState::HeadersReceived);
    assert!(h.transport.calls(3).is_empty());
    assert!(!h.events().contains(&Event::Ex(StreamId(3))));
}

#[test]
fn test_local_ex_transaction_spawned() {
    let h = Harness::http2();
    h.transport.next_stream.set(Some(2));
    let mut table = h.table(TransportDirection::Downstream);
    table.create(StreamId(1), RecordingHandler::new(&h.log).boxed(), PriorityUpdate::default());

    table.with_transaction(StreamId(1), |txn| {
        let ex = txn
            .new_ex_transaction(RecordingHandler::new(&h.log).boxed(), true)
            .expect("ex stream");
        // Locally opened and unidirectional: nothing comes back.
        assert_eq!(ex.ingress_state(), IngressState::ReceivingDone);
    });
    assert!(table.contains(StreamId(2)));
    assert!(table
        .get(StreamId(1))
        .expect("control")
        .ex_transactions()
        .contains(&StreamId(2)));
}

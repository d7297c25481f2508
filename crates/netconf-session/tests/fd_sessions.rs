//! End-to-end scenarios over pipe-backed sessions.

#![allow(clippy::unwrap_used, reason = "test code can panic on errors")]

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{client_with_raw_server, fd_pair, session_pair, CAP_10, CAP_11};
use netconf_session::{
    ClientContext, CloseReason, ErrorTag, ErrorType, Message, ReplyBody, RpcError, ServerContext, Session,
    SessionError, Status, TermReason, Version,
};

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

#[test]
fn handshake_negotiates_v11_and_assigns_session_id() {
    let (client, server) = session_pair(
        ClientContext::default(),
        ServerContext::default().with_session_id_start(42),
    );

    assert_eq!(client.status(), Status::Running);
    assert_eq!(server.status(), Status::Running);
    assert_eq!(client.version(), Version::V11);
    assert_eq!(server.version(), Version::V11);
    assert_eq!(client.session_id(), 42);
    assert_eq!(server.session_id(), 42);
    assert!(client.peer_capabilities().iter().any(|c| c == CAP_11));
    assert!(client.is_connected());
    assert!(server.is_connected());
}

#[test]
fn handshake_falls_back_to_v10() {
    let client_ctx = ClientContext::default().with_capabilities(vec![CAP_10.to_owned()]);
    let (client, server) = session_pair(client_ctx, ServerContext::default());

    assert_eq!(client.version(), Version::V10);
    assert_eq!(server.version(), Version::V10);
}

#[test]
fn rpc_reply_round_trip() {
    let (client, server) = session_pair(ClientContext::default(), ServerContext::default());

    let payload = "<get-config><source><running/></source></get-config>";
    assert_eq!(client.send_rpc(payload, None, TIMEOUT).unwrap(), 1);

    let Some(Message::Rpc(rpc)) = server.read_message(TIMEOUT).unwrap() else {
        panic!("expected an rpc");
    };
    assert_eq!(rpc.message_id.as_deref(), Some("1"));
    assert_eq!(rpc.content, payload);

    server.send_reply(Some(&rpc), &ReplyBody::Ok, TIMEOUT).unwrap();

    let Some(Message::Reply(reply)) = client.read_message(TIMEOUT).unwrap() else {
        panic!("expected an rpc-reply");
    };
    // RFC 6241 section 4.2: the reply mirrors the rpc's message-id.
    assert_eq!(reply.message_id.as_deref(), Some("1"));
    assert_eq!(reply.body, ReplyBody::Ok);

    assert_eq!(client.send_rpc("<get/>", None, TIMEOUT).unwrap(), 2);
}

#[test]
fn error_reply_escapes_and_parses_back() {
    let (client, server) = session_pair(ClientContext::default(), ServerContext::default());

    let error = RpcError::new(ErrorType::Application, ErrorTag::OperationFailed).with_message("a < b & c > d");
    server
        .send_reply(None, &ReplyBody::Errors(vec![error]), TIMEOUT)
        .unwrap();

    let Some(Message::Reply(reply)) = client.read_message(TIMEOUT).unwrap() else {
        panic!("expected an rpc-reply");
    };
    let ReplyBody::Errors(errors) = reply.body else {
        panic!("expected errors");
    };
    assert_eq!(errors[0].message.as_deref(), Some("a < b & c > d"));
}

#[test]
fn notification_round_trip() {
    let (client, server) = session_pair(ClientContext::default(), ServerContext::default());

    server
        .send_notification("2025-06-01T12:00:00Z", "<link-down><if>eth0</if></link-down>", TIMEOUT)
        .unwrap();

    let Some(Message::Notification(notification)) = client.read_message(TIMEOUT).unwrap() else {
        panic!("expected a notification");
    };
    assert_eq!(notification.event_time, "2025-06-01T12:00:00Z");
    assert_eq!(notification.content, "<link-down><if>eth0</if></link-down>");
}

#[test]
fn message_ids_stay_sequential_under_contention() {
    let (client, server) = session_pair(ClientContext::default(), ServerContext::default());

    const PER_THREAD: usize = 25;
    let mut senders = Vec::new();
    for _ in 0..2 {
        let client = Arc::clone(&client);
        senders.push(thread::spawn(move || {
            let mut ids = Vec::with_capacity(PER_THREAD);
            for _ in 0..PER_THREAD {
                ids.push(client.send_rpc("<get/>", None, TIMEOUT).unwrap());
            }
            ids
        }));
    }

    let mut wire_ids = BTreeSet::new();
    while wire_ids.len() < 2 * PER_THREAD {
        if let Some(Message::Rpc(rpc)) = server.read_message(TIMEOUT).unwrap() {
            assert!(
                wire_ids.insert(rpc.message_id.unwrap().parse::<u64>().unwrap()),
                "message-id repeated on the wire"
            );
        }
    }

    let mut returned: Vec<u64> = senders
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    returned.sort_unstable();

    let expected: Vec<u64> = (1..=2 * PER_THREAD as u64).collect();
    assert_eq!(returned, expected);
    assert_eq!(wire_ids.into_iter().collect::<Vec<_>>(), expected);
}

#[test]
fn payloads_across_staging_boundaries_round_trip() {
    let (client, server) = session_pair(ClientContext::default(), ServerContext::default());

    // Straddle the 1024 B staging buffer both ways, plus the direct path.
    for payload_size in [1usize, 1015, 1016, 1017, 1023, 1024, 1025, 5000] {
        let payload = format!("<x>{}</x>", "a".repeat(payload_size));
        client.send_rpc(&payload, None, TIMEOUT).unwrap();
        let Some(Message::Rpc(rpc)) = server.read_message(TIMEOUT).unwrap() else {
            panic!("expected an rpc");
        };
        assert_eq!(rpc.content, payload, "payload size {payload_size}");
    }
}

#[test]
fn arbitrary_payloads_round_trip() {
    use proptest::prelude::*;

    let (client, server) = session_pair(ClientContext::default(), ServerContext::default());

    proptest!(ProptestConfig::with_cases(16), |(text in "[a-zA-Z0-9 .:/_-]{0,2000}")| {
        let payload = format!("<data>{text}</data>");
        client.send_rpc(&payload, None, TIMEOUT).unwrap();
        let Some(Message::Rpc(rpc)) = server.read_message(TIMEOUT).unwrap() else {
            panic!("expected an rpc");
        };
        prop_assert_eq!(rpc.content, payload);
    });
}

#[test]
fn close_is_recorded_and_blocks_further_use() {
    let (client, _server) = session_pair(ClientContext::default(), ServerContext::default());

    client.close(CloseReason::Closed).unwrap();
    assert_eq!(client.status(), Status::Closing);
    assert_eq!(client.term_reason(), TermReason::Closed);
    assert!(matches!(
        client.send_rpc("<get/>", None, TIMEOUT),
        Err(SessionError::InvalidState(Status::Closing))
    ));
}

#[test]
fn client_hello_with_session_id_is_rejected() {
    let (input, output, peer) = fd_pair();
    // A client must not send a session-id; a server must reject it.
    peer.send_hello(&[CAP_10, CAP_11], Some(7));
    let result = Session::accept_fd(&ServerContext::default(), input, output);
    assert!(matches!(result, Err(SessionError::BadHello { .. })));
}

#[test]
fn server_hello_without_session_id_is_rejected() {
    let (input, output, peer) = fd_pair();
    peer.send_hello(&[CAP_10, CAP_11], None);
    let result = Session::connect_fd(&ClientContext::default(), input, output);
    assert!(matches!(result, Err(SessionError::BadHello { .. })));
}

#[test]
fn no_common_base_capability_is_rejected() {
    let ctx = ClientContext::default().with_capabilities(vec![CAP_11.to_owned()]);
    let (input, output, peer) = fd_pair();
    peer.send_hello(&[CAP_10], Some(1));
    let result = Session::connect_fd(&ctx, input, output);
    assert!(matches!(result, Err(SessionError::BadHello { .. })));
}

#[test]
fn non_hello_first_message_is_rejected() {
    let (input, output, peer) = fd_pair();
    peer.write_all(format!("<rpc xmlns=\"{}\" message-id=\"1\"><get/></rpc>]]>]]>", common::NS_BASE).as_bytes());
    let result = Session::connect_fd(&ClientContext::default(), input, output);
    assert!(matches!(result, Err(SessionError::BadHello { .. })));
}

#[test]
fn idle_poll_times_out_without_harming_the_session() {
    let (client, _peer) = client_with_raw_server(&ClientContext::default(), &[CAP_10, CAP_11], 1);
    assert!(client.read_message(Some(Duration::from_millis(20))).unwrap().is_none());
    assert_eq!(client.status(), Status::Running);
}

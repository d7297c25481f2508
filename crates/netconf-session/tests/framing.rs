//! Wire-level framing behavior, asserted against a scripted raw peer.

#![allow(clippy::unwrap_used, reason = "test code can panic on errors")]

mod common;

use std::thread;
use std::time::Duration;

use common::{client_with_raw_server, server_with_raw_client, CAP_10, CAP_11, NS_BASE};
use netconf_session::{ClientContext, Message, ReplyBody, ServerContext, SessionError, Status, TermReason};

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

#[test]
fn server_hello_uses_sentinel_framing_and_carries_session_id() {
    let ctx = ServerContext::default().with_session_id_start(42);
    let (input, output, peer) = common::fd_pair();
    peer.send_hello(&[CAP_10], None);
    let session = netconf_session::Session::accept_fd(&ctx, input, output).unwrap();

    let hello = peer.read_hello();
    assert!(hello.starts_with("<hello "), "hello must not be chunk framed: {hello}");
    assert!(hello.contains("<capability>urn:ietf:params:netconf:base:1.0</capability>"));
    assert!(hello.contains("<session-id>42</session-id>"));
    assert_eq!(session.session_id(), 42);
}

#[test]
fn client_hello_omits_session_id_even_after_v11_negotiation() {
    let (input, output, peer) = common::fd_pair();
    peer.send_hello(&[CAP_10, CAP_11], Some(3));
    let _client = netconf_session::Session::connect_fd(&ClientContext::default(), input, output).unwrap();

    let hello = peer.read_hello();
    assert!(!hello.contains("session-id"));
    assert!(hello.contains("<capability>urn:ietf:params:netconf:base:1.1</capability>"));
}

#[test]
fn rpc_is_chunk_framed_on_v11() {
    let (client, peer) = client_with_raw_server(&ClientContext::default(), &[CAP_10, CAP_11], 1);

    let payload = "<get-config><source><running/></source></get-config>";
    client.send_rpc(payload, None, TIMEOUT).unwrap();

    let (raw, body) = peer.read_chunked();
    assert!(raw.starts_with(b"\n#"), "chunk header expected");
    assert!(raw.ends_with(b"\n##\n"), "end-of-chunks expected");
    assert_eq!(
        String::from_utf8(body).unwrap(),
        format!("<rpc xmlns=\"{NS_BASE}\" message-id=\"1\">{payload}</rpc>")
    );
}

#[test]
fn rpc_uses_sentinel_framing_on_v10() {
    let ctx = ClientContext::default().with_capabilities(vec![CAP_10.to_owned()]);
    let (client, peer) = client_with_raw_server(&ctx, &[CAP_10], 1);

    client.send_rpc("<get/>", None, TIMEOUT).unwrap();
    let mut raw = peer.read_until(b"]]>]]>");
    raw.truncate(raw.len() - 6);
    assert_eq!(
        String::from_utf8(raw).unwrap(),
        format!("<rpc xmlns=\"{NS_BASE}\" message-id=\"1\"><get/></rpc>")
    );
}

#[test]
fn zero_length_chunk_triggers_malformed_message_reply() {
    let (server, peer) = server_with_raw_client(&ServerContext::default(), &[CAP_10, CAP_11]);

    peer.write_all(b"\n#0\n");
    let err = server.read_message(TIMEOUT).unwrap_err();
    assert!(matches!(err, SessionError::MalformedFraming { .. }));

    // RFC 6241 section 3: the v1.1 server answers before giving up.
    let (_, reply) = peer.read_chunked();
    assert_eq!(
        String::from_utf8(reply).unwrap(),
        format!(
            "<rpc-reply xmlns=\"{NS_BASE}\"><rpc-error><error-type>rpc</error-type>\
             <error-tag>malformed-message</error-tag><error-severity>error</error-severity>\
             </rpc-error></rpc-reply>"
        )
    );
    assert_eq!(server.status(), Status::Invalid);
    assert_eq!(server.term_reason(), TermReason::Other);
}

#[test]
fn unclassifiable_message_triggers_malformed_message_reply() {
    let (server, peer) = server_with_raw_client(&ServerContext::default(), &[CAP_10, CAP_11]);

    peer.send_chunked(format!("<unknown xmlns=\"{NS_BASE}\"/>").as_bytes());
    let err = server.read_message(TIMEOUT).unwrap_err();
    assert!(matches!(err, SessionError::MalformedMessage(_)));

    let (_, reply) = peer.read_chunked();
    assert!(String::from_utf8(reply).unwrap().contains("malformed-message"));
    assert_eq!(server.status(), Status::Invalid);
}

#[test]
fn client_surfaces_malformed_framing_without_replying() {
    let (client, peer) = client_with_raw_server(&ClientContext::default(), &[CAP_10, CAP_11], 1);

    peer.write_all(b"\n#0\n");
    let err = client.read_message(TIMEOUT).unwrap_err();
    assert!(matches!(err, SessionError::MalformedFraming { .. }));
    assert_eq!(client.status(), Status::Invalid);

    // No reply bytes may follow; the pipe must go down silently.
    drop(client);
    peer.expect_eof();
}

#[test]
fn escaped_content_on_the_wire() {
    let (server, peer) = server_with_raw_client(&ServerContext::default(), &[CAP_10, CAP_11]);

    let error = netconf_session::RpcError::new(
        netconf_session::ErrorType::Application,
        netconf_session::ErrorTag::OperationFailed,
    )
    .with_message("a < b & c > d");
    server
        .send_reply(None, &ReplyBody::Errors(vec![error]), TIMEOUT)
        .unwrap();

    let (_, body) = peer.read_chunked();
    let body = String::from_utf8(body).unwrap();
    assert!(body.contains("a &lt; b &amp; c &gt; d"), "unescaped content on wire: {body}");
}

#[test]
fn one_byte_chunks_reassemble() {
    let (client, peer) = client_with_raw_server(&ClientContext::default(), &[CAP_10, CAP_11], 1);

    let body = format!("<rpc-reply xmlns=\"{NS_BASE}\"><ok/></rpc-reply>");
    for b in body.bytes() {
        peer.write_all(b"\n#1\n");
        peer.write_all(&[b]);
    }
    peer.write_all(b"\n##\n");

    let Some(Message::Reply(reply)) = client.read_message(TIMEOUT).unwrap() else {
        panic!("expected an rpc-reply");
    };
    assert_eq!(reply.body, ReplyBody::Ok);
}

#[test]
fn sentinel_split_across_writes_reassembles() {
    let ctx = ClientContext::default().with_capabilities(vec![CAP_10.to_owned()]);
    let (client, peer) = client_with_raw_server(&ctx, &[CAP_10], 1);

    let body = format!("<rpc-reply xmlns=\"{NS_BASE}\"><ok/></rpc-reply>");
    let writer = thread::spawn(move || {
        peer.write_all(body.as_bytes());
        peer.write_all(b"]]>");
        thread::sleep(Duration::from_millis(50));
        peer.write_all(b"]]>");
        peer
    });

    let Some(Message::Reply(reply)) = client.read_message(TIMEOUT).unwrap() else {
        panic!("expected an rpc-reply");
    };
    assert_eq!(reply.body, ReplyBody::Ok);
    writer.join().unwrap();
}

#[test]
fn peer_eof_mid_chunk_drops_the_session() {
    let (client, peer) = client_with_raw_server(&ClientContext::default(), &[CAP_10, CAP_11], 1);

    peer.write_all(b"\n#20\n");
    peer.write_all(b"0123456789");
    peer.close();

    let err = client.read_message(TIMEOUT).unwrap_err();
    assert!(matches!(err, SessionError::PeerClosed));
    assert_eq!(client.status(), Status::Invalid);
    assert_eq!(client.term_reason(), TermReason::Dropped);
}

#[test]
fn per_message_timeout_invalidates_the_session() {
    let ctx = ClientContext::default()
        .with_capabilities(vec![CAP_10.to_owned()])
        .with_read_timeout(Duration::from_secs(1));
    let (client, peer) = client_with_raw_server(&ctx, &[CAP_10], 1);

    // Half a message and then silence.
    peer.write_all(b"<rpc-reply xmlns=\"");

    let err = client.read_message(TIMEOUT).unwrap_err();
    assert!(matches!(err, SessionError::ReadTimeout));
    assert_eq!(client.status(), Status::Invalid);
    assert_eq!(client.term_reason(), TermReason::Other);

    assert!(matches!(
        client.read_message(TIMEOUT),
        Err(SessionError::InvalidState(Status::Invalid))
    ));
}

#[test]
fn oversized_message_is_rejected() {
    let ctx = ClientContext::default()
        .with_capabilities(vec![CAP_10.to_owned()])
        .with_max_message_size(64);
    let (client, peer) = client_with_raw_server(&ctx, &[CAP_10], 1);

    peer.write_all("<rpc-reply>".repeat(32).as_bytes());
    let err = client.read_message(TIMEOUT).unwrap_err();
    assert!(matches!(err, SessionError::TooLarge { limit: 64 }));
    assert_eq!(client.status(), Status::Invalid);
}

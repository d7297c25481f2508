//! Pipe-backed harness: real sessions on one side, a scripted raw peer on
//! the other, so tests can assert exact wire bytes.

#![allow(clippy::unwrap_used, reason = "test code can panic on errors")]
#![allow(dead_code, reason = "not every test file uses every helper")]

use std::os::fd::{AsRawFd as _, FromRawFd as _, OwnedFd};
use std::sync::Arc;
use std::thread;

use netconf_session::{ClientContext, ServerContext, Session};
use nix::unistd;

pub const NS_BASE: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
pub const CAP_10: &str = "urn:ietf:params:netconf:base:1.0";
pub const CAP_11: &str = "urn:ietf:params:netconf:base:1.1";

/// Scripted peer talking raw bytes over the pipe pair.
pub struct RawPeer {
    rx: OwnedFd,
    tx: OwnedFd,
}

impl RawPeer {
    pub fn write_all(&self, mut data: &[u8]) {
        while !data.is_empty() {
            let n = unistd::write(self.tx.as_raw_fd(), data).unwrap();
            data = &data[n..];
        }
    }

    /// Blocking byte-wise read until `suffix` terminates the buffer.
    pub fn read_until(&self, suffix: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = unistd::read(self.rx.as_raw_fd(), &mut byte).unwrap();
            assert_eq!(n, 1, "peer stream closed early");
            buf.push(byte[0]);
            if buf.ends_with(suffix) {
                return buf;
            }
        }
    }

    pub fn send_hello(&self, capabilities: &[&str], session_id: Option<u32>) {
        self.write_all(hello_xml(capabilities, session_id).as_bytes());
        self.write_all(b"]]>]]>");
    }

    /// Read the session's hello (always sentinel framed), sentinel stripped.
    pub fn read_hello(&self) -> String {
        let mut raw = self.read_until(b"]]>]]>");
        raw.truncate(raw.len() - 6);
        String::from_utf8(raw).unwrap()
    }

    /// Send one already-assembled body as a single v1.1 chunk.
    pub fn send_chunked(&self, body: &[u8]) {
        self.write_all(format!("\n#{}\n", body.len()).as_bytes());
        self.write_all(body);
        self.write_all(b"\n##\n");
    }

    /// Read one chunked message; returns (frame bytes, reassembled body).
    pub fn read_chunked(&self) -> (Vec<u8>, Vec<u8>) {
        let raw = self.read_until(b"\n##\n");
        let mut body = Vec::new();
        let mut at = 0;
        loop {
            assert_eq!(&raw[at..at + 2], b"\n#", "chunk header expected");
            at += 2;
            if raw[at] == b'#' {
                break;
            }
            let line_end = at + raw[at..].iter().position(|b| *b == b'\n').unwrap();
            let len: usize = std::str::from_utf8(&raw[at..line_end]).unwrap().parse().unwrap();
            at = line_end + 1;
            body.extend_from_slice(&raw[at..at + len]);
            at += len;
        }
        (raw, body)
    }

    /// Assert the session hung up without sending more bytes.
    pub fn expect_eof(&self) {
        let mut byte = [0u8; 1];
        let n = unistd::read(self.rx.as_raw_fd(), &mut byte).unwrap();
        assert_eq!(n, 0, "unexpected bytes from the session");
    }

    pub fn close(self) {
        drop(self);
    }
}

pub fn hello_xml(capabilities: &[&str], session_id: Option<u32>) -> String {
    let mut xml = format!("<hello xmlns=\"{NS_BASE}\"><capabilities>");
    for capability in capabilities {
        xml.push_str(&format!("<capability>{capability}</capability>"));
    }
    xml.push_str("</capabilities>");
    if let Some(sid) = session_id {
        xml.push_str(&format!("<session-id>{sid}</session-id>"));
    }
    xml.push_str("</hello>");
    xml
}

/// Descriptor pair for one session plus the scripted peer on the far ends.
pub fn fd_pair() -> (OwnedFd, OwnedFd, RawPeer) {
    let (session_in, peer_tx) = unistd::pipe().unwrap();
    let (peer_rx, session_out) = unistd::pipe().unwrap();
    // SAFETY: all four descriptors come straight from pipe() and each is
    // wrapped by exactly one OwnedFd.
    unsafe {
        (
            OwnedFd::from_raw_fd(session_in),
            OwnedFd::from_raw_fd(session_out),
            RawPeer {
                rx: OwnedFd::from_raw_fd(peer_rx),
                tx: OwnedFd::from_raw_fd(peer_tx),
            },
        )
    }
}

/// A real client speaking to a scripted server peer. The peer's hello is
/// buffered into the pipe before the client handshake runs, so no thread is
/// needed.
pub fn client_with_raw_server(
    ctx: &ClientContext,
    server_caps: &[&str],
    session_id: u32,
) -> (Arc<Session>, RawPeer) {
    let (input, output, peer) = fd_pair();
    peer.send_hello(server_caps, Some(session_id));
    let session = Session::connect_fd(ctx, input, output).unwrap();
    let _client_hello = peer.read_hello();
    (session, peer)
}

/// A real server speaking to a scripted client peer.
pub fn server_with_raw_client(
    ctx: &ServerContext,
    client_caps: &[&str],
) -> (Arc<Session>, RawPeer) {
    let (input, output, peer) = fd_pair();
    peer.send_hello(client_caps, None);
    let session = Session::accept_fd(ctx, input, output).unwrap();
    let _server_hello = peer.read_hello();
    (session, peer)
}

/// A connected real client/server pair over pipes.
pub fn session_pair(client_ctx: ClientContext, server_ctx: ServerContext) -> (Arc<Session>, Arc<Session>) {
    let (client_in, server_tx, server_rx, client_out) = {
        let (client_in, server_tx) = unistd::pipe().unwrap();
        let (server_rx, client_out) = unistd::pipe().unwrap();
        // SAFETY: fresh descriptors from pipe(), one owner each.
        unsafe {
            (
                OwnedFd::from_raw_fd(client_in),
                OwnedFd::from_raw_fd(server_tx),
                OwnedFd::from_raw_fd(server_rx),
                OwnedFd::from_raw_fd(client_out),
            )
        }
    };

    let server = thread::spawn(move || Session::accept_fd(&server_ctx, server_rx, server_tx).unwrap());
    let client = Session::connect_fd(&client_ctx, client_in, client_out).unwrap();
    let server = server.join().unwrap();
    (client, server)
}

//! Hello exchange and version negotiation.
//!
//! Both sides open with a `<hello>` listing their capabilities (RFC 6241
//! section 8.1). The server-assigned session-id travels server to client
//! only; chunked framing is used iff both sides advertise the base:1.1
//! capability. The exchange runs during session construction, moving the
//! session from Starting to Running.

use std::time::Duration;

use netconf_proto::{classify, Hello, Message, CAP_BASE_10, CAP_BASE_11};

use crate::ctx::{ClientContext, ServerContext};
use crate::error::SessionError;
use crate::session::{Session, TermReason, Version};
use crate::transport::{PollIn, Transport};

fn negotiate(local: &[String], peer: &[String]) -> Option<Version> {
    let both = |cap: &str| local.iter().any(|c| c == cap) && peer.iter().any(|c| c == cap);
    if both(CAP_BASE_11) {
        Some(Version::V11)
    } else if both(CAP_BASE_10) {
        Some(Version::V10)
    } else {
        None
    }
}

impl Session {
    pub(crate) fn handshake_client(&self, ctx: &ClientContext) -> Result<(), SessionError> {
        self.with_ti(|session, ti| {
            session.send_hello_locked(ti, &ctx.capabilities, None)?;
            let hello = session.recv_hello_locked(ti, ctx.hello_timeout)?;

            let Some(id) = hello.session_id else {
                return session.bad_hello("hello from server carries no session-id");
            };
            let Some(version) = negotiate(&ctx.capabilities, &hello.capabilities) else {
                return session.bad_hello("no common base capability");
            };

            session.finish_handshake(id, version, hello.capabilities);
            info!(session.id = id, version = ?version, "session established");
            Ok(())
        })
    }

    pub(crate) fn handshake_server(&self, ctx: &ServerContext) -> Result<(), SessionError> {
        self.with_ti(|session, ti| {
            let id = ctx.assign_session_id();
            session.send_hello_locked(ti, &ctx.capabilities, Some(id))?;
            let hello = session.recv_hello_locked(ti, ctx.hello_timeout)?;

            if hello.session_id.is_some() {
                return session.bad_hello("hello from client carries a session-id");
            }
            let Some(version) = negotiate(&ctx.capabilities, &hello.capabilities) else {
                return session.bad_hello("no common base capability");
            };

            session.finish_handshake(id, version, hello.capabilities);
            info!(session.id = id, version = ?version, "session established");
            Ok(())
        })
    }

    fn recv_hello_locked(&self, ti: &mut Transport, hello_timeout: Duration) -> Result<Hello, SessionError> {
        match ti.poll_in(Some(hello_timeout)) {
            PollIn::Ready => {}
            PollIn::TimedOut => {
                error!("peer hello timeout elapsed");
                self.invalidate(TermReason::Timeout);
                return Err(SessionError::ReadTimeout);
            }
            PollIn::Closed => {
                error!("communication channel closed before hello");
                self.invalidate(TermReason::Dropped);
                return Err(SessionError::PeerClosed);
            }
            PollIn::Failed(err) => {
                error!(error = %err, "polling for the peer hello failed");
                self.invalidate(TermReason::Other);
                return Err(SessionError::Substrate(err));
            }
        }

        let body = match self.read_body(ti) {
            Ok(body) => body,
            Err(err @ SessionError::MalformedFraming { .. }) => {
                error!(error = %err, "malformed peer hello");
                self.invalidate(TermReason::BadHello);
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let Ok(text) = core::str::from_utf8(&body) else {
            return self.bad_hello("hello is not valid UTF-8");
        };
        match classify(text) {
            Ok(Message::Hello(hello)) => Ok(hello),
            Ok(_) => self.bad_hello("first message from peer is not a hello"),
            Err(_) => self.bad_hello("unparsable hello"),
        }
    }

    fn bad_hello<T>(&self, reason: &'static str) -> Result<T, SessionError> {
        error!(reason, "invalid hello from peer");
        self.invalidate(TermReason::BadHello);
        Err(SessionError::BadHello { reason })
    }
}

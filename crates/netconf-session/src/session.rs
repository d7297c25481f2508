//! Session state and the public message API.

use std::net::TcpStream;
use std::os::fd::{AsRawFd as _, OwnedFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use netconf_proto::{classify, ErrorTag, ErrorType, Message, ReplyBody, RpcEnvelope, RpcError};
use parking_lot::{Mutex, MutexGuard};
use rustls::{ClientConnection, ServerConnection, StreamOwned};

use crate::ctx::{ClientContext, ServerContext};
use crate::error::SessionError;
use crate::transport::{set_nonblocking, FdTransport, PollIn, SshGroup, SshTransport, TlsTransport, Transport};
use crate::write::FrameWriter;

/// Which end of the conversation this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

/// Negotiated NETCONF protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// NETCONF 1.0: `]]>]]>` end-of-message framing (RFC 4742).
    V10,
    /// NETCONF 1.1: chunked framing (RFC 6242).
    V11,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Created, hello exchange not finished.
    Starting,
    /// Hello exchanged, messages flowing.
    Running,
    /// Dead; see the [`TermReason`].
    Invalid,
    /// Orderly shutdown requested.
    Closing,
}

/// Why a session left the Running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermReason {
    None,
    Closed,
    Killed,
    Dropped,
    Timeout,
    BadHello,
    Other,
}

/// How [`Session::close`] records the shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Orderly `<close-session>`.
    Closed,
    /// Terminated by `<kill-session>` or an operator.
    Killed,
}

struct Meta {
    status: Status,
    term_reason: TermReason,
    version: Version,
    id: u32,
    capabilities: Vec<String>,
}

/// One NETCONF session over an established transport.
///
/// Sessions are handed out as `Arc<Session>` and are safe to share between
/// threads: all transport I/O and the outbound message-id counter are
/// serialized by the per-session transport lock, so concurrent `<rpc>`s get
/// strictly sequential message-ids and at most one message is on the wire
/// at a time.
pub struct Session {
    side: Side,
    meta: Mutex<Meta>,
    msgid: AtomicU64,
    ti: Mutex<Transport>,
    read_timeout: Duration,
    max_message_size: Option<usize>,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
}

impl Session {
    fn new_starting(
        side: Side,
        transport: Transport,
        read_timeout: Duration,
        max_message_size: Option<usize>,
        host: Option<String>,
        port: Option<u16>,
        username: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Session {
            side,
            meta: Mutex::new(Meta {
                status: Status::Starting,
                term_reason: TermReason::None,
                version: Version::V10,
                id: 0,
                capabilities: Vec::new(),
            }),
            msgid: AtomicU64::new(0),
            ti: Mutex::new(transport),
            read_timeout,
            max_message_size,
            host,
            port,
            username,
        })
    }

    /// Client session over a pair of file descriptors (for example the
    /// standard streams of an `ssh -s netconf` child). Performs the hello
    /// exchange before returning.
    pub fn connect_fd(ctx: &ClientContext, input: OwnedFd, output: OwnedFd) -> Result<Arc<Self>, SessionError> {
        set_nonblocking(input.as_raw_fd())?;
        set_nonblocking(output.as_raw_fd())?;
        let session = Self::new_starting(
            Side::Client,
            Transport::Fd(FdTransport { input, output }),
            ctx.read_timeout,
            ctx.max_message_size,
            None,
            None,
            None,
        );
        session.handshake_client(ctx)?;
        Ok(session)
    }

    /// Server session over a pair of file descriptors.
    pub fn accept_fd(ctx: &ServerContext, input: OwnedFd, output: OwnedFd) -> Result<Arc<Self>, SessionError> {
        set_nonblocking(input.as_raw_fd())?;
        set_nonblocking(output.as_raw_fd())?;
        let session = Self::new_starting(
            Side::Server,
            Transport::Fd(FdTransport { input, output }),
            ctx.read_timeout,
            ctx.max_message_size,
            None,
            None,
            None,
        );
        session.handshake_server(ctx)?;
        Ok(session)
    }

    /// Client session over an SSH channel already running the `netconf`
    /// subsystem. The channel joins the sibling ring of `group`.
    pub fn connect_ssh(
        ctx: &ClientContext,
        group: &Arc<SshGroup>,
        channel: ssh2::Channel,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
    ) -> Result<Arc<Self>, SessionError> {
        let session = Self::new_starting(
            Side::Client,
            Transport::Ssh(SshTransport {
                channel,
                group: Arc::clone(group),
            }),
            ctx.read_timeout,
            ctx.max_message_size,
            Some(host.into()),
            Some(port),
            Some(username.into()),
        );
        group.register(&session);
        session.handshake_client(ctx)?;
        Ok(session)
    }

    /// Server session over an accepted SSH channel.
    pub fn accept_ssh(
        ctx: &ServerContext,
        group: &Arc<SshGroup>,
        channel: ssh2::Channel,
        username: impl Into<String>,
    ) -> Result<Arc<Self>, SessionError> {
        let session = Self::new_starting(
            Side::Server,
            Transport::Ssh(SshTransport {
                channel,
                group: Arc::clone(group),
            }),
            ctx.read_timeout,
            ctx.max_message_size,
            None,
            None,
            Some(username.into()),
        );
        group.register(&session);
        session.handshake_server(ctx)?;
        Ok(session)
    }

    /// Client session over an established TLS stream.
    pub fn connect_tls(
        ctx: &ClientContext,
        stream: StreamOwned<ClientConnection, TcpStream>,
        host: impl Into<String>,
        port: u16,
    ) -> Result<Arc<Self>, SessionError> {
        stream.sock.set_nonblocking(true)?;
        let session = Self::new_starting(
            Side::Client,
            Transport::Tls(TlsTransport::Client(stream)),
            ctx.read_timeout,
            ctx.max_message_size,
            Some(host.into()),
            Some(port),
            None,
        );
        session.handshake_client(ctx)?;
        Ok(session)
    }

    /// Server session over an accepted TLS stream.
    pub fn accept_tls(
        ctx: &ServerContext,
        stream: StreamOwned<ServerConnection, TcpStream>,
    ) -> Result<Arc<Self>, SessionError> {
        stream.sock.set_nonblocking(true)?;
        let session = Self::new_starting(
            Side::Server,
            Transport::Tls(TlsTransport::Server(stream)),
            ctx.read_timeout,
            ctx.max_message_size,
            None,
            None,
            None,
        );
        session.handshake_server(ctx)?;
        Ok(session)
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn status(&self) -> Status {
        self.meta.lock().status
    }

    pub fn term_reason(&self) -> TermReason {
        self.meta.lock().term_reason
    }

    pub fn version(&self) -> Version {
        self.meta.lock().version
    }

    /// Server-assigned session-id; zero while the hello exchange is
    /// pending.
    pub fn session_id(&self) -> u32 {
        self.meta.lock().id
    }

    /// Capabilities advertised by the peer.
    pub fn peer_capabilities(&self) -> Vec<String> {
        self.meta.lock().capabilities.clone()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub(crate) fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub(crate) fn max_message_size(&self) -> Option<usize> {
        self.max_message_size
    }

    pub(crate) fn check_usable(&self) -> Result<(), SessionError> {
        match self.status() {
            Status::Starting | Status::Running => Ok(()),
            status => Err(SessionError::InvalidState(status)),
        }
    }

    /// One-way transition to Invalid; the first recorded reason wins.
    pub(crate) fn invalidate(&self, reason: TermReason) {
        let mut meta = self.meta.lock();
        if meta.status != Status::Invalid {
            meta.status = Status::Invalid;
            meta.term_reason = reason;
        }
    }

    pub(crate) fn finish_handshake(&self, id: u32, version: Version, peer_capabilities: Vec<String>) {
        let mut meta = self.meta.lock();
        meta.id = id;
        meta.version = version;
        meta.capabilities = peer_capabilities;
        meta.status = Status::Running;
    }

    fn lock_ti(&self, timeout: Option<Duration>) -> Option<MutexGuard<'_, Transport>> {
        match timeout {
            Some(timeout) => self.ti.try_lock_for(timeout),
            None => Some(self.ti.lock()),
        }
    }

    pub(crate) fn with_ti<T>(&self, f: impl FnOnce(&Session, &mut Transport) -> T) -> T {
        let mut ti = self.ti.lock();
        f(self, &mut ti)
    }

    /// Read and classify one complete message.
    ///
    /// `Ok(None)` means the readiness wait (or the transport-lock wait)
    /// timed out with no message on the wire; `None` is the only outcome of
    /// a zero timeout on an idle session. A `None` timeout waits
    /// indefinitely.
    pub fn read_message(&self, timeout: Option<Duration>) -> Result<Option<Message>, SessionError> {
        self.check_usable()?;
        let Some(mut ti) = self.lock_ti(timeout) else {
            return Ok(None);
        };

        match ti.poll_in(timeout) {
            PollIn::Ready => {}
            PollIn::TimedOut => return Ok(None),
            PollIn::Closed => {
                error!(session.id = self.session_id(), "communication channel unexpectedly closed");
                self.invalidate(TermReason::Dropped);
                return Err(SessionError::PeerClosed);
            }
            PollIn::Failed(err) => {
                error!(session.id = self.session_id(), error = %err, "polling the session failed");
                self.invalidate(TermReason::Other);
                return Err(SessionError::Substrate(err));
            }
        }

        let body = match self.read_body(&mut ti) {
            Ok(body) => body,
            Err(err @ SessionError::MalformedFraming { .. }) => return self.handle_malformed(&mut ti, err),
            Err(err) => return Err(err),
        };

        let text = match core::str::from_utf8(&body) {
            Ok(text) => text,
            Err(err) => {
                let err = SessionError::MalformedMessage(netconf_proto::Error::from(err));
                return self.handle_malformed(&mut ti, err);
            }
        };

        match classify(text) {
            Ok(message) => {
                debug!(
                    session.id = self.session_id(),
                    message = message.root_name(),
                    "received message"
                );
                Ok(Some(message))
            }
            Err(err) => {
                let err = SessionError::MalformedMessage(err);
                self.handle_malformed(&mut ti, err)
            }
        }
    }

    /// Malformed input: on a NETCONF 1.1 server, answer with a
    /// `malformed-message` error reply (RFC 6241 section 3) before
    /// invalidating; elsewhere the fault is only surfaced.
    fn handle_malformed(
        &self,
        ti: &mut Transport,
        err: SessionError,
    ) -> Result<Option<Message>, SessionError> {
        error!(session.id = self.session_id(), error = %err, "malformed message received");

        if self.side == Side::Server && self.version() == Version::V11 {
            let body = ReplyBody::Errors(vec![RpcError::new(ErrorType::Rpc, ErrorTag::MalformedMessage)]);
            if let Err(write_err) = self.write_reply_locked(ti, None, &body) {
                error!(
                    session.id = self.session_id(),
                    error = %write_err,
                    "unable to send a malformed-message error reply, terminating session"
                );
            }
        }

        self.invalidate(TermReason::Other);
        Err(err)
    }

    fn write_reply_locked(
        &self,
        ti: &mut Transport,
        rpc: Option<&RpcEnvelope>,
        body: &ReplyBody,
    ) -> Result<(), SessionError> {
        let mut writer = FrameWriter::new(self, ti, self.version());
        netconf_proto::write_reply(&mut writer, rpc, body)?;
        writer.finish()
    }

    pub(crate) fn send_hello_locked(
        &self,
        ti: &mut Transport,
        capabilities: &[String],
        session_id: Option<u32>,
    ) -> Result<(), SessionError> {
        // Hello always goes out with end-of-message framing, whatever gets
        // negotiated afterwards.
        let mut writer = FrameWriter::new(self, ti, Version::V10);
        netconf_proto::write_hello(&mut writer, capabilities, session_id)?;
        writer.finish()
    }

    /// Send one `<rpc>` and return the message-id it was assigned.
    ///
    /// Client sessions only. Message-ids are strictly sequential per
    /// session, also under concurrent callers.
    pub fn send_rpc(
        &self,
        payload: &str,
        extra_attrs: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<u64, SessionError> {
        if self.side != Side::Client {
            return Err(SessionError::WrongSide(self.side));
        }
        self.check_usable()?;
        let mut ti = self.lock_ti(timeout).ok_or(SessionError::LockTimeout)?;

        let message_id = self.msgid.load(Ordering::Relaxed) + 1;
        let mut writer = FrameWriter::new(self, &mut ti, self.version());
        netconf_proto::write_rpc(&mut writer, message_id, extra_attrs, payload)?;
        writer.finish()?;
        self.msgid.store(message_id, Ordering::Relaxed);

        debug!(session.id = self.session_id(), message_id, "sent rpc");
        Ok(message_id)
    }

    /// Send one `<rpc-reply>`, mirroring the prefix and attributes of
    /// `rpc`. With `rpc` absent the reply only carries the base namespace
    /// (the malformed-message case).
    ///
    /// Server sessions only.
    pub fn send_reply(
        &self,
        rpc: Option<&RpcEnvelope>,
        body: &ReplyBody,
        timeout: Option<Duration>,
    ) -> Result<(), SessionError> {
        if self.side != Side::Server {
            return Err(SessionError::WrongSide(self.side));
        }
        self.check_usable()?;
        let mut ti = self.lock_ti(timeout).ok_or(SessionError::LockTimeout)?;
        self.write_reply_locked(&mut ti, rpc, body)
    }

    /// Send one `<notification>`.
    ///
    /// Server sessions only. `event_time` is the ISO 8601 event timestamp,
    /// `payload` the notification content as raw XML.
    pub fn send_notification(
        &self,
        event_time: &str,
        payload: &str,
        timeout: Option<Duration>,
    ) -> Result<(), SessionError> {
        if self.side != Side::Server {
            return Err(SessionError::WrongSide(self.side));
        }
        self.check_usable()?;
        let mut ti = self.lock_ti(timeout).ok_or(SessionError::LockTimeout)?;

        let mut writer = FrameWriter::new(self, &mut ti, self.version());
        netconf_proto::write_notification(&mut writer, event_time, payload)?;
        writer.finish()
    }

    /// True iff a subsequent I/O operation could plausibly make progress.
    pub fn is_connected(&self) -> bool {
        self.ti.lock().is_connected()
    }

    /// Record an orderly shutdown. The transport is released when the last
    /// reference to the session is dropped.
    pub fn close(&self, reason: CloseReason) -> Result<(), SessionError> {
        let mut meta = self.meta.lock();
        match meta.status {
            Status::Starting | Status::Running => {
                meta.status = Status::Closing;
                meta.term_reason = match reason {
                    CloseReason::Closed => TermReason::Closed,
                    CloseReason::Killed => TermReason::Killed,
                };
                info!(session.id = meta.id, "session closed");
                Ok(())
            }
            status => Err(SessionError::InvalidState(status)),
        }
    }
}

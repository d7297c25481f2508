//! Transport adapter: one byte-level contract over three substrates.
//!
//! The discriminator is kept explicit — SSH channel polling, TLS
//! want-read/want-write and plain descriptor polling need distinct code
//! paths, and folding their outcomes into [`ReadSome`]/[`PollIn`]/
//! [`WriteSome`] is precisely what makes the framed reader substrate
//! agnostic.

use std::io::{self, Read as _, Write as _};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, ppoll, PollFd, PollFlags};
use nix::sys::signal::SigSet;
use nix::sys::time::TimeSpec;
use nix::unistd;
use parking_lot::Mutex;
use rustls::{ClientConnection, ServerConnection, StreamOwned};

use crate::session::Session;
use crate::SLEEP_STEP;

/// Outcome of a single read attempt.
pub(crate) enum ReadSome {
    /// `n > 0` bytes were placed into the buffer.
    Data(usize),
    /// The substrate signalled would-block; the caller decides how to wait.
    WouldBlock,
    /// Orderly close by the peer.
    Closed,
    /// Substrate failure.
    Failed(io::Error),
}

/// Outcome of a readiness wait.
pub(crate) enum PollIn {
    Ready,
    TimedOut,
    Closed,
    Failed(io::Error),
}

/// Outcome of a single write attempt.
pub(crate) enum WriteSome {
    Wrote(usize),
    WouldBlock,
    Closed,
    Failed(io::Error),
}

/// Two half-duplex descriptors, non-blocking.
pub(crate) struct FdTransport {
    pub(crate) input: OwnedFd,
    pub(crate) output: OwnedFd,
}

/// One channel on a possibly shared SSH session.
pub(crate) struct SshTransport {
    pub(crate) channel: ssh2::Channel,
    pub(crate) group: Arc<SshGroup>,
}

impl Drop for SshTransport {
    fn drop(&mut self) {
        // Channels are closed individually; the SSH session itself lives
        // until the last group reference is gone.
        let _ = self.channel.close();
    }
}

/// One TLS stream wrapping a TCP socket.
pub(crate) enum TlsTransport {
    Client(StreamOwned<ClientConnection, TcpStream>),
    Server(StreamOwned<ServerConnection, TcpStream>),
}

impl TlsTransport {
    fn socket_fd(&self) -> RawFd {
        match self {
            TlsTransport::Client(s) => s.sock.as_raw_fd(),
            TlsTransport::Server(s) => s.sock.as_raw_fd(),
        }
    }

    /// Plaintext already decrypted and buffered inside the TLS connection,
    /// which a socket-level poll cannot see.
    fn pending_plaintext(&mut self) -> Result<bool, io::Error> {
        let state = match self {
            TlsTransport::Client(s) => s.conn.process_new_packets(),
            TlsTransport::Server(s) => s.conn.process_new_packets(),
        };
        match state {
            Ok(state) => Ok(state.plaintext_bytes_to_read() > 0),
            Err(err) => Err(io::Error::other(err)),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            TlsTransport::Client(s) => s.read(buf),
            TlsTransport::Server(s) => s.read(buf),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TlsTransport::Client(s) => s.write(buf),
            TlsTransport::Server(s) => s.write(buf),
        }
    }
}

impl Drop for TlsTransport {
    fn drop(&mut self) {
        match self {
            TlsTransport::Client(s) => {
                s.conn.send_close_notify();
                let _ = s.conn.write_tls(&mut s.sock);
            }
            TlsTransport::Server(s) => {
                s.conn.send_close_notify();
                let _ = s.conn.write_tls(&mut s.sock);
            }
        }
    }
}

/// Transport binding of one session.
pub(crate) enum Transport {
    Fd(FdTransport),
    Ssh(SshTransport),
    Tls(TlsTransport),
}

impl Transport {
    /// Descriptor used for readiness and liveness polling.
    fn poll_fd(&self) -> RawFd {
        match self {
            Transport::Fd(fd) => fd.input.as_raw_fd(),
            Transport::Ssh(ssh) => ssh.group.socket_fd(),
            Transport::Tls(tls) => tls.socket_fd(),
        }
    }

    /// One read attempt. `EINTR` is retried transparently after a short
    /// back-off; everything else maps onto [`ReadSome`].
    pub(crate) fn read_some(&mut self, buf: &mut [u8]) -> ReadSome {
        match self {
            Transport::Fd(fd) => loop {
                match unistd::read(fd.input.as_raw_fd(), buf) {
                    Ok(0) => break ReadSome::Closed,
                    Ok(n) => break ReadSome::Data(n),
                    Err(Errno::EAGAIN) => break ReadSome::WouldBlock,
                    Err(Errno::EINTR) => thread::sleep(SLEEP_STEP),
                    Err(err) => break ReadSome::Failed(err.into()),
                }
            },
            Transport::Ssh(ssh) => loop {
                match ssh.channel.read(buf) {
                    Ok(0) => {
                        break if ssh.channel.eof() {
                            ReadSome::Closed
                        } else {
                            ReadSome::WouldBlock
                        };
                    }
                    Ok(n) => break ReadSome::Data(n),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break ReadSome::WouldBlock,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => thread::sleep(SLEEP_STEP),
                    Err(err) => break ReadSome::Failed(err),
                }
            },
            Transport::Tls(tls) => loop {
                match tls.read(buf) {
                    Ok(0) => break ReadSome::Closed,
                    Ok(n) => break ReadSome::Data(n),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break ReadSome::WouldBlock,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => thread::sleep(SLEEP_STEP),
                    Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break ReadSome::Closed,
                    Err(err) => break ReadSome::Failed(err),
                }
            },
        }
    }

    /// Single-shot readiness wait. Signals are masked for the duration so a
    /// timeout is deterministic.
    pub(crate) fn poll_in(&mut self, timeout: Option<Duration>) -> PollIn {
        match self {
            Transport::Ssh(ssh) => {
                // Channel-level state first: bytes already decrypted into
                // the channel window never show up on the socket again.
                if ssh.channel.eof() {
                    return PollIn::Closed;
                }
                if ssh.channel.read_window().available > 0 {
                    return PollIn::Ready;
                }
                poll_in_fd(ssh.group.socket_fd(), timeout)
            }
            Transport::Tls(tls) => match tls.pending_plaintext() {
                Ok(true) => PollIn::Ready,
                Ok(false) => poll_in_fd(tls.socket_fd(), timeout),
                Err(err) => PollIn::Failed(err),
            },
            Transport::Fd(fd) => poll_in_fd(fd.input.as_raw_fd(), timeout),
        }
    }

    /// One write attempt.
    pub(crate) fn write_some(&mut self, buf: &[u8]) -> WriteSome {
        match self {
            Transport::Fd(fd) => loop {
                match unistd::write(fd.output.as_raw_fd(), buf) {
                    Ok(n) => break WriteSome::Wrote(n),
                    Err(Errno::EAGAIN) => break WriteSome::WouldBlock,
                    Err(Errno::EPIPE) => break WriteSome::Closed,
                    Err(Errno::EINTR) => thread::sleep(SLEEP_STEP),
                    Err(err) => break WriteSome::Failed(err.into()),
                }
            },
            Transport::Ssh(ssh) => {
                if ssh.channel.eof() {
                    return WriteSome::Closed;
                }
                loop {
                    match ssh.channel.write(buf) {
                        Ok(0) => break WriteSome::WouldBlock,
                        Ok(n) => break WriteSome::Wrote(n),
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => break WriteSome::WouldBlock,
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => thread::sleep(SLEEP_STEP),
                        Err(err) => break WriteSome::Failed(err),
                    }
                }
            }
            Transport::Tls(tls) => loop {
                match tls.write(buf) {
                    Ok(0) => break WriteSome::WouldBlock,
                    Ok(n) => break WriteSome::Wrote(n),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break WriteSome::WouldBlock,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => thread::sleep(SLEEP_STEP),
                    Err(err) => break WriteSome::Failed(err),
                }
            },
        }
    }

    /// Non-destructive liveness check: true iff a subsequent I/O operation
    /// could plausibly make progress.
    pub(crate) fn is_connected(&self) -> bool {
        let mut fds = [PollFd::new(self.poll_fd(), PollFlags::POLLIN)];
        loop {
            match poll(&mut fds, 0) {
                Err(Errno::EINTR) => continue,
                Err(_) => return false,
                Ok(n) => {
                    if n > 0 {
                        let revents = fds[0].revents().unwrap_or_else(PollFlags::empty);
                        if revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL) {
                            return false;
                        }
                    }
                    return true;
                }
            }
        }
    }
}

fn poll_in_fd(fd: RawFd, timeout: Option<Duration>) -> PollIn {
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    let timeout = timeout.map(TimeSpec::from_duration);
    match ppoll(&mut fds, timeout, Some(SigSet::all())) {
        Err(err) => PollIn::Failed(err.into()),
        Ok(0) => PollIn::TimedOut,
        Ok(_) => {
            let revents = fds[0].revents().unwrap_or_else(PollFlags::empty);
            if revents.contains(PollFlags::POLLHUP) {
                PollIn::Closed
            } else if revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
                PollIn::Failed(io::Error::other("error condition on session descriptor"))
            } else {
                PollIn::Ready
            }
        }
    }
}

/// Put a descriptor into non-blocking mode.
pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io::Error::from)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
    Ok(())
}

/// Shared SSH transport: the `ssh2::Session` carrying one or more NETCONF
/// sessions on separate channels.
///
/// The original sibling ring is modelled as weak references: the group never
/// owns its sessions, and [`SshGroup::sessions`] yields the live siblings.
/// Serialization of channel operations across siblings is provided by the
/// `ssh2` crate, which locks its session-level mutex around every call.
pub struct SshGroup {
    session: Mutex<ssh2::Session>,
    socket: RawFd,
    siblings: Mutex<Vec<Weak<Session>>>,
}

impl SshGroup {
    /// Wrap an authenticated SSH session whose socket is `socket`.
    ///
    /// The session is switched to non-blocking mode; all subsequent channel
    /// I/O relies on it.
    pub fn new(session: ssh2::Session, socket: RawFd) -> Arc<Self> {
        session.set_blocking(false);
        Arc::new(SshGroup {
            session: Mutex::new(session),
            socket,
            siblings: Mutex::new(Vec::new()),
        })
    }

    /// Run `f` with the underlying SSH session.
    pub fn with_session<T>(&self, f: impl FnOnce(&ssh2::Session) -> T) -> T {
        f(&self.session.lock())
    }

    /// Live NETCONF sessions multiplexed on this SSH session.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        let mut siblings = self.siblings.lock();
        siblings.retain(|weak| weak.strong_count() > 0);
        siblings.iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn register(&self, session: &Arc<Session>) {
        let mut siblings = self.siblings.lock();
        siblings.retain(|weak| weak.strong_count() > 0);
        siblings.push(Arc::downgrade(session));
    }

    pub(crate) fn socket_fd(&self) -> RawFd {
        self.socket
    }
}

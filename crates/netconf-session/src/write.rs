//! Framed writer: staging buffer, XML content escaping and frame emission.
//!
//! Messages are serialized incrementally through a small staging area so the
//! whole outbound message never has to sit in memory. Each flush becomes one
//! frame: body bytes as-is under NETCONF 1.0, a `\n#<len>\n` chunk under
//! NETCONF 1.1. `finish` seals the message with the version's terminator.

use netconf_proto::MsgSink;

use crate::error::SessionError;
use crate::session::{Session, TermReason, Version};
use crate::transport::{Transport, WriteSome};
use crate::{ENDTAG_10, SLEEP_STEP, WRITE_BUF_SIZE};

impl Session {
    /// Write the entire buffer, pre-empting `SIGPIPE` with a connectivity
    /// check and sleeping through transient would-block conditions.
    pub(crate) fn ti_write_all(&self, ti: &mut Transport, data: &[u8]) -> Result<(), SessionError> {
        self.check_usable()?;

        if !ti.is_connected() {
            error!(session.id = self.session_id(), "communication channel unexpectedly closed");
            self.invalidate(TermReason::Dropped);
            return Err(SessionError::PeerClosed);
        }

        let mut written = 0;
        while written < data.len() {
            match ti.write_some(&data[written..]) {
                WriteSome::Wrote(n) => written += n,
                WriteSome::WouldBlock => std::thread::sleep(SLEEP_STEP),
                WriteSome::Closed => {
                    error!(session.id = self.session_id(), "communication channel unexpectedly closed");
                    self.invalidate(TermReason::Dropped);
                    return Err(SessionError::PeerClosed);
                }
                WriteSome::Failed(err) => {
                    error!(session.id = self.session_id(), error = %err, "writing to the session failed");
                    self.invalidate(TermReason::Other);
                    return Err(SessionError::Substrate(err));
                }
            }
        }
        Ok(())
    }
}

/// Streaming writer for one outbound message.
///
/// Once `finish` returns `Ok`, the whole message (terminator included) is on
/// the wire; on any error the session has been transitioned to an invalid
/// state by the underlying write path.
pub(crate) struct FrameWriter<'a> {
    session: &'a Session,
    ti: &'a mut Transport,
    version: Version,
    buf: [u8; WRITE_BUF_SIZE],
    len: usize,
}

impl<'a> FrameWriter<'a> {
    /// `version` selects the framing; hello messages pass
    /// [`Version::V10`] explicitly regardless of the negotiated version.
    pub(crate) fn new(session: &'a Session, ti: &'a mut Transport, version: Version) -> Self {
        FrameWriter {
            session,
            ti,
            version,
            buf: [0; WRITE_BUF_SIZE],
            len: 0,
        }
    }

    fn flush(&mut self) -> Result<(), SessionError> {
        if self.len == 0 {
            return Ok(());
        }
        let len = core::mem::take(&mut self.len);
        write_frame(self.session, self.ti, self.version, &self.buf[..len])
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<(), SessionError> {
        if self.len > 0 && self.len + data.len() > WRITE_BUF_SIZE {
            self.flush()?;
        }
        if data.len() > WRITE_BUF_SIZE {
            // Oversized markup goes out as its own frame, no copy.
            return write_frame(self.session, self.ti, self.version, data);
        }
        self.buf[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    fn write_text(&mut self, data: &[u8]) -> Result<(), SessionError> {
        for &b in data {
            // Worst case expansion is five bytes (`&amp;`).
            if self.len + 5 >= WRITE_BUF_SIZE {
                self.flush()?;
            }
            match b {
                b'&' => {
                    self.buf[self.len..self.len + 5].copy_from_slice(b"&amp;");
                    self.len += 5;
                }
                b'<' => {
                    self.buf[self.len..self.len + 4].copy_from_slice(b"&lt;");
                    self.len += 4;
                }
                b'>' => {
                    self.buf[self.len..self.len + 4].copy_from_slice(b"&gt;");
                    self.len += 4;
                }
                _ => {
                    self.buf[self.len] = b;
                    self.len += 1;
                }
            }
        }
        Ok(())
    }

    /// Flush the staging buffer and write the end-of-message terminator.
    pub(crate) fn finish(mut self) -> Result<(), SessionError> {
        self.flush()?;
        let terminator: &[u8] = match self.version {
            Version::V10 => ENDTAG_10,
            Version::V11 => b"\n##\n",
        };
        self.session.ti_write_all(self.ti, terminator)
    }
}

impl MsgSink for FrameWriter<'_> {
    type Error = SessionError;

    fn raw(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.write_raw(data)
    }

    fn text(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.write_text(data)
    }
}

fn write_frame(session: &Session, ti: &mut Transport, version: Version, data: &[u8]) -> Result<(), SessionError> {
    if version == Version::V11 {
        let header = format!("\n#{}\n", data.len());
        session.ti_write_all(ti, header.as_bytes())?;
    }
    session.ti_write_all(ti, data)
}

//! Framed reader: assembles one complete NETCONF message body.
//!
//! NETCONF 1.0 scans for the `]]>]]>` end-of-message sentinel; NETCONF 1.1
//! walks the RFC 6242 chunk structure. Either way the caller receives a
//! contiguous body with the framing stripped, or an error that has already
//! been applied to the session state.

use std::time::Instant;

use bytes::{BufMut as _, BytesMut};

use crate::error::SessionError;
use crate::session::{Session, TermReason, Version};
use crate::transport::{ReadSome, Transport};
use crate::{ENDTAG_10, READ_BUF_STEP, SLEEP_STEP};

/// Remaining per-message read budget.
///
/// Only time actually spent sleeping on would-block counts against the
/// budget, measured on the monotonic clock; time spent moving bytes is
/// free, like the original one-second tick counter it replaces.
pub(crate) struct ReadBudget {
    remaining: std::time::Duration,
}

impl ReadBudget {
    pub(crate) fn new(budget: std::time::Duration) -> Self {
        ReadBudget { remaining: budget }
    }

    /// One cooperative sleep; errors once the budget is exhausted.
    fn sleep(&mut self) -> Result<(), SessionError> {
        let start = Instant::now();
        std::thread::sleep(SLEEP_STEP);
        self.remaining = self.remaining.saturating_sub(start.elapsed());
        if self.remaining.is_zero() {
            return Err(SessionError::ReadTimeout);
        }
        Ok(())
    }
}

impl Session {
    /// Read until `buf` is full, sleeping through would-block within the
    /// budget. Fatal outcomes transition the session.
    fn read_exact(&self, ti: &mut Transport, buf: &mut [u8], budget: &mut ReadBudget) -> Result<(), SessionError> {
        let mut filled = 0;
        while filled < buf.len() {
            match ti.read_some(&mut buf[filled..]) {
                ReadSome::Data(n) => filled += n,
                ReadSome::WouldBlock => {
                    if let Err(err) = budget.sleep() {
                        error!(
                            session.id = self.session_id(),
                            "reading a full NETCONF message timeout elapsed"
                        );
                        self.invalidate(TermReason::Other);
                        return Err(err);
                    }
                }
                ReadSome::Closed => {
                    error!(session.id = self.session_id(), "communication channel unexpectedly closed");
                    self.invalidate(TermReason::Dropped);
                    return Err(SessionError::PeerClosed);
                }
                ReadSome::Failed(err) => {
                    error!(session.id = self.session_id(), error = %err, "reading from the session failed");
                    self.invalidate(TermReason::Other);
                    return Err(SessionError::Substrate(err));
                }
            }
        }
        Ok(())
    }

    /// Read byte-wise until `endtag` terminates the buffer; the returned
    /// buffer includes it. `limit` caps the scan.
    fn read_until(
        &self,
        ti: &mut Transport,
        endtag: &[u8],
        limit: Option<usize>,
        budget: &mut ReadBudget,
    ) -> Result<BytesMut, SessionError> {
        let mut buf = BytesMut::with_capacity(READ_BUF_STEP);
        let mut byte = [0u8; 1];
        loop {
            if let Some(limit) = limit {
                if buf.len() == limit {
                    warn!(session.id = self.session_id(), limit, "reading limit reached");
                    self.invalidate(TermReason::Other);
                    return Err(SessionError::TooLarge { limit });
                }
            }
            if buf.len() == buf.capacity() {
                buf.reserve(READ_BUF_STEP);
            }
            self.read_exact(ti, &mut byte, budget)?;
            buf.put_u8(byte[0]);
            if buf.len() >= endtag.len() && &buf[buf.len() - endtag.len()..] == endtag {
                return Ok(buf);
            }
        }
    }

    /// Assemble one complete message body, framing stripped.
    ///
    /// Framing violations surface as [`SessionError::MalformedFraming`]
    /// *without* touching the session state: the caller owns the
    /// malformed-message handling (and the reply it may imply).
    pub(crate) fn read_body(&self, ti: &mut Transport) -> Result<BytesMut, SessionError> {
        let mut budget = ReadBudget::new(self.read_timeout());
        let limit = self.max_message_size();

        match self.version() {
            Version::V10 => {
                let mut buf = self.read_until(ti, ENDTAG_10, limit, &mut budget)?;
                buf.truncate(buf.len() - ENDTAG_10.len());
                Ok(buf)
            }
            Version::V11 => {
                let mut msg = BytesMut::new();
                loop {
                    // Scan to the chunk header introducer, then take the
                    // rest of the header line.
                    self.read_until(ti, b"\n#", None, &mut budget)?;
                    let token = self.read_until(ti, b"\n", None, &mut budget)?;

                    if token.as_ref() == b"#\n" {
                        if msg.is_empty() {
                            return Err(SessionError::MalformedFraming {
                                reason: "invalid frame chunk delimiters",
                            });
                        }
                        break;
                    }

                    let Some(chunk_len) = parse_chunk_len(&token) else {
                        return Err(SessionError::MalformedFraming {
                            reason: "invalid frame chunk size",
                        });
                    };

                    if let Some(limit) = limit {
                        if msg.len() + chunk_len > limit {
                            warn!(session.id = self.session_id(), limit, "reading limit reached");
                            self.invalidate(TermReason::Other);
                            return Err(SessionError::TooLarge { limit });
                        }
                    }

                    let offset = msg.len();
                    msg.resize(offset + chunk_len, 0);
                    self.read_exact(ti, &mut msg[offset..], &mut budget)?;
                }
                Ok(msg)
            }
        }
    }
}

/// Chunk-size token of a v1.1 header line: decimal, non-zero, newline
/// terminated.
fn parse_chunk_len(token: &[u8]) -> Option<usize> {
    let digits = token.strip_suffix(b"\n")?;
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    // All-ASCII digits, UTF-8 by construction.
    let digits = core::str::from_utf8(digits).ok()?;
    digits.parse::<u64>().ok().filter(|n| *n > 0).and_then(|n| usize::try_from(n).ok())
}

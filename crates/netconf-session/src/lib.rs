//! NETCONF session core: transports, framing and the message loop.
//!
//! Turns a byte-oriented transport — a pair of file descriptors, an SSH
//! channel carrying the `netconf` subsystem, or a TLS stream — into a typed
//! stream of NETCONF messages, and writes such messages back. Both framing
//! disciplines are implemented: the NETCONF 1.0 `]]>]]>` end-of-message
//! sentinel and the NETCONF 1.1 chunked framing of RFC 6242.
//!
//! Establishing and authenticating the SSH/TLS transport is the caller's
//! job; sessions are created from already-connected handles and perform the
//! hello exchange during construction.

#[macro_use]
extern crate tracing;

use std::time::Duration;

mod ctx;
mod error;
mod handshake;
mod read;
mod session;
mod transport;
mod write;

pub use self::ctx::{ClientContext, ServerContext};
pub use self::error::SessionError;
pub use self::session::{CloseReason, Session, Side, Status, TermReason, Version};
pub use self::transport::SshGroup;

// Re-exported message layer, used in the public API.
pub use netconf_proto as proto;
pub use netconf_proto::{
    ErrorTag, ErrorType, Hello, Message, Notification, ReplyBody, ReplyEnvelope, RpcEnvelope, RpcError, WithDefaults,
};

/// Default per-message read budget.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for the hello exchange.
pub const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Advisory timeout for transport establishment (SSH key exchange, TLS
/// handshake). The core never performs establishment itself; collaborators
/// are expected to bound it with this value.
pub const TRANSPORT_TIMEOUT: Duration = Duration::from_millis(500);

/// Cooperative sleep between would-block retries.
pub(crate) const SLEEP_STEP: Duration = Duration::from_millis(1);

/// Staging buffer size of the framed writer.
pub(crate) const WRITE_BUF_SIZE: usize = 1024;

/// Growth step of the inbound message buffer.
pub(crate) const READ_BUF_STEP: usize = 512;

/// NETCONF 1.0 end-of-message sentinel.
pub(crate) const ENDTAG_10: &[u8] = b"]]>]]>";

use std::io;

use crate::session::Status;

/// Errors surfaced by session operations.
///
/// Every fatal variant has already transitioned the session to
/// [`Status::Invalid`](crate::Status::Invalid) by the time the caller sees
/// it; [`InvalidState`](Self::InvalidState) and
/// [`LockTimeout`](Self::LockTimeout) leave the session untouched.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("session is not usable in state {0:?}")]
    InvalidState(Status),

    #[error("timed out waiting for the session transport lock")]
    LockTimeout,

    #[error("peer unexpectedly closed the connection")]
    PeerClosed,

    #[error("transport failure")]
    Substrate(#[from] io::Error),

    #[error("reading a full NETCONF message timeout elapsed")]
    ReadTimeout,

    #[error("message exceeds the configured size limit ({limit} B)")]
    TooLarge { limit: usize },

    #[error("invalid NETCONF framing: {reason}")]
    MalformedFraming { reason: &'static str },

    #[error("malformed NETCONF message")]
    MalformedMessage(#[source] netconf_proto::Error),

    #[error("invalid hello from peer: {reason}")]
    BadHello { reason: &'static str },

    #[error("operation not available on a {0:?} session")]
    WrongSide(crate::session::Side),
}

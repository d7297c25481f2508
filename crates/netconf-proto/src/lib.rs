//! NETCONF message model and codec.
//!
//! Typed representations of the four NETCONF message kinds (`hello`, `rpc`,
//! `rpc-reply`, `notification`), root-element classification of inbound
//! message bodies, and incremental serialization of outbound messages
//! through a [`MsgSink`].
//!
//! This crate is I/O-free: framing (RFC 6242) and transports live in
//! `netconf-session`. See [RFC 6241] for the message layer itself.
//!
//! [RFC 6241]: https://www.rfc-editor.org/rfc/rfc6241

use core::fmt;

mod classify;
mod rpc_error;

pub use self::classify::classify;
pub use self::rpc_error::{write_rpc_error, ErrorTag, ErrorType, RpcError};

/// Namespace of the NETCONF base protocol elements.
pub const NS_BASE: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

/// Namespace of the NETCONF notification elements.
pub const NS_NOTIF: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";

/// Capability URI advertising NETCONF 1.0 (end-of-message framing).
pub const CAP_BASE_10: &str = "urn:ietf:params:netconf:base:1.0";

/// Capability URI advertising NETCONF 1.1 (chunked framing).
pub const CAP_BASE_11: &str = "urn:ietf:params:netconf:base:1.1";

#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The body is not well-formed XML.
    Xml(quick_xml::Error),
    /// The body is not valid UTF-8.
    Utf8(core::str::Utf8Error),
    /// The root element carries no namespace.
    MissingNamespace,
    /// The root element is not one of the four NETCONF message roots.
    UnexpectedRoot { ns: String, name: String },
    /// Well-formed XML which is not a valid NETCONF message.
    Malformed { reason: &'static str },
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Xml(e) => Some(e),
            Error::Utf8(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Xml(e) => write!(f, "invalid XML: {e}"),
            Error::Utf8(e) => write!(f, "message body is not valid UTF-8: {e}"),
            Error::MissingNamespace => write!(f, "invalid message root element (missing namespace)"),
            Error::UnexpectedRoot { ns, name } => {
                write!(f, "invalid message root element `{name}` (namespace `{ns}`)")
            }
            Error::Malformed { reason } => write!(f, "malformed message: {reason}"),
        }
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Error::Xml(e)
    }
}

impl From<core::str::Utf8Error> for Error {
    fn from(e: core::str::Utf8Error) -> Self {
        Error::Utf8(e)
    }
}

/// Byte sink fed by the message serializers.
///
/// Mirrors the two write modes of the NETCONF wire encoding: `raw` receives
/// markup verbatim, `text` receives character data and is expected to expand
/// `&`, `<` and `>` into entity references. The framed writer of
/// `netconf-session` implements this on top of its staging buffer.
pub trait MsgSink {
    type Error;

    /// Append markup bytes as-is.
    fn raw(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Append character data, escaping XML-significant bytes.
    fn text(&mut self, data: &[u8]) -> Result<(), Self::Error>;
}

/// One parsed NETCONF message, classified by its root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello(Hello),
    Rpc(RpcEnvelope),
    Reply(ReplyEnvelope),
    Notification(Notification),
}

impl Message {
    /// Root element name, for diagnostics.
    pub fn root_name(&self) -> &'static str {
        match self {
            Message::Hello(_) => "hello",
            Message::Rpc(_) => "rpc",
            Message::Reply(_) => "rpc-reply",
            Message::Notification(_) => "notification",
        }
    }
}

/// `<hello>` contents: advertised capabilities and, server to client only,
/// the assigned session-id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub capabilities: Vec<String>,
    pub session_id: Option<u32>,
}

impl Hello {
    pub fn has_capability(&self, uri: &str) -> bool {
        self.capabilities.iter().any(|c| c == uri)
    }
}

/// An inbound `<rpc>`.
///
/// `attrs` keeps the raw (still escaped) attribute bytes of the start tag so
/// a reply can mirror them verbatim, namespace declarations included;
/// `message_id` is parsed out of them for convenience. `content` is the
/// inner XML of the element, markup untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcEnvelope {
    pub message_id: Option<String>,
    pub prefix: Option<String>,
    pub attrs: String,
    pub content: String,
}

/// An inbound `<rpc-reply>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyEnvelope {
    pub message_id: Option<String>,
    pub attrs: String,
    pub body: ReplyBody,
}

/// Payload of an `<rpc-reply>`, also used to build outbound replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    /// `<ok/>`.
    Ok,
    /// Response data, kept as raw XML.
    ///
    /// `with_defaults` selects the default-filtering mode applied by the
    /// data layer when it rendered `xml`; it does not change the bytes
    /// emitted here. It is `None` on parsed replies.
    Data {
        xml: String,
        with_defaults: Option<WithDefaults>,
    },
    /// One or more `<rpc-error>` elements.
    Errors(Vec<RpcError>),
}

/// `with-defaults` handling mode (RFC 6243).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithDefaults {
    Explicit,
    Trim,
    All,
    AllTag,
}

/// An inbound `<notification>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// `<eventTime>` text, an ISO 8601 date-and-time string.
    pub event_time: String,
    /// Remaining children of `<notification>` as raw XML.
    pub content: String,
}

/// Serialize a `<hello>` message.
///
/// `session_id` must be set on server to client hellos and absent on client
/// to server hellos; enforcing the direction is the session layer's job.
pub fn write_hello<S: MsgSink>(
    sink: &mut S,
    capabilities: &[String],
    session_id: Option<u32>,
) -> Result<(), S::Error> {
    sink.raw(b"<hello xmlns=\"")?;
    sink.raw(NS_BASE.as_bytes())?;
    sink.raw(b"\"><capabilities>")?;
    for capability in capabilities {
        sink.raw(b"<capability>")?;
        sink.text(capability.as_bytes())?;
        sink.raw(b"</capability>")?;
    }
    sink.raw(b"</capabilities>")?;
    if let Some(sid) = session_id {
        sink.raw(b"<session-id>")?;
        sink.raw(sid.to_string().as_bytes())?;
        sink.raw(b"</session-id>")?;
    }
    sink.raw(b"</hello>")
}

/// Serialize an `<rpc>` with the given message-id.
///
/// `extra_attrs` is appended verbatim after the `message-id` attribute and
/// must start with a space when present. `payload` is the operation subtree,
/// raw XML.
pub fn write_rpc<S: MsgSink>(
    sink: &mut S,
    message_id: u64,
    extra_attrs: Option<&str>,
    payload: &str,
) -> Result<(), S::Error> {
    sink.raw(b"<rpc xmlns=\"")?;
    sink.raw(NS_BASE.as_bytes())?;
    sink.raw(b"\" message-id=\"")?;
    sink.raw(message_id.to_string().as_bytes())?;
    sink.raw(b"\"")?;
    if let Some(attrs) = extra_attrs {
        sink.raw(attrs.as_bytes())?;
    }
    sink.raw(b">")?;
    sink.raw(payload.as_bytes())?;
    sink.raw(b"</rpc>")
}

/// Serialize an `<rpc-reply>`.
///
/// When `rpc` is given, its root prefix and raw attributes are mirrored on
/// the reply (RFC 6241 section 4.2: `message-id` and any additional
/// attributes are echoed). With no `rpc` — the malformed-message case — the
/// reply only carries the base namespace.
pub fn write_reply<S: MsgSink>(
    sink: &mut S,
    rpc: Option<&RpcEnvelope>,
    body: &ReplyBody,
) -> Result<(), S::Error> {
    match rpc {
        Some(rpc) => {
            sink.raw(b"<")?;
            if let Some(prefix) = &rpc.prefix {
                sink.raw(prefix.as_bytes())?;
                sink.raw(b":")?;
            }
            sink.raw(b"rpc-reply")?;
            sink.raw(rpc.attrs.as_bytes())?;
            sink.raw(b">")?;
        }
        None => {
            sink.raw(b"<rpc-reply xmlns=\"")?;
            sink.raw(NS_BASE.as_bytes())?;
            sink.raw(b"\">")?;
        }
    }

    match body {
        ReplyBody::Ok => sink.raw(b"<ok/>")?,
        ReplyBody::Data { xml, .. } => sink.raw(xml.as_bytes())?,
        ReplyBody::Errors(errors) => {
            for error in errors {
                write_rpc_error(sink, error)?;
            }
        }
    }

    sink.raw(b"</")?;
    if let Some(rpc) = rpc {
        if let Some(prefix) = &rpc.prefix {
            sink.raw(prefix.as_bytes())?;
            sink.raw(b":")?;
        }
    }
    sink.raw(b"rpc-reply>")
}

/// Serialize a `<notification>`.
///
/// `event_time` is emitted as-is; `payload` is the notification content,
/// raw XML.
pub fn write_notification<S: MsgSink>(
    sink: &mut S,
    event_time: &str,
    payload: &str,
) -> Result<(), S::Error> {
    sink.raw(b"<notification xmlns=\"")?;
    sink.raw(NS_NOTIF.as_bytes())?;
    sink.raw(b"\"><eventTime>")?;
    sink.raw(event_time.as_bytes())?;
    sink.raw(b"</eventTime>")?;
    sink.raw(payload.as_bytes())?;
    sink.raw(b"</notification>")
}

//! Structured `<rpc-error>` model and serialization (RFC 6241 section 4.3).

use crate::MsgSink;

/// `<error-type>`: which protocol layer detected the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Transport,
    Rpc,
    Protocol,
    Application,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::Transport => "transport",
            ErrorType::Rpc => "rpc",
            ErrorType::Protocol => "protocol",
            ErrorType::Application => "application",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        Some(match s {
            "transport" => ErrorType::Transport,
            "rpc" => ErrorType::Rpc,
            "protocol" => ErrorType::Protocol,
            "application" => ErrorType::Application,
            _ => return None,
        })
    }
}

/// `<error-tag>`: the fixed RFC 6241 appendix A vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTag {
    InUse,
    InvalidValue,
    TooBig,
    MissingAttribute,
    BadAttribute,
    UnknownAttribute,
    MissingElement,
    BadElement,
    UnknownElement,
    UnknownNamespace,
    AccessDenied,
    LockDenied,
    ResourceDenied,
    RollbackFailed,
    DataExists,
    DataMissing,
    OperationNotSupported,
    OperationFailed,
    MalformedMessage,
}

impl ErrorTag {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorTag::InUse => "in-use",
            ErrorTag::InvalidValue => "invalid-value",
            ErrorTag::TooBig => "too-big",
            ErrorTag::MissingAttribute => "missing-attribute",
            ErrorTag::BadAttribute => "bad-attribute",
            ErrorTag::UnknownAttribute => "unknown-attribute",
            ErrorTag::MissingElement => "missing-element",
            ErrorTag::BadElement => "bad-element",
            ErrorTag::UnknownElement => "unknown-element",
            ErrorTag::UnknownNamespace => "unknown-namespace",
            ErrorTag::AccessDenied => "access-denied",
            ErrorTag::LockDenied => "lock-denied",
            ErrorTag::ResourceDenied => "resource-denied",
            ErrorTag::RollbackFailed => "rollback-failed",
            ErrorTag::DataExists => "data-exists",
            ErrorTag::DataMissing => "data-missing",
            ErrorTag::OperationNotSupported => "operation-not-supported",
            ErrorTag::OperationFailed => "operation-failed",
            ErrorTag::MalformedMessage => "malformed-message",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        Some(match s {
            "in-use" => ErrorTag::InUse,
            "invalid-value" => ErrorTag::InvalidValue,
            "too-big" => ErrorTag::TooBig,
            "missing-attribute" => ErrorTag::MissingAttribute,
            "bad-attribute" => ErrorTag::BadAttribute,
            "unknown-attribute" => ErrorTag::UnknownAttribute,
            "missing-element" => ErrorTag::MissingElement,
            "bad-element" => ErrorTag::BadElement,
            "unknown-element" => ErrorTag::UnknownElement,
            "unknown-namespace" => ErrorTag::UnknownNamespace,
            "access-denied" => ErrorTag::AccessDenied,
            "lock-denied" => ErrorTag::LockDenied,
            "resource-denied" => ErrorTag::ResourceDenied,
            "rollback-failed" => ErrorTag::RollbackFailed,
            "data-exists" => ErrorTag::DataExists,
            "data-missing" => ErrorTag::DataMissing,
            "operation-not-supported" => ErrorTag::OperationNotSupported,
            "operation-failed" => ErrorTag::OperationFailed,
            "malformed-message" => ErrorTag::MalformedMessage,
            _ => return None,
        })
    }
}

/// One `<rpc-error>` element.
///
/// Severity is not stored: RFC 6241 only defines `error` and that is what
/// is emitted. The `bad_*` sequences and `info` fragments end up inside
/// `<error-info>`, in that order; `info` entries are raw XML written
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub typ: ErrorType,
    pub tag: ErrorTag,
    pub app_tag: Option<String>,
    pub path: Option<String>,
    pub message: Option<String>,
    pub message_lang: Option<String>,
    pub session_id: Option<u32>,
    pub bad_attributes: Vec<String>,
    pub bad_elements: Vec<String>,
    pub bad_namespaces: Vec<String>,
    pub info: Vec<String>,
}

impl RpcError {
    pub fn new(typ: ErrorType, tag: ErrorTag) -> Self {
        RpcError {
            typ,
            tag,
            app_tag: None,
            path: None,
            message: None,
            message_lang: None,
            session_id: None,
            bad_attributes: Vec::new(),
            bad_elements: Vec::new(),
            bad_namespaces: Vec::new(),
            info: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_app_tag(mut self, app_tag: impl Into<String>) -> Self {
        self.app_tag = Some(app_tag.into());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_message_lang(mut self, lang: impl Into<String>) -> Self {
        self.message_lang = Some(lang.into());
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: u32) -> Self {
        self.session_id = Some(session_id);
        self
    }

    fn has_info(&self) -> bool {
        self.session_id.is_some()
            || !self.bad_attributes.is_empty()
            || !self.bad_elements.is_empty()
            || !self.bad_namespaces.is_empty()
            || !self.info.is_empty()
    }
}

/// Serialize one `<rpc-error>` element.
///
/// Child order is fixed by RFC 6241 section 4.3: `error-type`, `error-tag`,
/// `error-severity`, then the optional members.
pub fn write_rpc_error<S: MsgSink>(sink: &mut S, error: &RpcError) -> Result<(), S::Error> {
    sink.raw(b"<rpc-error>")?;

    sink.raw(b"<error-type>")?;
    sink.raw(error.typ.as_str().as_bytes())?;
    sink.raw(b"</error-type>")?;

    sink.raw(b"<error-tag>")?;
    sink.raw(error.tag.as_str().as_bytes())?;
    sink.raw(b"</error-tag>")?;

    sink.raw(b"<error-severity>error</error-severity>")?;

    if let Some(app_tag) = &error.app_tag {
        sink.raw(b"<error-app-tag>")?;
        sink.text(app_tag.as_bytes())?;
        sink.raw(b"</error-app-tag>")?;
    }

    if let Some(path) = &error.path {
        sink.raw(b"<error-path>")?;
        sink.text(path.as_bytes())?;
        sink.raw(b"</error-path>")?;
    }

    if let Some(message) = &error.message {
        sink.raw(b"<error-message")?;
        if let Some(lang) = &error.message_lang {
            sink.raw(b" xml:lang=\"")?;
            sink.text(lang.as_bytes())?;
            sink.raw(b"\"")?;
        }
        sink.raw(b">")?;
        sink.text(message.as_bytes())?;
        sink.raw(b"</error-message>")?;
    }

    if error.has_info() {
        sink.raw(b"<error-info>")?;

        if let Some(sid) = error.session_id {
            sink.raw(b"<session-id>")?;
            sink.raw(sid.to_string().as_bytes())?;
            sink.raw(b"</session-id>")?;
        }

        for attribute in &error.bad_attributes {
            sink.raw(b"<bad-attribute>")?;
            sink.text(attribute.as_bytes())?;
            sink.raw(b"</bad-attribute>")?;
        }

        for element in &error.bad_elements {
            sink.raw(b"<bad-element>")?;
            sink.text(element.as_bytes())?;
            sink.raw(b"</bad-element>")?;
        }

        for namespace in &error.bad_namespaces {
            sink.raw(b"<bad-namespace>")?;
            sink.text(namespace.as_bytes())?;
            sink.raw(b"</bad-namespace>")?;
        }

        for fragment in &error.info {
            sink.raw(fragment.as_bytes())?;
        }

        sink.raw(b"</error-info>")?;
    }

    sink.raw(b"</rpc-error>")
}

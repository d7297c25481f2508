//! Caller-constructed client and server contexts.
//!
//! Everything the original kept in process-wide options lives here instead:
//! contexts are plain values handed to the session constructors, and the
//! server's session-id allocator is an atomic on its context.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use netconf_proto::{CAP_BASE_10, CAP_BASE_11};

use crate::{HELLO_TIMEOUT, READ_TIMEOUT};

fn base_capabilities() -> Vec<String> {
    vec![CAP_BASE_10.to_owned(), CAP_BASE_11.to_owned()]
}

/// Settings shared by every client session created from this context.
#[derive(Debug, Clone)]
pub struct ClientContext {
    /// Capabilities advertised in the client hello.
    pub capabilities: Vec<String>,
    /// Deadline for the peer hello to arrive.
    pub hello_timeout: Duration,
    /// Per-message read budget.
    pub read_timeout: Duration,
    /// Ceiling on a single inbound message; unlimited when `None`.
    pub max_message_size: Option<usize>,
}

impl Default for ClientContext {
    fn default() -> Self {
        ClientContext {
            capabilities: base_capabilities(),
            hello_timeout: HELLO_TIMEOUT,
            read_timeout: READ_TIMEOUT,
            max_message_size: None,
        }
    }
}

impl ClientContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_hello_timeout(mut self, timeout: Duration) -> Self {
        self.hello_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = Some(limit);
        self
    }
}

/// Settings shared by every server session created from this context, plus
/// the session-id allocator.
#[derive(Debug)]
pub struct ServerContext {
    /// Capabilities advertised in the server hello.
    pub capabilities: Vec<String>,
    /// Deadline for the client hello to arrive.
    pub hello_timeout: Duration,
    /// Per-message read budget.
    pub read_timeout: Duration,
    /// Ceiling on a single inbound message; unlimited when `None`.
    pub max_message_size: Option<usize>,
    next_session_id: AtomicU32,
}

impl Default for ServerContext {
    fn default() -> Self {
        ServerContext {
            capabilities: base_capabilities(),
            hello_timeout: HELLO_TIMEOUT,
            read_timeout: READ_TIMEOUT,
            max_message_size: None,
            next_session_id: AtomicU32::new(1),
        }
    }
}

impl ServerContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_hello_timeout(mut self, timeout: Duration) -> Self {
        self.hello_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = Some(limit);
        self
    }

    /// First session-id to hand out; subsequent sessions count up from it.
    #[must_use]
    pub fn with_session_id_start(self, start: u32) -> Self {
        self.next_session_id.store(start, Ordering::Relaxed);
        self
    }

    /// Allocate the next session-id.
    pub fn assign_session_id(&self) -> u32 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }
}

//! Error types and the per-status fallback handler registry.
//!
//! All dispatch failures are values of [`SluiceError`]. The dispatcher
//! catches them once at the top level of [`Pipe::exec`](crate::Pipe::exec):
//! a registered fallback handler for the matching status code fully replaces
//! the failure path; otherwise the error is logged or propagated according
//! to the configured [`ErrorPolicy`](crate::ErrorPolicy).

use std::collections::HashMap;
use std::fmt;

use crate::route::Handler;

/// Errors raised by request building and dispatch.
#[derive(Debug)]
pub enum SluiceError {
    /// The request method token did not map to a known method.
    ///
    /// Recoverable via a registered 500 handler; otherwise fatal.
    UnsupportedMethod {
        /// The raw method token from the transport, if any.
        token: String,
    },
    /// No route pattern matched in any table at any router level reached.
    ///
    /// Recoverable via a registered 404 handler; otherwise fatal.
    NotFound {
        /// The request path that failed to match.
        path: String,
    },
    /// A handler registration is structurally invalid.
    ///
    /// This is a configuration bug at setup time, never swallowed.
    MalformedAction {
        /// What was wrong with the registration.
        detail: String,
    },
    /// URI building was invoked without both a pattern and a concrete URI.
    UriBuild,
    /// A response status code outside the registered code table.
    UnknownStatusCode {
        /// The offending code.
        code: u16,
    },
    /// The outbound writer failed to deliver the response.
    Transport {
        /// Transport-level failure description.
        message: String,
    },
    /// A route or error handler failed while producing its response.
    Handler {
        /// Handler-level failure description.
        message: String,
    },
}

impl SluiceError {
    /// Create a handler failure from any displayable error.
    pub fn handler(err: impl fmt::Display) -> Self {
        Self::Handler {
            message: err.to_string(),
        }
    }

    /// The status code whose fallback handler may recover this failure.
    #[must_use]
    pub fn fallback_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            _ => 500,
        }
    }

    /// Whether a registered fallback handler may recover this failure.
    ///
    /// Configuration bugs and transport failures are always fatal; they
    /// indicate programmer or infrastructure error, not request error.
    #[must_use]
    pub fn recoverable(&self) -> bool {
        !matches!(
            self,
            Self::MalformedAction { .. } | Self::UriBuild | Self::Transport { .. }
        )
    }
}

impl fmt::Display for SluiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedMethod { token } => {
                write!(f, "unsupported request method: \"{token}\"")
            }
            Self::NotFound { path } => write!(f, "no route found for \"{path}\""),
            Self::MalformedAction { detail } => write!(f, "malformed route action: {detail}"),
            Self::UriBuild => write!(
                f,
                "cannot build the request URI: either the pattern or the uri is not set"
            ),
            Self::UnknownStatusCode { code } => {
                write!(f, "unregistered response status code: \"{code}\"")
            }
            Self::Transport { message } => write!(f, "transport failure: {message}"),
            Self::Handler { message } => write!(f, "handler failure: {message}"),
        }
    }
}

impl std::error::Error for SluiceError {}

/// Per-status-code fallback handlers, consulted when normal dispatch fails.
///
/// Mounted sub-routers receive the parent's entries for codes they do not
/// already define; a child entry always wins on conflict.
#[derive(Clone, Default)]
pub struct ErrorRegistry {
    handlers: HashMap<u16, Handler>,
}

impl ErrorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fallback handler for a status code, replacing any
    /// previous entry for that code.
    pub fn register(&mut self, code: u16, handler: Handler) {
        self.handlers.insert(code, handler);
    }

    /// Look up the fallback handler for a status code.
    #[must_use]
    pub fn resolve(&self, code: u16) -> Option<&Handler> {
        self.handlers.get(&code)
    }

    /// Copy parent entries for codes this registry does not define.
    pub fn merge_missing_from(&mut self, parent: &ErrorRegistry) {
        for (code, handler) in &parent.handlers {
            self.handlers
                .entry(*code)
                .or_insert_with(|| handler.clone());
        }
    }

    /// Number of registered fallback handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no fallback handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for ErrorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut codes: Vec<u16> = self.handlers.keys().copied().collect();
        codes.sort_unstable();
        f.debug_struct("ErrorRegistry").field("codes", &codes).finish()
    }
}

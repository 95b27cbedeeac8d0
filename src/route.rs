//! Route handlers and the per-method route tables.
//!
//! A [`Handler`] is resolved to a concrete callable shape at registration
//! time, either a plain function/closure or a [`RouteAction`] object,
//! so dispatch never inspects the handler's structure. Tables keep
//! insertion order; lookup scans in that order and the first matching
//! pattern wins.

use std::fmt;
use std::sync::Arc;

use crate::error::SluiceError;
use crate::request::Request;
use crate::response::Response;
use crate::uri::RequestUri;

/// An object-shaped route endpoint.
///
/// Implement this when a handler carries state or is one of several
/// entry points on the same type; plain closures go through
/// [`Handler::function`] instead.
pub trait RouteAction: Send + Sync {
    /// Handle a dispatched request.
    fn execute(&self, request: &mut Request) -> Result<Response, SluiceError>;
}

type HandlerFn = dyn Fn(&mut Request) -> Result<Response, SluiceError> + Send + Sync;

/// A registered route endpoint with its shape resolved.
#[derive(Clone)]
pub enum Handler {
    /// A plain function or closure.
    Function(Arc<HandlerFn>),
    /// An object implementing [`RouteAction`].
    Action(Arc<dyn RouteAction>),
}

impl Handler {
    /// Wrap a function or closure.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&mut Request) -> Result<Response, SluiceError> + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }

    /// Wrap a [`RouteAction`] object.
    pub fn action<A: RouteAction + 'static>(action: A) -> Self {
        Self::Action(Arc::new(action))
    }

    /// Invoke the endpoint.
    pub fn invoke(&self, request: &mut Request) -> Result<Response, SluiceError> {
        match self {
            Self::Function(f) => f(request),
            Self::Action(a) => a.execute(request),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(_) => f.write_str("Handler::Function"),
            Self::Action(_) => f.write_str("Handler::Action"),
        }
    }
}

/// Conversion into a [`Handler`] at registration time.
///
/// Lets registration methods accept closures and prebuilt handlers
/// interchangeably.
pub trait IntoHandler {
    /// Resolve to a concrete handler.
    fn into_handler(self) -> Handler;
}

impl IntoHandler for Handler {
    fn into_handler(self) -> Handler {
        self
    }
}

impl<F> IntoHandler for F
where
    F: Fn(&mut Request) -> Result<Response, SluiceError> + Send + Sync + 'static,
{
    fn into_handler(self) -> Handler {
        Handler::function(self)
    }
}

/// An insertion-ordered pattern-to-handler table.
///
/// Re-registering an existing pattern replaces its handler in place, so a
/// route's priority is fixed by its first registration.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<(String, Handler)>,
}

impl RouteTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pattern. Replaces in place if the pattern already exists.
    pub fn register(&mut self, pattern: impl Into<String>, handler: Handler) {
        let pattern = pattern.into();
        match self.entries.iter_mut().find(|(p, _)| *p == pattern) {
            Some(entry) => entry.1 = handler,
            None => self.entries.push((pattern, handler)),
        }
    }

    /// Find the first pattern matching a concrete path, in insertion order.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<(&str, &Handler)> {
        self.entries
            .iter()
            .find(|(pattern, _)| RequestUri::is_match(pattern, path))
            .map(|(pattern, handler)| (pattern.as_str(), handler))
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Handler)> {
        self.entries
            .iter()
            .map(|(pattern, handler)| (pattern.as_str(), handler))
    }

    /// Number of registered patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no patterns are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Middleware hooks around dispatch.
//!
//! Middleware sees the request after it is built but before the handler
//! runs, and the response after the handler but before it is written. A
//! router's chain runs in registration order; a mounted sub-router inherits
//! its parent's chain with the parent's entries first, so outer middleware
//! always brackets inner middleware.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::request::Request;
use crate::response::Response;
use crate::uri::RequestUri;

/// Hooks invoked around route execution.
///
/// Both hooks default to no-ops so implementors override only the side
/// they care about.
pub trait Middleware: Send + Sync {
    /// Runs after the request is built, before the handler.
    fn before_execute(&self, request: &mut Request) {
        let _ = request;
    }

    /// Runs after the handler, before the response is written.
    fn before_send(&self, response: &mut Response) {
        let _ = response;
    }
}

type RequestHook = dyn Fn(&mut Request) + Send + Sync;
type ResponseHook = dyn Fn(&mut Response) + Send + Sync;

/// Closure-based middleware for the common case where implementing the
/// trait is overkill.
#[derive(Default)]
pub struct MiddlewareWrapper {
    on_before_execute: Option<Box<RequestHook>>,
    on_before_send: Option<Box<ResponseHook>>,
}

impl MiddlewareWrapper {
    /// Create a wrapper with no hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request-side hook.
    #[must_use]
    pub fn on_before_execute<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Request) + Send + Sync + 'static,
    {
        self.on_before_execute = Some(Box::new(f));
        self
    }

    /// Set the response-side hook.
    #[must_use]
    pub fn on_before_send<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Response) + Send + Sync + 'static,
    {
        self.on_before_send = Some(Box::new(f));
        self
    }
}

impl Middleware for MiddlewareWrapper {
    fn before_execute(&self, request: &mut Request) {
        if let Some(hook) = &self.on_before_execute {
            hook(request);
        }
    }

    fn before_send(&self, response: &mut Response) {
        if let Some(hook) = &self.on_before_send {
            hook(response);
        }
    }
}

impl fmt::Debug for MiddlewareWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareWrapper")
            .field("on_before_execute", &self.on_before_execute.is_some())
            .field("on_before_send", &self.on_before_send.is_some())
            .finish()
    }
}

/// Middleware restricted to requests whose path matches a route pattern.
///
/// The response hook has no request in scope, so the path decision made in
/// [`Middleware::before_execute`] is remembered for the matching
/// [`Middleware::before_send`] of the same dispatch. Dispatch is
/// single-threaded per request, which keeps the remembered flag coherent.
pub struct ConditionalMiddleware {
    pattern: String,
    inner: Arc<dyn Middleware>,
    matched: AtomicBool,
}

impl ConditionalMiddleware {
    /// Restrict `inner` to paths matching `pattern`.
    pub fn new(pattern: impl Into<String>, inner: Arc<dyn Middleware>) -> Self {
        Self {
            pattern: pattern.into(),
            inner,
            matched: AtomicBool::new(false),
        }
    }

    /// The restricting pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl Middleware for ConditionalMiddleware {
    fn before_execute(&self, request: &mut Request) {
        let matched = request
            .uri()
            .uri()
            .is_some_and(|path| RequestUri::is_match(&self.pattern, path));
        self.matched.store(matched, Ordering::Relaxed);
        if matched {
            self.inner.before_execute(request);
        }
    }

    fn before_send(&self, response: &mut Response) {
        if self.matched.load(Ordering::Relaxed) {
            self.inner.before_send(response);
        }
    }
}

impl fmt::Debug for ConditionalMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalMiddleware")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// An ordered middleware chain.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    entries: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware.
    pub fn add(&mut self, middleware: Arc<dyn Middleware>) {
        self.entries.push(middleware);
    }

    /// Run every request-side hook in order.
    pub fn before_execute(&self, request: &mut Request) {
        for middleware in &self.entries {
            middleware.before_execute(request);
        }
    }

    /// Run every response-side hook in order.
    pub fn before_send(&self, response: &mut Response) {
        for middleware in &self.entries {
            middleware.before_send(response);
        }
    }

    /// Prepend the parent's middleware not already present in this chain,
    /// keeping the parent's order. Presence is identity, not equality: the
    /// same `Arc` added to both chains is not duplicated.
    pub fn inherit(&mut self, parent: &MiddlewareChain) {
        let mut inherited: Vec<Arc<dyn Middleware>> = Vec::new();
        for entry in &parent.entries {
            if !self.entries.iter().any(|own| Arc::ptr_eq(own, entry)) {
                inherited.push(Arc::clone(entry));
            }
        }
        inherited.append(&mut self.entries);
        self.entries = inherited;
    }

    /// Number of middleware in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("len", &self.entries.len())
            .finish()
    }
}

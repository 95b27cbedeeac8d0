//! The router/dispatcher.
//!
//! A [`Pipe`] owns per-method route tables, an always-checked any-method
//! table, a middleware chain, a per-status error registry, mounted
//! sub-pipes and mounted route maps. Dispatch resolves the deepest mounted
//! sub-pipe whose mount pattern prefixes the request path (mount order,
//! first match wins, no backtracking), then tries route maps, then scans
//! the route tables in insertion order against absolute patterns built
//! with [`make_uri`].
//!
//! # Design Principles
//!
//! - One dispatch attempt per request per router level; no retries
//! - Failures are caught once per level: a registered fallback handler for
//!   the failure's status code replaces the failure path, everything else
//!   bubbles to the caller of [`Pipe::run`] per the configured policy
//! - Mounting is a snapshot: the parent's error handlers and middleware
//!   are merged into the child exactly once, at mount time
//!
//! # Example
//!
//! ```
//! use sluice::{Pipe, Request, Response};
//! use sluice::testing::{BufferWriter, TestSource};
//!
//! let mut api = Pipe::new();
//! api.get("/status", |_req: &mut Request| Ok(Response::new().text("ok")));
//!
//! let mut root = Pipe::new();
//! root.pipe("/api", api);
//!
//! let mut writer = BufferWriter::new();
//! root.run(&TestSource::get("/api/status"), &mut writer).unwrap();
//! assert_eq!(writer.text(), "ok");
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ErrorPolicy, RouteMapErrorPolicy, SluiceConfig};
use crate::error::{ErrorRegistry, SluiceError};
use crate::middleware::{ConditionalMiddleware, Middleware, MiddlewareChain};
use crate::request::{Method, Request, RequestSource};
use crate::response::{Response, ResponseStatus, ResponseWriter};
use crate::route::{Handler, IntoHandler, RouteAction, RouteTable};
use crate::route_map::RouteMap;
use crate::uri::{self, make_uri, RequestUri};

/// How a dispatch concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A route, route-map or sub-pipe handler produced the response.
    Handled,
    /// Normal dispatch failed and a registered fallback handler produced
    /// the response instead.
    ErrorHandled,
    /// Dispatch failed, no fallback handler was registered, and the
    /// configured policy was to log rather than raise. Nothing was written.
    Failed,
}

/// A dispatch result on its way out, before the response is written.
struct Dispatched {
    response: Response,
    recovered: bool,
}

/// A mountable router handling a URI sub-tree.
#[derive(Debug, Default)]
pub struct Pipe {
    config: SluiceConfig,
    base_uri: String,
    middleware: MiddlewareChain,
    tables: HashMap<Method, RouteTable>,
    any_table: RouteTable,
    errors: ErrorRegistry,
    pipes: Vec<(String, Pipe)>,
    maps: Vec<(String, RouteMap)>,
}

impl Pipe {
    /// Create a router with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a router with an explicit configuration.
    #[must_use]
    pub fn with_config(config: SluiceConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// The router's configuration.
    #[must_use]
    pub fn config(&self) -> &SluiceConfig {
        &self.config
    }

    /// Replace the router's configuration.
    pub fn set_config(&mut self, config: SluiceConfig) {
        self.config = config;
    }

    /// The base URI all route patterns are resolved under.
    #[must_use]
    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// Set the base URI, for applications served under a path prefix.
    pub fn set_base_uri(&mut self, base_uri: impl Into<String>) {
        self.base_uri = base_uri.into();
    }

    /// Register a route for one method.
    pub fn route(
        &mut self,
        method: Method,
        pattern: impl Into<String>,
        handler: impl IntoHandler,
    ) -> &mut Self {
        self.tables
            .entry(method)
            .or_default()
            .register(pattern, handler.into_handler());
        self
    }

    /// Register a GET route.
    pub fn get(&mut self, pattern: impl Into<String>, handler: impl IntoHandler) -> &mut Self {
        self.route(Method::Get, pattern, handler)
    }

    /// Register a POST route.
    pub fn post(&mut self, pattern: impl Into<String>, handler: impl IntoHandler) -> &mut Self {
        self.route(Method::Post, pattern, handler)
    }

    /// Register a PUT route.
    pub fn put(&mut self, pattern: impl Into<String>, handler: impl IntoHandler) -> &mut Self {
        self.route(Method::Put, pattern, handler)
    }

    /// Register a DELETE route.
    pub fn delete(&mut self, pattern: impl Into<String>, handler: impl IntoHandler) -> &mut Self {
        self.route(Method::Delete, pattern, handler)
    }

    /// Register a HEAD route.
    pub fn head(&mut self, pattern: impl Into<String>, handler: impl IntoHandler) -> &mut Self {
        self.route(Method::Head, pattern, handler)
    }

    /// Register a PATCH route.
    pub fn patch(&mut self, pattern: impl Into<String>, handler: impl IntoHandler) -> &mut Self {
        self.route(Method::Patch, pattern, handler)
    }

    /// Register an OPTIONS route.
    pub fn options(&mut self, pattern: impl Into<String>, handler: impl IntoHandler) -> &mut Self {
        self.route(Method::Options, pattern, handler)
    }

    /// Register a route matched regardless of method. The any-method table
    /// is consulted after the method-specific table.
    pub fn request(&mut self, pattern: impl Into<String>, handler: impl IntoHandler) -> &mut Self {
        self.any_table.register(pattern, handler.into_handler());
        self
    }

    /// Register a fallback handler for a status code.
    pub fn error(&mut self, code: u16, handler: impl IntoHandler) -> &mut Self {
        self.errors.register(code, handler.into_handler());
        self
    }

    /// Append a middleware to this router's chain.
    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middleware.add(middleware);
        self
    }

    /// Register a route whose action also carries middleware hooks.
    ///
    /// The action handles every method on `pattern`, and its hooks run only
    /// for requests whose path matches `pattern`: they are installed
    /// behind a [`ConditionalMiddleware`] guard, evaluated per dispatch.
    pub fn use_route<T>(&mut self, pattern: impl Into<String>, action: Arc<T>) -> &mut Self
    where
        T: RouteAction + Middleware + 'static,
    {
        let pattern = pattern.into();
        let hooks: Arc<dyn Middleware> = action.clone();
        self.middleware
            .add(Arc::new(ConditionalMiddleware::new(pattern.clone(), hooks)));
        self.any_table.register(pattern, Handler::Action(action));
        self
    }

    /// Mount a sub-router under a base pattern.
    ///
    /// The parent's error handlers and middleware are merged into the child
    /// here, once: the child keeps its own entries on conflict, inherited
    /// middleware runs before the child's own, and parent registrations
    /// made after this call do not reach the child.
    pub fn pipe(&mut self, base_uri: impl Into<String>, mut child: Pipe) -> &mut Self {
        child.errors.merge_missing_from(&self.errors);
        child.middleware.inherit(&self.middleware);
        self.pipes.push((base_uri.into(), child));
        self
    }

    /// Mount a route map under a base pattern.
    pub fn map(&mut self, base_uri: impl Into<String>, map: RouteMap) -> &mut Self {
        self.maps.push((base_uri.into(), map));
        self
    }

    /// Build a request from the source and dispatch it, writing the
    /// response through the writer.
    ///
    /// # Errors
    ///
    /// Dispatch failures that no fallback handler recovered, when the
    /// configured [`ErrorPolicy`] is `Propagate`; writer failures always.
    pub fn run<S, W>(&self, source: &S, writer: &mut W) -> Result<DispatchOutcome, SluiceError>
    where
        S: RequestSource + ?Sized,
        W: ResponseWriter + ?Sized,
    {
        let mut request = Request::new();
        request.build_from(source, &self.config)?;
        self.exec(&mut request, writer)
    }

    /// Dispatch an already-built request.
    pub fn exec<W>(&self, request: &mut Request, writer: &mut W) -> Result<DispatchOutcome, SluiceError>
    where
        W: ResponseWriter + ?Sized,
    {
        match self.dispatch(request, &self.base_uri, &self.config) {
            Ok(dispatched) => {
                let recovered = dispatched.recovered;
                self.finish(dispatched.response, writer)?;
                Ok(if recovered {
                    DispatchOutcome::ErrorHandled
                } else {
                    DispatchOutcome::Handled
                })
            }
            Err(err) => match self.config.error_policy {
                ErrorPolicy::Propagate => Err(err),
                ErrorPolicy::Log => {
                    self.config.error_logger.log(&err.to_string());
                    Ok(DispatchOutcome::Failed)
                }
            },
        }
    }

    /// One dispatch attempt at this router level, including the per-level
    /// fallback-handler catch.
    fn dispatch(
        &self,
        request: &mut Request,
        base: &str,
        config: &SluiceConfig,
    ) -> Result<Dispatched, SluiceError> {
        let path = request.uri().uri().unwrap_or("/").to_string();

        // Sub-pipes first: once one matches, this level's tables are never
        // consulted for the request.
        for (mount, child) in &self.pipes {
            let full = make_uri(&[base, mount]);
            if uri::match_prefix(&full, &path).is_some() {
                log::debug!("delegating \"{path}\" to sub-pipe mounted at \"{full}\"");
                return child.dispatch(request, &full, config);
            }
        }

        match self.attempt(request, base, &path, config) {
            Ok(dispatched) => Ok(dispatched),
            Err(err) if err.recoverable() => {
                let code = err.fallback_code();
                let Some(handler) = self.errors.resolve(code) else {
                    return Err(err);
                };
                log::debug!("recovering failed dispatch of \"{path}\" via {code} handler: {err}");
                let mut response = handler.invoke(request)?;
                if response.status().code() == 200 {
                    if let Ok(status) = ResponseStatus::new(code) {
                        response = response.with_status(status);
                    }
                }
                self.middleware.before_send(&mut response);
                Ok(Dispatched {
                    response,
                    recovered: true,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Route maps, then the route tables.
    fn attempt(
        &self,
        request: &mut Request,
        base: &str,
        path: &str,
        config: &SluiceConfig,
    ) -> Result<Dispatched, SluiceError> {
        if let Some(result) = self.try_maps(request, base, path) {
            match result {
                Ok(response) => {
                    return Ok(Dispatched {
                        response,
                        recovered: false,
                    })
                }
                Err(err) => match config.route_map_error_policy {
                    RouteMapErrorPolicy::Ignore => {}
                    RouteMapErrorPolicy::Log => {
                        config.error_logger.log(&format!("route map failure: {err}"));
                    }
                    RouteMapErrorPolicy::Propagate => return Err(err),
                },
            }
        }

        let response = self.dispatch_tables(request, base, path)?;
        Ok(Dispatched {
            response,
            recovered: false,
        })
    }

    /// Try every mounted route map in mount order. `None` means no map
    /// claimed the path and dispatch falls through to the route tables;
    /// a failed bound handler also falls through under the `Ignore` and
    /// `Log` policies.
    fn try_maps(
        &self,
        request: &mut Request,
        base: &str,
        path: &str,
    ) -> Option<Result<Response, SluiceError>> {
        for (mount, map) in &self.maps {
            let full = make_uri(&[base, mount]);
            let Some(prefix_len) = uri::match_prefix(&full, path) else {
                continue;
            };
            let mut segments = path[prefix_len..].split('/').filter(|s| !s.is_empty());
            let Some(name) = segments.next() else {
                continue;
            };
            let Some(handler) = map.resolve(name) else {
                continue;
            };
            let args: Vec<&str> = segments.collect();
            log::debug!("route map at \"{full}\" dispatching \"{name}\" with {} args", args.len());

            let handler = Arc::clone(handler);
            self.middleware.before_execute(request);
            let result = handler(request, &args).map(|mut response| {
                self.middleware.before_send(&mut response);
                response
            });
            return Some(result);
        }
        None
    }

    /// Steps through the method table then the any-method table, scanning
    /// each in insertion order against absolute patterns.
    fn dispatch_tables(
        &self,
        request: &mut Request,
        base: &str,
        path: &str,
    ) -> Result<Response, SluiceError> {
        if request.method() == Method::Unknown {
            return Err(SluiceError::UnsupportedMethod {
                token: request.method_token().to_string(),
            });
        }

        let found = self
            .tables
            .get(&request.method())
            .and_then(|table| Self::find_absolute(table, base, path))
            .or_else(|| Self::find_absolute(&self.any_table, base, path));

        let Some((pattern, handler)) = found else {
            return Err(SluiceError::NotFound {
                path: path.to_string(),
            });
        };

        log::debug!("{} \"{path}\" matched \"{pattern}\"", request.method());
        request.uri_mut().set_pattern(&pattern);
        request.uri_mut().build()?;

        self.middleware.before_execute(request);
        let mut response = handler.invoke(request)?;
        self.middleware.before_send(&mut response);
        Ok(response)
    }

    /// First entry whose absolute pattern matches the path.
    fn find_absolute(table: &RouteTable, base: &str, path: &str) -> Option<(String, Handler)> {
        table.iter().find_map(|(pattern, handler)| {
            let absolute = make_uri(&[base, pattern]);
            RequestUri::is_match(&absolute, path).then(|| (absolute, handler.clone()))
        })
    }

    /// Finalize the response and hand it to the writer: a charset is
    /// appended to the Content-Type only when the handler did not set one.
    fn finish<W>(&self, mut response: Response, writer: &mut W) -> Result<(), SluiceError>
    where
        W: ResponseWriter + ?Sized,
    {
        if let Some(content_type) = response.header().get("Content-Type").map(str::to_string) {
            if !content_type.to_ascii_lowercase().contains("charset=") {
                response.header_mut().set(
                    "Content-Type",
                    format!("{content_type}; charset={}", self.config.default_charset),
                );
            }
        }
        writer.write(response.status(), response.header(), response.body())
    }
}

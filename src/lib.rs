//! Core types and traits for sluice, a URL routing framework.
//!
//! This crate provides the fundamental building blocks:
//! - [`Request`] and [`Response`] types with ordered header and data maps
//! - [`RequestUri`] pattern matching with `:name` path parameters
//! - [`Pipe`], the router/dispatcher with nested sub-routers, middleware
//!   and per-status error handlers
//! - [`RouteMap`], a secondary path-segment-to-handler dispatch mechanism
//!
//! # Design Principles
//!
//! - No runtime reflection: handler shapes are resolved at registration time
//! - Explicit context passing: one [`Request`] value per incoming request,
//!   threaded through every call, no process-wide singletons
//! - First match wins: route tables are scanned in insertion order
//! - Transport-agnostic: the inbound side is a [`RequestSource`], the
//!   outbound side a [`ResponseWriter`]; the core never touches sockets
//!
//! # Example
//!
//! ```
//! use sluice::{Pipe, Request, Response};
//! use sluice::testing::{BufferWriter, TestSource};
//!
//! let mut pipe = Pipe::new();
//! pipe.get("/users/:id", |req: &mut Request| {
//!     let id = req.uri().param("id").unwrap_or_default().to_string();
//!     Ok(Response::new().text(format!("user {id}")))
//! });
//!
//! let source = TestSource::get("/users/42");
//! let mut writer = BufferWriter::new();
//! pipe.run(&source, &mut writer).unwrap();
//! assert_eq!(writer.text(), "user 42");
//! ```

#![forbid(unsafe_code)]
// Pedantic clippy lints allowed (style suggestions, not correctness issues)
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::single_match_else)]

pub mod config;
pub mod error;
pub mod middleware;
pub mod pipe;
pub mod request;
pub mod response;
pub mod route;
pub mod route_map;
pub mod testing;
pub mod uri;

pub use config::{DefaultErrorLogger, ErrorLogger, ErrorPolicy, RouteMapErrorPolicy, SluiceConfig};
pub use error::{ErrorRegistry, SluiceError};
pub use middleware::{ConditionalMiddleware, Middleware, MiddlewareChain, MiddlewareWrapper};
pub use pipe::{DispatchOutcome, Pipe};
pub use request::{Body, Headers, Method, Request, RequestData, RequestSource, RequestState};
pub use response::{Response, ResponseHeader, ResponseStatus, ResponseWriter};
pub use route::{Handler, IntoHandler, RouteAction, RouteTable};
pub use route_map::{MapHandlerFn, RouteMap};
pub use uri::{make_uri, RequestUri};

//! Segment-name secondary dispatch.
//!
//! A [`RouteMap`] is an explicit bind table consulted before the route
//! tables: when a request path falls under the map's mount point, the first
//! path segment past the mount selects a bound handler by name and the
//! remaining segments are handed to it as positional arguments. Names that
//! resolve to nothing fall through to the primary route tables, so a map
//! never shadows ordinary routes.

use std::fmt;
use std::sync::Arc;

use crate::error::SluiceError;
use crate::request::Request;
use crate::response::Response;

/// The callable shape of a route-map binding: the request plus the path
/// segments remaining after the selector segment.
pub type MapHandlerFn =
    dyn Fn(&mut Request, &[&str]) -> Result<Response, SluiceError> + Send + Sync;

/// A name-to-handler bind table mounted under one base path.
#[derive(Clone, Default)]
pub struct RouteMap {
    bindings: Vec<(String, Arc<MapHandlerFn>)>,
}

impl RouteMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a segment name to a handler, replacing an existing binding for
    /// the same name in place.
    ///
    /// # Errors
    ///
    /// Returns [`SluiceError::MalformedAction`] when the name is empty or
    /// spans segments; both are registration-time configuration bugs.
    pub fn bind<F>(&mut self, name: impl Into<String>, handler: F) -> Result<&mut Self, SluiceError>
    where
        F: Fn(&mut Request, &[&str]) -> Result<Response, SluiceError> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(SluiceError::MalformedAction {
                detail: "route map bind name is empty".to_string(),
            });
        }
        if name.contains('/') {
            return Err(SluiceError::MalformedAction {
                detail: format!("route map bind name \"{name}\" spans path segments"),
            });
        }

        let handler: Arc<MapHandlerFn> = Arc::new(handler);
        match self.bindings.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = handler,
            None => self.bindings.push((name, handler)),
        }
        Ok(self)
    }

    /// Look up a binding by segment name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&Arc<MapHandlerFn>> {
        self.bindings
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, handler)| handler)
    }

    /// Bound names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|(n, _)| n.as_str())
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns true if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl fmt::Debug for RouteMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.names().collect();
        f.debug_struct("RouteMap").field("names", &names).finish()
    }
}

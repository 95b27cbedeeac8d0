//! Dispatch configuration.
//!
//! Configuration is an explicit value handed to the router, not a global
//! singleton: construct one [`SluiceConfig`] per pipeline (tests build a
//! fresh one per case) and it is read-only during dispatch.

use std::fmt;
use std::sync::Arc;

/// What to do with a dispatch failure that no fallback handler recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Return the failure to the caller of `run()`.
    #[default]
    Propagate,
    /// Log the failure through the configured [`ErrorLogger`] and report
    /// the dispatch as failed without raising.
    Log,
}

/// What to do when a route-map handler fails.
///
/// The historical behavior is `Ignore`: a failed route-map call falls
/// through to the primary route tables without surfacing anything, so the
/// tables' own error handling is never masked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouteMapErrorPolicy {
    /// Swallow the failure and continue to the route tables.
    #[default]
    Ignore,
    /// Log the failure, then continue to the route tables.
    Log,
    /// Surface the failure to the top-level dispatch catch.
    Propagate,
}

/// Capability for reporting dispatch failures.
pub trait ErrorLogger: Send + Sync {
    /// Record one formatted failure message.
    fn log(&self, message: &str);
}

/// Error logger backed by the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorLogger;

impl ErrorLogger for DefaultErrorLogger {
    fn log(&self, message: &str) {
        log::error!("{message}");
    }
}

/// Read-only dispatch configuration.
#[derive(Clone)]
pub struct SluiceConfig {
    /// Whether the query component of the request URI is parsed into the
    /// request's parameter map.
    pub query_string_enabled: bool,
    /// Charset appended to outgoing Content-Type headers that lack one.
    pub default_charset: String,
    /// Handling of unrecovered dispatch failures.
    pub error_policy: ErrorPolicy,
    /// Handling of route-map handler failures.
    pub route_map_error_policy: RouteMapErrorPolicy,
    /// Sink for failure messages when a policy says to log.
    pub error_logger: Arc<dyn ErrorLogger>,
}

impl SluiceConfig {
    /// Create a configuration with the defaults: query strings enabled,
    /// utf-8 charset, failures propagated, route-map failures ignored.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable query-string parsing.
    #[must_use]
    pub fn query_string_enabled(mut self, enabled: bool) -> Self {
        self.query_string_enabled = enabled;
        self
    }

    /// Set the default response charset.
    #[must_use]
    pub fn default_charset(mut self, charset: impl Into<String>) -> Self {
        self.default_charset = charset.into();
        self
    }

    /// Set the unrecovered-failure policy.
    #[must_use]
    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Set the route-map failure policy.
    #[must_use]
    pub fn route_map_error_policy(mut self, policy: RouteMapErrorPolicy) -> Self {
        self.route_map_error_policy = policy;
        self
    }

    /// Replace the error logger.
    #[must_use]
    pub fn error_logger(mut self, logger: impl ErrorLogger + 'static) -> Self {
        self.error_logger = Arc::new(logger);
        self
    }
}

impl Default for SluiceConfig {
    fn default() -> Self {
        Self {
            query_string_enabled: true,
            default_charset: "utf-8".to_string(),
            error_policy: ErrorPolicy::default(),
            route_map_error_policy: RouteMapErrorPolicy::default(),
            error_logger: Arc::new(DefaultErrorLogger),
        }
    }
}

impl fmt::Debug for SluiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SluiceConfig")
            .field("query_string_enabled", &self.query_string_enabled)
            .field("default_charset", &self.default_charset)
            .field("error_policy", &self.error_policy)
            .field("route_map_error_policy", &self.route_map_error_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SluiceConfig::new();
        assert!(config.query_string_enabled);
        assert_eq!(config.default_charset, "utf-8");
        assert_eq!(config.error_policy, ErrorPolicy::Propagate);
        assert_eq!(config.route_map_error_policy, RouteMapErrorPolicy::Ignore);
    }

    #[test]
    fn builder_overrides_apply() {
        let config = SluiceConfig::new()
            .query_string_enabled(false)
            .default_charset("iso-8859-1")
            .error_policy(ErrorPolicy::Log)
            .route_map_error_policy(RouteMapErrorPolicy::Propagate);
        assert!(!config.query_string_enabled);
        assert_eq!(config.default_charset, "iso-8859-1");
        assert_eq!(config.error_policy, ErrorPolicy::Log);
        assert_eq!(config.route_map_error_policy, RouteMapErrorPolicy::Propagate);
    }
}

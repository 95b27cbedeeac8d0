//! Route pattern matching and request URI handling.
//!
//! A route pattern is a path template whose segments are either literals,
//! matched verbatim, or `:name` placeholders matching one path segment
//! (`[a-zA-Z0-9-_.]+`, no slashes). Patterns compile to anchored regular
//! expressions, lazily, and the compiled form is cached process-wide.
//!
//! Matching is tolerant of a single leading or trailing slash on the
//! concrete path: the match is attempted against the path with a trailing
//! slash added, without it, with the leading slash stripped, and raw;
//! first success wins. Paths arrive with or without a trailing slash
//! depending on transport normalization, so all four spellings extract
//! identical parameters.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::SluiceError;

/// Matches a `:name` placeholder inside a pattern.
static PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r":(\w+)").expect("valid param regex"));

/// Matches a segment consisting only of literal path characters.
static LITERAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-zA-Z0-9\-_\.]+)$").expect("valid literal regex"));

/// Matches absolute URIs that must not be re-rooted by [`RequestUri::set_uri`].
static SCHEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(http|ftp)s?://.+").expect("valid scheme regex"));

/// Process-wide cache of compiled anchored matchers, keyed by pattern.
///
/// An entry of `None` records a pattern whose regex form failed to compile;
/// such a pattern never matches anything.
static MATCHER_CACHE: Lazy<RwLock<HashMap<String, Option<Regex>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// What a path segment is captured as by the placeholder group.
const SEGMENT_GROUP: &str = r"([a-zA-Z0-9\-_\.]+)";

/// Translate a route pattern into its regular-expression source.
///
/// Only `:name` placeholders are rewritten; literal segments pass through
/// verbatim, exactly as the patterns were written.
#[must_use]
pub fn pattern_to_regex(pattern: &str) -> String {
    PARAM_RE.replace_all(pattern, SEGMENT_GROUP).into_owned()
}

/// The parameter names declared by a pattern, in declaration order.
#[must_use]
pub fn param_names(pattern: &str) -> Vec<String> {
    PARAM_RE
        .captures_iter(pattern)
        .map(|c| c[1].to_string())
        .collect()
}

/// Fetch (compiling and caching on first use) the anchored matcher for a
/// pattern. Returns `None` for patterns that are not valid regex source.
fn compiled(pattern: &str) -> Option<Regex> {
    if let Some(entry) = MATCHER_CACHE
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .get(pattern)
    {
        return entry.clone();
    }

    let anchored = format!("^{}$", pattern_to_regex(pattern));
    let compiled = Regex::new(&anchored).ok();
    MATCHER_CACHE
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .insert(pattern.to_string(), compiled.clone());
    compiled
}

/// The slash-variant spellings of a path that a match is attempted against.
fn match_candidates(uri: &str) -> [String; 4] {
    let trimmed = uri.trim_matches('/');
    [
        format!("/{trimmed}/"),
        format!("/{trimmed}"),
        trimmed.to_string(),
        uri.to_string(),
    ]
}

/// Matches a pattern against the leading segments of a path, returning the
/// byte length of the matched prefix.
///
/// The match stops at a segment boundary: `/api` is a prefix of
/// `/api/users` and of `/api` itself, but not of `/apix`. Used for
/// resolving mounted sub-routers and route maps, whose mount patterns may
/// contain placeholders.
pub(crate) fn match_prefix(pattern: &str, path: &str) -> Option<usize> {
    let rooted = make_uri(&[pattern]);
    if rooted == "/" {
        return Some(0);
    }
    let source = format!("^({})(?:/|$)", pattern_to_regex(&rooted));
    let re = Regex::new(&source).ok()?;
    re.captures(path)
        .map(|caps| caps.get(1).map_or(0, |m| m.end()))
}

/// Join URI parts with `/`, collapsing repeated slashes down to one and
/// stripping to a single leading slash.
#[must_use]
pub fn make_uri(parts: &[&str]) -> String {
    let mut joined = parts.join("/");
    while joined.contains("//") {
        joined = joined.replace("//", "/");
    }
    format!("/{}", joined.trim_matches('/'))
}

/// The structured, match-aware view of a request URI.
///
/// Holds the concrete path, the route pattern assigned by the dispatcher
/// after a successful table match, and the named parameters extracted by
/// [`RequestUri::build`]. The `built` flag records whether extraction ran.
#[derive(Debug, Clone, Default)]
pub struct RequestUri {
    pattern: Option<String>,
    uri: Option<String>,
    params: Vec<(String, String)>,
    built: bool,
}

impl RequestUri {
    /// Create an empty URI holder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks whether a concrete path satisfies a pattern.
    ///
    /// The match is anchored at both ends and tried against each slash
    /// variant of the path; see the module docs.
    #[must_use]
    pub fn is_match(pattern: &str, uri: &str) -> bool {
        match compiled(pattern) {
            Some(re) => match_candidates(uri).iter().any(|c| re.is_match(c)),
            None => false,
        }
    }

    /// Checks if this URI is equal to the given one, ignoring case and
    /// surrounding slashes.
    #[must_use]
    pub fn is(&self, uri: &str) -> bool {
        match &self.uri {
            Some(own) => own
                .trim_matches('/')
                .eq_ignore_ascii_case(uri.trim_matches('/')),
            None => false,
        }
    }

    /// Checks if this URI matches the given pattern.
    #[must_use]
    pub fn matches(&self, pattern: &str) -> bool {
        match &self.uri {
            Some(uri) => Self::is_match(pattern, uri),
            None => false,
        }
    }

    /// Assign the route pattern this URI was matched by.
    pub fn set_pattern(&mut self, pattern: impl Into<String>) -> &mut Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Assign the concrete path.
    ///
    /// Scheme-qualified URIs are stored verbatim; everything else is
    /// re-rooted to a single leading slash with no trailing slash.
    pub fn set_uri(&mut self, uri: impl Into<String>) -> &mut Self {
        let uri = uri.into();
        if SCHEME_RE.is_match(&uri) {
            self.uri = Some(uri);
        } else {
            self.uri = Some(format!("/{}", uri.trim_matches('/')));
        }
        self
    }

    /// The concrete path, if set.
    #[must_use]
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// The matched route pattern, if set.
    #[must_use]
    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    /// The extracted parameters, in pattern-declaration order.
    #[must_use]
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Look up one extracted parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether parameter extraction has run.
    #[must_use]
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Extract the named parameters by matching the pattern against the
    /// concrete path.
    ///
    /// Requires both the pattern and the URI to be set, otherwise this is a
    /// programmer error surfaced as [`SluiceError::UriBuild`].
    ///
    /// When a pattern mixes literal-shaped parameter names with actual
    /// placeholders the regex scan can declare fewer names than the matcher
    /// captures values; a positional-recovery pass then re-walks the raw
    /// segments, skipping literal-shaped ones, assigning `:`-prefixed ones
    /// their declared name and anything else a synthetic index key. Kept
    /// for compatibility with existing route tables.
    pub fn build(&mut self) -> Result<(), SluiceError> {
        let (pattern, uri) = match (&self.pattern, &self.uri) {
            (Some(p), Some(u)) => (p.clone(), u.clone()),
            _ => {
                self.built = false;
                return Err(SluiceError::UriBuild);
            }
        };

        let values = self.capture_values(&pattern, &uri);
        let names = param_names(&pattern);

        if names.is_empty() {
            // No declared parameters: captured values keep positional keys.
            self.params = values
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect();
        } else {
            let keys = if names.len() < values.len() {
                positional_recovery(&pattern, &names)
            } else {
                names
            };
            self.params = keys.into_iter().zip(values).collect();
        }

        self.built = true;
        Ok(())
    }

    /// Capture group values from the first slash variant that matches.
    fn capture_values(&self, pattern: &str, uri: &str) -> Vec<String> {
        let Some(re) = compiled(pattern) else {
            return Vec::new();
        };
        for candidate in match_candidates(uri) {
            if let Some(caps) = re.captures(&candidate) {
                return caps
                    .iter()
                    .skip(1)
                    .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect();
            }
        }
        Vec::new()
    }
}

impl fmt::Display for RequestUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uri.as_deref().unwrap_or(""))
    }
}

/// Re-derive parameter keys positionally from the raw pattern segments.
fn positional_recovery(pattern: &str, names: &[String]) -> Vec<String> {
    let mut keys = Vec::new();
    let mut count = 0usize;

    for segment in pattern.trim_matches('/').split('/') {
        if segment.is_empty() || LITERAL_RE.is_match(segment) {
            continue;
        }
        let declared = segment.trim_matches(':');
        if names.iter().any(|n| n == declared) {
            keys.push(declared.to_string());
        } else {
            keys.push(count.to_string());
        }
        count += 1;
    }

    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn literal_pattern_matches_exact_path() {
        assert!(RequestUri::is_match("/users", "/users"));
        assert!(!RequestUri::is_match("/users", "/items"));
    }

    #[test]
    fn matching_survives_a_poisoned_cache_lock() {
        let _ = std::thread::spawn(|| {
            let _guard = MATCHER_CACHE
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            panic!("poison the cache lock");
        })
        .join();

        assert!(RequestUri::is_match("/users/:id", "/users/7"));
    }

    #[test]
    fn matching_is_case_sensitive_on_literals() {
        assert!(!RequestUri::is_match("/Users", "/users"));
    }

    #[test]
    fn match_tolerates_single_leading_or_trailing_slash() {
        for uri in ["a/5", "/a/5/", "/a/5"] {
            assert!(RequestUri::is_match("/a/:id", uri), "failed for {uri}");
        }
    }

    #[test]
    fn param_segment_never_spans_slashes() {
        assert!(!RequestUri::is_match("/a/:id", "/a/5/6"));
    }

    #[test]
    fn extraction_identical_across_slash_variants() {
        for uri in ["a/5", "/a/5/", "/a/5"] {
            let mut ru = RequestUri::new();
            ru.set_pattern("/a/:id").set_uri(uri);
            ru.build().unwrap();
            assert_eq!(ru.params(), &[("id".to_string(), "5".to_string())]);
        }
    }

    #[test]
    fn extraction_preserves_declaration_order() {
        let mut ru = RequestUri::new();
        ru.set_pattern("/users/:uid/posts/:pid").set_uri("/users/7/posts/9");
        ru.build().unwrap();
        assert_eq!(
            ru.params(),
            &[
                ("uid".to_string(), "7".to_string()),
                ("pid".to_string(), "9".to_string()),
            ]
        );
        assert_eq!(ru.param("uid"), Some("7"));
        assert_eq!(ru.param("pid"), Some("9"));
        assert!(ru.is_built());
    }

    #[test]
    fn build_without_pattern_is_an_error() {
        let mut ru = RequestUri::new();
        ru.set_uri("/a/5");
        assert!(matches!(ru.build(), Err(SluiceError::UriBuild)));
        assert!(!ru.is_built());
    }

    #[test]
    fn build_without_uri_is_an_error() {
        let mut ru = RequestUri::new();
        ru.set_pattern("/a/:id");
        assert!(matches!(ru.build(), Err(SluiceError::UriBuild)));
    }

    #[test]
    fn make_uri_collapses_slashes_and_roots() {
        assert_eq!(make_uri(&["/api/", "/users/"]), "/api/users");
        assert_eq!(make_uri(&["", "a//b", "c"]), "/a/b/c");
        assert_eq!(make_uri(&[""]), "/");
    }

    #[test]
    fn set_uri_roots_relative_paths_and_keeps_absolute_uris() {
        let mut ru = RequestUri::new();
        ru.set_uri("a/b/");
        assert_eq!(ru.uri(), Some("/a/b"));

        ru.set_uri("https://example.com/a");
        assert_eq!(ru.uri(), Some("https://example.com/a"));
    }

    #[test]
    fn is_ignores_case_and_surrounding_slashes() {
        let mut ru = RequestUri::new();
        ru.set_uri("/Users/5");
        assert!(ru.is("users/5/"));
        assert!(!ru.is("users/6"));
    }

    #[test]
    fn invalid_regex_pattern_never_matches() {
        assert!(!RequestUri::is_match("/a/(unclosed", "/a/x"));
    }

    #[test]
    fn positional_recovery_assigns_synthetic_index_keys() {
        // "api" is literal-shaped and skipped, ":id" is declared; the raw
        // "(\d+)" group is neither and receives its running index as key.
        let keys = positional_recovery("/api/(\\d+)/:id", &["id".to_string()]);
        assert_eq!(keys, vec!["0".to_string(), "id".to_string()]);
    }

    #[test]
    fn root_pattern_matches_root_path() {
        assert!(RequestUri::is_match("/", "/"));
    }

    #[test]
    fn prefix_match_stops_at_segment_boundaries() {
        assert_eq!(match_prefix("/api", "/api/users"), Some(4));
        assert_eq!(match_prefix("/api", "/api"), Some(4));
        assert_eq!(match_prefix("/api", "/apix/users"), None);
        assert_eq!(match_prefix("/", "/anything"), Some(0));
    }

    #[test]
    fn prefix_match_resolves_placeholders() {
        assert_eq!(match_prefix("/users/:id", "/users/42/posts"), Some(9));
        assert_eq!(match_prefix("/users/:id", "/users"), None);
    }

    proptest! {
        #[test]
        fn extracted_param_count_equals_declared_count(
            a in "[a-z]{1,8}",
            b in "[a-z0-9]{1,8}",
            c in "[a-z0-9]{1,8}",
        ) {
            let pattern = format!("/{a}/:first/:second");
            let uri = format!("/{a}/{b}/{c}");
            let mut ru = RequestUri::new();
            ru.set_pattern(pattern).set_uri(uri);
            ru.build().unwrap();
            prop_assert_eq!(ru.params().len(), 2);
            prop_assert_eq!(ru.param("first"), Some(b.as_str()));
            prop_assert_eq!(ru.param("second"), Some(c.as_str()));
        }

        #[test]
        fn make_uri_always_has_single_leading_slash(parts in proptest::collection::vec("[a-z/]{0,6}", 1..4)) {
            let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
            let uri = make_uri(&refs);
            prop_assert!(uri.starts_with('/'));
            prop_assert!(!uri.contains("//"));
        }
    }
}

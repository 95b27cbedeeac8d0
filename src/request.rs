//! The structured view of one incoming request and its builder.
//!
//! A [`Request`] is built once from a [`RequestSource`], the opaque
//! transport collaborator, and is immutable-after-build except for the
//! pattern-match result attached by the dispatcher. Building walks a fixed
//! detection order (headers, method, URI, body, cookies): headers must be
//! known before the body because the content type drives body decoding.
//! The lifecycle state guards against re-detection: a second
//! [`Request::build_from`] call is a no-op once the request is built, even
//! if the underlying source changed in between.

use std::fmt;

use serde_json::Value;

use crate::config::SluiceConfig;
use crate::error::SluiceError;
use crate::uri::RequestUri;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    /// GET method.
    Get,
    /// POST method.
    Post,
    /// PUT method.
    Put,
    /// DELETE method.
    Delete,
    /// HEAD method.
    Head,
    /// PATCH method.
    Patch,
    /// OPTIONS method.
    Options,
    /// Any token that is not a recognized method.
    #[default]
    Unknown,
}

impl Method {
    /// Parse a method token, case-insensitively. Unrecognized or empty
    /// tokens map to [`Method::Unknown`].
    #[must_use]
    pub fn parse(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "get" => Self::Get,
            "post" => Self::Post,
            "put" => Self::Put,
            "delete" => Self::Delete,
            "head" => Self::Head,
            "patch" => Self::Patch,
            "options" => Self::Options,
            _ => Self::Unknown,
        }
    }

    /// The canonical uppercase method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Patch => "PATCH",
            Self::Options => "OPTIONS",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize a header name: split on `_` and `-`, title-case each part,
/// join with `-`. `CONTENT_TYPE` and `content-type` both become
/// `Content-Type`.
#[must_use]
pub fn normalize_header_name(name: &str) -> String {
    name.split(['_', '-'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Insertion-ordered header collection with case-insensitive lookup.
///
/// Names are normalized at insertion time; replacing a header keeps its
/// original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a header value by name (case-insensitive).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        let normalized = normalize_header_name(name);
        self.entries
            .iter()
            .find(|(k, _)| *k == normalized)
            .map(|(_, v)| v.as_str())
    }

    /// Set a header, replacing an existing entry in place.
    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let normalized = normalize_header_name(name.as_ref());
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == normalized) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((normalized, value)),
        }
    }

    /// Check if a header exists (case-insensitive).
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove a header by name, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let normalized = normalize_header_name(name);
        let idx = self.entries.iter().position(|(k, _)| *k == normalized)?;
        Some(self.entries.remove(idx).1)
    }

    /// Iterate over headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Insertion-ordered string-keyed parameter map.
///
/// Holds query parameters, decoded bodies and cookies. Values are
/// [`serde_json::Value`] so decoded JSON bodies keep their structure while
/// query parameters stay plain strings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestData {
    entries: Vec<(String, Value)>,
}

impl RequestData {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from string pairs, preserving order.
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut data = Self::new();
        for (k, v) in pairs {
            data.insert(k.into(), Value::String(v.into()));
        }
        data
    }

    /// Insert a value, replacing an existing key in place.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Look up a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Look up a value by key as a string slice, if it is a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Check for a key.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Request body.
///
/// Form, JSON and XML payloads decode to a structured map; anything else
/// stays raw and undecoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    /// No body (always the case for GET).
    #[default]
    Empty,
    /// Structured key-value body.
    Map(RequestData),
    /// Undecoded payload.
    Raw(Vec<u8>),
}

impl Body {
    /// Returns true if there is no usable payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Map(data) => data.is_empty(),
            Self::Raw(bytes) => bytes.is_empty(),
        }
    }

    /// The structured form, if this body decoded to one.
    #[must_use]
    pub fn as_map(&self) -> Option<&RequestData> {
        match self {
            Self::Map(data) => Some(data),
            _ => None,
        }
    }

    /// The raw bytes, if this body was left undecoded.
    #[must_use]
    pub fn as_raw(&self) -> Option<&[u8]> {
        match self {
            Self::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Build lifecycle of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestState {
    /// Nothing detected yet.
    #[default]
    Unbuilt,
    /// Headers copied from the source.
    HeadersDetected,
    /// Method token resolved.
    MethodDetected,
    /// URI split, normalized and stored.
    UriDetected,
    /// All detection steps done; further builds are no-ops.
    Built,
}

/// The inbound transport collaborator.
///
/// Supplies the raw facts the core consumes; the core never parses sockets
/// or handles connections.
pub trait RequestSource {
    /// The raw request method token, if the transport knows one.
    fn method_token(&self) -> Option<String>;
    /// The raw request target: path plus optional query string.
    fn raw_uri(&self) -> Option<String>;
    /// The script/base prefix to strip from the raw URI, if any.
    fn script_name(&self) -> Option<String> {
        None
    }
    /// Header enumeration, unordered names as the transport spells them.
    fn headers(&self) -> Vec<(String, String)>;
    /// The full raw body.
    fn body_bytes(&self) -> Vec<u8> {
        Vec::new()
    }
    /// Form fields the transport already decoded, if any.
    fn form_fields(&self) -> Option<Vec<(String, String)>> {
        None
    }
    /// Cookie enumeration.
    fn cookies(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// One incoming request.
#[derive(Debug, Clone, Default)]
pub struct Request {
    state: RequestState,
    method: Method,
    method_token: String,
    uri: RequestUri,
    params: RequestData,
    body: Body,
    cookies: RequestData,
    headers: Headers,
}

impl Request {
    /// Create an unbuilt request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The request method.
    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    /// Set the request method.
    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// The raw method token as the transport supplied it. Useful when the
    /// method resolved to [`Method::Unknown`].
    #[must_use]
    pub fn method_token(&self) -> &str {
        &self.method_token
    }

    /// The request URI, including the pattern-match result.
    #[must_use]
    pub fn uri(&self) -> &RequestUri {
        &self.uri
    }

    /// Mutable access to the URI; the dispatcher uses this to attach the
    /// matched pattern.
    pub fn uri_mut(&mut self) -> &mut RequestUri {
        &mut self.uri
    }

    /// Query parameters.
    #[must_use]
    pub fn params(&self) -> &RequestData {
        &self.params
    }

    /// Mutable query parameters (middleware may adjust them).
    pub fn params_mut(&mut self) -> &mut RequestData {
        &mut self.params
    }

    /// The request body.
    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Set the request body.
    pub fn set_body(&mut self, body: Body) {
        self.body = body;
    }

    /// Cookies, as a flat string map.
    #[must_use]
    pub fn cookies(&self) -> &RequestData {
        &self.cookies
    }

    /// The request headers.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable request headers (middleware may adjust them).
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Current build state.
    #[must_use]
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Whether the request finished building.
    #[must_use]
    pub fn is_built(&self) -> bool {
        self.state == RequestState::Built
    }

    /// Whether the request was made through `XMLHttpRequest`.
    #[must_use]
    pub fn is_ajax(&self) -> bool {
        self.headers
            .get("X-Requested-With")
            .is_some_and(|v| v.eq_ignore_ascii_case("xmlhttprequest"))
    }

    /// Build this request from a raw source.
    ///
    /// Idempotent: once built, subsequent calls return immediately without
    /// consulting the source again.
    pub fn build_from<S: RequestSource + ?Sized>(
        &mut self,
        source: &S,
        config: &SluiceConfig,
    ) -> Result<(), SluiceError> {
        if self.is_built() {
            return Ok(());
        }

        self.detect_headers(source);
        self.detect_method(source);
        self.detect_uri(source, config);
        self.detect_body(source);
        self.detect_cookies(source);

        self.state = RequestState::Built;
        Ok(())
    }

    fn detect_headers<S: RequestSource + ?Sized>(&mut self, source: &S) {
        for (name, value) in source.headers() {
            self.headers.set(name, value);
        }
        self.state = RequestState::HeadersDetected;
    }

    fn detect_method<S: RequestSource + ?Sized>(&mut self, source: &S) {
        self.method_token = source.method_token().unwrap_or_default();
        self.method = Method::parse(&self.method_token);
        self.state = RequestState::MethodDetected;
    }

    fn detect_uri<S: RequestSource + ?Sized>(&mut self, source: &S, config: &SluiceConfig) {
        let Some(raw) = source.raw_uri() else {
            self.uri.set_uri("/");
            self.state = RequestState::UriDetected;
            return;
        };

        let mut uri = raw;
        if let Some(script) = source.script_name() {
            if !script.is_empty() && uri.starts_with(&script) {
                uri = uri[script.len()..].to_string();
            } else {
                let dir = dirname(&script);
                if !dir.is_empty() && uri.starts_with(dir) {
                    uri = uri[dir.len()..].to_string();
                }
            }
        }

        // Query-string-in-path rewriting support.
        if let Some(stripped) = uri.strip_prefix("?/") {
            uri = stripped.to_string();
        }

        let (path, query) = match uri.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (uri, None),
        };

        if let Some(query) = query {
            if config.query_string_enabled {
                self.params = parse_url_encoded(&query);
            }
        }

        let path = path.trim();
        if path.is_empty() || path == "/" {
            self.uri.set_uri("/");
        } else {
            self.uri.set_uri(normalize_path(path));
        }
        self.state = RequestState::UriDetected;
    }

    fn detect_body<S: RequestSource + ?Sized>(&mut self, source: &S) {
        if self.method == Method::Get {
            self.body = Body::Empty;
            return;
        }

        // Transport-level pre-parsed form fields win when present.
        if let Some(fields) = source.form_fields() {
            if !fields.is_empty() {
                self.body = Body::Map(RequestData::from_pairs(fields));
                return;
            }
        }

        let bytes = source.body_bytes();
        if bytes.is_empty() {
            self.body = Body::Empty;
            return;
        }

        let content_type = self
            .headers
            .get("Content-Type")
            .unwrap_or("")
            .to_ascii_lowercase();

        self.body = if content_type.contains("application/json") {
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Object(map)) => {
                    let mut data = RequestData::new();
                    for (k, v) in map {
                        data.insert(k, v);
                    }
                    Body::Map(data)
                }
                _ => Body::Raw(bytes),
            }
        } else if content_type.contains("application/xml") || content_type.contains("text/xml") {
            match std::str::from_utf8(&bytes).ok().and_then(xml_to_map) {
                Some(data) => Body::Map(data),
                None => Body::Raw(bytes),
            }
        } else if content_type.contains("application/x-www-form-urlencoded") {
            match std::str::from_utf8(&bytes) {
                Ok(text) => Body::Map(parse_url_encoded(text)),
                Err(_) => Body::Raw(bytes),
            }
        } else {
            Body::Raw(bytes)
        };
    }

    fn detect_cookies<S: RequestSource + ?Sized>(&mut self, source: &S) {
        self.cookies = RequestData::from_pairs(source.cookies());
    }
}

/// The directory prefix of a script path, without the trailing slash.
fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Collapse duplicate slashes and strip `../` traversal from a path.
///
/// Traversal is stripped first: replacing `../` with `/` can leave a
/// double slash behind, which the collapse pass then removes.
fn normalize_path(path: &str) -> String {
    let mut normalized = path.to_string();
    while normalized.contains("../") {
        normalized = normalized.replace("../", "/");
    }
    while normalized.contains("//") {
        normalized = normalized.replace("//", "/");
    }
    normalized
}

/// Decode an `application/x-www-form-urlencoded` payload or query string
/// into an ordered map.
fn parse_url_encoded(input: &str) -> RequestData {
    let mut data = RequestData::new();
    for pair in input.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        let key = decode_component(key);
        let value = decode_component(value);
        data.insert(key, Value::String(value));
    }
    data
}

fn decode_component(component: &str) -> String {
    let spaced = component.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|c| c.into_owned())
        .unwrap_or(spaced)
}

/// Decode a flat XML document into a map of the root's child elements to
/// their text content. Attributes and deeper nesting are not modeled; the
/// payloads this layer deals in are flat field documents.
fn xml_to_map(input: &str) -> Option<RequestData> {
    let mut s = input.trim();
    if let Some(stripped) = s.strip_prefix("<?") {
        let end = stripped.find("?>")?;
        s = stripped[end + 2..].trim();
    }

    let (_root, content) = read_element(s)?;
    let mut data = RequestData::new();
    let mut rest = content.trim();
    while rest.starts_with('<') {
        let (name, inner) = read_element(rest)?;
        let consumed = element_len(rest, &name)?;
        data.insert(name, Value::String(inner.trim().to_string()));
        rest = rest[consumed..].trim_start();
    }
    Some(data)
}

/// Read the leading element of `s`, returning its name and inner text.
fn read_element(s: &str) -> Option<(String, &str)> {
    let s = s.strip_prefix('<')?;
    let name_end = s.find(|c: char| c == '>' || c == '/' || c.is_whitespace())?;
    let name = s[..name_end].to_string();
    let open_end = s.find('>')?;
    if s[..open_end].ends_with('/') {
        return Some((name, ""));
    }
    let body = &s[open_end + 1..];
    let close = format!("</{name}>");
    let close_pos = body.find(&close)?;
    Some((name, &body[..close_pos]))
}

/// Total source length of the leading element of `s`, including its tags.
fn element_len(s: &str, name: &str) -> Option<usize> {
    let open_end = s.find('>')?;
    if s[..open_end].ends_with('/') {
        return Some(open_end + 1);
    }
    let close = format!("</{name}>");
    let close_pos = s.find(&close)?;
    Some(close_pos + close.len())
}

//! The outgoing response: status, headers and body.
//!
//! Status codes are validated against a process-wide registry seeded with
//! the standard HTTP codes; unknown codes are rejected at construction
//! unless first added with [`ResponseStatus::register`]. The response body
//! is always bytes; the typed builders ([`Response::text`],
//! [`Response::json`], [`Response::html`]) set the matching content type
//! alongside it.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::error::SluiceError;

/// Registered status codes and their reason phrases. Seeded with the
/// standard table; extensible at runtime through
/// [`ResponseStatus::register`].
static STATUS_REGISTRY: Lazy<RwLock<HashMap<u16, String>>> = Lazy::new(|| {
    let table: &[(u16, &str)] = &[
        (100, "Continue"),
        (101, "Switching Protocols"),
        (102, "Processing"),
        (200, "OK"),
        (201, "Created"),
        (202, "Accepted"),
        (203, "Non-Authoritative Information"),
        (204, "No Content"),
        (205, "Reset Content"),
        (206, "Partial Content"),
        (207, "Multi-Status"),
        (208, "Already Reported"),
        (226, "IM Used"),
        (300, "Multiple Choices"),
        (301, "Moved Permanently"),
        (302, "Found"),
        (303, "See Other"),
        (304, "Not Modified"),
        (305, "Use Proxy"),
        (306, "Switch Proxy"),
        (307, "Temporary Redirect"),
        (308, "Permanent Redirect"),
        (400, "Bad Request"),
        (401, "Unauthorized"),
        (402, "Payment Required"),
        (403, "Forbidden"),
        (404, "Not Found"),
        (405, "Method Not Allowed"),
        (406, "Not Acceptable"),
        (407, "Proxy Authentication Required"),
        (408, "Request Timeout"),
        (409, "Conflict"),
        (410, "Gone"),
        (411, "Length Required"),
        (412, "Precondition Failed"),
        (413, "Payload Too Large"),
        (414, "URI Too Long"),
        (415, "Unsupported Media Type"),
        (416, "Range Not Satisfiable"),
        (417, "Expectation Failed"),
        (418, "I'm a teapot"),
        (421, "Misdirected Request"),
        (422, "Unprocessable Entity"),
        (423, "Locked"),
        (424, "Failed Dependency"),
        (426, "Upgrade Required"),
        (428, "Precondition Required"),
        (429, "Too Many Requests"),
        (431, "Request Header Fields Too Large"),
        (451, "Unavailable For Legal Reasons"),
        (500, "Internal Server Error"),
        (501, "Not Implemented"),
        (502, "Bad Gateway"),
        (503, "Service Unavailable"),
        (504, "Gateway Timeout"),
        (505, "HTTP Version Not Supported"),
        (506, "Variant Also Negotiates"),
        (507, "Insufficient Storage"),
        (508, "Loop Detected"),
        (510, "Not Extended"),
        (511, "Network Authentication Required"),
    ];
    RwLock::new(
        table
            .iter()
            .map(|(code, text)| (*code, (*text).to_string()))
            .collect(),
    )
});

/// A validated HTTP status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseStatus {
    code: u16,
    text: String,
}

impl ResponseStatus {
    /// Create a status for a registered code.
    ///
    /// # Errors
    ///
    /// Returns [`SluiceError::UnknownStatusCode`] for codes not in the
    /// registry.
    pub fn new(code: u16) -> Result<Self, SluiceError> {
        let registry = STATUS_REGISTRY
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match registry.get(&code) {
            Some(text) => Ok(Self {
                code,
                text: text.clone(),
            }),
            None => Err(SluiceError::UnknownStatusCode { code }),
        }
    }

    /// Add a nonstandard code to the registry. Returns `false` without
    /// overwriting if the code is already registered.
    pub fn register(code: u16, text: impl Into<String>) -> bool {
        let mut registry = STATUS_REGISTRY
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match registry.entry(code) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(text.into());
                true
            }
        }
    }

    /// The numeric status code.
    #[must_use]
    pub fn code(&self) -> u16 {
        self.code
    }

    /// The reason phrase.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The full status line fragment, e.g. `404 Not Found`.
    #[must_use]
    pub fn status_line(&self) -> String {
        format!("{} {}", self.code, self.text)
    }

    /// 200 OK, the default response status.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            code: 200,
            text: "OK".to_string(),
        }
    }
}

impl Default for ResponseStatus {
    fn default() -> Self {
        Self::ok()
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text)
    }
}

/// Insertion-ordered response headers.
///
/// Same normalization rules as request headers: names split on `_`/`-`,
/// title-cased, joined with `-`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeader {
    entries: Vec<(String, String)>,
}

impl ResponseHeader {
    /// Create an empty header set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing an existing entry in place.
    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let normalized = crate::request::normalize_header_name(name.as_ref());
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == normalized) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((normalized, value)),
        }
    }

    /// Get a header value by name (case-insensitive).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        let normalized = crate::request::normalize_header_name(name);
        self.entries
            .iter()
            .find(|(k, _)| *k == normalized)
            .map(|(_, v)| v.as_str())
    }

    /// Check for a header (case-insensitive).
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Set the Content-Type header.
    pub fn content_type(&mut self, value: impl Into<String>) {
        self.set("Content-Type", value);
    }

    /// Set the Location header.
    pub fn location(&mut self, value: impl Into<String>) {
        self.set("Location", value);
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

    /// Returns true if no headers are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One outgoing response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    status: ResponseStatus,
    header: ResponseHeader,
    body: Vec<u8>,
}

impl Response {
    /// Create an empty 200 OK response.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The response status.
    #[must_use]
    pub fn status(&self) -> &ResponseStatus {
        &self.status
    }

    /// The response headers.
    #[must_use]
    pub fn header(&self) -> &ResponseHeader {
        &self.header
    }

    /// Mutable response headers.
    pub fn header_mut(&mut self) -> &mut ResponseHeader {
        &mut self.header
    }

    /// The response body.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Set the status (builder style).
    #[must_use]
    pub fn with_status(mut self, status: ResponseStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the status from a code (builder style).
    ///
    /// # Errors
    ///
    /// Returns [`SluiceError::UnknownStatusCode`] for unregistered codes.
    pub fn with_status_code(self, code: u16) -> Result<Self, SluiceError> {
        Ok(self.with_status(ResponseStatus::new(code)?))
    }

    /// Set a header (builder style).
    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.header.set(name, value);
        self
    }

    /// Set a raw byte body without touching the content type.
    #[must_use]
    pub fn bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a plain-text body.
    #[must_use]
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self.header.content_type("text/plain");
        self
    }

    /// Set an HTML body.
    #[must_use]
    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self.header.content_type("text/html");
        self
    }

    /// Serialize a value as the JSON body.
    ///
    /// # Errors
    ///
    /// Returns a handler failure if serialization fails.
    pub fn json<T: Serialize>(mut self, value: &T) -> Result<Self, SluiceError> {
        self.body = serde_json::to_vec(value).map_err(SluiceError::handler)?;
        self.header.content_type("application/json");
        Ok(self)
    }

    /// Set an already-built JSON value as the body. Unlike [`Response::json`]
    /// this cannot fail: a `Value` always serializes.
    #[must_use]
    pub fn json_value(mut self, value: &serde_json::Value) -> Self {
        self.body = value.to_string().into_bytes();
        self.header.content_type("application/json");
        self
    }

    /// A permanent redirect (308) to the given location.
    #[must_use]
    pub fn redirect(location: impl Into<String>) -> Self {
        let status = ResponseStatus::new(308).unwrap_or_else(|_| ResponseStatus::ok());
        let mut response = Self::new().with_status(status);
        response.header.location(location);
        response
    }
}

/// The outbound transport collaborator.
///
/// Receives the finished response exactly once per dispatch; the core never
/// writes to sockets itself.
pub trait ResponseWriter {
    /// Deliver the response.
    ///
    /// # Errors
    ///
    /// A transport failure here bypasses the dispatch error handlers and is
    /// always surfaced to the caller of `run()`.
    fn write(
        &mut self,
        status: &ResponseStatus,
        header: &ResponseHeader,
        body: &[u8],
    ) -> Result<(), SluiceError>;
}

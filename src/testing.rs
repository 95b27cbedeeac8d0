//! In-memory transport doubles for exercising dispatch without sockets.
//!
//! [`TestSource`] plays the inbound side of a request and [`BufferWriter`]
//! captures the outbound side, so a whole request/response cycle runs as a
//! plain function call:
//!
//! ```
//! use sluice::{Pipe, Request, Response};
//! use sluice::testing::{BufferWriter, TestSource};
//!
//! let mut pipe = Pipe::new();
//! pipe.get("/ping", |_req: &mut Request| Ok(Response::new().text("pong")));
//!
//! let mut writer = BufferWriter::new();
//! pipe.run(&TestSource::get("/ping"), &mut writer).unwrap();
//! assert_eq!(writer.text(), "pong");
//! assert_eq!(writer.status_code(), Some(200));
//! ```

use crate::error::SluiceError;
use crate::request::RequestSource;
use crate::response::{ResponseHeader, ResponseStatus, ResponseWriter};

/// A scripted request source.
#[derive(Debug, Clone, Default)]
pub struct TestSource {
    method: Option<String>,
    uri: Option<String>,
    script_name: Option<String>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    form: Option<Vec<(String, String)>>,
    cookies: Vec<(String, String)>,
}

impl TestSource {
    /// A source with the given method token and raw URI (path plus
    /// optional query string).
    #[must_use]
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: Some(method.into()),
            uri: Some(uri.into()),
            ..Self::default()
        }
    }

    /// Shorthand for a GET source.
    #[must_use]
    pub fn get(uri: impl Into<String>) -> Self {
        Self::new("GET", uri)
    }

    /// A source whose transport knows neither method nor URI.
    #[must_use]
    pub fn blank() -> Self {
        Self::default()
    }

    /// Set the script/base prefix the transport would report.
    #[must_use]
    pub fn script_name(mut self, script: impl Into<String>) -> Self {
        self.script_name = Some(script.into());
        self
    }

    /// Add a header, as the transport would spell it.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Copy another source's headers, replacing this source's own.
    #[must_use]
    pub fn headers_from(mut self, other: TestSource) -> Self {
        self.headers = other.headers;
        self
    }

    /// Set the raw body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Provide transport-level pre-parsed form fields.
    #[must_use]
    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.form = Some(fields);
        self
    }

    /// Add a cookie.
    #[must_use]
    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }
}

impl RequestSource for TestSource {
    fn method_token(&self) -> Option<String> {
        self.method.clone()
    }

    fn raw_uri(&self) -> Option<String> {
        self.uri.clone()
    }

    fn script_name(&self) -> Option<String> {
        self.script_name.clone()
    }

    fn headers(&self) -> Vec<(String, String)> {
        self.headers.clone()
    }

    fn body_bytes(&self) -> Vec<u8> {
        self.body.clone()
    }

    fn form_fields(&self) -> Option<Vec<(String, String)>> {
        self.form.clone()
    }

    fn cookies(&self) -> Vec<(String, String)> {
        self.cookies.clone()
    }
}

/// A writer that captures the response in memory.
#[derive(Debug, Clone, Default)]
pub struct BufferWriter {
    status: Option<(u16, String)>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    writes: usize,
}

impl BufferWriter {
    /// Create an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The captured body as UTF-8 text.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The captured body bytes.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The captured status code, if a response was written.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        self.status.as_ref().map(|(code, _)| *code)
    }

    /// The captured reason phrase.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.status.as_ref().map(|(_, text)| text.as_str())
    }

    /// Look up a captured header (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        let normalized = crate::request::normalize_header_name(name);
        self.headers
            .iter()
            .find(|(k, _)| *k == normalized)
            .map(|(_, v)| v.clone())
    }

    /// How many responses were written.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes
    }
}

impl ResponseWriter for BufferWriter {
    fn write(
        &mut self,
        status: &ResponseStatus,
        header: &ResponseHeader,
        body: &[u8],
    ) -> Result<(), SluiceError> {
        self.status = Some((status.code(), status.text().to_string()));
        self.headers = header
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.body = body.to_vec();
        self.writes += 1;
        Ok(())
    }
}

/// A writer whose transport always fails, for exercising the
/// transport-failure path.
#[derive(Debug, Clone)]
pub struct FailingWriter {
    message: String,
}

impl FailingWriter {
    /// A writer failing with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl ResponseWriter for FailingWriter {
    fn write(
        &mut self,
        _status: &ResponseStatus,
        _header: &ResponseHeader,
        _body: &[u8],
    ) -> Result<(), SluiceError> {
        Err(SluiceError::Transport {
            message: self.message.clone(),
        })
    }
}

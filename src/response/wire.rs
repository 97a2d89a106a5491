//! Finalized responses handed to the transport.

use super::body::Body;
use super::headers::HeaderEntries;
use http::header::{self, HeaderName, HeaderValue};
use http::StatusCode;
use std::fmt::Write as _;
use std::time::Duration;

/// Fixed body of [`Response::minimal_error`].
pub const MINIMAL_ERROR_BODY: &str = "Internal Server Error";

/// Immutable response. Once built nothing in the engine mutates it again.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderEntries,
    pub body: Body,
    pub chunked: bool,
    /// Hold the wire send for this long.
    pub delay: Option<Duration>,
    /// Close the channel once the response is written.
    pub close_connection: bool,
}

impl Response {
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderEntries::new(),
            body: Body::Empty,
            chunked: false,
            delay: None,
            close_connection: false,
        }
    }

    /// Plain-text response.
    #[must_use]
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let mut resp = Self::new(status);
        resp.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        resp.body = Body::from(body.into());
        resp
    }

    /// JSON response.
    #[must_use]
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        let mut resp = Self::new(status);
        resp.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        resp.body = Body::from(value.to_string());
        resp
    }

    /// Last-resort 500 built from constants only.
    #[must_use]
    pub fn minimal_error() -> Self {
        let mut resp = Self::new(StatusCode::INTERNAL_SERVER_ERROR);
        resp.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain"),
        );
        resp.headers
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
        resp.body = Body::Message(MINIMAL_ERROR_BODY.as_bytes().to_vec());
        resp.close_connection = true;
        resp
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Mark the connection for closing after this response.
    #[must_use]
    pub fn closing(mut self) -> Self {
        self.headers
            .set(header::CONNECTION, HeaderValue::from_static("close"));
        self.close_connection = true;
        self
    }

    #[must_use]
    pub fn status_reason(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("Unknown")
    }

    #[must_use]
    pub fn body_text(&self) -> Option<&str> {
        self.body.as_text()
    }

    /// Status line and header block, HTTP/1.1 style, without the body.
    #[must_use]
    pub fn head(&self) -> String {
        let mut out = String::with_capacity(64 + self.headers.len() * 32);
        let _ = write!(
            out,
            "HTTP/1.1 {} {}\r\n",
            self.status.as_u16(),
            self.status_reason()
        );
        for (name, value) in self.headers.iter() {
            let _ = write!(
                out,
                "{}: {}\r\n",
                name,
                String::from_utf8_lossy(value.as_bytes())
            );
        }
        if self.chunked {
            out.push_str("transfer-encoding: chunked\r\n");
        }
        out.push_str("\r\n");
        out
    }
}

//! The in-progress, mergeable response.
//!
//! Every unit writes into its own private [`ResponseAccumulator`]; the
//! executor folds it into the chain-wide accumulator with
//! [`ResponseAccumulator::merge_from`] once the unit's outcome is known.
//! A later merge overrides singular fields set by an earlier one.

use super::body::{Body, BodyWriter};
use super::headers::{HeaderEntries, HeaderType};
use super::wire::Response;
use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    status: Option<StatusCode>,
    headers: HeaderEntries,
    body: Body,
    chunked: Option<bool>,
    delay: Option<Duration>,
    modified: bool,
}

impl ResponseAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = Some(status);
        self.modified = true;
        self
    }

    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Render a typed header value and record it.
    pub fn add_header<H: HeaderType>(&mut self, ty: &H, value: &H::Value) -> anyhow::Result<()> {
        let rendered = ty.write(value)?;
        if ty.multi_valued() {
            self.headers.append_repeatable(ty.name().clone(), rendered);
        } else {
            self.headers.set(ty.name().clone(), rendered);
        }
        self.modified = true;
        Ok(())
    }

    /// Record an already-rendered header with replace/append semantics.
    pub fn insert_raw(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        self.headers.insert(name, value);
        self.modified = true;
        self
    }

    /// Parse the current value of a typed header, if present.
    pub fn header<H: HeaderType>(&self, ty: &H) -> anyhow::Result<Option<H::Value>> {
        self.headers.get(ty.name()).map(|raw| ty.read(raw)).transpose()
    }

    #[must_use]
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get_str(name)
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderEntries {
        &self.headers
    }

    /// Drop every value of `name` recorded in this accumulator.
    ///
    /// Only this accumulator is affected. On a unit's private accumulator
    /// that means the unit's own contributions; headers earlier units
    /// already merged into the chain response stay, since a merge only
    /// ever adds or replaces.
    pub fn remove_header(&mut self, name: &HeaderName) -> usize {
        let removed = self.headers.remove(name);
        if removed > 0 {
            self.modified = true;
        }
        removed
    }

    /// Fixed body. Replaces any writer.
    pub fn set_message(&mut self, message: impl Into<Vec<u8>>) -> &mut Self {
        self.body = Body::Message(message.into());
        self.modified = true;
        self
    }

    /// Streaming body. Replaces any message.
    pub fn set_writer(&mut self, writer: impl BodyWriter + 'static) -> &mut Self {
        self.body = Body::Writer(Box::new(writer));
        self.modified = true;
        self
    }

    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn set_chunked(&mut self, chunked: bool) -> &mut Self {
        self.chunked = Some(chunked);
        self.modified = true;
        self
    }

    #[must_use]
    pub fn chunked(&self) -> Option<bool> {
        self.chunked
    }

    /// Delay the wire send of the final response.
    pub fn set_delay(&mut self, delay: Duration) -> &mut Self {
        self.delay = Some(delay);
        self.modified = true;
        self
    }

    #[must_use]
    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }

    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Modified and carrying a status: the chain that produced it answered.
    #[must_use]
    pub fn is_answered(&self) -> bool {
        self.modified && self.status.is_some()
    }

    /// Fold `other` into `self`. An unmodified source leaves `self` unchanged.
    pub fn merge_from(&mut self, other: ResponseAccumulator) {
        if !other.modified {
            return;
        }
        self.headers.merge_from(other.headers);
        if other.status.is_some() {
            self.status = other.status;
        }
        if !other.body.is_empty() {
            self.body = other.body;
        }
        if other.chunked.is_some() {
            self.chunked = other.chunked;
        }
        if other.delay.is_some() {
            self.delay = other.delay;
        }
        self.modified = true;
    }

    /// Freeze into the immutable response handed to the transport.
    #[must_use]
    pub fn into_response(self) -> Response {
        let close_connection = self
            .headers
            .get(&http::header::CONNECTION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("close"));
        Response {
            status: self.status.unwrap_or(StatusCode::OK),
            headers: self.headers,
            body: self.body,
            chunked: self.chunked.unwrap_or(false),
            delay: self.delay,
            close_connection,
        }
    }
}

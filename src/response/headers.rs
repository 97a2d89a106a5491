//! Typed response headers.
//!
//! The engine treats header rendering as a codec: a [`HeaderType`] knows its
//! name, whether it may repeat, how to write a typed value into wire text and
//! how to read it back. [`HeaderEntries`] is the ordered, case-insensitive set
//! those values land in.

use anyhow::Context as _;
use http::header::{self, HeaderName, HeaderValue};
use std::time::Duration;

/// Codec for one header: `write(value) -> wire` and `read(wire) -> value`.
pub trait HeaderType: Send + Sync {
    type Value;

    fn name(&self) -> &HeaderName;

    /// Multi-valued headers append instead of replacing.
    fn multi_valued(&self) -> bool {
        is_multi_valued(self.name())
    }

    fn write(&self, value: &Self::Value) -> anyhow::Result<HeaderValue>;

    fn read(&self, raw: &HeaderValue) -> anyhow::Result<Self::Value>;
}

/// Headers that may legitimately appear more than once in a response.
#[must_use]
pub fn is_multi_valued(name: &HeaderName) -> bool {
    name == header::SET_COOKIE
        || name == header::WWW_AUTHENTICATE
        || name == header::WARNING
        || name == header::LINK
        || name == header::VIA
}

/// A header whose value is free-form text.
#[derive(Debug, Clone)]
pub struct TextHeader {
    name: HeaderName,
}

impl TextHeader {
    #[must_use]
    pub const fn new(name: HeaderName) -> Self {
        Self { name }
    }

    /// Header with a runtime name, e.g. `X-Trace`.
    pub fn named(name: &str) -> anyhow::Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name {name:?}"))?;
        Ok(Self { name })
    }
}

impl HeaderType for TextHeader {
    type Value = String;

    fn name(&self) -> &HeaderName {
        &self.name
    }

    fn write(&self, value: &String) -> anyhow::Result<HeaderValue> {
        HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for header {}", self.name))
    }

    fn read(&self, raw: &HeaderValue) -> anyhow::Result<String> {
        Ok(raw
            .to_str()
            .with_context(|| format!("header {} is not visible ASCII", self.name))?
            .to_string())
    }
}

/// `Content-Length` as an integer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentLength;

impl HeaderType for ContentLength {
    type Value = u64;

    fn name(&self) -> &HeaderName {
        &header::CONTENT_LENGTH
    }

    fn write(&self, value: &u64) -> anyhow::Result<HeaderValue> {
        Ok(HeaderValue::from(*value))
    }

    fn read(&self, raw: &HeaderValue) -> anyhow::Result<u64> {
        Ok(raw.to_str()?.trim().parse()?)
    }
}

/// `Retry-After` in delay-seconds form.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryAfter;

impl HeaderType for RetryAfter {
    type Value = Duration;

    fn name(&self) -> &HeaderName {
        &header::RETRY_AFTER
    }

    fn write(&self, value: &Duration) -> anyhow::Result<HeaderValue> {
        Ok(HeaderValue::from(value.as_secs()))
    }

    fn read(&self, raw: &HeaderValue) -> anyhow::Result<Duration> {
        let secs: u64 = raw
            .to_str()?
            .trim()
            .parse()
            .context("Retry-After is not delay-seconds")?;
        Ok(Duration::from_secs(secs))
    }
}

pub const CONTENT_TYPE: TextHeader = TextHeader::new(header::CONTENT_TYPE);
pub const LOCATION: TextHeader = TextHeader::new(header::LOCATION);
pub const CACHE_CONTROL: TextHeader = TextHeader::new(header::CACHE_CONTROL);
pub const CONNECTION: TextHeader = TextHeader::new(header::CONNECTION);
pub const SET_COOKIE: TextHeader = TextHeader::new(header::SET_COOKIE);

/// Ordered header set, unique by name except for multi-valued headers.
///
/// A name is multi-valued when [`is_multi_valued`] says so or when a
/// [`HeaderType`] declared it repeatable through [`append_repeatable`].
/// The declaration travels with the set, so merges keep appending.
///
/// [`append_repeatable`]: HeaderEntries::append_repeatable
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderEntries {
    entries: Vec<(HeaderName, HeaderValue)>,
    repeatable: Vec<HeaderName>,
}

impl HeaderEntries {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` appends instead of replacing in this set.
    #[must_use]
    pub fn is_repeatable(&self, name: &HeaderName) -> bool {
        is_multi_valued(name) || self.repeatable.contains(name)
    }

    /// Replace an existing singular entry in place, or append.
    pub fn insert(&mut self, name: HeaderName, value: HeaderValue) {
        if self.is_repeatable(&name) {
            self.entries.push((name, value));
            return;
        }
        self.set(name, value);
    }

    /// Always replace, even for multi-valued names.
    pub fn set(&mut self, name: HeaderName, value: HeaderValue) {
        let mut existing = self.entries.iter().position(|(n, _)| *n == name);
        if let Some(idx) = existing.take() {
            self.entries[idx].1 = value;
            let mut seen = false;
            self.entries.retain(|(n, _)| {
                if *n != name {
                    return true;
                }
                let keep = !seen;
                seen = true;
                keep
            });
        } else {
            self.entries.push((name, value));
        }
    }

    pub fn append(&mut self, name: HeaderName, value: HeaderValue) {
        self.entries.push((name, value));
    }

    /// Append and mark `name` multi-valued for later inserts and merges.
    pub fn append_repeatable(&mut self, name: HeaderName, value: HeaderValue) {
        if !self.is_repeatable(&name) {
            self.repeatable.push(name.clone());
        }
        self.entries.push((name, value));
    }

    /// Last value recorded for `name`.
    #[must_use]
    pub fn get(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Case-insensitive string lookup.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n.as_str().eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.to_str().ok())
    }

    pub fn get_all<'a>(&'a self, name: &'a HeaderName) -> impl Iterator<Item = &'a HeaderValue> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, v)| v)
    }

    #[must_use]
    pub fn contains(&self, name: &HeaderName) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn remove(&mut self, name: &HeaderName) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| n != name);
        before - self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.entries.iter().map(|(n, v)| (n, v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy every entry of `other` over this set with `insert` semantics.
    /// Names `other` declared repeatable append here as well.
    pub fn merge_from(&mut self, other: HeaderEntries) {
        for name in other.repeatable {
            if !self.is_repeatable(&name) {
                self.repeatable.push(name);
            }
        }
        for (name, value) in other.entries {
            self.insert(name, value);
        }
    }
}

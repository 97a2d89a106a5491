//! Response bodies: a fixed message or an incremental writer.

use std::fmt;
use std::io;
use std::time::Duration;

/// Poll interval while a writer reports [`WriteStatus::Deferred`].
pub const DEFERRED_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Result of one call to [`BodyWriter::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// More output follows.
    NotDone,
    /// The body is complete.
    Done,
    /// Nothing available yet; call again later.
    Deferred,
}

/// Incremental body producer used for chunked/streamed responses.
///
/// Each call appends the next piece of the body to `out`.
pub trait BodyWriter: Send {
    fn write(&mut self, out: &mut Vec<u8>) -> io::Result<WriteStatus>;
}

impl<F> BodyWriter for F
where
    F: FnMut(&mut Vec<u8>) -> io::Result<WriteStatus> + Send,
{
    fn write(&mut self, out: &mut Vec<u8>) -> io::Result<WriteStatus> {
        self(out)
    }
}

/// Response body. A message and a writer are mutually exclusive.
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    Message(Vec<u8>),
    Writer(Box<dyn BodyWriter>),
}

impl Body {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    /// Bytes of a fixed message; `None` for writers and empty bodies.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Body::Message(bytes) => Some(bytes),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Message(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => f.debug_tuple("Message").field(&text).finish(),
                Err(_) => write!(f, "Message({} bytes)", bytes.len()),
            },
            Body::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Message(s.into_bytes())
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Body::Message(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Message(bytes)
    }
}

/// Run `writer` to completion, handing each non-empty piece to `on_chunk`.
///
/// Returns `Ok(false)` when `is_open` turned false before the writer finished.
/// Must run on a coroutine: deferred writers are polled with a `may` sleep.
pub fn drain_writer(
    writer: &mut dyn BodyWriter,
    is_open: impl Fn() -> bool,
    mut on_chunk: impl FnMut(&[u8]) -> io::Result<()>,
) -> io::Result<bool> {
    let mut buf = Vec::with_capacity(1024);
    loop {
        if !is_open() {
            return Ok(false);
        }
        buf.clear();
        let status = writer.write(&mut buf)?;
        if !buf.is_empty() {
            on_chunk(&buf)?;
        }
        match status {
            WriteStatus::Done => return Ok(true),
            WriteStatus::NotDone => {}
            WriteStatus::Deferred => may::coroutine::sleep(DEFERRED_POLL_INTERVAL),
        }
    }
}

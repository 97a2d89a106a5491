//! The seam to the wire: a channel that can take one finished response.
//!
//! Real servers implement [`Channel`] over their connection type. The
//! in-memory [`MemoryChannel`] backs the CLI probe and the tests.

use crate::response::{drain_writer, Body, HeaderEntries, Response};
use http::StatusCode;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// A connection as seen by the engine.
pub trait Channel: Send + Sync {
    fn is_open(&self) -> bool;

    /// Encode and flush `response`. Streamed bodies are drained here.
    fn send(&self, response: Response) -> anyhow::Result<()>;

    fn close(&self);
}

/// What a [`MemoryChannel`] recorded for one response.
#[derive(Debug, Clone)]
pub struct SentResponse {
    pub status: StatusCode,
    pub headers: HeaderEntries,
    /// Whole body; for streamed responses the concatenated chunks.
    pub body: Vec<u8>,
    /// Individual pieces of a streamed body, empty otherwise.
    pub chunks: Vec<Vec<u8>>,
    pub chunked: bool,
    pub sent_at: Instant,
}

impl SentResponse {
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get_str(name)
    }
}

/// Channel that records responses in memory.
#[derive(Debug)]
pub struct MemoryChannel {
    open: AtomicBool,
    sent: Mutex<Vec<SentResponse>>,
    sent_cond: Condvar,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self {
            open: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            sent_cond: Condvar::new(),
        }
    }
}

impl MemoryChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sent(&self) -> Vec<SentResponse> {
        self.sent.lock().clone()
    }

    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Block until at least `count` responses were sent or `timeout` passes.
    #[must_use]
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<SentResponse> {
        let deadline = Instant::now() + timeout;
        let mut sent = self.sent.lock();
        while sent.len() < count {
            if self.sent_cond.wait_until(&mut sent, deadline).timed_out() {
                break;
            }
        }
        sent.clone()
    }
}

impl Channel for MemoryChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn send(&self, response: Response) -> anyhow::Result<()> {
        anyhow::ensure!(self.is_open(), "channel is closed");
        let Response {
            status,
            headers,
            body,
            chunked,
            ..
        } = response;

        let mut chunks = Vec::new();
        let body = match body {
            Body::Empty => Vec::new(),
            Body::Message(bytes) => bytes,
            Body::Writer(mut writer) => {
                let completed = drain_writer(writer.as_mut(), || self.is_open(), |chunk| {
                    chunks.push(chunk.to_vec());
                    Ok(())
                })?;
                anyhow::ensure!(completed, "channel closed while streaming the body");
                chunks.concat()
            }
        };

        let mut sent = self.sent.lock();
        sent.push(SentResponse {
            status,
            headers,
            body,
            chunks,
            chunked,
            sent_at: Instant::now(),
        });
        self.sent_cond.notify_all();
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

//! Response building blocks: typed headers, bodies, the mergeable
//! accumulator and the frozen wire response.

mod accumulator;
mod body;
pub mod headers;
mod wire;

pub use accumulator::ResponseAccumulator;
pub use body::{drain_writer, Body, BodyWriter, WriteStatus, DEFERRED_POLL_INTERVAL};
pub use headers::{ContentLength, HeaderEntries, HeaderType, RetryAfter, TextHeader};
pub use wire::{Response, MINIMAL_ERROR_BODY};

//! # Dispatcher
//!
//! The dispatcher owns the ordered page registry and walks each request
//! through it: pages are tried strictly in registration order, one at a
//! time, and the first page whose chain answers wins. Later pages that
//! would also have matched are never built.
//!
//! ## Flow
//!
//! ```text
//! dispatch(request)
//!   └─ admission (shed mode, queue at bound) ──► 503 via FallbackResponder
//!   └─ page[0].build → decorators → ChainExecutor::run
//!        ├─ Answered  ──► deliver (now, or after the response delay)
//!        ├─ Rejected  ──► page[1] ...
//!        └─ Abandoned ──► nothing is sent
//!   └─ no page left ──► not found via FallbackResponder
//! ```
//!
//! Each page starts from the context created at dispatch time, so objects
//! contributed by a page that rejected never reach the next one.
//!
//! ## Registration
//!
//! ```rust,ignore
//! use chainrouter::chain::{StaticPage, UnitSpec};
//!
//! dispatcher.register_page(StaticPage::new(
//!     "health",
//!     vec![
//!         UnitSpec::with_args("method", serde_json::json!("GET")),
//!         UnitSpec::with_args("path", serde_json::json!("/health")),
//!         UnitSpec::with_args("respond", serde_json::json!({"status": 200, "message": "ok"})),
//!     ],
//! ));
//! ```
//!
//! Registration swaps in a new page list; in-flight dispatches keep the
//! snapshot they started with.

mod core;
mod fallback;
mod metrics;

pub use core::{DispatchSummary, Dispatcher, DispatcherBuilder, Disposition, DELAY_SLICE};
pub use fallback::{DefaultFallback, FallbackResponder};
pub use metrics::DispatchMetrics;

//! # chainrouter
//!
//! **chainrouter** is a request dispatch engine for HTTP servers built on the
//! `may` coroutine runtime. Small, independently testable handler units are
//! composed into chains ("pages"); the dispatcher tries pages in
//! registration order and the first chain that answers produces the
//! response.
//!
//! ## Architecture
//!
//! - **[`unit`]** - [`HandlerUnit`](unit::HandlerUnit) and the
//!   [`Outcome`](unit::Outcome) it decides, deferral, stock units
//! - **[`response`]** - [`ResponseAccumulator`](response::ResponseAccumulator)
//!   with merge semantics, typed headers, streamed bodies
//! - **[`chain`]** - chains, unit specs, page factories, instantiation
//! - **[`executor`]** - [`ChainExecutor`](executor::ChainExecutor), which drives
//!   one chain across the worker pool
//! - **[`dispatcher`]** - page registry and the page-selection loop
//! - **[`worker_pool`]** - bounded pool of coroutines running chain steps
//! - **[`transport`]** - the [`Channel`](transport::Channel) seam to the wire
//! - **[`config`]** / **[`logging`]** - engine configuration and tracing setup
//!
//! ## Request Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant T as Transport
//!     participant D as Dispatcher
//!     participant E as ChainExecutor
//!     participant P as WorkerPool
//!     participant U as HandlerUnit
//!
//!     T->>D: dispatch(request, channel)
//!     loop pages in registration order
//!         D->>E: run(chain, context)
//!         loop units in chain order
//!             E->>P: submit(step)
//!             P->>U: evaluate(scope)
//!             U-->>E: Rejected / Consumed / RespondWith / Deferred
//!         end
//!         E-->>D: Answered / Rejected / Abandoned
//!     end
//!     D->>T: send(response), or not found
//! ```
//!
//! ## Units and Outcomes
//!
//! Each unit gets a private [`ResponseAccumulator`](response::ResponseAccumulator)
//! and decides exactly one outcome:
//!
//! | Outcome | Effect |
//! |---|---|
//! | `Rejected` | the page does not apply, the next page is tried |
//! | `Consumed { context, locked }` | context objects flow to later units; `locked` forbids falling through |
//! | `RespondWith { status, message }` | the chain answers |
//!
//! The private accumulator is merged into the chain-wide one once the
//! outcome is known, so later units override earlier ones for singular
//! headers, and `Set-Cookie` style headers accumulate.
//!
//! ## Example
//!
//! ```rust,no_run
//! use chainrouter::chain::{HandlerChain, UnitRegistry, page_fn};
//! use chainrouter::config::EngineConfig;
//! use chainrouter::dispatcher::Dispatcher;
//! use chainrouter::request::Request;
//! use chainrouter::transport::MemoryChannel;
//! use chainrouter::unit::{MethodMatch, PathMatch, Respond};
//! use http::{Method, StatusCode};
//! use std::sync::Arc;
//!
//! let dispatcher = Dispatcher::from_config(
//!     &EngineConfig::from_env(),
//!     Arc::new(UnitRegistry::with_builtins()),
//! )?;
//! let hello = PathMatch::new("/hello")?;
//! dispatcher.register_page(page_fn("hello", move |_ctx| {
//!     Ok(HandlerChain::new("hello")
//!         .unit(MethodMatch::new(Method::GET))
//!         .unit(hello.clone())
//!         .unit(Respond::with_message(StatusCode::OK, "hi")))
//! }));
//!
//! let channel = Arc::new(MemoryChannel::new());
//! let summary = dispatcher.dispatch_blocking(Request::new(Method::GET, "/hello"), channel.clone());
//! assert_eq!(summary.status, Some(200));
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Failures
//!
//! A unit that returns `Err`, panics, or drops its deferral resumer turns
//! its chain into a synthetic 500. The private accumulator is still merged
//! and the [`ErrorHook`](executor::ErrorHook) is told. If the hook itself
//! panics, the dispatcher answers through its
//! [`FallbackResponder`](dispatcher::FallbackResponder) and closes the
//! connection; if that panics too, a fixed plain-text 500 is sent.
//!
//! A closed channel is never an error: the chain stops at the next step and
//! nothing is sent.

pub mod chain;
pub mod cli;
pub mod codec;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod echo;
pub mod executor;
pub mod ids;
pub mod logging;
pub mod request;
pub mod response;
pub mod transport;
pub mod unit;
pub mod worker_pool;

pub use chain::{HandlerChain, PageFactory, StaticPage, UnitRegistry, UnitSpec};
pub use config::EngineConfig;
pub use context::{Context, ContextObject};
pub use dispatcher::{DispatchSummary, Dispatcher, Disposition};
pub use executor::{ChainExecutor, ChainResult};
pub use ids::RequestId;
pub use request::Request;
pub use response::{Response, ResponseAccumulator};
pub use transport::{Channel, MemoryChannel};
pub use unit::{Evaluation, HandlerUnit, Outcome, UnitScope};

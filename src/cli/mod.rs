//! # CLI Module
//!
//! Command-line access to the engine without a network server.
//!
//! ## Commands
//!
//! ### `probe`
//!
//! Build a dispatcher from configuration, register the demo pages from
//! [`crate::echo`], dispatch one request through an in-memory channel and
//! print what the channel received:
//!
//! ```bash
//! chainrouter probe --target /echo/42?verbose=1
//! chainrouter probe -m POST -t /orders -b '{"sku": 1}' -H x-request-id:01ARZ3NDEKTSV4RRFFQ69G5FAV
//! chainrouter probe -t /slow?ms=50 --metrics
//! ```
//!
//! ### `config`
//!
//! Print the effective [`EngineConfig`](crate::config::EngineConfig) after
//! file and environment overrides:
//!
//! ```bash
//! CHAINR_WORKERS=8 chainrouter config --config engine.yaml
//! ```

mod commands;


pub use commands::{build_request, probe, run_cli, Cli, Commands, ProbeArgs, ProbeReport};

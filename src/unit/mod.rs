//! Handler units and the outcomes they produce.
//!
//! A [`HandlerUnit`] looks at the request, the context contributed by
//! earlier units and the chain's response so far, and decides one
//! [`Outcome`]: reject the chain, consume and continue, or respond. A unit
//! that must wait for an external event returns [`Evaluation::Deferred`]
//! with the pending half of a [`defer`] pair.

mod builtin;
mod core;
mod deferral;
mod outcome;

pub use builtin::{MethodMatch, PathMatch, PathParams, PathPattern, Respond, SetHeader};
pub use core::{from_fn, FnUnit, HandlerUnit, UnitScope};
pub use deferral::{defer, DeferralError, PendingOutcome, Resolution, Resolved, Resumer};
pub use outcome::{Evaluation, Outcome, OutcomeKind, ResponseMessage};

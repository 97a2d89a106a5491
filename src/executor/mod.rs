//! The chain executor ("treadmill").
//!
//! [`ChainExecutor::run`] evaluates a chain one unit at a time. Each unit is
//! a separate worker-pool job; the chain's state (context, remnant,
//! chain-wide accumulator, lock flag) travels with the job, and the request
//! span is re-entered at the start of every job and every deferred
//! resumption.
//!
//! ## Per-unit boundary
//!
//! 1. Channel closed → the run is abandoned, nothing is reported or sent
//! 2. Spec elements are instantiated; failures become a synthetic 500
//! 3. `evaluate` runs under `catch_unwind`
//! 4. The unit's private accumulator is merged once its outcome is known
//! 5. `Rejected` ends the run, unless an earlier unit locked the chain

mod core;
mod failure;

pub use core::{ChainExecutor, ChainResult, OutcomeRecord};
pub use failure::{
    render_failure, ErrorHook, FailureReport, FatalFailure, LoggingErrorHook, UnitFailure,
    SANITIZED_ERROR_BODY,
};

//! Failures recovered at the unit boundary and the hook they are reported to.

use crate::ids::RequestId;
use std::fmt;
use tracing::error;

/// Why a chain ended in a synthetic 500.
#[derive(Debug)]
pub enum UnitFailure {
    /// `evaluate` returned an error, or a deferred unit failed.
    Error(anyhow::Error),
    /// `evaluate` panicked.
    Panic(String),
    /// A deferred unit was dropped without producing an outcome.
    NoOutcome,
    /// A unit spec could not be turned into a live unit.
    Instantiation(anyhow::Error),
    /// `Rejected` after a locked `Consumed`.
    LockedRejection,
    /// The chain ran out of units after a locked `Consumed`.
    LockedExhaustion,
    /// The page factory or a decorator failed to produce a chain.
    PageBuild(anyhow::Error),
}

impl UnitFailure {
    /// Stable label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            UnitFailure::Error(_) => "error",
            UnitFailure::Panic(_) => "panic",
            UnitFailure::NoOutcome => "no_outcome",
            UnitFailure::Instantiation(_) => "instantiation",
            UnitFailure::LockedRejection => "locked_rejection",
            UnitFailure::LockedExhaustion => "locked_exhaustion",
            UnitFailure::PageBuild(_) => "page_build",
        }
    }
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitFailure::Error(err) => write!(f, "unit failed: {err:#}"),
            UnitFailure::Panic(msg) => write!(f, "unit panicked: {msg}"),
            UnitFailure::NoOutcome => write!(f, "unit produced no outcome"),
            UnitFailure::Instantiation(err) => write!(f, "unit instantiation failed: {err:#}"),
            UnitFailure::LockedRejection => {
                write!(f, "unit rejected a chain locked by an earlier unit")
            }
            UnitFailure::LockedExhaustion => {
                write!(f, "locked chain ended without a response")
            }
            UnitFailure::PageBuild(err) => write!(f, "page could not be built: {err:#}"),
        }
    }
}

impl std::error::Error for UnitFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UnitFailure::Error(err)
            | UnitFailure::Instantiation(err)
            | UnitFailure::PageBuild(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

/// A recovered failure together with where it happened.
#[derive(Debug)]
pub struct FailureReport<'a> {
    pub request_id: RequestId,
    pub page: &'a str,
    /// Unit name, `None` when the failure is not tied to one unit.
    pub unit: Option<&'a str>,
    pub position: Option<usize>,
    pub failure: &'a UnitFailure,
}

/// Process-wide sink for recovered failures. Must not panic; if it does,
/// the dispatcher falls back to its last-resort response and closes the
/// connection.
pub trait ErrorHook: Send + Sync {
    fn report(&self, report: &FailureReport<'_>);
}

impl<F> ErrorHook for F
where
    F: Fn(&FailureReport<'_>) + Send + Sync,
{
    fn report(&self, report: &FailureReport<'_>) {
        self(report);
    }
}

/// Default hook: one structured `error!` per failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingErrorHook;

impl ErrorHook for LoggingErrorHook {
    fn report(&self, report: &FailureReport<'_>) {
        error!(
            request_id = %report.request_id,
            page = %report.page,
            unit = report.unit.unwrap_or("-"),
            position = ?report.position,
            failure_kind = report.failure.kind(),
            error = %report.failure,
            "Chain execution failed"
        );
    }
}

/// Body of the synthetic 500.
pub const SANITIZED_ERROR_BODY: &str = "Internal Server Error";

/// Text placed in the synthetic 500 body.
#[must_use]
pub fn render_failure(failure: &UnitFailure, expose_details: bool) -> String {
    if expose_details {
        failure.to_string()
    } else {
        SANITIZED_ERROR_BODY.to_string()
    }
}

/// A failure whose reporting itself failed.
#[derive(Debug)]
pub struct FatalFailure {
    pub failure: UnitFailure,
    pub hook_panic: String,
}

impl fmt::Display for FatalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error hook panicked ({}) while reporting: {}",
            self.hook_panic, self.failure
        )
    }
}

impl std::error::Error for FatalFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context as _;

    #[test]
    fn test_render_failure_exposes_cause_chain() {
        let err = Err::<(), _>(anyhow::anyhow!("disk full"))
            .context("saving pet")
            .unwrap_err();
        let failure = UnitFailure::Error(err);
        let detailed = render_failure(&failure, true);
        assert!(detailed.contains("saving pet"), "{detailed}");
        assert!(detailed.contains("disk full"), "{detailed}");
        assert_eq!(render_failure(&failure, false), SANITIZED_ERROR_BODY);
    }

    #[test]
    fn test_kinds_and_sources() {
        use std::error::Error as _;
        assert_eq!(UnitFailure::NoOutcome.kind(), "no_outcome");
        assert!(UnitFailure::LockedRejection.source().is_none());
        assert!(UnitFailure::PageBuild(anyhow::anyhow!("x")).source().is_some());
        let fatal = FatalFailure {
            failure: UnitFailure::Panic("boom".into()),
            hook_panic: "hook".into(),
        };
        assert!(fatal.to_string().contains("boom"));
    }
}

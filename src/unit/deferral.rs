//! Suspension of a unit pending an external event.
//!
//! A unit that cannot decide yet calls [`defer`], returns the
//! [`PendingOutcome`] from `evaluate` and hands the [`Resumer`] to whatever
//! will eventually produce the answer (a thread, a timer, an I/O callback).
//! The executor registers a continuation on the pending half; whichever side
//! arrives second runs it. The continuation only resubmits the chain to the
//! worker pool, so the resuming thread never evaluates units itself.

use crate::context::ContextObject;
use crate::response::ResponseAccumulator;
use crate::unit::Outcome;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Why a deferred unit produced no outcome.
#[derive(Debug)]
pub enum DeferralError {
    /// The [`Resumer`] was dropped without resolving.
    Abandoned,
    /// The resumer reported an error.
    Failed(anyhow::Error),
}

impl fmt::Display for DeferralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeferralError::Abandoned => write!(f, "deferred unit was dropped without an outcome"),
            DeferralError::Failed(err) => write!(f, "deferred unit failed: {err:#}"),
        }
    }
}

impl std::error::Error for DeferralError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeferralError::Abandoned => None,
            DeferralError::Failed(err) => Some(err.as_ref()),
        }
    }
}

/// What a resumer delivers: the unit's outcome and optionally more response
/// state, merged over whatever the unit wrote before suspending.
#[derive(Debug)]
pub struct Resolution {
    pub outcome: Outcome,
    pub response: Option<ResponseAccumulator>,
}

pub type Resolved = Result<Resolution, DeferralError>;

type Continuation = Box<dyn FnOnce(Resolved) + Send>;

enum SlotState {
    Waiting,
    Resolved(Resolved),
    Registered(Continuation),
    Done,
}

struct Slot {
    state: Mutex<SlotState>,
}

impl Slot {
    fn resolve(&self, resolved: Resolved) {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, SlotState::Done) {
            SlotState::Waiting => *state = SlotState::Resolved(resolved),
            SlotState::Registered(continuation) => {
                drop(state);
                continuation(resolved);
            }
            SlotState::Resolved(first) => *state = SlotState::Resolved(first),
            SlotState::Done => {}
        }
    }
}

/// Create a linked pending/resumer pair.
#[must_use]
pub fn defer() -> (PendingOutcome, Resumer) {
    let slot = Arc::new(Slot {
        state: Mutex::new(SlotState::Waiting),
    });
    (
        PendingOutcome {
            slot: Arc::clone(&slot),
        },
        Resumer { slot: Some(slot) },
    )
}

/// Executor side of a deferral.
pub struct PendingOutcome {
    slot: Arc<Slot>,
}

impl PendingOutcome {
    /// Run `continuation` once the resumer resolves, immediately if it
    /// already has. It runs on the resolving thread.
    pub fn on_resolve(self, continuation: impl FnOnce(Resolved) + Send + 'static) {
        let mut state = self.slot.state.lock();
        match std::mem::replace(&mut *state, SlotState::Done) {
            SlotState::Waiting => *state = SlotState::Registered(Box::new(continuation)),
            SlotState::Resolved(resolved) => {
                drop(state);
                continuation(resolved);
            }
            // on_resolve consumes the only PendingOutcome
            SlotState::Registered(existing) => *state = SlotState::Registered(existing),
            SlotState::Done => {}
        }
    }

    /// Whether the resumer has already resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(*self.slot.state.lock(), SlotState::Resolved(_))
    }
}

impl fmt::Debug for PendingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOutcome")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Producer side of a deferral. Dropping it unresolved abandons the unit.
pub struct Resumer {
    slot: Option<Arc<Slot>>,
}

impl Resumer {
    fn complete(mut self, resolved: Resolved) {
        if let Some(slot) = self.slot.take() {
            slot.resolve(resolved);
        }
    }

    /// Continue with the next unit, contributing nothing.
    pub fn resume(self) {
        self.resume_with_outcome(Outcome::consumed());
    }

    /// Continue with the next unit, contributing `context`.
    pub fn resume_with(self, context: Vec<ContextObject>) {
        self.resume_with_outcome(Outcome::Consumed {
            context,
            locked: false,
        });
    }

    pub fn resume_with_outcome(self, outcome: Outcome) {
        self.complete(Ok(Resolution {
            outcome,
            response: None,
        }));
    }

    /// Resolve with an outcome plus response state to merge.
    pub fn resume_with_response(self, outcome: Outcome, response: ResponseAccumulator) {
        self.complete(Ok(Resolution {
            outcome,
            response: Some(response),
        }));
    }

    pub fn fail(self, err: impl Into<anyhow::Error>) {
        self.complete(Err(DeferralError::Failed(err.into())));
    }
}

impl Drop for Resumer {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.resolve(Err(DeferralError::Abandoned));
        }
    }
}

impl fmt::Debug for Resumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resumer")
            .field("pending", &self.slot.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::OutcomeKind;
    use std::sync::mpsc;

    fn capture(pending: PendingOutcome) -> mpsc::Receiver<Resolved> {
        let (tx, rx) = mpsc::channel();
        pending.on_resolve(move |r| {
            let _ = tx.send(r);
        });
        rx
    }

    #[test]
    fn test_resolve_after_registration() {
        let (pending, resumer) = defer();
        let rx = capture(pending);
        assert!(rx.try_recv().is_err());
        resumer.resume_with(vec![ContextObject::new(1u32)]);
        let resolution = rx.recv().unwrap().unwrap();
        assert_eq!(resolution.outcome.kind(), OutcomeKind::Consumed);
        assert_eq!(resolution.outcome.context().len(), 1);
    }

    #[test]
    fn test_resolve_before_registration() {
        let (pending, resumer) = defer();
        resumer.resume();
        assert!(pending.is_resolved());
        let rx = capture(pending);
        assert!(rx.recv().unwrap().is_ok());
    }

    #[test]
    fn test_dropped_resumer_abandons() {
        let (pending, resumer) = defer();
        let rx = capture(pending);
        drop(resumer);
        assert!(matches!(rx.recv().unwrap(), Err(DeferralError::Abandoned)));
    }

    #[test]
    fn test_fail_carries_error() {
        let (pending, resumer) = defer();
        resumer.fail(anyhow::anyhow!("upstream timed out"));
        let err = capture(pending).recv().unwrap().unwrap_err();
        assert!(err.to_string().contains("upstream timed out"));
    }

    #[test]
    fn test_resume_from_other_thread() {
        let (pending, resumer) = defer();
        let rx = capture(pending);
        let handle = std::thread::spawn(move || resumer.resume());
        assert!(rx.recv().unwrap().is_ok());
        handle.join().unwrap();
    }
}

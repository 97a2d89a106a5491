use super::deferral::PendingOutcome;
use crate::context::ContextObject;
use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::fmt;

/// Body carried by a terminal outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseMessage {
    /// Sent verbatim.
    Text(String),
    /// Serialized by the engine's [`MessageCodec`](crate::codec::MessageCodec).
    Structured(Value),
}

impl From<&str> for ResponseMessage {
    fn from(s: &str) -> Self {
        ResponseMessage::Text(s.to_string())
    }
}

impl From<String> for ResponseMessage {
    fn from(s: String) -> Self {
        ResponseMessage::Text(s)
    }
}

impl From<Value> for ResponseMessage {
    fn from(v: Value) -> Self {
        ResponseMessage::Structured(v)
    }
}

/// What a handler unit decided.
#[derive(Debug)]
pub enum Outcome {
    /// The chain does not apply to this request.
    Rejected,
    /// Keep going; `context` becomes visible to later units of the chain.
    /// `locked` forbids falling through to another page from here on.
    Consumed {
        context: Vec<ContextObject>,
        locked: bool,
    },
    /// The chain answers with `status` and an optional body.
    RespondWith {
        status: StatusCode,
        message: Option<ResponseMessage>,
    },
}

impl Outcome {
    #[must_use]
    pub fn rejected() -> Self {
        Outcome::Rejected
    }

    #[must_use]
    pub fn consumed() -> Self {
        Outcome::Consumed {
            context: Vec::new(),
            locked: false,
        }
    }

    /// Consumed, contributing one object.
    #[must_use]
    pub fn consumed_with<T: Any + Send + Sync>(value: T) -> Self {
        Outcome::Consumed {
            context: vec![ContextObject::new(value)],
            locked: false,
        }
    }

    /// Consumed and locked.
    #[must_use]
    pub fn locked(context: Vec<ContextObject>) -> Self {
        Outcome::Consumed {
            context,
            locked: true,
        }
    }

    #[must_use]
    pub fn respond(status: StatusCode) -> Self {
        Outcome::RespondWith {
            status,
            message: None,
        }
    }

    #[must_use]
    pub fn respond_with(status: StatusCode, message: impl Into<ResponseMessage>) -> Self {
        Outcome::RespondWith {
            status,
            message: Some(message.into()),
        }
    }

    /// Add an object to a `Consumed` outcome. Other variants are returned as is.
    #[must_use]
    pub fn with_object<T: Any + Send + Sync>(mut self, value: T) -> Self {
        if let Outcome::Consumed { context, .. } = &mut self {
            context.push(ContextObject::new(value));
        }
        self
    }

    /// Objects exposed to later units. Empty unless `Consumed`.
    #[must_use]
    pub fn context(&self) -> &[ContextObject] {
        match self {
            Outcome::Consumed { context, .. } => context,
            _ => &[],
        }
    }

    #[must_use]
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Rejected => OutcomeKind::Rejected,
            Outcome::Consumed { locked: false, .. } => OutcomeKind::Consumed,
            Outcome::Consumed { locked: true, .. } => OutcomeKind::Locked,
            Outcome::RespondWith { .. } => OutcomeKind::RespondWith,
        }
    }
}

/// Discriminant of an [`Outcome`], kept in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Rejected,
    Consumed,
    Locked,
    RespondWith,
    /// Synthesized by the executor from a failure.
    Failure,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutcomeKind::Rejected => "rejected",
            OutcomeKind::Consumed => "consumed",
            OutcomeKind::Locked => "locked",
            OutcomeKind::RespondWith => "respond_with",
            OutcomeKind::Failure => "failure",
        })
    }
}

/// Result of [`HandlerUnit::evaluate`](super::HandlerUnit::evaluate).
#[derive(Debug)]
pub enum Evaluation {
    Ready(Outcome),
    /// The outcome arrives later through a [`Resumer`](super::Resumer).
    Deferred(PendingOutcome),
}

impl From<Outcome> for Evaluation {
    fn from(outcome: Outcome) -> Self {
        Evaluation::Ready(outcome)
    }
}

impl From<PendingOutcome> for Evaluation {
    fn from(pending: PendingOutcome) -> Self {
        Evaluation::Deferred(pending)
    }
}

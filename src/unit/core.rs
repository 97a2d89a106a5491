use super::outcome::Evaluation;
use crate::chain::ChainRemnant;
use crate::context::Context;
use crate::request::Request;
use crate::response::ResponseAccumulator;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// One indivisible handling step.
///
/// A unit is built fresh for each chain execution and evaluated at most once.
/// Returning `Err` or panicking turns into a synthetic 500 for the chain.
pub trait HandlerUnit: Send {
    /// Name used in logs and diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn evaluate(&mut self, scope: &mut UnitScope<'_>) -> anyhow::Result<Evaluation>;
}

impl fmt::Debug for dyn HandlerUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandlerUnit({})", self.name())
    }
}

/// Everything a unit may see or touch while it evaluates.
pub struct UnitScope<'a> {
    context: &'a Context,
    response: &'a mut ResponseAccumulator,
    chain_response: &'a ResponseAccumulator,
    remnant: &'a mut ChainRemnant,
}

impl<'a> UnitScope<'a> {
    pub fn new(
        context: &'a Context,
        response: &'a mut ResponseAccumulator,
        chain_response: &'a ResponseAccumulator,
        remnant: &'a mut ChainRemnant,
    ) -> Self {
        Self {
            context,
            response,
            chain_response,
            remnant,
        }
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        self.context
    }

    #[must_use]
    pub fn request(&self) -> &Request {
        self.context.request()
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.context.get::<T>()
    }

    pub fn require<T: Any + Send + Sync>(&self) -> anyhow::Result<Arc<T>> {
        self.context.require::<T>()
    }

    /// This unit's private response; merged into the chain after evaluation.
    pub fn response(&mut self) -> &mut ResponseAccumulator {
        self.response
    }

    /// Merged contributions of the units evaluated so far.
    #[must_use]
    pub fn chain_response(&self) -> &ResponseAccumulator {
        self.chain_response
    }

    /// Units still to run in this chain.
    pub fn remnant(&mut self) -> &mut ChainRemnant {
        self.remnant
    }
}

/// Unit backed by a closure.
pub struct FnUnit<F, R> {
    name: String,
    f: F,
    _returns: PhantomData<fn() -> R>,
}

/// Wrap a closure as a [`HandlerUnit`].
///
/// ```
/// use chainrouter::unit::{from_fn, Outcome};
/// use http::StatusCode;
///
/// let unit = from_fn("hello", |_scope| Ok(Outcome::respond_with(StatusCode::OK, "hi")));
/// # let _ = unit;
/// ```
pub fn from_fn<F, R>(name: impl Into<String>, f: F) -> FnUnit<F, R>
where
    F: FnMut(&mut UnitScope<'_>) -> anyhow::Result<R> + Send,
    R: Into<Evaluation>,
{
    FnUnit {
        name: name.into(),
        f,
        _returns: PhantomData,
    }
}

impl<F, R> HandlerUnit for FnUnit<F, R>
where
    F: FnMut(&mut UnitScope<'_>) -> anyhow::Result<R> + Send,
    R: Into<Evaluation>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&mut self, scope: &mut UnitScope<'_>) -> anyhow::Result<Evaluation> {
        (self.f)(scope).map(Into::into)
    }
}

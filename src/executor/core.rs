use super::failure::{
    render_failure, ErrorHook, FailureReport, FatalFailure, LoggingErrorHook, UnitFailure,
};
use crate::chain::{ChainElement, ChainRemnant, HandlerChain, Instantiator};
use crate::codec::{JsonCodec, MessageCodec};
use crate::config::EngineConfig;
use crate::context::Context;
use crate::response::{Response, ResponseAccumulator};
use crate::transport::Channel;
use crate::unit::{
    DeferralError, Evaluation, Outcome, OutcomeKind, PendingOutcome, Resolution, Resolved,
    ResponseMessage, UnitScope,
};
use crate::worker_pool::{panic_message, WorkerPool};
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, debug_span, error, info, warn, Span};

/// Back-reference from an outcome to the chain and unit that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeRecord {
    pub page: Arc<str>,
    pub unit: String,
    /// Zero-based evaluation index within the chain.
    pub position: Option<usize>,
    pub kind: OutcomeKind,
    #[serde(serialize_with = "serialize_status")]
    pub status: Option<StatusCode>,
}

fn serialize_status<S: serde::Serializer>(
    status: &Option<StatusCode>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match status {
        Some(s) => serializer.serialize_some(&s.as_u16()),
        None => serializer.serialize_none(),
    }
}

/// How one chain run ended.
#[derive(Debug)]
pub enum ChainResult {
    /// The chain produced a response, possibly a synthetic 500.
    Answered {
        response: Response,
        record: OutcomeRecord,
        /// Set when reporting a failure itself failed.
        fatal: Option<FatalFailure>,
    },
    /// The chain does not apply; try the next page.
    Rejected {
        evaluated: usize,
        /// Rejecting unit, `None` when the chain ran out of units.
        by: Option<String>,
    },
    /// The channel closed; nothing is to be sent.
    Abandoned { evaluated: usize },
}

impl ChainResult {
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ChainResult::Answered { response, .. } => Some(response.status),
            _ => None,
        }
    }
}

type Completion = Box<dyn FnOnce(ChainResult) + Send>;

/// Drives one chain to a terminal result, one pool job per unit.
#[derive(Clone)]
pub struct ChainExecutor {
    pool: Arc<WorkerPool>,
    instantiator: Arc<dyn Instantiator>,
    codec: Arc<dyn MessageCodec>,
    hook: Arc<dyn ErrorHook>,
    expose_errors: bool,
}

impl ChainExecutor {
    pub fn new(pool: Arc<WorkerPool>, instantiator: Arc<dyn Instantiator>) -> Self {
        Self {
            pool,
            instantiator,
            codec: Arc::new(JsonCodec::default()),
            hook: Arc::new(LoggingErrorHook),
            expose_errors: false,
        }
    }

    /// Executor on a fresh worker pool sized from `config`.
    pub fn from_config(
        config: &EngineConfig,
        instantiator: Arc<dyn Instantiator>,
    ) -> anyhow::Result<Self> {
        let pool = WorkerPool::new("chainrouter", config.pool.clone())?;
        Ok(Self::new(Arc::new(pool), instantiator)
            .expose_error_details(config.expose_error_details))
    }

    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn with_error_hook(mut self, hook: Arc<dyn ErrorHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Put failure details in synthetic 500 bodies instead of a fixed text.
    #[must_use]
    pub fn expose_error_details(mut self, expose: bool) -> Self {
        self.expose_errors = expose;
        self
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Start `chain`; `on_complete` runs exactly once, on a pool worker.
    pub fn run(
        &self,
        chain: HandlerChain,
        ctx: Context,
        channel: Arc<dyn Channel>,
        on_complete: impl FnOnce(ChainResult) + Send + 'static,
    ) {
        let run = Run::new(self.clone(), chain, ctx, channel, Box::new(on_complete));
        debug!(page = %run.page, units = run.remnant.len(), "Chain scheduled");
        self.schedule(run);
    }

    /// Run `chain` and wait for its result on a `may` channel.
    pub fn run_blocking(
        &self,
        chain: HandlerChain,
        ctx: Context,
        channel: Arc<dyn Channel>,
    ) -> ChainResult {
        let (tx, rx) = may::sync::mpsc::channel();
        self.run(chain, ctx, channel, move |result| {
            let _ = tx.send(result);
        });
        rx.recv()
            .unwrap_or(ChainResult::Abandoned { evaluated: 0 })
    }

    /// Answer for a page whose chain could not be built, through the same
    /// synthetic-500 path as a failing unit. Completes on the caller.
    pub fn fail_page(
        &self,
        page: Arc<str>,
        ctx: Context,
        channel: Arc<dyn Channel>,
        err: anyhow::Error,
        on_complete: impl FnOnce(ChainResult) + Send + 'static,
    ) {
        let chain = HandlerChain::named(page, Vec::new());
        let run = Run::new(self.clone(), chain, ctx, channel, Box::new(on_complete));
        let _enter = run.span.clone().entered();
        run.fail(
            "<page>".to_string(),
            None,
            UnitFailure::PageBuild(err),
            ResponseAccumulator::new(),
        );
    }

    fn schedule(&self, run: Run) {
        self.pool.submit(move || run.step());
    }
}

/// State of one in-flight chain. Moves from pool job to pool job.
struct Run {
    exec: ChainExecutor,
    page: Arc<str>,
    ctx: Context,
    span: Span,
    channel: Arc<dyn Channel>,
    remnant: ChainRemnant,
    response: ResponseAccumulator,
    locked: bool,
    evaluated: usize,
    started: Instant,
    on_complete: Option<Completion>,
}

impl Run {
    fn new(
        exec: ChainExecutor,
        chain: HandlerChain,
        ctx: Context,
        channel: Arc<dyn Channel>,
        on_complete: Completion,
    ) -> Self {
        let (page, elements) = chain.into_parts();
        let span = debug_span!(parent: ctx.span(), "chain", page = %page);
        Self {
            exec,
            page,
            ctx,
            span,
            channel,
            remnant: ChainRemnant::new(elements),
            response: ResponseAccumulator::new(),
            locked: false,
            evaluated: 0,
            started: Instant::now(),
            on_complete: Some(on_complete),
        }
    }

    /// Evaluate the next unit. Runs as one pool job.
    fn step(mut self) {
        let _enter = self.span.clone().entered();

        if !self.channel.is_open() {
            return self.abandon();
        }
        let Some(element) = self.remnant.take_next() else {
            return self.exhausted();
        };
        let position = self.evaluated;
        self.evaluated += 1;

        let mut unit = match element {
            ChainElement::Instance(unit) => unit,
            ChainElement::Spec(spec) => {
                let instantiator = Arc::clone(&self.exec.instantiator);
                let ctx = &self.ctx;
                match catch_unwind(AssertUnwindSafe(|| instantiator.instantiate(&spec, ctx))) {
                    Ok(Ok(unit)) => unit,
                    Ok(Err(err)) => {
                        return self.fail(
                            spec.to_string(),
                            Some(position),
                            UnitFailure::Instantiation(err),
                            ResponseAccumulator::new(),
                        )
                    }
                    Err(panic) => {
                        let err = anyhow::anyhow!(
                            "constructor panicked: {}",
                            panic_message(panic.as_ref())
                        );
                        return self.fail(
                            spec.to_string(),
                            Some(position),
                            UnitFailure::Instantiation(err),
                            ResponseAccumulator::new(),
                        );
                    }
                }
            }
        };

        let unit_name = unit.name().to_string();
        let mut private = ResponseAccumulator::new();
        let evaluation = {
            let mut scope =
                UnitScope::new(&self.ctx, &mut private, &self.response, &mut self.remnant);
            catch_unwind(AssertUnwindSafe(|| unit.evaluate(&mut scope)))
        };
        drop(unit);

        match evaluation {
            Ok(Ok(Evaluation::Ready(outcome))) => {
                self.apply(unit_name, position, outcome, private);
            }
            Ok(Ok(Evaluation::Deferred(pending))) => {
                self.suspend(unit_name, position, pending, private);
            }
            Ok(Err(err)) => self.fail(unit_name, Some(position), UnitFailure::Error(err), private),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                self.fail(unit_name, Some(position), UnitFailure::Panic(message), private);
            }
        }
    }

    /// Park the chain until the deferred unit resolves, then continue on
    /// the pool.
    fn suspend(
        self,
        unit: String,
        position: usize,
        pending: PendingOutcome,
        private: ResponseAccumulator,
    ) {
        debug!(unit = %unit, position, "Unit deferred");
        let pool = Arc::clone(&self.exec.pool);
        pending.on_resolve(move |resolved| {
            pool.submit(move || self.resume(unit, position, resolved, private));
        });
    }

    fn resume(
        self,
        unit: String,
        position: usize,
        resolved: Resolved,
        mut private: ResponseAccumulator,
    ) {
        let _enter = self.span.clone().entered();
        debug!(unit = %unit, position, "Deferred unit resumed");
        match resolved {
            Ok(Resolution { outcome, response }) => {
                if let Some(extra) = response {
                    private.merge_from(extra);
                }
                self.apply(unit, position, outcome, private);
            }
            Err(DeferralError::Abandoned) => {
                self.fail(unit, Some(position), UnitFailure::NoOutcome, private);
            }
            Err(DeferralError::Failed(err)) => {
                self.fail(unit, Some(position), UnitFailure::Error(err), private);
            }
        }
    }

    fn apply(
        mut self,
        unit: String,
        position: usize,
        outcome: Outcome,
        mut private: ResponseAccumulator,
    ) {
        if !self.channel.is_open() {
            return self.abandon();
        }
        let kind = outcome.kind();
        debug!(unit = %unit, position, outcome = %kind, "Unit evaluated");

        match outcome {
            Outcome::Rejected => {
                if self.locked {
                    return self.fail(
                        unit,
                        Some(position),
                        UnitFailure::LockedRejection,
                        private,
                    );
                }
                let evaluated = self.evaluated;
                self.complete(ChainResult::Rejected {
                    evaluated,
                    by: Some(unit),
                });
            }
            Outcome::Consumed { context, locked } => {
                self.response.merge_from(private);
                self.ctx = self.ctx.extended(context);
                if locked && !self.locked {
                    debug!(unit = %unit, position, "Chain locked");
                }
                self.locked |= locked;
                let exec = self.exec.clone();
                exec.schedule(self);
            }
            Outcome::RespondWith { status, message } => {
                private.set_status(status);
                if let Some(message) = message {
                    if let Err(err) = self.attach_message(&mut private, message) {
                        return self.fail(unit, Some(position), UnitFailure::Error(err), private);
                    }
                }
                self.response.merge_from(private);
                let record = self.record(unit, Some(position), kind);
                self.finish(record, None);
            }
        }
    }

    fn attach_message(
        &self,
        private: &mut ResponseAccumulator,
        message: ResponseMessage,
    ) -> anyhow::Result<()> {
        match message {
            ResponseMessage::Text(text) => {
                private.set_message(text.into_bytes());
            }
            ResponseMessage::Structured(value) => {
                let encoded = self.exec.codec.encode(&value)?;
                let has_type = private.headers().contains(&CONTENT_TYPE)
                    || self.response.headers().contains(&CONTENT_TYPE);
                if !has_type {
                    private.insert_raw(CONTENT_TYPE, HeaderValue::from_static(encoded.content_type));
                }
                private.set_message(encoded.bytes);
            }
        }
        Ok(())
    }

    /// Convert `failure` into the synthetic 500 and report it.
    fn fail(
        mut self,
        unit: String,
        position: Option<usize>,
        failure: UnitFailure,
        mut private: ResponseAccumulator,
    ) {
        if !self.channel.is_open() {
            debug!(unit = %unit, error = %failure, "Failure on a closed channel");
            return self.abandon();
        }
        error!(
            unit = %unit,
            position = ?position,
            failure_kind = failure.kind(),
            "Unit failed, answering 500"
        );

        let report = FailureReport {
            request_id: self.ctx.request_id(),
            page: &self.page,
            unit: Some(unit.as_str()),
            position,
            failure: &failure,
        };
        let hook = Arc::clone(&self.exec.hook);
        let hook_panic = catch_unwind(AssertUnwindSafe(|| hook.report(&report)))
            .err()
            .map(|panic| panic_message(panic.as_ref()));

        private
            .set_status(StatusCode::INTERNAL_SERVER_ERROR)
            .insert_raw(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            )
            .set_message(render_failure(&failure, self.exec.expose_errors));
        self.response.merge_from(private);

        let record = self.record(unit, position, OutcomeKind::Failure);
        let fatal = hook_panic.map(|hook_panic| {
            error!(hook_panic = %hook_panic, error = %failure, "Error hook panicked");
            FatalFailure {
                failure,
                hook_panic,
            }
        });
        self.finish(record, fatal);
    }

    /// The chain ran out of units without a `RespondWith`.
    ///
    /// Only an outcome answers a chain. A chain response that is modified
    /// and carries a status would count as answered by the accumulator's
    /// own test ([`ResponseAccumulator::is_answered`]), but here it is still
    /// a rejection when unlocked, and the accumulated headers and status are
    /// discarded with the rest of the chain.
    fn exhausted(mut self) {
        if self.locked {
            return self.fail(
                "<end of chain>".to_string(),
                None,
                UnitFailure::LockedExhaustion,
                ResponseAccumulator::new(),
            );
        }
        warn!(
            evaluated = self.evaluated,
            "Chain ended without responding, treating it as rejected"
        );
        let evaluated = self.evaluated;
        self.complete(ChainResult::Rejected { evaluated, by: None });
    }

    fn abandon(mut self) {
        info!(evaluated = self.evaluated, "Channel closed, abandoning chain");
        let evaluated = self.evaluated;
        self.complete(ChainResult::Abandoned { evaluated });
    }

    fn finish(mut self, record: OutcomeRecord, fatal: Option<FatalFailure>) {
        let response = std::mem::take(&mut self.response).into_response();
        debug!(
            unit = %record.unit,
            status = response.status.as_u16(),
            latency_ms = self.started.elapsed().as_millis() as u64,
            "Chain answered"
        );
        self.complete(ChainResult::Answered {
            response,
            record,
            fatal,
        });
    }

    fn record(&self, unit: String, position: Option<usize>, kind: OutcomeKind) -> OutcomeRecord {
        OutcomeRecord {
            page: Arc::clone(&self.page),
            unit,
            position,
            kind,
            status: self.response.status(),
        }
    }

    fn complete(&mut self, result: ChainResult) {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(result);
        }
    }
}

impl Drop for Run {
    fn drop(&mut self) {
        if self.on_complete.is_some() {
            let evaluated = self.evaluated;
            warn!(page = %self.page, evaluated, "Chain dropped before completing");
            self.complete(ChainResult::Abandoned { evaluated });
        }
    }
}

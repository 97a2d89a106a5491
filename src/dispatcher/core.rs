use super::fallback::{DefaultFallback, FallbackResponder};
use super::metrics::DispatchMetrics;
use crate::chain::{ChainDecorator, HandlerChain, Instantiator, PageFactory};
use crate::config::EngineConfig;
use crate::context::Context;
use crate::executor::{ChainExecutor, ChainResult};
use crate::ids::RequestId;
use crate::request::Request;
use crate::response::Response;
use crate::transport::Channel;
use crate::unit::OutcomeKind;
use crate::worker_pool::panic_message;
use arc_swap::ArcSwap;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Longest single sleep while a delayed send waits; the channel is checked
/// between slices.
pub const DELAY_SLICE: Duration = Duration::from_millis(5);

type PageList = Vec<Arc<dyn PageFactory>>;

/// How a dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// A page answered.
    Answered,
    /// A page ended in a synthetic 500.
    Failed,
    /// No page answered.
    NotFound,
    /// The channel closed first; nothing was sent.
    Abandoned,
    /// Refused at admission.
    Shed,
}

/// Summary handed to the dispatch callback.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchSummary {
    pub request_id: RequestId,
    pub disposition: Disposition,
    pub status: Option<u16>,
    /// Page that answered or was running when the channel closed.
    pub page: Option<String>,
    pub pages_tried: usize,
    pub latency_ms: u64,
}

/// Tries registered pages in order until one answers.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    executor: ChainExecutor,
    pages: ArcSwap<PageList>,
    decorators: ArcSwap<Vec<Arc<dyn ChainDecorator>>>,
    fallback: Arc<dyn FallbackResponder>,
    metrics: DispatchMetrics,
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    executor: ChainExecutor,
    pages: PageList,
    decorators: Vec<Arc<dyn ChainDecorator>>,
    fallback: Arc<dyn FallbackResponder>,
}

impl DispatcherBuilder {
    #[must_use]
    pub fn page(mut self, page: impl PageFactory + 'static) -> Self {
        self.pages.push(Arc::new(page));
        self
    }

    #[must_use]
    pub fn decorator(mut self, decorator: impl ChainDecorator + 'static) -> Self {
        self.decorators.push(Arc::new(decorator));
        self
    }

    #[must_use]
    pub fn fallback(mut self, fallback: Arc<dyn FallbackResponder>) -> Self {
        self.fallback = fallback;
        self
    }

    #[must_use]
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            inner: Arc::new(DispatcherInner {
                executor: self.executor,
                pages: ArcSwap::from_pointee(self.pages),
                decorators: ArcSwap::from_pointee(self.decorators),
                fallback: self.fallback,
                metrics: DispatchMetrics::new(),
            }),
        }
    }
}

impl Dispatcher {
    #[must_use]
    pub fn builder(executor: ChainExecutor) -> DispatcherBuilder {
        DispatcherBuilder {
            executor,
            pages: Vec::new(),
            decorators: Vec::new(),
            fallback: Arc::new(DefaultFallback::default()),
        }
    }

    /// Pool, executor and dispatcher wired from configuration.
    pub fn from_config(
        config: &EngineConfig,
        instantiator: Arc<dyn Instantiator>,
    ) -> anyhow::Result<Self> {
        Ok(Self::builder(ChainExecutor::from_config(config, instantiator)?).build())
    }

    /// Append a page. Its position in registration order is its priority.
    pub fn register_page(&self, page: impl PageFactory + 'static) {
        let page: Arc<dyn PageFactory> = Arc::new(page);
        let name = page.name().to_string();
        self.inner.pages.rcu(|pages| {
            let mut next: PageList = pages.iter().map(Arc::clone).collect();
            next.push(Arc::clone(&page));
            next
        });
        info!(
            page = %name,
            total_pages = self.inner.pages.load().len(),
            "Page registered"
        );
    }

    pub fn add_decorator(&self, decorator: impl ChainDecorator + 'static) {
        let decorator: Arc<dyn ChainDecorator> = Arc::new(decorator);
        self.inner.decorators.rcu(|decorators| {
            let mut next: Vec<_> = decorators.iter().map(Arc::clone).collect();
            next.push(Arc::clone(&decorator));
            next
        });
    }

    #[must_use]
    pub fn page_names(&self) -> Vec<String> {
        self.inner
            .pages
            .load()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    #[must_use]
    pub fn executor(&self) -> &ChainExecutor {
        &self.inner.executor
    }

    #[must_use]
    pub fn metrics(&self) -> &DispatchMetrics {
        &self.inner.metrics
    }

    /// Prometheus text for dispatch and pool counters.
    #[must_use]
    pub fn render_metrics(&self) -> String {
        self.inner
            .metrics
            .render_prometheus(self.inner.executor.pool().metrics())
    }

    /// Dispatch `request`; the response goes to `channel` and `on_done`
    /// receives the summary once the outcome is decided.
    pub fn dispatch(
        &self,
        request: Request,
        channel: Arc<dyn Channel>,
        on_done: impl FnOnce(DispatchSummary) + Send + 'static,
    ) {
        let started = Instant::now();
        DispatchMetrics::incr(&self.inner.metrics.requests);
        let ctx = Context::for_request(request);
        let _enter = ctx.span().clone().entered();
        debug!("Request received");

        let pages = self.inner.pages.load_full();
        let mut cursor = PageCursor {
            dispatcher: self.clone(),
            ctx,
            channel,
            pages,
            next: 0,
            current: None,
            started,
            on_done: Some(Box::new(on_done)),
        };

        if !self.inner.executor.pool().try_admit() {
            let fallback = Arc::clone(&self.inner.fallback);
            let request = cursor.ctx.request_arc();
            let response = guarded(cursor.ctx.request_id(), "overloaded", || {
                fallback.overloaded(&request)
            });
            let status = response.status.as_u16();
            deliver(Arc::clone(&cursor.channel), response, cursor.ctx.request_id());
            cursor.finish(Disposition::Shed, Some(status));
            return;
        }
        cursor.advance();
    }

    /// [`dispatch`](Self::dispatch) and wait for the summary.
    pub fn dispatch_blocking(&self, request: Request, channel: Arc<dyn Channel>) -> DispatchSummary {
        let request_id = request.request_id;
        let (tx, rx) = may::sync::mpsc::channel();
        self.dispatch(request, channel, move |summary| {
            let _ = tx.send(summary);
        });
        rx.recv().unwrap_or(DispatchSummary {
            request_id,
            disposition: Disposition::Abandoned,
            status: None,
            page: None,
            pages_tried: 0,
            latency_ms: 0,
        })
    }
}

/// Walks one request through the page snapshot taken at dispatch time.
struct PageCursor {
    dispatcher: Dispatcher,
    ctx: Context,
    channel: Arc<dyn Channel>,
    pages: Arc<PageList>,
    next: usize,
    current: Option<Arc<str>>,
    started: Instant,
    on_done: Option<Box<dyn FnOnce(DispatchSummary) + Send>>,
}

impl PageCursor {
    fn advance(mut self) {
        let Some(page) = self.pages.get(self.next).map(Arc::clone) else {
            return self.not_found();
        };
        self.next += 1;
        DispatchMetrics::incr(&self.dispatcher.inner.metrics.pages_tried);
        let page_name: Arc<str> = Arc::from(page.name());
        self.current = Some(Arc::clone(&page_name));
        debug!(page = %page_name, index = self.next - 1, "Trying page");

        // Every page starts from the dispatch context, never from objects
        // contributed by a page that rejected.
        let ctx = self.ctx.clone();
        let channel = Arc::clone(&self.channel);
        let executor = self.dispatcher.inner.executor.clone();
        let built = self.build_chain(page.as_ref());
        match built {
            Ok(chain) => executor.run(chain, ctx, channel, move |result| self.on_result(result)),
            Err(err) => {
                executor.fail_page(page_name, ctx, channel, err, move |result| {
                    self.on_result(result);
                });
            }
        }
    }

    fn build_chain(&self, page: &dyn PageFactory) -> anyhow::Result<HandlerChain> {
        let decorators = self.dispatcher.inner.decorators.load();
        let ctx = &self.ctx;
        catch_unwind(AssertUnwindSafe(|| -> anyhow::Result<HandlerChain> {
            let mut chain = page.build(ctx)?;
            for decorator in decorators.iter() {
                decorator.decorate(&mut chain, ctx)?;
            }
            Ok(chain)
        }))
        .unwrap_or_else(|panic| {
            Err(anyhow::anyhow!(
                "page {} panicked while building: {}",
                page.name(),
                panic_message(panic.as_ref())
            ))
        })
    }

    fn on_result(mut self, result: ChainResult) {
        let _enter = self.ctx.span().clone().entered();
        match result {
            ChainResult::Rejected { evaluated, by } => {
                debug!(
                    page = ?self.current,
                    evaluated,
                    rejected_by = by.as_deref().unwrap_or("<exhausted>"),
                    "Page rejected"
                );
                self.advance();
            }
            ChainResult::Abandoned { evaluated } => {
                debug!(page = ?self.current, evaluated, "Dispatch abandoned");
                self.finish(Disposition::Abandoned, None);
            }
            ChainResult::Answered {
                response,
                record,
                fatal,
            } => {
                let disposition = if record.kind == OutcomeKind::Failure {
                    Disposition::Failed
                } else {
                    Disposition::Answered
                };
                let request_id = self.ctx.request_id();
                let response = match fatal {
                    None => response,
                    Some(fatal) => {
                        let fallback = Arc::clone(&self.dispatcher.inner.fallback);
                        let request = self.ctx.request_arc();
                        guarded(request_id, "on_error", || fallback.on_error(&request, &fatal))
                            .closing()
                    }
                };
                let status = response.status.as_u16();
                deliver(Arc::clone(&self.channel), response, request_id);
                self.finish(disposition, Some(status));
            }
        }
    }

    fn not_found(mut self) {
        let request_id = self.ctx.request_id();
        if !self.channel.is_open() {
            return self.finish(Disposition::Abandoned, None);
        }
        self.current = None;
        let fallback = Arc::clone(&self.dispatcher.inner.fallback);
        let request = self.ctx.request_arc();
        let response = guarded(request_id, "not_found", || fallback.not_found(&request));
        let status = response.status.as_u16();
        deliver(Arc::clone(&self.channel), response, request_id);
        self.finish(Disposition::NotFound, Some(status));
    }

    fn finish(&mut self, disposition: Disposition, status: Option<u16>) {
        let Some(on_done) = self.on_done.take() else {
            return;
        };
        let metrics = &self.dispatcher.inner.metrics;
        DispatchMetrics::incr(match disposition {
            Disposition::Answered => &metrics.answered,
            Disposition::Failed => &metrics.failed,
            Disposition::NotFound => &metrics.not_found,
            Disposition::Abandoned => &metrics.abandoned,
            Disposition::Shed => &metrics.shed,
        });
        let latency = self.started.elapsed();
        DispatchMetrics::add(&metrics.latency_us_total, latency.as_micros() as u64);

        let summary = DispatchSummary {
            request_id: self.ctx.request_id(),
            disposition,
            status,
            page: self.current.as_deref().map(str::to_string),
            pages_tried: self.next,
            latency_ms: latency.as_millis() as u64,
        };
        info!(
            request_id = %summary.request_id,
            disposition = ?summary.disposition,
            status = ?summary.status,
            page = ?summary.page,
            pages_tried = summary.pages_tried,
            latency_ms = summary.latency_ms,
            "Request dispatched"
        );
        on_done(summary);
    }
}

impl Drop for PageCursor {
    fn drop(&mut self) {
        if self.on_done.is_some() {
            warn!(request_id = %self.ctx.request_id(), "Dispatch dropped before completing");
            self.finish(Disposition::Abandoned, None);
        }
    }
}

/// Build a dispatcher-owned response; a panic yields the minimal error.
fn guarded(request_id: RequestId, what: &str, render: impl FnOnce() -> Response) -> Response {
    match catch_unwind(AssertUnwindSafe(render)) {
        Ok(response) => response,
        Err(panic) => {
            error!(
                request_id = %request_id,
                responder = what,
                panic_message = %panic_message(panic.as_ref()),
                "Fallback responder panicked, sending minimal error"
            );
            Response::minimal_error()
        }
    }
}

/// Hand `response` to the channel, now or after its delay.
fn deliver(channel: Arc<dyn Channel>, response: Response, request_id: RequestId) {
    let Some(delay) = response.delay.filter(|d| !d.is_zero()) else {
        send_now(channel.as_ref(), response, request_id);
        return;
    };

    debug!(request_id = %request_id, delay_ms = delay.as_millis() as u64, "Delaying send");
    // The response is moved into the timer and not touched until it fires.
    let timer_channel = Arc::clone(&channel);
    let pending = Arc::new(parking_lot::Mutex::new(Some(response)));
    let timer_pending = Arc::clone(&pending);

    // SAFETY: the timer coroutine only sleeps with may's coroutine-aware
    // sleep and then performs one channel send; it holds no thread-local
    // state across the sleep.
    #[allow(unsafe_code)]
    let spawned = unsafe {
        may::coroutine::Builder::new()
            .name(format!("delayed-send-{request_id}"))
            .spawn(move || {
                let deadline = Instant::now() + delay;
                loop {
                    if !timer_channel.is_open() {
                        debug!(request_id = %request_id, "Channel closed, delayed send cancelled");
                        return;
                    }
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    may::coroutine::sleep(remaining.min(DELAY_SLICE));
                }
                if let Some(response) = timer_pending.lock().take() {
                    send_now(timer_channel.as_ref(), response, request_id);
                }
            })
    };
    if let Err(e) = spawned {
        warn!(request_id = %request_id, error = %e, "Delay timer unavailable, sending now");
        if let Some(response) = pending.lock().take() {
            send_now(channel.as_ref(), response, request_id);
        }
    }
}

fn send_now(channel: &dyn Channel, response: Response, request_id: RequestId) {
    if !channel.is_open() {
        debug!(request_id = %request_id, "Channel closed before send");
        return;
    }
    let close = response.close_connection;
    if let Err(e) = channel.send(response) {
        warn!(request_id = %request_id, error = %e, "Failed to send response");
    }
    if close {
        channel.close();
    }
}

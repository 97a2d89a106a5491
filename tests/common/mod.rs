#![allow(dead_code)]

pub mod test_runtime {
    use std::sync::Once;

    /// Ensures May coroutines are configured only once
    static MAY_INIT: Once = Once::new();

    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_stack_size(0x8000);
        });
    }

    static SPANS_INIT: Once = Once::new();

    /// Global span registry so `Span::current()` is observable from any
    /// worker thread. Records nothing.
    pub fn install_span_registry() {
        SPANS_INIT.call_once(|| {
            let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
        });
    }
}

pub mod hooks {
    use chainrouter::executor::{ErrorHook, FailureReport};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// What the hook saw for one failure.
    #[derive(Debug, Clone)]
    pub struct Reported {
        pub page: String,
        pub unit: Option<String>,
        pub position: Option<usize>,
        pub kind: &'static str,
    }

    /// Error hook that records every report.
    #[derive(Debug, Default)]
    pub struct CountingHook {
        calls: AtomicUsize,
        reports: Mutex<Vec<Reported>>,
    }

    impl CountingHook {
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn reports(&self) -> Vec<Reported> {
            self.reports.lock().clone()
        }
    }

    impl ErrorHook for CountingHook {
        fn report(&self, report: &FailureReport<'_>) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reports.lock().push(Reported {
                page: report.page.to_string(),
                unit: report.unit.map(str::to_string),
                position: report.position,
                kind: report.failure.kind(),
            });
        }
    }

    /// Error hook that always panics.
    pub struct PanickingHook;

    impl ErrorHook for PanickingHook {
        fn report(&self, _report: &FailureReport<'_>) {
            panic!("hook exploded");
        }
    }
}

pub mod units {
    use chainrouter::unit::{Evaluation, HandlerUnit, Outcome, UnitScope};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Shared log of evaluated unit names, in evaluation order.
    pub type EvalLog = Arc<Mutex<Vec<String>>>;

    pub fn eval_log() -> EvalLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    /// Unit that logs its evaluation, then runs `decide`.
    pub struct Recording<F> {
        name: String,
        log: EvalLog,
        decide: F,
    }

    pub fn recording<F>(log: &EvalLog, name: &str, decide: F) -> Recording<F>
    where
        F: FnMut(&mut UnitScope<'_>) -> anyhow::Result<Evaluation> + Send,
    {
        Recording {
            name: name.to_string(),
            log: Arc::clone(log),
            decide,
        }
    }

    impl<F> HandlerUnit for Recording<F>
    where
        F: FnMut(&mut UnitScope<'_>) -> anyhow::Result<Evaluation> + Send,
    {
        fn name(&self) -> &str {
            &self.name
        }

        fn evaluate(&mut self, scope: &mut UnitScope<'_>) -> anyhow::Result<Evaluation> {
            self.log.lock().push(self.name.clone());
            (self.decide)(scope)
        }
    }

    /// Logs and consumes.
    pub fn pass(log: &EvalLog, name: &str) -> impl HandlerUnit {
        recording(log, name, |_| Ok(Outcome::consumed().into()))
    }

    /// Logs and rejects.
    pub fn reject(log: &EvalLog, name: &str) -> impl HandlerUnit {
        recording(log, name, |_| Ok(Outcome::rejected().into()))
    }

    /// Logs and locks.
    pub fn lock(log: &EvalLog, name: &str) -> impl HandlerUnit {
        recording(log, name, |_| Ok(Outcome::locked(Vec::new()).into()))
    }

    /// Logs and answers with `status` and a text body.
    pub fn answer(log: &EvalLog, name: &str, status: u16, body: &'static str) -> impl HandlerUnit {
        recording(log, name, move |_| {
            let status = http::StatusCode::from_u16(status)?;
            Ok(Outcome::respond_with(status, body).into())
        })
    }

    pub fn names(log: &EvalLog) -> Vec<String> {
        log.lock().clone()
    }
}

pub mod harness {
    use super::hooks::CountingHook;
    use super::test_runtime::setup_may_runtime;
    use chainrouter::chain::{Instantiator, UnitRegistry};
    use chainrouter::dispatcher::{DispatchSummary, Dispatcher};
    use chainrouter::executor::{ChainExecutor, ErrorHook};
    use chainrouter::request::Request;
    use chainrouter::transport::{MemoryChannel, SentResponse};
    use chainrouter::worker_pool::{BackpressureMode, WorkerPool, WorkerPoolConfig};
    use std::sync::Arc;
    use std::time::Duration;

    pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn pool_config() -> WorkerPoolConfig {
        WorkerPoolConfig::new(2, 256, BackpressureMode::Block, 0x8000)
    }

    pub fn executor_with(
        config: WorkerPoolConfig,
        instantiator: Arc<dyn Instantiator>,
        hook: Arc<dyn ErrorHook>,
    ) -> ChainExecutor {
        setup_may_runtime();
        let pool = WorkerPool::new("test", config).unwrap();
        ChainExecutor::new(Arc::new(pool), instantiator).with_error_hook(hook)
    }

    /// Executor over builtins with a counting hook.
    pub fn executor() -> (ChainExecutor, Arc<CountingHook>) {
        let hook = Arc::new(CountingHook::default());
        let exec = executor_with(
            pool_config(),
            Arc::new(UnitRegistry::with_builtins()),
            hook.clone(),
        );
        (exec, hook)
    }

    /// Empty dispatcher over builtins with a counting hook.
    pub fn dispatcher() -> (Dispatcher, Arc<CountingHook>) {
        let (exec, hook) = executor();
        (Dispatcher::builder(exec).build(), hook)
    }

    pub fn channel() -> Arc<MemoryChannel> {
        Arc::new(MemoryChannel::new())
    }

    /// Dispatch and wait for the summary and, when one is expected, the
    /// response on a fresh channel.
    pub fn dispatch(
        dispatcher: &Dispatcher,
        request: Request,
    ) -> (DispatchSummary, Option<SentResponse>) {
        let channel = channel();
        let summary = dispatcher.dispatch_blocking(request, channel.clone());
        let sent = if summary.status.is_some() {
            channel.wait_for(1, SEND_TIMEOUT).into_iter().next()
        } else {
            None
        };
        (summary, sent)
    }
}

//! Per-activation coordination: configuration, handler construction, and
//! the post-call best-effort metrics flush.

use crate::config::{self, ResolvedConfig, UserConfig};
use crate::exporter::{MetricSinkBoxed, SpanSink};
use crate::extract::{Request, Response};
use crate::host::LifetimeHandle;
use crate::instrument::{
    EntryHandler, HandlerFactory, Instrumented, InstrumentedFactory, InstrumentedRpcFactory,
    RpcFactory,
};
use crate::lifecycle::Tracer;
use crate::metrics::{MetricAggregator, MetricCollector};
use crate::BoxError;
use std::sync::Arc;
use tracing::warn;

/// Judges whether a response counts as a successful unit of work.
pub type ResponseJudge = Box<dyn Fn(&Response) -> bool + Send + Sync>;

/// Process-wide telemetry state: resolved configuration, the tracer, and
/// the on-demand metric collector.
pub struct TelemetryRuntime {
    config: ResolvedConfig,
    tracer: Tracer,
    metrics: MetricCollector,
    response_judge: ResponseJudge,
}

impl TelemetryRuntime {
    /// Resolves `user` against process-wide defaults and wires the
    /// external backends together.
    pub fn new(
        user: UserConfig,
        span_sink: Arc<dyn SpanSink>,
        aggregator: Arc<dyn MetricAggregator>,
        metric_sink: Arc<dyn MetricSinkBoxed>,
    ) -> Self {
        let config = config::resolve(user);
        let tracer = Tracer::new(span_sink, config.service.clone());
        let metrics = MetricCollector::new(aggregator, metric_sink);
        Self {
            config,
            tracer,
            metrics,
            response_judge: Box::new(|resp| resp.status < 500),
        }
    }

    /// Replaces the response-success predicate (default: `status < 500`).
    pub fn with_response_judge(
        mut self,
        judge: impl Fn(&Response) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.response_judge = Box::new(judge);
        self
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn metrics(&self) -> &MetricCollector {
        &self.metrics
    }

    pub(crate) fn response_judge(&self) -> &(dyn Fn(&Response) -> bool + Send + Sync) {
        self.response_judge.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Arc<Self> {
        use crate::exporter::{NullMetricSink, NullSpanSink};
        use crate::metrics::DeltaAggregator;
        Arc::new(Self::new(
            UserConfig::default(),
            Arc::new(NullSpanSink::new()),
            Arc::new(DeltaAggregator::new()),
            Arc::new(NullMetricSink::new()),
        ))
    }
}

/// Ties the pieces together for one activation: builds instrumented
/// handlers and triggers the post-call flush.
pub struct ActivationCoordinator {
    runtime: Arc<TelemetryRuntime>,
}

impl ActivationCoordinator {
    pub fn new(runtime: Arc<TelemetryRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<TelemetryRuntime> {
        &self.runtime
    }

    /// Caller-facing surface: wraps a handler class.
    pub fn instrument<F: HandlerFactory>(&self, factory: F) -> InstrumentedFactory<F> {
        InstrumentedFactory::new(factory, Arc::clone(&self.runtime))
    }

    /// Caller-facing surface: wraps an RPC-callable class.
    pub fn instrument_rpc<F: RpcFactory>(&self, factory: F) -> InstrumentedRpcFactory<F> {
        InstrumentedRpcFactory::new(factory, Arc::clone(&self.runtime))
    }

    /// Runs the wrapped unit of work, then triggers a best-effort metrics
    /// flush. The handler's own outcome always propagates unchanged; a
    /// flush failure is logged, never substituted for it.
    pub async fn run<H: EntryHandler>(
        &self,
        handler: &Instrumented<H>,
        req: Request,
    ) -> Result<Response, BoxError> {
        let outcome = handler.fetch(req).await;
        self.flush_best_effort(handler.lifetime()).await;
        outcome
    }

    /// Attempts the flush even during teardown; abandoning it when the
    /// lifetime handle fires is ordinary export failure, not an error
    /// worth propagating.
    async fn flush_best_effort(&self, lifetime: &LifetimeHandle) {
        tokio::select! {
            biased;
            result = self.runtime.metrics().flush() => {
                if let Err(error) = result {
                    warn!(%error, "best-effort metrics flush failed");
                }
            }
            () = lifetime.cancelled() => {
                warn!("activation torn down before metrics flush completed");
            }
        }
    }
}

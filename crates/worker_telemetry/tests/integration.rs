use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use worker_telemetry::{
    entry_fn, ActivationCoordinator, ActiveContext, BoxError, DeltaAggregator, Env, EntryHandler,
    ExportError, HandlerFactory, LifetimeHandle, MetricBatch, MetricSink, Request, Response,
    RpcFactory, RpcTarget, RpcValue, Span, SpanKind, SpanSink, SpanStatus, TelemetryRuntime,
    UserConfig,
};

struct RecordingSpanSink {
    spans: Mutex<Vec<Span>>,
}

impl RecordingSpanSink {
    fn new() -> Self {
        Self {
            spans: Mutex::new(Vec::new()),
        }
    }

    fn all_spans(&self) -> Vec<Span> {
        self.spans.lock().unwrap().clone()
    }

    fn server_spans(&self) -> Vec<Span> {
        self.all_spans()
            .into_iter()
            .filter(|s| s.kind == SpanKind::Server)
            .collect()
    }
}

impl SpanSink for RecordingSpanSink {
    fn submit(&self, span: Span) {
        self.spans.lock().unwrap().push(span);
    }

    fn name(&self) -> &str {
        "recording"
    }
}

struct RecordingMetricSink {
    batches: Mutex<Vec<MetricBatch>>,
}

impl RecordingMetricSink {
    fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
        }
    }

    fn exported_batches(&self) -> Vec<MetricBatch> {
        self.batches.lock().unwrap().clone()
    }
}

impl MetricSink for RecordingMetricSink {
    async fn export(&self, batch: MetricBatch) -> Result<(), ExportError> {
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

struct FailingMetricSink;

impl MetricSink for FailingMetricSink {
    async fn export(&self, _batch: MetricBatch) -> Result<(), ExportError> {
        Err(ExportError::Failed("network down".to_string()))
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "failing"
    }
}

struct Fixture {
    coordinator: ActivationCoordinator,
    span_sink: Arc<RecordingSpanSink>,
    metric_sink: Arc<RecordingMetricSink>,
    aggregator: DeltaAggregator,
}

fn fixture() -> Fixture {
    let span_sink = Arc::new(RecordingSpanSink::new());
    let metric_sink = Arc::new(RecordingMetricSink::new());
    let aggregator = DeltaAggregator::new();
    let runtime = Arc::new(TelemetryRuntime::new(
        UserConfig::default(),
        span_sink.clone(),
        Arc::new(aggregator.clone()),
        metric_sink.clone(),
    ));
    Fixture {
        coordinator: ActivationCoordinator::new(runtime),
        span_sink,
        metric_sink,
        aggregator,
    }
}

struct EchoHandler;

#[async_trait]
impl EntryHandler for EchoHandler {
    async fn fetch(&self, req: Request) -> Result<Response, BoxError> {
        Ok(Response::ok().with_body(req.url.into_bytes()))
    }
}

struct EchoFactory;

impl HandlerFactory for EchoFactory {
    type Handler = EchoHandler;

    fn build(&self, _env: &Env, _lifetime: &LifetimeHandle) -> Self::Handler {
        EchoHandler
    }
}

#[tokio::test]
async fn successful_call_seals_exactly_one_ok_span_with_response_attributes() {
    let fx = fixture();
    let handler = fx
        .coordinator
        .instrument(EchoFactory)
        .construct(Env::default(), LifetimeHandle::new());

    let resp = fx
        .coordinator
        .run(&handler, Request::get("https://example.com/orders"))
        .await
        .unwrap();

    let spans = fx.span_sink.all_spans();
    assert_eq!(spans.len(), 1);
    let span = &spans[0];
    assert!(span.is_sealed());
    assert_eq!(span.status, SpanStatus::Ok);
    assert_eq!(span.name, "GET /orders");
    assert_eq!(
        span.attributes.get("http.response.status_code"),
        Some(&worker_telemetry::AttributeValue::Int(i64::from(resp.status)))
    );
    assert_eq!(
        span.attributes.get("http.response.body.size"),
        Some(&worker_telemetry::AttributeValue::Int(resp.body.len() as i64))
    );
}

#[tokio::test]
async fn handler_error_is_recorded_and_rethrown_unchanged() {
    struct FailingHandler;

    #[async_trait]
    impl EntryHandler for FailingHandler {
        async fn fetch(&self, _req: Request) -> Result<Response, BoxError> {
            Err("database unavailable".into())
        }
    }

    struct FailingFactory;

    impl HandlerFactory for FailingFactory {
        type Handler = FailingHandler;

        fn build(&self, _env: &Env, _lifetime: &LifetimeHandle) -> Self::Handler {
            FailingHandler
        }
    }

    let fx = fixture();
    let handler = fx
        .coordinator
        .instrument(FailingFactory)
        .construct(Env::default(), LifetimeHandle::new());

    let err = fx
        .coordinator
        .run(&handler, Request::get("https://example.com/"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "database unavailable");

    let spans = fx.span_sink.all_spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].status, SpanStatus::Error);
    assert_eq!(spans[0].exception.as_deref(), Some("database unavailable"));

    // The flush still ran after the failed call.
    assert_eq!(fx.metric_sink.exported_batches().len(), 1);
}

#[tokio::test]
async fn cold_start_is_true_only_for_the_first_inbound_call() {
    let fx = fixture();
    let handler = fx
        .coordinator
        .instrument(EchoFactory)
        .construct(Env::default(), LifetimeHandle::new());

    for _ in 0..3 {
        fx.coordinator
            .run(&handler, Request::get("https://example.com/"))
            .await
            .unwrap();
    }

    let cold: Vec<_> = fx
        .span_sink
        .all_spans()
        .iter()
        .map(|s| s.attributes.get("faas.coldstart").cloned())
        .collect();
    assert_eq!(
        cold,
        vec![
            Some(worker_telemetry::AttributeValue::Bool(true)),
            Some(worker_telemetry::AttributeValue::Bool(false)),
            Some(worker_telemetry::AttributeValue::Bool(false)),
        ]
    );
}

#[tokio::test]
async fn remote_traceparent_becomes_the_entry_span_parent() {
    let fx = fixture();
    let handler = fx
        .coordinator
        .instrument(EchoFactory)
        .construct(Env::default(), LifetimeHandle::new());

    let req = Request::get("https://example.com/").with_header(
        "traceparent",
        "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
    );
    fx.coordinator.run(&handler, req).await.unwrap();

    let span = &fx.span_sink.all_spans()[0];
    assert_eq!(span.trace_id, 0x4bf92f3577b34da6a3ce929d0e0e4736);
    assert_eq!(span.parent_span_id, 0x00f067aa0ba902b7);
}

#[tokio::test]
async fn rewrapping_an_instrumented_handler_does_not_double_open_spans() {
    struct RewrapFactory {
        prewrapped: Mutex<Option<worker_telemetry::Instrumented<EchoHandler>>>,
    }

    impl HandlerFactory for RewrapFactory {
        type Handler = worker_telemetry::Instrumented<EchoHandler>;

        fn build(&self, _env: &Env, _lifetime: &LifetimeHandle) -> Self::Handler {
            self.prewrapped.lock().unwrap().take().unwrap()
        }
    }

    let fx = fixture();
    let inner = fx
        .coordinator
        .instrument(EchoFactory)
        .construct(Env::default(), LifetimeHandle::new());
    let outer = fx
        .coordinator
        .instrument(RewrapFactory {
            prewrapped: Mutex::new(Some(inner)),
        })
        .construct(Env::default(), LifetimeHandle::new());

    fx.coordinator
        .run(&outer, Request::get("https://example.com/"))
        .await
        .unwrap();

    // One underlying call, one span — the inner layer delegated.
    assert_eq!(fx.span_sink.server_spans().len(), 1);
}

struct ProbeTarget;

#[async_trait]
impl RpcTarget for ProbeTarget {
    async fn invoke(&self, method: &str, _args: Vec<serde_json::Value>) -> Result<RpcValue, BoxError> {
        match method {
            "_trace_probe" | "trace_probe" => {
                let trace_id = ActiveContext::current()
                    .map(|ctx| ctx.trace().trace_id.to_string())
                    .unwrap_or_default();
                Ok(RpcValue::Plain(json!(trace_id)))
            }
            "get_store" => Ok(RpcValue::Target(Arc::new(ProbeTarget))),
            other => Err(format!("no such method: {other}").into()),
        }
    }
}

struct ProbeFactory;

impl RpcFactory for ProbeFactory {
    fn build(&self, _env: &Env, _lifetime: &LifetimeHandle) -> Arc<dyn RpcTarget> {
        Arc::new(ProbeTarget)
    }
}

#[tokio::test]
async fn internal_method_gets_no_span_but_sees_the_activation_context() {
    let fx = fixture();
    let target = fx
        .coordinator
        .instrument_rpc(ProbeFactory)
        .construct(Env::default(), LifetimeHandle::new());

    let ctx = ActiveContext::root();
    let trace_id = ctx.trace().trace_id;
    let value = ActiveContext::scope(ctx, async move {
        target.invoke("_trace_probe", vec![]).await.unwrap()
    })
    .await;

    assert_eq!(value.as_plain(), Some(&json!(trace_id.to_string())));
    assert!(fx.span_sink.all_spans().is_empty());
}

#[tokio::test]
async fn public_method_gets_a_span_named_after_it() {
    let fx = fixture();
    let target = fx
        .coordinator
        .instrument_rpc(ProbeFactory)
        .construct(Env::default(), LifetimeHandle::new());

    target.invoke("trace_probe", vec![json!(1)]).await.unwrap();

    let spans = fx.span_sink.all_spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].name, "trace_probe");
    assert_eq!(spans[0].status, SpanStatus::Ok);
    assert_eq!(
        spans[0].attributes.get("rpc.args_count"),
        Some(&worker_telemetry::AttributeValue::Int(1))
    );
}

#[tokio::test]
async fn returned_rpc_targets_are_wrapped_recursively() {
    let fx = fixture();
    let target = fx
        .coordinator
        .instrument_rpc(ProbeFactory)
        .construct(Env::default(), LifetimeHandle::new());

    let store = target
        .invoke("get_store", vec![])
        .await
        .unwrap()
        .into_target()
        .unwrap();
    assert!(store.instrumented());

    store.invoke("trace_probe", vec![]).await.unwrap();

    let names: Vec<_> = fx
        .span_sink
        .all_spans()
        .iter()
        .map(|s| s.name.clone())
        .collect();
    assert_eq!(names, vec!["get_store", "trace_probe"]);
}

#[tokio::test]
async fn two_counters_land_in_one_batch_and_flushes_are_deltas() {
    let fx = fixture();
    let handler = fx
        .coordinator
        .instrument(EchoFactory)
        .construct(Env::default(), LifetimeHandle::new());

    fx.aggregator.counter("a").increment();
    fx.aggregator.counter("b").increment();
    fx.coordinator
        .run(&handler, Request::get("https://example.com/"))
        .await
        .unwrap();

    fx.aggregator.counter("a").add(2);
    fx.coordinator
        .run(&handler, Request::get("https://example.com/"))
        .await
        .unwrap();

    let batches = fx.metric_sink.exported_batches();
    assert_eq!(batches.len(), 2);

    let first: Vec<_> = batches[0].entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(first, vec!["a", "b"]);

    // Second batch covers only what was recorded after the first flush.
    assert_eq!(batches[1].entries.len(), 1);
    assert_eq!(batches[1].entries[0].name, "a");
    assert_eq!(
        batches[1].entries[0].value,
        worker_telemetry::MetricValue::Counter(2)
    );
}

#[tokio::test]
async fn flush_with_nothing_recorded_exports_an_empty_batch() {
    let fx = fixture();
    fx.coordinator.runtime().metrics().flush().await.unwrap();

    let batches = fx.metric_sink.exported_batches();
    assert_eq!(batches.len(), 1);
    assert!(batches[0].is_empty());
}

#[tokio::test]
async fn flush_failure_carries_the_sink_cause() {
    let runtime = Arc::new(TelemetryRuntime::new(
        UserConfig::default(),
        Arc::new(RecordingSpanSink::new()),
        Arc::new(DeltaAggregator::new()),
        Arc::new(FailingMetricSink),
    ));

    let err = runtime.metrics().flush().await.unwrap_err();
    assert_eq!(err, ExportError::Failed("network down".to_string()));
}

#[tokio::test]
async fn concurrent_activations_keep_their_own_traces() {
    let fx = fixture();
    let coordinator = Arc::new(fx.coordinator);

    let handler = Arc::new(
        coordinator
            .instrument(EchoFactory)
            .construct(Env::default(), LifetimeHandle::new()),
    );

    let mut tasks = Vec::new();
    for i in 0..8 {
        let coordinator = Arc::clone(&coordinator);
        let handler = Arc::clone(&handler);
        tasks.push(tokio::spawn(async move {
            coordinator
                .run(&handler, Request::get(format!("https://example.com/{i}")))
                .await
                .unwrap()
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let spans = fx.span_sink.all_spans();
    assert_eq!(spans.len(), 8);
    // Every activation got its own trace.
    let mut trace_ids: Vec<_> = spans.iter().map(|s| s.trace_id).collect();
    trace_ids.sort_unstable();
    trace_ids.dedup();
    assert_eq!(trace_ids.len(), 8);
}

#[tokio::test]
async fn entry_fn_handlers_can_be_instrumented_via_a_closure_factory() {
    let fx = fixture();
    let handler = fx
        .coordinator
        .instrument(|_: &Env, _: &LifetimeHandle| {
            entry_fn(|_req: Request| async { Ok(Response::new(204)) })
        })
        .construct(Env::default(), LifetimeHandle::new());

    let resp = fx
        .coordinator
        .run(&handler, Request::get("https://example.com/health"))
        .await
        .unwrap();
    assert_eq!(resp.status, 204);
    assert_eq!(fx.span_sink.all_spans().len(), 1);
}

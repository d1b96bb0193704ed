//! On-Demand Worker Telemetry
//!
//! Tracing and metrics instrumentation for request handlers running in a
//! constrained, single-invocation execution environment: no background
//! timers, one logical call per activation, asynchronous suspension
//! throughout. Handlers are wrapped in behavior-preserving stand-ins that
//! open a span per invocation, keep the tracing context ambient across
//! suspension, and trigger metric export exactly once per activation, on
//! explicit demand.
//!
//! The tracing backend, metric aggregator, and export sinks are external
//! collaborators consumed through the traits in [`exporter`] and
//! [`metrics`]; reference implementations ship for development and tests.

pub mod activation;
pub mod config;
pub mod context;
pub mod exporter;
pub mod extract;
pub mod host;
pub mod instrument;
pub mod lifecycle;
pub mod metrics;
pub mod span;

/// Opaque handler error, re-thrown unchanged through the instrumentation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// Re-export main types
pub use activation::{ActivationCoordinator, TelemetryRuntime};
pub use config::{resolve, MetricsConfig, ResolvedConfig, ServiceConfig, UserConfig};
pub use context::{ActiveContext, TraceContext};
pub use exporter::{
    ExportError, MetricSink, MetricSinkBoxed, NullMetricSink, NullSpanSink, SpanSink,
    StdoutMetricSink, StdoutSpanSink,
};
pub use extract::{parse_traceparent, request_attributes, response_attributes, Request, Response};
pub use host::{Env, LifetimeHandle};
pub use instrument::{
    entry_fn, wrap_target, EntryHandler, FnHandler, HandlerFactory, Instrumented,
    InstrumentedFactory, InstrumentedRpcFactory, RpcFactory, RpcTarget, RpcValue,
};
pub use lifecycle::{method_kind, MethodKind, Tracer};
pub use metrics::{
    Collection, CollectionError, Counter, DeltaAggregator, ExportOutcome, FlushStats, Gauge,
    MetricAggregator, MetricBatch, MetricCollector, MetricEntry, MetricValue,
};
pub use span::{AttributeValue, Span, SpanKind, SpanStatus};

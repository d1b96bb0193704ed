//! Export sinks for sealed spans and metric batches.
//!
//! The tracing backend and metrics backend are external collaborators; this
//! module pins down their interfaces and ships reference implementations
//! for development and tests.
//!
//! # Note on Object Safety
//!
//! [`MetricSink`] uses `impl Future` return types which are not object-safe.
//! For dynamic dispatch, use `Arc<dyn MetricSinkBoxed>` — a blanket impl
//! covers every `MetricSink`.

use crate::metrics::MetricBatch;
use crate::span::Span;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Error types for export operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// Transport-layer error (network, gRPC, HTTP)
    #[error("transport error: {0}")]
    Transport(String),
    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The sink reported failure with the given cause
    #[error("export failed: {0}")]
    Failed(String),
}

/// Tracing backend interface: accepts each span as it is sealed.
///
/// Submission is synchronous; a real backend queues internally and ships
/// spans on its own schedule.
pub trait SpanSink: Send + Sync {
    /// Accepts a sealed span. Called exactly once per span.
    fn submit(&self, span: Span);

    /// Returns the sink name for debugging.
    fn name(&self) -> &str;
}

/// Stdout span sink for development and the demo binary.
pub struct StdoutSpanSink {
    verbose: bool,
}

impl StdoutSpanSink {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl SpanSink for StdoutSpanSink {
    fn submit(&self, span: Span) {
        if self.verbose {
            println!(
                "span: trace_id={:032x} span_id={:016x} name={} kind={:?} status={:?} duration={}ns",
                span.trace_id,
                span.span_id,
                span.name,
                span.kind,
                span.status,
                span.duration_nanos()
            );
        }
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// Null span sink that discards all spans.
#[derive(Default)]
pub struct NullSpanSink;

impl NullSpanSink {
    pub fn new() -> Self {
        Self
    }
}

impl SpanSink for NullSpanSink {
    fn submit(&self, _span: Span) {}

    fn name(&self) -> &str {
        "null"
    }
}

/// Metric export sink. Accepts a whole batch and reports completion
/// asynchronously; exposes `shutdown` for end-of-life flushing of its own
/// resources.
pub trait MetricSink: Send + Sync {
    /// Exports a metric batch. Ownership of the batch transfers to the sink.
    fn export(&self, batch: MetricBatch) -> impl Future<Output = Result<(), ExportError>> + Send;

    /// Shuts the sink down. Called at most once per process lifetime.
    fn shutdown(&self) -> impl Future<Output = Result<(), ExportError>> + Send;

    /// Returns the sink name for debugging.
    fn name(&self) -> &str;
}

/// Object-safe version of [`MetricSink`] for dynamic dispatch.
pub trait MetricSinkBoxed: Send + Sync {
    fn export_boxed(
        &self,
        batch: MetricBatch,
    ) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>>;

    fn shutdown_boxed(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>>;

    fn name(&self) -> &str;
}

/// Blanket implementation: any `MetricSink` can be used as `MetricSinkBoxed`.
impl<T: MetricSink> MetricSinkBoxed for T {
    fn export_boxed(
        &self,
        batch: MetricBatch,
    ) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>> {
        Box::pin(self.export(batch))
    }

    fn shutdown_boxed(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>> {
        Box::pin(self.shutdown())
    }

    fn name(&self) -> &str {
        MetricSink::name(self)
    }
}

/// Stdout metric sink for development and the demo binary.
pub struct StdoutMetricSink {
    verbose: bool,
}

impl StdoutMetricSink {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl MetricSink for StdoutMetricSink {
    async fn export(&self, batch: MetricBatch) -> Result<(), ExportError> {
        if self.verbose {
            let json = serde_json::to_string_pretty(&batch)
                .map_err(|e| ExportError::Serialization(e.to_string()))?;
            println!("=== metric batch ({} entries) ===\n{json}", batch.len());
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// Null metric sink that discards all batches.
#[derive(Default)]
pub struct NullMetricSink;

impl NullMetricSink {
    pub fn new() -> Self {
        Self
    }
}

impl MetricSink for NullMetricSink {
    async fn export(&self, _batch: MetricBatch) -> Result<(), ExportError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Test span sink that records everything submitted.
#[cfg(test)]
pub struct TestSpanSink {
    spans: std::sync::Mutex<Vec<Span>>,
}

#[cfg(test)]
impl TestSpanSink {
    pub fn new() -> Self {
        Self {
            spans: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn submitted_count(&self) -> usize {
        self.spans.lock().unwrap().len()
    }

    pub fn all_spans(&self) -> Vec<Span> {
        self.spans.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl SpanSink for TestSpanSink {
    fn submit(&self, span: Span) {
        self.spans.lock().unwrap().push(span);
    }

    fn name(&self) -> &str {
        "test"
    }
}

/// Test metric sink that records exported batches.
#[cfg(test)]
pub struct TestMetricSink {
    batches: std::sync::Mutex<Vec<MetricBatch>>,
    shutdowns: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl TestMetricSink {
    pub fn new() -> Self {
        Self {
            batches: std::sync::Mutex::new(Vec::new()),
            shutdowns: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn exported_batches(&self) -> Vec<MetricBatch> {
        self.batches.lock().unwrap().clone()
    }

    pub fn shutdown_count(&self) -> u64 {
        self.shutdowns.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
impl MetricSink for TestMetricSink {
    async fn export(&self, batch: MetricBatch) -> Result<(), ExportError> {
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        self.shutdowns
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &str {
        "test"
    }
}

/// Metric sink that fails every export with a fixed cause.
#[cfg(test)]
pub struct FailingMetricSink {
    cause: String,
}

#[cfg(test)]
impl FailingMetricSink {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
        }
    }
}

#[cfg(test)]
impl MetricSink for FailingMetricSink {
    async fn export(&self, _batch: MetricBatch) -> Result<(), ExportError> {
        Err(ExportError::Failed(self.cause.clone()))
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        Err(ExportError::Transport(self.cause.clone()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

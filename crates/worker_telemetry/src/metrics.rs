//! On-demand metric collection and export.
//!
//! The host has no periodic scheduler, so there is no timer anywhere in
//! this module: a flush happens only when the caller asks for one,
//! typically once per activation after the unit of work settles. Each
//! flush is destructive — it covers exactly the data recorded since the
//! previous flush.
//!
//! Concurrent activations within one process accumulate into the same
//! aggregator; the ordering of concurrent flushes decides which activation's
//! metrics land in which exported batch. That non-determinism is accepted
//! and documented, not worked around.

use crate::exporter::{ExportError, MetricSinkBoxed};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

/// Default cause attached when a sink reports failure without one.
pub const DEFAULT_EXPORT_FAILURE: &str = "metric export failed";

/// Value recorded by a single instrument since the last collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricValue {
    Counter(u64),
    Gauge(f64),
}

/// One instrument's contribution to a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    pub name: String,
    pub value: MetricValue,
}

/// Snapshot of all metric data recorded since the last collection.
///
/// Ownership transfers to the sink for the duration of the export call;
/// the collector keeps no reference after handing it off.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricBatch {
    pub entries: Vec<MetricEntry>,
}

impl MetricBatch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Non-fatal error raised while producing a batch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("collection error: {0}")]
pub struct CollectionError(pub String);

/// Result of asking the aggregator for the current batch.
#[derive(Debug, Default)]
pub struct Collection {
    pub batch: MetricBatch,
    pub errors: Vec<CollectionError>,
}

/// Completion signal reported by callback-shaped export backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Success,
    Failure(Option<String>),
}

impl ExportOutcome {
    /// Converts the signal into a result, defaulting a causeless failure to
    /// the generic [`DEFAULT_EXPORT_FAILURE`] cause.
    pub fn into_result(self) -> Result<(), ExportError> {
        match self {
            Self::Success => Ok(()),
            Self::Failure(cause) => Err(ExportError::Failed(
                cause.unwrap_or_else(|| DEFAULT_EXPORT_FAILURE.to_string()),
            )),
        }
    }
}

/// External metric aggregator interface.
///
/// The aggregator is assumed to already bucket/sum instrument values; this
/// crate only decides when to ask it for a batch. Collection is
/// destructive: it resets the aggregator's accumulation for the next cycle.
pub trait MetricAggregator: Send + Sync {
    fn collect(&self) -> Collection;
}

#[derive(Default)]
struct AggregatorState {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, f64>,
}

/// Reference aggregator: named delta counters and gauges.
///
/// Process-wide shared state; every activation's instruments accumulate
/// here until a flush drains them. Clones share the same accumulation.
#[derive(Clone, Default)]
pub struct DeltaAggregator {
    state: Arc<Mutex<AggregatorState>>,
}

impl DeltaAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates (or reuses) a named counter instrument.
    pub fn counter(&self, name: impl Into<String>) -> Counter {
        Counter {
            name: name.into(),
            state: Arc::clone(&self.state),
        }
    }

    /// Creates (or reuses) a named gauge instrument.
    pub fn gauge(&self, name: impl Into<String>) -> Gauge {
        Gauge {
            name: name.into(),
            state: Arc::clone(&self.state),
        }
    }
}

impl MetricAggregator for DeltaAggregator {
    fn collect(&self) -> Collection {
        let mut errors = Vec::new();
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => {
                // A panicked writer leaves a partial batch behind; still
                // exportable, so surface the condition without failing.
                errors.push(CollectionError("aggregator mutex poisoned".to_string()));
                poisoned.into_inner()
            }
        };

        let state = &mut *state;
        let mut entries: Vec<MetricEntry> = state
            .counters
            .drain()
            .map(|(name, value)| MetricEntry {
                name,
                value: MetricValue::Counter(value),
            })
            .chain(state.gauges.drain().map(|(name, value)| MetricEntry {
                name,
                value: MetricValue::Gauge(value),
            }))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        Collection {
            batch: MetricBatch { entries },
            errors,
        }
    }
}

/// Handle for incrementing a named counter.
#[derive(Clone)]
pub struct Counter {
    name: String,
    state: Arc<Mutex<AggregatorState>>,
}

impl Counter {
    pub fn add(&self, delta: u64) {
        if let Ok(mut state) = self.state.lock() {
            *state.counters.entry(self.name.clone()).or_insert(0) += delta;
        }
    }

    pub fn increment(&self) {
        self.add(1);
    }
}

/// Handle for recording a named gauge.
#[derive(Clone)]
pub struct Gauge {
    name: String,
    state: Arc<Mutex<AggregatorState>>,
}

impl Gauge {
    pub fn record(&self, value: f64) {
        if let Ok(mut state) = self.state.lock() {
            state.gauges.insert(self.name.clone(), value);
        }
    }
}

/// Flush statistics (thread-safe; flushes may race across activations).
#[derive(Debug, Default)]
pub struct FlushStats {
    flushes: AtomicU64,
    entries_exported: AtomicU64,
    export_errors: AtomicU64,
}

impl FlushStats {
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn entries_exported(&self) -> u64 {
        self.entries_exported.load(Ordering::Relaxed)
    }

    pub fn export_errors(&self) -> u64 {
        self.export_errors.load(Ordering::Relaxed)
    }

    fn record_success(&self, entry_count: u64) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.entries_exported.fetch_add(entry_count, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.export_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Bridges the aggregator to the export sink, on explicit demand only.
pub struct MetricCollector {
    aggregator: Arc<dyn MetricAggregator>,
    sink: Arc<dyn MetricSinkBoxed>,
    stats: FlushStats,
    shut_down: AtomicBool,
}

impl MetricCollector {
    pub fn new(aggregator: Arc<dyn MetricAggregator>, sink: Arc<dyn MetricSinkBoxed>) -> Self {
        Self {
            aggregator,
            sink,
            stats: FlushStats::default(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Collects the current batch and exports it.
    ///
    /// Collection errors are logged and do not by themselves fail the
    /// flush; a degraded batch is still exported. An empty batch is still
    /// exported and an accepting sink makes the flush succeed. The flush
    /// fails only on a sink error, carrying the sink-reported cause.
    pub async fn flush(&self) -> Result<(), ExportError> {
        let Collection { batch, errors } = self.aggregator.collect();
        for error in &errors {
            warn!(%error, "metric collection error; continuing with degraded batch");
        }

        let entry_count = batch.len() as u64;
        match self.sink.export_boxed(batch).await {
            Ok(()) => {
                self.stats.record_success(entry_count);
                debug!(entries = entry_count, sink = self.sink.name(), "metric batch exported");
                Ok(())
            }
            Err(e) => {
                self.stats.record_error();
                Err(e)
            }
        }
    }

    /// Delegates to the sink's shutdown at most once; later calls no-op.
    pub async fn shutdown(&self) -> Result<(), ExportError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.sink.shutdown_boxed().await
    }

    pub fn stats(&self) -> &FlushStats {
        &self.stats
    }
}

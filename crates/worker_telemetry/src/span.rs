//! Span data model handed to the tracing backend.
//!
//! A span is mutated only by the unit of work that owns it and is sealed
//! exactly once via [`Span::finish`]; sealing twice is a programming error
//! and panics rather than being silently tolerated.

use crate::context::TraceContext;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Scalar attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<usize> for AttributeValue {
    fn from(v: usize) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Span kind. Inbound calls and RPC method invocations are server-side;
/// everything else instrumented in-process is internal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Server,
    Internal,
}

/// Terminal status of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Unset,
    Ok,
    Error,
}

/// One unit-of-work observability record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: u128,
    pub span_id: u64,
    pub parent_span_id: u64,
    pub name: String,
    pub kind: SpanKind,
    pub start_nanos: u64,
    pub end_nanos: Option<u64>,
    pub attributes: HashMap<String, AttributeValue>,
    pub status: SpanStatus,
    pub exception: Option<String>,
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

impl Span {
    /// Creates an open span starting now.
    pub fn new(
        trace_id: u128,
        span_id: u64,
        parent_span_id: u64,
        name: String,
        kind: SpanKind,
    ) -> Self {
        Self {
            trace_id,
            span_id,
            parent_span_id,
            name,
            kind,
            start_nanos: now_nanos(),
            end_nanos: None,
            attributes: HashMap::new(),
            status: SpanStatus::Unset,
            exception: None,
        }
    }

    /// The trace position this span occupies, for deriving child contexts.
    pub fn context(&self) -> TraceContext {
        TraceContext {
            trace_id: self.trace_id,
            span_id: self.span_id,
        }
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn set_attributes(
        &mut self,
        attributes: impl IntoIterator<Item = (String, AttributeValue)>,
    ) {
        self.attributes.extend(attributes);
    }

    /// Records the thrown error on the span. Does not seal it.
    pub fn record_exception(&mut self, error: &(dyn std::error::Error + 'static)) {
        self.exception = Some(error.to_string());
    }

    /// Seals the span with a terminal status.
    ///
    /// # Panics
    ///
    /// Panics if the span was already sealed.
    pub fn finish(&mut self, status: SpanStatus) {
        assert!(
            self.end_nanos.is_none(),
            "span '{}' sealed twice",
            self.name
        );
        self.status = status;
        self.end_nanos = Some(now_nanos());
    }

    pub fn is_sealed(&self) -> bool {
        self.end_nanos.is_some()
    }

    pub fn duration_nanos(&self) -> u64 {
        self.end_nanos
            .unwrap_or_else(now_nanos)
            .saturating_sub(self.start_nanos)
    }
}

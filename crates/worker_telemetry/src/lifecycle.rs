//! Span lifecycle for inbound calls and RPC method invocations.
//!
//! A span moves `open -> (success | error) -> sealed`; sealing is
//! exactly-once (enforced by [`Span::finish`]) and the sealed span is
//! handed to the tracing backend. Handler errors are recorded on the span
//! and re-thrown unchanged by the interception layer; they are never
//! swallowed or replaced here.

use crate::config::ServiceConfig;
use crate::context::TraceContext;
use crate::exporter::SpanSink;
use crate::extract::{self, Request, Response};
use crate::span::{Span, SpanKind, SpanStatus};
use crate::BoxError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Prefix marking a method as internal: context is propagated but no span
/// is created for it.
pub const INTERNAL_METHOD_PREFIX: char = '_';

/// Visibility classification of an intercepted method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Public,
    Internal,
}

/// Classifies a method by naming convention.
pub fn method_kind(name: &str) -> MethodKind {
    if name.starts_with(INTERNAL_METHOD_PREFIX) {
        MethodKind::Internal
    } else {
        MethodKind::Public
    }
}

/// Opens and closes spans for units of work, applying status and attribute
/// policy, and hands sealed spans to the tracing backend.
pub struct Tracer {
    sink: Arc<dyn SpanSink>,
    service: ServiceConfig,
    cold_start: AtomicBool,
}

impl Tracer {
    pub fn new(sink: Arc<dyn SpanSink>, service: ServiceConfig) -> Self {
        Self {
            sink,
            service,
            cold_start: AtomicBool::new(true),
        }
    }

    fn next_span_id() -> u64 {
        rand::random::<u64>()
    }

    /// True for the first inbound call observed by this tracer, false
    /// thereafter. Best-effort under concurrent first calls.
    fn consume_cold_start(&self) -> bool {
        self.cold_start.swap(false, Ordering::Relaxed)
    }

    fn resource_attributes(&self, span: &mut Span) {
        span.set_attribute("service.name", self.service.name.as_str());
        if let Some(version) = &self.service.version {
            span.set_attribute("service.version", version.as_str());
        }
    }

    /// Opens the server-kind span for an inbound call.
    pub fn open_entry(&self, parent: TraceContext, req: &Request, trigger: &str) -> Span {
        let name = format!("{} {}", req.method, extract::url_path(&req.url));
        let mut span = Span::new(
            parent.trace_id,
            Self::next_span_id(),
            parent.span_id,
            name,
            SpanKind::Server,
        );
        self.resource_attributes(&mut span);
        span.set_attribute("faas.trigger", trigger);
        span.set_attribute("faas.coldstart", self.consume_cold_start());
        span.set_attributes(extract::request_attributes(req));
        span
    }

    /// Seals an inbound-call span from the handler's outcome.
    ///
    /// On success the response attributes are attached and the status is OK
    /// only if `judge` accepts the response. On error the exception is
    /// recorded and the status is Error; the caller re-throws the error
    /// unchanged after the span is sealed.
    pub fn close_entry(
        &self,
        mut span: Span,
        outcome: &Result<Response, BoxError>,
        judge: &dyn Fn(&Response) -> bool,
    ) {
        match outcome {
            Ok(response) => {
                span.set_attributes(extract::response_attributes(response));
                let status = if judge(response) {
                    SpanStatus::Ok
                } else {
                    SpanStatus::Error
                };
                span.finish(status);
            }
            Err(error) => {
                span.record_exception(error.as_ref());
                span.finish(SpanStatus::Error);
            }
        }
        self.sink.submit(span);
    }

    /// Opens the span for a public-callable method invocation. Internal
    /// methods never reach this; the interception layer checks
    /// [`method_kind`] first.
    pub fn open_method(&self, parent: TraceContext, method: &str, arg_count: usize) -> Span {
        let mut span = Span::new(
            parent.trace_id,
            Self::next_span_id(),
            parent.span_id,
            method.to_string(),
            SpanKind::Server,
        );
        self.resource_attributes(&mut span);
        span.set_attribute("faas.trigger", "rpc");
        span.set_attribute("rpc.method", method);
        span.set_attribute("rpc.args_count", arg_count);
        span
    }

    /// Seals a method-invocation span from the invocation's outcome.
    pub fn close_method<T>(&self, mut span: Span, outcome: &Result<T, BoxError>) {
        match outcome {
            Ok(_) => span.finish(SpanStatus::Ok),
            Err(error) => {
                span.record_exception(error.as_ref());
                span.finish(SpanStatus::Error);
            }
        }
        self.sink.submit(span);
    }
}

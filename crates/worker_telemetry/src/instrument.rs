//! Behavior-preserving instrumented stand-ins for handler functions,
//! handler objects, and handler factories.
//!
//! Each wrapper is an explicit type holding the original plus the override
//! logic: intercepted operations (the entry method, RPC method dispatch,
//! construction) run the original behavior inside a scoped ambient context
//! and, where applicable, a span; everything else falls through to the
//! wrapped value unchanged. Dispatch over "what kind of value did a method
//! return" is an explicit tagged variant ([`RpcValue`]), not runtime shape
//! sniffing.

use crate::activation::TelemetryRuntime;
use crate::context::ActiveContext;
use crate::extract::{parse_traceparent, Request, Response};
use crate::host::{Env, LifetimeHandle};
use crate::lifecycle::{method_kind, MethodKind};
use crate::BoxError;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

/// A caller-supplied entry handler: the externally-callable entry method
/// of a handler object.
#[async_trait]
pub trait EntryHandler: Send + Sync {
    async fn fetch(&self, req: Request) -> Result<Response, BoxError>;
}

/// Adapts an async closure into an [`EntryHandler`] (function wrapping).
pub struct FnHandler<F> {
    f: F,
}

/// Wraps any async request-handling closure so it can be instrumented like
/// a handler object.
pub fn entry_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, BoxError>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> EntryHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, BoxError>> + Send,
{
    async fn fetch(&self, req: Request) -> Result<Response, BoxError> {
        (self.f)(req).await
    }
}

/// An RPC-callable object: methods are dispatched by name with positional
/// JSON arguments.
#[async_trait]
pub trait RpcTarget: Send + Sync {
    async fn invoke(&self, method: &str, args: Vec<serde_json::Value>)
        -> Result<RpcValue, BoxError>;

    /// Capability flag used to keep wrapping idempotent. Only the
    /// instrumented stand-in returns true.
    fn instrumented(&self) -> bool {
        false
    }
}

/// Value returned by an RPC method, dispatched by capability kind.
///
/// A returned [`RpcValue::Target`] is itself RPC-callable and is wrapped
/// recursively so calls through it are instrumented too.
pub enum RpcValue {
    Plain(serde_json::Value),
    Target(Arc<dyn RpcTarget>),
}

impl RpcValue {
    pub fn as_plain(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Plain(value) => Some(value),
            Self::Target(_) => None,
        }
    }

    pub fn into_target(self) -> Option<Arc<dyn RpcTarget>> {
        match self {
            Self::Plain(_) => None,
            Self::Target(target) => Some(target),
        }
    }
}

impl From<serde_json::Value> for RpcValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Plain(value)
    }
}

impl fmt::Debug for RpcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(value) => f.debug_tuple("Plain").field(value).finish(),
            Self::Target(_) => f.debug_tuple("Target").field(&"..").finish(),
        }
    }
}

/// Instrumented stand-in for a handler object.
///
/// Intercepts the entry method with an inbound-call span and a scoped
/// ambient context; exposes the wrapper-held [`Env`] and [`LifetimeHandle`]
/// through dedicated accessors; every other member falls through to the
/// wrapped handler via `Deref`.
pub struct Instrumented<H> {
    inner: H,
    env: Env,
    lifetime: LifetimeHandle,
    runtime: Arc<TelemetryRuntime>,
}

impl<H> Instrumented<H> {
    pub(crate) fn new(
        inner: H,
        env: Env,
        lifetime: LifetimeHandle,
        runtime: Arc<TelemetryRuntime>,
    ) -> Self {
        Self {
            inner,
            env,
            lifetime,
            runtime,
        }
    }

    /// The ambient environment bindings for this activation.
    pub fn env(&self) -> &Env {
        &self.env
    }

    /// The cancellation/lifetime handle for this activation.
    pub fn lifetime(&self) -> &LifetimeHandle {
        &self.lifetime
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

impl<H> Deref for Instrumented<H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.inner
    }
}

#[async_trait]
impl<H: EntryHandler> EntryHandler for Instrumented<H> {
    async fn fetch(&self, req: Request) -> Result<Response, BoxError> {
        let ambient = ActiveContext::current();
        if let Some(ctx) = &ambient {
            if ctx.entry_active() {
                // Already inside an instrumented entry call: a second layer
                // of wrapping must not open a second inbound span.
                return self.inner.fetch(req).await;
            }
        }

        // Parent preference: in-process ambient context, then the remote
        // parent carried on the request, then a fresh root trace.
        let base = ambient.unwrap_or_else(|| {
            match req.header("traceparent").and_then(parse_traceparent) {
                Some(remote) => ActiveContext::from_trace(remote),
                None => ActiveContext::root(),
            }
        });

        let span = self
            .runtime
            .tracer()
            .open_entry(base.trace(), &req, "http");
        let ctx = base.for_entry(span.span_id);

        let outcome = ActiveContext::scope(ctx, self.inner.fetch(req)).await;

        self.runtime
            .tracer()
            .close_entry(span, &outcome, self.runtime.response_judge());
        outcome
    }
}

/// Instrumented stand-in for an RPC-callable object.
pub struct InstrumentedTarget {
    inner: Arc<dyn RpcTarget>,
    runtime: Arc<TelemetryRuntime>,
}

impl InstrumentedTarget {
    fn wrap_value(&self, value: RpcValue) -> RpcValue {
        match value {
            RpcValue::Plain(v) => RpcValue::Plain(v),
            RpcValue::Target(t) => RpcValue::Target(wrap_target(&self.runtime, t)),
        }
    }
}

/// Wraps an RPC target so its method invocations are instrumented.
/// Idempotent: an already-instrumented target is returned unchanged.
pub fn wrap_target(
    runtime: &Arc<TelemetryRuntime>,
    target: Arc<dyn RpcTarget>,
) -> Arc<dyn RpcTarget> {
    if target.instrumented() {
        return target;
    }
    Arc::new(InstrumentedTarget {
        inner: target,
        runtime: Arc::clone(runtime),
    })
}

#[async_trait]
impl RpcTarget for InstrumentedTarget {
    async fn invoke(
        &self,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<RpcValue, BoxError> {
        let base = ActiveContext::current().unwrap_or_else(ActiveContext::root);

        match method_kind(method) {
            MethodKind::Internal => {
                // No span, but the ambient context still covers the call.
                let outcome =
                    ActiveContext::scope(base, self.inner.invoke(method, args)).await;
                outcome.map(|value| self.wrap_value(value))
            }
            MethodKind::Public => {
                let span =
                    self.runtime
                        .tracer()
                        .open_method(base.trace(), method, args.len());
                let ctx = base.child_of(span.span_id);

                let outcome =
                    ActiveContext::scope(ctx, self.inner.invoke(method, args)).await;

                self.runtime.tracer().close_method(span, &outcome);
                outcome.map(|value| self.wrap_value(value))
            }
        }
    }

    fn instrumented(&self) -> bool {
        true
    }
}

/// Constructs handler instances; the class-shaped analog of a handler
/// object.
pub trait HandlerFactory: Send + Sync {
    type Handler: EntryHandler;

    fn build(&self, env: &Env, lifetime: &LifetimeHandle) -> Self::Handler;
}

/// Any constructor-shaped closure is a handler factory.
impl<H, F> HandlerFactory for F
where
    H: EntryHandler,
    F: Fn(&Env, &LifetimeHandle) -> H + Send + Sync,
{
    type Handler = H;

    fn build(&self, env: &Env, lifetime: &LifetimeHandle) -> H {
        (self)(env, lifetime)
    }
}

/// Instrumented stand-in for a handler class: construction runs inside an
/// ambient context (constructor-time effects are attributable), and the
/// built instance comes back object-wrapped.
pub struct InstrumentedFactory<F> {
    factory: F,
    runtime: Arc<TelemetryRuntime>,
}

impl<F: HandlerFactory> InstrumentedFactory<F> {
    pub(crate) fn new(factory: F, runtime: Arc<TelemetryRuntime>) -> Self {
        Self { factory, runtime }
    }

    /// Builds the real handler inside a fresh ambient scope, then wraps it.
    /// The activation configuration was resolved when the runtime was
    /// built; it is readable by the constructor through the runtime.
    pub fn construct(&self, env: Env, lifetime: LifetimeHandle) -> Instrumented<F::Handler> {
        let ctx = ActiveContext::root();
        let handler = ActiveContext::sync_scope(ctx, || self.factory.build(&env, &lifetime));
        Instrumented::new(handler, env, lifetime, Arc::clone(&self.runtime))
    }
}

/// Constructs RPC-callable instances.
pub trait RpcFactory: Send + Sync {
    fn build(&self, env: &Env, lifetime: &LifetimeHandle) -> Arc<dyn RpcTarget>;
}

/// Instrumented stand-in for an RPC-callable class.
pub struct InstrumentedRpcFactory<F> {
    factory: F,
    runtime: Arc<TelemetryRuntime>,
}

impl<F: RpcFactory> InstrumentedRpcFactory<F> {
    pub(crate) fn new(factory: F, runtime: Arc<TelemetryRuntime>) -> Self {
        Self { factory, runtime }
    }

    pub fn construct(&self, env: Env, lifetime: LifetimeHandle) -> Arc<dyn RpcTarget> {
        let ctx = ActiveContext::root();
        let target = ActiveContext::sync_scope(ctx, || self.factory.build(&env, &lifetime));
        wrap_target(&self.runtime, target)
    }
}

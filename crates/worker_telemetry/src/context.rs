//! Ambient tracing context, scoped to one logical activation.
//!
//! The context is established for the dynamic extent of a future via
//! [`ActiveContext::scope`] and is inherited across every `.await` inside
//! that extent. It is a task-local save/restore discipline: the previous
//! context is restored when the scope unwinds, whether by normal return or
//! panic, and interleaved activations on the same thread never observe each
//! other's context. There is no shared mutable global.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

tokio::task_local! {
    static CURRENT: ActiveContext;
}

/// Identifiers linking a unit of work into a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: u128,
    pub span_id: u64,
}

impl TraceContext {
    /// Generates a fresh root context with random identifiers.
    pub fn generate() -> Self {
        Self {
            trace_id: rand::random::<u128>(),
            span_id: rand::random::<u64>(),
        }
    }

    /// Returns a context in the same trace with `span_id` as the new parent.
    pub fn child(&self, span_id: u64) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id,
        }
    }
}

/// Immutable per-activation context: the current trace position plus
/// request-scoped properties.
///
/// A nested scope receives a *replaced* value (`child_of`, `for_entry`),
/// never a mutation of the outer one; the outer value is observed again as
/// soon as the nested scope exits.
#[derive(Debug, Clone)]
pub struct ActiveContext {
    trace: TraceContext,
    entry_active: bool,
    properties: Arc<HashMap<String, String>>,
}

impl ActiveContext {
    /// Creates a root context with a fresh trace.
    pub fn root() -> Self {
        Self::from_trace(TraceContext::generate())
    }

    /// Creates a root context continuing an existing (e.g. remote) trace.
    pub fn from_trace(trace: TraceContext) -> Self {
        Self {
            trace,
            entry_active: false,
            properties: Arc::new(HashMap::new()),
        }
    }

    /// Returns a copy carrying the given request-scoped properties.
    pub fn with_properties(mut self, properties: HashMap<String, String>) -> Self {
        self.properties = Arc::new(properties);
        self
    }

    pub fn trace(&self) -> TraceContext {
        self.trace
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// True while an instrumented entry call is on the stack. Used as the
    /// re-wrap guard: a second instrumented layer delegates instead of
    /// opening another inbound span.
    pub fn entry_active(&self) -> bool {
        self.entry_active
    }

    /// Returns a new context in the same trace, parented at `span_id`.
    pub fn child_of(&self, span_id: u64) -> Self {
        Self {
            trace: self.trace.child(span_id),
            entry_active: self.entry_active,
            properties: Arc::clone(&self.properties),
        }
    }

    /// Like [`child_of`](Self::child_of), additionally marking the entry
    /// span as active for the extent of the inbound call.
    pub fn for_entry(&self, span_id: u64) -> Self {
        Self {
            trace: self.trace.child(span_id),
            entry_active: true,
            properties: Arc::clone(&self.properties),
        }
    }

    /// The context ambient at the caller, if any.
    pub fn current() -> Option<ActiveContext> {
        CURRENT.try_with(Clone::clone).ok()
    }

    /// Runs `fut` with `ctx` as the ambient context for its dynamic extent,
    /// including across asynchronous suspension inside `fut`.
    pub async fn scope<F: Future>(ctx: ActiveContext, fut: F) -> F::Output {
        CURRENT.scope(ctx, fut).await
    }

    /// Synchronous variant of [`scope`](Self::scope), used around
    /// constructor-time code.
    pub fn sync_scope<T>(ctx: ActiveContext, f: impl FnOnce() -> T) -> T {
        CURRENT.sync_scope(ctx, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn current_is_none_outside_any_scope() {
        assert!(ActiveContext::current().is_none());
    }

    #[tokio::test]
    async fn scope_establishes_and_restores_context() {
        let ctx = ActiveContext::root();
        let trace = ctx.trace();

        ActiveContext::scope(ctx, async move {
            let seen = ActiveContext::current().unwrap();
            assert_eq!(seen.trace(), trace);
        })
        .await;

        assert!(ActiveContext::current().is_none());
    }

    #[tokio::test]
    async fn nested_scope_shadows_only_its_own_extent() {
        let outer = ActiveContext::root();
        let outer_trace = outer.trace();

        ActiveContext::scope(outer, async move {
            let inner = ActiveContext::root();
            let inner_trace = inner.trace();
            assert_ne!(outer_trace, inner_trace);

            ActiveContext::scope(inner, async move {
                assert_eq!(ActiveContext::current().unwrap().trace(), inner_trace);
            })
            .await;

            // Outer context observed again once the nested scope exits.
            assert_eq!(ActiveContext::current().unwrap().trace(), outer_trace);
        })
        .await;
    }

    #[tokio::test]
    async fn context_survives_suspension_across_interleaved_tasks() {
        async fn activation(id: u64) -> u128 {
            let ctx = ActiveContext::root();
            let trace_id = ctx.trace().trace_id;
            ActiveContext::scope(ctx, async move {
                for _ in 0..10 {
                    tokio::time::sleep(std::time::Duration::from_micros(id * 10)).await;
                    assert_eq!(
                        ActiveContext::current().unwrap().trace().trace_id,
                        trace_id
                    );
                }
                trace_id
            })
            .await
        }

        let (a, b) = tokio::join!(activation(1), activation(2));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn properties_are_readable_inside_the_scope() {
        let mut props = HashMap::new();
        props.insert("tenant".to_string(), "acme".to_string());
        let ctx = ActiveContext::root().with_properties(props);

        ActiveContext::scope(ctx, async {
            let seen = ActiveContext::current().unwrap();
            assert_eq!(seen.property("tenant"), Some("acme"));
            assert_eq!(seen.property("missing"), None);
        })
        .await;
    }

    #[test]
    fn sync_scope_covers_constructor_time_code() {
        let ctx = ActiveContext::root();
        let trace = ctx.trace();
        let seen = ActiveContext::sync_scope(ctx, || ActiveContext::current().unwrap().trace());
        assert_eq!(seen, trace);
    }

    #[test]
    fn child_of_replaces_rather_than_mutates() {
        let ctx = ActiveContext::root();
        let child = ctx.child_of(42);
        assert_eq!(child.trace().trace_id, ctx.trace().trace_id);
        assert_eq!(child.trace().span_id, 42);
        // The original is untouched.
        assert_ne!(ctx.trace().span_id, 42);
    }
}

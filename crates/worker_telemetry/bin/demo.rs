//! # Worker Telemetry Demo
//!
//! End-to-end demonstration of the instrumentation pipeline against the
//! stdout reference sinks:
//!
//! 1. A handler class is wrapped via `ActivationCoordinator::instrument`
//!    and constructed inside an ambient context.
//! 2. Inbound calls open server spans (cold start on the first one),
//!    propagate context across suspension, and seal with status derived
//!    from the response.
//! 3. An RPC target is wrapped; public methods get spans, the
//!    underscore-prefixed method only inherits the context.
//! 4. After every activation the coordinator triggers an on-demand metric
//!    flush — there is no timer anywhere.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use worker_telemetry::{
    ActivationCoordinator, ActiveContext, BoxError, Counter, DeltaAggregator, Env, EntryHandler,
    HandlerFactory, LifetimeHandle, Request, Response, RpcFactory, RpcTarget, RpcValue,
    StdoutMetricSink, StdoutSpanSink, TelemetryRuntime, UserConfig,
};

struct OrdersHandler {
    requests: Counter,
}

#[async_trait]
impl EntryHandler for OrdersHandler {
    async fn fetch(&self, req: Request) -> Result<Response, BoxError> {
        self.requests.increment();
        let trace = ActiveContext::current()
            .map(|ctx| format!("{:032x}", ctx.trace().trace_id))
            .unwrap_or_default();
        tracing::info!(url = %req.url, %trace, "handling request");

        // Suspension point: the ambient context must survive it.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        if req.url.contains("boom") {
            return Err("simulated handler failure".into());
        }
        Ok(Response::ok().with_body(format!("handled {}", req.url)))
    }
}

struct OrdersFactory {
    requests: Counter,
}

impl HandlerFactory for OrdersFactory {
    type Handler = OrdersHandler;

    fn build(&self, _env: &Env, _lifetime: &LifetimeHandle) -> Self::Handler {
        OrdersHandler {
            requests: self.requests.clone(),
        }
    }
}

struct InventoryTarget;

#[async_trait]
impl RpcTarget for InventoryTarget {
    async fn invoke(&self, method: &str, args: Vec<serde_json::Value>) -> Result<RpcValue, BoxError> {
        match method {
            "reserve" => Ok(RpcValue::Plain(json!({"reserved": args.len()}))),
            "_rebuild_index" => Ok(RpcValue::Plain(json!("ok"))),
            other => Err(format!("no such method: {other}").into()),
        }
    }
}

struct InventoryFactory;

impl RpcFactory for InventoryFactory {
    fn build(&self, _env: &Env, _lifetime: &LifetimeHandle) -> Arc<dyn RpcTarget> {
        Arc::new(InventoryTarget)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let aggregator = DeltaAggregator::new();
    let runtime = Arc::new(TelemetryRuntime::new(
        UserConfig::default(),
        Arc::new(StdoutSpanSink::new(true)),
        Arc::new(aggregator.clone()),
        Arc::new(StdoutMetricSink::new(true)),
    ));
    let coordinator = ActivationCoordinator::new(runtime);

    let handler = coordinator
        .instrument(OrdersFactory {
            requests: aggregator.counter("demo_requests_total"),
        })
        .construct(Env::default(), LifetimeHandle::new());

    // Two successful activations and one failing one.
    for url in [
        "https://demo.local/orders/1",
        "https://demo.local/orders/2",
        "https://demo.local/boom",
    ] {
        match coordinator.run(&handler, Request::get(url)).await {
            Ok(resp) => println!("-> {} {}", resp.status, String::from_utf8_lossy(&resp.body)),
            Err(err) => println!("-> handler error: {err}"),
        }
    }

    // RPC target: public method gets a span, internal method does not.
    let inventory = coordinator
        .instrument_rpc(InventoryFactory)
        .construct(Env::default(), LifetimeHandle::new());
    inventory
        .invoke("reserve", vec![json!("sku-1"), json!("sku-2")])
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    inventory
        .invoke("_rebuild_index", vec![])
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let stats = coordinator.runtime().metrics().stats();
    println!(
        "flushes={} entries_exported={} export_errors={}",
        stats.flushes(),
        stats.entries_exported(),
        stats.export_errors()
    );

    coordinator
        .runtime()
        .metrics()
        .shutdown()
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    Ok(())
}

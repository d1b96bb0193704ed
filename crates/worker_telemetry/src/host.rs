//! Host-provided collaborators: environment bindings and the activation
//! lifetime handle.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Immutable environment bindings handed to a handler at construction.
#[derive(Debug, Clone, Default)]
pub struct Env {
    bindings: Arc<HashMap<String, Value>>,
}

impl Env {
    pub fn new(bindings: HashMap<String, Value>) -> Self {
        Self {
            bindings: Arc::new(bindings),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }
}

/// Cancellation/lifetime handle for one activation.
///
/// The host fires it when the activation is being torn down; in-flight
/// exports are then not guaranteed to complete.
#[derive(Debug, Clone)]
pub struct LifetimeHandle {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for LifetimeHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl LifetimeHandle {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Fires the handle. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the handle has fired.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // Never fails: `tx` lives as long as `self`.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

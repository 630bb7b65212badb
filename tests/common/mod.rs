//! Shared helpers for integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use tandem::{Runtime, RuntimeConfig, RuntimeMode};

/// Install a test subscriber honouring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Start a runtime in the given mode with otherwise default settings
pub fn runtime(mode: RuntimeMode) -> Runtime {
    init_tracing();
    Runtime::new(RuntimeConfig {
        mode,
        ..RuntimeConfig::default()
    })
    .expect("runtime should start")
}

/// Values seen by a listener, in notification order
#[derive(Clone)]
pub struct Recorder<T> {
    seen: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Listener callback appending every value it receives
    pub fn listener(&self) -> impl Fn(&T) + Send + Sync + 'static + use<T> {
        let seen = Arc::clone(&self.seen);
        move |value: &T| seen.lock().push(value.clone())
    }

    pub fn values(&self) -> Vec<T> {
        self.seen.lock().clone()
    }
}

//! Runtime orchestrator and public API
//!
//! This module provides the main `Runtime` struct that owns the handle
//! registry, the dispatcher and the realtime worker, and creates cells.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

// Submodules
pub mod cell;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod holder;
pub mod policy;
pub mod realtime;
pub mod registry;
pub mod value;

use dispatch::Dispatcher;
use error::{CellResult, Result, RuntimeError};
use realtime::{RealtimeScope, RealtimeWorker};
use registry::HandleRegistry;

/// Whether the platform separates the control and realtime runtimes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    /// Two runtimes; cells proxy writes through dispatch
    Native,
    /// One runtime; cells own their storage
    Web,
}

impl RuntimeMode {
    /// Mode supported by the current build target
    pub fn detect() -> Self {
        if cfg!(target_arch = "wasm32") {
            RuntimeMode::Web
        } else {
            RuntimeMode::Native
        }
    }
}

impl Default for RuntimeMode {
    fn default() -> Self {
        Self::detect()
    }
}

/// Configuration for the tandem runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime separation mode
    pub mode: RuntimeMode,

    /// Policy applied to every cell write
    pub commit_policy: CommitPolicy,

    /// Default for cells created without explicit options
    pub one_way_reads_only: bool,

    /// Name of the realtime worker thread (native mode)
    pub realtime_thread_name: String,

    /// Enable debug logging of realtime jobs
    pub debug: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: RuntimeMode::default(),
            commit_policy: CommitPolicy::default(),
            one_way_reads_only: false,
            realtime_thread_name: "tandem-realtime".to_string(),
            debug: false,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration as pretty JSON
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let data = serde_json::to_vec_pretty(self).map_err(RuntimeError::from)?;
        fs::write(path, data)
            .with_context(|| format!("failed to write config {}", path.display()))?;
        Ok(())
    }

    /// Check that the configuration can start a runtime
    pub fn validate(&self) -> Result<()> {
        if self.realtime_thread_name.is_empty() || self.realtime_thread_name.contains('\0') {
            return Err(RuntimeError::Config(format!(
                "invalid realtime thread name {:?}",
                self.realtime_thread_name
            )));
        }
        Ok(())
    }

    /// Default per-cell options
    pub fn cell_options(&self) -> CellOptions {
        CellOptions {
            one_way_reads_only: self.one_way_reads_only,
        }
    }
}

/// The main runtime orchestrator
///
/// In native mode this owns the realtime worker thread; dropping the runtime
/// stops the worker once the jobs queued before the drop have run.
pub struct Runtime {
    config: RuntimeConfig,
    registry: Arc<HandleRegistry>,
    dispatcher: Option<Dispatcher>,
    worker: Option<RealtimeWorker>,
}

impl Runtime {
    /// Create a new runtime with the given configuration
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(HandleRegistry::new());
        let (dispatcher, worker) = match config.mode {
            RuntimeMode::Native => {
                let (dispatcher, worker) = RealtimeWorker::spawn(
                    &config.realtime_thread_name,
                    Arc::clone(&registry),
                    config.debug,
                )?;
                (Some(dispatcher), Some(worker))
            }
            RuntimeMode::Web => (None, None),
        };

        tracing::debug!(
            mode = ?config.mode,
            policy = ?config.commit_policy,
            debug = config.debug,
            "runtime created"
        );

        Ok(Self {
            config,
            registry,
            dispatcher,
            worker,
        })
    }

    /// Load configuration from disk and start a runtime
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = RuntimeConfig::load(path)?;
        Ok(Self::new(config)?)
    }

    /// Get the current configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Runtime separation mode
    pub fn mode(&self) -> RuntimeMode {
        self.config.mode
    }

    /// Registry of live native cells
    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    /// Dispatcher feeding the realtime runtime (native mode only)
    pub fn dispatcher(&self) -> Option<&Dispatcher> {
        self.dispatcher.as_ref()
    }

    /// Create a cell with the configured default options
    pub fn cell<T: CellValue>(&self, initial: T) -> CellResult<ControlCell<T>> {
        self.cell_with(initial, self.config.cell_options())
    }

    /// Create a cell with explicit options
    pub fn cell_with<T: CellValue>(
        &self,
        initial: T,
        options: CellOptions,
    ) -> CellResult<ControlCell<T>> {
        let id = self.registry.allocate_id();
        match &self.dispatcher {
            Some(dispatcher) => ControlCell::remote(
                id,
                initial,
                options,
                self.config.commit_policy,
                dispatcher.clone(),
                &self.registry,
            ),
            None => Ok(ControlCell::local(id, initial, self.config.commit_policy)),
        }
    }

    /// Run a closure on the realtime runtime.
    ///
    /// Native mode enqueues it and returns; web mode runs it inline.
    pub fn run_on_realtime<F>(&self, job: F)
    where
        F: FnOnce(&mut RealtimeScope) + Send + 'static,
    {
        match &self.dispatcher {
            Some(dispatcher) => dispatcher.dispatch(job),
            None => {
                if self.config.debug {
                    tracing::debug!("running realtime job inline");
                }
                job(&mut RealtimeScope::new(Arc::clone(&self.registry)))
            }
        }
    }

    /// Block until every closure dispatched so far has run
    pub fn flush(&self) -> CellResult<()> {
        match &self.dispatcher {
            Some(dispatcher) => dispatcher.flush(),
            None => Ok(()),
        }
    }

    /// Wait until every closure dispatched so far has run
    pub async fn settled(&self) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.settled().await;
        }
    }

    /// Stop the realtime runtime after the queued closures have run
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.shutdown();
        }
        if let Some(mut worker) = self.worker.take() {
            worker.join();
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.stop();
    }
}

// Re-export commonly used types
pub use cell::{ListenerId, MutableCell};
pub use control::{CellOptions, ControlCell};
pub use policy::{CommitPolicy, RawSlot};
pub use realtime::RealtimeCell;
pub use value::CellValue;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.mode, RuntimeMode::Native);
        assert_eq!(config.commit_policy, CommitPolicy::SkipIdentical);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_bad_thread_name() {
        let config = RuntimeConfig {
            realtime_thread_name: String::new(),
            ..RuntimeConfig::default()
        };
        assert!(matches!(config.validate(), Err(RuntimeError::Config(_))));
        assert!(Runtime::new(config).is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: RuntimeConfig = serde_json::from_str(r#"{ "mode": "web" }"#).unwrap();
        assert_eq!(config.mode, RuntimeMode::Web);
        assert_eq!(config.realtime_thread_name, "tandem-realtime");
        assert!(!config.debug);
    }

    #[test]
    fn test_debug_runtime_runs_jobs() {
        let config: RuntimeConfig = serde_json::from_str(r#"{ "debug": true }"#).unwrap();
        assert!(config.debug);
        let runtime = Runtime::new(config).unwrap();
        let cell = runtime.cell(0_u8).unwrap();
        cell.set_value(3).unwrap();
        runtime.flush().unwrap();
        assert_eq!(cell.value().unwrap(), 3);
    }

    #[test]
    fn test_web_runtime_runs_jobs_inline() {
        let runtime = Runtime::new(RuntimeConfig {
            mode: RuntimeMode::Web,
            ..RuntimeConfig::default()
        })
        .unwrap();
        let cell = runtime.cell(1_i32).unwrap();
        let inner = cell.clone();
        runtime.run_on_realtime(move |scope| {
            scope.resolve(&inner).unwrap().set_value(2).unwrap();
        });
        assert_eq!(cell.value().unwrap(), 2);
        assert!(runtime.dispatcher().is_none());
    }
}

//! Execution API: context creation and global timeout configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::config::RuntimeConfig;
use crate::context::{MapContext, ReduceContext};
use crate::engine::ScriptEngine;
use crate::error::Result;
use crate::logging::info;
use crate::registry::{ContextId, ContextRegistry};
use crate::task::{Clock, TaskState};
use crate::watchdog::{TaskTimeout, Watchdog};

/// Owns the engine, the context registry and the watchdog thread.
///
/// # Example
///
/// ```ignore
/// use mapreduce_runtime::prelude::*;
///
/// let runtime = Runtime::start(WasmEngine::new()?, RuntimeConfig::default())?;
/// runtime.set_timeout(1000);
///
/// let mut ctx = runtime.start_map_context(&[MAP_WAT], b"view-1")?;
/// let results = ctx.map_doc(br#"{"a":1}"#, b"{}")?;
/// ```
pub struct Runtime<E: ScriptEngine> {
    engine: Arc<E>,
    registry: Arc<ContextRegistry>,
    timeout: Arc<TaskTimeout>,
    clock: Clock,
    watchdog: Watchdog,
}

impl<E: ScriptEngine> Runtime<E> {
    /// Start a runtime with a fresh registry and spawn its watchdog.
    pub fn start(engine: E, config: RuntimeConfig) -> Result<Self> {
        Self::with_registry(engine, Arc::new(ContextRegistry::new()), config)
    }

    /// Start a runtime over an existing registry.
    ///
    /// Fails with [`Error::WatchdogStart`](crate::Error::WatchdogStart) if
    /// the watchdog thread cannot be spawned.
    pub fn with_registry(
        engine: E,
        registry: Arc<ContextRegistry>,
        config: RuntimeConfig,
    ) -> Result<Self> {
        let engine = Arc::new(engine);
        let timeout = Arc::new(TaskTimeout::new(config.timeout_ms));
        let clock = Clock::new();

        let interrupt_engine = Arc::clone(&engine);
        let watchdog = Watchdog::start(
            &config.watchdog_thread_name,
            Arc::clone(&registry),
            Arc::clone(&timeout),
            clock,
            move || interrupt_engine.interrupt(),
        )?;

        info!(timeout_ms = config.timeout_ms, "runtime started");
        Ok(Self {
            engine,
            registry,
            timeout,
            clock,
            watchdog,
        })
    }

    /// Compile `sources` as map functions and register the context under
    /// `reference`.
    pub fn start_map_context<S: AsRef<str>>(
        &self,
        sources: &[S],
        reference: impl Into<Vec<u8>>,
    ) -> Result<MapContext<E>> {
        MapContext::start(
            Arc::clone(&self.engine),
            Arc::clone(&self.registry),
            self.clock,
            sources,
            ContextId::new(reference),
        )
    }

    /// Compile `sources` as reduce functions and register the context under
    /// `reference`.
    pub fn start_reduce_context<S: AsRef<str>>(
        &self,
        sources: &[S],
        reference: impl Into<Vec<u8>>,
    ) -> Result<ReduceContext<E>> {
        ReduceContext::start(
            Arc::clone(&self.engine),
            Arc::clone(&self.registry),
            self.clock,
            sources,
            ContextId::new(reference),
        )
    }

    /// Set the global task timeout in milliseconds.
    ///
    /// The watchdog picks up the new value on its next cycle.
    pub fn set_timeout(&self, millis: u64) {
        info!(timeout_ms = millis, "task timeout changed");
        self.timeout.set(millis);
    }

    /// Current global task timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout.get()
    }

    /// Task state of a live context.
    pub fn task(&self, id: &ContextId) -> Result<Arc<TaskState>> {
        self.registry.lookup(id)
    }

    /// The registry shared by this runtime's contexts.
    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.registry
    }

    /// The script engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Whether the watchdog thread is running.
    pub fn watchdog_running(&self) -> bool {
        self.watchdog.is_running()
    }

    /// Stop the watchdog and wait for it to exit.
    ///
    /// Contexts that outlive the runtime keep working but are no longer
    /// subject to the timeout.
    pub fn shutdown(self) {
        info!(live_contexts = self.registry.len(), "runtime shutting down");
        self.watchdog.stop();
    }
}

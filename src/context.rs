//! Execution contexts for map and reduce functions.
//!
//! A context bundles compiled functions with the [`TaskState`] the watchdog
//! observes. It is built and registered inside one call, so it is never
//! visible in the registry half-built. Dropping the handle is the
//! finalization hook: the context is unregistered first and only then are
//! its compiled functions released.

use std::sync::Arc;

use crate::engine::{EngineError, ScriptEngine};
use crate::error::{Error, Result};
use crate::logging::{debug, trace};
use crate::registry::{ContextId, ContextRegistry};
use crate::task::{CancellationToken, Clock, TaskState};
use crate::wire::{KeyValue, MapResults, copy_bytes};

type EngineResult<T> = std::result::Result<T, EngineError>;

/// Shared core of map and reduce contexts.
struct Context<E: ScriptEngine> {
    id: ContextId,
    task: Arc<TaskState>,
    registry: Arc<ContextRegistry>,
    engine: Arc<E>,
    clock: Clock,
    functions: Vec<E::Function>,
}

impl<E: ScriptEngine> Context<E> {
    /// Compile every source, then register under `id`.
    fn start<S: AsRef<str>>(
        engine: Arc<E>,
        registry: Arc<ContextRegistry>,
        clock: Clock,
        sources: &[S],
        id: ContextId,
    ) -> Result<Self> {
        if sources.is_empty() {
            return Err(Error::invalid_argument("at least one function is required"));
        }

        let mut functions = Vec::new();
        functions
            .try_reserve_exact(sources.len())
            .map_err(|_| Error::AllocationFailure)?;
        for source in sources {
            let function = engine
                .compile(source.as_ref())
                .map_err(Error::from_compile)?;
            functions.push(function);
        }

        let task = Arc::new(TaskState::new());
        // On failure `functions` is dropped here, nothing was registered.
        registry.register(id.clone(), Arc::clone(&task))?;

        Ok(Self {
            id,
            task,
            registry,
            engine,
            clock,
            functions,
        })
    }

    /// Run `call` as one task: mark running, invoke, mark idle.
    fn run<T>(
        &mut self,
        call: impl FnOnce(&E, &mut [E::Function], &CancellationToken) -> EngineResult<T>,
    ) -> Result<T> {
        let result = {
            let _running = self.task.begin(&self.clock);
            trace!(context = %self.id, "task started");
            call(&self.engine, &mut self.functions, self.task.token())
        };
        trace!(context = %self.id, ok = result.is_ok(), "task finished");
        result.map_err(|err| {
            let err = Error::from_execution(err, self.task.is_cancelled());
            debug!(context = %self.id, error = %err, "task failed");
            err
        })
    }

    fn check_index(&self, index: usize) -> Result<()> {
        let count = self.functions.len();
        if index >= count {
            return Err(Error::invalid_argument(format!(
                "function index {index} out of range for {count} functions"
            )));
        }
        Ok(())
    }
}

impl<E: ScriptEngine> Drop for Context<E> {
    fn drop(&mut self) {
        self.registry.unregister(&self.id);
        // `functions` is released after this returns, once the watchdog can
        // no longer reach this context.
        trace!(context = %self.id, "context finalized");
    }
}

fn copy_pairs(pairs: &[KeyValue]) -> Result<Vec<KeyValue>> {
    let mut out = Vec::new();
    out.try_reserve_exact(pairs.len())
        .map_err(|_| Error::AllocationFailure)?;
    for kv in pairs {
        out.push(kv.try_clone().map_err(|_| Error::AllocationFailure)?);
    }
    Ok(out)
}

fn copy_result(bytes: &[u8]) -> Result<Vec<u8>> {
    copy_bytes(bytes).map_err(|_| Error::AllocationFailure)
}

fn check_matched(keys: &[Vec<u8>], values: &[Vec<u8>]) -> Result<()> {
    if keys.len() != values.len() {
        return Err(Error::invalid_argument(format!(
            "{} keys but {} values",
            keys.len(),
            values.len()
        )));
    }
    Ok(())
}

/// A context holding map functions.
pub struct MapContext<E: ScriptEngine> {
    inner: Context<E>,
}

impl<E: ScriptEngine> MapContext<E> {
    pub(crate) fn start<S: AsRef<str>>(
        engine: Arc<E>,
        registry: Arc<ContextRegistry>,
        clock: Clock,
        sources: &[S],
        id: ContextId,
    ) -> Result<Self> {
        let inner = Context::start(engine, registry, clock, sources, id)?;
        debug!(context = %inner.id, functions = inner.functions.len(), "map context started");
        Ok(Self { inner })
    }

    /// Run every map function over one document.
    ///
    /// Returns one pair list per function, in function order; each list
    /// keeps the order in which the function emitted its pairs.
    pub fn map_doc(&mut self, doc: &[u8], meta: &[u8]) -> Result<MapResults> {
        let emitted = self.inner.run(|engine, functions, cancel| {
            functions
                .iter_mut()
                .map(|function| engine.map(function, doc, meta, cancel))
                .collect::<EngineResult<Vec<_>>>()
        })?;

        // Engine-owned pairs are copied out and dropped here.
        let mut results = Vec::new();
        results
            .try_reserve_exact(emitted.len())
            .map_err(|_| Error::AllocationFailure)?;
        for pairs in &emitted {
            results.push(copy_pairs(pairs)?);
        }
        Ok(results)
    }

    /// The context id.
    pub fn id(&self) -> &ContextId {
        &self.inner.id
    }

    /// Number of compiled functions.
    pub fn function_count(&self) -> usize {
        self.inner.functions.len()
    }

    /// Timing and cancellation state of this context.
    pub fn task(&self) -> &TaskState {
        &self.inner.task
    }
}

/// A context holding reduce functions.
pub struct ReduceContext<E: ScriptEngine> {
    inner: Context<E>,
}

impl<E: ScriptEngine> ReduceContext<E> {
    pub(crate) fn start<S: AsRef<str>>(
        engine: Arc<E>,
        registry: Arc<ContextRegistry>,
        clock: Clock,
        sources: &[S],
        id: ContextId,
    ) -> Result<Self> {
        let inner = Context::start(engine, registry, clock, sources, id)?;
        debug!(context = %inner.id, functions = inner.functions.len(), "reduce context started");
        Ok(Self { inner })
    }

    /// Run every reduce function, returning one reduction per function.
    pub fn reduce(&mut self, keys: &[Vec<u8>], values: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
        check_matched(keys, values)?;
        let reductions = self.inner.run(|engine, functions, cancel| {
            functions
                .iter_mut()
                .map(|function| engine.reduce(function, keys, values, cancel))
                .collect::<EngineResult<Vec<_>>>()
        })?;

        let mut results = Vec::new();
        results
            .try_reserve_exact(reductions.len())
            .map_err(|_| Error::AllocationFailure)?;
        for reduction in &reductions {
            results.push(copy_result(reduction)?);
        }
        Ok(results)
    }

    /// Run only the reduce function at `index`.
    pub fn reduce_one(
        &mut self,
        index: usize,
        keys: &[Vec<u8>],
        values: &[Vec<u8>],
    ) -> Result<Vec<u8>> {
        check_matched(keys, values)?;
        self.inner.check_index(index)?;
        let reduction = self.inner.run(|engine, functions, cancel| {
            match functions.get_mut(index) {
                Some(function) => engine.reduce(function, keys, values, cancel),
                None => Err(EngineError::script("function index out of range")),
            }
        })?;
        copy_result(&reduction)
    }

    /// Run every reduce function over `(key, value)` pairs.
    pub fn reduce_pairs(&mut self, pairs: &[KeyValue]) -> Result<Vec<Vec<u8>>> {
        let (keys, values) = split_pairs(pairs)?;
        self.reduce(&keys, &values)
    }

    /// Run the reduce function at `index` over `(key, value)` pairs.
    pub fn reduce_pairs_one(&mut self, index: usize, pairs: &[KeyValue]) -> Result<Vec<u8>> {
        let (keys, values) = split_pairs(pairs)?;
        self.reduce_one(index, &keys, &values)
    }

    /// Combine partial reductions with the function at `index`.
    pub fn rereduce(&mut self, index: usize, reductions: &[Vec<u8>]) -> Result<Vec<u8>> {
        self.inner.check_index(index)?;
        let reduction = self.inner.run(|engine, functions, cancel| {
            match functions.get_mut(index) {
                Some(function) => engine.rereduce(function, reductions, cancel),
                None => Err(EngineError::script("function index out of range")),
            }
        })?;
        copy_result(&reduction)
    }

    /// The context id.
    pub fn id(&self) -> &ContextId {
        &self.inner.id
    }

    /// Number of compiled functions.
    pub fn function_count(&self) -> usize {
        self.inner.functions.len()
    }

    /// Timing and cancellation state of this context.
    pub fn task(&self) -> &TaskState {
        &self.inner.task
    }
}

fn split_pairs(pairs: &[KeyValue]) -> Result<(Vec<Vec<u8>>, Vec<Vec<u8>>)> {
    let mut keys = Vec::new();
    let mut values = Vec::new();
    keys.try_reserve_exact(pairs.len())
        .and_then(|()| values.try_reserve_exact(pairs.len()))
        .map_err(|_| Error::AllocationFailure)?;
    for kv in pairs {
        keys.push(copy_result(&kv.key)?);
        values.push(copy_result(&kv.value)?);
    }
    Ok((keys, values))
}

//! Common test utilities and fixtures.
//!
//! [`ScriptedEngine`] is a small script engine whose "source language" is a
//! list of `;`-separated instructions, enough to drive every runtime path
//! without a real interpreter:
//!
//! | Instruction | map | reduce | rereduce |
//! |---|---|---|---|
//! | `emit K V` | emits `(K, V)` | | |
//! | `const V` | | returns `V` | returns `V` |
//! | `concat` | | joins values | joins reductions |
//! | `count` | | number of keys | number of reductions |
//! | `sleep MS check MS` | sleeps, polling the token | same | same |
//! | `ignore MS` | sleeps without polling the token | same | same |
//! | `fail MSG` | script error | same | same |
//! | `oom` | allocation failure | same | same |
//!
//! Anything else fails to compile.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use mapreduce_runtime::{
    CancellationToken, ContextRegistry, EngineError, KeyValue, Runtime, RuntimeConfig,
    ScriptEngine,
};

/// One parsed instruction.
#[derive(Debug, Clone)]
enum Op {
    Emit(String, String),
    Const(String),
    Concat,
    Count,
    Sleep { total: u64, check: u64 },
    Ignore(u64),
    Fail(String),
    Oom,
}

/// Observations shared between the engine and its compiled functions.
#[derive(Debug, Default)]
pub struct Probe {
    /// Number of functions compiled.
    pub compiled: AtomicUsize,
    /// Number of functions released.
    pub released: AtomicUsize,
    /// Number of watchdog interrupts received.
    pub interrupts: AtomicUsize,
    /// Registry size observed each time a function was released.
    pub live_at_release: Mutex<Vec<usize>>,
}

/// A compiled scripted function.
pub struct ScriptedFunction {
    ops: Vec<Op>,
    probe: Arc<Probe>,
    registry: Option<Arc<ContextRegistry>>,
}

impl Drop for ScriptedFunction {
    fn drop(&mut self) {
        if let Some(registry) = &self.registry {
            let live = registry.len();
            self.probe
                .live_at_release
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(live);
        }
        self.probe.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Script engine driven by instruction lists.
#[derive(Default)]
pub struct ScriptedEngine {
    pub probe: Arc<Probe>,
    registry: Option<Arc<ContextRegistry>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the size of `registry` whenever a function is released.
    pub fn observing(registry: Arc<ContextRegistry>) -> Self {
        Self {
            probe: Arc::new(Probe::default()),
            registry: Some(registry),
        }
    }

    fn execute(
        ops: &[Op],
        inputs: &[Vec<u8>],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, EngineError> {
        let mut out = Vec::new();
        for op in ops {
            match op {
                Op::Const(v) => out = v.clone().into_bytes(),
                Op::Concat => out = inputs.concat(),
                Op::Count => out = inputs.len().to_string().into_bytes(),
                other => Self::control(other, cancel)?,
            }
        }
        Ok(out)
    }

    /// Run the instructions shared by every operation.
    fn control(op: &Op, cancel: &CancellationToken) -> Result<(), EngineError> {
        match op {
            Op::Sleep { total, check } => {
                let end = Instant::now() + Duration::from_millis(*total);
                while Instant::now() < end {
                    if cancel.is_cancelled() {
                        return Err(EngineError::Cancelled);
                    }
                    thread::sleep(Duration::from_millis(*check));
                }
                Ok(())
            }
            Op::Ignore(ms) => {
                thread::sleep(Duration::from_millis(*ms));
                Ok(())
            }
            Op::Fail(msg) => Err(EngineError::script(msg.clone())),
            Op::Oom => Err(EngineError::Allocation),
            _ => Ok(()),
        }
    }
}

fn parse(source: &str) -> Result<Vec<Op>, EngineError> {
    let mut ops = Vec::new();
    for instruction in source.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let words: Vec<&str> = instruction.split_whitespace().collect();
        let op = match words.as_slice() {
            ["emit", k, v] => Op::Emit(k.to_string(), v.to_string()),
            ["const", v] => Op::Const(v.to_string()),
            ["concat"] => Op::Concat,
            ["count"] => Op::Count,
            ["sleep", total, "check", check] => Op::Sleep {
                total: number(total)?,
                check: number(check)?,
            },
            ["ignore", ms] => Op::Ignore(number(ms)?),
            ["fail", rest @ ..] => Op::Fail(rest.join(" ")),
            ["oom"] => Op::Oom,
            _ => {
                return Err(EngineError::compile(format!(
                    "SyntaxError: unexpected `{instruction}`"
                )));
            }
        };
        ops.push(op);
    }
    if ops.is_empty() {
        return Err(EngineError::compile("SyntaxError: empty function"));
    }
    Ok(ops)
}

fn number(word: &str) -> Result<u64, EngineError> {
    word.parse()
        .map_err(|_| EngineError::compile(format!("SyntaxError: `{word}` is not a number")))
}

impl ScriptEngine for ScriptedEngine {
    type Function = ScriptedFunction;

    fn compile(&self, source: &str) -> Result<ScriptedFunction, EngineError> {
        let ops = parse(source)?;
        self.probe.compiled.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedFunction {
            ops,
            probe: Arc::clone(&self.probe),
            registry: self.registry.clone(),
        })
    }

    fn map(
        &self,
        function: &mut ScriptedFunction,
        _doc: &[u8],
        _meta: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Vec<KeyValue>, EngineError> {
        let mut emitted = Vec::new();
        for op in &function.ops {
            match op {
                Op::Emit(k, v) => emitted.push(KeyValue::new(k.as_str(), v.as_str())),
                other => Self::control(other, cancel)?,
            }
        }
        Ok(emitted)
    }

    fn reduce(
        &self,
        function: &mut ScriptedFunction,
        keys: &[Vec<u8>],
        values: &[Vec<u8>],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, EngineError> {
        debug_assert_eq!(keys.len(), values.len());
        Self::execute(&function.ops, values, cancel)
    }

    fn rereduce(
        &self,
        function: &mut ScriptedFunction,
        reductions: &[Vec<u8>],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, EngineError> {
        Self::execute(&function.ops, reductions, cancel)
    }

    fn interrupt(&self) {
        self.probe.interrupts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Start a runtime over a scripted engine with the given timeout.
pub fn runtime(timeout_ms: u64) -> Runtime<ScriptedEngine> {
    Runtime::start(
        ScriptedEngine::new(),
        RuntimeConfig::default().with_timeout_ms(timeout_ms),
    )
    .unwrap()
}

/// Shorthand for a list of byte strings.
pub fn bytes(items: &[&str]) -> Vec<Vec<u8>> {
    items.iter().map(|s| s.as_bytes().to_vec()).collect()
}

//! WebAssembly script engine using wasmtime.
//!
//! A function source is a WebAssembly text module that exports:
//!
//! - `memory`: the guest linear memory
//! - `alloc(len: i32) -> i32`: returns a guest buffer of `len` bytes
//! - one of the operation entry points:
//!   - `map(doc_ptr, doc_len, meta_ptr, meta_len) -> i64`
//!   - `reduce(keys_ptr, keys_len, values_ptr, values_len) -> i64`
//!   - `rereduce(reductions_ptr, reductions_len) -> i64`
//!
//! The `i64` result packs the output location as `ptr << 32 | len`. Map
//! output is a wire pair list; reduce and rereduce output is the raw
//! reduction. Keys, values and reductions are passed as wire byte lists.
//!
//! Cancellation uses epoch interruption. Each store traps at its next epoch
//! check once its token is cancelled; [`ScriptEngine::interrupt`] bumps the
//! engine epoch so running guests reach that check promptly.

use wasmtime::{Config, Engine, Instance, Memory, Module, Store, Trap, TypedFunc, UpdateDeadline};

use super::{EngineError, ScriptEngine};
use crate::logging::{debug, trace};
use crate::task::CancellationToken;
use crate::wire::{self, KeyValue};

/// Host state attached to every guest store.
struct GuestState {
    cancel: CancellationToken,
}

/// A compiled and instantiated guest module.
pub struct WasmFunction {
    store: Store<GuestState>,
    instance: Instance,
    memory: Memory,
    alloc: TypedFunc<i32, i32>,
}

/// Script engine running WebAssembly modules.
pub struct WasmEngine {
    engine: Engine,
}

impl WasmEngine {
    /// Create an engine with epoch interruption enabled.
    pub fn new() -> Result<Self, EngineError> {
        let mut config = Config::new();
        config.epoch_interruption(true);

        let engine = Engine::new(&config)
            .map_err(|e| EngineError::compile(format!("failed to create wasm engine: {e}")))?;

        Ok(Self { engine })
    }

    /// Get a reference to the wasmtime engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Copy `bytes` into a fresh guest buffer, returning `(ptr, len)`.
    fn write_input(function: &mut WasmFunction, bytes: &[u8]) -> Result<(i32, i32), EngineError> {
        let len = i32::try_from(bytes.len()).map_err(|_| {
            EngineError::script(format!("input of {} bytes is too large", bytes.len()))
        })?;

        let ptr = function
            .alloc
            .call(&mut function.store, len)
            .map_err(|e| EngineError::script(format!("alloc failed: {e}")))?;

        function
            .memory
            .write(&mut function.store, ptr as u32 as usize, bytes)
            .map_err(|e| EngineError::script(format!("writing input failed: {e}")))?;

        Ok((ptr, len))
    }

    /// Borrow the guest output described by a packed `ptr << 32 | len`.
    fn output(function: &WasmFunction, packed: i64) -> Result<&[u8], EngineError> {
        let packed = packed as u64;
        let ptr = (packed >> 32) as usize;
        let len = (packed & 0xffff_ffff) as usize;
        let memory = function.memory.data(&function.store);

        ptr.checked_add(len)
            .and_then(|end| memory.get(ptr..end))
            .ok_or_else(|| {
                EngineError::script(format!(
                    "output of {len} bytes at {ptr} lies outside guest memory"
                ))
            })
    }

    /// Call an exported entry point with the given parameters.
    fn invoke<P>(
        function: &mut WasmFunction,
        name: &str,
        params: P,
        cancel: &CancellationToken,
    ) -> Result<i64, EngineError>
    where
        P: wasmtime::WasmParams,
    {
        let func = function
            .instance
            .get_typed_func::<P, i64>(&mut function.store, name)
            .map_err(|e| EngineError::script(format!("module does not export `{name}`: {e}")))?;

        function.store.data_mut().cancel = cancel.clone();
        function.store.set_epoch_deadline(1);

        trace!(export = name, "calling guest function");
        func.call(&mut function.store, params).map_err(|e| {
            if cancel.is_cancelled() {
                debug!(export = name, "guest function interrupted");
                EngineError::Cancelled
            } else {
                EngineError::script(e.to_string())
            }
        })
    }
}

impl ScriptEngine for WasmEngine {
    type Function = WasmFunction;

    fn compile(&self, source: &str) -> Result<WasmFunction, EngineError> {
        let module =
            Module::new(&self.engine, source).map_err(|e| EngineError::compile(e.to_string()))?;

        let mut store = Store::new(
            &self.engine,
            GuestState {
                cancel: CancellationToken::new(),
            },
        );
        store.set_epoch_deadline(1);
        store.epoch_deadline_callback(|ctx| {
            if ctx.data().cancel.is_cancelled() {
                Err(Trap::Interrupt.into())
            } else {
                Ok(UpdateDeadline::Continue(1))
            }
        });

        let instance = Instance::new(&mut store, &module, &[])
            .map_err(|e| EngineError::compile(format!("instantiation failed: {e}")))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| EngineError::compile("module does not export `memory`"))?;

        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, "alloc")
            .map_err(|e| EngineError::compile(format!("module does not export `alloc`: {e}")))?;

        Ok(WasmFunction {
            store,
            instance,
            memory,
            alloc,
        })
    }

    fn map(
        &self,
        function: &mut WasmFunction,
        doc: &[u8],
        meta: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Vec<KeyValue>, EngineError> {
        let (doc_ptr, doc_len) = Self::write_input(function, doc)?;
        let (meta_ptr, meta_len) = Self::write_input(function, meta)?;

        let packed = Self::invoke(
            function,
            "map",
            (doc_ptr, doc_len, meta_ptr, meta_len),
            cancel,
        )?;

        let output = Self::output(function, packed)?;
        wire::decode_pairs(output)
            .map_err(|e| EngineError::script(format!("invalid map output: {e}")))
    }

    fn reduce(
        &self,
        function: &mut WasmFunction,
        keys: &[Vec<u8>],
        values: &[Vec<u8>],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, EngineError> {
        let keys = wire::encode_byte_list(keys).map_err(|e| EngineError::script(e.to_string()))?;
        let values =
            wire::encode_byte_list(values).map_err(|e| EngineError::script(e.to_string()))?;
        let (keys_ptr, keys_len) = Self::write_input(function, &keys)?;
        let (values_ptr, values_len) = Self::write_input(function, &values)?;

        let packed = Self::invoke(
            function,
            "reduce",
            (keys_ptr, keys_len, values_ptr, values_len),
            cancel,
        )?;

        wire::copy_bytes(Self::output(function, packed)?).map_err(|_| EngineError::Allocation)
    }

    fn rereduce(
        &self,
        function: &mut WasmFunction,
        reductions: &[Vec<u8>],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, EngineError> {
        let reductions =
            wire::encode_byte_list(reductions).map_err(|e| EngineError::script(e.to_string()))?;
        let (ptr, len) = Self::write_input(function, &reductions)?;

        let packed = Self::invoke(function, "rereduce", (ptr, len), cancel)?;

        wire::copy_bytes(Self::output(function, packed)?).map_err(|_| EngineError::Allocation)
    }

    fn interrupt(&self) {
        self.engine.increment_epoch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Bump allocator shared by the test modules.
    const ALLOC: &str = r#"
  (global $next (mut i32) (i32.const 1024))
  (func (export "alloc") (param $len i32) (result i32)
    (local $ptr i32)
    global.get $next
    local.set $ptr
    global.get $next
    local.get $len
    i32.add
    global.set $next
    local.get $ptr)
"#;

    fn module(body: &str) -> String {
        format!("(module\n  (memory (export \"memory\") 1)\n{ALLOC}\n{body})")
    }

    fn emit_k1_v1() -> String {
        module(
            r#"
  (data (i32.const 0) "\01\00\00\00\02\00\00\00k1\02\00\00\00v1")
  (func (export "map") (param i32 i32 i32 i32) (result i64)
    i64.const 16)"#,
        )
    }

    fn echo_rereduce() -> String {
        module(
            r#"
  (func (export "rereduce") (param $ptr i32) (param $len i32) (result i64)
    local.get $ptr
    i64.extend_i32_u
    i64.const 32
    i64.shl
    local.get $len
    i64.extend_i32_u
    i64.or)"#,
        )
    }

    fn spin_map() -> String {
        module(
            r#"
  (func (export "map") (param i32 i32 i32 i32) (result i64)
    (loop $forever
      br $forever)
    i64.const 0)"#,
        )
    }

    #[test]
    fn test_map_emits_pairs() {
        let engine = WasmEngine::new().unwrap();
        let mut function = engine.compile(&emit_k1_v1()).unwrap();
        let pairs = engine
            .map(&mut function, br#"{"a":1}"#, b"{}", &CancellationToken::new())
            .unwrap();
        assert_eq!(pairs, vec![KeyValue::new("k1", "v1")]);
    }

    #[test]
    fn test_rereduce_receives_wire_encoded_reductions() {
        let engine = WasmEngine::new().unwrap();
        let mut function = engine.compile(&echo_rereduce()).unwrap();
        let reductions = vec![b"p1".to_vec(), b"p2".to_vec()];
        let output = engine
            .rereduce(&mut function, &reductions, &CancellationToken::new())
            .unwrap();
        assert_eq!(output, wire::encode_byte_list(&reductions).unwrap());
    }

    #[test]
    fn test_invalid_source_is_compile_error() {
        let engine = WasmEngine::new().unwrap();
        let err = engine.compile("(module (func").err().unwrap();
        assert!(matches!(err, EngineError::Compile(_)));
    }

    #[test]
    fn test_missing_memory_export_is_compile_error() {
        let engine = WasmEngine::new().unwrap();
        let err = engine
            .compile("(module (func (export \"alloc\") (param i32) (result i32) i32.const 0))")
            .err()
            .unwrap();
        assert_eq!(
            err,
            EngineError::compile("module does not export `memory`")
        );
    }

    #[test]
    fn test_missing_entry_point_is_script_error() {
        let engine = WasmEngine::new().unwrap();
        let mut function = engine.compile(&emit_k1_v1()).unwrap();
        let err = engine
            .reduce(&mut function, &[], &[], &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Script(ref msg) if msg.contains("reduce")));
    }

    #[test]
    fn test_trap_is_script_error() {
        let engine = WasmEngine::new().unwrap();
        let source = module(
            r#"
  (func (export "map") (param i32 i32 i32 i32) (result i64)
    unreachable)"#,
        );
        let mut function = engine.compile(&source).unwrap();
        let err = engine
            .map(&mut function, b"{}", b"{}", &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Script(_)));
    }

    #[test]
    fn test_output_outside_memory_is_script_error() {
        let engine = WasmEngine::new().unwrap();
        // ptr = len = u32::MAX, so `ptr + len` would overflow a 32-bit usize.
        let source = module(
            r#"
  (func (export "rereduce") (param i32 i32) (result i64)
    i64.const -1)"#,
        );
        let mut function = engine.compile(&source).unwrap();
        let err = engine
            .rereduce(&mut function, &[], &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Script(ref msg) if msg.contains("outside guest memory")));
    }

    #[test]
    fn test_cancelled_loop_is_interrupted() {
        let engine = Arc::new(WasmEngine::new().unwrap());
        let mut function = engine.compile(&spin_map()).unwrap();
        let cancel = CancellationToken::new();

        let canceller = {
            let engine = Arc::clone(&engine);
            let cancel = cancel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                cancel.cancel();
                engine.interrupt();
            })
        };

        let err = engine.map(&mut function, b"{}", b"{}", &cancel).unwrap_err();
        canceller.join().unwrap();
        assert_eq!(err, EngineError::Cancelled);
    }

    #[test]
    fn test_interrupt_without_cancel_keeps_running() {
        let engine = WasmEngine::new().unwrap();
        engine.interrupt();
        let mut function = engine.compile(&emit_k1_v1()).unwrap();
        engine.interrupt();
        let pairs = engine
            .map(&mut function, b"{}", b"{}", &CancellationToken::new())
            .unwrap();
        assert_eq!(pairs.len(), 1);
    }
}

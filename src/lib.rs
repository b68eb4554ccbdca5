//! Map/reduce script execution with a context registry and a timeout watchdog.
//!
//! A host compiles user-supplied map, reduce and rereduce functions into
//! execution contexts and runs them against documents. Every context is
//! registered with a background watchdog, which cancels any call that runs
//! longer than the global timeout. Results cross the boundary as copies in
//! caller-owned buffers, and can be marshalled to a length-prefixed wire
//! form for byte-oriented hosts.
//!
//! # Quick Start
//!
//! ```ignore
//! use mapreduce_runtime::prelude::*;
//!
//! let runtime = Runtime::start(WasmEngine::new()?, RuntimeConfig::default())?;
//!
//! let mut ctx = runtime.start_reduce_context(&[SUM_WAT], b"view-sum")?;
//! let totals = ctx.reduce(&keys, &values)?;
//!
//! // Contexts unregister themselves from the watchdog when dropped.
//! drop(ctx);
//! runtime.shutdown();
//! ```
//!
//! # Modules
//!
//! - [`wire`] - Marshalling protocol for key/value results (always available)
//! - [`engine`] - Script engine boundary, plus the wasmtime engine (requires `wasm` feature)
//! - [`registry`] - Registry of live contexts
//! - [`watchdog`] - Background timeout enforcement
//! - [`context`] - Map and reduce contexts
//! - [`runtime`] - Context creation and timeout configuration
//!
//! # Feature Flags
//!
//! - `wasm` - Enable the WebAssembly script engine (enabled by default)
//! - `config` - Enable TOML configuration loading
//! - `logging` - Enable library-level tracing (consumers provide their own subscriber)
//! - `cli` - Enable the command-line interface binary
//! - `full` - Enable all features

mod logging;

pub mod config;
pub mod context;
pub mod engine;
mod error;
pub mod prelude;
pub mod registry;
pub mod runtime;
pub mod task;
pub mod watchdog;
pub mod wire;

// Re-export the unified error type
pub use error::{Error, Result, TIMEOUT_MESSAGE};

pub use config::RuntimeConfig;
pub use context::{MapContext, ReduceContext};
pub use engine::{EngineError, ScriptEngine};
pub use registry::{ContextId, ContextRegistry};
pub use runtime::Runtime;
pub use task::{CancellationToken, TaskState};
pub use watchdog::{DEFAULT_TIMEOUT_MS, TaskTimeout, Watchdog};
pub use wire::{KeyValue, MapResults, WireError};

#[cfg(feature = "wasm")]
pub use engine::wasm::WasmEngine;

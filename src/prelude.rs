//! Convenient re-exports for common usage patterns.
//!
//! This module provides a single import to bring all commonly used types
//! into scope.
//!
//! # Example
//!
//! ```ignore
//! use mapreduce_runtime::prelude::*;
//!
//! let runtime = Runtime::start(WasmEngine::new()?, RuntimeConfig::default())?;
//! let mut ctx = runtime.start_map_context(&[MAP_WAT], b"view-1")?;
//! let results = ctx.map_doc(br#"{"a":1}"#, b"{}")?;
//! ```

// Unified error handling
pub use crate::error::{Error, Result};

// Execution API
pub use crate::config::RuntimeConfig;
pub use crate::context::{MapContext, ReduceContext};
pub use crate::runtime::Runtime;

// Engine boundary
pub use crate::engine::{EngineError, ScriptEngine};
pub use crate::task::CancellationToken;

// WASM engine (requires "wasm" feature)
#[cfg(feature = "wasm")]
pub use crate::engine::wasm::WasmEngine;

// Wire types
pub use crate::wire::{KeyValue, MapResults};

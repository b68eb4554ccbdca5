//! Script engine boundary.
//!
//! The runtime never evaluates scripts itself. It drives an implementation
//! of [`ScriptEngine`], which compiles function sources into opaque handles
//! and runs them against documents and reductions.
//!
//! # Cancellation contract
//!
//! Every call receives the context's [`CancellationToken`]. An engine MUST
//! check the token at bounded intervals while a function runs and return
//! [`EngineError::Cancelled`] (or any other error) once it is set. The
//! watchdog cannot stop an engine that never looks at the token; such a
//! call simply runs to completion.

mod error;
#[cfg(feature = "wasm")]
pub mod wasm;

pub use error::EngineError;

use crate::task::CancellationToken;
use crate::wire::KeyValue;

/// A script engine able to run map, reduce and rereduce functions.
pub trait ScriptEngine: Send + Sync + 'static {
    /// A compiled function, owned by exactly one context.
    type Function: Send;

    /// Compile one function source.
    fn compile(&self, source: &str) -> Result<Self::Function, EngineError>;

    /// Run a map function over one document and its metadata.
    ///
    /// Returns the emitted pairs in emission order.
    fn map(
        &self,
        function: &mut Self::Function,
        doc: &[u8],
        meta: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Vec<KeyValue>, EngineError>;

    /// Run a reduce function over matched keys and values.
    fn reduce(
        &self,
        function: &mut Self::Function,
        keys: &[Vec<u8>],
        values: &[Vec<u8>],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, EngineError>;

    /// Combine previously produced reductions into one.
    fn rereduce(
        &self,
        function: &mut Self::Function,
        reductions: &[Vec<u8>],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, EngineError>;

    /// Nudge running calls toward their next cancellation check.
    ///
    /// Called by the watchdog after it cancels at least one task. Engines
    /// that poll the token on their own can keep the default no-op.
    fn interrupt(&self) {}
}

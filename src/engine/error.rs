//! Error types reported by script engines.

use thiserror::Error;

/// Errors that can occur while compiling or running a script function.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The function source failed to compile.
    #[error("{0}")]
    Compile(String),

    /// The function raised an error while running.
    #[error("{0}")]
    Script(String),

    /// The function observed its cancellation token and stopped.
    #[error("timeout")]
    Cancelled,

    /// The engine could not allocate memory for the call.
    #[error("memory allocation failure")]
    Allocation,
}

impl EngineError {
    /// Create a compilation error from any message.
    pub fn compile(msg: impl Into<String>) -> Self {
        Self::Compile(msg.into())
    }

    /// Create a runtime error from any message.
    pub fn script(msg: impl Into<String>) -> Self {
        Self::Script(msg.into())
    }
}

//! Unified error type for the mapreduce-runtime library.
//!
//! Every public operation returns [`Result`]. Engine failures, registry
//! misuse and wire decoding problems are all reported through [`Error`], so
//! nothing unwinds past the API boundary.

use thiserror::Error;

use crate::engine::EngineError;
use crate::registry::ContextId;
use crate::wire::WireError;

/// Message carried by execution errors caused by the watchdog.
pub const TIMEOUT_MESSAGE: &str = "timeout";

/// Unified error type for all runtime operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or mis-shaped input, or an out-of-range function index.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A function source failed to compile.
    #[error("{0}")]
    Compilation(String),

    /// A function failed while running, including watchdog cancellation.
    #[error("{message}")]
    Execution { message: String, timed_out: bool },

    /// Copying results into caller-owned buffers failed.
    #[error("memory allocation failure")]
    AllocationFailure,

    /// A live context already uses this id.
    #[error("context {0} is already registered")]
    DuplicateId(ContextId),

    /// No live context uses this id.
    #[error("context {0} not found")]
    NotFound(ContextId),

    /// Wire-encoded input could not be decoded.
    #[error("wire format error: {0}")]
    Wire(#[from] WireError),

    /// The watchdog thread could not be started.
    #[error("failed to start watchdog: {0}")]
    WatchdogStart(#[source] std::io::Error),

    /// Configuration could not be loaded.
    #[cfg(feature = "config")]
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

/// A [`Result`] type alias using the unified [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid-argument error from any message.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Returns `true` if the call was cancelled by the watchdog.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Execution { timed_out: true, .. })
    }

    /// Returns `true` if this is an execution error.
    pub fn is_execution(&self) -> bool {
        matches!(self, Self::Execution { .. })
    }

    /// Convert an engine failure that happened during compilation.
    pub(crate) fn from_compile(err: EngineError) -> Self {
        match err {
            EngineError::Allocation => Self::AllocationFailure,
            other => Self::Compilation(other.to_string()),
        }
    }

    /// Convert an engine failure that happened while running a function.
    ///
    /// A cancelled token wins over whatever the engine reported, since the
    /// engine usually unwinds with a generic error when interrupted.
    pub(crate) fn from_execution(err: EngineError, cancelled: bool) -> Self {
        match err {
            EngineError::Allocation => Self::AllocationFailure,
            err if cancelled || err == EngineError::Cancelled => Self::Execution {
                message: TIMEOUT_MESSAGE.to_string(),
                timed_out: true,
            },
            other => Self::Execution {
                message: other.to_string(),
                timed_out: false,
            },
        }
    }
}

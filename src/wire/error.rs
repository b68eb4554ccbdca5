//! Error types for the marshalling protocol.

use thiserror::Error;

/// Errors that can occur while decoding wire-encoded buffers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Unexpected trailing data: {0} bytes after the last item")]
    TrailingBytes(usize),

    #[error("Length {0} does not fit in the wire format")]
    LengthOverflow(u64),

    #[error("Memory allocation failure while copying {0} bytes")]
    Allocation(usize),
}

//! Library tracing hooks.
//!
//! With the `logging` feature the crate logs through `tracing` and the host
//! installs whatever subscriber it wants. Without the feature every macro
//! expands to nothing, arguments included.
//!
//! ```rust,ignore
//! use crate::logging::{debug, warn};
//!
//! debug!(context = %id, "context registered");
//! warn!(contexts = ?cancelled, "cancelled tasks that exceeded timeout");
//! ```

#[cfg(feature = "logging")]
pub(crate) use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "logging"))]
pub(crate) use disabled::{debug, error, info, trace, warn};

#[cfg(not(feature = "logging"))]
mod disabled {
    macro_rules! discard {
        ($($arg:tt)*) => {};
    }

    pub(crate) use discard as debug;
    pub(crate) use discard as error;
    pub(crate) use discard as info;
    pub(crate) use discard as trace;
    pub(crate) use discard as warn;
}

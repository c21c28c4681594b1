//! Tracing compatibility layer for structured logging.
//!
//! This module provides one set of logging macros whether or not the
//! `tracing-integration` feature is enabled:
//!
//! - **With feature enabled**: Re-exports from the `tracing` crate.
//! - **Without feature**: No-op macros that compile to nothing.
//!
//! # Usage
//!
//! ```rust,ignore
//! use evfetch::tracing_compat::{debug, info};
//!
//! info!("fetch started");
//! debug!(token = token.0, phase = ?phase, "phase transition");
//! ```
//!
//! # Feature Flag
//!
//! ```toml
//! evfetch = { version = "0.1", features = ["tracing-integration"] }
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{Level, debug, error, info, trace, warn};

// When tracing is disabled, provide no-op macros
#[cfg(not(feature = "tracing-integration"))]
mod noop {
    //! No-op implementations when tracing is disabled.

    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op info-level logging macro.
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    /// No-op error-level logging macro.
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {};
    }

    // Re-export the macros at module level
    pub use crate::{debug, error, info, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;

/// Log level placeholder when tracing is disabled.
#[cfg(not(feature = "tracing-integration"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Trace level.
    TRACE,
    /// Debug level.
    DEBUG,
    /// Info level.
    INFO,
    /// Warn level.
    WARN,
    /// Error level.
    ERROR,
}

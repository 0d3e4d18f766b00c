//! # imagereg Utilities
//!
//! Shared helpers for the imagereg workspace.
//!
//! Today that is the logging setup used by the `imagereg` binary: a
//! `tracing` subscriber configured from the environment and CLI flags.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{init_logging, init_logging_with_level, LogConfig, LogFormat, LogLevel, LoggingError};
pub use tracing::{debug, error, info, trace, warn};

//! # Tether Utilities
//!
//! Shared logging and configuration for Tether.
//!
//! Logging is built on `tracing`; configuration layers defaults, a TOML
//! file and `TETHER_*` environment variables.

pub mod config;
pub mod logging;

pub use config::{ConfigError, TetherConfig};
pub use logging::{LogFormat, LogLevel, LoggingError, LoggingOptions, init_logging, init_logging_with, init_logging_with_level};
pub use tracing::{debug, error, info, trace, warn};

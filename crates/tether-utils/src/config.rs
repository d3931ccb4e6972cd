//! # Configuration
//!
//! Settings for a Tether debugger host.
//!
//! Sources, in increasing precedence:
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. `TETHER_*` environment variables
//! 4. Command-line flags (applied by the binary)
//!
//! ## Example file
//!
//! ```toml
//! listen = "127.0.0.1:5678"
//! condition_budget_ms = 250
//! library_roots = ["/usr/lib/python3.12"]
//! untraced_roots = ["/opt/agent"]
//! log_level = "debug"
//! log_format = "json"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io};

use serde::{Deserialize, Serialize};

use crate::logging::{LogFormat, LogLevel, LoggingOptions};

/// Default address the debugger listens on.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:5678";

/// Default maximum wire frame, 16 MiB.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Default budget for one breakpoint condition.
pub const DEFAULT_CONDITION_BUDGET_MS: u64 = 500;

/// Separator for list-valued environment variables.
const LIST_SEPARATOR: char = ',';

/// Host configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TetherConfig
{
    /// Address the protocol server binds.
    pub listen: String,
    /// Time one condition may take before it counts as failed.
    pub condition_budget_ms: u64,
    /// Largest accepted wire frame.
    pub max_frame_len: usize,
    /// Path prefixes treated as library code.
    pub library_roots: Vec<String>,
    /// Path prefixes never traced.
    pub untraced_roots: Vec<String>,
    /// Fixed log level; `None` defers to `RUST_LOG`.
    pub log_level: Option<LogLevel>,
    /// Log output format.
    pub log_format: LogFormat,
    /// Optional daily-rolled log file.
    pub log_file: Option<PathBuf>,
}

impl Default for TetherConfig
{
    fn default() -> Self
    {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            condition_budget_ms: DEFAULT_CONDITION_BUDGET_MS,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            library_roots: Vec::new(),
            untraced_roots: Vec::new(),
            log_level: None,
            log_format: LogFormat::default(),
            log_file: None,
        }
    }
}

impl TetherConfig
{
    /// Defaults, then `path` if given, then the process environment.
    ///
    /// ## Errors
    ///
    /// Returns an error when the file cannot be read or parsed, an
    /// environment variable is malformed, or the result fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError>
    {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_vars(env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file. Missing keys keep their defaults.
    ///
    /// ## Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError>
    {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            origin: path.display().to_string(),
            source,
        })
    }

    /// Parse TOML text.
    ///
    /// ## Errors
    ///
    /// Returns the TOML error for malformed text or unknown keys.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error>
    {
        toml::from_str(text)
    }

    /// Overlay `TETHER_*` variables. Unrelated variables are ignored.
    ///
    /// ## Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for a value that does not parse.
    pub fn apply_vars<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref());
            let invalid = || ConfigError::InvalidEnv {
                name: key.to_string(),
                value: value.to_string(),
            };
            match key {
                "TETHER_LISTEN" => self.listen = value.to_string(),
                "TETHER_CONDITION_BUDGET_MS" => self.condition_budget_ms = value.parse().map_err(|_| invalid())?,
                "TETHER_MAX_FRAME_LEN" => self.max_frame_len = value.parse().map_err(|_| invalid())?,
                "TETHER_LIBRARY_ROOTS" => self.library_roots = split_list(value),
                "TETHER_UNTRACED_ROOTS" => self.untraced_roots = split_list(value),
                "TETHER_LOG_LEVEL" => self.log_level = Some(value.parse().map_err(|_| invalid())?),
                "TETHER_LOG_FORMAT" => self.log_format = value.parse().map_err(|_| invalid())?,
                "TETHER_LOG_FILE" => self.log_file = (!value.is_empty()).then(|| PathBuf::from(value)),
                _ => {}
            }
        }
        Ok(())
    }

    /// Check values that parse but cannot work.
    ///
    /// ## Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending setting.
    pub fn validate(&self) -> Result<(), ConfigError>
    {
        self.listen_addr()?;
        if self.condition_budget_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "condition_budget_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_frame_len == 0 {
            return Err(ConfigError::Invalid {
                name: "max_frame_len",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// The listen address, parsed.
    ///
    /// ## Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `listen` is not `host:port`.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError>
    {
        self.listen.parse().map_err(|err: std::net::AddrParseError| ConfigError::Invalid {
            name: "listen",
            reason: format!("{}: {err}", self.listen),
        })
    }

    #[must_use]
    pub const fn condition_budget(&self) -> Duration
    {
        Duration::from_millis(self.condition_budget_ms)
    }

    /// Logging options derived from this configuration.
    #[must_use]
    pub fn logging(&self) -> LoggingOptions
    {
        LoggingOptions {
            level: self.log_level,
            format: self.log_format,
            file: self.log_file.clone(),
        }
    }
}

fn split_list(value: &str) -> Vec<String>
{
    value
        .split(LIST_SEPARATOR)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError
{
    /// The config file could not be read
    #[error("Cannot read config file {}: {source}", .path.display())]
    Read
    {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The config file is not valid TOML for this schema
    #[error("Invalid config in {origin}: {source}")]
    Parse
    {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    /// An environment variable did not parse
    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnv
    {
        name: String,
        value: String,
    },

    /// A setting parsed but is unusable
    #[error("Invalid setting {name}: {reason}")]
    Invalid
    {
        name: &'static str,
        reason: String,
    },
}

//! # Error Types
//!
//! Three enums, by how far a failure reaches:
//!
//! - [`ProtocolError`]: one request is bad. Answered with `PROTOCOL_ERROR`,
//!   the session keeps running.
//! - [`CommandError`]: a well-formed request failed in the engine. Answered
//!   with `ERROR`.
//! - [`TransportError`]: the connection is unusable. Fatal to the session.

use thiserror::Error;

use tether_core::error::TetherError;

/// A request that could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError
{
    /// The `kind` field names no known command.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// A required argument is absent.
    #[error("Missing argument '{0}'")]
    MissingArgument(&'static str),

    /// An argument has the wrong type or an unusable value.
    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument
    {
        /// Argument name.
        name: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The payload is not a valid envelope.
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// The frame was longer than the configured limit and was skipped.
    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge
    {
        /// Announced length.
        len: usize,
        /// Configured limit.
        max: usize,
    },
}

/// A decoded command the engine could not carry out.
#[derive(Error, Debug)]
pub enum CommandError
{
    /// The engine refused the operation.
    #[error(transparent)]
    Engine(#[from] TetherError),

    /// The result could not be turned into a payload.
    #[error("Cannot encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The connection failed.
#[derive(Error, Debug)]
pub enum TransportError
{
    /// The peer closed the connection, possibly mid-frame.
    #[error("Connection closed")]
    Closed,

    /// Socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An outgoing message could not be serialized.
    #[error("Cannot encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    /// An outgoing payload does not fit the 32-bit length prefix.
    #[error("Outgoing frame of {0} bytes is too large")]
    Oversize(usize),
}

/// Convenience type alias for `Result<T, ProtocolError>`
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

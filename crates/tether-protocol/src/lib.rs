//! # tether-protocol
//!
//! The command protocol between the Tether debugger and its client.
//!
//! - [`wire`]: `[u32 big-endian length][payload]` framing
//! - [`message`]: the JSON envelope every payload carries
//! - [`command`]: typed commands, responses and notifications
//! - [`session`]: the server side, driving a [`tether_core::Engine`]
//! - [`client`]: a blocking client

pub mod client;
pub mod command;
pub mod error;
pub mod message;
pub mod session;
pub mod wire;

pub use client::RemoteClient;
pub use command::{Command, Response, ThreadSelector};
pub use error::{CommandError, ProtocolError, ProtocolResult, TransportError};
pub use message::Envelope;
pub use session::{Session, SessionConfig, SessionHandle};

//! # tether-core
//!
//! Runtime core of the Tether attached debugger.
//!
//! A host runtime reports execution events (call, line, return, exception)
//! from inside the target threads; this crate decides whether each thread
//! keeps running or parks until a client resumes it.
//!
//! - [`breakpoints`]: line breakpoints, logpoints and exception breakpoints,
//!   with conditions and hit counters
//! - [`stepping`]: the per-thread step state machine
//! - [`smart_step`]: call-site discovery over a frame's instruction stream
//! - [`suspension`]: thread registration, suspension gates and resumption
//! - [`dispatcher`]: the entry point hosts call for every event
//! - [`engine`]: wires the pieces together
//!
//! ## Threading
//!
//! Target threads run the dispatcher and block inside the controller while
//! suspended. Control threads (the protocol session) mutate the registry and
//! resume threads concurrently. All shared state is behind `parking_lot`
//! locks or atomics; the crate contains no `unsafe` code.

pub mod breakpoints;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod eval;
pub mod events;
pub mod port;
pub mod prelude;
pub mod smart_step;
pub mod stepping;
pub mod suspension;
pub mod types;

pub use engine::{Engine, EngineBuilder};
pub use error::{EvalError, TetherError, TetherResult};

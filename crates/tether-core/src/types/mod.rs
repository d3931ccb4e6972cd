//! # Types
//!
//! Language-neutral data model shared by the registry, the dispatcher and the
//! suspension controller.
//!
//! Nothing here knows how a host runtime represents frames or values; hosts
//! convert into these types at the instrumentation port.

pub mod exception;
pub mod frame;
pub mod location;
pub mod thread;
pub mod value;

pub use exception::ExceptionInfo;
pub use frame::{Frame, FrameId};
pub use location::SourceLocation;
pub use thread::{RunState, StopReason, ThreadId, ThreadSnapshot};
pub use value::Value;

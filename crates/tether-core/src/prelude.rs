//! Common module for library exports

pub use crate::breakpoints::{
    BreakpointId, BreakpointRegistry, ExceptionFlags, ExceptionPhase, LineBreakpointBuilder, MatchResult, SuspendPolicy,
};
pub use crate::dispatcher::{Dispatcher, ExecutionEvent, Flow, ThreadTrace};
pub use crate::engine::{Engine, EngineBuilder};
pub use crate::error::{EvalError, TetherError, TetherResult};
pub use crate::events::{DebuggerEvent, DebuggerEventReceiver, DebuggerEventSender};
pub use crate::port::{Deadline, Evaluator, FrameView, LogicalLocationResolver, PrefixFilter, SourceFilter};
pub use crate::stepping::StepCommand;
pub use crate::suspension::{ResumeRequest, SuspensionController};
pub use crate::types::{ExceptionInfo, Frame, FrameId, RunState, SourceLocation, StopReason, ThreadId, Value};

//! Debugger event types and helpers.
//!
//! The session consumes these events to notify the client of asynchronous
//! state changes without polling the controller. Target threads publish them
//! from inside the instrumentation callback: registering, suspending,
//! resuming, hitting a logpoint, or disabling a broken condition.

use std::sync::mpsc;
use std::sync::Arc;

use crate::breakpoints::{BreakpointId, ConditionFailure};
use crate::stepping::StepCommand;
use crate::types::{ExceptionInfo, Frame, SourceLocation, StopReason, ThreadId};

/// Event emitted by the debugger core.
#[derive(Debug, Clone, PartialEq)]
pub enum DebuggerEvent
{
    /// A thread was registered.
    ThreadCreated
    {
        /// The new thread.
        thread: ThreadId,
        /// Its name.
        name: String,
    },
    /// A thread was unregistered.
    ThreadKilled
    {
        /// The thread.
        thread: ThreadId,
    },
    /// A thread parked at its suspension gate.
    ThreadSuspended
    {
        /// The thread.
        thread: ThreadId,
        /// Why it stopped.
        reason: StopReason,
        /// Frames captured for this suspension, innermost first.
        frame: Arc<Frame>,
        /// The exception being reported, for exception breakpoints.
        exception: Option<ExceptionInfo>,
    },
    /// A suspended thread was released.
    ThreadResumed
    {
        /// The thread.
        thread: ThreadId,
        /// The step it resumed with.
        step: StepCommand,
    },
    /// A breakpoint expression failed; the breakpoint is now inert.
    ConditionFailed(ConditionFailure),
    /// A logpoint fired.
    LogMessage
    {
        /// Thread that hit the logpoint.
        thread: ThreadId,
        /// The logpoint.
        breakpoint: BreakpointId,
        /// Where it fired.
        location: SourceLocation,
        /// Rendered message.
        message: String,
    },
}

impl DebuggerEvent
{
    /// Human-readable description of the event.
    #[must_use]
    pub fn describe(&self) -> String
    {
        match self {
            Self::ThreadCreated { thread, name } => format!("Thread {thread} ({name}) created"),
            Self::ThreadKilled { thread } => format!("Thread {thread} exited"),
            Self::ThreadSuspended {
                thread,
                reason,
                frame,
                exception,
            } => {
                let mut description = format!("Thread {thread} {} at {}:{}", format_stop_reason(*reason), frame.unit, frame.line);
                if let Some(exception) = exception {
                    description.push_str(&format!(" ({}: {})", exception.type_name, exception.message));
                }
                description
            }
            Self::ThreadResumed { thread, step } => format!("Thread {thread} resumed ({step})"),
            Self::ConditionFailed(failure) => format!(
                "Breakpoint {} at {} disabled: {} raised {}",
                failure.breakpoint, failure.location, failure.expression, failure.error
            ),
            Self::LogMessage { location, message, .. } => format!("{location}: {message}"),
        }
    }
}

/// Format a [`StopReason`] into a user-facing message.
#[must_use]
pub fn format_stop_reason(reason: StopReason) -> String
{
    match reason {
        StopReason::LineBreakpoint => "hit a breakpoint".to_string(),
        StopReason::ExceptionBreakpoint => "stopped on an exception".to_string(),
        StopReason::StepComplete => "finished stepping".to_string(),
        StopReason::PauseRequested => "paused".to_string(),
    }
}

/// Sender side of the debugger event channel.
pub type DebuggerEventSender = mpsc::Sender<DebuggerEvent>;
/// Receiver side of the debugger event channel.
pub type DebuggerEventReceiver = mpsc::Receiver<DebuggerEvent>;

/// Create a new debugger event channel.
#[must_use]
pub fn event_channel() -> (DebuggerEventSender, DebuggerEventReceiver)
{
    mpsc::channel()
}

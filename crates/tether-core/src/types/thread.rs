//! Thread identity and run-state types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::stepping::StepCommand;

/// Identifier of a target-program thread.
///
/// The value is whatever the host uses to tell its threads apart (an OS
/// thread id, an interpreter thread ident, ...). The debugger only requires
/// that it is unique among live threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(u64);

impl ThreadId
{
    /// Create a new identifier from a raw value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self
    {
        Self(value)
    }

    /// Get the raw numeric representation.
    #[must_use]
    pub const fn raw(self) -> u64
    {
        self.0
    }
}

impl From<u64> for ThreadId
{
    fn from(value: u64) -> Self
    {
        Self(value)
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Whether a thread is executing or parked at its suspension gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState
{
    /// Executing target code.
    Running,
    /// Blocked inside the controller until resumed.
    Suspended,
}

/// Why a thread was suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason
{
    /// A line breakpoint matched.
    LineBreakpoint,
    /// An exception breakpoint matched.
    ExceptionBreakpoint,
    /// A step command completed.
    StepComplete,
    /// The client asked the thread to pause.
    PauseRequested,
}

impl StopReason
{
    /// Wire name of the reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str
    {
        match self {
            Self::LineBreakpoint => "line_breakpoint",
            Self::ExceptionBreakpoint => "exception_breakpoint",
            Self::StepComplete => "step_complete",
            Self::PauseRequested => "pause_requested",
        }
    }
}

impl fmt::Display for StopReason
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one registered thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSnapshot
{
    /// Thread identifier.
    pub id: ThreadId,
    /// Host-supplied thread name.
    pub name: String,
    /// Current run state.
    pub run_state: RunState,
    /// Reason for the current suspension, if suspended.
    pub stop_reason: Option<StopReason>,
    /// Step command that will apply when the thread next runs.
    pub step: StepCommand,
    /// Whether the thread is executing inside do-not-trace code.
    pub untraced: bool,
}

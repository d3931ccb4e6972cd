//! # Stepping
//!
//! Per-thread step state and the stop/continue decision for each execution
//! event.
//!
//! A step is described by a [`StepCommand`] plus the call depth and line at
//! the moment it took effect. Each command takes its origin from the
//! suspension it resumes, so stepping from a breakpoint inside a nested call
//! measures depth from that call, not from wherever stepping started.
//!
//! | command            | completes at                                              |
//! |--------------------|-----------------------------------------------------------|
//! | `Into`             | the next line event anywhere                              |
//! | `IntoMyCodeOnly`   | the next line event outside library code                  |
//! | `Over`             | the next line event at depth <= origin                    |
//! | `Return`           | the return event that takes depth below origin            |
//! | `SmartInto(t)`     | the first line inside the call made at offset `t`         |
//!
//! A smart step whose target is never called behaves like `Over`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Step requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepCommand
{
    /// Run freely.
    #[default]
    None,
    /// Stop at the next line.
    Into,
    /// Stop at the next line of the current frame or a caller.
    Over,
    /// Stop when the current frame returns.
    Return,
    /// Like `Into`, skipping library code.
    IntoMyCodeOnly,
    /// Stop inside the call made by the instruction at `target_offset`.
    SmartInto
    {
        /// Offset of the chosen call instruction in the origin frame.
        target_offset: u32,
    },
}

impl StepCommand
{
    /// Wire name of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str
    {
        match self {
            Self::None => "none",
            Self::Into => "into",
            Self::Over => "over",
            Self::Return => "return",
            Self::IntoMyCodeOnly => "into_my_code",
            Self::SmartInto { .. } => "smart_into",
        }
    }
}

impl fmt::Display for StepCommand
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::SmartInto { target_offset } => write!(f, "smart_into@{target_offset}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Outcome of feeding one event to a [`StepState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDecision
{
    /// Keep running.
    Continue,
    /// The step is complete; suspend here.
    Stop,
}

/// Active step of one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepState
{
    command: StepCommand,
    origin_depth: usize,
    origin_line: u32,
    entered_depth: Option<usize>,
}

impl StepState
{
    /// No step in progress.
    #[must_use]
    pub const fn idle() -> Self
    {
        Self {
            command: StepCommand::None,
            origin_depth: 0,
            origin_line: 0,
            entered_depth: None,
        }
    }

    /// Start `command` from a frame at `depth` on `line`.
    #[must_use]
    pub const fn begin(command: StepCommand, depth: usize, line: u32) -> Self
    {
        Self {
            command,
            origin_depth: depth,
            origin_line: line,
            entered_depth: None,
        }
    }

    /// The command being executed.
    #[must_use]
    pub const fn command(&self) -> StepCommand
    {
        self.command
    }

    /// Depth the step started from.
    #[must_use]
    pub const fn origin_depth(&self) -> usize
    {
        self.origin_depth
    }

    /// Whether a step is in progress.
    #[must_use]
    pub const fn is_active(&self) -> bool
    {
        !matches!(self.command, StepCommand::None)
    }

    /// Drop the step.
    pub fn cancel(&mut self)
    {
        *self = Self::idle();
    }

    /// A call was made; `depth` is the callee's depth and `call_site` the
    /// offset of the calling instruction in the caller.
    pub fn on_call(&mut self, depth: usize, call_site: Option<u32>)
    {
        if let StepCommand::SmartInto { target_offset } = self.command {
            if self.entered_depth.is_none() && depth == self.origin_depth + 1 && call_site == Some(target_offset) {
                self.entered_depth = Some(depth);
            }
        }
    }

    /// A line is about to run at `depth`.
    #[must_use]
    pub fn on_line(&mut self, depth: usize, line: u32, is_library: bool) -> StepDecision
    {
        let stop = match self.command {
            StepCommand::None => false,
            StepCommand::Into => true,
            StepCommand::IntoMyCodeOnly => !is_library,
            StepCommand::Over => depth <= self.origin_depth,
            // Unwinding past the origin without a return event still ends the step.
            StepCommand::Return => depth < self.origin_depth,
            StepCommand::SmartInto { .. } => match self.entered_depth {
                Some(entered) => depth >= entered,
                None => depth < self.origin_depth || (depth == self.origin_depth && line != self.origin_line),
            },
        };
        if stop { StepDecision::Stop } else { StepDecision::Continue }
    }

    /// The frame at `depth` is returning.
    #[must_use]
    pub fn on_return(&mut self, depth: usize) -> StepDecision
    {
        match self.command {
            StepCommand::Return if depth <= self.origin_depth => StepDecision::Stop,
            StepCommand::SmartInto { .. } => {
                if self.entered_depth == Some(depth) {
                    self.entered_depth = None;
                }
                StepDecision::Continue
            }
            _ => StepDecision::Continue,
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_into_stops_at_next_line()
    {
        let mut step = StepState::begin(StepCommand::Into, 1, 10);
        step.on_call(2, Some(4));
        assert_eq!(step.on_line(2, 1, false), StepDecision::Stop);
    }

    #[test]
    fn test_over_skips_nested_calls()
    {
        let mut step = StepState::begin(StepCommand::Over, 1, 10);
        step.on_call(2, Some(4));
        assert_eq!(step.on_line(2, 20, false), StepDecision::Continue);
        step.on_call(3, None);
        assert_eq!(step.on_line(3, 30, false), StepDecision::Continue);
        assert_eq!(step.on_return(3), StepDecision::Continue);
        assert_eq!(step.on_return(2), StepDecision::Continue);
        assert_eq!(step.on_line(1, 11, false), StepDecision::Stop);
    }

    #[test]
    fn test_over_stops_in_caller_after_return()
    {
        let mut step = StepState::begin(StepCommand::Over, 2, 10);
        assert_eq!(step.on_return(2), StepDecision::Continue);
        assert_eq!(step.on_line(1, 5, false), StepDecision::Stop);
    }

    #[test]
    fn test_return_completes_on_origin_return()
    {
        let mut step = StepState::begin(StepCommand::Return, 2, 10);
        step.on_call(3, None);
        assert_eq!(step.on_line(3, 1, false), StepDecision::Continue);
        assert_eq!(step.on_return(3), StepDecision::Continue);
        assert_eq!(step.on_line(2, 11, false), StepDecision::Continue);
        assert_eq!(step.on_return(2), StepDecision::Stop);
    }

    #[test]
    fn test_into_my_code_skips_library()
    {
        let mut step = StepState::begin(StepCommand::IntoMyCodeOnly, 1, 10);
        assert_eq!(step.on_line(2, 100, true), StepDecision::Continue);
        assert_eq!(step.on_line(3, 7, false), StepDecision::Stop);
    }

    #[test]
    fn test_smart_into_enters_only_target()
    {
        let mut step = StepState::begin(StepCommand::SmartInto { target_offset: 6 }, 1, 10);
        step.on_call(2, Some(2));
        assert_eq!(step.on_line(2, 1, false), StepDecision::Continue);
        assert_eq!(step.on_return(2), StepDecision::Continue);
        step.on_call(2, Some(6));
        assert_eq!(step.on_line(2, 40, false), StepDecision::Stop);
    }

    #[test]
    fn test_smart_into_degrades_to_over()
    {
        let mut step = StepState::begin(StepCommand::SmartInto { target_offset: 99 }, 1, 10);
        step.on_call(2, Some(2));
        assert_eq!(step.on_line(2, 1, false), StepDecision::Continue);
        assert_eq!(step.on_return(2), StepDecision::Continue);
        assert_eq!(step.on_line(1, 10, false), StepDecision::Continue);
        assert_eq!(step.on_line(1, 11, false), StepDecision::Stop);
    }

    #[test]
    fn test_idle_never_stops()
    {
        let mut step = StepState::idle();
        assert!(!step.is_active());
        assert_eq!(step.on_line(1, 1, false), StepDecision::Continue);
        assert_eq!(step.on_return(1), StepDecision::Continue);
    }
}

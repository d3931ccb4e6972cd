//! # Execution Event Dispatcher
//!
//! Entry point of the instrumentation port. A host calls
//! [`Dispatcher::on_event`] from the target thread for every call, line,
//! return and exception event, passing that thread's [`ThreadTrace`] and a
//! [`FrameView`] of the frame the event happened in.
//!
//! ## Line events
//!
//! Logical-location resolvers run first; the first one that answers decides
//! the location used for breakpoint matching. A breakpoint hit takes
//! precedence over stepping: the thread suspends with `LineBreakpoint` and
//! the active step ends. Otherwise a completed step or a pending pause
//! request suspends the thread.
//!
//! ## Pause and step requests
//!
//! A pause request is honored at the next traced event of any kind, so a
//! thread that only calls and returns still stops. A step set while the
//! thread runs takes effect at its next traced event, measured from the
//! frame that event reports.
//!
//! ## Faults
//!
//! Nothing raised while handling an event reaches target code. Errors and
//! panics are logged, the thread's step is dropped and the thread continues.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, trace, warn};

use crate::breakpoints::{BreakpointRegistry, EvalContext, ExceptionPhase, MatchResult, SuspendPolicy};
use crate::error::{TetherError, TetherResult};
use crate::events::{DebuggerEvent, DebuggerEventSender};
use crate::port::{Evaluator, FrameView, LogicalLocationResolver, SourceFilter};
use crate::stepping::{StepCommand, StepDecision, StepState};
use crate::suspension::{ResumeRequest, SuspensionController, ThreadHandle};
use crate::types::{ExceptionInfo, FrameId, SourceLocation, StopReason, ThreadId};

/// An execution event reported by the host.
#[derive(Debug, Clone, Copy)]
pub enum ExecutionEvent<'a>
{
    /// A new frame was entered. The frame view is the callee.
    Call
    {
        /// Offset of the calling instruction in the caller, when known.
        call_site: Option<u32>,
    },
    /// A line is about to run.
    Line,
    /// The frame is returning.
    Return,
    /// An exception is being raised in, or is propagating through, the frame.
    Exception
    {
        /// The exception.
        exception: &'a ExceptionInfo,
        /// Whether it is being raised or is about to end the thread.
        phase: ExceptionPhase,
    },
}

/// What the host should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow
{
    /// Carry on.
    Continue,
    /// Move execution of the current frame to this line.
    JumpTo(u32),
}

/// Per-thread trace state, owned by the target thread.
#[derive(Debug)]
pub struct ThreadTrace
{
    handle: ThreadHandle,
    depth: usize,
    step: StepState,
    untraced_depth: Option<usize>,
    last_exception: Option<u64>,
}

impl ThreadTrace
{
    /// The traced thread.
    #[must_use]
    pub fn id(&self) -> ThreadId
    {
        self.handle.id()
    }

    /// Current call depth; the outermost frame is at depth 1.
    #[must_use]
    pub const fn depth(&self) -> usize
    {
        self.depth
    }

    /// The active step command.
    #[must_use]
    pub const fn step(&self) -> StepCommand
    {
        self.step.command()
    }

    /// Whether events are currently ignored because of do-not-trace code.
    #[must_use]
    pub const fn is_untraced(&self) -> bool
    {
        self.untraced_depth.is_some()
    }
}

/// Routes execution events to stepping, the registry and the controller.
pub struct Dispatcher
{
    registry: Arc<BreakpointRegistry>,
    controller: Arc<SuspensionController>,
    evaluator: Arc<dyn Evaluator>,
    filter: Arc<dyn SourceFilter>,
    resolvers: Vec<Arc<dyn LogicalLocationResolver>>,
    events: DebuggerEventSender,
    condition_budget: Duration,
    next_frame_id: AtomicU64,
}

impl fmt::Debug for Dispatcher
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Dispatcher")
            .field("resolvers", &self.resolvers.iter().map(|r| r.name().to_string()).collect::<Vec<_>>())
            .field("condition_budget", &self.condition_budget)
            .finish_non_exhaustive()
    }
}

impl Dispatcher
{
    pub(crate) fn new(
        registry: Arc<BreakpointRegistry>,
        controller: Arc<SuspensionController>,
        evaluator: Arc<dyn Evaluator>,
        filter: Arc<dyn SourceFilter>,
        resolvers: Vec<Arc<dyn LogicalLocationResolver>>,
        events: DebuggerEventSender,
        condition_budget: Duration,
    ) -> Self
    {
        Self {
            registry,
            controller,
            evaluator,
            filter,
            resolvers,
            events,
            condition_budget,
            next_frame_id: AtomicU64::new(0),
        }
    }

    /// Register the calling thread and create its trace state.
    pub fn attach_thread(&self, id: ThreadId, name: impl Into<String>) -> ThreadTrace
    {
        ThreadTrace {
            handle: self.controller.register_thread(id, name),
            depth: 0,
            step: StepState::idle(),
            untraced_depth: None,
            last_exception: None,
        }
    }

    /// Unregister a thread that is finishing.
    pub fn detach_thread(&self, trace: ThreadTrace)
    {
        self.controller.unregister_thread(trace.id());
    }

    /// Handle one execution event on the calling (target) thread.
    ///
    /// May block inside the controller while the thread is suspended. Never
    /// panics and never fails: faults are logged and drop the thread's step.
    pub fn on_event(&self, trace: &mut ThreadTrace, event: ExecutionEvent<'_>, frame: &dyn FrameView) -> Flow
    {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.handle_event(trace, event, frame)));
        match outcome {
            Ok(Ok(flow)) => flow,
            Ok(Err(err)) => {
                warn!(thread = trace.id().raw(), %err, "event handling failed, continuing unstepped");
                trace.step.cancel();
                Flow::Continue
            }
            Err(_) => {
                // The view may be what panicked; do not touch it again.
                error!(thread = trace.id().raw(), depth = trace.depth, "event handling panicked, continuing unstepped");
                trace.step.cancel();
                Flow::Continue
            }
        }
    }

    fn handle_event(&self, trace: &mut ThreadTrace, event: ExecutionEvent<'_>, frame: &dyn FrameView) -> TetherResult<Flow>
    {
        match event {
            ExecutionEvent::Call { call_site } => {
                trace.depth += 1;
                if trace.untraced_depth.is_none() && self.filter.is_untraced(frame.unit()) {
                    trace!(thread = trace.id().raw(), unit = frame.unit(), "entering do-not-trace code");
                    trace.untraced_depth = Some(trace.depth);
                    trace.handle.set_untraced(true);
                }
                if trace.is_untraced() {
                    return Ok(Flow::Continue);
                }
                // The frame view is the callee, so a new step starts there.
                Self::apply_step_override(trace, frame);
                trace.step.on_call(trace.depth, call_site);
                Ok(self.pause_if_requested(trace, frame).unwrap_or(Flow::Continue))
            }
            ExecutionEvent::Line => {
                if trace.is_untraced() {
                    return Ok(Flow::Continue);
                }
                Self::apply_step_override(trace, frame);
                self.on_line(trace, frame)
            }
            ExecutionEvent::Return => {
                if trace.depth == 0 {
                    return Err(TetherError::Instrumentation(format!(
                        "return from {} without a matching call",
                        frame.function()
                    )));
                }
                let mut flow = Flow::Continue;
                if !trace.is_untraced() {
                    Self::apply_step_override(trace, frame);
                    flow = if trace.step.on_return(trace.depth) == StepDecision::Stop {
                        self.suspend(trace, StopReason::StepComplete, frame, None)
                    } else {
                        self.pause_if_requested(trace, frame).unwrap_or(Flow::Continue)
                    };
                }
                if trace.untraced_depth == Some(trace.depth) {
                    trace.untraced_depth = None;
                    trace.handle.set_untraced(false);
                }
                trace.depth -= 1;
                Ok(flow)
            }
            ExecutionEvent::Exception { exception, phase } => {
                if trace.is_untraced() {
                    return Ok(Flow::Continue);
                }
                Self::apply_step_override(trace, frame);
                Ok(self
                    .on_exception(trace, exception, phase, frame)
                    .or_else(|| self.pause_if_requested(trace, frame))
                    .unwrap_or(Flow::Continue))
            }
        }
    }

    /// Replace the step with one set by the client while the thread ran.
    fn apply_step_override(trace: &mut ThreadTrace, frame: &dyn FrameView)
    {
        if let Some(step) = trace.handle.take_step_override() {
            trace.step = StepState::begin(step, trace.depth, frame.line());
        }
    }

    fn pause_if_requested(&self, trace: &mut ThreadTrace, frame: &dyn FrameView) -> Option<Flow>
    {
        trace
            .handle
            .take_pause_request()
            .then(|| self.suspend(trace, StopReason::PauseRequested, frame, None))
    }

    fn on_line(&self, trace: &mut ThreadTrace, frame: &dyn FrameView) -> TetherResult<Flow>
    {
        let location = self.logical_location(frame);
        let mut ctx = EvalContext::new(frame, self.evaluator.as_ref(), self.condition_budget);
        let matched = self.registry.match_line(&location, &mut ctx);
        for failure in ctx.take_failures() {
            let _ = self.events.send(DebuggerEvent::ConditionFailed(failure));
        }

        match matched {
            MatchResult::Hit(breakpoint) => {
                debug!(thread = trace.id().raw(), %location, id = breakpoint.id.raw(), "breakpoint hit");
                if breakpoint.suspend_policy == SuspendPolicy::All {
                    self.controller.suspend_all(Some(trace.id()));
                }
                return Ok(self.suspend(trace, StopReason::LineBreakpoint, frame, None));
            }
            MatchResult::LogAndContinue { breakpoint, message } => {
                let _ = self.events.send(DebuggerEvent::LogMessage {
                    thread: trace.id(),
                    breakpoint,
                    location,
                    message,
                });
            }
            MatchResult::NoMatch => {}
        }

        let is_library = trace.step.is_active() && self.filter.is_library(frame.unit());
        if trace.step.on_line(trace.depth, frame.line(), is_library) == StepDecision::Stop {
            return Ok(self.suspend(trace, StopReason::StepComplete, frame, None));
        }
        Ok(self.pause_if_requested(trace, frame).unwrap_or(Flow::Continue))
    }

    fn on_exception(&self, trace: &mut ThreadTrace, exception: &ExceptionInfo, phase: ExceptionPhase, frame: &dyn FrameView) -> Option<Flow>
    {
        let first_raise = trace.last_exception != Some(exception.id);
        trace.last_exception = Some(exception.id);

        let Some(breakpoint) = self.registry.match_exception(exception, phase) else {
            return None;
        };
        if breakpoint.flags.ignore_libraries && self.filter.is_library(frame.unit()) {
            return None;
        }
        if phase == ExceptionPhase::Raised && breakpoint.flags.first_raise_only && !first_raise {
            return None;
        }
        debug!(thread = trace.id().raw(), kind = %breakpoint.kind, raised = %exception.type_name, ?phase, "exception breakpoint hit");
        Some(self.suspend(trace, StopReason::ExceptionBreakpoint, frame, Some(exception.clone())))
    }

    fn logical_location(&self, frame: &dyn FrameView) -> SourceLocation
    {
        self.resolvers
            .iter()
            .find_map(|resolver| resolver.resolve(frame))
            .unwrap_or_else(|| SourceLocation::new(frame.unit(), frame.line()))
    }

    /// Capture the frames, park the thread, and set up whatever it was
    /// resumed with.
    fn suspend(&self, trace: &mut ThreadTrace, reason: StopReason, frame: &dyn FrameView, exception: Option<ExceptionInfo>) -> Flow
    {
        let mut captured = frame.capture();
        captured.assign_ids(|| FrameId::from_raw(self.next_frame_id.fetch_add(1, Ordering::Relaxed) + 1));
        trace.step.cancel();

        let ResumeRequest { step, jump_to_line } = self.controller.request_suspend(trace.id(), reason, captured, exception);
        let line = jump_to_line.unwrap_or_else(|| frame.line());
        trace.step = StepState::begin(step, trace.depth, line);
        jump_to_line.map_or(Flow::Continue, Flow::JumpTo)
    }
}

//! # Engine
//!
//! Composition root for the debugger core. [`EngineBuilder`] wires the
//! breakpoint registry, the suspension controller and the dispatcher around
//! the host's collaborators and hands back the event receiver the session
//! drains.
//!
//! ## Example
//!
//! ```rust
//! use tether_core::engine::EngineBuilder;
//! use tether_core::types::ThreadId;
//!
//! let (engine, _events) = EngineBuilder::new().build();
//! let trace = engine.dispatcher().attach_thread(ThreadId::from_raw(1), "MainThread");
//! assert_eq!(engine.controller().threads().len(), 1);
//! engine.dispatcher().detach_thread(trace);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::breakpoints::BreakpointRegistry;
use crate::dispatcher::Dispatcher;
use crate::error::{TetherError, TetherResult};
use crate::eval::BasicEvaluator;
use crate::events::{event_channel, DebuggerEventReceiver};
use crate::port::{Deadline, Evaluator, LogicalLocationResolver, PrefixFilter, SourceFilter};
use crate::smart_step::{self, CallTarget};
use crate::suspension::SuspensionController;
use crate::types::{Frame, FrameId, ThreadId, Value};

/// Time a breakpoint condition or log expression may run before it counts
/// as failed.
pub const DEFAULT_CONDITION_BUDGET: Duration = Duration::from_millis(500);

/// Time an `EVALUATE` request may run.
pub const DEFAULT_EVALUATION_BUDGET: Duration = Duration::from_secs(5);

/// Builder for [`Engine`].
pub struct EngineBuilder
{
    evaluator: Option<Arc<dyn Evaluator>>,
    filter: Option<Arc<dyn SourceFilter>>,
    resolvers: Vec<Arc<dyn LogicalLocationResolver>>,
    condition_budget: Duration,
    evaluation_budget: Duration,
}

impl Default for EngineBuilder
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl fmt::Debug for EngineBuilder
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("EngineBuilder")
            .field("custom_evaluator", &self.evaluator.is_some())
            .field("custom_filter", &self.filter.is_some())
            .field("resolvers", &self.resolvers.len())
            .field("condition_budget", &self.condition_budget)
            .field("evaluation_budget", &self.evaluation_budget)
            .finish()
    }
}

impl EngineBuilder
{
    /// Builder with the basic evaluator, an empty prefix filter and no
    /// logical-location resolvers.
    #[must_use]
    pub fn new() -> Self
    {
        Self {
            evaluator: None,
            filter: None,
            resolvers: Vec::new(),
            condition_budget: DEFAULT_CONDITION_BUDGET,
            evaluation_budget: DEFAULT_EVALUATION_BUDGET,
        }
    }

    /// Use `evaluator` for conditions, log expressions and `EVALUATE`.
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self
    {
        self.evaluator = Some(evaluator);
        self
    }

    /// Classify library and do-not-trace units with `filter`.
    #[must_use]
    pub fn with_source_filter(mut self, filter: Arc<dyn SourceFilter>) -> Self
    {
        self.filter = Some(filter);
        self
    }

    /// Append a logical-location resolver. Resolvers are consulted in the
    /// order they were added.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn LogicalLocationResolver>) -> Self
    {
        self.resolvers.push(resolver);
        self
    }

    /// Budget for breakpoint conditions and log expressions.
    #[must_use]
    pub const fn with_condition_budget(mut self, budget: Duration) -> Self
    {
        self.condition_budget = budget;
        self
    }

    /// Budget for client-requested evaluations.
    #[must_use]
    pub const fn with_evaluation_budget(mut self, budget: Duration) -> Self
    {
        self.evaluation_budget = budget;
        self
    }

    /// Build the engine and the receiving end of its event channel.
    #[must_use]
    pub fn build(self) -> (Engine, DebuggerEventReceiver)
    {
        let (events, receiver) = event_channel();
        let evaluator = self.evaluator.unwrap_or_else(|| Arc::new(BasicEvaluator::new()));
        let filter = self.filter.unwrap_or_else(|| Arc::new(PrefixFilter::default()));
        let registry = Arc::new(BreakpointRegistry::new());
        let controller = Arc::new(SuspensionController::new(events.clone()));

        info!(
            resolvers = self.resolvers.len(),
            condition_budget_ms = self.condition_budget.as_millis() as u64,
            "debugger engine ready"
        );

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&controller),
            Arc::clone(&evaluator),
            filter,
            self.resolvers,
            events,
            self.condition_budget,
        ));

        let engine = Engine {
            registry,
            controller,
            dispatcher,
            evaluator,
            evaluation_budget: self.evaluation_budget,
        };
        (engine, receiver)
    }
}

/// Handle to a running debugger core. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Engine
{
    registry: Arc<BreakpointRegistry>,
    controller: Arc<SuspensionController>,
    dispatcher: Arc<Dispatcher>,
    evaluator: Arc<dyn Evaluator>,
    evaluation_budget: Duration,
}

impl fmt::Debug for Engine
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("controller", &self.controller)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl Engine
{
    /// Breakpoint registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<BreakpointRegistry>
    {
        &self.registry
    }

    /// Suspension controller.
    #[must_use]
    pub fn controller(&self) -> &Arc<SuspensionController>
    {
        &self.controller
    }

    /// Dispatcher hosts feed execution events to.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher>
    {
        &self.dispatcher
    }

    /// Copy of one frame of a suspended thread, with its callers.
    ///
    /// # Errors
    ///
    /// Fails when the thread is unknown or not suspended, or when no frame of
    /// the current suspension has `frame_id`.
    pub fn frame(&self, thread: ThreadId, frame_id: FrameId) -> TetherResult<Frame>
    {
        let top = self.controller.suspended_frame(thread)?;
        top.find(frame_id)
            .cloned()
            .ok_or(TetherError::UnknownFrame { thread, frame: frame_id })
    }

    /// Evaluate `expression` in a frame of a suspended thread.
    ///
    /// # Errors
    ///
    /// Fails like [`Engine::frame`], or with
    /// [`TetherError::Evaluation`] when the expression fails.
    pub fn evaluate(&self, thread: ThreadId, frame_id: FrameId, expression: &str) -> TetherResult<Value>
    {
        let frame = self.frame(thread, frame_id)?;
        let value = self.evaluator.evaluate(expression, &frame, Deadline::after(self.evaluation_budget))?;
        Ok(value)
    }

    /// Call sites on lines `start_line..=end_line` of a suspended frame, in
    /// execution order.
    ///
    /// # Errors
    ///
    /// Fails like [`Engine::frame`], or with [`TetherError::NoCodeObject`]
    /// when the host did not capture the frame's instructions.
    pub fn smart_step_targets(&self, thread: ThreadId, frame_id: FrameId, start_line: u32, end_line: u32) -> TetherResult<Vec<CallTarget>>
    {
        let top = self.controller.suspended_frame(thread)?;
        let frame = top
            .find(frame_id)
            .ok_or(TetherError::UnknownFrame { thread, frame: frame_id })?;
        let code = frame.code.as_ref().ok_or(TetherError::NoCodeObject(frame_id))?;
        Ok(smart_step::resolve(code, start_line, end_line, frame.instruction_offset))
    }

    /// Tear down after the client is gone: release every suspended thread
    /// for good and forget all breakpoints.
    pub fn shutdown(&self)
    {
        let released = self.controller.release_all();
        self.registry.clear();
        info!(released, "debugger engine shut down");
    }
}

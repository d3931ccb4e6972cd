//! The concurrent breakpoint registry.
//!
//! ## Locking
//!
//! One `parking_lot::RwLock` guards the tables. Target threads take the read
//! lock only long enough to clone the matching `Arc<LineBreakpoint>` out;
//! conditions run after the guard is dropped, so a slow condition never holds
//! up the session adding or removing breakpoints. Hit counters and the inert
//! flag are atomics on the breakpoint itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{Breakpoint, BreakpointId, ExceptionBreakpoint, ExceptionFlags, ExceptionPhase, HitCondition, LineBreakpoint, LineBreakpointRequest};
use crate::error::{EvalError, TetherResult};
use crate::port::{Deadline, Evaluator, FrameView};
use crate::types::{ExceptionInfo, Frame, SourceLocation, Value};

/// Outcome of [`BreakpointRegistry::match_line`].
#[derive(Debug, Clone)]
pub enum MatchResult
{
    /// No armed breakpoint applies.
    NoMatch,
    /// Suspend for this breakpoint.
    Hit(Arc<LineBreakpoint>),
    /// A logpoint fired; emit `message` and keep running.
    LogAndContinue
    {
        /// The logpoint.
        breakpoint: BreakpointId,
        /// Rendered log expression.
        message: String,
    },
}

impl MatchResult
{
    /// Whether this is a [`MatchResult::Hit`].
    #[must_use]
    pub const fn is_hit(&self) -> bool
    {
        matches!(self, Self::Hit(_))
    }
}

/// A condition or log expression that failed and disabled its breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionFailure
{
    /// The breakpoint that is now inert.
    pub breakpoint: BreakpointId,
    /// Its location.
    pub location: SourceLocation,
    /// The failing expression.
    pub expression: String,
    /// What went wrong.
    pub error: EvalError,
}

/// Evaluation environment for one line event.
///
/// The frame is captured lazily, on the first expression that needs it, and
/// reused for the rest of the event.
pub struct EvalContext<'a>
{
    view: &'a dyn FrameView,
    evaluator: &'a dyn Evaluator,
    budget: Duration,
    frame: Option<Frame>,
    failures: Vec<ConditionFailure>,
}

impl<'a> EvalContext<'a>
{
    /// Create a context over `view`, giving each expression `budget`.
    #[must_use]
    pub fn new(view: &'a dyn FrameView, evaluator: &'a dyn Evaluator, budget: Duration) -> Self
    {
        Self {
            view,
            evaluator,
            budget,
            frame: None,
            failures: Vec::new(),
        }
    }

    /// Evaluate `expression` in the frame.
    ///
    /// # Errors
    ///
    /// Returns the evaluator's error, or [`EvalError::DeadlineExceeded`] when
    /// the result arrived after the budget ran out.
    pub fn evaluate(&mut self, expression: &str) -> Result<Value, EvalError>
    {
        let deadline = Deadline::after(self.budget);
        let view = self.view;
        let frame = self.frame.get_or_insert_with(|| view.capture());
        let value = self.evaluator.evaluate(expression, frame, deadline)?;
        deadline.check()?;
        Ok(value)
    }

    /// Failures recorded while matching.
    #[must_use]
    pub fn failures(&self) -> &[ConditionFailure]
    {
        &self.failures
    }

    /// Take the recorded failures.
    pub fn take_failures(&mut self) -> Vec<ConditionFailure>
    {
        std::mem::take(&mut self.failures)
    }

    fn report(&mut self, failure: ConditionFailure)
    {
        self.failures.push(failure);
    }
}

#[derive(Debug, Default)]
struct Tables
{
    lines: HashMap<String, HashMap<u32, Arc<LineBreakpoint>>>,
    exceptions: HashMap<String, ExceptionBreakpoint>,
}

/// Line and exception breakpoints of one session.
#[derive(Debug, Default)]
pub struct BreakpointRegistry
{
    tables: RwLock<Tables>,
    next_id: AtomicU64,
}

impl BreakpointRegistry
{
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    fn allocate_id(&self) -> BreakpointId
    {
        BreakpointId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Arm a line breakpoint, replacing any breakpoint at the same location.
    ///
    /// A replaced breakpoint starts over: fresh id, zero hits, not inert.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::InvalidHitCondition`](crate::error::TetherError::InvalidHitCondition)
    /// when the hit condition does not parse; the registry is unchanged.
    pub fn add_line_breakpoint(&self, request: LineBreakpointRequest) -> TetherResult<BreakpointId>
    {
        let hit_condition = request.hit_condition.as_deref().map(str::parse::<HitCondition>).transpose()?;
        let id = self.allocate_id();
        let location = request.location.clone();
        let breakpoint = Arc::new(LineBreakpoint::new(id, request, hit_condition));

        let replaced = self
            .tables
            .write()
            .lines
            .entry(location.unit().to_string())
            .or_default()
            .insert(location.line(), breakpoint);
        debug!(%location, id = id.raw(), replaced = replaced.is_some(), "line breakpoint added");
        Ok(id)
    }

    /// Disarm the line breakpoint at `location`, returning its id.
    pub fn remove_line_breakpoint(&self, location: &SourceLocation) -> Option<BreakpointId>
    {
        let mut tables = self.tables.write();
        let by_line = tables.lines.get_mut(location.unit())?;
        let removed = by_line.remove(&location.line());
        if by_line.is_empty() {
            tables.lines.remove(location.unit());
        }
        drop(tables);
        if let Some(breakpoint) = &removed {
            debug!(%location, id = breakpoint.id.raw(), "line breakpoint removed");
        }
        removed.map(|breakpoint| breakpoint.id)
    }

    /// The line breakpoint at `location`, if any.
    #[must_use]
    pub fn line_breakpoint(&self, location: &SourceLocation) -> Option<Arc<LineBreakpoint>>
    {
        self.tables.read().lines.get(location.unit())?.get(&location.line()).cloned()
    }

    /// Whether any line breakpoint is armed in `unit`.
    #[must_use]
    pub fn has_line_breakpoints(&self, unit: &str) -> bool
    {
        self.tables.read().lines.contains_key(unit)
    }

    /// Arm an exception breakpoint, replacing one for the same kind.
    pub fn add_exception_breakpoint(&self, kind: impl Into<String>, flags: ExceptionFlags)
    {
        let kind = kind.into();
        debug!(%kind, ?flags, "exception breakpoint added");
        self.tables
            .write()
            .exceptions
            .insert(kind.clone(), ExceptionBreakpoint { kind, flags });
    }

    /// Disarm the exception breakpoint for `kind`; returns whether one existed.
    pub fn remove_exception_breakpoint(&self, kind: &str) -> bool
    {
        let removed = self.tables.write().exceptions.remove(kind).is_some();
        debug!(%kind, removed, "exception breakpoint removed");
        removed
    }

    /// Decide what a line event at `location` means for breakpoints.
    ///
    /// Every structural match increments the hit counter, whatever the
    /// condition says. A condition or log expression that fails makes the
    /// breakpoint inert; the failure is recorded in `ctx` only the first time.
    pub fn match_line(&self, location: &SourceLocation, ctx: &mut EvalContext<'_>) -> MatchResult
    {
        let Some(breakpoint) = self.line_breakpoint(location) else {
            return MatchResult::NoMatch;
        };
        if breakpoint.is_inert() {
            return MatchResult::NoMatch;
        }
        let hits = breakpoint.record_hit();

        if let Some(condition) = &breakpoint.condition {
            match ctx.evaluate(condition) {
                Ok(value) if value.is_truthy() => {}
                Ok(_) => return MatchResult::NoMatch,
                Err(error) => {
                    Self::disable(&breakpoint, condition, error, ctx);
                    return MatchResult::NoMatch;
                }
            }
        }
        if let Some(hit_condition) = &breakpoint.hit_condition {
            if !hit_condition.is_satisfied(hits) {
                return MatchResult::NoMatch;
            }
        }

        if breakpoint.is_logpoint {
            let message = match &breakpoint.log_expression {
                Some(expression) => match ctx.evaluate(expression) {
                    Ok(value) => value.to_string(),
                    Err(error) => {
                        Self::disable(&breakpoint, expression, error, ctx);
                        return MatchResult::NoMatch;
                    }
                },
                None => String::new(),
            };
            return MatchResult::LogAndContinue {
                breakpoint: breakpoint.id,
                message,
            };
        }
        MatchResult::Hit(breakpoint)
    }

    fn disable(breakpoint: &LineBreakpoint, expression: &str, error: EvalError, ctx: &mut EvalContext<'_>)
    {
        if breakpoint.make_inert() {
            warn!(location = %breakpoint.location, id = breakpoint.id.raw(), %error, "breakpoint expression failed, disabling");
            ctx.report(ConditionFailure {
                breakpoint: breakpoint.id,
                location: breakpoint.location.clone(),
                expression: expression.to_string(),
                error,
            });
        }
    }

    /// The exception breakpoint that applies to `exception` at `phase`.
    ///
    /// Among the registered kinds admitted by `phase`, the one appearing
    /// earliest in the exception's lineage (the most specific) wins.
    #[must_use]
    pub fn match_exception(&self, exception: &ExceptionInfo, phase: ExceptionPhase) -> Option<ExceptionBreakpoint>
    {
        let tables = self.tables.read();
        if tables.exceptions.is_empty() {
            return None;
        }
        exception
            .lineage()
            .filter_map(|kind| tables.exceptions.get(kind))
            .find(|breakpoint| breakpoint.flags.admits(phase))
            .cloned()
    }

    /// Line breakpoints ordered by unit, then line.
    #[must_use]
    pub fn line_breakpoints(&self) -> Vec<Arc<LineBreakpoint>>
    {
        let tables = self.tables.read();
        let mut lines: Vec<Arc<LineBreakpoint>> = tables.lines.values().flat_map(HashMap::values).cloned().collect();
        lines.sort_by(|a, b| a.location.cmp(&b.location));
        lines
    }

    /// Exception breakpoints ordered by kind.
    #[must_use]
    pub fn exception_breakpoints(&self) -> Vec<ExceptionBreakpoint>
    {
        let tables = self.tables.read();
        let mut kinds: Vec<ExceptionBreakpoint> = tables.exceptions.values().cloned().collect();
        kinds.sort_by(|a, b| a.kind.cmp(&b.kind));
        kinds
    }

    /// Snapshot of every registered breakpoint, line breakpoints first.
    #[must_use]
    pub fn breakpoints(&self) -> Vec<Breakpoint>
    {
        self.line_breakpoints()
            .into_iter()
            .map(Breakpoint::Line)
            .chain(self.exception_breakpoints().into_iter().map(Breakpoint::Exception))
            .collect()
    }

    /// Remove everything; used when the session ends.
    pub fn clear(&self)
    {
        let mut tables = self.tables.write();
        tables.lines.clear();
        tables.exceptions.clear();
    }
}

//! Breakpoint bookkeeping.
//!
//! Line breakpoints are keyed by [`SourceLocation`]; exception breakpoints by
//! the qualified name of the exception kind. The [`BreakpointRegistry`] is
//! shared by the session (the single writer) and every target thread (the
//! readers), see [`registry`] for the locking rules.

pub mod builder;
pub mod condition;
pub mod registry;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use builder::{LineBreakpointBuilder, LineBreakpointRequest};
pub use condition::{HitComparison, HitCondition};
pub use registry::{BreakpointRegistry, ConditionFailure, EvalContext, MatchResult};

use crate::types::SourceLocation;

/// Unique identifier for a breakpoint managed by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BreakpointId(u64);

impl BreakpointId
{
    /// Create a new identifier from a raw value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self
    {
        Self(value)
    }

    /// Get the raw numeric representation (useful for logging / errors).
    #[must_use]
    pub const fn raw(self) -> u64
    {
        self.0
    }
}

impl fmt::Display for BreakpointId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Threads suspended when a line breakpoint hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SuspendPolicy
{
    /// Only the thread that hit the breakpoint.
    #[default]
    Thread,
    /// Every traced thread.
    All,
}

/// An armed line breakpoint.
///
/// The hit counter and inert flag are atomics so that matching only needs
/// the registry's read lock.
#[derive(Debug)]
pub struct LineBreakpoint
{
    /// Identifier handed back to the client.
    pub id: BreakpointId,
    /// Where the breakpoint is armed.
    pub location: SourceLocation,
    /// Boolean condition.
    pub condition: Option<String>,
    /// Hit-count predicate.
    pub hit_condition: Option<HitCondition>,
    /// Expression a logpoint emits.
    pub log_expression: Option<String>,
    /// Emit instead of suspending.
    pub is_logpoint: bool,
    /// Threads a hit suspends.
    pub suspend_policy: SuspendPolicy,
    hits: AtomicU64,
    inert: AtomicBool,
}

impl LineBreakpoint
{
    pub(crate) fn new(id: BreakpointId, request: LineBreakpointRequest, hit_condition: Option<HitCondition>) -> Self
    {
        Self {
            id,
            location: request.location,
            condition: request.condition,
            hit_condition,
            log_expression: request.log_expression,
            is_logpoint: request.is_logpoint,
            suspend_policy: request.suspend_policy,
            hits: AtomicU64::new(0),
            inert: AtomicBool::new(false),
        }
    }

    /// Number of structural matches so far.
    #[must_use]
    pub fn hit_count(&self) -> u64
    {
        self.hits.load(Ordering::Acquire)
    }

    /// Whether a failed evaluation disabled this breakpoint.
    #[must_use]
    pub fn is_inert(&self) -> bool
    {
        self.inert.load(Ordering::Acquire)
    }

    pub(crate) fn record_hit(&self) -> u64
    {
        self.hits.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Mark inert; returns `true` only for the call that flipped the flag.
    pub(crate) fn make_inert(&self) -> bool
    {
        !self.inert.swap(true, Ordering::AcqRel)
    }
}

/// When an exception breakpoint fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionFlags
{
    /// Fire when the exception is raised, handled or not.
    pub notify_always: bool,
    /// Fire when the exception is about to terminate the thread.
    pub notify_on_terminate: bool,
    /// Fire only in the frame where the exception object was first raised,
    /// not again in every frame it propagates through.
    #[serde(default)]
    pub first_raise_only: bool,
    /// Ignore exceptions raised in library code.
    #[serde(default)]
    pub ignore_libraries: bool,
}

impl ExceptionFlags
{
    /// Whether these flags admit an exception at `phase`.
    #[must_use]
    pub const fn admits(&self, phase: ExceptionPhase) -> bool
    {
        match phase {
            ExceptionPhase::Raised => self.notify_always,
            ExceptionPhase::Unhandled => self.notify_on_terminate,
        }
    }
}

/// Point in an exception's life at which it is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionPhase
{
    /// Raised in (or propagating through) a frame.
    Raised,
    /// Uncaught and about to end the thread.
    Unhandled,
}

/// An exception breakpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionBreakpoint
{
    /// Qualified exception kind.
    pub kind: String,
    /// Firing rules.
    pub flags: ExceptionFlags,
}

/// Any registered breakpoint.
#[derive(Debug, Clone)]
pub enum Breakpoint
{
    /// A line breakpoint or logpoint.
    Line(Arc<LineBreakpoint>),
    /// An exception breakpoint.
    Exception(ExceptionBreakpoint),
}

//! # Breakpoint Builder
//!
//! Builder for line breakpoint requests.
//!
//! The session builds requests from `SET_BREAK` arguments; tests and
//! embedding hosts use the same fluent API directly.

use crate::breakpoints::registry::BreakpointRegistry;
use crate::breakpoints::{BreakpointId, SuspendPolicy};
use crate::error::TetherResult;
use crate::types::SourceLocation;

/// Everything needed to install a line breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineBreakpointRequest
{
    /// Where the breakpoint is armed.
    pub location: SourceLocation,
    /// Boolean condition, evaluated in the frame.
    pub condition: Option<String>,
    /// Unparsed hit condition (`>= 3`, `% 2`, ...).
    pub hit_condition: Option<String>,
    /// Expression whose value a logpoint emits.
    pub log_expression: Option<String>,
    /// Emit instead of suspending.
    pub is_logpoint: bool,
    /// Which threads a hit suspends.
    pub suspend_policy: SuspendPolicy,
}

/// Builder for configuring a line breakpoint before installation.
///
/// ## Example
///
/// ```rust
/// use tether_core::breakpoints::builder::LineBreakpointBuilder;
/// use tether_core::breakpoints::BreakpointRegistry;
///
/// let registry = BreakpointRegistry::new();
/// let id = LineBreakpointBuilder::at("app/jobs.py", 42)
///     .with_condition("retries > 2")
///     .with_hit_condition(">= 3")
///     .install(&registry)?;
/// # let _ = id;
/// # Ok::<(), tether_core::error::TetherError>(())
/// ```
#[derive(Debug, Clone)]
pub struct LineBreakpointBuilder
{
    request: LineBreakpointRequest,
}

/// Treat empty strings from the wire as "not set".
fn non_empty(value: impl Into<String>) -> Option<String>
{
    let value = value.into();
    if value.trim().is_empty() { None } else { Some(value) }
}

impl LineBreakpointBuilder
{
    /// Start a breakpoint at `unit:line`.
    #[must_use]
    pub fn at(unit: impl AsRef<str>, line: u32) -> Self
    {
        Self {
            request: LineBreakpointRequest {
                location: SourceLocation::new(unit, line),
                condition: None,
                hit_condition: None,
                log_expression: None,
                is_logpoint: false,
                suspend_policy: SuspendPolicy::Thread,
            },
        }
    }

    /// Only hit when `condition` is truthy.
    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self
    {
        self.request.condition = non_empty(condition);
        self
    }

    /// Only hit when the hit counter satisfies `hit_condition`.
    #[must_use]
    pub fn with_hit_condition(mut self, hit_condition: impl Into<String>) -> Self
    {
        self.request.hit_condition = non_empty(hit_condition);
        self
    }

    /// Expression emitted by a logpoint.
    #[must_use]
    pub fn with_log_expression(mut self, expression: impl Into<String>) -> Self
    {
        self.request.log_expression = non_empty(expression);
        self
    }

    /// Log and continue instead of suspending.
    #[must_use]
    pub const fn as_logpoint(mut self, is_logpoint: bool) -> Self
    {
        self.request.is_logpoint = is_logpoint;
        self
    }

    /// Choose which threads a hit suspends.
    #[must_use]
    pub const fn with_suspend_policy(mut self, policy: SuspendPolicy) -> Self
    {
        self.request.suspend_policy = policy;
        self
    }

    /// Get the request without installing it.
    #[must_use]
    pub fn build(self) -> LineBreakpointRequest
    {
        self.request
    }

    /// Install into `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::InvalidHitCondition`](crate::error::TetherError::InvalidHitCondition)
    /// when the hit condition does not parse.
    pub fn install(self, registry: &BreakpointRegistry) -> TetherResult<BreakpointId>
    {
        registry.add_line_breakpoint(self.request)
    }
}

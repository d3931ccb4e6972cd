//! # Instrumentation Port
//!
//! Traits a host runtime implements to plug into the debugger.
//!
//! The core never assumes how execution events are produced (trace hooks,
//! sampling, bytecode injection). A host calls
//! [`Dispatcher::on_event`](crate::dispatcher::Dispatcher::on_event) with a
//! [`FrameView`] of the frame the event happened in, and supplies the
//! collaborators below when building the [`Engine`](crate::engine::Engine).

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::EvalError;
use crate::smart_step::CodeObject;
use crate::types::{Frame, SourceLocation, Value};

/// Live view of the frame an execution event happened in.
///
/// Accessors are called on every event and should be cheap. [`capture`] is
/// only called when something needs a snapshot: a suspension or a condition
/// evaluation.
///
/// [`capture`]: FrameView::capture
pub trait FrameView
{
    /// Source unit of the executing code.
    fn unit(&self) -> &str;

    /// Current line.
    fn line(&self) -> u32;

    /// Function name.
    fn function(&self) -> &str;

    /// Offset of the instruction being executed.
    fn instruction_offset(&self) -> Option<u32>
    {
        None
    }

    /// Code object with its instruction stream.
    fn code(&self) -> Option<Arc<CodeObject>>
    {
        None
    }

    /// Snapshot this frame and its callers.
    fn capture(&self) -> Frame;
}

/// Expression evaluation against a captured frame.
pub trait Evaluator: Send + Sync
{
    /// Evaluate `expression` in the scope of `frame`.
    ///
    /// Implementations should check `deadline` periodically; the registry
    /// also treats a result produced after the deadline as a failure.
    ///
    /// # Errors
    ///
    /// Returns an [`EvalError`] when the expression cannot be evaluated.
    fn evaluate(&self, expression: &str, frame: &Frame, deadline: Deadline) -> Result<Value, EvalError>;
}

/// Classifies source units.
pub trait SourceFilter: Send + Sync
{
    /// Library code, skipped by step-into-my-code and by exception breakpoints
    /// that ignore libraries.
    fn is_library(&self, unit: &str) -> bool;

    /// Do-not-trace code: events inside it are ignored and `suspend_all`
    /// leaves threads running it alone.
    fn is_untraced(&self, unit: &str) -> bool;
}

/// Maps a physical frame to the location a framework wants breakpoints
/// matched against (a template line instead of the generated code's line).
pub trait LogicalLocationResolver: Send + Sync
{
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// The logical location of `frame`, or `None` to defer to the next
    /// resolver.
    fn resolve(&self, frame: &dyn FrameView) -> Option<SourceLocation>;
}

/// Point in time by which an evaluation must finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Instant);

impl Deadline
{
    /// Deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self
    {
        Self(Instant::now() + budget)
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn expired(self) -> bool
    {
        Instant::now() >= self.0
    }

    /// Fail with [`EvalError::DeadlineExceeded`] once the deadline has passed.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::DeadlineExceeded`] when expired.
    pub fn check(self) -> Result<(), EvalError>
    {
        if self.expired() {
            Err(EvalError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }
}

/// [`SourceFilter`] driven by path prefixes.
#[derive(Debug, Clone, Default)]
pub struct PrefixFilter
{
    library_roots: Vec<String>,
    untraced_roots: Vec<String>,
}

impl PrefixFilter
{
    /// Create a filter from library and do-not-trace roots.
    #[must_use]
    pub fn new<L, U>(library_roots: L, untraced_roots: U) -> Self
    where
        L: IntoIterator,
        L::Item: AsRef<str>,
        U: IntoIterator,
        U::Item: AsRef<str>,
    {
        let normalize = |root: &str| crate::types::location::normalize_unit(root);
        Self {
            library_roots: library_roots.into_iter().map(|r| normalize(r.as_ref())).collect(),
            untraced_roots: untraced_roots.into_iter().map(|r| normalize(r.as_ref())).collect(),
        }
    }

    fn under(roots: &[String], unit: &str) -> bool
    {
        let unit = crate::types::location::normalize_unit(unit);
        roots.iter().any(|root| unit.starts_with(root.as_str()))
    }
}

impl SourceFilter for PrefixFilter
{
    fn is_library(&self, unit: &str) -> bool
    {
        Self::under(&self.library_roots, unit)
    }

    fn is_untraced(&self, unit: &str) -> bool
    {
        Self::under(&self.untraced_roots, unit)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_prefix_filter()
    {
        let filter = PrefixFilter::new(["/usr/lib/python3/"], ["C:\\tools\\debugger\\"]);
        assert!(filter.is_library("/usr/lib/python3/json/decoder.py"));
        assert!(!filter.is_library("/home/me/app.py"));
        assert!(filter.is_untraced("C:/tools/debugger/hooks.py"));
        assert!(!filter.is_untraced("/usr/lib/python3/json/decoder.py"));
    }

    #[test]
    fn test_deadline()
    {
        assert!(Deadline::after(Duration::from_secs(60)).check().is_ok());
        assert_eq!(Deadline::after(Duration::ZERO).check(), Err(EvalError::DeadlineExceeded));
    }
}

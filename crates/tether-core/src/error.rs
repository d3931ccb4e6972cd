//! # Error Types
//!
//! Error handling for the debugger core.
//!
//! We use `thiserror` to generate the `Error` implementations. Two enums live
//! here: [`TetherError`] for operations requested by the session, and
//! [`EvalError`] for expression evaluation, which the registry isolates per
//! breakpoint instead of propagating.

use thiserror::Error;

use crate::types::{FrameId, ThreadId};

/// Main error type for debugger core operations.
///
/// ## Error Categories
///
/// 1. **Thread errors**: UnknownThread, NotSuspended
/// 2. **Frame errors**: UnknownFrame, NoCodeObject
/// 3. **Breakpoint errors**: InvalidHitCondition
/// 4. **Evaluation errors**: Evaluation
/// 5. **Host errors**: Instrumentation
#[derive(Error, Debug)]
pub enum TetherError
{
    /// No registered thread has this id.
    #[error("Unknown thread: {0}")]
    UnknownThread(ThreadId),

    /// The operation needs the thread to be parked at its suspension gate.
    ///
    /// Frame inspection and expression evaluation only make sense against
    /// the frames captured for the current suspension.
    #[error("Thread {0} is not suspended")]
    NotSuspended(ThreadId),

    /// The frame id does not belong to the thread's current suspension.
    ///
    /// Frame ids are reassigned on every suspension, so an id remembered
    /// from an earlier stop no longer resolves.
    #[error("Unknown frame {frame} in thread {thread}")]
    UnknownFrame
    {
        /// Thread whose frames were searched.
        thread: ThreadId,
        /// Requested frame.
        frame: FrameId,
    },

    /// The host did not expose an instruction stream for this frame.
    #[error("Frame {0} has no code object")]
    NoCodeObject(FrameId),

    /// A hit condition could not be parsed.
    #[error("Invalid hit condition: {0}")]
    InvalidHitCondition(String),

    /// Evaluating a client expression failed.
    #[error("Evaluation failed: {0}")]
    Evaluation(#[from] EvalError),

    /// The instrumentation callback faulted while handling an event.
    ///
    /// The dispatcher never lets this escape into target code; it is logged
    /// and the thread continues unstepped.
    #[error("Instrumentation error: {0}")]
    Instrumentation(String),
}

/// Failure to evaluate a condition, log or client expression.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError
{
    /// The expression does not parse.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// A name is neither a local nor a global of the frame.
    #[error("name '{0}' is not defined")]
    NameNotFound(String),

    /// An operator was applied to operands of the wrong types.
    #[error("type error: {0}")]
    Type(String),

    /// Division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// Integer arithmetic overflowed.
    #[error("integer overflow")]
    Overflow,

    /// Evaluation ran past its deadline.
    #[error("evaluation exceeded its time budget")]
    DeadlineExceeded,

    /// The host evaluator reported an error of its own.
    #[error("{0}")]
    Host(String),
}

/// Convenience type alias for `Result<T, TetherError>`
///
/// ```rust
/// use tether_core::error::TetherResult;
/// fn foo() -> TetherResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type TetherResult<T> = std::result::Result<T, TetherError>;

//! # Commands, Responses and Notifications
//!
//! Typed forms of every message kind, with conversion to and from
//! [`Envelope`]s.
//!
//! ## Commands (client to server)
//!
//! | kind | arguments |
//! |------|-----------|
//! | `VERSION` | `version` |
//! | `LIST_THREADS` | |
//! | `SET_BREAK` | `unit`, `line`, `condition?`, `hitCondition?`, `logExpr?`, `isLogpoint?`, `suspendPolicy?` |
//! | `REMOVE_BREAK` | `unit`, `line` |
//! | `ADD_EXCEPTION_BREAK` | `kind`, `notifyAlways`, `notifyOnTerminate`, `notifyOnFirstRaiseOnly?`, `ignoreLibraries?` |
//! | `REMOVE_EXCEPTION_BREAK` | `kind` |
//! | `STEP_INTO`, `STEP_INTO_MY_CODE`, `STEP_OVER`, `STEP_RETURN` | `threadId` |
//! | `SMART_STEP_INTO` | `threadId`, `targetOffset` |
//! | `GET_SMART_STEP_TARGETS` | `threadId`, `frameId`, `startLine`, `endLine` |
//! | `RESUME`, `PAUSE` | `threadId` (a number, or `"*"` for every thread) |
//! | `GET_FRAME` | `threadId` |
//! | `EVALUATE_EXPRESSION` | `threadId`, `frameId`, `expr` |
//! | `SET_NEXT_STATEMENT`, `RUN_TO_LINE` | `threadId`, `line` |
//! | `EXIT` | |

use serde_json::{json, Value as JsonValue};

use tether_core::breakpoints::{ExceptionFlags, LineBreakpointBuilder, LineBreakpointRequest, SuspendPolicy};
use tether_core::events::DebuggerEvent;
use tether_core::stepping::StepCommand;
use tether_core::types::{FrameId, SourceLocation, ThreadId};

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{Args, Envelope};

/// Wire names of every message kind.
pub mod kinds
{
    pub const VERSION: &str = "VERSION";
    pub const LIST_THREADS: &str = "LIST_THREADS";
    pub const SET_BREAK: &str = "SET_BREAK";
    pub const REMOVE_BREAK: &str = "REMOVE_BREAK";
    pub const ADD_EXCEPTION_BREAK: &str = "ADD_EXCEPTION_BREAK";
    pub const REMOVE_EXCEPTION_BREAK: &str = "REMOVE_EXCEPTION_BREAK";
    pub const STEP_INTO: &str = "STEP_INTO";
    pub const STEP_INTO_MY_CODE: &str = "STEP_INTO_MY_CODE";
    pub const STEP_OVER: &str = "STEP_OVER";
    pub const STEP_RETURN: &str = "STEP_RETURN";
    pub const SMART_STEP_INTO: &str = "SMART_STEP_INTO";
    pub const GET_SMART_STEP_TARGETS: &str = "GET_SMART_STEP_TARGETS";
    pub const RESUME: &str = "RESUME";
    pub const PAUSE: &str = "PAUSE";
    pub const GET_FRAME: &str = "GET_FRAME";
    pub const EVALUATE_EXPRESSION: &str = "EVALUATE_EXPRESSION";
    pub const SET_NEXT_STATEMENT: &str = "SET_NEXT_STATEMENT";
    pub const RUN_TO_LINE: &str = "RUN_TO_LINE";
    pub const EXIT: &str = "EXIT";

    pub const RETURN: &str = "RETURN";
    pub const ERROR: &str = "ERROR";
    pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";

    pub const THREAD_CREATED: &str = "THREAD_CREATED";
    pub const THREAD_KILLED: &str = "THREAD_KILLED";
    pub const THREAD_SUSPENDED: &str = "THREAD_SUSPENDED";
    pub const THREAD_RESUMED: &str = "THREAD_RESUMED";
    pub const BREAKPOINT_CONDITION_ERROR: &str = "BREAKPOINT_CONDITION_ERROR";
    pub const LOG_MESSAGE: &str = "LOG_MESSAGE";
}

/// `threadId` argument of `RESUME` and `PAUSE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadSelector
{
    /// One thread.
    One(ThreadId),
    /// Every thread (`"*"`).
    All,
}

impl ThreadSelector
{
    fn to_json(self) -> JsonValue
    {
        match self {
            Self::One(id) => json!(id.raw()),
            Self::All => json!("*"),
        }
    }
}

/// A decoded client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command
{
    /// Handshake; the client announces its protocol version.
    Version
    {
        /// Client's version string.
        version: String,
    },
    /// List registered threads.
    ListThreads,
    /// Arm a line breakpoint or logpoint.
    SetBreak(LineBreakpointRequest),
    /// Disarm a line breakpoint.
    RemoveBreak(SourceLocation),
    /// Arm an exception breakpoint.
    AddExceptionBreak
    {
        /// Qualified exception kind.
        kind: String,
        /// Firing rules.
        flags: ExceptionFlags,
    },
    /// Disarm an exception breakpoint.
    RemoveExceptionBreak
    {
        /// Qualified exception kind.
        kind: String,
    },
    /// Resume a suspended thread with a step.
    Step
    {
        /// Thread to step.
        thread: ThreadId,
        /// The step.
        step: StepCommand,
    },
    /// List smart-step-into targets between two lines of a frame.
    GetSmartStepTargets
    {
        /// Suspended thread.
        thread: ThreadId,
        /// Frame of its current suspension.
        frame: FrameId,
        /// First line, inclusive.
        start_line: u32,
        /// Last line, inclusive.
        end_line: u32,
    },
    /// Resume with no step.
    Resume(ThreadSelector),
    /// Suspend at the next traced line.
    Pause(ThreadSelector),
    /// Frames of a suspended thread.
    GetFrame(ThreadId),
    /// Evaluate an expression in a frame.
    Evaluate
    {
        /// Suspended thread.
        thread: ThreadId,
        /// Frame of its current suspension.
        frame: FrameId,
        /// The expression.
        expression: String,
    },
    /// Continue execution of the top frame at another line.
    SetNextStatement
    {
        /// Suspended thread.
        thread: ThreadId,
        /// Target line.
        line: u32,
    },
    /// Run to a line of the top frame.
    RunToLine
    {
        /// Suspended thread.
        thread: ThreadId,
        /// Target line.
        line: u32,
    },
    /// End the session.
    Exit,
}

fn thread_id(args: Args<'_>) -> ProtocolResult<ThreadId>
{
    args.u64("threadId").map(ThreadId::from_raw)
}

fn thread_selector(args: Args<'_>) -> ProtocolResult<ThreadSelector>
{
    match args.require("threadId")? {
        JsonValue::String(star) if star == "*" => Ok(ThreadSelector::All),
        JsonValue::Number(number) => number
            .as_u64()
            .map(|raw| ThreadSelector::One(ThreadId::from_raw(raw)))
            .ok_or_else(|| ProtocolError::InvalidArgument {
                name: "threadId",
                reason: format!("{number} is not a thread id"),
            }),
        other => Err(ProtocolError::InvalidArgument {
            name: "threadId",
            reason: format!("expected a thread id or \"*\", found {other}"),
        }),
    }
}

fn suspend_policy(args: Args<'_>) -> ProtocolResult<SuspendPolicy>
{
    match args.opt_str("suspendPolicy")? {
        None => Ok(SuspendPolicy::Thread),
        Some(policy) if policy.eq_ignore_ascii_case("THREAD") => Ok(SuspendPolicy::Thread),
        Some(policy) if policy.eq_ignore_ascii_case("ALL") => Ok(SuspendPolicy::All),
        Some(other) => Err(ProtocolError::InvalidArgument {
            name: "suspendPolicy",
            reason: format!("expected THREAD or ALL, found {other}"),
        }),
    }
}

fn step(args: Args<'_>, step: StepCommand) -> ProtocolResult<Command>
{
    Ok(Command::Step {
        thread: thread_id(args)?,
        step,
    })
}

impl Command
{
    /// Decode a command envelope.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnknownCommand`] for an unknown kind, or an argument
    /// error.
    pub fn decode(envelope: &Envelope) -> ProtocolResult<Self>
    {
        let args = envelope.args();
        match envelope.kind.as_str() {
            kinds::VERSION => Ok(Self::Version {
                version: args.str("version")?.to_string(),
            }),
            kinds::LIST_THREADS => Ok(Self::ListThreads),
            kinds::SET_BREAK => {
                let mut builder = LineBreakpointBuilder::at(args.str("unit")?, args.u32("line")?)
                    .as_logpoint(args.bool_or("isLogpoint", false)?)
                    .with_suspend_policy(suspend_policy(args)?);
                if let Some(condition) = args.opt_str("condition")? {
                    builder = builder.with_condition(condition);
                }
                if let Some(hit_condition) = args.opt_str("hitCondition")? {
                    builder = builder.with_hit_condition(hit_condition);
                }
                if let Some(expression) = args.opt_str("logExpr")? {
                    builder = builder.with_log_expression(expression);
                }
                Ok(Self::SetBreak(builder.build()))
            }
            kinds::REMOVE_BREAK => Ok(Self::RemoveBreak(SourceLocation::new(args.str("unit")?, args.u32("line")?))),
            kinds::ADD_EXCEPTION_BREAK => Ok(Self::AddExceptionBreak {
                kind: args.str("kind")?.to_string(),
                flags: ExceptionFlags {
                    notify_always: args.bool_or("notifyAlways", false)?,
                    notify_on_terminate: args.bool_or("notifyOnTerminate", false)?,
                    first_raise_only: args.bool_or("notifyOnFirstRaiseOnly", false)?,
                    ignore_libraries: args.bool_or("ignoreLibraries", false)?,
                },
            }),
            kinds::REMOVE_EXCEPTION_BREAK => Ok(Self::RemoveExceptionBreak {
                kind: args.str("kind")?.to_string(),
            }),
            kinds::STEP_INTO => step(args, StepCommand::Into),
            kinds::STEP_INTO_MY_CODE => step(args, StepCommand::IntoMyCodeOnly),
            kinds::STEP_OVER => step(args, StepCommand::Over),
            kinds::STEP_RETURN => step(args, StepCommand::Return),
            kinds::SMART_STEP_INTO => step(args, StepCommand::SmartInto {
                target_offset: args.u32("targetOffset")?,
            }),
            kinds::GET_SMART_STEP_TARGETS => Ok(Self::GetSmartStepTargets {
                thread: thread_id(args)?,
                frame: FrameId::from_raw(args.u64("frameId")?),
                start_line: args.u32("startLine")?,
                end_line: args.u32("endLine")?,
            }),
            kinds::RESUME => Ok(Self::Resume(thread_selector(args)?)),
            kinds::PAUSE => Ok(Self::Pause(thread_selector(args)?)),
            kinds::GET_FRAME => Ok(Self::GetFrame(thread_id(args)?)),
            kinds::EVALUATE_EXPRESSION => Ok(Self::Evaluate {
                thread: thread_id(args)?,
                frame: FrameId::from_raw(args.u64("frameId")?),
                expression: args.str("expr")?.to_string(),
            }),
            kinds::SET_NEXT_STATEMENT => Ok(Self::SetNextStatement {
                thread: thread_id(args)?,
                line: args.u32("line")?,
            }),
            kinds::RUN_TO_LINE => Ok(Self::RunToLine {
                thread: thread_id(args)?,
                line: args.u32("line")?,
            }),
            kinds::EXIT => Ok(Self::Exit),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }

    /// Wire kind of this command.
    #[must_use]
    pub const fn kind(&self) -> &'static str
    {
        match self {
            Self::Version { .. } => kinds::VERSION,
            Self::ListThreads => kinds::LIST_THREADS,
            Self::SetBreak(_) => kinds::SET_BREAK,
            Self::RemoveBreak(_) => kinds::REMOVE_BREAK,
            Self::AddExceptionBreak { .. } => kinds::ADD_EXCEPTION_BREAK,
            Self::RemoveExceptionBreak { .. } => kinds::REMOVE_EXCEPTION_BREAK,
            Self::Step { step, .. } => match step {
                StepCommand::Into | StepCommand::None => kinds::STEP_INTO,
                StepCommand::IntoMyCodeOnly => kinds::STEP_INTO_MY_CODE,
                StepCommand::Over => kinds::STEP_OVER,
                StepCommand::Return => kinds::STEP_RETURN,
                StepCommand::SmartInto { .. } => kinds::SMART_STEP_INTO,
            },
            Self::GetSmartStepTargets { .. } => kinds::GET_SMART_STEP_TARGETS,
            Self::Resume(_) => kinds::RESUME,
            Self::Pause(_) => kinds::PAUSE,
            Self::GetFrame(_) => kinds::GET_FRAME,
            Self::Evaluate { .. } => kinds::EVALUATE_EXPRESSION,
            Self::SetNextStatement { .. } => kinds::SET_NEXT_STATEMENT,
            Self::RunToLine { .. } => kinds::RUN_TO_LINE,
            Self::Exit => kinds::EXIT,
        }
    }

    /// Encode as a request envelope with sequence id `seq`.
    #[must_use]
    pub fn to_envelope(&self, seq: u64) -> Envelope
    {
        let envelope = Envelope::new(seq, self.kind());
        match self {
            Self::Version { version } => envelope.with_arg("version", version.as_str()),
            Self::ListThreads | Self::Exit => envelope,
            Self::SetBreak(request) => envelope
                .with_arg("unit", request.location.unit())
                .with_arg("line", request.location.line())
                .with_opt_arg("condition", request.condition.as_deref())
                .with_opt_arg("hitCondition", request.hit_condition.as_deref())
                .with_opt_arg("logExpr", request.log_expression.as_deref())
                .with_arg("isLogpoint", request.is_logpoint)
                .with_arg(
                    "suspendPolicy",
                    match request.suspend_policy {
                        SuspendPolicy::Thread => "THREAD",
                        SuspendPolicy::All => "ALL",
                    },
                ),
            Self::RemoveBreak(location) => envelope.with_arg("unit", location.unit()).with_arg("line", location.line()),
            Self::AddExceptionBreak { kind, flags } => envelope
                .with_arg("kind", kind.as_str())
                .with_arg("notifyAlways", flags.notify_always)
                .with_arg("notifyOnTerminate", flags.notify_on_terminate)
                .with_arg("notifyOnFirstRaiseOnly", flags.first_raise_only)
                .with_arg("ignoreLibraries", flags.ignore_libraries),
            Self::RemoveExceptionBreak { kind } => envelope.with_arg("kind", kind.as_str()),
            Self::Step { thread, step } => {
                let envelope = envelope.with_arg("threadId", thread.raw());
                match step {
                    StepCommand::SmartInto { target_offset } => envelope.with_arg("targetOffset", *target_offset),
                    _ => envelope,
                }
            }
            Self::GetSmartStepTargets {
                thread,
                frame,
                start_line,
                end_line,
            } => envelope
                .with_arg("threadId", thread.raw())
                .with_arg("frameId", frame.raw())
                .with_arg("startLine", *start_line)
                .with_arg("endLine", *end_line),
            Self::Resume(selector) | Self::Pause(selector) => envelope.with_arg("threadId", selector.to_json()),
            Self::GetFrame(thread) => envelope.with_arg("threadId", thread.raw()),
            Self::Evaluate { thread, frame, expression } => envelope
                .with_arg("threadId", thread.raw())
                .with_arg("frameId", frame.raw())
                .with_arg("expr", expression.as_str()),
            Self::SetNextStatement { thread, line } | Self::RunToLine { thread, line } => {
                envelope.with_arg("threadId", thread.raw()).with_arg("line", *line)
            }
        }
    }
}

/// Answer to one command.
#[derive(Debug, Clone, PartialEq)]
pub enum Response
{
    /// Success, with a result payload.
    Return(JsonValue),
    /// The command was understood but failed.
    Error(String),
    /// The command could not be decoded.
    ProtocolError(String),
}

impl Response
{
    /// Encode as the answer to request `seq`.
    #[must_use]
    pub fn into_envelope(self, seq: u64) -> Envelope
    {
        match self {
            Self::Return(payload) => Envelope::new(seq, kinds::RETURN).with_arg("payload", payload),
            Self::Error(message) => Envelope::new(seq, kinds::ERROR).with_arg("message", message),
            Self::ProtocolError(message) => Envelope::new(seq, kinds::PROTOCOL_ERROR).with_arg("message", message),
        }
    }

    /// Whether `kind` names a response rather than a notification.
    #[must_use]
    pub fn is_response_kind(kind: &str) -> bool
    {
        matches!(kind, kinds::RETURN | kinds::ERROR | kinds::PROTOCOL_ERROR)
    }
}

/// Build the notification for an engine event.
///
/// # Errors
///
/// Returns a `serde_json` error when the captured frames cannot be
/// serialized.
pub fn notification(event: &DebuggerEvent, seq: u64) -> Result<Envelope, serde_json::Error>
{
    let envelope = match event {
        DebuggerEvent::ThreadCreated { thread, name } => Envelope::new(seq, kinds::THREAD_CREATED)
            .with_arg("threadId", thread.raw())
            .with_arg("name", name.as_str()),
        DebuggerEvent::ThreadKilled { thread } => Envelope::new(seq, kinds::THREAD_KILLED).with_arg("threadId", thread.raw()),
        DebuggerEvent::ThreadSuspended {
            thread,
            reason,
            frame,
            exception,
        } => Envelope::new(seq, kinds::THREAD_SUSPENDED)
            .with_arg("threadId", thread.raw())
            .with_arg("reason", reason.as_str())
            .with_arg("frames", serde_json::to_value(frame.chain().collect::<Vec<_>>())?)
            .with_opt_arg("exception", exception.as_ref().map(serde_json::to_value).transpose()?),
        DebuggerEvent::ThreadResumed { thread, step } => Envelope::new(seq, kinds::THREAD_RESUMED)
            .with_arg("threadId", thread.raw())
            .with_arg("step", step.as_str()),
        DebuggerEvent::ConditionFailed(failure) => Envelope::new(seq, kinds::BREAKPOINT_CONDITION_ERROR)
            .with_arg("unit", failure.location.unit())
            .with_arg("line", failure.location.line())
            .with_arg("breakpointId", failure.breakpoint.raw())
            .with_arg("message", format!("{}: {}", failure.expression, failure.error)),
        DebuggerEvent::LogMessage {
            thread,
            location,
            message,
            ..
        } => Envelope::new(seq, kinds::LOG_MESSAGE)
            .with_arg("threadId", thread.raw())
            .with_arg("unit", location.unit())
            .with_arg("line", location.line())
            .with_arg("message", message.as_str()),
    };
    Ok(envelope)
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn decode(raw: &str) -> ProtocolResult<Command>
    {
        Command::decode(&Envelope::decode(raw.as_bytes()).unwrap())
    }

    #[test]
    fn test_decode_set_break()
    {
        let command = decode(
            r#"{"seq":1,"kind":"SET_BREAK","args":{"unit":"app.py","line":12,"condition":"x > 1","hitCondition":">= 2","suspendPolicy":"ALL"}}"#,
        )
        .unwrap();
        let Command::SetBreak(request) = command else {
            panic!("not a SET_BREAK: {command:?}");
        };
        assert_eq!(request.location, SourceLocation::new("app.py", 12));
        assert_eq!(request.condition.as_deref(), Some("x > 1"));
        assert_eq!(request.hit_condition.as_deref(), Some(">= 2"));
        assert_eq!(request.suspend_policy, SuspendPolicy::All);
        assert!(!request.is_logpoint);
    }

    #[test]
    fn test_decode_thread_selector()
    {
        assert_eq!(
            decode(r#"{"seq":1,"kind":"RESUME","args":{"threadId":"*"}}"#).unwrap(),
            Command::Resume(ThreadSelector::All)
        );
        assert_eq!(
            decode(r#"{"seq":1,"kind":"PAUSE","args":{"threadId":4}}"#).unwrap(),
            Command::Pause(ThreadSelector::One(ThreadId::from_raw(4)))
        );
        assert!(matches!(
            decode(r#"{"seq":1,"kind":"PAUSE","args":{"threadId":"main"}}"#),
            Err(ProtocolError::InvalidArgument { name: "threadId", .. })
        ));
    }

    #[test]
    fn test_decode_errors()
    {
        assert_eq!(
            decode(r#"{"seq":1,"kind":"FROB","args":{}}"#),
            Err(ProtocolError::UnknownCommand("FROB".to_string()))
        );
        assert_eq!(
            decode(r#"{"seq":1,"kind":"STEP_OVER","args":{}}"#),
            Err(ProtocolError::MissingArgument("threadId"))
        );
        assert!(matches!(
            decode(r#"{"seq":1,"kind":"SET_BREAK","args":{"unit":"a.py","line":-3}}"#),
            Err(ProtocolError::InvalidArgument { name: "line", .. })
        ));
        assert!(matches!(
            decode(r#"{"seq":1,"kind":"SET_BREAK","args":{"unit":"a.py","line":3,"suspendPolicy":"SOME"}}"#),
            Err(ProtocolError::InvalidArgument { name: "suspendPolicy", .. })
        ));
    }

    #[test]
    fn test_client_encoding_decodes_to_same_command()
    {
        let commands = [
            Command::SetBreak(
                LineBreakpointBuilder::at("app.py", 3)
                    .as_logpoint(true)
                    .with_log_expression("x")
                    .build(),
            ),
            Command::Step {
                thread: ThreadId::from_raw(2),
                step: StepCommand::SmartInto { target_offset: 14 },
            },
            Command::Evaluate {
                thread: ThreadId::from_raw(2),
                frame: FrameId::from_raw(5),
                expression: "a + b".to_string(),
            },
            Command::Resume(ThreadSelector::All),
        ];
        for command in commands {
            let envelope = command.to_envelope(9);
            assert_eq!(Command::decode(&envelope).unwrap(), command);
        }
    }

    #[test]
    fn test_response_envelopes()
    {
        let envelope = Response::Error("Unknown thread: 3".to_string()).into_envelope(5);
        assert_eq!(envelope.seq, 5);
        assert_eq!(envelope.kind, kinds::ERROR);
        assert!(Response::is_response_kind(&envelope.kind));
        assert!(!Response::is_response_kind(kinds::THREAD_SUSPENDED));
    }
}

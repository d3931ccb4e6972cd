//! # Trace Replay
//!
//! Plays a recorded execution trace through the dispatcher as if a traced
//! runtime were producing it, one OS thread per recorded thread.
//!
//! ## Script format
//!
//! ```json
//! {
//!   "codes": { "main": { "name": "main", "unit": "app.py", "firstLine": 1, "instructions": [] } },
//!   "threads": [
//!     { "id": 1, "name": "MainThread", "events": [
//!       { "event": "call", "unit": "app.py", "function": "main", "line": 1, "code": "main" },
//!       { "event": "line", "line": 2, "locals": { "x": 1 } },
//!       { "event": "exception", "exception": { "id": 7, "typeName": "ValueError" } },
//!       { "event": "return" }
//!     ] }
//!   ]
//! }
//! ```
//!
//! Locals and globals are plain JSON; objects and arrays become opaque
//! `dict` / `list` values. A resume that jumps to another line moves the
//! cursor to that line's next recording in the same frame.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{fs, io};

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use tether_core::breakpoints::ExceptionPhase;
use tether_core::dispatcher::{Dispatcher, ExecutionEvent, Flow, ThreadTrace};
use tether_core::port::FrameView;
use tether_core::smart_step::CodeObject;
use tether_core::types::{ExceptionInfo, Frame, ThreadId, Value};
use tether_utils::{debug, info, warn};

/// A recorded program run.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Script
{
    /// Code objects by name, referenced from `call` events.
    #[serde(default)]
    pub codes: BTreeMap<String, CodeObject>,
    /// Recorded threads.
    pub threads: Vec<ThreadScript>,
}

/// Events recorded on one thread.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ThreadScript
{
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    pub events: Vec<ScriptEvent>,
}

/// One recorded trace event.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ScriptEvent
{
    /// A new frame is entered.
    Call
    {
        unit: String,
        function: String,
        line: u32,
        #[serde(default)]
        code: Option<String>,
        #[serde(default, rename = "callSite")]
        call_site: Option<u32>,
        #[serde(default)]
        locals: Map<String, JsonValue>,
        #[serde(default)]
        globals: Map<String, JsonValue>,
    },
    /// The innermost frame reaches a new line.
    Line
    {
        line: u32,
        #[serde(default)]
        offset: Option<u32>,
        #[serde(default)]
        locals: Map<String, JsonValue>,
    },
    /// The innermost frame returns.
    Return,
    /// An exception is raised in, or escapes, the innermost frame.
    Exception
    {
        exception: ExceptionInfo,
        #[serde(default)]
        unhandled: bool,
    },
}

/// Problems loading a script.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError
{
    /// The file could not be read
    #[error("Cannot read script {}: {source}", .path.display())]
    Read
    {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file is not a valid script
    #[error("Invalid script: {0}")]
    Parse(#[from] serde_json::Error),

    /// Two threads share an id
    #[error("Thread id {0} appears more than once")]
    DuplicateThread(u64),

    /// A call names a code object the script does not define
    #[error("Thread {thread} calls unknown code object {code:?}")]
    UnknownCode
    {
        thread: u64,
        code: String,
    },
}

impl Script
{
    /// Read and check a script file.
    ///
    /// ## Errors
    ///
    /// Returns a [`ReplayError`] when the file is unreadable or inconsistent.
    pub fn load(path: &Path) -> Result<Self, ReplayError>
    {
        let text = fs::read_to_string(path).map_err(|source| ReplayError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse and check script text.
    ///
    /// ## Errors
    ///
    /// Returns a [`ReplayError`] when the text is malformed or inconsistent.
    pub fn parse(text: &str) -> Result<Self, ReplayError>
    {
        let script: Self = serde_json::from_str(text)?;
        script.check()?;
        Ok(script)
    }

    fn check(&self) -> Result<(), ReplayError>
    {
        let mut seen = HashSet::new();
        for thread in &self.threads {
            if !seen.insert(thread.id) {
                return Err(ReplayError::DuplicateThread(thread.id));
            }
            for event in &thread.events {
                if let ScriptEvent::Call { code: Some(code), .. } = event {
                    if !self.codes.contains_key(code) {
                        return Err(ReplayError::UnknownCode {
                            thread: thread.id,
                            code: code.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Code objects shared between threads.
    #[must_use]
    pub fn shared_codes(&self) -> Arc<BTreeMap<String, Arc<CodeObject>>>
    {
        Arc::new(
            self.codes
                .iter()
                .map(|(name, code)| (name.clone(), Arc::new(code.clone())))
                .collect(),
        )
    }
}

/// Map a JSON value onto a frame variable.
#[must_use]
pub fn json_to_value(json: &JsonValue) -> Value
{
    match json {
        JsonValue::Null => Value::None,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(s) => Value::Str(s.clone()),
        JsonValue::Array(items) => Value::Object {
            type_name: "list".to_string(),
            repr: json.to_string(),
            truthy: Some(!items.is_empty()),
        },
        JsonValue::Object(fields) => Value::Object {
            type_name: "dict".to_string(),
            repr: json.to_string(),
            truthy: Some(!fields.is_empty()),
        },
    }
}

fn merge(into: &mut BTreeMap<String, Value>, from: &Map<String, JsonValue>)
{
    for (name, value) in from {
        into.insert(name.clone(), json_to_value(value));
    }
}

#[derive(Debug, Clone)]
struct ReplayFrame
{
    unit: String,
    function: String,
    line: u32,
    offset: Option<u32>,
    code: Option<Arc<CodeObject>>,
    locals: BTreeMap<String, Value>,
    globals: BTreeMap<String, Value>,
    /// Index of the `call` event that opened this frame.
    opened_at: usize,
}

/// The innermost replayed frame with its callers, outermost first.
struct StackView<'a>
{
    top: &'a ReplayFrame,
    callers: &'a [ReplayFrame],
}

impl<'a> StackView<'a>
{
    fn of(stack: &'a [ReplayFrame]) -> Option<Self>
    {
        stack.split_last().map(|(top, callers)| Self { top, callers })
    }
}

impl FrameView for StackView<'_>
{
    fn unit(&self) -> &str
    {
        &self.top.unit
    }

    fn line(&self) -> u32
    {
        self.top.line
    }

    fn function(&self) -> &str
    {
        &self.top.function
    }

    fn instruction_offset(&self) -> Option<u32>
    {
        self.top.offset
    }

    fn code(&self) -> Option<Arc<CodeObject>>
    {
        self.top.code.clone()
    }

    fn capture(&self) -> Frame
    {
        self.callers
            .iter()
            .chain(std::iter::once(self.top))
            .fold(None, |parent: Option<Frame>, replayed| {
                let mut frame = Frame::new(&replayed.unit, replayed.line, &replayed.function);
                frame.instruction_offset = replayed.offset;
                frame.locals = replayed.locals.clone();
                frame.globals = replayed.globals.clone();
                frame.code = replayed.code.clone();
                Some(match parent {
                    Some(parent) => frame.with_parent(parent),
                    None => frame,
                })
            })
            .unwrap_or_default()
    }
}

/// What a replayed thread did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats
{
    /// Events handed to the dispatcher.
    pub dispatched: usize,
    /// Resumes that moved execution to another line.
    pub jumps: usize,
    /// Events dropped because the stack was empty.
    pub skipped: usize,
}

/// Replays one recorded thread.
pub struct ThreadPlayer
{
    dispatcher: Arc<Dispatcher>,
    trace: ThreadTrace,
    codes: Arc<BTreeMap<String, Arc<CodeObject>>>,
    events: Vec<ScriptEvent>,
    stack: Vec<ReplayFrame>,
    stats: ReplayStats,
}

impl ThreadPlayer
{
    /// Register the thread with the dispatcher. The thread is visible to the
    /// client from here on, before any event is replayed.
    #[must_use]
    pub fn attach(dispatcher: Arc<Dispatcher>, script: ThreadScript, codes: Arc<BTreeMap<String, Arc<CodeObject>>>) -> Self
    {
        let name = script.name.unwrap_or_else(|| format!("Thread-{}", script.id));
        let trace = dispatcher.attach_thread(ThreadId::from_raw(script.id), name);
        Self {
            dispatcher,
            trace,
            codes,
            events: script.events,
            stack: Vec::new(),
            stats: ReplayStats::default(),
        }
    }

    /// The registered thread.
    #[must_use]
    pub fn id(&self) -> ThreadId
    {
        self.trace.id()
    }

    /// Replay every event, then unwind what is left of the stack and detach.
    pub fn run(mut self) -> ReplayStats
    {
        let mut cursor = 0;
        while cursor < self.events.len() {
            cursor = self.step(cursor) + 1;
        }
        while !self.stack.is_empty() {
            self.dispatch(&ExecutionEvent::Return);
            self.stack.pop();
        }

        let Self {
            dispatcher, trace, stats, ..
        } = self;
        info!(
            thread = %trace.id(),
            dispatched = stats.dispatched,
            jumps = stats.jumps,
            "replay finished"
        );
        dispatcher.detach_thread(trace);
        stats
    }

    /// Replay the event at `cursor`; returns the index replay continued from.
    fn step(&mut self, cursor: usize) -> usize
    {
        match self.events[cursor].clone() {
            ScriptEvent::Call {
                unit,
                function,
                line,
                code,
                call_site,
                locals,
                globals,
            } => {
                if let (Some(caller), Some(site)) = (self.stack.last_mut(), call_site) {
                    caller.offset = Some(site);
                }
                let mut frame = ReplayFrame {
                    unit,
                    function,
                    line,
                    offset: None,
                    code: code.and_then(|name| self.codes.get(&name).cloned()),
                    locals: BTreeMap::new(),
                    globals: BTreeMap::new(),
                    opened_at: cursor,
                };
                merge(&mut frame.locals, &locals);
                merge(&mut frame.globals, &globals);
                self.stack.push(frame);
                let flow = self.dispatch(&ExecutionEvent::Call { call_site });
                self.follow(flow, cursor)
            }
            ScriptEvent::Line { line, offset, locals } => {
                let Some(top) = self.stack.last_mut() else {
                    return self.skip(cursor);
                };
                top.line = line;
                top.offset = offset;
                merge(&mut top.locals, &locals);
                let flow = self.dispatch(&ExecutionEvent::Line);
                self.follow(flow, cursor)
            }
            ScriptEvent::Return => {
                if self.stack.is_empty() {
                    return self.skip(cursor);
                }
                if let Flow::JumpTo(line) = self.dispatch(&ExecutionEvent::Return) {
                    warn!(thread = %self.id(), line, "cannot jump out of a returning frame");
                }
                self.stack.pop();
                cursor
            }
            ScriptEvent::Exception { exception, unhandled } => {
                if self.stack.is_empty() {
                    return self.skip(cursor);
                }
                let phase = if unhandled {
                    ExceptionPhase::Unhandled
                } else {
                    ExceptionPhase::Raised
                };
                let flow = self.dispatch(&ExecutionEvent::Exception {
                    exception: &exception,
                    phase,
                });
                self.follow(flow, cursor)
            }
        }
    }

    fn dispatch(&mut self, event: &ExecutionEvent<'_>) -> Flow
    {
        let Some(view) = StackView::of(&self.stack) else {
            return Flow::Continue;
        };
        self.stats.dispatched += 1;
        self.dispatcher.on_event(&mut self.trace, *event, &view)
    }

    fn skip(&mut self, cursor: usize) -> usize
    {
        warn!(thread = %self.id(), index = cursor, "event outside any frame, skipped");
        self.stats.skipped += 1;
        cursor
    }

    /// Apply the dispatcher's verdict for the event at `cursor`.
    fn follow(&mut self, flow: Flow, cursor: usize) -> usize
    {
        let Flow::JumpTo(line) = flow else {
            return cursor;
        };
        let Some(opened_at) = self.stack.last().map(|frame| frame.opened_at) else {
            return cursor;
        };
        match find_line(&self.events, opened_at, cursor, line) {
            Some(target) => {
                debug!(thread = %self.id(), line, from = cursor, to = target, "jumping");
                if let (Some(top), ScriptEvent::Line { offset, .. }) = (self.stack.last_mut(), &self.events[target]) {
                    top.line = line;
                    top.offset = *offset;
                }
                self.stats.jumps += 1;
                target
            }
            None => {
                warn!(thread = %self.id(), line, "line never runs again in this frame; continuing");
                cursor
            }
        }
    }
}

/// Index of the next `line` event for `line` in the frame opened at
/// `opened_at`, searching forward from `cursor` and then from the frame's
/// start. Events of nested frames are skipped.
fn find_line(events: &[ScriptEvent], opened_at: usize, cursor: usize, line: u32) -> Option<usize>
{
    let scan = |from: usize| {
        let mut nested = 0_usize;
        for (index, event) in events.iter().enumerate().skip(from) {
            match event {
                ScriptEvent::Call { .. } => nested += 1,
                ScriptEvent::Return if nested == 0 => return None,
                ScriptEvent::Return => nested -= 1,
                ScriptEvent::Line { line: recorded, .. } if nested == 0 && *recorded == line => return Some(index),
                _ => {}
            }
        }
        None
    };

    scan(cursor + 1).or_else(|| scan(opened_at + 1))
}

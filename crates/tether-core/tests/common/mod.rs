//! Scripted host shared by the integration tests.
//!
//! A [`ScriptedThread`] owns a simulated call stack and feeds the dispatcher
//! the same call, line, return and exception events a tracing runtime would.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tether_core::breakpoints::ExceptionPhase;
use tether_core::dispatcher::{Dispatcher, ExecutionEvent, Flow, ThreadTrace};
use tether_core::events::{DebuggerEvent, DebuggerEventReceiver};
use tether_core::port::FrameView;
use tether_core::smart_step::CodeObject;
use tether_core::types::{ExceptionInfo, Frame, RunState, ThreadId, Value};
use tether_core::{Engine, EngineBuilder};

pub const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ScriptedFrame
{
    pub unit: String,
    pub function: String,
    pub line: u32,
    pub locals: BTreeMap<String, Value>,
    pub code: Option<Arc<CodeObject>>,
    pub offset: Option<u32>,
}

/// The innermost frame of a scripted stack, with its callers behind it.
pub struct StackView<'a>(pub &'a [ScriptedFrame]);

impl StackView<'_>
{
    fn top(&self) -> &ScriptedFrame
    {
        self.0.last().expect("event on an empty stack")
    }
}

impl FrameView for StackView<'_>
{
    fn unit(&self) -> &str
    {
        &self.top().unit
    }

    fn line(&self) -> u32
    {
        self.top().line
    }

    fn function(&self) -> &str
    {
        &self.top().function
    }

    fn instruction_offset(&self) -> Option<u32>
    {
        self.top().offset
    }

    fn code(&self) -> Option<Arc<CodeObject>>
    {
        self.top().code.clone()
    }

    fn capture(&self) -> Frame
    {
        let mut captured: Option<Frame> = None;
        for scripted in self.0 {
            let mut frame = Frame::new(&scripted.unit, scripted.line, &scripted.function);
            frame.locals = scripted.locals.clone();
            frame.code = scripted.code.clone();
            frame.instruction_offset = scripted.offset;
            if let Some(parent) = captured.take() {
                frame = frame.with_parent(parent);
            }
            captured = Some(frame);
        }
        captured.unwrap_or_default()
    }
}

/// A target thread driven by hand.
pub struct ScriptedThread
{
    dispatcher: Arc<Dispatcher>,
    trace: ThreadTrace,
    stack: Vec<ScriptedFrame>,
    pub flows: Vec<Flow>,
}

impl ScriptedThread
{
    pub fn attach(engine: &Engine, id: u64) -> Self
    {
        let dispatcher = Arc::clone(engine.dispatcher());
        let trace = dispatcher.attach_thread(ThreadId::from_raw(id), format!("Thread-{id}"));
        Self {
            dispatcher,
            trace,
            stack: Vec::new(),
            flows: Vec::new(),
        }
    }

    pub fn id(&self) -> ThreadId
    {
        self.trace.id()
    }

    pub fn trace(&self) -> &ThreadTrace
    {
        &self.trace
    }

    fn dispatch(&mut self, event: ExecutionEvent<'_>) -> Flow
    {
        let view = StackView(&self.stack);
        let flow = self.dispatcher.on_event(&mut self.trace, event, &view);
        self.flows.push(flow);
        flow
    }

    pub fn call(&mut self, unit: &str, function: &str, line: u32) -> Flow
    {
        self.enter(None, unit, function, line)
    }

    pub fn call_from(&mut self, call_site: u32, unit: &str, function: &str, line: u32) -> Flow
    {
        if let Some(caller) = self.stack.last_mut() {
            caller.offset = Some(call_site);
        }
        self.enter(Some(call_site), unit, function, line)
    }

    fn enter(&mut self, call_site: Option<u32>, unit: &str, function: &str, line: u32) -> Flow
    {
        self.stack.push(ScriptedFrame {
            unit: unit.to_string(),
            function: function.to_string(),
            line,
            locals: BTreeMap::new(),
            code: None,
            offset: None,
        });
        self.dispatch(ExecutionEvent::Call { call_site })
    }

    pub fn with_code(&mut self, code: CodeObject, offset: u32)
    {
        let top = self.stack.last_mut().expect("no frame");
        top.code = Some(Arc::new(code));
        top.offset = Some(offset);
    }

    pub fn local(&mut self, name: &str, value: impl Into<Value>)
    {
        let top = self.stack.last_mut().expect("no frame");
        top.locals.insert(name.to_string(), value.into());
    }

    pub fn line(&mut self, line: u32) -> Flow
    {
        self.stack.last_mut().expect("no frame").line = line;
        self.dispatch(ExecutionEvent::Line)
    }

    pub fn ret(&mut self) -> Flow
    {
        let flow = self.dispatch(ExecutionEvent::Return);
        self.stack.pop();
        flow
    }

    pub fn raise(&mut self, exception: &ExceptionInfo) -> Flow
    {
        self.dispatch(ExecutionEvent::Exception { exception, phase: ExceptionPhase::Raised })
    }

    pub fn unhandled(&mut self, exception: &ExceptionInfo) -> Flow
    {
        self.dispatch(ExecutionEvent::Exception { exception, phase: ExceptionPhase::Unhandled })
    }

    pub fn detach(self) -> Vec<Flow>
    {
        let Self { dispatcher, trace, flows, .. } = self;
        dispatcher.detach_thread(trace);
        flows
    }
}

pub fn engine() -> (Engine, DebuggerEventReceiver)
{
    EngineBuilder::new().build()
}

/// Run `script` on its own OS thread, the way a target thread would.
pub fn spawn<F>(mut thread: ScriptedThread, script: F) -> JoinHandle<Vec<Flow>>
where
    F: FnOnce(&mut ScriptedThread) + Send + 'static,
{
    std::thread::spawn(move || {
        script(&mut thread);
        thread.detach()
    })
}

pub fn wait_suspended(engine: &Engine, id: ThreadId) -> bool
{
    engine.controller().wait_for_state(id, RunState::Suspended, TIMEOUT)
}

/// Receive events until one satisfies `matches`.
pub fn expect_event<P>(events: &DebuggerEventReceiver, mut matches: P) -> DebuggerEvent
where
    P: FnMut(&DebuggerEvent) -> bool,
{
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(event) if matches(&event) => return event,
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => panic!("expected event never arrived"),
        }
    }
}

/// Events already queued, without waiting.
pub fn drain(events: &DebuggerEventReceiver) -> Vec<DebuggerEvent>
{
    events.try_iter().collect()
}

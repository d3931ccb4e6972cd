//! Line breakpoints and logpoints driven through the dispatcher

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{drain, engine, expect_event, spawn, wait_suspended, ScriptedThread};
use tether_core::breakpoints::{ExceptionFlags, LineBreakpointBuilder};
use tether_core::dispatcher::Flow;
use tether_core::error::EvalError;
use tether_core::events::DebuggerEvent;
use tether_core::port::{Deadline, Evaluator, FrameView, LogicalLocationResolver, PrefixFilter};
use tether_core::suspension::ResumeRequest;
use tether_core::types::{Frame, SourceLocation, StopReason, Value};
use tether_core::EngineBuilder;

#[test]
fn test_no_breakpoints_never_suspends()
{
    let (engine, _events) = engine();
    let mut thread = ScriptedThread::attach(&engine, 1);
    thread.call("app/main.py", "main", 1);
    for line in 2..20 {
        assert_eq!(thread.line(line), Flow::Continue);
    }
    thread.ret();
    assert!(thread.detach().iter().all(|flow| *flow == Flow::Continue));
}

#[test]
fn test_breakpoint_suspends_and_resumes()
{
    let (engine, events) = engine();
    LineBreakpointBuilder::at("app/main.py", 3).install(engine.registry()).unwrap();

    let thread = ScriptedThread::attach(&engine, 1);
    let id = thread.id();
    let handle = spawn(thread, |t| {
        t.call("app/main.py", "main", 1);
        t.local("x", 7_i64);
        t.line(2);
        t.line(3);
        t.line(4);
        t.ret();
    });

    assert!(wait_suspended(&engine, id));
    let snapshot = engine.controller().snapshot(id).unwrap();
    assert_eq!(snapshot.stop_reason, Some(StopReason::LineBreakpoint));

    let frame = engine.controller().suspended_frame(id).unwrap();
    assert_eq!(frame.line, 3);
    assert_eq!(frame.function, "main");
    assert_eq!(frame.lookup("x"), Some(&Value::Int(7)));

    let suspended = expect_event(&events, |event| matches!(event, DebuggerEvent::ThreadSuspended { .. }));
    assert!(suspended.describe().contains("app/main.py:3"));

    engine.controller().resume(id, ResumeRequest::run()).unwrap();
    handle.join().unwrap();
    assert!(engine.controller().snapshot(id).is_none());
}

#[test]
fn test_condition_gates_the_hit()
{
    let (engine, _events) = engine();
    LineBreakpointBuilder::at("app/loop.py", 5)
        .with_condition("i == 3")
        .install(engine.registry())
        .unwrap();

    let thread = ScriptedThread::attach(&engine, 1);
    let id = thread.id();
    let handle = spawn(thread, |t| {
        t.call("app/loop.py", "run", 1);
        for i in 0..5_i64 {
            t.local("i", i);
            t.line(5);
        }
        t.ret();
    });

    assert!(wait_suspended(&engine, id));
    let frame = engine.controller().suspended_frame(id).unwrap();
    assert_eq!(frame.lookup("i"), Some(&Value::Int(3)));
    engine.controller().resume(id, ResumeRequest::run()).unwrap();
    handle.join().unwrap();

    let breakpoint = engine.registry().line_breakpoint(&SourceLocation::new("app/loop.py", 5)).unwrap();
    assert_eq!(breakpoint.hit_count(), 5);
}

#[test]
fn test_hit_condition_counts_structural_matches()
{
    let (engine, _events) = engine();
    LineBreakpointBuilder::at("app/loop.py", 5)
        .with_condition("i % 2 == 0")
        .with_hit_condition("== 4")
        .install(engine.registry())
        .unwrap();

    let thread = ScriptedThread::attach(&engine, 1);
    let id = thread.id();
    let handle = spawn(thread, |t| {
        t.call("app/loop.py", "run", 1);
        for i in 0..6_i64 {
            t.local("i", i);
            t.line(5);
        }
        t.ret();
    });

    // The counter reaches 4 on the pass where i == 3, which fails the condition.
    let flows = handle.join().unwrap();
    assert!(flows.iter().all(|flow| *flow == Flow::Continue));
    assert!(engine.controller().snapshot(id).is_none());
}

#[test]
fn test_logpoint_emits_and_continues()
{
    let (engine, events) = engine();
    LineBreakpointBuilder::at("app/main.py", 2)
        .as_logpoint(true)
        .with_log_expression("total * 2")
        .install(engine.registry())
        .unwrap();

    let mut thread = ScriptedThread::attach(&engine, 1);
    thread.call("app/main.py", "main", 1);
    thread.local("total", 21_i64);
    assert_eq!(thread.line(2), Flow::Continue);
    thread.ret();
    thread.detach();

    let logged = expect_event(&events, |event| matches!(event, DebuggerEvent::LogMessage { .. }));
    let DebuggerEvent::LogMessage { message, location, .. } = logged else {
        unreachable!();
    };
    assert_eq!(message, "42");
    assert_eq!(location, SourceLocation::new("app/main.py", 2));
}

#[test]
fn test_broken_condition_reported_once_then_inert()
{
    let (engine, events) = engine();
    LineBreakpointBuilder::at("app/main.py", 2)
        .with_condition("missing > 1")
        .install(engine.registry())
        .unwrap();

    let mut thread = ScriptedThread::attach(&engine, 1);
    thread.call("app/main.py", "main", 1);
    for _ in 0..3 {
        assert_eq!(thread.line(2), Flow::Continue);
    }
    thread.ret();
    thread.detach();

    let failures: Vec<_> = drain(&events)
        .into_iter()
        .filter_map(|event| match event {
            DebuggerEvent::ConditionFailed(failure) => Some(failure),
            _ => None,
        })
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].expression, "missing > 1");
    assert_eq!(failures[0].error, EvalError::NameNotFound("missing".to_string()));

    let breakpoint = engine.registry().line_breakpoint(&SourceLocation::new("app/main.py", 2)).unwrap();
    assert!(breakpoint.is_inert());
    assert_eq!(breakpoint.hit_count(), 1);
}

#[test]
fn test_replacing_breakpoint_rearms_it()
{
    let (engine, _events) = engine();
    let registry = engine.registry();
    let location = SourceLocation::new("app/main.py", 2);
    let first = LineBreakpointBuilder::at("app/main.py", 2).with_condition("nope").install(registry).unwrap();

    let mut thread = ScriptedThread::attach(&engine, 1);
    thread.call("app/main.py", "main", 1);
    thread.line(2);
    assert!(registry.line_breakpoint(&location).unwrap().is_inert());

    let second = LineBreakpointBuilder::at("app/main.py", 2).install(registry).unwrap();
    assert_ne!(first, second);
    assert!(!registry.line_breakpoint(&location).unwrap().is_inert());
    assert_eq!(registry.remove_line_breakpoint(&location), Some(second));
    assert_eq!(registry.remove_line_breakpoint(&location), None);
    thread.ret();
    thread.detach();
}

struct PanickingEvaluator;

impl Evaluator for PanickingEvaluator
{
    fn evaluate(&self, _expression: &str, _frame: &Frame, _deadline: Deadline) -> Result<Value, EvalError>
    {
        panic!("evaluator bug");
    }
}

#[test]
fn test_fault_in_callback_does_not_reach_target()
{
    let (engine, _events) = EngineBuilder::new().with_evaluator(Arc::new(PanickingEvaluator)).build();
    LineBreakpointBuilder::at("app/main.py", 2)
        .with_condition("x")
        .install(engine.registry())
        .unwrap();

    let mut thread = ScriptedThread::attach(&engine, 1);
    thread.call("app/main.py", "main", 1);
    assert_eq!(thread.line(2), Flow::Continue);
    assert_eq!(thread.line(3), Flow::Continue);
    thread.ret();
    thread.detach();
}

struct SlowEvaluator;

impl Evaluator for SlowEvaluator
{
    fn evaluate(&self, _expression: &str, _frame: &Frame, _deadline: Deadline) -> Result<Value, EvalError>
    {
        std::thread::sleep(Duration::from_millis(50));
        Ok(Value::Bool(true))
    }
}

#[test]
fn test_condition_past_budget_is_a_failure()
{
    let (engine, events) = EngineBuilder::new()
        .with_evaluator(Arc::new(SlowEvaluator))
        .with_condition_budget(Duration::from_millis(5))
        .build();
    LineBreakpointBuilder::at("app/main.py", 2)
        .with_condition("True")
        .install(engine.registry())
        .unwrap();

    let mut thread = ScriptedThread::attach(&engine, 1);
    thread.call("app/main.py", "main", 1);
    assert_eq!(thread.line(2), Flow::Continue);
    thread.ret();
    thread.detach();

    let failed = expect_event(&events, |event| matches!(event, DebuggerEvent::ConditionFailed(_)));
    let DebuggerEvent::ConditionFailed(failure) = failed else {
        unreachable!();
    };
    assert_eq!(failure.error, EvalError::DeadlineExceeded);
}

/// Maps generated template code back to template lines.
struct TemplateResolver;

impl LogicalLocationResolver for TemplateResolver
{
    fn name(&self) -> &str
    {
        "template"
    }

    fn resolve(&self, frame: &dyn FrameView) -> Option<SourceLocation>
    {
        let template = frame.unit().strip_suffix(".compiled.py")?;
        Some(SourceLocation::new(template, frame.line().saturating_sub(100)))
    }
}

#[test]
fn test_logical_location_resolver_drives_matching()
{
    let (engine, _events) = EngineBuilder::new().with_resolver(Arc::new(TemplateResolver)).build();
    LineBreakpointBuilder::at("templates/page.html", 4).install(engine.registry()).unwrap();

    let thread = ScriptedThread::attach(&engine, 1);
    let id = thread.id();
    let handle = spawn(thread, |t| {
        t.call("templates/page.html.compiled.py", "render", 101);
        t.line(103);
        t.line(104);
        t.ret();
    });

    assert!(wait_suspended(&engine, id));
    let frame = engine.controller().suspended_frame(id).unwrap();
    assert_eq!(frame.line, 104);
    engine.controller().resume(id, ResumeRequest::run()).unwrap();
    handle.join().unwrap();
}

#[test]
fn test_untraced_code_ignores_breakpoints()
{
    let filter = PrefixFilter::new(Vec::<String>::new(), vec!["debugger/".to_string()]);
    let (engine, _events) = EngineBuilder::new().with_source_filter(Arc::new(filter)).build();
    LineBreakpointBuilder::at("debugger/agent.py", 2).install(engine.registry()).unwrap();

    let mut thread = ScriptedThread::attach(&engine, 1);
    thread.call("app/main.py", "main", 1);
    thread.call("debugger/agent.py", "poll", 1);
    assert!(thread.trace().is_untraced());
    assert!(engine.controller().snapshot(thread.id()).unwrap().untraced);
    assert_eq!(thread.line(2), Flow::Continue);
    thread.ret();
    assert!(!thread.trace().is_untraced());
    thread.ret();
    thread.detach();
}

#[test]
fn test_add_then_remove_is_like_never_adding()
{
    let (engine, events) = engine();
    let registry = engine.registry();
    LineBreakpointBuilder::at("app/main.py", 3).install(registry).unwrap();
    LineBreakpointBuilder::at("app/main.py", 5)
        .as_logpoint(true)
        .with_log_expression("x")
        .install(registry)
        .unwrap();
    assert!(registry.remove_line_breakpoint(&SourceLocation::new("app/main.py", 3)).is_some());
    assert!(registry.remove_line_breakpoint(&SourceLocation::new("app/main.py", 5)).is_some());
    assert!(registry.remove_line_breakpoint(&SourceLocation::new("app/main.py", 5)).is_none());

    let mut thread = ScriptedThread::attach(&engine, 1);
    thread.call("app/main.py", "main", 1);
    thread.local("x", 1_i64);
    for line in 2..8 {
        assert_eq!(thread.line(line), Flow::Continue);
    }
    thread.ret();
    thread.detach();

    assert!(drain(&events)
        .iter()
        .all(|event| !matches!(event, DebuggerEvent::LogMessage { .. } | DebuggerEvent::ThreadSuspended { .. })));
}

#[test]
fn test_listing_is_ordered()
{
    let (engine, _events) = engine();
    let registry = engine.registry();
    LineBreakpointBuilder::at("b.py", 1).install(registry).unwrap();
    LineBreakpointBuilder::at("a.py", 9).install(registry).unwrap();
    LineBreakpointBuilder::at("a.py", 2).install(registry).unwrap();
    let flags = ExceptionFlags {
        notify_always: true,
        notify_on_terminate: false,
        first_raise_only: false,
        ignore_libraries: false,
    };
    registry.add_exception_breakpoint("ValueError", flags);
    registry.add_exception_breakpoint("KeyError", flags);

    let lines: Vec<String> = registry.line_breakpoints().iter().map(|bp| bp.location.to_string()).collect();
    assert_eq!(lines, vec!["a.py:2", "a.py:9", "b.py:1"]);
    let kinds: Vec<String> = registry.exception_breakpoints().into_iter().map(|bp| bp.kind).collect();
    assert_eq!(kinds, vec!["KeyError", "ValueError"]);
    assert_eq!(registry.breakpoints().len(), 5);

    registry.clear();
    assert!(registry.breakpoints().is_empty());
}

//! Step commands driven through the dispatcher

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::{engine, spawn, wait_suspended, ScriptedFrame, ScriptedThread, StackView};
use tether_core::breakpoints::LineBreakpointBuilder;
use tether_core::dispatcher::{ExecutionEvent, Flow};
use tether_core::port::PrefixFilter;
use tether_core::smart_step::{CodeObject, Instruction};
use tether_core::stepping::StepCommand;
use tether_core::suspension::ResumeRequest;
use tether_core::types::{StopReason, ThreadId};
use tether_core::{Engine, EngineBuilder};

const UNIT: &str = "app/calc.py";

/// f (line 10) calls g, which calls h; f continues on line 11.
fn nested_calls(t: &mut ScriptedThread)
{
    t.call(UNIT, "f", 9);
    t.line(10);
    t.call(UNIT, "g", 20);
    t.line(21);
    t.call(UNIT, "h", 30);
    t.line(31);
    t.ret();
    t.line(22);
    t.ret();
    t.line(11);
    t.ret();
}

fn stopped_at(engine: &Engine, id: ThreadId) -> (String, u32, Option<StopReason>)
{
    assert!(wait_suspended(engine, id), "thread never suspended");
    let frame = engine.controller().suspended_frame(id).unwrap();
    let reason = engine.controller().snapshot(id).unwrap().stop_reason;
    (frame.function.clone(), frame.line, reason)
}

#[test]
fn test_step_over_skips_nested_calls()
{
    let (engine, _events) = engine();
    LineBreakpointBuilder::at(UNIT, 10).install(engine.registry()).unwrap();
    let thread = ScriptedThread::attach(&engine, 1);
    let id = thread.id();
    let handle = spawn(thread, nested_calls);

    assert_eq!(stopped_at(&engine, id), ("f".to_string(), 10, Some(StopReason::LineBreakpoint)));
    engine.controller().resume(id, ResumeRequest::step(StepCommand::Over)).unwrap();
    assert_eq!(stopped_at(&engine, id), ("f".to_string(), 11, Some(StopReason::StepComplete)));
    engine.controller().resume(id, ResumeRequest::run()).unwrap();
    handle.join().unwrap();
}

#[test]
fn test_step_into_enters_callee()
{
    let (engine, _events) = engine();
    LineBreakpointBuilder::at(UNIT, 10).install(engine.registry()).unwrap();
    let thread = ScriptedThread::attach(&engine, 1);
    let id = thread.id();
    let handle = spawn(thread, nested_calls);

    stopped_at(&engine, id);
    engine.controller().resume(id, ResumeRequest::step(StepCommand::Into)).unwrap();
    assert_eq!(stopped_at(&engine, id), ("g".to_string(), 21, Some(StopReason::StepComplete)));
    engine.controller().resume(id, ResumeRequest::step(StepCommand::Into)).unwrap();
    assert_eq!(stopped_at(&engine, id).0, "h");
    engine.controller().resume(id, ResumeRequest::run()).unwrap();
    handle.join().unwrap();
}

#[test]
fn test_step_return_stops_at_return_then_over_reaches_caller()
{
    let (engine, _events) = engine();
    LineBreakpointBuilder::at(UNIT, 21).install(engine.registry()).unwrap();
    let thread = ScriptedThread::attach(&engine, 1);
    let id = thread.id();
    let handle = spawn(thread, nested_calls);

    assert_eq!(stopped_at(&engine, id).0, "g");
    engine.controller().resume(id, ResumeRequest::step(StepCommand::Return)).unwrap();
    assert_eq!(stopped_at(&engine, id), ("g".to_string(), 22, Some(StopReason::StepComplete)));
    engine.controller().resume(id, ResumeRequest::step(StepCommand::Over)).unwrap();
    assert_eq!(stopped_at(&engine, id), ("f".to_string(), 11, Some(StopReason::StepComplete)));
    engine.controller().resume(id, ResumeRequest::run()).unwrap();
    handle.join().unwrap();
}

#[test]
fn test_step_set_before_a_call_starts_in_the_callee()
{
    let (engine, _events) = engine();
    let mut thread = ScriptedThread::attach(&engine, 1);
    let id = thread.id();
    thread.call(UNIT, "f", 9);
    thread.line(10);

    engine.controller().resume(id, ResumeRequest::step(StepCommand::Over)).unwrap();
    let handle = spawn(thread, |t| {
        t.call(UNIT, "g", 20);
        t.line(21);
        t.ret();
        t.line(11);
        t.ret();
    });

    assert_eq!(stopped_at(&engine, id), ("g".to_string(), 21, Some(StopReason::StepComplete)));
    engine.controller().resume(id, ResumeRequest::run()).unwrap();
    handle.join().unwrap();
}

#[test]
fn test_breakpoint_wins_over_step()
{
    let (engine, _events) = engine();
    LineBreakpointBuilder::at(UNIT, 10).install(engine.registry()).unwrap();
    LineBreakpointBuilder::at(UNIT, 31).install(engine.registry()).unwrap();
    let thread = ScriptedThread::attach(&engine, 1);
    let id = thread.id();
    let handle = spawn(thread, nested_calls);

    stopped_at(&engine, id);
    engine.controller().resume(id, ResumeRequest::step(StepCommand::Over)).unwrap();
    assert_eq!(stopped_at(&engine, id), ("h".to_string(), 31, Some(StopReason::LineBreakpoint)));
    // The breakpoint ended the step: running on does not stop on line 11.
    engine.controller().resume(id, ResumeRequest::run()).unwrap();
    let flows = handle.join().unwrap();
    assert!(flows.iter().all(|flow| *flow == Flow::Continue));
}

#[test]
fn test_smart_step_into_chosen_call()
{
    let (engine, _events) = engine();
    LineBreakpointBuilder::at(UNIT, 10).install(engine.registry()).unwrap();
    let thread = ScriptedThread::attach(&engine, 1);
    let id = thread.id();
    let handle = spawn(thread, |t| {
        t.call(UNIT, "f", 9);
        // a() + b()
        t.with_code(
            CodeObject::new(
                "f",
                UNIT,
                9,
                vec![
                    Instruction::new(0, "LOAD_GLOBAL").with_argval("a").starts_line(10),
                    Instruction::new(2, "CALL_FUNCTION").with_arg(0),
                    Instruction::new(4, "LOAD_GLOBAL").with_argval("b"),
                    Instruction::new(6, "CALL_FUNCTION").with_arg(0),
                    Instruction::new(8, "BINARY_ADD"),
                    Instruction::new(10, "RETURN_VALUE").starts_line(11),
                ],
            ),
            0,
        );
        t.line(10);
        t.call_from(2, UNIT, "a", 40);
        t.line(41);
        t.ret();
        t.call_from(6, UNIT, "b", 50);
        t.line(51);
        t.ret();
        t.line(11);
        t.ret();
    });

    stopped_at(&engine, id);
    let frame = engine.controller().suspended_frame(id).unwrap();
    let targets = engine.smart_step_targets(id, frame.id, 10, 10).unwrap();
    let names: Vec<&str> = targets.iter().map(|target| target.display_name.as_str()).collect();
    assert_eq!(names, vec!["a", "__add__", "b"]);
    assert!(targets.iter().all(|target| !target.already_visited));

    let b = targets.iter().find(|target| target.display_name == "b").unwrap();
    engine
        .controller()
        .resume(id, ResumeRequest::step(StepCommand::SmartInto { target_offset: b.offset }))
        .unwrap();
    assert_eq!(stopped_at(&engine, id), ("b".to_string(), 51, Some(StopReason::StepComplete)));
    engine.controller().resume(id, ResumeRequest::run()).unwrap();
    handle.join().unwrap();
}

#[test]
fn test_smart_step_targets_need_code()
{
    let (engine, _events) = engine();
    LineBreakpointBuilder::at(UNIT, 10).install(engine.registry()).unwrap();
    let thread = ScriptedThread::attach(&engine, 1);
    let id = thread.id();
    let handle = spawn(thread, nested_calls);

    stopped_at(&engine, id);
    let frame = engine.controller().suspended_frame(id).unwrap();
    let err = engine.smart_step_targets(id, frame.id, 10, 10).unwrap_err();
    assert!(err.to_string().contains("no code object"));
    engine.controller().resume(id, ResumeRequest::run()).unwrap();
    handle.join().unwrap();
}

#[test]
fn test_step_into_my_code_skips_libraries()
{
    let filter = PrefixFilter::new(["lib/"], Vec::<String>::new());
    let (engine, _events) = EngineBuilder::new().with_source_filter(Arc::new(filter)).build();
    LineBreakpointBuilder::at(UNIT, 10).install(engine.registry()).unwrap();
    let thread = ScriptedThread::attach(&engine, 1);
    let id = thread.id();
    let handle = spawn(thread, |t| {
        t.call(UNIT, "f", 9);
        t.line(10);
        t.call("lib/json/encoder.py", "encode", 100);
        t.line(101);
        t.line(102);
        t.ret();
        t.line(11);
        t.ret();
    });

    stopped_at(&engine, id);
    engine.controller().resume(id, ResumeRequest::step(StepCommand::IntoMyCodeOnly)).unwrap();
    assert_eq!(stopped_at(&engine, id), ("f".to_string(), 11, Some(StopReason::StepComplete)));
    engine.controller().resume(id, ResumeRequest::run()).unwrap();
    handle.join().unwrap();
}

#[test]
fn test_jump_moves_execution_and_suspends_there()
{
    let (engine, _events) = engine();
    LineBreakpointBuilder::at(UNIT, 10).install(engine.registry()).unwrap();
    let thread = ScriptedThread::attach(&engine, 1);
    let id = thread.id();
    let handle = spawn(thread, |t| {
        t.call(UNIT, "f", 9);
        if let Flow::JumpTo(line) = t.line(10) {
            t.line(line);
        }
        t.ret();
    });

    stopped_at(&engine, id);
    engine.controller().resume(id, ResumeRequest::jump(14)).unwrap();
    assert_eq!(stopped_at(&engine, id), ("f".to_string(), 14, Some(StopReason::StepComplete)));
    engine.controller().resume(id, ResumeRequest::run()).unwrap();
    let flows = handle.join().unwrap();
    assert!(flows.contains(&Flow::JumpTo(14)));
}

#[test]
fn test_unbalanced_return_is_swallowed()
{
    let (engine, _events) = engine();
    let dispatcher = engine.dispatcher();
    let mut trace = dispatcher.attach_thread(ThreadId::from_raw(9), "stray");
    let frames = vec![ScriptedFrame {
        unit: UNIT.to_string(),
        function: "orphan".to_string(),
        line: 3,
        locals: BTreeMap::new(),
        code: None,
        offset: None,
    }];

    assert_eq!(dispatcher.on_event(&mut trace, ExecutionEvent::Return, &StackView(&frames)), Flow::Continue);
    assert_eq!(trace.depth(), 0);
    dispatcher.detach_thread(trace);
}

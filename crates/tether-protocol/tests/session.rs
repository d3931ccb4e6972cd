//! Loopback sessions between a RemoteClient and a served Engine

use std::net::TcpListener;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::json;
use tether_core::breakpoints::LineBreakpointBuilder;
use tether_core::dispatcher::ExecutionEvent;
use tether_core::port::FrameView;
use tether_core::stepping::StepCommand;
use tether_core::types::{Frame, FrameId, RunState, ThreadId};
use tether_core::{Engine, EngineBuilder};
use tether_protocol::command::kinds;
use tether_protocol::{Command, RemoteClient, Session, SessionConfig, SessionHandle, ThreadSelector, TransportError};

const TIMEOUT: Duration = Duration::from_secs(5);
const UNIT: &str = "app/work.py";

/// A single frame whose local `n` mirrors the current line.
struct Spot
{
    line: u32,
}

impl FrameView for Spot
{
    fn unit(&self) -> &str
    {
        UNIT
    }

    fn line(&self) -> u32
    {
        self.line
    }

    fn function(&self) -> &str
    {
        "work"
    }

    fn capture(&self) -> Frame
    {
        Frame::new(UNIT, self.line, "work").with_local("n", i64::from(self.line))
    }
}

/// Run `lines` of `work` on a fresh target thread.
fn run_target(engine: &Engine, id: u64, lines: Vec<u32>) -> JoinHandle<()>
{
    let dispatcher = Arc::clone(engine.dispatcher());
    let mut trace = dispatcher.attach_thread(ThreadId::from_raw(id), "worker");
    thread::spawn(move || {
        let mut spot = Spot { line: 1 };
        dispatcher.on_event(&mut trace, ExecutionEvent::Call { call_site: None }, &spot);
        for line in lines {
            spot.line = line;
            dispatcher.on_event(&mut trace, ExecutionEvent::Line, &spot);
        }
        dispatcher.on_event(&mut trace, ExecutionEvent::Return, &spot);
        dispatcher.detach_thread(trace);
    })
}

fn start(config: SessionConfig) -> (Engine, RemoteClient, SessionHandle)
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (engine, events) = EngineBuilder::new().build();
    let client = RemoteClient::connect(addr).unwrap();
    let (stream, _) = listener.accept().unwrap();
    let session = Session::new(engine.clone(), config).serve(stream, events).unwrap();
    (engine, client, session)
}

#[test]
fn test_version_and_thread_listing()
{
    let (engine, mut client, session) = start(SessionConfig::default());
    let version = client
        .call(&Command::Version { version: "test-client".to_string() }, TIMEOUT)
        .unwrap()
        .unwrap();
    assert_eq!(version["version"], "1.0");

    let _trace = engine.dispatcher().attach_thread(ThreadId::from_raw(3), "MainThread");
    let threads = client.call(&Command::ListThreads, TIMEOUT).unwrap().unwrap();
    assert_eq!(threads[0]["id"], 3);
    assert_eq!(threads[0]["name"], "MainThread");
    assert_eq!(threads[0]["runState"], "running");

    let created = client.wait_for(kinds::THREAD_CREATED, TIMEOUT).unwrap();
    assert_eq!(created.args["threadId"], 3);
    assert_eq!(created.seq % 2, 0);

    client.call(&Command::Exit, TIMEOUT).unwrap().unwrap();
    session.join();
}

#[test]
fn test_breakpoint_inspect_step_and_resume()
{
    let (engine, mut client, session) = start(SessionConfig::default());
    let set = client
        .call(&Command::SetBreak(LineBreakpointBuilder::at(UNIT, 3).build()), TIMEOUT)
        .unwrap()
        .unwrap();
    assert!(set["breakpointId"].as_u64().is_some());

    let worker = run_target(&engine, 1, vec![2, 3, 4, 5]);
    let thread = ThreadId::from_raw(1);

    let suspended = client.wait_for(kinds::THREAD_SUSPENDED, TIMEOUT).unwrap();
    assert_eq!(suspended.args["threadId"], 1);
    assert_eq!(suspended.args["reason"], "line_breakpoint");
    assert_eq!(suspended.args["frames"][0]["line"], 3);
    let frame_id = FrameId::from_raw(suspended.args["frames"][0]["id"].as_u64().unwrap());

    let frames = client.call(&Command::GetFrame(thread), TIMEOUT).unwrap().unwrap();
    assert_eq!(frames["frames"][0]["locals"]["n"], json!({ "type": "int", "value": 3 }));
    assert!(frames["exception"].is_null());

    let evaluated = client
        .call(
            &Command::Evaluate {
                thread,
                frame: frame_id,
                expression: "n * 2".to_string(),
            },
            TIMEOUT,
        )
        .unwrap()
        .unwrap();
    assert_eq!(evaluated["repr"], "6");

    client
        .call(&Command::Step { thread, step: StepCommand::Over }, TIMEOUT)
        .unwrap()
        .unwrap();
    let resumed = client.wait_for(kinds::THREAD_RESUMED, TIMEOUT).unwrap();
    assert_eq!(resumed.args["step"], "over");
    let stepped = client.wait_for(kinds::THREAD_SUSPENDED, TIMEOUT).unwrap();
    assert_eq!(stepped.args["reason"], "step_complete");
    assert_eq!(stepped.args["frames"][0]["line"], 4);

    // Frame ids from the first stop no longer resolve.
    let stale = client
        .call(
            &Command::Evaluate {
                thread,
                frame: frame_id,
                expression: "n".to_string(),
            },
            TIMEOUT,
        )
        .unwrap();
    assert!(stale.unwrap_err().starts_with("ERROR"));

    let resumed = client.call(&Command::Resume(ThreadSelector::All), TIMEOUT).unwrap().unwrap();
    assert_eq!(resumed["resumed"], 1);
    worker.join().unwrap();
    let killed = client.wait_for(kinds::THREAD_KILLED, TIMEOUT).unwrap();
    assert_eq!(killed.args["threadId"], 1);

    client.call(&Command::Exit, TIMEOUT).unwrap().unwrap();
    session.join();
}

#[test]
fn test_protocol_errors_keep_session_alive()
{
    let (_engine, mut client, session) = start(SessionConfig { max_frame_len: 256 });

    client.send_raw(b"definitely not json").unwrap();
    let garbage = client.wait_for(kinds::PROTOCOL_ERROR, TIMEOUT).unwrap();
    assert_eq!(garbage.seq, 0);

    client.send_raw(br#"{"seq":41,"kind":"FROB","args":{}}"#).unwrap();
    let unknown = client.wait_for(kinds::PROTOCOL_ERROR, TIMEOUT).unwrap();
    assert_eq!(unknown.seq, 41);
    assert!(unknown.args["message"].as_str().unwrap().contains("FROB"));

    client.send_raw(br#"{"seq":43,"kind":"STEP_OVER","args":{}}"#).unwrap();
    let missing = client.wait_for(kinds::PROTOCOL_ERROR, TIMEOUT).unwrap();
    assert_eq!(missing.seq, 43);
    assert!(missing.args["message"].as_str().unwrap().contains("threadId"));

    client.send_raw(&[b' '; 1000]).unwrap();
    let oversize = client.wait_for(kinds::PROTOCOL_ERROR, TIMEOUT).unwrap();
    assert!(oversize.args["message"].as_str().unwrap().contains("1000"));

    let failed = client.call(&Command::GetFrame(ThreadId::from_raw(77)), TIMEOUT).unwrap();
    assert_eq!(failed.unwrap_err(), "ERROR: Unknown thread: 77");

    assert!(client
        .call(&Command::Version { version: "still-here".to_string() }, TIMEOUT)
        .unwrap()
        .is_ok());
    client.call(&Command::Exit, TIMEOUT).unwrap().unwrap();
    session.join();
}

#[test]
fn test_logpoint_and_condition_error_notifications()
{
    let (engine, mut client, session) = start(SessionConfig::default());
    client
        .call(
            &Command::SetBreak(
                LineBreakpointBuilder::at(UNIT, 2)
                    .as_logpoint(true)
                    .with_log_expression("n + 100")
                    .build(),
            ),
            TIMEOUT,
        )
        .unwrap()
        .unwrap();
    client
        .call(&Command::SetBreak(LineBreakpointBuilder::at(UNIT, 3).with_condition("1 / 0").build()), TIMEOUT)
        .unwrap()
        .unwrap();

    run_target(&engine, 1, vec![2, 3, 3]).join().unwrap();

    let logged = client.wait_for(kinds::LOG_MESSAGE, TIMEOUT).unwrap();
    assert_eq!(logged.args["message"], "102");
    assert_eq!(logged.args["line"], 2);
    let failed = client.wait_for(kinds::BREAKPOINT_CONDITION_ERROR, TIMEOUT).unwrap();
    assert_eq!(failed.args["line"], 3);
    assert!(failed.args["message"].as_str().unwrap().contains("division by zero"));

    client.call(&Command::Exit, TIMEOUT).unwrap().unwrap();
    session.join();
    assert!(client.backlog().all(|envelope| envelope.kind != kinds::BREAKPOINT_CONDITION_ERROR));
}

#[test]
fn test_transport_loss_releases_suspended_threads()
{
    const THREADS: u64 = 4;

    let (engine, mut client, session) = start(SessionConfig::default());
    client
        .call(&Command::SetBreak(LineBreakpointBuilder::at(UNIT, 2).build()), TIMEOUT)
        .unwrap()
        .unwrap();

    let workers: Vec<_> = (1..=THREADS).map(|id| run_target(&engine, id, vec![2, 3])).collect();
    for id in 1..=THREADS {
        assert!(engine
            .controller()
            .wait_for_state(ThreadId::from_raw(id), RunState::Suspended, TIMEOUT));
    }

    drop(client);
    let started = Instant::now();
    for worker in workers {
        worker.join().unwrap();
    }
    assert!(started.elapsed() < TIMEOUT);
    assert!(engine.controller().is_closed());
    assert!(engine.registry().breakpoints().is_empty());
    session.join();
}

#[test]
fn test_exit_closes_connection()
{
    let (_engine, mut client, session) = start(SessionConfig::default());
    let answer = client.request(&Command::Exit, TIMEOUT).unwrap();
    assert_eq!(answer.kind, kinds::RETURN);
    session.join();
    assert!(matches!(client.wait_for(kinds::RETURN, TIMEOUT), Err(TransportError::Closed)));
}

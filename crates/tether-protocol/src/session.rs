//! # Debugger Session
//!
//! Serves one client connection against an [`Engine`].
//!
//! ## Threads
//!
//! - **reader**: blocks on the socket, decodes each frame and handles the
//!   command inline, so commands take effect in wire order
//! - **writer**: drains an mpsc queue of outgoing envelopes
//! - **notifier**: turns engine events into notifications
//!
//! ## Shutdown
//!
//! `EXIT`, end of stream, or any read or write failure ends the session: the
//! engine releases every suspended thread for good and forgets its
//! breakpoints, and the three threads wind down. Queued messages (including
//! the answer to `EXIT`) are written before the socket is closed.

use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::{json, Value as JsonValue};
use tracing::{debug, error, info, warn};

use tether_core::events::DebuggerEventReceiver;
use tether_core::suspension::ResumeRequest;
use tether_core::Engine;

use crate::command::{notification, Command, Response, ThreadSelector};
use crate::error::{CommandError, ProtocolError, TransportError};
use crate::message::{recover_seq, Envelope};
use crate::wire::{FrameReader, FrameWriter, Inbound, DEFAULT_MAX_FRAME_LEN};

/// Version announced in reply to `VERSION`.
pub const PROTOCOL_VERSION: &str = "1.0";

/// How often the notifier checks for shutdown while idle.
const NOTIFIER_POLL: Duration = Duration::from_millis(50);

/// Session settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig
{
    /// Largest accepted request payload.
    pub max_frame_len: usize,
}

impl Default for SessionConfig
{
    fn default() -> Self
    {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Command handling for one client.
#[derive(Debug, Clone)]
pub struct Session
{
    engine: Engine,
    config: SessionConfig,
}

/// A reply and whether the session should end after sending it.
type Reply = (Envelope, bool);

impl Session
{
    /// Session driving `engine`.
    #[must_use]
    pub const fn new(engine: Engine, config: SessionConfig) -> Self
    {
        Self { engine, config }
    }

    /// Carry out one decoded command.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the engine refuses the operation.
    pub fn handle(&self, command: Command) -> Result<JsonValue, CommandError>
    {
        let controller = self.engine.controller();
        let registry = self.engine.registry();
        let payload = match command {
            Command::Version { version } => {
                info!(client = %version, "client connected");
                json!({ "version": PROTOCOL_VERSION, "server": env!("CARGO_PKG_VERSION") })
            }
            Command::ListThreads => serde_json::to_value(controller.threads())?,
            Command::SetBreak(request) => {
                let id = registry.add_line_breakpoint(request)?;
                json!({ "breakpointId": id.raw() })
            }
            Command::RemoveBreak(location) => {
                let removed = registry.remove_line_breakpoint(&location);
                json!({ "breakpointId": removed.map(|id| id.raw()) })
            }
            Command::AddExceptionBreak { kind, flags } => {
                registry.add_exception_breakpoint(kind, flags);
                json!({})
            }
            Command::RemoveExceptionBreak { kind } => json!({ "removed": registry.remove_exception_breakpoint(&kind) }),
            Command::Step { thread, step } => {
                controller.resume(thread, ResumeRequest::step(step))?;
                json!({})
            }
            Command::GetSmartStepTargets {
                thread,
                frame,
                start_line,
                end_line,
            } => serde_json::to_value(self.engine.smart_step_targets(thread, frame, start_line, end_line)?)?,
            Command::Resume(ThreadSelector::One(thread)) => {
                controller.resume(thread, ResumeRequest::run())?;
                json!({ "resumed": 1 })
            }
            Command::Resume(ThreadSelector::All) => json!({ "resumed": controller.resume_all() }),
            Command::Pause(ThreadSelector::One(thread)) => {
                controller.request_pause(thread)?;
                json!({ "paused": 1 })
            }
            Command::Pause(ThreadSelector::All) => json!({ "paused": controller.suspend_all(None) }),
            Command::GetFrame(thread) => {
                let frame = controller.suspended_frame(thread)?;
                let exception = controller.suspended_exception(thread)?;
                json!({
                    "frames": serde_json::to_value(frame.chain().collect::<Vec<_>>())?,
                    "exception": serde_json::to_value(exception)?,
                })
            }
            Command::Evaluate { thread, frame, expression } => {
                let value = self.engine.evaluate(thread, frame, &expression)?;
                json!({ "result": serde_json::to_value(&value)?, "repr": value.repr() })
            }
            Command::SetNextStatement { thread, line } | Command::RunToLine { thread, line } => {
                controller.resume(thread, ResumeRequest::jump(line))?;
                json!({})
            }
            Command::Exit => {
                self.engine.shutdown();
                json!({})
            }
        };
        Ok(payload)
    }

    /// Decode and handle one frame payload.
    #[must_use]
    pub fn reply(&self, payload: &[u8]) -> Reply
    {
        let envelope = match Envelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(err) => return (Self::protocol_error(recover_seq(payload), &err), false),
        };
        let command = match Command::decode(&envelope) {
            Ok(command) => command,
            Err(err) => return (Self::protocol_error(envelope.seq, &err), false),
        };

        debug!(seq = envelope.seq, kind = command.kind(), "handling command");
        let exit = command == Command::Exit;
        let response = match self.handle(command) {
            Ok(payload) => Response::Return(payload),
            Err(err) => {
                debug!(seq = envelope.seq, kind = %envelope.kind, %err, "command failed");
                Response::Error(err.to_string())
            }
        };
        (response.into_envelope(envelope.seq), exit)
    }

    fn protocol_error(seq: u64, err: &ProtocolError) -> Envelope
    {
        warn!(seq, %err, "protocol error");
        Response::ProtocolError(err.to_string()).into_envelope(seq)
    }

    /// Start serving `stream`. Returns once the session threads are running.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] when the socket cannot be cloned or the
    /// threads cannot be spawned.
    pub fn serve(self, stream: TcpStream, events: DebuggerEventReceiver) -> Result<SessionHandle, TransportError>
    {
        let peer = stream.peer_addr().map_or_else(|_| "unknown".to_string(), |addr| addr.to_string());
        info!(%peer, "debugger session started");

        let shutdown = Arc::new(AtomicBool::new(false));
        let (outbound, queue) = mpsc::channel::<Envelope>();

        let write_half = stream.try_clone()?;
        let writer = thread::Builder::new().name("tether-writer".into()).spawn(move || {
            let mut frames = FrameWriter::new(write_half);
            for envelope in queue {
                let result = envelope.encode().and_then(|payload| frames.write_frame(&payload));
                if let Err(err) = result {
                    error!(%err, "write failed, ending session");
                    break;
                }
            }
            // Wakes a reader still blocked on the socket.
            let _ = frames.get_ref().shutdown(Shutdown::Both);
        })?;

        let notifier = {
            let outbound = outbound.clone();
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new().name("tether-notifier".into()).spawn(move || {
                let mut seq = 2;
                while !shutdown.load(Ordering::Acquire) {
                    let event = match events.recv_timeout(NOTIFIER_POLL) {
                        Ok(event) => event,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    };
                    match notification(&event, seq) {
                        Ok(envelope) => {
                            seq += 2;
                            if outbound.send(envelope).is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(%err, event = %event.describe(), "dropping notification"),
                    }
                }
            })?
        };

        let max_frame_len = self.config.max_frame_len;
        let reader = thread::Builder::new().name("tether-reader".into()).spawn(move || {
            let mut frames = FrameReader::new(stream, max_frame_len);
            loop {
                let inbound = match frames.read_frame() {
                    Ok(inbound) => inbound,
                    Err(TransportError::Closed) => {
                        info!("client disconnected");
                        break;
                    }
                    Err(err) => {
                        error!(%err, "transport lost");
                        break;
                    }
                };
                let (reply, exit) = match inbound {
                    Inbound::Frame(payload) => self.reply(&payload),
                    Inbound::Oversize(len) => {
                        let err = ProtocolError::FrameTooLarge { len, max: max_frame_len };
                        (Self::protocol_error(0, &err), false)
                    }
                };
                if outbound.send(reply).is_err() || exit {
                    break;
                }
            }
            self.engine.shutdown();
            shutdown.store(true, Ordering::Release);
            info!("debugger session ended");
        })?;

        Ok(SessionHandle { reader, writer, notifier })
    }
}

/// Running session threads.
#[derive(Debug)]
pub struct SessionHandle
{
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    notifier: JoinHandle<()>,
}

impl SessionHandle
{
    /// Whether the session has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool
    {
        self.reader.is_finished() && self.writer.is_finished() && self.notifier.is_finished()
    }

    /// Wait for the session to end.
    pub fn join(self)
    {
        for (name, handle) in [("reader", self.reader), ("notifier", self.notifier), ("writer", self.writer)] {
            if handle.join().is_err() {
                error!(thread = name, "session thread panicked");
            }
        }
    }
}

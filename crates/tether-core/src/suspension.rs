//! # Thread Suspension Controller
//!
//! Process-wide table of thread states and the suspend/resume primitives.
//!
//! ## Gates
//!
//! Every registered thread owns a slot with its own `parking_lot::Mutex` and
//! `Condvar`. A suspending thread parks on its own condvar while holding only
//! its own slot mutex (released by the wait), so the session can keep
//! changing breakpoints and resuming other threads while it is parked.
//!
//! `run_state == Suspended` holds exactly while the owning thread is inside
//! [`SuspensionController::request_suspend`].
//!
//! ## Requests to running threads
//!
//! Pause requests and step overrides for a running thread are flags on its
//! slot. The thread picks them up at its next traced event through its
//! [`ThreadHandle`]; nothing blocks the requester.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{TetherError, TetherResult};
use crate::events::{DebuggerEvent, DebuggerEventSender};
use crate::stepping::StepCommand;
use crate::types::{ExceptionInfo, Frame, RunState, StopReason, ThreadId, ThreadSnapshot};

/// What a suspended thread should do once released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResumeRequest
{
    /// Step to start from the suspension point.
    pub step: StepCommand,
    /// Line to continue from instead of the current one.
    pub jump_to_line: Option<u32>,
}

impl ResumeRequest
{
    /// Run freely.
    #[must_use]
    pub const fn run() -> Self
    {
        Self {
            step: StepCommand::None,
            jump_to_line: None,
        }
    }

    /// Run with `step` active.
    #[must_use]
    pub const fn step(step: StepCommand) -> Self
    {
        Self { step, jump_to_line: None }
    }

    /// Continue from `line`, stopping again as soon as it runs.
    #[must_use]
    pub const fn jump(line: u32) -> Self
    {
        Self {
            step: StepCommand::Into,
            jump_to_line: Some(line),
        }
    }
}

#[derive(Debug)]
struct SlotState
{
    run_state: RunState,
    stop_reason: Option<StopReason>,
    pending: ResumeRequest,
    frame: Option<Arc<Frame>>,
    exception: Option<ExceptionInfo>,
}

#[derive(Debug)]
struct ThreadSlot
{
    id: ThreadId,
    name: String,
    state: Mutex<SlotState>,
    gate: Condvar,
    pause_requested: AtomicBool,
    step_changed: AtomicBool,
    untraced: AtomicBool,
}

impl ThreadSlot
{
    fn snapshot(&self) -> ThreadSnapshot
    {
        let state = self.state.lock();
        ThreadSnapshot {
            id: self.id,
            name: self.name.clone(),
            run_state: state.run_state,
            stop_reason: state.stop_reason,
            step: state.pending.step,
            untraced: self.untraced.load(Ordering::Acquire),
        }
    }

    /// Flip to running and open the gate. Returns whether it was suspended.
    fn release(&self, request: ResumeRequest) -> bool
    {
        let mut state = self.state.lock();
        let was_suspended = state.run_state == RunState::Suspended;
        state.pending = request;
        state.run_state = RunState::Running;
        state.stop_reason = None;
        state.frame = None;
        state.exception = None;
        self.pause_requested.store(false, Ordering::Release);
        if was_suspended {
            self.gate.notify_all();
        } else {
            self.step_changed.store(true, Ordering::Release);
        }
        was_suspended
    }
}

/// The target thread's own handle on its slot.
///
/// Returned by [`SuspensionController::register_thread`]. Lets the dispatcher
/// poll the slot's flags without touching the thread table.
#[derive(Debug, Clone)]
pub struct ThreadHandle(Arc<ThreadSlot>);

impl ThreadHandle
{
    /// The thread's id.
    #[must_use]
    pub fn id(&self) -> ThreadId
    {
        self.0.id
    }

    /// Consume a pending pause request.
    #[must_use]
    pub fn take_pause_request(&self) -> bool
    {
        self.0.pause_requested.swap(false, Ordering::AcqRel)
    }

    /// Consume a step set by the client while the thread was running.
    #[must_use]
    pub fn take_step_override(&self) -> Option<StepCommand>
    {
        if !self.0.step_changed.swap(false, Ordering::AcqRel) {
            return None;
        }
        Some(std::mem::take(&mut self.0.state.lock().pending.step))
    }

    /// Record whether the thread is inside do-not-trace code.
    pub fn set_untraced(&self, untraced: bool)
    {
        self.0.untraced.store(untraced, Ordering::Release);
    }

    /// Whether the thread is inside do-not-trace code.
    #[must_use]
    pub fn is_untraced(&self) -> bool
    {
        self.0.untraced.load(Ordering::Acquire)
    }
}

/// Table of registered threads and their gates.
#[derive(Debug)]
pub struct SuspensionController
{
    threads: RwLock<HashMap<ThreadId, Arc<ThreadSlot>>>,
    events: DebuggerEventSender,
    closed: AtomicBool,
    changes: Mutex<u64>,
    changed: Condvar,
}

impl SuspensionController
{
    /// Create a controller publishing to `events`.
    #[must_use]
    pub fn new(events: DebuggerEventSender) -> Self
    {
        Self {
            threads: RwLock::new(HashMap::new()),
            events,
            closed: AtomicBool::new(false),
            changes: Mutex::new(0),
            changed: Condvar::new(),
        }
    }

    fn publish(&self, event: DebuggerEvent)
    {
        // The receiver goes away when the session ends; threads keep running.
        let _ = self.events.send(event);
        *self.changes.lock() += 1;
        self.changed.notify_all();
    }

    fn slot(&self, id: ThreadId) -> Option<Arc<ThreadSlot>>
    {
        self.threads.read().get(&id).cloned()
    }

    fn require(&self, id: ThreadId) -> TetherResult<Arc<ThreadSlot>>
    {
        self.slot(id).ok_or(TetherError::UnknownThread(id))
    }

    /// Register a thread. Registering an id twice returns the existing handle.
    pub fn register_thread(&self, id: ThreadId, name: impl Into<String>) -> ThreadHandle
    {
        let name = name.into();
        let mut threads = self.threads.write();
        if let Some(existing) = threads.get(&id) {
            return ThreadHandle(Arc::clone(existing));
        }
        let slot = Arc::new(ThreadSlot {
            id,
            name: name.clone(),
            state: Mutex::new(SlotState {
                run_state: RunState::Running,
                stop_reason: None,
                pending: ResumeRequest::run(),
                frame: None,
                exception: None,
            }),
            gate: Condvar::new(),
            pause_requested: AtomicBool::new(false),
            step_changed: AtomicBool::new(false),
            untraced: AtomicBool::new(false),
        });
        threads.insert(id, Arc::clone(&slot));
        drop(threads);

        info!(thread = id.raw(), %name, "thread registered");
        self.publish(DebuggerEvent::ThreadCreated { thread: id, name });
        ThreadHandle(slot)
    }

    /// Forget a thread. A thread unregistered while suspended is released.
    pub fn unregister_thread(&self, id: ThreadId) -> bool
    {
        let Some(slot) = self.threads.write().remove(&id) else {
            return false;
        };
        if slot.release(ResumeRequest::run()) {
            warn!(thread = id.raw(), "thread unregistered while suspended, releasing its gate");
        }
        info!(thread = id.raw(), "thread unregistered");
        self.publish(DebuggerEvent::ThreadKilled { thread: id });
        true
    }

    /// Park the calling thread until it is resumed.
    ///
    /// Must be called by the target thread `id` itself. Stores `reason`,
    /// `frame` and `exception` for the duration of this suspension, publishes
    /// [`DebuggerEvent::ThreadSuspended`] and blocks. Returns what the thread
    /// should do next. Returns at once, with [`ResumeRequest::run`], when the
    /// controller is closed or the thread is not registered.
    pub fn request_suspend(&self, id: ThreadId, reason: StopReason, frame: Frame, exception: Option<ExceptionInfo>) -> ResumeRequest
    {
        let Some(slot) = self.slot(id) else {
            warn!(thread = id.raw(), "suspend requested by an unregistered thread");
            return ResumeRequest::run();
        };
        if self.is_closed() {
            return ResumeRequest::run();
        }

        let frame = Arc::new(frame);
        let mut state = slot.state.lock();
        state.run_state = RunState::Suspended;
        state.stop_reason = Some(reason);
        state.pending = ResumeRequest::run();
        state.frame = Some(Arc::clone(&frame));
        state.exception.clone_from(&exception);
        slot.pause_requested.store(false, Ordering::Release);
        slot.step_changed.store(false, Ordering::Release);

        debug!(thread = id.raw(), %reason, unit = %frame.unit, line = frame.line, "thread suspended");
        self.publish(DebuggerEvent::ThreadSuspended {
            thread: id,
            reason,
            frame,
            exception,
        });

        while state.run_state == RunState::Suspended && !self.is_closed() {
            slot.gate.wait(&mut state);
        }
        state.run_state = RunState::Running;
        let request = std::mem::take(&mut state.pending);
        debug!(thread = id.raw(), step = %request.step, "thread leaving suspension");
        request
    }

    /// Ask a running thread to suspend at its next traced event.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::UnknownThread`] for an unregistered id.
    pub fn request_pause(&self, id: ThreadId) -> TetherResult<()>
    {
        let slot = self.require(id)?;
        slot.pause_requested.store(true, Ordering::Release);
        debug!(thread = id.raw(), "pause requested");
        Ok(())
    }

    /// Ask every registered thread except `except` to suspend.
    ///
    /// Threads inside do-not-trace code are skipped. Never blocks the caller;
    /// returns how many threads were asked.
    pub fn suspend_all(&self, except: Option<ThreadId>) -> usize
    {
        let threads = self.threads.read();
        let mut asked = 0;
        for slot in threads.values() {
            if Some(slot.id) == except || slot.untraced.load(Ordering::Acquire) {
                continue;
            }
            slot.pause_requested.store(true, Ordering::Release);
            asked += 1;
        }
        debug!(asked, except = except.map(ThreadId::raw), "suspend all requested");
        asked
    }

    /// Release a suspended thread, or overwrite the step of a running one.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::UnknownThread`] for an unregistered id.
    pub fn resume(&self, id: ThreadId, request: ResumeRequest) -> TetherResult<()>
    {
        let slot = self.require(id)?;
        if slot.release(request) {
            debug!(thread = id.raw(), step = %request.step, "thread resumed");
            self.publish(DebuggerEvent::ThreadResumed {
                thread: id,
                step: request.step,
            });
        } else {
            debug!(thread = id.raw(), step = %request.step, "step overridden on running thread");
        }
        Ok(())
    }

    /// Release every suspended thread with no step. Returns how many were
    /// suspended.
    pub fn resume_all(&self) -> usize
    {
        let slots: Vec<Arc<ThreadSlot>> = self.threads.read().values().cloned().collect();
        let mut released = 0;
        for slot in slots {
            let was_suspended = slot.state.lock().run_state == RunState::Suspended;
            if was_suspended && slot.release(ResumeRequest::run()) {
                released += 1;
                self.publish(DebuggerEvent::ThreadResumed {
                    thread: slot.id,
                    step: StepCommand::None,
                });
            }
        }
        released
    }

    /// Close the controller and let every thread run.
    ///
    /// Used on transport loss. Suspended threads are released with no step,
    /// pending pauses are dropped, and later suspend requests return at once.
    pub fn release_all(&self) -> usize
    {
        self.closed.store(true, Ordering::SeqCst);
        let slots: Vec<Arc<ThreadSlot>> = self.threads.read().values().cloned().collect();
        let mut released = 0;
        for slot in slots {
            if slot.release(ResumeRequest::run()) {
                released += 1;
            }
            slot.step_changed.store(true, Ordering::Release);
        }
        *self.changes.lock() += 1;
        self.changed.notify_all();
        info!(released, "all threads released");
        released
    }

    /// Whether [`release_all`](Self::release_all) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool
    {
        self.closed.load(Ordering::SeqCst)
    }

    /// State of one thread.
    #[must_use]
    pub fn snapshot(&self, id: ThreadId) -> Option<ThreadSnapshot>
    {
        self.slot(id).map(|slot| slot.snapshot())
    }

    /// State of every thread, ordered by id.
    #[must_use]
    pub fn threads(&self) -> Vec<ThreadSnapshot>
    {
        let slots: Vec<Arc<ThreadSlot>> = self.threads.read().values().cloned().collect();
        let mut snapshots: Vec<ThreadSnapshot> = slots.iter().map(|slot| slot.snapshot()).collect();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        snapshots
    }

    /// Frames captured for the thread's current suspension.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::UnknownThread`] or [`TetherError::NotSuspended`].
    pub fn suspended_frame(&self, id: ThreadId) -> TetherResult<Arc<Frame>>
    {
        let slot = self.require(id)?;
        let state = slot.state.lock();
        state.frame.clone().ok_or(TetherError::NotSuspended(id))
    }

    /// Exception attached to the thread's current suspension.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::UnknownThread`] or [`TetherError::NotSuspended`].
    pub fn suspended_exception(&self, id: ThreadId) -> TetherResult<Option<ExceptionInfo>>
    {
        let slot = self.require(id)?;
        let state = slot.state.lock();
        if state.run_state == RunState::Suspended {
            Ok(state.exception.clone())
        } else {
            Err(TetherError::NotSuspended(id))
        }
    }

    /// Block until thread `id` reaches `run_state`, or `timeout` passes.
    pub fn wait_for_state(&self, id: ThreadId, run_state: RunState, timeout: Duration) -> bool
    {
        let deadline = Instant::now() + timeout;
        let reached = || self.snapshot(id).is_some_and(|snapshot| snapshot.run_state == run_state);
        loop {
            let seen = *self.changes.lock();
            if reached() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            let mut changes = self.changes.lock();
            if *changes == seen && self.changed.wait_until(&mut changes, deadline).timed_out() {
                drop(changes);
                return reached();
            }
        }
    }
}

//! The debugger controller: a single thread that owns all mutable debugger
//! state and every ptrace call, applies queued requests in FIFO order and
//! publishes immutable state snapshots.

mod step;

use crate::address::VirtualAddress;
use crate::breakpoint::{BreakpointRegistry, BreakpointSpot};
use crate::error::Error;
use crate::protocol::{
    BreakpointLoc, BreakpointView, PauseData, Request, StackFrame, StateSnapshot, StepKind,
    StopFlags, SubordinateState, TargetSummary,
};
use crate::register::{DwarfRegisters, Registers};
use crate::render::{self, ExpressionResult, RenderContext};
use crate::strings::{StringCache, StringHash};
use crate::subordinate::wait::{StopEvent, WaitHub, WaitOutcome};
use crate::subordinate::{Subordinate, SYNC_WAIT_DEADLINE};
use crate::symbols::Target;
use crate::weak_error;
use log::{debug, info, warn};
use nix::sys;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// si_code values of a SIGTRAP stop.
mod code {
    pub const TRAP_BRKPT: i32 = 0x1;
    pub const TRAP_TRACE: i32 = 0x2;
    pub const SI_KERNEL: i32 = 0x80;
}

/// Controller state machine phases.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
    Uninitialized,
    Loaded,
    Running,
    Paused,
    ShuttingDown,
}

/// All mutable controller state; owned by the controller thread.
pub(crate) struct ControllerData {
    pub(crate) strings: Arc<StringCache>,
    pub(crate) phase: Phase,
    pub(crate) target: Option<Arc<Target>>,
    pub(crate) subordinate: Option<Subordinate>,
    pub(crate) breakpoints: BreakpointRegistry,
    /// One-shot breakpoints of an in-flight step-over/step-out.
    pub(crate) transients: Vec<crate::breakpoint::Breakpoint>,
    pub(crate) pause: Option<PauseData>,
    /// Variable names whose values are recomputed on every pause.
    pub(crate) watches: Vec<StringHash>,
}

impl ControllerData {
    pub(crate) fn load_addr(&self) -> Result<u64, Error> {
        self.subordinate
            .as_ref()
            .map(|s| s.load_addr)
            .ok_or(Error::SubordinateNotLaunched)
    }

    pub(crate) fn current_pc(&self, pid: Pid) -> Result<VirtualAddress, Error> {
        Ok(Registers::capture(pid)?.pc())
    }
}

struct Envelope {
    request: Request,
    reply: Option<Sender<Result<(), Error>>>,
}

#[derive(Default)]
struct Published {
    snapshot: StateSnapshot,
    seq: u64,
}

#[derive(Default)]
struct Shared {
    published: Mutex<Published>,
    cond: Condvar,
}

/// Client handle to a running debugger core.
///
/// Requests submitted through one handle are processed in submission order;
/// results are observed through [`StateSnapshot`]s.
pub struct Debugger {
    tx: Sender<Envelope>,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Debugger {
    /// Spawn the controller and wait-loop threads.
    pub fn start() -> Self {
        let strings = Arc::new(StringCache::new());
        let (tx, rx) = channel::<Envelope>();
        let shared = Arc::new(Shared::default());

        let hub_tx = tx.clone();
        let hub = WaitHub::spawn(move |event: StopEvent| {
            let (status, flags) = match event.outcome {
                WaitOutcome::Status(status) => (
                    Some(status),
                    StopFlags {
                        exited: matches!(
                            status,
                            WaitStatus::Exited(_, _) | WaitStatus::Signaled(_, _, _)
                        ),
                        should_stop_debugger: matches!(
                            status,
                            WaitStatus::Stopped(_, _)
                        ),
                    },
                ),
                WaitOutcome::ProcessGone => (
                    None,
                    StopFlags {
                        exited: true,
                        should_stop_debugger: false,
                    },
                ),
            };
            let _ = hub_tx.send(Envelope {
                request: Request::SubordinateStopped {
                    pid: event.pid,
                    flags,
                    status,
                },
                reply: None,
            });
        });

        let thread_shared = shared.clone();
        let thread = thread::Builder::new()
            .name("spyglass-controller".into())
            .spawn(move || controller_loop(rx, hub, thread_shared, strings))
            .expect("controller thread spawn failed");

        Self {
            tx,
            shared,
            thread: Some(thread),
        }
    }

    /// Fire-and-forget submission.
    pub fn submit(&self, request: Request) {
        let _ = self.tx.send(Envelope {
            request,
            reply: None,
        });
    }

    /// Submit and wait until the request was processed; returns the snapshot
    /// published right after it.
    pub fn call(&self, request: Request) -> Result<StateSnapshot, Error> {
        let (reply_tx, reply_rx) = channel();
        self.tx
            .send(Envelope {
                request,
                reply: Some(reply_tx),
            })
            .map_err(|_| Error::ShuttingDown)?;
        match reply_rx.recv_timeout(Duration::from_secs(30)) {
            Ok(Ok(())) => Ok(self.snapshot()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Current published state.
    pub fn snapshot(&self) -> StateSnapshot {
        self.shared
            .published
            .lock()
            .expect("published state lock poisoned")
            .snapshot
            .clone()
    }

    /// Block until a snapshot satisfies `pred` or the timeout elapses.
    pub fn wait_until(
        &self,
        timeout: Duration,
        pred: impl Fn(&StateSnapshot) -> bool,
    ) -> Result<StateSnapshot, Error> {
        let deadline = Instant::now() + timeout;
        let mut published = self
            .shared
            .published
            .lock()
            .expect("published state lock poisoned");
        loop {
            if pred(&published.snapshot) {
                return Ok(published.snapshot.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::ConditionTimeout);
            }
            let (guard, _) = self
                .shared
                .cond
                .wait_timeout(published, deadline - now)
                .expect("published state lock poisoned");
            published = guard;
        }
    }

    /// Replace the watched-variable list.
    pub fn set_watches(&self, names: Vec<String>) {
        self.submit(Request::UpdateWatches { names });
    }

    /// Shut the core down and join its threads.
    pub fn quit(&mut self) {
        if self.thread.is_some() {
            let _ = self.call(Request::Quit);
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Debugger {
    fn drop(&mut self) {
        self.quit();
    }
}

fn controller_loop(
    rx: Receiver<Envelope>,
    mut hub: WaitHub,
    shared: Arc<Shared>,
    strings: Arc<StringCache>,
) {
    let mut data = ControllerData {
        strings,
        phase: Phase::Uninitialized,
        target: None,
        subordinate: None,
        breakpoints: BreakpointRegistry::default(),
        transients: vec![],
        pause: None,
        watches: vec![],
    };
    publish(&data, &shared);

    loop {
        let envelope = match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(envelope) => envelope,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let result = dispatch(&mut data, &hub, envelope.request);
        if let Err(ref e) = result {
            debug!(target: "controller", "request failed: {e:#}");
            // a failed ptrace call leaves the trace session in an unknown
            // state; tear the subordinate down and return to idle
            if matches!(
                e,
                Error::Ptrace(_) | Error::Waitpid(_) | Error::ProcessDoesNotExist(_)
            ) && data.subordinate.is_some()
            {
                warn!(target: "controller", "tearing subordinate down after: {e:#}");
                weak_error!(teardown_subordinate(&mut data, &hub, true), "teardown:");
            }
        }
        publish(&data, &shared);
        if let Some(reply) = envelope.reply {
            let _ = reply.send(result);
        }
        if data.phase == Phase::ShuttingDown {
            break;
        }
    }

    hub.shutdown();
}

fn publish(data: &ControllerData, shared: &Shared) {
    let snapshot = StateSnapshot {
        target: data.target.as_ref().map(|t| TargetSummary {
            path: t.path.clone(),
            pie: t.pie,
            compile_unit_count: t.compile_units.len(),
            function_count: t.compile_units.iter().map(|cu| cu.functions.len()).sum(),
        }),
        breakpoints: data
            .breakpoints
            .iter()
            .map(|b| BreakpointView {
                bid: b.bid,
                spot: b.spot,
                resolved: b.resolved,
                active: b.active,
            })
            .collect(),
        subordinate: match (&data.subordinate, &data.pause) {
            (None, _) => SubordinateState::None,
            (Some(_), Some(pause)) => SubordinateState::Paused(pause.clone()),
            (Some(sub), None) => SubordinateState::Running { pid: sub.pid() },
        },
    };

    let mut published = shared
        .published
        .lock()
        .expect("published state lock poisoned");
    published.snapshot = snapshot;
    published.seq += 1;
    shared.cond.notify_all();
}

fn dispatch(data: &mut ControllerData, hub: &WaitHub, request: Request) -> Result<(), Error> {
    if data.phase == Phase::ShuttingDown {
        return Err(Error::ShuttingDown);
    }
    match request {
        Request::LoadSymbols { path } => {
            if data.subordinate.is_some() {
                return Err(Error::SubordinateAlreadyLaunched);
            }
            let target = Target::load(&path, data.strings.clone())?;
            data.target = Some(Arc::new(target));
            data.phase = Phase::Loaded;
            Ok(())
        }
        Request::LaunchSubordinate {
            path,
            args,
            stop_on_entry,
        } => launch(data, hub, &path, &args, stop_on_entry),
        Request::KillSubordinate => {
            teardown_subordinate(data, hub, true)?;
            Ok(())
        }
        Request::Continue => resume(data, hub),
        Request::Step(kind) => step(data, hub, kind),
        Request::UpdateBreakpoint { loc } => update_breakpoint(data, hub, loc),
        Request::ToggleBreakpoint { bid } => toggle_breakpoint(data, hub, bid),
        Request::UpdateWatches { names } => {
            data.watches = names
                .iter()
                .map(|n| data.strings.add_str(n))
                .collect();
            Ok(())
        }
        Request::SubordinateStopped { pid, flags, status } => {
            handle_stop(data, hub, pid, flags, status)
        }
        Request::Quit => {
            weak_error!(teardown_subordinate(data, hub, true), "quit teardown:");
            data.phase = Phase::ShuttingDown;
            Ok(())
        }
    }
}

fn launch(
    data: &mut ControllerData,
    hub: &WaitHub,
    path: &std::path::Path,
    args: &[String],
    stop_on_entry: bool,
) -> Result<(), Error> {
    let target = data.target.clone().ok_or(Error::TargetNotLoaded)?;
    if data.subordinate.is_some() {
        return Err(Error::SubordinateAlreadyLaunched);
    }

    let subordinate = Subordinate::launch(path, args, target.pie)?;
    let pid = subordinate.pid();
    let load_addr = subordinate.load_addr;
    data.subordinate = Some(subordinate);

    data.breakpoints.resolve_all(&target, load_addr);
    for breakpoint in data.breakpoints.iter().filter(|b| b.active) {
        weak_error!(breakpoint.install(pid), "breakpoint install:");
    }
    if stop_on_entry {
        let entry = target.entry_point.relocate(load_addr);
        let transient = crate::breakpoint::Breakpoint::transient(entry);
        transient.install(pid)?;
        data.transients.push(transient);
    }

    info!(target: "controller", "subordinate {pid} launched, load address {load_addr:#x}");
    continue_running(data, hub)
}

/// Continue every tracee and arm the controller-bound wait.
fn continue_running(data: &mut ControllerData, hub: &WaitHub) -> Result<(), Error> {
    let subordinate = data
        .subordinate
        .as_mut()
        .ok_or(Error::SubordinateNotLaunched)?;
    subordinate.tracees.cont_stopped()?;
    hub.wait_to_controller(Pid::from_raw(-1));
    data.pause = None;
    data.phase = Phase::Running;
    Ok(())
}

fn resume(data: &mut ControllerData, hub: &WaitHub) -> Result<(), Error> {
    if data.phase != Phase::Paused {
        return Err(Error::SubordinateNotPaused);
    }
    let pid = data
        .pause
        .as_ref()
        .map(|p| p.pid)
        .ok_or(Error::SubordinateNotPaused)?;
    data.step_over_breakpoint(hub, pid)?;
    continue_running(data, hub)
}

fn step(data: &mut ControllerData, hub: &WaitHub, kind: StepKind) -> Result<(), Error> {
    if data.phase != Phase::Paused {
        return Err(Error::SubordinateNotPaused);
    }
    let pid = data
        .pause
        .as_ref()
        .map(|p| p.pid)
        .ok_or(Error::SubordinateNotPaused)?;

    match kind {
        StepKind::Into => {
            data.step_into(hub, pid)?;
            data.pause = Some(gather_pause_data(data, pid)?);
            data.phase = Phase::Paused;
            Ok(())
        }
        StepKind::Over => {
            data.plant_step_over(hub, pid)?;
            continue_running(data, hub)
        }
        StepKind::OutOf => {
            data.plant_step_out(hub, pid)?;
            continue_running(data, hub)
        }
    }
}

/// Run `change` with the subordinate guaranteed stopped: a running process
/// is temporarily paused with SIGUSR2, which the wait loop acknowledges
/// without waking the controller.
fn with_stopped_subordinate(
    data: &mut ControllerData,
    hub: &WaitHub,
    change: impl FnOnce(&mut ControllerData) -> Result<(), Error>,
) -> Result<(), Error> {
    let Some(pid) = data.subordinate.as_ref().map(|s| s.pid()) else {
        return change(data);
    };
    if data.phase != Phase::Running {
        return change(data);
    }

    let ack = hub.register_pause_ack(pid);
    sys::signal::kill(pid, Signal::SIGUSR2).map_err(|e| Error::Syscall("kill", e))?;
    match ack.take(SYNC_WAIT_DEADLINE) {
        Ok(_) => {
            let result = change(data);
            // resume without delivering the pause signal
            sys::ptrace::cont(pid, None).map_err(Error::Ptrace)?;
            result
        }
        Err(e) => {
            // the tracee likely reached a real stop first; that stop will be
            // processed as its own request
            hub.unregister_pause_ack(pid);
            Err(e)
        }
    }
}

fn update_breakpoint(
    data: &mut ControllerData,
    hub: &WaitHub,
    loc: BreakpointLoc,
) -> Result<(), Error> {
    match loc {
        BreakpointLoc::Spot(spot) => {
            if let (BreakpointSpot::Source { file_hash, .. }, Some(target)) =
                (spot, data.target.as_ref())
            {
                if !target.knows_file(file_hash) {
                    return Err(Error::NoSuitablePlace);
                }
            }
            let bid = data.breakpoints.add(spot);
            with_stopped_subordinate(data, hub, |data| {
                let Some(subordinate) = data.subordinate.as_ref() else {
                    return Ok(());
                };
                let pids = subordinate.tracees.pids();
                let load_addr = subordinate.load_addr;
                if let Some(target) = data.target.clone() {
                    data.breakpoints.resolve_all(&target, load_addr);
                }
                match data.breakpoints.get(bid) {
                    Some(bp) if bp.resolved.is_some() => {
                        for pid in pids {
                            bp.install(pid)?;
                        }
                        Ok(())
                    }
                    _ => Err(Error::NoSuitablePlace),
                }
            })
        }
        BreakpointLoc::Existing(bid) => with_stopped_subordinate(data, hub, move |data| {
            let breakpoint = data
                .breakpoints
                .remove(bid)
                .ok_or(Error::BreakpointNotFound(bid))?;
            if data.subordinate.is_some() && breakpoint.is_installed() {
                breakpoint.uninstall_all()?;
            }
            Ok(())
        }),
    }
}

fn toggle_breakpoint(
    data: &mut ControllerData,
    hub: &WaitHub,
    bid: crate::breakpoint::BreakpointId,
) -> Result<(), Error> {
    with_stopped_subordinate(data, hub, move |data| {
        let tracee_pids = data.subordinate.as_ref().map(|s| s.tracees.pids());
        let load_addr = data.subordinate.as_ref().map(|s| s.load_addr);
        if let (Some(target), Some(load_addr)) = (data.target.clone(), load_addr) {
            data.breakpoints.resolve_all(&target, load_addr);
        }
        let breakpoint = data
            .breakpoints
            .get_mut(bid)
            .ok_or(Error::BreakpointNotFound(bid))?;
        breakpoint.active = !breakpoint.active;
        let Some(pids) = tracee_pids else {
            return Ok(());
        };
        if breakpoint.active {
            // re-install on every current thread pid
            for pid in pids {
                breakpoint.install(pid)?;
            }
            Ok(())
        } else {
            breakpoint.uninstall_all()
        }
    })
}

fn teardown_subordinate(
    data: &mut ControllerData,
    hub: &WaitHub,
    kill: bool,
) -> Result<(), Error> {
    let Some(mut subordinate) = data.subordinate.take() else {
        return Ok(());
    };
    let pid = subordinate.pid();
    if kill {
        weak_error!(subordinate.kill(hub), "subordinate kill:");
    }
    data.transients.clear();
    data.breakpoints.clear_runtime_state();
    data.pause = None;
    if data.target.is_some() {
        data.phase = Phase::Loaded;
    } else {
        data.phase = Phase::Uninitialized;
    }
    info!(target: "controller", "subordinate {pid} detached");
    Ok(())
}

#[allow(clippy::too_many_lines)]
fn handle_stop(
    data: &mut ControllerData,
    hub: &WaitHub,
    _pid: Pid,
    _flags: StopFlags,
    status: Option<WaitStatus>,
) -> Result<(), Error> {
    if data.subordinate.is_none() {
        return Ok(());
    }
    let main_pid = data.subordinate.as_ref().expect("checked above").pid();

    let Some(status) = status else {
        // ECHILD: the whole process is gone
        return teardown_subordinate(data, hub, false);
    };

    match status {
        WaitStatus::Exited(epid, exit_code) => {
            let subordinate = data.subordinate.as_mut().expect("checked above");
            subordinate.tracees.remove(epid);
            if epid == main_pid || subordinate.tracees.is_empty() {
                info!(target: "controller", "subordinate exited with code {exit_code}");
                return teardown_subordinate(data, hub, false);
            }
            hub.wait_to_controller(Pid::from_raw(-1));
            Ok(())
        }
        WaitStatus::Signaled(spid, signal, _) => {
            let subordinate = data.subordinate.as_mut().expect("checked above");
            subordinate.tracees.remove(spid);
            if spid == main_pid || subordinate.tracees.is_empty() {
                info!(target: "controller", "subordinate terminated by {signal}");
                return teardown_subordinate(data, hub, false);
            }
            hub.wait_to_controller(Pid::from_raw(-1));
            Ok(())
        }
        WaitStatus::PtraceEvent(epid, _, event) => {
            handle_ptrace_event(data, hub, epid, event)
        }
        WaitStatus::Stopped(spid, Signal::SIGTRAP) => handle_trap(data, hub, spid),
        WaitStatus::Stopped(spid, Signal::SIGUSR2) => {
            // a temporary-pause acknowledgment that lost its waiter; swallow
            // the signal, it never pauses the debugger
            let subordinate = data.subordinate.as_mut().expect("checked above");
            if let Some(tracee) = subordinate.tracees.tracee_mut(spid) {
                tracee.set_stopped();
                weak_error!(tracee.r#continue(None), "pause ack release:");
            }
            hub.wait_to_controller(Pid::from_raw(-1));
            Ok(())
        }
        WaitStatus::Stopped(spid, signal) if step::QUIET_SIGNALS.contains(&signal) => {
            // deliver and keep going, this is not a debugger stop
            let subordinate = data.subordinate.as_mut().expect("checked above");
            if let Some(tracee) = subordinate.tracees.tracee_mut(spid) {
                tracee.set_stopped();
                weak_error!(tracee.r#continue(Some(signal)), "quiet signal delivery:");
            }
            hub.wait_to_controller(Pid::from_raw(-1));
            Ok(())
        }
        WaitStatus::Stopped(spid, Signal::SIGSTOP) => {
            let subordinate = data.subordinate.as_mut().expect("checked above");
            let initial = subordinate
                .tracees
                .tracee(spid)
                .map(|t| t.initial_stop_pending)
                .unwrap_or(true);
            if initial {
                // a fresh thread arriving at its post-clone stop; let it run
                let tracee = subordinate.tracees.add(spid);
                tracee.initial_stop_pending = false;
                tracee.set_stopped();
                weak_error!(tracee.r#continue(None), "new thread release:");
                hub.wait_to_controller(Pid::from_raw(-1));
                return Ok(());
            }
            if let Some(tracee) = subordinate.tracees.tracee_mut(spid) {
                tracee.set_stopped();
            }
            pause_at(data, hub, spid)
        }
        WaitStatus::Stopped(spid, signal) => {
            info!(target: "controller", "subordinate stopped by {signal}");
            let subordinate = data.subordinate.as_mut().expect("checked above");
            if let Some(tracee) = subordinate.tracees.tracee_mut(spid) {
                tracee.set_stopped();
            }
            pause_at(data, hub, spid)
        }
        other => {
            warn!(target: "controller", "unexpected wait status: {other:?}");
            hub.wait_to_controller(Pid::from_raw(-1));
            Ok(())
        }
    }
}

fn handle_ptrace_event(
    data: &mut ControllerData,
    hub: &WaitHub,
    pid: Pid,
    event: i32,
) -> Result<(), Error> {
    let subordinate = data
        .subordinate
        .as_mut()
        .ok_or(Error::SubordinateNotLaunched)?;
    match event {
        nix::libc::PTRACE_EVENT_CLONE | nix::libc::PTRACE_EVENT_FORK
        | nix::libc::PTRACE_EVENT_VFORK => {
            if let Some(tracee) = subordinate.tracees.tracee_mut(pid) {
                tracee.set_stopped();
            }
            match sys::ptrace::getevent(pid) {
                Ok(new_raw) => {
                    let new_pid = Pid::from_raw(new_raw as i32);
                    debug!(target: "controller", "new tracee {new_pid}");
                    subordinate.tracees.add_cloned(new_pid);
                    // the new thread shares the patched address space; give
                    // every installed breakpoint a record for it
                    for breakpoint in data.breakpoints.iter() {
                        if breakpoint.is_installed() {
                            weak_error!(breakpoint.install(new_pid), "thread breakpoint:");
                        }
                    }
                    for transient in &data.transients {
                        if transient.is_installed() {
                            weak_error!(transient.install(new_pid), "thread one-shot:");
                        }
                    }
                }
                Err(e) => warn!(target: "controller", "getevent failed: {e}"),
            }
            subordinate.tracees.cont_stopped()?;
        }
        nix::libc::PTRACE_EVENT_EXEC => {
            if let Some(tracee) = subordinate.tracees.tracee_mut(pid) {
                tracee.set_stopped();
            }
            subordinate.tracees.cont_stopped()?;
        }
        nix::libc::PTRACE_EVENT_EXIT => {
            // let the tracee die; its exit status arrives as a later event
            if let Some(mut tracee) = subordinate.tracees.remove(pid) {
                tracee.set_stopped();
                weak_error!(tracee.r#continue(None), "tracee exit:");
            }
        }
        other => {
            warn!(target: "controller", "unsupported ptrace event {other}");
            subordinate.tracees.cont_stopped()?;
        }
    }
    hub.wait_to_controller(Pid::from_raw(-1));
    Ok(())
}

/// Classify a SIGTRAP stop and either pause the debugger or keep running.
fn handle_trap(data: &mut ControllerData, hub: &WaitHub, pid: Pid) -> Result<(), Error> {
    let siginfo = sys::ptrace::getsiginfo(pid).map_err(Error::Ptrace)?;
    let subordinate = data
        .subordinate
        .as_mut()
        .ok_or(Error::SubordinateNotLaunched)?;
    if let Some(tracee) = subordinate.tracees.tracee_mut(pid) {
        tracee.set_stopped();
    }

    match siginfo.si_code {
        code::TRAP_BRKPT | code::SI_KERNEL => {
            // on x86 the PC points just past the INT3 byte
            let registers = Registers::capture(pid)?;
            let trap_pc = registers.pc().offset(-1);
            let tracee = subordinate
                .tracees
                .tracee_mut(pid)
                .ok_or(Error::ProcessDoesNotExist(pid))?;
            tracee.set_pc(trap_pc)?;
            debug!(target: "controller", "breakpoint trap at {trap_pc}");
            data.clear_transients();
            pause_at(data, hub, pid)
        }
        code::TRAP_TRACE => {
            debug!(target: "controller", "single-step trap");
            pause_at(data, hub, pid)
        }
        other => {
            debug!(target: "controller", "unexpected SIGTRAP code {other}");
            pause_at(data, hub, pid)
        }
    }
}

/// Stop every other running tracee before a pause is published, so the
/// byte-patch windows of later stepping cannot race a running thread.
fn group_stop(data: &mut ControllerData, hub: &WaitHub, initiator: Pid) {
    let Some(subordinate) = data.subordinate.as_mut() else {
        return;
    };
    let proc_pid = subordinate.pid();
    for tid in subordinate.tracees.pids() {
        if tid == initiator {
            continue;
        }
        let Some(tracee) = subordinate.tracees.tracee(tid) else {
            continue;
        };
        if tracee.is_stopped() {
            continue;
        }
        if let Err(e) = tracee.interrupt(proc_pid) {
            warn!(target: "controller", "group stop of {tid} failed: {e:#}");
            continue;
        }
        match hub.wait_sync(tid, SYNC_WAIT_DEADLINE) {
            Ok(WaitOutcome::Status(status)) => {
                if let WaitStatus::Stopped(_, Signal::SIGTRAP) = status {
                    // the thread raced into a trap of its own before the
                    // interrupt; align its pc so the hit re-reports once the
                    // group resumes
                    if let Ok(mut regs) = Registers::capture(tid) {
                        let trap_pc = regs.pc().offset(-1);
                        let ours = data.breakpoints.installed_at(trap_pc).is_some()
                            || data
                                .transients
                                .iter()
                                .any(|t| t.is_installed() && t.resolved == Some(trap_pc));
                        if ours {
                            regs.set(crate::register::Register::Rip, trap_pc.as_u64());
                            weak_error!(regs.write_back(tid), "group stop pc fixup:");
                        }
                    }
                } else if !matches!(status, WaitStatus::Stopped(_, Signal::SIGSTOP)) {
                    warn!(
                        target: "controller",
                        "unexpected status during group stop: {status:?}"
                    );
                }
                if let Some(tracee) = subordinate.tracees.tracee_mut(tid) {
                    tracee.set_stopped();
                }
            }
            Ok(WaitOutcome::ProcessGone) => {
                subordinate.tracees.remove(tid);
            }
            Err(e) => warn!(target: "controller", "group stop wait for {tid}: {e:#}"),
        }
    }
}

/// Gather pause data for `pid` and move to the paused phase.
fn pause_at(data: &mut ControllerData, hub: &WaitHub, pid: Pid) -> Result<(), Error> {
    group_stop(data, hub, pid);
    data.pause = Some(gather_pause_data(data, pid)?);
    data.phase = Phase::Paused;
    Ok(())
}

/// Everything a client sees at a stop: registers, source place, stack,
/// locals and watch values.
fn gather_pause_data(data: &ControllerData, pid: Pid) -> Result<PauseData, Error> {
    let target = data.target.clone().ok_or(Error::TargetNotLoaded)?;
    let load_addr = data.load_addr()?;

    let registers = Registers::capture(pid)?;
    let pc = registers.pc();
    let file_pc = pc.into_file(load_addr);
    let source = target.place_for_pc(file_pc);

    let walk = target
        .unwind
        .walk(pid, &registers, load_addr, Some(64))
        .unwrap_or_else(|e| {
            warn!(target: "controller", "stack walk failed: {e:#}");
            crate::symbols::unwind::StackWalk {
                frames: vec![pc],
                frame_base: VirtualAddress::default(),
            }
        });

    let stack_frames = walk
        .frames
        .iter()
        .map(|frame_pc| {
            let frame_file_pc = frame_pc.into_file(load_addr);
            StackFrame {
                name: target.name_for_pc(frame_file_pc),
                pc: *frame_pc,
                source: target.place_for_pc(frame_file_pc),
            }
        })
        .collect();

    let dwarf_registers = DwarfRegisters::from(&registers);
    let frame_base = (!walk.frame_base.is_null()).then(|| walk.frame_base.as_u64());
    let render_ctx = RenderContext {
        pid,
        registers: &dwarf_registers,
        load_addr,
        frame_base,
    };

    let mut locals = vec![];
    if let Some((unit, function)) = target.function_for_pc(file_pc) {
        for var_index in &function.variables {
            let Some(variable) = unit.variables.get(*var_index) else {
                continue;
            };
            let rendered = render::render_variable(&target, variable, &render_ctx)
                .unwrap_or_else(|e| {
                    debug!(target: "controller", "variable render failed: {e:#}");
                    ExpressionResult::unavailable(variable.name)
                });
            locals.push(rendered);
        }
    }

    let mut watches = vec![];
    for watch in &data.watches {
        let rendered = locals
            .iter()
            .find(|l| l.name == *watch)
            .cloned()
            .or_else(|| {
                // fall back to a CU-level global of the unit containing the
                // current frame; locals of unrelated functions must not leak
                // into watches
                let unit = target.unit_for_pc(file_pc)?;
                let variable = unit
                    .globals
                    .iter()
                    .filter_map(|i| unit.variables.get(*i))
                    .find(|v| v.name == *watch)?;
                render::render_variable(&target, variable, &render_ctx).ok()
            })
            .unwrap_or_else(|| ExpressionResult::unavailable(*watch));
        watches.push(rendered);
    }

    Ok(PauseData {
        pid,
        registers,
        source,
        stack_frames,
        locals,
        watches,
        strings: data.strings.clone(),
    })
}

//! The wait loop.
//!
//! A dedicated thread owns every `waitpid` call for the subordinate. Wait
//! requests name a pid (or -1 for any tracee) and a destination: either a
//! synchronous call site that blocks on a condition cell with a deadline, or
//! the controller, which receives the status as a message on its request
//! queue. The thread itself never issues ptrace requests; classification and
//! resumption stay on the controller thread.

use crate::error::Error;
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Result of one consumed wait request.
#[derive(Debug, Clone, Copy)]
pub enum WaitOutcome {
    Status(WaitStatus),
    /// `ECHILD`: every traced child is gone.
    ProcessGone,
}

/// Status report delivered to the controller queue.
#[derive(Debug, Clone, Copy)]
pub struct StopEvent {
    pub pid: Pid,
    pub outcome: WaitOutcome,
}

/// One-shot rendezvous cell between the wait loop and a blocked call site.
pub struct WaitCell {
    slot: Mutex<Option<WaitOutcome>>,
    cond: Condvar,
}

impl WaitCell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(None),
            cond: Condvar::new(),
        })
    }

    pub fn put(&self, outcome: WaitOutcome) {
        let mut slot = self.slot.lock().expect("wait cell lock poisoned");
        *slot = Some(outcome);
        self.cond.notify_all();
    }

    /// Block until an outcome arrives or the deadline expires.
    pub fn take(&self, deadline: Duration) -> Result<WaitOutcome, Error> {
        let slot = self.slot.lock().expect("wait cell lock poisoned");
        let (mut slot, timeout) = self
            .cond
            .wait_timeout_while(slot, deadline, |s| s.is_none())
            .expect("wait cell lock poisoned");
        if timeout.timed_out() && slot.is_none() {
            return Err(Error::Timeout);
        }
        Ok(slot.take().expect("outcome must be present"))
    }
}

enum Destination {
    Controller,
    CallSite(Arc<WaitCell>),
}

enum Job {
    Wait { pid: Pid, dest: Destination },
    Shutdown,
}

/// Handle to the wait-loop thread.
pub struct WaitHub {
    tx: Sender<Job>,
    pause_acks: Arc<Mutex<HashMap<Pid, Arc<WaitCell>>>>,
    handle: Option<JoinHandle<()>>,
}

impl WaitHub {
    /// Spawn the wait loop. `events` receives statuses destined for the
    /// controller queue.
    pub fn spawn(events: impl Fn(StopEvent) + Send + 'static) -> Self {
        let (tx, rx) = channel::<Job>();
        let pause_acks: Arc<Mutex<HashMap<Pid, Arc<WaitCell>>>> = Arc::default();
        let acks = pause_acks.clone();

        let handle = thread::Builder::new()
            .name("spyglass-wait".into())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    let (pid, dest) = match job {
                        Job::Wait { pid, dest } => (pid, dest),
                        Job::Shutdown => break,
                    };

                    let outcome = loop {
                        let status = match waitpid(pid, Some(WaitPidFlag::__WALL)) {
                            Ok(status) => status,
                            Err(Errno::ECHILD) => break WaitOutcome::ProcessGone,
                            Err(e) => {
                                warn!(target: "tracer", "waitpid failure: {e}");
                                break WaitOutcome::ProcessGone;
                            }
                        };
                        debug!(target: "tracer", "new thread status: {status:?}");

                        // A SIGUSR2 stop acknowledges a temporary pause: wake
                        // the requester and keep waiting on the same request.
                        if let WaitStatus::Stopped(spid, Signal::SIGUSR2) = status {
                            let ack = acks
                                .lock()
                                .expect("pause ack lock poisoned")
                                .remove(&spid);
                            if let Some(cell) = ack {
                                cell.put(WaitOutcome::Status(status));
                                continue;
                            }
                        }

                        break WaitOutcome::Status(status);
                    };

                    let event_pid = match outcome {
                        WaitOutcome::Status(status) => status.pid().unwrap_or(pid),
                        WaitOutcome::ProcessGone => pid,
                    };
                    match dest {
                        Destination::Controller => events(StopEvent {
                            pid: event_pid,
                            outcome,
                        }),
                        Destination::CallSite(cell) => cell.put(outcome),
                    }
                }
                debug!(target: "tracer", "wait loop drained");
            })
            .expect("wait thread spawn failed");

        Self {
            tx,
            pause_acks,
            handle: Some(handle),
        }
    }

    /// Enqueue a wait whose result goes to the controller queue.
    pub fn wait_to_controller(&self, pid: Pid) {
        let _ = self.tx.send(Job::Wait {
            pid,
            dest: Destination::Controller,
        });
    }

    /// Wait synchronously for a status of `pid`, with a deadline.
    pub fn wait_sync(&self, pid: Pid, deadline: Duration) -> Result<WaitOutcome, Error> {
        let cell = WaitCell::new();
        self.tx
            .send(Job::Wait {
                pid,
                dest: Destination::CallSite(cell.clone()),
            })
            .map_err(|_| Error::ShuttingDown)?;
        cell.take(deadline)
    }

    /// Register interest in the SIGUSR2 acknowledgment of a temporary pause.
    ///
    /// The caller sends the signal itself; the returned cell is woken by the
    /// wait loop without the stop ever reaching the controller.
    pub fn register_pause_ack(&self, pid: Pid) -> Arc<WaitCell> {
        let cell = WaitCell::new();
        self.pause_acks
            .lock()
            .expect("pause ack lock poisoned")
            .insert(pid, cell.clone());
        cell
    }

    pub fn unregister_pause_ack(&self, pid: Pid) {
        self.pause_acks
            .lock()
            .expect("pause ack lock poisoned")
            .remove(&pid);
    }

    /// Poison the loop and join the thread.
    pub fn shutdown(&mut self) {
        let _ = self.tx.send(Job::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WaitHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

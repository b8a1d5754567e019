//! Subordinate process runtime model and the ptrace adapter around it.

pub mod memory;
pub mod process;
pub mod tracee;
pub mod wait;

use crate::error::Error;
use crate::subordinate::process::{Child, Installed, OutputPipes};
use crate::subordinate::tracee::TraceeCtl;
use crate::subordinate::wait::{WaitHub, WaitOutcome};
use log::debug;
use nix::sys;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

/// Deadline for synchronous waits against the wait loop.
pub const SYNC_WAIT_DEADLINE: Duration = Duration::from_millis(1000);

/// Thread id that owns ptrace for the current trace session. The kernel
/// rejects ptrace requests from any other thread, so mixing threads is a
/// bug we want to catch before the kernel turns it into ESRCH.
static ADAPTER_THREAD: AtomicI32 = AtomicI32::new(0);

fn current_tid() -> i32 {
    unsafe { nix::libc::gettid() }
}

/// The calling thread becomes the ptrace owner of the session being spawned.
pub(crate) fn claim_adapter_thread() {
    ADAPTER_THREAD.store(current_tid(), Ordering::Relaxed);
}

/// Debug-build check that ptrace is used from the owning thread only.
pub(crate) fn assert_adapter_thread() {
    debug_assert!(
        {
            let owner = ADAPTER_THREAD.load(Ordering::Relaxed);
            owner == 0 || owner == current_tid()
        },
        "ptrace request from a thread that does not own the trace session"
    );
}

/// A launched subordinate process under trace.
///
/// Owns the thread bookkeeping and the image load address; all ptrace calls
/// against it are made from the controller thread.
pub struct Subordinate {
    child: Child<Installed>,
    pub tracees: TraceeCtl,
    pub load_addr: u64,
    pub output: Option<OutputPipes>,
}

impl Subordinate {
    /// Spawn `path` under trace and determine its load address.
    ///
    /// On return the subordinate is stopped at the exec trap and no thread is
    /// running.
    pub fn launch(path: &Path, args: &[String], pie: bool) -> Result<Self, Error> {
        let (template, output) = Child::new(path, args.iter().cloned())?;
        let child = template.install()?;
        let pid = child.pid();
        debug!(target: "tracer", "subordinate {pid} installed");

        let load_addr = if pie { mapping_address(pid)? } else { 0 };
        Ok(Self {
            child,
            tracees: TraceeCtl::new(pid),
            load_addr,
            output: Some(output),
        })
    }

    pub fn pid(&self) -> Pid {
        self.child.pid()
    }

    /// Request a full stop with SIGSTOP; the stop is reported through the
    /// wait loop like any other.
    pub fn pause(&self) -> Result<(), Error> {
        sys::signal::kill(self.pid(), Signal::SIGSTOP).map_err(|e| Error::Syscall("kill", e))
    }

    /// Deliver SIGKILL and drain every pending wait status.
    pub fn kill(&mut self, hub: &WaitHub) -> Result<(), Error> {
        let pid = self.pid();
        match sys::signal::kill(pid, Signal::SIGKILL) {
            Ok(()) => {}
            Err(nix::errno::Errno::ESRCH) => return Ok(()),
            Err(e) => return Err(Error::Syscall("kill", e)),
        }

        // consume stop reports until the kernel says every tracee is gone
        loop {
            match hub.wait_sync(Pid::from_raw(-1), SYNC_WAIT_DEADLINE) {
                Ok(WaitOutcome::Status(status)) => {
                    debug!(target: "tracer", "draining status after kill: {status:?}");
                    if let nix::sys::wait::WaitStatus::Signaled(spid, _, _) = status {
                        self.tracees.remove(spid);
                        if spid == pid {
                            break;
                        }
                    }
                }
                Ok(WaitOutcome::ProcessGone) | Err(Error::Timeout) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Low address of the first non-anonymous mapping of `pid`.
///
/// Rows with a `[...]` pseudo-label and anonymous mappings are skipped; for a
/// PIE binary the result is the image load address.
pub fn mapping_address(pid: Pid) -> Result<u64, Error> {
    let maps = proc_maps::get_process_maps(pid.as_raw()).map_err(Error::IO)?;
    maps.iter()
        .find(|map| {
            map.filename()
                .map(|f| {
                    let name = f.to_string_lossy();
                    !name.is_empty() && !name.starts_with('[')
                })
                .unwrap_or(false)
        })
        .map(|map| map.start() as u64)
        .ok_or(Error::UnexpectedOptional("no file-backed mapping found"))
}

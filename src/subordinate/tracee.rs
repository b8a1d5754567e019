use crate::address::VirtualAddress;
use crate::error::Error;
use crate::register::{Register, Registers};
use log::warn;
use nix::errno::Errno;
use nix::sys;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::collections::HashMap;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TraceeStatus {
    Stopped,
    Running,
}

/// A single traced thread of the subordinate.
#[derive(Clone, Debug, PartialEq)]
pub struct Tracee {
    pub pid: Pid,
    pub status: TraceeStatus,
    /// Set for threads announced by a clone event whose initial SIGSTOP has
    /// not been consumed yet.
    pub initial_stop_pending: bool,
}

impl Tracee {
    /// Resume execution, optionally delivering a signal.
    pub fn r#continue(&mut self, sig: Option<Signal>) -> Result<(), Error> {
        sys::ptrace::cont(self.pid, sig).map_err(Error::Ptrace)?;
        self.status = TraceeStatus::Running;
        Ok(())
    }

    /// Ask the kernel to execute exactly one instruction.
    ///
    /// The stop is reported through the wait loop, this call does not block.
    pub fn step(&mut self, sig: Option<Signal>) -> Result<(), Error> {
        sys::ptrace::step(self.pid, sig).map_err(Error::Ptrace)?;
        self.status = TraceeStatus::Running;
        Ok(())
    }

    /// Deliver a thread-directed SIGSTOP; the stop report is consumed
    /// through the wait loop by the caller.
    pub fn interrupt(&self, proc_pid: Pid) -> Result<(), Error> {
        let res = unsafe {
            nix::libc::syscall(
                nix::libc::SYS_tgkill,
                proc_pid.as_raw(),
                self.pid.as_raw(),
                nix::libc::SIGSTOP,
            )
        };
        Errno::result(res)
            .map(|_| ())
            .map_err(|e| Error::Syscall("tgkill", e))
    }

    pub fn set_stopped(&mut self) {
        self.status = TraceeStatus::Stopped;
    }

    pub fn is_stopped(&self) -> bool {
        self.status == TraceeStatus::Stopped
    }

    /// Current program counter.
    pub fn pc(&self) -> Result<VirtualAddress, Error> {
        Ok(Registers::capture(self.pid)?.pc())
    }

    /// Rewrite the program counter.
    pub fn set_pc(&self, value: VirtualAddress) -> Result<(), Error> {
        let mut regs = Registers::capture(self.pid)?;
        regs.set(Register::Rip, value.as_u64());
        regs.write_back(self.pid)
    }
}

/// Bookkeeping for all traced threads of one subordinate process.
pub struct TraceeCtl {
    process_pid: Pid,
    threads: HashMap<Pid, Tracee>,
}

impl TraceeCtl {
    pub fn new(proc_pid: Pid) -> Self {
        Self {
            process_pid: proc_pid,
            threads: HashMap::from([(
                proc_pid,
                Tracee {
                    pid: proc_pid,
                    status: TraceeStatus::Stopped,
                    initial_stop_pending: false,
                },
            )]),
        }
    }

    /// Pid of the subordinate main thread.
    pub fn proc_pid(&self) -> Pid {
        self.process_pid
    }

    pub fn tracee(&self, pid: Pid) -> Option<&Tracee> {
        self.threads.get(&pid)
    }

    pub fn tracee_mut(&mut self, pid: Pid) -> Option<&mut Tracee> {
        self.threads.get_mut(&pid)
    }

    pub fn add(&mut self, pid: Pid) -> &mut Tracee {
        self.threads.entry(pid).or_insert(Tracee {
            pid,
            status: TraceeStatus::Stopped,
            initial_stop_pending: false,
        })
    }

    /// Register a thread announced by a clone/fork event; its initial stop
    /// is still in flight.
    pub fn add_cloned(&mut self, pid: Pid) -> &mut Tracee {
        let tracee = self.add(pid);
        tracee.initial_stop_pending = true;
        tracee
    }

    pub fn remove(&mut self, pid: Pid) -> Option<Tracee> {
        self.threads.remove(&pid)
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.threads.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Continue every currently stopped tracee.
    pub fn cont_stopped(&mut self) -> Result<(), Error> {
        for tracee in self.threads.values_mut() {
            if !tracee.is_stopped() {
                continue;
            }
            match tracee.r#continue(None) {
                Ok(()) => {}
                Err(Error::Ptrace(Errno::ESRCH)) => {
                    // thread is gone, it will be reaped on its exit event
                    warn!(target: "tracer", "thread {} not found, ESRCH", tracee.pid);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn mark_all_stopped(&mut self) {
        for tracee in self.threads.values_mut() {
            tracee.set_stopped();
        }
    }
}

//! Stepping: resume-after-breakpoint sequencing, step-into, step-over and
//! step-out.

use crate::address::VirtualAddress;
use crate::breakpoint::Breakpoint;
use crate::controller::ControllerData;
use crate::error::Error;
use crate::subordinate::wait::{WaitHub, WaitOutcome};
use crate::subordinate::SYNC_WAIT_DEADLINE;
use crate::weak_error;
use log::debug;
use nix::sys;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

/// Bound for the step-into single-step loop; a corrupt line table must not
/// hang the controller thread.
const STEP_BUDGET: usize = 50_000;

/// Signals that are delivered to the subordinate without pausing the
/// debugger.
pub(super) const QUIET_SIGNALS: [Signal; 7] = [
    Signal::SIGALRM,
    Signal::SIGURG,
    Signal::SIGCHLD,
    Signal::SIGIO,
    Signal::SIGVTALRM,
    Signal::SIGPROF,
    Signal::SIGWINCH,
];

impl ControllerData {
    /// Execute exactly one machine instruction of `pid` and consume its
    /// trap synchronously through the wait loop.
    pub(super) fn single_step_sync(&mut self, hub: &WaitHub, pid: Pid) -> Result<(), Error> {
        let subordinate = self
            .subordinate
            .as_mut()
            .ok_or(Error::SubordinateNotLaunched)?;
        let tracee = subordinate
            .tracees
            .tracee_mut(pid)
            .ok_or(Error::ProcessDoesNotExist(pid))?;
        tracee.step(None)?;

        loop {
            match hub.wait_sync(pid, SYNC_WAIT_DEADLINE)? {
                WaitOutcome::Status(WaitStatus::Stopped(_, Signal::SIGTRAP)) => {
                    tracee.set_stopped();
                    return Ok(());
                }
                WaitOutcome::Status(WaitStatus::Stopped(_, signal))
                    if QUIET_SIGNALS.contains(&signal) =>
                {
                    // deliver the signal and retry the step
                    sys::ptrace::step(pid, Some(signal)).map_err(Error::Ptrace)?;
                }
                WaitOutcome::Status(WaitStatus::Stopped(_, _signal)) => {
                    // a non-quiet signal interrupted the step; leave it
                    // pending, the tracee is stopped either way
                    tracee.set_stopped();
                    return Ok(());
                }
                WaitOutcome::Status(WaitStatus::PtraceEvent(_, _, _)) => {
                    sys::ptrace::step(pid, None).map_err(Error::Ptrace)?;
                }
                WaitOutcome::Status(WaitStatus::Exited(_, _))
                | WaitOutcome::Status(WaitStatus::Signaled(_, _, _))
                | WaitOutcome::ProcessGone => {
                    return Err(Error::ProcessDoesNotExist(pid));
                }
                WaitOutcome::Status(_) => {
                    sys::ptrace::step(pid, None).map_err(Error::Ptrace)?;
                }
            }
        }
    }

    /// Single-step that survives an installed breakpoint under the PC:
    /// lift the byte, execute the real instruction, patch INT3 back. The
    /// pause-time group stop guarantees no other thread runs through the
    /// disarmed window.
    pub(super) fn step_one(&mut self, hub: &WaitHub, pid: Pid) -> Result<(), Error> {
        let pc = self.current_pc(pid)?;
        let installed = self
            .breakpoints
            .installed_at(pc)
            .map(|b| b.bid);

        match installed {
            Some(bid) => {
                if let Some(bp) = self.breakpoints.get(bid) {
                    bp.disarm(pid)?;
                }
                let step_result = self.single_step_sync(hub, pid);
                if let Some(bp) = self.breakpoints.get(bid) {
                    weak_error!(bp.rearm(pid), "breakpoint re-arm:");
                }
                step_result
            }
            None => self.single_step_sync(hub, pid),
        }
    }

    /// The resume-after-breakpoint sequence: when paused on an installed
    /// INT3, the real instruction must execute once before the subordinate
    /// continues.
    pub(super) fn step_over_breakpoint(&mut self, hub: &WaitHub, pid: Pid) -> Result<(), Error> {
        let pc = self.current_pc(pid)?;
        if self.breakpoints.installed_at(pc).is_some() {
            self.step_one(hub, pid)?;
        }
        Ok(())
    }

    /// Step to the next source line, entering calls.
    pub(super) fn step_into(&mut self, hub: &WaitHub, pid: Pid) -> Result<(), Error> {
        let target = self.target.clone().ok_or(Error::TargetNotLoaded)?;
        let load_addr = self.load_addr()?;

        let start_pc = self.current_pc(pid)?;
        let start_place = target.place_for_pc(start_pc.into_file(load_addr));
        let start_fn = target
            .function_for_pc(start_pc.into_file(load_addr))
            .map(|(_, f)| f.name);

        for _ in 0..STEP_BUDGET {
            self.step_one(hub, pid)?;

            let pc = self.current_pc(pid)?.into_file(load_addr);
            let place = target.place_for_pc(pc);
            let function = target.function_for_pc(pc).map(|(_, f)| f.name);

            let Some(place) = place else {
                // outside the line table (a stub, a libc call), keep going
                continue;
            };
            if place.line == 0 {
                continue;
            }
            if function != start_fn {
                debug!(target: "controller", "step-into entered a new frame");
                return Ok(());
            }
            match start_place {
                Some(start) => {
                    if place.line != start.line || place.file_hash != start.file_hash {
                        return Ok(());
                    }
                }
                None => return Ok(()),
            }
        }
        Err(Error::MaxIterationsReached)
    }

    /// Plant the step-over one-shots: every statement of the current
    /// function plus the return address.
    pub(super) fn plant_step_over(&mut self, hub: &WaitHub, pid: Pid) -> Result<(), Error> {
        let target = self.target.clone().ok_or(Error::TargetNotLoaded)?;
        let load_addr = self.load_addr()?;

        // move off the current trap first so a statement breakpoint on this
        // line re-arms correctly for loops
        self.step_over_breakpoint(hub, pid)?;

        let pc = self.current_pc(pid)?;
        let file_pc = pc.into_file(load_addr);
        let (unit, function) = target
            .function_for_pc(file_pc)
            .ok_or(Error::FunctionNotFound(file_pc))?;

        let mut spots: Vec<VirtualAddress> = unit
            .function_statements(function)
            .iter()
            .map(|s| s.breakpoint_addr.relocate(load_addr))
            .collect();
        if let Some(return_addr) = self.return_address(pid)? {
            spots.push(return_addr);
        }
        self.install_transients(pid, spots.into_iter().filter(|a| *a != pc))
    }

    /// Plant the step-out one-shot at the caller's resume address.
    pub(super) fn plant_step_out(&mut self, hub: &WaitHub, pid: Pid) -> Result<(), Error> {
        self.step_over_breakpoint(hub, pid)?;
        let Some(return_addr) = self.return_address(pid)? else {
            return Err(Error::UnexpectedOptional("no return address to stop at"));
        };
        self.install_transients(pid, std::iter::once(return_addr))
    }

    fn install_transients(
        &mut self,
        pid: Pid,
        spots: impl Iterator<Item = VirtualAddress>,
    ) -> Result<(), Error> {
        for addr in spots {
            // user breakpoints already carry INT3 at their spot
            if self.breakpoints.installed_at(addr).is_some() {
                continue;
            }
            if self.transients.iter().any(|t| t.resolved == Some(addr)) {
                continue;
            }
            let transient = Breakpoint::transient(addr);
            transient.install(pid)?;
            self.transients.push(transient);
        }
        Ok(())
    }

    /// Remove every in-flight one-shot (step completed or abandoned).
    pub(super) fn clear_transients(&mut self) {
        for transient in self.transients.drain(..) {
            weak_error!(transient.uninstall_all(), "one-shot removal:");
        }
    }

    /// Caller PC of the innermost frame, from the unwind tables.
    fn return_address(&mut self, pid: Pid) -> Result<Option<VirtualAddress>, Error> {
        let target = self.target.clone().ok_or(Error::TargetNotLoaded)?;
        let load_addr = self.load_addr()?;
        let registers = crate::register::Registers::capture(pid)?;
        target.unwind.return_address(pid, &registers, load_addr)
    }
}

//! The request/response protocol between the debugger core and its clients.
//!
//! Clients (a GUI, a test driver) submit [`Request`]s onto the controller
//! queue and observe results only through immutable [`StateSnapshot`]s.

use crate::address::VirtualAddress;
use crate::breakpoint::{BreakpointId, BreakpointSpot};
use crate::register::Registers;
use crate::render::ExpressionResult;
use crate::strings::{StringCache, StringHash};
use crate::symbols::SourceRef;
use nix::unistd::Pid;
use std::path::PathBuf;
use std::sync::Arc;

/// Step flavors of [`Request::Step`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepKind {
    Into,
    Over,
    OutOf,
}

/// Breakpoint coordinate in an update request: a new source breakpoint or an
/// existing record to delete.
#[derive(Clone, Copy, Debug)]
pub enum BreakpointLoc {
    Spot(BreakpointSpot),
    Existing(BreakpointId),
}

/// Flags of a wait-loop stop report.
#[derive(Clone, Copy, Debug, Default)]
pub struct StopFlags {
    pub exited: bool,
    pub should_stop_debugger: bool,
}

/// The tagged request set accepted by the controller queue.
#[derive(Debug)]
pub enum Request {
    LoadSymbols {
        path: PathBuf,
    },
    LaunchSubordinate {
        path: PathBuf,
        args: Vec<String>,
        stop_on_entry: bool,
    },
    KillSubordinate,
    Continue,
    Step(StepKind),
    UpdateBreakpoint {
        loc: BreakpointLoc,
    },
    ToggleBreakpoint {
        bid: BreakpointId,
    },
    /// Replace the watched-variable name list.
    UpdateWatches {
        names: Vec<String>,
    },
    /// Internal: synthesized by the wait loop when a tracee reports a status.
    SubordinateStopped {
        pid: Pid,
        flags: StopFlags,
        status: Option<nix::sys::wait::WaitStatus>,
    },
    Quit,
}

/// Loaded-target overview for clients.
#[derive(Clone, Debug)]
pub struct TargetSummary {
    pub path: PathBuf,
    pub pie: bool,
    pub compile_unit_count: usize,
    pub function_count: usize,
}

#[derive(Clone, Debug)]
pub struct BreakpointView {
    pub bid: BreakpointId,
    pub spot: BreakpointSpot,
    pub resolved: Option<VirtualAddress>,
    pub active: bool,
}

/// One unwound stack frame.
#[derive(Clone, Debug)]
pub struct StackFrame {
    /// Function name, interned; `None` outside known functions.
    pub name: Option<StringHash>,
    pub pc: VirtualAddress,
    pub source: Option<SourceRef>,
}

/// Everything gathered at a stop.
#[derive(Clone, Debug)]
pub struct PauseData {
    pub pid: Pid,
    pub registers: Registers,
    pub source: Option<SourceRef>,
    /// Innermost frame first.
    pub stack_frames: Vec<StackFrame>,
    pub locals: Vec<ExpressionResult>,
    pub watches: Vec<ExpressionResult>,
    /// Interned strings referenced by this snapshot.
    pub strings: Arc<StringCache>,
}

#[derive(Clone, Debug, Default)]
pub enum SubordinateState {
    #[default]
    None,
    Running {
        pid: Pid,
    },
    Paused(PauseData),
}

impl SubordinateState {
    pub fn is_paused(&self) -> bool {
        matches!(self, SubordinateState::Paused(_))
    }

    pub fn is_running(&self) -> bool {
        matches!(self, SubordinateState::Running { .. })
    }

    pub fn pause_data(&self) -> Option<&PauseData> {
        match self {
            SubordinateState::Paused(data) => Some(data),
            _ => None,
        }
    }
}

/// Immutable publish of the controller state, cloned under the controller
/// data lock.
#[derive(Clone, Debug, Default)]
pub struct StateSnapshot {
    pub target: Option<TargetSummary>,
    pub breakpoints: Vec<BreakpointView>,
    pub subordinate: SubordinateState,
}

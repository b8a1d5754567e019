use crate::assert_no_proc;
use crate::common::{
    launch, load_target, pause_data, source_hash, start_with_symbols, wait_paused, SPIN,
};
use serial_test::serial;
use spyglass::breakpoint::BreakpointSpot;
use spyglass::protocol::{BreakpointLoc, Request, SubordinateState};
use std::time::Duration;

#[test]
#[serial]
fn run_to_exit_without_breakpoints() {
    let mut debugger = start_with_symbols(crate::common::DESCENT);
    launch(&debugger, crate::common::DESCENT);

    // descent terminates on its own; the controller must fall back to Loaded
    let snapshot = debugger
        .wait_until(Duration::from_secs(10), |s| {
            matches!(s.subordinate, SubordinateState::None)
        })
        .expect("subordinate must exit");
    assert!(snapshot.target.is_some());
    debugger.quit();
}

#[test]
#[serial]
fn breakpoint_on_source_line_hits() {
    let target = load_target(SPIN);
    let file = source_hash(&target, "fixtures/spin.rs");

    let mut debugger = start_with_symbols(SPIN);
    let snapshot = debugger
        .call(Request::UpdateBreakpoint {
            loc: BreakpointLoc::Spot(BreakpointSpot::Source {
                file_hash: file,
                line: 10,
            }),
        })
        .unwrap();
    assert_eq!(snapshot.breakpoints.len(), 1);
    assert!(matches!(snapshot.subordinate, SubordinateState::None));

    launch(&debugger, SPIN);
    let snapshot = wait_paused(&debugger);

    let resolved = snapshot.breakpoints[0]
        .resolved
        .expect("resolved once launched");
    let pause = pause_data(&snapshot);
    assert_eq!(pause.registers.pc(), resolved);
    assert_eq!(pause.source.expect("source place").line, 10);

    let pid = pause.pid;
    debugger.call(Request::KillSubordinate).unwrap();
    assert_no_proc!(pid);
    debugger.quit();
}

#[test]
#[serial]
fn breakpoint_rearms_in_a_loop() {
    let target = load_target(SPIN);
    let file = source_hash(&target, "fixtures/spin.rs");

    let mut debugger = start_with_symbols(SPIN);
    debugger
        .call(Request::UpdateBreakpoint {
            loc: BreakpointLoc::Spot(BreakpointSpot::Source {
                file_hash: file,
                line: 10,
            }),
        })
        .unwrap();
    launch(&debugger, SPIN);

    let first = wait_paused(&debugger);
    let addr = pause_data(&first).registers.pc();

    // the INT3 byte must be re-armed after stepping off the trap
    for _ in 0..3 {
        debugger.call(Request::Continue).unwrap();
        let again = wait_paused(&debugger);
        assert_eq!(pause_data(&again).registers.pc(), addr);
    }

    let pid = pause_data(&first).pid;
    debugger.call(Request::KillSubordinate).unwrap();
    assert_no_proc!(pid);
    debugger.quit();
}

#[test]
#[serial]
fn toggle_delete_and_relaunch() {
    let target = load_target(SPIN);
    let file = source_hash(&target, "fixtures/spin.rs");

    let mut debugger = start_with_symbols(SPIN);
    debugger
        .call(Request::UpdateBreakpoint {
            loc: BreakpointLoc::Spot(BreakpointSpot::Source {
                file_hash: file,
                line: 10,
            }),
        })
        .unwrap();
    launch(&debugger, SPIN);
    let snapshot = wait_paused(&debugger);
    let bid = snapshot.breakpoints[0].bid;

    // toggled off: no hit for at least a second
    debugger.call(Request::ToggleBreakpoint { bid }).unwrap();
    debugger.call(Request::Continue).unwrap();
    assert!(debugger
        .wait_until(Duration::from_secs(1), |s| s.subordinate.is_paused())
        .is_err());

    // toggled back on while running: a new hit arrives
    debugger.call(Request::ToggleBreakpoint { bid }).unwrap();
    let snapshot = wait_paused(&debugger);
    assert_eq!(pause_data(&snapshot).source.unwrap().line, 10);

    // deleted: the record is gone and the loop spins freely
    debugger
        .call(Request::UpdateBreakpoint {
            loc: BreakpointLoc::Existing(bid),
        })
        .unwrap();
    let snapshot = debugger.call(Request::Continue).unwrap();
    assert!(snapshot.breakpoints.is_empty());
    assert!(debugger
        .wait_until(Duration::from_secs(1), |s| s.subordinate.is_paused())
        .is_err());

    // kill and relaunch: launched, not paused
    let pid = match debugger.snapshot().subordinate {
        SubordinateState::Running { pid } => pid,
        other => panic!("expected running subordinate, got {other:?}"),
    };
    debugger.call(Request::KillSubordinate).unwrap();
    assert_no_proc!(pid);

    launch(&debugger, SPIN);
    assert!(debugger
        .wait_until(Duration::from_secs(1), |s| s.subordinate.is_paused())
        .is_err());
    let pid = match debugger.snapshot().subordinate {
        SubordinateState::Running { pid } => pid,
        other => panic!("expected running subordinate, got {other:?}"),
    };
    debugger.call(Request::KillSubordinate).unwrap();
    assert_no_proc!(pid);
    debugger.quit();
}

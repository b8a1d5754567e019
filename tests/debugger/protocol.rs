//! Controller state-machine checks that need no live subordinate.

use crate::common::{init_logs, SPIN};
use serial_test::serial;
use spyglass::error::Error;
use spyglass::protocol::{Request, StepKind, SubordinateState};
use spyglass::Debugger;

#[test]
#[serial]
fn requests_are_rejected_in_the_wrong_phase() {
    init_logs();
    let mut debugger = Debugger::start();

    // nothing is loaded yet
    assert!(matches!(
        debugger.call(Request::LaunchSubordinate {
            path: SPIN.into(),
            args: vec![],
            stop_on_entry: false,
        }),
        Err(Error::TargetNotLoaded)
    ));
    assert!(matches!(
        debugger.call(Request::Continue),
        Err(Error::SubordinateNotPaused)
    ));
    assert!(matches!(
        debugger.call(Request::Step(StepKind::Over)),
        Err(Error::SubordinateNotPaused)
    ));
    assert!(matches!(
        debugger.call(Request::ToggleBreakpoint { bid: 1 }),
        Err(Error::BreakpointNotFound(1))
    ));

    // killing an absent subordinate is a no-op
    let snapshot = debugger.call(Request::KillSubordinate).unwrap();
    assert!(matches!(snapshot.subordinate, SubordinateState::None));

    debugger.quit();
}

#[test]
#[serial]
fn load_failures_leave_state_unchanged() {
    init_logs();
    let mut debugger = Debugger::start();

    assert!(matches!(
        debugger.call(Request::LoadSymbols {
            path: "/no/such/binary".into(),
        }),
        Err(Error::FileNotFound(_))
    ));
    assert!(debugger.snapshot().target.is_none());

    // a readable non-ELF file is rejected by the magic check
    assert!(matches!(
        debugger.call(Request::LoadSymbols {
            path: concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml").into(),
        }),
        Err(Error::InvalidElfMagic)
    ));
    assert!(debugger.snapshot().target.is_none());

    // a good load after the failures still works
    debugger
        .call(Request::LoadSymbols { path: SPIN.into() })
        .unwrap();
    let snapshot = debugger.snapshot();
    let summary = snapshot.target.expect("target is loaded");
    assert!(summary.compile_unit_count >= 1);
    assert!(summary.function_count >= 1);

    debugger.quit();
}

#[test]
#[serial]
fn quit_is_terminal() {
    init_logs();
    let mut debugger = Debugger::start();
    debugger.call(Request::Quit).unwrap();
    // the controller is gone, later calls fail instead of hanging
    assert!(debugger.call(Request::Continue).is_err());
    debugger.quit();
}

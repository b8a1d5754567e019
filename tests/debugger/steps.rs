use crate::assert_no_proc;
use crate::common::{
    frame_names, launch, load_target, pause_data, source_hash, start_with_symbols, wait_paused,
    DESCENT, TWOFILES,
};
use serial_test::serial;
use spyglass::breakpoint::BreakpointSpot;
use spyglass::protocol::{BreakpointLoc, Request, StepKind};

#[test]
#[serial]
fn step_into_out_and_over_across_files() {
    let target = load_target(TWOFILES);
    let main_file = source_hash(&target, "twofiles/main.rs");

    let mut debugger = start_with_symbols(TWOFILES);
    debugger
        .call(Request::UpdateBreakpoint {
            loc: BreakpointLoc::Spot(BreakpointSpot::Source {
                file_hash: main_file,
                line: 4,
            }),
        })
        .unwrap();
    launch(&debugger, TWOFILES);
    let snapshot = wait_paused(&debugger);
    assert_eq!(pause_data(&snapshot).source.unwrap().line, 4);
    let pid = pause_data(&snapshot).pid;

    // into: the next frame is my_func
    let snapshot = debugger.call(Request::Step(StepKind::Into)).unwrap();
    let pause = pause_data(&snapshot);
    assert_eq!(frame_names(pause).first().map(String::as_str), Some("my_func"));

    // out: back in main, still on the call line
    debugger.call(Request::Step(StepKind::OutOf)).unwrap();
    let snapshot = wait_paused(&debugger);
    let pause = pause_data(&snapshot);
    assert_eq!(frame_names(pause).first().map(String::as_str), Some("main"));
    assert_eq!(pause.source.unwrap().line, 4);

    // over: the call completes and the next statement is line 5
    debugger.call(Request::Step(StepKind::Over)).unwrap();
    let snapshot = wait_paused(&debugger);
    let pause = pause_data(&snapshot);
    assert_eq!(frame_names(pause).first().map(String::as_str), Some("main"));
    assert_eq!(pause.source.unwrap().line, 5);

    debugger.call(Request::KillSubordinate).unwrap();
    assert_no_proc!(pid);
    debugger.quit();
}

#[test]
#[serial]
fn step_into_lands_on_breakpointable_line() {
    let target = load_target(TWOFILES);
    let main_file = source_hash(&target, "twofiles/main.rs");
    let second_file = source_hash(&target, "twofiles/second.rs");

    let mut debugger = start_with_symbols(TWOFILES);
    debugger
        .call(Request::UpdateBreakpoint {
            loc: BreakpointLoc::Spot(BreakpointSpot::Source {
                file_hash: main_file,
                line: 4,
            }),
        })
        .unwrap();
    launch(&debugger, TWOFILES);
    wait_paused(&debugger);

    let snapshot = debugger.call(Request::Step(StepKind::Into)).unwrap();
    let pause = pause_data(&snapshot);
    let source = pause.source.expect("stepped into a known place");
    assert_eq!(source.file_hash, second_file);

    let pid = pause.pid;
    debugger.call(Request::KillSubordinate).unwrap();
    assert_no_proc!(pid);
    debugger.quit();
}

#[test]
#[serial]
fn step_over_returns_to_caller() {
    let target = load_target(DESCENT);
    let file = source_hash(&target, "fixtures/descent.rs");

    let mut debugger = start_with_symbols(DESCENT);
    // line 19 is the func_b call inside func_a
    debugger
        .call(Request::UpdateBreakpoint {
            loc: BreakpointLoc::Spot(BreakpointSpot::Source {
                file_hash: file,
                line: 19,
            }),
        })
        .unwrap();
    launch(&debugger, DESCENT);
    let snapshot = wait_paused(&debugger);
    assert_eq!(frame_names(pause_data(&snapshot)).first().map(String::as_str), Some("func_a"));
    let pid = pause_data(&snapshot).pid;

    // first step-over runs func_b to completion, staying in func_a
    debugger.call(Request::Step(StepKind::Over)).unwrap();
    let snapshot = wait_paused(&debugger);
    let pause = pause_data(&snapshot);
    assert_eq!(frame_names(pause).first().map(String::as_str), Some("func_a"));
    assert!(pause.source.unwrap().line > 19);

    // second step-over leaves func_a and lands in main on the call line
    debugger.call(Request::Step(StepKind::Over)).unwrap();
    let snapshot = wait_paused(&debugger);
    let pause = pause_data(&snapshot);
    assert_eq!(frame_names(pause).first().map(String::as_str), Some("main"));
    assert_eq!(pause.source.unwrap().line, 23);

    // one more reaches the statement after the call
    debugger.call(Request::Step(StepKind::Over)).unwrap();
    let snapshot = wait_paused(&debugger);
    let pause = pause_data(&snapshot);
    assert_eq!(pause.source.unwrap().line, 24);
    let total_hash = spyglass::strings::StringCache::hash_of(b"total");
    assert!(pause.locals.iter().any(|l| l.name == total_hash));

    debugger.call(Request::KillSubordinate).unwrap();
    assert_no_proc!(pid);
    debugger.quit();
}

#[test]
#[serial]
fn step_out_of_deep_call() {
    let target = load_target(DESCENT);
    let file = source_hash(&target, "fixtures/descent.rs");

    let mut debugger = start_with_symbols(DESCENT);
    debugger
        .call(Request::UpdateBreakpoint {
            loc: BreakpointLoc::Spot(BreakpointSpot::Source {
                file_hash: file,
                line: 2,
            }),
        })
        .unwrap();
    launch(&debugger, DESCENT);
    let snapshot = wait_paused(&debugger);
    assert_eq!(frame_names(pause_data(&snapshot)).first().map(String::as_str), Some("func_e"));
    let pid = pause_data(&snapshot).pid;

    debugger.call(Request::Step(StepKind::OutOf)).unwrap();
    let snapshot = wait_paused(&debugger);
    assert_eq!(
        frame_names(pause_data(&snapshot)).first().map(String::as_str),
        Some("func_d")
    );

    debugger.call(Request::KillSubordinate).unwrap();
    assert_no_proc!(pid);
    debugger.quit();
}

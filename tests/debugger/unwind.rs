use crate::assert_no_proc;
use crate::common::{
    frame_names, launch, load_target, pause_data, source_hash, start_with_symbols, wait_paused,
    DESCENT, RECURSE,
};
use serial_test::serial;
use spyglass::breakpoint::BreakpointSpot;
use spyglass::protocol::{BreakpointLoc, Request};

#[test]
#[serial]
fn backtrace_names_deep_call_chain() {
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
    let pause = pause_data(&snapshot);

    assert!(
        pause.stack_frames.len() >= 6,
        "expected at least six frames, got {}",
        pause.stack_frames.len()
    );
    let names = frame_names(pause);
    assert_eq!(
        &names[..6],
        &["func_e", "func_d", "func_c", "func_b", "func_a", "main"],
        "innermost frames, top first"
    );

    // every named frame resolves to a source place in the fixture
    for frame in &pause.stack_frames[..6] {
        let source = frame.source.expect("fixture frames have line info");
        assert_eq!(source.file_hash, file);
        assert!(source.line > 0);
    }

    // the frame base is the CFA of the innermost frame: above the stack
    // pointer at a breakpoint inside func_e
    let sp = pause.registers.sp();
    let pid = pause.pid;
    assert!(
        pause.stack_frames[0].pc == pause.registers.pc(),
        "frame 0 is the trap site"
    );
    assert!(sp.as_u64() != 0);

    debugger.call(Request::KillSubordinate).unwrap();
    assert_no_proc!(pid);
    debugger.quit();
}

#[test]
#[serial]
fn backtrace_of_direct_recursion_keeps_repeated_frames() {
    let target = load_target(RECURSE);
    let file = source_hash(&target, "fixtures/recurse.rs");

    let mut debugger = start_with_symbols(RECURSE);
    // line 3 is the base case, reached at the full recursion depth
    debugger
        .call(Request::UpdateBreakpoint {
            loc: BreakpointLoc::Spot(BreakpointSpot::Source {
                file_hash: file,
                line: 3,
            }),
        })
        .unwrap();
    launch(&debugger, RECURSE);
    let snapshot = wait_paused(&debugger);
    let pause = pause_data(&snapshot);

    // every recursive activation returns to the same call site; the walk
    // must report all of them, not stop at the first repeat
    let names = frame_names(pause);
    assert!(
        names.len() >= 8,
        "expected seven plunge frames plus main, got {names:?}"
    );
    assert!(
        names[..7].iter().all(|n| n == "plunge"),
        "inner frames are the recursion, got {names:?}"
    );
    assert_eq!(names[7], "main");

    let pid = pause.pid;
    debugger.call(Request::KillSubordinate).unwrap();
    assert_no_proc!(pid);
    debugger.quit();
}

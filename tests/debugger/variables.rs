use crate::assert_no_proc;
use crate::common::{
    field_bytes, launch, load_target, local, pause_data, source_hash, start_with_symbols,
    wait_paused, MENAGERIE,
};
use serial_test::serial;
use spyglass::breakpoint::BreakpointSpot;
use spyglass::protocol::{BreakpointLoc, Request};
use spyglass::render::ValueEncoding;
use spyglass::strings::StringCache;

/// Pause menagerie at line 38, after every interesting local is initialized.
fn pause_menagerie(debugger: &spyglass::Debugger) -> spyglass::protocol::StateSnapshot {
    launch(debugger, MENAGERIE);
    wait_paused(debugger)
}

fn setup() -> (spyglass::Debugger, spyglass::protocol::StateSnapshot) {
    let target = load_target(MENAGERIE);
    let file = source_hash(&target, "fixtures/menagerie.rs");
    let debugger = start_with_symbols(MENAGERIE);
    debugger
        .call(Request::UpdateBreakpoint {
            loc: BreakpointLoc::Spot(BreakpointSpot::Source {
                file_hash: file,
                line: 38,
            }),
        })
        .unwrap();
    let snapshot = pause_menagerie(&debugger);
    (debugger, snapshot)
}

fn finish(mut debugger: spyglass::Debugger, snapshot: &spyglass::protocol::StateSnapshot) {
    let pid = pause_data(snapshot).pid;
    debugger.call(Request::KillSubordinate).unwrap();
    assert_no_proc!(pid);
    debugger.quit();
}

#[test]
#[serial]
fn locals_are_enumerated() {
    let (debugger, snapshot) = setup();
    let pause = pause_data(&snapshot);
    assert_eq!(pause.locals.len(), 15, "all of main's locals are visible");
    finish(debugger, &snapshot);
}

#[test]
#[serial]
fn primitive_locals_decode() {
    let (debugger, snapshot) = setup();
    let pause = pause_data(&snapshot);

    let c = local(pause, "c");
    assert!(matches!(
        c.root().unwrap().encoding,
        ValueEncoding::Primitive(spyglass::symbols::types::PrimitiveKind::Signed)
    ));
    let bytes = field_bytes(pause, c, 0);
    assert_eq!(i32::from_le_bytes(bytes.try_into().unwrap()), 3);

    let big = field_bytes(pause, local(pause, "big"), 0);
    assert_eq!(i64::from_le_bytes(big.try_into().unwrap()), -4_000_000_000);

    let unsigned = field_bytes(pause, local(pause, "unsigned"), 0);
    assert_eq!(
        u64::from_le_bytes(unsigned.try_into().unwrap()),
        12_345_678_901
    );

    let flag = local(pause, "flag");
    assert!(matches!(
        flag.root().unwrap().encoding,
        ValueEncoding::Primitive(spyglass::symbols::types::PrimitiveKind::Boolean)
    ));
    assert_eq!(field_bytes(pause, flag, 0), vec![1]);

    let ratio = field_bytes(pause, local(pause, "ratio"), 0);
    assert_eq!(f64::from_le_bytes(ratio.try_into().unwrap()), 0.5);

    finish(debugger, &snapshot);
}

#[test]
#[serial]
fn char_array_decodes_as_text() {
    let (debugger, snapshot) = setup();
    let pause = pause_data(&snapshot);

    let text = local(pause, "basic_text");
    assert!(matches!(
        text.root().unwrap().encoding,
        ValueEncoding::Primitive(spyglass::symbols::types::PrimitiveKind::String)
    ));
    assert_eq!(field_bytes(pause, text, 0), b"Hello, world!".to_vec());

    finish(debugger, &snapshot);
}

#[test]
#[serial]
fn opaque_pointer_has_address_but_no_data() {
    let (debugger, snapshot) = setup();
    let pause = pause_data(&snapshot);

    let opaque = local(pause, "opaque").root().unwrap().clone();
    assert!(opaque.data.is_none(), "an opaque pointee carries no bytes");
    match opaque.encoding {
        ValueEncoding::Pointer { target, .. } => assert_ne!(target, 0),
        other => panic!("expected a pointer encoding, got {other:?}"),
    }
    assert!(opaque.address.is_some_and(|a| a != 0));

    finish(debugger, &snapshot);
}

#[test]
#[serial]
fn enums_match_their_declared_names() {
    let (debugger, snapshot) = setup();
    let pause = pause_data(&snapshot);

    let mood = local(pause, "mood");
    match &mood.root().unwrap().encoding {
        ValueEncoding::Enum { value, name } => {
            assert_eq!(*value, -1);
            let name = name.and_then(|n| pause.strings.get_string(n));
            assert_eq!(name.as_deref(), Some("Negative"));
        }
        other => panic!("expected an enum encoding, got {other:?}"),
    }

    let closing = local(pause, "closing");
    match &closing.root().unwrap().encoding {
        ValueEncoding::Enum { value, name } => {
            assert_eq!(*value, 100);
            let name = name.and_then(|n| pause.strings.get_string(n));
            assert_eq!(name.as_deref(), Some("Final"));
        }
        other => panic!("expected an enum encoding, got {other:?}"),
    }

    finish(debugger, &snapshot);
}

#[test]
#[serial]
fn float_array_elements_decode() {
    let (debugger, snapshot) = setup();
    let pause = pause_data(&snapshot);

    let arr = local(pause, "arr");
    let elements = match &arr.root().unwrap().encoding {
        ValueEncoding::Array { elements } => elements.clone(),
        other => panic!("expected an array encoding, got {other:?}"),
    };
    assert_eq!(elements.len(), 14);

    let float_at = |i: usize| {
        let bytes = field_bytes(pause, arr, elements[i]);
        f32::from_le_bytes(bytes.try_into().unwrap())
    };
    assert_eq!(float_at(0), 1.25);
    assert_eq!(float_at(3), 0.0);
    assert_eq!(float_at(13), 7.5);

    finish(debugger, &snapshot);
}

#[test]
#[serial]
fn u32_array_elements_decode() {
    let (debugger, snapshot) = setup();
    let pause = pause_data(&snapshot);

    let counts = local(pause, "counts");
    let elements = match &counts.root().unwrap().encoding {
        ValueEncoding::Array { elements } => elements.clone(),
        other => panic!("expected an array encoding, got {other:?}"),
    };
    assert_eq!(elements.len(), 5);
    for (i, element) in elements.iter().enumerate() {
        let bytes = field_bytes(pause, counts, *element);
        assert_eq!(bytes, vec![b'1' + i as u8, 0, 0, 0]);
    }

    finish(debugger, &snapshot);
}

#[test]
#[serial]
fn struct_members_decode() {
    let (debugger, snapshot) = setup();
    let pause = pause_data(&snapshot);

    let pair = local(pause, "pair");
    let members = match &pair.root().unwrap().encoding {
        ValueEncoding::Struct { members } => members.clone(),
        other => panic!("expected a struct encoding, got {other:?}"),
    };
    assert_eq!(members.len(), 2);

    let field_a_hash = StringCache::hash_of(b"field_a");
    let field_a = members
        .iter()
        .find(|m| pair.fields[**m].name == Some(field_a_hash))
        .expect("field_a present");
    let bytes = field_bytes(pause, pair, *field_a);
    assert_eq!(i32::from_le_bytes(bytes.try_into().unwrap()), 123);

    let field_b_hash = StringCache::hash_of(b"field_b");
    let field_b = members
        .iter()
        .find(|m| pair.fields[**m].name == Some(field_b_hash))
        .expect("field_b present");
    assert_eq!(field_bytes(pause, pair, *field_b), b"this is field_b".to_vec());

    finish(debugger, &snapshot);
}

#[test]
#[serial]
fn watches_follow_locals() {
    let target = load_target(MENAGERIE);
    let file = source_hash(&target, "fixtures/menagerie.rs");
    let debugger = start_with_symbols(MENAGERIE);
    debugger.set_watches(vec!["c".into(), "no_such_variable".into()]);
    debugger
        .call(Request::UpdateBreakpoint {
            loc: BreakpointLoc::Spot(BreakpointSpot::Source {
                file_hash: file,
                line: 38,
            }),
        })
        .unwrap();
    let snapshot = pause_menagerie(&debugger);
    let pause = pause_data(&snapshot);

    assert_eq!(pause.watches.len(), 2);
    let c = &pause.watches[0];
    assert_eq!(
        i32::from_le_bytes(field_bytes(pause, c, 0).try_into().unwrap()),
        3
    );
    // unknown names render as unavailable rather than failing the pause
    assert!(matches!(
        pause.watches[1].root().unwrap().encoding,
        ValueEncoding::Unknown
    ));

    finish(debugger, &snapshot);
}

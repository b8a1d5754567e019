use crate::common::{load_target, source_hash, DESCENT, SPIN, TWOFILES};
use spyglass::address::FileAddress;
use spyglass::strings::StringCache;
use std::collections::HashSet;

#[test]
fn fixture_loads_with_units() {
    let target = load_target(SPIN);
    assert!(!target.compile_units.is_empty());
    assert!(target.pie, "cargo fixtures are position independent");
    assert_eq!(target.address_size, 8);
    assert!(!target.data_types.is_empty());
}

#[test]
fn own_test_binary_loads() {
    // the test runner itself is an ELF with DWARF in it
    let exe = std::env::current_exe().unwrap();
    let target =
        spyglass::symbols::Target::load(&exe, std::sync::Arc::new(StringCache::new())).unwrap();
    assert!(!target.compile_units.is_empty());
}

#[test]
fn unit_ranges_are_sorted_and_disjoint() {
    for fixture in [SPIN, DESCENT, TWOFILES] {
        let target = load_target(fixture);
        for unit in &target.compile_units {
            for pair in unit.ranges.windows(2) {
                assert!(pair[0].begin <= pair[1].begin, "ranges must be sorted");
                assert!(pair[0].end <= pair[1].begin, "ranges must not overlap");
            }
            for function in &unit.functions {
                for pair in function.ranges.windows(2) {
                    assert!(pair[0].begin <= pair[1].begin);
                }
            }
        }
    }
}

#[test]
fn statements_are_unique_per_file() {
    let target = load_target(DESCENT);
    for unit in &target.compile_units {
        for file in &unit.source_files {
            let mut seen = HashSet::new();
            for statement in &file.statements {
                assert!(
                    seen.insert(statement.breakpoint_addr),
                    "breakpoint addresses must be unique within a file"
                );
            }
            for pair in file.statements.windows(2) {
                assert!(pair[0].line <= pair[1].line, "statements sorted by line");
            }
        }
    }
}

#[test]
fn functions_cover_their_statements() {
    let target = load_target(DESCENT);
    for unit in &target.compile_units {
        for function in &unit.functions {
            for statement in unit.function_statements(function) {
                assert!(statement.breakpoint_addr.in_ranges(&function.ranges));
            }
        }
    }
}

#[test]
fn source_line_resolution() {
    let target = load_target(SPIN);
    let file = source_hash(&target, "fixtures/spin.rs");

    // line 10 is `count = tick(count);` inside the loop
    let exact = target.resolve_source(file, 10).expect("line 10 resolves");
    // a coordinate on a blank line slides forward to the next statement
    let slid = target.resolve_source(file, 6).expect("line 6 slides forward");
    assert!(slid <= exact);
    // far beyond the file there is nothing left
    assert_eq!(target.resolve_source(file, 10_000), None);
    // unknown files resolve to nothing
    assert_eq!(target.resolve_source(0xDEAD_BEEF, 1), None);
}

#[test]
fn pc_queries_are_consistent() {
    let target = load_target(DESCENT);
    for unit in &target.compile_units {
        for function in &unit.functions {
            let Some(range) = function.ranges.first() else {
                continue;
            };
            let pc = FileAddress::from(range.begin);
            let (_, found) = target
                .function_for_pc(pc)
                .expect("function start must map to the function");
            assert_eq!(found.name, function.name);
        }
    }
}

#[test]
fn text_symbols_back_dwarf_functions() {
    let target = load_target(DESCENT);
    assert!(!target.symbols.is_empty());

    // symtab and DWARF agree wherever both know the address
    let func_e_hash = StringCache::hash_of(b"func_e");
    let function = target
        .compile_units
        .iter()
        .flat_map(|cu| cu.functions.iter())
        .find(|f| f.name == func_e_hash)
        .expect("func_e is in the model");
    let entry = FileAddress::from(function.ranges[0].begin);
    let symbol = target
        .symbols
        .find_by_pc(entry)
        .expect("func_e has a text symbol");
    let symbol_name = target.strings.get_string(symbol.name).unwrap();
    assert!(symbol_name.contains("func_e"), "got `{symbol_name}`");

    // name_for_pc prefers the DWARF name
    assert_eq!(target.name_for_pc(entry), Some(func_e_hash));
}

#[test]
fn fixture_files_are_discoverable() {
    let target = load_target(TWOFILES);
    let main_hash = source_hash(&target, "twofiles/main.rs");
    let second_hash = source_hash(&target, "twofiles/second.rs");
    assert_ne!(main_hash, second_hash);
    assert!(target.knows_file(main_hash));
    assert!(target.knows_file(second_hash));
}

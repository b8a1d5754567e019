use spyglass::controller::Debugger;
use spyglass::protocol::{PauseData, Request, StateSnapshot};
use spyglass::render::ExpressionResult;
use spyglass::strings::{StringCache, StringHash};
use spyglass::symbols::Target;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const SPIN: &str = env!("CARGO_BIN_EXE_spin");
pub const MENAGERIE: &str = env!("CARGO_BIN_EXE_menagerie");
pub const DESCENT: &str = env!("CARGO_BIN_EXE_descent");
pub const RECURSE: &str = env!("CARGO_BIN_EXE_recurse");
pub const TWOFILES: &str = env!("CARGO_BIN_EXE_twofiles");

pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Load fixture symbols directly, bypassing the controller; used to find
/// interned source-file hashes for breakpoint requests.
pub fn load_target(path: &str) -> Target {
    init_logs();
    Target::load(Path::new(path), Arc::new(StringCache::new()))
        .expect("fixture symbols must load")
}

/// Hash of the (absolute) fixture source path ending with `suffix`.
///
/// Hashes are content addressed, so a hash computed in one cache matches the
/// controller's cache.
pub fn source_hash(target: &Target, suffix: &str) -> StringHash {
    for unit in &target.compile_units {
        for file in &unit.source_files {
            if let Some(path) = target.strings.get_string(file.path_hash) {
                if path.ends_with(suffix) {
                    return file.path_hash;
                }
            }
        }
    }
    panic!("fixture source {suffix} not found in debug information");
}

pub fn start_with_symbols(path: &str) -> Debugger {
    init_logs();
    let debugger = Debugger::start();
    debugger
        .call(Request::LoadSymbols { path: path.into() })
        .expect("symbols must load");
    debugger
}

pub fn launch(debugger: &Debugger, path: &str) {
    debugger
        .call(Request::LaunchSubordinate {
            path: path.into(),
            args: vec![],
            stop_on_entry: false,
        })
        .expect("subordinate must launch");
}

pub fn wait_paused(debugger: &Debugger) -> StateSnapshot {
    debugger
        .wait_until(Duration::from_secs(10), |s| s.subordinate.is_paused())
        .expect("subordinate must pause")
}

pub fn pause_data(snapshot: &StateSnapshot) -> &PauseData {
    snapshot
        .subordinate
        .pause_data()
        .expect("snapshot must be paused")
}

pub fn local<'a>(pause: &'a PauseData, name: &str) -> &'a ExpressionResult {
    let hash = StringCache::hash_of(name.as_bytes());
    pause
        .locals
        .iter()
        .find(|l| l.name == hash)
        .unwrap_or_else(|| panic!("local `{name}` missing"))
}

/// Raw bytes of a rendered field.
pub fn field_bytes(pause: &PauseData, result: &ExpressionResult, field: usize) -> Vec<u8> {
    let hash = result.fields[field]
        .data
        .unwrap_or_else(|| panic!("field {field} carries no data"));
    pause
        .strings
        .get(hash)
        .expect("interned data must resolve")
        .to_vec()
}

pub fn frame_names(pause: &PauseData) -> Vec<String> {
    pause
        .stack_frames
        .iter()
        .filter_map(|f| f.name.and_then(|n| pause.strings.get_string(n)))
        .collect()
}

#[macro_export]
macro_rules! assert_no_proc {
    ($pid:expr) => {
        let sys = sysinfo::System::new_with_specifics(
            sysinfo::RefreshKind::everything()
                .without_cpu()
                .without_memory(),
        );
        assert!(
            sysinfo::System::process(&sys, sysinfo::Pid::from_u32($pid.as_raw() as u32)).is_none()
        )
    };
}

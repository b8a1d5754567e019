//! Adapter-level checks driven from a single thread, which therefore owns
//! both the spawn and every ptrace call for its tracee.

use crate::assert_no_proc;
use crate::common::SPIN;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;
use serial_test::serial;
use spyglass::breakpoint::{BreakpointRegistry, BreakpointSpot, INT3};
use spyglass::register::Registers;
use spyglass::subordinate::memory;
use spyglass::subordinate::process::Child;

fn spawn_stopped() -> nix::unistd::Pid {
    let (template, _pipes) = Child::new(SPIN, Vec::<String>::new()).expect("pipes");
    let child = template.install().expect("spawn under trace");
    child.pid()
}

fn kill_and_reap(pid: nix::unistd::Pid) {
    let _ = kill(pid, Signal::SIGKILL);
    let _ = waitpid(pid, None);
    assert_no_proc!(pid);
}

#[test]
#[serial]
fn peek_poke_roundtrip() {
    let pid = spawn_stopped();
    let base = Registers::capture(pid).expect("registers").pc().as_u64();

    // any length at any alignment must round-trip unchanged
    for (offset, len) in [(0_u64, 1_usize), (1, 7), (3, 13), (5, 64)] {
        let addr = base + offset;
        let mut first = vec![0_u8; len];
        memory::peek_data(pid, addr, &mut first).expect("peek");
        memory::poke_data(pid, addr, &first).expect("poke");
        let mut second = vec![0_u8; len];
        memory::peek_data(pid, addr, &mut second).expect("re-peek");
        assert_eq!(first, second, "offset {offset} len {len}");
    }

    kill_and_reap(pid);
}

#[test]
#[serial]
fn poke_is_visible_and_reversible() {
    let pid = spawn_stopped();
    let addr = Registers::capture(pid).expect("registers").pc().as_u64();

    let original = memory::peek_byte(pid, addr).expect("peek byte");
    memory::poke_byte(pid, addr, original ^ 0xFF).expect("poke byte");
    assert_eq!(
        memory::peek_byte(pid, addr).expect("peek byte"),
        original ^ 0xFF
    );
    memory::poke_byte(pid, addr, original).expect("restore byte");
    assert_eq!(memory::peek_byte(pid, addr).expect("peek byte"), original);

    kill_and_reap(pid);
}

#[test]
#[serial]
fn breakpoint_saves_and_restores_instruction_byte() {
    let pid = spawn_stopped();
    let addr = Registers::capture(pid).expect("registers").pc();

    let original = memory::peek_byte(pid, addr.as_u64()).expect("peek");

    let mut registry = BreakpointRegistry::default();
    let bid = registry.add(BreakpointSpot::Address(addr));
    let breakpoint = registry.get(bid).unwrap();

    breakpoint.install(pid).expect("install");
    assert!(breakpoint.is_installed());
    assert!(breakpoint.is_installed_for(pid));
    assert_eq!(breakpoint.saved_byte(pid), Some(original));
    assert_eq!(memory::peek_byte(pid, addr.as_u64()).unwrap(), INT3);

    // dropping the only thread record restores the instruction byte
    breakpoint.uninstall(pid).expect("uninstall");
    assert!(!breakpoint.is_installed());
    assert_eq!(memory::peek_byte(pid, addr.as_u64()).unwrap(), original);

    kill_and_reap(pid);
}

#[test]
#[serial]
fn registers_write_back() {
    let pid = spawn_stopped();

    let mut registers = Registers::capture(pid).expect("registers");
    let pc = registers.pc();
    registers.set(spyglass::register::Register::R15, 0x1234_5678);
    registers.write_back(pid).expect("setregs");

    let reread = Registers::capture(pid).expect("registers");
    assert_eq!(reread.value(spyglass::register::Register::R15), 0x1234_5678);
    assert_eq!(reread.pc(), pc);

    kill_and_reap(pid);
}

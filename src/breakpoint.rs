//! Software breakpoints: INT3 byte patching and source-coordinate
//! resolution.

use crate::address::VirtualAddress;
use crate::error::Error;
use crate::strings::StringHash;
use crate::subordinate::memory;
use crate::symbols::Target;
use indexmap::IndexMap;
use log::debug;
use nix::unistd::Pid;
use std::cell::RefCell;
use std::collections::HashMap;

/// x86 software-interrupt instruction byte.
pub const INT3: u8 = 0xCC;

pub type BreakpointId = u32;

/// Where a breakpoint was requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakpointSpot {
    Source { file_hash: StringHash, line: u64 },
    Address(VirtualAddress),
}

/// Per-thread installation record: the instruction byte the INT3 replaced,
/// as seen by that thread.
#[derive(Clone, Copy)]
struct ThreadBreakpoint {
    saved_byte: u8,
}

/// A user breakpoint record.
///
/// Invariant: the byte at `resolved` is [`INT3`] exactly while at least one
/// thread record exists, and every record's `saved_byte` is the instruction
/// byte that lived there before installation.
pub struct Breakpoint {
    pub bid: BreakpointId,
    pub spot: BreakpointSpot,
    pub resolved: Option<VirtualAddress>,
    /// User-facing toggle state; an inactive breakpoint keeps its record.
    pub active: bool,
    threads: RefCell<HashMap<Pid, ThreadBreakpoint>>,
}

impl Breakpoint {
    fn new(bid: BreakpointId, spot: BreakpointSpot) -> Self {
        Self {
            bid,
            spot,
            resolved: match spot {
                BreakpointSpot::Address(addr) => Some(addr),
                BreakpointSpot::Source { .. } => None,
            },
            active: true,
            threads: RefCell::new(HashMap::new()),
        }
    }

    /// A one-shot breakpoint owned by the stepping machinery; it never shows
    /// up in the registry.
    pub(crate) fn transient(addr: VirtualAddress) -> Self {
        Self::new(0, BreakpointSpot::Address(addr))
    }

    /// Installed on any thread.
    pub fn is_installed(&self) -> bool {
        !self.threads.borrow().is_empty()
    }

    pub fn is_installed_for(&self, pid: Pid) -> bool {
        self.threads.borrow().contains_key(&pid)
    }

    /// The instruction byte recorded for `pid`, if installed there.
    pub fn saved_byte(&self, pid: Pid) -> Option<u8> {
        self.threads.borrow().get(&pid).map(|t| t.saved_byte)
    }

    fn addr(&self) -> Result<VirtualAddress, Error> {
        self.resolved
            .ok_or(Error::UnexpectedOptional("breakpoint is not resolved"))
    }

    /// Install for one thread: the first record saves the instruction byte
    /// and patches INT3, later threads of the shared address space only add
    /// their record.
    pub fn install(&self, pid: Pid) -> Result<(), Error> {
        let mut threads = self.threads.borrow_mut();
        if threads.contains_key(&pid) {
            return Ok(());
        }
        let addr = self.addr()?;
        let current = memory::peek_byte(pid, addr.as_u64())?;
        let saved_byte = if current == INT3 {
            match threads.values().next() {
                // address already patched on behalf of another thread
                Some(existing) => existing.saved_byte,
                // a breakpoint on a literal INT3 instruction
                None => current,
            }
        } else {
            memory::poke_byte(pid, addr.as_u64(), INT3)?;
            current
        };
        threads.insert(pid, ThreadBreakpoint { saved_byte });
        debug!(target: "breakpoint", "installed {} at {addr} for {pid}", self.bid);
        Ok(())
    }

    /// Drop one thread's record; the byte is restored when the last record
    /// goes away.
    pub fn uninstall(&self, pid: Pid) -> Result<(), Error> {
        let mut threads = self.threads.borrow_mut();
        let Some(record) = threads.remove(&pid) else {
            return Ok(());
        };
        if threads.is_empty() {
            let addr = self.addr()?;
            memory::poke_byte(pid, addr.as_u64(), record.saved_byte)?;
            debug!(target: "breakpoint", "uninstalled {} at {addr}", self.bid);
        }
        Ok(())
    }

    /// Drop every thread record and restore the instruction byte.
    pub fn uninstall_all(&self) -> Result<(), Error> {
        let mut threads = self.threads.borrow_mut();
        if threads.is_empty() {
            return Ok(());
        }
        let addr = self.addr()?;
        let mut result = Err(Error::UnexpectedOptional("no thread reachable for restore"));
        for (pid, record) in threads.iter() {
            result = memory::poke_byte(*pid, addr.as_u64(), record.saved_byte);
            if result.is_ok() {
                break;
            }
        }
        threads.clear();
        debug!(target: "breakpoint", "uninstalled {} at {addr}", self.bid);
        result
    }

    /// Temporarily lift the INT3 byte so the original instruction can
    /// execute; thread records stay in place.
    pub(crate) fn disarm(&self, pid: Pid) -> Result<(), Error> {
        let threads = self.threads.borrow();
        let Some(record) = threads.get(&pid).or_else(|| threads.values().next()) else {
            return Ok(());
        };
        memory::poke_byte(pid, self.addr()?.as_u64(), record.saved_byte)
    }

    /// Patch the INT3 byte back after [`Breakpoint::disarm`].
    pub(crate) fn rearm(&self, pid: Pid) -> Result<(), Error> {
        if !self.is_installed() {
            return Ok(());
        }
        memory::poke_byte(pid, self.addr()?.as_u64(), INT3)
    }

    /// Forget installation state without touching memory (subordinate gone).
    fn forget_threads(&self) {
        self.threads.borrow_mut().clear();
    }
}

/// All user breakpoints, in creation order.
#[derive(Default)]
pub struct BreakpointRegistry {
    next_bid: BreakpointId,
    breakpoints: IndexMap<BreakpointId, Breakpoint>,
}

impl BreakpointRegistry {
    /// Create a breakpoint record; resolution happens separately.
    pub fn add(&mut self, spot: BreakpointSpot) -> BreakpointId {
        self.next_bid += 1;
        let bid = self.next_bid;
        self.breakpoints.insert(bid, Breakpoint::new(bid, spot));
        bid
    }

    pub fn remove(&mut self, bid: BreakpointId) -> Option<Breakpoint> {
        self.breakpoints.shift_remove(&bid)
    }

    pub fn get(&self, bid: BreakpointId) -> Option<&Breakpoint> {
        self.breakpoints.get(&bid)
    }

    pub fn get_mut(&mut self, bid: BreakpointId) -> Option<&mut Breakpoint> {
        self.breakpoints.get_mut(&bid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    /// The installed breakpoint covering `addr`, if any.
    pub fn installed_at(&self, addr: VirtualAddress) -> Option<&Breakpoint> {
        self.breakpoints
            .values()
            .find(|b| b.is_installed() && b.resolved == Some(addr))
    }

    /// Resolve every source breakpoint against a loaded target.
    ///
    /// Resolution picks the first statement of the file whose line is >= the
    /// requested line, smallest breakpoint address first, and relocates it by
    /// the subordinate load address.
    pub fn resolve_all(&mut self, target: &Target, load_addr: u64) {
        for breakpoint in self.breakpoints.values_mut() {
            if breakpoint.resolved.is_some() {
                continue;
            }
            if let BreakpointSpot::Source { file_hash, line } = breakpoint.spot {
                breakpoint.resolved = target
                    .resolve_source(file_hash, line)
                    .map(|file_addr| file_addr.relocate(load_addr));
            }
        }
    }

    /// Forget resolution and installation state (subordinate went away).
    pub fn clear_runtime_state(&mut self) {
        for breakpoint in self.breakpoints.values_mut() {
            if matches!(breakpoint.spot, BreakpointSpot::Source { .. }) {
                breakpoint.resolved = None;
            }
            breakpoint.forget_threads();
        }
    }
}

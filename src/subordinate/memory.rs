//! Word-granular access to subordinate memory.
//!
//! `PTRACE_PEEKDATA`/`PTRACE_POKEDATA` move whole machine words at aligned
//! addresses. These wrappers accept buffers of any length at any alignment:
//! reads copy the overlapping part of each touched word, writes do a
//! read-modify-write on the partial leading and trailing words.

use crate::error::Error;
use nix::errno::Errno;
use nix::sys;
use nix::sys::ptrace::AddressType;
use nix::unistd::Pid;
use std::ffi::c_long;
use std::mem;

const WORD: u64 = mem::size_of::<c_long>() as u64;

fn map_ptrace_err(pid: Pid, e: Errno) -> Error {
    if e == Errno::ESRCH {
        Error::ProcessDoesNotExist(pid)
    } else {
        Error::Ptrace(e)
    }
}

fn peek_word(pid: Pid, addr: u64) -> Result<u64, Error> {
    crate::subordinate::assert_adapter_thread();
    let word = sys::ptrace::read(pid, addr as AddressType).map_err(|e| map_ptrace_err(pid, e))?;
    Ok(word as u64)
}

fn poke_word(pid: Pid, addr: u64, word: u64) -> Result<(), Error> {
    crate::subordinate::assert_adapter_thread();
    unsafe {
        sys::ptrace::write(pid, addr as AddressType, word as *mut _)
            .map_err(|e| map_ptrace_err(pid, e))
    }
}

/// Read `dst.len()` bytes of subordinate memory starting at `addr`.
pub fn peek_data(pid: Pid, addr: u64, dst: &mut [u8]) -> Result<(), Error> {
    if dst.is_empty() {
        return Ok(());
    }

    let mut word_addr = addr & !(WORD - 1);
    let mut written = 0_usize;
    while written < dst.len() {
        let word = peek_word(pid, word_addr)?.to_le_bytes();
        // intersection of [word_addr, word_addr + WORD) with the request
        let lead = (addr + written as u64 - word_addr) as usize;
        let take = usize::min(WORD as usize - lead, dst.len() - written);
        dst[written..written + take].copy_from_slice(&word[lead..lead + take]);
        written += take;
        word_addr += WORD;
    }
    Ok(())
}

/// Write `src` into subordinate memory starting at `addr`.
///
/// The subordinate must be stopped: partial words are rewritten with a
/// read-modify-write, a running tracee could observe the intermediate state.
pub fn poke_data(pid: Pid, addr: u64, src: &[u8]) -> Result<(), Error> {
    if src.is_empty() {
        return Ok(());
    }

    let mut word_addr = addr & !(WORD - 1);
    let mut taken = 0_usize;
    while taken < src.len() {
        let lead = (addr + taken as u64 - word_addr) as usize;
        let take = usize::min(WORD as usize - lead, src.len() - taken);

        let word = if lead == 0 && take == WORD as usize {
            // full interior word, no merge needed
            let mut bytes = [0_u8; WORD as usize];
            bytes.copy_from_slice(&src[taken..taken + take]);
            u64::from_le_bytes(bytes)
        } else {
            let mut bytes = peek_word(pid, word_addr)?.to_le_bytes();
            bytes[lead..lead + take].copy_from_slice(&src[taken..taken + take]);
            u64::from_le_bytes(bytes)
        };
        poke_word(pid, word_addr, word)?;

        taken += take;
        word_addr += WORD;
    }
    Ok(())
}

/// Read one byte of subordinate memory.
pub fn peek_byte(pid: Pid, addr: u64) -> Result<u8, Error> {
    let mut byte = [0_u8; 1];
    peek_data(pid, addr, &mut byte)?;
    Ok(byte[0])
}

/// Overwrite one byte of subordinate memory, preserving the rest of the word.
pub fn poke_byte(pid: Pid, addr: u64, byte: u8) -> Result<(), Error> {
    poke_data(pid, addr, &[byte])
}

/// Read a little-endian u64 from subordinate memory.
pub fn peek_u64(pid: Pid, addr: u64) -> Result<u64, Error> {
    let mut bytes = [0_u8; 8];
    peek_data(pid, addr, &mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

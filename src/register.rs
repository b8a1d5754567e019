use crate::address::VirtualAddress;
use crate::error::Error;
use nix::libc::user_regs_struct;
use nix::sys;
use nix::unistd::Pid;
use smallvec::{smallvec, SmallVec};
use strum_macros::{Display, EnumString};

/// x86-64 general purpose registers visible through `NT_PRSTATUS`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Register {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rdi,
    Rsi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Rip,
    Eflags,
    Cs,
    OrigRax,
    FsBase,
    GsBase,
    Fs,
    Gs,
    Ss,
    Ds,
    Es,
}

/// Snapshot of a tracee register file.
#[derive(Clone, Copy, Debug)]
pub struct Registers {
    regs: user_regs_struct,
}

impl Registers {
    /// Capture current register values of a stopped tracee.
    pub fn capture(pid: Pid) -> Result<Self, Error> {
        crate::subordinate::assert_adapter_thread();
        let regs = sys::ptrace::getregs(pid).map_err(Error::Ptrace)?;
        Ok(Self { regs })
    }

    /// Write the snapshot back into a stopped tracee.
    pub fn write_back(&self, pid: Pid) -> Result<(), Error> {
        crate::subordinate::assert_adapter_thread();
        sys::ptrace::setregs(pid, self.regs).map_err(Error::Ptrace)
    }

    pub fn value(&self, register: Register) -> u64 {
        let r = &self.regs;
        match register {
            Register::Rax => r.rax,
            Register::Rbx => r.rbx,
            Register::Rcx => r.rcx,
            Register::Rdx => r.rdx,
            Register::Rdi => r.rdi,
            Register::Rsi => r.rsi,
            Register::Rbp => r.rbp,
            Register::Rsp => r.rsp,
            Register::R8 => r.r8,
            Register::R9 => r.r9,
            Register::R10 => r.r10,
            Register::R11 => r.r11,
            Register::R12 => r.r12,
            Register::R13 => r.r13,
            Register::R14 => r.r14,
            Register::R15 => r.r15,
            Register::Rip => r.rip,
            Register::Eflags => r.eflags,
            Register::Cs => r.cs,
            Register::OrigRax => r.orig_rax,
            Register::FsBase => r.fs_base,
            Register::GsBase => r.gs_base,
            Register::Fs => r.fs,
            Register::Gs => r.gs,
            Register::Ss => r.ss,
            Register::Ds => r.ds,
            Register::Es => r.es,
        }
    }

    pub fn set(&mut self, register: Register, value: u64) {
        let r = &mut self.regs;
        match register {
            Register::Rax => r.rax = value,
            Register::Rbx => r.rbx = value,
            Register::Rcx => r.rcx = value,
            Register::Rdx => r.rdx = value,
            Register::Rdi => r.rdi = value,
            Register::Rsi => r.rsi = value,
            Register::Rbp => r.rbp = value,
            Register::Rsp => r.rsp = value,
            Register::R8 => r.r8 = value,
            Register::R9 => r.r9 = value,
            Register::R10 => r.r10 = value,
            Register::R11 => r.r11 = value,
            Register::R12 => r.r12 = value,
            Register::R13 => r.r13 = value,
            Register::R14 => r.r14 = value,
            Register::R15 => r.r15 = value,
            Register::Rip => r.rip = value,
            Register::Eflags => r.eflags = value,
            Register::Cs => r.cs = value,
            Register::OrigRax => r.orig_rax = value,
            Register::FsBase => r.fs_base = value,
            Register::GsBase => r.gs_base = value,
            Register::Fs => r.fs = value,
            Register::Gs => r.gs = value,
            Register::Ss => r.ss = value,
            Register::Ds => r.ds = value,
            Register::Es => r.es = value,
        }
    }

    #[inline(always)]
    pub fn pc(&self) -> VirtualAddress {
        VirtualAddress::from(self.regs.rip)
    }

    #[inline(always)]
    pub fn sp(&self) -> VirtualAddress {
        VirtualAddress::from(self.regs.rsp)
    }
}

/// Register file keyed by DWARF register numbers (System V x86-64 numbering).
#[derive(Debug, Clone)]
pub struct DwarfRegisters(SmallVec<[Option<u64>; 0x80]>);

impl DwarfRegisters {
    pub fn value(&self, register: gimli::Register) -> Result<u64, Error> {
        self.0
            .get(register.0 as usize)
            .copied()
            .flatten()
            .ok_or(Error::RegisterNotFound(register.0))
    }

    pub fn update(&mut self, register: gimli::Register, value: u64) {
        let idx = register.0 as usize;
        if idx < self.0.len() {
            self.0[idx] = Some(value);
        }
    }

    pub fn forget(&mut self, register: gimli::Register) {
        let idx = register.0 as usize;
        if idx < self.0.len() {
            self.0[idx] = None;
        }
    }

    pub fn pc(&self) -> Result<VirtualAddress, Error> {
        self.value(gimli::X86_64::RA).map(VirtualAddress::from)
    }

    pub fn set_pc(&mut self, pc: VirtualAddress) {
        self.update(gimli::X86_64::RA, pc.as_u64());
    }

    /// An empty register file; useful for expression evaluation outside a
    /// live process.
    pub fn empty() -> Self {
        DwarfRegisters(smallvec![None; 0x80])
    }
}

/// Mapping of machine registers to the DWARF numbering.
impl From<&Registers> for DwarfRegisters {
    fn from(map: &Registers) -> Self {
        let mut dwarf_map: SmallVec<[Option<u64>; 0x80]> = smallvec![None; 0x80];
        dwarf_map[0] = Some(map.value(Register::Rax));
        dwarf_map[1] = Some(map.value(Register::Rdx));
        dwarf_map[2] = Some(map.value(Register::Rcx));
        dwarf_map[3] = Some(map.value(Register::Rbx));
        dwarf_map[4] = Some(map.value(Register::Rsi));
        dwarf_map[5] = Some(map.value(Register::Rdi));
        dwarf_map[6] = Some(map.value(Register::Rbp));
        dwarf_map[7] = Some(map.value(Register::Rsp));
        dwarf_map[8] = Some(map.value(Register::R8));
        dwarf_map[9] = Some(map.value(Register::R9));
        dwarf_map[10] = Some(map.value(Register::R10));
        dwarf_map[11] = Some(map.value(Register::R11));
        dwarf_map[12] = Some(map.value(Register::R12));
        dwarf_map[13] = Some(map.value(Register::R13));
        dwarf_map[14] = Some(map.value(Register::R14));
        dwarf_map[15] = Some(map.value(Register::R15));
        dwarf_map[16] = Some(map.value(Register::Rip));
        dwarf_map[49] = Some(map.value(Register::Eflags));
        dwarf_map[50] = Some(map.value(Register::Es));
        dwarf_map[51] = Some(map.value(Register::Cs));
        dwarf_map[52] = Some(map.value(Register::Ss));
        dwarf_map[53] = Some(map.value(Register::Ds));
        dwarf_map[54] = Some(map.value(Register::Fs));
        dwarf_map[55] = Some(map.value(Register::Gs));
        dwarf_map[58] = Some(map.value(Register::FsBase));
        dwarf_map[59] = Some(map.value(Register::GsBase));
        DwarfRegisters(dwarf_map)
    }
}

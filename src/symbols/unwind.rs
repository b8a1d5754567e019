//! Call-frame-information driven stack unwinding.
//!
//! `.eh_frame` is consulted first, `.debug_frame` is the fallback. Register
//! recovery follows the unwind-table row covering the PC: the CFA rule gives
//! the frame base, register rules restore the caller's registers, the
//! return-address register yields the caller PC.

use crate::address::VirtualAddress;
use crate::error::Error;
use crate::register::{DwarfRegisters, Registers};
use crate::subordinate::memory;
use crate::weak_error;
use gimli::{
    BaseAddresses, CfaRule, DebugFrame, EhFrame, RegisterRule, UnwindSection, UnwindTableRow,
};
use log::warn;
use nix::unistd::Pid;

use super::EndianArcSlice;

/// Parsed CIE/FDE tables of one image.
pub struct UnwindTables {
    eh_frame: Option<EhFrame<EndianArcSlice>>,
    debug_frame: Option<DebugFrame<EndianArcSlice>>,
    bases: BaseAddresses,
}

/// Result of a stack walk.
#[derive(Debug, Clone)]
pub struct StackWalk {
    /// Frame PCs, innermost first.
    pub frames: Vec<VirtualAddress>,
    /// CFA of the innermost frame; null when no FDE covered the PC.
    pub frame_base: VirtualAddress,
}

impl UnwindTables {
    pub fn new(
        eh_frame: Option<EhFrame<EndianArcSlice>>,
        debug_frame: Option<DebugFrame<EndianArcSlice>>,
        bases: BaseAddresses,
    ) -> Self {
        Self {
            eh_frame,
            debug_frame,
            bases,
        }
    }

    /// Unwind-table row and return-address register for a file-space PC.
    fn row_for(
        &self,
        file_pc: u64,
    ) -> Result<Option<(UnwindTableRow<EndianArcSlice>, gimli::Register)>, Error> {
        if let Some(ref eh_frame) = self.eh_frame {
            let mut ctx = Box::new(gimli::UnwindContext::new());
            match eh_frame.fde_for_address(&self.bases, file_pc, EhFrame::cie_from_offset) {
                Ok(fde) => {
                    let row =
                        fde.unwind_info_for_address(eh_frame, &self.bases, &mut ctx, file_pc)?;
                    return Ok(Some((row.clone(), fde.cie().return_address_register())));
                }
                Err(gimli::Error::NoUnwindInfoForAddress) => {}
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(ref debug_frame) = self.debug_frame {
            let mut ctx = Box::new(gimli::UnwindContext::new());
            match debug_frame.fde_for_address(&self.bases, file_pc, DebugFrame::cie_from_offset) {
                Ok(fde) => {
                    let row =
                        fde.unwind_info_for_address(debug_frame, &self.bases, &mut ctx, file_pc)?;
                    return Ok(Some((row.clone(), fde.cie().return_address_register())));
                }
                Err(gimli::Error::NoUnwindInfoForAddress) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    fn eval_cfa(
        row: &UnwindTableRow<EndianArcSlice>,
        registers: &DwarfRegisters,
    ) -> Result<Option<u64>, Error> {
        match row.cfa() {
            CfaRule::RegisterAndOffset { register, offset } => {
                let base = registers.value(*register)?;
                Ok(Some(base.wrapping_add_signed(*offset)))
            }
            CfaRule::Expression(_) => {
                warn!(target: "unwind", "CFA expressions are not supported");
                Ok(None)
            }
        }
    }

    /// CFA of the frame containing `registers`' PC.
    pub fn cfa(
        &self,
        registers: &DwarfRegisters,
        load_addr: u64,
    ) -> Result<Option<VirtualAddress>, Error> {
        let pc = registers.pc()?;
        let Some((row, _)) = self.row_for(pc.into_file(load_addr).as_u64())? else {
            return Ok(None);
        };
        Ok(Self::eval_cfa(&row, registers)?.map(VirtualAddress::from))
    }

    /// Restore the caller frame: rewrite `registers` in place and return the
    /// caller PC and this frame's CFA. `None` when the walk cannot continue.
    fn step_frame(
        &self,
        pid: Pid,
        registers: &mut DwarfRegisters,
        load_addr: u64,
    ) -> Result<Option<(VirtualAddress, VirtualAddress)>, Error> {
        let pc = registers.pc()?;
        let Some((row, ra_register)) = self.row_for(pc.into_file(load_addr).as_u64())? else {
            return Ok(None);
        };
        let Some(cfa) = Self::eval_cfa(&row, registers)? else {
            return Ok(None);
        };

        let snapshot = registers.clone();
        for (register, rule) in row.registers() {
            let value = match rule {
                RegisterRule::Undefined => {
                    registers.forget(*register);
                    continue;
                }
                RegisterRule::SameValue => continue,
                RegisterRule::Offset(offset) => {
                    let addr = cfa.wrapping_add_signed(*offset);
                    match memory::peek_u64(pid, addr) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(target: "unwind", "register restore read failed: {e:#}");
                            registers.forget(*register);
                            continue;
                        }
                    }
                }
                RegisterRule::ValOffset(offset) => cfa.wrapping_add_signed(*offset),
                RegisterRule::Register(source) => match weak_error!(snapshot.value(*source)) {
                    Some(v) => v,
                    None => {
                        registers.forget(*register);
                        continue;
                    }
                },
                RegisterRule::Constant(value) => *value,
                RegisterRule::Expression(_) | RegisterRule::ValExpression(_) => {
                    warn!(target: "unwind", "register rule expressions are not supported");
                    registers.forget(*register);
                    continue;
                }
                _ => continue,
            };
            registers.update(*register, value);
        }

        let Ok(ra) = registers.value(ra_register) else {
            return Ok(None);
        };
        let ra = VirtualAddress::from(ra);

        // the caller resumes with its stack pointer at the CFA
        registers.update(gimli::X86_64::RSP, cfa);
        registers.set_pc(ra);
        Ok(Some((ra, VirtualAddress::from(cfa))))
    }

    /// Walk the stack of a paused thread.
    ///
    /// Stops when the return address is null, falls below the load address,
    /// no FDE covers the PC, or `max_depth` is reached (`None` means
    /// unbounded). Recursive frames repeat the same return address and must
    /// all be reported.
    pub fn walk(
        &self,
        pid: Pid,
        registers: &Registers,
        load_addr: u64,
        max_depth: Option<usize>,
    ) -> Result<StackWalk, Error> {
        let mut regs = DwarfRegisters::from(registers);
        let mut frames = vec![registers.pc()];
        let mut frame_base = VirtualAddress::default();

        loop {
            if max_depth.map(|d| frames.len() >= d).unwrap_or(false) {
                break;
            }
            match self.step_frame(pid, &mut regs, load_addr)? {
                None => break,
                Some((ra, cfa)) => {
                    if frames.len() == 1 {
                        frame_base = cfa;
                    }
                    if ra.is_null() || ra.as_u64() < load_addr {
                        break;
                    }
                    frames.push(ra);
                }
            }
        }

        Ok(StackWalk { frames, frame_base })
    }

    /// Return address of the innermost frame of a paused thread.
    pub fn return_address(
        &self,
        pid: Pid,
        registers: &Registers,
        load_addr: u64,
    ) -> Result<Option<VirtualAddress>, Error> {
        let mut regs = DwarfRegisters::from(registers);
        Ok(self
            .step_frame(pid, &mut regs, load_addr)?
            .map(|(ra, _)| ra)
            .filter(|ra| !ra.is_null() && ra.as_u64() >= load_addr))
    }
}

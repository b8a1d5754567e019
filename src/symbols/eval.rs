//! Location-expression evaluator.
//!
//! A small stack machine over variable-width byte buffers. Deref-class
//! opcodes read subordinate memory immediately, so the completed result is
//! the variable's bytes rather than a location description; the address the
//! bytes came from rides along for the renderer.
//!
//! Width rule: arithmetic and comparison opcodes require both operands to
//! have the same byte length (1, 2, 4 or 8), values are read as signed
//! little-endian integers, computed in i64 and written back in the operand
//! width. Logical `shr` treats the value as unsigned, `shra` as signed.

use crate::error::Error;
use crate::error::Error::InvalidLocationExpression;
use crate::register::DwarfRegisters;
use crate::subordinate::memory;
use bytes::Bytes;
use gimli::constants as dw;
use gimli::{EndianSlice, LittleEndian, Reader};
use nix::unistd::Pid;
use smallvec::SmallVec;

/// Context one expression program runs in.
pub struct EvalContext<'a> {
    pub pid: Pid,
    pub registers: &'a DwarfRegisters,
    pub load_addr: u64,
    /// How many bytes deref-class opcodes read.
    pub variable_size: usize,
    /// CFA of the frame the expression belongs to.
    pub frame_base: Option<u64>,
    /// The owning function's frame-base program, used by `fbreg`.
    pub frame_base_expr: Option<&'a [u8]>,
}

/// Completed evaluation: the top stack buffer and, when it was read from
/// subordinate memory, the address it came from.
#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub data: Bytes,
    pub address: Option<u64>,
}

impl EvalOutcome {
    pub fn as_u64(&self) -> u64 {
        let mut bytes = [0_u8; 8];
        let n = self.data.len().min(8);
        bytes[..n].copy_from_slice(&self.data[..n]);
        u64::from_le_bytes(bytes)
    }
}

#[derive(Clone)]
struct Slot {
    bytes: SmallVec<[u8; 8]>,
    address: Option<u64>,
}

impl Slot {
    fn value(value: u64, width: usize) -> Self {
        let mut bytes: SmallVec<[u8; 8]> = SmallVec::new();
        bytes.extend_from_slice(&value.to_le_bytes()[..width]);
        Slot {
            bytes,
            address: None,
        }
    }

    fn width(&self) -> usize {
        self.bytes.len()
    }

    /// Signed little-endian read in the slot width.
    fn as_int(&self) -> Result<i64, Error> {
        let v = match self.bytes.as_slice() {
            [a] => *a as i8 as i64,
            [a, b] => i16::from_le_bytes([*a, *b]) as i64,
            bytes @ [_, _, _, _] => {
                i32::from_le_bytes(bytes.try_into().expect("width checked")) as i64
            }
            bytes @ [_, _, _, _, _, _, _, _] => {
                i64::from_le_bytes(bytes.try_into().expect("width checked"))
            }
            _ => return Err(InvalidLocationExpression("unsupported operand width")),
        };
        Ok(v)
    }

    fn as_uint(&self) -> Result<u64, Error> {
        let mut bytes = [0_u8; 8];
        match self.bytes.len() {
            1 | 2 | 4 | 8 => bytes[..self.bytes.len()].copy_from_slice(&self.bytes),
            _ => return Err(InvalidLocationExpression("unsupported operand width")),
        }
        Ok(u64::from_le_bytes(bytes))
    }
}

struct Machine<'a> {
    ctx: &'a EvalContext<'a>,
    stack: Vec<Slot>,
}

/// Evaluate a location expression program.
pub fn evaluate(ctx: &EvalContext, expr: &[u8]) -> Result<EvalOutcome, Error> {
    if expr.is_empty() {
        return Err(InvalidLocationExpression("empty program"));
    }
    let mut machine = Machine { ctx, stack: vec![] };
    machine.run(expr)?;
    let top = machine
        .stack
        .pop()
        .ok_or(InvalidLocationExpression("program left an empty stack"))?;
    Ok(EvalOutcome {
        data: Bytes::copy_from_slice(&top.bytes),
        address: top.address,
    })
}

impl<'a> Machine<'a> {
    fn push(&mut self, slot: Slot) {
        self.stack.push(slot);
    }

    fn pop(&mut self) -> Result<Slot, Error> {
        self.stack
            .pop()
            .ok_or(InvalidLocationExpression("operand needed on empty stack"))
    }

    fn peek_memory(&self, addr: u64) -> Result<Slot, Error> {
        let mut bytes: SmallVec<[u8; 8]> = SmallVec::new();
        bytes.resize(self.ctx.variable_size, 0);
        memory::peek_data(self.ctx.pid, addr, &mut bytes)?;
        Ok(Slot {
            bytes,
            address: Some(addr),
        })
    }

    /// The frame base for `fbreg`: evaluate the function's frame-base
    /// program when present (with load address 0, registers already carry
    /// relocation), otherwise take the CFA directly.
    fn frame_base(&self) -> Result<u64, Error> {
        if let Some(expr) = self.ctx.frame_base_expr {
            let sub_ctx = EvalContext {
                pid: self.ctx.pid,
                registers: self.ctx.registers,
                load_addr: 0,
                variable_size: self.ctx.variable_size,
                frame_base: self.ctx.frame_base,
                frame_base_expr: None,
            };
            return Ok(evaluate(&sub_ctx, expr)?.as_u64());
        }
        self.ctx
            .frame_base
            .ok_or(Error::UnexpectedOptional("no frame base in context"))
    }

    fn binary_int_op(&mut self, f: impl FnOnce(i64, i64) -> Result<i64, Error>) -> Result<(), Error> {
        let top = self.pop()?;
        let second = self.pop()?;
        if top.width() != second.width() {
            return Err(InvalidLocationExpression("operand width mismatch"));
        }
        let width = top.width();
        let result = f(second.as_int()?, top.as_int()?)?;
        self.push(Slot::value(result as u64, width));
        Ok(())
    }

    fn compare_op(&mut self, f: impl FnOnce(i64, i64) -> bool) -> Result<(), Error> {
        let top = self.pop()?;
        let second = self.pop()?;
        if top.width() != second.width() {
            return Err(InvalidLocationExpression("operand width mismatch"));
        }
        let width = top.width();
        let result = u64::from(f(second.as_int()?, top.as_int()?));
        self.push(Slot::value(result, width));
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn run(&mut self, expr: &[u8]) -> Result<(), Error> {
        let base = EndianSlice::new(expr, LittleEndian);
        let mut r = base;

        // backward branches are legal, bound the program so a degenerate
        // loop cannot stall the controller thread
        let mut budget = 0x10000;
        while !r.is_empty() {
            budget -= 1;
            if budget == 0 {
                return Err(Error::MaxIterationsReached);
            }
            let opcode = dw::DwOp(r.read_u8()?);
            match opcode {
                dw::DW_OP_addr => {
                    let addr = r.read_u64()?;
                    let slot = self.peek_memory(self.ctx.load_addr.wrapping_add(addr))?;
                    self.push(slot);
                }
                dw::DW_OP_deref => {
                    let addr = self.pop()?.as_uint()?;
                    let slot = self.peek_memory(addr)?;
                    self.push(slot);
                }
                dw::DW_OP_const1u => {
                    let v = r.read_u8()? as u64;
                    self.push(Slot::value(v, 1));
                }
                dw::DW_OP_const1s => {
                    let v = r.read_i8()? as u64;
                    self.push(Slot::value(v, 1));
                }
                dw::DW_OP_const2u => {
                    let v = r.read_u16()? as u64;
                    self.push(Slot::value(v, 2));
                }
                dw::DW_OP_const2s => {
                    let v = r.read_i16()? as u64;
                    self.push(Slot::value(v, 2));
                }
                dw::DW_OP_const4u => {
                    let v = r.read_u32()? as u64;
                    self.push(Slot::value(v, 4));
                }
                dw::DW_OP_const4s => {
                    let v = r.read_i32()? as u64;
                    self.push(Slot::value(v, 4));
                }
                dw::DW_OP_const8u => {
                    let v = r.read_u64()?;
                    self.push(Slot::value(v, 8));
                }
                dw::DW_OP_const8s => {
                    let v = r.read_i64()? as u64;
                    self.push(Slot::value(v, 8));
                }
                dw::DW_OP_constu => {
                    let v = r.read_uleb128()?;
                    self.push(Slot::value(v, 8));
                }
                dw::DW_OP_consts => {
                    let v = r.read_sleb128()? as u64;
                    self.push(Slot::value(v, 8));
                }
                dw::DW_OP_fbreg => {
                    let offset = r.read_sleb128()?;
                    let fb = self.frame_base()?;
                    let addr = fb.wrapping_add_signed(offset);
                    let slot = self.peek_memory(addr)?;
                    self.push(slot);
                }
                dw::DW_OP_call_frame_cfa => {
                    let fb = self
                        .ctx
                        .frame_base
                        .ok_or(Error::UnexpectedOptional("no frame base in context"))?;
                    self.push(Slot::value(fb, 8));
                }
                dw::DW_OP_dup => {
                    let top = self.pop()?;
                    self.push(top.clone());
                    self.push(top);
                }
                dw::DW_OP_drop => {
                    self.pop()?;
                }
                dw::DW_OP_over => {
                    let second = self
                        .stack
                        .len()
                        .checked_sub(2)
                        .and_then(|i| self.stack.get(i))
                        .cloned()
                        .ok_or(InvalidLocationExpression("operand needed on empty stack"))?;
                    self.push(second);
                }
                dw::DW_OP_pick => {
                    let index = r.read_u8()? as usize;
                    let slot = self
                        .stack
                        .len()
                        .checked_sub(index + 1)
                        .and_then(|i| self.stack.get(i))
                        .cloned()
                        .ok_or(InvalidLocationExpression("pick beyond stack depth"))?;
                    self.push(slot);
                }
                dw::DW_OP_swap => {
                    let a = self.pop()?;
                    let b = self.pop()?;
                    self.push(a);
                    self.push(b);
                }
                dw::DW_OP_rot => {
                    let a = self.pop()?;
                    let b = self.pop()?;
                    let c = self.pop()?;
                    self.push(a);
                    self.push(c);
                    self.push(b);
                }
                dw::DW_OP_abs => {
                    let top = self.pop()?;
                    let width = top.width();
                    self.push(Slot::value(top.as_int()?.wrapping_abs() as u64, width));
                }
                dw::DW_OP_neg => {
                    let top = self.pop()?;
                    let width = top.width();
                    self.push(Slot::value(top.as_int()?.wrapping_neg() as u64, width));
                }
                dw::DW_OP_not => {
                    let top = self.pop()?;
                    let width = top.width();
                    self.push(Slot::value(!top.as_int()? as u64, width));
                }
                dw::DW_OP_and => self.binary_int_op(|a, b| Ok(a & b))?,
                dw::DW_OP_or => self.binary_int_op(|a, b| Ok(a | b))?,
                dw::DW_OP_xor => self.binary_int_op(|a, b| Ok(a ^ b))?,
                dw::DW_OP_plus => self.binary_int_op(|a, b| Ok(a.wrapping_add(b)))?,
                dw::DW_OP_minus => self.binary_int_op(|a, b| Ok(a.wrapping_sub(b)))?,
                dw::DW_OP_mul => self.binary_int_op(|a, b| Ok(a.wrapping_mul(b)))?,
                dw::DW_OP_div => self.binary_int_op(|a, b| {
                    if b == 0 {
                        Err(Error::UnexpectedValue("division by zero"))
                    } else {
                        Ok(a.wrapping_div(b))
                    }
                })?,
                dw::DW_OP_mod => self.binary_int_op(|a, b| {
                    if b == 0 {
                        Err(Error::UnexpectedValue("division by zero"))
                    } else {
                        Ok(a.wrapping_rem(b))
                    }
                })?,
                dw::DW_OP_plus_uconst => {
                    let addend = r.read_uleb128()?;
                    let top = self.pop()?;
                    let width = top.width();
                    let v = top.as_int()?.wrapping_add(addend as i64);
                    self.push(Slot::value(v as u64, width));
                }
                dw::DW_OP_shl => {
                    let amount = self.pop()?.as_uint()?;
                    let value = self.pop()?;
                    let width = value.width();
                    let v = if amount >= 64 {
                        0
                    } else {
                        (value.as_uint()?) << amount
                    };
                    self.push(Slot::value(v, width));
                }
                dw::DW_OP_shr => {
                    let amount = self.pop()?.as_uint()?;
                    let value = self.pop()?;
                    let width = value.width();
                    let v = if amount >= 64 {
                        0
                    } else {
                        (value.as_uint()?) >> amount
                    };
                    self.push(Slot::value(v, width));
                }
                dw::DW_OP_shra => {
                    let amount = self.pop()?.as_uint()?;
                    let value = self.pop()?;
                    let width = value.width();
                    let v = if amount >= 64 {
                        if value.as_int()? < 0 {
                            -1_i64
                        } else {
                            0
                        }
                    } else {
                        value.as_int()? >> amount
                    };
                    self.push(Slot::value(v as u64, width));
                }
                dw::DW_OP_eq => self.compare_op(|a, b| a == b)?,
                dw::DW_OP_ne => self.compare_op(|a, b| a != b)?,
                dw::DW_OP_ge => self.compare_op(|a, b| a >= b)?,
                dw::DW_OP_gt => self.compare_op(|a, b| a > b)?,
                dw::DW_OP_le => self.compare_op(|a, b| a <= b)?,
                dw::DW_OP_lt => self.compare_op(|a, b| a < b)?,
                dw::DW_OP_bra => {
                    let distance = r.read_i16()? as i64;
                    let taken = self.pop()?.bytes.iter().any(|b| *b != 0);
                    if taken {
                        let pos = base.len() as i64 - r.len() as i64;
                        let next = pos + distance;
                        if next < 0 || next > base.len() as i64 {
                            return Err(InvalidLocationExpression("branch out of program"));
                        }
                        r = base.range_from(next as usize..);
                    }
                }
                dw::DW_OP_skip => {
                    let distance = r.read_i16()? as i64;
                    let pos = base.len() as i64 - r.len() as i64;
                    let next = pos + distance;
                    if next < 0 || next > base.len() as i64 {
                        return Err(InvalidLocationExpression("branch out of program"));
                    }
                    r = base.range_from(next as usize..);
                }
                dw::DW_OP_nop => {}
                _ => {
                    let code = opcode.0;
                    if (dw::DW_OP_lit0.0..=dw::DW_OP_lit31.0).contains(&code) {
                        self.push(Slot::value((code - dw::DW_OP_lit0.0) as u64, 8));
                    } else if (dw::DW_OP_reg0.0..=dw::DW_OP_reg31.0).contains(&code) {
                        let reg = gimli::Register((code - dw::DW_OP_reg0.0) as u16);
                        let value = self.ctx.registers.value(reg)?;
                        self.push(Slot::value(value, 8));
                    } else if (dw::DW_OP_breg0.0..=dw::DW_OP_breg31.0).contains(&code) {
                        let reg = gimli::Register((code - dw::DW_OP_breg0.0) as u16);
                        let offset = r.read_sleb128()?;
                        let addr = self.ctx.registers.value(reg)?.wrapping_add_signed(offset);
                        let slot = self.peek_memory(addr)?;
                        self.push(slot);
                    } else {
                        return Err(InvalidLocationExpression("unknown opcode"));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gimli::constants as dw;

    fn ctx<'a>(registers: &'a DwarfRegisters) -> EvalContext<'a> {
        EvalContext {
            pid: Pid::from_raw(0),
            registers,
            load_addr: 0,
            variable_size: 8,
            frame_base: None,
            frame_base_expr: None,
        }
    }

    fn eval(program: &[u8]) -> Result<EvalOutcome, Error> {
        let regs = DwarfRegisters::empty();
        evaluate(&ctx(&regs), program)
    }

    fn eval_ok(program: &[u8]) -> EvalOutcome {
        eval(program).expect("evaluation must succeed")
    }

    #[test]
    fn empty_program_is_invalid() {
        assert!(matches!(
            eval(&[]),
            Err(Error::InvalidLocationExpression("empty program"))
        ));
    }

    #[test]
    fn literals_and_plus() {
        let out = eval_ok(&[dw::DW_OP_lit5.0, dw::DW_OP_lit3.0, dw::DW_OP_plus.0]);
        assert_eq!(out.as_u64(), 8);
        assert_eq!(out.data.len(), 8);
    }

    #[test]
    fn width_preserved_across_arithmetic() {
        // widths 1/2/4/8 all compute in i64 and write back in-width
        for (program, width, expected) in [
            (
                vec![dw::DW_OP_const1s.0, 0xFE, dw::DW_OP_const1u.0, 5, dw::DW_OP_plus.0],
                1,
                3_i64,
            ),
            (
                vec![dw::DW_OP_const2s.0, 0x00, 0x80, dw::DW_OP_const2u.0, 1, 0, dw::DW_OP_minus.0],
                2,
                -32769_i64 as i16 as i64, // wraps in width
            ),
            (
                vec![dw::DW_OP_const4u.0, 10, 0, 0, 0, dw::DW_OP_const4u.0, 7, 0, 0, 0, dw::DW_OP_mul.0],
                4,
                70_i64,
            ),
            (
                vec![
                    dw::DW_OP_const8s.0,
                    0xF6,
                    0xFF,
                    0xFF,
                    0xFF,
                    0xFF,
                    0xFF,
                    0xFF,
                    0xFF,
                    dw::DW_OP_const8s.0,
                    3,
                    0,
                    0,
                    0,
                    0,
                    0,
                    0,
                    0,
                    dw::DW_OP_div.0,
                ],
                8,
                -3_i64,
            ),
        ] {
            let out = eval_ok(&program);
            assert_eq!(out.data.len(), width, "program {program:?}");
            let mut bytes = [0_u8; 8];
            bytes[..width].copy_from_slice(&out.data);
            // sign-extend for comparison
            let got = match width {
                1 => bytes[0] as i8 as i64,
                2 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
                4 => i32::from_le_bytes(bytes[..4].try_into().unwrap()) as i64,
                _ => i64::from_le_bytes(bytes),
            };
            assert_eq!(got, expected, "program {program:?}");
        }
    }

    #[test]
    fn width_mismatch_is_rejected() {
        let program = [dw::DW_OP_const1u.0, 1, dw::DW_OP_const2u.0, 1, 0, dw::DW_OP_plus.0];
        assert!(matches!(
            eval(&program),
            Err(Error::InvalidLocationExpression("operand width mismatch"))
        ));
    }

    #[test]
    fn dup_then_drop_is_noop() {
        let out = eval_ok(&[dw::DW_OP_lit17.0, dw::DW_OP_dup.0, dw::DW_OP_drop.0]);
        assert_eq!(out.as_u64(), 17);
    }

    #[test]
    fn swap_twice_is_identity() {
        let out = eval_ok(&[
            dw::DW_OP_lit1.0,
            dw::DW_OP_lit2.0,
            dw::DW_OP_swap.0,
            dw::DW_OP_swap.0,
        ]);
        assert_eq!(out.as_u64(), 2);
    }

    #[test]
    fn over_equals_pick_one() {
        let over = eval_ok(&[dw::DW_OP_lit7.0, dw::DW_OP_lit9.0, dw::DW_OP_over.0]);
        let pick = eval_ok(&[dw::DW_OP_lit7.0, dw::DW_OP_lit9.0, dw::DW_OP_pick.0, 1]);
        assert_eq!(over.as_u64(), pick.as_u64());
        assert_eq!(over.as_u64(), 7);
    }

    #[test]
    fn rot_rotates_three() {
        // stack (bottom..top): 1 2 3 -> after rot: 3 1 2
        let out = eval_ok(&[
            dw::DW_OP_lit1.0,
            dw::DW_OP_lit2.0,
            dw::DW_OP_lit3.0,
            dw::DW_OP_rot.0,
        ]);
        assert_eq!(out.as_u64(), 2);
    }

    #[test]
    fn comparisons_push_flags() {
        let out = eval_ok(&[dw::DW_OP_lit2.0, dw::DW_OP_lit3.0, dw::DW_OP_lt.0]);
        assert_eq!(out.as_u64(), 1);
        let out = eval_ok(&[dw::DW_OP_lit2.0, dw::DW_OP_lit3.0, dw::DW_OP_ge.0]);
        assert_eq!(out.as_u64(), 0);
    }

    #[test]
    fn shifts() {
        let out = eval_ok(&[dw::DW_OP_lit1.0, dw::DW_OP_lit4.0, dw::DW_OP_shl.0]);
        assert_eq!(out.as_u64(), 16);

        // logical shift of a negative byte treats operand as unsigned
        let out = eval_ok(&[dw::DW_OP_const1s.0, 0x80, dw::DW_OP_dup.0, dw::DW_OP_drop.0, dw::DW_OP_const1u.0, 7, dw::DW_OP_shr.0]);
        assert_eq!(out.data[0], 1);

        // arithmetic shift keeps the sign
        let out = eval_ok(&[dw::DW_OP_const1s.0, 0x80, dw::DW_OP_const1u.0, 7, dw::DW_OP_shra.0]);
        assert_eq!(out.data[0] as i8, -1);
    }

    #[test]
    fn bra_branches_on_nonzero() {
        // lit1; bra +1 (skip the following nop... encoded as skipping lit0)
        // program: lit1, bra(2), lit0, lit5  -> branch skips lit0
        let program = [
            dw::DW_OP_lit1.0,
            dw::DW_OP_bra.0,
            1,
            0,
            dw::DW_OP_lit0.0,
            dw::DW_OP_lit5.0,
        ];
        let out = eval_ok(&program);
        assert_eq!(out.as_u64(), 5);

        // zero on top: fall through, lit0 stays below the final lit5
        let program = [
            dw::DW_OP_lit0.0,
            dw::DW_OP_bra.0,
            1,
            0,
            dw::DW_OP_lit0.0,
            dw::DW_OP_lit5.0,
        ];
        let out = eval_ok(&program);
        assert_eq!(out.as_u64(), 5);
    }

    #[test]
    fn registers_feed_reg_opcodes() {
        let mut regs = DwarfRegisters::empty();
        regs.update(gimli::Register(3), 0xABCD);
        let c = ctx(&regs);
        let out = evaluate(&c, &[dw::DW_OP_reg3.0]).unwrap();
        assert_eq!(out.as_u64(), 0xABCD);
        assert!(out.address.is_none());
    }

    #[test]
    fn call_frame_cfa_pushes_frame_base() {
        let regs = DwarfRegisters::empty();
        let mut c = ctx(&regs);
        c.frame_base = Some(0x7fff_1000);
        let out = evaluate(&c, &[dw::DW_OP_call_frame_cfa.0]).unwrap();
        assert_eq!(out.as_u64(), 0x7fff_1000);
    }

    #[test]
    fn backward_branch_loop_hits_the_budget() {
        // lit1; dup; bra -4  -> branches back to the dup forever
        let program = [dw::DW_OP_lit1.0, dw::DW_OP_dup.0, dw::DW_OP_bra.0, 0xFC, 0xFF];
        assert!(matches!(eval(&program), Err(Error::MaxIterationsReached)));
    }

    #[test]
    fn skip_is_unconditional() {
        // skip over a lit9; the stack ends with lit2 on top of nothing else
        let program = [dw::DW_OP_skip.0, 1, 0, dw::DW_OP_lit9.0, dw::DW_OP_lit2.0];
        assert_eq!(eval_ok(&program).as_u64(), 2);
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        assert!(matches!(
            eval(&[0xE0]),
            Err(Error::InvalidLocationExpression("unknown opcode"))
        ));
    }

    #[test]
    fn division_by_zero_is_surfaced() {
        assert!(matches!(
            eval(&[dw::DW_OP_lit1.0, dw::DW_OP_lit0.0, dw::DW_OP_div.0]),
            Err(Error::UnexpectedValue("division by zero"))
        ));
    }
}

//! Variable rendering: location evaluation plus typed decoding into a tree
//! of value fields.

use crate::error::Error;
use crate::register::DwarfRegisters;
use crate::strings::StringHash;
use crate::subordinate::memory;
use crate::symbols::eval::{self, EvalContext};
use crate::symbols::types::{PrimitiveKind, TypeForm, TypeNdx};
use crate::symbols::{Target, Variable};
use log::warn;
use nix::unistd::Pid;

/// Pointer chasing depth bound; cyclic data in the subordinate must not
/// expand without end.
pub const MAX_RENDER_DEPTH: usize = 6;

/// Upper bound for C-string reads out of subordinate memory.
const MAX_CSTRING_LEN: usize = 256;

/// Typed interpretation of one rendered field.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueEncoding {
    Primitive(PrimitiveKind),
    Pointer {
        /// The pointed-to address (the pointer's value).
        target: u64,
        /// Rendered pointee, one level deep.
        pointee: Option<usize>,
    },
    Array {
        elements: Vec<usize>,
    },
    Struct {
        members: Vec<usize>,
    },
    Enum {
        value: i64,
        name: Option<StringHash>,
    },
    Unknown,
}

/// One node of a rendered value tree. Children are indices into the owning
/// [`ExpressionResult::fields`] arena.
#[derive(Debug, Clone)]
pub struct ValueField {
    pub name: Option<StringHash>,
    pub address: Option<u64>,
    /// Raw little-endian bytes, interned; `None` for address-only results.
    pub data: Option<StringHash>,
    pub encoding: ValueEncoding,
}

/// A rendered variable (or watch expression): a field arena whose entry 0 is
/// the root.
#[derive(Debug, Clone)]
pub struct ExpressionResult {
    pub name: StringHash,
    pub fields: Vec<ValueField>,
}

impl ExpressionResult {
    pub fn root(&self) -> Option<&ValueField> {
        self.fields.first()
    }

    /// A value that could not be computed; shown as unavailable.
    pub fn unavailable(name: StringHash) -> Self {
        Self {
            name,
            fields: vec![ValueField {
                name: None,
                address: None,
                data: None,
                encoding: ValueEncoding::Unknown,
            }],
        }
    }
}

/// Context for rendering the variables of one paused frame.
pub struct RenderContext<'a> {
    pub pid: Pid,
    pub registers: &'a DwarfRegisters,
    pub load_addr: u64,
    /// CFA of the frame the variables live in.
    pub frame_base: Option<u64>,
}

/// Render one variable of a paused subordinate.
pub fn render_variable(
    target: &Target,
    variable: &Variable,
    ctx: &RenderContext,
) -> Result<ExpressionResult, Error> {
    let type_ndx = variable
        .type_ndx
        .ok_or(Error::UnexpectedOptional("variable has no data type"))?;
    let size = target
        .data_types
        .size_of(type_ndx)
        .ok_or(Error::UnexpectedOptional("variable type has no size"))? as usize;
    let location = variable
        .location
        .as_ref()
        .ok_or(Error::UnexpectedOptional("variable has no location"))?;

    let eval_ctx = EvalContext {
        pid: ctx.pid,
        registers: ctx.registers,
        load_addr: ctx.load_addr,
        variable_size: size,
        frame_base: ctx.frame_base,
        frame_base_expr: variable.frame_base.as_deref(),
    };
    let outcome = eval::evaluate(&eval_ctx, location)?;

    let mut result = ExpressionResult {
        name: variable.name,
        fields: vec![],
    };
    let data = &outcome.data[..outcome.data.len().min(size)];
    decode(target, ctx, &mut result, type_ndx, data, outcome.address, 0);
    Ok(result)
}

/// Decode `data` according to the type and append a field; returns the index
/// of the appended field. Decoding failures degrade to `Unknown` fields.
fn decode(
    target: &Target,
    ctx: &RenderContext,
    out: &mut ExpressionResult,
    type_ndx: TypeNdx,
    data: &[u8],
    address: Option<u64>,
    depth: usize,
) -> usize {
    // reserve the slot so parents precede their children in the arena
    let slot = out.fields.len();
    out.fields.push(ValueField {
        name: None,
        address,
        data: None,
        encoding: ValueEncoding::Unknown,
    });

    let stripped = target.data_types.strip_aliases(type_ndx);
    let Some(data_type) = target.data_types.get(stripped) else {
        return slot;
    };

    match &data_type.form {
        TypeForm::Primitive(kind) => {
            out.fields[slot].data = Some(target.strings.add(data));
            out.fields[slot].encoding = ValueEncoding::Primitive(*kind);
        }
        TypeForm::Pointer(pointee_ndx) => {
            let mut addr_bytes = [0_u8; 8];
            let n = data.len().min(8);
            addr_bytes[..n].copy_from_slice(&data[..n]);
            let pointed_to = u64::from_le_bytes(addr_bytes);

            // a pointer renders as the address it carries; data stays empty
            out.fields[slot].address = Some(pointed_to);
            let pointee = if pointed_to != 0 && depth < MAX_RENDER_DEPTH {
                pointee_ndx.and_then(|ndx| {
                    render_pointee(target, ctx, out, ndx, pointed_to, depth + 1)
                })
            } else {
                None
            };
            out.fields[slot].encoding = ValueEncoding::Pointer {
                target: pointed_to,
                pointee,
            };
        }
        TypeForm::Array { len, element } => {
            let Some(element_ndx) = element else {
                return slot;
            };
            let Some(elem_size) = target.data_types.size_of(*element_ndx) else {
                return slot;
            };
            let elem_size = elem_size as usize;
            if elem_size == 0 {
                return slot;
            }
            let count = len
                .map(|l| l as usize)
                .unwrap_or_else(|| data.len() / elem_size);

            // char arrays read as text
            if is_char(target, *element_ndx) {
                let text = &data[..data.len().min(count)];
                let text = text.split(|b| *b == 0).next().unwrap_or(text);
                out.fields[slot].data = Some(target.strings.add(text));
                out.fields[slot].encoding = ValueEncoding::Primitive(PrimitiveKind::String);
                return slot;
            }

            let mut elements = vec![];
            for i in 0..count {
                let offset = i * elem_size;
                let Some(chunk) = data.get(offset..offset + elem_size) else {
                    break;
                };
                let elem_addr = address.map(|a| a + offset as u64);
                elements.push(decode(
                    target,
                    ctx,
                    out,
                    *element_ndx,
                    chunk,
                    elem_addr,
                    depth + 1,
                ));
            }
            out.fields[slot].encoding = ValueEncoding::Array { elements };
        }
        TypeForm::Aggregate { members, .. } => {
            let mut rendered = vec![];
            for member in members {
                let Some(member_ndx) = member.type_ndx else {
                    continue;
                };
                let Some(member_size) = target.data_types.size_of(member_ndx) else {
                    continue;
                };
                let offset = member.offset as usize;
                let Some(chunk) = data.get(offset..offset + member_size as usize) else {
                    warn!(target: "render", "member beyond the aggregate buffer");
                    continue;
                };
                let member_addr = address.map(|a| a + member.offset);
                let child = decode(target, ctx, out, member_ndx, chunk, member_addr, depth + 1);
                out.fields[child].name = Some(member.name);
                rendered.push(child);
            }
            out.fields[slot].encoding = ValueEncoding::Struct { members: rendered };
        }
        TypeForm::Enumeration { enumerators, .. } => {
            let value = signed_value(data);
            // producers encode enumerator constants signed or unsigned;
            // compare within the value's width
            let mask = match data.len() {
                1 => 0xFF_u64,
                2 => 0xFFFF,
                4 => 0xFFFF_FFFF,
                _ => u64::MAX,
            };
            let name = enumerators
                .iter()
                .find(|e| (e.value as u64) & mask == (value as u64) & mask)
                .map(|e| e.name);
            out.fields[slot].data = Some(target.strings.add(data));
            out.fields[slot].encoding = ValueEncoding::Enum { value, name };
        }
        TypeForm::Typedef(_) | TypeForm::Constant(_) => {
            // strip_aliases already followed these; a dangling alias decodes
            // as unknown
            out.fields[slot].data = Some(target.strings.add(data));
        }
        TypeForm::Function | TypeForm::Unknown => {
            out.fields[slot].data = Some(target.strings.add(data));
        }
    }
    slot
}

/// Chase a pointer one level and render the pointee.
fn render_pointee(
    target: &Target,
    ctx: &RenderContext,
    out: &mut ExpressionResult,
    pointee_ndx: TypeNdx,
    addr: u64,
    depth: usize,
) -> Option<usize> {
    // char pointers read as C strings
    if is_char(target, pointee_ndx) {
        let text = read_cstring(ctx.pid, addr)?;
        let slot = out.fields.len();
        out.fields.push(ValueField {
            name: None,
            address: Some(addr),
            data: Some(target.strings.add(&text)),
            encoding: ValueEncoding::Primitive(PrimitiveKind::String),
        });
        return Some(slot);
    }

    let size = target.data_types.size_of(pointee_ndx)? as usize;
    if size == 0 || size > 0x10000 {
        return None;
    }
    let mut buf = vec![0_u8; size];
    if let Err(e) = memory::peek_data(ctx.pid, addr, &mut buf) {
        warn!(target: "render", "pointee read at {addr:#x} failed: {e:#}");
        return None;
    }
    Some(decode(target, ctx, out, pointee_ndx, &buf, Some(addr), depth))
}

fn is_char(target: &Target, type_ndx: TypeNdx) -> bool {
    let stripped = target.data_types.strip_aliases(type_ndx);
    match target.data_types.get(stripped) {
        Some(ty) => {
            matches!(ty.form, TypeForm::Primitive(PrimitiveKind::String))
                && ty.size_bytes.unwrap_or(1) == 1
        }
        None => false,
    }
}

fn read_cstring(pid: Pid, addr: u64) -> Option<Vec<u8>> {
    let mut text = vec![];
    let mut chunk = [0_u8; 8];
    let mut cursor = addr;
    while text.len() < MAX_CSTRING_LEN {
        if memory::peek_data(pid, cursor, &mut chunk).is_err() {
            return if text.is_empty() { None } else { Some(text) };
        }
        for byte in chunk {
            if byte == 0 {
                return Some(text);
            }
            text.push(byte);
        }
        cursor += 8;
    }
    Some(text)
}

fn signed_value(data: &[u8]) -> i64 {
    match data.len() {
        1 => data[0] as i8 as i64,
        2 => i16::from_le_bytes(data.try_into().expect("len checked")) as i64,
        4 => i32::from_le_bytes(data.try_into().expect("len checked")) as i64,
        8 => i64::from_le_bytes(data.try_into().expect("len checked")),
        _ => {
            let mut bytes = [0_u8; 8];
            let n = data.len().min(8);
            bytes[..n].copy_from_slice(&data[..n]);
            i64::from_le_bytes(bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_value_widths() {
        assert_eq!(signed_value(&[0xFF]), -1);
        assert_eq!(signed_value(&[0x02, 0x00]), 2);
        assert_eq!(signed_value(&[0xFF, 0xFF, 0xFF, 0xFF]), -1);
        assert_eq!(signed_value(&[1, 0, 0, 0, 0, 0, 0, 0]), 1);
    }

    #[test]
    fn unavailable_result_has_unknown_root() {
        let result = ExpressionResult::unavailable(42);
        assert_eq!(result.name, 42);
        assert!(matches!(
            result.root().unwrap().encoding,
            ValueEncoding::Unknown
        ));
    }
}

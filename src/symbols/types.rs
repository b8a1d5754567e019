//! The global data-type pool of a target.
//!
//! Types form a DAG keyed by [`TypeNdx`]; self-referential types (linked
//! lists, trees) are represented by index references, never by ownership.
//! DWARF type references may point forward, so the pool is built in two
//! passes: the DIE walk declares every type-defining DIE with placeholder
//! references, a patch pass then rewrites them to concrete indices.

use crate::strings::{StringHash, EMPTY_STRING};
use gimli::{DebugInfoOffset, UnitOffset};
use log::warn;
use std::collections::HashMap;

/// Index of a type in the target-wide pool.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TypeNdx(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PrimitiveKind {
    Signed,
    Unsigned,
    Float,
    Boolean,
    /// Character data; rendered as text when possible.
    String,
    Complex,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AggregateKind {
    Struct,
    Union,
    Class,
}

#[derive(Clone, Debug)]
pub struct Member {
    pub name: StringHash,
    /// Byte offset inside the aggregate (`DW_AT_data_member_location`).
    pub offset: u64,
    pub type_ndx: Option<TypeNdx>,
}

#[derive(Clone, Debug)]
pub struct Enumerator {
    pub name: StringHash,
    pub value: i64,
}

#[derive(Clone, Debug)]
pub enum TypeForm {
    Primitive(PrimitiveKind),
    Pointer(Option<TypeNdx>),
    Array {
        len: Option<u64>,
        element: Option<TypeNdx>,
    },
    Aggregate {
        kind: AggregateKind,
        members: Vec<Member>,
    },
    Enumeration {
        underlying: Option<TypeNdx>,
        enumerators: Vec<Enumerator>,
    },
    Typedef(Option<TypeNdx>),
    Constant(Option<TypeNdx>),
    Function,
    Unknown,
}

#[derive(Clone, Debug)]
pub struct DataType {
    pub size_bytes: Option<u64>,
    pub name: StringHash,
    pub form: TypeForm,
}

impl DataType {
    pub fn unknown() -> Self {
        Self {
            size_bytes: None,
            name: EMPTY_STRING,
            form: TypeForm::Unknown,
        }
    }
}

/// Target-wide type pool.
pub struct TypePool {
    types: Vec<DataType>,
    address_size: u8,
}

impl TypePool {
    pub fn get(&self, ndx: TypeNdx) -> Option<&DataType> {
        self.types.get(ndx.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Follow typedef and const wrappers to the underlying type.
    pub fn strip_aliases(&self, ndx: TypeNdx) -> TypeNdx {
        let mut current = ndx;
        // the pool is a DAG except through index references; bound the chase
        for _ in 0..64 {
            match self.get(current).map(|t| &t.form) {
                Some(TypeForm::Typedef(Some(next))) | Some(TypeForm::Constant(Some(next))) => {
                    current = *next;
                }
                _ => return current,
            }
        }
        current
    }

    /// Byte size of a value of this type, chasing aliases and computing
    /// array sizes from their element type when the DIE omitted a size.
    pub fn size_of(&self, ndx: TypeNdx) -> Option<u64> {
        let stripped = self.strip_aliases(ndx);
        let ty = self.get(stripped)?;
        if let Some(size) = ty.size_bytes {
            return Some(size);
        }
        match &ty.form {
            TypeForm::Pointer(_) => Some(self.address_size as u64),
            TypeForm::Array { len, element } => {
                let elem_size = self.size_of((*element)?)?;
                Some(elem_size * (*len)?)
            }
            _ => None,
        }
    }
}

/// A not-yet-resolved reference to another type DIE.
#[derive(Clone, Copy, Debug)]
pub enum TypeRef {
    /// `DW_FORM_ref*`: offset local to the compile unit.
    Local(UnitOffset),
    /// `DW_FORM_ref_addr`: global offset into `.debug_info`.
    Global(DebugInfoOffset),
}

enum PatchSlot {
    PointerTarget,
    ArrayElement,
    TypedefTarget,
    ConstTarget,
    EnumUnderlying,
    Member(usize),
}

struct Patch {
    ndx: TypeNdx,
    slot: PatchSlot,
    unit: usize,
    target: TypeRef,
}

/// Pass-1 accumulator for the type pool.
pub(super) struct TypePoolBuilder {
    types: Vec<DataType>,
    address_size: u8,
    global_map: HashMap<usize, TypeNdx>,
    local_map: HashMap<(usize, usize), TypeNdx>,
    patches: Vec<Patch>,
}

impl TypePoolBuilder {
    pub(super) fn new(address_size: u8) -> Self {
        Self {
            types: vec![],
            address_size,
            global_map: HashMap::new(),
            local_map: HashMap::new(),
            patches: vec![],
        }
    }

    /// Declare a type-defining DIE and return its pool index.
    pub(super) fn declare(
        &mut self,
        unit: usize,
        offset: UnitOffset,
        global_offset: Option<DebugInfoOffset>,
        data_type: DataType,
    ) -> TypeNdx {
        let ndx = TypeNdx(self.types.len() as u32);
        self.types.push(data_type);
        self.local_map.insert((unit, offset.0), ndx);
        if let Some(global) = global_offset {
            self.global_map.insert(global.0, ndx);
        }
        ndx
    }

    fn defer(&mut self, ndx: TypeNdx, slot: PatchSlot, unit: usize, target: TypeRef) {
        self.patches.push(Patch {
            ndx,
            slot,
            unit,
            target,
        });
    }

    pub(super) fn defer_pointer(&mut self, ndx: TypeNdx, unit: usize, target: TypeRef) {
        self.defer(ndx, PatchSlot::PointerTarget, unit, target);
    }

    pub(super) fn defer_element(&mut self, ndx: TypeNdx, unit: usize, target: TypeRef) {
        self.defer(ndx, PatchSlot::ArrayElement, unit, target);
    }

    pub(super) fn defer_typedef(&mut self, ndx: TypeNdx, unit: usize, target: TypeRef) {
        self.defer(ndx, PatchSlot::TypedefTarget, unit, target);
    }

    pub(super) fn defer_const(&mut self, ndx: TypeNdx, unit: usize, target: TypeRef) {
        self.defer(ndx, PatchSlot::ConstTarget, unit, target);
    }

    pub(super) fn defer_enum_underlying(&mut self, ndx: TypeNdx, unit: usize, target: TypeRef) {
        self.defer(ndx, PatchSlot::EnumUnderlying, unit, target);
    }

    pub(super) fn defer_member(
        &mut self,
        ndx: TypeNdx,
        member: usize,
        unit: usize,
        target: TypeRef,
    ) {
        self.defer(ndx, PatchSlot::Member(member), unit, target);
    }

    /// Record the element count parsed from a child `DW_TAG_subrange_type`.
    pub(super) fn set_array_len(&mut self, ndx: TypeNdx, len: Option<u64>) {
        if let Some(DataType {
            form: TypeForm::Array { len: slot, .. },
            ..
        }) = self.types.get_mut(ndx.0 as usize)
        {
            *slot = len;
        }
    }

    /// Append a member to an aggregate; returns its ordinal for patching.
    pub(super) fn push_member(&mut self, ndx: TypeNdx, member: Member) -> Option<usize> {
        if let Some(DataType {
            form: TypeForm::Aggregate { members, .. },
            ..
        }) = self.types.get_mut(ndx.0 as usize)
        {
            members.push(member);
            Some(members.len() - 1)
        } else {
            None
        }
    }

    pub(super) fn push_enumerator(&mut self, ndx: TypeNdx, enumerator: Enumerator) {
        if let Some(DataType {
            form: TypeForm::Enumeration { enumerators, .. },
            ..
        }) = self.types.get_mut(ndx.0 as usize)
        {
            enumerators.push(enumerator);
        }
    }

    /// Resolve a reference against the declaration maps. Valid only after
    /// every unit was walked (pass 1 complete).
    pub(super) fn lookup(&self, unit: usize, target: TypeRef) -> Option<TypeNdx> {
        match target {
            TypeRef::Local(offset) => self.local_map.get(&(unit, offset.0)).copied(),
            TypeRef::Global(offset) => self.global_map.get(&offset.0).copied(),
        }
    }

    /// Pass 2: rewrite every deferred reference, then freeze the pool.
    pub(super) fn finish(mut self) -> TypePool {
        let patches = std::mem::take(&mut self.patches);
        for patch in patches {
            let resolved = self.lookup(patch.unit, patch.target);
            if resolved.is_none() {
                warn!(
                    target: "symbols",
                    "type reference {:?} in unit {} does not resolve",
                    patch.target, patch.unit
                );
            }
            let Some(ty) = self.types.get_mut(patch.ndx.0 as usize) else {
                continue;
            };
            match (&mut ty.form, patch.slot) {
                (TypeForm::Pointer(target), PatchSlot::PointerTarget) => *target = resolved,
                (TypeForm::Array { element, .. }, PatchSlot::ArrayElement) => *element = resolved,
                (TypeForm::Typedef(target), PatchSlot::TypedefTarget) => *target = resolved,
                (TypeForm::Constant(target), PatchSlot::ConstTarget) => *target = resolved,
                (TypeForm::Enumeration { underlying, .. }, PatchSlot::EnumUnderlying) => {
                    *underlying = resolved
                }
                (TypeForm::Aggregate { members, .. }, PatchSlot::Member(i)) => {
                    if let Some(member) = members.get_mut(i) {
                        member.type_ndx = resolved;
                    }
                }
                _ => warn!(target: "symbols", "type patch slot does not match the declared form"),
            }
        }

        TypePool {
            types: self.types,
            address_size: self.address_size,
        }
    }
}

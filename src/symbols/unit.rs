//! Per-compile-unit DWARF decoding: line program, DIE walk, type
//! declarations and variable collection.

use crate::address::FileAddress;
use crate::error::Error;
use crate::strings::{StringCache, StringHash, EMPTY_STRING};
use crate::symbols::types::{
    AggregateKind, DataType, Enumerator, Member, PrimitiveKind, TypeForm, TypePoolBuilder,
    TypeRef,
};
use crate::symbols::{CompileUnit, EndianArcSlice, Function, LineRow, SourceFile, SourceRef, SourceStatement, Variable};
use bytes::Bytes;
use fallible_iterator::FallibleIterator;
use gimli::{
    AttributeValue, DebuggingInformationEntry, DwAte, DwLang, Reader, UnitHeader, UnitOffset,
};
use itertools::Itertools;
use log::{debug, warn};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::path::PathBuf;

/// Vendor language code not yet in every gimli release.
const DW_LANG_ZIG: DwLang = DwLang(0x9999);

/// A variable whose type reference is resolved after every unit was walked.
pub(super) struct VarFixup {
    pub unit: usize,
    pub variable: usize,
    pub target: TypeRef,
}

pub(super) struct ParsedUnit {
    pub compile_unit: CompileUnit,
    pub fixups: Vec<VarFixup>,
}

pub(super) struct UnitParser<'a> {
    dwarf: &'a gimli::Dwarf<EndianArcSlice>,
    strings: &'a StringCache,
}

enum Scope {
    Function(Option<usize>),
    Array(crate::symbols::types::TypeNdx),
    Aggregate(crate::symbols::types::TypeNdx),
    Enumeration(crate::symbols::types::TypeNdx),
    Other,
}

impl<'a> UnitParser<'a> {
    pub(super) fn new(dwarf: &'a gimli::Dwarf<EndianArcSlice>, strings: &'a StringCache) -> Self {
        Self { dwarf, strings }
    }

    /// Parse one compile unit. Returns `None` when the unit's language is not
    /// recognized (the caller decides whether that is fatal).
    pub(super) fn parse(
        &self,
        header: UnitHeader<EndianArcSlice>,
        unit_index: usize,
        types: &mut TypePoolBuilder,
    ) -> Result<Option<ParsedUnit>, Error> {
        let version = header.version();
        if !(2..=5).contains(&version) {
            return Err(Error::InvalidDwarfVersion(version));
        }
        if version < 3 {
            warn!(target: "symbols", "compile unit with legacy DWARF version {version}");
        }

        let unit = self.dwarf.unit(header)?;
        let offset = unit
            .header
            .offset()
            .as_debug_info_offset()
            .ok_or(Error::UnexpectedOptional("unit outside .debug_info"))?;

        let mut cursor = unit.header.entries(&unit.abbreviations);
        cursor.next_dfs()?;
        let root = cursor.current().ok_or(gimli::Error::MissingUnitDie)?;

        let language = root.attr(gimli::DW_AT_language)?.and_then(|attr| {
            if let AttributeValue::Language(lang) = attr.value() {
                Some(lang)
            } else {
                None
            }
        });
        if !language.map(language_supported).unwrap_or(false) {
            debug!(
                target: "symbols",
                "skip compile unit {offset:?}: unsupported language {language:?}"
            );
            return Ok(None);
        }

        let name = match unit.name.as_ref() {
            Some(n) => self.strings.add(&n.to_slice()?),
            None => EMPTY_STRING,
        };

        let (lines, files, file_hashes) = self.parse_line_program(&unit)?;

        let mut ranges = self.dwarf.unit_ranges(&unit)?.collect::<Vec<_>>()?;
        ranges.sort_unstable_by_key(|r| r.begin);

        let mut out = ParsedUnit {
            compile_unit: CompileUnit {
                offset,
                name,
                language,
                ranges,
                source_files: files,
                functions: vec![],
                variables: vec![],
                globals: vec![],
                lines,
            },
            fixups: vec![],
        };
        self.walk_entries(&unit, unit_index, types, &file_hashes, &mut out)?;

        out.compile_unit
            .functions
            .sort_unstable_by_key(|f| f.ranges.first().map(|r| r.begin).unwrap_or(u64::MAX));
        Ok(Some(out))
    }

    /// Evaluate the line-number program into the full row table and the
    /// per-file statement lists.
    #[allow(clippy::type_complexity)]
    fn parse_line_program(
        &self,
        unit: &gimli::Unit<EndianArcSlice>,
    ) -> Result<(Vec<LineRow>, Vec<SourceFile>, Vec<StringHash>), Error> {
        let Some(ref lp) = unit.line_program else {
            return Ok((vec![], vec![], vec![]));
        };

        let mut rows_iter = lp.clone().rows();
        let header = rows_iter.header().clone();

        // Resolve every file index to an interned absolute path hash. Index 0
        // exists only in DWARF v5 tables; the placeholder keeps v4 indices
        // aligned.
        let mut file_hashes = vec![];
        match header.file(0) {
            Some(file) => {
                let path = self.render_file_path(unit, file, &header)?;
                file_hashes.push(self.strings.add(path.to_string_lossy().as_bytes()));
            }
            None => file_hashes.push(EMPTY_STRING),
        }
        let mut index = 1;
        while let Some(file) = header.file(index) {
            let path = self.render_file_path(unit, file, &header)?;
            file_hashes.push(self.strings.add(path.to_string_lossy().as_bytes()));
            index += 1;
        }

        let mut lines: Vec<LineRow> = vec![];
        while let Some((_, row)) = rows_iter.next_row()? {
            let file_hash = file_hashes
                .get(row.file_index() as usize)
                .copied()
                .unwrap_or(EMPTY_STRING);
            lines.push(LineRow {
                address: row.address(),
                file_hash,
                line: row.line().map(NonZeroU64::get).unwrap_or(0),
                column: match row.column() {
                    gimli::ColumnType::LeftEdge => 0,
                    gimli::ColumnType::Column(c) => c.get(),
                },
                is_stmt: row.is_stmt(),
                prologue_end: row.prologue_end(),
                end_sequence: row.end_sequence(),
            });
        }
        // stable: equal-address rows keep their emission order, the last one
        // reflects the line-table state at that address
        lines.sort_by_key(|row| row.address);

        // Collapse rows into statements: one per (file, line), anchored at
        // the lowest is_stmt address of that line.
        struct Acc {
            min_addr: u64,
            min_stmt_addr: Option<u64>,
        }
        let mut acc: HashMap<(StringHash, u64), Acc> = HashMap::new();
        for row in lines.iter().filter(|r| !r.end_sequence && r.line != 0) {
            let entry = acc.entry((row.file_hash, row.line)).or_insert(Acc {
                min_addr: row.address,
                min_stmt_addr: None,
            });
            entry.min_addr = entry.min_addr.min(row.address);
            if row.is_stmt {
                entry.min_stmt_addr = Some(
                    entry
                        .min_stmt_addr
                        .map_or(row.address, |a| a.min(row.address)),
                );
            }
        }

        let mut by_file: HashMap<StringHash, Vec<SourceStatement>> = HashMap::new();
        for ((file_hash, line), a) in acc {
            let addr = a.min_stmt_addr.unwrap_or(a.min_addr);
            by_file.entry(file_hash).or_default().push(SourceStatement {
                address: FileAddress::from(addr),
                line,
                breakpoint_addr: FileAddress::from(addr),
            });
        }
        let files: Vec<SourceFile> = by_file
            .into_iter()
            .map(|(path_hash, mut statements)| {
                statements.sort_unstable_by_key(|s| (s.line, s.breakpoint_addr));
                SourceFile {
                    path_hash,
                    statements,
                }
            })
            .sorted_unstable_by_key(|f| f.path_hash)
            .collect();

        Ok((lines, files, file_hashes))
    }

    fn render_file_path(
        &self,
        unit: &gimli::Unit<EndianArcSlice>,
        file: &gimli::FileEntry<EndianArcSlice>,
        header: &gimli::LineProgramHeader<EndianArcSlice>,
    ) -> Result<PathBuf, Error> {
        let mut path = if let Some(ref comp_dir) = unit.comp_dir {
            PathBuf::from(comp_dir.to_string_lossy()?.as_ref())
        } else {
            PathBuf::new()
        };

        if file.directory_index() != 0 {
            if let Some(directory) = file.directory(header) {
                path.push(
                    self.dwarf
                        .attr_string(unit, directory)?
                        .to_string_lossy()?
                        .as_ref(),
                );
            }
        }
        path.push(
            self.dwarf
                .attr_string(unit, file.path_name())?
                .to_string_lossy()?
                .as_ref(),
        );
        Ok(path)
    }

    fn attr_string_hash(
        &self,
        unit: &gimli::Unit<EndianArcSlice>,
        die: &DebuggingInformationEntry<EndianArcSlice>,
        attr: gimli::DwAt,
    ) -> Result<Option<StringHash>, Error> {
        let Some(attr) = die.attr(attr)? else {
            return Ok(None);
        };
        let Ok(s) = self.dwarf.attr_string(unit, attr.value()) else {
            return Ok(None);
        };
        Ok(Some(self.strings.add(&s.to_slice()?)))
    }

    fn attr_exprloc(
        die: &DebuggingInformationEntry<EndianArcSlice>,
        attr: gimli::DwAt,
    ) -> Result<Option<Bytes>, Error> {
        let Some(attr) = die.attr(attr)? else {
            return Ok(None);
        };
        match attr.value() {
            AttributeValue::Exprloc(expr) => {
                Ok(Some(Bytes::copy_from_slice(&expr.0.to_slice()?)))
            }
            // location lists are not used for variable locations here
            _ => Ok(None),
        }
    }

    fn attr_type_ref(
        die: &DebuggingInformationEntry<EndianArcSlice>,
    ) -> Result<Option<TypeRef>, Error> {
        let Some(attr) = die.attr(gimli::DW_AT_type)? else {
            return Ok(None);
        };
        Ok(match attr.value() {
            AttributeValue::UnitRef(offset) => Some(TypeRef::Local(offset)),
            AttributeValue::DebugInfoRef(offset) => Some(TypeRef::Global(offset)),
            _ => None,
        })
    }

    fn attr_udata(
        die: &DebuggingInformationEntry<EndianArcSlice>,
        attr: gimli::DwAt,
    ) -> Result<Option<u64>, Error> {
        Ok(die.attr(attr)?.and_then(|a| a.udata_value()))
    }

    #[allow(clippy::too_many_lines)]
    fn walk_entries(
        &self,
        unit: &gimli::Unit<EndianArcSlice>,
        unit_index: usize,
        types: &mut TypePoolBuilder,
        file_hashes: &[StringHash],
        out: &mut ParsedUnit,
    ) -> Result<(), Error> {
        let to_global = |offset: UnitOffset| offset.to_debug_info_offset(&unit.header);

        let mut scopes: Vec<(isize, Scope)> = vec![];
        let mut depth: isize = 0;

        let mut cursor = unit.entries();
        while cursor.next_entry()?.is_some() {
            let Some(die) = cursor.current() else {
                depth -= 1;
                while matches!(scopes.last(), Some((d, _)) if *d >= depth) {
                    scopes.pop();
                }
                continue;
            };

            let die_offset = die.offset();
            let mut scope_to_push = if die.has_children() {
                Some(Scope::Other)
            } else {
                None
            };

            match die.tag() {
                gimli::DW_TAG_subprogram => {
                    let fn_index = self.parse_function(unit, die, file_hashes, out)?;
                    if die.has_children() {
                        scope_to_push = Some(Scope::Function(fn_index));
                    }
                }
                gimli::DW_TAG_formal_parameter | gimli::DW_TAG_variable => {
                    let enclosing_fn = scopes.iter().rev().find_map(|(_, s)| match s {
                        Scope::Function(f) => Some(*f),
                        _ => None,
                    });
                    // variables of skipped declarations are dropped with their scope
                    if !matches!(enclosing_fn, Some(None)) {
                        self.parse_variable(unit, die, unit_index, enclosing_fn.flatten(), out)?;
                    }
                }
                gimli::DW_TAG_base_type => {
                    let name = self
                        .attr_string_hash(unit, die, gimli::DW_AT_name)?
                        .unwrap_or(EMPTY_STRING);
                    let byte_size = Self::attr_udata(die, gimli::DW_AT_byte_size)?;
                    let encoding = die.attr(gimli::DW_AT_encoding)?.and_then(|a| {
                        if let AttributeValue::Encoding(e) = a.value() {
                            Some(e)
                        } else {
                            None
                        }
                    });
                    let form = match encoding.and_then(primitive_kind) {
                        Some(kind) => TypeForm::Primitive(kind),
                        None => TypeForm::Unknown,
                    };
                    types.declare(
                        unit_index,
                        die_offset,
                        to_global(die_offset),
                        DataType {
                            size_bytes: byte_size,
                            name,
                            form,
                        },
                    );
                }
                gimli::DW_TAG_pointer_type
                | gimli::DW_TAG_reference_type
                | gimli::DW_TAG_rvalue_reference_type
                | gimli::DW_TAG_ptr_to_member_type => {
                    let name = self
                        .attr_string_hash(unit, die, gimli::DW_AT_name)?
                        .unwrap_or(EMPTY_STRING);
                    let byte_size = Self::attr_udata(die, gimli::DW_AT_byte_size)?;
                    let ndx = types.declare(
                        unit_index,
                        die_offset,
                        to_global(die_offset),
                        DataType {
                            size_bytes: byte_size,
                            name,
                            form: TypeForm::Pointer(None),
                        },
                    );
                    if let Some(target) = Self::attr_type_ref(die)? {
                        types.defer_pointer(ndx, unit_index, target);
                    }
                }
                gimli::DW_TAG_const_type
                | gimli::DW_TAG_volatile_type
                | gimli::DW_TAG_restrict_type => {
                    let ndx = types.declare(
                        unit_index,
                        die_offset,
                        to_global(die_offset),
                        DataType {
                            size_bytes: None,
                            name: EMPTY_STRING,
                            form: TypeForm::Constant(None),
                        },
                    );
                    if let Some(target) = Self::attr_type_ref(die)? {
                        types.defer_const(ndx, unit_index, target);
                    }
                }
                gimli::DW_TAG_typedef => {
                    let name = self
                        .attr_string_hash(unit, die, gimli::DW_AT_name)?
                        .unwrap_or(EMPTY_STRING);
                    let ndx = types.declare(
                        unit_index,
                        die_offset,
                        to_global(die_offset),
                        DataType {
                            size_bytes: None,
                            name,
                            form: TypeForm::Typedef(None),
                        },
                    );
                    if let Some(target) = Self::attr_type_ref(die)? {
                        types.defer_typedef(ndx, unit_index, target);
                    }
                }
                gimli::DW_TAG_array_type => {
                    let name = self
                        .attr_string_hash(unit, die, gimli::DW_AT_name)?
                        .unwrap_or(EMPTY_STRING);
                    let byte_size = Self::attr_udata(die, gimli::DW_AT_byte_size)?;
                    let ndx = types.declare(
                        unit_index,
                        die_offset,
                        to_global(die_offset),
                        DataType {
                            size_bytes: byte_size,
                            name,
                            form: TypeForm::Array {
                                len: None,
                                element: None,
                            },
                        },
                    );
                    if let Some(target) = Self::attr_type_ref(die)? {
                        types.defer_element(ndx, unit_index, target);
                    }
                    if die.has_children() {
                        scope_to_push = Some(Scope::Array(ndx));
                    }
                }
                gimli::DW_TAG_subrange_type => {
                    if let Some((_, Scope::Array(array_ndx))) = scopes
                        .iter()
                        .rev()
                        .find(|(_, s)| matches!(s, Scope::Array(_)))
                    {
                        let len = match Self::attr_udata(die, gimli::DW_AT_count)? {
                            Some(count) => Some(count),
                            None => {
                                Self::attr_udata(die, gimli::DW_AT_upper_bound)?.map(|ub| ub + 1)
                            }
                        };
                        types.set_array_len(*array_ndx, len);
                    }
                }
                gimli::DW_TAG_structure_type
                | gimli::DW_TAG_class_type
                | gimli::DW_TAG_union_type => {
                    let kind = match die.tag() {
                        gimli::DW_TAG_structure_type => AggregateKind::Struct,
                        gimli::DW_TAG_class_type => AggregateKind::Class,
                        _ => AggregateKind::Union,
                    };
                    let name = self
                        .attr_string_hash(unit, die, gimli::DW_AT_name)?
                        .unwrap_or(EMPTY_STRING);
                    let byte_size = Self::attr_udata(die, gimli::DW_AT_byte_size)?;
                    let ndx = types.declare(
                        unit_index,
                        die_offset,
                        to_global(die_offset),
                        DataType {
                            size_bytes: byte_size,
                            name,
                            form: TypeForm::Aggregate {
                                kind,
                                members: vec![],
                            },
                        },
                    );
                    if die.has_children() {
                        scope_to_push = Some(Scope::Aggregate(ndx));
                    }
                }
                gimli::DW_TAG_member => {
                    if let Some((_, Scope::Aggregate(agg_ndx))) = scopes
                        .iter()
                        .rev()
                        .find(|(_, s)| matches!(s, Scope::Aggregate(_)))
                    {
                        let name = self
                            .attr_string_hash(unit, die, gimli::DW_AT_name)?
                            .unwrap_or(EMPTY_STRING);
                        let offset =
                            Self::attr_udata(die, gimli::DW_AT_data_member_location)?.unwrap_or(0);
                        let member_index = types.push_member(
                            *agg_ndx,
                            Member {
                                name,
                                offset,
                                type_ndx: None,
                            },
                        );
                        if let (Some(target), Some(member_index)) =
                            (Self::attr_type_ref(die)?, member_index)
                        {
                            types.defer_member(*agg_ndx, member_index, unit_index, target);
                        }
                    }
                }
                gimli::DW_TAG_enumeration_type => {
                    let name = self
                        .attr_string_hash(unit, die, gimli::DW_AT_name)?
                        .unwrap_or(EMPTY_STRING);
                    let byte_size = Self::attr_udata(die, gimli::DW_AT_byte_size)?;
                    let ndx = types.declare(
                        unit_index,
                        die_offset,
                        to_global(die_offset),
                        DataType {
                            size_bytes: byte_size,
                            name,
                            form: TypeForm::Enumeration {
                                underlying: None,
                                enumerators: vec![],
                            },
                        },
                    );
                    if let Some(target) = Self::attr_type_ref(die)? {
                        types.defer_enum_underlying(ndx, unit_index, target);
                    }
                    if die.has_children() {
                        scope_to_push = Some(Scope::Enumeration(ndx));
                    }
                }
                gimli::DW_TAG_enumerator => {
                    if let Some((_, Scope::Enumeration(enum_ndx))) = scopes
                        .iter()
                        .rev()
                        .find(|(_, s)| matches!(s, Scope::Enumeration(_)))
                    {
                        let name = self
                            .attr_string_hash(unit, die, gimli::DW_AT_name)?
                            .unwrap_or(EMPTY_STRING);
                        let value = die
                            .attr(gimli::DW_AT_const_value)?
                            .and_then(|a| match a.value() {
                                AttributeValue::Sdata(v) => Some(v),
                                AttributeValue::Udata(v) => Some(v as i64),
                                AttributeValue::Data1(v) => Some(v as i64),
                                AttributeValue::Data2(v) => Some(v as i64),
                                AttributeValue::Data4(v) => Some(v as i64),
                                AttributeValue::Data8(v) => Some(v as i64),
                                _ => None,
                            })
                            .unwrap_or(0);
                        types.push_enumerator(*enum_ndx, Enumerator { name, value });
                    }
                }
                gimli::DW_TAG_subroutine_type => {
                    types.declare(
                        unit_index,
                        die_offset,
                        to_global(die_offset),
                        DataType {
                            size_bytes: None,
                            name: EMPTY_STRING,
                            form: TypeForm::Function,
                        },
                    );
                }
                gimli::DW_TAG_unspecified_type => {
                    types.declare(
                        unit_index,
                        die_offset,
                        to_global(die_offset),
                        DataType::unknown(),
                    );
                }
                _ => {}
            }

            if let Some(scope) = scope_to_push {
                scopes.push((depth, scope));
                depth += 1;
            }
        }
        Ok(())
    }

    /// Parse one subprogram DIE. Subprograms without code ranges (pure
    /// declarations) are recorded as `None` so their children are swallowed.
    fn parse_function(
        &self,
        unit: &gimli::Unit<EndianArcSlice>,
        die: &DebuggingInformationEntry<EndianArcSlice>,
        file_hashes: &[StringHash],
        out: &mut ParsedUnit,
    ) -> Result<Option<usize>, Error> {
        let mut ranges = self.dwarf.die_ranges(unit, die)?.collect::<Vec<_>>()?;
        if ranges.is_empty() {
            return Ok(None);
        }
        ranges.sort_unstable_by_key(|r| r.begin);

        let name = match self.attr_string_hash(unit, die, gimli::DW_AT_name)? {
            Some(name) => name,
            None => match die.attr(gimli::DW_AT_linkage_name)? {
                Some(attr) => {
                    let raw = self.dwarf.attr_string(unit, attr.value())?;
                    let raw = raw.to_string_lossy()?;
                    let demangled = rustc_demangle::demangle(raw.as_ref()).to_string();
                    self.strings.add_str(&demangled)
                }
                None => EMPTY_STRING,
            },
        };

        let decl = {
            let file = Self::attr_udata(die, gimli::DW_AT_decl_file)?
                .and_then(|i| file_hashes.get(i as usize).copied());
            let line = Self::attr_udata(die, gimli::DW_AT_decl_line)?;
            match (file, line) {
                (Some(file_hash), Some(line)) => Some(SourceRef {
                    file_hash,
                    line,
                    column: 0,
                }),
                _ => None,
            }
        };

        let frame_base = Self::attr_exprloc(die, gimli::DW_AT_frame_base)?;

        let index = out.compile_unit.functions.len();
        out.compile_unit.functions.push(Function {
            name,
            decl,
            ranges,
            frame_base,
            variables: vec![],
            statements: OnceCell::new(),
        });
        Ok(Some(index))
    }

    fn parse_variable(
        &self,
        unit: &gimli::Unit<EndianArcSlice>,
        die: &DebuggingInformationEntry<EndianArcSlice>,
        unit_index: usize,
        enclosing_fn: Option<usize>,
        out: &mut ParsedUnit,
    ) -> Result<(), Error> {
        let Some(name) = self.attr_string_hash(unit, die, gimli::DW_AT_name)? else {
            return Ok(());
        };
        let location = Self::attr_exprloc(die, gimli::DW_AT_location)?;
        let frame_base = enclosing_fn
            .and_then(|f| out.compile_unit.functions.get(f))
            .and_then(|f| f.frame_base.clone());

        let var_index = out.compile_unit.variables.len();
        out.compile_unit.variables.push(Variable {
            name,
            type_ndx: None,
            location,
            frame_base,
        });
        if let Some(target) = Self::attr_type_ref(die)? {
            out.fixups.push(VarFixup {
                unit: unit_index,
                variable: var_index,
                target,
            });
        }
        match enclosing_fn {
            Some(f) => {
                if let Some(function) = out.compile_unit.functions.get_mut(f) {
                    function.variables.push(var_index);
                }
            }
            None => out.compile_unit.globals.push(var_index),
        }
        Ok(())
    }
}

fn language_supported(lang: DwLang) -> bool {
    // C17 (0x2c) and C++20 (0x2a) spelled numerically, older toolchains in
    // the wild still emit them with pre-registry codes
    matches!(
        lang,
        gimli::DW_LANG_C
            | gimli::DW_LANG_C89
            | gimli::DW_LANG_C99
            | gimli::DW_LANG_C11
            | gimli::DW_LANG_C_plus_plus
            | gimli::DW_LANG_C_plus_plus_03
            | gimli::DW_LANG_C_plus_plus_11
            | gimli::DW_LANG_C_plus_plus_14
            | gimli::DW_LANG_Rust
    ) || matches!(lang.0, 0x2a..=0x2c)
        || lang == DW_LANG_ZIG
}

fn primitive_kind(encoding: DwAte) -> Option<PrimitiveKind> {
    match encoding {
        gimli::DW_ATE_signed => Some(PrimitiveKind::Signed),
        gimli::DW_ATE_unsigned => Some(PrimitiveKind::Unsigned),
        gimli::DW_ATE_float => Some(PrimitiveKind::Float),
        gimli::DW_ATE_boolean => Some(PrimitiveKind::Boolean),
        gimli::DW_ATE_signed_char | gimli::DW_ATE_unsigned_char => Some(PrimitiveKind::String),
        gimli::DW_ATE_UTF | gimli::DW_ATE_ASCII => Some(PrimitiveKind::String),
        gimli::DW_ATE_complex_float | gimli::DW_ATE_imaginary_float => {
            Some(PrimitiveKind::Complex)
        }
        _ => None,
    }
}

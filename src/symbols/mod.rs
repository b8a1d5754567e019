//! Symbol loading: the language-neutral program model built from an ELF
//! image and its DWARF debug information.

pub mod elf;
pub mod eval;
pub mod symtab;
pub mod types;
mod unit;
pub mod unwind;

use crate::address::FileAddress;
use crate::error::Error;
use crate::strings::{StringCache, StringHash};
use crate::symbols::types::{TypeNdx, TypePool, TypePoolBuilder};
use crate::symbols::unit::UnitParser;
use crate::symbols::unwind::UnwindTables;
use bytes::Bytes;
use gimli::DebugInfoOffset;
use log::{info, warn};
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type EndianArcSlice = gimli::EndianArcSlice<gimli::RunTimeEndian>;

/// A source coordinate: interned absolute path plus line/column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceRef {
    pub file_hash: StringHash,
    pub line: u64,
    pub column: u64,
}

/// One evaluated row of a line-number program.
#[derive(Clone, Copy, Debug)]
pub struct LineRow {
    pub address: u64,
    pub file_hash: StringHash,
    pub line: u64,
    pub column: u64,
    pub is_stmt: bool,
    pub prologue_end: bool,
    pub end_sequence: bool,
}

/// A breakpointable statement of one source file.
///
/// `breakpoint_addr` is the first address of the line's statement; within a
/// file these are unique.
#[derive(Clone, Copy, Debug)]
pub struct SourceStatement {
    pub address: FileAddress,
    pub line: u64,
    pub breakpoint_addr: FileAddress,
}

#[derive(Clone, Debug)]
pub struct SourceFile {
    pub path_hash: StringHash,
    /// Sorted by line.
    pub statements: Vec<SourceStatement>,
}

#[derive(Clone, Debug)]
pub struct Variable {
    pub name: StringHash,
    pub type_ndx: Option<TypeNdx>,
    /// Opaque location expression program, input to the evaluator.
    pub location: Option<Bytes>,
    /// Frame-base expression of the owning function, if any.
    pub frame_base: Option<Bytes>,
}

#[derive(Clone, Debug)]
pub struct Function {
    pub name: StringHash,
    pub decl: Option<SourceRef>,
    /// Sorted by low address.
    pub ranges: Vec<gimli::Range>,
    pub frame_base: Option<Bytes>,
    /// Indices into the owning unit's `variables`.
    pub variables: Vec<usize>,
    /// Lazily computed statement set; the step-over hot path reuses it.
    pub(crate) statements: OnceCell<Vec<SourceStatement>>,
}

#[derive(Clone, Debug)]
pub struct CompileUnit {
    pub(crate) offset: DebugInfoOffset,
    pub name: StringHash,
    pub language: Option<gimli::DwLang>,
    /// Disjoint, sorted by low address.
    pub ranges: Vec<gimli::Range>,
    pub source_files: Vec<SourceFile>,
    /// Sorted by first range low address.
    pub functions: Vec<Function>,
    pub variables: Vec<Variable>,
    /// Indices into `variables` for CU-scope (global) variables only;
    /// function locals and parameters are reachable through
    /// [`Function::variables`] instead.
    pub globals: Vec<usize>,
    /// Full line table, sorted by address.
    pub lines: Vec<LineRow>,
}

impl CompileUnit {
    pub fn source_file(&self, path_hash: StringHash) -> Option<&SourceFile> {
        self.source_files.iter().find(|f| f.path_hash == path_hash)
    }

    /// The line row covering `pc`: the row with the largest address <= pc.
    pub fn line_for_pc(&self, pc: FileAddress) -> Option<&LineRow> {
        let pos = self
            .lines
            .partition_point(|row| row.address <= pc.as_u64());
        self.lines[..pos]
            .iter()
            .rev()
            .find(|row| !row.end_sequence)
    }

    /// Statements of one function: the compile-unit statements whose address
    /// falls into the function's ranges.
    pub fn function_statements<'a>(&'a self, function: &'a Function) -> &'a [SourceStatement] {
        function.statements.get_or_init(|| {
            self.source_files
                .iter()
                .flat_map(|f| f.statements.iter())
                .filter(|s| s.breakpoint_addr.in_ranges(&function.ranges))
                .copied()
                .collect()
        })
    }
}

/// Result of symbol loading; immutable once published.
pub struct Target {
    pub path: PathBuf,
    pub pie: bool,
    pub address_size: u8,
    pub entry_point: FileAddress,
    pub strings: Arc<StringCache>,
    pub compile_units: Vec<CompileUnit>,
    pub data_types: TypePool,
    pub unwind: UnwindTables,
    /// ELF text symbols; name fallback where DWARF has no function.
    pub symbols: symtab::SymbolTab,
    /// PC → compile-unit map, sorted by range start.
    pc_index: Vec<(gimli::Range, usize)>,
}

impl Target {
    /// Load symbols for the binary at `path`.
    ///
    /// Fails when the file is not a little-endian ELF or when it carries no
    /// usable DWARF information; a single undecodable entity only degrades.
    pub fn load(path: &Path, strings: Arc<StringCache>) -> Result<Self, Error> {
        let image = elf::read_image(path, &strings)?;

        let mut builder = TypePoolBuilder::new(image.address_size);
        let parser = UnitParser::new(&image.dwarf, &strings);

        let mut compile_units = vec![];
        let mut fixups = vec![];
        let mut ordinal = 0_usize;
        let mut headers = image.dwarf.units();
        while let Some(header) = headers.next()? {
            // the ordinal keys the type-reference maps and stays unique even
            // when a unit is skipped
            ordinal += 1;
            match parser.parse(header, ordinal, &mut builder) {
                Ok(Some(parsed)) => {
                    let unit_index = compile_units.len();
                    compile_units.push(parsed.compile_unit);
                    fixups.extend(parsed.fixups.into_iter().map(|f| (unit_index, f)));
                }
                Ok(None) => {}
                Err(e) => {
                    // one broken unit must not poison the whole load
                    warn!(target: "symbols", "skip undecodable compile unit: {e:#}");
                }
            }
        }
        if ordinal == 0 {
            return Err(Error::SectionNotFound(".debug_info"));
        }
        if compile_units.is_empty() {
            return Err(Error::LanguageUnsupported);
        }

        for (unit_index, fixup) in fixups {
            let resolved = builder.lookup(fixup.unit, fixup.target);
            if let Some(var) = compile_units
                .get_mut(unit_index)
                .and_then(|cu| cu.variables.get_mut(fixup.variable))
            {
                var.type_ndx = resolved;
            }
        }
        let data_types = builder.finish();

        let pc_index = build_pc_index(&image.dwarf, &compile_units);
        let unwind = UnwindTables::new(image.eh_frame, image.debug_frame, image.bases);

        info!(
            target: "symbols",
            "loaded {}: {} compile units, {} data types",
            path.display(),
            compile_units.len(),
            data_types.len(),
        );
        Ok(Target {
            path: path.to_path_buf(),
            pie: image.pie,
            address_size: image.address_size,
            entry_point: image.entry_point,
            strings,
            compile_units,
            data_types,
            unwind,
            symbols: image.symbols,
            pc_index,
        })
    }

    /// Display name for a code address: the DWARF function if one covers it,
    /// otherwise the ELF text symbol.
    pub fn name_for_pc(&self, pc: FileAddress) -> Option<StringHash> {
        self.function_for_pc(pc)
            .map(|(_, f)| f.name)
            .or_else(|| self.symbols.find_by_pc(pc).map(|s| s.name))
    }

    /// Compile unit covering `pc`.
    pub fn unit_for_pc(&self, pc: FileAddress) -> Option<&CompileUnit> {
        let pos = self
            .pc_index
            .partition_point(|(range, _)| range.begin <= pc.as_u64());
        self.pc_index[..pos]
            .iter()
            .rev()
            .find(|(range, _)| pc.in_range(range))
            .map(|(_, idx)| &self.compile_units[*idx])
    }

    /// Function covering `pc` together with its unit.
    pub fn function_for_pc(&self, pc: FileAddress) -> Option<(&CompileUnit, &Function)> {
        let unit = self.unit_for_pc(pc)?;
        let function = unit
            .functions
            .iter()
            .find(|f| pc.in_ranges(&f.ranges))?;
        Some((unit, function))
    }

    /// Source coordinate of `pc` from the line table.
    pub fn place_for_pc(&self, pc: FileAddress) -> Option<SourceRef> {
        let unit = self.unit_for_pc(pc)?;
        let row = unit.line_for_pc(pc)?;
        Some(SourceRef {
            file_hash: row.file_hash,
            line: row.line,
            column: row.column,
        })
    }

    /// Resolve a source coordinate to a breakpointable address: the first
    /// statement of the named file whose line is >= the requested line,
    /// tie-broken by the smallest breakpoint address.
    pub fn resolve_source(&self, file_hash: StringHash, line: u64) -> Option<FileAddress> {
        let mut best: Option<(u64, FileAddress)> = None;
        for unit in &self.compile_units {
            let Some(file) = unit.source_file(file_hash) else {
                continue;
            };
            for statement in file.statements.iter().filter(|s| s.line >= line) {
                let candidate = (statement.line, statement.breakpoint_addr);
                if best.map(|b| candidate < b).unwrap_or(true) {
                    best = Some(candidate);
                }
            }
        }
        best.map(|(_, addr)| addr)
    }

    /// True when any compile unit knows the named source file.
    pub fn knows_file(&self, file_hash: StringHash) -> bool {
        self.compile_units
            .iter()
            .any(|cu| cu.source_file(file_hash).is_some())
    }
}

/// Seed the PC→CU map from `.debug_aranges` and fill the gaps from unit
/// ranges; sorted by range start.
fn build_pc_index(
    dwarf: &gimli::Dwarf<EndianArcSlice>,
    compile_units: &[CompileUnit],
) -> Vec<(gimli::Range, usize)> {
    let mut index: Vec<(gimli::Range, usize)> = vec![];

    let mut covered = std::collections::HashSet::new();
    let mut headers = dwarf.debug_aranges.headers();
    loop {
        match headers.next() {
            Ok(Some(header)) => {
                let Some(unit_idx) = compile_units
                    .iter()
                    .position(|cu| cu.offset == header.debug_info_offset())
                else {
                    continue;
                };
                let mut entries = header.entries();
                while let Ok(Some(entry)) = entries.next() {
                    if entry.length() == 0 {
                        continue;
                    }
                    index.push((
                        gimli::Range {
                            begin: entry.address(),
                            end: entry.address() + entry.length(),
                        },
                        unit_idx,
                    ));
                }
                covered.insert(unit_idx);
            }
            Ok(None) => break,
            Err(e) => {
                warn!(target: "symbols", "unreadable .debug_aranges: {e}");
                break;
            }
        }
    }

    for (idx, unit) in compile_units.iter().enumerate() {
        if covered.contains(&idx) {
            continue;
        }
        for range in &unit.ranges {
            index.push((*range, idx));
        }
    }

    index.sort_unstable_by_key(|(range, _)| range.begin);
    index
}

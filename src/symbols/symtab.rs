//! ELF symbol-table fallback for naming code addresses that DWARF does not
//! cover (runtime startup stubs, assembly entry points).

use crate::address::FileAddress;
use crate::strings::{StringCache, StringHash};
use object::{Object, ObjectSymbol, SymbolKind};

#[derive(Debug, Clone, Copy)]
pub struct Symbol {
    pub name: StringHash,
    pub address: FileAddress,
    pub size: u64,
}

/// Text symbols of the image, sorted by address.
#[derive(Debug, Default)]
pub struct SymbolTab {
    symbols: Vec<Symbol>,
}

impl SymbolTab {
    pub(super) fn new(object: &object::File, strings: &StringCache) -> Self {
        let mut symbols: Vec<Symbol> = object
            .symbols()
            .filter(|symbol| symbol.kind() == SymbolKind::Text && symbol.address() != 0)
            .map(|symbol| {
                let raw = symbol.name().unwrap_or_default();
                let demangled = rustc_demangle::demangle(raw).to_string();
                Symbol {
                    name: strings.add_str(&demangled),
                    address: FileAddress::from(symbol.address()),
                    size: symbol.size(),
                }
            })
            .collect();
        symbols.sort_unstable_by_key(|s| s.address);
        Self { symbols }
    }

    /// The text symbol covering `pc`, if any. Zero-sized symbols cover up to
    /// the next symbol.
    pub fn find_by_pc(&self, pc: FileAddress) -> Option<&Symbol> {
        let pos = self.symbols.partition_point(|s| s.address <= pc);
        let symbol = self.symbols[..pos].last()?;
        if symbol.size != 0 && pc.as_u64() >= symbol.address.as_u64() + symbol.size {
            return None;
        }
        Some(symbol)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

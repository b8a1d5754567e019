//! ELF image reading: header validation, debug-section extraction (with
//! transparent decompression), PIE detection and the unwind-section bases.

use crate::address::FileAddress;
use crate::error::Error;
use crate::strings::StringCache;
use crate::symbols::symtab::SymbolTab;
use crate::symbols::EndianArcSlice;
use gimli::{BaseAddresses, DebugFrame, EhFrame, Reader, RunTimeEndian, Section, SectionId};
use log::debug;
use memmap2::Mmap;
use object::{Object, ObjectSection};
use rayon::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Everything the symbol loader needs from the on-disk image. Section bytes
/// are reference counted, the mmap is released once extraction is done.
pub struct ElfImage {
    pub pie: bool,
    pub address_size: u8,
    pub entry_point: FileAddress,
    pub dwarf: gimli::Dwarf<EndianArcSlice>,
    pub eh_frame: Option<EhFrame<EndianArcSlice>>,
    pub debug_frame: Option<DebugFrame<EndianArcSlice>>,
    pub bases: BaseAddresses,
    pub symbols: SymbolTab,
}

/// Debug sections extracted from the image. The first group feeds
/// [`gimli::Dwarf::load`], the last two feed the unwind tables.
const DEBUG_SECTIONS: &[&str] = &[
    ".debug_abbrev",
    ".debug_addr",
    ".debug_aranges",
    ".debug_info",
    ".debug_line",
    ".debug_line_str",
    ".debug_str",
    ".debug_str_offsets",
    ".debug_types",
    ".debug_loc",
    ".debug_loclists",
    ".debug_ranges",
    ".debug_rnglists",
    ".eh_frame",
    ".debug_frame",
];

pub fn read_image(path: &Path, strings: &StringCache) -> Result<ElfImage, Error> {
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }
    let file = fs::File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    validate_ident(&mmap)?;

    let object = object::File::parse(&*mmap)?;
    let endian = if object.is_little_endian() {
        RunTimeEndian::Little
    } else {
        return Err(Error::UnexpectedValue("big-endian ELF is not supported"));
    };
    let address_size: u8 = if object.is_64() { 8 } else { 4 };

    // Decompress and copy every wanted section up front, in parallel; the
    // gimli loader below then only clones Arcs out of this map.
    let extracted: Mutex<HashMap<String, EndianArcSlice>> = Mutex::new(HashMap::new());
    DEBUG_SECTIONS.par_iter().for_each(|&name| {
        let data = object
            .section_by_name(name)
            .and_then(|section| section.uncompressed_data().ok())
            .unwrap_or(Cow::Borrowed(&[][..]));
        let slice = gimli::EndianArcSlice::new(Arc::from(&*data), endian);
        extracted
            .lock()
            .expect("section map lock poisoned")
            .insert(name.to_owned(), slice);
    });
    let mut extracted = extracted.into_inner().expect("section map lock poisoned");

    let empty = gimli::EndianArcSlice::new(Arc::from(&[][..]), endian);
    let dwarf = gimli::Dwarf::load(|id: SectionId| -> Result<EndianArcSlice, Error> {
        Ok(extracted.get(id.name()).cloned().unwrap_or_else(|| empty.clone()))
    })?;

    let mut bases = BaseAddresses::default();
    for (name, set) in [
        (".eh_frame_hdr", BaseAddresses::set_eh_frame_hdr as fn(BaseAddresses, u64) -> BaseAddresses),
        (".eh_frame", BaseAddresses::set_eh_frame),
        (".text", BaseAddresses::set_text),
        (".got", BaseAddresses::set_got),
    ] {
        if let Some(section) = object.section_by_name(name) {
            bases = set(bases, section.address());
        }
    }

    let eh_frame = extracted.remove(".eh_frame").and_then(|data| {
        if data.is_empty() {
            return None;
        }
        let mut section = EhFrame::from(data);
        section.set_address_size(address_size);
        Some(section)
    });
    let debug_frame = extracted.remove(".debug_frame").and_then(|data| {
        if data.is_empty() {
            return None;
        }
        let mut section = DebugFrame::from(data);
        section.set_address_size(address_size);
        Some(section)
    });

    let symbols = SymbolTab::new(&object, strings);
    let pie = detect_pie(&object, address_size);
    debug!(
        target: "symbols",
        "image {}: pie={pie}, address_size={address_size}, entry={:#x}",
        path.display(),
        object.entry(),
    );

    Ok(ElfImage {
        pie,
        address_size,
        entry_point: FileAddress::from(object.entry()),
        dwarf,
        eh_frame,
        debug_frame,
        bases,
        symbols,
    })
}

fn validate_ident(data: &[u8]) -> Result<(), Error> {
    if data.is_empty() {
        return Err(Error::FileEmpty);
    }
    if data.len() < 7 || data[..4] != [0x7f, b'E', b'L', b'F'] {
        return Err(Error::InvalidElfMagic);
    }
    // EI_VERSION must be EV_CURRENT
    if data[6] != 1 {
        return Err(Error::InvalidElfVersion);
    }
    Ok(())
}

/// A binary is PIE when `.dynamic` carries `DT_FLAGS_1` with `DF_1_PIE`.
fn detect_pie(object: &object::File, address_size: u8) -> bool {
    let Some(section) = object.section_by_name(".dynamic") else {
        return false;
    };
    let Ok(data) = section.data() else {
        return false;
    };

    let entry_size = address_size as usize * 2;
    for entry in data.chunks_exact(entry_size) {
        let (tag, value) = if address_size == 8 {
            (
                u64::from_le_bytes(entry[..8].try_into().expect("chunk is 16 bytes")),
                u64::from_le_bytes(entry[8..].try_into().expect("chunk is 16 bytes")),
            )
        } else {
            (
                u32::from_le_bytes(entry[..4].try_into().expect("chunk is 8 bytes")) as u64,
                u32::from_le_bytes(entry[4..].try_into().expect("chunk is 8 bytes")) as u64,
            )
        };
        if tag == object::elf::DT_NULL as u64 {
            break;
        }
        if tag == object::elf::DT_FLAGS_1 as u64 {
            return value & object::elf::DF_1_PIE as u64 != 0;
        }
    }
    false
}

//! In-memory ELF model: lookups, cross-reference tables and address
//! translation. The layout-rewriting operations live in `mutation`.

use tracing::{debug, warn};

use crate::elf::data_handler::{DataHandler, Node, NodeKind};
use crate::elf::dynamic::DynamicEntry;
use crate::elf::header::Header;
use crate::elf::note::Note;
use crate::elf::relocation::{Relocation, RelocationPurpose};
use crate::elf::section::Section;
use crate::elf::segment::Segment;
use crate::elf::symbol::{Symbol, SymbolVersion};
use crate::elf::types::*;
use crate::error::{Error, Result};
use crate::utils::{align_up, page_size, read_uint, write_uint};

/// Bookkeeping for a relocated program-header table: where the table went
/// and how many descriptor slots remain before it must move again.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PhdrRelocInfo {
    pub new_offset: u64,
    pub free_slots: u64,
}

/// An ELF binary: one header, ordered sections and segments, the dynamic
/// table, both symbol tables, relocations and notes, all backed by a
/// single byte image.
pub struct Binary {
    pub(crate) header: Header,
    pub(crate) sections: Vec<Section>,
    pub(crate) segments: Vec<Segment>,
    pub(crate) dynamic_entries: Vec<DynamicEntry>,
    pub(crate) dynamic_symbols: Vec<Symbol>,
    pub(crate) static_symbols: Vec<Symbol>,
    pub(crate) symbol_versions: Vec<SymbolVersion>,
    pub(crate) relocations: Vec<Relocation>,
    pub(crate) notes: Vec<Note>,
    pub(crate) interpreter: String,
    pub(crate) overlay: Vec<u8>,
    pub(crate) handler: DataHandler,
    pub(crate) phdr_reloc: PhdrRelocInfo,
}

impl Binary {
    /// Empty binary of the given identity. A loader (or a test) populates
    /// it through the `push_*` methods.
    pub fn new(class: Class, encoding: Encoding, file_type: FileType, machine: u16) -> Self {
        Self {
            header: Header::new(class, encoding, file_type, machine),
            sections: Vec::new(),
            segments: Vec::new(),
            dynamic_entries: Vec::new(),
            dynamic_symbols: Vec::new(),
            static_symbols: Vec::new(),
            symbol_versions: Vec::new(),
            relocations: Vec::new(),
            notes: Vec::new(),
            interpreter: String::new(),
            overlay: Vec::new(),
            handler: DataHandler::default(),
            phdr_reloc: PhdrRelocInfo::default(),
        }
    }

    /// Seed the backing image with the raw file bytes.
    pub fn with_image(mut self, data: Vec<u8>) -> Self {
        self.handler = DataHandler::new(data);
        self
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn class(&self) -> Class {
        self.header.class
    }

    pub fn entrypoint(&self) -> u64 {
        self.header.entrypoint
    }

    // Loader surface
    // ==============

    /// Register a section exactly as described, without any layout fixups.
    pub fn push_section(&mut self, section: Section) {
        let node_size = if section.is_nobits() { 0 } else { section.size };
        self.handler
            .add(Node::new(section.file_offset, node_size, NodeKind::Section));
        self.sections.push(section);
        self.header.numberof_sections = self.sections.len() as u16;
    }

    /// Register a segment exactly as described, without any layout fixups.
    pub fn push_segment(&mut self, segment: Segment) {
        self.handler.add(Node::new(
            segment.file_offset,
            segment.physical_size,
            NodeKind::Segment,
        ));
        self.segments.push(segment);
        self.header.numberof_segments = self.segments.len() as u16;
    }

    pub fn push_dynamic_entry(&mut self, entry: DynamicEntry) {
        self.dynamic_entries.push(entry);
    }

    pub fn push_note(&mut self, note: Note) {
        self.notes.push(note);
    }

    pub fn set_interpreter(&mut self, interpreter: impl Into<String>) {
        self.interpreter = interpreter.into();
    }

    pub fn set_overlay(&mut self, overlay: Vec<u8>) {
        self.overlay = overlay;
    }

    // Sections
    // ========

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.iter().any(|s| s.name == name)
    }

    /// First section with the given name.
    pub fn get_section(&self, name: &str) -> Result<&Section> {
        self.sections
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::not_found(format!("section '{name}'")))
    }

    pub(crate) fn section_index(&self, name: &str) -> Result<usize> {
        self.sections
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| Error::not_found(format!("section '{name}'")))
    }

    pub fn section_from_offset(&self, offset: u64, skip_nobits: bool) -> Result<&Section> {
        self.sections
            .iter()
            .find(|s| (!skip_nobits || !s.is_nobits()) && s.contains_offset(offset))
            .ok_or_else(|| Error::not_found(format!("section covering offset {offset:#x}")))
    }

    pub fn section_from_virtual_address(&self, address: u64, skip_nobits: bool) -> Result<&Section> {
        self.sections
            .iter()
            .find(|s| (!skip_nobits || !s.is_nobits()) && s.contains_virtual_address(address))
            .ok_or_else(|| Error::not_found(format!("section covering address {address:#x}")))
    }

    pub fn section_of_type(&self, section_type: u32) -> Result<&Section> {
        self.sections
            .iter()
            .find(|s| s.section_type == section_type)
            .ok_or_else(|| Error::not_found(format!("section of type {section_type:#x}")))
    }

    pub fn has_section_of_type(&self, section_type: u32) -> bool {
        self.sections.iter().any(|s| s.section_type == section_type)
    }

    pub fn text_section(&self) -> Result<&Section> {
        self.get_section(".text")
    }

    pub fn dynamic_section(&self) -> Result<&Section> {
        self.section_of_type(SHT_DYNAMIC)
    }

    pub fn hash_section(&self) -> Result<&Section> {
        self.sections
            .iter()
            .find(|s| s.section_type == SHT_HASH || s.section_type == SHT_GNU_HASH)
            .ok_or_else(|| Error::not_found("SHT_HASH / SHT_GNU_HASH section"))
    }

    /// Bytes the section covers. NOBITS sections come back empty.
    pub fn section_content(&self, section: &Section) -> &[u8] {
        if section.is_nobits() {
            return &[];
        }
        self.handler.read(section.file_offset, section.size)
    }

    /// Replace the bytes of the named section. The new content must fit.
    pub fn set_section_content(&mut self, name: &str, content: &[u8]) -> Result<()> {
        let idx = self.section_index(name)?;
        let section = &self.sections[idx];
        if content.len() as u64 > section.size {
            return Err(Error::Overflow(format!(
                "content of {:#x} bytes does not fit section '{}' ({:#x})",
                content.len(),
                name,
                section.size
            )));
        }
        self.handler.write(section.file_offset, content);
        Ok(())
    }

    // Segments
    // ========

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment_from_offset(&self, offset: u64) -> Result<&Segment> {
        self.segments
            .iter()
            .find(|s| s.contains_offset(offset))
            .ok_or_else(|| Error::not_found(format!("segment covering offset {offset:#x}")))
    }

    pub fn segment_from_virtual_address(&self, address: u64) -> Result<&Segment> {
        self.segments
            .iter()
            .find(|s| s.contains_virtual_address(address))
            .ok_or_else(|| Error::not_found(format!("segment covering address {address:#x}")))
    }

    pub fn segment_of_type(&self, segment_type: u32) -> Result<&Segment> {
        self.segments
            .iter()
            .find(|s| s.segment_type == segment_type)
            .ok_or_else(|| Error::not_found(format!("segment of type {segment_type:#x}")))
    }

    pub fn has_segment_of_type(&self, segment_type: u32) -> bool {
        self.segments.iter().any(|s| s.segment_type == segment_type)
    }

    /// File bytes the segment maps; the BSS tail is not included.
    pub fn segment_content(&self, segment: &Segment) -> &[u8] {
        self.handler.read(segment.file_offset, segment.physical_size)
    }

    // Address space
    // =============

    /// Lowest `vaddr - offset` delta over the LOAD segments.
    pub fn imagebase(&self) -> u64 {
        self.segments
            .iter()
            .filter(|s| s.is_load())
            .map(|s| s.virtual_address - s.file_offset)
            .min()
            .unwrap_or(0)
    }

    /// Page-aligned extent of the mapped image, relative to the imagebase.
    pub fn virtual_size(&self) -> u64 {
        let end = self
            .segments
            .iter()
            .filter(|s| s.is_load())
            .map(Segment::virtual_end)
            .max()
            .unwrap_or(0);
        align_up(end, page_size()) - self.imagebase()
    }

    pub fn virtual_address_to_offset(&self, address: u64) -> Result<u64> {
        let segment = self
            .segments
            .iter()
            .find(|s| s.is_load() && s.contains_virtual_address(address))
            .ok_or(Error::ConversionFailed(address))?;
        let base = segment.virtual_address - segment.file_offset;
        Ok(address - base)
    }

    pub fn offset_to_virtual_address(&self, offset: u64, slide: u64) -> u64 {
        let segment = self
            .segments
            .iter()
            .find(|s| s.is_load() && s.contains_offset(offset));
        match segment {
            None => {
                if slide > 0 {
                    slide + offset
                } else {
                    self.imagebase() + offset
                }
            }
            Some(segment) => {
                let base = segment.virtual_address - segment.file_offset;
                if slide > 0 {
                    (base - self.imagebase()) + slide + offset
                } else {
                    base + offset
                }
            }
        }
    }

    pub fn is_pie(&self) -> bool {
        self.has_segment_of_type(PT_INTERP) && self.header.file_type == FileType::SharedObject
    }

    pub fn has_nx(&self) -> bool {
        match self.segment_of_type(PT_GNU_STACK) {
            Ok(stack) => !stack.is_executable(),
            Err(_) => false,
        }
    }

    pub fn has_interpreter(&self) -> bool {
        self.has_segment_of_type(PT_INTERP) && !self.interpreter.is_empty()
    }

    pub fn interpreter(&self) -> Result<&str> {
        if !self.has_interpreter() {
            return Err(Error::not_found("interpreter"));
        }
        Ok(&self.interpreter)
    }

    // Dynamic table
    // =============

    pub fn dynamic_entries(&self) -> &[DynamicEntry] {
        &self.dynamic_entries
    }

    pub fn has_dynamic_entry(&self, tag: i64) -> bool {
        self.dynamic_entries.iter().any(|e| e.tag == tag)
    }

    pub fn dynamic_entry(&self, tag: i64) -> Result<&DynamicEntry> {
        self.dynamic_entries
            .iter()
            .find(|e| e.tag == tag)
            .ok_or_else(|| Error::not_found(format!("dynamic entry with tag {tag:#x}")))
    }

    pub fn dynamic_entry_mut(&mut self, tag: i64) -> Result<&mut DynamicEntry> {
        self.dynamic_entries
            .iter_mut()
            .find(|e| e.tag == tag)
            .ok_or_else(|| Error::not_found(format!("dynamic entry with tag {tag:#x}")))
    }

    /// Insert an entry before the first one sharing its tag, or before the
    /// terminating `DT_NULL`. Keeps the table tag-grouped and
    /// null-terminated.
    pub fn add_dynamic_entry(&mut self, entry: DynamicEntry) -> &DynamicEntry {
        let at = self
            .dynamic_entries
            .iter()
            .position(|e| e.tag == entry.tag || e.tag == DT_NULL)
            .unwrap_or(self.dynamic_entries.len());
        self.dynamic_entries.insert(at, entry);
        &self.dynamic_entries[at]
    }

    /// Remove the first entry equal to `entry`.
    pub fn remove_dynamic_entry(&mut self, entry: &DynamicEntry) -> Result<()> {
        let at = self
            .dynamic_entries
            .iter()
            .position(|e| e == entry)
            .ok_or_else(|| Error::not_found(format!("dynamic entry '{entry}'")))?;
        self.dynamic_entries.remove(at);
        Ok(())
    }

    /// Remove every entry with the given tag.
    pub fn remove_dynamic_entries_by_tag(&mut self, tag: i64) {
        self.dynamic_entries.retain(|e| e.tag != tag);
    }

    pub fn add_library(&mut self, name: impl Into<String>) -> &DynamicEntry {
        self.add_dynamic_entry(DynamicEntry::needed(name))
    }

    pub fn has_library(&self, name: &str) -> bool {
        self.dynamic_entries
            .iter()
            .any(|e| e.tag == DT_NEEDED && e.library_name() == Some(name))
    }

    pub fn get_library(&self, name: &str) -> Result<&DynamicEntry> {
        self.dynamic_entries
            .iter()
            .find(|e| e.tag == DT_NEEDED && e.library_name() == Some(name))
            .ok_or_else(|| Error::not_found(format!("library '{name}'")))
    }

    pub fn remove_library(&mut self, name: &str) -> Result<()> {
        let entry = self.get_library(name)?.clone();
        self.remove_dynamic_entry(&entry)
    }

    pub fn has_gnu_hash(&self) -> bool {
        self.has_dynamic_entry(DT_GNU_HASH)
    }

    pub fn has_sysv_hash(&self) -> bool {
        self.has_dynamic_entry(DT_HASH)
    }

    // Symbols
    // =======

    pub fn dynamic_symbols(&self) -> &[Symbol] {
        &self.dynamic_symbols
    }

    pub fn static_symbols(&self) -> &[Symbol] {
        &self.static_symbols
    }

    pub fn symbol_versions(&self) -> &[SymbolVersion] {
        &self.symbol_versions
    }

    /// Dynamic then static symbols, the order the combined view uses.
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.dynamic_symbols.iter().chain(self.static_symbols.iter())
    }

    pub fn exported_symbols(&self) -> Vec<&Symbol> {
        self.symbols().filter(|s| s.is_exported()).collect()
    }

    pub fn imported_symbols(&self) -> Vec<&Symbol> {
        self.symbols().filter(|s| s.is_imported()).collect()
    }

    pub fn has_dynamic_symbol(&self, name: &str) -> bool {
        self.dynamic_symbols.iter().any(|s| s.name == name)
    }

    pub fn get_dynamic_symbol(&self, name: &str) -> Result<&Symbol> {
        self.dynamic_symbols
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::not_found(format!("symbol '{name}'")))
    }

    pub fn has_static_symbol(&self, name: &str) -> bool {
        self.static_symbols.iter().any(|s| s.name == name)
    }

    pub fn get_static_symbol(&self, name: &str) -> Result<&Symbol> {
        self.static_symbols
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::not_found(format!("symbol '{name}'")))
    }

    /// Every dynamic symbol carries a version record; callers that don't
    /// care get the global one.
    pub fn add_dynamic_symbol(
        &mut self,
        mut symbol: Symbol,
        version: Option<SymbolVersion>,
    ) -> &Symbol {
        self.symbol_versions
            .push(version.unwrap_or_else(SymbolVersion::global));
        symbol.version = Some(self.symbol_versions.len() - 1);
        self.dynamic_symbols.push(symbol);
        self.dynamic_symbols.last().unwrap()
    }

    pub fn add_static_symbol(&mut self, symbol: Symbol) -> &Symbol {
        self.static_symbols.push(symbol);
        self.static_symbols.last().unwrap()
    }

    /// Remove a dynamic symbol along with everything that points at it:
    /// its PLT/GOT relocation, its dynamic relocation and its version
    /// record. Indices held by the surviving records are rebound.
    pub fn remove_dynamic_symbol(&mut self, name: &str) -> Result<()> {
        let sym_idx = self
            .dynamic_symbols
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| Error::not_found(format!("symbol '{name}'")))?;

        for purpose in [RelocationPurpose::PltGot, RelocationPurpose::Dynamic] {
            if let Some(at) = self
                .relocations
                .iter()
                .position(|r| r.purpose == purpose && r.symbol == Some(sym_idx))
            {
                let removed = self.relocations.remove(at);
                let entry_size = self.header.class.reloc_entry_size(removed.is_rela());
                let tag_sz = match purpose {
                    RelocationPurpose::PltGot => DT_PLTRELSZ,
                    _ if removed.is_rela() => DT_RELASZ,
                    _ => DT_RELSZ,
                };
                if let Ok(entry) = self.dynamic_entry_mut(tag_sz) {
                    entry.value = entry.value.saturating_sub(entry_size);
                }
            }
        }

        let version_idx = self.dynamic_symbols[sym_idx].version;
        self.dynamic_symbols.remove(sym_idx);

        // Rebind symbol indices that moved down.
        for reloc in &mut self.relocations {
            match reloc.symbol {
                Some(idx) if idx == sym_idx => reloc.symbol = None,
                Some(idx) if idx > sym_idx => {
                    reloc.symbol = Some(idx - 1);
                    if reloc.info as usize > sym_idx {
                        reloc.info -= 1;
                    }
                }
                _ => {}
            }
        }

        if let Some(version_idx) = version_idx {
            self.symbol_versions.remove(version_idx);
            for symbol in &mut self.dynamic_symbols {
                match symbol.version {
                    Some(idx) if idx == version_idx => symbol.version = None,
                    Some(idx) if idx > version_idx => symbol.version = Some(idx - 1),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    pub fn remove_static_symbol(&mut self, name: &str) -> Result<()> {
        let at = self
            .static_symbols
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| Error::not_found(format!("symbol '{name}'")))?;
        self.static_symbols.remove(at);
        Ok(())
    }

    /// Remove the symbol from both tables.
    pub fn remove_symbol(&mut self, name: &str) -> Result<()> {
        self.remove_static_symbol(name)?;
        self.remove_dynamic_symbol(name)
    }

    /// Make a symbol externally visible: GLOBAL binding, DEFAULT
    /// visibility, a concrete type and a defined section index.
    pub fn export_symbol(&mut self, name: &str, value: u64) -> Result<&Symbol> {
        let sym_idx = match self.dynamic_symbols.iter().position(|s| s.name == name) {
            Some(idx) => idx,
            None => {
                let source = self
                    .static_symbols
                    .iter()
                    .find(|s| s.name == name)
                    .cloned()
                    .unwrap_or_else(|| {
                        let mut sym = Symbol::new(name);
                        sym.symbol_type = STT_COMMON;
                        sym.size = 0x10;
                        sym
                    });
                self.add_dynamic_symbol(source, Some(SymbolVersion::global()));
                self.dynamic_symbols.len() - 1
            }
        };

        let text_idx = self
            .sections
            .iter()
            .position(|s| s.name == ".text")
            .unwrap_or(0);

        let symbol = &mut self.dynamic_symbols[sym_idx];
        if value > 0 {
            symbol.value = value;
        }
        if !matches!(symbol.binding, STB_GLOBAL | STB_WEAK) {
            symbol.binding = STB_GLOBAL;
        }
        if symbol.symbol_type == STT_NOTYPE {
            symbol.symbol_type = STT_COMMON;
        }
        if symbol.shndx == SHN_UNDEF {
            symbol.shndx = text_idx as u16;
        }
        symbol.visibility = STV_DEFAULT;
        Ok(symbol)
    }

    /// Export `address` as a function, deriving a name when none is given.
    pub fn add_exported_function(&mut self, address: u64, name: &str) -> Result<&Symbol> {
        let name = if name.is_empty() {
            format!("func_{address:x}")
        } else {
            name.to_string()
        };

        if let Some(symbol) = self
            .dynamic_symbols
            .iter_mut()
            .chain(self.static_symbols.iter_mut())
            .find(|s| s.name == name)
        {
            symbol.symbol_type = STT_FUNC;
            symbol.binding = STB_GLOBAL;
            symbol.visibility = STV_DEFAULT;
            symbol.value = address;
        } else {
            let mut symbol = Symbol::function(&name, address);
            symbol.visibility = STV_DEFAULT;
            symbol.size = 0x10;
            self.add_static_symbol(symbol);
        }
        self.export_symbol(&name, address)
    }

    /// Reorder the dynamic symbol table. Pairs where exactly one side
    /// carries a version are left in place.
    pub fn permute_dynamic_symbols(&mut self, permutation: &[usize]) {
        let mut done = vec![false; permutation.len()];
        for (i, &target) in permutation.iter().enumerate() {
            if target == i || done.get(target).copied().unwrap_or(true) || done[i] {
                continue;
            }
            let left_versioned = self.dynamic_symbols[i].version.is_some();
            let right_versioned = self.dynamic_symbols[target].version.is_some();
            if left_versioned != right_versioned {
                warn!(index = i, "can't apply permutation: version mismatch");
                continue;
            }
            self.dynamic_symbols.swap(i, target);
            done[i] = true;
            done[target] = true;
        }
    }

    // Relocations
    // ===========

    pub fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    pub fn dynamic_relocations(&self) -> impl Iterator<Item = &Relocation> {
        self.relocations
            .iter()
            .filter(|r| r.purpose == RelocationPurpose::Dynamic)
    }

    pub fn pltgot_relocations(&self) -> impl Iterator<Item = &Relocation> {
        self.relocations
            .iter()
            .filter(|r| r.purpose == RelocationPurpose::PltGot)
    }

    pub fn object_relocations(&self) -> impl Iterator<Item = &Relocation> {
        self.relocations
            .iter()
            .filter(|r| r.purpose == RelocationPurpose::Object)
    }

    /// Register the relocation's symbol in the dynamic table if it names
    /// one that is not there yet, and point `info` at its index.
    fn bind_relocation_symbol(&mut self, reloc: &mut Relocation, symbol: Option<Symbol>) {
        if let Some(symbol) = symbol {
            let idx = match self.dynamic_symbols.iter().position(|s| s.name == symbol.name) {
                Some(idx) => idx,
                None => {
                    self.add_dynamic_symbol(symbol, None);
                    self.dynamic_symbols.len() - 1
                }
            };
            reloc.info = idx as u32;
            reloc.symbol = Some(idx);
        }
    }

    /// Add a relocation to the dynamic table and grow `DT_RELSZ` /
    /// `DT_RELASZ` by one record.
    pub fn add_dynamic_relocation(
        &mut self,
        mut relocation: Relocation,
        symbol: Option<Symbol>,
    ) -> &Relocation {
        relocation.purpose = RelocationPurpose::Dynamic;
        self.bind_relocation_symbol(&mut relocation, symbol);

        let (tag_sz, tag_ent) = if relocation.is_rela() {
            (DT_RELASZ, DT_RELAENT)
        } else {
            (DT_RELSZ, DT_RELENT)
        };
        if self.has_dynamic_entry(tag_sz) && self.has_dynamic_entry(tag_ent) {
            let ent = self.dynamic_entry(tag_ent).unwrap().value;
            self.dynamic_entry_mut(tag_sz).unwrap().value += ent;
        }

        self.relocations.push(relocation);
        self.relocations.last().unwrap()
    }

    /// Add a PLT/GOT relocation and grow `DT_PLTRELSZ` by one record.
    pub fn add_pltgot_relocation(
        &mut self,
        mut relocation: Relocation,
        symbol: Option<Symbol>,
    ) -> &Relocation {
        relocation.purpose = RelocationPurpose::PltGot;
        self.bind_relocation_symbol(&mut relocation, symbol);

        let entry_size = self.header.class.reloc_entry_size(relocation.is_rela());
        if self.has_dynamic_entry(DT_PLTRELSZ) && self.has_dynamic_entry(DT_JMPREL) {
            self.dynamic_entry_mut(DT_PLTRELSZ).unwrap().value += entry_size;
        }

        self.relocations.push(relocation);
        self.relocations.last().unwrap()
    }

    /// Add a relocation scoped to one section of a relocatable object.
    pub fn add_object_relocation(
        &mut self,
        mut relocation: Relocation,
        section_name: &str,
    ) -> Result<&Relocation> {
        let section_idx = self.section_index(section_name)?;
        relocation.purpose = RelocationPurpose::Object;
        relocation.section = Some(section_idx);
        self.relocations.push(relocation);
        Ok(self.relocations.last().unwrap())
    }

    pub fn get_relocation_by_address(&self, address: u64) -> Option<&Relocation> {
        self.relocations.iter().find(|r| r.address == address)
    }

    pub fn get_relocation_for_symbol(&self, symbol_name: &str) -> Option<&Relocation> {
        let idx = self
            .dynamic_symbols
            .iter()
            .position(|s| s.name == symbol_name)?;
        self.relocations.iter().find(|r| r.symbol == Some(idx))
    }

    // Notes
    // =====

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn has_note(&self, note_type: u32) -> bool {
        self.notes.iter().any(|n| n.note_type == note_type)
    }

    pub fn get_note(&self, note_type: u32) -> Result<&Note> {
        self.notes
            .iter()
            .find(|n| n.note_type == note_type)
            .ok_or_else(|| Error::not_found(format!("note of type {note_type:#x}")))
    }

    pub fn add_note(&mut self, note: Note) -> &Note {
        self.notes.push(note);
        self.notes.last().unwrap()
    }

    pub fn remove_notes_by_type(&mut self, note_type: u32) {
        self.notes.retain(|n| n.note_type != note_type);
    }

    // Patching
    // ========

    /// Translate a patch target to a file offset. Relocatable objects have
    /// no segments; their addresses are file offsets already.
    fn patch_offset(&self, address: u64) -> Result<u64> {
        if self.header.file_type == FileType::Relocatable {
            self.section_from_offset(address, true)?;
            Ok(address)
        } else {
            let segment = self.segment_from_virtual_address(address)?;
            Ok(segment.file_offset + (address - segment.virtual_address))
        }
    }

    pub fn patch_address_bytes(&mut self, address: u64, patch: &[u8]) -> Result<()> {
        let offset = self.patch_offset(address)?;
        self.handler.write(offset, patch);
        Ok(())
    }

    pub fn patch_address_value(&mut self, address: u64, value: u64, size: usize) -> Result<()> {
        if size > 8 {
            return Err(Error::Overflow(format!("patch size {size} exceeds a word")));
        }
        let mut bytes = vec![0u8; size];
        write_uint(&mut bytes, 0, value, size, self.header.encoding.byte_order())?;
        self.patch_address_bytes(address, &bytes)
    }

    /// Point the GOT slot of `symbol_name` at `address`.
    pub fn patch_pltgot(&mut self, symbol_name: &str, address: u64) -> Result<()> {
        let sym_idx = self
            .dynamic_symbols
            .iter()
            .position(|s| s.name == symbol_name)
            .ok_or_else(|| Error::not_found(format!("symbol '{symbol_name}'")))?;
        let got_address = self
            .relocations
            .iter()
            .find(|r| r.purpose == RelocationPurpose::PltGot && r.symbol == Some(sym_idx))
            .map(|r| r.address)
            .ok_or_else(|| {
                Error::not_found(format!("PLT/GOT relocation for symbol '{symbol_name}'"))
            })?;
        let word = self.header.class.word_size();
        self.patch_address_value(got_address, address, word)
    }

    pub fn content_from_virtual_address(&self, address: u64, size: u64) -> Result<Vec<u8>> {
        let segment = self.segment_from_virtual_address(address)?;
        let start = segment.file_offset + (address - segment.virtual_address);
        Ok(self.handler.read(start, size).to_vec())
    }

    // Layout bounds
    // =============

    pub fn last_offset_section(&self) -> u64 {
        self.sections
            .iter()
            .map(|s| s.file_offset + s.size)
            .max()
            .unwrap_or(0)
    }

    pub fn last_offset_segment(&self) -> u64 {
        self.segments.iter().map(Segment::file_end).max().unwrap_or(0)
    }

    /// First page-aligned virtual address past every segment.
    pub fn next_virtual_address(&self) -> u64 {
        let end = self
            .segments
            .iter()
            .map(Segment::virtual_end)
            .max()
            .unwrap_or(0);
        align_up(end, page_size())
    }

    /// End of the file image: content, then whichever of the header tables
    /// comes last.
    pub fn eof_offset(&self) -> u64 {
        let last_content = self
            .sections
            .iter()
            .filter(|s| !s.is_nobits())
            .map(|s| s.file_offset + s.size)
            .max()
            .unwrap_or(0);
        let end_shdr = self.header.section_headers_offset
            + self.sections.len() as u64 * self.header.class.shdr_entry_size();
        let end_phdr = self.header.program_headers_offset
            + self.segments.len() as u64 * self.header.class.phdr_entry_size();
        last_content
            .max(end_shdr)
            .max(end_phdr)
            .max(self.last_offset_segment())
    }

    pub fn has_overlay(&self) -> bool {
        !self.overlay.is_empty()
    }

    pub fn overlay(&self) -> &[u8] {
        &self.overlay
    }

    /// Printable NUL-terminated runs from `.rodata`.
    pub fn strings(&self, min_size: usize) -> Vec<String> {
        let Ok(rodata) = self.get_section(".rodata") else {
            return Vec::new();
        };
        let data = self.section_content(rodata);
        let mut out = Vec::new();
        let mut current = String::new();
        for &byte in data {
            if byte == 0 {
                if current.len() >= min_size {
                    out.push(std::mem::take(&mut current));
                } else {
                    current.clear();
                }
                continue;
            }
            let c = byte as char;
            if c.is_ascii_graphic() || c == ' ' {
                current.push(c);
            } else {
                current.clear();
            }
        }
        out
    }

    /// Drop debug symbols: the static table and its backing section.
    pub fn strip(&mut self) -> Result<()> {
        self.static_symbols.clear();
        if self.has_section_of_type(SHT_SYMTAB) {
            let name = self.section_of_type(SHT_SYMTAB)?.name.clone();
            self.remove_section(&name, true)?;
        }
        Ok(())
    }

    // GOT maintenance
    // ===============

    /// Rewrite GOT slots whose stored word lands at or after `from`.
    pub(crate) fn fix_got_entries(&mut self, from: u64, shift: u64) {
        let word = self.header.class.word_size();
        let order = self.header.encoding.byte_order();
        let slot_types = got_slot_types(self.header.machine);
        if slot_types.is_empty() {
            return;
        }

        let slots: Vec<u64> = self
            .relocations
            .iter()
            .filter(|r| slot_types.contains(&r.relocation_type))
            .map(|r| r.address)
            .collect();

        for address in slots {
            let Ok(offset) = self.patch_offset(address) else {
                warn!(address, "GOT slot outside any segment");
                continue;
            };
            let view = self.handler.read(offset, word as u64);
            if view.len() < word {
                continue;
            }
            let value = match read_uint(view, 0, word, order) {
                Ok(value) => value,
                Err(_) => continue,
            };
            if value >= from {
                debug!(address, value, "fixing GOT entry");
                let mut bytes = vec![0u8; word];
                let _ = write_uint(&mut bytes, 0, value + shift, word, order);
                self.handler.write(offset, &bytes);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_binary() -> Binary {
        let mut binary = Binary::new(
            Class::Elf64,
            Encoding::Little,
            FileType::Executable,
            EM_X86_64,
        )
        .with_image(vec![0u8; 0x3000]);

        let mut text = Section::new(".text")
            .with_flags(SHF_ALLOC | SHF_EXECINSTR);
        text.file_offset = 0x1000;
        text.size = 0x800;
        text.virtual_address = 0x401000;
        binary.push_section(text);

        let mut load = Segment::new(PT_LOAD);
        load.flags = PF_R | PF_X;
        load.file_offset = 0x1000;
        load.physical_size = 0x800;
        load.virtual_address = 0x401000;
        load.virtual_size = 0x800;
        binary.push_segment(load);

        binary
    }

    #[test]
    fn test_lookup_misses_are_not_found() {
        let binary = sample_binary();
        assert!(matches!(
            binary.get_section(".missing"),
            Err(Error::NotFound(_))
        ));
        assert!(binary.section_from_offset(0x5000, false).is_err());
        assert!(binary.segment_from_virtual_address(0x1).is_err());
    }

    #[test]
    fn test_address_translation_round_trip() {
        let binary = sample_binary();
        assert_eq!(binary.imagebase(), 0x400000);
        assert_eq!(binary.virtual_address_to_offset(0x401234).unwrap(), 0x1234);
        assert_eq!(binary.offset_to_virtual_address(0x1234, 0), 0x401234);
        // Outside any LOAD segment the imagebase fallback applies.
        assert_eq!(binary.offset_to_virtual_address(0x5000, 0), 0x405000);
        assert_eq!(binary.offset_to_virtual_address(0x5000, 0x700000), 0x705000);
        assert!(matches!(
            binary.virtual_address_to_offset(0x10),
            Err(Error::ConversionFailed(0x10))
        ));
    }

    #[test]
    fn test_dynamic_entry_insertion_order() {
        let mut binary = sample_binary();
        binary.push_dynamic_entry(DynamicEntry::needed("libc.so.6"));
        binary.push_dynamic_entry(DynamicEntry::new(DT_INIT, 0x401100));
        binary.push_dynamic_entry(DynamicEntry::null());

        binary.add_library("libm.so.6");
        // Grouped with the existing DT_NEEDED, before libc.
        assert_eq!(binary.dynamic_entries[0].library_name(), Some("libm.so.6"));

        binary.add_dynamic_entry(DynamicEntry::new(DT_FINI, 0x401200));
        // No DT_FINI present: lands right before the terminator.
        let tags: Vec<i64> = binary.dynamic_entries.iter().map(|e| e.tag).collect();
        assert_eq!(tags, vec![DT_NEEDED, DT_NEEDED, DT_INIT, DT_FINI, DT_NULL]);
    }

    #[test]
    fn test_library_round_trip() {
        let mut binary = sample_binary();
        binary.push_dynamic_entry(DynamicEntry::null());
        binary.add_library("libssl.so.3");
        assert!(binary.has_library("libssl.so.3"));
        binary.remove_library("libssl.so.3").unwrap();
        assert!(!binary.has_library("libssl.so.3"));
        assert!(binary.remove_library("libssl.so.3").is_err());
    }

    #[test]
    fn test_remove_dynamic_symbol_cascades() {
        let mut binary = sample_binary();
        binary.push_dynamic_entry(DynamicEntry::new(DT_PLTRELSZ, 0x30));
        binary.push_dynamic_entry(DynamicEntry::new(DT_JMPREL, 0x402000));
        binary.push_dynamic_entry(DynamicEntry::null());

        binary.add_dynamic_symbol(Symbol::function("keep", 0), None);
        let reloc = Relocation::new(0x402010, R_X86_64_JUMP_SLOT).with_addend(0);
        binary.add_pltgot_relocation(reloc, Some(Symbol::function("foo", 0)));
        assert_eq!(binary.dynamic_entry(DT_PLTRELSZ).unwrap().value, 0x30 + 24);

        // A dynamic-purpose relocation against the same symbol.
        let reloc = Relocation::new(0x402020, R_X86_64_GLOB_DAT).with_addend(0);
        binary.add_dynamic_relocation(reloc, Some(Symbol::function("foo", 0)));

        let versions_before = binary.symbol_versions().len();
        binary.remove_dynamic_symbol("foo").unwrap();

        assert!(!binary.has_dynamic_symbol("foo"));
        assert!(binary.relocations().is_empty());
        // One PLT/GOT record's worth came back off the table size.
        assert_eq!(binary.dynamic_entry(DT_PLTRELSZ).unwrap().value, 0x30);
        assert_eq!(binary.symbol_versions().len(), versions_before - 1);
        // The surviving symbol's version link still resolves.
        let keep = binary.get_dynamic_symbol("keep").unwrap();
        assert!(keep.version.unwrap() < binary.symbol_versions().len());
    }

    #[test]
    fn test_add_dynamic_relocation_updates_sizes() {
        let mut binary = sample_binary();
        binary.push_dynamic_entry(DynamicEntry::new(DT_RELASZ, 0x18));
        binary.push_dynamic_entry(DynamicEntry::new(DT_RELAENT, 24));
        binary.push_dynamic_entry(DynamicEntry::null());

        let reloc = Relocation::new(0x402000, R_X86_64_RELATIVE).with_addend(0x1000);
        binary.add_dynamic_relocation(reloc, None);
        assert_eq!(binary.dynamic_entry(DT_RELASZ).unwrap().value, 0x18 + 24);
    }

    #[test]
    fn test_export_symbol_promotes() {
        let mut binary = sample_binary();
        let mut hidden = Symbol::new("helper");
        hidden.value = 0x401400;
        binary.add_dynamic_symbol(hidden, None);

        let exported = binary.export_symbol("helper", 0).unwrap();
        assert_eq!(exported.binding, STB_GLOBAL);
        assert_eq!(exported.visibility, STV_DEFAULT);
        assert_eq!(exported.symbol_type, STT_COMMON);
        assert_ne!(exported.shndx, SHN_UNDEF);

        // Unknown names materialize a fresh exported symbol.
        binary.export_symbol("brand_new", 0x401500).unwrap();
        assert!(binary.has_dynamic_symbol("brand_new"));
    }

    #[test]
    fn test_patch_and_read_back() {
        let mut binary = sample_binary();
        binary
            .patch_address_value(0x401010, 0xdead_beef, 4)
            .unwrap();
        let content = binary.content_from_virtual_address(0x401010, 4).unwrap();
        assert_eq!(content, vec![0xef, 0xbe, 0xad, 0xde]);
        assert!(binary.patch_address_value(0x401010, 0, 9).is_err());
    }

    #[test]
    fn test_patch_pltgot() {
        let mut binary = sample_binary();
        let reloc = Relocation::new(0x401100, R_X86_64_JUMP_SLOT);
        binary.add_pltgot_relocation(reloc, Some(Symbol::function("puts", 0)));
        binary.patch_pltgot("puts", 0x4141_4141).unwrap();
        let got = binary.content_from_virtual_address(0x401100, 8).unwrap();
        assert_eq!(got, vec![0x41, 0x41, 0x41, 0x41, 0, 0, 0, 0]);
    }

    #[test]
    fn test_strings_extraction() {
        let mut binary = sample_binary();
        let mut rodata = Section::new(".rodata").with_flags(SHF_ALLOC);
        rodata.file_offset = 0x2000;
        rodata.size = 0x20;
        rodata.virtual_address = 0x402000;
        binary.push_section(rodata);
        binary
            .handler
            .write(0x2000, b"hello world\0ab\0also long\0");

        let strings = binary.strings(4);
        assert_eq!(strings, vec!["hello world".to_string(), "also long".to_string()]);
    }

    #[test]
    fn test_permute_dynamic_symbols() {
        let mut binary = sample_binary();
        binary.add_dynamic_symbol(Symbol::function("a", 1), None);
        binary.add_dynamic_symbol(Symbol::function("b", 2), None);
        binary.permute_dynamic_symbols(&[1, 0]);
        assert_eq!(binary.dynamic_symbols()[0].name, "b");
        assert_eq!(binary.dynamic_symbols()[1].name, "a");
    }
}

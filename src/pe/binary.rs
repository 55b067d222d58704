//! In-memory PE model: headers, sections, directories, imports and the
//! mutation engine.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use tracing::{debug, error, warn};

use crate::core::section::SectionView;
use crate::core::{Abstract, Arch, Endianness, Function, FunctionFlag, Header as AbstractHeader, Mode, ObjectType};
use crate::error::{Error, Result};
use crate::pe::data_directory::{DataDirectory, DirectoryType};
use crate::pe::debug::{DebugEntry, RichHeader};
use crate::pe::export::Export;
use crate::pe::headers::{DosHeader, Header, OptionalHeader};
use crate::pe::import::{Import, ImportEntry};
use crate::pe::load_configuration::LoadConfiguration;
use crate::pe::relocation::Relocation;
use crate::pe::resources::ResourceNode;
use crate::pe::section::{Section, SectionRole};
use crate::pe::signature::Signature;
use crate::pe::tls::Tls;
use crate::pe::types::*;
use crate::utils::align_up;

/// Machine type to (architecture, modes), the fixed translation used by
/// the abstract header.
static MACHINE_IDENTITIES: Lazy<HashMap<Machine, (Arch, &'static [Mode])>> = Lazy::new(|| {
    HashMap::from([
        (Machine::Unknown, (Arch::None, &[][..])),
        (Machine::Amd64, (Arch::X86, &[Mode::Bits64][..])),
        (Machine::Arm, (Arch::Arm, &[Mode::Bits32][..])),
        (
            Machine::ArmNt,
            (Arch::Arm, &[Mode::Bits32, Mode::V7, Mode::Thumb][..]),
        ),
        (Machine::Arm64, (Arch::Arm64, &[Mode::Bits64, Mode::V8][..])),
        (Machine::I386, (Arch::X86, &[Mode::Bits32][..])),
        (Machine::Ia64, (Arch::Intel, &[Mode::Bits64][..])),
        (Machine::Thumb, (Arch::Arm, &[Mode::Bits32, Mode::Thumb][..])),
    ])
});

/// Machine type to byte order.
static MACHINE_ENDIANNESS: Lazy<HashMap<Machine, Endianness>> = Lazy::new(|| {
    HashMap::from([
        (Machine::Unknown, Endianness::None),
        (Machine::Am33, Endianness::None),
        (Machine::Amd64, Endianness::Little),
        (Machine::Arm, Endianness::Little),
        (Machine::ArmNt, Endianness::Little),
        (Machine::Arm64, Endianness::Little),
        (Machine::Ebc, Endianness::None),
        (Machine::I386, Endianness::Little),
        (Machine::Ia64, Endianness::Little),
        (Machine::M32R, Endianness::Little),
        (Machine::Mips16, Endianness::Big),
        (Machine::MipsFpu, Endianness::Big),
        (Machine::MipsFpu16, Endianness::Big),
        (Machine::PowerPc, Endianness::Little),
        (Machine::PowerPcFp, Endianness::Little),
        (Machine::R4000, Endianness::Little),
        (Machine::RiscV32, Endianness::Little),
        (Machine::RiscV64, Endianness::Little),
        (Machine::RiscV128, Endianness::Little),
        (Machine::Thumb, Endianness::Little),
        (Machine::WceMipsV2, Endianness::Little),
    ])
});

/// A PE binary.
pub struct Binary {
    pub(crate) pe_type: PeType,
    pub(crate) name: String,
    pub(crate) dos_header: DosHeader,
    pub(crate) dos_stub: Vec<u8>,
    pub(crate) header: Header,
    pub(crate) optional_header: OptionalHeader,
    pub(crate) data_directories: Vec<DataDirectory>,
    pub(crate) sections: Vec<Section>,
    pub(crate) relocations: Vec<Relocation>,
    pub(crate) imports: Vec<Import>,
    pub(crate) export: Option<Export>,
    pub(crate) resources: Option<ResourceNode>,
    pub(crate) tls: Option<Tls>,
    pub(crate) load_configuration: Option<LoadConfiguration>,
    pub(crate) debug_entries: Vec<DebugEntry>,
    pub(crate) rich_header: Option<RichHeader>,
    pub(crate) signatures: Vec<Signature>,
    pub(crate) overlay: Vec<u8>,
    pub(crate) overlay_offset: u64,
    /// Bytes between the end of the section table and the first body.
    pub(crate) section_offset_padding: Vec<u8>,
    pub(crate) hooks: HashMap<String, HashMap<String, u64>>,
    pub(crate) available_sections_space: i32,
}

impl Binary {
    /// Create a PE image from scratch with the 16 standard directory
    /// slots and room in the header area for a handful of sections.
    pub fn new(name: impl Into<String>, pe_type: PeType) -> Self {
        let machine = match pe_type {
            PeType::Pe32 => Machine::I386,
            PeType::Pe32Plus => Machine::Amd64,
        };
        let mut header = Header::new(machine);
        header.sizeof_optional_header = (pe_type.optional_header_size()
            + DEFAULT_NUMBER_DATA_DIRECTORIES as u64 * SIZEOF_DATA_DIRECTORY)
            as u16;
        header.add_characteristic(match pe_type {
            PeType::Pe32 => IMAGE_FILE_32BIT_MACHINE,
            PeType::Pe32Plus => IMAGE_FILE_LARGE_ADDRESS_AWARE,
        });

        let dos_header = DosHeader::default();
        let used = u64::from(dos_header.addressof_new_exeheader)
            + SIZEOF_PE_HEADER
            + DEFAULT_NUMBER_DATA_DIRECTORIES as u64 * SIZEOF_DATA_DIRECTORY
            + pe_type.optional_header_size();
        let available_sections_space = ((SECTION_TABLE_WATERMARK as i64 - used as i64)
            / SIZEOF_SECTION_HEADER as i64) as i32;

        let mut binary = Self {
            pe_type,
            name: name.into(),
            dos_header,
            dos_stub: Vec::new(),
            header,
            optional_header: OptionalHeader::default(),
            data_directories: DirectoryType::ALL.map(DataDirectory::new).to_vec(),
            sections: Vec::new(),
            relocations: Vec::new(),
            imports: Vec::new(),
            export: None,
            resources: None,
            tls: None,
            load_configuration: None,
            debug_entries: Vec::new(),
            rich_header: None,
            signatures: Vec::new(),
            overlay: Vec::new(),
            overlay_offset: 0,
            section_offset_padding: Vec::new(),
            hooks: HashMap::new(),
            available_sections_space,
        };
        if pe_type == PeType::Pe32Plus {
            binary.optional_header.imagebase = 0x1_4000_0000;
        }
        binary.optional_header.sizeof_headers = binary.sizeof_headers() as u32;
        binary.optional_header.sizeof_image = binary.virtual_size() as u32;
        binary
    }

    pub fn pe_type(&self) -> PeType {
        self.pe_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dos_header(&self) -> &DosHeader {
        &self.dos_header
    }

    pub fn dos_header_mut(&mut self) -> &mut DosHeader {
        &mut self.dos_header
    }

    pub fn dos_stub(&self) -> &[u8] {
        &self.dos_stub
    }

    pub fn set_dos_stub(&mut self, stub: Vec<u8>) {
        self.dos_stub = stub;
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn optional_header(&self) -> &OptionalHeader {
        &self.optional_header
    }

    pub fn optional_header_mut(&mut self) -> &mut OptionalHeader {
        &mut self.optional_header
    }

    // Loader surface
    // ==============

    /// Register a section exactly as described, without layout fixups.
    pub fn push_section(&mut self, section: Section) {
        self.sections.push(section);
        self.header.numberof_sections = self.sections.len() as u16;
        self.available_sections_space -= 1;
    }

    /// Bytes after the last section's file range, and where they start.
    pub fn set_overlay(&mut self, offset: u64, overlay: Vec<u8>) {
        self.overlay_offset = offset;
        self.overlay = overlay;
    }

    pub fn set_section_offset_padding(&mut self, padding: Vec<u8>) {
        self.section_offset_padding = padding;
    }

    pub fn add_signature(&mut self, signature: Signature) {
        self.signatures.push(signature);
    }

    pub fn set_rich_header(&mut self, rich_header: RichHeader) {
        self.rich_header = Some(rich_header);
    }

    pub fn set_load_configuration(&mut self, config: LoadConfiguration) {
        self.load_configuration = Some(config);
    }

    pub fn add_debug_entry(&mut self, entry: DebugEntry) {
        self.debug_entries.push(entry);
    }

    pub fn set_export(&mut self, export: Export) {
        self.export = Some(export);
    }

    // Sections
    // ========

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.iter().any(|s| s.name == name)
    }

    pub fn get_section(&self, name: &str) -> Result<&Section> {
        self.sections
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::not_found(format!("section '{name}'")))
    }

    pub fn get_section_mut(&mut self, name: &str) -> Result<&mut Section> {
        self.sections
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::not_found(format!("section '{name}'")))
    }

    pub fn section_from_offset(&self, offset: u64) -> Result<&Section> {
        self.sections
            .iter()
            .find(|s| s.contains_offset(offset))
            .ok_or_else(|| Error::not_found(format!("section covering offset {offset:#x}")))
    }

    pub fn section_from_rva(&self, rva: u64) -> Result<&Section> {
        self.sections
            .iter()
            .find(|s| {
                rva >= u64::from(s.virtual_address)
                    && rva < u64::from(s.virtual_address) + u64::from(s.virtual_size)
            })
            .ok_or_else(|| Error::not_found(format!("section covering RVA {rva:#x}")))
    }

    /// The section the import directory lives in.
    pub fn import_section(&self) -> Result<&Section> {
        let directory = self.data_directory(DirectoryType::ImportTable);
        let idx = directory
            .section
            .ok_or_else(|| Error::not_found("import directory section"))?;
        self.sections
            .get(idx)
            .ok_or_else(|| Error::not_found("import directory section"))
    }

    // Data directories
    // ================

    pub fn data_directories(&self) -> &[DataDirectory] {
        &self.data_directories
    }

    pub fn data_directory(&self, directory_type: DirectoryType) -> &DataDirectory {
        &self.data_directories[directory_type.index()]
    }

    pub fn data_directory_mut(&mut self, directory_type: DirectoryType) -> &mut DataDirectory {
        &mut self.data_directories[directory_type.index()]
    }

    // Address space
    // =============

    pub fn imagebase(&self) -> u64 {
        self.optional_header.imagebase
    }

    pub fn entrypoint(&self) -> u64 {
        self.optional_header.imagebase + u64::from(self.optional_header.addressof_entrypoint)
    }

    /// File offset of `rva`. Falls back to the identity mapping when no
    /// section covers the address, matching what loaders do with data in
    /// the header area.
    pub fn rva_to_offset(&self, rva: u64) -> u64 {
        let Some(section) = self.sections.iter().find(|s| s.contains_rva(rva)) else {
            return rva;
        };

        let mut section_alignment = self.optional_header.section_alignment;
        let file_alignment = self.optional_header.file_alignment;
        if section_alignment < 0x1000 {
            section_alignment = file_alignment;
        }

        let section_va = align_up(u64::from(section.virtual_address), u64::from(section_alignment));
        let section_offset = align_up(
            u64::from(section.pointerto_raw_data),
            u64::from(file_alignment),
        );
        (rva - section_va) + section_offset
    }

    pub fn va_to_offset(&self, va: u64) -> u64 {
        self.rva_to_offset(va - self.optional_header.imagebase)
    }

    /// RVA (or slid address) of a file offset; identity when the offset
    /// lies outside every section.
    pub fn offset_to_virtual_address(&self, offset: u64, slide: u64) -> u64 {
        let Some(section) = self.sections.iter().find(|s| s.contains_offset(offset)) else {
            return if slide > 0 { slide + offset } else { offset };
        };
        let base_rva = u64::from(section.virtual_address) - u64::from(section.pointerto_raw_data);
        if slide > 0 {
            slide + base_rva + offset
        } else {
            base_rva + offset
        }
    }

    /// Mapped extent of the image: headers plus every section span,
    /// rounded to the section alignment.
    pub fn virtual_size(&self) -> u64 {
        let mut size = u64::from(self.dos_header.addressof_new_exeheader)
            + SIZEOF_PE_HEADER
            + self.pe_type.optional_header_size();
        for section in &self.sections {
            size = size.max(u64::from(section.virtual_address) + u64::from(section.virtual_size));
        }
        align_up(size, u64::from(self.optional_header.section_alignment))
    }

    /// Size of the header area: DOS header through the section table,
    /// rounded to the file alignment.
    pub fn sizeof_headers(&self) -> u64 {
        let size = u64::from(self.dos_header.addressof_new_exeheader)
            + SIZEOF_PE_HEADER
            + self.pe_type.optional_header_size()
            + self.data_directories.len() as u64 * SIZEOF_DATA_DIRECTORY
            + self.sections.len() as u64 * SIZEOF_SECTION_HEADER;
        align_up(size, u64::from(self.optional_header.file_alignment))
    }

    pub fn is_pie(&self) -> bool {
        self.optional_header
            .has_dll_characteristic(IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE)
    }

    pub fn has_nx(&self) -> bool {
        self.optional_header
            .has_dll_characteristic(IMAGE_DLLCHARACTERISTICS_NX_COMPAT)
    }

    // Mutation engine
    // ===============

    /// Shift every section body up by one aligned section-header slot,
    /// freeing room in the header area for a new table entry.
    fn make_space_for_new_section(&mut self) {
        let shift = align_up(
            SIZEOF_SECTION_HEADER,
            u64::from(self.optional_header.file_alignment),
        );
        debug!(shift, "making space for a new section header");
        for section in &mut self.sections {
            section.pointerto_raw_data += shift as u32;
        }
        self.available_sections_space += 1;
    }

    /// Add a section, assigning the next free file offset and virtual
    /// address and wiring the role-specific directory entries.
    pub fn add_section(&mut self, section: Section, role: SectionRole) -> Result<&Section> {
        while self.available_sections_space < 0 {
            self.make_space_for_new_section();
        }
        if self.sections.len() >= MAX_SECTIONS {
            return Err(Error::Overflow(
                "the binary reached its maximum number of sections".to_string(),
            ));
        }

        // A role names at most one section; steal it from the current
        // holder.
        for existing in &mut self.sections {
            existing.roles.remove(role);
        }

        let file_alignment = u64::from(self.optional_header.file_alignment);
        let section_alignment = u64::from(self.optional_header.section_alignment);

        let mut new_section = section;
        let section_size = new_section.content.len() as u32;
        let section_size_aligned = align_up(u64::from(section_size), file_alignment) as u32;
        new_section
            .content
            .resize(section_size_aligned as usize, 0);

        let new_offset = align_up(
            self.sections
                .iter()
                .fold(self.sizeof_headers(), |offset, s| {
                    offset.max(u64::from(s.pointerto_raw_data) + u64::from(s.sizeof_raw_data))
                }),
            file_alignment,
        );
        let new_va = align_up(
            self.sections.iter().fold(section_alignment, |va, s| {
                va.max(u64::from(s.virtual_address) + u64::from(s.virtual_size))
            }),
            section_alignment,
        );
        debug!(offset = new_offset, va = new_va, "placing new section");

        new_section.roles.insert(role);
        if new_section.pointerto_raw_data == 0 {
            new_section.pointerto_raw_data = new_offset as u32;
        }
        if new_section.sizeof_raw_data == 0 {
            new_section.sizeof_raw_data = section_size_aligned;
        }
        if new_section.virtual_address == 0 {
            new_section.virtual_address = new_va as u32;
        }
        if new_section.virtual_size == 0 {
            new_section.virtual_size = section_size;
        }

        if new_section.has_role(SectionRole::TEXT) {
            new_section.add_characteristic(IMAGE_SCN_CNT_CODE);
            new_section.add_characteristic(IMAGE_SCN_MEM_EXECUTE);
            new_section.add_characteristic(IMAGE_SCN_MEM_READ);
            self.optional_header.baseof_code = new_section.virtual_address;
            self.optional_header.sizeof_code = new_section.sizeof_raw_data;
        }

        if new_section.has_role(SectionRole::DATA) {
            new_section.add_characteristic(IMAGE_SCN_CNT_INITIALIZED_DATA);
            new_section.add_characteristic(IMAGE_SCN_MEM_READ);
            new_section.add_characteristic(IMAGE_SCN_MEM_WRITE);
            if self.pe_type == PeType::Pe32 {
                self.optional_header.baseof_data = new_section.virtual_address;
            }
            self.optional_header.sizeof_initialized_data = new_section.sizeof_raw_data;
        }

        let section_idx = self.sections.len();
        if role == SectionRole::IMPORT {
            new_section.add_characteristic(IMAGE_SCN_MEM_READ);
            new_section.add_characteristic(IMAGE_SCN_MEM_EXECUTE);
            new_section.add_characteristic(IMAGE_SCN_MEM_WRITE);
            let rva = new_section.virtual_address;
            let size = new_section.sizeof_raw_data;
            let directory = self.data_directory_mut(DirectoryType::ImportTable);
            directory.rva = rva;
            directory.size = size;
            directory.section = Some(section_idx);
            let iat = self.data_directory_mut(DirectoryType::Iat);
            iat.rva = 0;
            iat.size = 0;
        }
        if role == SectionRole::RELOCATION {
            let rva = new_section.virtual_address;
            let size = new_section.virtual_size;
            let directory = self.data_directory_mut(DirectoryType::BaseRelocationTable);
            directory.rva = rva;
            directory.size = size;
            directory.section = Some(section_idx);
        }
        if role == SectionRole::RESOURCE {
            let rva = new_section.virtual_address;
            let size = new_section.sizeof_raw_data;
            let directory = self.data_directory_mut(DirectoryType::ResourceTable);
            directory.rva = rva;
            directory.size = size;
            directory.section = Some(section_idx);
        }
        if role == SectionRole::TLS {
            let rva = new_section.virtual_address;
            let size = new_section.sizeof_raw_data;
            let directory = self.data_directory_mut(DirectoryType::TlsTable);
            directory.rva = rva;
            directory.size = size;
            directory.section = Some(section_idx);
        }

        self.available_sections_space -= 1;
        self.sections.push(new_section);

        self.header.numberof_sections = self.sections.len() as u16;
        self.optional_header.sizeof_image = self.virtual_size() as u32;
        self.optional_header.sizeof_headers = self.sizeof_headers() as u32;
        Ok(self.sections.last().unwrap())
    }

    /// Remove a section. For interior sections the freed span is merged
    /// into the preceding section; the first and last sections give their
    /// span back to nothing (the historical behavior, kept as-is).
    pub fn remove_section(&mut self, name: &str, clear: bool) -> Result<()> {
        let idx = self
            .sections
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| Error::not_found(format!("section '{name}'")))?;

        if idx > 0 && idx < self.sections.len() - 1 {
            let removed_file_end = u64::from(self.sections[idx].pointerto_raw_data)
                + u64::from(self.sections[idx].sizeof_raw_data);
            let removed_virtual_end = u64::from(self.sections[idx].virtual_address)
                + u64::from(self.sections[idx].virtual_size);

            let previous = &mut self.sections[idx - 1];
            let raw_gap = removed_file_end
                - (u64::from(previous.pointerto_raw_data) + u64::from(previous.sizeof_raw_data));
            previous.sizeof_raw_data += raw_gap as u32;
            let virtual_gap = removed_virtual_end
                - (u64::from(previous.virtual_address) + u64::from(previous.virtual_size));
            previous.virtual_size += virtual_gap as u32;
        }

        if clear {
            self.sections[idx].zero_content();
        }
        self.sections.remove(idx);

        // Directory back-references: drop links to the removed section,
        // rebind the ones that slid down.
        for directory in &mut self.data_directories {
            match directory.section {
                Some(i) if i == idx => directory.section = None,
                Some(i) if i > idx => directory.section = Some(i - 1),
                _ => {}
            }
        }

        self.header.numberof_sections = self.sections.len() as u16;
        self.available_sections_space += 1;
        self.optional_header.sizeof_headers = self.sizeof_headers() as u32;
        self.optional_header.sizeof_image = self.virtual_size() as u32;
        Ok(())
    }

    // Relocations
    // ===========

    pub fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    pub fn add_relocation(&mut self, relocation: Relocation) -> &Relocation {
        self.relocations.push(relocation);
        self.relocations.last().unwrap()
    }

    pub fn remove_all_relocations(&mut self) {
        self.relocations.clear();
    }

    // Imports
    // =======

    pub fn imports(&self) -> &[Import] {
        &self.imports
    }

    pub fn has_imports(&self) -> bool {
        !self.imports.is_empty()
    }

    pub fn has_import(&self, name: &str) -> bool {
        self.imports.iter().any(|i| i.name == name)
    }

    pub fn get_import(&self, name: &str) -> Result<&Import> {
        self.imports
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| Error::not_found(format!("library '{name}'")))
    }

    pub fn add_library(&mut self, name: impl Into<String>) -> &mut Import {
        self.imports.push(Import::new(name));
        self.imports.last_mut().unwrap()
    }

    /// Kept unimplemented on purpose: dropping a library would leave the
    /// IAT and the import lookup tables inconsistent.
    pub fn remove_library(&mut self, name: &str) -> Result<()> {
        Err(Error::NotImplemented(format!("removing library '{name}'")))
    }

    pub fn remove_all_libraries(&mut self) {
        self.imports.clear();
    }

    pub fn add_import_function(&mut self, library: &str, function: &str) -> Result<&ImportEntry> {
        let import = self
            .imports
            .iter_mut()
            .find(|i| i.name == library)
            .ok_or_else(|| Error::not_found(format!("library '{library}'")))?;
        import.add_entry(ImportEntry::by_name(function));
        Ok(import.entries.last().unwrap())
    }

    /// Predict the RVA an import-table builder will give a function,
    /// assuming the rebuilt import section lands after the current last
    /// section.
    pub fn predict_function_rva(&self, library: &str, function: &str) -> u64 {
        let Some(import) = self.imports.iter().find(|i| i.name == library) else {
            error!(library, "unable to find library");
            return 0;
        };

        let matches = import
            .entries
            .iter()
            .filter(|e| !e.is_ordinal() && e.name == function)
            .count();
        if matches == 0 {
            error!(library, function, "unable to find the function");
            return 0;
        }
        if matches > 1 {
            error!(library, function, "the function is defined several times");
            return 0;
        }

        // 20 bytes per import descriptor, one extra for the terminator.
        let import_table_size = (self.imports.len() as u64 + 1) * 20;
        let pointer = self.pe_type.pointer_size() as u64;

        let lookup_table_size: u64 = self
            .imports
            .iter()
            .map(|i| (i.entries.len() as u64 + 1) * pointer)
            .sum();

        let mut address = import_table_size + lookup_table_size;
        for other in &self.imports {
            if other.name == library {
                break;
            }
            address += (other.entries.len() as u64 + 1) * pointer;
        }
        for entry in &import.entries {
            if !entry.is_ordinal() && entry.name == function {
                break;
            }
            address += pointer;
        }

        let section_alignment = u64::from(self.optional_header.section_alignment);
        let next_virtual_address = align_up(
            self.sections.iter().fold(section_alignment, |va, s| {
                va.max(u64::from(s.virtual_address) + u64::from(s.virtual_size))
            }),
            section_alignment,
        );
        next_virtual_address + address
    }

    /// Register an IAT override applied when imports are rebuilt.
    pub fn hook_function(&mut self, library: &str, function: &str, address: u64) {
        self.hooks
            .entry(library.to_string())
            .or_default()
            .insert(function.to_string(), address);
    }

    /// Like [`Binary::hook_function`], resolving the library by scanning
    /// the import entries.
    pub fn hook_function_anywhere(&mut self, function: &str, address: u64) {
        let library = self.imports.iter().find_map(|import| {
            import
                .entries
                .iter()
                .any(|e| e.name == function)
                .then(|| import.name.clone())
        });
        match library {
            Some(library) => self.hook_function(&library, function, address),
            None => warn!(function, "unable to find a library importing the function"),
        }
    }

    pub fn hooks(&self) -> &HashMap<String, HashMap<String, u64>> {
        &self.hooks
    }

    // Export / resources / TLS / configuration
    // ========================================

    pub fn has_exports(&self) -> bool {
        self.export.is_some()
    }

    pub fn export(&self) -> Result<&Export> {
        self.export
            .as_ref()
            .ok_or_else(|| Error::not_found("export directory"))
    }

    pub fn has_resources(&self) -> bool {
        self.resources.is_some()
    }

    pub fn resources(&self) -> Result<&ResourceNode> {
        self.resources
            .as_ref()
            .ok_or_else(|| Error::not_found("resource tree"))
    }

    pub fn set_resources(&mut self, root: ResourceNode) {
        self.resources = Some(root);
    }

    pub fn has_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub fn tls(&self) -> Result<&Tls> {
        self.tls.as_ref().ok_or_else(|| Error::not_found("TLS directory"))
    }

    pub fn set_tls(&mut self, tls: Tls) {
        self.tls = Some(tls);
    }

    pub fn has_configuration(&self) -> bool {
        self.load_configuration.is_some()
    }

    pub fn load_configuration(&self) -> Result<&LoadConfiguration> {
        self.load_configuration
            .as_ref()
            .ok_or_else(|| Error::not_found("load configuration"))
    }

    pub fn debug_entries(&self) -> &[DebugEntry] {
        &self.debug_entries
    }

    pub fn has_rich_header(&self) -> bool {
        self.rich_header.is_some()
    }

    pub fn rich_header(&self) -> Result<&RichHeader> {
        self.rich_header
            .as_ref()
            .ok_or_else(|| Error::not_found("rich header"))
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn has_signatures(&self) -> bool {
        !self.signatures.is_empty()
    }

    pub fn overlay(&self) -> &[u8] {
        &self.overlay
    }

    pub fn has_overlay(&self) -> bool {
        !self.overlay.is_empty()
    }

    pub fn overlay_offset(&self) -> u64 {
        self.overlay_offset
    }

    // Patching
    // ========

    fn address_to_rva(&self, address: u64) -> u64 {
        let delta = address as i64 - self.optional_header.imagebase as i64;
        if delta > 0 {
            address - self.optional_header.imagebase
        } else {
            address
        }
    }

    pub fn patch_address_bytes(&mut self, address: u64, patch: &[u8]) -> Result<()> {
        let rva = self.address_to_rva(address);
        let section = self
            .sections
            .iter_mut()
            .find(|s| {
                rva >= u64::from(s.virtual_address)
                    && rva < u64::from(s.virtual_address) + u64::from(s.virtual_size)
            })
            .ok_or_else(|| Error::not_found(format!("section covering RVA {rva:#x}")))?;
        let offset = (rva - u64::from(section.virtual_address)) as usize;
        let end = offset + patch.len();
        if end > section.content.len() {
            section.content.resize(end, 0);
        }
        section.content[offset..end].copy_from_slice(patch);
        Ok(())
    }

    pub fn patch_address_value(&mut self, address: u64, value: u64, size: usize) -> Result<()> {
        if size > 8 {
            return Err(Error::Overflow(format!("patch size {size} exceeds a word")));
        }
        let bytes = value.to_le_bytes();
        self.patch_address_bytes(address, &bytes[..size])
    }

    /// Bytes at a virtual address (or RVA), clamped to the section.
    pub fn get_content_from_virtual_address(&self, address: u64, size: u64) -> Result<Vec<u8>> {
        let rva = self.address_to_rva(address);
        let section = self.section_from_rva(rva)?;
        let offset = (rva - u64::from(section.virtual_address)) as usize;
        let end = (offset + size as usize).min(section.content.len());
        if offset >= section.content.len() {
            return Ok(Vec::new());
        }
        Ok(section.content[offset..end].to_vec())
    }

    // Function discovery
    // ==================

    /// Functions described by the x86-64 exception directory.
    pub fn exception_functions(&self) -> Vec<Function> {
        let mut functions = Vec::new();
        let directory = self.data_directory(DirectoryType::ExceptionTable);
        if directory.is_empty() {
            return functions;
        }
        let Ok(content) =
            self.get_content_from_virtual_address(u64::from(directory.rva), u64::from(directory.size))
        else {
            warn!("exception directory is not covered by any section");
            return functions;
        };

        if content.len() % SIZEOF_EXCEPTION_ENTRY_X64 != 0 {
            warn!(
                size = content.len(),
                "exception table size is not a whole number of entries"
            );
        }
        for chunk in content.chunks_exact(SIZEOF_EXCEPTION_ENTRY_X64) {
            let start = u32::from_le_bytes(chunk[0..4].try_into().unwrap());
            let end = u32::from_le_bytes(chunk[4..8].try_into().unwrap());
            let mut function = Function::at(u64::from(start));
            if end > start {
                function.size = u64::from(end - start);
            }
            functions.push(function);
        }
        functions
    }
}

impl Abstract for Binary {
    fn abstract_header(&self) -> Result<AbstractHeader> {
        let machine = self.header.machine;
        let (architecture, modes) = MACHINE_IDENTITIES
            .get(&machine)
            .ok_or_else(|| Error::NotImplemented(format!("machine type {:#x}", machine.value())))?;
        let endianness = MACHINE_ENDIANNESS
            .get(&machine)
            .copied()
            .ok_or_else(|| {
                Error::NotImplemented(format!("endianness of machine {:#x}", machine.value()))
            })?;

        let object_type = if self.header.has_characteristic(IMAGE_FILE_DLL) {
            ObjectType::Library
        } else if self.header.has_characteristic(IMAGE_FILE_EXECUTABLE_IMAGE) {
            ObjectType::Executable
        } else {
            ObjectType::None
        };

        Ok(AbstractHeader {
            architecture: *architecture,
            modes: modes.to_vec(),
            entrypoint: self.entrypoint(),
            object_type,
            endianness,
        })
    }

    fn imported_libraries(&self) -> Vec<String> {
        self.imports.iter().map(|i| i.name.clone()).collect()
    }

    fn imported_functions(&self) -> Vec<Function> {
        self.imports
            .iter()
            .flat_map(|import| import.entries.iter())
            .filter(|entry| !entry.name.is_empty())
            .map(|entry| {
                Function::new(&entry.name, entry.iat_address).with_flag(FunctionFlag::Imported)
            })
            .collect()
    }

    fn exported_functions(&self) -> Vec<Function> {
        let Some(export) = &self.export else {
            return Vec::new();
        };
        export
            .entries
            .iter()
            .filter(|entry| !entry.name.is_empty())
            .map(|entry| {
                Function::new(&entry.name, entry.address).with_flag(FunctionFlag::Exported)
            })
            .collect()
    }

    fn ctor_functions(&self) -> Vec<Function> {
        let Some(tls) = &self.tls else {
            return Vec::new();
        };
        tls.callbacks
            .iter()
            .enumerate()
            .map(|(i, &callback)| {
                Function::new(format!("tls_{i}"), callback).with_flag(FunctionFlag::Constructor)
            })
            .collect()
    }

    fn functions(&self) -> Vec<Function> {
        let mut by_address: BTreeMap<u64, Function> = BTreeMap::new();
        let discovered = self
            .exception_functions()
            .into_iter()
            .chain(self.exported_functions())
            .chain(self.ctor_functions());
        for function in discovered {
            by_address.entry(function.address).or_insert(function);
        }
        by_address.into_values().collect()
    }

    fn abstract_sections(&self) -> Vec<SectionView> {
        self.sections
            .iter()
            .map(|s| SectionView {
                name: s.name.clone(),
                virtual_address: u64::from(s.virtual_address),
                virtual_size: u64::from(s.virtual_size),
                file_offset: u64::from(s.pointerto_raw_data),
                raw_size: u64::from(s.sizeof_raw_data),
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 64-bit image with four sections laid out back to back.
    pub(crate) fn sample_binary() -> Binary {
        let mut binary = Binary::new("sample.exe", PeType::Pe32Plus);
        let layout: [(&str, u32, u32, u32, u32); 4] = [
            // name, va, vsize, raw_ptr, raw_size
            (".text", 0x1000, 0x1800, 0x400, 0x1800),
            (".rdata", 0x3000, 0x600, 0x1c00, 0x600),
            (".data", 0x4000, 0x400, 0x2200, 0x200),
            (".rsrc", 0x5000, 0x300, 0x2400, 0x400),
        ];
        for (name, va, vsize, ptr, raw) in layout {
            let mut section = Section::new(name);
            section.virtual_address = va;
            section.virtual_size = vsize;
            section.pointerto_raw_data = ptr;
            section.sizeof_raw_data = raw;
            section.content = vec![0u8; raw as usize];
            binary.push_section(section);
        }
        binary.optional_header.sizeof_image = binary.virtual_size() as u32;
        binary.optional_header.sizeof_headers = binary.sizeof_headers() as u32;
        binary
    }

    #[test]
    fn test_rva_to_offset_round_trip() {
        let binary = sample_binary();
        // E1: section[2]'s VA maps to its raw pointer and back.
        let section = &binary.sections()[2];
        assert_eq!(
            binary.rva_to_offset(u64::from(section.virtual_address)),
            u64::from(section.pointerto_raw_data)
        );
        assert_eq!(
            binary.offset_to_virtual_address(u64::from(section.pointerto_raw_data), 0),
            u64::from(section.virtual_address)
        );
        // Identity fallback outside any section.
        assert_eq!(binary.rva_to_offset(0x9_0000), 0x9_0000);
        assert_eq!(binary.offset_to_virtual_address(0x9_0000, 0), 0x9_0000);
    }

    #[test]
    fn test_va_to_offset() {
        let binary = sample_binary();
        let va = binary.imagebase() + 0x1000;
        assert_eq!(binary.va_to_offset(va), 0x400);
    }

    #[test]
    fn test_sizeof_headers_formula() {
        let binary = sample_binary();
        // 0x40 + 24 + 112 + 16*8 + 4*40 = 0x1f8, aligned up to 0x200.
        assert_eq!(binary.sizeof_headers(), 0x200);
    }

    #[test]
    fn test_new_binary_section_budget() {
        let binary = Binary::new("fresh.exe", PeType::Pe32Plus);
        // (0x200 - (0x40 + 24 + 128 + 112)) / 40
        assert_eq!(binary.available_sections_space, 4);
        let binary32 = Binary::new("fresh32.exe", PeType::Pe32);
        assert_eq!(binary32.available_sections_space, 5);
    }

    #[test]
    fn test_add_section_updates_sizes() {
        // E4: a fresh data section grows the image by its aligned spans.
        let mut binary = sample_binary();
        let sizeof_image_before = u64::from(binary.optional_header().sizeof_image);
        let count_before = binary.header().numberof_sections;

        let section = Section::new(".new").with_content(vec![0xaa; 0x1000]);
        binary.add_section(section, SectionRole::DATA).unwrap();

        let section_alignment = u64::from(binary.optional_header().section_alignment);
        let file_alignment = u64::from(binary.optional_header().file_alignment);
        assert_eq!(
            u64::from(binary.optional_header().sizeof_image),
            sizeof_image_before + align_up(0x1000, section_alignment)
        );
        assert_eq!(
            u64::from(binary.optional_header().sizeof_initialized_data),
            align_up(0x1000, file_alignment)
        );
        assert_eq!(binary.header().numberof_sections, count_before + 1);

        let added = binary.get_section(".new").unwrap();
        assert!(added.is_writable());
        assert!(!added.is_executable());
        // Placed after the last raw range, aligned.
        assert_eq!(added.pointerto_raw_data, 0x2800);
        assert_eq!(added.virtual_address, 0x6000);
        assert_eq!(added.virtual_size, 0x1000);
    }

    #[test]
    fn test_add_section_steals_role() {
        let mut binary = sample_binary();
        binary
            .add_section(
                Section::new(".tls1").with_content(vec![0; 0x40]),
                SectionRole::TLS,
            )
            .unwrap();
        binary
            .add_section(
                Section::new(".tls2").with_content(vec![0; 0x40]),
                SectionRole::TLS,
            )
            .unwrap();
        assert!(!binary.get_section(".tls1").unwrap().has_role(SectionRole::TLS));
        assert!(binary.get_section(".tls2").unwrap().has_role(SectionRole::TLS));
        // The directory follows the latest holder.
        let directory = binary.data_directory(DirectoryType::TlsTable);
        assert_eq!(directory.section, Some(5));
    }

    #[test]
    fn test_make_space_shifts_bodies() {
        let mut binary = sample_binary();
        binary.available_sections_space = -1;
        let ptr_before = binary.sections()[0].pointerto_raw_data;
        let section = Section::new(".more").with_content(vec![0; 0x10]);
        binary.add_section(section, SectionRole::DATA).unwrap();
        // One aligned section-header slot of room was created.
        assert_eq!(
            binary.sections()[0].pointerto_raw_data,
            ptr_before + binary.optional_header().file_alignment
        );
    }

    #[test]
    fn test_remove_interior_section_merges_gap() {
        let mut binary = sample_binary();
        binary.remove_section(".data", false).unwrap();

        // .rdata absorbed .data's raw and virtual span.
        let rdata = binary.get_section(".rdata").unwrap();
        assert_eq!(
            u64::from(rdata.pointerto_raw_data) + u64::from(rdata.sizeof_raw_data),
            0x2400
        );
        assert_eq!(
            u64::from(rdata.virtual_address) + u64::from(rdata.virtual_size),
            0x4400
        );
        assert_eq!(binary.header().numberof_sections, 3);
    }

    #[test]
    fn test_remove_last_section_skips_merge() {
        let mut binary = sample_binary();
        let rdata_size = binary.get_section(".data").unwrap().sizeof_raw_data;
        binary.remove_section(".rsrc", false).unwrap();
        // Endpoint removal: the neighbor is left alone.
        assert_eq!(
            binary.get_section(".data").unwrap().sizeof_raw_data,
            rdata_size
        );
    }

    #[test]
    fn test_remove_section_rebinds_directories() {
        let mut binary = sample_binary();
        binary.data_directory_mut(DirectoryType::ResourceTable).section = Some(3);
        binary.data_directory_mut(DirectoryType::Debug).section = Some(2);
        binary.remove_section(".data", false).unwrap();
        assert_eq!(
            binary.data_directory(DirectoryType::ResourceTable).section,
            Some(2)
        );
        assert_eq!(binary.data_directory(DirectoryType::Debug).section, None);
    }

    #[test]
    fn test_import_management() {
        let mut binary = sample_binary();
        binary.add_library("kernel32.dll");
        binary
            .add_import_function("kernel32.dll", "ExitProcess")
            .unwrap();
        assert!(binary.has_import("kernel32.dll"));
        assert!(binary.add_import_function("user32.dll", "MessageBoxW").is_err());
        assert!(matches!(
            binary.remove_library("kernel32.dll"),
            Err(Error::NotImplemented(_))
        ));
        binary.remove_all_libraries();
        assert!(!binary.has_imports());
    }

    #[test]
    fn test_predict_function_rva() {
        let mut binary = sample_binary();
        binary.add_library("a.dll");
        binary.add_import_function("a.dll", "one").unwrap();
        binary.add_import_function("a.dll", "two").unwrap();

        let predicted = binary.predict_function_rva("a.dll", "two");
        // Past the last section, section-aligned, plus the descriptor and
        // lookup tables and one pointer slot for "one".
        let table = (1 + 1) * 20u64;
        let lookup = (2 + 1) * 8u64;
        assert_eq!(predicted, 0x6000 + table + lookup + 8);
        assert_eq!(binary.predict_function_rva("a.dll", "missing"), 0);
        assert_eq!(binary.predict_function_rva("b.dll", "one"), 0);
    }

    #[test]
    fn test_patch_and_read_back() {
        let mut binary = sample_binary();
        let va = binary.imagebase() + 0x3000;
        binary.patch_address_value(va, 0xcafe_babe, 4).unwrap();
        assert_eq!(
            binary.get_content_from_virtual_address(va, 4).unwrap(),
            vec![0xbe, 0xba, 0xfe, 0xca]
        );
        // Plain RVAs work too.
        assert_eq!(
            binary.get_content_from_virtual_address(0x3000, 4).unwrap(),
            vec![0xbe, 0xba, 0xfe, 0xca]
        );
        assert!(binary.patch_address_value(va, 0, 16).is_err());
    }

    #[test]
    fn test_exception_functions() {
        let mut binary = sample_binary();
        let mut table = Vec::new();
        for (begin, end) in [(0x1000u32, 0x1040u32), (0x1040, 0x1100)] {
            table.extend_from_slice(&begin.to_le_bytes());
            table.extend_from_slice(&end.to_le_bytes());
            table.extend_from_slice(&0x2000u32.to_le_bytes());
        }
        binary.patch_address_bytes(0x3000, &table).unwrap();
        let directory = binary.data_directory_mut(DirectoryType::ExceptionTable);
        directory.rva = 0x3000;
        directory.size = 24;

        let functions = binary.exception_functions();
        assert_eq!(functions.len(), 2);
        assert_eq!(functions[0].address, 0x1000);
        assert_eq!(functions[0].size, 0x40);
    }

    #[test]
    fn test_abstract_view() {
        let mut binary = sample_binary();
        binary.set_tls(Tls {
            callbacks: vec![0x1_4000_2000, 0x1_4000_2040],
            ..Tls::default()
        });

        let header = binary.abstract_header().unwrap();
        assert_eq!(header.architecture, Arch::X86);
        assert_eq!(header.modes, vec![Mode::Bits64]);
        assert_eq!(header.object_type, ObjectType::Executable);
        assert_eq!(header.endianness, Endianness::Little);

        let ctors = binary.ctor_functions();
        assert_eq!(ctors.len(), 2);
        assert_eq!(ctors[0].name, "tls_0");
        assert!(ctors[1].has_flag(FunctionFlag::Constructor));

        binary.header_mut().machine = Machine::Other(0x1234);
        assert!(matches!(
            binary.abstract_header(),
            Err(Error::NotImplemented(_))
        ));
    }

    #[test]
    fn test_functions_union() {
        let mut binary = sample_binary();
        let mut export = Export::new("sample.exe");
        export
            .entries
            .push(crate::pe::export::ExportEntry::new("entry_fn", 1, 0x1000));
        binary.set_export(export);
        binary.set_tls(Tls {
            callbacks: vec![0x1000, 0x9000],
            ..Tls::default()
        });

        let functions = binary.functions();
        // 0x1000 deduplicated, 0x9000 kept.
        assert_eq!(functions.len(), 2);
        assert_eq!(functions[0].address, 0x1000);
        assert_eq!(functions[1].address, 0x9000);
    }
}

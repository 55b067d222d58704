//! Function discovery: exception-unwind tables, init/fini arrays and the
//! symbol tables, merged into the format-neutral view.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::core::section::SectionView;
use crate::core::{Abstract, Arch, Endianness, Function, FunctionFlag, Header, Mode, ObjectType};
use crate::elf::binary::Binary;
use crate::elf::types::*;
use crate::error::{Error, Result};
use crate::stream::{
    Stream, DW_EH_PE_ALIGNED, DW_EH_PE_DATAREL, DW_EH_PE_FUNCREL, DW_EH_PE_OMIT, DW_EH_PE_PCREL,
    DW_EH_PE_TEXTREL,
};

/// Expand an ARM PREL31 word relative to `base`.
fn prel31_expand(word: u32, base: u32) -> u32 {
    let mut offset = word & 0x7fff_ffff;
    if offset & 0x4000_0000 != 0 {
        offset |= !0x7fff_ffffu32;
    }
    base.wrapping_add(offset)
}

impl Binary {
    /// Functions indexed by the `PT_ARM_EXIDX` unwind table. Entries with
    /// the high bit set in their first word describe cantunwind/ inline
    /// data and are skipped.
    pub fn armexidx_functions(&self) -> Vec<Function> {
        let Ok(exidx) = self.segment_of_type(PT_ARM_EXIDX) else {
            return Vec::new();
        };
        let base_va = exidx.virtual_address;
        let content = self.segment_content(exidx).to_vec();

        let mut functions = Vec::with_capacity(content.len() / 8);
        for (pair, chunk) in content.chunks_exact(8).enumerate() {
            let first_word = u32::from_le_bytes(chunk[0..4].try_into().unwrap());
            if first_word & 0x8000_0000 == 0 {
                let entry_va = base_va as u32 + (pair as u32) * 8;
                let address = prel31_expand(first_word, entry_va);
                functions.push(Function::at(address as u64));
            }
        }
        functions
    }

    /// Functions recovered from the DWARF `eh_frame_hdr` binary-search
    /// table. Corrupt records end the walk with a warning; everything
    /// decoded up to that point is kept.
    pub fn eh_frame_functions(&self) -> Vec<Function> {
        let mut functions = Vec::new();
        if let Err(err) = self.walk_eh_frame(&mut functions) {
            warn!(error = %err, "eh_frame walk aborted early");
        }
        functions
    }

    fn walk_eh_frame(&self, functions: &mut Vec<Function>) -> Result<()> {
        let Ok(eh_frame) = self.segment_of_type(PT_GNU_EH_FRAME) else {
            return Ok(());
        };
        let eh_frame_addr = eh_frame.virtual_address;
        let eh_frame_rva = eh_frame_addr - self.imagebase();
        let eh_frame_off = self.virtual_address_to_offset(eh_frame_addr)?;

        let load = self
            .segments()
            .iter()
            .find(|s| s.is_load() && s.contains_virtual_address(eh_frame_addr))
            .ok_or_else(|| Error::not_found("LOAD segment holding PT_GNU_EH_FRAME"))?;

        // Positions below are relative to the carrying LOAD segment.
        let eh_frame_off = eh_frame_off - load.file_offset;
        let content = self.segment_content(load);
        let mut vs = Stream::new(content);
        vs.set_pos(eh_frame_off as usize);

        let version = vs.read_u8()?;
        let eh_frame_ptr_enc = vs.read_u8()?;
        let fde_count_enc = vs.read_u8()?;
        let table_enc = vs.read_u8()?;

        let _eh_frame_ptr = vs.read_dwarf_encoded(eh_frame_ptr_enc)?;
        let mut fde_count: i64 = -1;
        if fde_count_enc != DW_EH_PE_OMIT {
            fde_count = vs.read_dwarf_encoded(fde_count_enc)?;
        }

        if version != 1 {
            warn!(version, "eh_frame_hdr version is not 1; structure may be corrupted");
        }
        if fde_count < 0 {
            warn!(fde_count, "fde_count is corrupted (negative), clamping to 0");
            fde_count = 0;
        }

        let table_bias = table_enc & 0xf0;
        let is64 = self.class() == Class::Elf64;

        for _ in 0..fde_count as usize {
            // One (initial_location, fde_address) pair of the search table.
            let initial_location = vs.read_dwarf_encoded(table_enc)? as u32;
            let address = vs.read_dwarf_encoded(table_enc)? as u32;

            let bias: u32 = match table_bias {
                DW_EH_PE_PCREL => (eh_frame_rva as u32).wrapping_add(vs.pos() as u32),
                DW_EH_PE_DATAREL => eh_frame_rva as u32,
                DW_EH_PE_TEXTREL | DW_EH_PE_FUNCREL | DW_EH_PE_ALIGNED => {
                    warn!(encoding = table_bias, "table encoding is not supported");
                    0
                }
                _ => {
                    warn!(encoding = table_bias, "unknown table encoding");
                    0
                }
            };
            let initial_location = initial_location.wrapping_add(bias);
            let address = address.wrapping_add(bias);

            let saved_pos = vs.pos();

            // Hop to the FDE the table points at.
            vs.set_pos(eh_frame_off as usize + address.wrapping_sub(bias) as usize);

            let fde_length = vs.read_u32()?;
            let _fde_length = if fde_length == u32::MAX {
                vs.read_u64()?
            } else {
                fde_length as u64
            };
            let cie_pointer = vs.read_u32()?;
            if cie_pointer == 0 {
                debug!("null CIE pointer, skipping entry");
                vs.set_pos(saved_pos);
                continue;
            }
            let cie_offset = vs.pos() - cie_pointer as usize - 4;

            // Visit the CIE to learn how the FDE payload is encoded.
            let fde_pos = vs.pos();
            let mut augmentation_data = 0u8;
            vs.set_pos(cie_offset);
            {
                let cie_length = vs.read_u32()?;
                let _cie_length = if cie_length == u32::MAX {
                    vs.read_u64()?
                } else {
                    cie_length as u64
                };
                let cie_id = vs.read_u32()?;
                let cie_version = vs.read_u8()?;
                if cie_id != 0 {
                    warn!(cie_id, "CIE id is not 0");
                }
                if cie_version != 1 {
                    warn!(cie_version, "CIE version is not 1");
                }

                let augmentation = vs.read_cstring()?;
                if augmentation.contains("eh") {
                    if is64 {
                        vs.read_u64()?;
                    } else {
                        vs.read_u32()?;
                    }
                }
                vs.read_uleb128()?; // code alignment factor
                vs.read_sleb128()?; // data alignment factor
                vs.read_uleb128()?; // return address register
                if augmentation.contains('z') {
                    vs.read_uleb128()?; // augmentation data length
                }
                if augmentation.starts_with('z') {
                    if augmentation.contains('R') {
                        augmentation_data = vs.read_u8()?;
                    } else {
                        warn!(augmentation = %augmentation, "augmentation string is not supported");
                    }
                }
            }

            // Back in the FDE: function begin and extent.
            vs.set_pos(fde_pos);
            let _function_begin = (eh_frame_rva as u32)
                .wrapping_add(vs.pos() as u32)
                .wrapping_add(vs.read_dwarf_encoded(augmentation_data)? as u32);
            let size = vs.read_dwarf_encoded(augmentation_data)? as u32;

            functions.push(
                Function::at(initial_location as u64 + self.imagebase()).with_size(size as u64),
            );

            vs.set_pos(saved_pos);
        }
        Ok(())
    }

    fn tor_functions(&self, tag: i64) -> Vec<Function> {
        let mut functions = Vec::new();
        if let Ok(entry) = self.dynamic_entry(tag) {
            if let Some(entries) = entry.array_entries() {
                for &address in entries {
                    if address != 0 && address as u32 != u32::MAX && address != u64::MAX {
                        functions.push(Function::at(address));
                    }
                }
            }
        }
        functions
    }

    /// Constructors: `DT_INIT`, `DT_INIT_ARRAY` and `DT_PREINIT_ARRAY`.
    pub fn constructor_functions(&self) -> Vec<Function> {
        let mut functions: Vec<Function> = self
            .tor_functions(DT_INIT_ARRAY)
            .into_iter()
            .map(|f| {
                let mut f = f.with_flag(FunctionFlag::Constructor);
                f.name = "__dt_init_array".to_string();
                f
            })
            .collect();

        functions.extend(self.tor_functions(DT_PREINIT_ARRAY).into_iter().map(|f| {
            let mut f = f.with_flag(FunctionFlag::Constructor);
            f.name = "__dt_preinit_array".to_string();
            f
        }));

        if let Ok(init) = self.dynamic_entry(DT_INIT) {
            functions
                .push(Function::new("__dt_init", init.value).with_flag(FunctionFlag::Constructor));
        }
        functions
    }

    /// Destructors: `DT_FINI` and `DT_FINI_ARRAY`.
    pub fn destructor_functions(&self) -> Vec<Function> {
        let mut functions: Vec<Function> = self
            .tor_functions(DT_FINI_ARRAY)
            .into_iter()
            .map(|f| {
                let mut f = f.with_flag(FunctionFlag::Destructor);
                f.name = "__dt_fini_array".to_string();
                f
            })
            .collect();

        if let Ok(fini) = self.dynamic_entry(DT_FINI) {
            functions
                .push(Function::new("__dt_fini", fini.value).with_flag(FunctionFlag::Destructor));
        }
        functions
    }

    fn machine_identity(&self) -> Result<(Arch, Vec<Mode>)> {
        let identity = match self.header().machine {
            EM_386 => (Arch::X86, vec![Mode::Bits32]),
            EM_X86_64 => (Arch::X86, vec![Mode::Bits64]),
            EM_ARM => (Arch::Arm, vec![Mode::Bits32]),
            EM_AARCH64 => (Arch::Arm64, vec![Mode::Bits64, Mode::V8]),
            EM_MIPS => (Arch::Mips, vec![Mode::Bits32]),
            EM_PPC => (Arch::PowerPc, vec![Mode::Bits32]),
            EM_PPC64 => (Arch::PowerPc, vec![Mode::Bits64]),
            EM_SPARC => (Arch::Sparc, vec![Mode::Bits32]),
            EM_S390 => (Arch::SysZ, vec![Mode::Bits64]),
            EM_RISCV => match self.class() {
                Class::Elf32 => (Arch::RiscV, vec![Mode::Bits32]),
                Class::Elf64 => (Arch::RiscV, vec![Mode::Bits64]),
            },
            other => {
                return Err(Error::NotImplemented(format!("machine type {other:#x}")));
            }
        };
        Ok(identity)
    }
}

impl Abstract for Binary {
    fn abstract_header(&self) -> Result<Header> {
        let (architecture, modes) = self.machine_identity()?;
        let object_type = match self.header().file_type {
            FileType::Executable => ObjectType::Executable,
            // A shared object with an interpreter is a PIE executable.
            FileType::SharedObject if self.has_segment_of_type(PT_INTERP) => {
                ObjectType::Executable
            }
            FileType::SharedObject => ObjectType::Library,
            _ => ObjectType::None,
        };
        let endianness = match self.header().encoding {
            Encoding::Little => Endianness::Little,
            Encoding::Big => Endianness::Big,
        };
        Ok(Header {
            architecture,
            modes,
            entrypoint: self.entrypoint(),
            object_type,
            endianness,
        })
    }

    fn imported_libraries(&self) -> Vec<String> {
        self.dynamic_entries()
            .iter()
            .filter(|e| e.tag == DT_NEEDED)
            .filter_map(|e| e.library_name().map(str::to_string))
            .collect()
    }

    fn imported_functions(&self) -> Vec<Function> {
        self.imported_symbols()
            .into_iter()
            .filter(|s| s.is_function())
            .map(|s| Function::new(&s.name, s.value).with_flag(FunctionFlag::Imported))
            .collect()
    }

    fn exported_functions(&self) -> Vec<Function> {
        self.exported_symbols()
            .into_iter()
            .filter(|s| s.is_function())
            .map(|s| Function::new(&s.name, s.value).with_flag(FunctionFlag::Exported))
            .collect()
    }

    fn ctor_functions(&self) -> Vec<Function> {
        self.constructor_functions()
    }

    fn functions(&self) -> Vec<Function> {
        let mut by_address: BTreeMap<u64, Function> = BTreeMap::new();

        for symbol in self.symbols() {
            if symbol.is_function() && symbol.value > 0 {
                by_address
                    .entry(symbol.value)
                    .or_insert_with(|| {
                        Function::new(&symbol.name, symbol.value).with_size(symbol.size)
                    });
            }
        }

        let discovered = self
            .constructor_functions()
            .into_iter()
            .chain(self.destructor_functions())
            .chain(self.eh_frame_functions())
            .chain(self.armexidx_functions());
        for function in discovered {
            by_address.entry(function.address).or_insert(function);
        }

        by_address.into_values().collect()
    }

    fn abstract_sections(&self) -> Vec<SectionView> {
        self.sections()
            .iter()
            .map(|s| SectionView {
                name: s.name.clone(),
                virtual_address: s.virtual_address,
                virtual_size: s.size,
                file_offset: s.file_offset,
                raw_size: if s.is_nobits() { 0 } else { s.size },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::dynamic::DynamicEntry;
    use crate::elf::section::Section;
    use crate::elf::segment::Segment;
    use crate::elf::symbol::Symbol;

    fn base_binary() -> Binary {
        let mut binary = Binary::new(
            Class::Elf64,
            Encoding::Little,
            FileType::SharedObject,
            EM_X86_64,
        )
        .with_image(vec![0u8; 0x4000]);

        let mut load = Segment::new(PT_LOAD);
        load.flags = PF_R | PF_X;
        load.file_offset = 0;
        load.physical_size = 0x4000;
        load.virtual_address = 0x10000;
        load.virtual_size = 0x4000;
        binary.push_segment(load);
        binary
    }

    #[test]
    fn test_prel31_expand() {
        // Positive offset.
        assert_eq!(prel31_expand(0x100, 0x8000), 0x8100);
        // Sign-extended negative offset.
        assert_eq!(prel31_expand(0x7fff_fffc, 0x8000), 0x7ffc);
    }

    #[test]
    fn test_armexidx_functions() {
        let mut binary = Binary::new(
            Class::Elf32,
            Encoding::Little,
            FileType::Executable,
            EM_ARM,
        )
        .with_image(vec![0u8; 0x100]);

        // Two entries: one PREL31 pointer, one EXIDX_CANTUNWIND marker.
        let mut exidx = Segment::new(PT_ARM_EXIDX);
        exidx.file_offset = 0x10;
        exidx.physical_size = 16;
        exidx.virtual_address = 0x8000;
        exidx.virtual_size = 16;
        binary.push_segment(exidx);

        let mut table = Vec::new();
        table.extend_from_slice(&0x0000_0100u32.to_le_bytes()); // +0x100 from 0x8000
        table.extend_from_slice(&1u32.to_le_bytes());
        table.extend_from_slice(&0x8000_0001u32.to_le_bytes()); // high bit: skipped
        table.extend_from_slice(&1u32.to_le_bytes());
        binary.handler.write(0x10, &table);

        let functions = binary.armexidx_functions();
        assert_eq!(functions.len(), 1);
        assert_eq!(functions[0].address, 0x8100);
    }

    #[test]
    fn test_eh_frame_functions() {
        let mut binary = base_binary();

        // eh_frame_hdr at offset 0x1000 (VA 0x11000), eh_frame at 0x1100.
        let mut hdr_seg = Segment::new(PT_GNU_EH_FRAME);
        hdr_seg.file_offset = 0x1000;
        hdr_seg.physical_size = 0x100;
        hdr_seg.virtual_address = 0x11000;
        hdr_seg.virtual_size = 0x100;
        binary.push_segment(hdr_seg);

        let mut image = Vec::new();
        // Header: version 1, ptr_enc udata4, count_enc udata4,
        // table_enc datarel|sdata4 (0x3b).
        image.extend_from_slice(&[1, 0x03, 0x03, 0x3b]);
        image.extend_from_slice(&0x100u32.to_le_bytes()); // eh_frame_ptr
        image.extend_from_slice(&1u32.to_le_bytes()); // fde_count
        // Table pair, datarel to eh_frame_hdr RVA (0x1000):
        // initial_location 0x500 -> RVA 0x1500; fde at hdr-relative 0x100.
        image.extend_from_slice(&0x500u32.to_le_bytes());
        image.extend_from_slice(&0x100u32.to_le_bytes());
        binary.handler.write(0x1000, &image);

        // CIE at 0x10e8: length 0xc, id 0, version 1, augmentation "zR",
        // uleb/sleb/uleb, aug len 1, enc sdata4. 17 bytes, clear of the
        // FDE that starts at 0x1100.
        let mut cie = Vec::new();
        cie.extend_from_slice(&0xcu32.to_le_bytes());
        cie.extend_from_slice(&0u32.to_le_bytes());
        cie.push(1);
        cie.extend_from_slice(b"zR\0");
        cie.push(1); // code alignment
        cie.push(0x7c); // data alignment (sleb -4)
        cie.push(16); // return address register
        cie.push(1); // augmentation length
        cie.push(0x0b); // FDE encoding: sdata4
        binary.handler.write(0x10e8, &cie);

        // FDE at 0x1100: length, cie_pointer back to 0x10e8,
        // function_begin (pc-rel, ignored for the result), size 0x40.
        let mut fde = Vec::new();
        fde.extend_from_slice(&0x10u32.to_le_bytes());
        // cie_pointer: distance from the byte after itself back to the
        // CIE: (0x1108 - 4) - 0x10e8 = 0x1c.
        fde.extend_from_slice(&0x1cu32.to_le_bytes());
        fde.extend_from_slice(&0x200u32.to_le_bytes());
        fde.extend_from_slice(&0x40u32.to_le_bytes());
        binary.handler.write(0x1100, &fde);

        let functions = binary.eh_frame_functions();
        assert_eq!(functions.len(), 1);
        // initial_location (0x500) + datarel bias (0x1000) + imagebase.
        assert_eq!(functions[0].address, 0x10000 + 0x1500);
        assert_eq!(functions[0].size, 0x40);
    }

    #[test]
    fn test_ctor_dtor_functions() {
        let mut binary = base_binary();
        binary.push_dynamic_entry(DynamicEntry::new(DT_INIT, 0x10100));
        binary.push_dynamic_entry(DynamicEntry::array(
            DT_INIT_ARRAY,
            0x12000,
            vec![0x10200, 0, u64::MAX, 0x10300],
        ));
        binary.push_dynamic_entry(DynamicEntry::new(DT_FINI, 0x10400));
        binary.push_dynamic_entry(DynamicEntry::null());

        let ctors = binary.constructor_functions();
        let addresses: Vec<u64> = ctors.iter().map(|f| f.address).collect();
        // Sentinel 0 / -1 array slots are skipped.
        assert_eq!(addresses, vec![0x10200, 0x10300, 0x10100]);
        assert!(ctors.iter().all(|f| f.has_flag(FunctionFlag::Constructor)));

        let dtors = binary.destructor_functions();
        assert_eq!(dtors.len(), 1);
        assert_eq!(dtors[0].name, "__dt_fini");
    }

    #[test]
    fn test_abstract_header_pie_detection() {
        let mut binary = base_binary();
        assert_eq!(
            binary.abstract_header().unwrap().object_type,
            ObjectType::Library
        );
        binary.push_segment(Segment::new(PT_INTERP));
        let header = binary.abstract_header().unwrap();
        assert_eq!(header.object_type, ObjectType::Executable);
        assert_eq!(header.architecture, Arch::X86);
        assert_eq!(header.modes, vec![Mode::Bits64]);
        assert_eq!(header.endianness, Endianness::Little);
    }

    #[test]
    fn test_abstract_header_unknown_machine() {
        let mut binary = base_binary();
        binary.header_mut().machine = 0x1234;
        assert!(matches!(
            binary.abstract_header(),
            Err(Error::NotImplemented(_))
        ));
    }

    #[test]
    fn test_functions_union_dedupes_by_address() {
        let mut binary = base_binary();
        binary.add_dynamic_symbol(Symbol::function("dup", 0x10100), None);
        binary.push_dynamic_entry(DynamicEntry::new(DT_INIT, 0x10100));
        binary.push_dynamic_entry(DynamicEntry::new(DT_FINI, 0x10400));
        binary.push_dynamic_entry(DynamicEntry::null());

        let functions = binary.functions();
        let at_dup: Vec<&Function> = functions.iter().filter(|f| f.address == 0x10100).collect();
        assert_eq!(at_dup.len(), 1);
        // The symbol won over the __dt_init alias.
        assert_eq!(at_dup[0].name, "dup");
        assert!(functions.iter().any(|f| f.address == 0x10400));
    }

    #[test]
    fn test_imported_libraries_and_functions() {
        let mut binary = base_binary();
        binary.push_dynamic_entry(DynamicEntry::needed("libc.so.6"));
        binary.push_dynamic_entry(DynamicEntry::null());
        binary.add_dynamic_symbol(Symbol::function("malloc", 0), None);
        binary.add_dynamic_symbol(
            {
                let mut s = Symbol::function("local_fn", 0x10500);
                s.shndx = 1;
                s
            },
            None,
        );

        assert_eq!(binary.imported_libraries(), vec!["libc.so.6".to_string()]);
        let imported = binary.imported_functions();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].name, "malloc");
        let exported = binary.exported_functions();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].name, "local_fn");
    }

    #[test]
    fn test_abstract_sections_view() {
        let mut binary = base_binary();
        let mut bss = Section::new(".bss").with_type(SHT_NOBITS);
        bss.size = 0x100;
        bss.virtual_address = 0x13000;
        binary.push_section(bss);

        let views = binary.abstract_sections();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].raw_size, 0);
        assert_eq!(views[0].virtual_size, 0x100);
    }
}

//! DOS, COFF and optional headers.

use crate::pe::types::*;
use serde::{Deserialize, Serialize};

/// The 64-byte DOS header. Every field participates in the Authenticode
/// stream, so all of them are kept live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DosHeader {
    pub magic: u16,
    pub used_bytes_in_last_page: u16,
    pub file_size_in_pages: u16,
    pub numberof_relocations: u16,
    pub header_size_in_paragraphs: u16,
    pub minimum_extra_paragraphs: u16,
    pub maximum_extra_paragraphs: u16,
    pub initial_relative_ss: u16,
    pub initial_sp: u16,
    pub checksum: u16,
    pub initial_ip: u16,
    pub initial_relative_cs: u16,
    pub addressof_relocation_table: u16,
    pub overlay_number: u16,
    pub reserved: [u16; 4],
    pub oem_id: u16,
    pub oem_info: u16,
    pub reserved2: [u16; 10],
    pub addressof_new_exeheader: u32,
}

impl Default for DosHeader {
    fn default() -> Self {
        Self {
            magic: DOS_SIGNATURE,
            used_bytes_in_last_page: 0x90,
            file_size_in_pages: 3,
            numberof_relocations: 0,
            header_size_in_paragraphs: 4,
            minimum_extra_paragraphs: 0,
            maximum_extra_paragraphs: 0xffff,
            initial_relative_ss: 0,
            initial_sp: 0xb8,
            checksum: 0,
            initial_ip: 0,
            initial_relative_cs: 0,
            addressof_relocation_table: 0x40,
            overlay_number: 0,
            reserved: [0; 4],
            oem_id: 0,
            oem_info: 0,
            reserved2: [0; 10],
            addressof_new_exeheader: 0x40,
        }
    }
}

/// COFF file header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub machine: Machine,
    pub numberof_sections: u16,
    pub time_date_stamp: u32,
    pub pointerto_symbol_table: u32,
    pub numberof_symbols: u32,
    pub sizeof_optional_header: u16,
    pub characteristics: u16,
}

impl Header {
    pub fn new(machine: Machine) -> Self {
        Self {
            machine,
            numberof_sections: 0,
            time_date_stamp: 0,
            pointerto_symbol_table: 0,
            numberof_symbols: 0,
            sizeof_optional_header: 0,
            characteristics: IMAGE_FILE_EXECUTABLE_IMAGE,
        }
    }

    pub fn has_characteristic(&self, characteristic: u16) -> bool {
        self.characteristics & characteristic != 0
    }

    pub fn add_characteristic(&mut self, characteristic: u16) {
        self.characteristics |= characteristic;
    }
}

/// Optional header, PE32 and PE32+ unified; `PeType` on the binary
/// decides how the width-dependent fields serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionalHeader {
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub sizeof_code: u32,
    pub sizeof_initialized_data: u32,
    pub sizeof_uninitialized_data: u32,
    pub addressof_entrypoint: u32,
    pub baseof_code: u32,
    /// PE32 only; meaningless (and absent on disk) for PE32+.
    pub baseof_data: u32,
    pub imagebase: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub sizeof_image: u32,
    pub sizeof_headers: u32,
    pub checksum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub sizeof_stack_reserve: u64,
    pub sizeof_stack_commit: u64,
    pub sizeof_heap_reserve: u64,
    pub sizeof_heap_commit: u64,
    pub loader_flags: u32,
    pub numberof_rva_and_size: u32,
}

impl Default for OptionalHeader {
    fn default() -> Self {
        Self {
            major_linker_version: 9,
            minor_linker_version: 0,
            sizeof_code: 0,
            sizeof_initialized_data: 0,
            sizeof_uninitialized_data: 0,
            addressof_entrypoint: 0,
            baseof_code: 0,
            baseof_data: 0,
            imagebase: 0x0040_0000,
            section_alignment: 0x1000,
            file_alignment: 0x200,
            major_operating_system_version: 6,
            minor_operating_system_version: 0,
            major_image_version: 0,
            minor_image_version: 0,
            major_subsystem_version: 6,
            minor_subsystem_version: 0,
            win32_version_value: 0,
            sizeof_image: 0,
            sizeof_headers: 0,
            checksum: 0,
            subsystem: 3, // IMAGE_SUBSYSTEM_WINDOWS_CUI
            dll_characteristics: 0,
            sizeof_stack_reserve: 0x0010_0000,
            sizeof_stack_commit: 0x1000,
            sizeof_heap_reserve: 0x0010_0000,
            sizeof_heap_commit: 0x1000,
            loader_flags: 0,
            numberof_rva_and_size: DEFAULT_NUMBER_DATA_DIRECTORIES as u32,
        }
    }
}

impl OptionalHeader {
    pub fn has_dll_characteristic(&self, characteristic: u16) -> bool {
        self.dll_characteristics & characteristic != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dos_header_defaults() {
        let dos = DosHeader::default();
        assert_eq!(dos.magic, DOS_SIGNATURE);
        assert_eq!(dos.addressof_new_exeheader, 0x40);
    }

    #[test]
    fn test_coff_characteristics() {
        let mut header = Header::new(Machine::Amd64);
        assert!(header.has_characteristic(IMAGE_FILE_EXECUTABLE_IMAGE));
        assert!(!header.has_characteristic(IMAGE_FILE_DLL));
        header.add_characteristic(IMAGE_FILE_DLL);
        assert!(header.has_characteristic(IMAGE_FILE_DLL));
    }

    #[test]
    fn test_optional_header_defaults() {
        let opt = OptionalHeader::default();
        assert_eq!(opt.section_alignment, 0x1000);
        assert_eq!(opt.file_alignment, 0x200);
        assert_eq!(opt.numberof_rva_and_size, 16);
        assert!(!opt.has_dll_characteristic(IMAGE_DLLCHARACTERISTICS_NX_COMPAT));
    }
}

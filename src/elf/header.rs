//! ELF file header.

use crate::elf::types::{Class, Encoding, FileType};
use serde::{Deserialize, Serialize};

/// The `Elf32_Ehdr` / `Elf64_Ehdr` fields the model keeps live.
///
/// Table offsets and counts are maintained by the mutation engine; a
/// builder serializes them back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub class: Class,
    pub encoding: Encoding,
    pub version: u8,
    pub osabi: u8,
    pub file_type: FileType,
    pub machine: u16,
    pub entrypoint: u64,
    pub program_headers_offset: u64,
    pub section_headers_offset: u64,
    pub processor_flags: u32,
    pub numberof_segments: u16,
    pub numberof_sections: u16,
    pub section_name_table_idx: u16,
}

impl Header {
    pub fn new(class: Class, encoding: Encoding, file_type: FileType, machine: u16) -> Self {
        let header_size = match class {
            Class::Elf32 => 52,
            Class::Elf64 => 64,
        };
        Self {
            class,
            encoding,
            version: 1,
            osabi: 0,
            file_type,
            machine,
            entrypoint: 0,
            program_headers_offset: header_size,
            section_headers_offset: 0,
            processor_flags: 0,
            numberof_segments: 0,
            numberof_sections: 0,
            section_name_table_idx: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::types::EM_X86_64;

    #[test]
    fn test_new_header_defaults() {
        let header = Header::new(
            Class::Elf64,
            Encoding::Little,
            FileType::SharedObject,
            EM_X86_64,
        );
        assert_eq!(header.program_headers_offset, 64);
        assert_eq!(header.version, 1);
        assert_eq!(header.numberof_sections, 0);
    }
}

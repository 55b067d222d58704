//! ELF enums and wire constants.

use crate::error::{Error, Result};
use crate::utils::ByteOrder;
use serde::{Deserialize, Serialize};

/// ELF class: pointer width of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Class {
    Elf32,
    Elf64,
}

impl Class {
    pub fn from_ident(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Class::Elf32),
            2 => Ok(Class::Elf64),
            other => Err(Error::NotImplemented(format!("ELF class {other}"))),
        }
    }

    pub fn bits(&self) -> u8 {
        match self {
            Class::Elf32 => 32,
            Class::Elf64 => 64,
        }
    }

    /// Width in bytes of an address / word for this class.
    pub fn word_size(&self) -> usize {
        match self {
            Class::Elf32 => 4,
            Class::Elf64 => 8,
        }
    }

    /// Size of one program-header entry.
    pub fn phdr_entry_size(&self) -> u64 {
        match self {
            Class::Elf32 => 32,
            Class::Elf64 => 56,
        }
    }

    /// Size of one section-header entry.
    pub fn shdr_entry_size(&self) -> u64 {
        match self {
            Class::Elf32 => 40,
            Class::Elf64 => 64,
        }
    }

    /// Size of one relocation record.
    pub fn reloc_entry_size(&self, is_rela: bool) -> u64 {
        match (self, is_rela) {
            (Class::Elf32, false) => 8,
            (Class::Elf32, true) => 12,
            (Class::Elf64, false) => 16,
            (Class::Elf64, true) => 24,
        }
    }
}

/// Data encoding: byte order of every multi-byte field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    Little,
    Big,
}

impl Encoding {
    pub fn from_ident(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Encoding::Little),
            2 => Ok(Encoding::Big),
            other => Err(Error::NotImplemented(format!("ELF data encoding {other}"))),
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        match self {
            Encoding::Little => ByteOrder::Little,
            Encoding::Big => ByteOrder::Big,
        }
    }
}

/// Object file type (`e_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    None,
    Relocatable,
    Executable,
    SharedObject,
    Core,
}

impl From<u16> for FileType {
    fn from(value: u16) -> Self {
        match value {
            1 => FileType::Relocatable,
            2 => FileType::Executable,
            3 => FileType::SharedObject,
            4 => FileType::Core,
            _ => FileType::None,
        }
    }
}

// Machine types (`e_machine`) the shift propagator knows about.
pub const EM_NONE: u16 = 0;
pub const EM_SPARC: u16 = 2;
pub const EM_386: u16 = 3;
pub const EM_MIPS: u16 = 8;
pub const EM_PPC: u16 = 20;
pub const EM_PPC64: u16 = 21;
pub const EM_S390: u16 = 22;
pub const EM_ARM: u16 = 40;
pub const EM_X86_64: u16 = 62;
pub const EM_AARCH64: u16 = 183;
pub const EM_RISCV: u16 = 243;

// Section types.
pub const SHT_NULL: u32 = 0;
pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_RELA: u32 = 4;
pub const SHT_HASH: u32 = 5;
pub const SHT_DYNAMIC: u32 = 6;
pub const SHT_NOTE: u32 = 7;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_REL: u32 = 9;
pub const SHT_DYNSYM: u32 = 11;
pub const SHT_INIT_ARRAY: u32 = 14;
pub const SHT_FINI_ARRAY: u32 = 15;
pub const SHT_GNU_HASH: u32 = 0x6fff_fff6;
pub const SHT_GNU_VERNEED: u32 = 0x6fff_fffe;
pub const SHT_GNU_VERSYM: u32 = 0x6fff_ffff;

// Section flags.
pub const SHF_WRITE: u64 = 0x1;
pub const SHF_ALLOC: u64 = 0x2;
pub const SHF_EXECINSTR: u64 = 0x4;
pub const SHF_TLS: u64 = 0x400;

// Special section indices.
pub const SHN_UNDEF: u16 = 0;
pub const SHN_ABS: u16 = 0xfff1;
pub const SHN_COMMON: u16 = 0xfff2;

// Segment types.
pub const PT_NULL: u32 = 0;
pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_INTERP: u32 = 3;
pub const PT_NOTE: u32 = 4;
pub const PT_PHDR: u32 = 6;
pub const PT_TLS: u32 = 7;
pub const PT_GNU_EH_FRAME: u32 = 0x6474_e550;
pub const PT_GNU_STACK: u32 = 0x6474_e551;
pub const PT_GNU_RELRO: u32 = 0x6474_e552;
pub const PT_ARM_EXIDX: u32 = 0x7000_0001;

// Segment flags.
pub const PF_X: u32 = 0x1;
pub const PF_W: u32 = 0x2;
pub const PF_R: u32 = 0x4;

// Symbol bindings.
pub const STB_LOCAL: u8 = 0;
pub const STB_GLOBAL: u8 = 1;
pub const STB_WEAK: u8 = 2;

// Symbol types.
pub const STT_NOTYPE: u8 = 0;
pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;
pub const STT_SECTION: u8 = 3;
pub const STT_FILE: u8 = 4;
pub const STT_COMMON: u8 = 5;
pub const STT_TLS: u8 = 6;

// Symbol visibility.
pub const STV_DEFAULT: u8 = 0;
pub const STV_INTERNAL: u8 = 1;
pub const STV_HIDDEN: u8 = 2;
pub const STV_PROTECTED: u8 = 3;

// Dynamic tags.
pub const DT_NULL: i64 = 0;
pub const DT_NEEDED: i64 = 1;
pub const DT_PLTRELSZ: i64 = 2;
pub const DT_PLTGOT: i64 = 3;
pub const DT_HASH: i64 = 4;
pub const DT_STRTAB: i64 = 5;
pub const DT_SYMTAB: i64 = 6;
pub const DT_RELA: i64 = 7;
pub const DT_RELASZ: i64 = 8;
pub const DT_RELAENT: i64 = 9;
pub const DT_STRSZ: i64 = 10;
pub const DT_SYMENT: i64 = 11;
pub const DT_INIT: i64 = 12;
pub const DT_FINI: i64 = 13;
pub const DT_SONAME: i64 = 14;
pub const DT_RPATH: i64 = 15;
pub const DT_SYMBOLIC: i64 = 16;
pub const DT_REL: i64 = 17;
pub const DT_RELSZ: i64 = 18;
pub const DT_RELENT: i64 = 19;
pub const DT_PLTREL: i64 = 20;
pub const DT_DEBUG: i64 = 21;
pub const DT_TEXTREL: i64 = 22;
pub const DT_JMPREL: i64 = 23;
pub const DT_BIND_NOW: i64 = 24;
pub const DT_INIT_ARRAY: i64 = 25;
pub const DT_FINI_ARRAY: i64 = 26;
pub const DT_INIT_ARRAYSZ: i64 = 27;
pub const DT_FINI_ARRAYSZ: i64 = 28;
pub const DT_RUNPATH: i64 = 29;
pub const DT_FLAGS: i64 = 30;
pub const DT_PREINIT_ARRAY: i64 = 32;
pub const DT_PREINIT_ARRAYSZ: i64 = 33;
pub const DT_GNU_HASH: i64 = 0x6fff_fef5;
pub const DT_FLAGS_1: i64 = 0x6fff_fffb;
pub const DT_VERSYM: i64 = 0x6fff_fff0;
pub const DT_VERDEF: i64 = 0x6fff_fffc;
pub const DT_VERDEFNUM: i64 = 0x6fff_fffd;
pub const DT_VERNEED: i64 = 0x6fff_fffe;
pub const DT_VERNEEDNUM: i64 = 0x6fff_ffff;

// Relocation types consumed by the GOT fixup and the shift propagator,
// per machine.
pub const R_386_32: u32 = 1;
pub const R_386_GLOB_DAT: u32 = 6;
pub const R_386_JMP_SLOT: u32 = 7;
pub const R_386_RELATIVE: u32 = 8;

pub const R_X86_64_64: u32 = 1;
pub const R_X86_64_GLOB_DAT: u32 = 6;
pub const R_X86_64_JUMP_SLOT: u32 = 7;
pub const R_X86_64_RELATIVE: u32 = 8;

pub const R_ARM_ABS32: u32 = 2;
pub const R_ARM_GLOB_DAT: u32 = 21;
pub const R_ARM_JUMP_SLOT: u32 = 22;
pub const R_ARM_RELATIVE: u32 = 23;

pub const R_AARCH64_ABS64: u32 = 257;
pub const R_AARCH64_GLOB_DAT: u32 = 1025;
pub const R_AARCH64_JUMP_SLOT: u32 = 1026;
pub const R_AARCH64_RELATIVE: u32 = 1027;

pub const R_PPC_ADDR32: u32 = 1;
pub const R_PPC_GLOB_DAT: u32 = 20;
pub const R_PPC_JMP_SLOT: u32 = 21;
pub const R_PPC_RELATIVE: u32 = 22;

/// GOT-slot relocation types (`GLOB_DAT` / `JUMP_SLOT`) for `machine`.
/// Empty when the machine is not handled.
pub fn got_slot_types(machine: u16) -> &'static [u32] {
    match machine {
        EM_386 => &[R_386_GLOB_DAT, R_386_JMP_SLOT],
        EM_X86_64 => &[R_X86_64_GLOB_DAT, R_X86_64_JUMP_SLOT],
        EM_ARM => &[R_ARM_GLOB_DAT, R_ARM_JUMP_SLOT],
        EM_AARCH64 => &[R_AARCH64_GLOB_DAT, R_AARCH64_JUMP_SLOT],
        EM_PPC => &[R_PPC_GLOB_DAT, R_PPC_JMP_SLOT],
        _ => &[],
    }
}

/// Relocation types whose addend holds a virtual address for `machine`.
pub fn addend_address_types(machine: u16) -> &'static [u32] {
    match machine {
        EM_386 => &[R_386_RELATIVE, R_386_32],
        EM_X86_64 => &[R_X86_64_RELATIVE, R_X86_64_64],
        EM_ARM => &[R_ARM_RELATIVE, R_ARM_ABS32],
        EM_AARCH64 => &[R_AARCH64_RELATIVE, R_AARCH64_ABS64],
        EM_PPC => &[R_PPC_RELATIVE, R_PPC_ADDR32],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_sizes() {
        assert_eq!(Class::Elf32.bits(), 32);
        assert_eq!(Class::Elf64.word_size(), 8);
        assert_eq!(Class::Elf32.phdr_entry_size(), 32);
        assert_eq!(Class::Elf64.phdr_entry_size(), 56);
        assert_eq!(Class::Elf64.shdr_entry_size(), 64);
        assert!(Class::from_ident(3).is_err());
    }

    #[test]
    fn test_reloc_entry_sizes() {
        assert_eq!(Class::Elf32.reloc_entry_size(false), 8);
        assert_eq!(Class::Elf32.reloc_entry_size(true), 12);
        assert_eq!(Class::Elf64.reloc_entry_size(false), 16);
        assert_eq!(Class::Elf64.reloc_entry_size(true), 24);
    }

    #[test]
    fn test_file_type_conversion() {
        assert_eq!(FileType::from(2), FileType::Executable);
        assert_eq!(FileType::from(3), FileType::SharedObject);
        assert_eq!(FileType::from(99), FileType::None);
    }

    #[test]
    fn test_machine_tables() {
        assert_eq!(got_slot_types(EM_X86_64), &[6, 7]);
        assert!(got_slot_types(EM_S390).is_empty());
        assert!(addend_address_types(EM_MIPS).is_empty());
    }
}

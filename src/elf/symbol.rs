//! ELF symbols and symbol versions.

use crate::elf::types::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One entry of `.dynsym` or `.symtab`.
///
/// `version` indexes the binary's symbol-version table; it is a lookup
/// key, not an owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub value: u64,
    pub size: u64,
    pub symbol_type: u8,
    pub binding: u8,
    pub visibility: u8,
    pub shndx: u16,
    pub version: Option<usize>,
}

impl Symbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: 0,
            size: 0,
            symbol_type: STT_NOTYPE,
            binding: STB_LOCAL,
            visibility: STV_DEFAULT,
            shndx: SHN_UNDEF,
            version: None,
        }
    }

    pub fn function(name: impl Into<String>, value: u64) -> Self {
        let mut sym = Self::new(name);
        sym.symbol_type = STT_FUNC;
        sym.binding = STB_GLOBAL;
        sym.value = value;
        sym
    }

    pub fn is_function(&self) -> bool {
        self.symbol_type == STT_FUNC
    }

    pub fn is_undefined(&self) -> bool {
        self.shndx == SHN_UNDEF
    }

    /// Defined and visible to the dynamic linker.
    pub fn is_exported(&self) -> bool {
        self.shndx != SHN_UNDEF && matches!(self.binding, STB_GLOBAL | STB_WEAK)
    }

    /// Resolved from another object at load time.
    pub fn is_imported(&self) -> bool {
        self.shndx == SHN_UNDEF && matches!(self.binding, STB_GLOBAL | STB_WEAK)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} value={:#x} size={:#x} type={} bind={}",
            self.name, self.value, self.size, self.symbol_type, self.binding
        )
    }
}

/// Version requirement attached to a dynamic symbol.
///
/// 0 is local, 1 is global, higher values index the version-definition
/// tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolVersion {
    pub value: u16,
}

impl SymbolVersion {
    pub fn local() -> Self {
        Self { value: 0 }
    }

    pub fn global() -> Self {
        Self { value: 1 }
    }
}

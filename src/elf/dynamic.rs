//! Dynamic-table entries.
//!
//! Every entry carries its raw tag and value; tags with structured content
//! (library names, path lists, address arrays, flag sets) additionally
//! carry a typed payload. The table is ordered and ends with a single
//! `DT_NULL`.

use crate::elf::types::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed content attached to a dynamic entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DynamicPayload {
    /// Tag/value pair with no interpretation beyond the tag.
    None,
    /// `DT_NEEDED` / `DT_SONAME`: a library name from the string table.
    Library(String),
    /// `DT_RPATH` / `DT_RUNPATH`: colon-separated search paths.
    Paths(Vec<String>),
    /// `DT_FLAGS` / `DT_FLAGS_1`: a flag bitset (mirrors `value`).
    Flags(u64),
    /// `DT_INIT_ARRAY` / `DT_FINI_ARRAY` / `DT_PREINIT_ARRAY`: absolute
    /// function addresses; `value` holds the array's own address.
    Array(Vec<u64>),
}

/// One `d_tag`/`d_un` record of the dynamic table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicEntry {
    pub tag: i64,
    pub value: u64,
    pub payload: DynamicPayload,
}

impl DynamicEntry {
    pub fn new(tag: i64, value: u64) -> Self {
        Self {
            tag,
            value,
            payload: DynamicPayload::None,
        }
    }

    pub fn null() -> Self {
        Self::new(DT_NULL, 0)
    }

    pub fn needed(name: impl Into<String>) -> Self {
        Self {
            tag: DT_NEEDED,
            value: 0,
            payload: DynamicPayload::Library(name.into()),
        }
    }

    pub fn soname(name: impl Into<String>) -> Self {
        Self {
            tag: DT_SONAME,
            value: 0,
            payload: DynamicPayload::Library(name.into()),
        }
    }

    pub fn runpath(paths: Vec<String>) -> Self {
        Self {
            tag: DT_RUNPATH,
            value: 0,
            payload: DynamicPayload::Paths(paths),
        }
    }

    pub fn rpath(paths: Vec<String>) -> Self {
        Self {
            tag: DT_RPATH,
            value: 0,
            payload: DynamicPayload::Paths(paths),
        }
    }

    pub fn flags(tag: i64, flags: u64) -> Self {
        Self {
            tag,
            value: flags,
            payload: DynamicPayload::Flags(flags),
        }
    }

    pub fn array(tag: i64, address: u64, entries: Vec<u64>) -> Self {
        Self {
            tag,
            value: address,
            payload: DynamicPayload::Array(entries),
        }
    }

    /// Library name for `DT_NEEDED` / `DT_SONAME` entries.
    pub fn library_name(&self) -> Option<&str> {
        match &self.payload {
            DynamicPayload::Library(name) => Some(name),
            _ => None,
        }
    }

    pub fn array_entries(&self) -> Option<&[u64]> {
        match &self.payload {
            DynamicPayload::Array(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn array_entries_mut(&mut self) -> Option<&mut Vec<u64>> {
        match &mut self.payload {
            DynamicPayload::Array(entries) => Some(entries),
            _ => None,
        }
    }

    /// Tags whose `value` is a virtual address and therefore moves with
    /// the address space.
    pub fn holds_address(&self) -> bool {
        matches!(
            self.tag,
            DT_PLTGOT
                | DT_HASH
                | DT_GNU_HASH
                | DT_STRTAB
                | DT_SYMTAB
                | DT_RELA
                | DT_REL
                | DT_JMPREL
                | DT_INIT
                | DT_FINI
                | DT_VERSYM
                | DT_VERDEF
                | DT_VERNEED
        )
    }

    pub fn is_array(&self) -> bool {
        matches!(self.tag, DT_INIT_ARRAY | DT_FINI_ARRAY | DT_PREINIT_ARRAY)
    }
}

impl fmt::Display for DynamicEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            DynamicPayload::Library(name) => write!(f, "tag={:#x} {}", self.tag, name),
            DynamicPayload::Paths(paths) => write!(f, "tag={:#x} {}", self.tag, paths.join(":")),
            DynamicPayload::Array(entries) => {
                write!(f, "tag={:#x} [{} entries]", self.tag, entries.len())
            }
            _ => write!(f, "tag={:#x} value={:#x}", self.tag, self.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let needed = DynamicEntry::needed("libc.so.6");
        assert_eq!(needed.tag, DT_NEEDED);
        assert_eq!(needed.library_name(), Some("libc.so.6"));

        let null = DynamicEntry::null();
        assert_eq!(null.tag, DT_NULL);
        assert_eq!(null.payload, DynamicPayload::None);

        let arr = DynamicEntry::array(DT_INIT_ARRAY, 0x4000, vec![0x1000, 0x2000]);
        assert_eq!(arr.array_entries(), Some(&[0x1000, 0x2000][..]));
        assert!(arr.is_array());
    }

    #[test]
    fn test_address_tags() {
        assert!(DynamicEntry::new(DT_PLTGOT, 0x3000).holds_address());
        assert!(DynamicEntry::new(DT_INIT, 0x1000).holds_address());
        // Size tags stay put when the address space moves.
        assert!(!DynamicEntry::new(DT_RELASZ, 0x180).holds_address());
        assert!(!DynamicEntry::new(DT_PLTRELSZ, 0x30).holds_address());
        assert!(!DynamicEntry::needed("x").holds_address());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            DynamicEntry::needed("libm.so.6").to_string(),
            "tag=0x1 libm.so.6"
        );
        let entry = DynamicEntry::new(DT_DEBUG, 0);
        assert_eq!(entry.to_string(), "tag=0x15 value=0x0");
    }
}

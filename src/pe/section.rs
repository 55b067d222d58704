//! PE sections.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::pe::types::*;

bitflags! {
    /// Functional roles a section can play. At most one section holds each
    /// role; assigning a role steals it from the previous holder.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SectionRole: u32 {
        const TEXT       = 1 << 0;
        const DATA       = 1 << 1;
        const IMPORT     = 1 << 2;
        const RELOCATION = 1 << 3;
        const RESOURCE   = 1 << 4;
        const TLS        = 1 << 5;
    }
}

/// One section: header fields plus its raw bytes and the padding recorded
/// between its content and the next section body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub sizeof_raw_data: u32,
    pub pointerto_raw_data: u32,
    pub pointerto_relocation: u32,
    pub pointerto_line_numbers: u32,
    pub numberof_relocations: u16,
    pub numberof_line_numbers: u16,
    pub characteristics: u32,
    pub roles: SectionRole,
    pub content: Vec<u8>,
    /// Slack bytes after the content, kept verbatim for hashing.
    pub padding: Vec<u8>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            virtual_size: 0,
            virtual_address: 0,
            sizeof_raw_data: 0,
            pointerto_raw_data: 0,
            pointerto_relocation: 0,
            pointerto_line_numbers: 0,
            numberof_relocations: 0,
            numberof_line_numbers: 0,
            characteristics: 0,
            roles: SectionRole::empty(),
            content: Vec::new(),
            padding: Vec::new(),
        }
    }

    pub fn with_content(mut self, content: Vec<u8>) -> Self {
        self.content = content;
        self
    }

    /// The first 8 bytes of the name, the way the section table stores it.
    pub fn name_bytes(&self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        // The terminating NUL is part of the stored name when it fits.
        let len = (self.name.len() + 1).min(8);
        bytes[..len.min(self.name.len())].copy_from_slice(
            &self.name.as_bytes()[..len.min(self.name.len())],
        );
        bytes
    }

    pub fn has_characteristic(&self, characteristic: u32) -> bool {
        self.characteristics & characteristic != 0
    }

    pub fn add_characteristic(&mut self, characteristic: u32) {
        self.characteristics |= characteristic;
    }

    pub fn has_role(&self, role: SectionRole) -> bool {
        self.roles.contains(role)
    }

    pub fn is_executable(&self) -> bool {
        self.has_characteristic(IMAGE_SCN_MEM_EXECUTE)
    }

    pub fn is_readable(&self) -> bool {
        self.has_characteristic(IMAGE_SCN_MEM_READ)
    }

    pub fn is_writable(&self) -> bool {
        self.has_characteristic(IMAGE_SCN_MEM_WRITE)
    }

    /// Loaders map `max(virtual_size, raw_size)` bytes at the section VA.
    pub fn contains_rva(&self, rva: u64) -> bool {
        let span = u64::from(self.virtual_size.max(self.sizeof_raw_data));
        rva >= u64::from(self.virtual_address) && rva < u64::from(self.virtual_address) + span
    }

    pub fn contains_offset(&self, offset: u64) -> bool {
        offset >= u64::from(self.pointerto_raw_data)
            && offset < u64::from(self.pointerto_raw_data) + u64::from(self.sizeof_raw_data)
    }

    pub fn zero_content(&mut self) {
        self.content.fill(0);
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rva={:#x} vsize={:#x} raw={:#x}@{:#x}",
            self.name,
            self.virtual_address,
            self.virtual_size,
            self.sizeof_raw_data,
            self.pointerto_raw_data
        )
    }
}

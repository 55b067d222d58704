//! ELF program-header (segment) descriptor.

use crate::elf::types::{PF_R, PF_W, PF_X, PT_LOAD};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One entry of the program-header table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub segment_type: u32,
    pub flags: u32,
    pub file_offset: u64,
    pub virtual_address: u64,
    pub physical_address: u64,
    pub physical_size: u64,
    pub virtual_size: u64,
    pub alignment: u64,
}

impl Segment {
    pub fn new(segment_type: u32) -> Self {
        Self {
            segment_type,
            flags: PF_R,
            file_offset: 0,
            virtual_address: 0,
            physical_address: 0,
            physical_size: 0,
            virtual_size: 0,
            alignment: 0,
        }
    }

    pub fn is_load(&self) -> bool {
        self.segment_type == PT_LOAD
    }

    pub fn is_readable(&self) -> bool {
        self.flags & PF_R != 0
    }

    pub fn is_writable(&self) -> bool {
        self.flags & PF_W != 0
    }

    pub fn is_executable(&self) -> bool {
        self.flags & PF_X != 0
    }

    /// A LOAD segment whose memory image is larger than its file image
    /// carries zero-initialized data.
    pub fn has_bss(&self) -> bool {
        self.physical_size < self.virtual_size
    }

    pub fn contains_offset(&self, offset: u64) -> bool {
        offset >= self.file_offset && offset < self.file_offset + self.physical_size
    }

    pub fn contains_virtual_address(&self, address: u64) -> bool {
        address >= self.virtual_address && address < self.virtual_address + self.virtual_size
    }

    pub fn file_end(&self) -> u64 {
        self.file_offset + self.physical_size
    }

    pub fn virtual_end(&self) -> u64 {
        self.virtual_address + self.virtual_size
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut perms = String::with_capacity(3);
        perms.push(if self.is_readable() { 'r' } else { '-' });
        perms.push(if self.is_writable() { 'w' } else { '-' });
        perms.push(if self.is_executable() { 'x' } else { '-' });
        write!(
            f,
            "type={:#x} {} off={:#x}:{:#x} va={:#x}:{:#x}",
            self.segment_type,
            perms,
            self.file_offset,
            self.physical_size,
            self.virtual_address,
            self.virtual_size
        )
    }
}

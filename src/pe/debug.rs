//! Debug directory entries and the Rich header.

use serde::{Deserialize, Serialize};

pub const IMAGE_DEBUG_TYPE_CODEVIEW: u32 = 2;
pub const IMAGE_DEBUG_TYPE_REPRO: u32 = 16;

/// One record of the debug directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugEntry {
    pub characteristics: u32,
    pub timestamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub debug_type: u32,
    pub sizeof_data: u32,
    pub addressof_raw_data: u32,
    pub pointerto_raw_data: u32,
}

impl DebugEntry {
    pub fn is_reproducible(&self) -> bool {
        self.debug_type == IMAGE_DEBUG_TYPE_REPRO
    }
}

/// One tool record of the Rich header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichEntry {
    pub product_id: u16,
    pub build_id: u16,
    pub count: u32,
}

/// The undocumented linker fingerprint between the DOS stub and the PE
/// signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichHeader {
    pub key: u32,
    pub entries: Vec<RichEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repro_detection() {
        let mut entry = DebugEntry::default();
        assert!(!entry.is_reproducible());
        entry.debug_type = IMAGE_DEBUG_TYPE_REPRO;
        assert!(entry.is_reproducible());
    }
}

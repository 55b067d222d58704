//! Uniform section projection for cross-format tooling.

use serde::{Deserialize, Serialize};

/// A section as seen through the abstract interface: enough to reason
/// about layout without knowing the container format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionView {
    pub name: String,
    pub virtual_address: u64,
    pub virtual_size: u64,
    pub file_offset: u64,
    pub raw_size: u64,
}

impl SectionView {
    /// End of the virtual span, using the larger of the two sizes the way
    /// loaders do.
    pub fn virtual_end(&self) -> u64 {
        self.virtual_address + self.virtual_size.max(self.raw_size)
    }

    /// End of the file span.
    pub fn file_end(&self) -> u64 {
        self.file_offset + self.raw_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans() {
        let view = SectionView {
            name: ".text".to_string(),
            virtual_address: 0x1000,
            virtual_size: 0x1800,
            file_offset: 0x400,
            raw_size: 0x2000,
        };
        // Virtual span uses max(vsize, raw).
        assert_eq!(view.virtual_end(), 0x3000);
        assert_eq!(view.file_end(), 0x2400);
    }
}

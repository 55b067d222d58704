//! ELF relocations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which table a relocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelocationPurpose {
    Dynamic,
    PltGot,
    Object,
}

/// One REL/RELA record.
///
/// `symbol` and `section` index the owning binary's tables; they are
/// lookup keys, not owners, and are rebound when the tables change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    pub address: u64,
    pub relocation_type: u32,
    /// `Some` for RELA records, `None` for REL.
    pub addend: Option<i64>,
    /// Symbol-table index stored in `r_info`.
    pub info: u32,
    pub purpose: RelocationPurpose,
    /// Index into the dynamic symbol table.
    pub symbol: Option<usize>,
    /// Index into the section table (object relocations).
    pub section: Option<usize>,
}

impl Relocation {
    pub fn new(address: u64, relocation_type: u32) -> Self {
        Self {
            address,
            relocation_type,
            addend: None,
            info: 0,
            purpose: RelocationPurpose::Dynamic,
            symbol: None,
            section: None,
        }
    }

    pub fn with_addend(mut self, addend: i64) -> Self {
        self.addend = Some(addend);
        self
    }

    pub fn with_symbol(mut self, symbol: usize) -> Self {
        self.symbol = Some(symbol);
        self
    }

    pub fn is_rela(&self) -> bool {
        self.addend.is_some()
    }

    pub fn has_symbol(&self) -> bool {
        self.symbol.is_some()
    }
}

impl fmt::Display for Relocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "addr={:#x} type={} purpose={:?}",
            self.address, self.relocation_type, self.purpose
        )?;
        if let Some(addend) = self.addend {
            write!(f, " addend={addend:#x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rel_vs_rela() {
        let rel = Relocation::new(0x1000, 8);
        assert!(!rel.is_rela());
        let rela = Relocation::new(0x1000, 8).with_addend(0x40);
        assert!(rela.is_rela());
    }

    #[test]
    fn test_symbol_binding() {
        let reloc = Relocation::new(0x2000, 7).with_symbol(3);
        assert!(reloc.has_symbol());
        assert_eq!(reloc.symbol, Some(3));
    }
}

//! Export directory.

use serde::{Deserialize, Serialize};

/// One exported symbol: a name (possibly empty for ordinal-only exports),
/// its ordinal and either an RVA into the image or a forwarder string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEntry {
    pub name: String,
    pub ordinal: u32,
    pub address: u64,
    pub forwarder: Option<String>,
}

impl ExportEntry {
    pub fn new(name: impl Into<String>, ordinal: u32, address: u64) -> Self {
        Self {
            name: name.into(),
            ordinal,
            address,
            forwarder: None,
        }
    }

    pub fn is_forwarded(&self) -> bool {
        self.forwarder.is_some()
    }
}

/// The export directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Export {
    pub name: String,
    pub export_flags: u32,
    pub timestamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub ordinal_base: u32,
    pub entries: Vec<ExportEntry>,
}

impl Export {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ordinal_base: 1,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export() {
        let mut export = Export::new("mylib.dll");
        export.entries.push(ExportEntry::new("frob", 1, 0x1020));
        let mut fwd = ExportEntry::new("alias", 2, 0);
        fwd.forwarder = Some("other.real".to_string());
        export.entries.push(fwd);

        assert!(!export.entries[0].is_forwarded());
        assert!(export.entries[1].is_forwarded());
    }
}

//! Import descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One imported function: by name or by ordinal, with the IAT slot the
/// loader patches at bind time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportEntry {
    pub name: String,
    pub ordinal: Option<u16>,
    pub hint: u16,
    pub iat_address: u64,
    /// Raw lookup-table word as read from the file.
    pub data: u64,
}

impl ImportEntry {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ordinal: None,
            hint: 0,
            iat_address: 0,
            data: 0,
        }
    }

    pub fn by_ordinal(ordinal: u16) -> Self {
        Self {
            name: String::new(),
            ordinal: Some(ordinal),
            hint: 0,
            iat_address: 0,
            data: 0,
        }
    }

    pub fn is_ordinal(&self) -> bool {
        self.ordinal.is_some()
    }
}

impl fmt::Display for ImportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ordinal {
            Some(ordinal) => write!(f, "#{ordinal}"),
            None => write!(f, "{}", self.name),
        }
    }
}

/// One imported library and its ordered function list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    pub name: String,
    pub entries: Vec<ImportEntry>,
    pub import_lookup_table_rva: u32,
    pub timestamp: u32,
    pub forwarder_chain: u32,
    pub name_rva: u32,
    pub import_address_table_rva: u32,
}

impl Import {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
            import_lookup_table_rva: 0,
            timestamp: 0,
            forwarder_chain: 0,
            name_rva: 0,
            import_address_table_rva: 0,
        }
    }

    pub fn add_entry(&mut self, entry: ImportEntry) -> &ImportEntry {
        self.entries.push(entry);
        self.entries.last().unwrap()
    }

    pub fn get_entry(&self, name: &str) -> Option<&ImportEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

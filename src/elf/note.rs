//! ELF notes.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const NT_GNU_ABI_TAG: u32 = 1;
pub const NT_GNU_BUILD_ID: u32 = 3;
pub const NT_GNU_PROPERTY_TYPE_0: u32 = 5;

/// One note record: an owner name, a type and an opaque descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub name: String,
    pub note_type: u32,
    pub description: Vec<u8>,
}

impl Note {
    pub fn new(name: impl Into<String>, note_type: u32, description: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            note_type,
            description,
        }
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} type={:#x} ({} bytes)",
            self.name,
            self.note_type,
            self.description.len()
        )
    }
}

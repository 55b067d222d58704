//! Data directories: the 16 fixed slots of the optional header.

use serde::{Deserialize, Serialize};

/// Directory slot identity, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirectoryType {
    ExportTable,
    ImportTable,
    ResourceTable,
    ExceptionTable,
    CertificateTable,
    BaseRelocationTable,
    Debug,
    Architecture,
    GlobalPtr,
    TlsTable,
    LoadConfigTable,
    BoundImport,
    Iat,
    DelayImportDescriptor,
    ClrRuntimeHeader,
    Reserved,
}

impl DirectoryType {
    /// Every slot, in on-disk order.
    pub const ALL: [DirectoryType; 16] = [
        DirectoryType::ExportTable,
        DirectoryType::ImportTable,
        DirectoryType::ResourceTable,
        DirectoryType::ExceptionTable,
        DirectoryType::CertificateTable,
        DirectoryType::BaseRelocationTable,
        DirectoryType::Debug,
        DirectoryType::Architecture,
        DirectoryType::GlobalPtr,
        DirectoryType::TlsTable,
        DirectoryType::LoadConfigTable,
        DirectoryType::BoundImport,
        DirectoryType::Iat,
        DirectoryType::DelayImportDescriptor,
        DirectoryType::ClrRuntimeHeader,
        DirectoryType::Reserved,
    ];

    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|t| t == self).unwrap()
    }
}

/// One slot: an RVA/size pair plus a weak link to the section that covers
/// it. The link is an index into the binary's section table, rebound by
/// the mutation engine; never an owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDirectory {
    pub directory_type: DirectoryType,
    pub rva: u32,
    pub size: u32,
    pub section: Option<usize>,
}

impl DataDirectory {
    pub fn new(directory_type: DirectoryType) -> Self {
        Self {
            directory_type,
            rva: 0,
            size: 0,
            section: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rva == 0 && self.size == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_order() {
        assert_eq!(DirectoryType::ALL.len(), 16);
        assert_eq!(DirectoryType::ExportTable.index(), 0);
        assert_eq!(DirectoryType::CertificateTable.index(), 4);
        assert_eq!(DirectoryType::Iat.index(), 12);
        assert_eq!(DirectoryType::Reserved.index(), 15);
    }

    #[test]
    fn test_empty_slot() {
        let dir = DataDirectory::new(DirectoryType::Debug);
        assert!(dir.is_empty());
        assert!(dir.section.is_none());
    }
}

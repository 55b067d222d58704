//! Abstract header: the format-independent identity of a binary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse instruction-set family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arch {
    None,
    Arm,
    Arm64,
    Intel,
    Mips,
    PowerPc,
    Sparc,
    SysZ,
    RiscV,
    X86,
}

/// Refinements of the architecture (width, ISA level, instruction set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Mode {
    Bits16,
    Bits32,
    Bits64,
    Thumb,
    V7,
    V8,
}

/// Byte order of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endianness {
    None,
    Little,
    Big,
}

/// What kind of artifact the container holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Executable,
    Library,
    None,
}

/// Format-neutral header fields shared by every supported container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub architecture: Arch,
    pub modes: Vec<Mode>,
    pub entrypoint: u64,
    pub object_type: ObjectType,
    pub endianness: Endianness,
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {:?} entrypoint={:#x} ({:?})",
            self.architecture, self.object_type, self.entrypoint, self.endianness
        )
    }
}

//! Abstract function: an address with a name, a size and provenance flags.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a function came from or how it is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FunctionFlag {
    Imported,
    Exported,
    Constructor,
    Destructor,
}

/// A function recovered from the container.
///
/// `address` is a virtual address for loaded code and 0 for imports that
/// are resolved at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub address: u64,
    pub size: u64,
    pub flags: Vec<FunctionFlag>,
}

impl Function {
    pub fn new(name: impl Into<String>, address: u64) -> Self {
        Self {
            name: name.into(),
            address,
            size: 0,
            flags: Vec::new(),
        }
    }

    /// Anonymous function known only by address (unwind-table discovery).
    pub fn at(address: u64) -> Self {
        Self::new(String::new(), address)
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_flag(mut self, flag: FunctionFlag) -> Self {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
        self
    }

    pub fn has_flag(&self, flag: FunctionFlag) -> bool {
        self.flags.contains(&flag)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "sub_{:x}", self.address)
        } else {
            write!(f, "{}@{:#x}", self.name, self.address)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_builders() {
        let f = Function::new("init", 0x1000)
            .with_size(0x20)
            .with_flag(FunctionFlag::Constructor)
            .with_flag(FunctionFlag::Constructor);
        assert_eq!(f.size, 0x20);
        assert_eq!(f.flags, vec![FunctionFlag::Constructor]);
        assert!(f.has_flag(FunctionFlag::Constructor));
        assert!(!f.has_flag(FunctionFlag::Exported));
    }

    #[test]
    fn test_function_display() {
        assert_eq!(Function::at(0x4010).to_string(), "sub_4010");
        assert_eq!(Function::new("main", 0x1000).to_string(), "main@0x1000");
    }
}

//! Format-neutral projections over the PE and ELF models.
//!
//! Cross-format tooling consumes binaries through the [`Abstract`] trait:
//! one header shape, one function shape, regardless of container format.

pub mod function;
pub mod header;
pub mod section;

pub use function::{Function, FunctionFlag};
pub use header::{Arch, Endianness, Header, Mode, ObjectType};
pub use section::SectionView;

use crate::error::Result;

/// Read-only, format-neutral view over a binary.
pub trait Abstract {
    /// Architecture, modes, entrypoint, object type and endianness.
    fn abstract_header(&self) -> Result<Header>;

    /// Names of the libraries the binary links against at load time.
    fn imported_libraries(&self) -> Vec<String>;

    /// Imported functions, flattened to name + address.
    fn imported_functions(&self) -> Vec<Function>;

    /// Exported functions, flattened to name + address.
    fn exported_functions(&self) -> Vec<Function>;

    /// Functions run before the entrypoint (TLS callbacks, init arrays).
    fn ctor_functions(&self) -> Vec<Function>;

    /// Every function the container describes: exported, constructors and
    /// whatever the per-format discovery (unwind tables) can recover,
    /// deduplicated by address.
    fn functions(&self) -> Vec<Function>;

    /// Uniform projection of the section table.
    fn abstract_sections(&self) -> Vec<SectionView>;
}

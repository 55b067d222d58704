//! ELF model and mutation engine.

pub mod binary;
pub mod data_handler;
pub mod dynamic;
pub mod functions;
pub mod header;
mod mutation;
pub mod note;
pub mod relocation;
pub mod section;
pub mod segment;
pub mod symbol;
pub mod types;

pub use binary::Binary;
pub use data_handler::{DataHandler, Node, NodeKind};
pub use dynamic::{DynamicEntry, DynamicPayload};
pub use header::Header;
pub use note::Note;
pub use relocation::{Relocation, RelocationPurpose};
pub use section::Section;
pub use segment::Segment;
pub use symbol::{Symbol, SymbolVersion};

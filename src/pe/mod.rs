//! PE model and mutation engine.

mod authenticode;
pub mod binary;
pub mod data_directory;
pub mod debug;
pub mod export;
pub mod headers;
pub mod import;
pub mod load_configuration;
pub mod relocation;
pub mod resources;
pub mod section;
pub mod signature;
pub mod tls;
pub mod types;

pub use binary::Binary;
pub use data_directory::{DataDirectory, DirectoryType};
pub use debug::{DebugEntry, RichEntry, RichHeader};
pub use export::{Export, ExportEntry};
pub use headers::{DosHeader, Header, OptionalHeader};
pub use import::{Import, ImportEntry};
pub use load_configuration::LoadConfiguration;
pub use relocation::{Relocation, RelocationEntry};
pub use resources::{ResourceEntry, ResourceId, ResourceNode};
pub use section::{Section, SectionRole};
pub use signature::{ContentInfo, Signature, VerificationChecks, VerificationFlags};
pub use tls::Tls;
pub use types::{Machine, PeType};

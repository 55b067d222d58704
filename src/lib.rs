//! recast: read, mutate and re-emit PE and ELF executable containers.
//!
//! The crate holds a structural model of a binary (sections, segments,
//! dynamic entries, imports, relocations, symbols, resources) plus the
//! layout-rewriting operations that keep file offsets, virtual addresses
//! and every cross-reference consistent while the container is edited.
//! For PE images it also reproduces the Authenticode digest used by
//! code-signature verification.
//!
//! Parsing bytes into the model and serializing the model back out are
//! the job of a loader and a builder layered on top; the model exposes a
//! `push_*` population surface for them.

/// Format-neutral projections (abstract header, functions, sections).
pub mod core;

/// ELF model and mutation engine.
pub mod elf;

/// PE model, mutation engine and Authenticode digester.
pub mod pe;

/// Error types.
pub mod error;

/// Hash algorithm selection for the signature machinery.
pub mod hashing;

/// Logging and tracing bootstrap.
pub mod logging;

/// Bounded byte reader used by the unwind-table walkers.
pub mod stream;

/// Alignment arithmetic and endian-aware word access.
pub mod utils;

pub use crate::core::Abstract;
pub use error::{Error, Result};
pub use hashing::Algorithms;

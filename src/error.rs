//! Error types shared by the PE and ELF models.
//!
//! One crate-wide enum keeps the surface small: every fallible operation
//! returns [`Result`]. Structural damage that still allows a partial result
//! (a truncated eh_frame, an overlapping section) is logged at the call
//! site instead of being raised.

use thiserror::Error;

/// Errors surfaced by container lookups and mutation operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A lookup by name, index, tag or address missed.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation is meaningful but not implemented for this input
    /// (unmapped machine type, unhandled file type).
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// No strategy applies to this binary (e.g. the program-header table
    /// cannot be relocated).
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A count or size left its legal range.
    #[error("overflow: {0}")]
    Overflow(String),

    /// A parsed structure turned out to be unreadable.
    #[error("corrupted structure: {0}")]
    Corrupted(String),

    /// A virtual address is not covered by any loadable segment.
    #[error("address {0:#x} is not mapped by any LOAD segment")]
    ConversionFailed(u64),

    /// The container violates a format invariant.
    #[error("malformed binary: {0}")]
    Malformed(String),
}

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound("section '.text'".to_string());
        assert_eq!(err.to_string(), "not found: section '.text'");

        let err = Error::ConversionFailed(0xdead_beef);
        assert_eq!(
            err.to_string(),
            "address 0xdeadbeef is not mapped by any LOAD segment"
        );
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}

//! Parsed Authenticode signature descriptors.
//!
//! PKCS#7 / X.509 parsing and chain validation happen outside this crate;
//! a loader hands over the descriptor below. What the crate does own is
//! the digest comparison: `Binary::verify_signature` recomputes the
//! authentihash and matches it against the signed digest.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::hashing::Algorithms;

bitflags! {
    /// Verification outcome; empty means OK.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct VerificationFlags: u32 {
        const INVALID_SIGNER                = 1 << 0;
        const UNSUPPORTED_ALGORITHM         = 1 << 1;
        const INCONSISTENT_DIGEST_ALGORITHM = 1 << 2;
        const CERT_EXPIRED                  = 1 << 3;
        const CERT_NOT_TRUSTED              = 1 << 4;
        const BAD_DIGEST                    = 1 << 5;
        const BAD_SIGNATURE                 = 1 << 6;
        const NO_SIGNATURE                  = 1 << 7;
    }
}

bitflags! {
    /// Which checks to run on the signature object itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct VerificationChecks: u32 {
        /// Skip the certificate-chain checks, compare digests only.
        const HASH_ONLY         = 1 << 0;
        const LIFETIME_SIGNING  = 1 << 1;
        const SKIP_CERT_TIME    = 1 << 2;
    }
}

impl VerificationChecks {
    pub const DEFAULT: VerificationChecks = VerificationChecks::empty();
}

/// The signed attribute set's digest of the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentInfo {
    pub content_type: String,
    pub digest_algorithm: Algorithms,
    pub digest: Vec<u8>,
}

/// One PKCS#7 signature as delivered by the (external) parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub version: u32,
    pub digest_algorithm: Algorithms,
    pub content_info: ContentInfo,
    /// Outcome of the delegated certificate-chain checks, recorded by the
    /// parser; surfaced verbatim by [`Signature::check`].
    pub chain_flags: VerificationFlags,
}

impl Signature {
    pub fn new(digest_algorithm: Algorithms, digest: Vec<u8>) -> Self {
        Self {
            version: 1,
            digest_algorithm,
            content_info: ContentInfo {
                content_type: "1.3.6.1.4.1.311.2.1.4".to_string(), // SPC_INDIRECT_DATA
                digest_algorithm,
                digest,
            },
            chain_flags: VerificationFlags::empty(),
        }
    }

    pub fn digest_algorithm(&self) -> Algorithms {
        self.digest_algorithm
    }

    /// Run the non-digest checks. Chain validation happened at parse
    /// time; this replays its verdict.
    pub fn check(&self, _checks: VerificationChecks) -> VerificationFlags {
        self.chain_flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_compose() {
        let mut flags = VerificationFlags::empty();
        assert!(flags.is_empty());
        flags |= VerificationFlags::BAD_DIGEST;
        flags |= VerificationFlags::BAD_SIGNATURE;
        assert!(flags.contains(VerificationFlags::BAD_DIGEST));
        assert!(!flags.contains(VerificationFlags::CERT_EXPIRED));
    }

    #[test]
    fn test_signature_check_replays_chain_verdict() {
        let mut sig = Signature::new(Algorithms::Sha256, vec![0u8; 32]);
        assert!(sig.check(VerificationChecks::DEFAULT).is_empty());
        sig.chain_flags = VerificationFlags::CERT_EXPIRED;
        assert_eq!(
            sig.check(VerificationChecks::DEFAULT),
            VerificationFlags::CERT_EXPIRED
        );
    }
}

//! Digest selection and the ordered hash stream.
//!
//! The Authenticode digester reconstructs a byte stream and feeds it to one
//! of the algorithms accepted by signtool. [`HashStream`] wraps the digest
//! crates behind little-endian typed writers so the reconstruction code
//! reads like the on-disk layout.

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Hash algorithms understood by the signature machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Algorithms {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithms {
    /// Digest length in bytes.
    pub fn digest_size(&self) -> usize {
        match self {
            Algorithms::Md5 => 16,
            Algorithms::Sha1 => 20,
            Algorithms::Sha256 => 32,
            Algorithms::Sha384 => 48,
            Algorithms::Sha512 => 64,
        }
    }
}

enum Inner {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

/// Incremental hasher with typed little-endian writers.
pub struct HashStream {
    inner: Inner,
}

impl HashStream {
    pub fn new(algorithm: Algorithms) -> Self {
        let inner = match algorithm {
            Algorithms::Md5 => Inner::Md5(Md5::new()),
            Algorithms::Sha1 => Inner::Sha1(Sha1::new()),
            Algorithms::Sha256 => Inner::Sha256(Sha256::new()),
            Algorithms::Sha384 => Inner::Sha384(Sha384::new()),
            Algorithms::Sha512 => Inner::Sha512(Sha512::new()),
        };
        Self { inner }
    }

    pub fn write(&mut self, bytes: &[u8]) -> &mut Self {
        match &mut self.inner {
            Inner::Md5(h) => h.update(bytes),
            Inner::Sha1(h) => h.update(bytes),
            Inner::Sha256(h) => h.update(bytes),
            Inner::Sha384(h) => h.update(bytes),
            Inner::Sha512(h) => h.update(bytes),
        }
        self
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.write(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.write(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.write(&value.to_le_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.write(&value.to_le_bytes())
    }

    /// Write the low `size` bytes of `value`, little-endian. The optional
    /// header stores imagebase and the stack/heap sizes at the pointer
    /// width of the binary.
    pub fn write_sized(&mut self, value: u64, size: usize) -> &mut Self {
        self.write(&value.to_le_bytes()[..size.min(8)])
    }

    pub fn finish(self) -> Vec<u8> {
        match self.inner {
            Inner::Md5(h) => h.finalize().to_vec(),
            Inner::Sha1(h) => h.finalize().to_vec(),
            Inner::Sha256(h) => h.finalize().to_vec(),
            Inner::Sha384(h) => h.finalize().to_vec(),
            Inner::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_digest_sizes() {
        for (algo, size) in [
            (Algorithms::Md5, 16),
            (Algorithms::Sha1, 20),
            (Algorithms::Sha256, 32),
            (Algorithms::Sha384, 48),
            (Algorithms::Sha512, 64),
        ] {
            assert_eq!(algo.digest_size(), size);
            assert_eq!(HashStream::new(algo).finish().len(), size);
        }
    }

    #[test]
    fn test_sha256_known_value() {
        let mut stream = HashStream::new(Algorithms::Sha256);
        stream.write(b"abc");
        assert_eq!(
            hex(&stream.finish()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_empty_sha256() {
        assert_eq!(
            hex(&HashStream::new(Algorithms::Sha256).finish()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_typed_writers_match_raw_bytes() {
        let mut a = HashStream::new(Algorithms::Sha1);
        a.write_u16(0x5a4d).write_u32(0x0000_00f0).write_sized(0x1_4000_0000, 8);

        let mut b = HashStream::new(Algorithms::Sha1);
        b.write(&[0x4d, 0x5a, 0xf0, 0x00, 0x00, 0x00])
            .write(&0x1_4000_0000u64.to_le_bytes());

        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn test_md5_known_value() {
        let mut stream = HashStream::new(Algorithms::Md5);
        stream.write(b"abc");
        assert_eq!(hex(&stream.finish()), "900150983cd24fb0d6963f7d28e17f72");
    }
}

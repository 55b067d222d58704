//! Authenticode digest and signature verification.
//!
//! The digest covers the whole file except three things: the optional
//! header's checksum field, the certificate directory entry and the
//! certificate blob inside the overlay. Byte order and field order must
//! match signtool exactly or third-party signatures stop verifying.

use tracing::{debug, warn};

use crate::hashing::{Algorithms, HashStream};
use crate::pe::binary::Binary;
use crate::pe::data_directory::DirectoryType;
use crate::pe::section::Section;
use crate::pe::signature::{Signature, VerificationChecks, VerificationFlags};
use crate::pe::types::*;

impl Binary {
    /// Compute the Authenticode digest of the image with `algorithm`.
    pub fn authentihash(&self, algorithm: Algorithms) -> Vec<u8> {
        let pointer = self.pe_type.pointer_size();
        let mut ios = HashStream::new(algorithm);

        let dos = &self.dos_header;
        ios.write_u16(dos.magic)
            .write_u16(dos.used_bytes_in_last_page)
            .write_u16(dos.file_size_in_pages)
            .write_u16(dos.numberof_relocations)
            .write_u16(dos.header_size_in_paragraphs)
            .write_u16(dos.minimum_extra_paragraphs)
            .write_u16(dos.maximum_extra_paragraphs)
            .write_u16(dos.initial_relative_ss)
            .write_u16(dos.initial_sp)
            .write_u16(dos.checksum)
            .write_u16(dos.initial_ip)
            .write_u16(dos.initial_relative_cs)
            .write_u16(dos.addressof_relocation_table)
            .write_u16(dos.overlay_number);
        for word in dos.reserved {
            ios.write_u16(word);
        }
        ios.write_u16(dos.oem_id).write_u16(dos.oem_info);
        for word in dos.reserved2 {
            ios.write_u16(word);
        }
        ios.write_u32(dos.addressof_new_exeheader);
        ios.write(&self.dos_stub);

        let header = &self.header;
        ios.write(&PE_SIGNATURE)
            .write_u16(header.machine.value())
            .write_u16(header.numberof_sections)
            .write_u32(header.time_date_stamp)
            .write_u32(header.pointerto_symbol_table)
            .write_u32(header.numberof_symbols)
            .write_u16(header.sizeof_optional_header)
            .write_u16(header.characteristics);

        let opt = &self.optional_header;
        ios.write_u16(self.pe_type.magic())
            .write_u8(opt.major_linker_version)
            .write_u8(opt.minor_linker_version)
            .write_u32(opt.sizeof_code)
            .write_u32(opt.sizeof_initialized_data)
            .write_u32(opt.sizeof_uninitialized_data)
            .write_u32(opt.addressof_entrypoint)
            .write_u32(opt.baseof_code);
        if self.pe_type == PeType::Pe32 {
            ios.write_u32(opt.baseof_data);
        }
        ios.write_sized(opt.imagebase, pointer)
            .write_u32(opt.section_alignment)
            .write_u32(opt.file_alignment)
            .write_u16(opt.major_operating_system_version)
            .write_u16(opt.minor_operating_system_version)
            .write_u16(opt.major_image_version)
            .write_u16(opt.minor_image_version)
            .write_u16(opt.major_subsystem_version)
            .write_u16(opt.minor_subsystem_version)
            .write_u32(opt.win32_version_value)
            .write_u32(opt.sizeof_image)
            .write_u32(opt.sizeof_headers)
            // The checksum field is not part of the hash.
            .write_u16(opt.subsystem)
            .write_u16(opt.dll_characteristics)
            .write_sized(opt.sizeof_stack_reserve, pointer)
            .write_sized(opt.sizeof_stack_commit, pointer)
            .write_sized(opt.sizeof_heap_reserve, pointer)
            .write_sized(opt.sizeof_heap_commit, pointer)
            .write_u32(opt.loader_flags)
            .write_u32(opt.numberof_rva_and_size);

        for directory in &self.data_directories {
            if directory.directory_type == DirectoryType::CertificateTable {
                continue;
            }
            ios.write_u32(directory.rva).write_u32(directory.size);
        }

        for section in &self.sections {
            ios.write(&section.name_bytes())
                .write_u32(section.virtual_size)
                .write_u32(section.virtual_address)
                .write_u32(section.sizeof_raw_data)
                .write_u32(section.pointerto_raw_data)
                .write_u32(section.pointerto_relocation)
                .write_u32(section.pointerto_line_numbers)
                .write_u16(section.numberof_relocations)
                .write_u16(section.numberof_line_numbers)
                .write_u32(section.characteristics);
        }
        ios.write(&self.section_offset_padding);

        let mut sorted: Vec<&Section> = self.sections.iter().collect();
        sorted.sort_by_key(|s| s.pointerto_raw_data);

        let mut position: u64 = 0;
        for section in sorted {
            if section.sizeof_raw_data == 0 {
                continue;
            }
            let offset = u64::from(section.pointerto_raw_data);
            let content = &section.content;
            let pad = &section.padding;
            debug!(
                name = %section.name,
                offset,
                len = content.len(),
                pad = pad.len(),
                "authentihash: appending section"
            );
            if offset < position {
                // Emit only the part the previous section did not cover.
                if position <= offset + content.len() as u64 {
                    let start = (position - offset) as usize;
                    ios.write(&content[start..]).write(pad);
                } else {
                    warn!(name = %section.name, "sections overlap into the padding area");
                }
            } else {
                ios.write(content).write(pad);
            }
            position = offset + content.len() as u64 + pad.len() as u64;
        }

        if !self.overlay.is_empty() {
            let cert = self.data_directory(DirectoryType::CertificateTable);
            // The certificate "RVA" is a plain file offset.
            if cert.rva > 0 && cert.size > 0 && u64::from(cert.rva) >= self.overlay_offset {
                let start = (u64::from(cert.rva) - self.overlay_offset) as usize;
                let end = start + cert.size as usize;
                if end <= self.overlay.len() {
                    debug!(start, end, "authentihash: skipping certificate range");
                    ios.write(&self.overlay[..start])
                        .write(&self.overlay[end..]);
                } else {
                    warn!("certificate range exceeds the overlay");
                    ios.write(&self.overlay);
                }
            } else {
                ios.write(&self.overlay);
            }
        }

        ios.finish()
    }

    /// Verify every signature: the delegated chain checks plus the digest
    /// comparison against a freshly computed authentihash.
    pub fn verify_signature(&self, checks: VerificationChecks) -> VerificationFlags {
        if !self.has_signatures() {
            return VerificationFlags::NO_SIGNATURE;
        }
        let mut flags = VerificationFlags::empty();
        for (index, signature) in self.signatures.iter().enumerate() {
            flags |= self.verify_one_signature(signature, checks);
            if !flags.is_empty() {
                debug!(index, ?flags, "signature verification failed");
                break;
            }
        }
        flags
    }

    fn verify_one_signature(
        &self,
        signature: &Signature,
        checks: VerificationChecks,
    ) -> VerificationFlags {
        let mut flags = VerificationFlags::empty();
        if !checks.contains(VerificationChecks::HASH_ONLY) {
            let chain = signature.check(checks);
            if !chain.is_empty() {
                debug!(?chain, "bad signature");
                flags |= chain;
            }
        }

        let authentihash = self.authentihash(signature.digest_algorithm());
        if authentihash != signature.content_info.digest {
            debug!("authentihash does not match the ContentInfo digest");
            flags |= VerificationFlags::BAD_DIGEST;
        }
        if !flags.is_empty() {
            flags |= VerificationFlags::BAD_SIGNATURE;
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pe::binary::tests::sample_binary;

    fn signed_binary() -> Binary {
        let mut binary = sample_binary();
        // Overlay with an embedded certificate blob at +0x10.
        let overlay_offset = 0x2800u64;
        let mut overlay = vec![0x11u8; 0x10];
        overlay.extend(vec![0xee; 0x20]); // certificate range
        overlay.extend(vec![0x22; 0x10]);
        binary.set_overlay(overlay_offset, overlay);
        let cert = binary.data_directory_mut(DirectoryType::CertificateTable);
        cert.rva = (overlay_offset + 0x10) as u32;
        cert.size = 0x20;
        binary
    }

    #[test]
    fn test_authentihash_is_deterministic() {
        let binary = signed_binary();
        assert_eq!(
            binary.authentihash(Algorithms::Sha256),
            binary.authentihash(Algorithms::Sha256)
        );
        assert_eq!(binary.authentihash(Algorithms::Md5).len(), 16);
        assert_eq!(binary.authentihash(Algorithms::Sha512).len(), 64);
    }

    #[test]
    fn test_authentihash_ignores_checksum_and_certificate() {
        let mut binary = signed_binary();
        let baseline = binary.authentihash(Algorithms::Sha256);

        binary.optional_header_mut().checksum = 0xdead_beef;
        assert_eq!(binary.authentihash(Algorithms::Sha256), baseline);

        // The certificate directory slot itself never enters the stream:
        // with no overlay in play its value is free to change.
        let mut plain = sample_binary();
        let plain_baseline = plain.authentihash(Algorithms::Sha256);
        let cert = plain.data_directory_mut(DirectoryType::CertificateTable);
        cert.rva = 0x1234;
        cert.size = 0x5678;
        assert_eq!(plain.authentihash(Algorithms::Sha256), plain_baseline);

        // Bytes inside the certificate range are not hashed.
        let mut overlay = binary.overlay().to_vec();
        overlay[0x18] ^= 0xff;
        let offset = binary.overlay_offset();
        binary.set_overlay(offset, overlay);
        assert_eq!(binary.authentihash(Algorithms::Sha256), baseline);
    }

    #[test]
    fn test_authentihash_tracks_real_changes() {
        let mut binary = signed_binary();
        let baseline = binary.authentihash(Algorithms::Sha256);

        binary.header_mut().time_date_stamp ^= 1;
        let after_header = binary.authentihash(Algorithms::Sha256);
        assert_ne!(after_header, baseline);

        binary.get_section_mut(".text").unwrap().content[0] ^= 0xff;
        let after_content = binary.authentihash(Algorithms::Sha256);
        assert_ne!(after_content, after_header);

        binary.set_dos_stub(vec![0x55; 8]);
        let after_stub = binary.authentihash(Algorithms::Sha256);
        assert_ne!(after_stub, after_content);

        // Overlay bytes outside the certificate range count.
        let mut overlay = binary.overlay().to_vec();
        overlay[0] ^= 0xff;
        let offset = binary.overlay_offset();
        binary.set_overlay(offset, overlay);
        assert_ne!(binary.authentihash(Algorithms::Sha256), after_stub);
    }

    #[test]
    fn test_authentihash_skips_empty_and_overlapping_sections() {
        let mut binary = sample_binary();
        let baseline = binary.authentihash(Algorithms::Sha256);

        // A zero-raw-size section contributes nothing.
        let mut empty = crate::pe::section::Section::new(".empty");
        empty.virtual_address = 0x8000;
        empty.virtual_size = 0x100;
        binary.push_section(empty);
        // The header table changed (so the hash does), but hashing still
        // succeeds with the body skipped.
        let with_empty = binary.authentihash(Algorithms::Sha256);
        assert_ne!(with_empty, baseline);

        // Overlapping bodies only contribute their tail.
        let mut binary = sample_binary();
        binary.sections[1].pointerto_raw_data = 0x400 + 0x1000; // inside .text
        let overlapped = binary.authentihash(Algorithms::Sha256);
        assert_ne!(overlapped, baseline);
    }

    #[test]
    fn test_verify_signature() {
        let mut binary = signed_binary();
        assert_eq!(
            binary.verify_signature(VerificationChecks::DEFAULT),
            VerificationFlags::NO_SIGNATURE
        );

        // E2-style: the signature's ContentInfo digest matches the
        // computed authentihash bit for bit.
        let digest = binary.authentihash(Algorithms::Sha256);
        binary.add_signature(Signature::new(Algorithms::Sha256, digest));
        assert!(binary
            .verify_signature(VerificationChecks::DEFAULT)
            .is_empty());

        // Tampering with hashed bytes flips the verdict.
        binary.header_mut().time_date_stamp ^= 1;
        let flags = binary.verify_signature(VerificationChecks::DEFAULT);
        assert!(flags.contains(VerificationFlags::BAD_DIGEST));
        assert!(flags.contains(VerificationFlags::BAD_SIGNATURE));
    }

    #[test]
    fn test_verify_signature_composes_chain_failures() {
        let mut binary = signed_binary();
        let digest = binary.authentihash(Algorithms::Sha1);
        let mut signature = Signature::new(Algorithms::Sha1, digest);
        signature.chain_flags = VerificationFlags::CERT_EXPIRED;
        binary.add_signature(signature);

        let flags = binary.verify_signature(VerificationChecks::DEFAULT);
        assert!(flags.contains(VerificationFlags::CERT_EXPIRED));
        assert!(flags.contains(VerificationFlags::BAD_SIGNATURE));
        assert!(!flags.contains(VerificationFlags::BAD_DIGEST));

        // HASH_ONLY skips the delegated checks.
        let flags = binary.verify_signature(VerificationChecks::HASH_ONLY);
        assert!(flags.is_empty());
    }
}

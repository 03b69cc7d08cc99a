// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Core-image header codec.
//!
//! Every core image starts with a fixed-offset header: the declared payload
//! length, a CRC-32 over the payload (computed with the stored checksum
//! replaced by a sentinel, so the check does not depend on its own storage),
//! one byte of boot flags and the erase list. All multi-byte fields are
//! little-endian, the platform's native order.

use byteorder::{ByteOrder, LittleEndian};

use crate::config::{CHECKSUM_SENTINEL, ERASE_LIST_END, ERASE_LIST_LEN, ERASE_LIST_SKIP};
use crate::error::HeaderError;
use crate::geometry::FlashGeometry;

/// Byte offset of the declared payload length.
pub const LENGTH_OFFSET: usize = 0;
/// Byte offset of the stored CRC-32.
pub const CHECKSUM_OFFSET: usize = 4;
/// Byte offset of the boot-flags byte.
pub const BOOT_FLAGS_OFFSET: usize = 8;
/// Byte offset of the erase list.
pub const ERASE_LIST_OFFSET: usize = 9;
/// Total header span inside the image.
pub const HEADER_LEN: usize = ERASE_LIST_OFFSET + ERASE_LIST_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreHeader {
    /// Declared payload size in bytes, page-aligned, including this header.
    pub length: u32,
    /// CRC-32 over the payload with the sentinel in place of this field.
    pub checksum: u32,
    /// Opaque flags copied verbatim into the flashed image.
    pub boot_flags: u8,
    /// Up to 16 one-byte sub-sector identifiers; `0xFF` terminates.
    pub erase_list: [u8; ERASE_LIST_LEN],
}

impl CoreHeader {
    /// Decode a header from the start of `buf`. Never mutates its input.
    pub fn parse(buf: &[u8]) -> Result<Self, HeaderError> {
        if buf.len() < HEADER_LEN {
            return Err(HeaderError::Truncated);
        }
        let length = LittleEndian::read_u32(&buf[LENGTH_OFFSET..LENGTH_OFFSET + 4]);
        let checksum = LittleEndian::read_u32(&buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4]);
        let boot_flags = buf[BOOT_FLAGS_OFFSET];
        let mut erase_list = [0u8; ERASE_LIST_LEN];
        erase_list.copy_from_slice(&buf[ERASE_LIST_OFFSET..ERASE_LIST_OFFSET + ERASE_LIST_LEN]);
        Ok(Self {
            length,
            checksum,
            boot_flags,
            erase_list,
        })
    }

    /// Check the declared length against the length the caller already
    /// decided on, then against the device layout.
    ///
    /// The caller comparison runs first: a mismatch marks a corrupt or
    /// foreign file on its own, before any checksum work happens.
    pub fn validate(&self, expected_len: u32, geom: &FlashGeometry) -> Result<(), HeaderError> {
        if self.length != expected_len {
            return Err(HeaderError::LengthMismatch {
                declared: self.length,
                expected: expected_len,
            });
        }
        if self.length == 0 || self.length % geom.page_size() != 0 {
            return Err(HeaderError::Misaligned(self.length));
        }
        if self.length > geom.slot_size() {
            return Err(HeaderError::TooLong {
                length: self.length,
                slot_size: geom.slot_size(),
            });
        }
        Ok(())
    }

    /// Render this header into the start of an image buffer.
    pub fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[LENGTH_OFFSET..LENGTH_OFFSET + 4], self.length);
        LittleEndian::write_u32(&mut buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4], self.checksum);
        buf[BOOT_FLAGS_OFFSET] = self.boot_flags;
        buf[ERASE_LIST_OFFSET..ERASE_LIST_OFFSET + ERASE_LIST_LEN]
            .copy_from_slice(&self.erase_list);
    }

    /// Real erase-list entries: the list ends at the first `0xFF`, and
    /// `0x00` placeholders inside it are skipped.
    pub fn erase_entries(&self) -> impl Iterator<Item = u8> + '_ {
        self.erase_list
            .iter()
            .copied()
            .take_while(|&e| e != ERASE_LIST_END)
            .filter(|&e| e != ERASE_LIST_SKIP)
    }
}

/// Copy of an image's first block with the stored checksum replaced by the
/// sentinel, exactly as the checksum was produced.
pub fn render_for_checksum(first_block: &[u8]) -> Vec<u8> {
    let mut copy = first_block.to_vec();
    if copy.len() >= CHECKSUM_OFFSET + 4 {
        copy[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&CHECKSUM_SENTINEL);
    }
    copy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{small_flash, test_geometry};

    fn sample() -> CoreHeader {
        let mut erase_list = [ERASE_LIST_END; ERASE_LIST_LEN];
        erase_list[0] = 0x01;
        CoreHeader {
            length: 0x20000,
            checksum: 0xDEAD_BEEF,
            boot_flags: 0x40,
            erase_list,
        }
    }

    #[test]
    fn header_roundtrip() {
        let header = sample();
        let mut buf = [0u8; HEADER_LEN];
        header.write_to(&mut buf);
        let decoded = CoreHeader::parse(&buf).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn parse_rejects_short_buffer() {
        let buf = [0u8; HEADER_LEN - 1];
        assert_eq!(CoreHeader::parse(&buf), Err(HeaderError::Truncated));
    }

    #[test]
    fn length_mismatch_wins_over_other_checks() {
        let geom = test_geometry(&small_flash());
        let mut header = sample();
        // misaligned *and* mismatched: the mismatch must be reported
        header.length = 1001;
        assert_eq!(
            header.validate(0x20000, &geom),
            Err(HeaderError::LengthMismatch {
                declared: 1001,
                expected: 0x20000
            })
        );
    }

    #[test]
    fn validate_checks_alignment_and_bound() {
        let geom = test_geometry(&small_flash());
        let mut header = sample();
        header.length = 1001;
        assert_eq!(
            header.validate(1001, &geom),
            Err(HeaderError::Misaligned(1001))
        );
        header.length = geom.slot_size() + geom.page_size();
        assert_eq!(
            header.validate(header.length, &geom),
            Err(HeaderError::TooLong {
                length: header.length,
                slot_size: geom.slot_size()
            })
        );
        header.length = geom.slot_size();
        assert!(header.validate(header.length, &geom).is_ok());
    }

    #[test]
    fn erase_entries_stop_at_terminator_and_skip_placeholders() {
        let mut header = sample();
        header.erase_list = [ERASE_LIST_END; ERASE_LIST_LEN];
        header.erase_list[0] = 0x03;
        header.erase_list[1] = ERASE_LIST_SKIP;
        header.erase_list[2] = 0x01;
        // everything after the terminator is ignored
        header.erase_list[4] = 0x07;
        let entries: Vec<u8> = header.erase_entries().collect();
        assert_eq!(entries, vec![0x03, 0x01]);
    }

    #[test]
    fn render_replaces_only_the_checksum_field() {
        let header = sample();
        let mut block = vec![0xAB; 512];
        header.write_to(&mut block);
        let rendered = render_for_checksum(&block);
        assert_eq!(&rendered[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4], &CHECKSUM_SENTINEL);
        assert_eq!(rendered[..CHECKSUM_OFFSET], block[..CHECKSUM_OFFSET]);
        assert_eq!(rendered[CHECKSUM_OFFSET + 4..], block[CHECKSUM_OFFSET + 4..]);
    }
}

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! In-memory collaborators for tests: a recording flash device, a
//! checkpointable storage reader and a core-image builder.

use crc32fast::Hasher;

use crate::config::{CHECKSUM_SENTINEL, ERASE_LIST_END, ERASE_LIST_LEN};
use crate::device::{DeviceInfo, FlashDevice, ProgressSink, RemovableStorage};
use crate::error::{DeviceError, StorageError};
use crate::geometry::FlashGeometry;
use crate::header::{CoreHeader, CHECKSUM_OFFSET, HEADER_LEN};
use crate::config::BLOCK_LEN;

/// Flash simulation. Erase sets `0xFF`; programming only clears bits, as
/// real cells do; every call is recorded so tests can assert exactly how
/// much wear an operation caused.
pub struct MemFlash {
    pub bytes: Vec<u8>,
    pub page_size: u32,
    pub erase_sizes: Vec<u32>,
    /// Block addresses erased, in order.
    pub erases: Vec<u32>,
    /// Page addresses programmed, in order.
    pub programs: Vec<u32>,
    /// Read calls issued.
    pub reads: u32,
    /// Verify calls issued.
    pub verifies: u32,
    /// A failing cell: the page programmed at this address never takes its
    /// data, so its block can never verify.
    pub corrupt_at: Option<u32>,
}

impl MemFlash {
    pub fn new(total: u32, page_size: u32, erase_sizes: Vec<u32>) -> Self {
        Self {
            bytes: vec![0xFF; total as usize],
            page_size,
            erase_sizes,
            erases: Vec::new(),
            programs: Vec::new(),
            reads: 0,
            verifies: 0,
            corrupt_at: None,
        }
    }

    /// True when no call of any kind reached the device.
    pub fn untouched(&self) -> bool {
        self.reads == 0 && self.verifies == 0 && self.erases.is_empty() && self.programs.is_empty()
    }
}

impl FlashDevice for MemFlash {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            total_size: self.bytes.len() as u32,
            page_size: self.page_size,
            erase_sizes: self.erase_sizes.clone(),
        }
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), DeviceError> {
        self.reads += 1;
        let start = addr as usize;
        let end = start + buf.len();
        if end > self.bytes.len() {
            return Err(DeviceError::Read { addr });
        }
        buf.copy_from_slice(&self.bytes[start..end]);
        Ok(())
    }

    fn erase(&mut self, addr: u32, block_len: u32) -> Result<(), DeviceError> {
        let start = addr as usize;
        let end = start + block_len as usize;
        if addr % block_len != 0 || end > self.bytes.len() {
            return Err(DeviceError::Erase { addr });
        }
        self.bytes[start..end].fill(0xFF);
        self.erases.push(addr);
        Ok(())
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), DeviceError> {
        let start = addr as usize;
        let end = start + data.len();
        if end > self.bytes.len() {
            return Err(DeviceError::Program { addr });
        }
        for (b, &d) in self.bytes[start..end].iter_mut().zip(data) {
            *b &= d;
        }
        if self.corrupt_at == Some(addr) {
            self.bytes[start] = !data[0];
        }
        self.programs.push(addr);
        Ok(())
    }

    fn verify(&mut self, addr: u32, expected: &[u8]) -> Result<bool, DeviceError> {
        self.verifies += 1;
        let start = addr as usize;
        let end = start + expected.len();
        if end > self.bytes.len() {
            return Err(DeviceError::Read { addr });
        }
        Ok(&self.bytes[start..end] == expected)
    }
}

/// The canonical test device: 512 KiB, 256-byte pages, 4 and 64 KiB erase
/// blocks. With 128 KiB slots that yields four slots of two sweep blocks.
pub fn small_flash() -> MemFlash {
    MemFlash::new(512 * 1024, 256, vec![4 * 1024, 64 * 1024])
}

/// Geometry of [`small_flash`] with 128 KiB slots.
pub fn test_geometry(dev: &MemFlash) -> FlashGeometry {
    FlashGeometry::probe(dev, 128 * 1024).unwrap()
}

/// Storage reader over an in-memory image, with optional injected failure.
#[derive(Debug)]
pub struct MemStorage {
    bytes: Vec<u8>,
    pos: usize,
    /// Fail the read of this block index with the given status code.
    pub fail_block: Option<(u32, u8)>,
}

impl MemStorage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            pos: 0,
            fail_block: None,
        }
    }
}

impl RemovableStorage for MemStorage {
    type Position = usize;

    fn read_block(&mut self, buf: &mut [u8; BLOCK_LEN]) -> Result<usize, StorageError> {
        if let Some((block, code)) = self.fail_block {
            if self.pos / BLOCK_LEN == block as usize {
                return Err(StorageError::Read(code));
            }
        }
        let n = (self.bytes.len() - self.pos).min(BLOCK_LEN);
        buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<(), StorageError> {
        if pos > self.bytes.len() {
            return Err(StorageError::Seek(0x55));
        }
        self.pos = pos;
        Ok(())
    }
}

/// Build a valid core image: header plus a deterministic payload pattern,
/// with the checksum computed over the sentinel-rendered bytes exactly as
/// the loader will verify it.
pub fn build_core_image(length: u32, boot_flags: u8, erase_entries: &[u8]) -> Vec<u8> {
    let mut image = vec![0u8; length as usize];
    for (i, b) in image.iter_mut().enumerate().skip(HEADER_LEN) {
        *b = (i % 251) as u8;
    }
    let mut erase_list = [ERASE_LIST_END; ERASE_LIST_LEN];
    erase_list[..erase_entries.len()].copy_from_slice(erase_entries);
    let mut header = CoreHeader {
        length,
        checksum: 0,
        boot_flags,
        erase_list,
    };
    header.write_to(&mut image);

    image[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&CHECKSUM_SENTINEL);
    let mut hasher = Hasher::new();
    hasher.update(&image);
    header.checksum = hasher.finalize();
    header.write_to(&mut image);
    image
}

/// Sink that records every progress report.
#[derive(Debug, Default)]
pub struct CountingSink {
    pub reports: Vec<u32>,
}

impl CountingSink {
    pub fn monotonic(&self) -> bool {
        self.reports.windows(2).all(|w| w[0] <= w[1])
    }

    pub fn last(&self) -> u32 {
        self.reports.last().copied().unwrap_or(0)
    }
}

impl ProgressSink for CountingSink {
    fn progress(&mut self, bytes: u32) {
        self.reports.push(bytes);
    }
}

/// Sink that requests cancellation after a fixed number of polls.
#[derive(Debug)]
pub struct AbortAfter {
    remaining: u32,
}

impl AbortAfter {
    pub fn new(polls: u32) -> Self {
        Self { remaining: polls }
    }
}

impl ProgressSink for AbortAfter {
    fn abort_requested(&mut self) -> bool {
        if self.remaining == 0 {
            true
        } else {
            self.remaining -= 1;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::render_for_checksum;

    #[test]
    fn built_images_verify_against_their_own_checksum() {
        let image = build_core_image(0x20000, 0x00, &[0x01]);
        let header = CoreHeader::parse(&image).unwrap();

        let mut hasher = Hasher::new();
        hasher.update(&render_for_checksum(&image[..BLOCK_LEN]));
        hasher.update(&image[BLOCK_LEN..]);
        assert_eq!(hasher.finalize(), header.checksum);
    }

    #[test]
    fn mem_flash_programs_clear_bits_only() {
        let mut dev = small_flash();
        dev.erase(0, 65536).unwrap();
        dev.program(0, &[0x0F; 256]).unwrap();
        dev.program(0, &[0xF0; 256]).unwrap();
        assert_eq!(dev.bytes[0], 0x00);
        assert_eq!(dev.erases, vec![0]);
        assert_eq!(dev.programs, vec![0, 0]);
    }

    #[test]
    fn mem_storage_fails_where_told() {
        let mut storage = MemStorage::new(vec![0u8; 4 * BLOCK_LEN]);
        storage.fail_block = Some((2, 0x27));
        let mut buf = [0u8; BLOCK_LEN];
        assert_eq!(storage.read_block(&mut buf), Ok(BLOCK_LEN));
        assert_eq!(storage.read_block(&mut buf), Ok(BLOCK_LEN));
        assert_eq!(storage.read_block(&mut buf), Err(StorageError::Read(0x27)));
    }
}

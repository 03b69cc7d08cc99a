//! A `FlashDevice` over a memory-mapped image file.
//!
//! The emulated chip has 256-byte program pages and 4/64 KiB erase blocks.
//! Program operations only clear bits, like the real article, so a flash
//! image produced here behaves the way the engine expects flash to behave.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context};
use memmap2::MmapMut;

use coreflash::device::{DeviceInfo, FlashDevice};
use coreflash::error::DeviceError;

/// Program page size of the emulated device.
pub const PAGE_SIZE: u32 = 256;
/// Erase granularities of the emulated device.
pub const ERASE_SIZES: [u32; 2] = [4 * 1024, 64 * 1024];

pub struct FileFlash {
    map: MmapMut,
}

impl FileFlash {
    /// Open an existing flash image file for reading and writing.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("opening flash image {}", path.display()))?;
        let len = file.metadata()?.len();
        if len == 0 || len > u64::from(u32::MAX) || len % u64::from(ERASE_SIZES[1]) != 0 {
            bail!(
                "flash image size ({len} bytes) must be a nonzero multiple of 64 KiB"
            );
        }
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { map })
    }

    /// Create a blank (all `0xFF`) flash image of `size` bytes and open it.
    pub fn create(path: &Path, size: u64) -> anyhow::Result<Self> {
        if size == 0 || size % u64::from(ERASE_SIZES[1]) != 0 {
            bail!("flash image size must be a nonzero multiple of 64 KiB");
        }
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("creating flash image {}", path.display()))?;
        let blank = vec![0xFFu8; 64 * 1024];
        let mut written = 0u64;
        while written < size {
            file.write_all(&blank)?;
            written += blank.len() as u64;
        }
        file.flush()?;
        drop(file);
        Self::open(path)
    }

    /// Push pending changes out to the file.
    pub fn flush(&self) -> anyhow::Result<()> {
        self.map.flush().context("flushing flash image")
    }

    fn span(&self, addr: u32, len: usize) -> Option<std::ops::Range<usize>> {
        let start = addr as usize;
        let end = start.checked_add(len)?;
        (end <= self.map.len()).then_some(start..end)
    }
}

impl FlashDevice for FileFlash {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            total_size: self.map.len() as u32,
            page_size: PAGE_SIZE,
            erase_sizes: ERASE_SIZES.to_vec(),
        }
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), DeviceError> {
        let range = self.span(addr, buf.len()).ok_or(DeviceError::Read { addr })?;
        buf.copy_from_slice(&self.map[range]);
        Ok(())
    }

    fn erase(&mut self, addr: u32, block_len: u32) -> Result<(), DeviceError> {
        if addr % block_len != 0 {
            return Err(DeviceError::Erase { addr });
        }
        let range = self
            .span(addr, block_len as usize)
            .ok_or(DeviceError::Erase { addr })?;
        self.map[range].fill(0xFF);
        Ok(())
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), DeviceError> {
        let range = self
            .span(addr, data.len())
            .ok_or(DeviceError::Program { addr })?;
        for (b, &d) in self.map[range].iter_mut().zip(data) {
            *b &= d;
        }
        Ok(())
    }

    fn verify(&mut self, addr: u32, expected: &[u8]) -> Result<bool, DeviceError> {
        let range = self.span(addr, expected.len()).ok_or(DeviceError::Read { addr })?;
        Ok(&self.map[range] == expected)
    }
}

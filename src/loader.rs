// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Integrity loader: stages a candidate image and verifies it before any
//! flash mutation is permitted.
//!
//! The loader is the sole constructor of [`StagedImage`]; holding one whose
//! state is `IntegrityOk` is the engine's proof that the staged bytes were
//! checked before anything destructive happens downstream.

use crc32fast::Hasher;
use tracing::info;

use crate::config::{StagingMode, BLOCK_LEN, WINDOW_LEN};
use crate::device::{FlashDevice, ProgressSink, RemovableStorage};
use crate::error::{HeaderError, LoadError, StorageError};
use crate::geometry::FlashGeometry;
use crate::header::{self, CoreHeader};
use crate::staging::{CheckpointStream, FullBuffer, StageState, StagingStore};

/// A staged candidate image: bytes in a staging store plus the decoded
/// header and a validity tag.
#[derive(Debug)]
pub struct StagedImage<T: StagingStore> {
    source: T,
    header: CoreHeader,
    state: StageState,
}

impl<T: StagingStore> StagedImage<T> {
    pub(crate) fn new(source: T, header: CoreHeader, state: StageState) -> Self {
        Self {
            source,
            header,
            state,
        }
    }

    pub fn header(&self) -> &CoreHeader {
        &self.header
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    pub fn is_verified(&self) -> bool {
        self.state == StageState::IntegrityOk
    }

    pub fn declared_len(&self) -> u32 {
        self.header.length
    }

    pub(crate) fn source_mut(&mut self) -> &mut T {
        &mut self.source
    }

    /// Patch the boot-flags byte of the staged copy; the operator may mark
    /// an image fixed-up between load and flash. Returns false when the
    /// staging store cannot be patched in place (streaming).
    pub fn patch_boot_flags(&mut self, flags: u8) -> bool {
        if self.source.patch_byte(header::BOOT_FLAGS_OFFSET as u32, flags) {
            self.header.boot_flags = flags;
            true
        } else {
            false
        }
    }
}

/// Staging source produced by [`load_from_storage`], shaped by the
/// configured [`StagingMode`].
#[derive(Debug)]
pub enum StagedSource<S: RemovableStorage> {
    Buffer(FullBuffer),
    Stream(CheckpointStream<S>),
}

impl<S: RemovableStorage> StagingStore for StagedSource<S> {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        match self {
            StagedSource::Buffer(b) => b.read(offset, buf),
            StagedSource::Stream(s) => s.read(offset, buf),
        }
    }

    fn patch_byte(&mut self, offset: u32, value: u8) -> bool {
        match self {
            StagedSource::Buffer(b) => b.patch_byte(offset, value),
            StagedSource::Stream(s) => s.patch_byte(offset, value),
        }
    }
}

/// Stream a core image off removable storage into the staging store,
/// verifying it end to end.
///
/// The image is read in 512-byte blocks. The first block carries the
/// header: its declared length must equal `expected_len`, which the caller
/// decided on before the load began, and that comparison happens before any
/// checksum work. The CRC-32 runs over the declared length with the stored
/// checksum replaced by the sentinel, exactly matching how the stored value
/// was produced. After every block the sink is polled for cancellation.
///
/// Any error return leaves nothing staged; there is no partial success.
pub fn load_from_storage<S: RemovableStorage>(
    mut storage: S,
    expected_len: u32,
    geom: &FlashGeometry,
    mode: StagingMode,
    sink: &mut dyn ProgressSink,
) -> Result<StagedImage<StagedSource<S>>, LoadError> {
    if (expected_len as usize) < header::HEADER_LEN {
        return Err(HeaderError::Truncated.into());
    }

    let streaming = mode == StagingMode::StreamingWithCheckpoints;
    let mut buffer: Vec<u8> = if streaming {
        Vec::new()
    } else {
        Vec::with_capacity(expected_len as usize)
    };
    let mut checkpoints: Vec<S::Position> = Vec::new();
    let mut hasher = Hasher::new();
    let mut header: Option<CoreHeader> = None;

    let mut block = [0u8; BLOCK_LEN];
    let mut addr: u32 = 0;
    while addr < expected_len {
        // the checkpoint chain records where each window starts, so the
        // flashing sweep can come back to it later
        if streaming && addr % WINDOW_LEN == 0 {
            checkpoints.push(storage.position());
        }
        let n = storage.read_block(&mut block)?;
        if n == 0 {
            return Err(StorageError::Eof.into());
        }
        if addr == 0 {
            // the first block carries the real length; it must match what
            // the caller decided on before any checksum work is done
            let hdr = CoreHeader::parse(&block[..n])?;
            hdr.validate(expected_len, geom)?;
            header = Some(hdr);
        }
        let span = (expected_len - addr).min(n as u32) as usize;
        if addr == 0 {
            hasher.update(&header::render_for_checksum(&block[..span]));
        } else {
            hasher.update(&block[..span]);
        }
        if !streaming {
            buffer.extend_from_slice(&block[..span]);
        }
        addr += n as u32;
        sink.progress(addr.min(expected_len));
        if sink.abort_requested() {
            info!("core load aborted by operator at {:#x}", addr);
            return Err(LoadError::Aborted);
        }
    }

    let header = header.ok_or(HeaderError::Truncated)?;
    let computed = hasher.finalize();
    if computed != header.checksum {
        return Err(LoadError::ChecksumMismatch {
            stored: header.checksum,
            computed,
        });
    }

    info!(
        "staged core image: {} bytes, crc32 {:#010x}, {} erase-list entries",
        header.length,
        header.checksum,
        header.erase_entries().count()
    );
    let source = if streaming {
        StagedSource::Stream(CheckpointStream::new(storage, checkpoints, expected_len))
    } else {
        StagedSource::Buffer(FullBuffer::new(buffer))
    };
    Ok(StagedImage::new(source, header, StageState::IntegrityOk))
}

/// Stage a slot's resident contents back out of flash.
///
/// Used when the comparison data must come from flash rather than storage:
/// the caller is re-staging known-good resident data, so no checksum
/// validation runs. The caller-supplied `length` governs; the resident
/// header contributes the boot flags and the erase list.
pub fn load_from_flash<F: FlashDevice>(
    dev: &mut F,
    slot: u8,
    length: u32,
    geom: &FlashGeometry,
    sink: &mut dyn ProgressSink,
) -> Result<StagedImage<FullBuffer>, LoadError> {
    if (length as usize) < header::HEADER_LEN {
        return Err(HeaderError::Truncated.into());
    }
    if length > geom.slot_size() {
        return Err(HeaderError::TooLong {
            length,
            slot_size: geom.slot_size(),
        }
        .into());
    }
    let base = geom.slot_base(slot);
    let mut buffer = vec![0u8; length as usize];
    let mut addr: u32 = 0;
    while addr < length {
        let span = (length - addr).min(BLOCK_LEN as u32) as usize;
        dev.read(base + addr, &mut buffer[addr as usize..addr as usize + span])?;
        addr += span as u32;
        sink.progress(addr);
        if sink.abort_requested() {
            return Err(LoadError::Aborted);
        }
    }
    let mut header = CoreHeader::parse(&buffer)?;
    header.length = length;
    Ok(StagedImage::new(
        FullBuffer::new(buffer),
        header,
        StageState::IntegrityOk,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CHECKSUM_SENTINEL;
    use crate::device::SilentSink;
    use crate::fixtures::{
        build_core_image, small_flash, test_geometry, AbortAfter, CountingSink, MemStorage,
    };

    #[test]
    fn load_verifies_a_valid_image() {
        let geom = test_geometry(&small_flash());
        let image = build_core_image(0x20000, 0x00, &[]);
        let mut sink = CountingSink::default();
        let staged = load_from_storage(
            MemStorage::new(image),
            0x20000,
            &geom,
            StagingMode::FullBuffer,
            &mut sink,
        )
        .unwrap();
        assert!(staged.is_verified());
        assert_eq!(staged.state(), StageState::IntegrityOk);
        assert_eq!(staged.declared_len(), 0x20000);
        assert!(sink.monotonic());
        assert_eq!(sink.last(), 0x20000);
    }

    #[test]
    fn length_mismatch_is_reported_before_any_checksum_check() {
        let geom = test_geometry(&small_flash());
        // corrupt the checksum too: the length mismatch must still win
        let mut image = build_core_image(0x20000, 0x00, &[]);
        image[4] ^= 0xFF;
        let err = load_from_storage(
            MemStorage::new(image),
            0x10000,
            &geom,
            StagingMode::FullBuffer,
            &mut SilentSink,
        )
        .unwrap_err();
        assert_eq!(
            err,
            LoadError::Header(HeaderError::LengthMismatch {
                declared: 0x20000,
                expected: 0x10000
            })
        );
    }

    #[test]
    fn corrupted_payload_fails_the_checksum() {
        let geom = test_geometry(&small_flash());
        let mut image = build_core_image(0x20000, 0x00, &[]);
        image[0x1F000] ^= 0x01;
        let err = load_from_storage(
            MemStorage::new(image),
            0x20000,
            &geom,
            StagingMode::FullBuffer,
            &mut SilentSink,
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::ChecksumMismatch { .. }));
    }

    #[test]
    fn storage_failure_aborts_the_load() {
        let geom = test_geometry(&small_flash());
        let image = build_core_image(0x20000, 0x00, &[]);
        let mut storage = MemStorage::new(image);
        storage.fail_block = Some((3, 0x27));
        let err = load_from_storage(
            storage,
            0x20000,
            &geom,
            StagingMode::FullBuffer,
            &mut SilentSink,
        )
        .unwrap_err();
        assert_eq!(err, LoadError::Storage(StorageError::Read(0x27)));
    }

    #[test]
    fn operator_abort_stops_the_load() {
        let geom = test_geometry(&small_flash());
        let image = build_core_image(0x20000, 0x00, &[]);
        let mut sink = AbortAfter::new(4);
        let err = load_from_storage(
            MemStorage::new(image),
            0x20000,
            &geom,
            StagingMode::FullBuffer,
            &mut sink,
        )
        .unwrap_err();
        assert_eq!(err, LoadError::Aborted);
    }

    #[test]
    fn truncated_storage_is_an_eof() {
        let geom = test_geometry(&small_flash());
        let mut image = build_core_image(0x20000, 0x00, &[]);
        image.truncate(0x10000);
        let err = load_from_storage(
            MemStorage::new(image),
            0x20000,
            &geom,
            StagingMode::FullBuffer,
            &mut SilentSink,
        )
        .unwrap_err();
        assert_eq!(err, LoadError::Storage(StorageError::Eof));
    }

    #[test]
    fn streaming_load_rereads_what_storage_held() {
        let geom = test_geometry(&small_flash());
        let image = build_core_image(0x20000, 0x00, &[]);
        let mut staged = load_from_storage(
            MemStorage::new(image.clone()),
            0x20000,
            &geom,
            StagingMode::StreamingWithCheckpoints,
            &mut SilentSink,
        )
        .unwrap();
        assert!(staged.is_verified());
        // backward reads out of the checkpointed stream match the source
        let mut buf = [0u8; BLOCK_LEN];
        for i in (0..0x20000 / BLOCK_LEN).rev() {
            let start = i * BLOCK_LEN;
            staged.source_mut().read(start as u32, &mut buf).unwrap();
            assert_eq!(&buf[..], &image[start..start + BLOCK_LEN]);
        }
    }

    #[test]
    fn boot_flags_patching_depends_on_the_store() {
        let geom = test_geometry(&small_flash());
        let image = build_core_image(0x20000, 0x00, &[]);

        let mut buffered = load_from_storage(
            MemStorage::new(image.clone()),
            0x20000,
            &geom,
            StagingMode::FullBuffer,
            &mut SilentSink,
        )
        .unwrap();
        assert!(buffered.patch_boot_flags(0x81));
        assert_eq!(buffered.header().boot_flags, 0x81);

        let mut streamed = load_from_storage(
            MemStorage::new(image),
            0x20000,
            &geom,
            StagingMode::StreamingWithCheckpoints,
            &mut SilentSink,
        )
        .unwrap();
        assert!(!streamed.patch_boot_flags(0x81));
        assert_eq!(streamed.header().boot_flags, 0x00);
    }

    #[test]
    fn load_from_flash_skips_checksum_validation() {
        let mut dev = small_flash();
        let geom = test_geometry(&dev);
        // plant an image with a garbage checksum into slot 1
        let mut image = build_core_image(0x20000, 0x07, &[]);
        image[4..8].copy_from_slice(&CHECKSUM_SENTINEL);
        let base = geom.slot_base(1) as usize;
        dev.bytes[base..base + image.len()].copy_from_slice(&image);

        let staged = load_from_flash(&mut dev, 1, 0x20000, &geom, &mut SilentSink).unwrap();
        assert!(staged.is_verified());
        assert_eq!(staged.header().boot_flags, 0x07);
        assert_eq!(staged.declared_len(), 0x20000);
    }
}

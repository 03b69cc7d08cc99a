// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Staging stores: where a candidate image lives before it reaches flash.
//!
//! Two strategies, selected by [`crate::config::StagingMode`]: the whole
//! image in working memory, or, when working memory is scarce, a single
//! 64 KiB window backed by a chain of storage-position checkpoints. The
//! chain exists because loading consumes storage forward while flashing
//! walks the slot backward; checkpoints let earlier windows be read again.

use crate::config::{BLOCK_LEN, WINDOW_LEN};
use crate::device::RemovableStorage;
use crate::error::StorageError;

/// Validity tag of staged contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageState {
    /// Nothing staged, or a previous load failed.
    #[default]
    NotLoaded,
    /// Bytes are present but their checksum has not been confirmed.
    LoadedUnverified,
    /// Verified; flash mutation may proceed.
    IntegrityOk,
}

/// Source of staged bytes during reconciliation.
///
/// Reads past the image's end yield `0xFF`, the erased state, so a flash
/// block straddling the image's last byte compares and programs cleanly.
pub trait StagingStore {
    /// Copy staged bytes starting at image offset `offset` into `buf`.
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Patch one staged byte in place. Returns false when the store cannot
    /// be patched (streaming).
    fn patch_byte(&mut self, offset: u32, value: u8) -> bool {
        let _ = (offset, value);
        false
    }
}

/// Whole image resident in working memory.
#[derive(Debug)]
pub struct FullBuffer {
    bytes: Vec<u8>,
}

impl FullBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl StagingStore for FullBuffer {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        let start = (offset as usize).min(self.bytes.len());
        let avail = (self.bytes.len() - start).min(buf.len());
        buf[..avail].copy_from_slice(&self.bytes[start..start + avail]);
        buf[avail..].fill(0xFF);
        Ok(())
    }

    fn patch_byte(&mut self, offset: u32, value: u8) -> bool {
        match self.bytes.get_mut(offset as usize) {
            Some(b) => {
                *b = value;
                true
            }
            None => false,
        }
    }
}

/// Streaming store: one resident window plus one storage checkpoint per
/// window of the image.
#[derive(Debug)]
pub struct CheckpointStream<S: RemovableStorage> {
    reader: S,
    checkpoints: Vec<S::Position>,
    total_len: u32,
    window: Vec<u8>,
    window_base: Option<u32>,
}

impl<S: RemovableStorage> CheckpointStream<S> {
    pub(crate) fn new(reader: S, checkpoints: Vec<S::Position>, total_len: u32) -> Self {
        Self {
            reader,
            checkpoints,
            total_len,
            window: vec![0xFF; WINDOW_LEN as usize],
            window_base: None,
        }
    }

    /// Re-seek to the checkpoint covering `base` and refill the window.
    fn load_window(&mut self, base: u32) -> Result<(), StorageError> {
        let idx = (base / WINDOW_LEN) as usize;
        let pos = *self.checkpoints.get(idx).ok_or(StorageError::Eof)?;
        self.reader.seek(pos)?;
        self.window.fill(0xFF);
        let span = (self.total_len - base).min(WINDOW_LEN) as usize;
        let mut off = 0usize;
        let mut block = [0u8; BLOCK_LEN];
        while off < span {
            let n = self.reader.read_block(&mut block)?;
            if n == 0 {
                return Err(StorageError::Eof);
            }
            let take = n.min(span - off);
            self.window[off..off + take].copy_from_slice(&block[..take]);
            off += take;
        }
        self.window_base = Some(base);
        Ok(())
    }
}

impl<S: RemovableStorage> StagingStore for CheckpointStream<S> {
    fn read(&mut self, mut offset: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        let mut out = buf;
        while !out.is_empty() {
            if offset >= self.total_len {
                out.fill(0xFF);
                break;
            }
            let base = offset - offset % WINDOW_LEN;
            if self.window_base != Some(base) {
                self.load_window(base)?;
            }
            let in_window = (offset - base) as usize;
            let span = out.len().min(WINDOW_LEN as usize - in_window);
            let (head, tail) = out.split_at_mut(span);
            head.copy_from_slice(&self.window[in_window..in_window + span]);
            out = tail;
            offset += span as u32;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::MemStorage;

    #[test]
    fn full_buffer_reads_and_pads() {
        let mut store = FullBuffer::new(vec![0x11; 100]);
        let mut buf = [0u8; 8];
        store.read(96, &mut buf).unwrap();
        assert_eq!(&buf[..4], &[0x11; 4]);
        assert_eq!(&buf[4..], &[0xFF; 4]);
        // entirely past the end
        store.read(200, &mut buf).unwrap();
        assert_eq!(buf, [0xFF; 8]);
    }

    #[test]
    fn full_buffer_patches_in_place() {
        let mut store = FullBuffer::new(vec![0u8; 16]);
        assert!(store.patch_byte(8, 0x5A));
        assert_eq!(store.as_slice()[8], 0x5A);
        assert!(!store.patch_byte(16, 0x5A));
    }

    #[test]
    fn checkpoint_stream_rereads_backward() {
        // 160 KiB patterned image: three windows (64 + 64 + 32 KiB)
        let len = 160 * 1024u32;
        let bytes: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
        let reader = MemStorage::new(bytes.clone());
        let checkpoints: Vec<usize> = vec![0, 64 * 1024, 128 * 1024];
        let mut stream = CheckpointStream::new(reader, checkpoints, len);

        // walk backward, as the flashing sweep does
        let mut buf = [0u8; BLOCK_LEN];
        for i in (0..len / BLOCK_LEN as u32).rev() {
            let start = (i * BLOCK_LEN as u32) as usize;
            stream.read(start as u32, &mut buf).unwrap();
            assert_eq!(&buf[..], &bytes[start..start + BLOCK_LEN]);
        }
    }

    #[test]
    fn checkpoint_stream_reads_across_windows() {
        let len = 128 * 1024u32;
        let bytes: Vec<u8> = (0..len).map(|i| (i % 241) as u8).collect();
        let reader = MemStorage::new(bytes.clone());
        let mut stream = CheckpointStream::new(reader, vec![0, 64 * 1024], len);

        let start = 64 * 1024 - 100;
        let mut buf = [0u8; 200];
        stream.read(start, &mut buf).unwrap();
        assert_eq!(&buf[..], &bytes[start as usize..start as usize + 200]);
    }

    #[test]
    fn checkpoint_stream_pads_past_the_end() {
        let len = 64 * 1024u32;
        let bytes = vec![0x22u8; len as usize];
        let reader = MemStorage::new(bytes);
        let mut stream = CheckpointStream::new(reader, vec![0], len);

        let mut buf = [0u8; 16];
        stream.read(len - 8, &mut buf).unwrap();
        assert_eq!(&buf[..8], &[0x22; 8]);
        assert_eq!(&buf[8..], &[0xFF; 8]);
    }
}

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Collaborator interfaces consumed by the engine.
//!
//! The engine never touches hardware directly: the flash transport, the
//! removable-storage driver and the operator frontend all sit behind these
//! traits, so the chip-specific command encoding and the UI live elsewhere.

use crate::config::BLOCK_LEN;
use crate::error::{DeviceError, StorageError};

/// Geometry reported by a flash transport at probe time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Total device size in bytes.
    pub total_size: u32,
    /// Program page size in bytes.
    pub page_size: u32,
    /// Supported erase-block sizes in bytes, in any order.
    pub erase_sizes: Vec<u32>,
}

/// Low-level flash transport.
pub trait FlashDevice {
    fn info(&self) -> DeviceInfo;

    /// Read `buf.len()` bytes starting at `addr`.
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), DeviceError>;

    /// Erase the `block_len`-byte block starting at `addr`. `addr` must be
    /// aligned to `block_len`.
    fn erase(&mut self, addr: u32, block_len: u32) -> Result<(), DeviceError>;

    /// Program one page at `addr`; `data` is exactly one page.
    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), DeviceError>;

    /// Compare flash contents at `addr` against `expected`.
    fn verify(&mut self, addr: u32, expected: &[u8]) -> Result<bool, DeviceError>;
}

/// Removable-storage reader. Opening and closing map to construction and
/// drop of the implementing value.
pub trait RemovableStorage {
    /// Opaque resumable read position, captured once per staging window.
    type Position: Copy + std::fmt::Debug;

    /// Read the next block. Returns the number of bytes read; 0 means end
    /// of file.
    fn read_block(&mut self, buf: &mut [u8; BLOCK_LEN]) -> Result<usize, StorageError>;

    fn position(&self) -> Self::Position;

    fn seek(&mut self, pos: Self::Position) -> Result<(), StorageError>;
}

/// Operator frontend: progress display and cooperative cancellation.
///
/// `progress` reports a monotonically increasing byte offset within the
/// current phase. `abort_requested` is polled at the engine's yield points,
/// once per block; returning true cancels the operation at the next safe
/// boundary. Nothing is ever cancelled mid-erase or mid-program.
pub trait ProgressSink {
    fn progress(&mut self, bytes: u32) {
        let _ = bytes;
    }

    fn abort_requested(&mut self) -> bool {
        false
    }
}

/// Sink for unattended runs: no display, never aborts.
#[derive(Debug, Default)]
pub struct SilentSink;

impl ProgressSink for SilentSink {}

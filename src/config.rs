// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Engine tunables and on-flash constants.

/// Bytes moved per storage read, matching the removable-media block size.
pub const BLOCK_LEN: usize = 512;

/// Size of one streaming staging window; one storage-position checkpoint is
/// kept per window so consumed blocks can be read again later.
pub const WINDOW_LEN: u32 = 64 * 1024;

/// Whole erase/program/reverify cycles attempted per flash block before the
/// operation is declared fatal.
pub const MAX_FLASH_RETRY: u8 = 10;

/// Value standing in for the stored checksum while the CRC-32 is computed,
/// at production and at verification time alike.
pub const CHECKSUM_SENTINEL: [u8; 4] = [0xF0, 0xF0, 0xF0, 0xF0];

/// Entries in a core header erase list.
pub const ERASE_LIST_LEN: usize = 16;

/// Erase-list terminator.
pub const ERASE_LIST_END: u8 = 0xFF;

/// Placeholder for a dropped entry. Skipped, does not terminate the list.
pub const ERASE_LIST_SKIP: u8 = 0x00;

/// Unit addressed by one erase-list entry.
pub const ERASE_LIST_PAGE: u32 = 64 * 1024;

/// Hard cap on addressable slots regardless of device size.
pub const MAX_SLOTS: u8 = 8;

/// How a candidate image is staged before flashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StagingMode {
    /// The whole image is held in working memory.
    #[default]
    FullBuffer,
    /// Only one window is resident at a time; a chain of storage-position
    /// checkpoints allows re-reading windows that were already consumed.
    StreamingWithCheckpoints,
}

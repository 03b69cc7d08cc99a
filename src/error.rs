//! Error types for every layer of the flashing pipeline.

use thiserror::Error;

/// Failure reported by the removable-storage driver, carrying its status
/// code where one exists.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage open failed (status {0:#04x})")]
    Open(u8),
    #[error("storage read failed (status {0:#04x})")]
    Read(u8),
    #[error("storage seek failed (status {0:#04x})")]
    Seek(u8),
    #[error("storage ended before the declared image length")]
    Eof,
}

/// Failure reported by the flash transport.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    #[error("flash read failed at {addr:#010x}")]
    Read { addr: u32 },
    #[error("flash erase failed at {addr:#010x}")]
    Erase { addr: u32 },
    #[error("flash program failed at {addr:#010x}")]
    Program { addr: u32 },
    #[error("flash geometry probe failed: {0}")]
    Probe(&'static str),
}

/// A staged buffer failed core-header validation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    #[error("buffer too short for a core header")]
    Truncated,
    #[error("declared length {declared:#x} does not match expected length {expected:#x}")]
    LengthMismatch { declared: u32, expected: u32 },
    #[error("declared length {0:#x} is not a multiple of the flash page size")]
    Misaligned(u32),
    #[error("declared length {length:#x} exceeds the slot size {slot_size:#x}")]
    TooLong { length: u32, slot_size: u32 },
}

/// Loading or verifying a candidate image failed. No flash was mutated.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    #[error("invalid core header: {0}")]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("load aborted by operator")]
    Aborted,
}

/// Terminal error of a flash operation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("slot {0} out of range")]
    BadSlot(u8),
    #[error("slot 0 must be addressed through the recovery target")]
    RecoveryOnly,
    #[error("staged image has not passed integrity verification")]
    NotVerified,
    #[error("block at {addr:#010x} still differs after {attempts} erase/program attempts")]
    VerifyExhausted { addr: u32, attempts: u8 },
}

impl FlashError {
    /// Fatal errors halt the operation with flash possibly holding a
    /// partial update; the operator must step in (raw inspection or a
    /// power cycle). Everything else left flash untouched beyond block
    /// cycles that already completed cleanly.
    ///
    /// Bare `Device` and `Storage` failures only arise once destructive
    /// work has started; before that they travel inside `Load`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FlashError::VerifyExhausted { .. } | FlashError::Device(_) | FlashError::Storage(_)
        )
    }
}

pub type Result<T> = core::result::Result<T, FlashError>;

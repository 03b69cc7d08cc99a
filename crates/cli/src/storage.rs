//! A `RemovableStorage` reader over an ordinary file.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use coreflash::config::BLOCK_LEN;
use coreflash::device::RemovableStorage;
use coreflash::error::StorageError;

// status codes surfaced to the operator, in the style of an SD driver
const ST_OPEN: u8 = 0x01;
const ST_READ: u8 = 0x02;
const ST_SEEK: u8 = 0x03;

pub struct FileStorage {
    file: File,
    pos: u64,
}

impl FileStorage {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        File::open(path)
            .map(|file| Self { file, pos: 0 })
            .map_err(|_| StorageError::Open(ST_OPEN))
    }
}

impl RemovableStorage for FileStorage {
    type Position = u64;

    fn read_block(&mut self, buf: &mut [u8; BLOCK_LEN]) -> Result<usize, StorageError> {
        let mut n = 0;
        while n < BLOCK_LEN {
            match self.file.read(&mut buf[n..]) {
                Ok(0) => break,
                Ok(k) => n += k,
                Err(_) => return Err(StorageError::Read(ST_READ)),
            }
        }
        self.pos += n as u64;
        Ok(n)
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, pos: u64) -> Result<(), StorageError> {
        self.file
            .seek(SeekFrom::Start(pos))
            .map_err(|_| StorageError::Seek(ST_SEEK))?;
        self.pos = pos;
        Ok(())
    }
}

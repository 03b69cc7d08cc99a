// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Sector reconciliation: make flash match the staged image with the
//! fewest possible erase cycles.
//!
//! The sweep walks a slot from its top downward in erase-block units.
//! Partial images conventionally put the boot-relevant sector at the top of
//! the slot, so walking downward lets the engine skip the low, unused
//! blocks entirely once the staged length runs out. Each block is first
//! byte-compared against flash; identical blocks cost nothing, which is the
//! dominant saving over a naive full-slot rewrite.

use tracing::{debug, warn};

use crate::config::{BLOCK_LEN, MAX_FLASH_RETRY};
use crate::device::{FlashDevice, ProgressSink};
use crate::error::FlashError;
use crate::geometry::FlashGeometry;
use crate::slot0::EraseCursor;
use crate::staging::StagingStore;

/// How a sweep ended when cancellation is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    Completed,
    Aborted,
}

pub struct Reconciler<'d, F: FlashDevice> {
    dev: &'d mut F,
    geom: &'d FlashGeometry,
}

impl<'d, F: FlashDevice> Reconciler<'d, F> {
    pub fn new(dev: &'d mut F, geom: &'d FlashGeometry) -> Self {
        Self { dev, geom }
    }

    /// Byte-compare a staged range against flash, in transfer-block chunks.
    pub(crate) fn range_matches<T: StagingStore>(
        &mut self,
        staged: &mut T,
        image_off: u32,
        flash_addr: u32,
        len: u32,
    ) -> Result<bool, FlashError> {
        let mut chunk = [0u8; BLOCK_LEN];
        let mut done: u32 = 0;
        while done < len {
            let span = (len - done).min(BLOCK_LEN as u32) as usize;
            staged.read(image_off + done, &mut chunk[..span])?;
            if !self.dev.verify(flash_addr + done, &chunk[..span])? {
                return Ok(false);
            }
            done += span as u32;
        }
        Ok(true)
    }

    /// Erase `[start, end)` at the largest supported granularity.
    pub fn erase_range(
        &mut self,
        start: u32,
        end: u32,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), FlashError> {
        let block = self.geom.erase_block();
        let mut addr = start;
        while addr < end {
            self.dev.erase(addr, block)?;
            addr += block;
            sink.progress(addr - start);
        }
        Ok(())
    }

    /// One block cycle: skip when flash already matches, otherwise erase,
    /// program page-wise from the block's top down to its base, and
    /// reverify. Bounded by `MAX_FLASH_RETRY` whole cycles.
    ///
    /// An erase or program failure inside a cycle consumes an attempt; the
    /// reverify at the top of the next cycle is the arbiter either way.
    /// Erase-before-program bounds the "erased but not yet programmed"
    /// exposure to one block at a time.
    pub fn reconcile_block<T: StagingStore>(
        &mut self,
        staged: &mut T,
        image_off: u32,
        block_addr: u32,
    ) -> Result<(), FlashError> {
        let block = self.geom.erase_block();
        let page = self.geom.page_size();
        let mut page_buf = vec![0u8; page as usize];
        let mut attempts: u8 = 0;
        loop {
            if self.range_matches(staged, image_off, block_addr, block)? {
                return Ok(());
            }
            if attempts == MAX_FLASH_RETRY {
                warn!(
                    "block {:#010x} still differs after {} attempts, giving up",
                    block_addr, attempts
                );
                return Err(FlashError::VerifyExhausted {
                    addr: block_addr,
                    attempts,
                });
            }
            attempts += 1;
            if let Err(e) = self.dev.erase(block_addr, block) {
                debug!("erase of {:#010x} failed on attempt {}: {}", block_addr, attempts, e);
                continue;
            }
            let mut addr = block_addr + block;
            while addr > block_addr {
                addr -= page;
                staged.read(image_off + (addr - block_addr), &mut page_buf)?;
                if let Err(e) = self.dev.program(addr, &page_buf) {
                    debug!("program at {:#010x} failed on attempt {}: {}", addr, attempts, e);
                    break;
                }
            }
        }
    }

    /// Walk one slot's range from its top downward, reconciling each
    /// erase-block-sized piece.
    ///
    /// Blocks lying entirely past the staged length keep whatever flash
    /// already holds. Blocks claimed by `skip` (the incoming image's erase
    /// list) are left to their own dedicated cycles afterwards. When
    /// `allow_abort` is set, operator cancellation is honored between
    /// blocks, never inside one.
    pub fn sweep_slot<T: StagingStore>(
        &mut self,
        staged: &mut T,
        staged_len: u32,
        slot: u8,
        mut skip: Option<&mut EraseCursor>,
        allow_abort: bool,
        sink: &mut dyn ProgressSink,
    ) -> Result<Sweep, FlashError> {
        let base = self.geom.slot_base(slot);
        let block = self.geom.erase_block();
        let mut addr = self.geom.slot_end(slot);
        while addr > base {
            addr -= block;
            let off = addr - base;
            if off >= staged_len {
                continue;
            }
            if let Some(cursor) = skip.as_deref_mut() {
                if cursor.claims(addr) {
                    debug!("block {:#010x} deferred to the erase list", addr);
                    continue;
                }
            }
            if allow_abort && sink.abort_requested() {
                return Ok(Sweep::Aborted);
            }
            self.reconcile_block(staged, off, addr)?;
            sink.progress(self.geom.slot_size() - off);
        }
        Ok(Sweep::Completed)
    }
}

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! End-to-end flashing operations and their state machine.
//!
//! The orchestrator sequences load → verify → flash. Reconciliation never
//! starts before the loader has reported success; that ordering, not a
//! lock, is what guarantees no block is erased before its replacement data
//! is present and intact.

use tracing::{info, warn};

use crate::config::{StagingMode, BLOCK_LEN};
use crate::device::{FlashDevice, ProgressSink, RemovableStorage};
use crate::error::{FlashError, HeaderError, LoadError};
use crate::geometry::FlashGeometry;
use crate::header::CoreHeader;
use crate::loader::{self, StagedImage, StagedSource};
use crate::reconcile::{Reconciler, Sweep};
use crate::slot0::{EraseCursor, Slot0EraseList};
use crate::staging::{FullBuffer, StagingStore};

/// Where the current operation stands; queryable from progress callbacks
/// and after the operation ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Loading,
    LoadFailed,
    Loaded,
    Erasing,
    Reconciling,
    /// Dedicated cycles for the incoming slot-0 erase list.
    EraseList,
    Done,
    /// A fatal error halted the operation; operator intervention required.
    Failed,
}

/// Terminal status of a completed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The operator cancelled at a block boundary. The target slot's
    /// header block is already gone, so the slot reads as empty rather
    /// than as a stale-but-plausible image.
    Aborted,
}

/// Which slot an operation addresses.
///
/// Slot 0 can only be addressed by presenting the erase list captured from
/// its resident image, which forces the capture to happen before any
/// destructive work can begin.
#[derive(Debug)]
pub enum Target {
    /// The permanently-resident recovery slot.
    Recovery(Slot0EraseList),
    /// An ordinary slot (index >= 1).
    Slot(u8),
}

impl Target {
    pub fn slot(&self) -> u8 {
        match self {
            Target::Recovery(_) => 0,
            Target::Slot(n) => *n,
        }
    }
}

pub struct Orchestrator<'d, F: FlashDevice> {
    dev: &'d mut F,
    geom: FlashGeometry,
    phase: Phase,
}

impl<'d, F: FlashDevice> Orchestrator<'d, F> {
    pub fn new(dev: &'d mut F, geom: FlashGeometry) -> Self {
        Self {
            dev,
            geom,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn geometry(&self) -> &FlashGeometry {
        &self.geom
    }

    fn check_target(&self, target: &Target) -> Result<(), FlashError> {
        let slot = target.slot();
        if !self.geom.contains_slot(slot) {
            return Err(FlashError::BadSlot(slot));
        }
        if matches!(target, Target::Slot(0)) {
            return Err(FlashError::RecoveryOnly);
        }
        Ok(())
    }

    /// Read and decode the header resident at the start of a slot.
    pub fn read_slot_header(&mut self, slot: u8) -> Result<CoreHeader, FlashError> {
        if !self.geom.contains_slot(slot) {
            return Err(FlashError::BadSlot(slot));
        }
        let mut block = [0u8; BLOCK_LEN];
        self.dev.read(self.geom.slot_base(slot), &mut block)?;
        CoreHeader::parse(&block).map_err(|e| FlashError::Load(LoadError::Header(e)))
    }

    /// Capture slot 0's resident erase list, the ticket required to
    /// address the recovery slot.
    pub fn capture_recovery_list(&mut self) -> Result<Slot0EraseList, FlashError> {
        Slot0EraseList::capture(self.dev, &self.geom)
    }

    /// Stage a candidate image from removable storage and verify it.
    pub fn stage_from_storage<S: RemovableStorage>(
        &mut self,
        storage: S,
        expected_len: u32,
        mode: StagingMode,
        sink: &mut dyn ProgressSink,
    ) -> Result<StagedImage<StagedSource<S>>, FlashError> {
        self.phase = Phase::Loading;
        match loader::load_from_storage(storage, expected_len, &self.geom, mode, sink) {
            Ok(staged) => {
                self.phase = Phase::Loaded;
                Ok(staged)
            }
            Err(e) => {
                self.phase = Phase::LoadFailed;
                Err(e.into())
            }
        }
    }

    /// Stage a slot's resident contents back out of flash.
    pub fn stage_from_flash(
        &mut self,
        slot: u8,
        length: u32,
        sink: &mut dyn ProgressSink,
    ) -> Result<StagedImage<FullBuffer>, FlashError> {
        if !self.geom.contains_slot(slot) {
            return Err(FlashError::BadSlot(slot));
        }
        if length % self.geom.page_size() != 0 {
            return Err(LoadError::Header(HeaderError::Misaligned(length)).into());
        }
        self.phase = Phase::Loading;
        match loader::load_from_flash(self.dev, slot, length, &self.geom, sink) {
            Ok(staged) => {
                self.phase = Phase::Loaded;
                Ok(staged)
            }
            Err(e) => {
                self.phase = Phase::LoadFailed;
                Err(e.into())
            }
        }
    }

    /// Erase a slot outright, with no replacement image.
    ///
    /// Ordinary slots are erased wholesale. For the recovery slot only the
    /// captured erase list and the header's lead block are cleared.
    pub fn erase_slot(
        &mut self,
        target: &Target,
        sink: &mut dyn ProgressSink,
    ) -> Result<Outcome, FlashError> {
        self.check_target(target)?;
        self.phase = Phase::Erasing;
        let result = self.erase_slot_inner(target, sink);
        self.settle(target.slot(), &result, "erased");
        result
    }

    fn erase_slot_inner(
        &mut self,
        target: &Target,
        sink: &mut dyn ProgressSink,
    ) -> Result<Outcome, FlashError> {
        let base = self.geom.slot_base(target.slot());
        let block = self.geom.erase_block();
        let mut rec = Reconciler::new(&mut *self.dev, &self.geom);
        match target {
            Target::Recovery(list) => {
                for &addr in list.addrs() {
                    rec.erase_range(addr, addr + block, sink)?;
                }
                rec.erase_range(base, base + block, sink)?;
            }
            Target::Slot(_) => {
                rec.erase_range(base, base + self.geom.slot_size(), sink)?;
            }
        }
        Ok(Outcome::Success)
    }

    /// Replace a slot's contents with a verified staged image.
    ///
    /// A byte-identical slot is left completely untouched. Otherwise the
    /// lead block (the one holding the header) is erased first, so an
    /// interrupted flash leaves an evidently-empty slot rather than a
    /// stale header that still looks bootable. Reconciliation then walks
    /// the slot from its top downward; for the recovery slot the incoming
    /// image's erase list is processed afterwards, and the outgoing
    /// image's list is cleared up front.
    ///
    /// The staged image is consumed: a new load is required for any
    /// further flash operation.
    pub fn flash_slot<T: StagingStore>(
        &mut self,
        target: &Target,
        mut staged: StagedImage<T>,
        sink: &mut dyn ProgressSink,
    ) -> Result<Outcome, FlashError> {
        self.check_target(target)?;
        if !staged.is_verified() {
            return Err(FlashError::NotVerified);
        }
        let result = self.flash_slot_inner(target, &mut staged, sink);
        self.settle(target.slot(), &result, "flashed");
        result
    }

    fn flash_slot_inner<T: StagingStore>(
        &mut self,
        target: &Target,
        staged: &mut StagedImage<T>,
        sink: &mut dyn ProgressSink,
    ) -> Result<Outcome, FlashError> {
        let slot = target.slot();
        let base = self.geom.slot_base(slot);
        let block = self.geom.erase_block();
        let staged_len = staged.declared_len();
        let is_recovery = matches!(target, Target::Recovery(_));

        let mut cursor = if is_recovery {
            Some(EraseCursor::new(staged.header(), &self.geom))
        } else {
            None
        };
        let new_addrs: Vec<u32> = cursor
            .as_ref()
            .map(|c| c.addrs().to_vec())
            .unwrap_or_default();
        let pre_erase = match target {
            Target::Recovery(old) => old.pre_erase_addrs(&new_addrs),
            Target::Slot(_) => Vec::new(),
        };

        let mut rec = Reconciler::new(&mut *self.dev, &self.geom);

        // wear avoidance: when flash already holds exactly this image and
        // nothing from the outgoing erase list needs clearing, there is
        // nothing to do
        if pre_erase.is_empty()
            && Self::already_resident(&mut rec, staged, staged_len, base, &new_addrs, block)?
        {
            info!("slot {} already holds the staged image, leaving it alone", slot);
            return Ok(Outcome::Success);
        }

        self.phase = Phase::Erasing;
        for &addr in &pre_erase {
            rec.erase_range(addr, addr + block, sink)?;
        }
        // the header's block goes first, unconditionally
        rec.erase_range(base, base + block, sink)?;

        self.phase = Phase::Reconciling;
        let swept = rec.sweep_slot(
            staged.source_mut(),
            staged_len,
            slot,
            cursor.as_mut(),
            // a half-updated recovery slot must never be left behind, so
            // cancellation is only honored away from slot 0
            !is_recovery,
            sink,
        )?;
        if swept == Sweep::Aborted {
            warn!("flash of slot {} aborted by operator; slot left empty", slot);
            return Ok(Outcome::Aborted);
        }

        if let Some(cursor) = &cursor {
            self.phase = Phase::EraseList;
            let mut done: u32 = 0;
            for &addr in cursor.addrs() {
                rec.reconcile_block(staged.source_mut(), addr - base, addr)?;
                done += block;
                sink.progress(done);
            }
        }

        info!("slot {} flashed, {:#x} bytes reconciled", slot, staged_len);
        Ok(Outcome::Success)
    }

    /// Whole-target comparison backing the wear-avoidance short cut: the
    /// main range and every incoming erase-list block already match flash.
    fn already_resident<T: StagingStore>(
        rec: &mut Reconciler<'_, F>,
        staged: &mut StagedImage<T>,
        staged_len: u32,
        base: u32,
        new_addrs: &[u32],
        block: u32,
    ) -> Result<bool, FlashError> {
        if !rec.range_matches(staged.source_mut(), 0, base, staged_len)? {
            return Ok(false);
        }
        for &addr in new_addrs {
            if !rec.range_matches(staged.source_mut(), addr - base, addr, block)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn settle(&mut self, slot: u8, result: &Result<Outcome, FlashError>, verb: &str) {
        match result {
            Ok(Outcome::Success) => {
                self.phase = Phase::Done;
                info!("slot {} {}", slot, verb);
            }
            Ok(Outcome::Aborted) => {
                self.phase = Phase::Idle;
            }
            Err(e) if e.is_fatal() => {
                warn!("fatal error while slot {} was being {}: {}", slot, verb, e);
                self.phase = Phase::Failed;
            }
            Err(_) => {
                self.phase = Phase::Idle;
            }
        }
    }
}

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Slot 0 handling.
//!
//! The recovery slot is never erased wholesale. An update touches the
//! header's lead block plus an explicit list of erase-block sub-regions,
//! which bounds the window in which the device is not recoverable.

use tracing::info;

use crate::config::{BLOCK_LEN, ERASE_LIST_PAGE};
use crate::device::FlashDevice;
use crate::error::{FlashError, LoadError};
use crate::geometry::FlashGeometry;
use crate::header::CoreHeader;

/// Resolve an erase-list entry to its block-aligned address inside slot 0.
///
/// Entries address 64 KiB units; the slot page mask keeps the result inside
/// one slot and the final mask aligns it down to the erase granularity.
pub fn resolve_entry(entry: u8, geom: &FlashGeometry) -> u32 {
    let addr = u32::from(entry & geom.slot_page_mask()) * ERASE_LIST_PAGE;
    addr & !(geom.erase_block() - 1)
}

/// The erase list captured from the slot-0 image about to be replaced.
///
/// The resident header is the only record of which extra regions the
/// current image occupies, so the capture must happen before that header's
/// block is erased. Addressing slot 0 requires one of these
/// ([`crate::orchestrator::Target::Recovery`]), and reading the resident
/// header is the only way to construct one; the ordering is a precondition
/// the compiler checks, not a call-site convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot0EraseList {
    addrs: Vec<u32>,
}

impl Slot0EraseList {
    /// Read the resident slot-0 header and record its erase list.
    pub fn capture<F: FlashDevice>(
        dev: &mut F,
        geom: &FlashGeometry,
    ) -> Result<Self, FlashError> {
        let mut block = [0u8; BLOCK_LEN];
        dev.read(geom.slot_base(0), &mut block)?;
        let header = CoreHeader::parse(&block).map_err(LoadError::Header)?;
        let mut addrs: Vec<u32> = header
            .erase_entries()
            .map(|e| resolve_entry(e, geom))
            .collect();
        addrs.sort_unstable();
        addrs.dedup();
        info!(
            "captured {} erase-list blocks from the resident slot 0 image",
            addrs.len()
        );
        Ok(Self { addrs })
    }

    /// Resolved block addresses, ascending.
    pub fn addrs(&self) -> &[u32] {
        &self.addrs
    }

    /// Blocks to clear before a slot-0 update begins: everything the old
    /// image claimed except blocks the new image will rewrite in a cycle
    /// of its own, which must not be erased twice.
    pub(crate) fn pre_erase_addrs(&self, new: &[u32]) -> Vec<u32> {
        self.addrs
            .iter()
            .copied()
            .filter(|a| !new.contains(a))
            .collect()
    }
}

/// Descending cursor over the incoming image's erase list, consulted by the
/// main sweep so list blocks are not processed twice.
#[derive(Debug)]
pub struct EraseCursor {
    /// Resolved addresses sorted descending; `next` is the pending one.
    addrs: Vec<u32>,
    next: usize,
}

impl EraseCursor {
    pub fn new(header: &CoreHeader, geom: &FlashGeometry) -> Self {
        let mut addrs: Vec<u32> = header
            .erase_entries()
            .map(|e| resolve_entry(e, geom))
            .collect();
        addrs.sort_unstable_by(|a, b| b.cmp(a));
        addrs.dedup();
        Self { addrs, next: 0 }
    }

    /// All resolved addresses, descending.
    pub fn addrs(&self) -> &[u32] {
        &self.addrs
    }

    /// True when `addr` is the next pending entry; advances the cursor.
    ///
    /// The sweep runs top-down, so entries above the current position can
    /// no longer match; it may never have visited them at all when they
    /// lie past the staged length. Stepping past them keeps lower entries
    /// lined up.
    pub(crate) fn claims(&mut self, addr: u32) -> bool {
        while matches!(self.addrs.get(self.next), Some(&a) if a > addr) {
            self.next += 1;
        }
        if self.addrs.get(self.next) == Some(&addr) {
            self.next += 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ERASE_LIST_END, ERASE_LIST_LEN, ERASE_LIST_SKIP};
    use crate::fixtures::{small_flash, test_geometry, MemFlash};

    // four 64 KiB pages per slot, so several distinct entries resolve
    fn wide_geometry() -> FlashGeometry {
        let dev = MemFlash::new(1024 * 1024, 256, vec![64 * 1024]);
        FlashGeometry::probe(&dev, 256 * 1024).unwrap()
    }

    fn header_with_list(entries: &[u8]) -> CoreHeader {
        let mut erase_list = [ERASE_LIST_END; ERASE_LIST_LEN];
        erase_list[..entries.len()].copy_from_slice(entries);
        CoreHeader {
            length: 0x20000,
            checksum: 0,
            boot_flags: 0,
            erase_list,
        }
    }

    #[test]
    fn entries_resolve_to_aligned_slot_addresses() {
        let geom = test_geometry(&small_flash());
        // slot size 128 KiB -> page mask 0x01, erase block 64 KiB
        assert_eq!(resolve_entry(0x00, &geom), 0x00000);
        assert_eq!(resolve_entry(0x01, &geom), 0x10000);
        // out-of-slot bits are masked away
        assert_eq!(resolve_entry(0x81, &geom), 0x10000);
    }

    #[test]
    fn capture_reads_the_resident_header() {
        let mut dev = small_flash();
        let geom = test_geometry(&dev);
        let header = header_with_list(&[0x01]);
        let mut block = vec![0u8; BLOCK_LEN];
        header.write_to(&mut block);
        dev.bytes[..BLOCK_LEN].copy_from_slice(&block);

        let list = Slot0EraseList::capture(&mut dev, &geom).unwrap();
        assert_eq!(list.addrs(), &[0x10000]);
    }

    #[test]
    fn capture_of_a_blank_slot_is_empty() {
        let mut dev = small_flash();
        let geom = test_geometry(&dev);
        let list = Slot0EraseList::capture(&mut dev, &geom).unwrap();
        assert!(list.addrs().is_empty());
    }

    #[test]
    fn pre_erase_excludes_blocks_the_new_image_claims() {
        let list = Slot0EraseList {
            addrs: vec![0x00000, 0x10000],
        };
        assert_eq!(list.pre_erase_addrs(&[0x10000]), vec![0x00000]);
        assert!(list.pre_erase_addrs(&[0x00000, 0x10000]).is_empty());
    }

    #[test]
    fn cursor_claims_each_entry_once() {
        let geom = wide_geometry();
        let header = header_with_list(&[0x01, ERASE_LIST_SKIP, 0x02]);
        let mut cursor = EraseCursor::new(&header, &geom);
        assert_eq!(cursor.addrs(), &[0x20000, 0x10000]);

        assert!(cursor.claims(0x20000));
        assert!(cursor.claims(0x10000));
        assert!(!cursor.claims(0x10000));
    }

    #[test]
    fn cursor_steps_past_entries_the_sweep_never_visited() {
        let geom = wide_geometry();
        let header = header_with_list(&[0x01, 0x03]);
        let mut cursor = EraseCursor::new(&header, &geom);

        // the sweep skipped 0x30000 (past the staged length); the lower
        // entry must still line up
        assert!(cursor.claims(0x10000));
        assert!(!cursor.claims(0x10000));
    }
}

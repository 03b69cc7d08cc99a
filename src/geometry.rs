// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Flash layout, probed once at startup and read-only afterwards.

use crate::config::{ERASE_LIST_PAGE, MAX_SLOTS};
use crate::device::FlashDevice;
use crate::error::DeviceError;

/// Immutable flash geometry: device dimensions plus the derived slot layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashGeometry {
    total_size: u32,
    page_size: u32,
    erase_block: u32,
    slot_size: u32,
    slot_count: u8,
}

impl FlashGeometry {
    /// Probe the device and derive the slot layout.
    ///
    /// Bulk work uses the largest erase granularity the device supports,
    /// which minimizes the number of erase operations per slot.
    pub fn probe<F: FlashDevice>(dev: &F, slot_size: u32) -> Result<Self, DeviceError> {
        let info = dev.info();
        let erase_block = info
            .erase_sizes
            .iter()
            .copied()
            .max()
            .ok_or(DeviceError::Probe("no supported erase size"))?;
        if !erase_block.is_power_of_two() {
            return Err(DeviceError::Probe("erase block not a power of two"));
        }
        if info.page_size == 0 || erase_block % info.page_size != 0 {
            return Err(DeviceError::Probe("erase block not page aligned"));
        }
        if slot_size == 0 || slot_size % erase_block != 0 {
            return Err(DeviceError::Probe("slot size not erase-block aligned"));
        }
        // erase-list entries address 64 KiB units inside a slot
        if slot_size % ERASE_LIST_PAGE != 0 {
            return Err(DeviceError::Probe("slot size not a multiple of 64 KiB"));
        }
        let slot_count = (info.total_size / slot_size).min(u32::from(MAX_SLOTS)) as u8;
        if slot_count == 0 {
            return Err(DeviceError::Probe("device smaller than one slot"));
        }
        Ok(Self {
            total_size: info.total_size,
            page_size: info.page_size,
            erase_block,
            slot_size,
            slot_count,
        })
    }

    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// The largest supported erase granularity; the unit of the
    /// reconciliation sweep.
    pub fn erase_block(&self) -> u32 {
        self.erase_block
    }

    pub fn slot_size(&self) -> u32 {
        self.slot_size
    }

    pub fn slot_count(&self) -> u8 {
        self.slot_count
    }

    pub fn contains_slot(&self, slot: u8) -> bool {
        slot < self.slot_count
    }

    pub fn slot_base(&self, slot: u8) -> u32 {
        u32::from(slot) * self.slot_size
    }

    pub fn slot_end(&self, slot: u8) -> u32 {
        self.slot_base(slot) + self.slot_size
    }

    /// Mask keeping an erase-list entry's 64 KiB page index inside one slot.
    pub fn slot_page_mask(&self) -> u8 {
        ((self.slot_size / ERASE_LIST_PAGE) - 1).min(0xFF) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::MemFlash;

    #[test]
    fn probe_picks_largest_erase_size() {
        let dev = MemFlash::new(512 * 1024, 256, vec![4096, 65536]);
        let geom = FlashGeometry::probe(&dev, 128 * 1024).unwrap();
        assert_eq!(geom.erase_block(), 65536);
        assert_eq!(geom.slot_count(), 4);
        assert_eq!(geom.slot_base(2), 256 * 1024);
        assert_eq!(geom.slot_page_mask(), 1);
    }

    #[test]
    fn probe_clamps_slot_count() {
        let dev = MemFlash::new(4 * 1024 * 1024, 256, vec![65536]);
        let geom = FlashGeometry::probe(&dev, 128 * 1024).unwrap();
        // 32 slots would fit; the device maximum wins
        assert_eq!(geom.slot_count(), MAX_SLOTS);
    }

    #[test]
    fn probe_rejects_bad_layout() {
        let dev = MemFlash::new(512 * 1024, 256, vec![]);
        assert!(FlashGeometry::probe(&dev, 128 * 1024).is_err());

        let dev = MemFlash::new(512 * 1024, 256, vec![65536]);
        assert!(FlashGeometry::probe(&dev, 96 * 1024).is_err());
        assert!(FlashGeometry::probe(&dev, 0).is_err());
    }
}

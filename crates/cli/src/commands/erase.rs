use std::path::Path;

use coreflash::geometry::FlashGeometry;
use coreflash::orchestrator::{Orchestrator, Target};

use crate::flashfile::FileFlash;
use crate::progress::BarSink;

pub fn run(flash_path: &Path, slot: u8, slot_mib: u32) -> anyhow::Result<()> {
    let mut dev = FileFlash::open(flash_path)?;
    let geom = FlashGeometry::probe(&dev, slot_mib * 1024 * 1024)?;
    let slot_size = geom.slot_size();
    {
        let mut orch = Orchestrator::new(&mut dev, geom);
        let target = if slot == 0 {
            Target::Recovery(orch.capture_recovery_list()?)
        } else {
            Target::Slot(slot)
        };
        let mut bar = BarSink::new(u64::from(slot_size), "erasing");
        orch.erase_slot(&target, &mut bar)?;
        bar.finish();
    }
    dev.flush()?;
    println!("\n✅ Slot {slot} erased.\n");
    Ok(())
}

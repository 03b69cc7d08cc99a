use std::path::Path;

use comfy_table::Table;

use coreflash::geometry::FlashGeometry;
use coreflash::orchestrator::Orchestrator;

use crate::flashfile::FileFlash;

/// Show device geometry and a summary of every slot's resident header.
pub fn run(flash_path: &Path, slot_mib: u32) -> anyhow::Result<()> {
    let mut dev = FileFlash::open(flash_path)?;
    let geom = FlashGeometry::probe(&dev, slot_mib * 1024 * 1024)?;

    println!("Flash size  = {} MiB", geom.total_size() >> 20);
    println!(
        "Flash slots = {} x {} MiB",
        geom.slot_count(),
        geom.slot_size() >> 20
    );
    println!("Erase block = {} KiB", geom.erase_block() >> 10);
    println!("Page size   = {} bytes", geom.page_size());
    println!();

    let slot_count = geom.slot_count();
    let mut orch = Orchestrator::new(&mut dev, geom);
    let mut table = Table::new();
    table.set_header(vec!["Slot", "State", "Length", "Boot flags", "Erase list"]);
    for slot in 0..slot_count {
        let header = orch.read_slot_header(slot)?;
        // a blank slot reads as all-ones
        if header.length == u32::MAX {
            table.add_row(vec![slot.to_string(), "empty".into(), "-".into(), "-".into(), "-".into()]);
            continue;
        }
        let entries: Vec<u8> = header.erase_entries().collect();
        table.add_row(vec![
            slot.to_string(),
            "core".into(),
            format!("{:#x}", header.length),
            format!("{:#04x}", header.boot_flags),
            if entries.is_empty() {
                "-".into()
            } else {
                format!("{entries:02x?}")
            },
        ]);
    }
    println!("{table}");
    Ok(())
}

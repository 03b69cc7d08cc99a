use std::path::Path;

use anyhow::{anyhow, bail};

use coreflash::geometry::FlashGeometry;
use coreflash::orchestrator::{Orchestrator, Outcome, Target};
use coreflash::StagingMode;

use crate::flashfile::FileFlash;
use crate::progress::BarSink;
use crate::storage::FileStorage;

pub fn run(
    flash_path: &Path,
    core_path: &Path,
    slot: u8,
    slot_mib: u32,
    streaming: bool,
) -> anyhow::Result<()> {
    let mut dev = FileFlash::open(flash_path)?;
    let geom = FlashGeometry::probe(&dev, slot_mib * 1024 * 1024)?;
    let slot_size = geom.slot_size();

    let file_len = std::fs::metadata(core_path)?.len();
    let expected = u32::try_from(file_len).map_err(|_| anyhow!("core file too large"))?;
    if expected > slot_size {
        bail!(
            "core file is {} bytes but a slot holds {} bytes",
            file_len,
            slot_size
        );
    }
    let mode = if streaming {
        StagingMode::StreamingWithCheckpoints
    } else {
        StagingMode::FullBuffer
    };

    let outcome = {
        let mut orch = Orchestrator::new(&mut dev, geom);

        // slot 0 demands the resident erase list before anything else
        let target = if slot == 0 {
            Target::Recovery(orch.capture_recovery_list()?)
        } else {
            Target::Slot(slot)
        };

        let storage = FileStorage::open(core_path)?;
        let mut bar = BarSink::new(u64::from(expected), "loading");
        let staged = orch.stage_from_storage(storage, expected, mode, &mut bar)?;
        bar.finish();
        println!(
            "Core image verified: {} bytes, crc32 {:#010x}",
            staged.declared_len(),
            staged.header().checksum
        );

        let mut bar = BarSink::new(u64::from(slot_size), "flashing");
        let outcome = orch.flash_slot(&target, staged, &mut bar);
        bar.finish();
        outcome
    };
    dev.flush()?;

    match outcome {
        Ok(Outcome::Success) => {
            println!("\n✅ Slot {slot} flashed successfully.\n");
            Ok(())
        }
        Ok(Outcome::Aborted) => {
            println!("\nFlash aborted; slot {slot} was left empty.\n");
            Ok(())
        }
        Err(e) if e.is_fatal() => {
            eprintln!("\n❌ FATAL: {e}");
            eprintln!(
                "Flash may be partially written. Inspect the device with \
                 `coreflash inspect`, then power-cycle and retry from the top."
            );
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

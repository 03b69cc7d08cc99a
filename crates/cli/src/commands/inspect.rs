use std::path::Path;

use coreflash::device::FlashDevice;

use crate::flashfile::FileFlash;

/// Dump raw flash contents.
///
/// This is the recovery fallback: after a fatal verify failure the operator
/// can look at exactly what the device holds before deciding what to do.
pub fn run(flash_path: &Path, addr: u32, len: u32) -> anyhow::Result<()> {
    let mut dev = FileFlash::open(flash_path)?;
    let total = dev.info().total_size;
    let addr = addr.min(total);
    let len = len.min(total - addr);

    let mut buf = vec![0u8; len as usize];
    dev.read(addr, &mut buf)?;

    for (row, chunk) in buf.chunks(16).enumerate() {
        print!("{:08x}: ", addr as usize + row * 16);
        for b in chunk {
            print!("{b:02x} ");
        }
        for _ in chunk.len()..16 {
            print!("   ");
        }
        print!(" |");
        for &b in chunk {
            let c = if (0x20..0x7F).contains(&b) { b as char } else { '.' };
            print!("{c}");
        }
        println!("|");
    }
    Ok(())
}

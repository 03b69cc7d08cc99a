use std::path::Path;

use anyhow::bail;
use serde::Serialize;

use coreflash::config::BLOCK_LEN;
use coreflash::header::{render_for_checksum, CoreHeader};

#[derive(Serialize)]
struct Report {
    file: String,
    file_len: u64,
    declared_len: u32,
    stored_crc32: u32,
    computed_crc32: u32,
    boot_flags: u8,
    erase_list: Vec<u8>,
    ok: bool,
}

/// Check a core file's header and checksum without touching any flash.
pub fn run(core_path: &Path, json: bool) -> anyhow::Result<()> {
    let bytes = std::fs::read(core_path)?;
    let header = CoreHeader::parse(&bytes)?;

    // the length check comes first; a mismatch already marks a foreign file
    let length_ok = header.length as usize == bytes.len();

    let first = bytes.len().min(BLOCK_LEN);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&render_for_checksum(&bytes[..first]));
    hasher.update(&bytes[first..]);
    let computed = hasher.finalize();
    let ok = length_ok && computed == header.checksum;

    if json {
        let report = Report {
            file: core_path.display().to_string(),
            file_len: bytes.len() as u64,
            declared_len: header.length,
            stored_crc32: header.checksum,
            computed_crc32: computed,
            boot_flags: header.boot_flags,
            erase_list: header.erase_entries().collect(),
            ok,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !length_ok {
        println!("\n❌ LENGTH MISMATCH\n");
        println!("Declared: {} bytes", header.length);
        println!("On disk:  {} bytes", bytes.len());
    } else if !ok {
        println!("\n❌ CORRUPTED\n");
        println!("Stored CRC32:   {:#010x}", header.checksum);
        println!("Computed CRC32: {:#010x}", computed);
    } else {
        println!("\n✅ VERIFIED\n");
        println!("Length:     {} bytes", header.length);
        println!("CRC32:      {:#010x}", header.checksum);
        println!("Boot flags: {:#04x}", header.boot_flags);
        let entries: Vec<u8> = header.erase_entries().collect();
        if !entries.is_empty() {
            println!("Erase list: {entries:02x?}");
        }
    }

    if ok {
        Ok(())
    } else {
        bail!("core file failed verification")
    }
}

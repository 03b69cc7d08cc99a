use std::path::Path;

use crate::flashfile::FileFlash;

/// Create a blank flash image file.
pub fn run(flash_path: &Path, size_mib: u32) -> anyhow::Result<()> {
    FileFlash::create(flash_path, u64::from(size_mib) * 1024 * 1024)?;
    println!(
        "Created blank {} MiB flash image at {}",
        size_mib,
        flash_path.display()
    );
    Ok(())
}

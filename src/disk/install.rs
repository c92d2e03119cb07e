//! OS loader installation onto a mounted EFI system partition.

use crate::error::{DiskError, Result};
use crate::image::Architecture;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// Removable-media boot directory, relative to the ESP root.
pub const EFI_BOOT_DIR: &str = "EFI/Boot";

/// Copy `loader` to `EFI/Boot/<arch boot file>` under `esp_root`.
///
/// The copy goes to a temporary name first and is renamed into place once
/// synced, so the boot path never names a truncated file.
pub fn install_loader(esp_root: &Path, loader: &Path, arch: Architecture) -> Result<PathBuf> {
    let boot_dir = esp_root.join(EFI_BOOT_DIR);
    fs::create_dir_all(&boot_dir).map_err(|source| DiskError::Install {
        path: boot_dir.clone(),
        source,
    })?;

    let filename = arch.efi_boot_filename();
    let dest = boot_dir.join(filename);
    let staging = boot_dir.join(format!(".{}.partial", filename));

    info!(
        loader = %loader.display(),
        dest = %dest.display(),
        "copying OS loader"
    );

    if let Err(source) = copy_synced(loader, &staging).and_then(|_| fs::rename(&staging, &dest)) {
        let _ = fs::remove_file(&staging);
        return Err(DiskError::Install { path: dest, source });
    }

    Ok(dest)
}

fn copy_synced(src: &Path, dest: &Path) -> io::Result<()> {
    let mut input = File::open(src)?;
    let mut output = File::create(dest)?;
    io::copy(&mut input, &mut output)?;
    output.sync_all()
}

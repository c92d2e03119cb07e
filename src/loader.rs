//! Locating the OS loader produced by the kernel build.

use crate::error::{DiskError, Result};
use crate::image::Architecture;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Find the single kernel image for `arch` under `search_dir`.
///
/// The kernel build leaves `bzImage` (x86_64) or `Image` (arm64) somewhere
/// below its output directory. No match, or more than one, is an error: the
/// caller has to pass the loader path explicitly then.
pub fn discover_loader(search_dir: &Path, arch: Architecture) -> Result<PathBuf> {
    let name = arch.kernel_image_name();

    let mut found: Vec<PathBuf> = WalkDir::new(search_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == name)
        .map(|entry| entry.into_path())
        .collect();
    found.sort();
    debug!(search_dir = %search_dir.display(), ?found, "loader candidates");

    match found.len() {
        0 => Err(DiskError::Loader {
            reason: format!(
                "no {} found for {} under {}; build the kernel first or pass --os-loader",
                name,
                arch,
                search_dir.display()
            ),
        }),
        1 => Ok(found.remove(0)),
        _ => Err(DiskError::Loader {
            reason: format!(
                "multiple {} images found for {}: {}; pick one with --os-loader",
                name,
                arch,
                found
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }),
    }
}

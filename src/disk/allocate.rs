//! Backing file creation.

use crate::error::{DiskError, Result};
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::path::Path;

pub const MIB: u64 = 1024 * 1024;

/// How blocks of the backing file are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Allocation {
    /// Reserve every block up front (`fallocate`), failing early on a full disk.
    #[default]
    Preallocated,
    /// Only set the length; blocks are allocated as they are written.
    Sparse,
}

/// Create `path` with a logical size of exactly `size_mib` MiB.
///
/// Refuses to overwrite an existing file. If allocation fails after the file
/// was created, the file is removed again.
pub fn allocate_image(path: &Path, size_mib: u64, mode: Allocation) -> Result<()> {
    let size_bytes = size_mib.checked_mul(MIB).ok_or_else(|| DiskError::Allocation {
        path: path.to_path_buf(),
        reason: format!("{} MiB does not fit in a file size", size_mib),
    })?;

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| DiskError::Allocation {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let sized = match mode {
        Allocation::Preallocated => file.allocate(size_bytes).and_then(|_| file.set_len(size_bytes)),
        Allocation::Sparse => file.set_len(size_bytes),
    };

    if let Err(e) = sized.and_then(|_| file.sync_all()) {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(DiskError::Allocation {
            path: path.to_path_buf(),
            reason: e.to_string(),
        });
    }

    Ok(())
}

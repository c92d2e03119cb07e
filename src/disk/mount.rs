//! Scoped mounts on throwaway directories.

use crate::error::{DiskError, Result};
use crate::host::HostOps;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A partition mounted on a temporary directory.
///
/// [`release`](Self::release) unmounts and removes the directory; dropping an
/// unreleased handle does the same and logs any failure.
pub struct MountHandle<'h> {
    host: &'h dyn HostOps,
    node: PathBuf,
    path: PathBuf,
    mounted: bool,
    dir_present: bool,
}

impl<'h> MountHandle<'h> {
    /// Create a unique directory named `<prefix>XXXXXX` under the system temp
    /// dir and mount `node` on it.
    pub fn mount(host: &'h dyn HostOps, node: &Path, prefix: &str) -> Result<Self> {
        if !host.is_privileged() {
            return Err(DiskError::Permission {
                operation: "mounting a filesystem".to_string(),
            });
        }

        let path = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .map_err(|e| DiskError::Mount {
                node: node.to_path_buf(),
                target: std::env::temp_dir(),
                reason: format!("cannot create mount point: {}", e),
            })?
            // Never let TempDir clean up: it would recurse into a live mount.
            .keep();

        if let Err(e) = host.mount(node, &path) {
            let _ = fs::remove_dir(&path);
            return Err(DiskError::Mount {
                node: node.to_path_buf(),
                target: path,
                reason: e.to_string(),
            });
        }
        info!(node = %node.display(), target = %path.display(), "mounted");

        Ok(Self {
            host,
            node: node.to_path_buf(),
            path,
            mounted: true,
            dir_present: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn node(&self) -> &Path {
        &self.node
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Unmount, then remove the mount point even if unmounting failed.
    ///
    /// Returns the unmount error if there was one. A second call is a no-op.
    pub fn release(&mut self) -> Result<()> {
        let mut first_error = None;

        if self.mounted {
            self.mounted = false;
            match self.host.unmount(&self.path) {
                Ok(()) => info!(target = %self.path.display(), "unmounted"),
                Err(e) => {
                    first_error = Some(DiskError::Unmount {
                        target: self.path.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        }

        if self.dir_present {
            self.dir_present = false;
            // remove_dir, not remove_dir_all: if the unmount failed the
            // directory still holds the partition's files.
            if let Err(e) = fs::remove_dir(&self.path) {
                warn!(target = %self.path.display(), "cannot remove mount point: {}", e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for MountHandle<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("{}", e);
        }
    }
}

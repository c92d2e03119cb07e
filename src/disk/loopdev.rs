//! Loop device attachment.

use crate::error::{DiskError, Result};
use crate::host::HostOps;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A backing file bound to a loop device.
///
/// Detaches on drop if [`detach`](Self::detach) was never called.
pub struct BlockDeviceHandle<'h> {
    host: &'h dyn HostOps,
    device: PathBuf,
    backing: PathBuf,
    partitions: Vec<PathBuf>,
    attached: bool,
}

impl<'h> BlockDeviceHandle<'h> {
    /// Attach `backing` to the first free loop device with partition scanning.
    pub fn attach(host: &'h dyn HostOps, backing: &Path) -> Result<Self> {
        if !host.is_privileged() {
            return Err(DiskError::Permission {
                operation: "attaching a loop device".to_string(),
            });
        }

        let device = host
            .loop_attach(backing)
            .map_err(|source| DiskError::DeviceAttach {
                backing: backing.to_path_buf(),
                source,
            })?;
        info!(device = %device.display(), backing = %backing.display(), "loop device attached");

        Ok(Self {
            host,
            device,
            backing: backing.to_path_buf(),
            partitions: Vec::new(),
            attached: true,
        })
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    pub fn backing(&self) -> &Path {
        &self.backing
    }

    /// Partition nodes found by the last [`scan_partitions`](Self::scan_partitions).
    pub fn partitions(&self) -> &[PathBuf] {
        &self.partitions
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Node path of partition `index` (1-based).
    pub fn partition_node(&self, index: u32) -> PathBuf {
        partition_node(&self.device, index)
    }

    /// Wait until nodes for partitions `1..=count` exist, then record them.
    ///
    /// A node that never shows up is a [`DiskError::Format`]: nothing can be
    /// formatted until the kernel has re-read the table.
    pub fn scan_partitions(&mut self, count: u32, timeout: Duration) -> Result<&[PathBuf]> {
        self.host.settle();

        let nodes: Vec<PathBuf> = (1..=count).map(|i| self.partition_node(i)).collect();
        let deadline = Instant::now() + timeout;

        loop {
            let missing = nodes.iter().find(|node| !self.host.node_exists(node));
            match missing {
                None => break,
                Some(node) if Instant::now() >= deadline => {
                    return Err(DiskError::Format {
                        node: node.clone(),
                        reason: format!(
                            "partition node did not appear within {} ms",
                            timeout.as_millis()
                        ),
                    });
                }
                Some(node) => {
                    debug!(node = %node.display(), "waiting for partition node");
                    thread::sleep(SCAN_POLL_INTERVAL);
                }
            }
        }

        self.partitions = nodes;
        Ok(&self.partitions)
    }

    /// Detach the device. Calling this again after it returned is a no-op.
    pub fn detach(&mut self) -> Result<()> {
        if !self.attached {
            return Ok(());
        }
        // One attempt only; a device that refuses to detach is left for the
        // operator rather than retried from Drop.
        self.attached = false;
        self.partitions.clear();

        self.host
            .loop_detach(&self.device)
            .map_err(|e| DiskError::Detach {
                device: self.device.clone(),
                reason: e.to_string(),
            })?;
        info!(device = %self.device.display(), "loop device detached");
        Ok(())
    }
}

impl Drop for BlockDeviceHandle<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            warn!("{}", e);
        }
    }
}

/// `/dev/loop0` + 1 → `/dev/loop0p1`, `/dev/sda` + 1 → `/dev/sda1`.
pub fn partition_node(device: &Path, index: u32) -> PathBuf {
    let name = device.as_os_str().to_string_lossy();
    if name.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{}p{}", name, index))
    } else {
        PathBuf::from(format!("{}{}", name, index))
    }
}

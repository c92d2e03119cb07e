//! GPT creation and filesystem formatting on an attached device.

use super::layout::{parse_parted_machine, PartitionLayout};
use super::loopdev::BlockDeviceHandle;
use crate::error::{DiskError, Result};
use crate::host::HostOps;
use std::path::Path;
use tracing::{debug, info};

/// Volume labels for the two filesystems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
    pub efi: String,
    pub root: String,
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            efi: "EFI".to_string(),
            root: "ROOT".to_string(),
        }
    }
}

/// Write `layout` to the device and check the result.
///
/// No retries: re-running parted against a half-written table is not safe.
pub fn write_partition_table(
    host: &dyn HostOps,
    device: &BlockDeviceHandle<'_>,
    layout: &PartitionLayout,
) -> Result<()> {
    let dev = device.device();
    let fail = |reason: String| DiskError::Partition {
        device: dev.to_path_buf(),
        reason,
    };

    info!(device = %dev.display(), "writing GPT partition table");
    for args in layout.parted_commands() {
        debug!(device = %dev.display(), "parted {}", args.join(" "));
        host.parted(dev, &args).map_err(|e| fail(e.to_string()))?;
    }

    let print_args = ["-m", "unit", "MiB", "print"].map(String::from);
    let table = host.parted(dev, &print_args).map_err(|e| fail(e.to_string()))?;
    let parsed = parse_parted_machine(&table).map_err(&fail)?;
    layout.verify(&parsed).map_err(&fail)?;

    for part in &parsed {
        info!(
            "  partition {}: {} MiB - {} MiB ({} MiB)",
            part.number, part.start_mib, part.end_mib, part.size_mib
        );
    }
    Ok(())
}

/// Format partition 1 as FAT32 and partition 2 as ext4.
///
/// The device must already have been scanned so both nodes exist.
pub fn format_partitions(
    host: &dyn HostOps,
    device: &BlockDeviceHandle<'_>,
    labels: &Labels,
) -> Result<()> {
    let [efi, root] = device.partitions() else {
        return Err(DiskError::Format {
            node: device.device().to_path_buf(),
            reason: format!(
                "expected 2 partition nodes, found {}",
                device.partitions().len()
            ),
        });
    };

    ensure_node(host, efi)?;
    info!(node = %efi.display(), "formatting EFI partition as FAT32");
    host.mkfs_fat32(efi, &labels.efi)
        .map_err(|e| DiskError::Format {
            node: efi.clone(),
            reason: e.to_string(),
        })?;

    ensure_node(host, root)?;
    info!(node = %root.display(), "formatting root partition as ext4");
    host.mkfs_ext4(root, &labels.root)
        .map_err(|e| DiskError::Format {
            node: root.clone(),
            reason: e.to_string(),
        })?;

    Ok(())
}

fn ensure_node(host: &dyn HostOps, node: &Path) -> Result<()> {
    if host.node_exists(node) {
        Ok(())
    } else {
        Err(DiskError::Format {
            node: node.to_path_buf(),
            reason: "partition node does not exist; the kernel has not re-read the partition table"
                .to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_labels() {
        let labels = Labels::default();
        assert_eq!(labels.efi, "EFI");
        assert_eq!(labels.root, "ROOT");
    }
}

//! Two-partition GPT layout: EFI system partition followed by the root.

use crate::error::{DiskError, Result};
use std::fmt;

/// The ESP starts 1 MiB in, leaving room for the primary GPT and alignment.
pub const FIRST_PARTITION_OFFSET_MIB: u64 = 1;

/// Largest disk image accepted: 64 TiB.
pub const MAX_DISK_SIZE_MIB: u64 = 64 * 1024 * 1024;

/// Slack allowed when comparing sizes read back from `parted` (it rounds).
const SIZE_TOLERANCE_MIB: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    EfiSystem,
    LinuxRoot,
}

impl PartitionKind {
    /// Filesystem type hint handed to `parted mkpart`.
    fn parted_fs_type(&self) -> &'static str {
        match self {
            Self::EfiSystem => "fat32",
            Self::LinuxRoot => "ext4",
        }
    }
}

/// Where a partition ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionEnd {
    /// Absolute offset from the start of the disk.
    Mib(u64),
    /// Last addressable sector of the device (`100%` in parted terms).
    Remainder,
}

impl fmt::Display for PartitionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mib(mib) => write!(f, "{}MiB", mib),
            Self::Remainder => write!(f, "100%"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionSpec {
    pub index: u32,
    pub start_mib: u64,
    pub end: PartitionEnd,
    pub kind: PartitionKind,
}

impl PartitionSpec {
    /// Size in MiB, `None` for a partition that runs to the end of the disk.
    pub fn size_mib(&self) -> Option<u64> {
        match self.end {
            PartitionEnd::Mib(end) => Some(end - self.start_mib),
            PartitionEnd::Remainder => None,
        }
    }
}

/// Validated layout for a disk of `disk_size_mib`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLayout {
    disk_size_mib: u64,
    partitions: [PartitionSpec; 2],
}

impl PartitionLayout {
    pub fn new(disk_size_mib: u64, efi_size_mib: u64) -> Result<Self> {
        if efi_size_mib == 0 {
            return Err(DiskError::Layout {
                reason: "EFI partition size must be greater than zero".to_string(),
            });
        }
        if disk_size_mib > MAX_DISK_SIZE_MIB {
            return Err(DiskError::Layout {
                reason: format!(
                    "disk size ({} MiB) exceeds the {} MiB limit",
                    disk_size_mib, MAX_DISK_SIZE_MIB
                ),
            });
        }
        // The ESP ends at 1 + efi; the root partition needs at least
        // something after that.
        let efi_end = efi_size_mib
            .checked_add(FIRST_PARTITION_OFFSET_MIB)
            .ok_or_else(|| DiskError::Layout {
                reason: format!("EFI partition size ({} MiB) is out of range", efi_size_mib),
            })?;
        if disk_size_mib <= efi_end {
            return Err(DiskError::Layout {
                reason: format!(
                    "disk size ({} MiB) must be greater than EFI size ({} MiB) plus {} MiB for partition alignment",
                    disk_size_mib, efi_size_mib, FIRST_PARTITION_OFFSET_MIB
                ),
            });
        }

        Ok(Self {
            disk_size_mib,
            partitions: [
                PartitionSpec {
                    index: 1,
                    start_mib: FIRST_PARTITION_OFFSET_MIB,
                    end: PartitionEnd::Mib(efi_end),
                    kind: PartitionKind::EfiSystem,
                },
                PartitionSpec {
                    index: 2,
                    start_mib: efi_end,
                    end: PartitionEnd::Remainder,
                    kind: PartitionKind::LinuxRoot,
                },
            ],
        })
    }

    pub fn disk_size_mib(&self) -> u64 {
        self.disk_size_mib
    }

    pub fn partitions(&self) -> &[PartitionSpec; 2] {
        &self.partitions
    }

    pub fn efi(&self) -> &PartitionSpec {
        &self.partitions[0]
    }

    pub fn root(&self) -> &PartitionSpec {
        &self.partitions[1]
    }

    /// Argument lists for successive `parted -s <device> ...` invocations.
    pub fn parted_commands(&self) -> Vec<Vec<String>> {
        let mut commands = vec![vec!["mklabel".to_string(), "gpt".to_string()]];

        for part in &self.partitions {
            commands.push(vec![
                "mkpart".to_string(),
                "primary".to_string(),
                part.kind.parted_fs_type().to_string(),
                format!("{}MiB", part.start_mib),
                part.end.to_string(),
            ]);
            if part.kind == PartitionKind::EfiSystem {
                for flag in ["boot", "esp"] {
                    commands.push(vec![
                        "set".to_string(),
                        part.index.to_string(),
                        flag.to_string(),
                        "on".to_string(),
                    ]);
                }
            }
        }

        commands
    }

    /// Check a table read back with `parted -m unit MiB print` against this layout.
    pub fn verify(&self, table: &[ParsedPartition]) -> std::result::Result<(), String> {
        if table.len() != self.partitions.len() {
            return Err(format!(
                "expected {} partitions, found {}",
                self.partitions.len(),
                table.len()
            ));
        }

        let efi = &table[0];
        let root = &table[1];
        let efi_size = self.efi().size_mib().unwrap_or_default() as f64;

        if (efi.start_mib - self.efi().start_mib as f64).abs() > SIZE_TOLERANCE_MIB {
            return Err(format!(
                "EFI partition starts at {} MiB, expected {} MiB",
                efi.start_mib,
                self.efi().start_mib
            ));
        }
        if (efi.size_mib - efi_size).abs() > SIZE_TOLERANCE_MIB {
            return Err(format!(
                "EFI partition spans {} MiB, expected {} MiB",
                efi.size_mib, efi_size
            ));
        }
        if (root.start_mib - efi.end_mib).abs() > SIZE_TOLERANCE_MIB + 1.0 {
            return Err(format!(
                "root partition starts at {} MiB, not directly after the EFI partition ({} MiB)",
                root.start_mib, efi.end_mib
            ));
        }
        // The backup GPT takes the last 33 sectors, so "100%" lands just
        // short of the nominal disk size.
        let disk = self.disk_size_mib as f64;
        if root.end_mib > disk + SIZE_TOLERANCE_MIB || root.end_mib < disk - 1.0 - SIZE_TOLERANCE_MIB {
            return Err(format!(
                "root partition ends at {} MiB, expected the end of the {} MiB disk",
                root.end_mib, self.disk_size_mib
            ));
        }

        Ok(())
    }
}

/// One partition line from `parted -m -s <dev> unit MiB print`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPartition {
    pub number: u32,
    pub start_mib: f64,
    pub end_mib: f64,
    pub size_mib: f64,
    pub filesystem: String,
}

/// Parse parted's machine-readable output.
///
/// ```text
/// BYT;
/// /dev/loop0:512MiB:loopback:512:512:gpt:Loopback device:;
/// 1:1.00MiB:257MiB:256MiB:fat32:primary:boot, esp;
/// 2:257MiB:511MiB:254MiB:ext4:primary:;
/// ```
pub fn parse_parted_machine(output: &str) -> std::result::Result<Vec<ParsedPartition>, String> {
    let mut partitions = Vec::new();

    for line in output.lines() {
        let line = line.trim().trim_end_matches(';');
        let fields: Vec<&str> = line.split(':').collect();
        // Header ("BYT") and device lines do not start with a partition number.
        let Some(Ok(number)) = fields.first().map(|f| f.parse::<u32>()) else {
            continue;
        };
        if fields.len() < 4 {
            return Err(format!("truncated partition line: '{}'", line));
        }
        partitions.push(ParsedPartition {
            number,
            start_mib: parse_mib(fields[1])?,
            end_mib: parse_mib(fields[2])?,
            size_mib: parse_mib(fields[3])?,
            filesystem: fields.get(4).copied().unwrap_or_default().to_string(),
        });
    }

    partitions.sort_by_key(|p| p.number);
    Ok(partitions)
}

fn parse_mib(field: &str) -> std::result::Result<f64, String> {
    field
        .trim()
        .trim_end_matches("MiB")
        .parse()
        .map_err(|_| format!("cannot parse size '{}'", field))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARTED_512: &str = "BYT;\n\
        /dev/loop0:512MiB:loopback:512:512:gpt:Loopback device:;\n\
        1:1.00MiB:257MiB:256MiB:fat32:primary:boot, esp;\n\
        2:257MiB:511MiB:254MiB:ext4:primary:;\n";

    #[test]
    fn test_default_layout() {
        let layout = PartitionLayout::new(512, 256).unwrap();
        assert_eq!(layout.efi().start_mib, 1);
        assert_eq!(layout.efi().end, PartitionEnd::Mib(257));
        assert_eq!(layout.efi().size_mib(), Some(256));
        assert_eq!(layout.root().start_mib, 257);
        assert_eq!(layout.root().end, PartitionEnd::Remainder);
        assert_eq!(layout.root().size_mib(), None);
    }

    #[test]
    fn test_partitions_are_contiguous() {
        let layout = PartitionLayout::new(2048, 100).unwrap();
        let [efi, root] = layout.partitions();
        assert_eq!(efi.end, PartitionEnd::Mib(root.start_mib));
        assert_eq!(efi.kind, PartitionKind::EfiSystem);
        assert_eq!(root.kind, PartitionKind::LinuxRoot);
    }

    #[test]
    fn test_huge_sizes_are_layout_errors() {
        for (disk, efi) in [
            (512, u64::MAX),
            (u64::MAX, 256),
            (u64::MAX, u64::MAX),
            (MAX_DISK_SIZE_MIB + 1, 256),
        ] {
            let err = PartitionLayout::new(disk, efi).unwrap_err();
            assert_eq!(err.kind(), "LayoutError", "disk={} efi={}", disk, efi);
        }
        assert!(PartitionLayout::new(MAX_DISK_SIZE_MIB, 256).is_ok());
    }

    #[test]
    fn test_efi_not_smaller_than_disk() {
        assert!(PartitionLayout::new(512, 600).is_err());
        assert!(PartitionLayout::new(512, 512).is_err());
        // 1 MiB alignment gap leaves nothing for root
        assert!(PartitionLayout::new(512, 511).is_err());
        assert!(PartitionLayout::new(512, 510).is_ok());
    }

    #[test]
    fn test_zero_efi_is_rejected() {
        let err = PartitionLayout::new(512, 0).unwrap_err();
        assert_eq!(err.kind(), "LayoutError");
    }

    #[test]
    fn test_parted_commands() {
        let layout = PartitionLayout::new(512, 256).unwrap();
        let cmds: Vec<String> = layout
            .parted_commands()
            .into_iter()
            .map(|c| c.join(" "))
            .collect();
        assert_eq!(
            cmds,
            vec![
                "mklabel gpt",
                "mkpart primary fat32 1MiB 257MiB",
                "set 1 boot on",
                "set 1 esp on",
                "mkpart primary ext4 257MiB 100%",
            ]
        );
    }

    #[test]
    fn test_parse_parted_machine() {
        let parts = parse_parted_machine(PARTED_512).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].number, 1);
        assert_eq!(parts[0].start_mib, 1.0);
        assert_eq!(parts[0].size_mib, 256.0);
        assert_eq!(parts[0].filesystem, "fat32");
        assert_eq!(parts[1].end_mib, 511.0);
    }

    #[test]
    fn test_parse_rejects_garbage_sizes() {
        assert!(parse_parted_machine("1:one:two:three:fat32:;").is_err());
    }

    #[test]
    fn test_verify_accepts_matching_table() {
        let layout = PartitionLayout::new(512, 256).unwrap();
        let parts = parse_parted_machine(PARTED_512).unwrap();
        assert!(layout.verify(&parts).is_ok());
    }

    #[test]
    fn test_verify_rejects_wrong_efi_size() {
        let layout = PartitionLayout::new(512, 128).unwrap();
        let parts = parse_parted_machine(PARTED_512).unwrap();
        let err = layout.verify(&parts).unwrap_err();
        assert!(err.contains("EFI partition spans"));
    }

    #[test]
    fn test_verify_rejects_extra_partition() {
        let layout = PartitionLayout::new(512, 256).unwrap();
        let mut parts = parse_parted_machine(PARTED_512).unwrap();
        parts.push(parts[1].clone());
        assert!(layout.verify(&parts).is_err());
    }

    #[test]
    fn test_verify_rejects_root_short_of_disk_end() {
        let layout = PartitionLayout::new(1024, 256).unwrap();
        let parts = parse_parted_machine(PARTED_512).unwrap();
        let err = layout.verify(&parts).unwrap_err();
        assert!(err.contains("root partition ends"));
    }
}

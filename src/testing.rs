//! In-memory stand-in for the host, used by unit tests.

use crate::disk::allocate::MIB;
use crate::error::ToolError;
use crate::host::HostOps;
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Pretends to be a Linux host with one free loop device.
///
/// Every call is logged by operation name. `fail_on` makes the named
/// operation return a tool error; mount points are treated as plain
/// directories whose contents vanish on unmount.
pub struct FakeHost {
    pub privileged: bool,
    pub fail_on: Option<&'static str>,
    pub nodes_appear: bool,
    /// Mount an ESP whose root already holds a regular file named `EFI`.
    pub esp_broken: bool,
    /// Tools `has_tool` reports as absent.
    pub missing_tools: Vec<String>,
    pub device: PathBuf,
    pub calls: RefCell<Vec<String>>,
    pub attached: RefCell<Vec<PathBuf>>,
    pub mounted: RefCell<Vec<PathBuf>>,
    /// Files seen on the ESP at unmount time, relative to its root.
    pub esp_files: RefCell<Vec<String>>,
    backing: RefCell<Option<PathBuf>>,
    mkparts: RefCell<Vec<Vec<String>>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            privileged: true,
            fail_on: None,
            nodes_appear: true,
            esp_broken: false,
            missing_tools: Vec::new(),
            device: PathBuf::from("/dev/loop7"),
            calls: RefCell::new(Vec::new()),
            attached: RefCell::new(Vec::new()),
            mounted: RefCell::new(Vec::new()),
            esp_files: RefCell::new(Vec::new()),
            backing: RefCell::new(None),
            mkparts: RefCell::new(Vec::new()),
        }
    }

    pub fn failing(op: &'static str) -> Self {
        Self::new().fail_on(op)
    }

    pub fn fail_on(mut self, op: &'static str) -> Self {
        self.fail_on = Some(op);
        self
    }

    pub fn unprivileged(mut self) -> Self {
        self.privileged = false;
        self
    }

    /// Mounted ESPs come up with a regular file named `EFI` in the root.
    pub fn with_broken_esp(mut self) -> Self {
        self.esp_broken = true;
        self
    }

    /// Partition nodes never show up after attach.
    pub fn without_nodes(mut self) -> Self {
        self.nodes_appear = false;
        self
    }

    pub fn without_tools(mut self, tools: &[&str]) -> Self {
        self.missing_tools = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Operation names in call order, with consecutive repeats collapsed.
    pub fn ops(&self) -> Vec<String> {
        let mut ops = self.calls.borrow().clone();
        ops.dedup();
        ops
    }

    fn call(&self, op: &str) -> Result<(), ToolError> {
        self.calls.borrow_mut().push(op.to_string());
        if self.fail_on == Some(op) {
            return Err(ToolError {
                message: None,
                command: op.to_string(),
                status: Some(1),
                stderr: format!("injected {} failure", op),
            });
        }
        Ok(())
    }

    fn print_table(&self) -> String {
        let disk_mib = self
            .backing
            .borrow()
            .as_ref()
            .and_then(|p| fs::metadata(p).ok())
            .map(|m| m.len() / MIB)
            .unwrap_or_default();

        let mut out = format!(
            "BYT;\n{}:{}MiB:loopback:512:512:gpt:Loopback device:;\n",
            self.device.display(),
            disk_mib
        );
        for (i, args) in self.mkparts.borrow().iter().enumerate() {
            let mib = |s: &str| s.trim_end_matches("MiB").parse::<u64>().unwrap_or_default();
            let start = mib(args[2].as_str());
            let end = if args[3] == "100%" {
                disk_mib - 1
            } else {
                mib(args[3].as_str())
            };
            out.push_str(&format!(
                "{}:{}MiB:{}MiB:{}MiB:{}:primary:;\n",
                i + 1,
                start,
                end,
                end - start,
                args[1]
            ));
        }
        out
    }
}

impl HostOps for FakeHost {
    fn has_tool(&self, tool: &str) -> bool {
        !self.missing_tools.iter().any(|t| t == tool)
    }

    fn is_privileged(&self) -> bool {
        self.privileged
    }

    fn loop_attach(&self, backing: &Path) -> Result<PathBuf, ToolError> {
        self.call("loop_attach")?;
        *self.backing.borrow_mut() = Some(backing.to_path_buf());
        self.attached.borrow_mut().push(self.device.clone());
        Ok(self.device.clone())
    }

    fn loop_detach(&self, device: &Path) -> Result<(), ToolError> {
        self.call("loop_detach")?;
        self.attached.borrow_mut().retain(|d| d != device);
        Ok(())
    }

    fn parted(&self, _device: &Path, args: &[String]) -> Result<String, ToolError> {
        self.call("parted")?;
        match args.first().map(String::as_str) {
            Some("mkpart") => self.mkparts.borrow_mut().push(args[1..].to_vec()),
            Some("-m") => return Ok(self.print_table()),
            _ => {}
        }
        Ok(String::new())
    }

    fn settle(&self) {}

    fn node_exists(&self, _node: &Path) -> bool {
        self.nodes_appear && !self.attached.borrow().is_empty()
    }

    fn mkfs_fat32(&self, _node: &Path, _label: &str) -> Result<(), ToolError> {
        self.call("mkfs_fat32")
    }

    fn mkfs_ext4(&self, _node: &Path, _label: &str) -> Result<(), ToolError> {
        self.call("mkfs_ext4")
    }

    fn mount(&self, _node: &Path, target: &Path) -> Result<(), ToolError> {
        self.call("mount")?;
        if self.esp_broken {
            let _ = fs::write(target.join("EFI"), b"");
        }
        self.mounted.borrow_mut().push(target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<(), ToolError> {
        self.call("unmount")?;
        let mut seen = Vec::new();
        for entry in WalkDir::new(target).min_depth(1).into_iter().flatten() {
            if entry.file_type().is_file() {
                if let Ok(rel) = entry.path().strip_prefix(target) {
                    seen.push(rel.display().to_string());
                }
            }
        }
        self.esp_files.borrow_mut().extend(seen);
        // The filesystem goes away with the mount.
        for entry in fs::read_dir(target).into_iter().flatten().flatten() {
            let _ = fs::remove_dir_all(entry.path());
        }
        self.mounted.borrow_mut().retain(|m| m != target);
        Ok(())
    }

    fn convert_image(
        &self,
        source: &Path,
        _source_format: &str,
        target: &Path,
        target_format: &str,
    ) -> Result<(), ToolError> {
        self.call("convert_image")?;
        let header: &[u8] = match target_format {
            "qcow2" => b"QFI\xfb",
            "vhdx" => b"vhdxfile",
            "vmdk" => b"KDMV",
            "vpc" => b"conectix",
            _ => b"",
        };
        let mut bytes = header.to_vec();
        if header.is_empty() {
            bytes = fs::read(source).map_err(|e| ToolError {
                message: None,
                command: "convert_image".to_string(),
                status: Some(1),
                stderr: e.to_string(),
            })?;
        } else {
            bytes.resize(4096, 0);
        }
        fs::write(target, bytes).map_err(|e| ToolError {
            message: None,
            command: "convert_image".to_string(),
            status: Some(1),
            stderr: e.to_string(),
        })
    }
}

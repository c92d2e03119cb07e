//! Bootable EFI disk image builder.
//!
//! Builds a raw GPT disk image with a FAT32 EFI system partition holding the
//! OS loader and an ext4 root partition, then optionally converts it to a
//! virtual disk container.
//!
//! The build is a linear state machine:
//!
//! ```text
//! Validating → Allocating → Attaching → Partitioning → Formatting → Mounting
//!   → Installing → Unmounting → Detaching → [Converting] → Done
//!                      (any stage) ──failure──→ Failed
//! ```
//!
//! Entering `Failed` unwinds in reverse: unmount if mounted, then detach if
//! attached. The partially built image is left on disk for inspection.
//! Interrupting the process (SIGINT/SIGTERM) skips the unwind; a stray loop
//! device or mount then has to be cleaned up by hand.

pub mod allocate;
pub mod install;
pub mod layout;
pub mod loopdev;
pub mod mount;
pub mod partitions;

use crate::config::BuildConfig;
use crate::convert::{convert, ConversionRequest};
use crate::error::{DiskError, PipelineError, Result};
use crate::host::{HostOps, LinuxHost};
use crate::image::ImageSpec;
use crate::preflight;
use allocate::Allocation;
use layout::PartitionLayout;
use loopdev::BlockDeviceHandle;
use mount::MountHandle;
use partitions::Labels;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

/// Pipeline states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Allocating,
    Attaching,
    Partitioning,
    Formatting,
    Mounting,
    Installing,
    Unmounting,
    Detaching,
    Converting,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validating => "validating",
            Self::Allocating => "allocating",
            Self::Attaching => "attaching",
            Self::Partitioning => "partitioning",
            Self::Formatting => "formatting",
            Self::Mounting => "mounting",
            Self::Installing => "installing",
            Self::Unmounting => "unmounting",
            Self::Detaching => "detaching",
            Self::Converting => "converting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A resource let go of while tearing down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    Unmounted(PathBuf),
    Detached(PathBuf),
}

/// Tunables that are not part of the image itself.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub labels: Labels,
    pub allocation: Allocation,
    pub partition_timeout: Duration,
    pub mount_prefix: String,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from(&BuildConfig::default())
    }
}

impl From<&BuildConfig> for BuildOptions {
    fn from(config: &BuildConfig) -> Self {
        Self {
            labels: config.labels(),
            allocation: config.allocation(),
            partition_timeout: config.partition_timeout(),
            mount_prefix: config.mount_prefix.clone(),
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug)]
pub struct BuildReport {
    pub image_path: PathBuf,
    pub converted: Option<PathBuf>,
    /// Every state entered, in order.
    pub stages: Vec<Stage>,
    pub released: Vec<Release>,
    /// Non-fatal unmount/detach failures.
    pub warnings: Vec<DiskError>,
}

/// One disk image build.
pub struct Pipeline<'h> {
    host: &'h dyn HostOps,
    spec: ImageSpec,
    options: BuildOptions,
    state: Stage,
    history: Vec<Stage>,
    released: Vec<Release>,
    warnings: Vec<DiskError>,
    esp_left_mounted: bool,
    device_left_attached: bool,
}

impl<'h> Pipeline<'h> {
    pub fn new(host: &'h dyn HostOps, spec: ImageSpec, options: BuildOptions) -> Self {
        Self {
            host,
            spec,
            options,
            state: Stage::Validating,
            history: Vec::new(),
            released: Vec::new(),
            warnings: Vec::new(),
            esp_left_mounted: false,
            device_left_attached: false,
        }
    }

    pub fn state(&self) -> Stage {
        self.state
    }

    /// Drive the build to `Done` or `Failed`.
    pub fn run(mut self) -> std::result::Result<BuildReport, PipelineError> {
        self.enter(Stage::Validating);
        let layout = match self.validate() {
            Ok(layout) => layout,
            Err(e) => return Err(self.fail(e, None, None)),
        };

        let mut device = None;
        let mut mount = None;
        if let Err(e) = self.build_raw(&layout, &mut device, &mut mount) {
            return Err(self.fail(e, mount, device));
        }
        info!(image = %self.spec.image_path.display(), "EFI boot disk image created");

        let converted = match self.convert() {
            Ok(converted) => converted,
            Err(e) => return Err(self.fail(e, None, None)),
        };

        self.enter(Stage::Done);
        Ok(BuildReport {
            image_path: self.spec.image_path,
            converted,
            stages: self.history,
            released: self.released,
            warnings: self.warnings,
        })
    }

    fn enter(&mut self, stage: Stage) {
        debug_assert!(!self.state.is_terminal());
        info!(stage = %stage, "entering stage");
        self.state = stage;
        self.history.push(stage);
    }

    fn validate(&self) -> Result<PartitionLayout> {
        let layout = self.spec.validate()?;
        // Before the tool check: sbin is often off PATH for non-root users.
        preflight::check_privileges(self.host)?;
        preflight::check_host_tools(self.host, self.spec.target.is_some())?;
        info!(
            image = %self.spec.image_path.display(),
            arch = %self.spec.architecture,
            disk_mib = self.spec.disk_size_mib,
            efi_mib = self.spec.efi_size_mib,
            "disk image spec accepted"
        );
        Ok(layout)
    }

    /// Allocating through Detaching. Handles acquired here are parked in
    /// `device`/`mount` so [`fail`](Self::fail) can release them on error.
    fn build_raw(
        &mut self,
        layout: &PartitionLayout,
        device: &mut Option<BlockDeviceHandle<'h>>,
        mount: &mut Option<MountHandle<'h>>,
    ) -> Result<()> {
        let host = self.host;

        self.enter(Stage::Allocating);
        info!(
            image = %self.spec.image_path.display(),
            size_mib = self.spec.disk_size_mib,
            "creating raw disk image"
        );
        allocate::allocate_image(
            &self.spec.image_path,
            self.spec.disk_size_mib,
            self.options.allocation,
        )?;

        self.enter(Stage::Attaching);
        let dev = device.insert(BlockDeviceHandle::attach(host, &self.spec.image_path)?);

        self.enter(Stage::Partitioning);
        partitions::write_partition_table(host, dev, layout)?;

        self.enter(Stage::Formatting);
        let count = layout.partitions().len() as u32;
        dev.scan_partitions(count, self.options.partition_timeout)?;
        partitions::format_partitions(host, dev, &self.options.labels)?;

        self.enter(Stage::Mounting);
        let efi_node = dev.partition_node(layout.efi().index);
        let esp = mount.insert(MountHandle::mount(host, &efi_node, &self.options.mount_prefix)?);

        self.enter(Stage::Installing);
        install::install_loader(esp.path(), &self.spec.loader_path, self.spec.architecture)?;

        self.enter(Stage::Unmounting);
        if let Some(mut esp) = mount.take() {
            let target = esp.path().to_path_buf();
            match esp.release() {
                Ok(()) => self.released.push(Release::Unmounted(target)),
                Err(e) => {
                    warn!("{}", e);
                    self.warnings.push(e);
                    self.esp_left_mounted = true;
                }
            }
        }

        self.enter(Stage::Detaching);
        if let Some(mut dev) = device.take() {
            let node = dev.device().to_path_buf();
            match dev.detach() {
                Ok(()) => self.released.push(Release::Detached(node)),
                Err(e) => {
                    warn!("{}", e);
                    self.warnings.push(e);
                    self.device_left_attached = true;
                }
            }
        }

        Ok(())
    }

    fn convert(&mut self) -> Result<Option<PathBuf>> {
        let Some(target) = self.spec.target.clone() else {
            return Ok(None);
        };

        self.enter(Stage::Converting);
        if self.esp_left_mounted {
            return Err(DiskError::Conversion {
                target: target.path,
                reason: "EFI partition of the raw image is still mounted".to_string(),
            });
        }
        if self.device_left_attached {
            return Err(DiskError::Conversion {
                target: target.path,
                reason: "raw image is still attached as a block device".to_string(),
            });
        }

        let request = ConversionRequest::from_raw(&self.spec.image_path, &target.path, target.format);
        convert(self.host, &request).map(Some)
    }

    /// Enter `Failed` and release whatever is still held, newest first.
    fn fail(
        &mut self,
        source: DiskError,
        mount: Option<MountHandle<'h>>,
        device: Option<BlockDeviceHandle<'h>>,
    ) -> PipelineError {
        let stage = self.state;
        error!(stage = %stage, kind = source.kind(), "{}", source);
        self.enter(Stage::Failed);

        let mut cleanup = Vec::new();

        if let Some(mut esp) = mount {
            let target = esp.path().to_path_buf();
            match esp.release() {
                Ok(()) => self.released.push(Release::Unmounted(target)),
                Err(e) => {
                    warn!("during cleanup: {}", e);
                    cleanup.push(e);
                }
            }
        }

        if let Some(mut dev) = device {
            if dev.is_attached() {
                let node = dev.device().to_path_buf();
                match dev.detach() {
                    Ok(()) => self.released.push(Release::Detached(node)),
                    Err(e) => {
                        warn!("during cleanup: {}", e);
                        cleanup.push(e);
                    }
                }
            }
        }

        if self.spec.image_path.exists() && stage != Stage::Validating {
            info!(
                image = %self.spec.image_path.display(),
                "partially built image left on disk for inspection"
            );
        }

        PipelineError {
            stage,
            source,
            cleanup,
            released: std::mem::take(&mut self.released),
        }
    }
}

/// Build `spec` on this machine by running the [`Pipeline`] against
/// [`LinuxHost`].
pub fn build_disk_image(
    spec: ImageSpec,
    options: BuildOptions,
) -> std::result::Result<BuildReport, PipelineError> {
    let host = LinuxHost::new();
    Pipeline::new(&host, spec, options).run()
}

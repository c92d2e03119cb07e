//! Conversion of a finished raw image into virtual disk containers.
//!
//! `qemu-img` does the work; afterwards the target's header is checked so a
//! silently wrong output format is caught here rather than by a hypervisor.

use crate::error::{DiskError, Result};
use crate::host::HostOps;
use crate::image::TargetFormat;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::info;

const QCOW2_MAGIC: &[u8] = b"QFI\xfb";
const VHDX_MAGIC: &[u8] = b"vhdxfile";
const VMDK_SPARSE_MAGIC: &[u8] = b"KDMV";
const VMDK_DESCRIPTOR: &[u8] = b"# Disk DescriptorFile";
const VPC_COOKIE: &[u8] = b"conectix";
const VDI_SIGNATURE_OFFSET: usize = 0x40;
const VDI_SIGNATURE: u32 = 0xBEDA_107F;
const VPC_FOOTER_SIZE: u64 = 512;

/// One `source → target` conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub source: PathBuf,
    pub source_format: TargetFormat,
    pub target: PathBuf,
    pub format: TargetFormat,
}

impl ConversionRequest {
    /// Convert a raw image into `format`.
    pub fn from_raw(source: &Path, target: &Path, format: TargetFormat) -> Self {
        Self {
            source: source.to_path_buf(),
            source_format: TargetFormat::Raw,
            target: target.to_path_buf(),
            format,
        }
    }

    fn fail(&self, reason: impl Into<String>) -> DiskError {
        DiskError::Conversion {
            target: self.target.clone(),
            reason: reason.into(),
        }
    }
}

/// Run a conversion. The source is only read.
pub fn convert(host: &dyn HostOps, request: &ConversionRequest) -> Result<PathBuf> {
    if request.source == request.target {
        return Err(request.fail("target must differ from the source image"));
    }
    if !request.source.is_file() {
        return Err(request.fail(format!(
            "source image {} does not exist",
            request.source.display()
        )));
    }
    if request.target.exists() {
        return Err(request.fail("target already exists"));
    }
    let parent = match request.target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        return Err(request.fail(format!("directory {} does not exist", parent.display())));
    }

    info!(
        source = %request.source.display(),
        target = %request.target.display(),
        format = %request.format,
        "converting image"
    );
    host.convert_image(
        &request.source,
        request.source_format.as_str(),
        &request.target,
        request.format.as_str(),
    )
    .map_err(|e| request.fail(e.to_string()))?;

    let detected = sniff_format(&request.target)
        .map_err(|e| request.fail(format!("cannot read converted image: {}", e)))?;
    if detected != request.format {
        return Err(request.fail(format!(
            "converted image looks like {}, expected {}",
            detected, request.format
        )));
    }

    info!(target = %request.target.display(), "image conversion complete");
    Ok(request.target.clone())
}

/// Identify a disk image container by its magic bytes.
///
/// Anything unrecognised is reported as [`TargetFormat::Raw`].
pub fn sniff_format(path: &Path) -> io::Result<TargetFormat> {
    let mut file = File::open(path)?;
    let mut head = [0u8; 512];
    let read = read_up_to(&mut file, &mut head)?;
    let head = &head[..read];

    if head.starts_with(QCOW2_MAGIC) {
        return Ok(TargetFormat::Qcow2);
    }
    if head.starts_with(VHDX_MAGIC) {
        return Ok(TargetFormat::Vhdx);
    }
    if head.starts_with(VMDK_SPARSE_MAGIC) || head.starts_with(VMDK_DESCRIPTOR) {
        return Ok(TargetFormat::Vmdk);
    }
    if head.starts_with(VPC_COOKIE) {
        return Ok(TargetFormat::Vpc);
    }
    if let Some(sig) = head.get(VDI_SIGNATURE_OFFSET..VDI_SIGNATURE_OFFSET + 4) {
        if u32::from_le_bytes([sig[0], sig[1], sig[2], sig[3]]) == VDI_SIGNATURE {
            return Ok(TargetFormat::Vdi);
        }
    }

    // Fixed-size VHDs only carry the footer, in the last 512 bytes.
    let len = file.metadata()?.len();
    if len >= VPC_FOOTER_SIZE {
        file.seek(SeekFrom::Start(len - VPC_FOOTER_SIZE))?;
        let mut cookie = [0u8; 8];
        if read_up_to(&mut file, &mut cookie)? == cookie.len() && cookie == VPC_COOKIE {
            return Ok(TargetFormat::Vpc);
        }
    }

    Ok(TargetFormat::Raw)
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

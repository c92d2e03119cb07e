use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use efi_disk_builder::loader::discover_loader;
use efi_disk_builder::{
    build_disk_image, Architecture, BuildConfig, BuildOptions, ConversionTarget, ImageSpec,
    TargetFormat,
};
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Create a disk image with an EFI partition (FAT32) and an ext4 partition.
/// Optionally, convert the raw image to another disk format.
#[derive(Parser, Debug)]
#[command(name = "build-disk-image", version)]
struct Args {
    /// Path for the new raw disk image file (e.g. /path/to/disk.img)
    image_path: PathBuf,

    /// Architecture of the OS loader
    #[arg(value_enum)]
    arch: Architecture,

    /// Path to the OS loader EFI file; searched for under the loader search
    /// directory when omitted
    #[arg(long)]
    os_loader: Option<PathBuf>,

    /// Total disk image size in MiB [default: 512]
    #[arg(long, value_name = "MiB")]
    disk_size: Option<u64>,

    /// EFI partition size in MiB [default: 256]
    #[arg(long, value_name = "MiB")]
    efi_size: Option<u64>,

    /// Path for the converted disk image file
    #[arg(long)]
    target_image: Option<PathBuf>,

    /// Target disk format for conversion
    #[arg(long, value_enum, default_value_t = TargetFormat::Vhdx)]
    target_format: TargetFormat,

    /// TOML file with build settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    debug!(?args, "arguments");

    let config = match &args.config {
        Some(path) => BuildConfig::load(path)?,
        None => BuildConfig::default(),
    };

    let loader_path = match args.os_loader {
        Some(path) => path,
        None => {
            let path = discover_loader(&config.loader_search_dir, args.arch)?;
            info!(loader = %path.display(), "using OS loader");
            path
        }
    };

    let spec = ImageSpec {
        image_path: args.image_path,
        architecture: args.arch,
        disk_size_mib: args.disk_size.unwrap_or(config.disk_size_mib),
        efi_size_mib: args.efi_size.unwrap_or(config.efi_size_mib),
        loader_path,
        target: args.target_image.map(|path| ConversionTarget {
            path,
            format: args.target_format,
        }),
    };
    let image_path = spec.image_path.clone();

    let report = build_disk_image(spec, BuildOptions::from(&config))
        .with_context(|| format!("building disk image '{}'", image_path.display()))?;

    if let Some(converted) = &report.converted {
        info!(
            "converted image is available at '{}'",
            converted.display()
        );
    }
    info!(
        "EFI boot disk image created successfully at '{}'",
        report.image_path.display()
    );
    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .init();
}

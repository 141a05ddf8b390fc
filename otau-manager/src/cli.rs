// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use otau_common::{DeviceInfo, FirmwareVersion, HardwareVersion};

use crate::commands::{self, FormatOptions, UploadOptions};
use crate::package::Identity;
use crate::transport::{SerialLink, DEFAULT_TIMEOUT_MS};

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "otau-manager")]
#[command(about = "Build firmware packages and update OTAU targets")]
pub struct Cli {
    /// Serial port of the target (e.g., /dev/ttyACM0)
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// Response timeout in milliseconds
    #[arg(short, long, global = true, default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Commands,
}

/// Image identity shared by `pack` and `format`.
#[derive(Args)]
pub struct IdentityArgs {
    /// Product id (decimal or 0x hex)
    #[arg(long, value_parser = parse_int::<u16>)]
    pub product: u16,

    /// Vendor id (decimal or 0x hex)
    #[arg(long, value_parser = parse_int::<u16>)]
    pub vendor: u16,

    /// Firmware version as major.minor.build
    #[arg(long, value_parser = parse_version)]
    pub version: FirmwareVersion,

    /// Hardware version as major.minor
    #[arg(long, value_parser = parse_hw_version, default_value = "1.0")]
    pub hw: HardwareVersion,

    /// Hardware revision
    #[arg(long, default_value_t = 0)]
    pub hw_rev: u8,
}

impl IdentityArgs {
    fn identity(&self, security_level: u8) -> Identity {
        Identity {
            product_id: self.product,
            vendor_id: self.vendor,
            fw_version: self.version,
            hw_version: self.hw,
            hw_revision: self.hw_rev,
            security_level,
        }
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            product_id: self.product,
            vendor_id: self.vendor,
            total_sections: 0,
            fw_version: self.version,
            hw_version: self.hw,
            hw_revision: self.hw_rev,
        }
    }
}

/// How an upload ends.
#[derive(Args)]
pub struct UploadArgs {
    /// Firmware package built with `pack`
    #[arg(value_name = "PACKAGE")]
    pub package: PathBuf,

    /// Restart the download even if the target could resume it
    #[arg(long)]
    pub force: bool,

    /// Stop after Image End; do not switch to the new image
    #[arg(long)]
    pub no_switch: bool,
}

impl UploadArgs {
    fn options(&self) -> UploadOptions {
        UploadOptions {
            force: self.force,
            switch: !self.no_switch,
        }
    }
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Build a firmware package from up to three section binaries
    Pack {
        /// Output package file
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Patch section binary (section 1)
        #[arg(long)]
        patch: Option<PathBuf>,

        /// Header section binary (section 2)
        #[arg(long)]
        header: Option<PathBuf>,

        /// Application section binary (section 3)
        #[arg(long)]
        app: Option<PathBuf>,

        /// Security level announced in Image Notify
        #[arg(long, default_value_t = 0)]
        security_level: u8,

        #[command(flatten)]
        identity: IdentityArgs,
    },

    /// Print the contents of a firmware package
    Inspect {
        #[arg(value_name = "PACKAGE")]
        package: PathBuf,
    },

    /// Query the target's running firmware
    Info,

    /// Download a package to the target and switch to it
    Upload(UploadArgs),

    /// Create a flash image with a layout header and factory metadata
    Format {
        /// Output flash image file
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Flash size in bytes
        #[arg(long, value_parser = parse_int::<u32>, default_value = "0x80000")]
        size: u32,

        /// Program page size in bytes
        #[arg(long, value_parser = parse_int::<u32>, default_value = "256")]
        page_size: u32,

        /// Start of the metadata region
        #[arg(long, value_parser = parse_int::<u32>, default_value = "0x1000")]
        metadata_addr: u32,

        /// Image size of the patch, header and application sections
        #[arg(
            long,
            value_parser = parse_int::<u32>,
            value_delimiter = ',',
            default_values = ["0x4000", "0x1000", "0x18000"]
        )]
        image_sizes: Vec<u32>,

        #[command(flatten)]
        identity: IdentityArgs,
    },

    /// Upload a package to an in-process target backed by a flash image file
    Simulate {
        /// Flash image created with `format`
        #[arg(value_name = "FLASH")]
        flash: PathBuf,

        #[command(flatten)]
        upload: UploadArgs,
    },
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Pack {
            output,
            patch,
            header,
            app,
            security_level,
            identity,
        } => commands::pack(
            &output,
            [patch, header, app],
            &identity.identity(security_level),
        ),
        Commands::Inspect { package } => commands::inspect(&package),
        Commands::Info => {
            let mut link = open_port(cli.port.as_deref(), cli.timeout)?;
            commands::info(&mut link)
        }
        Commands::Upload(upload) => {
            let mut link = open_port(cli.port.as_deref(), cli.timeout)?;
            commands::upload_file(&mut link, &upload.package, upload.options()).map(|_| ())
        }
        Commands::Format {
            output,
            size,
            page_size,
            metadata_addr,
            image_sizes,
            identity,
        } => commands::format(
            &output,
            &FormatOptions {
                flash_size: size,
                page_size,
                metadata_addr,
                image_sizes: image_sizes
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("expected three image sizes"))?,
            },
            &identity.device_info(),
        ),
        Commands::Simulate { flash, upload } => {
            commands::simulate(&flash, &upload.package, upload.options())
        }
    }
}

fn open_port(port: Option<&str>, timeout_ms: u64) -> Result<SerialLink> {
    let port = port.context("--port is required for this command")?;
    SerialLink::with_timeout(port, timeout_ms)
}

/// Decimal or `0x`-prefixed hex integer.
fn parse_int<T: TryFrom<u64>>(s: &str) -> Result<T, String> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| format!("invalid number '{s}': {e}"))?;
    T::try_from(value).map_err(|_| format!("{s} is out of range"))
}

fn parse_version(s: &str) -> Result<FirmwareVersion, String> {
    let parts: Vec<&str> = s.split('.').collect();
    let [major, minor, build] = parts.as_slice() else {
        return Err(format!("expected major.minor.build, got '{s}'"));
    };
    let version = FirmwareVersion::new(
        parse_int(major)?,
        parse_int(minor)?,
        parse_int(build)?,
    );
    if !version.is_valid() {
        return Err(format!("{s} is reserved for blank images"));
    }
    Ok(version)
}

fn parse_hw_version(s: &str) -> Result<HardwareVersion, String> {
    let (major, minor) = s
        .split_once('.')
        .ok_or_else(|| format!("expected major.minor, got '{s}'"))?;
    Ok(HardwareVersion {
        major: parse_int(major)?,
        minor: parse_int(minor)?,
    })
}

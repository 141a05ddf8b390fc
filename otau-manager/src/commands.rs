// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations for package handling and target updates.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use otau_common::driver::FlashDriver;
use otau_common::protocol::{PageBuf, PageData};
use otau_common::{
    DeviceInfo, FlashLayout, FlashManager, ImageOption, OtauConfig, Request, Response,
    SectionId, MAX_PAGE_SIZE, TOTAL_SECTIONS,
};

use crate::file_flash::FileFlash;
use crate::loopback::LoopbackLink;
use crate::package::{Identity, Package, SECTION_OVERHEAD};
use crate::transport::Link;

/// Flash offset of the layout header in images created by `format`.
pub const LAYOUT_ADDR: u32 = 0;

const SECTION_NAMES: [&str; TOTAL_SECTIONS] = ["patch", "header", "app"];

#[derive(Debug, Clone, Copy)]
pub struct UploadOptions {
    pub force: bool,
    pub switch: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct FormatOptions {
    pub flash_size: u32,
    pub page_size: u32,
    pub metadata_addr: u32,
    pub image_sizes: [u32; TOTAL_SECTIONS],
}

impl FormatOptions {
    /// Default geometry on a flash of `flash_size` bytes.
    pub fn default_for(flash_size: u32) -> Self {
        Self {
            flash_size,
            page_size: 256,
            metadata_addr: 0x1000,
            image_sizes: [0x4000, 0x1000, 0x18000],
        }
    }
}

// =============================================================================
// Packages
// =============================================================================

/// Build a package from section binaries, given in section order.
pub fn pack(output: &Path, sections: [Option<PathBuf>; TOTAL_SECTIONS], identity: &Identity) -> Result<()> {
    let mut payloads = Vec::new();
    for (i, path) in sections.iter().enumerate() {
        match path {
            Some(path) if payloads.len() == i => payloads.push(
                fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?,
            ),
            Some(_) => bail!(
                "The {} section needs the {} section before it",
                SECTION_NAMES[i],
                SECTION_NAMES[i - 1]
            ),
            None => {}
        }
    }
    if payloads.is_empty() {
        bail!("Give at least --patch");
    }

    let package = Package::build(identity, &payloads)?;
    package.save(output)?;
    println!("Wrote {}", output.display());
    print_package(&package);
    Ok(())
}

pub fn inspect(path: &Path) -> Result<()> {
    let package = Package::load(path)?;
    println!("Package {}", path.display());
    print_package(&package);
    Ok(())
}

fn print_package(package: &Package) {
    let header = &package.header;
    println!("  Firmware:   {}", header.fw_version);
    println!(
        "  Target:     product 0x{:04x}, vendor 0x{:04x}, hw {} rev {}",
        header.product_id, header.vendor_id, header.hw_version, header.hw_revision
    );
    println!("  Security:   {}", header.security_level);
    for section in &header.sections {
        let id = section.descriptor.id;
        println!(
            "  Section {} ({:<6}) {} bytes ({} payload), CRC32 0x{:08x}",
            id,
            SECTION_NAMES.get(usize::from(id).wrapping_sub(1)).unwrap_or(&"?"),
            section.descriptor.size,
            (section.descriptor.size as usize).saturating_sub(SECTION_OVERHEAD),
            section.crc
        );
    }
    println!(
        "  Total:      {} bytes, CRC32 0x{:08x}",
        header.total_size, header.total_crc
    );
}

// =============================================================================
// Target operations
// =============================================================================

/// Send `request` and wait for its reply, answering pause indications on the way.
fn expect_reply<L: Link>(link: &mut L, request: &Request) -> Result<Response> {
    link.send(request)?;
    let mut paused = false;
    let mut stashed = None;
    loop {
        match link.receive()? {
            Response::PauseRequest => {
                println!("Target requested a pause");
                link.send(&Request::PauseAck)?;
                paused = true;
            }
            Response::ResumeRequest { .. } => {
                println!("Target resumed");
                paused = false;
                if let Some(reply) = stashed.take() {
                    return Ok(reply);
                }
            }
            reply if paused => stashed = Some(reply),
            reply => return Ok(reply),
        }
    }
}

fn failure(step: &str, reply: &Response) -> anyhow::Error {
    match reply.status() {
        Some(status) => anyhow!("{} failed: {:?}", step, status),
        None => anyhow!("{}: unexpected response {:?}", step, reply),
    }
}

fn print_device(info: &DeviceInfo) {
    println!(
        "Target:   product 0x{:04x}, vendor 0x{:04x}, hw {} rev {}",
        info.product_id, info.vendor_id, info.hw_version, info.hw_revision
    );
    println!("Running:  {}", info.fw_version);
}

/// Get and display the target's identity and running version.
pub fn info<L: Link>(link: &mut L) -> Result<()> {
    let reply = expect_reply(link, &Request::GetDeviceInfo)?;
    let Response::DeviceInfo {
        info,
        pending_version,
    } = reply
    else {
        return Err(failure("Get Device Info", &reply));
    };
    print_device(&info);
    if pending_version.is_valid() {
        println!("Pending:  {} (interrupted download)", pending_version);
    }
    Ok(())
}

pub fn upload_file<L: Link>(link: &mut L, path: &Path, options: UploadOptions) -> Result<bool> {
    let package = Package::load(path)?;
    upload(link, &package, options)
}

/// Run a full update. Returns whether the target switched to the new image.
pub fn upload<L: Link>(link: &mut L, package: &Package, options: UploadOptions) -> Result<bool> {
    let header = &package.header;
    info(link)?;
    println!(
        "Package:  {} ({} sections, {} bytes)",
        header.fw_version,
        header.total_sections(),
        header.total_size
    );
    println!();

    let reply = expect_reply(link, &Request::ImageNotify(header.notify(options.force)))?;
    if !matches!(reply, Response::ImageNotify { .. }) {
        return Err(failure("Image Notify", &reply));
    }

    let reply = expect_reply(link, &Request::ImageInfo(header.image_info()))?;
    let Response::ImageInfo {
        option,
        section_id,
        page_no,
        page_size,
        ..
    } = reply
    else {
        return Err(failure("Image Info", &reply));
    };
    let start = SectionId::from_id(section_id)
        .with_context(|| format!("Target resumes at unknown section {}", section_id))?;
    if option == ImageOption::Resume {
        println!("Resuming at section {}, page {}", section_id, page_no);
    }

    send_sections(link, package, start, page_no, usize::from(page_size))?;

    let reply = expect_reply(link, &Request::ImageEnd(header.image_end()))?;
    if !matches!(reply, Response::ImageEnd(_)) {
        return Err(failure("Image End", &reply));
    }
    println!("Image verified by target");

    if !options.switch {
        println!("Not switching; upload again without --no-switch to activate it.");
        return Ok(false);
    }
    let reply = expect_reply(
        link,
        &Request::ImageSwitch {
            total_sections: header.total_sections(),
            fw_version: header.fw_version,
        },
    )?;
    if !matches!(reply, Response::ImageSwitch { .. }) {
        return Err(failure("Image Switch", &reply));
    }
    println!("Target switched to {} and restarts now.", header.fw_version);
    Ok(true)
}

/// Send every page from `start`/`first_page` on, closing each section.
fn send_sections<L: Link>(
    link: &mut L,
    package: &Package,
    start: SectionId,
    first_page: u16,
    page_size: usize,
) -> Result<()> {
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        bail!("Target asked for unsupported page size {}", page_size);
    }

    let done: usize = package.blobs.iter().take(start.index()).map(Vec::len).sum::<usize>()
        + package
            .blobs
            .get(start.index())
            .map_or(0, |blob| blob.len().min(usize::from(first_page) * page_size));

    let pb = ProgressBar::new(u64::from(package.header.total_size));
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("#>-"),
    );
    pb.set_position(done as u64);

    for (section, blob) in SectionId::ALL
        .iter()
        .zip(&package.blobs)
        .skip(start.index())
    {
        let skip = if *section == start {
            usize::from(first_page)
        } else {
            0
        };
        for (n, chunk) in blob.chunks(page_size).enumerate().skip(skip) {
            let page_no = u16::try_from(n).context("Section has too many pages")?;
            let data = PageBuf::from_slice(chunk)
                .map_err(|_| anyhow!("Page of {} bytes too large", chunk.len()))?;
            let reply = expect_reply(
                link,
                &Request::PageData(PageData {
                    section_id: section.id(),
                    page_no,
                    data,
                }),
            )?;
            if !matches!(reply, Response::PageData { .. }) {
                pb.abandon();
                return Err(failure(
                    &format!("Page {} of section {}", page_no, section.id()),
                    &reply,
                ));
            }
            pb.inc(chunk.len() as u64);
        }

        let reply = expect_reply(
            link,
            &Request::SectionEnd {
                section_id: section.id(),
            },
        )?;
        if !matches!(reply, Response::SectionEnd { .. }) {
            pb.abandon();
            return Err(failure(&format!("Section {} check", section.id()), &reply))
                .context("The target discarded the section; run upload again to resend it");
        }
    }

    pb.finish_with_message("Download complete");
    Ok(())
}

// =============================================================================
// Flash images
// =============================================================================

/// Erased flash with a layout header and factory metadata for `device`.
pub fn format_flash(options: &FormatOptions, device: &DeviceInfo) -> Result<FileFlash> {
    let mut flash = FileFlash::blank(options.flash_size)?;
    let layout = FlashLayout::with_image_sizes(
        options.flash_size,
        options.page_size,
        options.metadata_addr,
        options.image_sizes,
    )
    .context("Invalid flash layout")?;
    layout
        .write_header(&mut flash, LAYOUT_ADDR)
        .context("Failed to write layout header")?;

    let driver = FlashDriver::open(flash, LAYOUT_ADDR)?;
    let mut manager = FlashManager::new(driver);
    manager
        .provision(device)
        .context("Failed to write factory metadata")?;
    Ok(manager.release())
}

pub fn format(output: &Path, options: &FormatOptions, device: &DeviceInfo) -> Result<()> {
    let flash = format_flash(options, device)?;
    flash.save(output)?;

    println!(
        "Wrote {} ({} bytes, page {} bytes, metadata at 0x{:x})",
        output.display(),
        options.flash_size,
        options.page_size,
        options.metadata_addr
    );
    let layout = FlashLayout::with_image_sizes(
        options.flash_size,
        options.page_size,
        options.metadata_addr,
        options.image_sizes,
    )?;
    for (section, name) in layout.sections().iter().zip(SECTION_NAMES) {
        println!(
            "  Section {} ({:<6}) 0x{:08x}..0x{:08x}, {} bytes per image",
            section.id.id(),
            name,
            section.start,
            section.end(),
            section.half_size()
        );
    }
    print_device(device);
    Ok(())
}

/// Update an in-process target whose flash lives in `flash_path`, then reboot it.
pub fn simulate(flash_path: &Path, package_path: &Path, options: UploadOptions) -> Result<()> {
    let package = Package::load(package_path)?;
    let config = OtauConfig::new(LAYOUT_ADDR);
    let mut link = LoopbackLink::boot(FileFlash::load(flash_path)?, config)?;

    let result = upload(&mut link, &package, options);
    let restarted = link.restarted();
    // keep partial progress so the next run can resume
    let flash = link.shutdown();
    flash.save(flash_path)?;
    result?;

    println!();
    if restarted {
        println!("Rebooting target...");
    }
    let mut link = LoopbackLink::boot(flash, config)?;
    let info = link.flash().device_info()?;
    let halves = link.flash().running_halves();
    println!("Running:  {}", info.fw_version);
    println!(
        "Halves:   {}",
        SECTION_NAMES
            .iter()
            .zip(halves)
            .map(|(name, half)| format!("{}={:?}", name, half))
            .collect::<Vec<_>>()
            .join(", ")
    );
    link.shutdown().save(flash_path)
}

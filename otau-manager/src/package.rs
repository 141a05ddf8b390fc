// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware package builder and reader.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

use otau_common::crc::{self, Crc32Stream};
use otau_common::package::{PackageHeader, PackageSection, MAX_PACKAGE_HEADER_SIZE};
use otau_common::protocol::SectionDescriptor;
use otau_common::{FirmwareVersion, HardwareVersion, SectionId, TOTAL_SECTIONS};

/// Erased version and CRC words, stamped by the target at switch time.
const ERASED_WORD: [u8; 4] = [0xFF; 4];

/// Version word, size word and CRC word around each section payload.
pub const SECTION_OVERHEAD: usize = 12;

/// Who the image is for and what it claims to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub product_id: u16,
    pub vendor_id: u16,
    pub fw_version: FirmwareVersion,
    pub hw_version: HardwareVersion,
    pub hw_revision: u8,
    pub security_level: u8,
}

/// Wrap a raw section binary into its on-flash form.
pub fn wrap_section(payload: &[u8]) -> Result<Vec<u8>> {
    let size = u32::try_from(payload.len()).context("Section payload too large")?;
    let mut blob = Vec::with_capacity(payload.len() + SECTION_OVERHEAD);
    blob.extend_from_slice(&ERASED_WORD);
    blob.extend_from_slice(&size.to_le_bytes());
    blob.extend_from_slice(payload);
    blob.extend_from_slice(&ERASED_WORD);
    Ok(blob)
}

/// Header plus one on-flash blob per section, in section order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub header: PackageHeader,
    pub blobs: Vec<Vec<u8>>,
}

impl Package {
    /// Build a package from raw section binaries, patch section first.
    pub fn build(identity: &Identity, payloads: &[Vec<u8>]) -> Result<Self> {
        if payloads.is_empty() || payloads.len() > TOTAL_SECTIONS {
            bail!(
                "A package holds 1 to {} sections, got {}",
                TOTAL_SECTIONS,
                payloads.len()
            );
        }

        let mut sections = heapless::Vec::new();
        let mut blobs = Vec::with_capacity(payloads.len());
        let mut total = Crc32Stream::new();
        let mut total_size = 0u32;
        for (section, payload) in SectionId::ALL.iter().zip(payloads) {
            let blob = wrap_section(payload)?;
            let size = blob.len() as u32;
            total.update(&blob);
            total_size = total_size
                .checked_add(size)
                .context("Package larger than 4 GiB")?;
            sections
                .push(PackageSection {
                    descriptor: SectionDescriptor {
                        id: section.id(),
                        size,
                        start_address: 0,
                    },
                    crc: crc::checksum(&blob),
                })
                .map_err(|_| anyhow::anyhow!("Too many sections"))?;
            blobs.push(blob);
        }

        Ok(Self {
            header: PackageHeader {
                product_id: identity.product_id,
                vendor_id: identity.vendor_id,
                fw_version: identity.fw_version,
                hw_version: identity.hw_version,
                hw_revision: identity.hw_revision,
                security_level: identity.security_level,
                sections,
                total_size,
                total_crc: total.value(),
            },
            blobs,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut header = [0u8; MAX_PACKAGE_HEADER_SIZE];
        let len = self
            .header
            .encode(&mut header)
            .context("Failed to encode package header")?;
        let mut bytes = header[..len].to_vec();
        for blob in &self.blobs {
            bytes.extend_from_slice(blob);
        }
        Ok(bytes)
    }

    /// Parse a package and check every section CRC against its header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (header, payload) =
            PackageHeader::decode(bytes).context("Invalid package header")?;
        let blobs: Vec<Vec<u8>> = header
            .blobs(payload)
            .context("Package payload does not match its header")?
            .iter()
            .map(|blob| blob.to_vec())
            .collect();

        let mut total = Crc32Stream::new();
        for (section, blob) in header.sections.iter().zip(&blobs) {
            let actual = crc::checksum(blob);
            if actual != section.crc {
                bail!(
                    "Section {} CRC mismatch: header 0x{:08x}, data 0x{:08x}",
                    section.descriptor.id,
                    section.crc,
                    actual
                );
            }
            total.update(blob);
        }
        if total.value() != header.total_crc {
            bail!("Package CRC mismatch");
        }
        Ok(Self { header, blobs })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_bytes(&bytes).with_context(|| format!("{} is not a valid package", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_bytes()?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

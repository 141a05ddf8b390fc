// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware package: what a host tool feeds to the update manager.
//!
//! ```text
//! "OTAP" | header length u16 LE | postcard(PackageHeader) | section blobs...
//! ```
//!
//! Each section blob is already in on-flash form (version word, size word,
//! payload, CRC word) and is sent page by page as is.

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::protocol::{
    FirmwareVersion, HardwareVersion, ImageEnd, ImageInfo, ImageNotify, SectionDescriptor,
    TOTAL_SECTIONS,
};

pub const PACKAGE_MAGIC: [u8; 4] = *b"OTAP";

/// Magic plus length field.
pub const PACKAGE_PREFIX_SIZE: usize = 6;

/// Upper bound of an encoded header, prefix included.
pub const MAX_PACKAGE_HEADER_SIZE: usize = 160;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageSection {
    pub descriptor: SectionDescriptor,
    /// CRC-32 of the blob as stored in the package.
    pub crc: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PackageHeader {
    pub product_id: u16,
    pub vendor_id: u16,
    pub fw_version: FirmwareVersion,
    pub hw_version: HardwareVersion,
    pub hw_revision: u8,
    pub security_level: u8,
    pub sections: heapless::Vec<PackageSection, TOTAL_SECTIONS>,
    pub total_size: u32,
    /// CRC-32 chained over every blob in order.
    pub total_crc: u32,
}

impl PackageHeader {
    pub fn total_sections(&self) -> u8 {
        self.sections.len() as u8
    }

    /// Write prefix and header into `buf`, returning the bytes used.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        if buf.len() < PACKAGE_PREFIX_SIZE {
            return Err(CodecError::BufferTooSmall);
        }
        let (prefix, body) = buf.split_at_mut(PACKAGE_PREFIX_SIZE);
        let len = postcard::to_slice(self, body)
            .map_err(|_| CodecError::Serialization)?
            .len();
        prefix[..4].copy_from_slice(&PACKAGE_MAGIC);
        prefix[4..].copy_from_slice(&(len as u16).to_le_bytes());
        Ok(PACKAGE_PREFIX_SIZE + len)
    }

    /// Parse the header, returning it and the section blobs that follow.
    pub fn decode(bytes: &[u8]) -> Result<(Self, &[u8]), CodecError> {
        let prefix = bytes
            .get(..PACKAGE_PREFIX_SIZE)
            .ok_or(CodecError::Truncated)?;
        if prefix[..4] != PACKAGE_MAGIC {
            return Err(CodecError::InvalidField);
        }
        let len = usize::from(u16::from_le_bytes([prefix[4], prefix[5]]));
        let body = bytes
            .get(PACKAGE_PREFIX_SIZE..PACKAGE_PREFIX_SIZE + len)
            .ok_or(CodecError::Truncated)?;
        let (header, rest) =
            postcard::take_from_bytes::<Self>(body).map_err(|_| CodecError::Serialization)?;
        if !rest.is_empty() {
            return Err(CodecError::TrailingBytes(rest.len()));
        }
        Ok((header, &bytes[PACKAGE_PREFIX_SIZE + len..]))
    }

    /// Split the bytes after the header into one blob per section.
    pub fn blobs<'a>(
        &self,
        mut payload: &'a [u8],
    ) -> Result<heapless::Vec<&'a [u8], TOTAL_SECTIONS>, CodecError> {
        let mut blobs = heapless::Vec::new();
        for section in &self.sections {
            let size = section.descriptor.size as usize;
            if payload.len() < size {
                return Err(CodecError::Truncated);
            }
            let (blob, rest) = payload.split_at(size);
            // sections.len() <= TOTAL_SECTIONS
            let _ = blobs.push(blob);
            payload = rest;
        }
        if !payload.is_empty() {
            return Err(CodecError::TrailingBytes(payload.len()));
        }
        Ok(blobs)
    }

    pub fn notify(&self, force: bool) -> ImageNotify {
        ImageNotify {
            force,
            product_id: self.product_id,
            vendor_id: self.vendor_id,
            total_sections: self.total_sections(),
            fw_version: self.fw_version,
            hw_version: self.hw_version,
            hw_revision: self.hw_revision,
            security_level: self.security_level,
        }
    }

    pub fn image_info(&self) -> ImageInfo {
        let mut sections = [SectionDescriptor::default(); TOTAL_SECTIONS];
        let mut section_crcs = [0; TOTAL_SECTIONS];
        for (i, section) in self.sections.iter().enumerate() {
            sections[i] = section.descriptor;
            section_crcs[i] = section.crc;
        }
        ImageInfo {
            total_sections: self.total_sections(),
            total_size: self.total_size,
            sections,
            total_crc: self.total_crc,
            section_crcs,
        }
    }

    pub fn image_end(&self) -> ImageEnd {
        ImageEnd {
            total_sections: self.total_sections(),
            total_size: self.total_size,
            total_crc: self.total_crc,
        }
    }
}

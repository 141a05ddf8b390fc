// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Persisted metadata record (80 bytes, CRC protected).
//!
//! ```text
//! off size
//!   0    2  length (= 78)
//!   2    1  slot id (0 = current, 1 = incoming)
//!   3   12  device info
//!  15    1  security level
//!  16    4  section image identity, one nibble per section (1 = bottom half)
//!  20    4  total size
//!  24   24  3 x section descriptor {id u8, size u24, start u32}
//!  48   16  total, patch, header and app CRC-32
//!  64   12  3 x download progress {id u8, downloaded u24}
//!  76    4  CRC-32 over bytes 0..76
//! ```

use crate::codec::{Reader, Writer};
use crate::crc;
use crate::error::CodecError;
use crate::layout::Half;
use crate::protocol::{
    DeviceInfo, ImageInfo, ImageNotify, SectionDescriptor, SectionId, TOTAL_SECTIONS,
};

pub const METADATA_RECORD_SIZE: usize = 80;

/// Value of the length field: the record minus the field itself.
pub const METADATA_LENGTH: u16 = (METADATA_RECORD_SIZE - 2) as u16;

const CRC_OFFSET: usize = METADATA_RECORD_SIZE - 4;

/// Which image a metadata slot describes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotRole {
    Current = 0,
    Incoming = 1,
}

impl SlotRole {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Current),
            1 => Some(Self::Incoming),
            _ => None,
        }
    }

    pub const fn other(self) -> Self {
        match self {
            Self::Current => Self::Incoming,
            Self::Incoming => Self::Current,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DownloadProgress {
    pub section_id: u8,
    pub downloaded: u32,
}

/// Where an interrupted download picks up again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResumePoint {
    pub section: SectionId,
    pub page_no: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MetadataRecord {
    pub role: SlotRole,
    /// `device.total_sections` is zero until Image Info has been accepted.
    pub device: DeviceInfo,
    pub security_level: u8,
    pub halves: [Half; TOTAL_SECTIONS],
    pub total_size: u32,
    pub sections: [SectionDescriptor; TOTAL_SECTIONS],
    pub total_crc: u32,
    pub section_crcs: [u32; TOTAL_SECTIONS],
    pub progress: [DownloadProgress; TOTAL_SECTIONS],
}

impl MetadataRecord {
    /// First-boot record: the current slot uses the top halves, the incoming slot the bottom ones.
    pub fn factory(role: SlotRole, device: DeviceInfo) -> Self {
        let half = match role {
            SlotRole::Current => Half::Top,
            SlotRole::Incoming => Half::Bottom,
        };
        Self {
            role,
            device: DeviceInfo {
                total_sections: 0,
                ..device
            },
            security_level: 0,
            halves: [half; TOTAL_SECTIONS],
            total_size: 0,
            sections: [SectionDescriptor::default(); TOTAL_SECTIONS],
            total_crc: 0,
            section_crcs: [0; TOTAL_SECTIONS],
            progress: [DownloadProgress::default(); TOTAL_SECTIONS],
        }
    }

    pub fn total_sections(&self) -> u8 {
        self.device.total_sections
    }

    /// Sections covered by the image, in download order.
    pub fn declared_sections(&self) -> impl Iterator<Item = SectionId> {
        let count = usize::from(self.device.total_sections).min(TOTAL_SECTIONS);
        SectionId::ALL.into_iter().take(count)
    }

    pub fn half(&self, section: SectionId) -> Half {
        self.halves[section.index()]
    }

    pub fn descriptor(&self, section: SectionId) -> &SectionDescriptor {
        &self.sections[section.index()]
    }

    pub fn section_crc(&self, section: SectionId) -> u32 {
        self.section_crcs[section.index()]
    }

    pub fn downloaded(&self, section: SectionId) -> u32 {
        self.progress[section.index()].downloaded
    }

    pub fn is_section_complete(&self, section: SectionId) -> bool {
        let size = self.descriptor(section).size;
        size != 0 && self.downloaded(section) == size
    }

    pub fn is_download_complete(&self) -> bool {
        self.total_sections() > 0 && self.declared_sections().all(|s| self.is_section_complete(s))
    }

    /// First incomplete section and the page to continue from, if any.
    pub fn resume_point(&self, page_size: u32) -> Option<ResumePoint> {
        let section = self
            .declared_sections()
            .find(|s| !self.is_section_complete(*s))?;
        let page_no = self.downloaded(section) / page_size.max(1);
        Some(ResumePoint {
            section,
            page_no: u16::try_from(page_no).ok()?,
        })
    }

    /// Whole-number download progress of one section.
    pub fn percent(&self, section: SectionId) -> u8 {
        let size = u64::from(self.descriptor(section).size);
        if size == 0 {
            return 0;
        }
        (u64::from(self.downloaded(section)) * 100 / size) as u8
    }

    /// Forget any previous download and record the image being offered.
    pub fn start_image(&mut self, running: &DeviceInfo, notify: &ImageNotify) {
        self.device = DeviceInfo {
            product_id: notify.product_id,
            vendor_id: notify.vendor_id,
            total_sections: 0,
            fw_version: notify.fw_version,
            hw_version: running.hw_version,
            hw_revision: running.hw_revision,
        };
        self.security_level = notify.security_level;
        self.total_size = 0;
        self.sections = [SectionDescriptor::default(); TOTAL_SECTIONS];
        self.total_crc = 0;
        self.section_crcs = [0; TOTAL_SECTIONS];
        self.progress = [DownloadProgress::default(); TOTAL_SECTIONS];
    }

    /// Record the image's section table with zeroed progress.
    pub fn accept_image_info(&mut self, info: &ImageInfo) {
        self.device.total_sections = info.total_sections;
        self.total_size = info.total_size;
        self.sections = info.sections;
        self.total_crc = info.total_crc;
        self.section_crcs = info.section_crcs;
        self.progress = [0, 1, 2].map(|i| DownloadProgress {
            section_id: info.sections[i].id,
            downloaded: 0,
        });
    }

    /// The stored section table is the one `info` describes.
    pub fn matches_image_info(&self, info: &ImageInfo) -> bool {
        self.total_sections() == info.total_sections
            && self.total_size == info.total_size
            && self.total_crc == info.total_crc
            && self.declared_sections().all(|s| {
                self.sections[s.index()].size == info.sections[s.index()].size
                    && self.section_crcs[s.index()] == info.section_crcs[s.index()]
            })
    }

    pub fn encode(&self) -> Result<[u8; METADATA_RECORD_SIZE], CodecError> {
        let mut buf = [0u8; METADATA_RECORD_SIZE];
        let mut w = Writer::new(&mut buf);
        w.put_u16(METADATA_LENGTH)?;
        w.put_u8(self.role as u8)?;
        w.put(&self.device)?;
        w.put_u8(self.security_level)?;
        w.put_u32(encode_halves(&self.halves))?;
        w.put_u32(self.total_size)?;
        for section in &self.sections {
            w.put(section)?;
        }
        w.put_u32(self.total_crc)?;
        for crc in self.section_crcs {
            w.put_u32(crc)?;
        }
        for p in &self.progress {
            w.put_u8(p.section_id)?;
            w.put_u24(p.downloaded)?;
        }
        let crc = crc::checksum(&buf[..CRC_OFFSET]);
        buf[CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decode and validate length field, CRC and enumerations.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let bytes = bytes
            .get(..METADATA_RECORD_SIZE)
            .ok_or(CodecError::Truncated)?;
        let mut r = Reader::new(bytes);
        let declared = r.u16()?;
        if declared != METADATA_LENGTH {
            return Err(CodecError::LengthMismatch {
                declared,
                actual: METADATA_RECORD_SIZE - 2,
            });
        }
        let expected = crc::checksum(&bytes[..CRC_OFFSET]);
        let stored = u32::from_le_bytes([
            bytes[CRC_OFFSET],
            bytes[CRC_OFFSET + 1],
            bytes[CRC_OFFSET + 2],
            bytes[CRC_OFFSET + 3],
        ]);
        if stored != expected {
            return Err(CodecError::BadCrc {
                expected,
                actual: stored,
            });
        }

        let role = SlotRole::from_u8(r.u8()?).ok_or(CodecError::InvalidField)?;
        let device = r.read()?;
        let security_level = r.u8()?;
        let halves = decode_halves(r.u32()?).ok_or(CodecError::InvalidField)?;
        let total_size = r.u32()?;
        let sections = [r.read()?, r.read()?, r.read()?];
        let total_crc = r.u32()?;
        let section_crcs = [r.u32()?, r.u32()?, r.u32()?];
        let mut progress = [DownloadProgress::default(); TOTAL_SECTIONS];
        for p in &mut progress {
            p.section_id = r.u8()?;
            p.downloaded = r.u24()?;
        }
        Ok(Self {
            role,
            device,
            security_level,
            halves,
            total_size,
            sections,
            total_crc,
            section_crcs,
            progress,
        })
    }
}

/// Pack one nibble per section, section 1 in the lowest nibble.
pub fn encode_halves(halves: &[Half; TOTAL_SECTIONS]) -> u32 {
    halves
        .iter()
        .enumerate()
        .fold(0, |word, (i, half)| word | (*half as u32) << (4 * i))
}

/// Bits above the section nibbles are ignored.
pub fn decode_halves(word: u32) -> Option<[Half; TOTAL_SECTIONS]> {
    let nibble = |i: usize| Half::from_bit((word >> (4 * i)) & 0xF);
    Some([nibble(0)?, nibble(1)?, nibble(2)?])
}

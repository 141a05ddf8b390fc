// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Versioned flash layout header.
//!
//! The header sits in its own sector and describes the page size, the
//! metadata region and the geometry of the three image sections. Sections are
//! packed back to back right after the metadata region; each one holds two
//! images of equal size, the top half and the bottom half.
//!
//! ```text
//! header sector | metadata (>= 4 sectors) | patch [top|bottom] | header [top|bottom] | app [top|bottom]
//! ```

use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

use crate::codec::{Reader, Writer};
use crate::crc;
use crate::error::{CodecError, FlashError, LayoutError};
use crate::protocol::{SectionId, MAX_PAGE_SIZE, TOTAL_SECTIONS};

pub const FLASH_SECTOR_SIZE: u32 = 4096;

pub const LAYOUT_MAGIC: u32 = u32::from_le_bytes(*b"OTAL");
pub const LAYOUT_VERSION: u8 = 1;

/// Two metadata slots' primary sector, its backup, and scratch space.
pub const MIN_METADATA_SECTORS: u32 = 4;

/// One running image and one receiving image per section.
pub const IMAGES_PER_SECTION: u8 = 2;

/// Smallest page that still holds a whole metadata record.
pub const MIN_PAGE_SIZE: u32 = 128;

const SECTION_ENTRY_SIZE: usize = 8;
const HEADER_BODY_SIZE: usize = 4 + 1 + 1 + 2 + 4 + 4 + 4 + TOTAL_SECTIONS * SECTION_ENTRY_SIZE;
pub const LAYOUT_HEADER_SIZE: usize = HEADER_BODY_SIZE + 4;

/// Which of a section's two images.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Half {
    Top = 0,
    Bottom = 1,
}

impl Half {
    pub const fn other(self) -> Self {
        match self {
            Self::Top => Self::Bottom,
            Self::Bottom => Self::Top,
        }
    }

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn from_bit(bit: u32) -> Option<Self> {
        match bit {
            0 => Some(Self::Top),
            1 => Some(Self::Bottom),
            _ => None,
        }
    }
}

/// Physical address range of one half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HalfRange {
    pub start: u32,
    pub len: u32,
}

impl HalfRange {
    pub const fn end(&self) -> u32 {
        self.start + self.len
    }
}

/// Section geometry as recorded in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SectionGeometry {
    pub id: u8,
    pub image_count: u8,
    pub page_count: u16,
    /// Size of one image (one half).
    pub image_size: u32,
}

impl SectionGeometry {
    /// Geometry for a section whose image spans `image_size` bytes.
    pub fn new(id: SectionId, image_size: u32, page_size: u32) -> Self {
        Self {
            id: id.id(),
            image_count: IMAGES_PER_SECTION,
            page_count: u16::try_from(image_size / page_size.max(1)).unwrap_or(u16::MAX),
            image_size,
        }
    }
}

/// A section's resolved placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SectionLayout {
    pub id: SectionId,
    pub start: u32,
    pub page_count: u16,
    halves: [HalfRange; 2],
}

impl SectionLayout {
    pub fn half(&self, half: Half) -> HalfRange {
        self.halves[half.index()]
    }

    pub fn half_size(&self) -> u32 {
        self.halves[0].len
    }

    /// One past the last byte of the section.
    pub fn end(&self) -> u32 {
        self.halves[1].end()
    }

    pub fn size(&self) -> u32 {
        self.end() - self.start
    }

    pub fn contains(&self, addr: u32, len: u32) -> bool {
        range_within(addr, len, self.start, self.end())
    }
}

pub(crate) fn range_within(addr: u32, len: u32, start: u32, end: u32) -> bool {
    match addr.checked_add(len) {
        Some(last) => addr >= start && last <= end,
        None => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashLayout {
    pub flash_size: u32,
    pub page_size: u32,
    pub metadata_addr: u32,
    pub metadata_size: u32,
    sections: [SectionLayout; TOTAL_SECTIONS],
}

impl FlashLayout {
    /// Resolve and validate a layout.
    pub fn new(
        flash_size: u32,
        page_size: u32,
        metadata_addr: u32,
        metadata_size: u32,
        geometry: [SectionGeometry; TOTAL_SECTIONS],
    ) -> Result<Self, LayoutError> {
        if !page_size.is_power_of_two()
            || page_size < MIN_PAGE_SIZE
            || page_size > MAX_PAGE_SIZE as u32
        {
            return Err(LayoutError::PageSize(page_size));
        }
        if metadata_addr % FLASH_SECTOR_SIZE != 0
            || metadata_size % FLASH_SECTOR_SIZE != 0
            || metadata_size < MIN_METADATA_SECTORS * FLASH_SECTOR_SIZE
        {
            return Err(LayoutError::MetadataRegion);
        }

        let mut next = metadata_addr
            .checked_add(metadata_size)
            .ok_or(LayoutError::MetadataRegion)?;
        let mut sections = [SectionLayout {
            id: SectionId::Patch,
            start: 0,
            page_count: 0,
            halves: [HalfRange { start: 0, len: 0 }; 2],
        }; TOTAL_SECTIONS];

        for (slot, (id, geo)) in sections
            .iter_mut()
            .zip(SectionId::ALL.into_iter().zip(geometry))
        {
            let bad = LayoutError::Section(geo.id);
            if geo.id != id.id()
                || geo.image_count != IMAGES_PER_SECTION
                || geo.image_size == 0
                || geo.image_size % FLASH_SECTOR_SIZE != 0
                || u32::from(geo.page_count) * page_size != geo.image_size
            {
                return Err(bad);
            }
            let start = next;
            let middle = start.checked_add(geo.image_size).ok_or(bad)?;
            next = middle.checked_add(geo.image_size).ok_or(bad)?;
            *slot = SectionLayout {
                id,
                start,
                page_count: geo.page_count,
                halves: [
                    HalfRange {
                        start,
                        len: geo.image_size,
                    },
                    HalfRange {
                        start: middle,
                        len: geo.image_size,
                    },
                ],
            };
        }

        if next > flash_size {
            return Err(LayoutError::Capacity {
                required: next,
                available: flash_size,
            });
        }

        Ok(Self {
            flash_size,
            page_size,
            metadata_addr,
            metadata_size,
            sections,
        })
    }

    /// Layout with the minimum metadata region and sections of the given image sizes.
    pub fn with_image_sizes(
        flash_size: u32,
        page_size: u32,
        metadata_addr: u32,
        image_sizes: [u32; TOTAL_SECTIONS],
    ) -> Result<Self, LayoutError> {
        let geometry = [0, 1, 2].map(|i| {
            SectionGeometry::new(SectionId::ALL[i], image_sizes[i], page_size)
        });
        Self::new(
            flash_size,
            page_size,
            metadata_addr,
            MIN_METADATA_SECTORS * FLASH_SECTOR_SIZE,
            geometry,
        )
    }

    pub fn section(&self, id: SectionId) -> &SectionLayout {
        &self.sections[id.index()]
    }

    pub fn sections(&self) -> &[SectionLayout; TOTAL_SECTIONS] {
        &self.sections
    }

    pub fn metadata_end(&self) -> u32 {
        self.metadata_addr + self.metadata_size
    }

    /// Largest image the device can take.
    pub fn capacity(&self) -> u32 {
        self.flash_size
    }

    /// `addr` lies outside the metadata region and every section.
    pub fn is_free_sector(&self, addr: u32) -> bool {
        let overlaps = |start: u32, end: u32| addr < end && addr + FLASH_SECTOR_SIZE > start;
        addr % FLASH_SECTOR_SIZE == 0
            && range_within(addr, FLASH_SECTOR_SIZE, 0, self.flash_size)
            && !overlaps(self.metadata_addr, self.metadata_end())
            && !self.sections.iter().any(|s| overlaps(s.start, s.end()))
    }

    pub fn encode_header(&self) -> Result<[u8; LAYOUT_HEADER_SIZE], CodecError> {
        let mut buf = [0u8; LAYOUT_HEADER_SIZE];
        let mut w = Writer::new(&mut buf);
        w.put_u32(LAYOUT_MAGIC)?;
        w.put_u8(LAYOUT_VERSION)?;
        w.put_u8(TOTAL_SECTIONS as u8)?;
        w.put_u16(self.page_size as u16)?;
        w.put_u32(self.flash_size)?;
        w.put_u32(self.metadata_addr)?;
        w.put_u32(self.metadata_size)?;
        for s in &self.sections {
            w.put_u8(s.id.id())?;
            w.put_u8(IMAGES_PER_SECTION)?;
            w.put_u16(s.page_count)?;
            w.put_u32(s.half_size())?;
        }
        let crc = crc::checksum(&buf[..HEADER_BODY_SIZE]);
        buf[HEADER_BODY_SIZE..].copy_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    pub fn decode_header(bytes: &[u8]) -> Result<Self, LayoutError> {
        let body = bytes.get(..HEADER_BODY_SIZE).ok_or(LayoutError::BadCrc)?;
        let mut r = Reader::new(bytes);
        let magic = r.u32().map_err(|_| LayoutError::BadCrc)?;
        if magic != LAYOUT_MAGIC {
            return Err(LayoutError::BadMagic(magic));
        }
        Self::decode_body(&mut r, body).map_err(|e| match e {
            HeaderFault::Layout(e) => e,
            HeaderFault::Codec(_) => LayoutError::BadCrc,
        })
    }

    fn decode_body(r: &mut Reader<'_>, body: &[u8]) -> Result<Self, HeaderFault> {
        let version = r.u8()?;
        if version != LAYOUT_VERSION {
            return Err(LayoutError::UnsupportedVersion(version).into());
        }
        let count = r.u8()?;
        let page_size = u32::from(r.u16()?);
        let flash_size = r.u32()?;
        let metadata_addr = r.u32()?;
        let metadata_size = r.u32()?;
        let mut geometry = [SectionGeometry {
            id: 0,
            image_count: 0,
            page_count: 0,
            image_size: 0,
        }; TOTAL_SECTIONS];
        for geo in &mut geometry {
            *geo = SectionGeometry {
                id: r.u8()?,
                image_count: r.u8()?,
                page_count: r.u16()?,
                image_size: r.u32()?,
            };
        }
        let stored = r.u32()?;
        if stored != crc::checksum(body) {
            return Err(LayoutError::BadCrc.into());
        }
        if usize::from(count) != TOTAL_SECTIONS {
            return Err(LayoutError::SectionCount(count).into());
        }
        Ok(Self::new(
            flash_size,
            page_size,
            metadata_addr,
            metadata_size,
            geometry,
        )?)
    }

    /// Read and validate the header stored at `addr`.
    pub fn read_header<F: ReadNorFlash>(flash: &mut F, addr: u32) -> Result<Self, LayoutError> {
        let mut buf = [0u8; 2 * LAYOUT_HEADER_SIZE];
        let len = round_up(LAYOUT_HEADER_SIZE, F::READ_SIZE).min(buf.len());
        flash
            .read(addr, &mut buf[..len])
            .map_err(FlashError::device)?;
        let layout = Self::decode_header(&buf[..LAYOUT_HEADER_SIZE])?;
        if !layout.is_free_sector(addr - addr % FLASH_SECTOR_SIZE) {
            return Err(LayoutError::MetadataRegion);
        }
        Ok(layout)
    }

    /// Erase the sector at `addr` and store this layout's header there.
    pub fn write_header<F: NorFlash>(&self, flash: &mut F, addr: u32) -> Result<(), LayoutError> {
        if !self.is_free_sector(addr) {
            return Err(LayoutError::MetadataRegion);
        }
        let header = self.encode_header().map_err(|_| LayoutError::BadCrc)?;
        let mut buf = [0xFFu8; 2 * LAYOUT_HEADER_SIZE];
        buf[..LAYOUT_HEADER_SIZE].copy_from_slice(&header);
        let len = round_up(LAYOUT_HEADER_SIZE, F::WRITE_SIZE);
        if len > buf.len() {
            return Err(LayoutError::Granularity);
        }
        flash
            .erase(addr, addr + FLASH_SECTOR_SIZE)
            .map_err(FlashError::device)?;
        flash
            .write(addr, &buf[..len])
            .map_err(FlashError::device)?;
        Ok(())
    }
}

enum HeaderFault {
    Layout(LayoutError),
    Codec(CodecError),
}

impl From<LayoutError> for HeaderFault {
    fn from(e: LayoutError) -> Self {
        Self::Layout(e)
    }
}

impl From<CodecError> for HeaderFault {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

pub(crate) fn round_up(len: usize, unit: usize) -> usize {
    match unit {
        0 | 1 => len,
        _ => len.div_ceil(unit) * unit,
    }
}

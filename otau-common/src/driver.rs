// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash interface driver.
//!
//! Owns the `NorFlash` device and the layout read from its header. Every
//! access names the region it targets and is checked against that region's
//! bounds before it reaches the device; reads and writes stay within one page.

use embedded_storage::nor_flash::NorFlash;

use crate::error::{FlashError, LayoutError};
use crate::layout::{range_within, round_up, FlashLayout, FLASH_SECTOR_SIZE};
use crate::protocol::{SectionId, MAX_PAGE_SIZE};

/// Region an access belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Region {
    Metadata,
    Section(SectionId),
}

impl Region {
    pub fn section(id: u8) -> Result<Self, FlashError> {
        SectionId::from_id(id)
            .map(Self::Section)
            .ok_or(FlashError::UnknownSection(id))
    }
}

pub struct FlashDriver<F> {
    flash: F,
    layout: FlashLayout,
}

impl<F: NorFlash> FlashDriver<F> {
    /// Discover the layout from the header at `layout_addr`.
    pub fn open(mut flash: F, layout_addr: u32) -> Result<Self, LayoutError> {
        let layout = FlashLayout::read_header(&mut flash, layout_addr)?;
        #[cfg(feature = "defmt")]
        defmt::info!(
            "flash layout: page {} bytes, metadata at {=u32:#x}",
            layout.page_size,
            layout.metadata_addr
        );
        Self::new(flash, layout)
    }

    /// Drive `flash` with an already known layout.
    pub fn new(flash: F, layout: FlashLayout) -> Result<Self, LayoutError> {
        let page = layout.page_size as usize;
        if page % F::WRITE_SIZE != 0
            || page % F::READ_SIZE != 0
            || F::ERASE_SIZE == 0
            || FLASH_SECTOR_SIZE as usize % F::ERASE_SIZE != 0
        {
            return Err(LayoutError::Granularity);
        }
        if layout.flash_size as usize > flash.capacity() {
            return Err(LayoutError::Capacity {
                required: layout.flash_size,
                available: flash.capacity() as u32,
            });
        }
        Ok(Self { flash, layout })
    }

    pub fn layout(&self) -> &FlashLayout {
        &self.layout
    }

    pub fn page_size(&self) -> u32 {
        self.layout.page_size
    }

    pub fn release(self) -> F {
        self.flash
    }

    fn bounds(&self, region: Region) -> (u32, u32) {
        match region {
            Region::Metadata => (self.layout.metadata_addr, self.layout.metadata_end()),
            Region::Section(id) => {
                let section = self.layout.section(id);
                (section.start, section.end())
            }
        }
    }

    fn check_page_access(&self, region: Region, addr: u32, len: usize) -> Result<u32, FlashError> {
        let len = u32::try_from(len).map_err(|_| FlashError::PageOverrun {
            addr,
            len: u32::MAX,
        })?;
        let (start, end) = self.bounds(region);
        if !range_within(addr, len, start, end) {
            #[cfg(feature = "defmt")]
            defmt::warn!("rejected {} bytes at {=u32:#x} in {}", len, addr, region);
            return Err(FlashError::OutOfBounds { addr, len });
        }
        if addr % self.page_size() + len > self.page_size() {
            return Err(FlashError::PageOverrun { addr, len });
        }
        Ok(len)
    }

    /// Read up to one page.
    pub fn read(&mut self, region: Region, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.check_page_access(region, addr, buf.len())?;
        let (window, offset, len) = aligned_window(addr, buf.len(), F::READ_SIZE);
        if offset == 0 && len == buf.len() {
            return self.flash.read(addr, buf).map_err(FlashError::device);
        }
        let mut scratch = [0u8; MAX_PAGE_SIZE];
        self.flash
            .read(window, &mut scratch[..len])
            .map_err(FlashError::device)?;
        buf.copy_from_slice(&scratch[offset..offset + buf.len()]);
        Ok(())
    }

    /// Program up to one page. Bits only go from 1 to 0; the target must be erased.
    pub fn write(&mut self, region: Region, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        self.check_page_access(region, addr, data.len())?;
        let (window, offset, len) = aligned_window(addr, data.len(), F::WRITE_SIZE);
        if offset == 0 && len == data.len() {
            return self.flash.write(addr, data).map_err(FlashError::device);
        }
        let mut scratch = [0xFFu8; MAX_PAGE_SIZE];
        scratch[offset..offset + data.len()].copy_from_slice(data);
        self.flash
            .write(window, &scratch[..len])
            .map_err(FlashError::device)
    }

    /// Erase whole sectors.
    pub fn erase(&mut self, region: Region, addr: u32, len: u32) -> Result<(), FlashError> {
        let (start, end) = self.bounds(region);
        if !range_within(addr, len, start, end) {
            return Err(FlashError::OutOfBounds { addr, len });
        }
        if addr % FLASH_SECTOR_SIZE != 0 || len % FLASH_SECTOR_SIZE != 0 {
            return Err(FlashError::Misaligned(addr));
        }
        self.flash
            .erase(addr, addr + len)
            .map_err(FlashError::device)
    }
}

/// Smallest `unit`-aligned window covering `len` bytes at `addr`:
/// (window start, offset of `addr` inside it, window length).
fn aligned_window(addr: u32, len: usize, unit: usize) -> (u32, usize, usize) {
    let unit = unit.max(1);
    let offset = addr as usize % unit;
    let start = addr - offset as u32;
    (start, offset, round_up(offset + len, unit))
}

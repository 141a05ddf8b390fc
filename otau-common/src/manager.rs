// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash manager: A/B image storage and redundant metadata.
//!
//! Metadata layout inside the metadata region:
//! - sector 0: primary copy, slot A at offset 0, slot B one page further
//! - sector 1: backup copy of sector 0, always written first
//! - sector 3: scratch sector used to rewrite the first sector of an image
//!
//! One slot holds the record of the running image (current), the other the
//! record of the image being downloaded (incoming). The roles are persisted in
//! each record's slot id and swap when an image switch commits. The incoming
//! record always points at the halves opposite to the current record's, so
//! the running image is never written.
//!
//! Each downloaded section image is framed as
//! `version u32 | size u32 | payload[size] | crc u32`, with the version and
//! crc words left erased until the image switch stamps them.

use embedded_storage::nor_flash::NorFlash;

use crate::crc::Crc32Stream;
use crate::driver::{FlashDriver, Region};
use crate::error::{FlashError, StorageError};
use crate::layout::{FlashLayout, Half, FLASH_SECTOR_SIZE};
use crate::metadata::{DownloadProgress, MetadataRecord, SlotRole, METADATA_RECORD_SIZE};
use crate::protocol::{DeviceInfo, FirmwareVersion, SectionId, MAX_PAGE_SIZE, TOTAL_SECTIONS};

/// Version word and size word ahead of a section payload.
pub const IMAGE_HEADER_SIZE: u32 = 8;

/// CRC word after a section payload.
pub const IMAGE_TRAILER_SIZE: u32 = 4;

const ERASED_WORD: u32 = 0xFFFF_FFFF;

const BACKUP_SECTOR: u32 = 1;
const SCRATCH_SECTOR: u32 = 3;

/// Physical metadata slot.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MetadataSlot {
    A = 0,
    B = 1,
}

impl MetadataSlot {
    pub const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Outcome of the boot-time metadata check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reconciliation {
    pub current_slot: MetadataSlot,
    /// A completed, newer, stamped download became the running image.
    pub swapped: bool,
    /// Metadata was rewritten to restore consistent roles or halves.
    pub repaired: bool,
    pub running_version: FirmwareVersion,
    pub running_halves: [Half; TOTAL_SECTIONS],
}

pub struct FlashManager<F> {
    driver: FlashDriver<F>,
    current: MetadataSlot,
    running_halves: [Half; TOTAL_SECTIONS],
}

impl<F: NorFlash> FlashManager<F> {
    /// Wrap a driver. Call [`reconcile`](Self::reconcile) or
    /// [`provision`](Self::provision) before trusting the roles.
    pub fn new(driver: FlashDriver<F>) -> Self {
        Self {
            driver,
            current: MetadataSlot::A,
            running_halves: [Half::Top; TOTAL_SECTIONS],
        }
    }

    pub fn layout(&self) -> &FlashLayout {
        self.driver.layout()
    }

    pub fn page_size(&self) -> u32 {
        self.driver.page_size()
    }

    pub fn current_slot(&self) -> MetadataSlot {
        self.current
    }

    /// Halves the running image occupies.
    pub fn running_halves(&self) -> [Half; TOTAL_SECTIONS] {
        self.running_halves
    }

    pub fn release(self) -> F {
        self.driver.release()
    }

    // --- Metadata ---

    fn slot_offset(&self, slot: MetadataSlot) -> u32 {
        slot as u32 * self.page_size()
    }

    fn sector_addr(&self, sector: u32) -> u32 {
        self.layout().metadata_addr + sector * FLASH_SECTOR_SIZE
    }

    fn slot_of(&self, role: SlotRole) -> MetadataSlot {
        match role {
            SlotRole::Current => self.current,
            SlotRole::Incoming => self.current.other(),
        }
    }

    fn read_record(
        &mut self,
        sector: u32,
        slot: MetadataSlot,
    ) -> Result<Option<MetadataRecord>, StorageError> {
        let addr = self.sector_addr(sector) + self.slot_offset(slot);
        let mut buf = [0u8; METADATA_RECORD_SIZE];
        self.driver.read(Region::Metadata, addr, &mut buf)?;
        Ok(MetadataRecord::decode(&buf).ok())
    }

    /// Read a slot, restoring the primary sector from backup once if needed.
    fn read_slot(&mut self, slot: MetadataSlot) -> Result<MetadataRecord, StorageError> {
        if let Some(record) = self.read_record(0, slot)? {
            return Ok(record);
        }
        #[cfg(feature = "defmt")]
        defmt::warn!("metadata slot {} invalid, restoring from backup", slot);
        if self.read_record(BACKUP_SECTOR, slot)?.is_none() {
            return Err(StorageError::MetadataCorrupted);
        }
        let backup = self.sector_addr(BACKUP_SECTOR);
        let primary = self.sector_addr(0);
        self.driver
            .erase(Region::Metadata, primary, FLASH_SECTOR_SIZE)?;
        self.copy_sector(Region::Metadata, backup, Region::Metadata, primary, false)?;
        self.read_record(0, slot)?
            .ok_or(StorageError::MetadataCorrupted)
    }

    pub fn read_metadata(&mut self, role: SlotRole) -> Result<MetadataRecord, StorageError> {
        self.read_slot(self.slot_of(role))
    }

    /// Running device identity and version.
    pub fn device_info(&mut self) -> Result<DeviceInfo, StorageError> {
        Ok(self.read_metadata(SlotRole::Current)?.device)
    }

    /// Persist both records, backup sector first, with `current` in `current_slot`.
    fn write_pair(
        &mut self,
        current: &MetadataRecord,
        incoming: &MetadataRecord,
        current_slot: MetadataSlot,
    ) -> Result<(), StorageError> {
        let current = MetadataRecord {
            role: SlotRole::Current,
            ..*current
        }
        .encode()?;
        let incoming = MetadataRecord {
            role: SlotRole::Incoming,
            ..*incoming
        }
        .encode()?;
        let records = [
            (current_slot, current),
            (current_slot.other(), incoming),
        ];
        for sector in [BACKUP_SECTOR, 0] {
            let base = self.sector_addr(sector);
            self.driver
                .erase(Region::Metadata, base, FLASH_SECTOR_SIZE)?;
            for (slot, bytes) in &records {
                let addr = base + self.slot_offset(*slot);
                self.driver.write(Region::Metadata, addr, bytes)?;
            }
        }
        Ok(())
    }

    /// Persist a new incoming record alongside the unchanged current one.
    pub fn update_incoming(&mut self, incoming: &MetadataRecord) -> Result<(), StorageError> {
        let current = self.read_metadata(SlotRole::Current)?;
        self.write_pair(&current, incoming, self.current)
    }

    /// Write factory metadata: running image in the top halves, downloads into the bottom ones.
    pub fn provision(&mut self, device: &DeviceInfo) -> Result<(), StorageError> {
        #[cfg(feature = "defmt")]
        defmt::info!("provisioning factory metadata for {}", device.fw_version);
        let current = MetadataRecord::factory(SlotRole::Current, *device);
        let incoming = MetadataRecord::factory(SlotRole::Incoming, *device);
        self.write_pair(&current, &incoming, MetadataSlot::A)?;
        self.current = MetadataSlot::A;
        self.running_halves = current.halves;
        Ok(())
    }

    /// Resolve slot roles at boot and promote a finished download.
    pub fn reconcile(&mut self) -> Result<Reconciliation, StorageError> {
        let a = self.read_slot(MetadataSlot::A)?;
        let b = self.read_slot(MetadataSlot::B)?;
        let (mut current_slot, roles_consistent) = match (a.role, b.role) {
            (SlotRole::Current, SlotRole::Incoming) => (MetadataSlot::A, true),
            (SlotRole::Incoming, SlotRole::Current) => (MetadataSlot::B, true),
            _ => (MetadataSlot::A, false),
        };
        let pick = |slot: MetadataSlot| match slot {
            MetadataSlot::A => (a, b),
            MetadataSlot::B => (b, a),
        };

        let (current, incoming) = pick(current_slot);
        let swapped = incoming.is_download_complete()
            && incoming.device.fw_version > current.device.fw_version
            && self.is_stamped(&incoming)?;
        if swapped {
            #[cfg(feature = "defmt")]
            defmt::info!(
                "promoting {} over {}",
                incoming.device.fw_version,
                current.device.fw_version
            );
            current_slot = current_slot.other();
        }

        let (current, mut incoming) = pick(current_slot);
        let opposite = current.halves.map(Half::other);
        let halves_consistent = incoming.halves == opposite;
        if !halves_consistent {
            incoming.halves = opposite;
            incoming.progress = incoming.progress.map(|p| DownloadProgress {
                downloaded: 0,
                ..p
            });
        }

        let repaired = !roles_consistent || !halves_consistent;
        if swapped || repaired {
            self.write_pair(&current, &incoming, current_slot)?;
        }
        self.current = current_slot;
        self.running_halves = current.halves;

        Ok(Reconciliation {
            current_slot,
            swapped,
            repaired,
            running_version: current.device.fw_version,
            running_halves: current.halves,
        })
    }

    /// Make the incoming record current; every section's active half flips.
    pub fn commit_switch(&mut self) -> Result<(), StorageError> {
        let current = self.read_metadata(SlotRole::Current)?;
        let incoming = self.read_metadata(SlotRole::Incoming)?;
        let new_slot = self.current.other();
        self.write_pair(&incoming, &current, new_slot)?;
        self.current = new_slot;
        self.running_halves = incoming.halves;
        #[cfg(feature = "defmt")]
        defmt::info!("switched to {}", incoming.device.fw_version);
        Ok(())
    }

    // --- Images ---

    /// Start of `page_no` within one half of `section`.
    pub fn physical_addr(
        &self,
        section: SectionId,
        half: Half,
        page_no: u16,
    ) -> Result<u32, FlashError> {
        let range = self.layout().section(section).half(half);
        let offset = u32::from(page_no) * self.page_size();
        if offset >= range.len {
            return Err(FlashError::OutOfBounds {
                addr: range.start.saturating_add(offset),
                len: self.page_size(),
            });
        }
        Ok(range.start + offset)
    }

    /// Half of `section` that `incoming` may write, never the running one.
    fn writable_half(
        &self,
        incoming: &MetadataRecord,
        section: SectionId,
    ) -> Result<Half, StorageError> {
        let half = incoming.half(section);
        if incoming.role != SlotRole::Incoming || half == self.running_halves[section.index()] {
            return Err(StorageError::ActiveHalf);
        }
        Ok(half)
    }

    /// Program one page of the incoming image; the tail is padded with 0xFF.
    pub fn write_page(
        &mut self,
        incoming: &MetadataRecord,
        section: SectionId,
        page_no: u16,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let page_size = self.page_size() as usize;
        let half = self.writable_half(incoming, section)?;
        let addr = self.physical_addr(section, half, page_no)?;
        if data.len() > page_size {
            return Err(FlashError::PageOverrun {
                addr,
                len: data.len() as u32,
            }
            .into());
        }
        let mut page = [0xFFu8; MAX_PAGE_SIZE];
        page[..data.len()].copy_from_slice(data);
        self.driver
            .write(Region::Section(section), addr, &page[..page_size])?;
        Ok(())
    }

    /// Read one page of the image `record` describes.
    pub fn read_page(
        &mut self,
        record: &MetadataRecord,
        section: SectionId,
        page_no: u16,
        buf: &mut [u8],
    ) -> Result<(), StorageError> {
        let addr = self.physical_addr(section, record.half(section), page_no)?;
        self.driver.read(Region::Section(section), addr, buf)?;
        Ok(())
    }

    /// Erase the incoming half of `section`.
    pub fn erase_incoming(
        &mut self,
        incoming: &MetadataRecord,
        section: SectionId,
    ) -> Result<(), StorageError> {
        let half = self.writable_half(incoming, section)?;
        let range = self.layout().section(section).half(half);
        self.driver
            .erase(Region::Section(section), range.start, range.len)?;
        Ok(())
    }

    /// Feed the first `len` bytes of `record`'s half of `section` into `crc`, a page at a time.
    pub fn section_crc(
        &mut self,
        record: &MetadataRecord,
        section: SectionId,
        len: u32,
        mut crc: Crc32Stream,
    ) -> Result<Crc32Stream, StorageError> {
        let range = self.layout().section(section).half(record.half(section));
        if len > range.len {
            return Err(FlashError::OutOfBounds {
                addr: range.start,
                len,
            }
            .into());
        }
        let page_size = self.page_size();
        let mut buf = [0u8; MAX_PAGE_SIZE];
        let mut offset = 0;
        while offset < len {
            let chunk = (len - offset).min(page_size) as usize;
            self.driver
                .read(Region::Section(section), range.start + offset, &mut buf[..chunk])?;
            crc.update(&buf[..chunk]);
            offset += chunk as u32;
        }
        Ok(crc)
    }

    /// One CRC chained across every declared section's downloaded bytes, in order.
    pub fn image_crc(&mut self, record: &MetadataRecord) -> Result<u32, StorageError> {
        let mut crc = Crc32Stream::new();
        for section in record.declared_sections() {
            crc = self.section_crc(record, section, record.downloaded(section), crc)?;
        }
        Ok(crc.value())
    }

    fn read_word(&mut self, section: SectionId, addr: u32) -> Result<u32, StorageError> {
        let mut word = [0u8; 4];
        self.read_span(Region::Section(section), addr, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    /// Offset of the CRC trailer for a payload of `payload` bytes, if it fits the declared size.
    fn trailer_offset(declared: u32, payload: u32) -> Option<u32> {
        payload
            .checked_add(IMAGE_HEADER_SIZE)
            .filter(|end| end.saturating_add(IMAGE_TRAILER_SIZE) <= declared)
    }

    /// Every declared section of `record` carries its version and a matching CRC trailer.
    fn is_stamped(&mut self, record: &MetadataRecord) -> Result<bool, StorageError> {
        let word = record.device.fw_version.to_word();
        for section in record.declared_sections() {
            let start = self.layout().section(section).half(record.half(section)).start;
            if self.read_word(section, start)? != word {
                return Ok(false);
            }
            let payload = self.read_word(section, start + 4)?;
            let Some(crc_offset) = Self::trailer_offset(record.descriptor(section).size, payload)
            else {
                return Ok(false);
            };
            let crc = self
                .section_crc(record, section, crc_offset, Crc32Stream::new())?
                .value();
            if self.read_word(section, start + crc_offset)? != crc {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Write the version into the image header of `section` and seal it with its CRC.
    pub fn stamp_image(
        &mut self,
        incoming: &MetadataRecord,
        section: SectionId,
    ) -> Result<(), StorageError> {
        let half = self.writable_half(incoming, section)?;
        let start = self.layout().section(section).half(half).start;
        let region = Region::Section(section);
        let declared = incoming.descriptor(section).size;
        let version = incoming.device.fw_version.to_word();
        let bad_header = StorageError::ImageHeader(section.id());

        let stored_version = self.read_word(section, start)?;
        let payload = self.read_word(section, start + 4)?;
        let crc_offset = Self::trailer_offset(declared, payload).ok_or(bad_header)?;
        if stored_version != ERASED_WORD && stored_version != version {
            return Err(bad_header);
        }
        if stored_version == ERASED_WORD {
            self.driver.write(region, start, &version.to_le_bytes())?;
        }

        let crc = self
            .section_crc(incoming, section, crc_offset, Crc32Stream::new())?
            .value();
        match self.read_word(section, start + crc_offset)? {
            ERASED_WORD => self.write_span(region, start + crc_offset, &crc.to_le_bytes()),
            stored if stored == crc => Ok(()),
            _ => Err(bad_header),
        }
    }

    /// Blank the version word of every declared incoming image so a partial
    /// or unconfirmed image is never mistaken for a stamped one.
    pub fn blank_incoming_versions(&mut self) -> Result<(), StorageError> {
        let incoming = self.read_metadata(SlotRole::Incoming)?;
        let scratch = self.sector_addr(SCRATCH_SECTOR);
        for section in incoming.declared_sections() {
            let half = self.writable_half(&incoming, section)?;
            let start = self.layout().section(section).half(half).start;
            let version = self.read_word(section, start)?;
            let size = self.read_word(section, start + 4)?;
            if version == ERASED_WORD || (version == 0 && size == 0) {
                continue;
            }
            #[cfg(feature = "defmt")]
            defmt::debug!("blanking version word of section {}", section);
            let region = Region::Section(section);
            self.driver
                .erase(Region::Metadata, scratch, FLASH_SECTOR_SIZE)?;
            self.copy_sector(region, start, Region::Metadata, scratch, false)?;
            self.driver.erase(region, start, FLASH_SECTOR_SIZE)?;
            self.copy_sector(Region::Metadata, scratch, region, start, true)?;
            self.driver
                .erase(Region::Metadata, scratch, FLASH_SECTOR_SIZE)?;
        }
        Ok(())
    }

    /// Copy one sector page by page into an erased sector, optionally blanking the first word.
    fn copy_sector(
        &mut self,
        from_region: Region,
        from: u32,
        to_region: Region,
        to: u32,
        blank_first_word: bool,
    ) -> Result<(), StorageError> {
        let page_size = self.page_size();
        let mut buf = [0u8; MAX_PAGE_SIZE];
        let page = &mut buf[..page_size as usize];
        for offset in (0..FLASH_SECTOR_SIZE).step_by(page_size as usize) {
            self.driver.read(from_region, from + offset, page)?;
            if offset == 0 && blank_first_word {
                page[..4].fill(0xFF);
            }
            if page.iter().all(|b| *b == 0xFF) {
                continue;
            }
            self.driver.write(to_region, to + offset, page)?;
        }
        Ok(())
    }

    /// Read bytes that may straddle a page boundary.
    fn read_span(&mut self, region: Region, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let page_size = self.page_size();
        let mut done = 0;
        while done < buf.len() {
            let at = addr + done as u32;
            let room = (page_size - at % page_size) as usize;
            let chunk = room.min(buf.len() - done);
            self.driver.read(region, at, &mut buf[done..done + chunk])?;
            done += chunk;
        }
        Ok(())
    }

    /// Program bytes that may straddle a page boundary.
    fn write_span(&mut self, region: Region, addr: u32, data: &[u8]) -> Result<(), StorageError> {
        let page_size = self.page_size();
        let mut done = 0;
        while done < data.len() {
            let at = addr + done as u32;
            let room = (page_size - at % page_size) as usize;
            let chunk = room.min(data.len() - done);
            self.driver.write(region, at, &data[done..done + chunk])?;
            done += chunk;
        }
        Ok(())
    }
}

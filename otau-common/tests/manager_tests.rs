// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Tests for the flash manager: redundant metadata, A/B halves, stamping and
//! boot-time reconciliation.

mod common;

use common::{
    factory_info, formatted_flash, provisioned_manager, MockFlash, TestImage, LAYOUT_ADDR,
    METADATA_ADDR, PAGE_SIZE,
};
use otau_common::crc::{self, Crc32Stream};
use otau_common::driver::FlashDriver;
use otau_common::manager::MetadataSlot;
use otau_common::{
    FirmwareVersion, FlashManager, Half, MetadataRecord, SectionId, SlotRole, StorageError,
};

const BACKUP_ADDR: u32 = METADATA_ADDR + 0x1000;

fn reopen(flash: MockFlash) -> FlashManager<MockFlash> {
    FlashManager::new(FlashDriver::open(flash, LAYOUT_ADDR).unwrap())
}

/// Accept `image` into the incoming slot and write all of its pages.
fn stage(manager: &mut FlashManager<MockFlash>, image: &TestImage) -> MetadataRecord {
    let mut incoming = manager.read_metadata(SlotRole::Incoming).unwrap();
    incoming.start_image(&factory_info(), &image.notify(false));
    incoming.accept_image_info(&image.info());
    for section in incoming.declared_sections() {
        manager.erase_incoming(&incoming, section).unwrap();
        for (n, page) in image.blobs[section.index()]
            .chunks(PAGE_SIZE as usize)
            .enumerate()
        {
            manager.write_page(&incoming, section, n as u16, page).unwrap();
        }
        incoming.progress[section.index()].downloaded = image.blobs[section.index()].len() as u32;
    }
    manager.update_incoming(&incoming).unwrap();
    incoming
}

// =============================================================================
// Metadata redundancy
// =============================================================================

#[test]
fn test_provision_writes_both_copies() {
    let manager = provisioned_manager();
    let flash = manager.release();
    let primary = &flash.data[METADATA_ADDR as usize..][..0x1000];
    let backup = &flash.data[BACKUP_ADDR as usize..][..0x1000];
    assert_eq!(primary, backup);

    let mut manager = reopen(flash);
    let outcome = manager.reconcile().unwrap();
    assert_eq!(outcome.current_slot, MetadataSlot::A);
    assert!(!outcome.swapped);
    assert!(!outcome.repaired);
    assert_eq!(outcome.running_version, factory_info().fw_version);
    assert_eq!(outcome.running_halves, [Half::Top; 3]);
}

#[test]
fn test_blank_metadata_is_corrupted() {
    let mut manager = reopen(formatted_flash());
    assert_eq!(manager.reconcile(), Err(StorageError::MetadataCorrupted));
}

#[test]
fn test_primary_restored_from_backup() {
    let mut flash = provisioned_manager().release();
    flash.corrupt_byte(METADATA_ADDR as usize + 20);
    let mut manager = reopen(flash);
    let device = manager.device_info().unwrap();
    assert_eq!(device, MetadataRecord::factory(SlotRole::Current, factory_info()).device);

    let flash = manager.release();
    let primary = &flash.data[METADATA_ADDR as usize..][..0x1000];
    let backup = &flash.data[BACKUP_ADDR as usize..][..0x1000];
    assert_eq!(primary, backup);
}

#[test]
fn test_corrupt_backup_alone_is_harmless() {
    let mut flash = provisioned_manager().release();
    flash.corrupt_byte(BACKUP_ADDR as usize + 20);
    let mut manager = reopen(flash);
    assert!(manager.reconcile().is_ok());
}

#[test]
fn test_both_copies_corrupt() {
    let mut flash = provisioned_manager().release();
    flash.corrupt_byte(METADATA_ADDR as usize + 20);
    flash.corrupt_byte(BACKUP_ADDR as usize + 20);
    let mut manager = reopen(flash);
    assert_eq!(
        manager.read_metadata(SlotRole::Current),
        Err(StorageError::MetadataCorrupted)
    );
}

#[test]
fn test_interrupted_update_keeps_backup() {
    let mut manager = provisioned_manager();
    let mut incoming = manager.read_metadata(SlotRole::Incoming).unwrap();
    let image = TestImage::new(FirmwareVersion::new(2, 0, 0), &[300]);
    incoming.start_image(&factory_info(), &image.notify(false));
    incoming.accept_image_info(&image.info());

    let mut flash = manager.release();
    // backup erase and one slot programmed, then power fails
    flash.power_cut_after(2);
    let mut manager = reopen(flash);
    manager.reconcile().unwrap();
    assert!(manager.update_incoming(&incoming).is_err());

    let mut flash = manager.release();
    flash.restore_power();
    let mut manager = reopen(flash);
    manager.reconcile().unwrap();
    let stored = manager.read_metadata(SlotRole::Incoming).unwrap();
    assert_eq!(stored.total_sections(), 0);
}

// =============================================================================
// Address translation and write protection
// =============================================================================

#[test]
fn test_physical_addresses() {
    let manager = provisioned_manager();
    assert_eq!(
        manager.physical_addr(SectionId::Patch, Half::Top, 0),
        Ok(0x5000)
    );
    assert_eq!(
        manager.physical_addr(SectionId::Patch, Half::Bottom, 1),
        Ok(0x9100)
    );
    assert_eq!(
        manager.physical_addr(SectionId::App, Half::Bottom, 39),
        Ok(0x27000 + 39 * 256)
    );
    assert!(manager
        .physical_addr(SectionId::Header, Half::Top, 16)
        .is_err());
}

#[test]
fn test_running_half_never_written() {
    let mut manager = provisioned_manager();
    let mut current = manager.read_metadata(SlotRole::Current).unwrap();
    assert_eq!(
        manager.write_page(&current, SectionId::Patch, 0, &[0; 256]),
        Err(StorageError::ActiveHalf)
    );
    // an incoming record pointing at the running half is refused too
    current.role = SlotRole::Incoming;
    assert_eq!(
        manager.erase_incoming(&current, SectionId::Patch),
        Err(StorageError::ActiveHalf)
    );
}

#[test]
fn test_short_page_padded_with_erased_bytes() {
    let mut manager = provisioned_manager();
    let incoming = manager.read_metadata(SlotRole::Incoming).unwrap();
    manager.erase_incoming(&incoming, SectionId::Header).unwrap();
    manager
        .write_page(&incoming, SectionId::Header, 0, &[0x12; 10])
        .unwrap();
    let mut page = [0u8; 256];
    manager
        .read_page(&incoming, SectionId::Header, 0, &mut page)
        .unwrap();
    assert_eq!(&page[..10], &[0x12; 10]);
    assert!(page[10..].iter().all(|b| *b == 0xFF));
}

// =============================================================================
// CRCs
// =============================================================================

#[test]
fn test_section_crc_matches_blob() {
    let mut manager = provisioned_manager();
    let image = TestImage::new(FirmwareVersion::new(2, 0, 0), &[300, 100, 10_000]);
    let incoming = stage(&mut manager, &image);
    for section in SectionId::ALL {
        let crc = manager
            .section_crc(
                &incoming,
                section,
                incoming.downloaded(section),
                Crc32Stream::new(),
            )
            .unwrap()
            .value();
        assert_eq!(crc, crc::checksum(&image.blobs[section.index()]));
    }
    assert_eq!(manager.image_crc(&incoming).unwrap(), image.total_crc());
}

// =============================================================================
// Stamping and switching
// =============================================================================

#[test]
fn test_stamp_writes_version_and_crc() {
    let mut manager = provisioned_manager();
    let image = TestImage::new(FirmwareVersion::new(2, 0, 0), &[300]);
    let incoming = stage(&mut manager, &image);
    manager.stamp_image(&incoming, SectionId::Patch).unwrap();
    // stamping again is a no-op
    manager.stamp_image(&incoming, SectionId::Patch).unwrap();

    let flash = manager.release();
    let start = 0x9000;
    assert_eq!(flash.word(start), 0x0200_0000);
    assert_eq!(flash.word(start + 4), 288);
    let stamped = &flash.data[start as usize..][..8 + 288];
    assert_eq!(flash.word(start + 8 + 288), crc::checksum(stamped));
}

#[test]
fn test_stamp_rejects_oversized_header() {
    let mut manager = provisioned_manager();
    let mut image = TestImage::new(FirmwareVersion::new(2, 0, 0), &[300]);
    image.blobs[0][4..8].copy_from_slice(&1000u32.to_le_bytes());
    let incoming = stage(&mut manager, &image);
    assert_eq!(
        manager.stamp_image(&incoming, SectionId::Patch),
        Err(StorageError::ImageHeader(1))
    );
}

#[test]
fn test_commit_switch_flips_halves() {
    let mut manager = provisioned_manager();
    let image = TestImage::new(FirmwareVersion::new(2, 0, 0), &[300, 100, 10_000]);
    let incoming = stage(&mut manager, &image);
    for section in incoming.declared_sections() {
        manager.stamp_image(&incoming, section).unwrap();
    }
    manager.commit_switch().unwrap();
    assert_eq!(manager.current_slot(), MetadataSlot::B);
    assert_eq!(manager.running_halves(), [Half::Bottom; 3]);
    assert_eq!(
        manager.device_info().unwrap().fw_version,
        FirmwareVersion::new(2, 0, 0)
    );

    let mut manager = reopen(manager.release());
    let outcome = manager.reconcile().unwrap();
    assert_eq!(outcome.current_slot, MetadataSlot::B);
    assert!(!outcome.swapped);
    assert_eq!(outcome.running_halves, [Half::Bottom; 3]);
    let next = manager.read_metadata(SlotRole::Incoming).unwrap();
    assert_eq!(next.halves, [Half::Top; 3]);
}

#[test]
fn test_reconcile_promotes_stamped_download() {
    let mut manager = provisioned_manager();
    let image = TestImage::new(FirmwareVersion::new(2, 0, 0), &[300, 100]);
    let incoming = stage(&mut manager, &image);
    for section in incoming.declared_sections() {
        manager.stamp_image(&incoming, section).unwrap();
    }
    // power lost before the switch committed
    let mut manager = reopen(manager.release());
    let outcome = manager.reconcile().unwrap();
    assert!(outcome.swapped);
    assert_eq!(outcome.running_version, FirmwareVersion::new(2, 0, 0));
    assert_eq!(outcome.running_halves, [Half::Bottom; 3]);
}

#[test]
fn test_reconcile_ignores_unstamped_download() {
    let mut manager = provisioned_manager();
    let image = TestImage::new(FirmwareVersion::new(2, 0, 0), &[300]);
    stage(&mut manager, &image);
    let mut manager = reopen(manager.release());
    let outcome = manager.reconcile().unwrap();
    assert!(!outcome.swapped);
    assert_eq!(outcome.running_version, factory_info().fw_version);
}

#[test]
fn test_reconcile_ignores_older_download() {
    let mut manager = provisioned_manager();
    let image = TestImage::new(FirmwareVersion::new(0, 9, 0), &[300]);
    let incoming = stage(&mut manager, &image);
    manager.stamp_image(&incoming, SectionId::Patch).unwrap();
    let mut manager = reopen(manager.release());
    assert!(!manager.reconcile().unwrap().swapped);
}

#[test]
fn test_reconcile_repairs_overlapping_halves() {
    let mut manager = provisioned_manager();
    let mut incoming = manager.read_metadata(SlotRole::Incoming).unwrap();
    incoming.halves = [Half::Bottom, Half::Top, Half::Bottom];
    incoming.progress[1].downloaded = 64;
    manager.update_incoming(&incoming).unwrap();

    let mut manager = reopen(manager.release());
    let outcome = manager.reconcile().unwrap();
    assert!(outcome.repaired);
    let incoming = manager.read_metadata(SlotRole::Incoming).unwrap();
    assert_eq!(incoming.halves, [Half::Bottom; 3]);
    assert_eq!(incoming.downloaded(SectionId::Header), 0);
}

// =============================================================================
// Power-on blanking
// =============================================================================

#[test]
fn test_blank_incoming_versions() {
    let mut manager = provisioned_manager();
    let image = TestImage::new(FirmwareVersion::new(2, 0, 0), &[300]);
    let incoming = stage(&mut manager, &image);
    manager.stamp_image(&incoming, SectionId::Patch).unwrap();
    manager.blank_incoming_versions().unwrap();

    let flash = manager.release();
    assert_eq!(flash.word(0x9000), 0xFFFF_FFFF);
    assert_eq!(flash.word(0x9004), 288);
    assert_eq!(&flash.data[0x9008..0x9008 + 288], &image.blobs[0][8..296]);
    // scratch sector left erased
    let scratch = (METADATA_ADDR + 3 * 0x1000) as usize;
    assert!(flash.data[scratch..scratch + 0x1000].iter().all(|b| *b == 0xFF));
}

#[test]
fn test_blanking_skips_erased_images() {
    let mut manager = provisioned_manager();
    let image = TestImage::new(FirmwareVersion::new(2, 0, 0), &[300]);
    stage(&mut manager, &image);
    let mut flash = manager.release();
    let erases = flash.erases();
    flash.restore_power();
    let mut manager = reopen(flash);
    manager.reconcile().unwrap();
    manager.blank_incoming_versions().unwrap();
    assert_eq!(manager.release().erases(), erases);
}

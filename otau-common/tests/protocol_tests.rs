// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Tests for wire frames: length field, command codes and payload layout.

use otau_common::protocol::{
    frame_length, ImageEnd, ImageInfo, ImageNotify, PageBuf, PageData, SectionDescriptor,
};
use otau_common::{
    CodecError, CommandCode, DeviceInfo, FirmwareVersion, HardwareVersion, ImageOption, Request,
    Response, StatusCode, MAX_FRAME_SIZE, MAX_PAGE_SIZE,
};

fn notify(force: bool) -> ImageNotify {
    ImageNotify {
        force,
        product_id: 0x0102,
        vendor_id: 0x0304,
        total_sections: 3,
        fw_version: FirmwareVersion::new(1, 2, 0x0304),
        hw_version: HardwareVersion { major: 2, minor: 1 },
        hw_revision: 3,
        security_level: 0,
    }
}

fn device() -> DeviceInfo {
    DeviceInfo {
        product_id: 0x0102,
        vendor_id: 0x0304,
        total_sections: 3,
        fw_version: FirmwareVersion::new(1, 0, 0),
        hw_version: HardwareVersion { major: 2, minor: 1 },
        hw_revision: 3,
    }
}

// =============================================================================
// Framing
// =============================================================================

#[test]
fn test_length_covers_whole_frame() {
    let frame = Request::GetDeviceInfo.to_frame().unwrap();
    assert_eq!(&frame[..], &[0x03, 0x00, 0x1B]);
    assert_eq!(frame_length([frame[0], frame[1]]), frame.len());
}

#[test]
fn test_length_mismatch_rejected() {
    let mut frame = Request::Abort.to_frame().unwrap();
    frame[0] = 4;
    assert_eq!(
        Request::decode(&frame),
        Err(CodecError::LengthMismatch {
            declared: 4,
            actual: 3
        })
    );
}

#[test]
fn test_truncated_frame_rejected() {
    assert_eq!(Request::decode(&[0x03]), Err(CodecError::Truncated));
    // Section End without its section id
    assert_eq!(Request::decode(&[0x03, 0x00, 0x19]), Err(CodecError::Truncated));
}

#[test]
fn test_trailing_bytes_rejected() {
    assert_eq!(
        Request::decode(&[0x04, 0x00, 0x1B, 0x00]),
        Err(CodecError::TrailingBytes(1))
    );
}

#[test]
fn test_unknown_command_rejected() {
    assert_eq!(
        Request::decode(&[0x03, 0x00, 0x42]),
        Err(CodecError::UnknownCommand(0x42))
    );
}

#[test]
fn test_block_transfer_unsupported() {
    for code in [CommandCode::BlockDataRequest, CommandCode::MissedBlockRequest] {
        let frame = [0x03, 0x00, code as u8];
        assert_eq!(
            Request::decode(&frame),
            Err(CodecError::Unsupported(code as u8))
        );
    }
}

#[test]
fn test_reset_device_not_accepted_from_manager() {
    assert_eq!(
        Request::decode(&[0x03, 0x00, 0x1D]),
        Err(CodecError::UnknownCommand(0x1D))
    );
}

// =============================================================================
// Request payloads
// =============================================================================

#[test]
fn test_image_notify_layout() {
    let frame = Request::ImageNotify(notify(false)).to_frame().unwrap();
    assert_eq!(frame.len(), 3 + 13);
    assert_eq!(frame[2], CommandCode::ImageNotifyRequest as u8);
    assert_eq!(&frame[3..5], &[0x02, 0x01]);
    assert_eq!(&frame[5..7], &[0x04, 0x03]);
    assert_eq!(frame[7], 3);
    assert_eq!(&frame[8..12], &[1, 2, 0x04, 0x03]);
}

#[test]
fn test_force_update_uses_own_code() {
    let request = Request::ImageNotify(notify(true));
    let frame = request.to_frame().unwrap();
    assert_eq!(frame[2], CommandCode::ForceUpdateRequest as u8);
    assert_eq!(Request::decode(&frame).unwrap(), request);
}

#[test]
fn test_image_info_sizes_are_24_bit() {
    let info = ImageInfo {
        total_sections: 1,
        total_size: 0x01_0203,
        sections: [
            SectionDescriptor {
                id: 1,
                size: 0x01_0203,
                start_address: 0x1000,
            },
            SectionDescriptor::default(),
            SectionDescriptor::default(),
        ],
        total_crc: 0xAABB_CCDD,
        section_crcs: [0xAABB_CCDD, 0, 0],
    };
    let frame = Request::ImageInfo(info).to_frame().unwrap();
    assert_eq!(frame.len(), 3 + 45);
    // total sections, total size, then section 1 id and 3-byte size
    assert_eq!(&frame[8..12], &[1, 0x03, 0x02, 0x01]);
    assert_eq!(Request::decode(&frame).unwrap(), Request::ImageInfo(info));
}

#[test]
fn test_oversized_section_size_not_encodable() {
    let mut sections = [SectionDescriptor::default(); 3];
    sections[0].size = 0x0100_0000;
    let info = ImageInfo {
        total_sections: 1,
        total_size: 0,
        sections,
        total_crc: 0,
        section_crcs: [0; 3],
    };
    assert_eq!(
        Request::ImageInfo(info).to_frame(),
        Err(CodecError::InvalidField)
    );
}

#[test]
fn test_full_page_fits_frame() {
    let page = PageData {
        section_id: 3,
        page_no: 39,
        data: PageBuf::from_slice(&[0x5A; MAX_PAGE_SIZE]).unwrap(),
    };
    let frame = Request::PageData(page.clone()).to_frame().unwrap();
    assert_eq!(frame.len(), MAX_FRAME_SIZE);
    assert_eq!(&frame[3..6], &[3, 39, 0]);
    assert_eq!(Request::decode(&frame).unwrap(), Request::PageData(page));
}

#[test]
fn test_oversized_page_rejected() {
    let mut frame = vec![0u8; MAX_FRAME_SIZE + 1];
    frame[..2].copy_from_slice(&((MAX_FRAME_SIZE + 1) as u16).to_le_bytes());
    frame[2] = CommandCode::PageDataRequest as u8;
    assert_eq!(
        Request::decode(&frame),
        Err(CodecError::PayloadTooLarge(MAX_PAGE_SIZE + 1))
    );
}

#[test]
fn test_image_switch_layout() {
    let request = Request::ImageSwitch {
        total_sections: 3,
        fw_version: FirmwareVersion::new(2, 0, 1),
    };
    let frame = request.to_frame().unwrap();
    assert_eq!(&frame[..], &[0x08, 0x00, 0x11, 3, 2, 0, 1, 0]);
    assert_eq!(Request::decode(&frame).unwrap(), request);
}

#[test]
fn test_image_end_layout() {
    let end = ImageEnd {
        total_sections: 2,
        total_size: 0x100,
        total_crc: 0x1234_5678,
    };
    let frame = Request::ImageEnd(end).to_frame().unwrap();
    assert_eq!(&frame[3..], &[2, 0x00, 0x01, 0, 0, 0x78, 0x56, 0x34, 0x12]);
}

// =============================================================================
// Responses
// =============================================================================

#[test]
fn test_device_info_response() {
    let response = Response::DeviceInfo {
        info: device(),
        pending_version: FirmwareVersion::BLANK,
    };
    let frame = response.to_frame().unwrap();
    assert_eq!(frame.len(), 3 + 12 + 4);
    assert_eq!(&frame[15..], &[0xFF; 4]);
    assert_eq!(Response::decode(&frame).unwrap(), response);
}

#[test]
fn test_image_info_response_resume() {
    let response = Response::ImageInfo {
        option: ImageOption::Resume,
        section_id: 3,
        page_no: 39,
        block_no: 0,
        page_size: 256,
        block_size: 256,
    };
    let frame = response.to_frame().unwrap();
    assert_eq!(&frame[3..], &[0x0D, 3, 39, 0, 0, 0x00, 0x01, 0x00, 0x01]);
    assert_eq!(Response::decode(&frame).unwrap(), response);
}

#[test]
fn test_error_replies_carry_status_in_command_position() {
    let cases = [
        (
            Response::PageError {
                section_id: 1,
                page_no: 2,
            },
            StatusCode::ImagePageInfoError,
        ),
        (
            Response::SectionEndError { section_id: 2 },
            StatusCode::ImageSectionEndError,
        ),
        (
            Response::ImageInfoError {
                status: StatusCode::InvalidImageSize,
            },
            StatusCode::InvalidImageSize,
        ),
        (Response::CommandFailed, StatusCode::CommandFailed),
    ];
    for (response, status) in cases {
        let frame = response.to_frame().unwrap();
        assert_eq!(frame[2], status as u8);
        assert_eq!(response.status(), Some(status));
        assert_eq!(Response::decode(&frame).unwrap(), response);
    }
}

#[test]
fn test_failure_reply() {
    let response = Response::Failure {
        status: StatusCode::InvalidCommand,
    };
    let frame = response.to_frame().unwrap();
    assert_eq!(&frame[..], &[0x04, 0x00, 0x30, 0x95]);
    assert_eq!(Response::decode(&frame).unwrap(), response);
}

#[test]
fn test_failure_with_unknown_status() {
    assert_eq!(
        Response::decode(&[0x04, 0x00, 0x30, 0x20]),
        Err(CodecError::UnknownStatus(0x20))
    );
}

#[test]
fn test_success_replies_have_no_status() {
    assert_eq!(Response::PauseAck.status(), None);
    assert_eq!(
        Response::ImageSwitch { total_sections: 3 }.status(),
        None
    );
}

// =============================================================================
// Versions
// =============================================================================

#[test]
fn test_version_word() {
    let v = FirmwareVersion::new(1, 2, 0x0304);
    assert_eq!(v.to_word(), 0x0102_0304);
    assert_eq!(FirmwareVersion::from_word(0x0102_0304), v);
}

#[test]
fn test_version_validity() {
    assert!(!FirmwareVersion::BLANK.is_valid());
    assert!(!FirmwareVersion::new(0, 0, 0).is_valid());
    assert!(FirmwareVersion::new(0, 0, 1).is_valid());
}

#[test]
fn test_version_ordering() {
    assert!(FirmwareVersion::new(1, 2, 0) > FirmwareVersion::new(1, 1, 900));
    assert!(FirmwareVersion::new(2, 0, 0) > FirmwareVersion::new(1, 255, 0xFFFF));
}

#[test]
fn test_identity_match() {
    let running = device();
    assert!(running.accepts(&notify(false)));
    assert!(!running.is_same_image(&notify(false)));

    let mut other_vendor = notify(false);
    other_vendor.vendor_id = 0x9999;
    assert!(!running.accepts(&other_vendor));

    let mut other_rev = notify(false);
    other_rev.hw_revision = 4;
    assert!(!running.accepts(&other_rev));
}

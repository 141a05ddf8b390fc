// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Tests for the streaming CRC-32.

use otau_common::crc::{checksum, resume, Crc32Stream, CRC32_INIT};

// =============================================================================
// One-shot checksum
// =============================================================================

#[test]
fn test_check_value() {
    assert_eq!(checksum(b"123456789"), 0x0376_E6E7);
}

#[test]
fn test_empty_input_is_initial_value() {
    assert_eq!(checksum(&[]), CRC32_INIT);
}

#[test]
fn test_erased_bytes_change_checksum() {
    assert_ne!(checksum(&[0xFF; 4]), checksum(&[0xFF; 8]));
}

// =============================================================================
// Resuming across chunks
// =============================================================================

#[test]
fn test_resume_matches_one_shot() {
    let data: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
    let whole = checksum(&data);
    for split in [0, 1, 255, 256, 999, 1000] {
        let (a, b) = data.split_at(split);
        assert_eq!(resume(checksum(a), b), whole, "split at {split}");
    }
}

#[test]
fn test_stream_over_pages() {
    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let mut stream = Crc32Stream::new();
    for page in data.chunks(256) {
        stream.update(page);
    }
    assert_eq!(stream.value(), checksum(&data));
}

#[test]
fn test_stream_resumed_from_stored_value() {
    let mut first = Crc32Stream::new();
    first.update(b"12345");
    let mut second = Crc32Stream::resume_from(first.value());
    second.update(b"6789");
    assert_eq!(second.value(), 0x0376_E6E7);
}

#[test]
fn test_default_stream_is_new() {
    assert_eq!(Crc32Stream::default(), Crc32Stream::new());
    assert_eq!(Crc32Stream::new().value(), CRC32_INIT);
}

// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Streaming CRC-32 used for metadata records, sections and whole images.
//!
//! The algorithm is CRC-32/MPEG-2: polynomial 0x04C11DB7, initial value
//! 0xFFFFFFFF, no input/output reflection and no final XOR. Without a final
//! XOR the running register is the checksum itself, so any value returned by
//! [`resume`] can be carried into a later call. Flash regions are hashed one
//! page at a time this way.

use crc::{Crc, CRC_32_MPEG_2};

pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Register value before any byte has been hashed.
pub const CRC32_INIT: u32 = 0xFFFF_FFFF;

/// CRC-32 of `data` in one call.
pub fn checksum(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Continue a checksum from a previously returned value.
pub fn resume(crc: u32, data: &[u8]) -> u32 {
    let mut digest = CRC32.digest_with_initial(crc);
    digest.update(data);
    digest.finalize()
}

/// Incremental CRC-32 that only carries its 32-bit register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Crc32Stream {
    value: u32,
}

impl Crc32Stream {
    pub const fn new() -> Self {
        Self { value: CRC32_INIT }
    }

    /// Pick up a computation carried over from an earlier stream.
    pub const fn resume_from(value: u32) -> Self {
        Self { value }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.value = resume(self.value, data);
    }

    pub const fn value(&self) -> u32 {
        self.value
    }
}

impl Default for Crc32Stream {
    fn default() -> Self {
        Self::new()
    }
}

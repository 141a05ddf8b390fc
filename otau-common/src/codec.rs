// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Little-endian byte cursors for wire frames and persisted records.
//!
//! Every multi-byte field is little endian; 24-bit sizes take three bytes.

use crate::error::CodecError;

/// Largest value a 24-bit size field can hold.
pub const U24_MAX: u32 = 0x00FF_FFFF;

/// Fixed-size structure with an explicit byte encoding.
pub trait WireFormat: Sized {
    const SIZE: usize;

    fn encode(&self, w: &mut Writer<'_>) -> Result<(), CodecError>;
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError>;
}

pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).ok_or(CodecError::Truncated)?;
        let out = self.buf.get(self.pos..end).ok_or(CodecError::Truncated)?;
        self.pos = end;
        Ok(out)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    /// Everything not consumed yet.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u24(&mut self) -> Result<u32, CodecError> {
        let [b0, b1, b2] = self.array()?;
        Ok(u32::from_le_bytes([b0, b1, b2, 0]))
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn read<T: WireFormat>(&mut self) -> Result<T, CodecError> {
        T::decode(self)
    }

    /// Fail if anything is left unread.
    pub fn finish(self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn put_bytes(&mut self, data: &[u8]) -> Result<(), CodecError> {
        let end = self.pos + data.len();
        self.buf
            .get_mut(self.pos..end)
            .ok_or(CodecError::BufferTooSmall)?
            .copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    pub fn put_u8(&mut self, v: u8) -> Result<(), CodecError> {
        self.put_bytes(&[v])
    }

    pub fn put_u16(&mut self, v: u16) -> Result<(), CodecError> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put_u24(&mut self, v: u32) -> Result<(), CodecError> {
        if v > U24_MAX {
            return Err(CodecError::InvalidField);
        }
        self.put_bytes(&v.to_le_bytes()[..3])
    }

    pub fn put_u32(&mut self, v: u32) -> Result<(), CodecError> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put<T: WireFormat>(&mut self, value: &T) -> Result<(), CodecError> {
        value.encode(self)
    }

    /// Overwrite a u16 already emitted at `at`.
    pub fn patch_u16(&mut self, at: usize, v: u16) -> Result<(), CodecError> {
        self.buf
            .get_mut(at..at + 2)
            .ok_or(CodecError::BufferTooSmall)?
            .copy_from_slice(&v.to_le_bytes());
        Ok(())
    }
}

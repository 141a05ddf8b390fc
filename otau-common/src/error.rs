// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Error types, one enum per layer.
//!
//! Lower layers convert upwards with `From`, so handlers can use `?` and map
//! the final [`OtauError`] onto a wire reply.

use core::fmt;

use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};

use crate::fsm::OtauState;
use crate::protocol::StatusCode;

/// Malformed bytes on the wire or in a persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// Fewer bytes than the message needs.
    Truncated,
    /// The length field disagrees with the bytes received.
    LengthMismatch { declared: u16, actual: usize },
    /// Bytes left over after the last field.
    TrailingBytes(usize),
    UnknownCommand(u8),
    /// Known command the engine does not implement.
    Unsupported(u8),
    UnknownStatus(u8),
    BufferTooSmall,
    PayloadTooLarge(usize),
    /// A field holds a value outside its domain.
    InvalidField,
    BadCrc { expected: u32, actual: u32 },
    Serialization,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "message truncated"),
            Self::LengthMismatch { declared, actual } => {
                write!(f, "length field {declared} but {actual} bytes received")
            }
            Self::TrailingBytes(n) => write!(f, "{n} unexpected trailing bytes"),
            Self::UnknownCommand(c) => write!(f, "unknown command 0x{c:02x}"),
            Self::Unsupported(c) => write!(f, "unsupported command 0x{c:02x}"),
            Self::UnknownStatus(s) => write!(f, "unknown status 0x{s:02x}"),
            Self::BufferTooSmall => write!(f, "output buffer too small"),
            Self::PayloadTooLarge(n) => write!(f, "payload of {n} bytes too large"),
            Self::InvalidField => write!(f, "field value out of range"),
            Self::BadCrc { expected, actual } => {
                write!(f, "crc mismatch: expected 0x{expected:08x}, got 0x{actual:08x}")
            }
            Self::Serialization => write!(f, "serialization failed"),
        }
    }
}

/// The flash layout header is missing or describes an unusable geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LayoutError {
    BadMagic(u32),
    UnsupportedVersion(u8),
    BadCrc,
    SectionCount(u8),
    PageSize(u32),
    /// Metadata region misaligned, too small or overlapping.
    MetadataRegion,
    /// A section is misaligned, mis-sized or has the wrong id.
    Section(u8),
    /// Sections run past the end of the flash.
    Capacity { required: u32, available: u32 },
    /// The flash device's program or erase granularity does not fit the layout.
    Granularity,
    Flash(FlashError),
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic(m) => write!(f, "no layout header (magic 0x{m:08x})"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported layout version {v}"),
            Self::BadCrc => write!(f, "layout header crc mismatch"),
            Self::SectionCount(n) => write!(f, "layout declares {n} sections"),
            Self::PageSize(p) => write!(f, "invalid page size {p}"),
            Self::MetadataRegion => write!(f, "invalid metadata region"),
            Self::Section(id) => write!(f, "invalid geometry for section {id}"),
            Self::Capacity { required, available } => {
                write!(f, "layout needs {required} bytes, flash has {available}")
            }
            Self::Granularity => write!(f, "flash granularity incompatible with layout"),
            Self::Flash(e) => write!(f, "reading layout header: {e}"),
        }
    }
}

impl From<FlashError> for LayoutError {
    fn from(e: FlashError) -> Self {
        Self::Flash(e)
    }
}

/// Rejected or failed raw flash access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    UnknownSection(u8),
    /// Access falls outside the owning region.
    OutOfBounds { addr: u32, len: u32 },
    /// Access is longer than a page or crosses a page boundary.
    PageOverrun { addr: u32, len: u32 },
    /// Erase not aligned to the sector size.
    Misaligned(u32),
    Device(NorFlashErrorKind),
}

impl FlashError {
    /// Wrap an error reported by the flash device.
    pub fn device<E: NorFlashError>(e: E) -> Self {
        Self::Device(e.kind())
    }
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSection(id) => write!(f, "unknown section {id}"),
            Self::OutOfBounds { addr, len } => {
                write!(f, "{len} bytes at 0x{addr:08x} out of bounds")
            }
            Self::PageOverrun { addr, len } => {
                write!(f, "{len} bytes at 0x{addr:08x} do not fit one page")
            }
            Self::Misaligned(addr) => write!(f, "erase at 0x{addr:08x} not sector aligned"),
            Self::Device(kind) => write!(f, "flash device error: {kind:?}"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for FlashError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::UnknownSection(id) => defmt::write!(f, "UnknownSection({})", id),
            Self::OutOfBounds { addr, len } => {
                defmt::write!(f, "OutOfBounds({=u32:#x}, {})", addr, len)
            }
            Self::PageOverrun { addr, len } => {
                defmt::write!(f, "PageOverrun({=u32:#x}, {})", addr, len)
            }
            Self::Misaligned(addr) => defmt::write!(f, "Misaligned({=u32:#x})", addr),
            Self::Device(kind) => defmt::write!(f, "Device({})", defmt::Debug2Format(kind)),
        }
    }
}

/// Flash manager failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// Primary and backup metadata both failed validation.
    MetadataCorrupted,
    /// The running image's half was addressed for writing.
    ActiveHalf,
    /// The stored image header does not describe a payload that fits its section.
    ImageHeader(u8),
    /// A metadata record could not be encoded.
    Record(CodecError),
    Flash(FlashError),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MetadataCorrupted => write!(f, "metadata corrupted beyond repair"),
            Self::ActiveHalf => write!(f, "refusing to write the running image"),
            Self::ImageHeader(id) => write!(f, "invalid image header in section {id}"),
            Self::Record(e) => write!(f, "metadata record: {e}"),
            Self::Flash(e) => write!(f, "flash: {e}"),
        }
    }
}

impl From<FlashError> for StorageError {
    fn from(e: FlashError) -> Self {
        Self::Flash(e)
    }
}

impl From<CodecError> for StorageError {
    fn from(e: CodecError) -> Self {
        Self::Record(e)
    }
}

/// A message arrived in a state with no matching transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StateError {
    pub from: OtauState,
    pub requested: OtauState,
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no transition from {:?} to {:?}", self.from, self.requested)
    }
}

/// Top-level error returned by the update session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OtauError {
    Codec(CodecError),
    Layout(LayoutError),
    Storage(StorageError),
    State(StateError),
    /// The request was answered with this failure status.
    Rejected(StatusCode),
    /// The transport refused the outgoing frame.
    Transport,
    NotConnected,
}

impl fmt::Display for OtauError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "codec: {e}"),
            Self::Layout(e) => write!(f, "layout: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::State(e) => write!(f, "state: {e}"),
            Self::Rejected(status) => write!(f, "request rejected with {status:?}"),
            Self::Transport => write!(f, "transport failure"),
            Self::NotConnected => write!(f, "no manager connected"),
        }
    }
}

impl From<CodecError> for OtauError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<LayoutError> for OtauError {
    fn from(e: LayoutError) -> Self {
        Self::Layout(e)
    }
}

impl From<StorageError> for OtauError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<FlashError> for OtauError {
    fn from(e: FlashError) -> Self {
        Self::Storage(StorageError::Flash(e))
    }
}

impl From<StateError> for OtauError {
    fn from(e: StateError) -> Self {
        Self::State(e)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CodecError {}
#[cfg(feature = "std")]
impl std::error::Error for LayoutError {}
#[cfg(feature = "std")]
impl std::error::Error for FlashError {}
#[cfg(feature = "std")]
impl std::error::Error for StorageError {}
#[cfg(feature = "std")]
impl std::error::Error for StateError {}
#[cfg(feature = "std")]
impl std::error::Error for OtauError {}

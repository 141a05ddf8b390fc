// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Wire protocol between the update manager and the OTAU target.
//!
//! Every frame is `length: u16 | command: u8 | payload`, where `length`
//! counts the whole frame including its own two bytes. All fields are little
//! endian. Failure replies put a [`StatusCode`] where the command byte goes.
//!
//! This module works in both `no_std` (embedded) and `std` (host) builds.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::{Reader, WireFormat, Writer};
use crate::error::CodecError;

/// Largest page the engine transfers in one frame.
pub const MAX_PAGE_SIZE: usize = 512;

/// Length field plus command byte.
pub const FRAME_HEADER_SIZE: usize = 3;

/// Page Data carries a section id and page number ahead of the page bytes.
pub const PAGE_DATA_HEADER_SIZE: usize = 3;

pub const MAX_FRAME_SIZE: usize = FRAME_HEADER_SIZE + PAGE_DATA_HEADER_SIZE + MAX_PAGE_SIZE;

/// Patch, header and application.
pub const TOTAL_SECTIONS: usize = 3;

/// Encoded frame ready for the transport.
pub type Frame = heapless::Vec<u8, MAX_FRAME_SIZE>;

/// Page payload carried by a Page Data request.
pub type PageBuf = heapless::Vec<u8, MAX_PAGE_SIZE>;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandCode {
    ImageNotifyRequest = 0x01,
    ImageNotifyResponse = 0x02,
    ImageInfoRequest = 0x03,
    ImageInfoResponse = 0x04,
    StartImageDownload = 0x05,
    PageDataRequest = 0x06,
    PageDataResponse = 0x07,
    BlockDataRequest = 0x08,
    BlockDataResponse = 0x09,
    Abort = 0x0A,
    PauseRequest = 0x0B,
    PauseResponse = 0x0C,
    ResumeRequest = 0x0D,
    ResumeResponse = 0x0E,
    ForceUpdateRequest = 0x0F,
    ForceUpdateResponse = 0x10,
    ImageSwitchRequest = 0x11,
    ImageSwitchResponse = 0x12,
    ImageEndRequest = 0x13,
    ImageEndResponse = 0x14,
    MissedBlockRequest = 0x15,
    MissedBlockResponse = 0x16,
    ImageUpdateCheck = 0x17,
    PageEndRequest = 0x18,
    SectionEndRequest = 0x19,
    SectionEndResponse = 0x1A,
    GetDeviceInfoRequest = 0x1B,
    GetDeviceInfoResponse = 0x1C,
    ResetDevice = 0x1D,
    Failure = 0x30,
}

impl CommandCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        use CommandCode::*;
        const ALL: [CommandCode; 30] = [
            ImageNotifyRequest,
            ImageNotifyResponse,
            ImageInfoRequest,
            ImageInfoResponse,
            StartImageDownload,
            PageDataRequest,
            PageDataResponse,
            BlockDataRequest,
            BlockDataResponse,
            Abort,
            PauseRequest,
            PauseResponse,
            ResumeRequest,
            ResumeResponse,
            ForceUpdateRequest,
            ForceUpdateResponse,
            ImageSwitchRequest,
            ImageSwitchResponse,
            ImageEndRequest,
            ImageEndResponse,
            MissedBlockRequest,
            MissedBlockResponse,
            ImageUpdateCheck,
            PageEndRequest,
            SectionEndRequest,
            SectionEndResponse,
            GetDeviceInfoRequest,
            GetDeviceInfoResponse,
            ResetDevice,
            Failure,
        ];
        ALL.into_iter().find(|c| *c as u8 == v)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatusCode {
    InvalidImage = 0x81,
    ImageSwitchError = 0x82,
    BadPageCrc = 0x83,
    BadBlockCrc = 0x84,
    ImageOlderVersion = 0x85,
    ImageVerificationFailed = 0x86,
    ImageOutOfMemory = 0x87,
    InvalidVendorId = 0x88,
    InvalidProductId = 0x89,
    InvalidHardwareVersion = 0x8A,
    InvalidHardwareRevision = 0x8B,
    NoUpdate = 0x8C,
    SecurityLevelNotSupported = 0x8D,
    InvalidSection = 0x8E,
    InvalidImageSize = 0x8F,
    UnknownError = 0x90,
    ImagePageInfoError = 0x91,
    ImageBlockInfoError = 0x92,
    ImageSectionEndError = 0x93,
    NoStatus = 0x94,
    InvalidCommand = 0x95,
    FlashDriverFailed = 0x96,
    CommandSuccess = 0x97,
    CommandFailed = 0x98,
}

impl StatusCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        use StatusCode::*;
        const ALL: [StatusCode; 24] = [
            InvalidImage,
            ImageSwitchError,
            BadPageCrc,
            BadBlockCrc,
            ImageOlderVersion,
            ImageVerificationFailed,
            ImageOutOfMemory,
            InvalidVendorId,
            InvalidProductId,
            InvalidHardwareVersion,
            InvalidHardwareRevision,
            NoUpdate,
            SecurityLevelNotSupported,
            InvalidSection,
            InvalidImageSize,
            UnknownError,
            ImagePageInfoError,
            ImageBlockInfoError,
            ImageSectionEndError,
            NoStatus,
            InvalidCommand,
            FlashDriverFailed,
            CommandSuccess,
            CommandFailed,
        ];
        ALL.into_iter().find(|s| *s as u8 == v)
    }
}

/// How the target wants the download to proceed.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ImageOption {
    Start = 0x05,
    Resume = 0x0D,
}

impl ImageOption {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x05 => Some(Self::Start),
            0x0D => Some(Self::Resume),
            _ => None,
        }
    }
}

/// Image section, in download order.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SectionId {
    Patch = 1,
    Header = 2,
    App = 3,
}

impl SectionId {
    pub const ALL: [SectionId; TOTAL_SECTIONS] = [Self::Patch, Self::Header, Self::App];

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    /// Section at position `index` (0-based).
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub const fn id(self) -> u8 {
        self as u8
    }

    pub const fn index(self) -> usize {
        self as usize - 1
    }
}

// --- Version and identity ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub build: u16,
}

impl FirmwareVersion {
    /// Reported when no newer download is pending.
    pub const BLANK: Self = Self::new(0xFF, 0xFF, 0xFFFF);

    pub const fn new(major: u8, minor: u8, build: u16) -> Self {
        Self { major, minor, build }
    }

    /// Packed `major << 24 | minor << 16 | build`, the form stamped into image headers.
    pub const fn to_word(self) -> u32 {
        (self.major as u32) << 24 | (self.minor as u32) << 16 | self.build as u32
    }

    pub const fn from_word(word: u32) -> Self {
        Self {
            major: (word >> 24) as u8,
            minor: (word >> 16) as u8,
            build: word as u16,
        }
    }

    /// Neither erased flash nor zeroed memory.
    pub const fn is_valid(self) -> bool {
        !matches!(self.to_word(), 0 | 0xFFFF_FFFF)
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

impl WireFormat for FirmwareVersion {
    const SIZE: usize = 4;

    fn encode(&self, w: &mut Writer<'_>) -> Result<(), CodecError> {
        w.put_u8(self.major)?;
        w.put_u8(self.minor)?;
        w.put_u16(self.build)
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self::new(r.u8()?, r.u8()?, r.u16()?))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HardwareVersion {
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for HardwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl WireFormat for HardwareVersion {
    const SIZE: usize = 2;

    fn encode(&self, w: &mut Writer<'_>) -> Result<(), CodecError> {
        w.put_u8(self.major)?;
        w.put_u8(self.minor)
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            major: r.u8()?,
            minor: r.u8()?,
        })
    }
}

/// Identity and version of the firmware a device runs (or is receiving).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceInfo {
    pub product_id: u16,
    pub vendor_id: u16,
    pub total_sections: u8,
    pub fw_version: FirmwareVersion,
    pub hw_version: HardwareVersion,
    pub hw_revision: u8,
}

impl DeviceInfo {
    /// Vendor, product and hardware match the image being offered.
    pub fn accepts(&self, notify: &ImageNotify) -> bool {
        self.vendor_id == notify.vendor_id
            && self.product_id == notify.product_id
            && self.hw_version == notify.hw_version
            && self.hw_revision == notify.hw_revision
    }

    /// Same identity and version as the offered image.
    pub fn is_same_image(&self, notify: &ImageNotify) -> bool {
        self.accepts(notify) && self.fw_version == notify.fw_version
    }
}

impl WireFormat for DeviceInfo {
    const SIZE: usize = 12;

    fn encode(&self, w: &mut Writer<'_>) -> Result<(), CodecError> {
        w.put_u16(self.product_id)?;
        w.put_u16(self.vendor_id)?;
        w.put_u8(self.total_sections)?;
        w.put(&self.fw_version)?;
        w.put(&self.hw_version)?;
        w.put_u8(self.hw_revision)
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            product_id: r.u16()?,
            vendor_id: r.u16()?,
            total_sections: r.u8()?,
            fw_version: r.read()?,
            hw_version: r.read()?,
            hw_revision: r.u8()?,
        })
    }
}

/// Declared placement of one image section.
///
/// `start_address` is informational; the device places sections according
/// to its own flash layout.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SectionDescriptor {
    pub id: u8,
    /// 24-bit on the wire.
    pub size: u32,
    pub start_address: u32,
}

impl WireFormat for SectionDescriptor {
    const SIZE: usize = 8;

    fn encode(&self, w: &mut Writer<'_>) -> Result<(), CodecError> {
        w.put_u8(self.id)?;
        w.put_u24(self.size)?;
        w.put_u32(self.start_address)
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            id: r.u8()?,
            size: r.u24()?,
            start_address: r.u32()?,
        })
    }
}

// --- Request payloads ---

/// Image Notify and Force Update carry the same payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageNotify {
    pub force: bool,
    pub product_id: u16,
    pub vendor_id: u16,
    pub total_sections: u8,
    pub fw_version: FirmwareVersion,
    pub hw_version: HardwareVersion,
    pub hw_revision: u8,
    pub security_level: u8,
}

impl ImageNotify {
    fn encode_payload(&self, w: &mut Writer<'_>) -> Result<(), CodecError> {
        w.put_u16(self.product_id)?;
        w.put_u16(self.vendor_id)?;
        w.put_u8(self.total_sections)?;
        w.put(&self.fw_version)?;
        w.put(&self.hw_version)?;
        w.put_u8(self.hw_revision)?;
        w.put_u8(self.security_level)
    }

    fn decode_payload(force: bool, r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            force,
            product_id: r.u16()?,
            vendor_id: r.u16()?,
            total_sections: r.u8()?,
            fw_version: r.read()?,
            hw_version: r.read()?,
            hw_revision: r.u8()?,
            security_level: r.u8()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageInfo {
    pub total_sections: u8,
    pub total_size: u32,
    pub sections: [SectionDescriptor; TOTAL_SECTIONS],
    pub total_crc: u32,
    /// Patch, header and application CRCs.
    pub section_crcs: [u32; TOTAL_SECTIONS],
}

impl WireFormat for ImageInfo {
    const SIZE: usize = 1 + 4 + TOTAL_SECTIONS * SectionDescriptor::SIZE + 4 + TOTAL_SECTIONS * 4;

    fn encode(&self, w: &mut Writer<'_>) -> Result<(), CodecError> {
        w.put_u8(self.total_sections)?;
        w.put_u32(self.total_size)?;
        for section in &self.sections {
            w.put(section)?;
        }
        w.put_u32(self.total_crc)?;
        for crc in self.section_crcs {
            w.put_u32(crc)?;
        }
        Ok(())
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let total_sections = r.u8()?;
        let total_size = r.u32()?;
        let sections = [r.read()?, r.read()?, r.read()?];
        let total_crc = r.u32()?;
        let section_crcs = [r.u32()?, r.u32()?, r.u32()?];
        Ok(Self {
            total_sections,
            total_size,
            sections,
            total_crc,
            section_crcs,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageData {
    pub section_id: u8,
    pub page_no: u16,
    pub data: PageBuf,
}

/// Image End request, echoed back verbatim on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageEnd {
    pub total_sections: u8,
    pub total_size: u32,
    pub total_crc: u32,
}

impl WireFormat for ImageEnd {
    const SIZE: usize = 9;

    fn encode(&self, w: &mut Writer<'_>) -> Result<(), CodecError> {
        w.put_u8(self.total_sections)?;
        w.put_u32(self.total_size)?;
        w.put_u32(self.total_crc)
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            total_sections: r.u8()?,
            total_size: r.u32()?,
            total_crc: r.u32()?,
        })
    }
}

/// Messages from the update manager to the target.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)] // no_std, no allocator for Box
pub enum Request {
    GetDeviceInfo,
    ImageNotify(ImageNotify),
    ImageInfo(ImageInfo),
    PageData(PageData),
    SectionEnd { section_id: u8 },
    ImageEnd(ImageEnd),
    ImageSwitch { total_sections: u8, fw_version: FirmwareVersion },
    Pause,
    /// Manager's answer to a target-initiated pause.
    PauseAck,
    Resume,
    Abort,
}

/// Frame `body` behind a length field and command byte.
fn encode_frame(
    buf: &mut [u8],
    command: u8,
    body: impl FnOnce(&mut Writer<'_>) -> Result<(), CodecError>,
) -> Result<usize, CodecError> {
    let mut w = Writer::new(buf);
    w.put_u16(0)?;
    w.put_u8(command)?;
    body(&mut w)?;
    let len = w.position();
    let declared = u16::try_from(len).map_err(|_| CodecError::PayloadTooLarge(len))?;
    w.patch_u16(0, declared)?;
    Ok(len)
}

/// Check the length field and split off the command byte.
fn open_frame(frame: &[u8]) -> Result<(u8, Reader<'_>), CodecError> {
    let mut r = Reader::new(frame);
    let declared = r.u16()?;
    if usize::from(declared) != frame.len() {
        return Err(CodecError::LengthMismatch {
            declared,
            actual: frame.len(),
        });
    }
    let command = r.u8()?;
    Ok((command, r))
}

/// Total frame length announced by the first two bytes of a stream.
pub fn frame_length(header: [u8; 2]) -> usize {
    usize::from(u16::from_le_bytes(header))
}

impl Request {
    pub fn command(&self) -> CommandCode {
        match self {
            Self::GetDeviceInfo => CommandCode::GetDeviceInfoRequest,
            Self::ImageNotify(n) if n.force => CommandCode::ForceUpdateRequest,
            Self::ImageNotify(_) => CommandCode::ImageNotifyRequest,
            Self::ImageInfo(_) => CommandCode::ImageInfoRequest,
            Self::PageData(_) => CommandCode::PageDataRequest,
            Self::SectionEnd { .. } => CommandCode::SectionEndRequest,
            Self::ImageEnd(_) => CommandCode::ImageEndRequest,
            Self::ImageSwitch { .. } => CommandCode::ImageSwitchRequest,
            Self::Pause => CommandCode::PauseRequest,
            Self::PauseAck => CommandCode::PauseResponse,
            Self::Resume => CommandCode::ResumeRequest,
            Self::Abort => CommandCode::Abort,
        }
    }

    /// Encode into `buf`, returning the frame length.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        encode_frame(buf, self.command() as u8, |w| match self {
            Self::GetDeviceInfo | Self::Pause | Self::PauseAck | Self::Resume | Self::Abort => {
                Ok(())
            }
            Self::ImageNotify(n) => n.encode_payload(w),
            Self::ImageInfo(info) => w.put(info),
            Self::PageData(page) => {
                w.put_u8(page.section_id)?;
                w.put_u16(page.page_no)?;
                w.put_bytes(&page.data)
            }
            Self::SectionEnd { section_id } => w.put_u8(*section_id),
            Self::ImageEnd(end) => w.put(end),
            Self::ImageSwitch {
                total_sections,
                fw_version,
            } => {
                w.put_u8(*total_sections)?;
                w.put(fw_version)
            }
        })
    }

    pub fn to_frame(&self) -> Result<Frame, CodecError> {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let len = self.encode(&mut buf)?;
        Frame::from_slice(&buf[..len]).map_err(|_| CodecError::BufferTooSmall)
    }

    /// Decode one complete frame.
    pub fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        let (command, mut r) = open_frame(frame)?;
        let code = CommandCode::from_u8(command).ok_or(CodecError::UnknownCommand(command))?;
        let request = match code {
            CommandCode::GetDeviceInfoRequest => Self::GetDeviceInfo,
            CommandCode::ImageNotifyRequest => {
                Self::ImageNotify(ImageNotify::decode_payload(false, &mut r)?)
            }
            CommandCode::ForceUpdateRequest => {
                Self::ImageNotify(ImageNotify::decode_payload(true, &mut r)?)
            }
            CommandCode::ImageInfoRequest => Self::ImageInfo(r.read()?),
            CommandCode::PageDataRequest => {
                let section_id = r.u8()?;
                let page_no = r.u16()?;
                let bytes = r.rest();
                let data = PageBuf::from_slice(bytes)
                    .map_err(|_| CodecError::PayloadTooLarge(bytes.len()))?;
                Self::PageData(PageData {
                    section_id,
                    page_no,
                    data,
                })
            }
            CommandCode::SectionEndRequest => Self::SectionEnd {
                section_id: r.u8()?,
            },
            CommandCode::ImageEndRequest => Self::ImageEnd(r.read()?),
            CommandCode::ImageSwitchRequest => Self::ImageSwitch {
                total_sections: r.u8()?,
                fw_version: r.read()?,
            },
            CommandCode::PauseRequest => Self::Pause,
            CommandCode::PauseResponse => Self::PauseAck,
            CommandCode::ResumeRequest => Self::Resume,
            CommandCode::Abort => Self::Abort,
            CommandCode::BlockDataRequest
            | CommandCode::MissedBlockRequest
            | CommandCode::PageEndRequest
            | CommandCode::ImageUpdateCheck => return Err(CodecError::Unsupported(command)),
            _ => return Err(CodecError::UnknownCommand(command)),
        };
        r.finish()?;
        Ok(request)
    }
}

// --- Responses ---

/// Messages from the target to the update manager, including the
/// target-initiated pause and resume indications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Response {
    DeviceInfo {
        info: DeviceInfo,
        /// Newer version waiting in the incoming slot, or [`FirmwareVersion::BLANK`].
        pending_version: FirmwareVersion,
    },
    ImageNotify {
        force: bool,
        hw_revision: u8,
        fw_version: FirmwareVersion,
        hw_version: HardwareVersion,
        option: ImageOption,
    },
    ImageInfo {
        option: ImageOption,
        section_id: u8,
        page_no: u16,
        block_no: u8,
        page_size: u16,
        block_size: u16,
    },
    PageData { section_id: u8, page_no: u16 },
    SectionEnd { section_id: u8 },
    ImageEnd(ImageEnd),
    ImageSwitch { total_sections: u8 },
    PauseAck,
    Resume { info: DeviceInfo },
    /// Target asks the manager to pause.
    PauseRequest,
    /// Target asks the manager to resume.
    ResumeRequest { info: DeviceInfo },
    PageError { section_id: u8, page_no: u16 },
    SectionEndError { section_id: u8 },
    ImageInfoError { status: StatusCode },
    /// Pause declined.
    CommandFailed,
    Failure { status: StatusCode },
}

impl Response {
    /// Byte placed in the command position.
    pub fn command_byte(&self) -> u8 {
        match self {
            Self::DeviceInfo { .. } => CommandCode::GetDeviceInfoResponse as u8,
            Self::ImageNotify { force: true, .. } => CommandCode::ForceUpdateResponse as u8,
            Self::ImageNotify { .. } => CommandCode::ImageNotifyResponse as u8,
            Self::ImageInfo { .. } => CommandCode::ImageInfoResponse as u8,
            Self::PageData { .. } => CommandCode::PageDataResponse as u8,
            Self::SectionEnd { .. } => CommandCode::SectionEndResponse as u8,
            Self::ImageEnd(_) => CommandCode::ImageEndResponse as u8,
            Self::ImageSwitch { .. } => CommandCode::ImageSwitchResponse as u8,
            Self::PauseAck => CommandCode::PauseResponse as u8,
            Self::Resume { .. } => CommandCode::ResumeResponse as u8,
            Self::PauseRequest => CommandCode::PauseRequest as u8,
            Self::ResumeRequest { .. } => CommandCode::ResumeRequest as u8,
            Self::PageError { .. } => StatusCode::ImagePageInfoError as u8,
            Self::SectionEndError { .. } => StatusCode::ImageSectionEndError as u8,
            Self::ImageInfoError { .. } => StatusCode::InvalidImageSize as u8,
            Self::CommandFailed => StatusCode::CommandFailed as u8,
            Self::Failure { .. } => CommandCode::Failure as u8,
        }
    }

    /// Failure status carried by an error reply.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::PageError { .. } => Some(StatusCode::ImagePageInfoError),
            Self::SectionEndError { .. } => Some(StatusCode::ImageSectionEndError),
            Self::ImageInfoError { status } | Self::Failure { status } => Some(*status),
            Self::CommandFailed => Some(StatusCode::CommandFailed),
            _ => None,
        }
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        encode_frame(buf, self.command_byte(), |w| match self {
            Self::DeviceInfo {
                info,
                pending_version,
            } => {
                w.put(info)?;
                w.put(pending_version)
            }
            Self::ImageNotify {
                hw_revision,
                fw_version,
                hw_version,
                option,
                ..
            } => {
                w.put_u8(*hw_revision)?;
                w.put(fw_version)?;
                w.put(hw_version)?;
                w.put_u8(*option as u8)
            }
            Self::ImageInfo {
                option,
                section_id,
                page_no,
                block_no,
                page_size,
                block_size,
            } => {
                w.put_u8(*option as u8)?;
                w.put_u8(*section_id)?;
                w.put_u16(*page_no)?;
                w.put_u8(*block_no)?;
                w.put_u16(*page_size)?;
                w.put_u16(*block_size)
            }
            Self::PageData {
                section_id,
                page_no,
            }
            | Self::PageError {
                section_id,
                page_no,
            } => {
                w.put_u8(*section_id)?;
                w.put_u16(*page_no)
            }
            Self::SectionEnd { section_id } | Self::SectionEndError { section_id } => {
                w.put_u8(*section_id)
            }
            Self::ImageEnd(end) => w.put(end),
            Self::ImageSwitch { total_sections } => w.put_u8(*total_sections),
            Self::Resume { info } | Self::ResumeRequest { info } => w.put(info),
            Self::ImageInfoError { status } | Self::Failure { status } => w.put_u8(*status as u8),
            Self::PauseAck | Self::PauseRequest | Self::CommandFailed => Ok(()),
        })
    }

    pub fn to_frame(&self) -> Result<Frame, CodecError> {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let len = self.encode(&mut buf)?;
        Frame::from_slice(&buf[..len]).map_err(|_| CodecError::BufferTooSmall)
    }

    pub fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        let (command, mut r) = open_frame(frame)?;
        let response = match CommandCode::from_u8(command) {
            Some(code) => Self::decode_command(code, &mut r)?,
            None => Self::decode_status(command, &mut r)?,
        };
        r.finish()?;
        Ok(response)
    }

    fn decode_command(code: CommandCode, r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(match code {
            CommandCode::GetDeviceInfoResponse => Self::DeviceInfo {
                info: r.read()?,
                pending_version: r.read()?,
            },
            CommandCode::ImageNotifyResponse | CommandCode::ForceUpdateResponse => {
                Self::ImageNotify {
                    force: code == CommandCode::ForceUpdateResponse,
                    hw_revision: r.u8()?,
                    fw_version: r.read()?,
                    hw_version: r.read()?,
                    option: read_option(r)?,
                }
            }
            CommandCode::ImageInfoResponse => Self::ImageInfo {
                option: read_option(r)?,
                section_id: r.u8()?,
                page_no: r.u16()?,
                block_no: r.u8()?,
                page_size: r.u16()?,
                block_size: r.u16()?,
            },
            CommandCode::PageDataResponse => Self::PageData {
                section_id: r.u8()?,
                page_no: r.u16()?,
            },
            CommandCode::SectionEndResponse => Self::SectionEnd {
                section_id: r.u8()?,
            },
            CommandCode::ImageEndResponse => Self::ImageEnd(r.read()?),
            CommandCode::ImageSwitchResponse => Self::ImageSwitch {
                total_sections: r.u8()?,
            },
            CommandCode::PauseResponse => Self::PauseAck,
            CommandCode::ResumeResponse => Self::Resume { info: r.read()? },
            CommandCode::PauseRequest => Self::PauseRequest,
            CommandCode::ResumeRequest => Self::ResumeRequest { info: r.read()? },
            CommandCode::Failure => Self::Failure {
                status: read_status(r)?,
            },
            other => return Err(CodecError::UnknownCommand(other as u8)),
        })
    }

    fn decode_status(command: u8, r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let status = StatusCode::from_u8(command).ok_or(CodecError::UnknownCommand(command))?;
        Ok(match status {
            StatusCode::ImagePageInfoError => Self::PageError {
                section_id: r.u8()?,
                page_no: r.u16()?,
            },
            StatusCode::ImageSectionEndError => Self::SectionEndError {
                section_id: r.u8()?,
            },
            StatusCode::InvalidImageSize => Self::ImageInfoError {
                status: read_status(r)?,
            },
            StatusCode::CommandFailed => Self::CommandFailed,
            _ => return Err(CodecError::UnknownCommand(command)),
        })
    }
}

fn read_option(r: &mut Reader<'_>) -> Result<ImageOption, CodecError> {
    ImageOption::from_u8(r.u8()?).ok_or(CodecError::InvalidField)
}

fn read_status(r: &mut Reader<'_>) -> Result<StatusCode, CodecError> {
    let raw = r.u8()?;
    StatusCode::from_u8(raw).ok_or(CodecError::UnknownStatus(raw))
}

// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Shared fixtures: RAM NOR flash, reference layout, recording transport and
//! an image builder.

#![allow(dead_code)]

use std::cell::Cell;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_storage::nor_flash::{
    check_erase, check_read, check_write, ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash,
};
use otau_common::crc::{self, Crc32Stream};
use otau_common::driver::FlashDriver;
use otau_common::protocol::{
    ImageEnd, ImageInfo, ImageNotify, PageBuf, PageData, SectionDescriptor,
};
use otau_common::{
    ConnHandle, DeviceInfo, FirmwareVersion, FlashLayout, FlashManager, HardwareVersion, OtauApp,
    OtauConfig, OtauSession, Request, Response, SectionId, Transport, TOTAL_SECTIONS,
};

pub const FLASH_SIZE: u32 = 512 * 1024;
pub const PAGE_SIZE: u32 = 256;
pub const LAYOUT_ADDR: u32 = 0;
pub const METADATA_ADDR: u32 = 0x1000;
pub const CONN: ConnHandle = 7;

// =============================================================================
// MockFlash
// =============================================================================

/// Handle that outlives the flash it was taken from, for flash owned by a session.
#[derive(Clone, Default)]
pub struct FlashProbe {
    erases: Rc<Cell<usize>>,
    writes: Rc<Cell<usize>>,
    /// Erase/program operations left before every further one fails.
    budget: Rc<Cell<Option<usize>>>,
}

impl FlashProbe {
    pub fn erases(&self) -> usize {
        self.erases.get()
    }

    pub fn writes(&self) -> usize {
        self.writes.get()
    }

    /// Fail every erase or program after the next `ops` ones.
    pub fn cut_after(&self, ops: usize) {
        self.budget.set(Some(ops));
    }

    pub fn restore(&self) {
        self.budget.set(None);
    }
}

/// RAM NOR flash: erase sets 0xFF, programming ANDs bits in.
pub struct MockFlash {
    pub data: Vec<u8>,
    probe: FlashProbe,
}

impl MockFlash {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0xFF; size],
            probe: FlashProbe::default(),
        }
    }

    pub fn probe(&self) -> FlashProbe {
        self.probe.clone()
    }

    pub fn erases(&self) -> usize {
        self.probe.erases()
    }

    pub fn power_cut_after(&mut self, ops: usize) {
        self.probe.cut_after(ops);
    }

    pub fn restore_power(&mut self) {
        self.probe.restore();
    }

    pub fn corrupt_byte(&mut self, offset: usize) {
        self.data[offset] ^= 0x01;
    }

    pub fn word(&self, addr: u32) -> u32 {
        let at = addr as usize;
        u32::from_le_bytes(self.data[at..at + 4].try_into().unwrap())
    }

    fn spend(&mut self) -> Result<(), NorFlashErrorKind> {
        match self.probe.budget.get() {
            Some(0) => Err(NorFlashErrorKind::Other),
            Some(n) => {
                self.probe.budget.set(Some(n - 1));
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl ErrorType for MockFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for MockFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len())?;
        let start = offset as usize;
        bytes.copy_from_slice(&self.data[start..start + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl NorFlash for MockFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = 4096;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to)?;
        self.spend()?;
        self.probe.erases.set(self.probe.erases() + 1);
        self.data[from as usize..to as usize].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len())?;
        self.spend()?;
        self.probe.writes.set(self.probe.writes() + 1);
        let start = offset as usize;
        for (slot, value) in self.data[start..start + bytes.len()].iter_mut().zip(bytes) {
            *slot &= *value;
        }
        Ok(())
    }
}

// =============================================================================
// Layout and identity
// =============================================================================

pub fn reference_layout() -> FlashLayout {
    FlashLayout::with_image_sizes(FLASH_SIZE, PAGE_SIZE, METADATA_ADDR, [0x4000, 0x1000, 0x18000])
        .unwrap()
}

/// Erased flash carrying only the layout header.
pub fn formatted_flash() -> MockFlash {
    let mut flash = MockFlash::new(FLASH_SIZE as usize);
    reference_layout().write_header(&mut flash, LAYOUT_ADDR).unwrap();
    flash
}

pub fn factory_info() -> DeviceInfo {
    DeviceInfo {
        product_id: 0x0102,
        vendor_id: 0x0304,
        total_sections: 0,
        fw_version: FirmwareVersion::new(1, 0, 0),
        hw_version: HardwareVersion { major: 2, minor: 1 },
        hw_revision: 3,
    }
}

/// Manager over formatted flash with factory metadata.
pub fn provisioned_manager() -> FlashManager<MockFlash> {
    let driver = FlashDriver::open(formatted_flash(), LAYOUT_ADDR).unwrap();
    let mut manager = FlashManager::new(driver);
    manager.provision(&factory_info()).unwrap();
    manager
}

pub fn config() -> OtauConfig {
    OtauConfig::new(LAYOUT_ADDR).with_factory_info(factory_info())
}

// =============================================================================
// Transport and application
// =============================================================================

#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Vec<Vec<u8>>,
    pub disconnects: Vec<ConnHandle>,
}

impl RecordingTransport {
    pub fn responses(&self) -> Vec<Response> {
        self.sent
            .iter()
            .map(|frame| Response::decode(frame).unwrap())
            .collect()
    }

    pub fn last(&self) -> Option<Response> {
        self.sent.last().map(|frame| Response::decode(frame).unwrap())
    }
}

impl Transport for RecordingTransport {
    type Error = Infallible;

    fn send_indication(&mut self, _conn: ConnHandle, frame: &[u8]) -> Result<(), Infallible> {
        self.sent.push(frame.to_vec());
        Ok(())
    }

    fn disconnect(&mut self, conn: ConnHandle) -> Result<(), Infallible> {
        self.disconnects.push(conn);
        Ok(())
    }
}

#[derive(Default)]
pub struct TestApp {
    pub restarts: usize,
    pub progress: Vec<(SectionId, u8)>,
    pub deny_image: bool,
    pub deny_switch: bool,
}

impl OtauApp for TestApp {
    fn authorize_image(&mut self, _new: FirmwareVersion, _running: FirmwareVersion) -> bool {
        !self.deny_image
    }

    fn authorize_switch(&mut self, _version: FirmwareVersion) -> bool {
        !self.deny_switch
    }

    fn progress(&mut self, section: SectionId, percent: u8) {
        self.progress.push((section, percent));
    }

    fn restart(&mut self) {
        self.restarts += 1;
    }
}

pub type TestSession = OtauSession<MockFlash, RecordingTransport, TestApp>;

/// Session over `flash`, already connected.
pub fn session_on(flash: MockFlash) -> TestSession {
    let mut session = OtauSession::init(
        flash,
        RecordingTransport::default(),
        TestApp::default(),
        config(),
    )
    .unwrap();
    session
        .handle_event(otau_common::Event::Connected(CONN))
        .unwrap();
    session
}

/// Feed one request and return the reply sent for it, if any.
pub fn send(
    session: &mut TestSession,
    request: &Request,
) -> (Result<(), otau_common::OtauError>, Option<Response>) {
    let before = session.transport().sent.len();
    let frame = request.to_frame().unwrap();
    let result = session.handle_frame(CONN, &frame);
    let transport = session.transport();
    let reply = (transport.sent.len() > before).then(|| transport.last().unwrap());
    (result, reply)
}

// =============================================================================
// Images
// =============================================================================

/// Wrap a payload the way it is stored: erased version word, size word,
/// payload, erased CRC word.
pub fn blob(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 12);
    out.extend_from_slice(&[0xFF; 4]);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&[0xFF; 4]);
    out
}

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

pub struct TestImage {
    pub version: FirmwareVersion,
    pub blobs: Vec<Vec<u8>>,
}

impl TestImage {
    /// One blob per entry of `blob_sizes`, each `blob_sizes[i]` bytes long.
    pub fn new(version: FirmwareVersion, blob_sizes: &[usize]) -> Self {
        let blobs = blob_sizes
            .iter()
            .enumerate()
            .map(|(i, size)| blob(&payload(size - 12, i as u8 + 1)))
            .collect();
        Self { version, blobs }
    }

    pub fn notify(&self, force: bool) -> ImageNotify {
        let device = factory_info();
        ImageNotify {
            force,
            product_id: device.product_id,
            vendor_id: device.vendor_id,
            total_sections: self.blobs.len() as u8,
            fw_version: self.version,
            hw_version: device.hw_version,
            hw_revision: device.hw_revision,
            security_level: 0,
        }
    }

    pub fn total_size(&self) -> u32 {
        self.blobs.iter().map(|b| b.len() as u32).sum()
    }

    pub fn total_crc(&self) -> u32 {
        let mut crc = Crc32Stream::new();
        for blob in &self.blobs {
            crc.update(blob);
        }
        crc.value()
    }

    pub fn info(&self) -> ImageInfo {
        let mut sections = [SectionDescriptor::default(); TOTAL_SECTIONS];
        let mut section_crcs = [0; TOTAL_SECTIONS];
        for (i, blob) in self.blobs.iter().enumerate() {
            sections[i] = SectionDescriptor {
                id: i as u8 + 1,
                size: blob.len() as u32,
                start_address: 0,
            };
            section_crcs[i] = crc::checksum(blob);
        }
        ImageInfo {
            total_sections: self.blobs.len() as u8,
            total_size: self.total_size(),
            sections,
            total_crc: self.total_crc(),
            section_crcs,
        }
    }

    pub fn end(&self) -> ImageEnd {
        ImageEnd {
            total_sections: self.blobs.len() as u8,
            total_size: self.total_size(),
            total_crc: self.total_crc(),
        }
    }

    pub fn pages(&self, section: SectionId) -> Vec<Request> {
        self.blobs[section.index()]
            .chunks(PAGE_SIZE as usize)
            .enumerate()
            .map(|(n, chunk)| {
                Request::PageData(PageData {
                    section_id: section.id(),
                    page_no: n as u16,
                    data: PageBuf::from_slice(chunk).unwrap(),
                })
            })
            .collect()
    }

    pub fn switch(&self) -> Request {
        Request::ImageSwitch {
            total_sections: self.blobs.len() as u8,
            fw_version: self.version,
        }
    }
}

/// Run notify, info, every page, section ends and image end; panics on any failure.
pub fn download(session: &mut TestSession, image: &TestImage) {
    let (r, _) = send(session, &Request::ImageNotify(image.notify(false)));
    r.unwrap();
    let (r, _) = send(session, &Request::ImageInfo(image.info()));
    r.unwrap();
    for i in 0..image.blobs.len() {
        let section = SectionId::ALL[i];
        for page in image.pages(section) {
            let (r, _) = send(session, &page);
            r.unwrap();
        }
        let (r, _) = send(
            session,
            &Request::SectionEnd {
                section_id: section.id(),
            },
        );
        r.unwrap();
    }
    let (r, _) = send(session, &Request::ImageEnd(image.end()));
    r.unwrap();
}

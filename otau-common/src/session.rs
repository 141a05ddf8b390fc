// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Update session: one OTAU target talking to one update manager.
//!
//! The session owns the flash manager, the transport and the application
//! hooks. It is driven one event at a time through
//! [`handle_event`](OtauSession::handle_event); each inbound frame produces at
//! most one reply frame.

use embedded_storage::nor_flash::NorFlash;
use heapless::Deque;

use crate::crc::Crc32Stream;
use crate::driver::FlashDriver;
use crate::error::{OtauError, StateError, StorageError};
use crate::fsm::{OtauState, StateMachine};
use crate::manager::FlashManager;
use crate::metadata::SlotRole;
use crate::protocol::{
    DeviceInfo, FirmwareVersion, ImageEnd, ImageInfo, ImageNotify, ImageOption, PageData, Request,
    Response, SectionId, StatusCode, TOTAL_SECTIONS,
};

pub type ConnHandle = u16;

/// Posted events waiting for [`OtauSession::poll`].
const POSTED_EVENTS: usize = 4;

/// Connection-independent settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtauConfig {
    /// Flash offset of the layout header.
    pub layout_addr: u32,
    /// Identity written as factory metadata when no valid metadata exists.
    pub factory_info: Option<DeviceInfo>,
}

impl OtauConfig {
    pub const fn new(layout_addr: u32) -> Self {
        Self {
            layout_addr,
            factory_info: None,
        }
    }

    pub fn with_factory_info(mut self, info: DeviceInfo) -> Self {
        self.factory_info = Some(info);
        self
    }
}

/// Link to the update manager.
pub trait Transport {
    type Error;

    fn send_indication(&mut self, conn: ConnHandle, frame: &[u8]) -> Result<(), Self::Error>;
    fn disconnect(&mut self, conn: ConnHandle) -> Result<(), Self::Error>;
}

/// Application hooks. Everything but [`restart`](OtauApp::restart) defaults to allow.
pub trait OtauApp {
    /// Accept an offered image. Not consulted for forced updates.
    fn authorize_image(&mut self, new: FirmwareVersion, running: FirmwareVersion) -> bool {
        let _ = (new, running);
        true
    }

    fn authorize_switch(&mut self, version: FirmwareVersion) -> bool {
        let _ = version;
        true
    }

    fn progress(&mut self, section: SectionId, percent: u8) {
        let _ = (section, percent);
    }

    /// Reboot into the newly switched image.
    fn restart(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'a> {
    Connected(ConnHandle),
    Disconnected(ConnHandle),
    Frame { conn: ConnHandle, data: &'a [u8] },
    /// Posted after a committed image switch.
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum PostedEvent {
    Reset,
}

/// Failed request: the reply to send and the error to report.
struct Rejection {
    reply: Response,
    error: OtauError,
}

impl Rejection {
    fn new(reply: Response, error: impl Into<OtauError>) -> Self {
        Self {
            reply,
            error: error.into(),
        }
    }

    fn status(reply: Response, status: StatusCode) -> Self {
        Self::new(reply, OtauError::Rejected(status))
    }
}

impl From<StateError> for Rejection {
    fn from(e: StateError) -> Self {
        Self::new(
            Response::Failure {
                status: StatusCode::InvalidCommand,
            },
            e,
        )
    }
}

impl From<StorageError> for Rejection {
    fn from(e: StorageError) -> Self {
        Self::new(
            Response::Failure {
                status: StatusCode::FlashDriverFailed,
            },
            e,
        )
    }
}

trait OrReply<T> {
    fn or_reply(self, reply: Response) -> Result<T, Rejection>;
}

impl<T, E: Into<OtauError>> OrReply<T> for Result<T, E> {
    fn or_reply(self, reply: Response) -> Result<T, Rejection> {
        self.map_err(|e| Rejection::new(reply, e))
    }
}

type Outcome = Result<Option<Response>, Rejection>;

pub struct OtauSession<F, T, A> {
    flash: FlashManager<F>,
    transport: T,
    app: A,
    fsm: StateMachine,
    config: OtauConfig,
    conn: Option<ConnHandle>,
    switched: bool,
    posted: Deque<PostedEvent, POSTED_EVENTS>,
}

impl<F: NorFlash, T: Transport, A: OtauApp> OtauSession<F, T, A> {
    /// Discover the flash layout, reconcile metadata and get ready for Image Notify.
    pub fn init(flash: F, transport: T, app: A, config: OtauConfig) -> Result<Self, OtauError> {
        let mut fsm = StateMachine::new();
        fsm.request(OtauState::Init)?;
        let driver = FlashDriver::open(flash, config.layout_addr)?;
        let mut session = Self {
            flash: FlashManager::new(driver),
            transport,
            app,
            fsm,
            config,
            conn: None,
            switched: false,
            posted: Deque::new(),
        };
        session.start_flash_manager()?;
        Ok(session)
    }

    /// Leave Abort (or any state that allows it) and start over.
    pub fn reinit(&mut self) -> Result<(), OtauError> {
        self.fsm.request(OtauState::Init)?;
        self.start_flash_manager()
    }

    fn start_flash_manager(&mut self) -> Result<(), OtauError> {
        match (self.flash.reconcile(), self.config.factory_info) {
            (Ok(_outcome), _) => {
                #[cfg(feature = "defmt")]
                defmt::info!("running {}", _outcome.running_version);
            }
            (Err(StorageError::MetadataCorrupted), Some(info)) => self.flash.provision(&info)?,
            (Err(e), _) => return Err(e.into()),
        }
        self.flash.blank_incoming_versions()?;
        self.fsm.request(OtauState::FlashManagerInit)?;
        Ok(())
    }

    pub fn state(&self) -> OtauState {
        self.fsm.state()
    }

    pub fn previous_state(&self) -> OtauState {
        self.fsm.previous()
    }

    pub fn flash(&mut self) -> &mut FlashManager<F> {
        &mut self.flash
    }

    pub fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn app(&mut self) -> &mut A {
        &mut self.app
    }

    pub fn into_parts(self) -> (F, T, A) {
        (self.flash.release(), self.transport, self.app)
    }

    // --- Application operations ---

    /// Ask the manager to pause; the state is saved when it acknowledges.
    pub fn pause(&mut self) -> Result<(), OtauError> {
        self.reply(&Response::PauseRequest)
    }

    /// Ask the manager to resume and return to the state saved at pause.
    pub fn resume(&mut self) -> Result<(), OtauError> {
        let incoming = self.flash.read_metadata(SlotRole::Incoming)?;
        self.reply(&Response::ResumeRequest {
            info: incoming.device,
        })?;
        self.fsm.restore();
        Ok(())
    }

    pub fn restart_device(&mut self) {
        self.app.restart();
    }

    /// Handle posted events.
    pub fn poll(&mut self) -> Result<(), OtauError> {
        while let Some(event) = self.posted.pop_front() {
            match event {
                PostedEvent::Reset => self.handle_event(Event::Reset)?,
            }
        }
        Ok(())
    }

    pub fn handle_event(&mut self, event: Event<'_>) -> Result<(), OtauError> {
        match event {
            Event::Connected(conn) => {
                self.conn = Some(conn);
                Ok(())
            }
            Event::Disconnected(conn) => {
                if self.conn == Some(conn) {
                    self.conn = None;
                    if self.fsm.state() != OtauState::Abort {
                        self.fsm.disconnect();
                    }
                }
                Ok(())
            }
            Event::Frame { conn, data } => self.handle_frame(conn, data),
            Event::Reset => {
                self.restart_device();
                Ok(())
            }
        }
    }

    /// Decode one inbound frame, act on it and send the reply.
    pub fn handle_frame(&mut self, conn: ConnHandle, frame: &[u8]) -> Result<(), OtauError> {
        if self.conn != Some(conn) {
            return Err(OtauError::NotConnected);
        }
        let outcome = match Request::decode(frame) {
            Ok(request) => self.dispatch(request),
            Err(e) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("bad frame: {}", e);
                Err(Rejection::new(
                    Response::Failure {
                        status: StatusCode::InvalidCommand,
                    },
                    e,
                ))
            }
        };
        match outcome {
            Ok(Some(response)) => self.reply(&response)?,
            Ok(None) => {}
            Err(Rejection { reply, error }) => {
                self.reply(&reply)?;
                return Err(error);
            }
        }
        if core::mem::take(&mut self.switched) {
            self.transport
                .disconnect(conn)
                .map_err(|_| OtauError::Transport)?;
            if self.posted.push_back(PostedEvent::Reset).is_err() {
                #[cfg(feature = "defmt")]
                defmt::warn!("event queue full, reset dropped");
            }
        }
        Ok(())
    }

    fn reply(&mut self, response: &Response) -> Result<(), OtauError> {
        let conn = self.conn.ok_or(OtauError::NotConnected)?;
        let frame = response.to_frame()?;
        self.transport
            .send_indication(conn, &frame)
            .map_err(|_| OtauError::Transport)
    }

    fn dispatch(&mut self, request: Request) -> Outcome {
        match request {
            Request::GetDeviceInfo => self.on_device_info(),
            Request::ImageNotify(notify) => self.on_image_notify(&notify),
            Request::ImageInfo(info) => self.on_image_info(&info),
            Request::PageData(page) => self.on_page_data(&page),
            Request::SectionEnd { section_id } => self.on_section_end(section_id),
            Request::ImageEnd(end) => self.on_image_end(&end),
            Request::ImageSwitch {
                total_sections,
                fw_version,
            } => self.on_image_switch(total_sections, fw_version),
            Request::Pause => self.on_pause(),
            Request::PauseAck => {
                self.fsm.pause();
                Ok(None)
            }
            Request::Resume => self.on_resume(),
            Request::Abort => {
                #[cfg(feature = "defmt")]
                defmt::info!("update aborted by manager");
                self.fsm.abort();
                Ok(None)
            }
        }
    }

    // --- Request handlers ---

    fn on_device_info(&mut self) -> Outcome {
        let info = self.flash.device_info()?;
        let incoming = self.flash.read_metadata(SlotRole::Incoming)?;
        let pending = incoming.device.fw_version;
        let resumable = incoming.resume_point(self.flash.page_size()).is_some();
        let pending_version = if resumable && pending.is_valid() && pending > info.fw_version {
            pending
        } else {
            FirmwareVersion::BLANK
        };
        Ok(Some(Response::DeviceInfo {
            info,
            pending_version,
        }))
    }

    fn on_image_notify(&mut self, notify: &ImageNotify) -> Outcome {
        self.fsm.request(OtauState::ImageNotification)?;
        let running = self.flash.device_info()?;
        let invalid = Response::Failure {
            status: StatusCode::InvalidImage,
        };
        if !running.accepts(notify) {
            return Err(Rejection::status(invalid, StatusCode::InvalidImage));
        }
        if !notify.force && !self.app.authorize_image(notify.fw_version, running.fw_version) {
            return Err(Rejection::status(invalid, StatusCode::InvalidImage));
        }

        let mut incoming = self.flash.read_metadata(SlotRole::Incoming)?;
        let resumable = !notify.force
            && incoming.device.is_same_image(notify)
            && incoming.resume_point(self.flash.page_size()).is_some();
        let option = if resumable {
            ImageOption::Resume
        } else {
            incoming.start_image(&running, notify);
            self.flash.update_incoming(&incoming)?;
            ImageOption::Start
        };
        #[cfg(feature = "defmt")]
        defmt::info!("image {} offered: {}", notify.fw_version, option);

        Ok(Some(Response::ImageNotify {
            force: notify.force,
            hw_revision: running.hw_revision,
            fw_version: running.fw_version,
            hw_version: running.hw_version,
            option,
        }))
    }

    /// Section table fits the device: known ids in order, each within one half.
    fn image_fits(&self, info: &ImageInfo) -> bool {
        let layout = self.flash.layout();
        let count = usize::from(info.total_sections);
        if count == 0 || count > TOTAL_SECTIONS || info.total_size > layout.capacity() {
            return false;
        }
        let mut sum = 0u32;
        for (section, descriptor) in SectionId::ALL.iter().zip(&info.sections).take(count) {
            if descriptor.id != section.id()
                || descriptor.size == 0
                || descriptor.size > layout.section(*section).half_size()
            {
                return false;
            }
            sum = sum.saturating_add(descriptor.size);
        }
        sum == info.total_size
    }

    fn on_image_info(&mut self, info: &ImageInfo) -> Outcome {
        self.fsm.request(OtauState::ImageInfoWait)?;
        if !self.image_fits(info) {
            return Err(Rejection::status(
                Response::ImageInfoError {
                    status: StatusCode::InvalidImageSize,
                },
                StatusCode::InvalidImageSize,
            ));
        }

        let page_size = self.flash.page_size();
        let mut incoming = self.flash.read_metadata(SlotRole::Incoming)?;
        let resume = if incoming.matches_image_info(info) {
            incoming.resume_point(page_size)
        } else {
            None
        };
        let (option, section, page_no) = match resume {
            Some(point) => (ImageOption::Resume, point.section, point.page_no),
            None => {
                incoming.accept_image_info(info);
                self.flash.update_incoming(&incoming)?;
                for section in incoming.declared_sections() {
                    self.flash.erase_incoming(&incoming, section)?;
                }
                (ImageOption::Start, SectionId::Patch, 0)
            }
        };
        self.fsm.request(OtauState::PageDownloadStart)?;

        Ok(Some(Response::ImageInfo {
            option,
            section_id: section.id(),
            page_no,
            block_no: 0,
            page_size: page_size as u16,
            block_size: page_size as u16,
        }))
    }

    fn on_page_data(&mut self, page: &PageData) -> Outcome {
        self.fsm.request(OtauState::PageDownloading)?;
        let fail = Response::PageError {
            section_id: page.section_id,
            page_no: page.page_no,
        };
        let reject = |status| Rejection::status(fail, status);

        let mut incoming = self
            .flash
            .read_metadata(SlotRole::Incoming)
            .or_reply(fail)?;
        let section = SectionId::from_id(page.section_id)
            .filter(|s| incoming.declared_sections().any(|d| d == *s))
            .ok_or_else(|| reject(StatusCode::InvalidSection))?;

        let page_size = self.flash.page_size();
        let len = page.data.len() as u32;
        let downloaded = incoming.downloaded(section);
        let declared = incoming.descriptor(section).size;
        if len == 0
            || len > page_size
            || u32::from(page.page_no) * page_size != downloaded
            || downloaded + len > declared
        {
            return Err(reject(StatusCode::ImagePageInfoError));
        }

        self.flash
            .write_page(&incoming, section, page.page_no, &page.data)
            .or_reply(fail)?;
        incoming.progress[section.index()].downloaded = downloaded + len;
        self.flash.update_incoming(&incoming).or_reply(fail)?;
        self.app.progress(section, incoming.percent(section));

        Ok(Some(Response::PageData {
            section_id: page.section_id,
            page_no: page.page_no,
        }))
    }

    fn on_section_end(&mut self, section_id: u8) -> Outcome {
        self.fsm.request(OtauState::SectionEnd)?;
        let fail = Response::SectionEndError { section_id };
        let reject = |status| Rejection::status(fail, status);

        let mut incoming = self
            .flash
            .read_metadata(SlotRole::Incoming)
            .or_reply(fail)?;
        let section = SectionId::from_id(section_id)
            .filter(|s| incoming.is_section_complete(*s))
            .ok_or_else(|| reject(StatusCode::ImageSectionEndError))?;

        let crc = self
            .flash
            .section_crc(
                &incoming,
                section,
                incoming.downloaded(section),
                Crc32Stream::new(),
            )
            .or_reply(fail)?
            .value();
        if crc != incoming.section_crc(section) {
            #[cfg(feature = "defmt")]
            defmt::warn!("section {} crc mismatch, discarding it", section);
            incoming.progress[section.index()].downloaded = 0;
            self.flash.update_incoming(&incoming).or_reply(fail)?;
            self.flash
                .erase_incoming(&incoming, section)
                .or_reply(fail)?;
            return Err(reject(StatusCode::ImageSectionEndError));
        }

        self.fsm.request(OtauState::SectionEndConfirm)?;
        Ok(Some(Response::SectionEnd { section_id }))
    }

    fn on_image_end(&mut self, end: &ImageEnd) -> Outcome {
        self.fsm.request(OtauState::ImageEnd)?;
        let fail = Response::Failure {
            status: StatusCode::ImageVerificationFailed,
        };
        let reject = || Rejection::status(fail, StatusCode::ImageVerificationFailed);

        let incoming = self
            .flash
            .read_metadata(SlotRole::Incoming)
            .or_reply(fail)?;
        if !incoming.is_download_complete()
            || end.total_sections != incoming.total_sections()
            || end.total_size != incoming.total_size
        {
            return Err(reject());
        }
        let crc = self.flash.image_crc(&incoming).or_reply(fail)?;
        if crc != end.total_crc || crc != incoming.total_crc {
            return Err(reject());
        }

        self.fsm.request(OtauState::ImageEndConfirm)?;
        Ok(Some(Response::ImageEnd(*end)))
    }

    fn on_image_switch(&mut self, total_sections: u8, fw_version: FirmwareVersion) -> Outcome {
        self.fsm.request(OtauState::ImageSwitch)?;
        let fail = Response::Failure {
            status: StatusCode::ImageSwitchError,
        };
        let reject = || Rejection::status(fail, StatusCode::ImageSwitchError);

        if !self.app.authorize_switch(fw_version) {
            return Err(reject());
        }
        let incoming = self
            .flash
            .read_metadata(SlotRole::Incoming)
            .or_reply(fail)?;
        if incoming.device.fw_version != fw_version
            || incoming.total_sections() != total_sections
            || !incoming.is_download_complete()
        {
            return Err(reject());
        }
        for section in incoming.declared_sections() {
            self.flash
                .stamp_image(&incoming, section)
                .or_reply(fail)?;
        }
        self.flash.commit_switch().or_reply(fail)?;

        self.fsm.request(OtauState::ImageSwitchConfirm)?;
        self.switched = true;
        Ok(Some(Response::ImageSwitch { total_sections }))
    }

    fn on_pause(&mut self) -> Outcome {
        let declined = || Rejection::status(Response::CommandFailed, StatusCode::CommandFailed);
        if self.fsm.state() == OtauState::Abort {
            return Err(declined());
        }
        let incoming = self.flash.read_metadata(SlotRole::Incoming)?;
        if let Some(point) = incoming.resume_point(self.flash.page_size()) {
            if point.section == SectionId::App && incoming.percent(SectionId::App) > 98 {
                return Err(declined());
            }
        }
        self.fsm.pause();
        Ok(Some(Response::PauseAck))
    }

    fn on_resume(&mut self) -> Outcome {
        self.fsm.request(OtauState::ImageResume)?;
        let incoming = self.flash.read_metadata(SlotRole::Incoming)?;
        Ok(Some(Response::Resume {
            info: incoming.device,
        }))
    }
}

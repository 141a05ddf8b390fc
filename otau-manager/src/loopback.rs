// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! In-process target: an update session over any NOR flash, reached through [`Link`].

use std::collections::VecDeque;
use std::convert::Infallible;

use anyhow::{Context, Result};
use embedded_storage::nor_flash::NorFlash;

use otau_common::{
    ConnHandle, Event, FlashManager, OtauApp, OtauConfig, OtauSession, Request, Response,
    Transport,
};

use crate::transport::Link;

const CONN: ConnHandle = 1;

/// Frames the target sent, oldest first.
#[derive(Default)]
pub struct Outbox {
    frames: VecDeque<Vec<u8>>,
}

impl Transport for Outbox {
    type Error = Infallible;

    fn send_indication(&mut self, _conn: ConnHandle, frame: &[u8]) -> Result<(), Infallible> {
        self.frames.push_back(frame.to_vec());
        Ok(())
    }

    fn disconnect(&mut self, _conn: ConnHandle) -> Result<(), Infallible> {
        Ok(())
    }
}

/// Target application: accepts every image and records the restart request.
#[derive(Default)]
pub struct SimulatedApp {
    pub restarted: bool,
}

impl OtauApp for SimulatedApp {
    fn restart(&mut self) {
        self.restarted = true;
    }
}

pub struct LoopbackLink<F> {
    session: OtauSession<F, Outbox, SimulatedApp>,
}

impl<F: NorFlash> LoopbackLink<F> {
    /// Boot the target on `flash` and connect to it.
    pub fn boot(flash: F, config: OtauConfig) -> Result<Self> {
        let mut session = OtauSession::init(flash, Outbox::default(), SimulatedApp::default(), config)
            .context("Target failed to boot")?;
        session.handle_event(Event::Connected(CONN))?;
        Ok(Self { session })
    }

    /// The target asked to be restarted into a new image.
    pub fn restarted(&mut self) -> bool {
        self.session.app().restarted
    }

    pub fn flash(&mut self) -> &mut FlashManager<F> {
        self.session.flash()
    }

    /// Power the target off and hand back its flash.
    pub fn shutdown(self) -> F {
        self.session.into_parts().0
    }
}

impl<F: NorFlash> Link for LoopbackLink<F> {
    fn send(&mut self, request: &Request) -> Result<()> {
        let frame = request.to_frame()?;
        let queued = self.session.transport().frames.len();
        if let Err(e) = self.session.handle_frame(CONN, &frame) {
            // rejected requests are answered; anything else is a target fault
            if self.session.transport().frames.len() == queued {
                return Err(e).context("Target failed to handle the request");
            }
        }
        self.session.poll()?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Response> {
        let frame = self
            .session
            .transport()
            .frames
            .pop_front()
            .context("Target sent no response")?;
        Ok(Response::decode(&frame)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{self, UploadOptions, LAYOUT_ADDR};
    use crate::file_flash::FileFlash;
    use crate::package::{Identity, Package};
    use otau_common::{DeviceInfo, FirmwareVersion, Half, HardwareVersion, StatusCode};

    const FLASH_SIZE: u32 = 0x80000;

    fn device() -> DeviceInfo {
        DeviceInfo {
            product_id: 0x0102,
            vendor_id: 0x0304,
            total_sections: 0,
            fw_version: FirmwareVersion::new(1, 0, 0),
            hw_version: HardwareVersion { major: 2, minor: 1 },
            hw_revision: 3,
        }
    }

    fn formatted() -> FileFlash {
        commands::format_flash(&commands::FormatOptions::default_for(FLASH_SIZE), &device()).unwrap()
    }

    fn package(version: FirmwareVersion, app_len: usize) -> Package {
        let identity = Identity {
            product_id: 0x0102,
            vendor_id: 0x0304,
            fw_version: version,
            hw_version: HardwareVersion { major: 2, minor: 1 },
            hw_revision: 3,
            security_level: 0,
        };
        let app = (0..app_len).map(|i| (i * 7) as u8).collect();
        Package::build(&identity, &[vec![0x11; 500], vec![0x22; 64], app]).unwrap()
    }

    fn boot(flash: FileFlash) -> LoopbackLink<FileFlash> {
        LoopbackLink::boot(flash, OtauConfig::new(LAYOUT_ADDR)).unwrap()
    }

    #[test]
    fn test_upload_and_switch() {
        let package = package(FirmwareVersion::new(2, 0, 0), 5000);
        let mut link = boot(formatted());
        let options = UploadOptions {
            force: false,
            switch: true,
        };
        assert!(commands::upload(&mut link, &package, options).unwrap());
        assert!(link.restarted());

        let mut link = boot(link.shutdown());
        let info = link.flash().device_info().unwrap();
        assert_eq!(info.fw_version, FirmwareVersion::new(2, 0, 0));
        assert_eq!(link.flash().running_halves(), [Half::Bottom; 3]);
    }

    #[test]
    fn test_upload_without_switch_keeps_running_image() {
        let package = package(FirmwareVersion::new(2, 0, 0), 5000);
        let mut link = boot(formatted());
        let options = UploadOptions {
            force: false,
            switch: false,
        };
        assert!(!commands::upload(&mut link, &package, options).unwrap());
        assert!(!link.restarted());

        let mut link = boot(link.shutdown());
        assert_eq!(
            link.flash().device_info().unwrap().fw_version,
            FirmwareVersion::new(1, 0, 0)
        );
    }

    #[test]
    fn test_rejected_image_reports_status() {
        let mut other = package(FirmwareVersion::new(2, 0, 0), 100);
        other.header.vendor_id = 0x9999;
        let mut link = boot(formatted());
        let options = UploadOptions {
            force: false,
            switch: true,
        };
        let err = commands::upload(&mut link, &other, options).unwrap_err();
        assert!(format!("{err:#}").contains(&format!("{:?}", StatusCode::InvalidImage)));
    }

    #[test]
    fn test_abort_gets_no_reply() {
        let mut link = boot(formatted());
        link.send(&Request::Abort).unwrap();
        assert!(link.receive().is_err());
    }

    #[test]
    fn test_device_info_exchange() {
        let mut link = boot(formatted());
        let reply = link.exchange(&Request::GetDeviceInfo).unwrap();
        assert_eq!(
            reply,
            Response::DeviceInfo {
                info: device(),
                pending_version: FirmwareVersion::BLANK,
            }
        );
    }
}

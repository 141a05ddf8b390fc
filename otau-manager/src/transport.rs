// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Links to an OTAU target: the request/response seam and its serial implementation.

use anyhow::{bail, Context, Result};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;

use otau_common::protocol::frame_length;
use otau_common::{Request, Response, MAX_FRAME_SIZE};

/// Default timeout for serial operations in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

pub const BAUD_RATE: u32 = 115_200;

/// Request/response channel to one target.
pub trait Link {
    /// Send one request frame.
    fn send(&mut self, request: &Request) -> Result<()>;

    /// Wait for the next frame from the target.
    fn receive(&mut self) -> Result<Response>;

    /// Send a request and wait for the reply.
    fn exchange(&mut self, request: &Request) -> Result<Response> {
        self.send(request)?;
        self.receive()
    }
}

/// Serial link carrying length-prefixed frames.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    /// Open `port_name` with a custom timeout.
    pub fn with_timeout(port_name: &str, timeout_ms: u64) -> Result<Self> {
        let port = serialport::new(port_name, BAUD_RATE)
            .timeout(Duration::from_millis(timeout_ms))
            .open()
            .with_context(|| format!("Failed to open serial port {}", port_name))?;
        let mut link = Self { port };
        link.drain_rx();
        Ok(link)
    }

    fn drain_rx(&mut self) {
        let mut buf = [0u8; 64];
        let old_timeout = self.port.timeout();
        let _ = self.port.set_timeout(Duration::from_millis(10));
        while self.port.read(&mut buf).unwrap_or(0) > 0 {}
        let _ = self.port.set_timeout(old_timeout);
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.port.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                bail!("Timeout waiting for response")
            }
            Err(e) => bail!("Serial read error: {}", e),
        }
    }
}

impl Link for SerialLink {
    fn send(&mut self, request: &Request) -> Result<()> {
        let frame = request
            .to_frame()
            .with_context(|| format!("Failed to encode {:?}", request.command()))?;
        self.port
            .write_all(&frame)
            .context("Failed to write to serial port")?;
        self.port.flush()?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Response> {
        let mut frame = [0u8; MAX_FRAME_SIZE];
        self.read_exact(&mut frame[..2])?;
        let len = frame_length([frame[0], frame[1]]);
        if !(3..=MAX_FRAME_SIZE).contains(&len) {
            self.drain_rx();
            bail!("Invalid frame length {} from target", len);
        }
        self.read_exact(&mut frame[2..len])?;
        Response::decode(&frame[..len]).with_context(|| {
            format!(
                "Failed to decode response (raw {} bytes: {:02x?})",
                len,
                &frame[..len.min(32)]
            )
        })
    }
}

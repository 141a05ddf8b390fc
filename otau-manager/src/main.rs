// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Update manager for OTAU targets.
//!
//! Usage:
//!   otau-manager pack firmware.otau --app app.bin --version 2.0.0 --product 0x0102 --vendor 0x0304
//!   otau-manager --port /dev/ttyACM0 info
//!   otau-manager --port /dev/ttyACM0 upload firmware.otau
//!   otau-manager format flash.bin --version 1.0.0 --product 0x0102 --vendor 0x0304
//!   otau-manager simulate flash.bin firmware.otau

mod cli;
mod commands;
mod file_flash;
mod loopback;
mod package;
mod transport;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    cli::run(args)
}

// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Over-the-air update (OTAU) engine.
//!
//! The crate is split the way the update flows through it, leaves first:
//! - [`crc`]: streaming CRC-32 shared by every integrity check
//! - [`layout`] / [`driver`]: flash layout header and the bounds-checked page I/O driver
//! - [`metadata`] / [`manager`]: CRC-protected metadata record and the A/B flash manager
//! - [`fsm`] / [`session`]: protocol state machine and the per-connection update session
//! - [`protocol`]: wire messages exchanged with the update manager
//! - [`package`]: firmware package header shared with host tools
//!
//! This crate supports both `no_std` (embedded) and `std` (host) environments:
//! - Default: `no_std` mode for embedded targets
//! - `std` feature: Enables `std` support for host tools
//! - `defmt` feature: Enables `defmt` logging and `defmt::Format` derives

#![cfg_attr(not(feature = "std"), no_std)]

pub mod codec;
pub mod crc;
pub mod driver;
pub mod error;
pub mod fsm;
pub mod layout;
pub mod manager;
pub mod metadata;
pub mod package;
pub mod protocol;
pub mod session;

// Re-export commonly used types
pub use error::{CodecError, FlashError, LayoutError, OtauError, StateError, StorageError};
pub use fsm::{OtauState, StateMachine};
pub use layout::{FlashLayout, Half, FLASH_SECTOR_SIZE};
pub use manager::FlashManager;
pub use metadata::{MetadataRecord, SlotRole};
pub use protocol::{
    CommandCode, DeviceInfo, FirmwareVersion, HardwareVersion, ImageOption, Request, Response,
    SectionId, StatusCode, MAX_FRAME_SIZE, MAX_PAGE_SIZE, TOTAL_SECTIONS,
};
pub use session::{ConnHandle, Event, OtauApp, OtauConfig, OtauSession, Transport};

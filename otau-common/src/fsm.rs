// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Update protocol state machine - pure logic without flash or transport.
//!
//! Every inbound message requests a target state. The request is looked up in
//! [`TRANSITIONS`]; a pair with no entry sends the machine to
//! [`OtauState::Abort`], which only an explicit re-initialization leaves.

use crate::error::StateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OtauState {
    Idle,
    Init,
    FlashManagerInit,
    ImageNotification,
    ImageInfoWait,
    PageDownloadStart,
    PageDownloading,
    SectionEnd,
    SectionEndConfirm,
    ImageEnd,
    ImageEndConfirm,
    ImageSwitch,
    ImageSwitchConfirm,
    Pause,
    ImageResume,
    ImageResumeConfirm,
    Abort,
    Stopped,
    Disconnected,
    // Block transfer states are declared by the protocol but never entered.
    BlockDownload,
    SectionDownload,
    PageEnd,
    PageEndConfirm,
}

/// Every state, for exhaustive checks.
pub const ALL_STATES: [OtauState; 23] = [
    OtauState::Idle,
    OtauState::Init,
    OtauState::FlashManagerInit,
    OtauState::ImageNotification,
    OtauState::ImageInfoWait,
    OtauState::PageDownloadStart,
    OtauState::PageDownloading,
    OtauState::SectionEnd,
    OtauState::SectionEndConfirm,
    OtauState::ImageEnd,
    OtauState::ImageEndConfirm,
    OtauState::ImageSwitch,
    OtauState::ImageSwitchConfirm,
    OtauState::Pause,
    OtauState::ImageResume,
    OtauState::ImageResumeConfirm,
    OtauState::Abort,
    OtauState::Stopped,
    OtauState::Disconnected,
    OtauState::BlockDownload,
    OtauState::SectionDownload,
    OtauState::PageEnd,
    OtauState::PageEndConfirm,
];

use OtauState as S;

/// Allowed `(current, [requested...])` pairs.
pub const TRANSITIONS: [(OtauState, &[OtauState]); 23] = [
    (S::Idle, &[S::Init]),
    (S::Init, &[S::FlashManagerInit]),
    (S::FlashManagerInit, &[S::ImageNotification]),
    (S::ImageNotification, &[S::ImageInfoWait, S::ImageNotification]),
    (
        S::ImageInfoWait,
        &[S::PageDownloadStart, S::BlockDownload, S::ImageNotification],
    ),
    (S::PageDownloadStart, &[S::PageDownloading]),
    (S::PageDownloading, &[S::PageDownloading, S::SectionEnd]),
    (S::SectionEnd, &[S::SectionEndConfirm]),
    (
        S::SectionEndConfirm,
        &[S::PageDownloadStart, S::PageDownloading, S::ImageEnd],
    ),
    (S::ImageEnd, &[S::ImageEndConfirm]),
    (S::ImageEndConfirm, &[S::ImageSwitch]),
    (S::ImageSwitch, &[S::ImageSwitchConfirm]),
    (S::ImageSwitchConfirm, &[S::Init]),
    (S::Pause, &[S::ImageResume]),
    (S::ImageResume, &[S::ImageNotification, S::Init]),
    (S::ImageResumeConfirm, &[S::Init]),
    (S::BlockDownload, &[S::Init]),
    (S::SectionDownload, &[S::Init]),
    (S::PageEnd, &[S::Init]),
    (S::PageEndConfirm, &[S::Init]),
    (S::Abort, &[S::Init]),
    (S::Stopped, &[S::Init]),
    (S::Disconnected, &[S::ImageNotification, S::Init]),
];

/// Target state if `requested` is reachable from `current`.
pub fn transition(current: OtauState, requested: OtauState) -> Option<OtauState> {
    TRANSITIONS
        .iter()
        .find_map(|(from, allowed)| (*from == current).then_some(*allowed))
        .filter(|allowed| allowed.contains(&requested))
        .map(|_| requested)
}

/// Current and previous state of one update session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StateMachine {
    current: OtauState,
    previous: OtauState,
}

impl StateMachine {
    pub const fn new() -> Self {
        Self {
            current: OtauState::Idle,
            previous: OtauState::Idle,
        }
    }

    pub fn state(&self) -> OtauState {
        self.current
    }

    /// State saved by the last pause.
    pub fn previous(&self) -> OtauState {
        self.previous
    }

    /// Move to `requested`, or to Abort if the table has no such transition.
    pub fn request(&mut self, requested: OtauState) -> Result<OtauState, StateError> {
        match transition(self.current, requested) {
            Some(next) => {
                self.current = next;
                Ok(next)
            }
            None => {
                let from = self.current;
                #[cfg(feature = "defmt")]
                defmt::warn!("illegal transition {} -> {}, aborting", from, requested);
                self.current = OtauState::Abort;
                Err(StateError { from, requested })
            }
        }
    }

    /// Save the current state and pause. Pausing twice keeps the first saved state.
    pub fn pause(&mut self) {
        if self.current != OtauState::Pause {
            self.previous = self.current;
            self.current = OtauState::Pause;
        }
    }

    /// Return to the state saved by [`pause`](Self::pause).
    pub fn restore(&mut self) {
        self.current = self.previous;
    }

    pub fn disconnect(&mut self) {
        self.current = OtauState::Disconnected;
    }

    pub fn abort(&mut self) {
        self.current = OtauState::Abort;
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

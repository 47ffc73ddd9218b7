//! The `dialogs` section: `dialog-id → Dialog`, the call-signalling record
//! embedded inside a thread document so calls inherit the conversation's
//! routing (SPEC_FULL.md §1, §3).

use crate::ids::{DialogId, LocationId, PeerUri, Version};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DialogState {
    Preparing,
    Placed,
    Incoming,
    Early,
    Ringing,
    Open,
    Closing,
    Closed,
}

impl DialogState {
    /// SPEC_FULL.md §3 invariant 5: monotonic progression, or a direct
    /// jump to `Closed` from anywhere; a `Closed` dialog never re-opens.
    pub fn can_advance_to(&self, next: &DialogState) -> bool {
        use DialogState::*;
        if self == next {
            return true;
        }
        if *self == Closed {
            return false;
        }
        if *next == Closed {
            return true;
        }
        let rank = |s: &DialogState| match s {
            Preparing => 0,
            Placed | Incoming => 1,
            Early | Ringing => 2,
            Open => 3,
            Closing => 4,
            Closed => 5,
        };
        rank(next) > rank(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ClosedReason {
    None,
    User,
    RequestTimeout,
    TemporarilyUnavailable,
    Busy,
    RequestTerminated,
    NotAcceptableHere,
    ServerInternalError,
    Decline,
    /// ADDED: the dialog was superseded by a `replaces` pointer (S5
    /// re-answer scenario); not one of the wire codes in SPEC_FULL.md §6,
    /// but a locally meaningful reason the engine itself assigns.
    Replaced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MediaType {
    Audio,
    Video,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Description {
    pub media_type: Option<MediaType>,
    pub ssrc: u32,
    pub codecs: Vec<String>,
    pub ice_username: String,
    pub ice_password: String,
    pub candidates: Vec<String>,
    pub final_flag: bool,
    pub crypto: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Dialog {
    pub dialog_id: DialogId,
    pub state: DialogState,
    pub closed_reason: ClosedReason,
    pub caller_peer_uri: PeerUri,
    pub caller_location_id: LocationId,
    pub callee_peer_uri: PeerUri,
    pub callee_location_id: Option<LocationId>,
    pub replaces: Option<DialogId>,
    pub descriptions: Vec<Description>,
}

impl Dialog {
    pub fn new_placed(
        dialog_id: DialogId,
        caller: PeerUri,
        caller_location: LocationId,
        callee: PeerUri,
    ) -> Self {
        Self {
            dialog_id,
            state: DialogState::Placed,
            closed_reason: ClosedReason::None,
            caller_peer_uri: caller,
            caller_location_id: caller_location,
            callee_peer_uri: callee,
            callee_location_id: None,
            replaces: None,
            descriptions: Vec::new(),
        }
    }

    /// Apply a state transition, rejecting illegal moves per
    /// [`DialogState::can_advance_to`]. Returns `false` (no mutation) on a
    /// rejected move, matching the other sections' "diff is a no-op if it
    /// doesn't advance" behaviour rather than erroring the whole document.
    pub fn try_set_state(&mut self, next: DialogState, reason: ClosedReason) -> bool {
        if !self.state.can_advance_to(&next) {
            return false;
        }
        self.state = next;
        if self.state == DialogState::Closed {
            self.closed_reason = reason;
        }
        true
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DialogsSection {
    pub dialogs: BTreeMap<DialogId, Dialog>,
    pub version: Version,
}

impl DialogsSection {
    pub fn get(&self, id: &DialogId) -> Option<&Dialog> {
        self.dialogs.get(id)
    }

    pub fn upsert(&mut self, dialog: Dialog) {
        self.dialogs.insert(dialog.dialog_id.clone(), dialog);
    }

    pub fn remove(&mut self, id: &DialogId) -> Option<Dialog> {
        self.dialogs.remove(id)
    }
}

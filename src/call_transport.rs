//! Process-wide call transport (SPEC_FULL.md §4.8): the single owner of
//! the audio/video ICE sockets shared by every in-progress call, and the
//! focus-routing layer that wires exactly one call's RTP/RTCP onto the
//! media engine at a time.
//!
//! Grounded on `crypto.rs`/`encryption.rs`'s trait-parameterised designs,
//! applied here to an opaque `IceSession`/`MediaEngine` boundary; state
//! shape enriched from
//! `original_source/openpeer/core/cpp/core_CallTransport.cpp`. Non-goal:
//! no real STUN/TURN/ICE negotiation or media codec work, just the trait
//! interfaces an application would plug those into.

use crate::error::TransportError;
use crate::ids::{CallId, LocationId};
use std::collections::HashSet;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Pending,
    Ready,
    ShuttingDown,
    Shutdown,
}

/// One allocated ICE socket (audio or video).
pub trait IceSocket: Send + Sync {
    fn send_to(&self, location_id: &LocationId, packet: &[u8]) -> Result<(), TransportError>;
}

/// The opaque media engine wired to whichever call currently holds focus.
pub trait MediaEngine: Send {
    fn start(&mut self, call_id: &CallId, location_id: &LocationId) -> Result<(), TransportError>;
    fn stop(&mut self) -> Result<(), TransportError>;
    fn deliver_inbound_rtp(&mut self, packet: &[u8]) -> Result<(), TransportError>;
    fn deliver_inbound_rtcp(&mut self, packet: &[u8]) -> Result<(), TransportError>;
}

/// Allocates the two per-process ICE sockets on demand.
pub trait IceSocketFactory: Send {
    fn create_audio_socket(&self) -> Result<Box<dyn IceSocket>, TransportError>;
    fn create_video_socket(&self) -> Result<Box<dyn IceSocket>, TransportError>;
}

const RTCP_PT_LOW: u8 = 64;
const RTCP_PT_HIGH: u8 = 96;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Rtp,
    Rtcp,
}

/// Classify one RTP/RTCP packet by its second byte, the payload-type
/// field (SPEC_FULL.md §4.8): PT 64-96 is RTCP, everything else RTP.
pub fn classify_payload(packet: &[u8]) -> PacketKind {
    match packet.get(1) {
        Some(&pt) if (RTCP_PT_LOW..=RTCP_PT_HIGH).contains(&pt) => PacketKind::Rtcp,
        _ => PacketKind::Rtp,
    }
}

struct Focus {
    call_id: CallId,
    location_id: LocationId,
    has_audio: bool,
    has_video: bool,
}

pub struct CallTransport {
    state: TransportState,
    socket_factory: Box<dyn IceSocketFactory>,
    media_engine: Box<dyn MediaEngine>,
    audio_socket: Option<Box<dyn IceSocket>>,
    video_socket: Option<Box<dyn IceSocket>>,
    active_calls: HashSet<CallId>,
    focus: Option<Focus>,
    /// Serialises focus changes (SPEC_FULL.md §5): incremented once before
    /// tearing the old focus down and once more after the new one starts.
    /// Odd means a change is in flight and packets are dropped.
    focus_change_counter: u64,
    idle_since: Option<Instant>,
}

impl CallTransport {
    pub fn new(socket_factory: Box<dyn IceSocketFactory>, media_engine: Box<dyn MediaEngine>) -> Self {
        Self {
            state: TransportState::Pending,
            socket_factory,
            media_engine,
            audio_socket: None,
            video_socket: None,
            active_calls: HashSet::new(),
            focus: None,
            focus_change_counter: 0,
            idle_since: None,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    fn changing_focus(&self) -> bool {
        self.focus_change_counter % 2 == 1
    }

    /// A call started: allocate both ICE sockets if none were already
    /// in progress (SPEC_FULL.md §4.8).
    pub fn note_call_started(&mut self, call_id: CallId) -> Result<(), TransportError> {
        let was_empty = self.active_calls.is_empty();
        self.active_calls.insert(call_id);
        self.idle_since = None;
        if was_empty {
            self.audio_socket = Some(self.socket_factory.create_audio_socket()?);
            self.video_socket = Some(self.socket_factory.create_video_socket()?);
            self.state = TransportState::Ready;
        }
        Ok(())
    }

    /// A call ended: drop focus if it pointed here, start the idle clock
    /// once no call remains.
    pub fn note_call_ended(&mut self, call_id: &CallId) {
        self.active_calls.remove(call_id);
        if self.focus.as_ref().map(|f| &f.call_id) == Some(call_id) {
            self.clear_focus();
        }
        if self.active_calls.is_empty() {
            self.idle_since = Some(Instant::now());
        }
    }

    /// Release ICE sockets once the idle window has elapsed with no call
    /// in progress (SPEC_FULL.md §4.8, `unused_socket_idle_window`).
    pub fn release_idle_sockets(&mut self, now: Instant, idle_window: Duration) {
        if !self.active_calls.is_empty() {
            return;
        }
        let Some(since) = self.idle_since else { return };
        if now.duration_since(since) >= idle_window {
            self.audio_socket = None;
            self.video_socket = None;
            self.idle_since = None;
            self.state = TransportState::Pending;
        }
    }

    /// Switch focus to `(call_id, location_id)`: stop whatever held focus,
    /// bump the change counter so packets drop mid-switch, start the new
    /// one, bump again to re-open the gate (SPEC_FULL.md §4.8, §5).
    pub fn set_focus(
        &mut self,
        call_id: CallId,
        location_id: LocationId,
        has_audio: bool,
        has_video: bool,
    ) -> Result<(), TransportError> {
        self.focus_change_counter += 1;
        self.media_engine.stop()?;
        self.media_engine.start(&call_id, &location_id)?;
        self.focus_change_counter += 1;
        self.focus = Some(Focus {
            call_id,
            location_id,
            has_audio,
            has_video,
        });
        Ok(())
    }

    /// A dialog re-answer (SPEC_FULL.md §8 S5): the old call is already
    /// closed, so move focus straight to the new call's location without
    /// tearing it out of `active_calls` through `note_call_ended` (that
    /// would start the idle clock between the stop and the start below).
    pub fn transfer_focus(
        &mut self,
        old_call_id: &CallId,
        new_call_id: CallId,
        new_location_id: LocationId,
        has_audio: bool,
        has_video: bool,
    ) -> Result<(), TransportError> {
        self.active_calls.remove(old_call_id);
        self.active_calls.insert(new_call_id.clone());
        self.set_focus(new_call_id, new_location_id, has_audio, has_video)
    }

    pub fn clear_focus(&mut self) {
        if self.focus.is_none() {
            return;
        }
        self.focus_change_counter += 1;
        let _ = self.media_engine.stop();
        self.focus_change_counter += 1;
        self.focus = None;
    }

    pub fn focused(&self) -> Option<(&CallId, &LocationId)> {
        self.focus.as_ref().map(|f| (&f.call_id, &f.location_id))
    }

    /// Route one inbound packet from `location_id`: dropped unless it
    /// matches the focused location, no focus change is in flight, and the
    /// packet's direction is one this call actually wants.
    pub fn route_inbound(&mut self, location_id: &LocationId, packet: &[u8]) -> Result<(), TransportError> {
        if self.changing_focus() {
            return Ok(());
        }
        let Some(focus) = &self.focus else { return Ok(()) };
        if &focus.location_id != location_id {
            return Ok(());
        }
        match classify_payload(packet) {
            PacketKind::Rtcp => self.media_engine.deliver_inbound_rtcp(packet),
            PacketKind::Rtp if focus.has_audio || focus.has_video => self.media_engine.deliver_inbound_rtp(packet),
            PacketKind::Rtp => Ok(()),
        }
    }

    /// Send one outbound packet from the media engine to the focused
    /// call's picked location.
    pub fn send_outbound(&self, packet: &[u8], is_video: bool) -> Result<(), TransportError> {
        if self.changing_focus() {
            return Ok(());
        }
        let Some(focus) = &self.focus else { return Ok(()) };
        let socket = if is_video { &self.video_socket } else { &self.audio_socket };
        match socket {
            Some(socket) => socket.send_to(&focus.location_id, packet),
            None => Ok(()),
        }
    }

    /// Graceful shutdown (SPEC_FULL.md §5): stop the media engine, drop
    /// sockets, move through `ShuttingDown` to `Shutdown`.
    pub fn cancel(&mut self) {
        self.state = TransportState::ShuttingDown;
        self.clear_focus();
        self.audio_socket = None;
        self.video_socket = None;
        self.state = TransportState::Shutdown;
    }
}

//! Per-call dialog lifecycle (SPEC_FULL.md §4.7): tracks one voice/video
//! call from either the caller or callee side, picks exactly one remote
//! location once its candidate reaches readiness, and drives hangup.
//!
//! Grounded on `crypto.rs`/`encryption.rs`'s trait-parameterised designs
//! for the surrounding ICE/media boundary, enriched for the state-machine
//! shape from `original_source/openpeer/core/cpp/core_Call.h`.

use super::location::{CallLocation, CallLocationState};
use crate::document::{ClosedReason, Dialog};
use crate::ids::{CallId, DialogId, LocationId, PeerUri};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    None,
    Preparing,
    Placed,
    Incoming,
    Early,
    Ringing,
    Ringback,
    Open,
    Active,
    Inactive,
    Hold,
    Closing,
    Closed,
}

fn rank(s: &CallState) -> u8 {
    match s {
        CallState::None | CallState::Preparing => 0,
        CallState::Placed | CallState::Incoming => 1,
        CallState::Early | CallState::Ringing | CallState::Ringback => 2,
        CallState::Open => 3,
        CallState::Active | CallState::Inactive | CallState::Hold => 4,
        CallState::Closing => 5,
        CallState::Closed => 6,
    }
}

impl CallState {
    /// SPEC_FULL.md §4.7 invariants: monotonic progression through the
    /// listed tiers, free lateral movement among the in-call media
    /// substates (`Active`/`Inactive`/`Hold`), and a direct jump to
    /// `Closed` from anywhere; `Closed` never reopens.
    pub fn can_advance_to(&self, next: &CallState) -> bool {
        if self == next {
            return true;
        }
        if *self == CallState::Closed {
            return false;
        }
        if *next == CallState::Closed {
            return true;
        }
        let (a, b) = (rank(self), rank(next));
        if a == 4 && b == 4 {
            return true;
        }
        b > a
    }
}

pub struct Call {
    pub call_id: CallId,
    pub has_audio: bool,
    pub has_video: bool,
    pub is_incoming: bool,
    pub caller_peer_uri: PeerUri,
    pub callee_peer_uri: PeerUri,
    pub state: CallState,
    pub closed_reason: ClosedReason,
    pub call_locations: HashMap<LocationId, CallLocation>,
    pub picked_location: Option<LocationId>,
    pub early_location: Option<LocationId>,
    pending_close_reason: Option<ClosedReason>,
    last_step: Option<Instant>,
}

impl Call {
    /// Caller side: one candidate `CallLocation` per observed candidate
    /// callee location.
    pub fn new_placed(
        call_id: CallId,
        caller: PeerUri,
        callee: PeerUri,
        has_audio: bool,
        has_video: bool,
    ) -> Self {
        Self {
            call_id,
            has_audio,
            has_video,
            is_incoming: false,
            caller_peer_uri: caller,
            callee_peer_uri: callee,
            state: CallState::Placed,
            closed_reason: ClosedReason::None,
            call_locations: HashMap::new(),
            picked_location: None,
            early_location: None,
            pending_close_reason: None,
            last_step: None,
        }
    }

    /// Callee side: a single entry for the caller's location, built from
    /// the incoming dialog (SPEC_FULL.md §4.5/§4.7).
    pub fn new_for_incoming(call_id: CallId, dialog: &Dialog, has_audio: bool, has_video: bool) -> Self {
        let mut call_locations = HashMap::new();
        let mut candidate = CallLocation::new(dialog.caller_location_id.clone());
        candidate.dialog_id = Some(dialog.dialog_id.clone());
        candidate.state = CallLocationState::Ringing;
        call_locations.insert(dialog.caller_location_id.clone(), candidate);
        Self {
            call_id,
            has_audio,
            has_video,
            is_incoming: true,
            caller_peer_uri: dialog.caller_peer_uri.clone(),
            callee_peer_uri: dialog.callee_peer_uri.clone(),
            state: CallState::Incoming,
            closed_reason: ClosedReason::None,
            call_locations,
            picked_location: None,
            early_location: None,
            pending_close_reason: None,
            last_step: None,
        }
    }

    pub fn try_set_state(&mut self, next: CallState, reason: ClosedReason) -> bool {
        if !self.state.can_advance_to(&next) {
            return false;
        }
        self.state = next;
        if self.state == CallState::Closed {
            self.closed_reason = reason;
        }
        true
    }

    pub fn ensure_candidate(&mut self, location_id: LocationId) -> &mut CallLocation {
        self.call_locations
            .entry(location_id.clone())
            .or_insert_with(|| CallLocation::new(location_id))
    }

    /// Fold an observed dialog-state-derived readiness into one
    /// candidate location. On the first candidate to reach `Early` or
    /// better, it is picked: every other candidate is closed and dropped
    /// (SPEC_FULL.md §4.7 — "all other CallLocations are sent Closed
    /// notifications and removed"). Returns the newly closed candidates'
    /// location ids so the caller can notify the call transport.
    pub fn observe_candidate(
        &mut self,
        location_id: LocationId,
        dialog_id: DialogId,
        call_location_state: CallLocationState,
    ) -> Vec<LocationId> {
        {
            let candidate = self.ensure_candidate(location_id.clone());
            candidate.dialog_id = Some(dialog_id);
            candidate.set_state(call_location_state);
        }

        if self.picked_location.is_some() {
            return Vec::new();
        }
        let pickable = self
            .call_locations
            .get(&location_id)
            .map(CallLocation::is_pickable)
            .unwrap_or(false);
        if !pickable {
            return Vec::new();
        }

        self.picked_location = Some(location_id.clone());
        let closed: Vec<LocationId> = self
            .call_locations
            .keys()
            .filter(|id| **id != location_id)
            .cloned()
            .collect();
        for id in &closed {
            if let Some(loc) = self.call_locations.get_mut(id) {
                loc.close();
            }
        }
        self.call_locations.retain(|id, _| *id == location_id);
        closed
    }

    /// Begin graceful hangup: moves to `Closing`, remembering the final
    /// reason to apply once `finish_close` runs (SPEC_FULL.md §4.7).
    pub fn hangup(&mut self, reason: ClosedReason) -> bool {
        let moved = self.try_set_state(CallState::Closing, ClosedReason::None);
        if moved {
            self.pending_close_reason = Some(reason);
        }
        moved
    }

    /// Called once the cleanup timer fires or the remote side
    /// acknowledges `Closed` (whichever first, bounded by
    /// `call_hangup_hard_bound`).
    pub fn finish_close(&mut self) -> bool {
        let reason = self.pending_close_reason.take().unwrap_or(ClosedReason::None);
        self.try_set_state(CallState::Closed, reason)
    }

    pub fn is_in_progress(&self) -> bool {
        self.state != CallState::Closed
    }

    /// Keep-alive timer (SPEC_FULL.md §4.7, §6): re-step on a bounded
    /// period while the call is not yet closed.
    pub fn needs_keep_alive_step(&self, now: Instant, period: Duration) -> bool {
        self.is_in_progress()
            && self
                .last_step
                .map(|t| now.duration_since(t) >= period)
                .unwrap_or(true)
    }

    pub fn mark_stepped(&mut self, now: Instant) {
        self.last_step = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialog() -> Dialog {
        Dialog::new_placed(
            DialogId::from("d1"),
            PeerUri::from("a"),
            LocationId::from("a_loc"),
            PeerUri::from("b"),
        )
    }

    #[test]
    fn first_ready_candidate_is_picked_and_others_closed() {
        let mut call = Call::new_placed(CallId::from("c1"), PeerUri::from("a"), PeerUri::from("b"), true, false);
        call.ensure_candidate(LocationId::from("b_loc1"));
        call.ensure_candidate(LocationId::from("b_loc2"));
        let closed = call.observe_candidate(
            LocationId::from("b_loc1"),
            DialogId::from("d1"),
            CallLocationState::Ready,
        );
        assert_eq!(closed, vec![LocationId::from("b_loc2")]);
        assert_eq!(call.picked_location, Some(LocationId::from("b_loc1")));
        assert_eq!(call.call_locations.len(), 1);
    }

    #[test]
    fn second_ready_after_pick_is_a_no_op() {
        let mut call = Call::new_placed(CallId::from("c1"), PeerUri::from("a"), PeerUri::from("b"), true, false);
        call.observe_candidate(LocationId::from("b_loc1"), DialogId::from("d1"), CallLocationState::Ready);
        let closed = call.observe_candidate(
            LocationId::from("b_loc2"),
            DialogId::from("d2"),
            CallLocationState::Ready,
        );
        assert!(closed.is_empty());
        assert_eq!(call.picked_location, Some(LocationId::from("b_loc1")));
    }

    #[test]
    fn hangup_then_finish_close_sets_reason() {
        let mut call = Call::new_for_incoming(CallId::from("c1"), &dialog(), true, false);
        assert!(call.try_set_state(CallState::Open, ClosedReason::None));
        assert!(call.hangup(ClosedReason::User));
        assert_eq!(call.state, CallState::Closing);
        assert!(call.finish_close());
        assert_eq!(call.state, CallState::Closed);
        assert_eq!(call.closed_reason, ClosedReason::User);
        assert!(!call.try_set_state(CallState::Open, ClosedReason::None));
    }

    #[test]
    fn active_hold_inactive_are_lateral() {
        let mut call = Call::new_for_incoming(CallId::from("c1"), &dialog(), true, false);
        call.try_set_state(CallState::Open, ClosedReason::None);
        assert!(call.try_set_state(CallState::Active, ClosedReason::None));
        assert!(call.try_set_state(CallState::Hold, ClosedReason::None));
        assert!(call.try_set_state(CallState::Active, ClosedReason::None));
    }

    #[test]
    fn keep_alive_fires_after_period_elapses() {
        let mut call = Call::new_for_incoming(CallId::from("c1"), &dialog(), true, false);
        let now = Instant::now();
        assert!(call.needs_keep_alive_step(now, Duration::from_secs(20)));
        call.mark_stepped(now);
        assert!(!call.needs_keep_alive_step(now, Duration::from_secs(20)));
    }
}

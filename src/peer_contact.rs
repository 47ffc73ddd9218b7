//! One remote peer-uri within one host document (SPEC_FULL.md §4.6):
//! subscription lifecycle, per-location fan-out, delivery-state tracking
//! with receipt back-fill, and the push-notification fallback for
//! messages the local host has sent to this peer.
//!
//! Grounded on `onion.rs`'s per-hop state machine with timers, adapted
//! from "one timer per hop" to "one push-timer per undelivered message".

use crate::config::EngineConfig;
use crate::document::DeliveryState;
use crate::ids::{LocationId, MessageId, PeerUri};
use crate::peer_location::PeerLocation;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerContactState {
    Pending,
    Ready,
    ShuttingDown,
    Shutdown,
}

/// Find-state for this peer's identity lookup, as reported by the account
/// layer (out of scope, consumed narrowly per SPEC_FULL.md §1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindState {
    Searching,
    Idle,
    Completed,
}

struct TrackedMessage {
    first_seen: Instant,
    state: DeliveryState,
}

/// Emitted by [`PeerContact::step`] when a message has waited past
/// `max_wait_before_push` without a delivery receipt.
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub message_id: MessageId,
    pub peer_uri: PeerUri,
}

pub struct PeerContact {
    pub peer_uri: PeerUri,
    pub state: PeerContactState,
    pub locations: HashMap<LocationId, PeerLocation>,
    tracked_messages: HashMap<MessageId, TrackedMessage>,
    find_state: FindState,
    auto_find_started: Option<Instant>,
}

impl PeerContact {
    pub fn new(peer_uri: PeerUri) -> Self {
        Self {
            peer_uri,
            state: PeerContactState::Pending,
            locations: HashMap::new(),
            tracked_messages: HashMap::new(),
            find_state: FindState::Searching,
            auto_find_started: Some(Instant::now()),
        }
    }

    pub fn ensure_location(&mut self, location_id: LocationId) -> &mut PeerLocation {
        self.locations
            .entry(location_id.clone())
            .or_insert_with(|| PeerLocation::new(self.peer_uri.clone(), location_id))
    }

    pub fn remove_location(&mut self, location_id: &LocationId) {
        self.locations.remove(location_id);
    }

    pub fn any_location_ready(&self) -> bool {
        self.locations.values().any(PeerLocation::is_ready)
    }

    pub fn set_find_state(&mut self, state: FindState) {
        self.find_state = state;
    }

    /// Ready is reached once at least one location is ready, or the
    /// peer-find state has resolved (SPEC_FULL.md §4.6).
    pub fn recompute_readiness(&mut self) {
        if self.state == PeerContactState::ShuttingDown || self.state == PeerContactState::Shutdown
        {
            return;
        }
        if self.any_location_ready() || self.find_state != FindState::Searching {
            self.state = PeerContactState::Ready;
        }
    }

    /// Whether an active subscription is needed right now: an undelivered
    /// message exists, a call is placed to this peer, or auto-find is
    /// still within its configured window.
    pub fn needs_subscription(&self, call_placed: bool, cfg: &EngineConfig) -> bool {
        let has_undelivered = self
            .tracked_messages
            .values()
            .any(|m| m.state == DeliveryState::Discovering);
        let within_auto_find_window = self
            .auto_find_started
            .map(|t| t.elapsed() < cfg.peer_contact_auto_find_window)
            .unwrap_or(false);
        has_undelivered || call_placed || within_auto_find_window
    }

    /// Begin tracking a message this host just sent to this peer.
    pub fn track_sent_message(&mut self, id: MessageId, now: Instant) {
        self.tracked_messages.entry(id).or_insert(TrackedMessage {
            first_seen: now,
            state: DeliveryState::Discovering,
        });
    }

    pub fn delivery_state(&self, id: &MessageId) -> Option<DeliveryState> {
        self.tracked_messages.get(id).map(|m| m.state.clone())
    }

    /// Any message sent to this peer still awaiting a delivery receipt.
    /// Used by `HostRole::safe_to_change_contacts` (SPEC_FULL.md §4.4).
    pub fn has_pending_delivery(&self) -> bool {
        self.tracked_messages
            .values()
            .any(|m| m.state == DeliveryState::Discovering)
    }

    /// Advance a tracked message's state; states never regress
    /// (SPEC_FULL.md §3 invariant 4). Returns `true` if the state actually
    /// advanced.
    fn advance(&mut self, id: &MessageId, next: DeliveryState) -> bool {
        let Some(tracked) = self.tracked_messages.get_mut(id) else {
            return false;
        };
        if tracked.state.can_advance_to(&next) && tracked.state != next {
            tracked.state = next;
            true
        } else {
            false
        }
    }

    /// A receipt arrived from *any* location of this peer for `acked_id`.
    /// Back-fills every earlier message in `order` to at least `state`,
    /// because a receipt on a later message implies receipt of all prior
    /// ones (SPEC_FULL.md §4.6 "receipts back-fill").
    pub fn apply_receipt_with_backfill(
        &mut self,
        order: &[MessageId],
        acked_id: &MessageId,
        state: DeliveryState,
    ) -> Vec<MessageId> {
        let Some(pos) = order.iter().position(|m| m == acked_id) else {
            // Unknown message (not ours, or not yet seen locally); still
            // honour the direct ack if we happen to be tracking it.
            return if self.advance(acked_id, state) {
                vec![acked_id.clone()]
            } else {
                Vec::new()
            };
        };
        let mut advanced = Vec::new();
        for id in &order[..=pos] {
            if self.advance(id, state.clone()) {
                advanced.push(id.clone());
            }
        }
        advanced
    }

    /// Cooperative step (SPEC_FULL.md §4.6 push fallback): scans tracked
    /// messages still `Discovering` and, for any that have waited past
    /// `max_wait_before_push`, marks them `UserNotAvailable` and emits a
    /// push request. Also applies when the peer's find-state has resolved
    /// to idle/completed with zero known locations.
    pub fn step(&mut self, cfg: &EngineConfig) -> Vec<PushRequest> {
        let zero_locations_resolved = self.locations.is_empty()
            && matches!(self.find_state, FindState::Idle | FindState::Completed);

        let mut pushes = Vec::new();
        for (id, tracked) in self.tracked_messages.iter_mut() {
            if tracked.state != DeliveryState::Discovering {
                continue;
            }
            let waited_too_long = tracked.first_seen.elapsed() >= cfg.max_wait_before_push;
            if waited_too_long || zero_locations_resolved {
                tracked.state = DeliveryState::UserNotAvailable;
                pushes.push(PushRequest {
                    message_id: id.clone(),
                    peer_uri: self.peer_uri.clone(),
                });
            }
        }
        pushes
    }

    /// Called when backgrounding is imminent: every still-discovering
    /// message is immediately marked unavailable and pushed, per
    /// SPEC_FULL.md §4.6 ("or backgrounding becomes imminent").
    pub fn force_push_all_discovering(&mut self) -> Vec<PushRequest> {
        let mut pushes = Vec::new();
        for (id, tracked) in self.tracked_messages.iter_mut() {
            if tracked.state == DeliveryState::Discovering {
                tracked.state = DeliveryState::UserNotAvailable;
                pushes.push(PushRequest {
                    message_id: id.clone(),
                    peer_uri: self.peer_uri.clone(),
                });
            }
        }
        pushes
    }
}

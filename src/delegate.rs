//! Application-facing callback boundaries (SPEC_FULL.md §1: "identity
//! rolodex lookup, push-mailbox transport, UI delegates... out of scope",
//! consumed only through these narrow trait interfaces) plus the
//! backgrounding-notifier boundary from §6/§7.
//!
//! Grounded on `repository.rs`'s narrow-trait-per-external-collaborator
//! shape; default no-op method bodies mean an embedder only overrides the
//! notifications it cares about, matching [`PublicationRepository`]'s
//! posture of "this crate defines the boundary, not the implementation".
//!
//! [`PublicationRepository`]: crate::repository::PublicationRepository

use crate::call::CallState;
use crate::document::{ClosedReason, DeliveryState};
use crate::ids::{BaseThreadId, CallId, MessageId, PeerUri};

/// Notified of everything SPEC_FULL.md §4.3/§4.4/§4.6 calls out as
/// delegate-worthy for one `ConversationThread`. Invoked only from the
/// `application` queue (§5), after the engine has released its own
/// internal locks, so implementations may re-enter the engine freely.
pub trait ConversationThreadDelegate: Send + Sync {
    fn message_added(&self, _thread: &BaseThreadId, _message_id: &MessageId, _from: &PeerUri) {}

    fn message_delivery_state_changed(
        &self,
        _thread: &BaseThreadId,
        _message_id: &MessageId,
        _state: DeliveryState,
    ) {
    }

    /// Fired once per change to the sorted contacts-CRC, per §4.3.
    fn contacts_changed(&self, _thread: &BaseThreadId) {}
}

pub trait CallDelegate: Send + Sync {
    fn call_state_changed(&self, _call_id: &CallId, _state: CallState) {}

    fn call_closed(&self, _call_id: &CallId, _reason: ClosedReason) {}
}

/// Push-mailbox transport boundary: raised when a message has gone
/// `UserNotAvailable` and the application should wake the peer out of
/// band (SPEC_FULL.md §4.4, §6 `max_wait_before_push`).
pub trait PushNotifier: Send + Sync {
    fn send_push(&self, peer: &PeerUri, message_id: &MessageId);
}

/// Backgrounding-notifier ordering (SPEC_FULL.md §7): each role registers
/// at its configured `backgrounding_phase_ordinal` and must call `release`
/// before the OS-imposed deadline, so lower-ordinal roles unwind first.
pub trait BackgroundingNotifier: Send + Sync {
    fn register(&self, phase_ordinal: u32);
    fn release(&self, phase_ordinal: u32);
}

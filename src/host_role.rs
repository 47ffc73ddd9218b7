//! Per-local-host-document controller (SPEC_FULL.md §4.4): owns the
//! authoritative `ThreadDocument` for one `(base-thread-id,
//! host-thread-id)` pair, plus one `PeerContact` per remote participant.
//!
//! Grounded on `auth.rs`'s `MembershipState::{add_member,remove_member}`
//! for contact bookkeeping, generalised from "flat membership list" to
//! "per-peer subscription + receipt + push-fallback state".

use crate::config::EngineConfig;
use crate::document::name::host_document_name;
use crate::document::{Contact, Details, DeliveryState, DialogState, Message, ThreadDocument, ThreadState};
use crate::error::{DocumentError, ThreadError};
use crate::ids::{BaseThreadId, DialogId, HostThreadId, MessageId, PeerUri};
use crate::peer_contact::{PeerContact, PushRequest};
use crate::repository::{DocumentName, PublicationRepository};
use std::collections::BTreeMap;
use std::time::Instant;

/// What one `HostRole::step` surfaced for the owning conversation thread
/// to act on: push requests for the application, and contact/dialog
/// suggestions gathered from peer locations' mirrors that the host has
/// not yet folded into its own document.
#[derive(Debug, Clone, Default)]
pub struct HostStepOutcome {
    pub push_requests: Vec<PushRequest>,
    pub suggested_add: Vec<PeerUri>,
    pub suggested_remove: Vec<PeerUri>,
    pub dialogs_changed: Vec<(PeerUri, DialogId)>,
    pub dialogs_removed: Vec<(PeerUri, DialogId)>,
}

pub struct HostRole {
    pub thread: ThreadDocument,
    name: DocumentName,
    peer_contacts: BTreeMap<PeerUri, PeerContact>,
}

impl HostRole {
    pub fn new(base: BaseThreadId, host: HostThreadId, created: u64, topic: String) -> Self {
        let details = Details::new_open(base.clone(), host.clone(), created, topic);
        let name = host_document_name(&base, &host);
        Self {
            thread: ThreadDocument::new(details),
            name,
            peer_contacts: BTreeMap::new(),
        }
    }

    pub fn document_name(&self) -> &DocumentName {
        &self.name
    }

    pub fn peer_contact(&self, peer: &PeerUri) -> Option<&PeerContact> {
        self.peer_contacts.get(peer)
    }

    pub fn peer_contact_mut(&mut self, peer: &PeerUri) -> Option<&mut PeerContact> {
        self.peer_contacts.get_mut(peer)
    }

    pub fn peer_uris(&self) -> impl Iterator<Item = &PeerUri> {
        self.peer_contacts.keys()
    }

    /// Add contacts to the host document, ensuring a `PeerContact` exists
    /// for each (SPEC_FULL.md §4.4). Leaves the document's update bracket
    /// open; the caller is expected to eventually call [`Self::publish`].
    pub fn add_contacts(&mut self, peers: impl IntoIterator<Item = PeerUri>) {
        self.thread.update_begin();
        let mut contacts = self.thread.contacts.contacts.clone();
        for peer in peers {
            contacts
                .entry(peer.clone())
                .or_insert_with(|| Contact::new(peer.clone()));
            self.peer_contacts
                .entry(peer.clone())
                .or_insert_with(|| PeerContact::new(peer));
        }
        self.thread.set_contacts(contacts);
    }

    pub fn remove_contacts(&mut self, peers: impl IntoIterator<Item = PeerUri>) {
        self.thread.update_begin();
        let mut contacts = self.thread.contacts.contacts.clone();
        for peer in peers {
            contacts.remove(&peer);
            self.peer_contacts.remove(&peer);
        }
        self.thread.set_contacts(contacts);
    }

    /// Whether a caller may safely mutate this host's contacts in place
    /// rather than spawning a replacement host (SPEC_FULL.md §4.4): the
    /// document must be `Open`, carry no message still awaiting a
    /// delivery receipt, and have no live (non-`Closed`) dialog.
    pub fn safe_to_change_contacts(&self) -> bool {
        if !self.thread.details.is_open() {
            return false;
        }
        let has_pending_delivery = self
            .peer_contacts
            .values()
            .any(PeerContact::has_pending_delivery);
        if has_pending_delivery {
            return false;
        }
        !self
            .thread
            .dialogs
            .dialogs
            .values()
            .any(|d| d.state != DialogState::Closed)
    }

    pub fn close(&mut self) {
        self.thread.update_begin();
        self.thread.set_state(ThreadState::Closed);
    }

    /// Append a locally authored message and begin tracking its delivery
    /// against every known peer contact.
    pub fn send_message(&mut self, message: Message, now: Instant) {
        let id = message.message_id.clone();
        self.thread.update_begin();
        self.thread.add_message(message);
        for contact in self.peer_contacts.values_mut() {
            contact.track_sent_message(id.clone(), now);
        }
    }

    /// Apply delivered/read receipts surfaced by a `PeerLocation` mirror
    /// update for `peer`, with back-fill across this document's message
    /// order (SPEC_FULL.md §4.6).
    pub fn apply_receipts(
        &mut self,
        peer: &PeerUri,
        delivered: &[(MessageId, u64)],
        read: &[(MessageId, u64)],
    ) {
        let order: Vec<MessageId> = self
            .thread
            .messages
            .messages
            .iter()
            .map(|m| m.message_id.clone())
            .collect();
        let Some(contact) = self.peer_contacts.get_mut(peer) else {
            return;
        };
        for (id, _time) in delivered {
            contact.apply_receipt_with_backfill(&order, id, DeliveryState::Delivered);
        }
        for (id, _time) in read {
            contact.apply_receipt_with_backfill(&order, id, DeliveryState::Read);
        }
    }

    /// Fold a peer location's suggested contact/dialog changes into this
    /// step's outcome, namespaced by the peer that suggested them.
    pub fn record_suggestions(
        &self,
        outcome: &mut HostStepOutcome,
        peer: &PeerUri,
        suggested_add: Vec<PeerUri>,
        suggested_remove: Vec<PeerUri>,
        dialogs_changed: Vec<DialogId>,
        dialogs_removed: Vec<DialogId>,
    ) {
        outcome.suggested_add.extend(suggested_add);
        outcome.suggested_remove.extend(suggested_remove);
        outcome
            .dialogs_changed
            .extend(dialogs_changed.into_iter().map(|d| (peer.clone(), d)));
        outcome
            .dialogs_removed
            .extend(dialogs_removed.into_iter().map(|d| (peer.clone(), d)));
    }

    /// Cooperative step: advance push-fallback timers across every peer
    /// contact (SPEC_FULL.md §4.4, §4.6).
    pub fn step(&mut self, cfg: &EngineConfig) -> HostStepOutcome {
        let mut outcome = HostStepOutcome::default();
        for contact in self.peer_contacts.values_mut() {
            outcome.push_requests.extend(contact.step(cfg));
        }
        outcome
    }

    /// Backgrounding is imminent: force every still-discovering message
    /// across every peer contact to `UserNotAvailable` and push it.
    pub fn force_push_all(&mut self) -> Vec<PushRequest> {
        self.peer_contacts
            .values_mut()
            .flat_map(PeerContact::force_push_all_discovering)
            .collect()
    }

    /// Publish the current in-update diff. Republish failures are the
    /// caller's to retry on the next step (SPEC_FULL.md §4.4): the
    /// document's in-memory state and open bracket are left untouched on
    /// error so the same diff is re-attempted.
    pub async fn publish<R: PublicationRepository>(
        &mut self,
        repo: &R,
    ) -> Result<(), ThreadError> {
        if !self.thread.is_in_update() {
            return Ok(());
        }
        match self.thread.update_end(repo, &self.name).await {
            Ok(()) => Ok(()),
            Err(DocumentError::Malformed(e)) => {
                log::warn!("host republish failed for {}: {e}", self.name);
                Err(ThreadError::Repository(e))
            }
            Err(e) => Err(ThreadError::Document(e)),
        }
    }
}

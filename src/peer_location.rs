//! One online session of one remote peer (SPEC_FULL.md §4.6). A
//! `PeerLocation` owns a fetcher scoped to that location (via the shared
//! `DocumentFetcher`) and maintains a slave-thread mirror of the peer's
//! view: what that location has acked receiving from us, which contacts
//! it is suggesting we add/remove, and its per-location dialog state.
//!
//! Grounded on `sealed_sender.rs`'s per-recipient session struct with an
//! explicit state enum.

use crate::document::{DialogsSection, ThreadDocument};
use crate::error::DocumentError;
use crate::ids::{LocationId, MessageId, PeerUri};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationReadiness {
    Pending,
    Ready,
    Gone,
}

/// What changed in the peer's mirror document as a result of one
/// `apply_mirror_update` call.
#[derive(Debug, Clone, Default)]
pub struct MirrorUpdate {
    pub delivered: Vec<(MessageId, u64)>,
    pub read: Vec<(MessageId, u64)>,
    pub suggested_add: Vec<PeerUri>,
    pub suggested_remove: Vec<PeerUri>,
    pub dialogs_changed: Vec<crate::ids::DialogId>,
    pub dialogs_removed: Vec<crate::ids::DialogId>,
}

pub struct PeerLocation {
    pub peer_uri: PeerUri,
    pub location_id: LocationId,
    pub readiness: LocationReadiness,
    mirror: Option<ThreadDocument>,
    contact_key_tried: HashSet<PeerUri>,
}

impl PeerLocation {
    pub fn new(peer_uri: PeerUri, location_id: LocationId) -> Self {
        Self {
            peer_uri,
            location_id,
            readiness: LocationReadiness::Pending,
            mirror: None,
            contact_key_tried: HashSet::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.readiness == LocationReadiness::Ready
    }

    /// Load or diff-apply the peer's published slave document for our
    /// host thread.
    pub fn apply_mirror_update(&mut self, body: &[u8]) -> Result<MirrorUpdate, DocumentError> {
        self.readiness = LocationReadiness::Ready;
        match &mut self.mirror {
            None => {
                let doc = ThreadDocument::load(body)?;
                // Treat a freshly loaded mirror as "everything present is new".
                let update = MirrorUpdate {
                    delivered: doc
                        .delivered
                        .receipts
                        .iter()
                        .map(|(id, t)| (id.clone(), *t))
                        .collect(),
                    read: doc.read.receipts.iter().map(|(id, t)| (id.clone(), *t)).collect(),
                    suggested_add: doc.contacts.add.iter().cloned().collect(),
                    suggested_remove: doc.contacts.remove.iter().cloned().collect(),
                    dialogs_changed: doc.dialogs.dialogs.keys().cloned().collect(),
                    dialogs_removed: Vec::new(),
                };
                self.mirror = Some(doc);
                Ok(update)
            }
            Some(doc) => {
                let change = doc.update_from(body)?;
                let delivered_changed = change.delivered_changed.clone();
                let read_changed = change.read_changed.clone();
                let suggested_add = change.contacts_added.clone();
                let suggested_remove = change.contacts_removed.clone();
                let dialogs_changed = change.dialogs_changed.clone();
                let dialogs_removed = change.dialogs_removed.clone();
                Ok(MirrorUpdate {
                    delivered: delivered_changed
                        .into_iter()
                        .filter_map(|id| doc.delivered.receipts.get(&id).map(|t| (id, *t)))
                        .collect(),
                    read: read_changed
                        .into_iter()
                        .filter_map(|id| doc.read.receipts.get(&id).map(|t| (id, *t)))
                        .collect(),
                    suggested_add,
                    suggested_remove,
                    dialogs_changed,
                    dialogs_removed,
                })
            }
        }
    }

    pub fn mark_gone(&mut self) {
        self.readiness = LocationReadiness::Gone;
    }

    pub fn dialogs(&self) -> Option<&DialogsSection> {
        self.mirror.as_ref().map(|m| &m.dialogs)
    }

    /// Per-location contact-public-key fetching (SPEC_FULL.md §4.6): for
    /// each contact mentioned in the mirror whose peer-file-public is not
    /// yet known, the engine issues a fetch at most once per peer.
    pub fn needs_key_fetch(&mut self, peer: &PeerUri, already_known: bool) -> bool {
        if already_known {
            return false;
        }
        if self.contact_key_tried.contains(peer) {
            return false;
        }
        self.contact_key_tried.insert(peer.clone());
        true
    }
}

//! Per-observed-remote-host-document controller (SPEC_FULL.md §4.5): owns
//! a mirror of one remote peer's host document and a map of that peer's
//! known locations, and classifies dialog changes for the call
//! machinery.
//!
//! Grounded on `auth.rs`'s `MembershipState` (as a model for "aggregate
//! view derived from a remote authoritative source") and `network.rs`'s
//! per-counterpart topic registration.

use crate::document::name::{host_document_name, slave_document_name};
use crate::document::{ChangeSet, Details, Dialog, Message, ThreadDocument};
use crate::error::{DocumentError, ThreadError};
use crate::host_role::HostRole;
use crate::ids::{BaseThreadId, DialogId, HostThreadId, LocationId, MessageId, PeerUri};
use crate::peer_location::LocationReadiness;
use crate::repository::{DocumentName, PublicationRepository};
use std::collections::HashMap;

/// A classified change to the `dialogs` section of the mirrored host
/// document, ready for the call machinery to act on (SPEC_FULL.md §4.5).
#[derive(Debug, Clone)]
pub enum DialogEvent {
    /// A new dialog whose callee is self: an incoming call.
    Incoming(Dialog),
    /// An existing dialog (incoming or one this peer placed) changed.
    Updated(Dialog),
    /// A dialog whose caller is self changed — a reply to a call this
    /// peer placed, surfaced so the placing `Call` can re-evaluate.
    ReplyFromSelf(DialogId),
    /// A dialog present before is no longer in the document.
    Removed(DialogId),
}

/// What one `SlaveRole::apply_update` surfaced.
#[derive(Debug, Clone, Default)]
pub struct SlaveUpdate {
    pub messages_forwarded: Vec<MessageId>,
    pub dialog_events: Vec<DialogEvent>,
    /// `true` the first time this update observes self no longer listed
    /// in `contacts.contacts` (SPEC_FULL.md §4.5 / §9 open question 1).
    pub self_removed: bool,
}

pub struct SlaveRole {
    base: BaseThreadId,
    host: HostThreadId,
    host_peer: PeerUri,
    self_peer: PeerUri,
    name: DocumentName,
    slave_thread: Option<ThreadDocument>,
    locations: HashMap<LocationId, LocationReadiness>,
    was_participant: bool,
    gone: bool,

    /// What we publish back at `/threads/<base>/slave/<host>/<self-peer>/
    /// <self-location>` (SPEC_FULL.md §6): our delivery/read receipts,
    /// contact suggestions, and our own dialog replies. A separate
    /// document from `slave_thread` above, which mirrors the host's.
    own_location: LocationId,
    own_feedback: ThreadDocument,
}

impl SlaveRole {
    pub fn new(
        base: BaseThreadId,
        host: HostThreadId,
        host_peer: PeerUri,
        self_peer: PeerUri,
        self_location: LocationId,
    ) -> Self {
        let name = host_document_name(&base, &host);
        let own_feedback = ThreadDocument::new(Details::new_open(
            base.clone(),
            host.clone(),
            0,
            String::new(),
        ));
        Self {
            base,
            host,
            host_peer,
            self_peer,
            name,
            slave_thread: None,
            locations: HashMap::new(),
            was_participant: true,
            gone: false,
            own_location: self_location,
            own_feedback,
        }
    }

    fn own_feedback_name(&self) -> DocumentName {
        slave_document_name(&self.base, &self.host, &self.self_peer, &self.own_location)
    }

    /// Suggest that the host add/remove contacts, and record receipts,
    /// in the feedback document we publish back to the host
    /// (SPEC_FULL.md §4.5, §4.6).
    pub fn suggest_contacts(&mut self, add: Vec<PeerUri>, remove: Vec<PeerUri>) {
        self.own_feedback.update_begin();
        self.own_feedback.suggest_contacts(add, remove);
    }

    pub fn record_delivered(&mut self, id: MessageId, time: u64) {
        self.own_feedback.update_begin();
        self.own_feedback.set_delivered(id, time);
    }

    pub fn record_read(&mut self, id: MessageId, time: u64) {
        self.own_feedback.update_begin();
        self.own_feedback.set_read(id, time);
    }

    pub fn upsert_own_dialog(&mut self, dialog: Dialog) {
        self.own_feedback.update_begin();
        self.own_feedback.upsert_dialog(dialog);
    }

    /// Publish accumulated feedback if any mutator above was called since
    /// the last publish.
    pub async fn publish_feedback<R: PublicationRepository>(
        &mut self,
        repo: &R,
    ) -> Result<(), ThreadError> {
        if !self.own_feedback.is_in_update() {
            return Ok(());
        }
        let name = self.own_feedback_name();
        self.own_feedback
            .update_end(repo, &name)
            .await
            .map_err(ThreadError::Document)
    }

    pub fn document_name(&self) -> &DocumentName {
        &self.name
    }

    pub fn host_peer(&self) -> &PeerUri {
        &self.host_peer
    }

    pub fn thread(&self) -> Option<&ThreadDocument> {
        self.slave_thread.as_ref()
    }

    pub fn is_gone(&self) -> bool {
        self.gone
    }

    pub fn ensure_location(&mut self, location: LocationId) {
        self.locations
            .entry(location)
            .or_insert(LocationReadiness::Pending);
    }

    /// The host document is no longer reachable from `location`; if that
    /// was the last known location, self-destruct (SPEC_FULL.md §4.5).
    pub fn mark_location_gone(&mut self, location: &LocationId) {
        self.locations.remove(location);
        if self.locations.is_empty() {
            self.gone = true;
        }
    }

    /// Fold a freshly fetched publication of the host document, observed
    /// via `location`, into the mirror.
    pub fn apply_update(
        &mut self,
        location: LocationId,
        body: &[u8],
    ) -> Result<SlaveUpdate, DocumentError> {
        self.locations.insert(location, LocationReadiness::Ready);

        let (messages_added, dialogs_changed, dialogs_removed) = match &mut self.slave_thread {
            None => {
                let doc = ThreadDocument::load(body)?;
                let all_messages = doc.messages.messages.iter().map(|m| m.message_id.clone()).collect();
                let all_dialogs = doc.dialogs.dialogs.keys().cloned().collect();
                self.slave_thread = Some(doc);
                (all_messages, all_dialogs, Vec::new())
            }
            Some(doc) => {
                let change: &ChangeSet = doc.update_from(body)?;
                (
                    change.messages_added.clone(),
                    change.dialogs_changed.clone(),
                    change.dialogs_removed.clone(),
                )
            }
        };

        let doc = self.slave_thread.as_ref().expect("just set above");
        let still_participant = doc.contacts.contains(&self.self_peer);
        let self_removed = self.was_participant && !still_participant;
        self.was_participant = still_participant;

        let messages_forwarded = if still_participant {
            messages_added
        } else {
            Vec::new()
        };

        let mut dialog_events = Vec::new();
        for id in dialogs_changed {
            let Some(dialog) = doc.dialogs.get(&id) else {
                continue;
            };
            if dialog.callee_peer_uri == self.self_peer && dialog.callee_location_id.is_none() {
                dialog_events.push(DialogEvent::Incoming(dialog.clone()));
            } else if dialog.caller_peer_uri == self.self_peer {
                dialog_events.push(DialogEvent::ReplyFromSelf(id));
            } else {
                dialog_events.push(DialogEvent::Updated(dialog.clone()));
            }
        }
        for id in dialogs_removed {
            dialog_events.push(DialogEvent::Removed(id));
        }

        Ok(SlaveUpdate {
            messages_forwarded,
            dialog_events,
            self_removed,
        })
    }

    /// Slave-to-host promotion (SPEC_FULL.md §4.5): convert the mirrored
    /// document into a locally authored, already-`Closed` host carrying
    /// the union of `existing_host`'s messages and this mirror's
    /// messages (mirror's appended last) and this mirror's contacts. The
    /// caller is expected to open a fresh host afterwards.
    pub fn promote_to_closed_host(
        &self,
        created: u64,
        existing_host: Option<&HostRole>,
    ) -> Option<HostRole> {
        let mirror = self.slave_thread.as_ref()?;
        let promoted_host_id = HostThreadId::from(format!("promoted-{}", self.host));
        let mut host_role = HostRole::new(
            self.base.clone(),
            promoted_host_id,
            created,
            mirror.details.topic.clone(),
        );

        host_role.thread.update_begin();
        host_role.thread.set_contacts(mirror.contacts.contacts.clone());

        let mut seen: std::collections::HashSet<MessageId> = std::collections::HashSet::new();
        let mut combined: Vec<Message> = Vec::new();
        if let Some(existing) = existing_host {
            for m in &existing.thread.messages.messages {
                if seen.insert(m.message_id.clone()) {
                    combined.push(m.clone());
                }
            }
        }
        for m in &mirror.messages.messages {
            if seen.insert(m.message_id.clone()) {
                combined.push(m.clone());
            }
        }
        for m in combined {
            host_role.thread.add_message(m);
        }

        host_role.close();
        Some(host_role)
    }
}

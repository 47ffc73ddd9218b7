//! The application-facing front door for one logical conversation
//! (SPEC_FULL.md §4.3). Owns every host/slave role for one
//! `base-thread-id`, runs open-host election on each step, and buffers
//! sends/calls until an open host exists.
//!
//! Grounded on `sync.rs`'s top-level driver loop for the overall shape of
//! "own a set of child controllers, step them, react to what they report".

use crate::arena::{Arena, Key};
use crate::call::{Call, CallLocationState};
use crate::config::EngineConfig;
use crate::document::{ClosedReason, Contact, Dialog, DialogState, DeliveryState, Message};
use crate::error::{DocumentError, ThreadError};
use crate::host_role::HostRole;
use crate::ids::{BaseThreadId, CallId, DialogId, HostThreadId, LocationId, MessageId, PeerUri};
use crate::peer_contact::PushRequest;
use crate::repository::PublicationRepository;
use crate::slave_role::{DialogEvent, SlaveRole, SlaveUpdate};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

pub enum ThreadRole {
    Host(HostRole),
    Slave(SlaveRole),
}

#[derive(Debug, Clone)]
pub struct PendingCall {
    pub call_id: CallId,
    pub callee: PeerUri,
    pub has_audio: bool,
    pub has_video: bool,
}

/// A dialog carried a `replaces` pointer to a prior dialog (SPEC_FULL.md
/// §8 S5, re-answer): the old call closed with `ClosedReason::Replaced`
/// while a new one took over, so the caller can move transport focus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallReplaced {
    pub old_call_id: CallId,
    pub new_call_id: CallId,
}

/// What one `ConversationThread::step` surfaced.
#[derive(Debug, Clone, Default)]
pub struct ConversationStepOutcome {
    pub push_requests: Vec<PushRequest>,
    /// `true` the first time the contacts-changed CRC differs from the
    /// previously signalled one (SPEC_FULL.md §4.3).
    pub contacts_changed: bool,
}

pub struct ConversationThread {
    base: BaseThreadId,
    self_peer: PeerUri,
    self_location: LocationId,
    topic: String,

    roles: Arena<ThreadRole>,
    hosts: BTreeMap<HostThreadId, Key<ThreadRole>>,

    /// The role considered live for sends: always a `Host` we authored,
    /// or `None` while no open host exists.
    open_thread: Option<Key<ThreadRole>>,
    /// The role whose contacts/states drive the UI — may be a `Slave` when
    /// this peer does not currently author the open host.
    last_open_thread: Option<Key<ThreadRole>>,

    pending_messages: Vec<Message>,
    pending_calls: Vec<PendingCall>,
    calls: HashMap<CallId, Call>,

    last_signalled_crc: Option<u32>,
}

impl ConversationThread {
    /// Construction path 1 (SPEC_FULL.md §4.3): allocate a base thread id,
    /// create one host role in `Open`, add self to contacts.
    pub fn new_local(
        base: BaseThreadId,
        self_peer: PeerUri,
        self_location: LocationId,
        created: u64,
        topic: String,
    ) -> Self {
        let host_id = HostThreadId::from(format!("{self_peer}-{created}"));
        let mut host = HostRole::new(base.clone(), host_id.clone(), created, topic.clone());
        host.thread.update_begin();
        let mut contacts = BTreeMap::new();
        contacts.insert(self_peer.clone(), Contact::new(self_peer.clone()));
        host.thread.set_contacts(contacts);

        let mut roles = Arena::new();
        let key = roles.insert(ThreadRole::Host(host));
        let mut hosts = BTreeMap::new();
        hosts.insert(host_id, key);

        Self {
            base,
            self_peer,
            self_location,
            topic,
            roles,
            hosts,
            open_thread: Some(key),
            last_open_thread: Some(key),
            pending_messages: Vec::new(),
            pending_calls: Vec::new(),
            calls: HashMap::new(),
            last_signalled_crc: None,
        }
    }

    /// Construction path 2: derived from an incoming publication whose name
    /// parsed as a `host` document not authored locally.
    pub fn new_observed(
        base: BaseThreadId,
        host: HostThreadId,
        host_peer: PeerUri,
        self_peer: PeerUri,
        self_location: LocationId,
    ) -> Self {
        let slave = SlaveRole::new(base.clone(), host.clone(), host_peer, self_peer.clone(), self_location.clone());
        let mut roles = Arena::new();
        let key = roles.insert(ThreadRole::Slave(slave));
        let mut hosts = BTreeMap::new();
        hosts.insert(host, key);

        Self {
            base,
            self_peer,
            self_location,
            topic: String::new(),
            roles,
            hosts,
            open_thread: None,
            last_open_thread: Some(key),
            pending_messages: Vec::new(),
            pending_calls: Vec::new(),
            calls: HashMap::new(),
            last_signalled_crc: None,
        }
    }

    /// Begin observing an additional remote host document for this
    /// conversation — either a second peer's host discovered independently
    /// of construction, or a concurrently created one racing the existing
    /// open host (SPEC_FULL.md §4.3, §8 S2). A no-op if `host` is already
    /// known. `location` is recorded once the first publication from it
    /// arrives via [`Self::apply_host_update`].
    pub fn observe_host(&mut self, host: HostThreadId, host_peer: PeerUri, _location: LocationId) {
        if self.hosts.contains_key(&host) {
            return;
        }
        let slave = SlaveRole::new(
            self.base.clone(),
            host.clone(),
            host_peer,
            self.self_peer.clone(),
            self.self_location.clone(),
        );
        let key = self.roles.insert(ThreadRole::Slave(slave));
        self.hosts.insert(host, key);
    }

    /// Fold a freshly fetched publication of a known remote host document
    /// into its `SlaveRole` mirror. Returns `Ok(None)` if `host` is not
    /// being observed (e.g. a stale fetch after the host went away).
    pub fn apply_host_update(
        &mut self,
        host: &HostThreadId,
        location: LocationId,
        body: &[u8],
    ) -> Result<Option<SlaveUpdate>, DocumentError> {
        let Some(&key) = self.hosts.get(host) else {
            return Ok(None);
        };
        match self.roles.get_mut(key) {
            Some(ThreadRole::Slave(slave)) => Ok(Some(slave.apply_update(location, body)?)),
            _ => Ok(None),
        }
    }

    /// Reach the role authoring/mirroring `host`, if any is held.
    pub fn role_mut_for_host(&mut self, host: &HostThreadId) -> Option<&mut ThreadRole> {
        self.hosts.get(host).copied().and_then(|key| self.roles.get_mut(key))
    }

    /// Whether this peer currently authors the open host (as opposed to
    /// merely mirroring one authored elsewhere, or authoring none).
    pub fn authors_open_host(&self) -> bool {
        self.open_thread.is_some()
    }

    /// Publish every held role's pending diff: the self-authored open
    /// host's document changes, and any observed host's accumulated
    /// feedback (SPEC_FULL.md §4.3, §4.4, §4.6).
    pub async fn publish<R: PublicationRepository>(&mut self, repo: &R) -> Result<(), ThreadError> {
        for (_, role) in self.roles.iter_mut() {
            match role {
                ThreadRole::Host(host) => host.publish(repo).await?,
                ThreadRole::Slave(slave) => slave.publish_feedback(repo).await?,
            }
        }
        Ok(())
    }

    pub fn base(&self) -> &BaseThreadId {
        &self.base
    }

    pub fn role(&self, key: Key<ThreadRole>) -> Option<&ThreadRole> {
        self.roles.get(key)
    }

    pub fn last_open_role(&self) -> Option<&ThreadRole> {
        self.last_open_thread.and_then(|k| self.roles.get(k))
    }

    /// Mutable counterpart of [`Self::last_open_role`], for the engine to
    /// record receipts/suggestions against an observed host's `SlaveRole`.
    pub fn last_open_role_mut(&mut self) -> Option<&mut ThreadRole> {
        self.last_open_thread.and_then(|k| self.roles.get_mut(k))
    }

    fn current_contacts(&self) -> Vec<PeerUri> {
        match self.last_open_role() {
            Some(ThreadRole::Host(h)) => h.thread.contacts.contacts.keys().cloned().collect(),
            Some(ThreadRole::Slave(s)) => s
                .thread()
                .map(|t| t.contacts.contacts.keys().cloned().collect())
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Close the current host (if one we authored) and insert a new one
    /// seeded with `contacts`, migrating any buffered messages onto it
    /// (SPEC_FULL.md §4.3, §4.4).
    fn spawn_new_host(&mut self, created: u64, contacts: Vec<PeerUri>) -> Key<ThreadRole> {
        if let Some(key) = self.last_open_thread {
            if let Some(ThreadRole::Host(h)) = self.roles.get_mut(key) {
                h.close();
            }
        }

        let host_id = HostThreadId::from(format!("{}-{}", self.self_peer, created));
        let mut host = HostRole::new(self.base.clone(), host_id.clone(), created, self.topic.clone());
        host.add_contacts(contacts);
        for message in self.pending_messages.drain(..) {
            host.send_message(message, Instant::now());
        }

        let key = self.roles.insert(ThreadRole::Host(host));
        self.hosts.insert(host_id, key);
        self.open_thread = Some(key);
        self.last_open_thread = Some(key);
        key
    }

    /// Mutate in place if the current open host is safe to change; otherwise
    /// spawn a replacement host seeded with `next_contacts` (SPEC_FULL.md
    /// §4.3).
    fn mutate_contacts(
        &mut self,
        created: u64,
        changed: Vec<PeerUri>,
        removing: bool,
        apply_in_place: impl FnOnce(&mut HostRole, Vec<PeerUri>),
    ) {
        if let Some(key) = self.last_open_thread {
            if let Some(ThreadRole::Host(host)) = self.roles.get_mut(key) {
                if host.safe_to_change_contacts() {
                    apply_in_place(host, changed);
                    return;
                }
            }
        }

        let mut contacts = self.current_contacts();
        if removing {
            contacts.retain(|p| !changed.contains(p));
        } else {
            for p in &changed {
                if !contacts.contains(p) {
                    contacts.push(p.clone());
                }
            }
        }
        if !contacts.contains(&self.self_peer) {
            contacts.push(self.self_peer.clone());
        }
        self.spawn_new_host(created, contacts);
    }

    pub fn add_contacts(&mut self, peers: Vec<PeerUri>, created: u64) {
        self.mutate_contacts(created, peers, false, |host, peers| host.add_contacts(peers));
    }

    pub fn remove_contacts(&mut self, peers: Vec<PeerUri>, created: u64) {
        self.mutate_contacts(created, peers, true, |host, peers| host.remove_contacts(peers));
    }

    /// Buffer in `pending_messages` with delivery state `Discovering`
    /// (implicit: the message is untracked until an open host exists to
    /// send it from), then step.
    pub fn send_message(&mut self, message: Message) {
        match self.open_thread.and_then(|k| self.roles.get_mut(k)) {
            Some(ThreadRole::Host(host)) => host.send_message(message, Instant::now()),
            _ => self.pending_messages.push(message),
        }
    }

    pub fn get_message(&self, id: &MessageId) -> Option<&Message> {
        match self.last_open_role() {
            Some(ThreadRole::Host(host)) => host.thread.messages.get(id),
            Some(ThreadRole::Slave(slave)) => slave.thread().and_then(|t| t.messages.get(id)),
            None => None,
        }
    }

    /// Reads the first peer contact tracking `id`. Adequate for the common
    /// one-or-two-remote-contact case (SPEC_FULL.md §8 S1); a thread with
    /// several contacts in flight would need a per-peer query instead, not
    /// modeled here.
    pub fn get_message_delivery_state(&self, id: &MessageId) -> Option<DeliveryState> {
        let Some(ThreadRole::Host(host)) = self.last_open_role() else {
            return None;
        };
        host.peer_uris()
            .find_map(|peer| host.peer_contact(peer).and_then(|c| c.delivery_state(id)))
    }

    pub fn place_call(&mut self, call_id: CallId, callee: PeerUri, has_audio: bool, has_video: bool) {
        let self_peer = self.self_peer.clone();
        let self_location = self.self_location.clone();
        let mut new_call = None;
        match self.open_thread.and_then(|k| self.roles.get_mut(k)) {
            Some(ThreadRole::Host(host)) => {
                let dialog = Dialog::new_placed(
                    DialogId::from(call_id.as_str()),
                    self_peer.clone(),
                    self_location,
                    callee.clone(),
                );
                host.thread.update_begin();
                host.thread.upsert_dialog(dialog);
                new_call = Some(Call::new_placed(call_id.clone(), self_peer, callee, has_audio, has_video));
            }
            _ => self.pending_calls.push(PendingCall {
                call_id: call_id.clone(),
                callee,
                has_audio,
                has_video,
            }),
        }
        if let Some(call) = new_call {
            self.calls.insert(call_id, call);
        }
    }

    pub fn call(&self, id: &CallId) -> Option<&Call> {
        self.calls.get(id)
    }

    /// Fold one classified dialog event from a `SlaveRole` mirror into the
    /// conversation's call set (SPEC_FULL.md §4.5). Returns `Some` when the
    /// event was a re-answer (`Dialog::replaces`, §8 S5) so the caller can
    /// move transport focus from the old call to the new one.
    pub fn notify_call_state_changed(&mut self, event: DialogEvent) -> Option<CallReplaced> {
        match event {
            DialogEvent::Incoming(dialog) => {
                let call_id = CallId::from(dialog.dialog_id.as_str());
                self.calls
                    .entry(call_id)
                    .or_insert_with(|| Call::new_for_incoming(CallId::from(dialog.dialog_id.as_str()), &dialog, true, false));
                None
            }
            DialogEvent::Updated(dialog) => {
                if let Some(old_id) = dialog.replaces.clone() {
                    self.apply_replaces(&old_id, &dialog)
                } else {
                    self.apply_dialog_to_call(&dialog);
                    None
                }
            }
            // caller side re-evaluates candidates on the next
            // `gather_dialog_replies` call; nothing to do eagerly here.
            DialogEvent::ReplyFromSelf(_) => None,
            DialogEvent::Removed(dialog_id) => {
                self.notify_call_cleanup(&CallId::from(dialog_id.as_str()));
                None
            }
        }
    }

    /// A re-answer (SPEC_FULL.md §8 S5): `new_dialog.replaces` points at a
    /// prior dialog whose call is closed with `ClosedReason::Replaced`
    /// while the new dialog's call takes over, inheriting the old call's
    /// audio/video flags.
    fn apply_replaces(&mut self, old_id: &DialogId, new_dialog: &Dialog) -> Option<CallReplaced> {
        let old_call_id = CallId::from(old_id.as_str());
        let new_call_id = CallId::from(new_dialog.dialog_id.as_str());
        let (has_audio, has_video) = self
            .calls
            .get(&old_call_id)
            .map(|c| (c.has_audio, c.has_video))
            .unwrap_or((true, false));
        if let Some(old_call) = self.calls.get_mut(&old_call_id) {
            old_call.try_set_state(crate::call::CallState::Closed, ClosedReason::Replaced);
        }
        let new_call = self
            .calls
            .entry(new_call_id.clone())
            .or_insert_with(|| Call::new_for_incoming(new_call_id.clone(), new_dialog, has_audio, has_video));
        if let Some(callee_location) = &new_dialog.callee_location_id {
            new_call.observe_candidate(callee_location.clone(), new_dialog.dialog_id.clone(), CallLocationState::Ready);
        }
        Some(CallReplaced { old_call_id, new_call_id })
    }

    fn apply_dialog_to_call(&mut self, dialog: &Dialog) {
        let call_id = CallId::from(dialog.dialog_id.as_str());
        let Some(call) = self.calls.get_mut(&call_id) else {
            return;
        };
        if let Some(callee_location) = &dialog.callee_location_id {
            let call_location_state = match dialog.state {
                DialogState::Early => CallLocationState::Early,
                DialogState::Ringing => CallLocationState::Ringing,
                DialogState::Open => CallLocationState::Ready,
                DialogState::Closed | DialogState::Closing => CallLocationState::Closed,
                _ => CallLocationState::Pending,
            };
            call.observe_candidate(callee_location.clone(), dialog.dialog_id.clone(), call_location_state);
        }
        if dialog.state == DialogState::Closed {
            call.try_set_state(crate::call::CallState::Closed, dialog.closed_reason);
        }
    }

    pub fn notify_call_cleanup(&mut self, call_id: &CallId) {
        self.calls.remove(call_id);
    }

    /// Aggregate remote-side dialog views for `call_id` across every peer
    /// location of the owning host (SPEC_FULL.md §4.3): used by the caller
    /// to detect the callee's answer.
    pub fn gather_dialog_replies(&self, call_id: &CallId) -> Vec<Dialog> {
        let dialog_id = DialogId::from(call_id.as_str());
        let Some(ThreadRole::Host(host)) = self.last_open_role() else {
            return Vec::new();
        };
        host.peer_uris()
            .filter_map(|peer| host.peer_contact(peer))
            .flat_map(|contact| contact.locations.values())
            .filter_map(|loc| loc.dialogs())
            .filter_map(|dialogs| dialogs.get(&dialog_id).cloned())
            .collect()
    }

    /// Open-host election (SPEC_FULL.md §4.3): among every held `Host` or
    /// observed `Slave` role whose mirrored/authored document is `Open`,
    /// pick the one with the latest `created` time (host-thread-id
    /// lexicographic tiebreak on exact ties — concurrent creators race,
    /// per §8 S2). Any other host this peer itself authored and which
    /// lost the election is closed; an observed host that lost stays as a
    /// mirror, since this peer has no authority to close someone else's
    /// document.
    fn elect_open_host(&mut self) {
        let mut candidates: Vec<(u64, HostThreadId, Key<ThreadRole>)> = Vec::new();
        for (host_id, &key) in &self.hosts {
            let details = match self.roles.get(key) {
                Some(ThreadRole::Host(host)) => Some(&host.thread.details),
                Some(ThreadRole::Slave(slave)) => slave.thread().map(|t| &t.details),
                None => None,
            };
            if let Some(details) = details {
                if details.is_open() {
                    candidates.push((details.created, host_id.clone(), key));
                }
            }
        }
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        let Some(&(_, _, winner)) = candidates.last() else {
            return;
        };

        for &(_, _, key) in &candidates {
            if key != winner {
                if let Some(ThreadRole::Host(host)) = self.roles.get_mut(key) {
                    host.close();
                }
            }
        }
        self.open_thread = matches!(self.roles.get(winner), Some(ThreadRole::Host(_))).then_some(winner);
        self.last_open_thread = Some(winner);
    }

    fn contacts_crc(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for peer in self.current_contacts() {
            hasher.update(peer.as_str().as_bytes());
            hasher.update(b"\0");
        }
        hasher.finalize()
    }

    /// Cooperative step: run open-host election, step the resulting host's
    /// peer contacts, flush buffered sends/calls, and compute
    /// contacts-changed signalling (SPEC_FULL.md §4.3, §4.4).
    pub fn step(&mut self, cfg: &EngineConfig) -> ConversationStepOutcome {
        self.elect_open_host();

        if self.open_thread.is_some() && !self.pending_calls.is_empty() {
            let open_key = self.open_thread;
            let pending = std::mem::take(&mut self.pending_calls);
            for call in pending {
                if let Some(ThreadRole::Host(host)) = open_key.and_then(|k| self.roles.get_mut(k)) {
                    let dialog = Dialog::new_placed(
                        DialogId::from(call.call_id.as_str()),
                        self.self_peer.clone(),
                        self.self_location.clone(),
                        call.callee.clone(),
                    );
                    host.thread.update_begin();
                    host.thread.upsert_dialog(dialog);
                }
                self.calls.insert(
                    call.call_id.clone(),
                    Call::new_placed(call.call_id, self.self_peer.clone(), call.callee, call.has_audio, call.has_video),
                );
            }
        }

        let push_requests = match self.open_thread.and_then(|k| self.roles.get_mut(k)) {
            Some(ThreadRole::Host(host)) => host.step(cfg).push_requests,
            _ => Vec::new(),
        };

        let crc = self.contacts_crc();
        let contacts_changed = self.last_signalled_crc != Some(crc);
        self.last_signalled_crc = Some(crc);

        ConversationStepOutcome {
            push_requests,
            contacts_changed,
        }
    }
}

//! Production data-flow glue (SPEC_FULL.md §2): the single object an
//! embedder constructs to run this crate. Holds every live
//! `ConversationThread` keyed by its base-thread-id, implements
//! [`FetchDelegate`] to fold freshly fetched publications into the right
//! role, and republishes through a `PublicationRepository` on each step.
//!
//! Grounded on `sync.rs`'s top-level driver (own a set of child
//! controllers keyed by id, dispatch inbound deltas to the right one,
//! react to what it reports) generalised from a single global store to a
//! map of per-thread engines.

use crate::call_transport::CallTransport;
use crate::conversation_thread::{CallReplaced, ConversationThread, ThreadRole};
use crate::delegate::ConversationThreadDelegate;
use crate::document::name::{self, ParsedName};
use crate::fetcher::FetchDelegate;
use crate::host_role::HostStepOutcome;
use crate::ids::{BaseThreadId, HostThreadId, LocationId, MessageId, PeerUri};
use crate::repository::{Publication, PublicationRepository};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Owns every conversation thread this peer currently participates in and
/// routes fetched publications to the right role (SPEC_FULL.md §2's "Data
/// flow" paragraph). Generic over the concrete repository so it can hand
/// out `Arc<R>` to whatever needs to publish or subscribe.
pub struct ConversationThreadSet<R: PublicationRepository> {
    self_peer: PeerUri,
    self_location: LocationId,
    repo: Arc<R>,
    delegate: Option<Arc<dyn ConversationThreadDelegate>>,
    call_transport: Option<Arc<Mutex<CallTransport>>>,
    threads: Mutex<HashMap<BaseThreadId, ConversationThread>>,
}

impl<R: PublicationRepository> ConversationThreadSet<R> {
    pub fn new(self_peer: PeerUri, self_location: LocationId, repo: Arc<R>) -> Self {
        Self {
            self_peer,
            self_location,
            repo,
            delegate: None,
            call_transport: None,
            threads: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn ConversationThreadDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn set_call_transport(&mut self, transport: Arc<Mutex<CallTransport>>) {
        self.call_transport = Some(transport);
    }

    pub fn repo(&self) -> &Arc<R> {
        &self.repo
    }

    /// Create and register a brand-new, locally authored conversation
    /// (SPEC_FULL.md §4.3 construction path 1). `created` is the caller's
    /// own wall-clock reading, same as `ConversationThread::new_local`
    /// takes it directly rather than reading a clock internally.
    pub fn create_local(&self, base: BaseThreadId, created: u64, topic: String) -> BaseThreadId {
        let thread = ConversationThread::new_local(
            base.clone(),
            self.self_peer.clone(),
            self.self_location.clone(),
            created,
            topic,
        );
        self.threads.lock().unwrap().insert(base.clone(), thread);
        base
    }

    /// Begin observing a remote peer's host document for `base`, creating
    /// the conversation if this is the first host known for it
    /// (SPEC_FULL.md §4.3 construction path 2). Subscribes through the
    /// repository so future publications trigger the fetcher.
    pub async fn watch_remote_host(
        &self,
        base: BaseThreadId,
        host: HostThreadId,
        host_peer: PeerUri,
        host_location: LocationId,
    ) -> Result<(), R::Error> {
        {
            let mut threads = self.threads.lock().unwrap();
            threads
                .entry(base.clone())
                .or_insert_with(|| {
                    ConversationThread::new_observed(
                        base.clone(),
                        host.clone(),
                        host_peer.clone(),
                        self.self_peer.clone(),
                        self.self_location.clone(),
                    )
                })
                .observe_host(host.clone(), host_peer, host_location.clone());
        }
        let name = name::host_document_name(&base, &host);
        self.repo.subscribe(&host_location, &name).await
    }

    pub fn with_thread<T>(&self, base: &BaseThreadId, f: impl FnOnce(&mut ConversationThread) -> T) -> Option<T> {
        self.threads.lock().unwrap().get_mut(base).map(f)
    }

    /// Step every held conversation and publish its diff (SPEC_FULL.md §5
    /// concurrency model: this is the per-tick work of the `core` queue).
    pub async fn step_and_publish(&self, cfg: &crate::config::EngineConfig) -> Result<(), crate::error::ThreadError> {
        let bases: Vec<BaseThreadId> = self.threads.lock().unwrap().keys().cloned().collect();
        for base in bases {
            {
                let mut threads = self.threads.lock().unwrap();
                if let Some(thread) = threads.get_mut(&base) {
                    thread.step(cfg);
                }
            }
            // Publish outside the lock's scope is not possible since
            // `publish` needs `&mut ConversationThread` across an await
            // point; re-acquire per thread instead of holding the whole
            // map locked for every publish in sequence.
            self.publish_one(&base).await?;
        }
        Ok(())
    }

    async fn publish_one(&self, base: &BaseThreadId) -> Result<(), crate::error::ThreadError> {
        // `std::sync::Mutex` cannot be held across an `.await`; take the
        // thread out, publish, then put it back.
        let mut thread = {
            let mut threads = self.threads.lock().unwrap();
            match threads.remove(base) {
                Some(t) => t,
                None => return Ok(()),
            }
        };
        let result = thread.publish(self.repo.as_ref()).await;
        self.threads.lock().unwrap().insert(base.clone(), thread);
        result
    }

    /// Fold a freshly fetched host-document publication into the matching
    /// `SlaveRole` mirror, then notify delegates/transport once the
    /// internal lock is released (SPEC_FULL.md §2, `delegate.rs`'s
    /// re-entrancy contract).
    fn deliver_host_publication(&self, base: BaseThreadId, host: HostThreadId, location: LocationId, body: Vec<u8>) {
        type Forwarded = Vec<(MessageId, PeerUri)>;
        type Replaced = Vec<(CallReplaced, Option<LocationId>, bool, bool)>;

        let (forwarded, replaced): (Forwarded, Replaced) = {
            let mut threads = self.threads.lock().unwrap();
            let Some(thread) = threads.get_mut(&base) else {
                return;
            };
            let update = match thread.apply_host_update(&host, location, &body) {
                Ok(Some(update)) => update,
                Ok(None) => return,
                Err(e) => {
                    log::warn!("host publication for {base}/{host} malformed: {e}");
                    return;
                }
            };

            let forwarded: Forwarded = update
                .messages_forwarded
                .iter()
                .filter_map(|id| thread.get_message(id).map(|m| (id.clone(), m.from_peer_uri.clone())))
                .collect();

            let replaced: Replaced = update
                .dialog_events
                .into_iter()
                .filter_map(|event| {
                    let call_replaced = thread.notify_call_state_changed(event)?;
                    let (location_id, has_audio, has_video) = thread
                        .call(&call_replaced.new_call_id)
                        .map(|c| (c.picked_location.clone(), c.has_audio, c.has_video))
                        .unwrap_or((None, true, false));
                    Some((call_replaced, location_id, has_audio, has_video))
                })
                .collect();

            (forwarded, replaced)
        };

        if let Some(delegate) = &self.delegate {
            for (message_id, from) in &forwarded {
                delegate.message_added(&base, message_id, from);
            }
        }
        if let Some(transport) = &self.call_transport {
            for (call_replaced, location_id, has_audio, has_video) in &replaced {
                let Some(location_id) = location_id else { continue };
                let mut transport = transport.lock().unwrap();
                if let Err(e) = transport.transfer_focus(
                    &call_replaced.old_call_id,
                    call_replaced.new_call_id.clone(),
                    location_id.clone(),
                    *has_audio,
                    *has_video,
                ) {
                    log::warn!("transfer_focus failed for {}: {e}", call_replaced.new_call_id);
                }
            }
        }
    }

    /// Fold a freshly fetched slave (feedback) publication into the
    /// matching peer contact's location mirror, then apply whatever
    /// suggestions it surfaced to the owning host (SPEC_FULL.md §4.5,
    /// §4.6).
    fn deliver_slave_publication(
        &self,
        base: BaseThreadId,
        host: HostThreadId,
        peer: PeerUri,
        location: LocationId,
        body: Vec<u8>,
    ) {
        let mut threads = self.threads.lock().unwrap();
        let Some(thread) = threads.get_mut(&base) else {
            return;
        };

        let mirror_update = {
            let Some(ThreadRole::Host(host_role)) = thread.role_mut_for_host(&host) else {
                return;
            };
            let Some(contact) = host_role.peer_contact_mut(&peer) else {
                return;
            };
            match contact.ensure_location(location).apply_mirror_update(&body) {
                Ok(update) => update,
                Err(e) => {
                    log::warn!("slave feedback for {base}/{host}/{peer} malformed: {e}");
                    return;
                }
            }
        };

        let mut outcome = HostStepOutcome::default();
        if let Some(ThreadRole::Host(host_role)) = thread.role_mut_for_host(&host) {
            host_role.apply_receipts(&peer, &mirror_update.delivered, &mirror_update.read);
            host_role.record_suggestions(
                &mut outcome,
                &peer,
                mirror_update.suggested_add,
                mirror_update.suggested_remove,
                mirror_update.dialogs_changed,
                mirror_update.dialogs_removed,
            );
        }
        drop(threads);

        if !outcome.suggested_add.is_empty() || !outcome.suggested_remove.is_empty() {
            self.with_thread(&base, |thread| {
                if !outcome.suggested_add.is_empty() {
                    thread.add_contacts(outcome.suggested_add.clone(), unix_now());
                }
                if !outcome.suggested_remove.is_empty() {
                    thread.remove_contacts(outcome.suggested_remove.clone(), unix_now());
                }
            });
        }
    }
}

impl<R: PublicationRepository + 'static> FetchDelegate for ConversationThreadSet<R> {
    fn publication_updated(&self, location: &LocationId, publication: Publication) {
        match name::parse(&publication.name) {
            Ok(ParsedName::Host { base, host }) => {
                self.deliver_host_publication(base, host, location.clone(), publication.body);
            }
            Ok(ParsedName::Slave { base, host, peer, location }) => {
                self.deliver_slave_publication(base, host, peer, location, publication.body);
            }
            Ok(ParsedName::Contact { .. }) => {
                // identity-contacts sub-publications are consumed by the
                // account layer, out of scope here (SPEC_FULL.md §1).
            }
            Err(e) => log::warn!("unroutable publication name {}: {e}", publication.name),
        }
    }
}

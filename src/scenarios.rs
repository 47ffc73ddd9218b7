//! Multi-peer convergence scenarios (SPEC_FULL.md §8 S1-S6), driven end to
//! end through [`crate::engine::ConversationThreadSet`] and
//! [`crate::testutil::InMemoryRepository`]. `InMemoryRepository` has no
//! out-of-band notification channel (see its own doc comment), so every
//! scenario fetches the just-published body itself and feeds it through
//! `FetchDelegate::publication_updated` — exactly what a real
//! `DocumentFetcher` would do after a subscription fires.

use crate::call::CallState;
use crate::call_transport::{CallTransport, IceSocket, IceSocketFactory, MediaEngine};
use crate::config::EngineConfig;
use crate::conversation_thread::ThreadRole;
use crate::document::name::host_document_name;
use crate::document::{Body, Contact, ClosedReason, Details, Dialog, DialogState, DeliveryState, Message, ThreadDocument};
use crate::engine::ConversationThreadSet;
use crate::error::TransportError;
use crate::fetcher::FetchDelegate;
use crate::ids::{BaseThreadId, CallId, DialogId, HostThreadId, LocationId, MessageId, PeerUri};
use crate::repository::{DocumentName, PublicationRepository};
use crate::testutil::InMemoryRepository;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn message(id: &str, from: &str) -> Message {
    Message {
        message_id: MessageId::from(id),
        replaces_id: None,
        from_peer_uri: PeerUri::from(from),
        mime_type: "text/plain".into(),
        body: Body::InMemory(b"hi".to_vec()),
        sent_time: 1,
        signature: None,
        validated: false,
    }
}

/// Simulate what a real `DocumentFetcher` does once a subscription fires:
/// fetch the body the repository actually holds and hand it to the
/// `FetchDelegate`. Every publish in `InMemoryRepository` lands under the
/// fixed `"self"` location regardless of which peer published it.
async fn deliver<R: PublicationRepository + 'static>(
    set: &ConversationThreadSet<R>,
    repo: &InMemoryRepository,
    observed_from: LocationId,
    name: &DocumentName,
) {
    let publication = repo.fetch(&LocationId::from("self"), name).await.unwrap();
    set.publication_updated(&observed_from, publication);
}

fn host_id_of(name: &DocumentName) -> HostThreadId {
    match crate::document::name::parse(name).unwrap() {
        crate::document::name::ParsedName::Host { host, .. } => host,
        _ => panic!("expected a host document name"),
    }
}

struct NoopSocket;
impl IceSocket for NoopSocket {
    fn send_to(&self, _location_id: &LocationId, _packet: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }
}

struct NoopFactory;
impl IceSocketFactory for NoopFactory {
    fn create_audio_socket(&self) -> Result<Box<dyn IceSocket>, TransportError> {
        Ok(Box::new(NoopSocket))
    }
    fn create_video_socket(&self) -> Result<Box<dyn IceSocket>, TransportError> {
        Ok(Box::new(NoopSocket))
    }
}

struct NoopMediaEngine;
impl MediaEngine for NoopMediaEngine {
    fn start(&mut self, _call_id: &CallId, _location_id: &LocationId) -> Result<(), TransportError> {
        Ok(())
    }
    fn stop(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
    fn deliver_inbound_rtp(&mut self, _packet: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }
    fn deliver_inbound_rtcp(&mut self, _packet: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }
}

fn noop_transport() -> CallTransport {
    CallTransport::new(Box::new(NoopFactory), Box::new(NoopMediaEngine))
}

/// S1: a message sent by the host is forwarded to an observing peer, and
/// that peer's delivery receipt, published back through its own feedback
/// document, reaches the host's delivery-state tracking.
#[tokio::test]
async fn s1_message_exchange_round_trips_a_delivery_receipt() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDelegate(AtomicUsize);
    impl crate::delegate::ConversationThreadDelegate for CountingDelegate {
        fn message_added(&self, _t: &BaseThreadId, _m: &MessageId, _f: &PeerUri) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let repo = Arc::new(InMemoryRepository::new());
    let cfg = EngineConfig::default();

    let host_set = ConversationThreadSet::new(PeerUri::from("host"), LocationId::from("host-loc"), repo.clone());
    let base = host_set.create_local(BaseThreadId::from("s1"), 1000, "chat".into());
    host_set.with_thread(&base, |t| t.add_contacts(vec![PeerUri::from("a")], 1000));
    let host_name = host_set
        .with_thread(&base, |t| match t.last_open_role() {
            Some(ThreadRole::Host(h)) => h.document_name().clone(),
            _ => panic!("expected an open host"),
        })
        .unwrap();
    let host = host_id_of(&host_name);
    host_set.step_and_publish(&cfg).await.unwrap();

    let mut a_set = ConversationThreadSet::new(PeerUri::from("a"), LocationId::from("a-loc"), repo.clone());
    let delegate = Arc::new(CountingDelegate(AtomicUsize::new(0)));
    a_set.set_delegate(delegate.clone());
    a_set
        .watch_remote_host(base.clone(), host.clone(), PeerUri::from("host"), LocationId::from("host-loc"))
        .await
        .unwrap();
    deliver(&a_set, &repo, LocationId::from("host-loc"), &host_name).await;

    host_set.with_thread(&base, |t| t.send_message(message("m1", "host")));
    host_set.step_and_publish(&cfg).await.unwrap();
    deliver(&a_set, &repo, LocationId::from("host-loc"), &host_name).await;
    assert_eq!(delegate.0.load(Ordering::SeqCst), 1);

    a_set.with_thread(&base, |t| {
        if let Some(ThreadRole::Slave(slave)) = t.role_mut_for_host(&host) {
            slave.record_delivered(MessageId::from("m1"), 42);
        }
    });
    a_set.step_and_publish(&cfg).await.unwrap();

    let feedback_name = crate::document::name::slave_document_name(&base, &host, &PeerUri::from("a"), &LocationId::from("a-loc"));
    deliver(&host_set, &repo, LocationId::from("a-loc"), &feedback_name).await;

    let state = host_set.with_thread(&base, |t| t.get_message_delivery_state(&MessageId::from("m1")));
    assert_eq!(state.flatten(), Some(DeliveryState::Delivered));
}

/// S2: two peers independently create a host for the same base-thread-id
/// (e.g. racing off a shared invite). Election converges on the later
/// `created` time on both sides, regardless of who observes whom first.
#[tokio::test]
async fn s2_election_race_converges_on_latest_created() {
    let repo = Arc::new(InMemoryRepository::new());
    let cfg = EngineConfig::default();
    let base = BaseThreadId::from("s2");

    let alice_set = ConversationThreadSet::new(PeerUri::from("alice"), LocationId::from("alice-loc"), repo.clone());
    let bob_set = ConversationThreadSet::new(PeerUri::from("bob"), LocationId::from("bob-loc"), repo.clone());

    alice_set.create_local(base.clone(), 1000, "t".into());
    bob_set.create_local(base.clone(), 2000, "t".into());

    let alice_name = alice_set
        .with_thread(&base, |t| match t.last_open_role() {
            Some(ThreadRole::Host(h)) => h.document_name().clone(),
            _ => panic!("expected alice's own host"),
        })
        .unwrap();
    let bob_name = bob_set
        .with_thread(&base, |t| match t.last_open_role() {
            Some(ThreadRole::Host(h)) => h.document_name().clone(),
            _ => panic!("expected bob's own host"),
        })
        .unwrap();
    let alice_host = host_id_of(&alice_name);
    let bob_host = host_id_of(&bob_name);

    alice_set.step_and_publish(&cfg).await.unwrap();
    bob_set.step_and_publish(&cfg).await.unwrap();

    alice_set
        .watch_remote_host(base.clone(), bob_host.clone(), PeerUri::from("bob"), LocationId::from("bob-loc"))
        .await
        .unwrap();
    deliver(&alice_set, &repo, LocationId::from("bob-loc"), &bob_name).await;

    bob_set
        .watch_remote_host(base.clone(), alice_host.clone(), PeerUri::from("alice"), LocationId::from("alice-loc"))
        .await
        .unwrap();
    deliver(&bob_set, &repo, LocationId::from("alice-loc"), &alice_name).await;

    alice_set.step_and_publish(&cfg).await.unwrap();
    bob_set.step_and_publish(&cfg).await.unwrap();

    assert_eq!(alice_set.with_thread(&base, |t| t.authors_open_host()), Some(false));
    assert_eq!(bob_set.with_thread(&base, |t| t.authors_open_host()), Some(true));
}

/// S3: a message waits past `max_wait_before_push` with no delivery
/// receipt, so the host marks it `UserNotAvailable` and raises a push
/// request (SPEC_FULL.md §4.6).
#[tokio::test]
async fn s3_push_fallback_fires_once_wait_elapses() {
    let repo = Arc::new(InMemoryRepository::new());
    let mut cfg = EngineConfig::default();
    cfg.max_wait_before_push = Duration::from_millis(0);

    let host_set = ConversationThreadSet::new(PeerUri::from("host"), LocationId::from("host-loc"), repo.clone());
    let base = host_set.create_local(BaseThreadId::from("s3"), 1000, "t".into());
    host_set.with_thread(&base, |t| t.add_contacts(vec![PeerUri::from("a")], 1000));
    host_set.with_thread(&base, |t| t.send_message(message("m1", "host")));

    let outcome = host_set.with_thread(&base, |t| t.step(&cfg)).unwrap();
    assert_eq!(outcome.push_requests.len(), 1);
    assert_eq!(outcome.push_requests[0].peer_uri, PeerUri::from("a"));

    let state = host_set.with_thread(&base, |t| t.get_message_delivery_state(&MessageId::from("m1")));
    assert_eq!(state.flatten(), Some(DeliveryState::UserNotAvailable));
}

/// S4: a call placed by the host surfaces as an incoming call on the
/// observing peer's `SlaveRole` mirror once the dialog is delivered.
#[tokio::test]
async fn s4_placed_call_observed_as_incoming_by_slave_role() {
    let repo = Arc::new(InMemoryRepository::new());
    let cfg = EngineConfig::default();

    let host_set = ConversationThreadSet::new(PeerUri::from("host"), LocationId::from("host-loc"), repo.clone());
    let base = host_set.create_local(BaseThreadId::from("s4"), 1000, "t".into());
    host_set.with_thread(&base, |t| t.add_contacts(vec![PeerUri::from("a")], 1000));
    host_set.with_thread(&base, |t| t.place_call(CallId::from("c1"), PeerUri::from("a"), true, false));
    let host_name = host_set
        .with_thread(&base, |t| match t.last_open_role() {
            Some(ThreadRole::Host(h)) => h.document_name().clone(),
            _ => panic!("expected an open host"),
        })
        .unwrap();
    let host = host_id_of(&host_name);
    host_set.step_and_publish(&cfg).await.unwrap();

    let a_set = ConversationThreadSet::new(PeerUri::from("a"), LocationId::from("a-loc"), repo.clone());
    a_set
        .watch_remote_host(base.clone(), host.clone(), PeerUri::from("host"), LocationId::from("host-loc"))
        .await
        .unwrap();
    deliver(&a_set, &repo, LocationId::from("host-loc"), &host_name).await;

    assert_eq!(a_set.with_thread(&base, |t| t.call(&CallId::from("c1")).is_some()), Some(true));
}

/// S5: a dialog carrying a `replaces` pointer (a re-answer at a new
/// location) closes the old call and moves transport focus to the new one
/// (SPEC_FULL.md §8 S5, open question on `replaces` handling).
#[tokio::test]
async fn s5_reanswer_transfers_focus_to_the_new_dialog() {
    let repo = Arc::new(InMemoryRepository::new());
    let base = BaseThreadId::from("s5");
    let host = HostThreadId::from("host-1000");
    let host_peer = PeerUri::from("host");
    let host_loc = LocationId::from("host-loc");
    let self_peer = PeerUri::from("a");
    let name = host_document_name(&base, &host);

    let mut doc = ThreadDocument::new(Details::new_open(base.clone(), host.clone(), 1000, "t".into()));
    doc.update_begin();
    let mut contacts = BTreeMap::new();
    contacts.insert(self_peer.clone(), Contact::new(self_peer.clone()));
    contacts.insert(host_peer.clone(), Contact::new(host_peer.clone()));
    doc.set_contacts(contacts);
    doc.upsert_dialog(Dialog::new_placed(
        DialogId::from("d1"),
        host_peer.clone(),
        host_loc.clone(),
        self_peer.clone(),
    ));
    doc.update_end(repo.as_ref(), &name).await.unwrap();

    let mut a_set = ConversationThreadSet::new(self_peer.clone(), LocationId::from("a-loc"), repo.clone());
    let transport = Arc::new(Mutex::new(noop_transport()));
    a_set.set_call_transport(transport.clone());
    a_set
        .watch_remote_host(base.clone(), host.clone(), host_peer.clone(), host_loc.clone())
        .await
        .unwrap();
    deliver(&a_set, &repo, host_loc.clone(), &name).await;
    assert!(a_set.with_thread(&base, |t| t.call(&CallId::from("d1")).is_some()).unwrap());

    transport.lock().unwrap().note_call_started(CallId::from("d1")).unwrap();
    transport
        .lock()
        .unwrap()
        .set_focus(CallId::from("d1"), LocationId::from("old-phone"), true, false)
        .unwrap();

    doc.update_begin();
    doc.remove_dialog(&DialogId::from("d1"));
    doc.upsert_dialog(Dialog {
        dialog_id: DialogId::from("d2"),
        state: DialogState::Open,
        closed_reason: ClosedReason::None,
        caller_peer_uri: host_peer.clone(),
        caller_location_id: host_loc.clone(),
        callee_peer_uri: self_peer.clone(),
        callee_location_id: Some(LocationId::from("new-phone")),
        replaces: Some(DialogId::from("d1")),
        descriptions: Vec::new(),
    });
    doc.update_end(repo.as_ref(), &name).await.unwrap();
    deliver(&a_set, &repo, host_loc.clone(), &name).await;

    assert_eq!(
        transport.lock().unwrap().focused(),
        Some((&CallId::from("d2"), &LocationId::from("new-phone")))
    );
    assert_eq!(a_set.with_thread(&base, |t| t.call(&CallId::from("d1")).is_some()), Some(false));
    let new_call_state = a_set.with_thread(&base, |t| t.call(&CallId::from("d2")).map(|c| c.state));
    assert_eq!(new_call_state.flatten(), Some(CallState::Incoming));
}

/// S6: a participant removed from a host's contacts stops receiving
/// forwarded messages, but the `SlaveRole` mirror keeps folding dialog
/// updates for any call still in progress (SPEC_FULL.md §9 open question
/// 1, §4.5).
#[tokio::test]
async fn s6_removed_participant_still_folds_dialog_updates() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDelegate(AtomicUsize);
    impl crate::delegate::ConversationThreadDelegate for CountingDelegate {
        fn message_added(&self, _t: &BaseThreadId, _m: &MessageId, _f: &PeerUri) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let repo = Arc::new(InMemoryRepository::new());
    let cfg = EngineConfig::default();

    let host_set = ConversationThreadSet::new(PeerUri::from("host"), LocationId::from("host-loc"), repo.clone());
    let base = host_set.create_local(BaseThreadId::from("s6"), 1000, "t".into());
    host_set.with_thread(&base, |t| t.add_contacts(vec![PeerUri::from("a")], 1000));
    host_set.with_thread(&base, |t| t.place_call(CallId::from("c1"), PeerUri::from("a"), true, false));
    let host_name = host_set
        .with_thread(&base, |t| match t.last_open_role() {
            Some(ThreadRole::Host(h)) => h.document_name().clone(),
            _ => panic!("expected an open host"),
        })
        .unwrap();
    let host = host_id_of(&host_name);
    host_set.step_and_publish(&cfg).await.unwrap();

    let mut a_set = ConversationThreadSet::new(PeerUri::from("a"), LocationId::from("a-loc"), repo.clone());
    let delegate = Arc::new(CountingDelegate(AtomicUsize::new(0)));
    a_set.set_delegate(delegate.clone());
    a_set
        .watch_remote_host(base.clone(), host.clone(), PeerUri::from("host"), LocationId::from("host-loc"))
        .await
        .unwrap();
    deliver(&a_set, &repo, LocationId::from("host-loc"), &host_name).await;
    assert!(a_set.with_thread(&base, |t| t.call(&CallId::from("c1")).is_some()).unwrap());

    // End the call and drop "a" from the conversation in the same publish.
    host_set.with_thread(&base, |t| {
        if let Some(ThreadRole::Host(host_role)) = t.last_open_role_mut() {
            host_role.thread.update_begin();
            host_role.thread.upsert_dialog(Dialog {
                dialog_id: DialogId::from("c1"),
                state: DialogState::Closed,
                closed_reason: ClosedReason::User,
                caller_peer_uri: PeerUri::from("host"),
                caller_location_id: LocationId::from("host-loc"),
                callee_peer_uri: PeerUri::from("a"),
                callee_location_id: Some(LocationId::from("a-loc")),
                replaces: None,
                descriptions: Vec::new(),
            });
        }
        t.remove_contacts(vec![PeerUri::from("a")], 2000);
    });
    host_set.step_and_publish(&cfg).await.unwrap();
    deliver(&a_set, &repo, LocationId::from("host-loc"), &host_name).await;

    let call_state = a_set.with_thread(&base, |t| t.call(&CallId::from("c1")).map(|c| c.state));
    assert_eq!(call_state.flatten(), Some(CallState::Closed));

    // A message sent after removal is no longer forwarded to the delegate,
    // even though the dialog fold above went through.
    host_set.with_thread(&base, |t| t.send_message(message("m2", "host")));
    host_set.step_and_publish(&cfg).await.unwrap();
    deliver(&a_set, &repo, LocationId::from("host-loc"), &host_name).await;
    assert_eq!(delegate.0.load(Ordering::SeqCst), 0);
}

//! A small multiplexer in front of the publication repository
//! (SPEC_FULL.md §4.2). For each `(peer-location, document-name)` it keeps
//! at most one outstanding fetch; a second `notify_publication_updated`
//! arriving while a fetch is in flight coalesces into it rather than
//! starting a redundant one.
//!
//! Grounded on `network.rs`'s `DeltaTopicMap`: an async-`RwLock`-guarded
//! map with `insert`/`remove` helpers, adapted here from "topic → logs" to
//! "scope key → in-flight-fetch bookkeeping".

use crate::repository::{DocumentName, Publication, PublicationRepository};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::ids::LocationId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Scope {
    location: LocationId,
    name: DocumentName,
}

/// Receives fetched publications and gone/disconnect notices. Delivered
/// updates for a single `(name, location)` are in non-decreasing version
/// order on the wire; this trait does not itself enforce that — it is a
/// property of the repository plus `ThreadDocument::update_from`'s version
/// gate, which silently drops anything that doesn't advance.
pub trait FetchDelegate: Send + Sync {
    fn publication_updated(&self, location: &LocationId, publication: Publication);
}

pub struct DocumentFetcher<R: PublicationRepository> {
    repo: Arc<R>,
    in_flight: Mutex<HashSet<Scope>>,
    /// Scopes with a coalesced second notification pending a follow-up
    /// fetch once the in-flight one completes.
    pending_followup: Mutex<HashMap<Scope, u32>>,
}

impl<R: PublicationRepository + 'static> DocumentFetcher<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self {
            repo,
            in_flight: Mutex::new(HashSet::new()),
            pending_followup: Mutex::new(HashMap::new()),
        }
    }

    /// Called when the repository's subscription mechanism reports that
    /// `name` as published by `location` has changed. Enqueues a fetch, or
    /// coalesces into an already-outstanding one for the same scope.
    pub async fn notify_publication_updated(
        &self,
        location: LocationId,
        name: DocumentName,
        delegate: Arc<dyn FetchDelegate>,
    ) {
        let scope = Scope {
            location: location.clone(),
            name: name.clone(),
        };

        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight.contains(&scope) {
                let mut followups = self.pending_followup.lock().await;
                *followups.entry(scope).or_insert(0) += 1;
                return;
            }
            in_flight.insert(scope.clone());
        }

        self.run_fetch(scope, delegate).await;
    }

    async fn run_fetch(&self, scope: Scope, delegate: Arc<dyn FetchDelegate>) {
        loop {
            match self.repo.fetch(&scope.location, &scope.name).await {
                Ok(publication) => delegate.publication_updated(&scope.location, publication),
                Err(e) => {
                    log::warn!("document fetch failed for {}: {e}", scope.name);
                }
            }

            let mut followups = self.pending_followup.lock().await;
            match followups.get_mut(&scope) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    if *count == 0 {
                        followups.remove(&scope);
                    }
                    drop(followups);
                    // loop again: a coalesced notification arrived while we
                    // were fetching, so the result we just delivered may
                    // already be stale.
                    continue;
                }
                _ => {
                    followups.remove(&scope);
                    break;
                }
            }
        }
        self.in_flight.lock().await.remove(&scope);
    }

    /// Flush any pending follow-up for publications from `location` that
    /// the repository has reported as gone; nothing more will be
    /// delivered for that scope.
    pub async fn notify_publication_gone(&self, location: &LocationId, name: &DocumentName) {
        let scope = Scope {
            location: location.clone(),
            name: name.clone(),
        };
        self.pending_followup.lock().await.remove(&scope);
    }

    /// Flush all pending follow-ups scoped to a now-disconnected location.
    pub async fn notify_peer_disconnected(&self, location: &LocationId) {
        let mut followups = self.pending_followup.lock().await;
        followups.retain(|scope, _| &scope.location != location);
    }
}

//! In-memory `PublicationRepository` test double (SPEC_FULL.md §2.1: "an
//! in-memory `PublicationRepository` test double lives under `testutil`
//! for multi-peer convergence scenarios"), used by the unit tests in this
//! crate and by the S1-S6 scenarios in `src/scenarios.rs`.
//!
//! Grounded on `sync.rs`'s `ingest_op`/`get_topic_seq` pair: a simple
//! in-process store keyed by topic plus a last-seen marker, with no real
//! network — here the "topic" is `(location, document-name)` and the
//! "last-seen marker" is the stored body itself, since every publish fully
//! replaces the prior one (last-writer-wins per SPEC_FULL.md §5).

use crate::ids::LocationId;
use crate::repository::{DocumentName, Permissions, Publication, PublicationRepository};
use async_trait::async_trait;
use std::collections::HashMap;
use std::convert::Infallible;
use tokio::sync::Mutex;

#[derive(Default)]
struct Store {
    published: HashMap<(LocationId, DocumentName), Vec<u8>>,
    subscriptions: Vec<(LocationId, DocumentName)>,
}

/// A shared, in-memory stand-in for a real publish/subscribe repository.
/// Every peer location in a test scenario publishes under its own
/// `LocationId`; `fetch` returns whatever was last published there.
/// `subscribe` only records the pair for assertions — this double has no
/// out-of-band notification channel, so tests drive fetches directly.
#[derive(Default)]
pub struct InMemoryRepository {
    store: Mutex<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test-only helper: publish `body` as if `location` had authored it,
    /// without going through the full `publish` signature.
    pub async fn seed(&self, location: LocationId, name: DocumentName, body: Vec<u8>) {
        self.store.lock().await.published.insert((location, name), body);
    }

    pub async fn subscription_count(&self) -> usize {
        self.store.lock().await.subscriptions.len()
    }
}

#[async_trait]
impl PublicationRepository for InMemoryRepository {
    type Error = Infallible;

    async fn fetch(&self, location: &LocationId, name: &DocumentName) -> Result<Publication, Self::Error> {
        let store = self.store.lock().await;
        let body = store
            .published
            .get(&(location.clone(), name.clone()))
            .cloned()
            .unwrap_or_default();
        Ok(Publication {
            name: name.clone(),
            body,
        })
    }

    async fn publish(&self, name: &DocumentName, body: Vec<u8>, _permissions: Permissions) -> Result<(), Self::Error> {
        let mut store = self.store.lock().await;
        // The publishing location is encoded as the document's own name
        // prefix in real deployments; the test double keys on the name
        // alone plus a fixed "self" location so a single repository can
        // stand in for every peer's publish target in these scenarios.
        store.published.insert((LocationId::from("self"), name.clone()), body);
        Ok(())
    }

    async fn subscribe(&self, location: &LocationId, name: &DocumentName) -> Result<(), Self::Error> {
        self.store.lock().await.subscriptions.push((location.clone(), name.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_publication_is_fetchable() {
        let repo = InMemoryRepository::new();
        let loc = LocationId::from("loc1");
        let name = DocumentName("thread/b1/host/h1".into());
        repo.seed(loc.clone(), name.clone(), b"body".to_vec()).await;
        let publication = repo.fetch(&loc, &name).await.unwrap();
        assert_eq!(publication.body, b"body");
    }

    #[tokio::test]
    async fn fetch_of_unknown_name_returns_empty_body() {
        let repo = InMemoryRepository::new();
        let publication = repo
            .fetch(&LocationId::from("loc1"), &DocumentName("missing".into()))
            .await
            .unwrap();
        assert!(publication.body.is_empty());
    }

    #[tokio::test]
    async fn subscribe_is_recorded() {
        let repo = InMemoryRepository::new();
        repo.subscribe(&LocationId::from("loc1"), &DocumentName("n".into())).await.unwrap();
        assert_eq!(repo.subscription_count().await, 1);
    }

    #[tokio::test]
    async fn published_self_document_is_fetchable_from_self_location() {
        let repo = InMemoryRepository::new();
        let name = DocumentName("thread/b1/host/h1".into());
        repo.publish(&name, b"hi".to_vec(), Permissions::default()).await.unwrap();
        let publication = repo.fetch(&LocationId::from("self"), &name).await.unwrap();
        assert_eq!(publication.body, b"hi");
    }
}

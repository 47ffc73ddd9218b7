//! The publication repository is an external collaborator (SPEC_FULL.md
//! §1): a best-effort publish/subscribe store reachable through each
//! peer's locations. This module only defines the narrow trait interface
//! the engine consumes; a concrete implementation (DHT, relay, whatever)
//! lives outside this crate. `testutil` provides an in-memory double for
//! the scenario tests.

use crate::ids::{LocationId, PeerUri};
use async_trait::async_trait;
use std::fmt;

/// A raw published blob plus the metadata the engine needs to route and
/// order it. The body is opaque CBOR from the repository's point of view;
/// only `ThreadDocument` interprets it.
#[derive(Debug, Clone)]
pub struct Publication {
    pub name: DocumentName,
    pub body: Vec<u8>,
}

/// Parsed and unparsed document name. Keeping both avoids re-serialising
/// the name on every republish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentName(pub String);

impl fmt::Display for DocumentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lightweight "something changed" notice delivered out-of-band by the
/// repository's subscription mechanism; the engine must still fetch the
/// body itself via [`PublicationRepository::fetch`].
#[derive(Debug, Clone)]
pub struct PublicationMeta {
    pub location: LocationId,
    pub name: DocumentName,
}

/// Permission set published alongside a host document: the current
/// `contacts.contacts` peer-uris, as readers (SPEC_FULL.md §6).
#[derive(Debug, Clone, Default)]
pub struct Permissions {
    pub readers: Vec<PeerUri>,
}

#[async_trait]
pub trait PublicationRepository: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch the current body of `name` as last published by `location`.
    async fn fetch(
        &self,
        location: &LocationId,
        name: &DocumentName,
    ) -> Result<Publication, Self::Error>;

    /// Publish (or replace) a document under the local identity, granting
    /// read access per `permissions`.
    async fn publish(
        &self,
        name: &DocumentName,
        body: Vec<u8>,
        permissions: Permissions,
    ) -> Result<(), Self::Error>;

    /// Subscribe to change notifications for documents published by
    /// `location` under `name`. Notifications arrive out-of-band; the
    /// caller is expected to register a callback/channel via whatever
    /// mechanism the concrete repository uses and is not modeled further
    /// here (kept out of this trait so the engine's `DocumentFetcher` can
    /// be driven directly in tests without a real subscription transport).
    async fn subscribe(
        &self,
        location: &LocationId,
        name: &DocumentName,
    ) -> Result<(), Self::Error>;
}

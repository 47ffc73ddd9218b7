//! The `messages` section: an append-only, ordered sequence.
//!
//! Large bodies are cached out to disk after a timer (SPEC_FULL.md §4.1,
//! §9 redesign): rather than a side-channel weak reference that gets
//! silently restored, the body's storage state is an explicit enum that
//! only ever transitions back to `InMemory` under the owning
//! `ThreadDocument`'s lock.

use crate::ids::{MessageId, PeerUri, Version};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

/// Where a message cache handle points. The engine never interprets the
/// handle itself; a host application supplies the actual disk I/O through
/// [`MessageCache`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CacheHandle(pub String);

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Body {
    InMemory(Vec<u8>),
    OnDisk(CacheHandle),
}

impl Body {
    pub fn len_hint(&self, cache: &dyn MessageCache) -> usize {
        match self {
            Body::InMemory(b) => b.len(),
            Body::OnDisk(h) => cache.size_hint(h).unwrap_or(0),
        }
    }
}

/// Host-supplied on-disk cache for message bodies evicted from memory.
pub trait MessageCache: Send + Sync {
    fn store(&self, id: &MessageId, bytes: &[u8]) -> CacheHandle;
    fn load(&self, handle: &CacheHandle) -> Option<Vec<u8>>;
    fn size_hint(&self, handle: &CacheHandle) -> Option<usize>;
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub replaces_id: Option<MessageId>,
    pub from_peer_uri: PeerUri,
    pub mime_type: String,
    pub body: Body,
    pub sent_time: u64,
    pub signature: Option<Vec<u8>>,
    /// `false` if the signature failed or could not be checked; such a
    /// message is delivered for display only, never counted for receipts
    /// or replaces-chaining (SPEC_FULL.md §4.1 failure semantics).
    pub validated: bool,
}

impl Message {
    /// Canonical bytes signed over: `(message-id, from-peer-uri, mime-type,
    /// body, sent-time)`, CBOR-encoded. Cache-out never changes these bytes
    /// because the signature is computed before a body is ever evicted.
    pub fn signable_bytes(
        message_id: &MessageId,
        from: &PeerUri,
        mime_type: &str,
        body_bytes: &[u8],
        sent_time: u64,
    ) -> Vec<u8> {
        #[derive(serde::Serialize)]
        struct Signable<'a> {
            message_id: &'a str,
            from: &'a str,
            mime_type: &'a str,
            body: &'a [u8],
            sent_time: u64,
        }
        let signable = Signable {
            message_id: &message_id.0,
            from: &from.0,
            mime_type,
            body: body_bytes,
            sent_time,
        };
        let mut buf = Vec::new();
        ciborium::into_writer(&signable, &mut buf).expect("signable encodes");
        buf
    }

    /// Verify `signature` against `key`, given the in-memory body bytes.
    /// Returns `false` (never an error) on any failure — a bad signature
    /// demotes the message to unvalidated, it does not reject the whole
    /// publication (SPEC_FULL.md §4.1).
    pub fn verify(&self, key: &VerifyingKey, body_bytes: &[u8]) -> bool {
        let Some(sig_bytes) = &self.signature else {
            return false;
        };
        let Ok(sig_array): Result<[u8; 64], _> = sig_bytes.as_slice().try_into() else {
            return false;
        };
        let signature = Signature::from_bytes(&sig_array);
        let signable = Self::signable_bytes(
            &self.message_id,
            &self.from_peer_uri,
            &self.mime_type,
            body_bytes,
            self.sent_time,
        );
        key.verify(&signable, &signature).is_ok()
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct MessagesSection {
    /// Append-only; diffs never rewrite or reorder prior entries.
    pub messages: Vec<Message>,
    pub version: Version,
}

impl MessagesSection {
    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|m| &m.message_id == id)
    }

    pub fn position_of(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.message_id == id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.message_id == id)
    }

    /// Append-only union with a remote version: messages already present
    /// (by id) are skipped; new ones are appended in the order given.
    pub fn merge_append(&mut self, incoming: Vec<Message>) -> Vec<MessageId> {
        let mut added = Vec::new();
        for m in incoming {
            if !self.contains(&m.message_id) {
                added.push(m.message_id.clone());
                self.messages.push(m);
            }
        }
        added
    }
}

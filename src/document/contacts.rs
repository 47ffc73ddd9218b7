//! The `contacts` section: three disjoint groups — current `contacts`,
//! pending `add`, pending `remove`.

use crate::ids::{PeerUri, Version};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Contact {
    pub peer_uri: PeerUri,
    /// Hex-encoded identity-contacts blob (peer-files-public), learned via
    /// the contact-profile sub-publication (SPEC_FULL.md §3 invariant 6).
    pub identity_contacts: Option<String>,
    pub status_time: u64,
    pub status_hash: Option<String>,
    pub status_element: Option<String>,
}

impl Contact {
    pub fn new(peer_uri: PeerUri) -> Self {
        Self {
            peer_uri,
            identity_contacts: None,
            status_time: 0,
            status_hash: None,
            status_element: None,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ContactsSection {
    pub contacts: BTreeMap<PeerUri, Contact>,
    pub add: BTreeSet<PeerUri>,
    pub remove: BTreeSet<PeerUri>,
    pub version: Version,
}

impl ContactsSection {
    /// Sorted peer-uri list of current contacts, used for the
    /// contacts-changed CRC (SPEC_FULL.md §4.3).
    pub fn sorted_peer_uris(&self) -> Vec<&PeerUri> {
        self.contacts.keys().collect()
    }

    pub fn contains(&self, peer: &PeerUri) -> bool {
        self.contacts.contains_key(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_peer_uris_is_sorted_by_btreemap() {
        let mut s = ContactsSection::default();
        s.contacts.insert(PeerUri::from("z"), Contact::new(PeerUri::from("z")));
        s.contacts.insert(PeerUri::from("a"), Contact::new(PeerUri::from("a")));
        let uris: Vec<String> = s.sorted_peer_uris().into_iter().map(|p| p.0.clone()).collect();
        assert_eq!(uris, vec!["a".to_string(), "z".to_string()]);
    }
}

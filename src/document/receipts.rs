//! The `receipts/delivered` and `receipts/read` sections: `message-id →
//! time` maps, each independently versioned. Replace-by-diff: a receipt
//! map carries full membership at the new version; the change set is the
//! symmetric difference against the previously held map.

use crate::ids::{MessageId, Version};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum DeliveryState {
    Discovering,
    Delivered,
    Read,
    /// Terminal; authored only by the local sender, never by a remote
    /// receipt.
    UserNotAvailable,
}

impl DeliveryState {
    /// `true` if moving from `self` to `next` is a legal forward (or
    /// no-op) transition under SPEC_FULL.md §3 invariant 4.
    pub fn can_advance_to(&self, next: &DeliveryState) -> bool {
        use DeliveryState::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Discovering, Delivered) | (Discovering, Read) | (Discovering, UserNotAvailable) => {
                true
            }
            (Delivered, Read) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ReceiptsSection {
    pub receipts: BTreeMap<MessageId, u64>,
    pub version: Version,
}

impl ReceiptsSection {
    pub fn contains(&self, id: &MessageId) -> bool {
        self.receipts.contains_key(id)
    }

    /// Replace the full map, returning the ids whose membership changed
    /// (added or updated time) — the symmetric difference used to drive
    /// `changed_*` accessors.
    pub fn replace(&mut self, new_map: BTreeMap<MessageId, u64>) -> Vec<MessageId> {
        let mut changed = Vec::new();
        for (id, time) in &new_map {
            if self.receipts.get(id) != Some(time) {
                changed.push(id.clone());
            }
        }
        for id in self.receipts.keys() {
            if !new_map.contains_key(id) {
                changed.push(id.clone());
            }
        }
        self.receipts = new_map;
        changed
    }

    pub fn mark(&mut self, id: MessageId, time: u64) -> bool {
        self.receipts.insert(id, time).is_none()
    }
}

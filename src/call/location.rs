//! One candidate remote location for a placed call (SPEC_FULL.md §4.7):
//! the caller tracks one `CallLocation` per observed candidate callee
//! location until exactly one reaches `Ready` and is picked; the callee
//! tracks a single entry for its own location.
//!
//! Grounded on `onion.rs`'s per-hop state struct, applied here to "one
//! ICE candidate race per call" instead of "one circuit hop".

use crate::ids::{DialogId, LocationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallLocationState {
    Pending,
    Early,
    Ringing,
    Ready,
    Closed,
}

#[derive(Debug, Clone)]
pub struct CallLocation {
    pub location_id: LocationId,
    pub dialog_id: Option<DialogId>,
    pub state: CallLocationState,
}

impl CallLocation {
    pub fn new(location_id: LocationId) -> Self {
        Self {
            location_id,
            dialog_id: None,
            state: CallLocationState::Pending,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == CallLocationState::Ready
    }

    /// Whether this candidate is advanced enough to be picked (SPEC_FULL.md
    /// §4.7: picking triggers "on observing the first remote dialog whose
    /// ... state reaches `Early` or better", not only full `Ready`).
    pub fn is_pickable(&self) -> bool {
        matches!(
            self.state,
            CallLocationState::Early | CallLocationState::Ringing | CallLocationState::Ready
        )
    }

    /// Mirrors the dialog-state progression onto this candidate's ICE
    /// readiness; a closed candidate never reopens.
    pub fn set_state(&mut self, state: CallLocationState) {
        if self.state == CallLocationState::Closed {
            return;
        }
        self.state = state;
    }

    pub fn close(&mut self) {
        self.state = CallLocationState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_candidate_never_reopens() {
        let mut loc = CallLocation::new(LocationId::from("loc1"));
        loc.close();
        loc.set_state(CallLocationState::Ready);
        assert_eq!(loc.state, CallLocationState::Closed);
    }

    #[test]
    fn becomes_ready_reports_is_ready() {
        let mut loc = CallLocation::new(LocationId::from("loc1"));
        assert!(!loc.is_ready());
        loc.set_state(CallLocationState::Ready);
        assert!(loc.is_ready());
    }
}

//! Voice/video call signalling (SPEC_FULL.md §4.7): a `Call` tracks one
//! dialog exchange end-to-end, racing candidate locations on the caller
//! side and presenting a single picked remote location once ready.

pub mod closed_reason;
pub mod location;
pub mod state;

pub use closed_reason::describe as describe_closed_reason;
pub use location::{CallLocation, CallLocationState};
pub use state::{Call, CallState};

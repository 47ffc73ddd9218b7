//! The conversation-thread engine (SPEC_FULL.md §1): a replicated,
//! document-based state machine letting peers share a conversation
//! (participants, messages, delivery/read receipts, live call dialogs)
//! over a best-effort publish/subscribe publication repository, with no
//! central server.
//!
//! See `SPEC_FULL.md` for the full module map; `DESIGN.md` for the
//! grounding ledger behind each one.

pub mod arena;
pub mod call;
pub mod call_transport;
pub mod config;
pub mod conversation_thread;
pub mod delegate;
pub mod document;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod host_role;
pub mod ids;
pub mod peer_contact;
pub mod peer_location;
pub mod repository;
pub mod runtime;
pub mod slave_role;

#[cfg(test)]
pub mod testutil;

#[cfg(test)]
mod scenarios;

pub use call::{Call, CallLocation, CallLocationState, CallState};
pub use call_transport::{CallTransport, TransportState};
pub use config::EngineConfig;
pub use conversation_thread::{CallReplaced, ConversationStepOutcome, ConversationThread, PendingCall, ThreadRole};
pub use delegate::{BackgroundingNotifier, CallDelegate, ConversationThreadDelegate, PushNotifier};
pub use engine::ConversationThreadSet;
pub use error::{CallError, DocumentError, FetchError, NameError, ThreadError, TransportError};
pub use ids::{BaseThreadId, CallId, DialogId, HostThreadId, LocationId, MessageId, PeerUri, Version};
pub use repository::{DocumentName, Permissions, Publication, PublicationMeta, PublicationRepository};

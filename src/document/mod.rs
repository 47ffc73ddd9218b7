//! The thread document model (SPEC_FULL.md §3, §4.1): sections, naming,
//! and the `ThreadDocument` load/update/diff engine.

pub mod contacts;
pub mod details;
pub mod dialogs;
pub mod messages;
pub mod name;
pub mod receipts;
pub mod thread_document;

pub use contacts::{Contact, ContactsSection};
pub use details::{Details, ThreadState};
pub use dialogs::{ClosedReason, Description, Dialog, DialogState, DialogsSection, MediaType};
pub use messages::{Body, CacheHandle, Message, MessageCache, MessagesSection};
pub use receipts::{DeliveryState, ReceiptsSection};
pub use thread_document::{ChangeSet, ThreadDocument};

//! One `thiserror` enum per component, mirroring the one-enum-per-module
//! convention of the crate this engine grew out of (`auth.rs`, `blobs.rs`,
//! `store.rs` each define their own error type rather than sharing one).

use crate::ids::{BaseThreadId, DialogId, MessageId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document missing required section: {0}")]
    MissingSection(&'static str),
    #[error("document version did not increase for section {section} ({held} >= {incoming})")]
    StaleVersion {
        section: &'static str,
        held: u64,
        incoming: u64,
    },
    #[error("malformed document: {0}")]
    Malformed(String),
    #[error("cbor encode error: {0}")]
    CborEncode(String),
    #[error("cbor decode error: {0}")]
    CborDecode(String),
}

#[derive(Debug, Error)]
pub enum NameError {
    #[error("document name `{0}` has too few path segments")]
    TooShort(String),
    #[error("document name `{0}` has unknown thread-type segment `{1}`")]
    UnknownThreadType(String, String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("repository error: {0}")]
    Repository(String),
    #[error("fetch cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ThreadError {
    #[error("document error: {0}")]
    Document(#[from] DocumentError),
    #[error("cannot change contacts on thread {0}: not safe (dialogs in flight, pending sends, or not open)")]
    UnsafeContactChange(BaseThreadId),
    #[error("no open host document for thread {0}")]
    NoOpenHost(BaseThreadId),
    #[error("unknown message id {0}")]
    UnknownMessage(MessageId),
    #[error("repository error: {0}")]
    Repository(String),
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("illegal call state transition from {from:?} to {to:?}")]
    IllegalTransition { from: String, to: String },
    #[error("no picked location for dialog {0}")]
    NoPickedLocation(DialogId),
    #[error("call transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("media engine error: {0}")]
    Media(String),
    #[error("ice session error: {0}")]
    Ice(String),
}

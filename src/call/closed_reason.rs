//! Single boundary function mapping `ClosedReason` to a user-presentable
//! string (SPEC_FULL.md §9 open question: "the mapping from closed-reason
//! codes to user-presentable strings lives at a single boundary
//! function"). Application delegates receive the typed `ClosedReason` and
//! may call this for display; nothing else in the crate stringifies it.

use crate::document::ClosedReason;

pub fn describe(reason: ClosedReason) -> &'static str {
    match reason {
        ClosedReason::None => "ended",
        ClosedReason::User => "ended by user",
        ClosedReason::RequestTimeout => "no answer",
        ClosedReason::TemporarilyUnavailable => "temporarily unavailable",
        ClosedReason::Busy => "busy",
        ClosedReason::RequestTerminated => "call cancelled",
        ClosedReason::NotAcceptableHere => "not acceptable",
        ClosedReason::ServerInternalError => "server error",
        ClosedReason::Decline => "declined",
        ClosedReason::Replaced => "replaced by a newer call",
    }
}

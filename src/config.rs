//! Every timer and tunable named in the spec, collected into one
//! `EngineConfig` with documented defaults. Constructed explicitly and
//! threaded through the engine rather than read from a global singleton —
//! unlike the lineage crate's `OnceLock<DeltaCore>`, this crate has no FFI
//! boundary forcing process-wide state.

use std::time::Duration;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long an idle ICE audio/video socket pair is kept alive after the
    /// last call using it ends, before the call transport releases it.
    pub unused_socket_idle_window: Duration,

    /// Delay after which a message body exceeding
    /// [`Self::message_cache_threshold_bytes`] is evicted to the on-disk
    /// cache and replaced in memory with a `CacheHandle`.
    pub move_message_to_cache_delay: Duration,

    /// Message bodies at or above this size are eligible for cache-out.
    pub message_cache_threshold_bytes: usize,

    /// Maximum time to wait for a delivery receipt before marking a message
    /// `UserNotAvailable` and raising a push-notification request.
    pub max_wait_before_push: Duration,

    /// Window during which a peer contact keeps an identity-lookup
    /// ("auto-find") active even with zero known locations.
    pub peer_contact_auto_find_window: Duration,

    /// Period of the no-op re-step timer that keeps an in-progress call
    /// noticing missing remote updates.
    pub call_peer_alive_period: Duration,

    /// Ordinal at which a role registers with the backgrounding notifier;
    /// roles with a lower ordinal release the notifier first.
    pub backgrounding_phase_ordinal: u32,

    /// Initial delay before the first retry of a failed republish.
    pub republish_retry_initial_delay: Duration,
    /// Multiplier applied to the retry delay after each failed attempt.
    pub republish_retry_multiplier: f64,
    /// Upper bound on the republish retry delay.
    pub republish_retry_cap: Duration,

    /// Hard upper bound on how long `Call::hangup` waits for the remote
    /// side to acknowledge `Closed` before forcing local closure anyway.
    pub call_hangup_hard_bound: Duration,

    /// How long a second `notify_publication_updated` for the same
    /// `(location, name)` may coalesce into an in-flight fetch before the
    /// fetcher queues a follow-up fetch instead of dropping it.
    pub fetch_coalesce_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unused_socket_idle_window: Duration::from_secs(90),
            move_message_to_cache_delay: Duration::from_secs(300),
            message_cache_threshold_bytes: 64 * 1024,
            max_wait_before_push: Duration::from_secs(30),
            peer_contact_auto_find_window: Duration::from_secs(120),
            call_peer_alive_period: Duration::from_secs(20),
            backgrounding_phase_ordinal: 0,
            republish_retry_initial_delay: Duration::from_millis(500),
            republish_retry_multiplier: 2.0,
            republish_retry_cap: Duration::from_secs(30),
            call_hangup_hard_bound: Duration::from_secs(10),
            fetch_coalesce_window: Duration::from_millis(200),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_documented_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.unused_socket_idle_window, Duration::from_secs(90));
        assert!(cfg.republish_retry_multiplier > 1.0);
    }
}

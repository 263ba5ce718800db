//! WebSocket close codes used by the coordinator.
//!
//! Codes below 4000 come from RFC 6455; the 4xxx range is application-defined.

/// Normal closure.
pub const NORMAL: u16 = 1000;
/// The coordinator is shutting down.
pub const GOING_AWAY: u16 = 1001;
/// The transport dropped without a close frame. Never sent on the wire.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// The handshake or a frame violated protocol policy.
pub const POLICY_VIOLATION: u16 = 1008;
/// Admission refused: the coordinator is at capacity. Retry later.
pub const TRY_AGAIN_LATER: u16 = 1013;
/// Evicted after the heartbeat timeout elapsed without a heartbeat.
pub const STALE_CONNECTION: u16 = 4000;
/// Closed by an operator through `disconnect_agent`.
pub const FORCED_DISCONNECT: u16 = 4001;

/// Human-readable label for a close code, for logs.
pub fn describe(code: u16) -> &'static str {
    match code {
        NORMAL => "normal",
        GOING_AWAY => "coordinator shutdown",
        ABNORMAL_CLOSURE => "abnormal closure",
        POLICY_VIOLATION => "policy violation",
        TRY_AGAIN_LATER => "overloaded",
        STALE_CONNECTION => "heartbeat timeout",
        FORCED_DISCONNECT => "forced disconnect",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_and_shutdown_codes_differ() {
        assert_ne!(STALE_CONNECTION, GOING_AWAY);
        assert_ne!(STALE_CONNECTION, NORMAL);
        assert_ne!(TRY_AGAIN_LATER, GOING_AWAY);
    }

    #[test]
    fn overloaded_matches_rfc_6455() {
        assert_eq!(TRY_AGAIN_LATER, 1013);
    }

    #[test]
    fn describe_known_and_unknown() {
        assert_eq!(describe(TRY_AGAIN_LATER), "overloaded");
        assert_eq!(describe(STALE_CONNECTION), "heartbeat timeout");
        assert_eq!(describe(3999), "unknown");
    }
}

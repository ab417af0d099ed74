//! WebSocket close codes used by the bridge.
//!
//! Codes in the 4000 range are application-defined and let the remote tell
//! handshake failures apart from ordinary disconnects.

/// Normal closure.
pub const NORMAL: u16 = 1000;

/// Bridge is shutting down.
pub const GOING_AWAY: u16 = 1001;

/// Close frame arrived without a status code.
pub const NO_STATUS: u16 = 1005;

/// Transport dropped without a close frame.
pub const ABNORMAL: u16 = 1006;

/// No `bridge_ack` within the handshake window.
pub const HANDSHAKE_TIMEOUT: u16 = 4002;

/// First frame was not valid JSON.
pub const INVALID_PAYLOAD: u16 = 4003;

/// First frame was not the expected handshake type.
pub const INVALID_HANDSHAKE: u16 = 4004;

/// Capability token mismatch.
pub const INVALID_TOKEN: u16 = 4005;

/// Connection evicted because a newer one took its slot.
pub const SUPERSEDED: u16 = 4006;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_codes_are_distinct() {
        let codes = [
            HANDSHAKE_TIMEOUT,
            INVALID_PAYLOAD,
            INVALID_HANDSHAKE,
            INVALID_TOKEN,
            SUPERSEDED,
        ];
        for (i, a) in codes.iter().enumerate() {
            assert!((4000..5000).contains(a));
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}

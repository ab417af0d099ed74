//! Bridge state and status snapshot.

// ============================================================================
// Imports
// ============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::bridge::tracker::PendingRequestDetail;
use crate::transport::ConnectionInfo;

// ============================================================================
// BridgeState
// ============================================================================

/// Lifecycle state of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    /// Disabled by configuration; never connects.
    Disabled,
    /// Enabled, no connection attempted yet.
    Idle,
    /// Dialling the remote listener.
    Connecting,
    /// Socket open, waiting for `bridge_ack`.
    HandshakeInFlight,
    /// A primary connection is ready for requests.
    Ready,
    /// The last connection closed or the last attempt failed.
    Disconnected,
    /// Stopped; terminal.
    Stopped,
}

impl BridgeState {
    /// Returns `true` for [`BridgeState::Stopped`].
    #[inline]
    #[must_use]
    pub fn is_stopped(self) -> bool {
        self == Self::Stopped
    }
}

// ============================================================================
// Diagnostic Records
// ============================================================================

/// Last handshake rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeFailureRecord {
    /// Kebab-case failure reason.
    pub reason: String,
    /// Port dialled.
    pub port: u16,
    /// When it happened.
    pub at: DateTime<Utc>,
}

/// Last connection close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectRecord {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason.
    pub reason: String,
    /// When it happened.
    pub at: DateTime<Utc>,
}

/// Last connect or send error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    /// Error message.
    pub message: String,
    /// When it happened.
    pub at: DateTime<Utc>,
}

/// Mutable diagnostics behind the status snapshot.
#[derive(Debug, Clone, Default)]
pub(crate) struct Diagnostics {
    pub last_handshake_at: Option<DateTime<Utc>>,
    pub last_handshake_metadata: Option<Map<String, Value>>,
    pub last_handshake_failure: Option<HandshakeFailureRecord>,
    pub last_disconnect: Option<DisconnectRecord>,
    pub last_error: Option<ErrorRecord>,
    pub protocol_version: Option<u32>,
    pub capabilities: Vec<String>,
    pub supported_opcodes: Vec<String>,
    pub expected_response_opcodes: Vec<String>,
}

// ============================================================================
// BridgeStatus
// ============================================================================

/// Point-in-time snapshot of the bridge.
///
/// Serializes to camelCase JSON for status tools.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub enabled: bool,
    pub state: BridgeState,
    pub connected: bool,
    pub host: String,
    pub port: u16,
    pub configured_ports: Vec<u16>,
    pub supported_protocols: Vec<String>,
    pub capability_token_required: bool,

    /// Primary connection, if any.
    pub primary: Option<ConnectionInfo>,
    pub active_port: Option<u16>,
    pub negotiated_protocol: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub connections: Vec<ConnectionInfo>,
    pub connect_attempts: u64,

    pub protocol_version: Option<u32>,
    pub capabilities: Vec<String>,
    pub supported_opcodes: Vec<String>,
    pub expected_response_opcodes: Vec<String>,
    pub last_handshake_at: Option<DateTime<Utc>>,
    pub last_handshake_metadata: Option<Map<String, Value>>,
    pub last_handshake_failure: Option<HandshakeFailureRecord>,
    pub last_disconnect: Option<DisconnectRecord>,
    pub last_error: Option<ErrorRecord>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_request_sent_at: Option<DateTime<Utc>>,

    pub pending_requests: usize,
    pub pending_request_details: Vec<PendingRequestDetail>,
    pub queued_requests: usize,
    pub coalesced_requests: usize,
    pub max_pending_requests: usize,
    pub max_concurrent_connections: usize,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_active: bool,

    /// Bridge session ID.
    pub session_id: String,
    pub client_name: String,
    pub client_version: String,
}

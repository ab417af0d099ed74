//! Bridge lifecycle events.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::identifiers::ConnectionId;

/// Lifecycle notification delivered through [`AutomationBridge::subscribe`](crate::AutomationBridge::subscribe).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum BridgeEvent {
    /// A connection completed its handshake.
    #[serde(rename_all = "camelCase")]
    Connected {
        connection_id: ConnectionId,
        port: u16,
        protocol: Option<String>,
        /// Sanitized handshake metadata.
        metadata: Map<String, Value>,
    },

    /// A registered connection closed.
    #[serde(rename_all = "camelCase")]
    Disconnected {
        connection_id: ConnectionId,
        port: u16,
        protocol: Option<String>,
        code: u16,
        reason: String,
    },

    /// A connect attempt or send failed.
    #[serde(rename_all = "camelCase")]
    Error { port: Option<u16>, message: String },

    /// A handshake was rejected.
    #[serde(rename_all = "camelCase")]
    HandshakeFailed { port: u16, reason: String },
}

impl BridgeEvent {
    /// Returns the event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Error { .. } => "error",
            Self::HandshakeFailed { .. } => "handshakeFailed",
        }
    }
}

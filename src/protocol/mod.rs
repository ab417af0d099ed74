//! WebSocket protocol message types.
//!
//! This module defines the frames exchanged between the bridge and the
//! remote automation listener.
//!
//! # Protocol Overview
//!
//! | Frame | Direction | Purpose |
//! |-------|-----------|---------|
//! | `bridge_hello` | Bridge → Remote | Handshake opener |
//! | `bridge_ack` | Remote → Bridge | Handshake acceptance |
//! | `bridge_error` | Either | Handshake rejection |
//! | `automation_request` | Bridge → Remote | Action request |
//! | `automation_response` | Remote → Bridge | Action result |
//! | `automation_event` | Remote → Bridge | Deferred completion |
//! | `progress_update` | Remote → Bridge | Request keep-alive |
//! | `bridge_heartbeat` / `bridge_ping` / `bridge_pong` | Either | Liveness |
//! | `bridge_shutdown` / `bridge_goodbye` | Either | Shutdown notice |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Frame sum type and payloads |
//! | `close_code` | WebSocket close codes |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket close codes.
pub mod close_code;

/// Frame sum type and payloads.
pub mod frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{
    AutomationEvent, AutomationRequest, AutomationResponse, BridgeAck, BridgeError, BridgeHello,
    DEFAULT_PROTOCOL_VERSION, Farewell, Frame, INVALID_CAPABILITY_TOKEN, Liveness, ProgressUpdate,
    timestamp_now,
};

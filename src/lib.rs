//! Automation Bridge - persistent WebSocket link to an editor automation listener.
//!
//! This library dials a remote automation listener (typically an editor
//! plugin), authenticates with a handshake, and multiplexes correlated
//! request/response exchanges over one primary connection.
//!
//! # Architecture
//!
//! The bridge follows a client model:
//!
//! - **Local End (Rust)**: Sends `automation_request` frames, awaits responses
//! - **Remote End (Listener)**: Executes actions, replies with `automation_response`
//!
//! Key design principles:
//!
//! - One [`AutomationBridge`] owns the connection registry, request tracker and queue
//! - Every request settles exactly once: response, timeout, disconnect or stop
//! - Identical read-only requests in flight share one round trip
//! - A bounded pending window with FIFO queueing behind it
//!
//! # Quick Start
//!
//! ```no_run
//! use automation_bridge::{AutomationBridge, BridgeConfig, RequestOptions, Result};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let bridge = AutomationBridge::new(BridgeConfig::builder().port(8091).build()?);
//!     bridge.start();
//!
//!     let response = bridge
//!         .send_automation_request("get_actor", json!({"name": "Cube"}), RequestOptions::default())
//!         .await?;
//!     println!("{}", response.into_result()?);
//!
//!     bridge.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bridge`] | [`AutomationBridge`] facade, request tracking, status |
//! | [`config`] | [`BridgeConfig`] and environment loading |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire frames and close codes |
//! | [`transport`] | WebSocket connections, handshake, registry |

// ============================================================================
// Modules
// ============================================================================

/// Bridge facade, request tracking and status.
///
/// - [`AutomationBridge`] - Entry point
/// - [`bridge::RequestTracker`] - Pending requests and coalescing
pub mod bridge;

/// Bridge configuration.
///
/// Use [`BridgeConfig::builder()`] or [`BridgeConfig::from_env()`].
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Wire frames exchanged with the remote listener.
pub mod protocol;

/// WebSocket transport layer.
///
/// Connections, handshake and the connection registry.
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

// ============================================================================
// Re-exports
// ============================================================================

// Bridge types
pub use bridge::{
    AutomationBridge, BridgeEvent, BridgeState, BridgeStatus, PendingRequestDetail, RequestOptions,
};

// Config types
pub use config::{BridgeConfig, BridgeConfigBuilder};

// Error types
pub use error::{Error, HandshakeFailure, Result};

// Identifier types
pub use identifiers::{ConnectionId, RequestId};

// Protocol types
pub use protocol::{AutomationResponse, Frame};

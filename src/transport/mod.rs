//! WebSocket transport layer.
//!
//! This module handles the socket side of the bridge: dialling the remote
//! listener, the handshake, per-connection event loops and the connection
//! registry.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                        ┌──────────────────────┐
//! │  AutomationBridge    │                        │  Editor plugin       │
//! │                      │       WebSocket        │                      │
//! │  ConnectionManager   │───────────────────────►│  Automation          │
//! │  → Connection        │   ws://host:PORT       │  listener            │
//! └──────────────────────┘                        └──────────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. Dial the configured URL, offering the configured sub-protocols
//! 2. `HandshakeHandler::initiate_handshake` - `bridge_hello` / `bridge_ack`
//! 3. `ConnectionManager::register_socket` - becomes primary if none exists
//! 4. `ConnectionLoop::spawn` - frames flow until either side closes
//! 5. `ConnectionObserver::on_close` - the bridge cleans up
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | WebSocket connection and event loop |
//! | `handshake` | `bridge_hello` / `bridge_ack` exchange |
//! | `manager` | Connection registry and heartbeat |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection and event loop.
pub mod connection;

/// Bridge handshake.
pub mod handshake;

/// Connection registry and heartbeat.
pub mod manager;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{CloseInfo, Connection, ConnectionLoop, ConnectionObserver, WsStream};
pub use handshake::{HandshakeHandler, HandshakeResult};
pub use manager::{ConnectionInfo, ConnectionManager, SocketMetadata};

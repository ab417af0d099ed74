//! Bridge facade and request handling.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | [`AutomationBridge`] facade |
//! | `tracker` | Pending requests, deadlines and coalescing |
//! | `handler` | Inbound frame dispatch |
//! | `events` | Lifecycle events |
//! | `status` | State enum and status snapshot |

// ============================================================================
// Submodules
// ============================================================================

/// Automation bridge facade.
pub mod core;

/// Lifecycle events.
pub mod events;

/// Inbound frame dispatch.
pub mod handler;

/// State enum and status snapshot.
pub mod status;

/// Pending requests, deadlines and coalescing.
pub mod tracker;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::{AutomationBridge, RequestOptions};
pub use events::BridgeEvent;
pub use handler::MessageHandler;
pub use status::{BridgeState, BridgeStatus, DisconnectRecord, ErrorRecord, HandshakeFailureRecord};
pub use tracker::{PendingRequestDetail, RequestTicket, RequestTracker};

//! Error types for the automation bridge.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use automation_bridge::{AutomationBridge, RequestOptions, Result};
//!
//! async fn example(bridge: &AutomationBridge) -> Result<()> {
//!     let response = bridge
//!         .send_automation_request("list_assets", json!({ "dir": "/Game" }), RequestOptions::default())
//!         .await?;
//!     let assets = response.into_result()?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::Disabled`], [`Error::Stopped`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Handshake | [`Error::Handshake`] |
//! | Request | [`Error::RequestTimeout`], [`Error::SendFailed`], [`Error::Remote`] |
//! | Protocol | [`Error::Protocol`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::ChannelClosed`] |
//!
//! [`Error`] is `Clone`: a coalesced request hands the same outcome to every
//! caller sharing it, so external sources are held behind [`Arc`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::Error as IoError;
use std::result::Result as StdResult;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// HandshakeFailure
// ============================================================================

/// Reason a connection handshake was rejected.
///
/// The string form (`as_str`) is what the bridge records as its last
/// handshake failure reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeFailure {
    /// No acknowledgement arrived within the handshake window.
    Timeout,
    /// First frame was not parseable JSON.
    InvalidJson,
    /// First frame was valid JSON but not a `bridge_ack`.
    InvalidHandshake,
    /// Capability token did not match.
    InvalidToken,
    /// Transport closed before the handshake completed.
    Closed,
}

impl HandshakeFailure {
    /// Returns the stable kebab-case reason string.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::InvalidJson => "invalid-json",
            Self::InvalidHandshake => "invalid-handshake",
            Self::InvalidToken => "invalid-token",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for HandshakeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when bridge configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Bridge disabled by configuration.
    #[error("Automation bridge disabled")]
    Disabled,

    /// Bridge was stopped; it does not accept further requests.
    #[error("Automation bridge server stopped")]
    Stopped,

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport could not be established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection attempt exceeded its time budget.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Connection lost while the operation was in flight.
    #[error("Connection closed: {reason}")]
    ConnectionClosed {
        /// Close reason reported by the transport.
        reason: String,
    },

    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// Handshake rejected; the transport has been closed.
    #[error("Handshake failed: {reason}")]
    Handshake {
        /// Why the handshake failed.
        reason: HandshakeFailure,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// No response within the request's timeout window.
    #[error("Request {request_id} ({action}) timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Action name of the request.
        action: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Transport write failed.
    #[error("Failed to send request: {message}")]
    SendFailed {
        /// Description of the send failure.
        message: String,
    },

    /// Remote reported the action as failed.
    #[error("Remote error ({code}): {message}")]
    Remote {
        /// Error code reported by the remote.
        code: String,
        /// Human-readable message.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected frame.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[source] Arc<IoError>),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[source] Arc<serde_json::Error>),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[source] Arc<WsError>),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Conversions
// ============================================================================

impl From<IoError> for Error {
    #[inline]
    fn from(err: IoError) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    #[inline]
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

impl From<WsError> for Error {
    #[inline]
    fn from(err: WsError) -> Self {
        Self::WebSocket(Arc::new(err))
    }
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a connection closed error.
    #[inline]
    pub fn connection_closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Creates a handshake error.
    #[inline]
    pub fn handshake(reason: HandshakeFailure) -> Self {
        Self::Handshake { reason }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, action: impl Into<String>, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            action: action.into(),
            timeout_ms,
        }
    }

    /// Creates a send failure error.
    #[inline]
    pub fn send_failed(message: impl Into<String>) -> Self {
        Self::SendFailed {
            message: message.into(),
        }
    }

    /// Creates a remote error.
    #[inline]
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::RequestTimeout { .. }
                | Self::Handshake {
                    reason: HandshakeFailure::Timeout
                }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed { .. }
                | Self::Handshake { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry; the next request after a lost
    /// connection triggers a fresh connection attempt.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed { .. }
                | Self::RequestTimeout { .. }
                | Self::SendFailed { .. }
        )
    }

    /// Returns the handshake failure reason, if this is a handshake error.
    #[inline]
    #[must_use]
    pub fn handshake_failure(&self) -> Option<HandshakeFailure> {
        match self {
            Self::Handshake { reason } => Some(*reason),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

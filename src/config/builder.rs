//! Builder pattern for bridge configuration.
//!
//! Provides a fluent API for configuring and creating [`BridgeConfig`] instances.
//!
//! # Example
//!
//! ```no_run
//! use automation_bridge::BridgeConfig;
//!
//! # fn example() -> automation_bridge::Result<()> {
//! let config = BridgeConfig::builder()
//!     .host("127.0.0.1")
//!     .port(8091)
//!     .max_pending_requests(10)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

use super::host;
use super::{
    BridgeConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_MAX_CONCURRENT_CONNECTIONS, DEFAULT_MAX_PENDING_REQUESTS, DEFAULT_MIN_REQUEST_TIMEOUT,
    DEFAULT_PORT, DEFAULT_PROTOCOL, DEFAULT_REQUEST_TIMEOUT,
};

// ============================================================================
// BridgeConfigBuilder
// ============================================================================

/// Builder for configuring a [`BridgeConfig`] instance.
///
/// Use [`BridgeConfig::builder()`] to create a new builder.
#[derive(Debug, Clone)]
pub struct BridgeConfigBuilder {
    /// Unsanitized host.
    host: Option<String>,
    /// Primary port.
    port: u16,
    /// Additional ports.
    extra_ports: Vec<u16>,
    /// Sub-protocols requested in addition to the default.
    protocols: Vec<String>,
    /// Capability token.
    capability_token: Option<String>,
    /// Enabled flag.
    enabled: bool,
    /// Accept non-loopback hosts.
    allow_non_loopback: bool,
    /// Client name.
    client_name: String,
    /// Client version.
    client_version: String,
    /// Heartbeat interval.
    heartbeat_interval: Duration,
    /// Pending-request window.
    max_pending_requests: usize,
    /// Concurrent connection cap.
    max_concurrent_connections: usize,
    /// Default request timeout.
    request_timeout: Duration,
    /// Minimum request timeout.
    min_request_timeout: Duration,
    /// Handshake window.
    handshake_timeout: Duration,
    /// Lazy-connect budget.
    connect_timeout: Duration,
}

impl Default for BridgeConfigBuilder {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            extra_ports: Vec::new(),
            protocols: Vec::new(),
            capability_token: None,
            enabled: true,
            allow_non_loopback: false,
            client_name: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            max_concurrent_connections: DEFAULT_MAX_CONCURRENT_CONNECTIONS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            min_request_timeout: DEFAULT_MIN_REQUEST_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

// ============================================================================
// BridgeConfigBuilder Implementation
// ============================================================================

impl BridgeConfigBuilder {
    /// Creates a new builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the remote host.
    #[inline]
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the remote port.
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Adds ports to the configured port list.
    #[must_use]
    pub fn extra_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.extra_ports.extend(ports);
        self
    }

    /// Adds a WebSocket sub-protocol to offer.
    #[inline]
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Sets the capability token.
    #[inline]
    #[must_use]
    pub fn capability_token(mut self, token: impl Into<String>) -> Self {
        self.capability_token = Some(token.into());
        self
    }

    /// Enables or disables the bridge.
    #[inline]
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Allows non-loopback remote hosts.
    #[inline]
    #[must_use]
    pub fn allow_non_loopback(mut self, allow: bool) -> Self {
        self.allow_non_loopback = allow;
        self
    }

    /// Sets the client name sent in `bridge_hello`.
    #[inline]
    #[must_use]
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// Sets the client version sent in `bridge_hello`.
    #[inline]
    #[must_use]
    pub fn client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = version.into();
        self
    }

    /// Sets the heartbeat interval. Zero disables heartbeats.
    #[inline]
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the pending-request window. Clamped to at least 1.
    #[inline]
    #[must_use]
    pub fn max_pending_requests(mut self, max: usize) -> Self {
        self.max_pending_requests = max;
        self
    }

    /// Sets the concurrent connection cap. Clamped to at least 1.
    #[inline]
    #[must_use]
    pub fn max_concurrent_connections(mut self, max: usize) -> Self {
        self.max_concurrent_connections = max;
        self
    }

    /// Sets the default per-request timeout.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the shortest per-request timeout honoured.
    #[inline]
    #[must_use]
    pub fn min_request_timeout(mut self, timeout: Duration) -> Self {
        self.min_request_timeout = timeout;
        self
    }

    /// Sets the handshake window.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the lazy-connect budget.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builds the configuration with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the port is 0
    /// - [`Error::Config`] if the handshake or connect timeout is zero
    pub fn build(self) -> Result<BridgeConfig> {
        if self.port == 0 {
            return Err(Error::config("port must be in 1..=65535"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(Error::config("handshake timeout must be non-zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::config("connect timeout must be non-zero"));
        }

        let host = host::sanitize_host(self.host.as_deref(), self.allow_non_loopback);
        let ports = host::sanitize_ports(self.port, &self.extra_ports);

        let mut protocols: Vec<String> = Vec::new();
        for protocol in self
            .protocols
            .into_iter()
            .chain(std::iter::once(DEFAULT_PROTOCOL.to_string()))
        {
            if !protocol.trim().is_empty() && !protocols.contains(&protocol) {
                protocols.push(protocol);
            }
        }

        Ok(BridgeConfig {
            host,
            port: self.port,
            ports,
            protocols,
            capability_token: self.capability_token.filter(|t| !t.is_empty()),
            enabled: self.enabled,
            allow_non_loopback: self.allow_non_loopback,
            client_name: self.client_name,
            client_version: self.client_version,
            heartbeat_interval: self.heartbeat_interval,
            max_pending_requests: self.max_pending_requests.max(1),
            max_concurrent_connections: self.max_concurrent_connections.max(1),
            request_timeout: self.request_timeout,
            min_request_timeout: self.min_request_timeout,
            handshake_timeout: self.handshake_timeout,
            connect_timeout: self.connect_timeout,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

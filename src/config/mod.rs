//! Bridge configuration.
//!
//! [`BridgeConfig`] holds every knob the bridge reads. Build one with
//! [`BridgeConfig::builder()`] or load it from the environment with
//! [`BridgeConfig::from_env()`].
//!
//! # Environment
//!
//! | Variable | Setting |
//! |----------|---------|
//! | `MCP_AUTOMATION_HOST` / `MCP_AUTOMATION_WS_HOST` | Remote host |
//! | `MCP_AUTOMATION_PORT` / `MCP_AUTOMATION_WS_PORT` | Remote port |
//! | `MCP_AUTOMATION_WS_PORTS` | Extra ports (comma list) |
//! | `MCP_AUTOMATION_WS_PROTOCOLS` | Extra sub-protocols (comma list) |
//! | `MCP_AUTOMATION_CAPABILITY_TOKEN` | Capability token |
//! | `MCP_AUTOMATION_BRIDGE_ENABLED` | `false` disables the bridge |
//! | `MCP_AUTOMATION_ALLOW_NON_LOOPBACK` | `true` allows non-loopback hosts |
//! | `MCP_AUTOMATION_HEARTBEAT_INTERVAL_MS` | Heartbeat interval, `0` disables |
//! | `MCP_AUTOMATION_MAX_PENDING_REQUESTS` | Pending-request window |
//! | `MCP_AUTOMATION_MAX_CONNECTIONS` | Concurrent connection cap |
//! | `MCP_AUTOMATION_REQUEST_TIMEOUT_MS` | Default request timeout |
//! | `MCP_SERVER_NAME` / `MCP_SERVER_VERSION` | Client metadata in `bridge_hello` |
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use automation_bridge::BridgeConfig;
//!
//! # fn example() -> automation_bridge::Result<()> {
//! let config = BridgeConfig::builder()
//!     .port(8091)
//!     .capability_token("secret")
//!     .heartbeat_interval(Duration::from_secs(5))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for [`BridgeConfig`].
pub mod builder;

/// Host and port sanitizing.
pub mod host;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

pub use builder::BridgeConfigBuilder;

// ============================================================================
// Constants
// ============================================================================

/// Default remote port.
pub const DEFAULT_PORT: u16 = 8091;

/// Default WebSocket sub-protocol.
pub const DEFAULT_PROTOCOL: &str = "mcp-automation";

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default pending-request window.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 25;

/// Default concurrent connection cap.
pub const DEFAULT_MAX_CONCURRENT_CONNECTIONS: usize = 10;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Shortest per-request timeout honoured.
pub const DEFAULT_MIN_REQUEST_TIMEOUT: Duration = Duration::from_millis(1000);

/// Handshake window.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Budget for a lazy connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// BridgeConfig
// ============================================================================

/// Bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Remote host (sanitized).
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// All configured ports, `port` first.
    pub ports: Vec<u16>,
    /// WebSocket sub-protocols offered when connecting.
    pub protocols: Vec<String>,
    /// Shared secret required by the handshake.
    pub capability_token: Option<String>,
    /// Whether the bridge may connect at all.
    pub enabled: bool,
    /// Whether non-loopback hosts are accepted.
    pub allow_non_loopback: bool,
    /// Client name sent in `bridge_hello`.
    pub client_name: String,
    /// Client version sent in `bridge_hello`.
    pub client_version: String,
    /// Heartbeat interval; zero disables heartbeats.
    pub heartbeat_interval: Duration,
    /// Pending-request window (at least 1).
    pub max_pending_requests: usize,
    /// Concurrent connection cap (at least 1).
    pub max_concurrent_connections: usize,
    /// Per-request timeout when the caller gives none.
    pub request_timeout: Duration,
    /// Shortest per-request timeout honoured.
    pub min_request_timeout: Duration,
    /// Handshake window.
    pub handshake_timeout: Duration,
    /// Budget for a lazy connection attempt.
    pub connect_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: host::DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            ports: vec![DEFAULT_PORT],
            protocols: vec![DEFAULT_PROTOCOL.to_string()],
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
// BridgeConfig - Constructors
// ============================================================================

impl BridgeConfig {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::new()
    }

    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    ///
    /// Unparseable numeric values are ignored and the default is kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the resulting configuration is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| keys.iter().find_map(|key| lookup(key));
        let millis = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };
        let count = |key: &str| lookup(key).and_then(|v| v.trim().parse::<usize>().ok());

        let mut builder = BridgeConfigBuilder::new();

        if let Some(host) = first(&["MCP_AUTOMATION_HOST", "MCP_AUTOMATION_WS_HOST"]) {
            builder = builder.host(host);
        }
        if let Some(port) = first(&["MCP_AUTOMATION_PORT", "MCP_AUTOMATION_WS_PORT"])
            .as_deref()
            .and_then(host::sanitize_port)
        {
            builder = builder.port(port);
        }
        if let Some(list) = lookup("MCP_AUTOMATION_WS_PORTS") {
            builder = builder.extra_ports(split_list(&list).filter_map(|p| host::sanitize_port(&p)));
        }
        if let Some(list) = lookup("MCP_AUTOMATION_WS_PROTOCOLS") {
            for protocol in split_list(&list) {
                builder = builder.protocol(protocol);
            }
        }
        if let Some(token) = lookup("MCP_AUTOMATION_CAPABILITY_TOKEN").filter(|t| !t.is_empty()) {
            builder = builder.capability_token(token);
        }
        if let Some(enabled) = lookup("MCP_AUTOMATION_BRIDGE_ENABLED") {
            builder = builder.enabled(!enabled.trim().eq_ignore_ascii_case("false"));
        }
        if let Some(allow) = lookup("MCP_AUTOMATION_ALLOW_NON_LOOPBACK") {
            builder = builder.allow_non_loopback(allow.trim().eq_ignore_ascii_case("true"));
        }
        if let Some(interval) = millis("MCP_AUTOMATION_HEARTBEAT_INTERVAL_MS") {
            builder = builder.heartbeat_interval(interval);
        }
        if let Some(max) = count("MCP_AUTOMATION_MAX_PENDING_REQUESTS") {
            builder = builder.max_pending_requests(max);
        }
        if let Some(max) = count("MCP_AUTOMATION_MAX_CONNECTIONS") {
            builder = builder.max_concurrent_connections(max);
        }
        if let Some(timeout) = millis("MCP_AUTOMATION_REQUEST_TIMEOUT_MS") {
            builder = builder.request_timeout(timeout);
        }
        if let Some(name) = lookup("MCP_SERVER_NAME").filter(|n| !n.trim().is_empty()) {
            builder = builder.client_name(name);
        }
        if let Some(version) = lookup("MCP_SERVER_VERSION").filter(|v| !v.trim().is_empty()) {
            builder = builder.client_version(version);
        }

        builder.build()
    }
}

// ============================================================================
// BridgeConfig - Accessors
// ============================================================================

impl BridgeConfig {
    /// Returns the WebSocket URL of the remote listener.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if host and port do not form a valid URL.
    pub fn ws_url(&self) -> Result<Url> {
        let raw = format!("ws://{}", host::authority(&self.host, self.port));
        Url::parse(&raw).map_err(|e| Error::config(format!("invalid remote URL {raw}: {e}")))
    }

    /// Returns `true` if heartbeats are enabled.
    #[inline]
    #[must_use]
    pub fn heartbeat_enabled(&self) -> bool {
        !self.heartbeat_interval.is_zero()
    }

    /// Clamps a requested timeout to the configured minimum.
    #[inline]
    #[must_use]
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.request_timeout)
            .max(self.min_request_timeout)
    }
}

/// Splits a comma list, trimming entries and dropping empty ones.
fn split_list(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use rustc_hash::FxHashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: FxHashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.ports, vec![DEFAULT_PORT]);
        assert_eq!(config.protocols, vec![DEFAULT_PROTOCOL.to_string()]);
        assert!(config.enabled);
        assert!(config.heartbeat_enabled());
        assert_eq!(config.ws_url().expect("url").as_str(), "ws://127.0.0.1:8091/");
    }

    #[test]
    fn test_empty_environment_matches_defaults() {
        let config = BridgeConfig::from_lookup(|_| None).expect("config");
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_environment_overrides() {
        let config = BridgeConfig::from_lookup(lookup_from(&[
            ("MCP_AUTOMATION_WS_HOST", "localhost"),
            ("MCP_AUTOMATION_WS_PORT", "9001"),
            ("MCP_AUTOMATION_WS_PORTS", "9002, 9001 ,bogus,"),
            ("MCP_AUTOMATION_CAPABILITY_TOKEN", "secret"),
            ("MCP_AUTOMATION_HEARTBEAT_INTERVAL_MS", "0"),
            ("MCP_AUTOMATION_MAX_PENDING_REQUESTS", "0"),
            ("MCP_AUTOMATION_REQUEST_TIMEOUT_MS", "1500"),
            ("MCP_SERVER_NAME", "editor-tools"),
        ]))
        .expect("config");

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9001);
        assert_eq!(config.ports, vec![9001, 9002]);
        assert_eq!(config.capability_token.as_deref(), Some("secret"));
        assert!(!config.heartbeat_enabled());
        assert_eq!(config.max_pending_requests, 1);
        assert_eq!(config.request_timeout, Duration::from_millis(1500));
        assert_eq!(config.client_name, "editor-tools");
    }

    #[test]
    fn test_enabled_flag_only_disabled_by_false() {
        let disabled =
            BridgeConfig::from_lookup(lookup_from(&[("MCP_AUTOMATION_BRIDGE_ENABLED", "FALSE")]))
                .expect("config");
        assert!(!disabled.enabled);

        let enabled =
            BridgeConfig::from_lookup(lookup_from(&[("MCP_AUTOMATION_BRIDGE_ENABLED", "0")]))
                .expect("config");
        assert!(enabled.enabled);
    }

    #[test]
    fn test_non_loopback_requires_opt_in() {
        let rejected =
            BridgeConfig::from_lookup(lookup_from(&[("MCP_AUTOMATION_HOST", "192.168.1.50")]))
                .expect("config");
        assert_eq!(rejected.host, "127.0.0.1");

        let allowed = BridgeConfig::from_lookup(lookup_from(&[
            ("MCP_AUTOMATION_HOST", "192.168.1.50"),
            ("MCP_AUTOMATION_ALLOW_NON_LOOPBACK", "TRUE"),
        ]))
        .expect("config");
        assert_eq!(allowed.host, "192.168.1.50");
    }

    #[test]
    fn test_protocols_from_env_precede_default() {
        let config =
            BridgeConfig::from_lookup(lookup_from(&[("MCP_AUTOMATION_WS_PROTOCOLS", "v2, mcp-automation")]))
                .expect("config");
        assert_eq!(config.protocols, vec!["v2".to_string(), DEFAULT_PROTOCOL.to_string()]);
    }

    #[test]
    fn test_effective_timeout_is_clamped() {
        let config = BridgeConfig::default();
        assert_eq!(config.effective_timeout(None), DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(
            config.effective_timeout(Some(Duration::from_millis(10))),
            DEFAULT_MIN_REQUEST_TIMEOUT
        );
        assert_eq!(
            config.effective_timeout(Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_ipv6_url() {
        let config = BridgeConfig::builder().host("::1").build().expect("config");
        assert_eq!(config.ws_url().expect("url").as_str(), "ws://[::1]:8091/");
    }
}

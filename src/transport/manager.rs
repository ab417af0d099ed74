//! Registry of live connections.
//!
//! Tracks every connection that completed its handshake, designates one as
//! primary, evicts the oldest when the cap is reached and drives the
//! heartbeat on the primary.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            ConnectionManager             │
//! │  ┌────────────────────────────────────┐  │
//! │  │ ConnectionId=1 → Connection (old)  │  │
//! │  │ ConnectionId=2 → Connection ★      │  │  ★ primary
//! │  └────────────────────────────────────┘  │
//! │  heartbeat task ──bridge_ping──► primary │
//! └──────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::identifiers::ConnectionId;
use crate::protocol::{Frame, Liveness, close_code};
use crate::transport::Connection;

// ============================================================================
// Types
// ============================================================================

/// Facts recorded about a connection when it is registered.
#[derive(Debug, Clone, Default)]
pub struct SocketMetadata {
    /// Session ID assigned by the remote.
    pub session_id: Option<String>,
    /// Negotiated sub-protocol.
    pub protocol: Option<String>,
    /// Negotiated protocol version.
    pub protocol_version: u32,
    /// Remote socket address.
    pub remote_addr: Option<SocketAddr>,
    /// Local port of the socket.
    pub local_port: Option<u16>,
}

/// Snapshot of a registered connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Connection identifier.
    pub connection_id: ConnectionId,
    /// Remote port dialled.
    pub port: u16,
    /// Session ID assigned by the remote.
    pub session_id: Option<String>,
    /// Negotiated sub-protocol.
    pub protocol: Option<String>,
    /// Negotiated protocol version.
    pub protocol_version: u32,
    /// Remote IP address.
    pub remote_address: Option<String>,
    /// Remote TCP port.
    pub remote_port: Option<u16>,
    /// Local TCP port.
    pub local_port: Option<u16>,
    /// Registration time.
    pub connected_at: DateTime<Utc>,
    /// Whether this is the primary connection.
    pub is_primary: bool,
}

struct Entry {
    connection: Connection,
    info: ConnectionInfo,
}

#[derive(Default)]
struct Registry {
    /// Registration order, oldest first.
    entries: Vec<Entry>,
    primary: Option<ConnectionId>,
}

impl Registry {
    fn position(&self, id: ConnectionId) -> Option<usize> {
        self.entries.iter().position(|e| e.info.connection_id == id)
    }
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Registry of live connections with a designated primary.
///
/// Thread-safe; shared as `Arc<ConnectionManager>`.
pub struct ConnectionManager {
    /// Heartbeat interval; zero disables heartbeats.
    heartbeat_interval: Duration,
    /// Connection cap (at least 1).
    max_connections: usize,
    /// Registered connections.
    registry: Mutex<Registry>,
    /// Running heartbeat task.
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    /// Time of the last inbound frame.
    last_message_at: Mutex<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.connection_count())
            .field("primary", &self.registry.lock().primary)
            .finish()
    }
}

// ============================================================================
// ConnectionManager - Constructor
// ============================================================================

impl ConnectionManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new(heartbeat_interval: Duration, max_connections: usize) -> Arc<Self> {
        Arc::new(Self {
            heartbeat_interval,
            max_connections: max_connections.max(1),
            registry: Mutex::new(Registry::default()),
            heartbeat: Mutex::new(None),
            last_message_at: Mutex::new(None),
        })
    }
}

// ============================================================================
// ConnectionManager - Registry
// ============================================================================

impl ConnectionManager {
    /// Registers a connection.
    ///
    /// When the cap is reached the oldest connection is closed with
    /// [`close_code::SUPERSEDED`] and dropped first. The new connection
    /// becomes primary if there is none.
    pub fn register_socket(
        &self,
        connection: Connection,
        port: u16,
        metadata: SocketMetadata,
    ) -> ConnectionInfo {
        let id = connection.id();
        let info = ConnectionInfo {
            connection_id: id,
            port,
            session_id: metadata.session_id,
            protocol: metadata.protocol,
            protocol_version: metadata.protocol_version,
            remote_address: metadata.remote_addr.map(|a| a.ip().to_string()),
            remote_port: metadata.remote_addr.map(|a| a.port()),
            local_port: metadata.local_port,
            connected_at: Utc::now(),
            is_primary: false,
        };

        let mut evicted = Vec::new();
        let snapshot = {
            let mut registry = self.registry.lock();

            while registry.entries.len() >= self.max_connections {
                let oldest = registry.entries.remove(0);
                if registry.primary == Some(oldest.info.connection_id) {
                    registry.primary = None;
                }
                evicted.push(oldest);
            }

            registry.entries.push(Entry {
                connection,
                info: info.clone(),
            });
            if registry.primary.is_none() {
                registry.primary = Some(id);
            }

            ConnectionInfo {
                is_primary: registry.primary == Some(id),
                ..info
            }
        };

        for entry in evicted {
            info!(
                connection_id = %entry.info.connection_id,
                "Connection cap reached; closing oldest connection"
            );
            entry
                .connection
                .close(close_code::SUPERSEDED, "Superseded by newer connection");
        }

        debug!(connection_id = %id, port, primary = snapshot.is_primary, "Connection registered");
        snapshot
    }

    /// Removes a connection.
    ///
    /// Returns `None` if it was not registered. Removing the primary leaves
    /// no primary until the next registration.
    pub fn remove_socket(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        let (removed, now_empty) = {
            let mut registry = self.registry.lock();
            let index = registry.position(id)?;
            let entry = registry.entries.remove(index);
            let was_primary = registry.primary == Some(id);
            if was_primary {
                registry.primary = None;
            }
            (
                ConnectionInfo {
                    is_primary: was_primary,
                    ..entry.info
                },
                registry.entries.is_empty(),
            )
        };

        if now_empty {
            self.stop_heartbeat();
        }

        debug!(connection_id = %id, "Connection removed");
        Some(removed)
    }

    /// Returns `true` if a primary connection exists.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.registry.lock().primary.is_some()
    }

    /// Returns the primary connection handle.
    #[must_use]
    pub fn primary_socket(&self) -> Option<Connection> {
        let registry = self.registry.lock();
        let primary = registry.primary?;
        registry
            .entries
            .iter()
            .find(|e| e.info.connection_id == primary)
            .map(|e| e.connection.clone())
    }

    /// Returns the primary connection snapshot.
    #[must_use]
    pub fn primary_info(&self) -> Option<ConnectionInfo> {
        let registry = self.registry.lock();
        let primary = registry.primary?;
        registry
            .entries
            .iter()
            .find(|e| e.info.connection_id == primary)
            .map(|e| ConnectionInfo {
                is_primary: true,
                ..e.info.clone()
            })
    }

    /// Returns snapshots of all connections, oldest first.
    #[must_use]
    pub fn active_sockets(&self) -> Vec<ConnectionInfo> {
        let registry = self.registry.lock();
        registry
            .entries
            .iter()
            .map(|e| ConnectionInfo {
                is_primary: registry.primary == Some(e.info.connection_id),
                ..e.info.clone()
            })
            .collect()
    }

    /// Returns the number of registered connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.lock().entries.len()
    }

    /// Sends a frame to every connection. Returns how many writes succeeded.
    pub async fn broadcast(&self, frame: &Frame) -> usize {
        let connections: Vec<Connection> = {
            let registry = self.registry.lock();
            registry.entries.iter().map(|e| e.connection.clone()).collect()
        };

        let mut delivered = 0;
        for connection in connections {
            match connection.send_frame(frame).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(connection_id = %connection.id(), error = %e, "Broadcast write failed");
                }
            }
        }
        delivered
    }

    /// Closes and forgets every connection.
    pub fn close_all(&self, code: u16, reason: &str) {
        self.stop_heartbeat();

        let entries = {
            let mut registry = self.registry.lock();
            registry.primary = None;
            std::mem::take(&mut registry.entries)
        };

        for entry in entries {
            entry.connection.close(code, reason);
            debug!(connection_id = %entry.info.connection_id, code, "Connection closed");
        }
    }
}

// ============================================================================
// ConnectionManager - Activity
// ============================================================================

impl ConnectionManager {
    /// Records that a frame was received.
    #[inline]
    pub fn update_last_message_time(&self) {
        *self.last_message_at.lock() = Some(Utc::now());
    }

    /// Returns when the last frame was received.
    #[inline]
    #[must_use]
    pub fn last_message_time(&self) -> Option<DateTime<Utc>> {
        *self.last_message_at.lock()
    }
}

// ============================================================================
// ConnectionManager - Heartbeat
// ============================================================================

impl ConnectionManager {
    /// Starts sending `bridge_ping` to the primary at the configured interval.
    ///
    /// Replaces a running heartbeat. Does nothing when the interval is zero.
    /// The task ends by itself once no primary remains.
    pub fn start_heartbeat(self: &Arc<Self>) {
        if self.heartbeat_interval.is_zero() {
            return;
        }

        let manager: Weak<Self> = Arc::downgrade(self);
        let interval = self.heartbeat_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let Some((connection, session_id)) = manager.heartbeat_target() else {
                    debug!("No primary connection; heartbeat stopped");
                    break;
                };

                let ping = Frame::BridgePing(Liveness::now(session_id));
                if let Err(e) = connection.send_frame(&ping).await {
                    warn!(connection_id = %connection.id(), error = %e, "Heartbeat send failed");
                }
            }
        });

        if let Some(previous) = self.heartbeat.lock().replace(handle) {
            previous.abort();
        }
        debug!(interval_ms = interval.as_millis() as u64, "Heartbeat started");
    }

    /// Stops the heartbeat, if running.
    pub fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat.lock().take() {
            handle.abort();
            debug!("Heartbeat stopped");
        }
    }

    /// Returns `true` while the heartbeat task is running.
    #[must_use]
    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    fn heartbeat_target(&self) -> Option<(Connection, Option<String>)> {
        let registry = self.registry.lock();
        let primary = registry.primary?;
        registry
            .entries
            .iter()
            .find(|e| e.info.connection_id == primary)
            .map(|e| (e.connection.clone(), e.info.session_id.clone()))
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat.get_mut().take() {
            handle.abort();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::StreamExt;
    use tokio::io::{DuplexStream, duplex};
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::tungstenite::protocol::Role;

    use crate::transport::connection::{CloseInfo, ConnectionObserver};

    struct Silent;

    impl ConnectionObserver for Silent {
        fn on_frame(&self, _connection_id: ConnectionId, _text: &str) -> Option<String> {
            None
        }

        fn on_close(&self, _connection_id: ConnectionId, _close: CloseInfo) {}
    }

    /// Registers a live connection and returns the remote end of its socket.
    async fn live(manager: &ConnectionManager) -> (ConnectionId, WebSocketStream<DuplexStream>) {
        let (a, b) = duplex(64 * 1024);
        let local = WebSocketStream::from_raw_socket(a, Role::Client, None).await;
        let remote = WebSocketStream::from_raw_socket(b, Role::Server, None).await;

        let (connection, event_loop) = Connection::new(ConnectionId::generate());
        let id = connection.id();
        event_loop.spawn(local, Arc::new(Silent));
        manager.register_socket(connection, 8091, SocketMetadata::default());
        (id, remote)
    }

    #[tokio::test]
    async fn test_first_connection_becomes_primary() {
        let manager = ConnectionManager::new(Duration::ZERO, 10);
        assert!(!manager.is_connected());

        let (first, _r1) = live(&manager).await;
        let (_second, _r2) = live(&manager).await;

        assert!(manager.is_connected());
        assert_eq!(manager.primary_socket().map(|c| c.id()), Some(first));
        let sockets = manager.active_sockets();
        assert_eq!(sockets.len(), 2);
        assert!(sockets[0].is_primary);
        assert!(!sockets[1].is_primary);
    }

    #[tokio::test]
    async fn test_removing_primary_leaves_no_primary() {
        let manager = ConnectionManager::new(Duration::ZERO, 10);
        let (first, _r1) = live(&manager).await;
        let (_second, _r2) = live(&manager).await;

        let removed = manager.remove_socket(first).expect("registered");
        assert!(removed.is_primary);
        assert!(!manager.is_connected());
        assert_eq!(manager.connection_count(), 1);
        assert!(manager.remove_socket(first).is_none());
    }

    #[tokio::test]
    async fn test_cap_evicts_oldest_with_superseded_code() {
        let manager = ConnectionManager::new(Duration::ZERO, 1);
        let (first, mut first_remote) = live(&manager).await;
        let (second, _r2) = live(&manager).await;

        assert_eq!(manager.connection_count(), 1);
        assert_eq!(manager.primary_socket().map(|c| c.id()), Some(second));
        assert_ne!(first, second);

        match first_remote.next().await {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), close_code::SUPERSEDED);
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_heartbeat_pings_primary() {
        let manager = ConnectionManager::new(Duration::from_millis(20), 10);
        let (_id, mut remote) = live(&manager).await;

        manager.start_heartbeat();
        assert!(manager.is_heartbeat_running());

        let message = remote.next().await.expect("frame").expect("ok");
        let text = message.into_text().expect("text");
        let frame = Frame::decode(&text).expect("decode");
        assert!(matches!(frame, Frame::BridgePing(_)));

        manager.stop_heartbeat();
        assert!(!manager.is_heartbeat_running());
    }

    #[tokio::test]
    async fn test_heartbeat_ends_once_no_primary_remains() {
        let manager = ConnectionManager::new(Duration::from_millis(20), 10);
        let (first, _r1) = live(&manager).await;
        let (_second, _r2) = live(&manager).await;

        manager.start_heartbeat();
        assert!(manager.is_heartbeat_running());

        // Registry is still non-empty, so only the task itself can notice.
        manager.remove_socket(first).expect("registered");
        assert_eq!(manager.connection_count(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!manager.is_heartbeat_running());
    }

    #[tokio::test]
    async fn test_zero_interval_disables_heartbeat() {
        let manager = ConnectionManager::new(Duration::ZERO, 10);
        let (_id, _remote) = live(&manager).await;
        manager.start_heartbeat();
        assert!(!manager.is_heartbeat_running());
    }

    #[tokio::test]
    async fn test_close_all_empties_registry() {
        let manager = ConnectionManager::new(Duration::ZERO, 10);
        let (_a, mut remote) = live(&manager).await;
        let (_b, _r) = live(&manager).await;

        manager.close_all(close_code::GOING_AWAY, "Server shutdown");
        assert_eq!(manager.connection_count(), 0);
        assert!(!manager.is_connected());

        match remote.next().await {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), close_code::GOING_AWAY);
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_connection() {
        let manager = ConnectionManager::new(Duration::ZERO, 10);
        let (_a, mut r1) = live(&manager).await;
        let (_b, mut r2) = live(&manager).await;

        let delivered = manager
            .broadcast(&Frame::BridgeShutdown(crate::protocol::Farewell::now("bye")))
            .await;
        assert_eq!(delivered, 2);

        for remote in [&mut r1, &mut r2] {
            let text = remote.next().await.expect("frame").expect("ok").into_text().expect("text");
            assert!(text.contains("bridge_shutdown"));
        }
    }
}

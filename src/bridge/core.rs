//! Automation bridge facade.
//!
//! [`AutomationBridge`] is the single entry point: it dials the remote
//! automation listener, keeps one primary connection, and turns
//! [`send_automation_request`](AutomationBridge::send_automation_request)
//! calls into correlated `automation_request` / `automation_response`
//! exchanges.
//!
//! # Request Path
//!
//! ```text
//! send_automation_request
//!   ├─ not connected? ──► lazy connect (one attempt shared by all callers)
//!   ├─ read-only action already in flight? ──► share its response
//!   ├─ window full? ──► queue until a slot frees (FIFO)
//!   └─ register ──► write frame on primary ──► await response / timeout
//! ```
//!
//! # Example
//!
//! ```no_run
//! use automation_bridge::{AutomationBridge, BridgeConfig, RequestOptions};
//! use serde_json::json;
//!
//! # async fn example() -> automation_bridge::Result<()> {
//! let bridge = AutomationBridge::new(BridgeConfig::from_env()?);
//! bridge.start();
//!
//! let response = bridge
//!     .send_automation_request("list_assets", json!({"directory": "/Game"}), RequestOptions::default())
//!     .await?;
//! println!("{:?}", response.into_result()?);
//!
//! bridge.stop().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::{MaybeTlsStream, connect_async};
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, RequestId};
use crate::protocol::{AutomationRequest, AutomationResponse, Farewell, Frame, close_code};
use crate::transport::{
    CloseInfo, Connection, ConnectionManager, ConnectionObserver, HandshakeHandler, SocketMetadata,
    WsStream,
};

use super::events::BridgeEvent;
use super::handler::MessageHandler;
use super::status::{
    BridgeState, BridgeStatus, Diagnostics, DisconnectRecord, ErrorRecord, HandshakeFailureRecord,
};
use super::tracker::{RequestTracker, ResponseFuture};

// ============================================================================
// Constants
// ============================================================================

/// Lifecycle event buffer per subscriber.
const EVENT_CAPACITY: usize = 64;

/// Header carrying the capability token on the upgrade request.
const CAPABILITY_HEADER: &str = "x-mcp-capability";

/// How long `stop` waits for the shutdown notice to be written.
const SHUTDOWN_NOTICE_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Types
// ============================================================================

/// Connection attempt shared by every caller waiting on it.
type ConnectAttempt = Shared<BoxFuture<'static, Result<()>>>;

/// The attempt in the slot plus the task driving it.
struct PendingConnect {
    attempt: ConnectAttempt,
    task: AbortHandle,
}

/// Per-request options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Deadline; defaults to the configured request timeout and is never
    /// shorter than the configured minimum.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Options with an explicit deadline.
    #[inline]
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// A request waiting for room in the pending window.
struct QueuedRequest {
    action: String,
    payload: Value,
    timeout: Duration,
    responder: oneshot::Sender<Result<AutomationResponse>>,
}

/// A registered request whose frame still has to be written.
struct Dispatch {
    request_id: RequestId,
    action: String,
    payload: Value,
}

/// Internal shared state for the bridge.
pub(crate) struct BridgeInner {
    config: BridgeConfig,
    /// Random ID for this bridge instance.
    session_id: String,
    connections: Arc<ConnectionManager>,
    tracker: Arc<RequestTracker>,
    handshake: HandshakeHandler,
    messages: MessageHandler,
    /// Requests waiting for a pending slot, oldest first.
    queue: Mutex<VecDeque<QueuedRequest>>,
    /// In-flight connection attempt.
    connect_slot: Mutex<Option<PendingConnect>>,
    state: Mutex<BridgeState>,
    diagnostics: Mutex<Diagnostics>,
    events: broadcast::Sender<BridgeEvent>,
    /// Task moving queued requests into the window.
    drain_task: Mutex<Option<JoinHandle<()>>>,
    connect_attempts: AtomicU64,
}

// ============================================================================
// AutomationBridge
// ============================================================================

/// Client bridge to a remote automation listener.
///
/// Cheap to clone; clones share one connection and one request tracker.
#[derive(Clone)]
pub struct AutomationBridge {
    /// Shared inner state.
    pub(crate) inner: Arc<BridgeInner>,
}

impl fmt::Debug for AutomationBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutomationBridge")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// AutomationBridge - Constructors
// ============================================================================

impl AutomationBridge {
    /// Creates a bridge. Nothing is dialled until [`start`](Self::start) or
    /// the first request.
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        let session_id = Uuid::new_v4().to_string();
        let tracker = RequestTracker::new(config.max_pending_requests);
        let connections =
            ConnectionManager::new(config.heartbeat_interval, config.max_concurrent_connections);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = if config.enabled {
            BridgeState::Idle
        } else {
            BridgeState::Disabled
        };

        let inner = BridgeInner {
            handshake: HandshakeHandler::from_config(&config),
            messages: MessageHandler::new(Arc::clone(&tracker), session_id.clone()),
            config,
            session_id,
            connections,
            tracker,
            queue: Mutex::new(VecDeque::new()),
            connect_slot: Mutex::new(None),
            state: Mutex::new(state),
            diagnostics: Mutex::new(Diagnostics::default()),
            events,
            drain_task: Mutex::new(None),
            connect_attempts: AtomicU64::new(0),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Creates a bridge configured from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the environment holds invalid settings.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(BridgeConfig::from_env()?))
    }
}

// ============================================================================
// AutomationBridge - Accessors
// ============================================================================

impl AutomationBridge {
    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Returns this bridge instance's session ID.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Returns the lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> BridgeState {
        self.inner.state()
    }

    /// Returns `true` if a primary connection exists.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connections.is_connected()
    }

    /// Subscribes to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.inner.events.subscribe()
    }
}

// ============================================================================
// AutomationBridge - Lifecycle
// ============================================================================

impl AutomationBridge {
    /// Starts a background connection attempt.
    ///
    /// Does nothing when disabled, stopped or already connected. Failures are
    /// recorded in the status snapshot and published as events.
    pub fn start(&self) {
        let inner = &self.inner;
        if !inner.config.enabled {
            info!("Automation bridge disabled by configuration");
            return;
        }
        if inner.state().is_stopped() {
            warn!("Automation bridge already stopped; start ignored");
            return;
        }
        if inner.connections.is_connected() {
            debug!("Automation bridge already connected");
            return;
        }

        info!(
            host = %inner.config.host,
            port = inner.config.port,
            "Starting automation bridge"
        );
        let _attempt = inner.connection_attempt();
    }

    /// Stops the bridge.
    ///
    /// Sends `bridge_shutdown` to every connection, closes them with 1001,
    /// and fails every pending and queued request with [`Error::Stopped`].
    /// Idempotent; a stopped bridge cannot be restarted.
    pub async fn stop(&self) {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            if state.is_stopped() {
                return;
            }
            *state = BridgeState::Stopped;
        }
        info!("Stopping automation bridge");

        if inner.connections.connection_count() > 0 {
            let notice = Frame::BridgeShutdown(Farewell::now("Server shutting down"));
            match timeout(SHUTDOWN_NOTICE_TIMEOUT, inner.connections.broadcast(&notice)).await {
                Ok(delivered) => debug!(delivered, "Shutdown notice sent"),
                Err(_) => debug!("Shutdown notice timed out"),
            }
        }

        inner
            .connections
            .close_all(close_code::GOING_AWAY, "Server shutdown");

        let rejected = inner.tracker.reject_all(&Error::Stopped);
        let queued = inner.reject_queued(&Error::Stopped);

        if let Some(task) = inner.drain_task.lock().take() {
            task.abort();
        }
        inner.connect_slot.lock().take();
        inner.diagnostics.lock().last_handshake_metadata = None;

        info!(rejected, queued, "Automation bridge stopped");
    }
}

// ============================================================================
// AutomationBridge - Requests
// ============================================================================

impl AutomationBridge {
    /// Sends an action to the remote and waits for its response.
    ///
    /// Connects lazily if needed. Identical read-only requests in flight are
    /// shared. When the pending window is full the request waits its turn.
    ///
    /// The response is returned as sent; check
    /// [`AutomationResponse::is_success`] or use
    /// [`AutomationResponse::into_result`].
    ///
    /// # Errors
    ///
    /// - [`Error::Disabled`] if the bridge is disabled
    /// - [`Error::Stopped`] if the bridge was stopped
    /// - [`Error::Connection`] if no connection could be established
    /// - [`Error::RequestTimeout`] if no response arrived in time
    /// - [`Error::SendFailed`] if the frame could not be written
    /// - [`Error::ConnectionClosed`] if the connection dropped first
    pub async fn send_automation_request(
        &self,
        action: &str,
        payload: Value,
        options: RequestOptions,
    ) -> Result<AutomationResponse> {
        let inner = &self.inner;

        if inner.state().is_stopped() {
            return Err(Error::Stopped);
        }
        if !inner.config.enabled {
            return Err(Error::Disabled);
        }
        if !inner.connections.is_connected() {
            inner.connect_lazily().await?;
        }

        inner.ensure_drain_task();
        let (response, dispatch) = inner.submit(action, payload, options);
        if let Some(dispatch) = dispatch {
            inner.dispatch(dispatch).await;
        }
        response.await
    }

    /// Returns a point-in-time status snapshot.
    #[must_use]
    pub fn get_status(&self) -> BridgeStatus {
        let inner = &self.inner;
        let config = &inner.config;
        let primary = inner.connections.primary_info();
        let diagnostics = inner.diagnostics.lock().clone();

        BridgeStatus {
            enabled: config.enabled,
            state: inner.state(),
            connected: primary.is_some(),
            host: config.host.clone(),
            port: config.port,
            configured_ports: config.ports.clone(),
            supported_protocols: config.protocols.clone(),
            capability_token_required: config.capability_token.is_some(),

            active_port: primary.as_ref().map(|p| p.port),
            negotiated_protocol: primary.as_ref().and_then(|p| p.protocol.clone()),
            connected_at: primary.as_ref().map(|p| p.connected_at),
            primary,
            connections: inner.connections.active_sockets(),
            connect_attempts: inner.connect_attempts.load(Ordering::Relaxed),

            protocol_version: diagnostics.protocol_version,
            capabilities: diagnostics.capabilities,
            supported_opcodes: diagnostics.supported_opcodes,
            expected_response_opcodes: diagnostics.expected_response_opcodes,
            last_handshake_at: diagnostics.last_handshake_at,
            last_handshake_metadata: diagnostics.last_handshake_metadata,
            last_handshake_failure: diagnostics.last_handshake_failure,
            last_disconnect: diagnostics.last_disconnect,
            last_error: diagnostics.last_error,
            last_message_at: inner.connections.last_message_time(),
            last_request_sent_at: inner.tracker.last_request_sent_at(),

            pending_requests: inner.tracker.pending_count(),
            pending_request_details: inner.tracker.pending_details(),
            queued_requests: inner.queue.lock().len(),
            coalesced_requests: inner.tracker.coalesced_count(),
            max_pending_requests: inner.tracker.max_pending_requests(),
            max_concurrent_connections: config.max_concurrent_connections,
            heartbeat_interval_ms: config.heartbeat_interval.as_millis() as u64,
            heartbeat_active: inner.connections.is_heartbeat_running(),

            session_id: inner.session_id.clone(),
            client_name: config.client_name.clone(),
            client_version: config.client_version.clone(),
        }
    }
}

// ============================================================================
// BridgeInner - State
// ============================================================================

impl BridgeInner {
    fn state(&self) -> BridgeState {
        *self.state.lock()
    }

    /// Moves to `next` unless stopped.
    fn transition(&self, next: BridgeState) {
        let mut state = self.state.lock();
        if !state.is_stopped() {
            *state = next;
        }
    }

    fn emit(&self, event: BridgeEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn record_error(&self, message: String) {
        self.diagnostics.lock().last_error = Some(ErrorRecord {
            message,
            at: Utc::now(),
        });
    }

    fn reject_queued(&self, error: &Error) -> usize {
        let drained: Vec<QueuedRequest> = self.queue.lock().drain(..).collect();
        let count = drained.len();
        for request in drained {
            let _ = request.responder.send(Err(error.clone()));
        }
        count
    }
}

// ============================================================================
// BridgeInner - Connecting
// ============================================================================

impl BridgeInner {
    /// Returns the in-flight connection attempt, starting one if needed.
    fn connection_attempt(self: &Arc<Self>) -> ConnectAttempt {
        let mut slot = self.connect_slot.lock();
        if let Some(pending) = slot.as_ref() {
            return pending.attempt.clone();
        }

        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let result = inner.establish().await;
            inner.connect_slot.lock().take();
            result
        });

        let task = handle.abort_handle();
        let attempt = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(Error::connection(format!("connection task failed: {e}"))))
        }
        .boxed()
        .shared();

        *slot = Some(PendingConnect {
            attempt: attempt.clone(),
            task,
        });
        attempt
    }

    /// Cancels `attempt` if it still owns the slot, so the next caller dials
    /// afresh instead of joining a stale handshake.
    fn abandon_attempt(&self, attempt: &ConnectAttempt, reason: &Error) {
        let pending = {
            let mut slot = self.connect_slot.lock();
            match slot.as_ref() {
                Some(pending) if pending.attempt.ptr_eq(attempt) => slot.take(),
                _ => None,
            }
        };
        let Some(pending) = pending else {
            return;
        };

        pending.task.abort();
        if self.connections.is_connected() {
            return;
        }

        warn!(error = %reason, port = self.config.port, "Abandoning connection attempt");
        self.record_error(reason.to_string());
        self.emit(BridgeEvent::Error {
            port: Some(self.config.port),
            message: reason.to_string(),
        });
        self.transition(BridgeState::Disconnected);
    }

    async fn connect_lazily(self: &Arc<Self>) -> Result<()> {
        info!("Automation bridge not connected; attempting lazy connection");

        let budget = self.config.connect_timeout;
        let attempt = self.connection_attempt();
        let outcome = match timeout(budget, attempt.clone()).await {
            Ok(result) => result,
            Err(_) => {
                let e = Error::connection_timeout(budget.as_millis() as u64);
                self.abandon_attempt(&attempt, &e);
                if self.connections.is_connected() { Ok(()) } else { Err(e) }
            }
        };

        match outcome {
            Ok(()) if self.connections.is_connected() => Ok(()),
            Ok(()) => Err(Error::connection(
                "Failed to establish connection to automation endpoint: connection closed",
            )),
            Err(e) => {
                error!(error = %e, "Lazy connection failed");
                Err(Error::connection(format!(
                    "Failed to establish connection to automation endpoint: {e}"
                )))
            }
        }
    }

    /// One connection attempt with bookkeeping.
    async fn establish(self: &Arc<Self>) -> Result<()> {
        let port = self.config.port;
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        self.transition(BridgeState::Connecting);

        let result = self.dial_and_register(port).await;

        if let Err(e) = &result {
            warn!(error = %e, port, "Automation bridge connection attempt failed");

            if let Some(reason) = e.handshake_failure() {
                self.diagnostics.lock().last_handshake_failure = Some(HandshakeFailureRecord {
                    reason: reason.to_string(),
                    port,
                    at: Utc::now(),
                });
                self.emit(BridgeEvent::HandshakeFailed {
                    port,
                    reason: reason.to_string(),
                });
            } else if !matches!(e, Error::Stopped) {
                self.record_error(e.to_string());
                self.emit(BridgeEvent::Error {
                    port: Some(port),
                    message: e.to_string(),
                });
            }

            if !self.connections.is_connected() {
                self.transition(BridgeState::Disconnected);
            }
        }

        result
    }

    async fn dial_and_register(self: &Arc<Self>, port: u16) -> Result<()> {
        let url = self.config.ws_url()?;
        let request = self.client_request(&url)?;

        debug!(url = %url, "Dialling automation endpoint");
        let (mut ws, response) = connect_async(request)
            .await
            .map_err(|e| Error::connection(format!("{url}: {e}")))?;

        let protocol = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let (remote_addr, local_port) = socket_addrs(&ws);

        self.transition(BridgeState::HandshakeInFlight);
        let handshake = self.handshake.initiate_handshake(&mut ws).await?;

        let (connection, event_loop) = Connection::new(ConnectionId::generate());
        let connection_id = connection.id();
        self.connections.register_socket(
            connection,
            port,
            SocketMetadata {
                session_id: handshake.session_id.clone(),
                protocol: protocol.clone(),
                protocol_version: handshake.protocol_version,
                remote_addr,
                local_port,
            },
        );
        let observer: Arc<dyn ConnectionObserver> = Arc::new(BridgeObserver {
            inner: Arc::downgrade(self),
        });
        event_loop.spawn(ws, observer);

        if self.state().is_stopped() {
            self.connections
                .close_all(close_code::GOING_AWAY, "Server shutdown");
            return Err(Error::Stopped);
        }

        {
            let mut diagnostics = self.diagnostics.lock();
            diagnostics.last_handshake_at = Some(Utc::now());
            diagnostics.last_handshake_metadata = Some(handshake.metadata.clone());
            diagnostics.last_handshake_failure = None;
            diagnostics.protocol_version = Some(handshake.protocol_version);
            diagnostics.capabilities = handshake.capabilities.clone();
            diagnostics.supported_opcodes = handshake.supported_opcodes.clone();
            diagnostics.expected_response_opcodes = handshake.expected_response_opcodes.clone();
        }

        self.connections.start_heartbeat();
        self.transition(BridgeState::Ready);

        info!(
            connection_id = %connection_id,
            port,
            protocol = ?protocol,
            protocol_version = handshake.protocol_version,
            "Automation bridge connected"
        );
        self.emit(BridgeEvent::Connected {
            connection_id,
            port,
            protocol,
            metadata: handshake.metadata,
        });
        Ok(())
    }

    /// Builds the upgrade request with sub-protocols and capability header.
    fn client_request(&self, url: &Url) -> Result<Request> {
        let mut request = url.as_str().into_client_request()?;
        let headers = request.headers_mut();

        if !self.config.protocols.is_empty() {
            let value = HeaderValue::from_str(&self.config.protocols.join(", "))
                .map_err(|e| Error::config(format!("invalid sub-protocol list: {e}")))?;
            headers.insert(SEC_WEBSOCKET_PROTOCOL, value);
        }
        if let Some(token) = &self.config.capability_token {
            let value = HeaderValue::from_str(token)
                .map_err(|e| Error::config(format!("invalid capability token: {e}")))?;
            headers.insert(HeaderName::from_static(CAPABILITY_HEADER), value);
        }

        Ok(request)
    }

    /// Cleans up after a registered connection closed.
    fn handle_close(&self, connection_id: ConnectionId, close: CloseInfo) {
        let Some(info) = self.connections.remove_socket(connection_id) else {
            return;
        };

        info!(
            connection_id = %connection_id,
            code = close.code,
            reason = %close.reason,
            port = info.port,
            "Automation bridge socket closed"
        );

        self.diagnostics.lock().last_disconnect = Some(DisconnectRecord {
            code: close.code,
            reason: close.reason.clone(),
            at: Utc::now(),
        });
        self.emit(BridgeEvent::Disconnected {
            connection_id,
            port: info.port,
            protocol: info.protocol.clone(),
            code: close.code,
            reason: close.reason.clone(),
        });

        if self.connections.is_connected() {
            return;
        }

        self.connections.stop_heartbeat();
        self.transition(BridgeState::Disconnected);
        let reason = if close.reason.is_empty() {
            format!("socket closed with code {}", close.code)
        } else {
            close.reason
        };
        let error = Error::connection_closed(reason);
        let rejected = self.tracker.reject_all(&error);
        let queued = self.reject_queued(&error);
        if rejected + queued > 0 {
            warn!(rejected, queued, "Requests failed by disconnect");
        }
    }
}

// ============================================================================
// BridgeInner - Requests
// ============================================================================

impl BridgeInner {
    /// Registers, coalesces or queues a request.
    ///
    /// Returns the response future and, if the request was registered now,
    /// the frame the caller must write.
    fn submit(
        self: &Arc<Self>,
        action: &str,
        payload: Value,
        options: RequestOptions,
    ) -> (ResponseFuture, Option<Dispatch>) {
        let deadline = self.config.effective_timeout(options.timeout);

        let Some(key) = RequestTracker::create_coalesce_key(action, &payload) else {
            return self.admit(action, payload, deadline);
        };

        let mut dispatch = None;
        let shared = self.tracker.coalesce_or_start(key, || {
            let (response, registered) = self.admit(action, payload, deadline);
            dispatch = registered;
            response
        });
        (shared.boxed(), dispatch)
    }

    /// Registers a request, or queues it when the window is full or older
    /// requests are already waiting.
    fn admit(
        &self,
        action: &str,
        payload: Value,
        deadline: Duration,
    ) -> (ResponseFuture, Option<Dispatch>) {
        let mut queue = self.queue.lock();

        if queue.is_empty()
            && let Some(ticket) = self.tracker.try_create_request(action, deadline)
        {
            let dispatch = Dispatch {
                request_id: ticket.request_id,
                action: action.to_string(),
                payload,
            };
            return (ticket.response, Some(dispatch));
        }

        let (responder, response_rx) = oneshot::channel();
        queue.push_back(QueuedRequest {
            action: action.to_string(),
            payload,
            timeout: deadline,
            responder,
        });
        let queued = queue.len();
        drop(queue);

        debug!(
            action,
            queued,
            max_pending = self.tracker.max_pending_requests(),
            "Pending window full; request queued"
        );

        let response = async move {
            response_rx
                .await
                .unwrap_or_else(|_| Err(Error::Stopped))
        }
        .boxed();
        (response, None)
    }

    /// Writes a registered request on the primary connection.
    async fn dispatch(&self, dispatch: Dispatch) {
        let Dispatch {
            request_id,
            action,
            payload,
        } = dispatch;

        debug!(request_id = %request_id, action = %action, "Sending automation request");
        let frame = Frame::AutomationRequest(AutomationRequest {
            request_id,
            action,
            payload,
        });

        let sent = match self.connections.primary_socket() {
            Some(connection) => connection.send_frame(&frame).await,
            None => Err(Error::connection_closed("no primary connection")),
        };

        match sent {
            Ok(()) => self.tracker.update_last_request_sent_at(),
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Failed to send automation request");
                self.record_error(e.to_string());
                self.tracker
                    .reject_request(request_id, Error::send_failed(e.to_string()));
            }
        }
    }

    /// Moves queued requests into the window while it has room.
    fn take_dispatchable(&self) -> Vec<Dispatch> {
        let mut ready = Vec::new();
        let mut queue = self.queue.lock();

        while let Some(front) = queue.front() {
            if front.responder.is_closed() {
                queue.pop_front();
                continue;
            }
            let Some(ticket) = self.tracker.try_create_request(&front.action, front.timeout) else {
                break;
            };
            let Some(request) = queue.pop_front() else {
                break;
            };

            let responder = request.responder;
            let response = ticket.response;
            tokio::spawn(async move {
                let _ = responder.send(response.await);
            });

            ready.push(Dispatch {
                request_id: ticket.request_id,
                action: request.action,
                payload: request.payload,
            });
        }

        ready
    }

    /// Starts the queue drain task if it is not running.
    fn ensure_drain_task(self: &Arc<Self>) {
        let mut task = self.drain_task.lock();
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let inner: Weak<Self> = Arc::downgrade(self);
        let tracker = Arc::clone(&self.tracker);

        *task = Some(tokio::spawn(async move {
            loop {
                tracker.slot_freed().notified().await;

                let Some(inner) = inner.upgrade() else {
                    break;
                };
                if inner.state().is_stopped() {
                    break;
                }
                for dispatch in inner.take_dispatchable() {
                    inner.dispatch(dispatch).await;
                }
            }
        }));
    }
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        if let Some(task) = self.drain_task.get_mut().take() {
            task.abort();
        }
    }
}

// ============================================================================
// BridgeObserver
// ============================================================================

/// Feeds connection traffic back into the bridge.
struct BridgeObserver {
    inner: Weak<BridgeInner>,
}

impl ConnectionObserver for BridgeObserver {
    fn on_frame(&self, connection_id: ConnectionId, text: &str) -> Option<String> {
        let inner = self.inner.upgrade()?;
        inner.connections.update_last_message_time();

        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "Failed to parse automation frame");
                return None;
            }
        };

        let reply = inner.messages.handle_message(frame)?;
        match reply.encode() {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(error = %e, "Failed to encode reply");
                None
            }
        }
    }

    fn on_close(&self, connection_id: ConnectionId, close: CloseInfo) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_close(connection_id, close);
        }
    }
}

/// Peer address and local port of a plain TCP socket.
fn socket_addrs(ws: &WsStream) -> (Option<SocketAddr>, Option<u16>) {
    match ws.get_ref() {
        MaybeTlsStream::Plain(tcp) => (
            tcp.peer_addr().ok(),
            tcp.local_addr().ok().map(|a| a.port()),
        ),
        _ => (None, None),
    }
}

// ============================================================================
// Tests
// ============================================================================

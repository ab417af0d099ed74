//! Pending request tracking.
//!
//! Correlates outbound `automation_request` frames with their responses,
//! enforces the pending-request window and a per-request deadline, and
//! coalesces identical read-only requests that are in flight.
//!
//! # Request Flow
//!
//! ```text
//! try_create_request ──► RequestTicket { request_id, response }
//!        │
//!        ├── resolve_request(id, response)  ──► Ok(response)
//!        ├── deadline elapses               ──► Err(RequestTimeout)
//!        └── reject_all(error)              ──► Err(error)
//! ```
//!
//! Every settle path removes the entry first, so a request settles exactly
//! once and late responses are dropped.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::AutomationResponse;

// ============================================================================
// Constants
// ============================================================================

/// Action prefixes treated as read-only and therefore coalescable.
const READ_ONLY_PREFIXES: &[&str] = &["list", "get_", "exists", "search", "find"];

/// Error code set when the echoed action does not match the request.
pub const ACTION_PREFIX_MISMATCH: &str = "ACTION_PREFIX_MISMATCH";

// ============================================================================
// Types
// ============================================================================

/// Boxed future yielding the response for one request.
pub type ResponseFuture = BoxFuture<'static, Result<AutomationResponse>>;

/// Response future shared between coalesced callers.
pub type SharedResponse = Shared<ResponseFuture>;

/// A registered request awaiting its response.
pub struct RequestTicket {
    /// Correlation ID to put on the wire.
    pub request_id: RequestId,
    /// Settles when the request is resolved, rejected or times out.
    pub response: ResponseFuture,
}

impl std::fmt::Debug for RequestTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTicket")
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

/// Diagnostic view of a pending request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequestDetail {
    /// Correlation ID.
    pub request_id: RequestId,
    /// Requested action.
    pub action: String,
    /// When the request was registered.
    pub requested_at: DateTime<Utc>,
    /// Milliseconds since registration.
    pub age_ms: u64,
    /// Deadline length in milliseconds.
    pub timeout_ms: u64,
}

struct PendingRequest {
    action: String,
    requested_at: DateTime<Utc>,
    started: Instant,
    timeout: Duration,
    /// Bumped whenever the deadline is re-armed.
    timer_generation: u64,
    timer: JoinHandle<()>,
    responder: oneshot::Sender<Result<AutomationResponse>>,
}

struct CoalescedEntry {
    generation: u64,
    response: SharedResponse,
}

// ============================================================================
// RequestTracker
// ============================================================================

/// Tracks pending requests and coalesced read-only requests.
///
/// Thread-safe; shared as `Arc<RequestTracker>`.
pub struct RequestTracker {
    /// Pending-request window.
    max_pending: usize,
    /// Requests awaiting a response.
    pending: Mutex<FxHashMap<RequestId, PendingRequest>>,
    /// In-flight read-only requests by coalesce key.
    coalesced: Mutex<FxHashMap<String, CoalescedEntry>>,
    /// Generation counter for coalesced entries.
    coalesce_generation: AtomicU64,
    /// Signalled whenever a pending slot frees up.
    slot_freed: Notify,
    /// Time the last request frame was written.
    last_request_sent_at: Mutex<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for RequestTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTracker")
            .field("max_pending", &self.max_pending)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// RequestTracker - Constructor
// ============================================================================

impl RequestTracker {
    /// Creates a tracker with the given pending-request window (at least 1).
    #[must_use]
    pub fn new(max_pending: usize) -> Arc<Self> {
        Arc::new(Self {
            max_pending: max_pending.max(1),
            pending: Mutex::new(FxHashMap::default()),
            coalesced: Mutex::new(FxHashMap::default()),
            coalesce_generation: AtomicU64::new(0),
            slot_freed: Notify::new(),
            last_request_sent_at: Mutex::new(None),
        })
    }
}

// ============================================================================
// RequestTracker - Pending Requests
// ============================================================================

impl RequestTracker {
    /// Registers a request if the window has room.
    ///
    /// Returns `None` when the window is full; nothing is registered then.
    pub fn try_create_request(self: &Arc<Self>, action: &str, timeout: Duration) -> Option<RequestTicket> {
        let mut pending = self.pending.lock();
        if pending.len() >= self.max_pending {
            return None;
        }

        let request_id = RequestId::generate();
        let (responder, response_rx) = oneshot::channel();
        let timer = self.arm_timer(request_id, 0, timeout);

        pending.insert(
            request_id,
            PendingRequest {
                action: action.to_string(),
                requested_at: Utc::now(),
                started: Instant::now(),
                timeout,
                timer_generation: 0,
                timer,
                responder,
            },
        );
        let count = pending.len();
        drop(pending);

        trace!(request_id = %request_id, action, pending = count, "Request registered");

        let response = async move {
            response_rx
                .await
                .unwrap_or_else(|_| Err(Error::connection_closed("request abandoned")))
        }
        .boxed();

        Some(RequestTicket {
            request_id,
            response,
        })
    }

    /// Registers a request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the pending-request window is full.
    pub fn create_request(self: &Arc<Self>, action: &str, timeout: Duration) -> Result<RequestTicket> {
        self.try_create_request(action, timeout).ok_or_else(|| {
            Error::protocol(format!(
                "Max pending requests limit reached ({})",
                self.max_pending
            ))
        })
    }

    /// Settles a request with the remote's response.
    ///
    /// Returns `false` if no request with that ID is pending; the response
    /// is dropped then. An echoed action that does not match the request
    /// turns the response into a failure coded [`ACTION_PREFIX_MISMATCH`].
    pub fn resolve_request(&self, request_id: &str, response: AutomationResponse) -> bool {
        let Ok(id) = request_id.parse::<RequestId>() else {
            warn!(request_id, "Response carries an unrecognized request ID");
            return false;
        };
        let Some(entry) = self.take(id) else {
            debug!(request_id, "No pending request for response; dropping");
            return false;
        };

        let response = enforce_action_match(&entry.action, response);
        trace!(
            request_id,
            action = %entry.action,
            elapsed_ms = entry.started.elapsed().as_millis() as u64,
            success = response.is_success(),
            "Request resolved"
        );
        let _ = entry.responder.send(Ok(response));
        true
    }

    /// Fails one pending request. Returns `false` if it was not pending.
    pub fn reject_request(&self, request_id: RequestId, error: Error) -> bool {
        let Some(entry) = self.take(request_id) else {
            return false;
        };
        debug!(request_id = %request_id, action = %entry.action, error = %error, "Request rejected");
        let _ = entry.responder.send(Err(error));
        true
    }

    /// Fails every pending request. Returns how many were pending.
    pub fn reject_all(&self, error: &Error) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, entry)| entry).collect()
        };

        let count = drained.len();
        for entry in drained {
            entry.timer.abort();
            let _ = entry.responder.send(Err(error.clone()));
        }

        if count > 0 {
            debug!(count, error = %error, "Pending requests rejected");
            self.slot_freed.notify_one();
        }
        count
    }

    /// Restarts the deadline of a pending request.
    ///
    /// Returns `false` if the request is not pending.
    pub fn refresh_timeout(self: &Arc<Self>, request_id: &str) -> bool {
        let Ok(id) = request_id.parse::<RequestId>() else {
            return false;
        };

        let mut pending = self.pending.lock();
        let Some(entry) = pending.get_mut(&id) else {
            return false;
        };

        entry.timer.abort();
        entry.timer_generation += 1;
        entry.timer = self.arm_timer(id, entry.timer_generation, entry.timeout);
        trace!(request_id, "Request deadline refreshed");
        true
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns the pending-request window.
    #[inline]
    #[must_use]
    pub fn max_pending_requests(&self) -> usize {
        self.max_pending
    }

    /// Returns `true` if another request fits in the window.
    #[inline]
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.pending_count() < self.max_pending
    }

    /// Returns diagnostic details of pending requests, oldest first.
    #[must_use]
    pub fn pending_details(&self) -> Vec<PendingRequestDetail> {
        let mut details: Vec<PendingRequestDetail> = self
            .pending
            .lock()
            .iter()
            .map(|(id, entry)| PendingRequestDetail {
                request_id: *id,
                action: entry.action.clone(),
                requested_at: entry.requested_at,
                age_ms: entry.started.elapsed().as_millis() as u64,
                timeout_ms: entry.timeout.as_millis() as u64,
            })
            .collect();
        details.sort_by(|a, b| b.age_ms.cmp(&a.age_ms));
        details
    }

    /// Returns the notifier signalled whenever a pending slot frees up.
    #[inline]
    #[must_use]
    pub fn slot_freed(&self) -> &Notify {
        &self.slot_freed
    }

    /// Records that a request frame was written.
    #[inline]
    pub fn update_last_request_sent_at(&self) {
        *self.last_request_sent_at.lock() = Some(Utc::now());
    }

    /// Returns when the last request frame was written.
    #[inline]
    #[must_use]
    pub fn last_request_sent_at(&self) -> Option<DateTime<Utc>> {
        *self.last_request_sent_at.lock()
    }

    /// Removes an entry and stops its timer.
    fn take(&self, id: RequestId) -> Option<PendingRequest> {
        let entry = self.pending.lock().remove(&id)?;
        entry.timer.abort();
        self.slot_freed.notify_one();
        Some(entry)
    }

    fn arm_timer(self: &Arc<Self>, id: RequestId, generation: u64, timeout: Duration) -> JoinHandle<()> {
        let tracker: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tracker) = tracker.upgrade() {
                tracker.expire(id, generation);
            }
        })
    }

    fn expire(&self, id: RequestId, generation: u64) {
        let entry = {
            let mut pending = self.pending.lock();
            let current = pending
                .get(&id)
                .is_some_and(|entry| entry.timer_generation == generation);
            if current { pending.remove(&id) } else { None }
        };
        let Some(entry) = entry else {
            return;
        };

        let timeout_ms = entry.timeout.as_millis() as u64;
        warn!(request_id = %id, action = %entry.action, timeout_ms, "Automation request timed out");
        let _ = entry
            .responder
            .send(Err(Error::request_timeout(id, entry.action, timeout_ms)));
        self.slot_freed.notify_one();
    }
}

// ============================================================================
// RequestTracker - Coalescing
// ============================================================================

impl RequestTracker {
    /// Derives the coalesce key for a request.
    ///
    /// Only read-only actions are coalesced; others return `None`. The key is
    /// the action plus a SHA-256 digest of the payload with object keys
    /// sorted, so equal payloads produce equal keys regardless of key order.
    #[must_use]
    pub fn create_coalesce_key(action: &str, payload: &Value) -> Option<String> {
        let read_only = READ_ONLY_PREFIXES
            .iter()
            .any(|prefix| action.starts_with(prefix));
        if !read_only {
            return None;
        }

        let mut hasher = Sha256::new();
        hash_canonical(payload, &mut hasher);
        Some(format!("{action}:{}", hex::encode(hasher.finalize())))
    }

    /// Returns the in-flight response for a coalesce key.
    #[must_use]
    pub fn get_coalesced_request(&self, key: &str) -> Option<SharedResponse> {
        self.coalesced
            .lock()
            .get(key)
            .map(|entry| entry.response.clone())
    }

    /// Installs `response` under `key`, replacing any existing entry.
    ///
    /// The entry is removed once the response settles.
    pub fn set_coalesced_request(self: &Arc<Self>, key: String, response: ResponseFuture) -> SharedResponse {
        let mut coalesced = self.coalesced.lock();
        self.install(&mut coalesced, key, response)
    }

    /// Returns the in-flight response for `key`, or starts one with `start`.
    ///
    /// Lookup and install happen under one lock, so concurrent callers with
    /// the same key share a single request.
    pub fn coalesce_or_start<F>(self: &Arc<Self>, key: String, start: F) -> SharedResponse
    where
        F: FnOnce() -> ResponseFuture,
    {
        let mut coalesced = self.coalesced.lock();
        if let Some(entry) = coalesced.get(&key) {
            debug!(key = %key, "Coalescing with in-flight request");
            return entry.response.clone();
        }
        let response = start();
        self.install(&mut coalesced, key, response)
    }

    /// Returns the number of coalesced entries.
    #[inline]
    #[must_use]
    pub fn coalesced_count(&self) -> usize {
        self.coalesced.lock().len()
    }

    fn install(
        self: &Arc<Self>,
        coalesced: &mut FxHashMap<String, CoalescedEntry>,
        key: String,
        response: ResponseFuture,
    ) -> SharedResponse {
        let generation = self.coalesce_generation.fetch_add(1, Ordering::Relaxed);
        let tracker: Weak<Self> = Arc::downgrade(self);
        let cleanup_key = key.clone();

        let shared = async move {
            let result = response.await;
            if let Some(tracker) = tracker.upgrade() {
                tracker.forget_coalesced(&cleanup_key, generation);
            }
            result
        }
        .boxed()
        .shared();

        coalesced.insert(
            key,
            CoalescedEntry {
                generation,
                response: shared.clone(),
            },
        );

        // Drive to completion so the entry is removed even if every caller goes away
        tokio::spawn(shared.clone());
        shared
    }

    fn forget_coalesced(&self, key: &str, generation: u64) {
        let mut coalesced = self.coalesced.lock();
        if coalesced
            .get(key)
            .is_some_and(|entry| entry.generation == generation)
        {
            coalesced.remove(key);
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Feeds a JSON value into the hasher with object keys in sorted order.
fn hash_canonical(value: &Value, hasher: &mut Sha256) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            for key in keys {
                hasher.update(Value::String(key.clone()).to_string().as_bytes());
                hasher.update(b":");
                hash_canonical(&map[key], hasher);
                hasher.update(b",");
            }
            hasher.update(b"}");
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                hash_canonical(item, hasher);
                hasher.update(b",");
            }
            hasher.update(b"]");
        }
        scalar => hasher.update(scalar.to_string().as_bytes()),
    }
}

/// Marks a response failed if its echoed action does not match `expected`.
///
/// Matching is case-insensitive and accepts either side being a prefix of
/// the other.
fn enforce_action_match(expected: &str, mut response: AutomationResponse) -> AutomationResponse {
    let expected = expected.to_ascii_lowercase();
    let Some(echoed) = response.echoed_action().map(str::to_ascii_lowercase) else {
        return response;
    };
    if expected.is_empty() || echoed.starts_with(&expected) || expected.starts_with(&echoed) {
        return response;
    }

    warn!(expected = %expected, echoed = %echoed, "Response action does not match request");
    let note = format!("Response action mismatch (expected~='{expected}', got='{echoed}')");
    response.success = Some(false);
    if response.error.is_none() {
        response.error = Some(ACTION_PREFIX_MISMATCH.to_string());
    }
    response.message = Some(match response.message.take() {
        Some(message) if !message.is_empty() => format!("{message} {note}"),
        _ => note,
    });
    response
}

// ============================================================================
// Tests
// ============================================================================

//! Inbound frame dispatch.
//!
//! Routes frames received after the handshake to the request tracker and
//! produces replies where the protocol calls for one.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::bridge::tracker::RequestTracker;
use crate::protocol::{Frame, Liveness, timestamp_now};

// ============================================================================
// MessageHandler
// ============================================================================

/// Dispatches inbound frames.
#[derive(Debug, Clone)]
pub struct MessageHandler {
    tracker: Arc<RequestTracker>,
    /// Session ID stamped on replies.
    session_id: String,
}

impl MessageHandler {
    /// Creates a handler feeding `tracker`.
    #[must_use]
    pub fn new(tracker: Arc<RequestTracker>, session_id: impl Into<String>) -> Self {
        Self {
            tracker,
            session_id: session_id.into(),
        }
    }

    /// Handles one frame. Returns the reply to send, if any.
    pub fn handle_message(&self, frame: Frame) -> Option<Frame> {
        match frame {
            Frame::AutomationResponse(response) => {
                match response.request_id.clone() {
                    Some(request_id) => {
                        self.tracker.resolve_request(&request_id, response);
                    }
                    None => warn!("Received automation_response without requestId"),
                }
                None
            }

            Frame::AutomationEvent(event) => {
                match event.request_id.clone() {
                    Some(request_id) => {
                        debug!(request_id = %request_id, event = ?event.event, "Automation event completes request");
                        self.tracker.resolve_request(&request_id, event.into_response());
                    }
                    None => debug!(event = ?event.event, "Automation event received"),
                }
                None
            }

            Frame::ProgressUpdate(update) => {
                match update.request_id.as_deref() {
                    Some(request_id) if update.still_working == Some(false) => {
                        trace!(request_id, "Progress update marks work finished; deadline kept");
                    }
                    Some(request_id) if self.tracker.refresh_timeout(request_id) => {
                        trace!(request_id, percent = ?update.percent, "Progress update");
                    }
                    Some(request_id) => debug!(request_id, "Progress update for unknown request"),
                    None => debug!("Progress update without requestId"),
                }
                None
            }

            Frame::BridgePing(ping) => Some(Frame::BridgePong(Liveness {
                session_id: Some(self.session_id.clone()),
                timestamp: Some(timestamp_now()),
                nonce: ping.nonce,
            })),

            Frame::BridgePong(_) | Frame::BridgeHeartbeat(_) => {
                trace!("Liveness frame received");
                None
            }

            Frame::BridgeGoodbye(farewell) | Frame::BridgeShutdown(farewell) => {
                info!(reason = ?farewell.reason, "Automation remote is shutting down");
                None
            }

            Frame::BridgeError(error) => {
                warn!(error = ?error.error, message = ?error.message, "Automation remote reported an error");
                None
            }

            Frame::Unknown { kind, .. } => {
                debug!(kind = %kind, "Unhandled frame type");
                None
            }

            other => {
                debug!(kind = other.kind(), "Unexpected frame after handshake");
                None
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::json;

    use crate::protocol::{AutomationEvent, AutomationResponse, ProgressUpdate};

    fn handler() -> (MessageHandler, Arc<RequestTracker>) {
        let tracker = RequestTracker::new(4);
        (MessageHandler::new(Arc::clone(&tracker), "session-1"), tracker)
    }

    #[tokio::test]
    async fn test_response_resolves_pending_request() {
        let (handler, tracker) = handler();
        let ticket = tracker
            .try_create_request("echo", Duration::from_secs(5))
            .expect("capacity");

        let reply = handler.handle_message(Frame::AutomationResponse(AutomationResponse {
            request_id: Some(ticket.request_id.to_string()),
            success: Some(true),
            result: Some(json!({"x": 1})),
            ..Default::default()
        }));

        assert!(reply.is_none());
        let response = ticket.response.await.expect("response");
        assert_eq!(response.result, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_event_with_request_id_resolves() {
        let (handler, tracker) = handler();
        let ticket = tracker
            .try_create_request("modify_scs", Duration::from_secs(5))
            .expect("capacity");

        handler.handle_message(Frame::AutomationEvent(AutomationEvent {
            request_id: Some(ticket.request_id.to_string()),
            event: Some("modify_scs_complete".into()),
            result: Some(json!({"success": true})),
            ..Default::default()
        }));

        let response = ticket.response.await.expect("response");
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_progress_update_keeps_request_pending() {
        let (handler, tracker) = handler();
        let ticket = tracker
            .try_create_request("build", Duration::from_secs(5))
            .expect("capacity");

        handler.handle_message(Frame::ProgressUpdate(ProgressUpdate {
            request_id: Some(ticket.request_id.to_string()),
            percent: Some(40.0),
            ..Default::default()
        }));
        assert_eq!(tracker.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_finished_progress_update_does_not_extend_deadline() {
        let (handler, tracker) = handler();
        let ticket = tracker
            .try_create_request("build", Duration::from_millis(300))
            .expect("capacity");

        tokio::time::sleep(Duration::from_millis(200)).await;
        handler.handle_message(Frame::ProgressUpdate(ProgressUpdate {
            request_id: Some(ticket.request_id.to_string()),
            still_working: Some(false),
            ..Default::default()
        }));

        // A refreshed deadline would land 300ms out, past this bound.
        let outcome = tokio::time::timeout(Duration::from_millis(250), ticket.response)
            .await
            .expect("original deadline must still fire");
        assert!(matches!(outcome, Err(crate::error::Error::RequestTimeout { .. })));
    }

    #[tokio::test]
    async fn test_loosely_typed_response_settles_request() {
        let (handler, tracker) = handler();
        let ticket = tracker
            .try_create_request("modify_asset", Duration::from_secs(5))
            .expect("capacity");

        let text = json!({
            "type": "automation_response",
            "requestId": ticket.request_id.to_string(),
            "success": false,
            "error": {"code": "ASSET_LOCKED"}
        })
        .to_string();
        handler.handle_message(Frame::decode(&text).expect("decode"));

        let response = tokio::time::timeout(Duration::from_millis(200), ticket.response)
            .await
            .expect("settled without waiting for the deadline")
            .expect("response");
        assert!(!response.is_success());
        assert_eq!(response.error.as_deref(), Some("ASSET_LOCKED"));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_ping_is_answered_with_nonce() {
        let (handler, _tracker) = handler();
        let reply = handler.handle_message(Frame::BridgePing(Liveness {
            nonce: Some(json!("n-1")),
            ..Default::default()
        }));

        match reply {
            Some(Frame::BridgePong(pong)) => {
                assert_eq!(pong.nonce, Some(json!("n-1")));
                assert_eq!(pong.session_id.as_deref(), Some("session-1"));
            }
            other => panic!("expected pong, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unmatched_frames_are_ignored() {
        let (handler, tracker) = handler();
        assert!(handler.handle_message(Frame::AutomationResponse(AutomationResponse::default())).is_none());
        assert!(
            handler
                .handle_message(Frame::Unknown {
                    kind: "telemetry".into(),
                    raw: json!({})
                })
                .is_none()
        );
        assert!(handler.handle_message(Frame::BridgeHeartbeat(Liveness::default())).is_none());
        assert_eq!(tracker.pending_count(), 0);
    }
}

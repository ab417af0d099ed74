//! Wire frames exchanged with the remote automation listener.
//!
//! Every frame is a JSON text message with a `type` discriminator. Frames are
//! decoded into the [`Frame`] sum type; a discriminator this crate does not
//! know becomes [`Frame::Unknown`] instead of an error, so newer remotes can
//! add frame kinds without breaking older bridges.
//!
//! # Format
//!
//! ```json
//! { "type": "automation_request", "requestId": "uuid", "action": "list_assets", "payload": { ... } }
//! { "type": "automation_response", "requestId": "uuid", "success": true, "result": { ... } }
//! ```

// ============================================================================
// Imports
// ============================================================================

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

// ============================================================================
// Constants
// ============================================================================

/// Error code carried by `bridge_error` when the capability token is wrong.
pub const INVALID_CAPABILITY_TOKEN: &str = "INVALID_CAPABILITY_TOKEN";

/// Protocol version assumed when the remote does not declare one.
pub const DEFAULT_PROTOCOL_VERSION: u32 = 1;

/// Discriminators decoded into typed variants.
const KNOWN_KINDS: &[&str] = &[
    "bridge_hello",
    "bridge_ack",
    "bridge_error",
    "automation_request",
    "automation_response",
    "automation_event",
    "progress_update",
    "bridge_heartbeat",
    "bridge_ping",
    "bridge_pong",
    "bridge_shutdown",
    "bridge_goodbye",
];

/// Returns the current time as an RFC 3339 timestamp with millisecond precision.
#[must_use]
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ============================================================================
// Frame
// ============================================================================

/// A decoded wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Handshake opener, bridge → remote.
    BridgeHello(BridgeHello),
    /// Handshake acceptance, remote → bridge.
    BridgeAck(BridgeAck),
    /// Handshake or protocol rejection.
    BridgeError(BridgeError),
    /// Action request, bridge → remote.
    AutomationRequest(AutomationRequest),
    /// Action result, remote → bridge.
    AutomationResponse(AutomationResponse),
    /// Deferred completion notice for a long-running action.
    AutomationEvent(AutomationEvent),
    /// Keep-alive for a request that is still being processed.
    ProgressUpdate(ProgressUpdate),
    /// Periodic liveness notice.
    BridgeHeartbeat(Liveness),
    /// Liveness probe; answered with `bridge_pong`.
    BridgePing(Liveness),
    /// Liveness probe reply.
    BridgePong(Liveness),
    /// Bridge-initiated shutdown notice.
    BridgeShutdown(Farewell),
    /// Remote-initiated shutdown notice.
    BridgeGoodbye(Farewell),
    /// Frame with a discriminator this crate does not handle.
    #[serde(skip)]
    Unknown {
        /// The unrecognized `type` value.
        kind: String,
        /// The raw frame.
        raw: Value,
    },
}

impl Frame {
    /// Decodes a text frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the text is not JSON
    /// - [`Error::Protocol`] if the `type` field is missing or a known frame
    ///   kind is malformed. Response, event and progress frames are read
    ///   leniently instead.
    pub fn decode(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| Error::protocol("frame has no `type` discriminator"))?;

        if !KNOWN_KINDS.contains(&kind.as_str()) {
            return Ok(Self::Unknown { kind, raw: value });
        }

        match Self::deserialize(&value) {
            Ok(frame) => Ok(frame),
            // Request-bearing frames settle their request even when a field
            // has an unexpected shape, so the caller is not left waiting.
            Err(_) if kind == "automation_response" => {
                Ok(Self::AutomationResponse(AutomationResponse::from_loose(value)))
            }
            Err(_) if kind == "automation_event" => Ok(Self::AutomationEvent(AutomationEvent::from_loose(value))),
            Err(_) if kind == "progress_update" => Ok(Self::ProgressUpdate(ProgressUpdate::from_loose(value))),
            Err(e) => Err(Error::protocol(format!("malformed {kind} frame: {e}"))),
        }
    }

    /// Encodes the frame as JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for [`Frame::Unknown`], which is never sent.
    pub fn encode(&self) -> Result<String> {
        if let Self::Unknown { kind, .. } = self {
            return Err(Error::protocol(format!("cannot encode unknown frame `{kind}`")));
        }
        Ok(serde_json::to_string(self)?)
    }

    /// Returns the `type` discriminator.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::BridgeHello(_) => "bridge_hello",
            Self::BridgeAck(_) => "bridge_ack",
            Self::BridgeError(_) => "bridge_error",
            Self::AutomationRequest(_) => "automation_request",
            Self::AutomationResponse(_) => "automation_response",
            Self::AutomationEvent(_) => "automation_event",
            Self::ProgressUpdate(_) => "progress_update",
            Self::BridgeHeartbeat(_) => "bridge_heartbeat",
            Self::BridgePing(_) => "bridge_ping",
            Self::BridgePong(_) => "bridge_pong",
            Self::BridgeShutdown(_) => "bridge_shutdown",
            Self::BridgeGoodbye(_) => "bridge_goodbye",
            Self::Unknown { kind, .. } => kind,
        }
    }
}

// ============================================================================
// Handshake Frames
// ============================================================================

/// `bridge_hello` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeHello {
    /// Protocol version the bridge speaks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<u32>,

    /// Shared secret, when configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_token: Option<String>,

    /// Client name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,

    /// Client version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_version: Option<String>,

    /// Additional client metadata.
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// `bridge_ack` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeAck {
    /// Greeting text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Remote server name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,

    /// Remote server version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,

    /// Session ID assigned by the remote.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Declared protocol version; number or numeric string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<Value>,

    /// Opcodes the remote accepts.
    #[serde(default)]
    pub supported_opcodes: Vec<String>,

    /// Opcodes the remote answers with.
    #[serde(default)]
    pub expected_response_opcodes: Vec<String>,

    /// Advertised capabilities.
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Heartbeat interval the remote expects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_ms: Option<u64>,

    /// Token echoed by the remote, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_token: Option<String>,

    /// Fields not modelled above, including advisory ones such as
    /// `availablePorts` whose shape varies between remotes.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BridgeAck {
    /// Returns the advertised `activePort`, accepting a number or numeric string.
    #[must_use]
    pub fn active_port(&self) -> Option<u16> {
        match self.extra.get("activePort")? {
            Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns the negotiated protocol version, defaulting to `1`.
    #[must_use]
    pub fn protocol_version(&self) -> u32 {
        match &self.protocol_version {
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(DEFAULT_PROTOCOL_VERSION),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(DEFAULT_PROTOCOL_VERSION),
            _ => DEFAULT_PROTOCOL_VERSION,
        }
    }
}

/// `bridge_error` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeError {
    /// Error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BridgeError {
    /// Creates the capability-token rejection frame.
    #[must_use]
    pub fn invalid_token() -> Self {
        Self {
            error: Some(INVALID_CAPABILITY_TOKEN.to_string()),
            message: None,
        }
    }

    /// Returns `true` if this reports a capability-token mismatch.
    #[must_use]
    pub fn is_invalid_token(&self) -> bool {
        self.error.as_deref() == Some(INVALID_CAPABILITY_TOKEN)
    }
}

// ============================================================================
// Request / Response Frames
// ============================================================================

/// `automation_request` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationRequest {
    /// Correlation ID.
    pub request_id: RequestId,

    /// Action name.
    pub action: String,

    /// Action parameters.
    pub payload: Value,
}

/// `automation_response` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationResponse {
    /// Correlation ID; a response without one cannot be matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Whether the action succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,

    /// Human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Result data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Action echoed by the remote.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AutomationResponse {
    /// Returns `true` if the remote reported success.
    ///
    /// A response without a `success` flag counts as successful unless it
    /// carries an error code.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.success.unwrap_or(self.error.is_none())
    }

    /// Returns the action echoed at top level or inside `result`.
    #[must_use]
    pub fn echoed_action(&self) -> Option<&str> {
        self.action.as_deref().filter(|a| !a.is_empty()).or_else(|| {
            self.result
                .as_ref()
                .and_then(|r| r.get("action"))
                .and_then(Value::as_str)
                .filter(|a| !a.is_empty())
        })
    }

    /// Builds a response from a frame whose fields did not all match their
    /// expected types. Fields that cannot be read are dropped; an object
    /// `error` contributes its `code` when present.
    pub(crate) fn from_loose(value: Value) -> Self {
        let Value::Object(mut map) = value else {
            return Self::default();
        };
        map.remove("type");

        let error = map.remove("error").and_then(|error| {
            let code = error.get("code").and_then(Value::as_str).map(str::to_owned);
            code.or_else(|| loose_string(Some(error)))
        });

        Self {
            request_id: loose_string(map.remove("requestId")),
            success: map.remove("success").and_then(|v| v.as_bool()),
            message: loose_string(map.remove("message")),
            error,
            result: map.remove("result").filter(|v| !v.is_null()),
            action: map.remove("action").and_then(|v| v.as_str().map(str::to_owned)),
            extra: map,
        }
    }

    /// Extracts the result value, returning error if the remote reported failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the response was not successful.
    pub fn into_result(self) -> Result<Value> {
        if self.is_success() {
            return Ok(self.result.unwrap_or(Value::Null));
        }
        let code = self.error.unwrap_or_else(|| "UNKNOWN_ERROR".to_string());
        let message = self.message.unwrap_or_else(|| code.clone());
        Err(Error::remote(code, message))
    }
}

/// `automation_event` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationEvent {
    /// Request this event completes, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Event name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    /// Event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Completion result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AutomationEvent {
    pub(crate) fn from_loose(value: Value) -> Self {
        let Value::Object(mut map) = value else {
            return Self::default();
        };
        Self {
            request_id: loose_string(map.remove("requestId")),
            event: map.remove("event").and_then(|v| v.as_str().map(str::to_owned)),
            payload: map.remove("payload").filter(|v| !v.is_null()),
            result: map.remove("result").filter(|v| !v.is_null()),
            message: loose_string(map.remove("message")),
        }
    }

    /// Builds the response this event stands in for.
    #[must_use]
    pub fn into_response(self) -> AutomationResponse {
        let result_field = |key: &str| {
            self.result
                .as_ref()
                .and_then(|r| r.get(key))
                .cloned()
        };

        let success = result_field("success").and_then(|v| v.as_bool());
        let message = result_field("message")
            .and_then(|v| v.as_str().map(str::to_owned))
            .or_else(|| self.message.clone())
            .or_else(|| self.event.clone());
        let error = result_field("error").and_then(|v| v.as_str().map(str::to_owned));

        AutomationResponse {
            request_id: self.request_id,
            success,
            message,
            error,
            result: self.result.or(self.payload),
            action: None,
            extra: Map::new(),
        }
    }
}

/// `progress_update` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    /// Request still being processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Completion percentage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,

    /// Progress message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Remote timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// `false` once the remote has finished working.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub still_working: Option<bool>,
}

impl ProgressUpdate {
    pub(crate) fn from_loose(value: Value) -> Self {
        let Value::Object(mut map) = value else {
            return Self::default();
        };
        Self {
            request_id: loose_string(map.remove("requestId")),
            percent: map.remove("percent").and_then(|v| v.as_f64()),
            message: loose_string(map.remove("message")),
            timestamp: loose_string(map.remove("timestamp")),
            still_working: map.remove("stillWorking").and_then(|v| v.as_bool()),
        }
    }
}

/// Reads a field as text, rendering non-string values as JSON.
fn loose_string(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

// ============================================================================
// Liveness / Shutdown Frames
// ============================================================================

/// Payload of `bridge_heartbeat`, `bridge_ping` and `bridge_pong`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Liveness {
    /// Session ID of the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Send time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Opaque value echoed verbatim in a pong.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<Value>,
}

impl Liveness {
    /// Creates a liveness payload stamped with the current time.
    #[must_use]
    pub fn now(session_id: Option<String>) -> Self {
        Self {
            session_id,
            timestamp: Some(timestamp_now()),
            nonce: None,
        }
    }
}

/// Payload of `bridge_shutdown` and `bridge_goodbye`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Farewell {
    /// Why the sender is leaving.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Send time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Farewell {
    /// Creates a farewell stamped with the current time.
    #[must_use]
    pub fn now(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            timestamp: Some(timestamp_now()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_decode_ack_keeps_unmodelled_fields() {
        let text = json!({
            "type": "bridge_ack",
            "serverName": "editor",
            "sessionId": "s-1",
            "protocolVersion": 2,
            "capabilities": ["python"],
            "concurrentConnections": 1
        })
        .to_string();

        let Frame::BridgeAck(ack) = Frame::decode(&text).expect("decode") else {
            panic!("expected bridge_ack");
        };
        assert_eq!(ack.server_name.as_deref(), Some("editor"));
        assert_eq!(ack.protocol_version(), 2);
        assert_eq!(ack.capabilities, vec!["python".to_string()]);
        assert_eq!(ack.extra.get("concurrentConnections"), Some(&json!(1)));
    }

    #[test]
    fn test_ack_protocol_version_defaults_and_accepts_strings() {
        let mut ack = BridgeAck::default();
        assert_eq!(ack.protocol_version(), DEFAULT_PROTOCOL_VERSION);

        ack.protocol_version = Some(json!("3"));
        assert_eq!(ack.protocol_version(), 3);

        ack.protocol_version = Some(json!({"weird": true}));
        assert_eq!(ack.protocol_version(), DEFAULT_PROTOCOL_VERSION);
    }

    #[test]
    fn test_decode_unknown_kind_is_not_an_error() {
        let frame = Frame::decode(r#"{"type":"editor_telemetry","fps":60}"#).expect("decode");
        match frame {
            Frame::Unknown { kind, raw } => {
                assert_eq!(kind, "editor_telemetry");
                assert_eq!(raw["fps"], 60);
            }
            other => panic!("expected unknown, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_invalid_json_is_json_error() {
        assert!(matches!(Frame::decode("{not json"), Err(Error::Json(_))));
    }

    #[test]
    fn test_decode_missing_type_is_protocol_error() {
        assert!(matches!(Frame::decode(r#"{"requestId":"x"}"#), Err(Error::Protocol { .. })));
    }

    #[test]
    fn test_response_without_request_id_decodes() {
        let frame = Frame::decode(r#"{"type":"automation_response","success":true}"#).expect("decode");
        let Frame::AutomationResponse(response) = frame else {
            panic!("expected response");
        };
        assert!(response.request_id.is_none());
        assert!(response.is_success());
    }

    #[test]
    fn test_response_with_object_error_still_decodes() {
        let text = json!({
            "type": "automation_response",
            "requestId": "req-7",
            "success": false,
            "error": {"code": "ASSET_LOCKED", "detail": "checked out"},
            "message": "Cannot modify asset"
        })
        .to_string();

        let Frame::AutomationResponse(response) = Frame::decode(&text).expect("decode") else {
            panic!("expected response");
        };
        assert_eq!(response.request_id.as_deref(), Some("req-7"));
        assert!(!response.is_success());
        assert_eq!(response.error.as_deref(), Some("ASSET_LOCKED"));
        assert!(matches!(
            response.into_result(),
            Err(Error::Remote { code, .. }) if code == "ASSET_LOCKED"
        ));
    }

    #[test]
    fn test_loose_response_keeps_readable_fields() {
        let text = json!({
            "type": "automation_response",
            "requestId": "req-8",
            "success": "yes",
            "message": 42,
            "result": {"x": 1},
            "elapsedMs": 12
        })
        .to_string();

        let Frame::AutomationResponse(response) = Frame::decode(&text).expect("decode") else {
            panic!("expected response");
        };
        assert_eq!(response.request_id.as_deref(), Some("req-8"));
        assert_eq!(response.success, None);
        assert_eq!(response.message.as_deref(), Some("42"));
        assert_eq!(response.result, Some(json!({"x": 1})));
        assert_eq!(response.extra.get("elapsedMs"), Some(&json!(12)));
    }

    #[test]
    fn test_loose_progress_update_keeps_request_id() {
        let text = r#"{"type":"progress_update","requestId":"req-9","percent":"half","stillWorking":false}"#;
        let Frame::ProgressUpdate(update) = Frame::decode(text).expect("decode") else {
            panic!("expected progress update");
        };
        assert_eq!(update.request_id.as_deref(), Some("req-9"));
        assert_eq!(update.percent, None);
        assert_eq!(update.still_working, Some(false));
    }

    #[test]
    fn test_malformed_ack_is_still_a_protocol_error() {
        let text = r#"{"type":"bridge_ack","capabilities":"python"}"#;
        assert!(matches!(Frame::decode(text), Err(Error::Protocol { .. })));
    }

    #[test]
    fn test_ack_tolerates_advisory_field_shapes() {
        let text = json!({
            "type": "bridge_ack",
            "sessionId": "s-2",
            "availablePorts": null,
            "activePort": "8091",
            "maxPendingRequests": "many",
            "supportedProtocols": "bridge-v1",
            "protocol": 3
        })
        .to_string();

        let Frame::BridgeAck(ack) = Frame::decode(&text).expect("decode") else {
            panic!("expected bridge_ack");
        };
        assert_eq!(ack.session_id.as_deref(), Some("s-2"));
        assert_eq!(ack.active_port(), Some(8091));
        assert_eq!(ack.extra.get("availablePorts"), Some(&Value::Null));
    }

    #[test]
    fn test_request_encodes_with_camel_case_fields() {
        let id = RequestId::generate();
        let frame = Frame::AutomationRequest(AutomationRequest {
            request_id: id,
            action: "echo".into(),
            payload: json!({"x": 1}),
        });
        let value: Value = serde_json::from_str(&frame.encode().expect("encode")).expect("json");
        assert_eq!(value["type"], "automation_request");
        assert_eq!(value["requestId"], id.to_string());
        assert_eq!(value["payload"]["x"], 1);
    }

    #[test]
    fn test_pong_echoes_nonce_and_omits_absent_fields() {
        let pong = Frame::BridgePong(Liveness {
            session_id: None,
            timestamp: None,
            nonce: Some(json!({"n": 7})),
        });
        let value: Value = serde_json::from_str(&pong.encode().expect("encode")).expect("json");
        assert_eq!(value, json!({"type": "bridge_pong", "nonce": {"n": 7}}));
    }

    #[test]
    fn test_unknown_frame_cannot_be_encoded() {
        let frame = Frame::Unknown {
            kind: "x".into(),
            raw: Value::Null,
        };
        assert!(frame.encode().is_err());
        assert_eq!(frame.kind(), "x");
    }

    #[test]
    fn test_into_result_maps_failure_to_remote_error() {
        let response = AutomationResponse {
            success: Some(false),
            error: Some("ASSET_NOT_FOUND".into()),
            message: Some("no such asset".into()),
            ..Default::default()
        };
        match response.into_result() {
            Err(Error::Remote { code, message }) => {
                assert_eq!(code, "ASSET_NOT_FOUND");
                assert_eq!(message, "no such asset");
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[test]
    fn test_echoed_action_falls_back_to_result() {
        let response = AutomationResponse {
            result: Some(json!({"action": "list_assets"})),
            ..Default::default()
        };
        assert_eq!(response.echoed_action(), Some("list_assets"));
    }

    #[test]
    fn test_event_converts_to_response() {
        let event = AutomationEvent {
            request_id: Some("abc".into()),
            event: Some("modify_scs_complete".into()),
            result: Some(json!({"success": true, "message": "applied"})),
            ..Default::default()
        };
        let response = event.into_response();
        assert_eq!(response.request_id.as_deref(), Some("abc"));
        assert_eq!(response.success, Some(true));
        assert_eq!(response.message.as_deref(), Some("applied"));
    }

    #[test]
    fn test_bridge_error_token_detection() {
        assert!(BridgeError::invalid_token().is_invalid_token());
        assert!(!BridgeError::default().is_invalid_token());
    }
}

//! Bridge handshake.
//!
//! Runs on a freshly opened socket before its event loop starts:
//!
//! 1. Send `bridge_hello` with protocol version, client metadata and token
//! 2. Wait for the first text frame within the handshake window
//! 3. Accept `bridge_ack`, or close the socket with a specific code
//!
//! | Outcome | Close code | Failure |
//! |---------|------------|---------|
//! | No frame in time | 4002 | `timeout` |
//! | First frame not JSON | 4003 | `invalid-json` |
//! | `bridge_error INVALID_CAPABILITY_TOKEN` | 4005 | `invalid-token` |
//! | Ack echoes a different token | 4005 | `invalid-token` |
//! | Any other first frame | 4004 | `invalid-handshake` |
//! | Socket closed first | none | `closed` |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::{Error, HandshakeFailure, Result};
use crate::protocol::{
    BridgeAck, BridgeError, BridgeHello, DEFAULT_PROTOCOL_VERSION, Frame, close_code,
};

// ============================================================================
// Constants
// ============================================================================

/// Replacement for secrets in recorded metadata.
const REDACTED: &str = "REDACTED";

// ============================================================================
// HandshakeResult
// ============================================================================

/// What the remote told us in its `bridge_ack`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResult {
    /// Sanitized ack fields; the capability token is redacted.
    pub metadata: Map<String, Value>,
    /// Negotiated protocol version.
    pub protocol_version: u32,
    /// Session ID assigned by the remote.
    pub session_id: Option<String>,
    /// Remote server name.
    pub server_name: Option<String>,
    /// Remote server version.
    pub server_version: Option<String>,
    /// Advertised capabilities.
    pub capabilities: Vec<String>,
    /// Opcodes the remote accepts.
    pub supported_opcodes: Vec<String>,
    /// Opcodes the remote answers with.
    pub expected_response_opcodes: Vec<String>,
}

impl HandshakeResult {
    fn from_ack(ack: BridgeAck) -> Self {
        let mut metadata = match serde_json::to_value(&ack) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        metadata.remove("type");
        if metadata.contains_key("capabilityToken") {
            metadata.insert("capabilityToken".into(), Value::String(REDACTED.into()));
        }

        Self {
            metadata,
            protocol_version: ack.protocol_version(),
            session_id: ack.session_id,
            server_name: ack.server_name,
            server_version: ack.server_version,
            capabilities: ack.capabilities,
            supported_opcodes: ack.supported_opcodes,
            expected_response_opcodes: ack.expected_response_opcodes,
        }
    }
}

// ============================================================================
// HandshakeHandler
// ============================================================================

/// Performs the bridge handshake on new sockets.
#[derive(Debug, Clone)]
pub struct HandshakeHandler {
    capability_token: Option<String>,
    client_name: String,
    client_version: String,
    timeout: Duration,
}

impl HandshakeHandler {
    /// Creates a handler.
    #[must_use]
    pub fn new(
        capability_token: Option<String>,
        client_name: impl Into<String>,
        client_version: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            capability_token,
            client_name: client_name.into(),
            client_version: client_version.into(),
            timeout,
        }
    }

    /// Creates a handler from bridge configuration.
    #[must_use]
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            config.capability_token.clone(),
            config.client_name.clone(),
            config.client_version.clone(),
            config.handshake_timeout,
        )
    }

    /// Runs the handshake on `ws`.
    ///
    /// On failure the socket has already been closed with the matching code.
    ///
    /// # Errors
    ///
    /// - [`Error::Handshake`] with the [`HandshakeFailure`] reason
    /// - [`Error::WebSocket`] if the socket fails mid-handshake
    pub async fn initiate_handshake<S>(&self, ws: &mut WebSocketStream<S>) -> Result<HandshakeResult>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match timeout(self.timeout, self.exchange(ws)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Automation bridge handshake timed out"
                );
                close(ws, close_code::HANDSHAKE_TIMEOUT, "Handshake timeout").await;
                Err(Error::handshake(HandshakeFailure::Timeout))
            }
        }
    }

    async fn exchange<S>(&self, ws: &mut WebSocketStream<S>) -> Result<HandshakeResult>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let hello = Frame::BridgeHello(BridgeHello {
            protocol_version: Some(DEFAULT_PROTOCOL_VERSION),
            capability_token: self.capability_token.clone(),
            client_name: Some(self.client_name.clone()),
            client_version: Some(self.client_version.clone()),
            metadata: Map::new(),
        });
        ws.send(Message::Text(hello.encode()?.into())).await?;
        debug!("bridge_hello sent");

        loop {
            let text = match ws.next().await {
                Some(Ok(Message::Text(text))) => text.to_string(),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => text,
                    Err(_) => {
                        return self
                            .reject(ws, HandshakeFailure::InvalidJson, close_code::INVALID_PAYLOAD, None)
                            .await;
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    warn!("Automation bridge socket closed before handshake completed");
                    return Err(Error::handshake(HandshakeFailure::Closed));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            };

            return self.evaluate(ws, &text).await;
        }
    }

    async fn evaluate<S>(&self, ws: &mut WebSocketStream<S>, text: &str) -> Result<HandshakeResult>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(Error::Json(e)) => {
                warn!(error = %e, "Handshake frame is not JSON");
                return self
                    .reject(ws, HandshakeFailure::InvalidJson, close_code::INVALID_PAYLOAD, None)
                    .await;
            }
            Err(e) => {
                warn!(error = %e, "Handshake frame is malformed");
                return self
                    .reject(ws, HandshakeFailure::InvalidHandshake, close_code::INVALID_HANDSHAKE, None)
                    .await;
            }
        };

        match frame {
            Frame::BridgeAck(ack) => {
                if let (Some(expected), Some(echoed)) = (&self.capability_token, &ack.capability_token)
                    && expected != echoed
                {
                    warn!("bridge_ack echoed a different capability token");
                    return self
                        .reject(
                            ws,
                            HandshakeFailure::InvalidToken,
                            close_code::INVALID_TOKEN,
                            Some(Frame::BridgeError(BridgeError::invalid_token())),
                        )
                        .await;
                }

                let result = HandshakeResult::from_ack(ack);
                info!(
                    protocol_version = result.protocol_version,
                    session_id = ?result.session_id,
                    server = ?result.server_name,
                    "Automation bridge handshake complete"
                );
                Ok(result)
            }

            Frame::BridgeError(error) if error.is_invalid_token() => {
                warn!("Remote rejected the capability token");
                self.reject(ws, HandshakeFailure::InvalidToken, close_code::INVALID_TOKEN, None)
                    .await
            }

            other => {
                warn!(kind = other.kind(), "Expected bridge_ack handshake frame");
                self.reject(ws, HandshakeFailure::InvalidHandshake, close_code::INVALID_HANDSHAKE, None)
                    .await
            }
        }
    }

    async fn reject<S>(
        &self,
        ws: &mut WebSocketStream<S>,
        reason: HandshakeFailure,
        code: u16,
        notice: Option<Frame>,
    ) -> Result<HandshakeResult>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if let Some(notice) = notice
            && let Ok(text) = notice.encode()
        {
            let _ = ws.send(Message::Text(text.into())).await;
        }

        let close_reason = match reason {
            HandshakeFailure::InvalidJson => "Invalid JSON payload",
            HandshakeFailure::InvalidToken => "Invalid capability token",
            HandshakeFailure::Timeout => "Handshake timeout",
            HandshakeFailure::InvalidHandshake | HandshakeFailure::Closed => "Expected bridge_ack handshake",
        };
        close(ws, code, close_reason).await;
        Err(Error::handshake(reason))
    }
}

/// Sends a close frame, ignoring write errors.
async fn close<S>(ws: &mut WebSocketStream<S>, code: u16, reason: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_string().into(),
    };
    if let Err(e) = ws.close(Some(frame)).await {
        debug!(error = %e, code, "Close during handshake failed");
    }
}

// ============================================================================
// Tests
// ============================================================================

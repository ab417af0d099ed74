//! WebSocket connection and event loop.
//!
//! This module owns one WebSocket to the remote listener after its handshake
//! has completed.
//!
//! # Event Loop
//!
//! [`ConnectionLoop::spawn`] starts a tokio task that handles:
//!
//! - Incoming text frames, handed to a [`ConnectionObserver`]
//! - Outgoing frames and close requests from [`Connection`] handles
//! - Reporting how the socket ended, exactly once
//!
//! A [`Connection`] is created before its loop is started so it can be
//! registered with the [`ConnectionManager`](super::ConnectionManager) before
//! any close notification can arrive.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::{Frame, close_code};

// ============================================================================
// Types
// ============================================================================

/// WebSocket stream produced by a client connect.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Receives traffic and lifecycle notifications from a connection loop.
pub trait ConnectionObserver: Send + Sync + 'static {
    /// Called for each inbound text frame.
    ///
    /// Return `Some(text)` to write a reply on the same connection.
    fn on_frame(&self, connection_id: ConnectionId, text: &str) -> Option<String>;

    /// Called once when the connection loop ends.
    fn on_close(&self, connection_id: ConnectionId, close: CloseInfo);
}

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason.
    pub reason: String,
    /// `true` if this side initiated the close.
    pub local: bool,
}

impl CloseInfo {
    fn remote(frame: Option<CloseFrame>) -> Self {
        match frame {
            Some(frame) => Self {
                code: u16::from(frame.code),
                reason: frame.reason.to_string(),
                local: false,
            },
            None => Self {
                code: close_code::NO_STATUS,
                reason: String::new(),
                local: false,
            },
        }
    }

    fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: close_code::ABNORMAL,
            reason: reason.into(),
            local: false,
        }
    }
}

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write a text frame and report the outcome.
    Send {
        text: String,
        result_tx: oneshot::Sender<Result<()>>,
    },
    /// Send a close frame and end the loop.
    Close { code: u16, reason: String },
}

// ============================================================================
// Connection
// ============================================================================

/// Handle to a live WebSocket connection.
///
/// Cheap to clone; all clones feed the same event loop.
#[derive(Clone)]
pub struct Connection {
    /// Connection identifier.
    id: ConnectionId,
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Cleared when the event loop ends.
    open: Arc<AtomicBool>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Connection {
    /// Creates a connection handle and the loop that will drive it.
    #[must_use]
    pub fn new(id: ConnectionId) -> (Self, ConnectionLoop) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let connection = Self {
            id,
            command_tx,
            open: Arc::clone(&open),
        };
        let event_loop = ConnectionLoop {
            id,
            command_rx,
            open,
        };

        (connection, event_loop)
    }

    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns `true` until the event loop has ended.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.command_tx.is_closed()
    }

    /// Writes a text frame.
    ///
    /// Frames are written in the order this method is called.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the loop has ended
    /// - [`Error::SendFailed`] if the socket write fails
    pub async fn send_text(&self, text: String) -> Result<()> {
        let (result_tx, result_rx) = oneshot::channel();

        self.command_tx
            .send(ConnectionCommand::Send { text, result_tx })
            .map_err(|_| Error::connection_closed("connection loop ended"))?;

        result_rx
            .await
            .map_err(|_| Error::connection_closed("connection loop ended"))?
    }

    /// Encodes and writes a frame.
    ///
    /// # Errors
    ///
    /// See [`Connection::send_text`]; also fails if the frame cannot be encoded.
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.send_text(frame.encode()?).await
    }

    /// Requests a close with the given code. Does not wait.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.command_tx.send(ConnectionCommand::Close {
            code,
            reason: reason.into(),
        });
    }
}

// ============================================================================
// ConnectionLoop
// ============================================================================

/// Event loop for one connection, not yet started.
pub struct ConnectionLoop {
    id: ConnectionId,
    command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    open: Arc<AtomicBool>,
}

impl ConnectionLoop {
    /// Starts the event loop on `ws`.
    pub fn spawn<S>(
        self,
        ws: WebSocketStream<S>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        tokio::spawn(self.run(ws, observer))
    }

    /// Event loop that handles WebSocket I/O.
    async fn run<S>(mut self, ws: WebSocketStream<S>, observer: Arc<dyn ConnectionObserver>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws.split();
        let id = self.id;

        let close = loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(reply) = observer.on_frame(id, &text)
                                && let Err(e) = ws_write.send(Message::Text(reply.into())).await
                            {
                                warn!(connection_id = %id, error = %e, "Failed to send reply");
                            }
                        }

                        Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                            Ok(text) => {
                                if let Some(reply) = observer.on_frame(id, text)
                                    && let Err(e) = ws_write.send(Message::Text(reply.into())).await
                                {
                                    warn!(connection_id = %id, error = %e, "Failed to send reply");
                                }
                            }
                            Err(_) => warn!(connection_id = %id, "Ignoring non-UTF-8 binary frame"),
                        },

                        Some(Ok(Message::Close(frame))) => {
                            debug!(connection_id = %id, "WebSocket closed by remote");
                            break CloseInfo::remote(frame);
                        }

                        Some(Err(e)) => {
                            warn!(connection_id = %id, error = %e, "WebSocket error");
                            break CloseInfo::abnormal(e.to_string());
                        }

                        None => {
                            debug!(connection_id = %id, "WebSocket stream ended");
                            break CloseInfo::abnormal("stream ended");
                        }

                        // Ping/Pong are answered by tungstenite
                        _ => {}
                    }
                }

                command = self.command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send { text, result_tx }) => {
                            let result = ws_write
                                .send(Message::Text(text.into()))
                                .await
                                .map_err(|e| Error::send_failed(e.to_string()));
                            if result.is_ok() {
                                trace!(connection_id = %id, "Frame sent");
                            }
                            let _ = result_tx.send(result);
                        }

                        Some(ConnectionCommand::Close { code, reason }) => {
                            debug!(connection_id = %id, code, %reason, "Closing connection");
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.clone().into(),
                            };
                            let _ = ws_write.send(Message::Close(Some(frame))).await;
                            break CloseInfo { code, reason, local: true };
                        }

                        None => {
                            debug!(connection_id = %id, "Command channel closed");
                            let _ = ws_write.close().await;
                            break CloseInfo {
                                code: close_code::NORMAL,
                                reason: "connection dropped".to_string(),
                                local: true,
                            };
                        }
                    }
                }
            }
        };

        self.open.store(false, Ordering::SeqCst);
        Self::fail_queued_sends(&mut self.command_rx);

        debug!(connection_id = %id, code = close.code, reason = %close.reason, "Event loop terminated");
        observer.on_close(id, close);
    }

    /// Fails writes that were queued behind the final command.
    fn fail_queued_sends(command_rx: &mut mpsc::UnboundedReceiver<ConnectionCommand>) {
        command_rx.close();
        while let Ok(command) = command_rx.try_recv() {
            if let ConnectionCommand::Send { result_tx, .. } = command {
                let _ = result_tx.send(Err(Error::connection_closed("connection loop ended")));
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

    use parking_lot::Mutex;
    use tokio::io::{DuplexStream, duplex};
    use tokio::sync::Notify;
    use tokio_tungstenite::tungstenite::protocol::Role;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<String>>,
        closes: Mutex<Vec<CloseInfo>>,
        closed: Notify,
    }

    impl ConnectionObserver for Recorder {
        fn on_frame(&self, _connection_id: ConnectionId, text: &str) -> Option<String> {
            self.frames.lock().push(text.to_string());
            (text == "ping").then(|| "pong".to_string())
        }

        fn on_close(&self, _connection_id: ConnectionId, close: CloseInfo) {
            self.closes.lock().push(close);
            self.closed.notify_one();
        }
    }

    async fn pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (a, b) = duplex(64 * 1024);
        let local = WebSocketStream::from_raw_socket(a, Role::Client, None).await;
        let remote = WebSocketStream::from_raw_socket(b, Role::Server, None).await;
        (local, remote)
    }

    #[tokio::test]
    async fn test_send_and_reply() {
        let (local, mut remote) = pair().await;
        let recorder = Arc::new(Recorder::default());
        let (connection, event_loop) = Connection::new(ConnectionId::generate());
        event_loop.spawn(local, recorder.clone());

        connection.send_text("hello".into()).await.expect("send");
        let received = remote.next().await.expect("frame").expect("ok");
        assert_eq!(received.into_text().expect("text").as_str(), "hello");

        remote.send(Message::Text("ping".into())).await.expect("remote send");
        let reply = remote.next().await.expect("frame").expect("ok");
        assert_eq!(reply.into_text().expect("text").as_str(), "pong");
        assert_eq!(recorder.frames.lock().as_slice(), ["ping".to_string()]);
    }

    #[tokio::test]
    async fn test_remote_close_reported_once() {
        let (local, mut remote) = pair().await;
        let recorder = Arc::new(Recorder::default());
        let (connection, event_loop) = Connection::new(ConnectionId::generate());
        event_loop.spawn(local, recorder.clone());

        remote
            .close(Some(CloseFrame {
                code: CloseCode::from(4006),
                reason: "bye".into(),
            }))
            .await
            .expect("close");

        recorder.closed.notified().await;
        let closes = recorder.closes.lock().clone();
        assert_eq!(closes.len(), 1);
        assert_eq!(closes[0].code, 4006);
        assert_eq!(closes[0].reason, "bye");
        assert!(!closes[0].local);
        assert!(!connection.is_open());
    }

    #[tokio::test]
    async fn test_close_without_status_reports_1005() {
        let (local, mut remote) = pair().await;
        let recorder = Arc::new(Recorder::default());
        let (connection, event_loop) = Connection::new(ConnectionId::generate());
        event_loop.spawn(local, recorder.clone());

        remote.close(None).await.expect("close");

        recorder.closed.notified().await;
        let closes = recorder.closes.lock().clone();
        assert_eq!(closes.len(), 1);
        assert_eq!(closes[0].code, close_code::NO_STATUS);
        assert!(closes[0].reason.is_empty());
        assert!(!closes[0].local);
        assert!(!connection.is_open());
    }

    #[tokio::test]
    async fn test_local_close_sends_code_and_fails_later_sends() {
        let (local, mut remote) = pair().await;
        let recorder = Arc::new(Recorder::default());
        let (connection, event_loop) = Connection::new(ConnectionId::generate());
        event_loop.spawn(local, recorder.clone());

        connection.close(close_code::GOING_AWAY, "Server shutdown");
        recorder.closed.notified().await;

        match remote.next().await {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), close_code::GOING_AWAY);
            }
            other => panic!("expected close frame, got {other:?}"),
        }

        let result = connection.send_text("late".into()).await;
        assert!(matches!(result, Err(Error::ConnectionClosed { .. })));
        assert!(recorder.closes.lock()[0].local);
    }
}

//! In-process automation listener for tests.
//!
//! Binds `127.0.0.1:0`, accepts bridge connections, answers the handshake
//! and echoes `automation_request` payloads back as results.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing_subscriber::EnvFilter;

use crate::protocol::close_code;

/// Installs a test subscriber once; `RUST_LOG` controls verbosity.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// How the mock answers `automation_request`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Reply {
    /// Echo immediately.
    Now,
    /// Echo after a delay.
    After(Duration),
    /// Never answer.
    Never,
}

#[derive(Debug, Clone)]
pub(crate) struct MockOptions {
    /// Token the hello must carry; mismatch gets `bridge_error`.
    pub expected_token: Option<String>,
    /// Token echoed in the ack.
    pub echo_token: Option<String>,
    /// Delay before sending the ack.
    pub ack_delay: Duration,
    pub reply: Reply,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            expected_token: None,
            echo_token: None,
            ack_delay: Duration::ZERO,
            reply: Reply::Now,
        }
    }
}

#[derive(Default)]
struct Recorded {
    accepted: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    frames: Mutex<Vec<Value>>,
    close_codes: Mutex<Vec<u16>>,
    request_seen: Notify,
    closed: Notify,
    kill: Notify,
}

pub(crate) struct MockRemote {
    port: u16,
    recorded: Arc<Recorded>,
    accept_task: JoinHandle<()>,
}

impl Drop for MockRemote {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl MockRemote {
    pub(crate) async fn spawn(options: MockOptions) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
        let port = listener.local_addr().expect("addr").port();
        let recorded = Arc::new(Recorded::default());

        let state = Arc::clone(&recorded);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, options.clone(), Arc::clone(&state)));
            }
        });

        Self {
            port,
            recorded,
            accept_task,
        }
    }

    /// A port with nothing listening on it.
    pub(crate) async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        listener.local_addr().expect("addr").port()
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn accepted(&self) -> usize {
        self.recorded.accepted.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.recorded.max_in_flight.load(Ordering::SeqCst)
    }

    /// Payloads of `automation_request` frames for `action`, in arrival order.
    pub(crate) fn payloads_for(&self, action: &str) -> Vec<Value> {
        self.recorded
            .frames
            .lock()
            .iter()
            .filter(|f| f["type"] == "automation_request" && f["action"] == action)
            .map(|f| f["payload"].clone())
            .collect()
    }

    pub(crate) fn requests_for(&self, action: &str) -> usize {
        self.payloads_for(action).len()
    }

    /// Waits until `count` requests have arrived.
    pub(crate) async fn wait_for_requests(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notified = self.recorded.request_seen.notified();
                let seen = self
                    .recorded
                    .frames
                    .lock()
                    .iter()
                    .filter(|f| f["type"] == "automation_request")
                    .count();
                if seen >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .expect("requests did not arrive");
    }

    /// Close codes sent by the bridge, after at least one arrived.
    pub(crate) async fn close_codes(&self) -> Vec<u16> {
        self.wait_closed().await;
        self.recorded.close_codes.lock().clone()
    }

    /// `type` of every frame received, after the bridge closed.
    pub(crate) async fn received_kinds(&self) -> Vec<String> {
        self.wait_closed().await;
        self.recorded
            .frames
            .lock()
            .iter()
            .filter_map(|f| f["type"].as_str().map(str::to_owned))
            .collect()
    }

    /// Closes every open connection with 1001.
    pub(crate) fn drop_connections(&self) {
        self.recorded.kill.notify_waiters();
    }

    async fn wait_closed(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notified = self.recorded.closed.notified();
                if !self.recorded.close_codes.lock().is_empty() {
                    return;
                }
                notified.await;
            }
        })
        .await
        .expect("bridge did not close");
    }
}

async fn serve(stream: TcpStream, options: MockOptions, recorded: Arc<Recorded>) {
    let echo_protocol = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let first = request
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string());
        if let Some(protocol) = first
            && let Ok(value) = HeaderValue::from_str(&protocol)
        {
            response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }
        Ok(response)
    };

    let Ok(ws) = accept_hdr_async(stream, echo_protocol).await else {
        return;
    };
    recorded.accepted.fetch_add(1, Ordering::SeqCst);
    let (mut write, mut read) = ws.split();

    let record_close = |frame: Option<CloseFrame>| {
        let code = frame.map_or(close_code::NO_STATUS, |f| u16::from(f.code));
        recorded.close_codes.lock().push(code);
        recorded.closed.notify_waiters();
    };

    // Handshake
    let hello = match read.next().await {
        Some(Ok(Message::Text(text))) => serde_json::from_str::<Value>(&text).unwrap_or(Value::Null),
        _ => return,
    };
    let token_ok = options
        .expected_token
        .as_deref()
        .is_none_or(|expected| hello["capabilityToken"].as_str() == Some(expected));

    if token_ok {
        tokio::time::sleep(options.ack_delay).await;
        let mut ack = json!({
            "type": "bridge_ack",
            "sessionId": "mock-session",
            "protocolVersion": 1,
            "serverName": "mock-remote",
            "supportedOpcodes": ["automation_request"],
        });
        if let Some(token) = &options.echo_token {
            ack["capabilityToken"] = json!(token);
        }
        if write.send(Message::Text(ack.to_string().into())).await.is_err() {
            return;
        }
    } else {
        let error = json!({"type": "bridge_error", "error": "INVALID_CAPABILITY_TOKEN"});
        let _ = write.send(Message::Text(error.to_string().into())).await;
    }

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Value>();

    loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let Ok(frame) = serde_json::from_str::<Value>(&text) else { continue };
                    recorded.frames.lock().push(frame.clone());

                    if frame["type"] != "automation_request" {
                        continue;
                    }
                    let now = recorded.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    recorded.max_in_flight.fetch_max(now, Ordering::SeqCst);
                    recorded.request_seen.notify_waiters();

                    let response = json!({
                        "type": "automation_response",
                        "requestId": frame["requestId"],
                        "success": true,
                        "result": frame["payload"],
                    });
                    match options.reply {
                        Reply::Now => {
                            let _ = reply_tx.send(response);
                        }
                        Reply::After(delay) => {
                            let reply_tx = reply_tx.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                let _ = reply_tx.send(response);
                            });
                        }
                        Reply::Never => {}
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    record_close(frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },

            Some(response) = reply_rx.recv() => {
                recorded.in_flight.fetch_sub(1, Ordering::SeqCst);
                if write.send(Message::Text(response.to_string().into())).await.is_err() {
                    break;
                }
            }

            () = recorded.kill.notified() => {
                let frame = CloseFrame {
                    code: CloseCode::from(close_code::GOING_AWAY),
                    reason: "mock shutting down".into(),
                };
                let _ = write.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }
}

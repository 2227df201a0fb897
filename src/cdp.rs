/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! DevTools protocol transport.
//!
//! Talks to a running browser started with `--remote-debugging-port`:
//! discovers the WebSocket URL over HTTP (`/json/version`, `/json/list`),
//! keeps one socket per connection, correlates replies to callers by
//! request id, and hands out per-tab sessions attached in flatten mode.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::types::CruiseError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<Result<Value, CruiseError>>>>;

// ---------------------------------------------------------------------------
// Endpoint discovery (HTTP side of the protocol)
// ---------------------------------------------------------------------------

/// Identity block served at `/json/version`.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserInfo {
    #[serde(rename = "Browser")]
    pub browser: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
}

/// One open target served at `/json/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct TabInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub tab_type: String,
    #[serde(default)]
    pub title: String,
    pub url: String,
}

/// Fetch the browser identity from a DevTools HTTP endpoint.
pub async fn fetch_version(endpoint: &str) -> Result<BrowserInfo, CruiseError> {
    let url = format!("{}/json/version", endpoint.trim_end_matches('/'));
    debug!("fetching {url}");
    let info = reqwest::get(&url).await?.json::<BrowserInfo>().await?;
    Ok(info)
}

/// Fetch the open targets from a DevTools HTTP endpoint.
pub async fn fetch_tabs(endpoint: &str) -> Result<Vec<TabInfo>, CruiseError> {
    let url = format!("{}/json/list", endpoint.trim_end_matches('/'));
    debug!("fetching {url}");
    let tabs = reqwest::get(&url).await?.json::<Vec<TabInfo>>().await?;
    Ok(tabs)
}

/// Pick the tab a user would call "the page": the first page target,
/// skipping browser UI surfaces. Targets arrive front-most first.
pub fn pick_active_tab(tabs: &[TabInfo]) -> Option<&TabInfo> {
    tabs.iter().find(|tab| {
        tab.tab_type == "page"
            && !tab.url.starts_with("devtools://")
            && !tab.url.starts_with("chrome-extension://")
    })
}

// ---------------------------------------------------------------------------
// Wire frames
// ---------------------------------------------------------------------------

/// Outbound command frame.
#[derive(Debug, Serialize)]
struct CallFrame {
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

/// Inbound frame: a reply when `id` is set, an event when `method` is.
#[derive(Debug, Deserialize)]
struct Frame {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<ErrorFrame>,
    method: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorFrame {
    code: i64,
    message: String,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// One WebSocket connection to a browser's DevTools endpoint.
///
/// A background task owns the receive half of the socket and routes each
/// reply to the caller that sent the matching request. Events are traced
/// and dropped; nothing here subscribes to protocol domains.
pub struct CdpConnection {
    ws_tx: tokio::sync::Mutex<WsSink>,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
    call_timeout: Duration,
    recv_task: tokio::task::JoinHandle<()>,
}

impl CdpConnection {
    /// Connect to a DevTools HTTP endpoint (e.g. `http://localhost:9222`).
    pub async fn connect(endpoint: &str, call_timeout: Duration) -> Result<Self, CruiseError> {
        let version = fetch_version(endpoint).await?;
        debug!("browser: {}", version.browser);
        Self::connect_ws(&version.web_socket_debugger_url, call_timeout).await
    }

    /// Connect straight to a DevTools WebSocket URL, skipping HTTP
    /// discovery.
    pub async fn connect_ws(ws_url: &str, call_timeout: Duration) -> Result<Self, CruiseError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url).await?;
        let (ws_sink, ws_source) = ws_stream.split();

        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
        let recv_task = tokio::spawn(receive_loop(ws_source, pending.clone()));
        debug!("devtools socket open: {ws_url}");

        Ok(Self {
            ws_tx: tokio::sync::Mutex::new(ws_sink),
            pending,
            next_id: AtomicU64::new(1),
            call_timeout,
            recv_task,
        })
    }

    /// Send one command and wait for its reply.
    pub async fn raw_call(
        &self,
        method: &str,
        params: Option<Value>,
        session_id: Option<&str>,
    ) -> Result<Value, CruiseError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = CallFrame {
            id,
            method: method.to_string(),
            params,
            session_id: session_id.map(|s| s.to_string()),
        };
        let text = serde_json::to_string(&frame)?;
        trace!("send: {text}");

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let sent = {
            let mut ws = self.ws_tx.lock().await;
            ws.send(Message::Text(text.into())).await
        };
        if let Err(err) = sent {
            self.pending.lock().remove(&id);
            return Err(err.into());
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CruiseError::ChannelClosed),
            Err(_) => {
                self.pending.lock().remove(&id);
                warn!("{method} timed out");
                Err(CruiseError::Timeout)
            }
        }
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

async fn receive_loop(mut source: WsSource, pending: Arc<PendingMap>) {
    while let Some(msg) = source.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                trace!("recv: {text}");
                let frame: Frame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!("unparseable frame: {err}");
                        continue;
                    }
                };
                if let Some(id) = frame.id {
                    if let Some(tx) = pending.lock().remove(&id) {
                        let outcome = match frame.error {
                            Some(err) => Err(CruiseError::Protocol {
                                code: err.code,
                                message: err.message,
                            }),
                            None => Ok(frame.result.unwrap_or(Value::Null)),
                        };
                        let _ = tx.send(outcome);
                    }
                } else if let Some(method) = frame.method {
                    trace!("event: {method}");
                }
            }
            Ok(Message::Close(_)) => {
                debug!("devtools socket closed");
                break;
            }
            Err(err) => {
                warn!("devtools socket error: {err}");
                break;
            }
            _ => {}
        }
    }
    // The socket is gone; fail every caller still waiting.
    for (_, tx) in pending.lock().drain() {
        let _ = tx.send(Err(CruiseError::ChannelClosed));
    }
}

// ---------------------------------------------------------------------------
// Tab session
// ---------------------------------------------------------------------------

/// A session attached to one tab. Cheap to clone; clones share the
/// connection and the session id.
#[derive(Clone)]
pub struct TabSession {
    conn: Arc<CdpConnection>,
    target_id: String,
    session_id: String,
}

impl TabSession {
    /// Attach to a target in flatten mode and wrap the session.
    pub async fn attach(conn: Arc<CdpConnection>, target_id: &str) -> Result<Self, CruiseError> {
        let reply = conn
            .raw_call(
                "Target.attachToTarget",
                Some(json!({ "targetId": target_id, "flatten": true })),
                None,
            )
            .await?;
        let session_id = reply["sessionId"]
            .as_str()
            .ok_or_else(|| CruiseError::BadReply("missing sessionId".to_string()))?
            .to_string();
        debug!("attached to {target_id} as session {session_id}");

        Ok(Self {
            conn,
            target_id: target_id.to_string(),
            session_id,
        })
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Send one command scoped to this tab.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, CruiseError> {
        self.conn
            .raw_call(method, params, Some(&self.session_id))
            .await
    }

    /// Evaluate a JavaScript expression in the tab and return its value
    /// as JSON. Page-side exceptions surface as `CruiseError::JsError`.
    pub async fn evaluate(&self, expression: &str) -> Result<Value, CruiseError> {
        let reply = self
            .call(
                "Runtime.evaluate",
                Some(json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                })),
            )
            .await?;

        if let Some(exception) = reply.get("exceptionDetails") {
            let text = exception["text"].as_str().unwrap_or("unknown error");
            return Err(CruiseError::JsError(text.to_string()));
        }

        Ok(reply["result"]["value"].clone())
    }

    /// Capture the viewport as a PNG, returned base64-encoded.
    pub async fn capture_screenshot(&self) -> Result<String, CruiseError> {
        let reply = self
            .call("Page.captureScreenshot", Some(json!({ "format": "png" })))
            .await?;
        reply["data"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CruiseError::ScreenshotFailed("missing image data".to_string()))
    }
}

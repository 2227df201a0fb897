/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Transport tests against in-process DevTools mocks.
//!
//! A tiny WebSocket server stands in for the browser endpoint and a raw
//! TCP responder for the `/json` HTTP surface, so everything here runs
//! without a browser.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use section_cruiser::{
    CdpConnection, CruiseError, CruiseOptions, PageHandle, TabSession, fetch_tabs, pick_active_tab,
};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Mock servers
// ---------------------------------------------------------------------------

/// Serves one WebSocket connection. Every text frame is recorded and
/// answered by `handler`, which returns the reply frame without its id
/// (filled in from the request) or `None` to stay silent.
async fn spawn_mock<F>(handler: F) -> (String, Arc<Mutex<Vec<Value>>>)
where
    F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock listener");
    let addr = listener.local_addr().expect("mock listener addr");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = seen.clone();
    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                let request: Value = serde_json::from_str(&text).expect("mock request json");
                recorded.lock().push(request.clone());
                if let Some(mut reply) = handler(&request) {
                    reply["id"] = request["id"].clone();
                    if ws
                        .send(Message::Text(reply.to_string().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
    });
    (format!("ws://{addr}"), seen)
}

/// Serves the given JSON body to every HTTP request.
async fn spawn_http_json(body: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind http listener");
    let addr = listener.local_addr().expect("http listener addr");
    let body = body.to_string();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let body = body.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut chunk = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&chunk[..n]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len(),
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}

async fn next_request(ws: &mut WebSocketStream<TcpStream>) -> Value {
    while let Some(Ok(message)) = ws.next().await {
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).expect("mock request json");
        }
    }
    panic!("socket closed before a request arrived");
}

fn evaluate_reply(value: Value) -> Value {
    json!({ "result": { "result": { "type": "object", "value": value } } })
}

// ---------------------------------------------------------------------------
// Group 1: Calls and correlation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_call_reply_round_trip() {
    let (url, _) = spawn_mock(|request| {
        (request["method"] == "Runtime.evaluate")
            .then(|| json!({ "result": { "result": { "type": "number", "value": 7 } } }))
    })
    .await;

    let conn = CdpConnection::connect_ws(&url, TIMEOUT)
        .await
        .expect("connect to mock");
    let reply = conn
        .raw_call("Runtime.evaluate", Some(json!({ "expression": "3+4" })), None)
        .await
        .expect("round trip");
    assert_eq!(reply["result"]["value"], 7);
}

#[tokio::test]
async fn test_replies_correlate_by_id_not_arrival_order() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock listener");
    let addr = listener.local_addr().expect("mock listener addr");
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("handshake");
        let first = next_request(&mut ws).await;
        let second = next_request(&mut ws).await;
        // Answer in reverse order; the client must still match ids.
        for request in [&second, &first] {
            let reply = json!({
                "id": request["id"],
                "result": { "method": request["method"] },
            });
            ws.send(Message::Text(reply.to_string().into()))
                .await
                .expect("send reply");
        }
    });

    let conn = CdpConnection::connect_ws(&format!("ws://{addr}"), TIMEOUT)
        .await
        .expect("connect to mock");
    let (a, b) = tokio::join!(
        conn.raw_call("Browser.getVersion", None, None),
        conn.raw_call("Target.getTargets", None, None),
    );
    assert_eq!(a.expect("first call")["method"], "Browser.getVersion");
    assert_eq!(b.expect("second call")["method"], "Target.getTargets");
}

#[tokio::test]
async fn test_protocol_error_surfaces() {
    let (url, _) = spawn_mock(|_| {
        Some(json!({
            "error": { "code": -32601, "message": "'Bogus.method' wasn't found" }
        }))
    })
    .await;

    let conn = CdpConnection::connect_ws(&url, TIMEOUT)
        .await
        .expect("connect to mock");
    let err = conn
        .raw_call("Bogus.method", None, None)
        .await
        .expect_err("must fail");
    match err {
        CruiseError::Protocol { code, message } => {
            assert_eq!(code, -32601);
            assert!(message.contains("Bogus.method"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_pending_calls_fail_when_the_socket_drops() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock listener");
    let addr = listener.local_addr().expect("mock listener addr");
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("handshake");
        // Swallow one request, then hang up without answering.
        let _ = next_request(&mut ws).await;
    });

    let conn = CdpConnection::connect_ws(&format!("ws://{addr}"), TIMEOUT)
        .await
        .expect("connect to mock");
    let err = conn
        .raw_call("Runtime.evaluate", None, None)
        .await
        .expect_err("must fail");
    assert!(matches!(err, CruiseError::ChannelClosed), "got {err:?}");
}

#[tokio::test]
async fn test_call_times_out_without_a_reply() {
    let (url, _) = spawn_mock(|_| None).await;

    let conn = CdpConnection::connect_ws(&url, Duration::from_millis(250))
        .await
        .expect("connect to mock");
    let err = conn
        .raw_call("Runtime.evaluate", None, None)
        .await
        .expect_err("must time out");
    assert!(matches!(err, CruiseError::Timeout), "got {err:?}");
}

// ---------------------------------------------------------------------------
// Group 2: Tab sessions
// ---------------------------------------------------------------------------

fn tab_handler(request: &Value) -> Option<Value> {
    match request["method"].as_str() {
        Some("Target.attachToTarget") => Some(json!({
            "result": { "sessionId": "SID-1" }
        })),
        Some("Runtime.evaluate") => Some(json!({
            "result": { "result": { "type": "number", "value": 2 } }
        })),
        _ => None,
    }
}

#[tokio::test]
async fn test_attach_scopes_calls_to_the_session() {
    let (url, seen) = spawn_mock(tab_handler).await;

    let conn = Arc::new(
        CdpConnection::connect_ws(&url, TIMEOUT)
            .await
            .expect("connect to mock"),
    );
    let session = TabSession::attach(conn, "TAB-9").await.expect("attach");
    assert_eq!(session.target_id(), "TAB-9");
    assert_eq!(session.session_id(), "SID-1");

    let value = session.evaluate("1+1").await.expect("evaluate");
    assert_eq!(value, 2);

    let requests = seen.lock();
    assert_eq!(requests[0]["params"]["targetId"], "TAB-9");
    assert_eq!(requests[0]["params"]["flatten"], true);
    // The evaluate call must ride on the attached session.
    assert_eq!(requests[1]["sessionId"], "SID-1");
    assert_eq!(requests[1]["params"]["returnByValue"], true);
}

#[tokio::test]
async fn test_evaluate_surfaces_page_exceptions() {
    let (url, _) = spawn_mock(|request| match request["method"].as_str() {
        Some("Target.attachToTarget") => Some(json!({ "result": { "sessionId": "SID-1" } })),
        Some("Runtime.evaluate") => Some(json!({
            "result": {
                "exceptionDetails": { "text": "Uncaught ReferenceError" },
                "result": { "type": "undefined" },
            }
        })),
        _ => None,
    })
    .await;

    let conn = Arc::new(
        CdpConnection::connect_ws(&url, TIMEOUT)
            .await
            .expect("connect to mock"),
    );
    let session = TabSession::attach(conn, "TAB-1").await.expect("attach");
    let err = session.evaluate("boom()").await.expect_err("must fail");
    match err {
        CruiseError::JsError(text) => assert!(text.contains("ReferenceError")),
        other => panic!("unexpected error: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Group 3: Page operations over the wire
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_locate_sections_decodes_ids() {
    let (url, seen) = spawn_mock(|request| match request["method"].as_str() {
        Some("Target.attachToTarget") => Some(json!({ "result": { "sessionId": "SID-1" } })),
        Some("Runtime.evaluate") => Some(evaluate_reply(json!([
            "hero", "featured-collection", "footer"
        ]))),
        _ => None,
    })
    .await;

    let conn = Arc::new(
        CdpConnection::connect_ws(&url, TIMEOUT)
            .await
            .expect("connect to mock"),
    );
    let session = TabSession::attach(conn, "TAB-1").await.expect("attach");
    let page = PageHandle::new(session, ".shopify-section");

    let ids = page.locate_sections().await.expect("locate sections");
    assert_eq!(ids, ["hero", "featured-collection", "footer"]);

    let requests = seen.lock();
    let expression = requests[1]["params"]["expression"]
        .as_str()
        .expect("expression string");
    assert!(expression.contains(".shopify-section"));
}

#[tokio::test]
async fn test_screenshot_decodes_to_png_bytes() {
    let magic: [u8; 8] = [0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];
    let encoded = base64::engine::general_purpose::STANDARD.encode(magic);
    let (url, _) = spawn_mock(move |request| match request["method"].as_str() {
        Some("Target.attachToTarget") => Some(json!({ "result": { "sessionId": "SID-1" } })),
        Some("Page.captureScreenshot") => Some(json!({ "result": { "data": encoded } })),
        _ => None,
    })
    .await;

    let conn = Arc::new(
        CdpConnection::connect_ws(&url, TIMEOUT)
            .await
            .expect("connect to mock"),
    );
    let session = TabSession::attach(conn, "TAB-1").await.expect("attach");
    let page = PageHandle::new(session, ".shopify-section");

    let bytes = page.screenshot_png().await.expect("screenshot");
    assert_eq!(bytes, magic);
}

#[tokio::test]
async fn test_screenshot_without_data_is_an_error() {
    let (url, _) = spawn_mock(|request| match request["method"].as_str() {
        Some("Target.attachToTarget") => Some(json!({ "result": { "sessionId": "SID-1" } })),
        Some("Page.captureScreenshot") => Some(json!({ "result": {} })),
        _ => None,
    })
    .await;

    let conn = Arc::new(
        CdpConnection::connect_ws(&url, TIMEOUT)
            .await
            .expect("connect to mock"),
    );
    let session = TabSession::attach(conn, "TAB-1").await.expect("attach");
    let err = session.capture_screenshot().await.expect_err("must fail");
    assert!(matches!(err, CruiseError::ScreenshotFailed(_)), "got {err:?}");
}

#[tokio::test]
async fn test_failed_capture_still_clears_the_highlight() {
    let (url, seen) = spawn_mock(|request| match request["method"].as_str() {
        Some("Target.attachToTarget") => Some(json!({ "result": { "sessionId": "SID-1" } })),
        Some("Page.captureScreenshot") => Some(json!({ "result": {} })),
        Some("Runtime.evaluate") => Some(json!({
            "result": { "result": { "type": "boolean", "value": true } }
        })),
        _ => None,
    })
    .await;

    let conn = Arc::new(
        CdpConnection::connect_ws(&url, TIMEOUT)
            .await
            .expect("connect to mock"),
    );
    let session = TabSession::attach(conn, "TAB-1").await.expect("attach");
    let page = PageHandle::new(session, ".shopify-section");

    let err = page
        .screenshot_highlighted("hero")
        .await
        .expect_err("must fail");
    assert!(matches!(err, CruiseError::ScreenshotFailed(_)), "got {err:?}");

    // The marker class must come off after the broken capture.
    let requests = seen.lock();
    let last = requests.last().expect("requests recorded");
    let expression = last["params"]["expression"]
        .as_str()
        .expect("expression string");
    assert!(expression.contains(".remove("), "highlight left on: {expression}");
}

// ---------------------------------------------------------------------------
// Group 4: Endpoint discovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fetch_tabs_and_pick_the_shop_page() {
    let url = spawn_http_json(
        r#"[
            {"id":"t1","type":"page","title":"DevTools","url":"devtools://devtools/bundled/inspector.html"},
            {"id":"t2","type":"page","title":"Shop","url":"https://shop.example/"},
            {"id":"t3","type":"service_worker","title":"sw","url":"https://shop.example/sw.js"}
        ]"#,
    )
    .await;

    let tabs = fetch_tabs(&url).await.expect("fetch tabs");
    assert_eq!(tabs.len(), 3);
    let active = pick_active_tab(&tabs).expect("active tab");
    assert_eq!(active.id, "t2");
    assert_eq!(active.title, "Shop");
}

#[tokio::test]
async fn test_attach_active_reports_missing_tab() {
    let url = spawn_http_json(
        r#"[
            {"id":"t1","type":"page","title":"ext","url":"chrome-extension://abc/popup.html"}
        ]"#,
    )
    .await;

    let options = CruiseOptions {
        endpoint: url,
        ..CruiseOptions::default()
    };
    let Err(err) = PageHandle::attach_active(&options).await else {
        panic!("attach must fail without a page tab");
    };
    assert!(matches!(err, CruiseError::NoActiveTab), "got {err:?}");
}

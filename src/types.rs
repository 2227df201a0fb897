/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Shared public types used across all layers.

use std::fmt;

use serde::Deserialize;

/// Options for attaching to a browser DevTools endpoint.
#[derive(Debug, Clone)]
pub struct CruiseOptions {
    /// DevTools HTTP endpoint of a running browser (default: http://localhost:9222).
    pub endpoint: String,
    /// CSS selector matching the page sections (default: .shopify-section).
    pub selector: String,
    /// Maximum time in seconds to wait for a protocol reply (default: 30).
    pub call_timeout: u64,
}

impl Default for CruiseOptions {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9222".to_string(),
            selector: ".shopify-section".to_string(),
            call_timeout: 30,
        }
    }
}

/// Vertical scroll position and page extent, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollMetrics {
    pub scroll_y: f64,
    pub viewport_height: f64,
    pub page_height: f64,
}

impl ScrollMetrics {
    /// True once the viewport bottom has reached the end of the page.
    pub fn at_bottom(&self) -> bool {
        self.scroll_y + self.viewport_height >= self.page_height
    }
}

/// One located section: its identifier and viewport-relative box.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SectionPlacement {
    pub id: String,
    /// Top edge relative to the viewport, as reported by layout.
    pub top: f64,
    pub height: f64,
}

impl SectionPlacement {
    /// Vertical center of the section, viewport-relative.
    pub fn center(&self) -> f64 {
        self.top + self.height / 2.0
    }
}

/// Errors that can occur while driving a tab.
#[derive(Debug)]
pub enum CruiseError {
    /// Failed to reach the DevTools endpoint.
    ConnectFailed(String),
    /// The endpoint exposes no scrollable page tab.
    NoActiveTab,
    /// The WebSocket transport failed.
    WebSocket(String),
    /// The browser rejected a protocol call.
    Protocol { code: i64, message: String },
    /// JavaScript evaluation threw in the page.
    JsError(String),
    /// A protocol payload could not be encoded or carried the wrong shape.
    BadReply(String),
    /// Operation timed out.
    Timeout,
    /// Internal channel was closed (receive loop gone).
    ChannelClosed,
    /// Screenshot capture failed.
    ScreenshotFailed(String),
}

impl fmt::Display for CruiseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CruiseError::ConnectFailed(msg) => write!(f, "connection failed: {msg}"),
            CruiseError::NoActiveTab => write!(f, "no active tab found"),
            CruiseError::WebSocket(msg) => write!(f, "websocket error: {msg}"),
            CruiseError::Protocol { code, message } => {
                write!(f, "protocol error {code}: {message}")
            }
            CruiseError::JsError(msg) => write!(f, "JavaScript error: {msg}"),
            CruiseError::BadReply(msg) => write!(f, "malformed reply: {msg}"),
            CruiseError::Timeout => write!(f, "timed out"),
            CruiseError::ChannelClosed => write!(f, "internal channel closed"),
            CruiseError::ScreenshotFailed(msg) => write!(f, "screenshot failed: {msg}"),
        }
    }
}

impl std::error::Error for CruiseError {}

impl From<tokio_tungstenite::tungstenite::Error> for CruiseError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        CruiseError::WebSocket(err.to_string())
    }
}

impl From<reqwest::Error> for CruiseError {
    fn from(err: reqwest::Error) -> Self {
        CruiseError::ConnectFailed(err.to_string())
    }
}

impl From<serde_json::Error> for CruiseError {
    fn from(err: serde_json::Error) -> Self {
        CruiseError::BadReply(err.to_string())
    }
}

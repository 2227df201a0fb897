/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Typed operations over one attached tab.
//!
//! This is the surface the rest of the crate talks to: it turns protocol
//! plumbing into page questions and effects, and it implements the
//! controller's ports. Clones share the session.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use tracing::debug;

use crate::cdp::{self, CdpConnection, TabSession};
use crate::scroller::{ScrollNotifier, ScrollSurface};
use crate::sections;
use crate::types::{CruiseError, CruiseOptions, ScrollMetrics, SectionPlacement};

#[derive(Clone)]
pub struct PageHandle {
    session: TabSession,
    selector: String,
}

impl PageHandle {
    /// Resolve the active tab at the endpoint and attach to it.
    ///
    /// Fails with [`CruiseError::NoActiveTab`] when the endpoint exposes
    /// no page target.
    pub async fn attach_active(options: &CruiseOptions) -> Result<Self, CruiseError> {
        let tabs = cdp::fetch_tabs(&options.endpoint).await?;
        let tab = cdp::pick_active_tab(&tabs).ok_or(CruiseError::NoActiveTab)?;
        debug!(url = %tab.url, title = %tab.title, "active tab");

        let timeout = Duration::from_secs(options.call_timeout);
        let conn = Arc::new(CdpConnection::connect(&options.endpoint, timeout).await?);
        let session = TabSession::attach(conn, &tab.id).await?;
        Ok(Self::new(session, &options.selector))
    }

    /// Wrap an already attached session.
    pub fn new(session: TabSession, selector: &str) -> Self {
        Self {
            session,
            selector: selector.to_string(),
        }
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Ordered ids of the sections on the page, empty ids dropped.
    pub async fn locate_sections(&self) -> Result<Vec<String>, CruiseError> {
        let value = self
            .session
            .evaluate(&sections::section_ids_expr(&self.selector))
            .await?;
        let ids: Vec<String> = serde_json::from_value(value)?;
        Ok(ids)
    }

    /// Install the highlight stylesheet if this tab lacks it. Calling
    /// again changes nothing.
    pub async fn ensure_highlight_style(&self) -> Result<(), CruiseError> {
        let value = self.session.evaluate(&sections::ensure_style_expr()).await?;
        if value.as_bool() == Some(true) {
            debug!("highlight stylesheet installed");
        }
        Ok(())
    }

    /// Add or remove the highlight mark on a section. A missing element
    /// leaves the page untouched.
    pub async fn set_highlighted(&self, id: &str, on: bool) -> Result<(), CruiseError> {
        let value = self
            .session
            .evaluate(&sections::set_mark_expr(id, on))
            .await?;
        if value.as_bool() != Some(true) {
            debug!("no element with id {id:?}, highlight unchanged");
        }
        Ok(())
    }

    /// Highlight a section for `hold`, then clear it, so the user can
    /// spot the section in the browser window.
    pub async fn flash(&self, id: &str, hold: Duration) -> Result<(), CruiseError> {
        self.ensure_highlight_style().await?;
        self.set_highlighted(id, true).await?;
        tokio::time::sleep(hold).await;
        self.set_highlighted(id, false).await
    }

    /// Capture the viewport as PNG bytes.
    pub async fn screenshot_png(&self) -> Result<Vec<u8>, CruiseError> {
        let encoded = self.session.capture_screenshot().await?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|err| CruiseError::ScreenshotFailed(err.to_string()))
    }

    /// Highlight a section, capture the viewport, then clear the
    /// highlight again. The mark comes off even when the capture fails.
    pub async fn screenshot_highlighted(&self, id: &str) -> Result<Vec<u8>, CruiseError> {
        self.ensure_highlight_style().await?;
        self.set_highlighted(id, true).await?;
        let shot = self.screenshot_png().await;
        self.set_highlighted(id, false).await?;
        shot
    }
}

impl ScrollSurface for PageHandle {
    async fn scroll_by(&self, dy: f64) -> Result<(), CruiseError> {
        self.session.evaluate(&sections::scroll_by_expr(dy)).await?;
        Ok(())
    }

    async fn metrics(&self) -> Result<ScrollMetrics, CruiseError> {
        let value = self.session.evaluate(sections::metrics_expr()).await?;
        let metrics: ScrollMetrics = serde_json::from_value(value)?;
        Ok(metrics)
    }

    async fn placements(&self) -> Result<Vec<SectionPlacement>, CruiseError> {
        let value = self
            .session
            .evaluate(&sections::placements_expr(&self.selector))
            .await?;
        let placements: Vec<SectionPlacement> = serde_json::from_value(value)?;
        Ok(placements)
    }
}

impl ScrollNotifier for PageHandle {
    async fn notify_scroll_activity(&self) -> Result<(), CruiseError> {
        self.session.evaluate(sections::notify_expr()).await?;
        Ok(())
    }
}

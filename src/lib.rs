/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! A library for previewing and auto-scrolling a page's sections over
//! the browser DevTools protocol.
//!
//! Provides three layers:
//!
//! - **[`CdpConnection`] / [`TabSession`]**: the protocol transport.
//!   Endpoint discovery, one WebSocket per browser, one session per tab.
//! - **[`PageHandle`]**: typed operations over one attached tab.
//!   Section lookup, highlighting, screenshots, scroll metrics.
//! - **[`ScrollController`]**: the auto-scroll run, a fixed tick that
//!   advances the page, slows near section centers, and stops at the
//!   bottom. Reaches the page only through the [`ScrollSurface`] and
//!   [`ScrollNotifier`] ports, so it runs against a fake page in tests.
//!
//! # Example
//!
//! ```no_run
//! use section_cruiser::{CruiseOptions, PageHandle, ScrollConfig, ScrollController};
//!
//! # async fn run() -> Result<(), section_cruiser::CruiseError> {
//! let options = CruiseOptions::default();
//! let page = PageHandle::attach_active(&options).await?;
//!
//! let ids = page.locate_sections().await?;
//! println!("{} sections", ids.len());
//!
//! let controller = ScrollController::new(page.clone(), page, ScrollConfig::default());
//! controller.start(Default::default());
//! controller.wait_until_idle().await;
//! # Ok(())
//! # }
//! ```

mod cdp;
mod page;
mod presenter;
mod scroller;
mod sections;
mod types;

pub use cdp::{
    BrowserInfo, CdpConnection, TabInfo, TabSession, fetch_tabs, fetch_version, pick_active_tab,
};
pub use page::PageHandle;
pub use presenter::{NO_ACTIVE_TAB, NO_SECTIONS, PopupView, SectionPicker, SectionRow};
pub use scroller::{ScrollConfig, ScrollController, ScrollNotifier, ScrollSurface};
pub use sections::{MARK_CLASS, STYLE_ID};
pub use types::{CruiseError, CruiseOptions, ScrollMetrics, SectionPlacement};

/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! JavaScript evaluated in the attached tab.
//!
//! Every page effect is a single expression handed to `Runtime.evaluate`.
//! Builders here assemble those expressions and escape anything that came
//! from the user before it lands between quotes.

/// Element id of the injected highlight stylesheet.
pub const STYLE_ID: &str = "section-cruiser-style";

/// Class that marks a highlighted section.
pub const MARK_CLASS: &str = "section-cruiser-mark";

const HIGHLIGHT_CSS: &str = concat!(
    ".section-cruiser-mark { ",
    "outline: 3px solid #e91e63 !important; ",
    "opacity: 0.6 !important; ",
    "filter: invert(1) !important; }"
);

pub(crate) fn js_escape(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Ordered ids of every section with a non-empty id.
pub(crate) fn section_ids_expr(selector: &str) -> String {
    let escaped = js_escape(selector);
    format!(
        "Array.from(document.querySelectorAll('{escaped}'))\
         .map((el) => el.id).filter(Boolean)"
    )
}

/// Viewport-relative boxes of every section with a non-empty id, in
/// document order.
pub(crate) fn placements_expr(selector: &str) -> String {
    let escaped = js_escape(selector);
    format!(
        "Array.from(document.querySelectorAll('{escaped}'))\
         .filter((el) => el.id)\
         .map((el) => {{ const rect = el.getBoundingClientRect(); \
         return {{ id: el.id, top: rect.top, height: rect.height }}; }})"
    )
}

/// Scroll position and page extent, keyed to match `ScrollMetrics`.
pub(crate) fn metrics_expr() -> &'static str {
    "({ scrollY: window.scrollY, viewportHeight: window.innerHeight, \
     pageHeight: document.body.scrollHeight })"
}

pub(crate) fn scroll_by_expr(dy: f64) -> String {
    format!("window.scrollBy(0, {dy})")
}

/// Synthetic events so scroll-driven page scripts observe the motion.
pub(crate) fn notify_expr() -> &'static str {
    "(() => { \
     window.dispatchEvent(new Event('scroll', { bubbles: true })); \
     window.dispatchEvent(new Event('wheel', { bubbles: true })); })()"
}

/// Install the highlight stylesheet once. Returns true when this call
/// installed it, false when it was already present.
pub(crate) fn ensure_style_expr() -> String {
    format!(
        "(() => {{ \
         if (document.getElementById('{STYLE_ID}')) {{ return false; }} \
         const style = document.createElement('style'); \
         style.id = '{STYLE_ID}'; \
         style.textContent = '{HIGHLIGHT_CSS}'; \
         document.head.appendChild(style); \
         return true; }})()"
    )
}

/// Add or remove the highlight mark on an element by id. Returns false
/// when no such element exists (the call is then a no-op).
pub(crate) fn set_mark_expr(id: &str, on: bool) -> String {
    let escaped = js_escape(id);
    let verb = if on { "add" } else { "remove" };
    format!(
        "(() => {{ \
         const el = document.getElementById('{escaped}'); \
         if (!el) {{ return false; }} \
         el.classList.{verb}('{MARK_CLASS}'); \
         return true; }})()"
    )
}

//! Headless browser capability used by the capture engine.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::db::Cookie;

/// Removes every element whose computed position is `fixed` or `sticky`.
pub const REMOVE_STICKY_AND_FIXED: &str = r"(() => {
    const elements = document.querySelectorAll('body *');
    let removed = 0;
    for (const element of elements) {
        const position = getComputedStyle(element).position;
        if ((position === 'fixed' || position === 'sticky') && element.parentNode) {
            element.parentNode.removeChild(element);
            removed += 1;
        }
    }
    return removed;
})()";

pub const SCROLL_TO_TOP: &str = "window.scrollTo(0, 0)";

/// Visible text of the rendered page.
pub const PAGE_TEXT: &str = "document.body ? document.body.innerText : ''";

#[must_use]
pub fn scroll_by(pixels: i64) -> String {
    format!("window.scrollBy(0, {pixels})")
}

/// Starts isolated browser sessions.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn open(&self) -> Result<Box<dyn BrowserSession>>;
}

/// One ephemeral browser session with a single page.
///
/// Once the renderer crashes every operation fails with `Page crashed!`.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Add `cookies` to the session; cookies without a domain are scoped to `url`.
    async fn set_cookies(&self, cookies: &[Cookie], url: &str) -> Result<()>;

    /// Load `url` and wait for the network to go idle.
    async fn navigate(&self, url: &str) -> Result<()>;

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Save a JPEG of the current viewport.
    async fn screenshot(&self, path: &Path) -> Result<()>;

    /// Save a JPEG of the whole document, composited from scrolled captures.
    async fn full_page_screenshot(&self, path: &Path) -> Result<()>;

    async fn title(&self) -> Result<Option<String>>;

    /// Tear the session down. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

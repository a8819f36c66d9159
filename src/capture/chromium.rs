//! Browser sessions backed by headless Chrome/Chromium.

use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::inspector::EventTargetCrashed;
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, CookieSameSite, TimeSinceEpoch};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures_util::StreamExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::browser::{BrowserLauncher, BrowserSession, SCROLL_TO_TOP};
use super::compose::{compose_full_page, slice_offsets, Slice, FULL_PAGE_JPEG_QUALITY};
use crate::config::Config;
use crate::db::Cookie;

const PAGE_CRASHED: &str = "Page crashed!";

const VIEWPORT_JPEG_QUALITY: i64 = 85;

/// The network counts as idle once no new resource entry appears for this long.
const NETWORK_IDLE: Duration = Duration::from_millis(500);
const NETWORK_POLL: Duration = Duration::from_millis(100);

const RESOURCE_COUNT: &str = "performance.getEntriesByType('resource').length";
const DOCUMENT_HEIGHT: &str = "Math.max(document.body ? document.body.scrollHeight : 0, \
     document.documentElement ? document.documentElement.scrollHeight : 0)";
const SCROLL_Y: &str = "window.scrollY";

/// Browser settings shared by every session.
#[derive(Debug, Clone)]
pub struct ChromiumConfig {
    pub chrome_path: Option<String>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub page_timeout: Duration,
    pub max_full_page_height: u32,
}

impl From<&Config> for ChromiumConfig {
    fn from(config: &Config) -> Self {
        Self {
            chrome_path: config.chrome_path.clone(),
            viewport_width: config.viewport_width,
            viewport_height: config.viewport_height,
            page_timeout: config.page_timeout,
            max_full_page_height: config.max_full_page_height,
        }
    }
}

/// Launches a fresh headless browser per session.
pub struct ChromiumLauncher {
    config: ChromiumConfig,
}

impl ChromiumLauncher {
    #[must_use]
    pub fn new(config: ChromiumConfig) -> Self {
        Self { config }
    }

    fn browser_config(&self) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .window_size(self.config.viewport_width, self.config.viewport_height)
            .viewport(Viewport {
                width: self.config.viewport_width,
                height: self.config.viewport_height,
                device_scale_factor: Some(1.0),
                ..Default::default()
            })
            .request_timeout(self.config.page_timeout)
            .no_sandbox()
            .disable_default_args()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-software-rasterizer")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-extensions")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--mute-audio")
            .arg("--hide-scrollbars");

        if let Some(ref chrome_path) = self.config.chrome_path {
            builder = builder.chrome_executable(chrome_path);
        }

        builder
            .build()
            .map_err(|e| anyhow!("Failed to build browser config: {e}"))
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn open(&self) -> Result<Box<dyn BrowserSession>> {
        debug!("Launching headless browser");

        let (mut browser, mut handler) = Browser::launch(self.browser_config()?)
            .await
            .context("Failed to launch browser")?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {e}");
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                if let Err(close_err) = browser.close().await {
                    warn!("Failed to close browser: {close_err}");
                }
                handler_task.abort();
                return Err(e).context("Failed to create new page");
            }
        };

        let (crash_tx, crashed) = watch::channel(false);
        let mut crash_events = page
            .event_listener::<EventTargetCrashed>()
            .await
            .context("Failed to subscribe to crash events")?;
        let crash_task = tokio::spawn(async move {
            if crash_events.next().await.is_some() {
                warn!("Browser renderer crashed");
                let _ = crash_tx.send(true);
            }
        });

        Ok(Box::new(ChromiumSession {
            config: self.config.clone(),
            browser: Mutex::new(Some(browser)),
            page,
            crashed,
            tasks: vec![handler_task, crash_task],
        }))
    }
}

/// A single-page headless browser session.
pub struct ChromiumSession {
    config: ChromiumConfig,
    browser: Mutex<Option<Browser>>,
    page: Page,
    crashed: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChromiumSession {
    /// Run `op`, failing fast if the renderer has crashed or crashes meanwhile.
    async fn guarded<T>(&self, op: impl Future<Output = Result<T>> + Send) -> Result<T> {
        if *self.crashed.borrow() {
            return Err(anyhow!(PAGE_CRASHED));
        }
        let mut crashed = self.crashed.clone();
        let crash = async move { crashed.wait_for(|c| *c).await.map(|_| ()) };
        tokio::select! {
            result = op => result,
            Ok(()) = crash => Err(anyhow!(PAGE_CRASHED)),
        }
    }

    async fn eval(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate_expression(script)
            .await
            .context("Script evaluation failed")?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn eval_u32(&self, script: &str) -> Result<u32> {
        let value = self.eval(script).await?;
        let n = value
            .as_f64()
            .with_context(|| format!("Expected a number from `{script}`, got {value}"))?;
        Ok(n.max(0.0).min(f64::from(u32::MAX)) as u32)
    }

    async fn capture(&self, format: CaptureScreenshotFormat) -> Result<Vec<u8>> {
        let mut params = ScreenshotParams::builder().format(format.clone());
        if format == CaptureScreenshotFormat::Jpeg {
            params = params.quality(VIEWPORT_JPEG_QUALITY);
        }
        self.page
            .screenshot(params.build())
            .await
            .context("Failed to capture screenshot")
    }

    async fn wait_for_network_idle(&self) -> Result<()> {
        let deadline = Instant::now() + self.config.page_timeout;
        let mut last_count = self.eval_u32(RESOURCE_COUNT).await?;
        let mut stable_since = Instant::now();

        while Instant::now() < deadline {
            tokio::time::sleep(NETWORK_POLL).await;
            let count = self.eval_u32(RESOURCE_COUNT).await?;
            if count != last_count {
                last_count = count;
                stable_since = Instant::now();
            } else if stable_since.elapsed() >= NETWORK_IDLE {
                return Ok(());
            }
        }
        debug!(resources = last_count, "Network did not go idle before page timeout");
        Ok(())
    }

    async fn compose_page(&self) -> Result<Vec<u8>> {
        let page_height = self
            .eval_u32(DOCUMENT_HEIGHT)
            .await?
            .clamp(1, self.config.max_full_page_height.max(1));

        let mut slices = Vec::new();
        for offset in slice_offsets(page_height, self.config.viewport_height) {
            self.eval(&format!("window.scrollTo(0, {offset})")).await?;
            // The last slice is clamped by the browser at the bottom of the page.
            let actual = self.eval_u32(SCROLL_Y).await?;
            let image = self.capture(CaptureScreenshotFormat::Png).await?;
            slices.push(Slice {
                offset: actual,
                image,
            });
        }
        self.eval(SCROLL_TO_TOP).await?;

        let width = self.config.viewport_width;
        tokio::task::spawn_blocking(move || {
            compose_full_page(&slices, width, page_height, FULL_PAGE_JPEG_QUALITY)
        })
        .await
        .context("Screenshot compositing task panicked")?
    }
}

fn to_cookie_param(cookie: &Cookie, url: &str) -> Result<CookieParam> {
    let mut builder = CookieParam::builder()
        .name(cookie.name.clone())
        .value(cookie.value.clone())
        .url(url.to_string());
    if let Some(domain) = &cookie.domain {
        builder = builder.domain(domain.clone());
    }
    if let Some(path) = &cookie.path {
        builder = builder.path(path.clone());
    }
    if let Some(secure) = cookie.secure {
        builder = builder.secure(secure);
    }
    if let Some(http_only) = cookie.http_only {
        builder = builder.http_only(http_only);
    }
    if let Some(same_site) = cookie.same_site.as_deref().and_then(same_site) {
        builder = builder.same_site(same_site);
    }
    if cookie.session != Some(true) {
        if let Some(expires) = cookie.expiration_date {
            builder = builder.expires(TimeSinceEpoch::new(expires));
        }
    }
    builder
        .build()
        .map_err(|e| anyhow!("Invalid cookie '{}': {e}", cookie.name))
}

fn same_site(value: &str) -> Option<CookieSameSite> {
    match value.to_ascii_lowercase().as_str() {
        "strict" => Some(CookieSameSite::Strict),
        "lax" => Some(CookieSameSite::Lax),
        "none" | "no_restriction" => Some(CookieSameSite::None),
        _ => None,
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn set_cookies(&self, cookies: &[Cookie], url: &str) -> Result<()> {
        if cookies.is_empty() {
            return Ok(());
        }
        let params = cookies
            .iter()
            .map(|c| to_cookie_param(c, url))
            .collect::<Result<Vec<_>>>()?;
        self.guarded(async {
            self.page
                .set_cookies(params)
                .await
                .context("Failed to set cookies")?;
            Ok(())
        })
        .await
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.guarded(async {
            tokio::time::timeout(self.config.page_timeout, self.page.goto(url))
                .await
                .map_err(|_| anyhow!("Navigation to {url} timed out"))?
                .with_context(|| format!("Failed to navigate to {url}"))?;
            self.wait_for_network_idle().await
        })
        .await
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        self.guarded(self.eval(script)).await
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        self.guarded(async {
            let jpeg = self.capture(CaptureScreenshotFormat::Jpeg).await?;
            tokio::fs::write(path, &jpeg)
                .await
                .with_context(|| format!("Failed to write screenshot to {}", path.display()))
        })
        .await
    }

    async fn full_page_screenshot(&self, path: &Path) -> Result<()> {
        self.guarded(async {
            let jpeg = self.compose_page().await?;
            tokio::fs::write(path, &jpeg)
                .await
                .with_context(|| format!("Failed to write screenshot to {}", path.display()))
        })
        .await
    }

    async fn title(&self) -> Result<Option<String>> {
        self.guarded(async { self.page.get_title().await.context("Failed to read page title") })
            .await
    }

    async fn close(&self) -> Result<()> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };
        let result = browser.close().await;
        if let Err(e) = browser.wait().await {
            debug!("Failed to reap browser process: {e}");
        }
        for task in &self.tasks {
            task.abort();
        }
        result.context("Failed to close browser")?;
        info!("Browser session closed");
        Ok(())
    }
}

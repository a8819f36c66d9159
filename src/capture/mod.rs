//! Turning a URL into a set of captured artifacts.
//!
//! PDFs are stored as-is. Anything else is stored as raw HTML, rendered in a
//! headless browser for screenshots and visible text, and offered to the video
//! extractor.

pub mod browser;
pub mod chromium;
pub mod compose;
pub mod cookies;
pub mod ytdlp;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use self::browser::{
    scroll_by, BrowserLauncher, BrowserSession, PAGE_TEXT, REMOVE_STICKY_AND_FIXED, SCROLL_TO_TOP,
};
use self::cookies::{cookie_header, write_cookie_jar};
use self::ytdlp::{VideoDownloader, VideoDownloaderFlags};
use crate::constants::{CONTENT_HTML, CONTENT_PDF, CONTENT_TXT, FULL_SCREENSHOT, SCREENSHOT};
use crate::db::{Artifact, ArtifactKind, Evidence};
use crate::http::FetchClient;

const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Distance scrolled to trigger lazy content before the full-page capture.
const SCROLL_PROBE_PIXELS: i64 = 600;

#[derive(Debug, Clone, Copy)]
pub struct CaptureOptions {
    /// Settle delay between DOM mutations and screenshots. Not a deadline.
    pub step_timeout: Duration,
}

/// What a capture produced, before fingerprinting.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResults {
    pub title: String,
    pub downloads: Vec<Artifact>,
}

/// Captures one claimed evidence item.
#[async_trait]
pub trait EvidenceJob: Send + Sync {
    async fn run(&self, evidence: &Evidence) -> Result<JobResults>;
}

/// The capture engine.
pub struct PreserveEvidence {
    http: Arc<dyn FetchClient>,
    browser: Arc<dyn BrowserLauncher>,
    video: Arc<dyn VideoDownloader>,
    data_path: PathBuf,
    cookies_path: PathBuf,
    options: CaptureOptions,
}

impl PreserveEvidence {
    #[must_use]
    pub fn new(
        http: Arc<dyn FetchClient>,
        browser: Arc<dyn BrowserLauncher>,
        video: Arc<dyn VideoDownloader>,
        data_path: &Path,
        cookies_path: &Path,
        options: CaptureOptions,
    ) -> Self {
        Self {
            http,
            browser,
            video,
            data_path: data_path.to_path_buf(),
            cookies_path: cookies_path.to_path_buf(),
            options,
        }
    }

    /// Capture `evidence.url` into `<data_path>/<evidence id>/`.
    ///
    /// # Errors
    ///
    /// Propagates fetch, browser, filesystem and video extractor failures.
    pub async fn execute(&self, evidence: &Evidence, options: CaptureOptions) -> Result<JobResults> {
        let evidence_dir = self.data_path.join(&evidence.id);
        tokio::fs::create_dir_all(&evidence_dir)
            .await
            .with_context(|| format!("Failed to create {}", evidence_dir.display()))?;

        let response = self
            .http
            .get(&evidence.url, Some(&cookie_header(&evidence.cookies)))
            .await?;
        if !response.is_success() {
            warn!(
                evidence_id = %evidence.id,
                url = %evidence.url,
                status = response.status,
                "Target responded with non-success status, capturing anyway"
            );
        }

        let content_type = response.content_type.as_deref().unwrap_or("text/html");
        if content_type.contains(PDF_CONTENT_TYPE) {
            write_artifact(&evidence_dir, CONTENT_PDF, &response.body).await?;
            info!(evidence_id = %evidence.id, bytes = response.body.len(), "PDF captured");
            return Ok(JobResults {
                title: pdf_title(&evidence.url),
                downloads: vec![Artifact::new(&evidence.id, CONTENT_PDF, ArtifactKind::Content)],
            });
        }

        write_artifact(&evidence_dir, CONTENT_HTML, &response.body).await?;

        let session = self.browser.open().await?;
        let rendered = self
            .render(session.as_ref(), evidence, &evidence_dir, options)
            .await;
        if let Err(e) = session.close().await {
            warn!(evidence_id = %evidence.id, "Failed to close browser session: {e:#}");
        }
        let title = rendered?;

        let mut downloads = vec![
            Artifact::new(&evidence.id, CONTENT_HTML, ArtifactKind::Content),
            Artifact::new(&evidence.id, CONTENT_TXT, ArtifactKind::Content),
            Artifact::new(&evidence.id, SCREENSHOT, ArtifactKind::Screenshot),
            Artifact::new(&evidence.id, FULL_SCREENSHOT, ArtifactKind::Screenshot),
        ];

        let jar = write_cookie_jar(
            &self.cookies_path,
            &evidence.cookies_file,
            &evidence.cookies,
            &evidence.url,
        )
        .await?;
        let flags = VideoDownloaderFlags::for_evidence(&evidence_dir, Some(jar));
        downloads.extend(self.video.download(evidence, &flags).await?);

        info!(
            evidence_id = %evidence.id,
            artifacts = downloads.len(),
            "Page captured"
        );

        Ok(JobResults { title, downloads })
    }

    /// Drive the browser through the capture steps and return the page title.
    async fn render(
        &self,
        session: &dyn BrowserSession,
        evidence: &Evidence,
        evidence_dir: &Path,
        options: CaptureOptions,
    ) -> Result<String> {
        session.set_cookies(&evidence.cookies, &evidence.url).await?;
        session.navigate(&evidence.url).await?;

        let removed = session.evaluate(REMOVE_STICKY_AND_FIXED).await?;
        debug!(evidence_id = %evidence.id, removed = %removed, "Removed fixed and sticky elements");
        self.settle(options).await;
        session.screenshot(&evidence_dir.join(SCREENSHOT)).await?;

        session.evaluate(&scroll_by(SCROLL_PROBE_PIXELS)).await?;
        self.settle(options).await;
        session.evaluate(REMOVE_STICKY_AND_FIXED).await?;
        session.evaluate(SCROLL_TO_TOP).await?;
        session.evaluate(REMOVE_STICKY_AND_FIXED).await?;
        self.settle(options).await;
        session
            .full_page_screenshot(&evidence_dir.join(FULL_SCREENSHOT))
            .await?;

        let text = session.evaluate(PAGE_TEXT).await?;
        let text = text.as_str().unwrap_or_default();
        write_artifact(evidence_dir, CONTENT_TXT, text.as_bytes()).await?;

        let title = session
            .title()
            .await?
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| evidence.url.clone());
        Ok(title)
    }

    async fn settle(&self, options: CaptureOptions) {
        if !options.step_timeout.is_zero() {
            tokio::time::sleep(options.step_timeout).await;
        }
    }
}

#[async_trait]
impl EvidenceJob for PreserveEvidence {
    async fn run(&self, evidence: &Evidence) -> Result<JobResults> {
        self.execute(evidence, self.options).await
    }
}

async fn write_artifact(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<()> {
    let path = dir.join(file_name);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Title of a PDF capture: the last non-empty path segment, else the URL.
#[must_use]
pub fn pdf_title(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.rfind(|s| !s.is_empty()).map(str::to_string))
        })
        .unwrap_or_else(|| url.to_string())
}

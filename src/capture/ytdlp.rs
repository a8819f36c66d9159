//! Video extraction with yt-dlp.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::constants::VIDEO;
use crate::db::{Artifact, ArtifactKind, Evidence};
use crate::shell::{CommandOutput, CommandRunner, CommandSpec};

/// stderr markers yt-dlp prints when a page simply has nothing to extract.
const NO_VIDEO_MARKERS: &[&str] = &["Unsupported URL", "No video formats found"];

/// The video extractor itself is broken, as opposed to "this page has no video".
#[derive(Debug, Error)]
pub enum VideoDownloaderError {
    #[error("video downloader could not be run: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("video downloader failed (exit code {code:?}): {stderr}")]
    Failed { code: Option<i32>, stderr: String },
}

/// Options passed to the extractor for one evidence item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDownloaderFlags {
    pub output: PathBuf,
    pub format: String,
    pub no_playlist: bool,
    pub playlist_end: u32,
    pub cookies: Option<PathBuf>,
}

impl VideoDownloaderFlags {
    /// Best single format, at most one playlist item, written to `<evidence_dir>/video.mp4`.
    #[must_use]
    pub fn for_evidence(evidence_dir: &Path, cookie_jar: Option<PathBuf>) -> Self {
        Self {
            output: evidence_dir.join(VIDEO),
            format: "best".to_string(),
            no_playlist: true,
            playlist_end: 1,
            cookies: cookie_jar,
        }
    }

    /// Command-line arguments for downloading `url`.
    #[must_use]
    pub fn to_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "--format".to_string(),
            self.format.clone(),
            "--output".to_string(),
            self.output.display().to_string(),
        ];
        if self.no_playlist {
            args.push("--no-playlist".to_string());
        }
        args.push("--playlist-end".to_string());
        args.push(self.playlist_end.to_string());
        if let Some(cookies) = &self.cookies {
            args.push("--cookies".to_string());
            args.push(cookies.display().to_string());
        }
        args.push(url.to_string());
        args
    }
}

/// How an extractor run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractorExit {
    Completed,
    NoVideo,
    Failed { code: Option<i32>, stderr: String },
}

/// Classify a finished extractor process.
#[must_use]
pub fn classify(output: &CommandOutput) -> ExtractorExit {
    if output.success() {
        return ExtractorExit::Completed;
    }
    let stderr = output.stderr_text();
    if NO_VIDEO_MARKERS.iter().any(|m| stderr.contains(m)) {
        ExtractorExit::NoVideo
    } else {
        ExtractorExit::Failed {
            code: output.code,
            stderr: stderr.trim().to_string(),
        }
    }
}

#[async_trait]
pub trait VideoDownloader: Send + Sync {
    /// Download the evidence's video, if it has one.
    ///
    /// An empty list means there is no video to extract.
    async fn download(
        &self,
        evidence: &Evidence,
        flags: &VideoDownloaderFlags,
    ) -> Result<Vec<Artifact>, VideoDownloaderError>;
}

/// [`VideoDownloader`] running the yt-dlp binary.
pub struct YtDlpVideoDownloader {
    runner: Arc<dyn CommandRunner>,
    binary: String,
}

impl YtDlpVideoDownloader {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, binary: &str) -> Self {
        Self {
            runner,
            binary: binary.to_string(),
        }
    }
}

#[async_trait]
impl VideoDownloader for YtDlpVideoDownloader {
    async fn download(
        &self,
        evidence: &Evidence,
        flags: &VideoDownloaderFlags,
    ) -> Result<Vec<Artifact>, VideoDownloaderError> {
        let command = CommandSpec::new(&self.binary).args(flags.to_args(&evidence.url));
        let output = self
            .runner
            .run(&command)
            .await
            .map_err(VideoDownloaderError::Spawn)?;

        match classify(&output) {
            ExtractorExit::Completed => {
                if tokio::fs::try_exists(&flags.output).await.unwrap_or(false) {
                    info!(evidence_id = %evidence.id, "Video downloaded");
                    Ok(vec![Artifact::new(&evidence.id, VIDEO, ArtifactKind::Video)])
                } else {
                    debug!(evidence_id = %evidence.id, "Video downloader produced no file");
                    Ok(Vec::new())
                }
            }
            ExtractorExit::NoVideo => {
                debug!(evidence_id = %evidence.id, url = %evidence.url, "No video to extract");
                Ok(Vec::new())
            }
            ExtractorExit::Failed { code, stderr } => {
                Err(VideoDownloaderError::Failed { code, stderr })
            }
        }
    }
}

//! RFC 3161 trusted timestamping.
//!
//! Requests are built and receipts inspected with the `openssl ts` command;
//! the request itself is posted to the time-stamping authority over HTTP.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::constants::{TSA_REQUEST, TSA_RESPONSE};
use crate::http::FetchClient;
use crate::shell::{CommandOutput, CommandRunner, CommandSpec};

const TIMESTAMP_QUERY_CONTENT_TYPE: &str = "application/timestamp-query";

static TIME_STAMP_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*Time stamp:\s*(.+?)\s*$").expect("valid regex"));

/// Certificates used to verify receipts from the authority.
#[derive(Debug, Clone)]
pub struct TsaTrust {
    pub ca_file: PathBuf,
    pub cert_file: PathBuf,
}

/// Receipt of one timestamped digest file, paths relative to the timestamp store root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampReceipt {
    pub request_relative_path: String,
    pub response_relative_path: String,
    pub date: DateTime<Utc>,
}

/// Client for an external time-stamping authority.
pub struct TsaService {
    runner: Arc<dyn CommandRunner>,
    http: Arc<dyn FetchClient>,
    openssl_path: String,
    tsa_url: String,
    root: PathBuf,
    trust: Option<TsaTrust>,
}

impl TsaService {
    /// `root` is the timestamp store; receipts are written under `root/<subfolder>/`.
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        http: Arc<dyn FetchClient>,
        openssl_path: &str,
        tsa_url: &str,
        root: &Path,
    ) -> Self {
        Self {
            runner,
            http,
            openssl_path: openssl_path.to_string(),
            tsa_url: tsa_url.to_string(),
            root: root.to_path_buf(),
            trust: None,
        }
    }

    /// Verify every receipt against the given certificates.
    #[must_use]
    pub fn with_trust(mut self, trust: TsaTrust) -> Self {
        self.trust = Some(trust);
        self
    }

    /// Obtain a timestamp for `digest_file`, saving request and response in `subfolder`.
    ///
    /// # Errors
    ///
    /// Fails if openssl fails, the authority is unreachable or answers with a
    /// non-success status, verification fails, or no generation time can be read.
    pub async fn timestamp(&self, digest_file: &Path, subfolder: &str) -> Result<TimestampReceipt> {
        let request_relative_path = format!("{subfolder}/{TSA_REQUEST}");
        let response_relative_path = format!("{subfolder}/{TSA_RESPONSE}");
        let request_path = self.root.join(&request_relative_path);
        let response_path = self.root.join(&response_relative_path);

        tokio::fs::create_dir_all(self.root.join(subfolder))
            .await
            .context("Failed to create timestamp directory")?;

        self.openssl(
            CommandSpec::new(&self.openssl_path)
                .args(["ts", "-query", "-data"])
                .arg(digest_file.display().to_string())
                .args(["-no_nonce", "-sha512", "-cert", "-out"])
                .arg(request_path.display().to_string()),
            "build timestamp request",
        )
        .await?;

        let request = tokio::fs::read(&request_path)
            .await
            .with_context(|| format!("Failed to read {}", request_path.display()))?;

        debug!(tsa_url = %self.tsa_url, bytes = request.len(), "Submitting timestamp request");
        let response = self
            .http
            .post(&self.tsa_url, TIMESTAMP_QUERY_CONTENT_TYPE, request)
            .await
            .context("Timestamp authority request failed")?;
        if !response.is_success() {
            bail!(
                "Timestamp authority returned HTTP {}",
                response.status
            );
        }

        tokio::fs::write(&response_path, &response.body)
            .await
            .with_context(|| format!("Failed to write {}", response_path.display()))?;

        if let Some(trust) = &self.trust {
            self.openssl(
                CommandSpec::new(&self.openssl_path)
                    .args(["ts", "-verify", "-in"])
                    .arg(response_path.display().to_string())
                    .arg("-queryfile")
                    .arg(request_path.display().to_string())
                    .arg("-CAfile")
                    .arg(trust.ca_file.display().to_string())
                    .arg("-untrusted")
                    .arg(trust.cert_file.display().to_string()),
                "verify timestamp response",
            )
            .await?;
        }

        let reply = self
            .openssl(
                CommandSpec::new(&self.openssl_path)
                    .args(["ts", "-reply", "-in"])
                    .arg(response_path.display().to_string())
                    .arg("-text"),
                "read timestamp response",
            )
            .await?;
        let date = parse_timestamp(&reply.stdout_text())?;

        info!(subfolder = %subfolder, date = %date, "Timestamp obtained");

        Ok(TimestampReceipt {
            request_relative_path,
            response_relative_path,
            date,
        })
    }

    async fn openssl(&self, command: CommandSpec, what: &str) -> Result<CommandOutput> {
        let output = self
            .runner
            .run(&command)
            .await
            .with_context(|| format!("Failed to run openssl to {what}"))?;
        if !output.success() {
            bail!(
                "openssl failed to {what} (exit code {:?}): {}",
                output.code,
                output.stderr_text().trim()
            );
        }
        Ok(output)
    }
}

/// Extract the generation time from `openssl ts -reply -text` output.
///
/// # Errors
///
/// Returns an error if no `Time stamp:` line is present or it cannot be parsed.
pub fn parse_timestamp(reply_text: &str) -> Result<DateTime<Utc>> {
    let raw = TIME_STAMP_LINE
        .captures(reply_text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .context("Timestamp response has no generation time")?;

    // "Mar  1 10:20:30.123 2024 GMT"
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let without_zone = normalized
        .strip_suffix(" GMT")
        .or_else(|| normalized.strip_suffix(" UTC"))
        .unwrap_or(&normalized);

    let naive = NaiveDateTime::parse_from_str(without_zone, "%b %d %H:%M:%S%.f %Y")
        .with_context(|| format!("Unrecognized timestamp '{raw}'"))?;
    Ok(naive.and_utc())
}

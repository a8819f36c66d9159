use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Storage
    pub database_path: PathBuf,
    pub data_path: PathBuf,
    pub trusted_timestamps_path: PathBuf,
    pub cookies_path: PathBuf,

    // Scheduler
    pub poll_interval: Duration,

    // Capture
    pub step_timeout: Duration,
    pub http_timeout: Duration,
    pub chrome_path: Option<String>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub page_timeout: Duration,
    pub max_full_page_height: u32,

    // Video extraction
    pub video_downloader_path: String,
    pub video_download_timeout: Duration,

    // Trusted timestamps
    pub openssl_path: String,
    pub tsa_url: String,
    pub tsa_ca_file: Option<PathBuf>,
    pub tsa_cert_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Storage
            database_path: PathBuf::from(env_or_default("DATABASE_PATH", "./data/evidence.sqlite")),
            data_path: PathBuf::from(env_or_default("DATA_PATH", "./data/downloads")),
            trusted_timestamps_path: PathBuf::from(env_or_default(
                "TRUSTED_TIMESTAMPS_PATH",
                "./data/trusted_timestamps",
            )),
            cookies_path: PathBuf::from(env_or_default("COOKIES_PATH", "./data/cookies")),

            // Scheduler
            poll_interval: Duration::from_millis(parse_env_u64("POLL_INTERVAL_MS", 1000)?),

            // Capture
            step_timeout: Duration::from_millis(parse_env_u64("STEP_TIMEOUT_MS", 2000)?),
            http_timeout: Duration::from_secs(parse_env_u64("HTTP_TIMEOUT_SECS", 60)?),
            chrome_path: optional_env("CHROME_PATH"),
            viewport_width: parse_env_u32("VIEWPORT_WIDTH", 1024)?,
            viewport_height: parse_env_u32("VIEWPORT_HEIGHT", 768)?,
            page_timeout: Duration::from_secs(parse_env_u64("PAGE_TIMEOUT_SECS", 30)?),
            max_full_page_height: parse_env_u32("MAX_FULL_PAGE_HEIGHT", 20_000)?,

            // Video extraction
            video_downloader_path: env_or_default("VIDEO_DOWNLOADER_PATH", "yt-dlp"),
            video_download_timeout: Duration::from_secs(parse_env_u64(
                "VIDEO_DOWNLOAD_TIMEOUT_SECS",
                600,
            )?),

            // Trusted timestamps
            openssl_path: env_or_default("OPENSSL_PATH", "openssl"),
            tsa_url: env_or_default("TSA_URL", "https://freetsa.org/tsr"),
            tsa_ca_file: optional_env("TSA_CA_FILE").map(PathBuf::from),
            tsa_cert_file: optional_env("TSA_CERT_FILE").map(PathBuf::from),
        })
    }

    /// Configuration rooted in `root`, with no settle delay between capture steps.
    #[must_use]
    pub fn for_testing(root: &Path) -> Self {
        Self {
            database_path: root.join("evidence.sqlite"),
            data_path: root.join("downloads"),
            trusted_timestamps_path: root.join("trusted_timestamps"),
            cookies_path: root.join("cookies"),
            poll_interval: Duration::from_millis(10),
            step_timeout: Duration::ZERO,
            http_timeout: Duration::from_secs(10),
            chrome_path: None,
            viewport_width: 1024,
            viewport_height: 768,
            page_timeout: Duration::from_secs(10),
            max_full_page_height: 20_000,
            video_downloader_path: "yt-dlp".to_string(),
            video_download_timeout: Duration::from_secs(60),
            openssl_path: "openssl".to_string(),
            tsa_url: "https://freetsa.org/tsr".to_string(),
            tsa_ca_file: None,
            tsa_cert_file: None,
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "POLL_INTERVAL_MS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.viewport_width == 0 || self.viewport_height == 0 {
            return Err(ConfigError::InvalidValue {
                name: "VIEWPORT_WIDTH/VIEWPORT_HEIGHT".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.tsa_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "TSA_URL".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if url::Url::parse(&self.tsa_url).is_err() {
            return Err(ConfigError::InvalidValue {
                name: "TSA_URL".to_string(),
                message: format!("not a valid URL: '{}'", self.tsa_url),
            });
        }
        if self.tsa_ca_file.is_some() != self.tsa_cert_file.is_some() {
            return Err(ConfigError::InvalidValue {
                name: "TSA_CA_FILE/TSA_CERT_FILE".to_string(),
                message: "receipt verification needs both files".to_string(),
            });
        }
        Ok(())
    }

    /// Directory holding the artifacts of one evidence item.
    #[must_use]
    pub fn evidence_dir(&self, evidence_id: &str) -> PathBuf {
        self.data_path.join(evidence_id)
    }

    /// Whether timestamp receipts are verified against the authority's certificates.
    #[must_use]
    pub fn verifies_receipts(&self) -> bool {
        self.tsa_ca_file.is_some() && self.tsa_cert_file.is_some()
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

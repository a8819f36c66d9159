use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of an evidence item.
///
/// `Scheduled -> Processing -> Processed | Error`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceStatus {
    Scheduled,
    Processing,
    Processed,
    Error,
}

impl EvidenceStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Processing => "PROCESSING",
            Self::Processed => "PROCESSED",
            Self::Error => "ERROR",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SCHEDULED" => Some(Self::Scheduled),
            "PROCESSING" => Some(Self::Processing),
            "PROCESSED" => Some(Self::Processed),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Error)
    }
}

/// A browser cookie submitted with the evidence, used to replay a session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
    /// Seconds since the Unix epoch; absent for session cookies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<bool>,
}

impl Cookie {
    #[must_use]
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            ..Default::default()
        }
    }
}

/// Content class of a captured artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Content,
    Screenshot,
    Video,
}

impl ArtifactKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Screenshot => "screenshot",
            Self::Video => "video",
        }
    }
}

/// A captured file, relative to the artifact store root (`<evidence id>/<file>`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
}

impl Artifact {
    #[must_use]
    pub fn new(evidence_id: &str, file_name: &str, kind: ArtifactKind) -> Self {
        Self {
            path: format!("{evidence_id}/{file_name}"),
            kind,
        }
    }

    /// Attach the artifact's SHA-512 checksum.
    #[must_use]
    pub fn with_checksum(self, sha512checksum: String) -> Download {
        Download {
            path: self.path,
            kind: self.kind,
            sha512checksum,
        }
    }
}

/// A fingerprinted artifact as recorded on a processed evidence item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Download {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    pub sha512checksum: String,
}

/// Paths of the timestamp receipt files, relative to the timestamp store root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TsaFiles {
    pub all_checksums_relative_path: String,
    pub ts_request_relative_path: String,
    pub ts_response_relative_path: String,
}

/// The unit of work and its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: String,
    pub user: String,
    pub url: String,
    pub cookies: Vec<Cookie>,
    /// Cookie jar file name, relative to the cookies directory.
    pub cookies_file: String,
    pub status: EvidenceStatus,
    pub title: Option<String>,
    pub downloads: Vec<Download>,
    pub date: Option<DateTime<Utc>>,
    pub tsa_files: Option<TsaFiles>,
    pub error: Option<String>,
    pub created_at: String,
}

/// Raw `evidences` row; JSON columns are decoded by [`Evidence::try_from`].
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EvidenceRow {
    pub id: String,
    pub user_id: String,
    pub url: String,
    pub cookies: String,
    pub cookies_file: String,
    pub status: String,
    pub title: Option<String>,
    pub downloads: String,
    pub date: Option<String>,
    pub tsa_files: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
}

impl TryFrom<EvidenceRow> for Evidence {
    type Error = anyhow::Error;

    fn try_from(row: EvidenceRow) -> Result<Self> {
        let status = EvidenceStatus::from_str(&row.status)
            .with_context(|| format!("Unknown evidence status '{}'", row.status))?;
        let cookies = serde_json::from_str(&row.cookies).context("Invalid cookies column")?;
        let downloads =
            serde_json::from_str(&row.downloads).context("Invalid downloads column")?;
        let date = row
            .date
            .as_deref()
            .map(DateTime::parse_from_rfc3339)
            .transpose()
            .context("Invalid date column")?
            .map(|d| d.with_timezone(&Utc));
        let tsa_files = row
            .tsa_files
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("Invalid tsa_files column")?;

        Ok(Self {
            id: row.id,
            user: row.user_id,
            url: row.url,
            cookies,
            cookies_file: row.cookies_file,
            status,
            title: row.title,
            downloads,
            date,
            tsa_files,
            error: row.error,
            created_at: row.created_at,
        })
    }
}

/// Data for inserting a new evidence item.
#[derive(Debug, Clone)]
pub struct NewEvidence {
    pub url: String,
    pub user: String,
    pub cookies: Vec<Cookie>,
}

/// Result fields written when an item reaches PROCESSED.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedEvidence {
    pub title: String,
    pub downloads: Vec<Download>,
    pub date: DateTime<Utc>,
    pub tsa_files: TsaFiles,
}

/// The finalizing write of a claimed item.
#[derive(Debug, Clone, PartialEq)]
pub enum EvidenceUpdate {
    Processed(ProcessedEvidence),
    Failed { error: String, date: DateTime<Utc> },
}

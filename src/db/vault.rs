//! The evidence store as seen by the processing pipeline.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use super::models::{Cookie, Evidence, EvidenceStatus, EvidenceUpdate, NewEvidence};
use super::queries;
use super::Database;

/// Narrow store contract consumed by the job pipeline.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Atomically move the next SCHEDULED item to PROCESSING.
    ///
    /// Returns `None` without touching any record when nothing is scheduled.
    async fn claim_next(&self) -> Result<Option<Evidence>>;

    /// Write the terminal state of a claimed item.
    async fn update(&self, id: &str, update: EvidenceUpdate) -> Result<()>;
}

/// `SQLite`-backed evidence store.
#[derive(Debug, Clone)]
pub struct Vault {
    db: Database,
}

impl Vault {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Schedule a new evidence item for `user`.
    pub async fn create(&self, url: &str, user: &str, cookies: Vec<Cookie>) -> Result<Evidence> {
        let evidence = queries::create_evidence(
            self.db.pool(),
            &NewEvidence {
                url: url.to_string(),
                user: user.to_string(),
                cookies,
            },
        )
        .await?;
        info!(evidence_id = %evidence.id, url = %url, "Evidence created");
        Ok(evidence)
    }

    /// Fetch one of `user`'s evidence items.
    pub async fn get_one(&self, id: &str, user: &str) -> Result<Option<Evidence>> {
        queries::get_evidence_for_user(self.db.pool(), id, user).await
    }

    /// List `user`'s evidence items, optionally restricted to one status.
    pub async fn get_by_user(
        &self,
        user: &str,
        status: Option<EvidenceStatus>,
        limit: i64,
    ) -> Result<Vec<Evidence>> {
        queries::get_evidences_by_user(self.db.pool(), user, status, limit).await
    }

    /// Fail items a previous process left PROCESSING.
    pub async fn fail_interrupted(&self) -> Result<u64> {
        queries::fail_interrupted_evidences(
            self.db.pool(),
            "processing interrupted before completion",
        )
        .await
    }
}

#[async_trait]
impl EvidenceStore for Vault {
    async fn claim_next(&self) -> Result<Option<Evidence>> {
        queries::claim_next_scheduled(self.db.pool()).await
    }

    async fn update(&self, id: &str, update: EvidenceUpdate) -> Result<()> {
        match update {
            EvidenceUpdate::Processed(result) => {
                queries::set_evidence_processed(self.db.pool(), id, &result).await
            }
            EvidenceUpdate::Failed { error, date } => {
                queries::set_evidence_error(self.db.pool(), id, &error, &date).await
            }
        }
    }
}

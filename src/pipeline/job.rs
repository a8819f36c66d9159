use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info};

use crate::capture::EvidenceJob;
use crate::checksum::checksum_file;
use crate::constants::AGGREGATE_CHECKSUM;
use crate::db::{Evidence, EvidenceStore, EvidenceUpdate, ProcessedEvidence, TsaFiles};
use crate::tsa::TsaService;

/// How a claimed item ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Processed(String),
    Failed { id: String, error: String },
}

/// Drives one evidence item from claim to its terminal state.
pub struct ProcessJob {
    store: Arc<dyn EvidenceStore>,
    job: Arc<dyn EvidenceJob>,
    tsa: Arc<TsaService>,
    data_path: PathBuf,
    timestamps_path: PathBuf,
}

impl ProcessJob {
    #[must_use]
    pub fn new(
        store: Arc<dyn EvidenceStore>,
        job: Arc<dyn EvidenceJob>,
        tsa: Arc<TsaService>,
        data_path: &Path,
        timestamps_path: &Path,
    ) -> Self {
        Self {
            store,
            job,
            tsa,
            data_path: data_path.to_path_buf(),
            timestamps_path: timestamps_path.to_path_buf(),
        }
    }

    /// Claim the next scheduled item and process it.
    ///
    /// Returns `Ok(None)` when nothing is scheduled. Capture, checksum and
    /// timestamp failures are recorded on the item and reported as
    /// [`JobOutcome::Failed`]; only store failures surface as `Err`.
    ///
    /// # Errors
    ///
    /// Returns an error if claiming or the finalizing write fails.
    pub async fn execute(&self) -> Result<Option<JobOutcome>> {
        let Some(evidence) = self.store.claim_next().await? else {
            return Ok(None);
        };

        let start = Instant::now();
        info!(evidence_id = %evidence.id, url = %evidence.url, "Preserving evidence");

        match self.preserve(&evidence).await {
            Ok(processed) => {
                let artifacts = processed.downloads.len();
                self.store
                    .update(&evidence.id, EvidenceUpdate::Processed(processed))
                    .await?;
                info!(
                    evidence_id = %evidence.id,
                    url = %evidence.url,
                    artifacts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Evidence preserved"
                );
                Ok(Some(JobOutcome::Processed(evidence.id)))
            }
            Err(e) => {
                let message = format!("{e:#}");
                error!(
                    evidence_id = %evidence.id,
                    url = %evidence.url,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    error = %message,
                    "Evidence preservation failed"
                );
                self.store
                    .update(
                        &evidence.id,
                        EvidenceUpdate::Failed {
                            error: message.clone(),
                            date: Utc::now(),
                        },
                    )
                    .await?;
                Ok(Some(JobOutcome::Failed {
                    id: evidence.id,
                    error: message,
                }))
            }
        }
    }

    /// Capture, fingerprint and timestamp one item.
    async fn preserve(&self, evidence: &Evidence) -> Result<ProcessedEvidence> {
        let results = self.job.run(evidence).await?;

        let mut downloads = Vec::with_capacity(results.downloads.len());
        for artifact in results.downloads {
            let checksum = checksum_file(&self.data_path.join(&artifact.path)).await?;
            downloads.push(artifact.with_checksum(checksum));
        }

        let subfolder = evidence.id.as_str();
        let timestamp_dir = self.timestamps_path.join(subfolder);
        tokio::fs::create_dir_all(&timestamp_dir)
            .await
            .with_context(|| format!("Failed to create {}", timestamp_dir.display()))?;

        let aggregate_path = timestamp_dir.join(AGGREGATE_CHECKSUM);
        let aggregate = downloads
            .iter()
            .map(|d| d.sha512checksum.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        tokio::fs::write(&aggregate_path, aggregate)
            .await
            .with_context(|| format!("Failed to write {}", aggregate_path.display()))?;

        let receipt = self.tsa.timestamp(&aggregate_path, subfolder).await?;

        Ok(ProcessedEvidence {
            title: results.title,
            downloads,
            date: receipt.date,
            tsa_files: TsaFiles {
                all_checksums_relative_path: format!("{subfolder}/{AGGREGATE_CHECKSUM}"),
                ts_request_relative_path: receipt.request_relative_path,
                ts_response_relative_path: receipt.response_relative_path,
            },
        })
    }
}

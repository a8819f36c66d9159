use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::RngCore;
use sqlx::SqlitePool;

use super::models::{
    Evidence, EvidenceRow, EvidenceStatus, NewEvidence, ProcessedEvidence,
};
use super::StoreError;
use crate::constants::EVIDENCES_RETURN_MAX_LIMIT;

// ========== Evidences ==========

/// Generate a new opaque evidence id (24 lowercase hex characters).
#[must_use]
pub fn generate_evidence_id() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn to_db_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Insert a new SCHEDULED evidence item and return it.
pub async fn create_evidence(pool: &SqlitePool, evidence: &NewEvidence) -> Result<Evidence> {
    let id = generate_evidence_id();
    let cookies_file = format!("{id}.txt");
    let cookies =
        serde_json::to_string(&evidence.cookies).context("Failed to serialize cookies")?;

    sqlx::query(
        r"
        INSERT INTO evidences (id, user_id, url, cookies, cookies_file, status, downloads)
        VALUES (?, ?, ?, ?, ?, 'SCHEDULED', '[]')
        ",
    )
    .bind(&id)
    .bind(&evidence.user)
    .bind(&evidence.url)
    .bind(&cookies)
    .bind(&cookies_file)
    .execute(pool)
    .await
    .context("Failed to insert evidence")?;

    get_evidence(pool, &id)
        .await?
        .context("Something went wrong with evidence creation")
}

/// Get an evidence item by id, regardless of owner.
pub async fn get_evidence(pool: &SqlitePool, id: &str) -> Result<Option<Evidence>> {
    let row: Option<EvidenceRow> = sqlx::query_as("SELECT * FROM evidences WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch evidence")?;

    row.map(Evidence::try_from).transpose()
}

/// Get an evidence item by id, scoped to its owner.
pub async fn get_evidence_for_user(
    pool: &SqlitePool,
    id: &str,
    user: &str,
) -> Result<Option<Evidence>> {
    let row: Option<EvidenceRow> =
        sqlx::query_as("SELECT * FROM evidences WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user)
            .fetch_optional(pool)
            .await
            .context("Failed to fetch evidence for user")?;

    row.map(Evidence::try_from).transpose()
}

/// List a user's evidence items, oldest first.
///
/// The limit is clamped to [`EVIDENCES_RETURN_MAX_LIMIT`].
pub async fn get_evidences_by_user(
    pool: &SqlitePool,
    user: &str,
    status: Option<EvidenceStatus>,
    limit: i64,
) -> Result<Vec<Evidence>> {
    let limit = if limit <= 0 || limit > EVIDENCES_RETURN_MAX_LIMIT {
        EVIDENCES_RETURN_MAX_LIMIT
    } else {
        limit
    };

    let rows: Vec<EvidenceRow> = sqlx::query_as(
        r"
        SELECT * FROM evidences
        WHERE user_id = ?
          AND (? IS NULL OR status = ?)
        ORDER BY created_at ASC, rowid ASC
        LIMIT ?
        ",
    )
    .bind(user)
    .bind(status.map(|s| s.as_str()))
    .bind(status.map(|s| s.as_str()))
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to fetch evidences for user")?;

    rows.into_iter().map(Evidence::try_from).collect()
}

/// Atomically move the oldest SCHEDULED item to PROCESSING and return it.
///
/// This is a single statement, so two concurrent callers can never claim the
/// same row.
pub async fn claim_next_scheduled(pool: &SqlitePool) -> Result<Option<Evidence>> {
    let row: Option<EvidenceRow> = sqlx::query_as(
        r"
        UPDATE evidences
        SET status = 'PROCESSING'
        WHERE id = (
            SELECT id FROM evidences
            WHERE status = 'SCHEDULED'
            ORDER BY created_at ASC, rowid ASC
            LIMIT 1
        )
          AND status = 'SCHEDULED'
        RETURNING *
        ",
    )
    .fetch_optional(pool)
    .await
    .context("Failed to claim next scheduled evidence")?;

    row.map(Evidence::try_from).transpose()
}

/// Finalize a PROCESSING item as PROCESSED with all result fields.
pub async fn set_evidence_processed(
    pool: &SqlitePool,
    id: &str,
    result: &ProcessedEvidence,
) -> Result<()> {
    let downloads =
        serde_json::to_string(&result.downloads).context("Failed to serialize downloads")?;
    let tsa_files =
        serde_json::to_string(&result.tsa_files).context("Failed to serialize tsa files")?;

    let done = sqlx::query(
        r"
        UPDATE evidences
        SET status = 'PROCESSED',
            title = ?,
            downloads = ?,
            date = ?,
            tsa_files = ?,
            error = NULL
        WHERE id = ? AND status = 'PROCESSING'
        ",
    )
    .bind(&result.title)
    .bind(&downloads)
    .bind(to_db_date(&result.date))
    .bind(&tsa_files)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to set evidence processed")?;

    if done.rows_affected() == 0 {
        return Err(StoreError::NotProcessing(id.to_string()).into());
    }
    Ok(())
}

/// Finalize a PROCESSING item as ERROR. Downloads and receipts stay empty.
pub async fn set_evidence_error(
    pool: &SqlitePool,
    id: &str,
    error: &str,
    date: &DateTime<Utc>,
) -> Result<()> {
    let done = sqlx::query(
        r"
        UPDATE evidences
        SET status = 'ERROR',
            error = ?,
            date = ?,
            downloads = '[]',
            tsa_files = NULL
        WHERE id = ? AND status = 'PROCESSING'
        ",
    )
    .bind(error)
    .bind(to_db_date(date))
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to set evidence error")?;

    if done.rows_affected() == 0 {
        return Err(StoreError::NotProcessing(id.to_string()).into());
    }
    Ok(())
}

/// Move every item still PROCESSING to ERROR.
///
/// Only safe while no worker is running, i.e. at start-up.
pub async fn fail_interrupted_evidences(pool: &SqlitePool, error: &str) -> Result<u64> {
    let result = sqlx::query(
        r"
        UPDATE evidences
        SET status = 'ERROR',
            error = ?,
            date = ?
        WHERE status = 'PROCESSING'
        ",
    )
    .bind(error)
    .bind(to_db_date(&Utc::now()))
    .execute(pool)
    .await
    .context("Failed to fail interrupted evidences")?;

    Ok(result.rows_affected())
}

/// Count evidence items grouped by status.
pub async fn count_evidences_by_status(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    sqlx::query_as("SELECT status, COUNT(*) FROM evidences GROUP BY status ORDER BY status")
        .fetch_all(pool)
        .await
        .context("Failed to count evidences by status")
}

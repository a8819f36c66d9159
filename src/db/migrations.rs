use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: creating evidences table");

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS evidences (
            id TEXT PRIMARY KEY NOT NULL,
            user_id TEXT NOT NULL,
            url TEXT NOT NULL,
            cookies TEXT NOT NULL DEFAULT '[]',
            cookies_file TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'SCHEDULED'
                CHECK (status IN ('SCHEDULED', 'PROCESSING', 'PROCESSED', 'ERROR')),
            title TEXT,
            downloads TEXT NOT NULL DEFAULT '[]',
            date TEXT,
            tsa_files TEXT,
            error TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create evidences table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_evidences_status ON evidences(status, created_at)")
        .execute(pool)
        .await
        .context("Failed to create status index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_evidences_user ON evidences(user_id, created_at)")
        .execute(pool)
        .await
        .context("Failed to create user index")?;

    Ok(())
}

use anyhow::Result;

use crate::config::Config;
use crate::db;

/// Create the case schema. Safe to run repeatedly.
///
/// Tables keep their implicit rowid; list queries order by it to return
/// rows in insertion order.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cases (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'open',
            risk_level TEXT,
            cloud_consent INTEGER NOT NULL DEFAULT 0,
            last_run_id TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS case_files (
            id TEXT PRIMARY KEY,
            case_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            format TEXT NOT NULL,
            message_count INTEGER NOT NULL,
            preview TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (case_id) REFERENCES cases(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            file_id TEXT NOT NULL,
            seq_index INTEGER NOT NULL,
            sender TEXT NOT NULL,
            timestamp TEXT,
            text TEXT NOT NULL,
            line INTEGER NOT NULL,
            PRIMARY KEY (file_id, seq_index),
            FOREIGN KEY (file_id) REFERENCES case_files(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS findings (
            id TEXT PRIMARY KEY,
            case_id TEXT NOT NULL,
            file_id TEXT NOT NULL,
            run_id TEXT NOT NULL,
            window_index INTEGER NOT NULL,
            ordinal INTEGER NOT NULL,
            category TEXT NOT NULL,
            severity TEXT NOT NULL,
            source TEXT NOT NULL,
            reduced_confidence INTEGER NOT NULL DEFAULT 0,
            quote TEXT,
            explanation TEXT NOT NULL,
            pillars TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            FOREIGN KEY (case_id) REFERENCES cases(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reports (
            case_id TEXT PRIMARY KEY,
            markdown TEXT NOT NULL,
            integrity_hash TEXT NOT NULL,
            FOREIGN KEY (case_id) REFERENCES cases(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_case_files_case_id ON case_files(case_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_findings_case_id ON findings(case_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_findings_run_id ON findings(run_id)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}

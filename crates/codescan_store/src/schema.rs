//! Schema creation for the scan pipeline's relational store.
//!
//! All `CREATE TABLE` statements live here — single source of truth,
//! applied idempotently at startup.

use crate::error::Result;
use crate::pool::DbPool;
use tracing::info;

/// Ensure every table and index this crate's repository functions depend on
/// exists. Safe to call on every process start.
pub async fn ensure_schema(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS scans (
            scan_id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            status TEXT NOT NULL,
            progress INTEGER NOT NULL DEFAULT 0,
            params_json TEXT NOT NULL DEFAULT '{}'
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            scan_id TEXT NOT NULL REFERENCES scans(scan_id) ON DELETE CASCADE,
            filename TEXT NOT NULL,
            object_key TEXT NOT NULL,
            checksum TEXT NOT NULL,
            language TEXT,
            size INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            normalized_at TEXT
        )"#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_scan_id ON files(scan_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_checksum ON files(checksum)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            scan_id TEXT NOT NULL REFERENCES scans(scan_id) ON DELETE CASCADE,
            file_a_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            file_b_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            score REAL NOT NULL,
            details_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (scan_id, file_a_id, file_b_id)
        )"#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_results_scan_id ON results(scan_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS alerts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            scan_id TEXT,
            service TEXT NOT NULL,
            error_code TEXT NOT NULL,
            message TEXT NOT NULL,
            payload_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )"#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_alerts_scan_id ON alerts(scan_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_alerts_created_at ON alerts(created_at)")
        .execute(pool)
        .await?;

    sqlx::query("INSERT OR IGNORE INTO schema_migrations(version) VALUES ('001_init')")
        .execute(pool)
        .await?;

    info!("store schema verified");
    Ok(())
}

//! Relational store operations.
//!
//! Postgres's `jsonb_set`/`||` made the original implementation's
//! `params_patch` merges a one-liner; sqlite has no equivalent operator, so
//! non-latch patches here read-modify-write inside a transaction instead.
//! The two single-shot latches (`pairs_generated`, `done_emitted`) stay a
//! single conditional `UPDATE ... WHERE ... RETURNING`, same as the
//! teacher's job-claim pattern, so concurrent workers still race safely
//! without a transaction round-trip.

use crate::error::Result;
use crate::models::{AlertRow, FileRow, ResultPairRow, ScanParams, ScanRow, ScanSummaryRow};
use crate::pool::DbPool;
use codescan_protocol::{label_for_score, defaults::MAX_SCAN_LOG_ENTRIES, ScanLogEntry, ScanStatus};

pub async fn create_scan(
    pool: &DbPool,
    scan_id: &str,
    status: ScanStatus,
    params: &ScanParams,
) -> Result<()> {
    let params_json = serde_json::to_string(params)?;
    sqlx::query(
        "INSERT INTO scans(scan_id, status, progress, params_json) VALUES (?, ?, 0, ?)",
    )
    .bind(scan_id)
    .bind(status.as_str())
    .bind(params_json)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_file(
    pool: &DbPool,
    scan_id: &str,
    filename: &str,
    object_key: &str,
    checksum: &str,
    language: Option<&str>,
    size: i64,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"INSERT INTO files(scan_id, filename, object_key, checksum, language, size)
           VALUES (?, ?, ?, ?, ?, ?)
           RETURNING id"#,
    )
    .bind(scan_id)
    .bind(filename)
    .bind(object_key)
    .bind(checksum)
    .bind(language)
    .bind(size)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn get_scan(pool: &DbPool, scan_id: &str) -> Result<Option<ScanRow>> {
    let row = sqlx::query_as::<_, ScanRow>(
        "SELECT scan_id, created_at, status, progress, params_json FROM scans WHERE scan_id = ?",
    )
    .bind(scan_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Set `status` and/or `progress`, leaving whichever is `None` unchanged.
///
/// Unconditional: callers that must not regress a terminal scan (DONE or
/// FAILED) use a guarded variant instead — see
/// [`mark_normalizing_on_first_submission`] and [`try_mark_pairs_generated`].
pub async fn update_scan_status_progress(
    pool: &DbPool,
    scan_id: &str,
    status: Option<ScanStatus>,
    progress: Option<i32>,
) -> Result<()> {
    sqlx::query(
        r#"UPDATE scans
           SET status = COALESCE(?, status),
               progress = COALESCE(?, progress)
           WHERE scan_id = ?"#,
    )
    .bind(status.map(|s| s.as_str()))
    .bind(progress)
    .bind(scan_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// `PENDING -> NORMALIZING, progress = 1`, but only on the scan's first
/// `submitted` message: the `WHERE status = 'PENDING'` guard makes a
/// redelivered `submitted` event a no-op instead of regressing a scan that
/// has already progressed past NORMALIZING (or completed/failed).
pub async fn mark_normalizing_on_first_submission(pool: &DbPool, scan_id: &str) -> Result<()> {
    sqlx::query(
        r#"UPDATE scans
           SET status = 'NORMALIZING', progress = 1
           WHERE scan_id = ? AND status = 'PENDING'"#,
    )
    .bind(scan_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Append one line to `params.logs`, capped to the last
/// [`MAX_SCAN_LOG_ENTRIES`] entries.
pub async fn append_scan_log(pool: &DbPool, scan_id: &str, message: &str) -> Result<()> {
    let mut tx = pool.begin().await?;

    let params_json: Option<String> =
        sqlx::query_scalar("SELECT params_json FROM scans WHERE scan_id = ?")
            .bind(scan_id)
            .fetch_optional(&mut *tx)
            .await?;
    let Some(params_json) = params_json else {
        tx.commit().await?;
        return Ok(());
    };

    let mut params: ScanParams = serde_json::from_str(&params_json)?;
    params.logs.push(ScanLogEntry {
        time: chrono::Utc::now().format("%H:%M:%S").to_string(),
        message: message.to_string(),
    });
    if params.logs.len() > MAX_SCAN_LOG_ENTRIES {
        let overflow = params.logs.len() - MAX_SCAN_LOG_ENTRIES;
        params.logs.drain(0..overflow);
    }

    sqlx::query("UPDATE scans SET params_json = ? WHERE scan_id = ?")
        .bind(serde_json::to_string(&params)?)
        .bind(scan_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Set `normalized_at` the first time it's called for a file; a second
/// call is a no-op (idempotent against redelivery).
pub async fn mark_file_normalized(pool: &DbPool, file_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE files SET normalized_at = CURRENT_TIMESTAMP WHERE id = ? AND normalized_at IS NULL",
    )
    .bind(file_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_files_for_scan(pool: &DbPool, scan_id: &str) -> Result<Vec<FileRow>> {
    let rows = sqlx::query_as::<_, FileRow>(
        r#"SELECT id, scan_id, filename, object_key, checksum, language, size, created_at, normalized_at
           FROM files WHERE scan_id = ? ORDER BY id ASC"#,
    )
    .bind(scan_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// `(total, normalized)` file counts for a scan.
pub async fn count_files_normalized(pool: &DbPool, scan_id: &str) -> Result<(i64, i64)> {
    let row: (i64, i64) = sqlx::query_as(
        r#"SELECT COUNT(*), COUNT(*) FILTER (WHERE normalized_at IS NOT NULL)
           FROM files WHERE scan_id = ?"#,
    )
    .bind(scan_id)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Atomically flip the `pairs_generated` latch. Returns `true` only for the
/// caller that actually flipped it — every later caller (or a concurrent
/// racer) gets `false` and must not re-emit pair events.
pub async fn try_mark_pairs_generated(
    pool: &DbPool,
    scan_id: &str,
    total_pairs: i64,
) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let params_json: Option<String> =
        sqlx::query_scalar("SELECT params_json FROM scans WHERE scan_id = ? AND status != 'FAILED'")
            .bind(scan_id)
            .fetch_optional(&mut *tx)
            .await?;
    let Some(params_json) = params_json else {
        tx.commit().await?;
        return Ok(false);
    };

    let mut params: ScanParams = serde_json::from_str(&params_json)?;
    if params.pairs_generated {
        tx.commit().await?;
        return Ok(false);
    }
    params.pairs_generated = true;
    params.total_pairs = Some(total_pairs);

    let rows_affected = sqlx::query(
        r#"UPDATE scans SET params_json = ?
           WHERE scan_id = ? AND json_extract(params_json, '$.pairs_generated') IS NOT 1"#,
    )
    .bind(serde_json::to_string(&params)?)
    .bind(scan_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;
    Ok(rows_affected > 0)
}

/// Set `progress` alone, but only while the scan is still active —
/// guards against a duplicate `candidates` redelivery recomputing a lower
/// `processed/total` ratio and regressing `progress` after the scan has
/// already reached DONE or FAILED.
pub async fn update_progress_if_active(pool: &DbPool, scan_id: &str, progress: i32) -> Result<()> {
    sqlx::query(
        r#"UPDATE scans SET progress = ?
           WHERE scan_id = ? AND status NOT IN ('DONE', 'FAILED')"#,
    )
    .bind(progress)
    .bind(scan_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn upsert_result(
    pool: &DbPool,
    scan_id: &str,
    file_a_id: i64,
    file_b_id: i64,
    score: f64,
    details_json: &str,
) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO results(scan_id, file_a_id, file_b_id, score, details_json)
           VALUES (?, ?, ?, ?, ?)
           ON CONFLICT (scan_id, file_a_id, file_b_id)
           DO UPDATE SET score = excluded.score, details_json = excluded.details_json"#,
    )
    .bind(scan_id)
    .bind(file_a_id)
    .bind(file_b_id)
    .bind(score)
    .bind(details_json)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn count_results(pool: &DbPool, scan_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM results WHERE scan_id = ?")
        .bind(scan_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn get_total_pairs(pool: &DbPool, scan_id: &str) -> Result<Option<i64>> {
    let Some(scan) = get_scan(pool, scan_id).await? else {
        return Ok(None);
    };
    Ok(scan.params()?.total_pairs)
}

/// Atomically flip the `done_emitted` latch, same pattern as
/// [`try_mark_pairs_generated`].
pub async fn try_mark_done_emitted(pool: &DbPool, scan_id: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let params_json: Option<String> =
        sqlx::query_scalar("SELECT params_json FROM scans WHERE scan_id = ?")
            .bind(scan_id)
            .fetch_optional(&mut *tx)
            .await?;
    let Some(params_json) = params_json else {
        tx.commit().await?;
        return Ok(false);
    };

    let mut params: ScanParams = serde_json::from_str(&params_json)?;
    if params.done_emitted {
        tx.commit().await?;
        return Ok(false);
    }
    params.done_emitted = true;

    let rows_affected = sqlx::query(
        r#"UPDATE scans SET params_json = ?
           WHERE scan_id = ? AND json_extract(params_json, '$.done_emitted') IS NOT 1"#,
    )
    .bind(serde_json::to_string(&params)?)
    .bind(scan_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;
    Ok(rows_affected > 0)
}

/// Record the scan's wall-clock runtime once scoring completes.
pub async fn set_runtime_ms(pool: &DbPool, scan_id: &str, runtime_ms: i64) -> Result<()> {
    let mut tx = pool.begin().await?;
    let params_json: Option<String> =
        sqlx::query_scalar("SELECT params_json FROM scans WHERE scan_id = ?")
            .bind(scan_id)
            .fetch_optional(&mut *tx)
            .await?;
    let Some(params_json) = params_json else {
        tx.commit().await?;
        return Ok(());
    };
    let mut params: ScanParams = serde_json::from_str(&params_json)?;
    params.runtime_ms = Some(runtime_ms);
    sqlx::query("UPDATE scans SET params_json = ? WHERE scan_id = ?")
        .bind(serde_json::to_string(&params)?)
        .bind(scan_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

pub async fn insert_alert(
    pool: &DbPool,
    scan_id: Option<&str>,
    service: &str,
    error_code: &str,
    message: &str,
    payload_json: &str,
) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO alerts(scan_id, service, error_code, message, payload_json)
           VALUES (?, ?, ?, ?, ?)"#,
    )
    .bind(scan_id)
    .bind(service)
    .bind(error_code)
    .bind(message)
    .bind(payload_json)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_alerts(
    pool: &DbPool,
    scan_id: Option<&str>,
    limit: i64,
) -> Result<Vec<AlertRow>> {
    let rows = match scan_id {
        Some(scan_id) => {
            sqlx::query_as::<_, AlertRow>(
                r#"SELECT id, scan_id, service, error_code, message, payload_json, created_at
                   FROM alerts WHERE scan_id = ? ORDER BY created_at DESC LIMIT ?"#,
            )
            .bind(scan_id)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, AlertRow>(
                r#"SELECT id, scan_id, service, error_code, message, payload_json, created_at
                   FROM alerts ORDER BY created_at DESC LIMIT ?"#,
            )
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows)
}

/// Scored pairs for a scan, highest similarity first, with each row's
/// display label already projected from its score.
pub async fn list_results_pairs_for_scan(
    pool: &DbPool,
    scan_id: &str,
    limit: i64,
) -> Result<Vec<ResultPairRow>> {
    let rows: Vec<(f64, String, String, String)> = sqlx::query_as(
        r#"SELECT r.score, r.details_json, fa.filename, fb.filename
           FROM results r
           JOIN files fa ON fa.id = r.file_a_id
           JOIN files fb ON fb.id = r.file_b_id
           WHERE r.scan_id = ?
           ORDER BY r.score DESC
           LIMIT ?"#,
    )
    .bind(scan_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(score, details_json, file_a, file_b)| ResultPairRow {
            file_a,
            file_b,
            score,
            label: label_for_score(score).as_str(),
            details_json,
        })
        .collect())
}

pub async fn list_scans_summary(pool: &DbPool, limit: i64) -> Result<Vec<ScanSummaryRow>> {
    let rows = sqlx::query_as::<_, ScanSummaryRow>(
        r#"SELECT
             s.scan_id,
             s.created_at,
             s.status,
             s.progress,
             COALESCE(json_extract(s.params_json, '$.runtime_ms'), 0) AS runtime_ms,
             COUNT(DISTINCT f.id) AS file_count,
             COALESCE(
               json_extract(s.params_json, '$.total_pairs'),
               (COUNT(DISTINCT f.id) * MAX(COUNT(DISTINCT f.id) - 1, 0)) / 2
             ) AS pair_count,
             COALESCE(MAX(r.score), 0.0) AS top_similarity,
             COALESCE(SUM(CASE WHEN r.score > 70 THEN 1 ELSE 0 END), 0) AS high_risk_count
           FROM scans s
           LEFT JOIN files f ON f.scan_id = s.scan_id
           LEFT JOIN results r ON r.scan_id = s.scan_id
           GROUP BY s.scan_id
           ORDER BY s.created_at DESC
           LIMIT ?"#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{create_pool, DbConfig};
    use crate::schema::ensure_schema;

    async fn test_pool() -> DbPool {
        let pool = create_pool(&DbConfig::sqlite_memory()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn create_and_fetch_scan_roundtrips() {
        let pool = test_pool().await;
        create_scan(&pool, "scan-1", ScanStatus::Pending, &ScanParams::default())
            .await
            .unwrap();

        let scan = get_scan(&pool, "scan-1").await.unwrap().unwrap();
        assert_eq!(scan.status, "PENDING");
        assert_eq!(scan.progress, 0);
    }

    #[tokio::test]
    async fn pairs_generated_latch_flips_exactly_once() {
        let pool = test_pool().await;
        create_scan(&pool, "scan-1", ScanStatus::Pending, &ScanParams::default())
            .await
            .unwrap();

        let first = try_mark_pairs_generated(&pool, "scan-1", 10).await.unwrap();
        let second = try_mark_pairs_generated(&pool, "scan-1", 10).await.unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(get_total_pairs(&pool, "scan-1").await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn done_emitted_latch_flips_exactly_once() {
        let pool = test_pool().await;
        create_scan(&pool, "scan-1", ScanStatus::Pending, &ScanParams::default())
            .await
            .unwrap();

        assert!(try_mark_done_emitted(&pool, "scan-1").await.unwrap());
        assert!(!try_mark_done_emitted(&pool, "scan-1").await.unwrap());
    }

    #[tokio::test]
    async fn mark_file_normalized_is_idempotent() {
        let pool = test_pool().await;
        create_scan(&pool, "scan-1", ScanStatus::Pending, &ScanParams::default())
            .await
            .unwrap();
        let file_id = insert_file(&pool, "scan-1", "a.py", "key", "sum", Some("python"), 10)
            .await
            .unwrap();

        mark_file_normalized(&pool, file_id).await.unwrap();
        let (total, normalized) = count_files_normalized(&pool, "scan-1").await.unwrap();
        assert_eq!((total, normalized), (1, 1));

        // Second call must not error and must not reset anything.
        mark_file_normalized(&pool, file_id).await.unwrap();
        let (total, normalized) = count_files_normalized(&pool, "scan-1").await.unwrap();
        assert_eq!((total, normalized), (1, 1));
    }

    #[tokio::test]
    async fn append_scan_log_caps_entries() {
        let pool = test_pool().await;
        create_scan(&pool, "scan-1", ScanStatus::Pending, &ScanParams::default())
            .await
            .unwrap();

        for i in 0..(MAX_SCAN_LOG_ENTRIES + 10) {
            append_scan_log(&pool, "scan-1", &format!("line {i}")).await.unwrap();
        }

        let scan = get_scan(&pool, "scan-1").await.unwrap().unwrap();
        let params = scan.params().unwrap();
        assert_eq!(params.logs.len(), MAX_SCAN_LOG_ENTRIES);
        assert_eq!(params.logs.last().unwrap().message, "line 209");
    }

    #[tokio::test]
    async fn results_pairs_are_ordered_by_score_descending() {
        let pool = test_pool().await;
        create_scan(&pool, "scan-1", ScanStatus::Pending, &ScanParams::default())
            .await
            .unwrap();
        let a = insert_file(&pool, "scan-1", "a.py", "ka", "h1", None, 1).await.unwrap();
        let b = insert_file(&pool, "scan-1", "b.py", "kb", "h2", None, 1).await.unwrap();
        let c = insert_file(&pool, "scan-1", "c.py", "kc", "h3", None, 1).await.unwrap();

        upsert_result(&pool, "scan-1", a, b, 42.0, "{}").await.unwrap();
        upsert_result(&pool, "scan-1", a, c, 91.5, "{}").await.unwrap();

        let pairs = list_results_pairs_for_scan(&pool, "scan-1", 10).await.unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].score, 91.5);
        assert_eq!(pairs[0].label, "high");
        assert_eq!(pairs[1].label, "low");
    }
}

//! `codescan status` / `codescan results`: read-only projections over the
//! relational store, matching the reference's `/api/scan/{id}/status` and
//! `/api/scan/{id}/results` responses.

use anyhow::{Context, Result};
use codescan_store::DbPool;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ScanStatusView {
    pub status: String,
    pub progress: i64,
    pub logs: Vec<codescan_protocol::ScanLogEntry>,
    pub complete: bool,
}

pub async fn scan_status(pool: &DbPool, scan_id: &str) -> Result<ScanStatusView> {
    let scan = codescan_store::repository::get_scan(pool, scan_id)
        .await?
        .with_context(|| format!("scan not found: {scan_id}"))?;
    let params = scan.params()?;
    Ok(ScanStatusView {
        complete: matches!(scan.status.as_str(), "DONE" | "FAILED"),
        status: scan.status,
        progress: scan.progress,
        logs: params.logs,
    })
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ResultsView {
    Processing(ProcessingView),
    Ready(ReadyView),
}

#[derive(Debug, Serialize)]
pub struct ProcessingView {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReadyMeta {
    pub n_files: i64,
    pub n_pairs: i64,
    pub runtime_ms: i64,
}

#[derive(Debug, Serialize)]
pub struct ReadyPair {
    pub file_a: String,
    pub file_b: String,
    pub similarity: f64,
    pub label: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReadyView {
    pub meta: ReadyMeta,
    pub pairs: Vec<ReadyPair>,
}

pub async fn scan_results(pool: &DbPool, scan_id: &str, limit: i64) -> Result<ResultsView> {
    let scan = codescan_store::repository::get_scan(pool, scan_id)
        .await?
        .with_context(|| format!("scan not found: {scan_id}"))?;

    if scan.status != "DONE" {
        return Ok(ResultsView::Processing(ProcessingView { status: "processing" }));
    }

    let params = scan.params()?;
    let files = codescan_store::repository::list_files_for_scan(pool, scan_id).await?;
    let pairs = codescan_store::repository::list_results_pairs_for_scan(pool, scan_id, limit).await?;

    Ok(ResultsView::Ready(ReadyView {
        meta: ReadyMeta {
            n_files: files.len() as i64,
            n_pairs: pairs.len() as i64,
            runtime_ms: params.runtime_ms.unwrap_or(0),
        },
        pairs: pairs
            .into_iter()
            .map(|p| ReadyPair {
                file_a: p.file_a,
                file_b: p.file_b,
                similarity: (p.score * 10.0).round() / 10.0,
                label: p.label,
            })
            .collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use codescan_protocol::ScanStatus;
    use codescan_store::{create_pool, ensure_schema, models::ScanParams, DbConfig};

    #[tokio::test]
    async fn results_reports_processing_before_done() {
        let pool = create_pool(&DbConfig::sqlite_memory()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        codescan_store::repository::create_scan(&pool, "scan-1", ScanStatus::Scoring, &ScanParams::default())
            .await
            .unwrap();

        let view = scan_results(&pool, "scan-1", 200).await.unwrap();
        assert!(matches!(view, ResultsView::Processing(_)));
    }

    #[tokio::test]
    async fn results_lists_pairs_once_done() {
        let pool = create_pool(&DbConfig::sqlite_memory()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        codescan_store::repository::create_scan(&pool, "scan-1", ScanStatus::Done, &ScanParams::default())
            .await
            .unwrap();
        let a = codescan_store::repository::insert_file(&pool, "scan-1", "a.py", "a.py", "sum-a", None, 1)
            .await
            .unwrap();
        let b = codescan_store::repository::insert_file(&pool, "scan-1", "b.py", "b.py", "sum-b", None, 1)
            .await
            .unwrap();
        codescan_store::repository::upsert_result(&pool, "scan-1", a, b, 82.4, "{}")
            .await
            .unwrap();

        let view = scan_results(&pool, "scan-1", 200).await.unwrap();
        let ReadyView { meta, pairs } = match view {
            ResultsView::Ready(r) => r,
            ResultsView::Processing(_) => panic!("expected ready view"),
        };
        assert_eq!(meta.n_pairs, 1);
        assert_eq!(pairs[0].label, "high");
        assert_eq!(pairs[0].similarity, 82.4);
    }
}

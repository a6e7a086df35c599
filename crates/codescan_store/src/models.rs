//! Row and params types for the relational store.

use codescan_protocol::ScanLogEntry;
use serde::{Deserialize, Serialize};

/// `scans.params_json`, deserialized. Everything that doesn't earn its own
/// column lives here: an append-only log, the single-shot latches, and the
/// pair/runtime bookkeeping the workers need to coordinate without a
/// dedicated coordinator process.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScanParams {
    #[serde(default)]
    pub options: Option<String>,
    #[serde(default)]
    pub logs: Vec<ScanLogEntry>,
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub created_at_iso: String,
    #[serde(default)]
    pub pairs_generated: bool,
    #[serde(default)]
    pub total_pairs: Option<i64>,
    #[serde(default)]
    pub done_emitted: bool,
    #[serde(default)]
    pub runtime_ms: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScanRow {
    pub scan_id: String,
    pub created_at: String,
    pub status: String,
    pub progress: i64,
    pub params_json: String,
}

impl ScanRow {
    pub fn params(&self) -> crate::error::Result<ScanParams> {
        Ok(serde_json::from_str(&self.params_json)?)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileRow {
    pub id: i64,
    pub scan_id: String,
    pub filename: String,
    pub object_key: String,
    pub checksum: String,
    pub language: Option<String>,
    pub size: i64,
    pub created_at: String,
    pub normalized_at: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AlertRow {
    pub id: i64,
    pub scan_id: Option<String>,
    pub service: String,
    pub error_code: String,
    pub message: String,
    pub payload_json: String,
    pub created_at: String,
}

/// One row of `list_results_pairs_for_scan`: a scored pair joined against
/// both files' names, with the display label already projected.
#[derive(Debug, Clone)]
pub struct ResultPairRow {
    pub file_a: String,
    pub file_b: String,
    pub score: f64,
    pub label: &'static str,
    pub details_json: String,
}

/// One row of `list_scans_summary`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScanSummaryRow {
    pub scan_id: String,
    pub created_at: String,
    pub status: String,
    pub progress: i64,
    pub runtime_ms: i64,
    pub file_count: i64,
    pub pair_count: i64,
    pub top_similarity: f64,
    pub high_risk_count: i64,
}

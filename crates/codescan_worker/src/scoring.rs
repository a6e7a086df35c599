//! C5: scoring worker.
//!
//! Consumes `code.candidates`. Loads both files' cached token streams by
//! checksum, scores the pair with Jaccard similarity, records the result,
//! and recomputes scan progress. Once every pair for the scan has a result,
//! flips the scan to DONE and emits exactly one `code.scored` event (guarded
//! by the `done_emitted` latch).

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use codescan_ids::ScanId;
use codescan_kernel::jaccard_percent;
use codescan_protocol::idempotency::scored_key;
use codescan_protocol::{CandidatesPayload, Envelope, EventType, ScanStatus, ScoredPayload};
use codescan_store::cache::tokens_key;
use tracing::info;

use crate::common::WorkerContext;

pub async fn process_candidates(ctx: &WorkerContext, envelope: &Envelope) -> Result<()> {
    let payload: CandidatesPayload = envelope
        .payload_as()
        .context("malformed code.candidates payload")?;
    let scan_id = ScanId::parse(&payload.scan_id).context("invalid scan_id in candidates event")?;

    let (file_a_id, file_b_id, checksum_a, checksum_b) = if payload.file_a_id <= payload.file_b_id {
        (payload.file_a_id, payload.file_b_id, &payload.checksum_a, &payload.checksum_b)
    } else {
        (payload.file_b_id, payload.file_a_id, &payload.checksum_b, &payload.checksum_a)
    };

    let tokens_a_json = ctx
        .cache
        .get(&tokens_key(checksum_a))
        .await
        .ok_or_else(|| anyhow!("missing cached tokens for checksum {checksum_a} (normalizer cache miss)"))?;
    let tokens_b_json = ctx
        .cache
        .get(&tokens_key(checksum_b))
        .await
        .ok_or_else(|| anyhow!("missing cached tokens for checksum {checksum_b} (normalizer cache miss)"))?;

    let tokens_a: Vec<String> = serde_json::from_str(&tokens_a_json).context("decode cached tokens_a")?;
    let tokens_b: Vec<String> = serde_json::from_str(&tokens_b_json).context("decode cached tokens_b")?;

    let score = jaccard_percent(&tokens_a, &tokens_b);
    let details_json = serde_json::json!({ "pair_id": payload.pair_id }).to_string();

    codescan_store::repository::upsert_result(
        &ctx.pool,
        scan_id.as_str(),
        file_a_id,
        file_b_id,
        score,
        &details_json,
    )
    .await?;

    let total_pairs = codescan_store::repository::get_total_pairs(&ctx.pool, scan_id.as_str()).await?;
    let mut done = false;
    if let Some(total_pairs) = total_pairs {
        if total_pairs > 0 {
            let processed = codescan_store::repository::count_results(&ctx.pool, scan_id.as_str()).await?;
            let progress = ((processed as f64 / total_pairs as f64) * 100.0).round().min(99.0) as i32;
            codescan_store::repository::update_progress_if_active(&ctx.pool, scan_id.as_str(), progress).await?;
            done = processed >= total_pairs;
        }
    }

    if done {
        codescan_store::repository::update_scan_status_progress(
            &ctx.pool,
            scan_id.as_str(),
            Some(ScanStatus::Done),
            Some(100),
        )
        .await?;
        codescan_store::repository::append_scan_log(&ctx.pool, scan_id.as_str(), "Scoring complete (DONE)")
            .await?;

        if codescan_store::repository::try_mark_done_emitted(&ctx.pool, scan_id.as_str()).await? {
            let completed_at_ms = Utc::now().timestamp_millis();

            if let Some(scan) = codescan_store::repository::get_scan(&ctx.pool, scan_id.as_str()).await? {
                if let Ok(params) = scan.params() {
                    if let Ok(created_at) = chrono::DateTime::parse_from_rfc3339(&params.created_at_iso) {
                        let runtime_ms = completed_at_ms - created_at.timestamp_millis();
                        codescan_store::repository::set_runtime_ms(&ctx.pool, scan_id.as_str(), runtime_ms)
                            .await?;
                    }
                }
            }

            let out_payload = ScoredPayload {
                scan_id: scan_id.as_str().to_string(),
                completed_at_ms,
                total_pairs: total_pairs.unwrap_or(0),
            };
            let idempotency_key = scored_key(scan_id.as_str());
            let envelope_out = Envelope::new(
                EventType::Scored,
                scan_id.as_str(),
                &envelope.correlation_id,
                idempotency_key,
                completed_at_ms,
                &out_payload,
            )?;
            ctx.bus
                .publish(&ctx.config.topics.scored, &envelope_out)
                .await
                .context("publish code.scored")?;
        }
    }

    info!(scan_id = %scan_id, file_a_id, file_b_id, score, "scoring processed candidates event");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use codescan_bus::InMemoryBus;
    use codescan_protocol::idempotency::candidates_key;
    use codescan_protocol::SystemConfig;
    use codescan_store::{create_pool, ensure_schema, models::ScanParams, DbConfig, FsBlobStore, InMemoryCache};
    use std::sync::Arc;

    async fn test_ctx() -> (WorkerContext, InMemoryBus, tempfile::TempDir) {
        let pool = create_pool(&DbConfig::sqlite_memory()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let in_mem = InMemoryBus::new();
        let ctx = WorkerContext {
            pool,
            cache: Arc::new(InMemoryCache::new()),
            blobs: Arc::new(FsBlobStore::new(dir.path())),
            bus: Arc::new(in_mem.clone()),
            config: SystemConfig::from_env(),
        };
        (ctx, in_mem, dir)
    }

    fn candidates_envelope(scan_id: &str, a: i64, b: i64, ca: &str, cb: &str) -> Envelope {
        let payload = CandidatesPayload {
            scan_id: scan_id.to_string(),
            pair_id: format!("pair-{a}-{b}"),
            file_a_id: a,
            file_b_id: b,
            checksum_a: ca.to_string(),
            checksum_b: cb.to_string(),
            language_a: None,
            language_b: None,
        };
        Envelope::new(
            EventType::Candidates,
            scan_id,
            "corr-1",
            candidates_key(&payload.pair_id),
            0,
            &payload,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn scores_pair_and_emits_scored_on_last_result() {
        let (ctx, in_mem, _dir) = test_ctx().await;
        let scan_id = ScanId::new();
        let mut params = ScanParams::default();
        params.total_pairs = Some(1);
        params.created_at_iso = chrono::Utc::now().to_rfc3339();
        codescan_store::repository::create_scan(
            &ctx.pool,
            scan_id.as_str(),
            ScanStatus::Scoring,
            &params,
        )
        .await
        .unwrap();

        ctx.cache
            .set(&tokens_key("sum-a"), serde_json::to_string(&vec!["foo", "bar"]).unwrap())
            .await;
        ctx.cache
            .set(&tokens_key("sum-b"), serde_json::to_string(&vec!["foo", "baz"]).unwrap())
            .await;

        let mut sub = in_mem.subscribe(&["code.scored"]).await;
        let envelope = candidates_envelope(scan_id.as_str(), 1, 2, "sum-a", "sum-b");
        process_candidates(&ctx, &envelope).await.unwrap();

        let (_, out) = sub.recv().await.unwrap();
        let scored: ScoredPayload = out.payload_as().unwrap();
        assert_eq!(scored.total_pairs, 1);

        let scan = codescan_store::repository::get_scan(&ctx.pool, scan_id.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(scan.status, "DONE");
        assert_eq!(scan.progress, 100);
        assert!(scan.params().unwrap().runtime_ms.is_some());
    }

    #[tokio::test]
    async fn missing_cached_tokens_is_an_error() {
        let (ctx, _in_mem, _dir) = test_ctx().await;
        let scan_id = ScanId::new();
        codescan_store::repository::create_scan(
            &ctx.pool,
            scan_id.as_str(),
            ScanStatus::Scoring,
            &ScanParams::default(),
        )
        .await
        .unwrap();
        let envelope = candidates_envelope(scan_id.as_str(), 1, 2, "missing-a", "missing-b");
        assert!(process_candidates(&ctx, &envelope).await.is_err());
    }
}

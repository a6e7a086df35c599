//! C4: candidate-retrieval worker.
//!
//! Consumes `code.normalized`. Marks the file normalized, then checks
//! whether every file in the scan has now reported in — if so this is the
//! fan-in barrier: generate every unordered file pair exactly once (guarded
//! by the `pairs_generated` latch) and emit one `code.candidates` event per
//! pair.

use anyhow::{Context, Result};
use chrono::Utc;
use codescan_ids::ScanId;
use codescan_protocol::idempotency::candidates_key;
use codescan_protocol::{idempotency::pair_id, CandidatesPayload, Envelope, EventType, NormalizedPayload, ScanStatus};
use codescan_store::models::FileRow;
use tracing::info;

use crate::common::WorkerContext;

pub async fn process_normalized(ctx: &WorkerContext, envelope: &Envelope) -> Result<()> {
    let payload: NormalizedPayload = envelope
        .payload_as()
        .context("malformed code.normalized payload")?;
    let scan_id = ScanId::parse(&payload.scan_id).context("invalid scan_id in normalized event")?;

    codescan_store::repository::mark_file_normalized(&ctx.pool, payload.file_id).await?;
    codescan_store::repository::append_scan_log(
        &ctx.pool,
        scan_id.as_str(),
        &format!("Candidate retrieval: file {} normalized", payload.file_id),
    )
    .await?;

    let (total, normalized) =
        codescan_store::repository::count_files_normalized(&ctx.pool, scan_id.as_str()).await?;

    if total > 1 && normalized == total {
        let file_rows = codescan_store::repository::list_files_for_scan(&ctx.pool, scan_id.as_str()).await?;
        let total_pairs = (file_rows.len() as i64 * (file_rows.len() as i64 - 1)) / 2;

        let won_latch =
            codescan_store::repository::try_mark_pairs_generated(&ctx.pool, scan_id.as_str(), total_pairs)
                .await?;
        if won_latch {
            codescan_store::repository::update_scan_status_progress(
                &ctx.pool,
                scan_id.as_str(),
                Some(ScanStatus::Scoring),
                Some(5),
            )
            .await?;
            codescan_store::repository::append_scan_log(
                &ctx.pool,
                scan_id.as_str(),
                &format!("Generating {total_pairs} candidate pair(s)"),
            )
            .await?;

            for (fa, fb) in pairwise(&file_rows) {
                let (fa, fb) = canonical_order(fa, fb);
                let pid = pair_id(scan_id.as_str(), fa.id, fb.id);
                let idempotency_key = candidates_key(&pid);

                let out_payload = CandidatesPayload {
                    scan_id: scan_id.as_str().to_string(),
                    pair_id: pid,
                    file_a_id: fa.id,
                    file_b_id: fb.id,
                    checksum_a: fa.checksum.clone(),
                    checksum_b: fb.checksum.clone(),
                    language_a: fa.language.clone(),
                    language_b: fb.language.clone(),
                };
                let envelope_out = Envelope::new(
                    EventType::Candidates,
                    scan_id.as_str(),
                    &envelope.correlation_id,
                    idempotency_key,
                    Utc::now().timestamp_millis(),
                    &out_payload,
                )?;
                ctx.bus
                    .publish(&ctx.config.topics.candidates, &envelope_out)
                    .await
                    .context("publish code.candidates")?;
            }

            codescan_store::repository::append_scan_log(
                &ctx.pool,
                scan_id.as_str(),
                "Candidate retrieval: emitted code.candidates",
            )
            .await?;
        }
    }

    info!(scan_id = %scan_id, file_id = payload.file_id, "candidate retrieval processed normalized event");
    Ok(())
}

fn pairwise(rows: &[FileRow]) -> impl Iterator<Item = (&FileRow, &FileRow)> {
    (0..rows.len()).flat_map(move |i| ((i + 1)..rows.len()).map(move |j| (&rows[i], &rows[j])))
}

/// Canonical `(a, b)` ordering by id, so the generated pair_id and bus event
/// are identical regardless of the scan's file insertion order.
fn canonical_order(a: &FileRow, b: &FileRow) -> (&FileRow, &FileRow) {
    if a.id <= b.id {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codescan_bus::InMemoryBus;
    use codescan_protocol::{idempotency::normalized_key, NormalizedRef, SystemConfig};
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

    fn normalized_envelope(scan_id: &str, file_id: i64, checksum: &str) -> Envelope {
        let payload = NormalizedPayload {
            scan_id: scan_id.to_string(),
            file_id,
            object_bucket: "scans".to_string(),
            object_key: format!("f{file_id}.py"),
            checksum: checksum.to_string(),
            language: Some("python".to_string()),
            cache_hit: false,
            normalized_ref: NormalizedRef {
                norm_key: format!("norm:{checksum}"),
                tokens_key: format!("tokens:{checksum}"),
            },
        };
        Envelope::new(
            EventType::Normalized,
            scan_id,
            "corr-1",
            normalized_key(scan_id, file_id, checksum),
            0,
            &payload,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn emits_n_choose_2_pairs_exactly_once() {
        let (ctx, in_mem, _dir) = test_ctx().await;
        let scan_id = ScanId::new();
        codescan_store::repository::create_scan(
            &ctx.pool,
            scan_id.as_str(),
            ScanStatus::Normalizing,
            &ScanParams::default(),
        )
        .await
        .unwrap();

        let mut file_ids = Vec::new();
        for i in 0..3 {
            let id = codescan_store::repository::insert_file(
                &ctx.pool,
                scan_id.as_str(),
                &format!("f{i}.py"),
                &format!("f{i}.py"),
                &format!("sum{i}"),
                Some("python"),
                10,
            )
            .await
            .unwrap();
            file_ids.push(id);
        }

        let mut sub = in_mem.subscribe(&["code.candidates"]).await;

        for (i, id) in file_ids.iter().enumerate() {
            let envelope = normalized_envelope(scan_id.as_str(), *id, &format!("sum{i}"));
            process_normalized(&ctx, &envelope).await.unwrap();
        }

        let mut seen_pairs = std::collections::HashSet::new();
        for _ in 0..3 {
            let (topic, out) = sub.recv().await.unwrap();
            assert_eq!(topic, "code.candidates");
            let payload: CandidatesPayload = out.payload_as().unwrap();
            assert!(payload.file_a_id < payload.file_b_id);
            seen_pairs.insert(payload.pair_id);
        }
        assert_eq!(seen_pairs.len(), 3);

        let scan = codescan_store::repository::get_scan(&ctx.pool, scan_id.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(scan.status, "SCORING");
        assert_eq!(scan.params().unwrap().total_pairs, Some(3));
    }

    #[tokio::test]
    async fn single_file_scan_never_generates_pairs() {
        let (ctx, in_mem, _dir) = test_ctx().await;
        let scan_id = ScanId::new();
        codescan_store::repository::create_scan(
            &ctx.pool,
            scan_id.as_str(),
            ScanStatus::Normalizing,
            &ScanParams::default(),
        )
        .await
        .unwrap();
        let id = codescan_store::repository::insert_file(
            &ctx.pool,
            scan_id.as_str(),
            "only.py",
            "only.py",
            "sum0",
            None,
            4,
        )
        .await
        .unwrap();

        let _sub = in_mem.subscribe(&["code.candidates"]).await;
        let envelope = normalized_envelope(scan_id.as_str(), id, "sum0");
        process_normalized(&ctx, &envelope).await.unwrap();

        let scan = codescan_store::repository::get_scan(&ctx.pool, scan_id.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(scan.status, "NORMALIZING");
    }
}

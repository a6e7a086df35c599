//! C3: normalizer worker.
//!
//! Consumes `code.submitted`. For each file in the manifest: skip work if
//! both cache keys already exist (checksum-addressed, so a file re-uploaded
//! in a later scan is free), otherwise fetch the blob, decode, normalize,
//! tokenize, cache both results, and emit one `code.normalized` event.

use anyhow::{Context, Result};
use codescan_ids::ScanId;
use codescan_kernel::normalize_and_tokenize;
use codescan_protocol::idempotency::normalized_key;
use codescan_protocol::{Envelope, EventType, NormalizedPayload, NormalizedRef, SubmittedPayload};
use codescan_store::cache::{norm_key, tokens_key};
use chrono::Utc;
use tracing::info;

use crate::common::WorkerContext;

/// Decode raw bytes as UTF-8, falling back to a lossy Latin-1-style mapping
/// (each byte -> its Unicode code point) on decode failure — this never
/// fails, matching the reference's `decode("latin-1", errors="replace")`.
fn decode_lossy(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(text) => text.to_string(),
        Err(_) => raw.iter().map(|&b| b as char).collect(),
    }
}

pub async fn process_submitted(ctx: &WorkerContext, envelope: &Envelope) -> Result<()> {
    let payload: SubmittedPayload = envelope
        .payload_as()
        .context("malformed code.submitted payload")?;
    let scan_id = ScanId::parse(&payload.scan_id).context("invalid scan_id in submitted event")?;

    codescan_store::repository::mark_normalizing_on_first_submission(&ctx.pool, scan_id.as_str())
        .await
        .context("transition scan to NORMALIZING")?;
    codescan_store::repository::append_scan_log(
        &ctx.pool,
        scan_id.as_str(),
        &format!("Normalizer: received {} file(s)", payload.files.len()),
    )
    .await?;

    for file in &payload.files {
        let nkey = norm_key(&file.checksum);
        let tkey = tokens_key(&file.checksum);

        let cache_hit = ctx.cache.exists(&nkey).await && ctx.cache.exists(&tkey).await;
        if !cache_hit {
            let raw = ctx
                .blobs
                .get(&payload.object_bucket, &file.object_key)
                .await
                .with_context(|| format!("fetch blob {}/{}", payload.object_bucket, file.object_key))?;
            let text = decode_lossy(&raw);
            let (normalized, tokens) = normalize_and_tokenize(&text);

            ctx.cache.set(&nkey, normalized).await;
            let tokens_json = serde_json::to_string(&tokens).context("serialize token stream")?;
            ctx.cache.set(&tkey, tokens_json).await;
        }

        let idempotency_key = normalized_key(scan_id.as_str(), file.file_id, &file.checksum);
        let out_payload = NormalizedPayload {
            scan_id: scan_id.as_str().to_string(),
            file_id: file.file_id,
            object_bucket: payload.object_bucket.clone(),
            object_key: file.object_key.clone(),
            checksum: file.checksum.clone(),
            language: file.language.clone(),
            cache_hit,
            normalized_ref: NormalizedRef {
                norm_key: nkey,
                tokens_key: tkey,
            },
        };
        let envelope_out = Envelope::new(
            EventType::Normalized,
            scan_id.as_str(),
            &envelope.correlation_id,
            idempotency_key,
            Utc::now().timestamp_millis(),
            &out_payload,
        )?;
        ctx.bus
            .publish(&ctx.config.topics.normalized, &envelope_out)
            .await
            .context("publish code.normalized")?;
    }

    codescan_store::repository::append_scan_log(
        &ctx.pool,
        scan_id.as_str(),
        "Normalizer: emitted code.normalized",
    )
    .await?;
    info!(scan_id = %scan_id, files = payload.files.len(), "normalizer processed submitted event");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::WorkerContext;
    use codescan_bus::InMemoryBus;
    use codescan_protocol::{idempotency::submitted_key, ScanStatus, SubmittedFileEntry, SystemConfig};
    use codescan_store::{create_pool, ensure_schema, DbConfig, FsBlobStore, InMemoryCache};
    use std::sync::Arc;

    async fn test_ctx() -> (WorkerContext, InMemoryBus, tempfile::TempDir) {
        let pool = create_pool(&DbConfig::sqlite_memory()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(FsBlobStore::new(dir.path()));
        let in_mem = InMemoryBus::new();
        let ctx = WorkerContext {
            pool,
            cache: Arc::new(InMemoryCache::new()),
            blobs,
            bus: Arc::new(in_mem.clone()),
            config: SystemConfig::from_env(),
        };
        (ctx, in_mem, dir)
    }

    #[tokio::test]
    async fn emits_one_normalized_event_per_file_and_writes_cache() {
        let (ctx, in_mem, _dir) = test_ctx().await;
        let scan_id = ScanId::new();
        codescan_store::repository::create_scan(
            &ctx.pool,
            scan_id.as_str(),
            ScanStatus::Pending,
            &Default::default(),
        )
        .await
        .unwrap();
        ctx.blobs.ensure_bucket("scans").await.unwrap();
        ctx.blobs
            .put("scans", "a.py", b"print(1)", "text/plain")
            .await
            .unwrap();

        let checksum = "deadbeef".to_string();
        let payload = SubmittedPayload {
            scan_id: scan_id.as_str().to_string(),
            object_bucket: "scans".to_string(),
            files: vec![SubmittedFileEntry {
                file_id: 1,
                filename: "a.py".to_string(),
                object_key: "a.py".to_string(),
                checksum: checksum.clone(),
                language: Some("python".to_string()),
                size: 8,
            }],
            options: None,
            submitted_at_ms: 0,
        };
        let idem = submitted_key(scan_id.as_str(), "corr-1");
        let envelope = Envelope::new(
            EventType::Submitted,
            scan_id.as_str(),
            "corr-1",
            idem,
            0,
            &payload,
        )
        .unwrap();

        let mut sub = in_mem.subscribe(&["code.normalized"]).await;

        process_submitted(&ctx, &envelope).await.unwrap();

        let (_, out) = sub.recv().await.unwrap();
        let out_payload: codescan_protocol::NormalizedPayload = out.payload_as().unwrap();
        assert_eq!(out_payload.file_id, 1);
        assert!(!out_payload.cache_hit);

        assert!(ctx.cache.exists(&norm_key(&checksum)).await);
        assert!(ctx.cache.exists(&tokens_key(&checksum)).await);

        let scan = codescan_store::repository::get_scan(&ctx.pool, scan_id.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(scan.status, "NORMALIZING");
    }

    #[tokio::test]
    async fn second_delivery_is_a_cache_hit_and_does_not_touch_blobs() {
        let (ctx, in_mem, _dir) = test_ctx().await;
        let scan_id = ScanId::new();
        codescan_store::repository::create_scan(
            &ctx.pool,
            scan_id.as_str(),
            ScanStatus::Pending,
            &Default::default(),
        )
        .await
        .unwrap();
        ctx.blobs.ensure_bucket("scans").await.unwrap();
        ctx.blobs
            .put("scans", "a.py", b"print(1)", "text/plain")
            .await
            .unwrap();

        let checksum = "deadbeef".to_string();
        let payload = SubmittedPayload {
            scan_id: scan_id.as_str().to_string(),
            object_bucket: "scans".to_string(),
            files: vec![SubmittedFileEntry {
                file_id: 1,
                filename: "a.py".to_string(),
                object_key: "a.py".to_string(),
                checksum: checksum.clone(),
                language: None,
                size: 8,
            }],
            options: None,
            submitted_at_ms: 0,
        };
        let envelope = Envelope::new(
            EventType::Submitted,
            scan_id.as_str(),
            "corr-1",
            submitted_key(scan_id.as_str(), "corr-1"),
            0,
            &payload,
        )
        .unwrap();

        let mut sub = in_mem.subscribe(&["code.normalized"]).await;
        process_submitted(&ctx, &envelope).await.unwrap();
        let (_, first_out) = sub.recv().await.unwrap();
        let first_payload: codescan_protocol::NormalizedPayload = first_out.payload_as().unwrap();
        assert!(!first_payload.cache_hit);
        // Remove the blob: a second pass must not need it again.
        let dir2 = tempfile::tempdir().unwrap();
        let empty_blobs: Arc<dyn codescan_store::BlobStore> = Arc::new(FsBlobStore::new(dir2.path()));
        let ctx2 = WorkerContext {
            blobs: empty_blobs,
            ..ctx
        };
        process_submitted(&ctx2, &envelope).await.unwrap();
        let (_, second_out) = sub.recv().await.unwrap();
        let second_payload: codescan_protocol::NormalizedPayload = second_out.payload_as().unwrap();
        assert!(second_payload.cache_hit);
    }
}

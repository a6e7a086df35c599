//! `codescan submit`: the boundary the reference's FastAPI `/api/scan`
//! handler occupied. Reads a local directory's files, stores them as blobs,
//! writes the Scan+File rows, and emits exactly one `submitted` event — in
//! that order, matching the ingress contract (spec.md §6): the bus emit is
//! the last thing that happens, and a failure before it marks the scan
//! FAILED instead of leaving it stuck PENDING.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use codescan_ids::ScanId;
use codescan_protocol::idempotency::submitted_key;
use codescan_protocol::{
    Envelope, EventType, ScanStatus, SubmittedFileEntry, SubmittedPayload, SystemConfig,
};
use codescan_store::models::ScanParams;
use codescan_store::{blob, BlobStore, DbPool};
use sha2::{Digest, Sha256};
use uuid::Uuid;

fn language_from_filename(filename: &str) -> Option<&'static str> {
    let ext = Path::new(filename).extension()?.to_str()?.to_lowercase();
    Some(match ext.as_str() {
        "py" => "python",
        "js" => "javascript",
        "ts" => "typescript",
        "java" => "java",
        "cpp" | "cc" | "cxx" => "cpp",
        "c" => "c",
        "cs" => "csharp",
        "go" => "go",
        "rb" => "ruby",
        "php" => "php",
        "rs" => "rust",
        "swift" => "swift",
        _ => return None,
    })
}

/// Submit every regular file directly under `dir` as one scan. Returns the
/// new scan id. Requires at least two files, same as the reference's
/// upload endpoint.
pub async fn submit_directory(
    pool: &DbPool,
    blobs: &dyn BlobStore,
    bus: &dyn codescan_bus::EventBus,
    config: &SystemConfig,
    dir: &Path,
) -> Result<ScanId> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("read directory {}", dir.display()))?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .collect();
    entries.sort_by_key(|e| e.file_name());

    if entries.len() < 2 {
        bail!("upload at least 2 files (found {} in {})", entries.len(), dir.display());
    }

    let scan_id = ScanId::new();
    let correlation_id = Uuid::new_v4().to_string();
    let bucket = "scans";

    let mut params = ScanParams {
        correlation_id: correlation_id.clone(),
        created_at_iso: Utc::now().to_rfc3339(),
        ..Default::default()
    };

    let result = do_submit(
        pool,
        blobs,
        &scan_id,
        bucket,
        &entries,
        &mut params,
    )
    .await;

    let stored_files = match result {
        Ok(files) => files,
        Err(e) => {
            codescan_store::repository::insert_alert(
                pool,
                Some(scan_id.as_str()),
                "ingress",
                "UPLOAD_FAILED",
                &e.to_string(),
                &serde_json::json!({"scan_id": scan_id.as_str()}).to_string(),
            )
            .await
            .ok();
            codescan_store::repository::update_scan_status_progress(
                pool,
                scan_id.as_str(),
                Some(ScanStatus::Failed),
                None,
            )
            .await
            .ok();
            return Err(e);
        }
    };

    let payload = SubmittedPayload {
        scan_id: scan_id.as_str().to_string(),
        object_bucket: bucket.to_string(),
        files: stored_files,
        options: None,
        submitted_at_ms: Utc::now().timestamp_millis(),
    };
    let idempotency_key = submitted_key(scan_id.as_str(), &correlation_id);
    let envelope = Envelope::new(
        EventType::Submitted,
        scan_id.as_str(),
        &correlation_id,
        idempotency_key,
        Utc::now().timestamp_millis(),
        &payload,
    )?;

    if let Err(e) = bus.publish(&config.topics.submitted, &envelope).await {
        codescan_store::repository::insert_alert(
            pool,
            Some(scan_id.as_str()),
            "ingress",
            "KAFKA_PUBLISH_FAILED",
            &e.to_string(),
            &serde_json::json!({"topic": config.topics.submitted, "scan_id": scan_id.as_str()}).to_string(),
        )
        .await
        .ok();
        codescan_store::repository::append_scan_log(
            pool,
            scan_id.as_str(),
            &format!("bus publish failed: {e}"),
        )
        .await
        .ok();
        codescan_store::repository::update_scan_status_progress(
            pool,
            scan_id.as_str(),
            Some(ScanStatus::Failed),
            None,
        )
        .await
        .ok();
        bail!("failed to enqueue scan: {e}");
    }

    Ok(scan_id)
}

async fn do_submit(
    pool: &DbPool,
    blobs: &dyn BlobStore,
    scan_id: &ScanId,
    bucket: &str,
    entries: &[std::fs::DirEntry],
    params: &mut ScanParams,
) -> Result<Vec<SubmittedFileEntry>> {
    codescan_store::repository::create_scan(pool, scan_id.as_str(), ScanStatus::Pending, params)
        .await
        .context("create scan row")?;
    codescan_store::repository::append_scan_log(pool, scan_id.as_str(), "Scan created (PENDING)").await?;

    blobs.ensure_bucket(bucket).await?;

    let mut stored_files = Vec::with_capacity(entries.len());
    for entry in entries {
        let path = entry.path();
        let filename = entry.file_name().to_string_lossy().to_string();
        let raw = std::fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        let size = raw.len() as i64;
        let checksum = {
            let mut hasher = Sha256::new();
            hasher.update(&raw);
            hasher
                .finalize()
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<String>()
        };
        let object_key = blob::object_key(scan_id.as_str(), &filename);
        let content_type = blob::content_type_for(&filename);
        blobs.put(bucket, &object_key, &raw, content_type).await?;

        let language = language_from_filename(&filename);
        let file_id = codescan_store::repository::insert_file(
            pool,
            scan_id.as_str(),
            &filename,
            &object_key,
            &checksum,
            language,
            size,
        )
        .await?;

        stored_files.push(SubmittedFileEntry {
            file_id,
            filename,
            object_key,
            checksum,
            language: language.map(str::to_string),
            size,
        });
    }

    codescan_store::repository::append_scan_log(
        pool,
        scan_id.as_str(),
        &format!("Uploaded {} file(s)", stored_files.len()),
    )
    .await?;

    Ok(stored_files)
}

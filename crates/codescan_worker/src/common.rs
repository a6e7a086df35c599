//! Shared worker plumbing: execution context and the fatal-error path.
//!
//! `handle_fatal` is the Rust realization of the reference's
//! `workers/common.py::handle_fatal`: insert an Alert, append a scan log
//! line, transition the scan to FAILED, and emit exactly one `deadletter`
//! event — then the caller still acknowledges the bus offset (spec.md §7
//! step 6). This function assumes the caller already rolled back whatever
//! transaction the failed handler was using.

use std::sync::Arc;

use chrono::Utc;
use codescan_bus::EventBus;
use codescan_protocol::idempotency::deadletter_key;
use codescan_protocol::{DeadletterPayload, Envelope, EventType, ScanStatus, SystemConfig};
use codescan_store::{BlobStore, Cache, DbPool};
use tracing::error;

/// Everything a worker role's event loop needs to process messages: the
/// relational pool, the shared cache and blob store, the bus publish side,
/// and resolved configuration (topic names in particular).
#[derive(Clone)]
pub struct WorkerContext {
    pub pool: DbPool,
    pub cache: Arc<dyn Cache>,
    pub blobs: Arc<dyn BlobStore>,
    pub bus: Arc<dyn EventBus>,
    pub config: SystemConfig,
}

/// The nil UUID string used as `scan_id` in a deadletter envelope when the
/// failure happened before a scan id was even known.
pub const NIL_SCAN_ID: &str = "00000000-0000-0000-0000-000000000000";

#[allow(clippy::too_many_arguments)]
pub async fn handle_fatal(
    ctx: &WorkerContext,
    service: &str,
    scan_id: Option<&str>,
    correlation_id: &str,
    original_topic: &str,
    original_event: &serde_json::Value,
    error_code: &str,
    err: &anyhow::Error,
) {
    let message = err.to_string();
    let traceback = format!("{err:?}");
    let payload = DeadletterPayload {
        original_topic: original_topic.to_string(),
        original_event: original_event.clone(),
        error: message.clone(),
        traceback,
        partition: None,
        offset: None,
    };
    let payload_json = match serde_json::to_string(&payload) {
        Ok(json) => json,
        Err(e) => {
            error!("deadletter payload failed to serialize: {e}");
            "{}".to_string()
        }
    };

    if let Err(e) = codescan_store::repository::insert_alert(
        &ctx.pool,
        scan_id,
        service,
        error_code,
        &message,
        &payload_json,
    )
    .await
    {
        error!("{service}: failed to insert alert for {error_code}: {e}");
    }

    if let Some(scan_id) = scan_id {
        let log_line = format!("{service} fatal: {error_code}: {message}");
        if let Err(e) = codescan_store::repository::append_scan_log(&ctx.pool, scan_id, &log_line).await
        {
            error!("{service}: failed to append scan log: {e}");
        }
        if let Err(e) = codescan_store::repository::update_scan_status_progress(
            &ctx.pool,
            scan_id,
            Some(ScanStatus::Failed),
            Some(100),
        )
        .await
        {
            error!("{service}: failed to mark scan FAILED: {e}");
        }
    }

    let idempotency_key = deadletter_key(service, scan_id.unwrap_or(""), correlation_id, error_code);
    let scan_id_for_envelope = scan_id.unwrap_or(NIL_SCAN_ID);
    let envelope = match Envelope::new(
        EventType::Deadletter,
        scan_id_for_envelope,
        correlation_id,
        idempotency_key,
        Utc::now().timestamp_millis(),
        &payload,
    ) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!("{service}: failed to build deadletter envelope: {e}");
            return;
        }
    };

    if let Err(e) = ctx
        .bus
        .publish(&ctx.config.topics.deadletter, &envelope)
        .await
    {
        error!("{service}: failed to publish deadletter event: {e}");
    }
}

//! Event envelope and payload types exchanged over the bus.

use crate::defaults::{LABEL_HIGH_THRESHOLD, LABEL_MEDIUM_THRESHOLD, SCHEMA_VERSION};
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The five event types that flow across the bus topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Submitted,
    Normalized,
    Candidates,
    Scored,
    Deadletter,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Submitted => "code.submitted",
            EventType::Normalized => "code.normalized",
            EventType::Candidates => "code.candidates",
            EventType::Scored => "code.scored",
            EventType::Deadletter => "code.deadletter",
        }
    }
}

impl FromStr for EventType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "code.submitted" => Ok(EventType::Submitted),
            "code.normalized" => Ok(EventType::Normalized),
            "code.candidates" => Ok(EventType::Candidates),
            "code.scored" => Ok(EventType::Scored),
            "code.deadletter" => Ok(EventType::Deadletter),
            other => Err(ProtocolError::UnknownEventType(other.to_string())),
        }
    }
}

impl Serialize for EventType {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        EventType::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

/// Envelope wrapping every event published on the bus.
///
/// `payload` stays untyped JSON at this layer; callers deserialize it into
/// the payload struct matching `event_type` once they've dispatched on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub schema_version: String,
    pub event_type: EventType,
    pub scan_id: String,
    pub correlation_id: String,
    pub idempotency_key: String,
    pub produced_at_ms: i64,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(
        event_type: EventType,
        scan_id: impl Into<String>,
        correlation_id: impl Into<String>,
        idempotency_key: impl Into<String>,
        produced_at_ms: i64,
        payload: impl Serialize,
    ) -> Result<Self> {
        Ok(Self {
            schema_version: SCHEMA_VERSION.to_string(),
            event_type,
            scan_id: scan_id.into(),
            correlation_id: correlation_id.into(),
            idempotency_key: idempotency_key.into(),
            produced_at_ms,
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A single file as carried in the `code.submitted` payload's file manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedFileEntry {
    pub file_id: i64,
    pub filename: String,
    pub object_key: String,
    pub checksum: String,
    pub language: Option<String>,
    pub size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedPayload {
    pub scan_id: String,
    pub object_bucket: String,
    pub files: Vec<SubmittedFileEntry>,
    pub options: Option<String>,
    pub submitted_at_ms: i64,
}

/// Where the normalizer stashed the result in the cache — carried in the
/// `normalized` event purely for observability; consumers re-derive the
/// same keys from `checksum` via `codescan_store::cache::{norm_key,
/// tokens_key}` rather than trusting these strings as pointers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRef {
    pub norm_key: String,
    pub tokens_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedPayload {
    pub scan_id: String,
    pub file_id: i64,
    pub object_bucket: String,
    pub object_key: String,
    pub checksum: String,
    pub language: Option<String>,
    pub cache_hit: bool,
    pub normalized_ref: NormalizedRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidatesPayload {
    pub scan_id: String,
    pub pair_id: String,
    pub file_a_id: i64,
    pub file_b_id: i64,
    pub checksum_a: String,
    pub checksum_b: String,
    pub language_a: Option<String>,
    pub language_b: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPayload {
    pub scan_id: String,
    pub completed_at_ms: i64,
    pub total_pairs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadletterPayload {
    pub original_topic: String,
    pub original_event: serde_json::Value,
    pub error: String,
    pub traceback: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

/// Lifecycle status of a scan row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanStatus {
    Pending,
    Normalizing,
    Scoring,
    Done,
    Failed,
}

impl ScanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Pending => "PENDING",
            ScanStatus::Normalizing => "NORMALIZING",
            ScanStatus::Scoring => "SCORING",
            ScanStatus::Done => "DONE",
            ScanStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for ScanStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ScanStatus::Pending),
            "NORMALIZING" => Ok(ScanStatus::Normalizing),
            "SCORING" => Ok(ScanStatus::Scoring),
            "DONE" => Ok(ScanStatus::Done),
            "FAILED" => Ok(ScanStatus::Failed),
            other => Err(ProtocolError::InvalidConfig {
                key: "status".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// A single entry in a scan's append-only log (`params.logs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanLogEntry {
    pub time: String,
    pub message: String,
}

/// Similarity label projected from a numeric score for display purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityLabel {
    High,
    Medium,
    Low,
}

impl SimilarityLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            SimilarityLabel::High => "high",
            SimilarityLabel::Medium => "medium",
            SimilarityLabel::Low => "low",
        }
    }
}

/// Project a `[0, 100]` similarity score onto a three-tier label:
/// `score > 70` is "high", `40 < score <= 70` is "medium", `score <= 40` is
/// "low".
pub fn label_for_score(score: f64) -> SimilarityLabel {
    if score > LABEL_HIGH_THRESHOLD {
        SimilarityLabel::High
    } else if score > LABEL_MEDIUM_THRESHOLD {
        SimilarityLabel::Medium
    } else {
        SimilarityLabel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_roundtrips_through_json() {
        let json = serde_json::to_string(&EventType::Candidates).unwrap();
        assert_eq!(json, "\"code.candidates\"");
        let back: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventType::Candidates);
    }

    #[test]
    fn unknown_event_type_errors() {
        assert!(EventType::from_str("code.unknown").is_err());
    }

    #[test]
    fn envelope_payload_roundtrips() {
        let payload = NormalizedPayload {
            scan_id: "scan-1".to_string(),
            file_id: 7,
            object_bucket: "scans".to_string(),
            object_key: "scan-1/f__a.py".to_string(),
            checksum: "abc".to_string(),
            language: Some("python".to_string()),
            cache_hit: false,
            normalized_ref: NormalizedRef {
                norm_key: "norm:abc".to_string(),
                tokens_key: "tokens:abc".to_string(),
            },
        };
        let envelope = Envelope::new(
            EventType::Normalized,
            "scan-1",
            "corr-1",
            "key-1",
            1_700_000_000_000,
            &payload,
        )
        .unwrap();
        let decoded: NormalizedPayload = envelope.payload_as().unwrap();
        assert_eq!(decoded.file_id, 7);
    }

    #[test]
    fn label_thresholds_match_boundaries() {
        assert_eq!(label_for_score(100.0), SimilarityLabel::High);
        assert_eq!(label_for_score(70.1), SimilarityLabel::High);
        assert_eq!(label_for_score(70.0), SimilarityLabel::Medium);
        assert_eq!(label_for_score(40.1), SimilarityLabel::Medium);
        assert_eq!(label_for_score(40.0), SimilarityLabel::Low);
        assert_eq!(label_for_score(0.0), SimilarityLabel::Low);
    }
}

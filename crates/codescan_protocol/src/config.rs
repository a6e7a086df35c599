//! System configuration shared across the CLI, workers and store.

use crate::defaults::{
    BUS_CONNECT_INITIAL_DELAY_S, BUS_CONNECT_MAX_DELAY_S, BUS_CONNECT_TIMEOUT_S,
    DEFAULT_BLOB_ROOT, DEFAULT_BUS_ENDPOINT, DEFAULT_CACHE_ROOT, DEFAULT_DB_URL,
    DEFAULT_LOG_LEVEL, DEFAULT_WORKER_GROUP_ID, TOPIC_CANDIDATES, TOPIC_DEADLETTER,
    TOPIC_NORMALIZED, TOPIC_SCORED, TOPIC_SUBMITTED,
};
use std::path::PathBuf;

/// `earliest` or `latest` — where a fresh consumer group starts reading a
/// topic. The reference only documents the knob; this port's in-process
/// bus transports have no durable offset to reset, so the field is carried
/// for configuration-surface parity rather than acted upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetResetPolicy {
    Earliest,
    Latest,
}

impl OffsetResetPolicy {
    fn from_env_str(raw: &str) -> Self {
        match raw {
            "latest" => OffsetResetPolicy::Latest,
            _ => OffsetResetPolicy::Earliest,
        }
    }
}

/// Per-topic overrides. Defaults match `crate::defaults::TOPIC_*`.
#[derive(Debug, Clone)]
pub struct TopicNames {
    pub submitted: String,
    pub normalized: String,
    pub candidates: String,
    pub scored: String,
    pub deadletter: String,
}

impl Default for TopicNames {
    fn default() -> Self {
        Self {
            submitted: env_or("CODESCAN_TOPIC_SUBMITTED", TOPIC_SUBMITTED),
            normalized: env_or("CODESCAN_TOPIC_NORMALIZED", TOPIC_NORMALIZED),
            candidates: env_or("CODESCAN_TOPIC_CANDIDATES", TOPIC_CANDIDATES),
            scored: env_or("CODESCAN_TOPIC_SCORED", TOPIC_SCORED),
            deadletter: env_or("CODESCAN_TOPIC_DEADLETTER", TOPIC_DEADLETTER),
        }
    }
}

/// Canonical system configuration, loaded from environment variables with
/// fallbacks to the defaults in [`crate::defaults`].
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Relational store URL (sqlite://... | postgres://...).
    pub db_url: String,
    /// Event bus endpoint the workers and CLI connect to.
    pub bus_endpoint: String,
    /// Root directory for the content-addressed blob store.
    pub blob_root: PathBuf,
    /// Root directory for the content-addressed normalization cache. Must be
    /// the same path for every worker process in a deployment — it's how the
    /// normalizer's cache writes reach the scoring process.
    pub cache_root: PathBuf,
    /// Consumer group id workers identify themselves with on the bus.
    pub worker_group_id: String,
    /// `RUST_LOG`-style filter used when one isn't set explicitly.
    pub log_level: String,
    /// How long a worker keeps retrying to connect to the bus before giving up.
    pub bus_connect_timeout_s: f64,
    pub bus_connect_initial_delay_s: f64,
    pub bus_connect_max_delay_s: f64,
    pub offset_reset: OffsetResetPolicy,
    pub topics: TopicNames,
}

impl SystemConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            db_url: env_or("CODESCAN_DB_URL", DEFAULT_DB_URL),
            bus_endpoint: env_or("CODESCAN_BUS_ENDPOINT", DEFAULT_BUS_ENDPOINT),
            blob_root: PathBuf::from(env_or("CODESCAN_BLOB_ROOT", DEFAULT_BLOB_ROOT)),
            cache_root: PathBuf::from(env_or("CODESCAN_CACHE_ROOT", DEFAULT_CACHE_ROOT)),
            worker_group_id: env_or("CODESCAN_WORKER_GROUP_ID", DEFAULT_WORKER_GROUP_ID),
            log_level: env_or("CODESCAN_LOG_LEVEL", DEFAULT_LOG_LEVEL),
            bus_connect_timeout_s: env_f64_or(
                "CODESCAN_BUS_CONNECT_TIMEOUT_S",
                BUS_CONNECT_TIMEOUT_S,
            ),
            bus_connect_initial_delay_s: BUS_CONNECT_INITIAL_DELAY_S,
            bus_connect_max_delay_s: BUS_CONNECT_MAX_DELAY_S,
            offset_reset: OffsetResetPolicy::from_env_str(
                &env_or("CODESCAN_BUS_OFFSET_RESET", "earliest"),
            ),
            topics: TopicNames::default(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_f64_or(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<f64>().ok())
        .filter(|v| *v >= 1.0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_used_when_env_absent() {
        std::env::remove_var("CODESCAN_DB_URL");
        let cfg = SystemConfig::from_env();
        assert_eq!(cfg.db_url, DEFAULT_DB_URL);
    }
}

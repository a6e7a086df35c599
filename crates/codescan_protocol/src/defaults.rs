//! Canonical default values shared across the CLI, workers and store.

pub const DEFAULT_DB_URL: &str = "sqlite://codescan.db";
pub const DEFAULT_BUS_ENDPOINT: &str = "tcp://127.0.0.1:5560";
pub const DEFAULT_BLOB_ROOT: &str = "./codescan-blobs";
pub const DEFAULT_CACHE_ROOT: &str = "./codescan-cache";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_WORKER_GROUP_ID: &str = "codescan-worker";

pub const TOPIC_SUBMITTED: &str = "code.submitted";
pub const TOPIC_NORMALIZED: &str = "code.normalized";
pub const TOPIC_CANDIDATES: &str = "code.candidates";
pub const TOPIC_SCORED: &str = "code.scored";
pub const TOPIC_DEADLETTER: &str = "code.deadletter";

pub const SCHEMA_VERSION: &str = "1.0";

/// How long to keep retrying a bus connection during startup before giving up.
pub const BUS_CONNECT_TIMEOUT_S: f64 = 60.0;
pub const BUS_CONNECT_INITIAL_DELAY_S: f64 = 0.5;
pub const BUS_CONNECT_MAX_DELAY_S: f64 = 5.0;

/// `params.logs` is an append-only scan log capped to this many entries.
pub const MAX_SCAN_LOG_ENTRIES: usize = 200;

/// Similarity score thresholds used to project a pair's label (see
/// `crate::types::label_for_score`): `score > HIGH` is "high",
/// `MEDIUM < score <= HIGH` is "medium", everything else is "low".
pub const LABEL_HIGH_THRESHOLD: f64 = 70.0;
pub const LABEL_MEDIUM_THRESHOLD: f64 = 40.0;

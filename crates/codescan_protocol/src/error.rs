//! Error types for the protocol layer.

use thiserror::Error;

/// Protocol operation result type.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Protocol errors: malformed envelopes, unknown event types, bad config.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("envelope serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("invalid identifier: {0}")]
    InvalidId(#[from] codescan_ids::IdParseError),

    #[error("invalid config value for {key}: {value}")]
    InvalidConfig { key: String, value: String },
}

//! Wire protocol for the code similarity scan pipeline.
//!
//! Defines the JSON event envelope exchanged over the bus, the payload
//! shapes for each event type, deterministic idempotency key derivation,
//! and the system-wide configuration and error types shared by every other
//! crate in the workspace.

pub mod config;
pub mod defaults;
pub mod error;
pub mod idempotency;
pub mod types;

pub use config::{OffsetResetPolicy, SystemConfig, TopicNames};
pub use error::{ProtocolError, Result};
pub use types::{
    label_for_score, CandidatesPayload, DeadletterPayload, Envelope, EventType, NormalizedPayload,
    NormalizedRef, ScanLogEntry, ScanStatus, ScoredPayload, SimilarityLabel, SubmittedFileEntry,
    SubmittedPayload,
};

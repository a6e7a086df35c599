//! Worker role selection and the per-role consume loop.
//!
//! Every role is the same shape: subscribe to one topic, hand each envelope
//! to a handler, and on failure route it through [`handle_fatal`] instead of
//! crashing the process — the reference's three workers each wrap their
//! `async for msg in consumer` loop in exactly this try/except.

use std::fmt;
use std::str::FromStr;

use codescan_bus::EventSubscription;
use tracing::{error, info};

use crate::candidate_retrieval::process_normalized;
use crate::common::{handle_fatal, WorkerContext};
use crate::normalizer::process_submitted;
use crate::scoring::process_candidates;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WorkerRole {
    Normalizer,
    CandidateRetrieval,
    Scoring,
}

impl WorkerRole {
    pub fn service_name(self) -> &'static str {
        match self {
            WorkerRole::Normalizer => "normalizer-worker",
            WorkerRole::CandidateRetrieval => "candidate-retrieval-worker",
            WorkerRole::Scoring => "scoring-worker",
        }
    }

    fn error_code(self) -> &'static str {
        match self {
            WorkerRole::Normalizer => "NORMALIZE_FAILED",
            WorkerRole::CandidateRetrieval => "CANDIDATE_FAILED",
            WorkerRole::Scoring => "SCORING_FAILED",
        }
    }

    pub fn input_topic<'a>(self, ctx: &'a WorkerContext) -> &'a str {
        match self {
            WorkerRole::Normalizer => &ctx.config.topics.submitted,
            WorkerRole::CandidateRetrieval => &ctx.config.topics.normalized,
            WorkerRole::Scoring => &ctx.config.topics.candidates,
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerRole::Normalizer => "normalizer",
            WorkerRole::CandidateRetrieval => "candidate-retrieval",
            WorkerRole::Scoring => "scoring",
        };
        f.write_str(s)
    }
}

impl FromStr for WorkerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normalizer" => Ok(WorkerRole::Normalizer),
            "candidate-retrieval" => Ok(WorkerRole::CandidateRetrieval),
            "scoring" => Ok(WorkerRole::Scoring),
            other => Err(format!(
                "unknown worker role '{other}' (expected normalizer, candidate-retrieval or scoring)"
            )),
        }
    }
}

/// Drive one role's consume loop until the subscription closes. Each
/// envelope is processed independently; a handler error is routed to the
/// dead-letter path and the loop continues with the next message, same as
/// the reference's per-message try/except around a still-running consumer.
pub async fn run_role(
    role: WorkerRole,
    ctx: &WorkerContext,
    mut subscription: Box<dyn EventSubscription>,
) {
    info!(role = %role, "worker started");
    loop {
        let (topic, envelope) = match subscription.recv().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(role = %role, "subscription closed: {e}");
                return;
            }
        };

        let scan_id = envelope.scan_id.clone();
        let correlation_id = envelope.correlation_id.clone();
        let original_event = match serde_json::to_value(&envelope) {
            Ok(v) => v,
            Err(_) => serde_json::json!({}),
        };

        let result = match role {
            WorkerRole::Normalizer => process_submitted(ctx, &envelope).await,
            WorkerRole::CandidateRetrieval => process_normalized(ctx, &envelope).await,
            WorkerRole::Scoring => process_candidates(ctx, &envelope).await,
        };

        if let Err(err) = result {
            error!(role = %role, scan_id = %scan_id, "{err:?}");
            handle_fatal(
                ctx,
                role.service_name(),
                Some(scan_id.as_str()),
                &correlation_id,
                &topic,
                &original_event,
                role.error_code(),
                &err,
            )
            .await;
        }
    }
}

//! Normalizer, candidate-retrieval and scoring worker roles for the code
//! similarity scan pipeline — three stateless consumers coordinating purely
//! through the relational store and the event bus.

pub mod candidate_retrieval;
pub mod common;
pub mod normalizer;
pub mod role;
pub mod scoring;

pub use common::{handle_fatal, WorkerContext, NIL_SCAN_ID};
pub use role::{run_role, WorkerRole};

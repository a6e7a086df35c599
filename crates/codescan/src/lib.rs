//! Library surface behind the `codescan` CLI binary.
//!
//! Everything here is the boundary contract the reference's FastAPI layer
//! occupied (spec.md §4.6): submitting a scan (ingress) and reading back
//! status/results (projection). Neither module runs a network service —
//! both are plain functions over the shared store, bus and config types so
//! the pipeline can be driven and inspected without a real HTTP front end.

pub mod ingress;
pub mod projection;

pub use ingress::submit_directory;
pub use projection::{scan_results, scan_status, ResultsView};

//! Relational store, content-addressed cache and blob store for the code
//! similarity scan pipeline.
//!
//! The relational layer is the system's source of truth (spec.md §4.2): a
//! bus event is only authoritative once the relational write behind it has
//! committed. This crate owns all SQL (`schema`, `repository`), the
//! checksum-keyed normalization cache (`cache`), and the blob store
//! (`blob`) — three independently swappable collaborators, bundled here
//! only because the reference treats all three as "store adapters" with
//! dev-grade defaults needed to make the pipeline runnable and testable.

pub mod blob;
pub mod cache;
pub mod error;
pub mod models;
pub mod pool;
pub mod repository;
pub mod schema;

pub use blob::{BlobStore, FsBlobStore};
pub use cache::{Cache, FsCache, InMemoryCache};
pub use error::{Result, StoreError};
pub use pool::{create_pool, DbConfig, DbPool};
pub use schema::ensure_schema;

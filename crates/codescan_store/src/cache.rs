//! Content-addressed cache for normalized source and token streams.
//!
//! Keyed by content checksum rather than scan id, so the same file
//! re-uploaded in a different scan skips normalization entirely. A cache
//! miss is never fatal — callers fall back to recomputing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::fs;

pub fn norm_key(checksum: &str) -> String {
    format!("norm:{checksum}")
}

pub fn tokens_key(checksum: &str) -> String {
    format!("tokens:{checksum}")
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String);

    /// Default implementation in terms of `get` — a real Redis-backed
    /// implementation would use `EXISTS` directly instead.
    async fn exists(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }
}

/// In-process cache, useful for tests and single-process setups. Not shared
/// across processes, so it's unsuitable as the pipeline's default backend —
/// each worker role runs as its own OS process, and the normalizer's writes
/// would be invisible to the scoring process. See [`FsCache`] for the
/// cross-process default.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    async fn set(&self, key: &str, value: String) {
        self.entries.lock().unwrap().insert(key.to_string(), value);
    }
}

/// Filesystem-backed [`Cache`] rooted at a configured directory, one file
/// per key — the cross-process default, mirroring [`crate::blob::FsBlobStore`]'s
/// root-directory pattern. Every worker role is its own OS process talking
/// only over the bus, so the normalizer's `tokens:<checksum>` write has to
/// land somewhere the scoring process can see it too; a real deployment
/// would swap this for Redis, which is why the key scheme
/// (`norm:<checksum>`, `tokens:<checksum>`) already matches what a
/// Redis-backed implementation would use.
pub struct FsCache {
    root: PathBuf,
}

impl FsCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(sanitize_key(key))
    }
}

#[async_trait]
impl Cache for FsCache {
    async fn get(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.entry_path(key)).await.ok()
    }

    async fn set(&self, key: &str, value: String) {
        let path = self.entry_path(key);
        if let Some(parent) = path.parent() {
            if fs::create_dir_all(parent).await.is_err() {
                return;
            }
        }
        let _ = fs::write(path, value).await;
    }
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_roundtrips_a_value() {
        let cache = InMemoryCache::new();
        cache.set(&norm_key("abc"), "normalized text".to_string()).await;
        assert_eq!(
            cache.get(&norm_key("abc")).await,
            Some("normalized text".to_string())
        );
    }

    #[tokio::test]
    async fn cache_miss_returns_none() {
        let cache = InMemoryCache::new();
        assert_eq!(cache.get(&tokens_key("missing")).await, None);
    }

    #[tokio::test]
    async fn fs_cache_roundtrips_a_value() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsCache::new(dir.path());
        cache.set(&tokens_key("abc"), "tok1 tok2".to_string()).await;
        assert_eq!(cache.get(&tokens_key("abc")).await, Some("tok1 tok2".to_string()));
        assert!(cache.exists(&tokens_key("abc")).await);
    }

    #[tokio::test]
    async fn fs_cache_miss_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsCache::new(dir.path());
        assert_eq!(cache.get(&norm_key("missing")).await, None);
    }

    #[tokio::test]
    async fn fs_cache_is_shared_across_independent_handles() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FsCache::new(dir.path());
        writer.set(&norm_key("xyz"), "normalized".to_string()).await;

        let reader = FsCache::new(dir.path());
        assert_eq!(reader.get(&norm_key("xyz")).await, Some("normalized".to_string()));
    }
}

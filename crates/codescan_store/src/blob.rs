//! Object blob store.
//!
//! The spec treats the object store as an opaque external collaborator
//! (`put`/`get`/`ensure_bucket`, no listing). This crate's default backend
//! is filesystem-rooted so the pipeline is runnable and testable without a
//! real MinIO/S3 endpoint: `bucket` becomes a subdirectory of the
//! configured root, `key` becomes a relative path under it.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{Result, StoreError};

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn ensure_bucket(&self, bucket: &str) -> Result<()>;
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8], content_type: &str) -> Result<()>;
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
}

/// Filesystem-backed [`BlobStore`] rooted at a configured directory.
///
/// `content_type` is accepted for interface parity with a real object store
/// but is not persisted — there's nowhere to put it without inventing a
/// sidecar metadata file, and nothing downstream of this crate reads it
/// back.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        fs::create_dir_all(self.root.join(bucket)).await?;
        Ok(())
    }

    async fn put(&self, bucket: &str, key: &str, bytes: &[u8], _content_type: &str) -> Result<()> {
        let path = self.object_path(bucket, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, key);
        fs::read(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    StoreError::not_found(format!("blob not found: {bucket}/{key}"))
                }
                _ => StoreError::Io(e),
            })
    }
}

/// Build an `object_key` for a newly uploaded file, matching the ingress
/// contract's `"<scan_id>/<uuid>__<filename>"` layout.
pub fn object_key(scan_id: &str, filename: &str) -> String {
    format!("{scan_id}/{}__{filename}", uuid::Uuid::new_v4())
}

pub fn content_type_for(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    match ext {
        "py" | "rs" | "go" | "java" | "c" | "cpp" | "cs" | "rb" | "php" | "swift" | "js" | "ts" => {
            "text/plain"
        }
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        store.ensure_bucket("scans").await.unwrap();
        store
            .put("scans", "scan-1/a.py", b"print(1)", "text/plain")
            .await
            .unwrap();

        let bytes = store.get("scans", "scan-1/a.py").await.unwrap();
        assert_eq!(bytes, b"print(1)");
    }

    #[tokio::test]
    async fn get_missing_object_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let err = store.get("scans", "missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn object_key_embeds_scan_id_and_filename() {
        let key = object_key("scan-1", "a.py");
        assert!(key.starts_with("scan-1/"));
        assert!(key.ends_with("__a.py"));
    }
}

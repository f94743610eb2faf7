//! Snapshot upload boundary.
//!
//! The S3 implementation lives outside this crate; the server only depends
//! on this seam. [`NullUploader`] is the default when no bucket is
//! configured.

use std::path::Path;

use async_trait::async_trait;

/// Destination for generated snapshot files.
#[async_trait]
pub trait SnapshotUploader: Send + Sync {
    /// Uploads a snapshot file for `store_id`, returning a retrieval URL.
    ///
    /// # Errors
    ///
    /// Implementations surface transport failures; callers log and
    /// continue (an upload failure never fails the snapshot cycle).
    async fn upload(&self, store_id: &str, path: &Path) -> anyhow::Result<String>;
}

/// No-op uploader used when snapshot storage is not configured.
pub struct NullUploader;

#[async_trait]
impl SnapshotUploader for NullUploader {
    async fn upload(&self, _store_id: &str, path: &Path) -> anyhow::Result<String> {
        Ok(format!("file://{}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_uploader_echoes_local_path() {
        let url = NullUploader
            .upload("default", Path::new("/tmp/current.db"))
            .await
            .unwrap();
        assert_eq!(url, "file:///tmp/current.db");
    }
}

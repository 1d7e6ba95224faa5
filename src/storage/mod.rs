use std::path::PathBuf;

use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid object name: {0}")]
    InvalidName(String),
    #[error("storage write failed: {0}")]
    Write(String),
}

/// Blob interface over the platform's bucket storage. The write is scoped
/// and fire-and-forget: no transaction spans the blob and any database row
/// referencing it, so a crash in between can strand an orphaned blob. An
/// out-of-band maintenance job reclaims those.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bucket: &str, name: &str, bytes: &[u8]) -> Result<String, StorageError>;
}

pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    pub fn new(root: PathBuf, public_base_url: String) -> Self {
        Self {
            root,
            public_base_url,
        }
    }

    fn sanitize(name: &str) -> Result<String, StorageError> {
        if name.is_empty() || name.contains("..") || name.contains('/') || name.contains('\\') {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(format!("{}-{}", Uuid::new_v4(), name))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, bucket: &str, name: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let object = Self::sanitize(name)?;
        let dir = self.root.join(bucket);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::Write(e.to_string()))?;
        tokio::fs::write(dir.join(&object), bytes)
            .await
            .map_err(|e| StorageError::Write(e.to_string()))?;
        Ok(format!("{}/{}/{}", self.public_base_url, bucket, object))
    }
}

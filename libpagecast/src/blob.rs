//! Media blob storage
//!
//! Uploaded media lives on disk until the post it belongs to is published or
//! deleted. The store hands back both a public URL (what the remote service
//! fetches) and the local path (what gets cleaned up afterwards).

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::{DbError, Result};
use crate::types::MediaRef;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist a media payload and return its public URL + local path.
    async fn store(&self, original_name: &str, bytes: &[u8]) -> Result<MediaRef>;

    /// Remove a stored file. Deleting a path that no longer exists is not an
    /// error.
    async fn delete(&self, local_path: &str) -> Result<()>;
}

/// Disk-backed blob store serving files from a configured base URL.
pub struct DiskBlobStore {
    root: PathBuf,
    base_url: String,
}

impl DiskBlobStore {
    pub fn new(root: impl Into<PathBuf>, base_url: &str) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Uniquify the stored filename while keeping the original extension, so
    /// concurrent uploads of `photo.jpg` never collide.
    fn unique_name(original_name: &str) -> String {
        let ext = Path::new(original_name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .filter(|e| !e.is_empty());
        let id = uuid::Uuid::new_v4().simple().to_string();
        match ext {
            Some(ext) => format!("pagecast_{}.{}", id, ext),
            None => format!("pagecast_{}", id),
        }
    }
}

#[async_trait]
impl BlobStore for DiskBlobStore {
    async fn store(&self, original_name: &str, bytes: &[u8]) -> Result<MediaRef> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(DbError::IoError)?;

        let name = Self::unique_name(original_name);
        let path = self.root.join(&name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(DbError::IoError)?;

        let hash = Sha256::digest(bytes);
        tracing::debug!(
            file = %path.display(),
            sha256 = %format!("{:x}", hash),
            size = bytes.len(),
            "Stored media blob"
        );

        Ok(MediaRef {
            url: format!("{}/{}", self.base_url, name),
            local_path: path.to_string_lossy().to_string(),
        })
    }

    async fn delete(&self, local_path: &str) -> Result<()> {
        match tokio::fs::remove_file(local_path).await {
            Ok(()) => {
                tracing::debug!(file = local_path, "Deleted media blob");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DbError::IoError(e).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = DiskBlobStore::new(dir.path(), "http://localhost/media/");

        let media = store.store("photo.JPG", b"jpeg bytes").await.unwrap();
        assert!(media.url.starts_with("http://localhost/media/pagecast_"));
        assert!(media.url.ends_with(".jpg"));
        assert!(Path::new(&media.local_path).exists());

        store.delete(&media.local_path).await.unwrap();
        assert!(!Path::new(&media.local_path).exists());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = DiskBlobStore::new(dir.path(), "http://localhost/media");
        store.delete(dir.path().join("gone.jpg").to_str().unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_names_never_collide() {
        let dir = TempDir::new().unwrap();
        let store = DiskBlobStore::new(dir.path(), "http://localhost/media");

        let a = store.store("same.png", b"one").await.unwrap();
        let b = store.store("same.png", b"two").await.unwrap();
        assert_ne!(a.local_path, b.local_path);
        assert_eq!(
            tokio::fs::read(&a.local_path).await.unwrap(),
            b"one".to_vec()
        );
    }

    #[test]
    fn test_unique_name_keeps_extension() {
        let name = DiskBlobStore::unique_name("Holiday Photo.JPEG");
        assert!(name.starts_with("pagecast_"));
        assert!(name.ends_with(".jpeg"));

        let bare = DiskBlobStore::unique_name("README");
        assert!(!bare.contains('.'));
    }
}

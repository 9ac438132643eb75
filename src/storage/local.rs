//! Local directory object store, for development without S3.

use super::ObjectStore;
use crate::error::{DavinciError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

/// Copies artifacts into a directory tree mirroring the object keys.
pub struct LocalObjectStore {
    root: PathBuf,
    base_url: String,
}

impl LocalObjectStore {
    /// Create a store rooted at `root`. Without a `base_url`, public URLs are
    /// `file://` URLs pointing into the root.
    pub fn new(root: &Path, base_url: Option<String>) -> Result<Self> {
        std::fs::create_dir_all(root)?;

        let base_url = match base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let root = root.canonicalize()?;
                Url::from_directory_path(&root)
                    .map_err(|_| DavinciError::Config(format!("Invalid storage root {:?}", root)))?
                    .to_string()
                    .trim_end_matches('/')
                    .to_string()
            }
        };

        Ok(Self {
            root: root.to_path_buf(),
            base_url,
        })
    }

    /// Path of the stored object for `key`.
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(&self, key: &str, path: &Path) -> Result<()> {
        let target = self.object_path(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(path, &target)
            .await
            .map_err(|e| DavinciError::Storage(format!("Cannot copy {:?}: {}", path, e)))?;

        debug!("Stored {:?} at {:?}", path, target);
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    fn describe(&self) -> String {
        format!("local directory {}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_copies_file() {
        let root = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        let file = source.path().join("plot.png");
        std::fs::write(&file, b"png").unwrap();

        let store = LocalObjectStore::new(root.path(), Some("http://localhost:8080/plots/".to_string()))
            .unwrap();
        store.upload("2024/3/7/9/plot.png", &file).await.unwrap();

        assert!(store.object_path("2024/3/7/9/plot.png").exists());
        assert!(file.exists());
        assert_eq!(
            store.public_url("2024/3/7/9/plot.png"),
            "http://localhost:8080/plots/2024/3/7/9/plot.png"
        );
    }

    #[test]
    fn test_default_base_url_is_file_url() {
        let root = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(root.path(), None).unwrap();
        assert!(store.public_url("a/b.png").starts_with("file://"));
        assert!(store.public_url("a/b.png").ends_with("/a/b.png"));
    }

    #[tokio::test]
    async fn test_upload_missing_file_fails() {
        let root = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(root.path(), None).unwrap();
        let result = store.upload("x/missing.png", Path::new("/nonexistent/missing.png")).await;
        assert!(matches!(result, Err(DavinciError::Storage(_))));
    }
}

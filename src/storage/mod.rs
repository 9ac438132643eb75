//! Object storage for generated plot artifacts.
//!
//! Artifacts are stored under keys derived from the current UTC time and the
//! file's base name, and exposed through a public URL.

mod local;
mod s3;

pub use local::LocalObjectStore;
pub use s3::S3ObjectStore;

use crate::config::{Settings, StorageBackend};
use crate::error::{DavinciError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::path::Path;
use std::sync::Arc;

/// Trait for object storage backends.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `path` under `key`.
    async fn upload(&self, key: &str, path: &Path) -> Result<()>;

    /// Public URL of the object stored under `key`.
    fn public_url(&self, key: &str) -> String;

    /// Short human-readable description (for diagnostics).
    fn describe(&self) -> String;
}

/// Build the object store selected in the settings.
pub fn connect(settings: &Settings) -> Result<Arc<dyn ObjectStore>> {
    match settings.storage.backend {
        StorageBackend::S3 => Ok(Arc::new(S3ObjectStore::new(
            &settings.storage.bucket,
            settings.storage.region.clone(),
        ))),
        StorageBackend::Local => {
            let base_url = settings.storage.public_base_url.clone();
            Ok(Arc::new(LocalObjectStore::new(
                &settings.local_storage_dir(),
                base_url,
            )?))
        }
    }
}

/// Object key `<year>/<month>/<day>/<hour>/<basename>` for a local file.
pub fn object_key(path: &Path, now: DateTime<Utc>) -> Result<String> {
    let basename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DavinciError::Storage(format!("Invalid file name: {:?}", path)))?;

    Ok(format!(
        "{}/{}/{}/{}/{}",
        now.year(),
        now.month(),
        now.day(),
        now.hour(),
        basename
    ))
}

/// Guess a content type from the file extension.
pub(crate) fn content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        Some("html") => "text/html",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;

    #[test]
    fn test_object_key_is_not_zero_padded() {
        let now = Utc.with_ymd_and_hms(2024, 3, 7, 9, 15, 0).unwrap();
        let key = object_key(&PathBuf::from("/tmp/work/plot.png"), now).unwrap();
        assert_eq!(key, "2024/3/7/9/plot.png");
    }

    #[test]
    fn test_object_key_requires_file_name() {
        let now = Utc::now();
        assert!(object_key(&PathBuf::from("/"), now).is_err());
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type(Path::new("a.PNG")), "image/png");
        assert_eq!(content_type(Path::new("chart.svg")), "image/svg+xml");
        assert_eq!(content_type(Path::new("data")), "application/octet-stream");
    }
}

//! Amazon S3 object store.

use super::{content_type, ObjectStore};
use crate::error::{DavinciError, Result};
use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

/// S3 bucket exposed through its virtual-hosted public URL.
pub struct S3ObjectStore {
    bucket: String,
    region: Option<String>,
    client: OnceCell<aws_sdk_s3::Client>,
}

impl S3ObjectStore {
    /// Create a store for `bucket`. Credentials come from the default AWS
    /// provider chain, resolved on the first upload.
    pub fn new(bucket: &str, region: Option<String>) -> Self {
        Self {
            bucket: bucket.to_string(),
            region,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> &aws_sdk_s3::Client {
        self.client
            .get_or_init(|| async {
                let mut loader = aws_config::from_env();
                if let Some(region) = &self.region {
                    loader = loader.region(aws_config::Region::new(region.clone()));
                }
                let config = loader.load().await;
                aws_sdk_s3::Client::new(&config)
            })
            .await
    }

    /// Base URL of the bucket.
    pub fn base_url(&self) -> String {
        format!("https://{}.s3.amazonaws.com", self.bucket)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, path))]
    async fn upload(&self, key: &str, path: &Path) -> Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| DavinciError::Storage(format!("Cannot read {:?}: {}", path, e)))?;

        self.client()
            .await
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type(path))
            .body(body)
            .send()
            .await
            .map_err(|e| DavinciError::Storage(DisplayErrorContext(&e).to_string()))?;

        debug!("Uploaded {:?} to s3://{}/{}", path, self.bucket, key);
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url(), key)
    }

    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_url() {
        let store = S3ObjectStore::new("pirls-plots", None);
        assert_eq!(
            store.public_url("2024/3/7/9/plot.png"),
            "https://pirls-plots.s3.amazonaws.com/2024/3/7/9/plot.png"
        );
        assert_eq!(store.describe(), "s3://pirls-plots");
    }
}

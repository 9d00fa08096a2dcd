use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;

use crate::error::OrchestratorError;

/// Object storage used for stack templates, parameter documents, and
/// trimmed inbound email bodies.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_text(&self, bucket: &str, key: &str) -> Result<String, OrchestratorError>;
}

pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: S3Client::new(config),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get_text(&self, bucket: &str, key: &str) -> Result<String, OrchestratorError> {
        let object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| OrchestratorError::Storage(format!("get {bucket}/{key}: {e}")))?;

        let bytes = object
            .body
            .collect()
            .await
            .map_err(|e| OrchestratorError::Storage(format!("read {bucket}/{key}: {e}")))?
            .into_bytes();

        String::from_utf8(bytes.to_vec())
            .map_err(|e| OrchestratorError::Storage(format!("{bucket}/{key} is not utf-8: {e}")))
    }
}

use async_trait::async_trait;
use aws_sdk_sns::Client as SnsClient;

use crate::error::OrchestratorError;
use crate::types::SessionCredentials;

/// Pub/sub delivery of grading results to a student's private channel.
/// Publishing runs under its own scoped credentials; it never reuses the
/// session that produced the message.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(
        &self,
        credentials: &SessionCredentials,
        topic_arn: &str,
        message: &str,
    ) -> Result<(), OrchestratorError>;
}

pub struct SnsNotifier {
    config: aws_config::SdkConfig,
}

impl SnsNotifier {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn client(&self, credentials: &SessionCredentials) -> SnsClient {
        let provider = aws_sdk_sns::config::Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            credentials.session_token.clone(),
            None,
            "scoped-session",
        );
        let conf = aws_sdk_sns::config::Builder::from(&self.config)
            .credentials_provider(provider)
            .build();
        SnsClient::from_conf(conf)
    }
}

#[async_trait]
impl Notifier for SnsNotifier {
    async fn publish(
        &self,
        credentials: &SessionCredentials,
        topic_arn: &str,
        message: &str,
    ) -> Result<(), OrchestratorError> {
        self.client(credentials)
            .publish()
            .topic_arn(topic_arn)
            .message(message)
            .send()
            .await
            .map_err(|e| OrchestratorError::Publish(format!("{topic_arn}: {e}")))?;
        Ok(())
    }
}

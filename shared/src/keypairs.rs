use async_trait::async_trait;
use aws_sdk_ec2::Client as Ec2Client;

use crate::error::OrchestratorError;
use crate::types::{KeyPairMaterial, SessionCredentials};

/// Named keypair management inside a student account.
#[async_trait]
pub trait KeyPairService: Send + Sync {
    async fn delete_key_pair(
        &self,
        credentials: &SessionCredentials,
        name: &str,
    ) -> Result<(), OrchestratorError>;

    async fn create_key_pair(
        &self,
        credentials: &SessionCredentials,
        name: &str,
    ) -> Result<KeyPairMaterial, OrchestratorError>;
}

pub struct Ec2KeyPairService {
    config: aws_config::SdkConfig,
}

impl Ec2KeyPairService {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn client(&self, credentials: &SessionCredentials) -> Ec2Client {
        let provider = aws_sdk_ec2::config::Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            credentials.session_token.clone(),
            None,
            "scoped-session",
        );
        let conf = aws_sdk_ec2::config::Builder::from(&self.config)
            .credentials_provider(provider)
            .build();
        Ec2Client::from_conf(conf)
    }
}

#[async_trait]
impl KeyPairService for Ec2KeyPairService {
    async fn delete_key_pair(
        &self,
        credentials: &SessionCredentials,
        name: &str,
    ) -> Result<(), OrchestratorError> {
        self.client(credentials)
            .delete_key_pair()
            .key_name(name)
            .send()
            .await
            .map_err(|e| OrchestratorError::KeyPair(format!("delete {name}: {e}")))?;
        Ok(())
    }

    async fn create_key_pair(
        &self,
        credentials: &SessionCredentials,
        name: &str,
    ) -> Result<KeyPairMaterial, OrchestratorError> {
        let response = self
            .client(credentials)
            .create_key_pair()
            .key_name(name)
            .send()
            .await
            .map_err(|e| OrchestratorError::KeyPair(format!("create {name}: {e}")))?;

        let key_name = response
            .key_name()
            .ok_or_else(|| OrchestratorError::KeyPair(format!("create {name}: no name returned")))?
            .to_string();
        let key_material = response
            .key_material()
            .ok_or_else(|| {
                OrchestratorError::KeyPair(format!("create {name}: no material returned"))
            })?
            .to_string();

        Ok(KeyPairMaterial {
            key_name,
            key_material,
        })
    }
}

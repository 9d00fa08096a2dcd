pub mod config;
pub mod credentials;
pub mod error;
pub mod grading;
pub mod invoke;
pub mod keypairs;
pub mod notify;
pub mod provision;
pub mod registry;
pub mod stacks;
pub mod storage;
pub mod templates;
pub mod triggers;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use config::OrchestratorConfig;
use credentials::{IdentityBroker, StsIdentityBroker};
use error::OrchestratorError;
use invoke::{FunctionInvoker, LambdaFunctionInvoker};
use keypairs::{Ec2KeyPairService, KeyPairService};
use notify::{Notifier, SnsNotifier};
use registry::{DynamoStudentRegistry, StudentRegistry};
use stacks::{CloudFormationStackEngine, StackEngine};
use storage::{ObjectStore, S3ObjectStore};

/// Shared orchestrator state, constructed once at startup.
pub struct Orchestrator {
    pub config: OrchestratorConfig,
    pub registry: Arc<dyn StudentRegistry>,
    pub broker: Arc<dyn IdentityBroker>,
    pub engine: Arc<dyn StackEngine>,
    pub store: Arc<dyn ObjectStore>,
    pub invoker: Arc<dyn FunctionInvoker>,
    pub notifier: Arc<dyn Notifier>,
    pub key_pairs: Arc<dyn KeyPairService>,
}

impl Orchestrator {
    /// Wire every collaborator to its AWS implementation.
    pub fn new(sdk_config: &aws_config::SdkConfig, config: OrchestratorConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(DynamoStudentRegistry::new(
                sdk_config,
                config.student_account_table.clone(),
            )),
            broker: Arc::new(StsIdentityBroker::new(sdk_config, &config)),
            engine: Arc::new(CloudFormationStackEngine::new(sdk_config, &config)),
            store: Arc::new(S3ObjectStore::new(sdk_config)),
            invoker: Arc::new(LambdaFunctionInvoker::new(sdk_config)),
            notifier: Arc::new(SnsNotifier::new(sdk_config)),
            key_pairs: Arc::new(Ec2KeyPairService::new(sdk_config)),
            config,
        })
    }
}

/// Load the ambient AWS configuration, honoring the region override.
pub async fn load_sdk_config(config: &OrchestratorConfig) -> aws_config::SdkConfig {
    let mut loader = aws_config::from_env();
    if let Some(region) = &config.aws_region {
        loader = loader.region(aws_config::Region::new(region.clone()));
    }
    loader.load().await
}

/// Account id embedded in an invoked-function ARN.
pub fn account_id_from_arn(arn: &str) -> Result<String, OrchestratorError> {
    arn.split(':')
        .nth(4)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            OrchestratorError::Configuration(format!("cannot read account id from arn {arn}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_the_account_id_out_of_a_function_arn() {
        let arn = "arn:aws:lambda:us-east-1:111122223333:function:grade-classroom";
        assert_eq!(account_id_from_arn(arn).unwrap(), "111122223333");
    }

    #[test]
    fn rejects_an_arn_without_an_account_id() {
        assert!(account_id_from_arn("not-an-arn").is_err());
    }
}

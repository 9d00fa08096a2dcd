use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_cloudformation::error::ProvideErrorMetadata;
use aws_sdk_cloudformation::types::{Capability, Parameter};
use aws_sdk_cloudformation::Client as CloudFormationClient;
use serde::Deserialize;
use tokio::time::{sleep, Instant};

use crate::config::OrchestratorConfig;
use crate::credentials::IdentityBroker;
use crate::error::OrchestratorError;
use crate::templates::substitute;
use crate::types::{KeyPairMaterial, SessionCredentials, StackParameter, StackRequest};
use crate::Orchestrator;

/// Placeholder values the lab parameter documents pre-declare.
pub const STUDENT_ACCOUNT_ARN_PLACEHOLDER: &str = "###studentAccountArn###";
pub const KEY_PAIR_NAME_PLACEHOLDER: &str = "###keyPairName###";
pub const KEY_MATERIAL_PLACEHOLDER: &str = "###KeyMaterial###";
pub const RDP_FILE_URL_PLACEHOLDER: &str = "###RdpFileUrl###";
pub const PEM_KEY_FILE_URL_PLACEHOLDER: &str = "###PemKeyFileUrl###";

/// The opaque infrastructure-stack engine. Every call is scoped to exactly
/// one set of credentials; the adapter builds a one-shot client from them.
#[async_trait]
pub trait StackEngine: Send + Sync {
    /// Asynchronous create; returns once the engine accepts the request.
    async fn create_stack(
        &self,
        credentials: &SessionCredentials,
        request: &StackRequest,
    ) -> Result<(), OrchestratorError>;

    /// Deleting a stack that is already gone is an engine-level no-op.
    async fn delete_stack(
        &self,
        credentials: &SessionCredentials,
        stack_name: &str,
    ) -> Result<(), OrchestratorError>;

    /// Blocks until the stack reaches a terminal create state, bounded by
    /// the configured timeout.
    async fn wait_for_create_complete(
        &self,
        credentials: &SessionCredentials,
        stack_name: &str,
    ) -> Result<(), OrchestratorError>;

    async fn stack_outputs(
        &self,
        credentials: &SessionCredentials,
        stack_name: &str,
    ) -> Result<HashMap<String, String>, OrchestratorError>;
}

pub struct CloudFormationStackEngine {
    config: aws_config::SdkConfig,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl CloudFormationStackEngine {
    pub fn new(config: &aws_config::SdkConfig, orchestrator: &OrchestratorConfig) -> Self {
        Self {
            config: config.clone(),
            wait_timeout: orchestrator.stack_wait_timeout,
            poll_interval: orchestrator.stack_poll_interval,
        }
    }

    fn client(&self, credentials: &SessionCredentials) -> CloudFormationClient {
        let provider = aws_sdk_cloudformation::config::Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            credentials.session_token.clone(),
            None,
            "scoped-session",
        );
        let conf = aws_sdk_cloudformation::config::Builder::from(&self.config)
            .credentials_provider(provider)
            .build();
        CloudFormationClient::from_conf(conf)
    }
}

#[async_trait]
impl StackEngine for CloudFormationStackEngine {
    async fn create_stack(
        &self,
        credentials: &SessionCredentials,
        request: &StackRequest,
    ) -> Result<(), OrchestratorError> {
        let parameters: Vec<Parameter> = request
            .parameters
            .iter()
            .map(|p| {
                Parameter::builder()
                    .parameter_key(&p.key)
                    .parameter_value(&p.value)
                    .build()
            })
            .collect();

        // The templates define IAM resources, so the create must acknowledge
        // both IAM capabilities up front.
        let mut call = self
            .client(credentials)
            .create_stack()
            .stack_name(&request.stack_name)
            .template_body(&request.template_body)
            .capabilities(Capability::CapabilityIam)
            .capabilities(Capability::CapabilityNamedIam)
            .set_parameters(Some(parameters));

        if let Some(topic) = &request.notification_topic {
            call = call.notification_arns(topic);
        }

        call.send().await.map_err(|e| match e.code() {
            Some("AlreadyExistsException") => {
                OrchestratorError::StackConflict(request.stack_name.clone())
            }
            Some("ValidationError") => OrchestratorError::TemplateValidation(
                e.message().unwrap_or("template rejected").to_string(),
            ),
            _ => OrchestratorError::Stack(format!("create {}: {e}", request.stack_name)),
        })?;

        Ok(())
    }

    async fn delete_stack(
        &self,
        credentials: &SessionCredentials,
        stack_name: &str,
    ) -> Result<(), OrchestratorError> {
        self.client(credentials)
            .delete_stack()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| OrchestratorError::Stack(format!("delete {stack_name}: {e}")))?;
        Ok(())
    }

    async fn wait_for_create_complete(
        &self,
        credentials: &SessionCredentials,
        stack_name: &str,
    ) -> Result<(), OrchestratorError> {
        let client = self.client(credentials);
        let deadline = Instant::now() + self.wait_timeout;

        loop {
            let response = client
                .describe_stacks()
                .stack_name(stack_name)
                .send()
                .await
                .map_err(|e| OrchestratorError::Stack(format!("describe {stack_name}: {e}")))?;

            let status = response
                .stacks()
                .first()
                .and_then(|s| s.stack_status())
                .ok_or_else(|| OrchestratorError::Stack(format!("{stack_name} has no status")))?;

            match status.as_str() {
                "CREATE_COMPLETE" => return Ok(()),
                "CREATE_IN_PROGRESS" => {}
                other => {
                    return Err(OrchestratorError::Stack(format!(
                        "{stack_name} entered {other} while waiting for create"
                    )))
                }
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(OrchestratorError::Stack(format!(
                    "{stack_name} did not finish creating within {:?}",
                    self.wait_timeout
                )));
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn stack_outputs(
        &self,
        credentials: &SessionCredentials,
        stack_name: &str,
    ) -> Result<HashMap<String, String>, OrchestratorError> {
        let response = self
            .client(credentials)
            .describe_stacks()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| OrchestratorError::Stack(format!("describe {stack_name}: {e}")))?;

        let stack = response
            .stacks()
            .first()
            .ok_or_else(|| OrchestratorError::Stack(format!("{stack_name} not found")))?;

        Ok(stack
            .outputs()
            .iter()
            .filter_map(|o| Some((o.output_key()?.to_string(), o.output_value()?.to_string())))
            .collect())
    }
}

/// Pairs the credential broker with the stack engine: every stack mutation
/// first obtains its own delegated session for the request's role.
pub struct StackLifecycle<'a> {
    broker: &'a dyn IdentityBroker,
    engine: &'a dyn StackEngine,
}

impl<'a> StackLifecycle<'a> {
    pub fn new(broker: &'a dyn IdentityBroker, engine: &'a dyn StackEngine) -> Self {
        Self { broker, engine }
    }

    /// Delegate into the request's role and issue the asynchronous create.
    /// Does not wait for completion; listeners learn the outcome through
    /// the request's notification topic.
    pub async fn create_stack(&self, request: &StackRequest) -> Result<(), OrchestratorError> {
        let role_arn = request.role_arn.as_deref().ok_or_else(|| {
            OrchestratorError::Delegation("stack request names no delegation role".to_string())
        })?;
        let session = self.broker.delegate(role_arn).await?;
        self.engine
            .create_stack(&session.credentials(), request)
            .await
    }

    pub async fn delete_stack(
        &self,
        stack_name: &str,
        role_arn: &str,
    ) -> Result<(), OrchestratorError> {
        let session = self.broker.delegate(role_arn).await?;
        self.engine
            .delete_stack(&session.credentials(), stack_name)
            .await
    }
}

/// Command to stand up a lab stack for one student.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLabStackCommand {
    pub classroom_id: String,
    pub email: String,
    pub stack_name: String,
    pub bucket: String,
    pub template_key: String,
    pub parameters_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteLabStackCommand {
    pub classroom_id: String,
    pub email: String,
    pub stack_name: String,
}

/// The trust role the operator may assume inside a student account.
pub fn cross_account_role_arn(
    config: &OrchestratorConfig,
    student_account_id: &str,
    operator_account_id: &str,
) -> String {
    format!(
        "arn:aws:iam::{student_account_id}:role/{}{operator_account_id}",
        config.cross_account_role_prefix
    )
}

/// Stand up a lab stack inside the student's account: resolve the student
/// record, fill the parameter document's placeholders, and hand the request
/// to the lifecycle manager.
pub async fn create_student_lab_stack(
    orchestrator: &Orchestrator,
    command: &CreateLabStackCommand,
    operator_account_id: &str,
) -> Result<(), OrchestratorError> {
    let record = orchestrator
        .registry
        .get(&command.classroom_id, &command.email)
        .await?
        .ok_or_else(|| OrchestratorError::StudentNotFound {
            classroom_id: command.classroom_id.clone(),
            email: command.email.clone(),
        })?;

    let key_pair: KeyPairMaterial = serde_json::from_str(&record.key_pair)
        .map_err(|e| OrchestratorError::Registry(format!("stored keyPair is not valid: {e}")))?;

    let parameters_doc = orchestrator
        .store
        .get_text(&command.bucket, &command.parameters_key)
        .await?;
    let mut parameters: Vec<StackParameter> = serde_json::from_str(&parameters_doc)
        .map_err(|e| OrchestratorError::TemplateValidation(format!("parameter document: {e}")))?;

    substitute(
        &mut parameters,
        &[
            (
                STUDENT_ACCOUNT_ARN_PLACEHOLDER,
                record.student_account_arn.as_str(),
            ),
            (KEY_PAIR_NAME_PLACEHOLDER, key_pair.key_name.as_str()),
            (KEY_MATERIAL_PLACEHOLDER, key_pair.key_material.as_str()),
            (
                RDP_FILE_URL_PLACEHOLDER,
                orchestrator.config.rdp_file_url.as_str(),
            ),
            (
                PEM_KEY_FILE_URL_PLACEHOLDER,
                orchestrator.config.pem_key_file_url.as_str(),
            ),
        ],
    );

    let template_body = orchestrator
        .store
        .get_text(&command.bucket, &command.template_key)
        .await?;

    let request = StackRequest {
        stack_name: command.stack_name.clone(),
        template_body,
        parameters,
        role_arn: Some(cross_account_role_arn(
            &orchestrator.config,
            &record.aws_account_id,
            operator_account_id,
        )),
        notification_topic: Some(record.lab_stack_creation_complete_topic.clone()),
    };

    tracing::info!(stack = %request.stack_name, student = %record.email, "creating lab stack");
    StackLifecycle::new(orchestrator.broker.as_ref(), orchestrator.engine.as_ref())
        .create_stack(&request)
        .await
}

/// Tear down a student's lab stack under a fresh delegation.
pub async fn delete_student_lab_stack(
    orchestrator: &Orchestrator,
    command: &DeleteLabStackCommand,
    operator_account_id: &str,
) -> Result<(), OrchestratorError> {
    let record = orchestrator
        .registry
        .get(&command.classroom_id, &command.email)
        .await?
        .ok_or_else(|| OrchestratorError::StudentNotFound {
            classroom_id: command.classroom_id.clone(),
            email: command.email.clone(),
        })?;

    let role_arn = cross_account_role_arn(
        &orchestrator.config,
        &record.aws_account_id,
        operator_account_id,
    );

    tracing::info!(stack = %command.stack_name, student = %record.email, "deleting lab stack");
    StackLifecycle::new(orchestrator.broker.as_ref(), orchestrator.engine.as_ref())
        .delete_stack(&command.stack_name, &role_arn)
        .await
}

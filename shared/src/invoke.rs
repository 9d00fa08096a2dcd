use async_trait::async_trait;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType;
use aws_sdk_lambda::Client as LambdaClient;
use serde_json::Value;

use crate::error::OrchestratorError;

/// Synchronous request/response invocation of a grading function.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, function_name: &str, payload: Value)
        -> Result<Value, OrchestratorError>;
}

pub struct LambdaFunctionInvoker {
    client: LambdaClient,
}

impl LambdaFunctionInvoker {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: LambdaClient::new(config),
        }
    }
}

#[async_trait]
impl FunctionInvoker for LambdaFunctionInvoker {
    async fn invoke(
        &self,
        function_name: &str,
        payload: Value,
    ) -> Result<Value, OrchestratorError> {
        let bytes = serde_json::to_vec(&payload)
            .map_err(|e| OrchestratorError::Invocation(format!("{function_name}: {e}")))?;

        let response = self
            .client
            .invoke()
            .function_name(function_name)
            .invocation_type(InvocationType::RequestResponse)
            .payload(Blob::new(bytes))
            .send()
            .await
            .map_err(|e| OrchestratorError::Invocation(format!("{function_name}: {e}")))?;

        if let Some(function_error) = response.function_error() {
            return Err(OrchestratorError::Invocation(format!(
                "{function_name} returned {function_error}"
            )));
        }

        let body = response.payload().ok_or_else(|| {
            OrchestratorError::Invocation(format!("{function_name} returned no payload"))
        })?;

        serde_json::from_slice(body.as_ref()).map_err(|e| {
            OrchestratorError::Invocation(format!("{function_name} payload is not JSON: {e}"))
        })
    }
}

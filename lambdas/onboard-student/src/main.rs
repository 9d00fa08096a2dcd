use std::sync::Arc;

use labfleet_shared::config::OrchestratorConfig;
use labfleet_shared::error::OrchestratorError;
use labfleet_shared::provision::{onboard_student, OnboardCommand};
use labfleet_shared::types::CredentialMaterial;
use labfleet_shared::{load_sdk_config, triggers, Orchestrator};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::Deserialize;
use serde_json::{json, Value};

/// Direct onboarding request. `rawKey` carries the pasted credential blob;
/// `accessKey`/`secretKey` are the long-lived alternative.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OnboardRequest {
    classroom_id: String,
    email: String,
    raw_key: Option<String>,
    access_key: Option<String>,
    secret_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let config = OrchestratorConfig::from_env()?;
    let sdk_config = load_sdk_config(&config).await;
    let orchestrator = Orchestrator::new(&sdk_config, config);

    run(service_fn(move |event: LambdaEvent<Value>| {
        let orchestrator = Arc::clone(&orchestrator);
        async move { handle(event, orchestrator).await }
    }))
    .await
}

async fn handle(event: LambdaEvent<Value>, orchestrator: Arc<Orchestrator>) -> Result<Value, Error> {
    let payload = event.payload;

    let command = if payload.get("Records").is_some() {
        // Onboarding by email: the body is the credential blob.
        let command = triggers::normalize(&payload, orchestrator.store.as_ref()).await?;
        let email = command.email.ok_or_else(|| {
            OrchestratorError::UnrecognizedTrigger("inbound message names no sender".to_string())
        })?;
        let raw = command.credential_blob.ok_or_else(|| {
            OrchestratorError::UnrecognizedTrigger(
                "inbound message carries no credential material".to_string(),
            )
        })?;
        OnboardCommand {
            classroom_id: command.classroom_id,
            email,
            material: CredentialMaterial::RawBlob(raw),
        }
    } else {
        let request: OnboardRequest = serde_json::from_value(payload)
            .map_err(|e| OrchestratorError::UnrecognizedTrigger(format!("onboard request: {e}")))?;
        let material = match (request.raw_key, request.access_key, request.secret_key) {
            (Some(raw), _, _) => CredentialMaterial::RawBlob(raw),
            (None, Some(access_key_id), Some(secret_access_key)) => {
                CredentialMaterial::AccessKeyPair {
                    access_key_id,
                    secret_access_key,
                }
            }
            _ => {
                return Err(
                    OrchestratorError::MalformedCredentials("rawKey or accessKey/secretKey").into(),
                )
            }
        };
        OnboardCommand {
            classroom_id: request.classroom_id,
            email: request.email,
            material,
        }
    };

    let record = onboard_student(&orchestrator, &command).await?;
    Ok(json!({
        "status": "ok",
        "classroomId": record.classroom_id,
        "email": record.email,
    }))
}

use std::sync::Arc;

use labfleet_shared::config::OrchestratorConfig;
use labfleet_shared::error::OrchestratorError;
use labfleet_shared::grading::grade_classroom;
use labfleet_shared::{account_id_from_arn, load_sdk_config, triggers, Orchestrator};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::{json, Value};

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
    let operator_account_id = account_id_from_arn(&event.context.invoked_function_arn)?;

    let command = triggers::normalize(&event.payload, orchestrator.store.as_ref()).await?;
    let function_name = command.function_name.ok_or_else(|| {
        OrchestratorError::UnrecognizedTrigger("trigger names no grading function".to_string())
    })?;

    let outcomes = grade_classroom(
        &orchestrator,
        &command.classroom_id,
        &function_name,
        &operator_account_id,
    )
    .await?;

    Ok(json!({
        "status": "ok",
        "classroomId": command.classroom_id,
        "results": outcomes,
    }))
}

use std::sync::Arc;

use labfleet_shared::config::OrchestratorConfig;
use labfleet_shared::error::OrchestratorError;
use labfleet_shared::stacks::{delete_student_lab_stack, DeleteLabStackCommand};
use labfleet_shared::{account_id_from_arn, load_sdk_config, Orchestrator};
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
    let command: DeleteLabStackCommand = serde_json::from_value(event.payload).map_err(|e| {
        OrchestratorError::UnrecognizedTrigger(format!("delete-lab-stack request: {e}"))
    })?;

    delete_student_lab_stack(&orchestrator, &command, &operator_account_id).await?;
    Ok(json!({ "status": "ok", "stackName": command.stack_name }))
}

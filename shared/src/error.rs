use thiserror::Error;

/// Failure taxonomy for orchestrator operations.
///
/// A delegation or stack error is fatal for the single operation that hit
/// it. Inside the grading fan-out every error becomes that one student's
/// outcome and never aborts sibling pipelines.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("delegation failed: {0}")]
    Delegation(String),

    #[error("credential material is missing `{0}`")]
    MalformedCredentials(&'static str),

    #[error("template rejected: {0}")]
    TemplateValidation(String),

    #[error("stack {0} already exists and is not in a replaceable state")]
    StackConflict(String),

    #[error("stack operation failed: {0}")]
    Stack(String),

    #[error("provisioning failed: {0}")]
    Provisioning(String),

    #[error("no registry record for {email} in classroom {classroom_id}")]
    StudentNotFound { classroom_id: String, email: String },

    #[error("registry error: {0}")]
    Registry(String),

    #[error("object storage error: {0}")]
    Storage(String),

    #[error("grading invocation failed: {0}")]
    Invocation(String),

    #[error("result publish failed: {0}")]
    Publish(String),

    #[error("keypair operation failed: {0}")]
    KeyPair(String),

    #[error("unrecognized trigger shape: {0}")]
    UnrecognizedTrigger(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

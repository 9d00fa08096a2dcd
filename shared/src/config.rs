use std::env;
use std::time::Duration;

use crate::error::OrchestratorError;

/// Process configuration, constructed once at startup and passed into every
/// component. No ambient globals.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Registry table holding one record per (classroomId, email).
    pub student_account_table: String,
    /// Region override for the AWS clients; falls back to the environment.
    pub aws_region: Option<String>,
    /// Role-name prefix of the cross-account trust role in student
    /// accounts. The full role name is `{prefix}{operator_account_id}`.
    pub cross_account_role_prefix: String,
    /// Session name stamped on every delegation.
    pub delegation_session_name: String,
    /// Stack-name prefix of the per-student sandbox stack.
    pub sandbox_stack_prefix: String,
    /// Object-storage location of the sandbox stack template.
    pub sandbox_template_bucket: String,
    pub sandbox_template_key: String,
    /// Helper download URLs substituted into lab stack parameters.
    pub rdp_file_url: String,
    pub pem_key_file_url: String,
    /// Upper bound on the one blocking stack wait in the system.
    pub stack_wait_timeout: Duration,
    pub stack_poll_interval: Duration,
}

impl OrchestratorConfig {
    /// Read configuration from the environment the deployment template sets.
    pub fn from_env() -> Result<Self, OrchestratorError> {
        let student_account_table = env::var("STUDENT_ACCOUNT_TABLE").map_err(|_| {
            OrchestratorError::Configuration("STUDENT_ACCOUNT_TABLE must be set".to_string())
        })?;

        Ok(Self {
            student_account_table,
            aws_region: env::var("AWS_REGION").ok(),
            cross_account_role_prefix: env::var("CROSS_ACCOUNT_ROLE_PREFIX")
                .unwrap_or_else(|_| "crossaccountteacher".to_string()),
            delegation_session_name: env::var("DELEGATION_SESSION_NAME")
                .unwrap_or_else(|_| "studentAccount".to_string()),
            sandbox_stack_prefix: env::var("SANDBOX_STACK_PREFIX")
                .unwrap_or_else(|_| "ManagedLearnerLab".to_string()),
            sandbox_template_bucket: env::var("SANDBOX_TEMPLATE_BUCKET").unwrap_or_default(),
            sandbox_template_key: env::var("SANDBOX_TEMPLATE_KEY")
                .unwrap_or_else(|_| "InitStudentAccount.yaml".to_string()),
            rdp_file_url: env::var("RDP_FILE_URL").unwrap_or_default(),
            pem_key_file_url: env::var("PEM_KEY_FILE_URL").unwrap_or_default(),
            stack_wait_timeout: duration_var("STACK_WAIT_TIMEOUT_SECS", 1800),
            stack_poll_interval: duration_var("STACK_POLL_INTERVAL_SECS", 15),
        })
    }
}

fn duration_var(name: &str, default_secs: u64) -> Duration {
    Duration::from_secs(
        env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_secs),
    )
}

#[cfg(test)]
impl OrchestratorConfig {
    pub(crate) fn for_tests() -> Self {
        Self {
            student_account_table: "student-accounts".to_string(),
            aws_region: None,
            cross_account_role_prefix: "crossaccountteacher".to_string(),
            delegation_session_name: "studentAccount".to_string(),
            sandbox_stack_prefix: "ManagedLearnerLab".to_string(),
            sandbox_template_bucket: "lab-assets".to_string(),
            sandbox_template_key: "InitStudentAccount.yaml".to_string(),
            rdp_file_url: "https://assets.example.com/lab.rdp".to_string(),
            pem_key_file_url: "https://assets.example.com/lab.pem".to_string(),
            stack_wait_timeout: Duration::from_secs(60),
            stack_poll_interval: Duration::from_secs(1),
        }
    }
}

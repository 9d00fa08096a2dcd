use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ========== REGISTRY ==========

/// One onboarded student account, keyed by (classroomId, email).
///
/// Written once by the provisioner and read-only afterwards. Registry put
/// is an upsert, so concurrent onboarding of the same key is
/// last-writer-wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAccountRecord {
    pub classroom_id: String,
    pub email: String,
    pub student_account_arn: String,
    pub aws_account_id: String,
    pub lab_stack_creation_complete_topic: String,
    pub notify_student_topic: String,
    pub key_provider_url: String,
    /// Serialized [`KeyPairMaterial`] JSON.
    pub key_pair: String,
    /// Present only when the student supplied long-lived keys instead of a
    /// delegated-credential blob.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
}

// ========== CREDENTIALS ==========

/// Credential triple scoping one downstream client to one principal. The
/// token is absent for student-supplied long-lived keys.
#[derive(Debug, Clone)]
pub struct SessionCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// Short-lived delegated session. Owned by the one operation that requested
/// it; never cached, never shared across pipelines.
#[derive(Debug, Clone)]
pub struct DelegatedSession {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiry: DateTime<Utc>,
}

impl DelegatedSession {
    pub fn credentials(&self) -> SessionCredentials {
        SessionCredentials {
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            session_token: Some(self.session_token.clone()),
        }
    }
}

/// Identity of the principal behind a set of credentials.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub account_id: String,
    pub arn: String,
}

/// Provisioner input: either the pasted delegated-credential text or an
/// explicit long-lived key pair.
#[derive(Debug, Clone)]
pub enum CredentialMaterial {
    RawBlob(String),
    AccessKeyPair {
        access_key_id: String,
        secret_access_key: String,
    },
}

// ========== STACKS ==========

/// One ordered template parameter. Wire names follow the provisioning
/// engine's parameter documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackParameter {
    #[serde(rename = "ParameterKey")]
    pub key: String,
    #[serde(rename = "ParameterValue")]
    pub value: String,
}

/// A single stack create request, built per invocation and discarded once
/// the provisioning call returns.
#[derive(Debug, Clone)]
pub struct StackRequest {
    pub stack_name: String,
    pub template_body: String,
    pub parameters: Vec<StackParameter>,
    /// Role the lifecycle manager delegates into before touching the
    /// engine. Absent when the caller already holds scoped credentials
    /// (the provisioner's sandbox create).
    pub role_arn: Option<String>,
    pub notification_topic: Option<String>,
}

// ========== KEYPAIRS ==========

/// Fresh keypair material returned by the keypair service, stored
/// serialized on the student record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyPairMaterial {
    pub key_name: String,
    pub key_material: String,
}

// ========== GRADING ==========

/// Per-student fan-out outcome: exactly one of report / error is set.
#[derive(Debug, Clone, Serialize)]
pub struct StudentGradeOutcome {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StudentGradeOutcome {
    pub fn succeeded(email: impl Into<String>, report: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            report: Some(report.into()),
            error: None,
        }
    }

    pub fn failed(email: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            report: None,
            error: Some(error.into()),
        }
    }
}

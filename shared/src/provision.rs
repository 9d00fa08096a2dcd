use std::collections::HashMap;

use crate::credentials::parse_credential_blob;
use crate::error::OrchestratorError;
use crate::types::{
    CredentialMaterial, KeyPairMaterial, SessionCredentials, StackParameter, StackRequest,
    StudentAccountRecord,
};
use crate::Orchestrator;

/// Stack output keys the sandbox template must export.
const STACK_COMPLETE_TOPIC_OUTPUT: &str = "SNSCloudFormationTopic";
const NOTIFY_STUDENT_TOPIC_OUTPUT: &str = "NotifyStudentTopic";
const KEY_PROVIDER_URL_OUTPUT: &str = "KeyProviderUrl";

#[derive(Debug, Clone)]
pub struct OnboardCommand {
    pub classroom_id: String,
    pub email: String,
    pub material: CredentialMaterial,
}

/// First-contact onboarding of a student.
///
/// Stands up the student's own sandbox stack under the supplied credentials,
/// waits for it to finish creating (the one blocking wait in the system),
/// harvests its required outputs, rotates the student keypair, and upserts
/// the registry record.
pub async fn onboard_student(
    orchestrator: &Orchestrator,
    command: &OnboardCommand,
) -> Result<StudentAccountRecord, OrchestratorError> {
    let config = &orchestrator.config;
    let operator = orchestrator.broker.caller_identity(None).await?;

    let credentials = match &command.material {
        CredentialMaterial::RawBlob(raw) => parse_credential_blob(raw)?,
        CredentialMaterial::AccessKeyPair {
            access_key_id,
            secret_access_key,
        } => SessionCredentials {
            access_key_id: access_key_id.clone(),
            secret_access_key: secret_access_key.clone(),
            session_token: None,
        },
    };
    let student = orchestrator.broker.caller_identity(Some(&credentials)).await?;

    let stack_name = sandbox_stack_name(
        &config.sandbox_stack_prefix,
        &operator.account_id,
        &command.classroom_id,
        &command.email,
    );
    let template_body = orchestrator
        .store
        .get_text(&config.sandbox_template_bucket, &config.sandbox_template_key)
        .await?;

    let request = StackRequest {
        stack_name: stack_name.clone(),
        template_body,
        parameters: vec![
            StackParameter {
                key: "TeacherAccountId".to_string(),
                value: operator.account_id.clone(),
            },
            StackParameter {
                key: "StudentEmail".to_string(),
                value: command.email.clone(),
            },
        ],
        // Created directly under the supplied student credentials, not a
        // delegation.
        role_arn: None,
        notification_topic: None,
    };

    tracing::info!(stack = %stack_name, account = %student.account_id, "creating sandbox stack");
    match orchestrator.engine.create_stack(&credentials, &request).await {
        Ok(()) => {}
        // Re-onboarding is legal; an existing sandbox stack is awaited as-is.
        Err(OrchestratorError::StackConflict(_)) => {
            tracing::info!(stack = %stack_name, "sandbox stack already exists, waiting on it");
        }
        Err(e) => return Err(e),
    }
    orchestrator
        .engine
        .wait_for_create_complete(&credentials, &stack_name)
        .await?;

    let outputs = orchestrator
        .engine
        .stack_outputs(&credentials, &stack_name)
        .await?;
    let lab_stack_creation_complete_topic = required_output(&outputs, STACK_COMPLETE_TOPIC_OUTPUT)?;
    let notify_student_topic = required_output(&outputs, NOTIFY_STUDENT_TOPIC_OUTPUT)?;
    let key_provider_url = required_output(&outputs, KEY_PROVIDER_URL_OUTPUT)?;

    let key_pair = rotate_key_pair(
        orchestrator,
        &credentials,
        &command.classroom_id,
        &operator.account_id,
        &command.email,
    )
    .await?;
    let key_pair_json = serde_json::to_string(&key_pair)
        .map_err(|e| OrchestratorError::Provisioning(format!("serialize keypair: {e}")))?;

    let (access_key_id, secret_access_key) = match &command.material {
        CredentialMaterial::AccessKeyPair {
            access_key_id,
            secret_access_key,
        } => (Some(access_key_id.clone()), Some(secret_access_key.clone())),
        CredentialMaterial::RawBlob(_) => (None, None),
    };

    let record = StudentAccountRecord {
        classroom_id: command.classroom_id.clone(),
        email: command.email.clone(),
        student_account_arn: student.arn,
        aws_account_id: student.account_id,
        lab_stack_creation_complete_topic,
        notify_student_topic,
        key_provider_url,
        key_pair: key_pair_json,
        access_key_id,
        secret_access_key,
    };

    // Upsert: concurrent onboarding of the same student is last-writer-wins.
    orchestrator.registry.put(&record).await?;
    tracing::info!(classroom = %record.classroom_id, student = %record.email, "student account onboarded");
    Ok(record)
}

/// Deterministic keypair name for the (classroom, operator account, student)
/// triple.
pub fn key_pair_name(classroom_id: &str, operator_account_id: &str, email: &str) -> String {
    format!("{classroom_id}-{operator_account_id}-{email}")
}

/// Stack names only allow alphanumerics and hyphens; everything else in the
/// scope triple collapses to a hyphen.
pub fn sandbox_stack_name(
    prefix: &str,
    operator_account_id: &str,
    classroom_id: &str,
    email: &str,
) -> String {
    format!("{prefix}-{operator_account_id}-{classroom_id}-{email}")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

fn required_output(
    outputs: &HashMap<String, String>,
    key: &str,
) -> Result<String, OrchestratorError> {
    outputs.get(key).cloned().ok_or_else(|| {
        OrchestratorError::Provisioning(format!("sandbox stack exports no {key} output"))
    })
}

async fn rotate_key_pair(
    orchestrator: &Orchestrator,
    credentials: &SessionCredentials,
    classroom_id: &str,
    operator_account_id: &str,
    email: &str,
) -> Result<KeyPairMaterial, OrchestratorError> {
    let name = key_pair_name(classroom_id, operator_account_id, email);

    // Delete-then-create is not transactional; a crash in between leaves
    // the student without a pair until onboarding is retried.
    if let Err(e) = orchestrator.key_pairs.delete_key_pair(credentials, &name).await {
        // Expected on first onboarding: there is no previous pair to delete.
        tracing::warn!(key_pair = %name, error = %e, "previous keypair not deleted");
    }

    orchestrator.key_pairs.create_key_pair(credentials, &name).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;

    const BLOB: &str = "aws_access_key_id=AKIAEXAMPLE\n\
                        aws_secret_access_key=wJalrXUtnFEMIK7MDENG\n\
                        aws_session_token=FwoGZXIvYXdzEBYaDHJK\n";

    fn onboard_command() -> OnboardCommand {
        OnboardCommand {
            classroom_id: "algo101".to_string(),
            email: "a@x.com".to_string(),
            material: CredentialMaterial::RawBlob(BLOB.to_string()),
        }
    }

    fn seed_sandbox_assets(harness: &Harness) {
        harness.store.put(
            "lab-assets",
            "InitStudentAccount.yaml",
            "Resources: {}".to_string(),
        );
        harness.engine.seed_default_outputs();
    }

    #[tokio::test]
    async fn onboarding_writes_a_complete_record() {
        let harness = Harness::new();
        seed_sandbox_assets(&harness);

        let record = onboard_student(&harness.orchestrator, &onboard_command())
            .await
            .expect("onboarding should succeed");

        assert_eq!(record.classroom_id, "algo101");
        assert_eq!(record.email, "a@x.com");
        assert_eq!(record.aws_account_id, harness.broker.student_account);
        assert_eq!(record.student_account_arn, harness.broker.student_arn);
        assert!(!record.lab_stack_creation_complete_topic.is_empty());
        assert!(!record.notify_student_topic.is_empty());
        assert!(!record.key_provider_url.is_empty());
        assert!(record.access_key_id.is_none());
        assert!(record.secret_access_key.is_none());

        let key_pair: KeyPairMaterial =
            serde_json::from_str(&record.key_pair).expect("stored keypair should parse");
        assert_eq!(key_pair.key_name, "algo101-111122223333-a@x.com");
        assert!(!key_pair.key_material.is_empty());

        assert_eq!(harness.registry.puts.lock().unwrap().len(), 1);

        let created = harness.engine.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        let (credentials, request) = &created[0];
        assert_eq!(credentials.access_key_id, "AKIAEXAMPLE");
        assert_eq!(request.stack_name, "ManagedLearnerLab-111122223333-algo101-a-x-com");
        assert_eq!(request.template_body, "Resources: {}");
        let keys: Vec<&str> = request.parameters.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["TeacherAccountId", "StudentEmail"]);
        assert_eq!(request.parameters[0].value, "111122223333");
        assert_eq!(request.parameters[1].value, "a@x.com");

        assert_eq!(
            harness.engine.waited.lock().unwrap().as_slice(),
            &["ManagedLearnerLab-111122223333-algo101-a-x-com".to_string()]
        );
    }

    #[tokio::test]
    async fn missing_stack_output_fails_onboarding() {
        let harness = Harness::new();
        harness.store.put(
            "lab-assets",
            "InitStudentAccount.yaml",
            "Resources: {}".to_string(),
        );
        harness.engine.seed_default_outputs();
        harness
            .engine
            .outputs
            .lock()
            .unwrap()
            .remove(KEY_PROVIDER_URL_OUTPUT);

        let error = onboard_student(&harness.orchestrator, &onboard_command())
            .await
            .expect_err("onboarding should fail");

        assert!(matches!(error, OrchestratorError::Provisioning(_)));
        assert!(error.to_string().contains(KEY_PROVIDER_URL_OUTPUT));
        assert!(harness.registry.puts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn explicit_keys_are_persisted_on_the_record() {
        let harness = Harness::new();
        seed_sandbox_assets(&harness);

        let command = OnboardCommand {
            classroom_id: "algo101".to_string(),
            email: "a@x.com".to_string(),
            material: CredentialMaterial::AccessKeyPair {
                access_key_id: "AKIALONGLIVED".to_string(),
                secret_access_key: "longlivedsecret".to_string(),
            },
        };

        let record = onboard_student(&harness.orchestrator, &command)
            .await
            .expect("onboarding should succeed");

        assert_eq!(record.access_key_id.as_deref(), Some("AKIALONGLIVED"));
        assert_eq!(record.secret_access_key.as_deref(), Some("longlivedsecret"));
    }

    #[tokio::test]
    async fn rotation_survives_a_missing_previous_pair() {
        let harness = Harness::new();
        seed_sandbox_assets(&harness);

        // No pair exists yet, so the delete fails and is swallowed.
        onboard_student(&harness.orchestrator, &onboard_command())
            .await
            .expect("onboarding should succeed");

        assert_eq!(harness.key_pairs.deletes.lock().unwrap().len(), 1);
        assert_eq!(harness.key_pairs.creates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rotating_twice_leaves_a_single_active_pair() {
        let harness = Harness::new();
        seed_sandbox_assets(&harness);

        onboard_student(&harness.orchestrator, &onboard_command())
            .await
            .expect("first onboarding should succeed");
        onboard_student(&harness.orchestrator, &onboard_command())
            .await
            .expect("second onboarding should succeed");

        assert_eq!(harness.key_pairs.creates.lock().unwrap().len(), 2);
        let active = harness.key_pairs.active.lock().unwrap();
        assert_eq!(active.len(), 1);
        assert!(active.contains("algo101-111122223333-a@x.com"));
    }

    #[tokio::test]
    async fn existing_sandbox_stack_is_awaited_not_failed() {
        let harness = Harness::new();
        seed_sandbox_assets(&harness);
        harness
            .engine
            .conflict_on_create
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let record = onboard_student(&harness.orchestrator, &onboard_command())
            .await
            .expect("re-onboarding should succeed");

        assert_eq!(harness.engine.waited.lock().unwrap().len(), 1);
        assert_eq!(harness.registry.puts.lock().unwrap().len(), 1);
        assert!(!record.key_pair.is_empty());
    }

    #[tokio::test]
    async fn malformed_blob_fails_before_any_stack_work() {
        let harness = Harness::new();
        seed_sandbox_assets(&harness);

        let command = OnboardCommand {
            classroom_id: "algo101".to_string(),
            email: "a@x.com".to_string(),
            material: CredentialMaterial::RawBlob("not a credential file".to_string()),
        };

        let error = onboard_student(&harness.orchestrator, &command)
            .await
            .expect_err("onboarding should fail");

        assert!(matches!(error, OrchestratorError::MalformedCredentials(_)));
        assert!(harness.engine.created.lock().unwrap().is_empty());
    }

    #[test]
    fn sandbox_stack_names_are_sanitized_and_deterministic() {
        let first = sandbox_stack_name("ManagedLearnerLab", "111122223333", "algo101", "a@x.com");
        let second = sandbox_stack_name("ManagedLearnerLab", "111122223333", "algo101", "a@x.com");
        assert_eq!(first, second);
        assert_eq!(first, "ManagedLearnerLab-111122223333-algo101-a-x-com");
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }
}

use std::sync::Arc;

use serde_json::json;
use tokio::task::JoinSet;

use crate::credentials::IdentityBroker;
use crate::error::OrchestratorError;
use crate::invoke::FunctionInvoker;
use crate::notify::Notifier;
use crate::stacks::cross_account_role_arn;
use crate::types::{StudentAccountRecord, StudentGradeOutcome};
use crate::Orchestrator;

/// Report field the grading functions return.
const TEST_RESULT_FIELD: &str = "testResult";

/// Grade every student in a classroom concurrently.
///
/// Each student's pipeline (delegate, invoke, parse, publish) is isolated:
/// one failure becomes that student's outcome and never cancels or delays
/// siblings. The call returns only after every pipeline has settled;
/// outcomes arrive in completion order.
pub async fn grade_classroom(
    orchestrator: &Orchestrator,
    classroom_id: &str,
    function_name: &str,
    operator_account_id: &str,
) -> Result<Vec<StudentGradeOutcome>, OrchestratorError> {
    let students = orchestrator.registry.query_classroom(classroom_id).await?;
    tracing::info!(
        classroom = %classroom_id,
        students = students.len(),
        function = %function_name,
        "grading classroom"
    );

    let mut pipelines = JoinSet::new();
    for student in students {
        let broker = Arc::clone(&orchestrator.broker);
        let invoker = Arc::clone(&orchestrator.invoker);
        let notifier = Arc::clone(&orchestrator.notifier);
        let role_arn = cross_account_role_arn(
            &orchestrator.config,
            &student.aws_account_id,
            operator_account_id,
        );
        let function_name = function_name.to_string();

        pipelines.spawn(async move {
            let email = student.email.clone();
            match grade_student(
                broker.as_ref(),
                invoker.as_ref(),
                notifier.as_ref(),
                &student,
                &role_arn,
                &function_name,
            )
            .await
            {
                Ok(report) => StudentGradeOutcome::succeeded(email, report),
                Err(e) => {
                    tracing::error!(student = %student.email, error = %e, "grading pipeline failed");
                    StudentGradeOutcome::failed(email, e.to_string())
                }
            }
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = pipelines.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => tracing::error!(error = %e, "grading pipeline task died"),
        }
    }
    Ok(outcomes)
}

/// One student's pipeline. The grading invocation and the result publish
/// each run under their own delegation, bounding blast radius per call.
async fn grade_student(
    broker: &dyn IdentityBroker,
    invoker: &dyn FunctionInvoker,
    notifier: &dyn Notifier,
    student: &StudentAccountRecord,
    role_arn: &str,
    function_name: &str,
) -> Result<String, OrchestratorError> {
    let invoke_session = broker.delegate(role_arn).await?;
    let payload = json!({
        "aws_access_key": invoke_session.access_key_id,
        "aws_secret_access_key": invoke_session.secret_access_key,
        "aws_session_token": invoke_session.session_token,
    });

    let response = invoker.invoke(function_name, payload).await?;
    let report = response
        .get(TEST_RESULT_FIELD)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| {
            OrchestratorError::Invocation(format!(
                "{function_name} response has no {TEST_RESULT_FIELD}"
            ))
        })?
        .to_string();

    let publish_session = broker.delegate(role_arn).await?;
    notifier
        .publish(
            &publish_session.credentials(),
            &student.notify_student_topic,
            &report,
        )
        .await?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;

    const OPERATOR_ACCOUNT: &str = "111122223333";

    #[tokio::test]
    async fn grades_every_student_and_publishes_reports() {
        let harness = Harness::new();
        harness.seed_student("algo101", "a@x.com", "222200000001");
        harness.seed_student("algo101", "b@x.com", "222200000002");
        harness.seed_student("algo101", "c@x.com", "222200000003");

        let outcomes = grade_classroom(&harness.orchestrator, "algo101", "gradeLab3", OPERATOR_ACCOUNT)
            .await
            .expect("grading should succeed");

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.report.is_some() && o.error.is_none()));

        let published = harness.notifier.published.lock().unwrap();
        assert_eq!(published.len(), 3);

        // Two independent delegations per pipeline: invoke and publish.
        assert_eq!(harness.broker.delegations.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn one_failing_pipeline_does_not_block_siblings() {
        let harness = Harness::new();
        harness.seed_student("algo101", "a@x.com", "222200000001");
        harness.seed_student("algo101", "bad@x.com", "999900001111");
        harness.seed_student("algo101", "c@x.com", "222200000003");
        // The bad student's grading function returns a malformed response.
        *harness.invoker.malformed_marker.lock().unwrap() = Some("999900001111".to_string());

        let outcomes = grade_classroom(&harness.orchestrator, "algo101", "gradeLab3", OPERATOR_ACCOUNT)
            .await
            .expect("grading should settle every pipeline");

        assert_eq!(outcomes.len(), 3);
        let failed: Vec<&StudentGradeOutcome> =
            outcomes.iter().filter(|o| o.error.is_some()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].email, "bad@x.com");

        // The two healthy publishes still happened.
        let published = harness.notifier.published.lock().unwrap();
        assert_eq!(published.len(), 2);
    }

    #[tokio::test]
    async fn publish_never_reuses_the_invoke_session() {
        let harness = Harness::new();
        harness.seed_student("algo101", "a@x.com", "222200000001");

        grade_classroom(&harness.orchestrator, "algo101", "gradeLab3", OPERATOR_ACCOUNT)
            .await
            .expect("grading should succeed");

        let invocations = harness.invoker.invocations.lock().unwrap();
        let invoke_token = invocations[0]
            .1
            .get("aws_session_token")
            .and_then(serde_json::Value::as_str)
            .expect("payload should carry the invoke session token")
            .to_string();

        let published = harness.notifier.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        let publish_token = published[0]
            .session_token
            .clone()
            .expect("publish should be session-scoped");

        assert_ne!(invoke_token, publish_token);
        assert_eq!(harness.broker.delegations.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delegation_failure_is_that_students_outcome() {
        let harness = Harness::new();
        harness.seed_student("algo101", "a@x.com", "222200000001");
        harness.seed_student("algo101", "denied@x.com", "999900001111");
        *harness.broker.fail_delegate_for.lock().unwrap() = Some("999900001111".to_string());

        let outcomes = grade_classroom(&harness.orchestrator, "algo101", "gradeLab3", OPERATOR_ACCOUNT)
            .await
            .expect("grading should settle every pipeline");

        assert_eq!(outcomes.len(), 2);
        let failed: Vec<&StudentGradeOutcome> =
            outcomes.iter().filter(|o| o.error.is_some()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].email, "denied@x.com");

        assert_eq!(harness.notifier.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_classroom_grades_nothing() {
        let harness = Harness::new();

        let outcomes = grade_classroom(&harness.orchestrator, "empty", "gradeLab3", OPERATOR_ACCOUNT)
            .await
            .expect("grading should succeed");

        assert!(outcomes.is_empty());
        assert!(harness.broker.delegations.lock().unwrap().is_empty());
        assert!(harness.invoker.invocations.lock().unwrap().is_empty());
    }
}

use aws_lambda_events::event::sqs::SqsEvent;
use serde::Deserialize;
use serde_json::Value;

use crate::error::OrchestratorError;
use crate::storage::ObjectStore;

/// Source tag stamped on scheduled-trigger messages.
const CALENDAR_SOURCE: &str = "Calendar-Trigger";

/// Canonical command every entry point consumes, whatever the inbound shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub classroom_id: String,
    pub email: Option<String>,
    pub function_name: Option<String>,
    /// Full inbound-message body. Onboarding reads it as credential
    /// material; grading only uses its first line (`function_name`).
    pub credential_blob: Option<String>,
}

/// The three recognized inbound shapes, resolved exactly once.
#[derive(Debug)]
enum InboundTrigger {
    Direct(Value),
    Scheduled { description: String },
    InboundMessage { message: Value },
}

fn classify(event: &Value) -> Result<InboundTrigger, OrchestratorError> {
    if event.get("Records").is_none() {
        return Ok(InboundTrigger::Direct(event.clone()));
    }

    let sqs: SqsEvent = serde_json::from_value(event.clone())
        .map_err(|e| OrchestratorError::UnrecognizedTrigger(format!("queue envelope: {e}")))?;
    let body = sqs
        .records
        .first()
        .and_then(|r| r.body.as_deref())
        .ok_or_else(|| {
            OrchestratorError::UnrecognizedTrigger("queue record has no body".to_string())
        })?;

    let envelope: Value = serde_json::from_str(body)
        .map_err(|e| OrchestratorError::UnrecognizedTrigger(format!("record body: {e}")))?;
    let message: Value = envelope
        .get("Message")
        .and_then(Value::as_str)
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| OrchestratorError::UnrecognizedTrigger(format!("inner message: {e}")))?
        .ok_or_else(|| {
            OrchestratorError::UnrecognizedTrigger("envelope has no Message".to_string())
        })?;

    if message.get("Source").and_then(Value::as_str) == Some(CALENDAR_SOURCE) {
        let description = message
            .get("desc")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                OrchestratorError::UnrecognizedTrigger(
                    "scheduled trigger has no desc".to_string(),
                )
            })?
            .to_string();
        Ok(InboundTrigger::Scheduled { description })
    } else if message.get("inboxBucket").is_some() && message.get("trimedEmailJson").is_some() {
        Ok(InboundTrigger::InboundMessage { message })
    } else {
        Err(OrchestratorError::UnrecognizedTrigger(
            "unknown message shape".to_string(),
        ))
    }
}

/// Normalize any recognized inbound shape into the canonical command.
pub async fn normalize(
    event: &Value,
    store: &dyn ObjectStore,
) -> Result<Command, OrchestratorError> {
    match classify(event)? {
        InboundTrigger::Direct(payload) => {
            let classroom_id = payload
                .get("classroomId")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    OrchestratorError::UnrecognizedTrigger(
                        "direct invocation has no classroomId".to_string(),
                    )
                })?
                .to_string();

            Ok(Command {
                classroom_id,
                email: string_field(&payload, "email"),
                function_name: string_field(&payload, "functionName"),
                credential_blob: string_field(&payload, "rawKey"),
            })
        }
        InboundTrigger::Scheduled { description } => {
            #[derive(Deserialize)]
            #[serde(rename_all = "camelCase")]
            struct ScheduledDescription {
                classroom_id: String,
                function_name: String,
            }

            let desc: ScheduledDescription = serde_json::from_str(&description).map_err(|e| {
                OrchestratorError::UnrecognizedTrigger(format!("scheduled description: {e}"))
            })?;

            Ok(Command {
                classroom_id: desc.classroom_id,
                email: None,
                function_name: Some(desc.function_name),
                credential_blob: None,
            })
        }
        InboundTrigger::InboundMessage { message } => {
            let classroom_id = message
                .pointer("/slots/classroomId")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    OrchestratorError::UnrecognizedTrigger(
                        "inbound message has no classroom slot".to_string(),
                    )
                })?
                .to_string();
            let sender = message
                .get("sender")
                .and_then(Value::as_str)
                .map(str::to_string);

            let bucket = required_str(&message, "inboxBucket")?;
            let key = required_str(&message, "trimedEmailJson")?;
            let email_json = store.get_text(&bucket, &key).await?;
            let body = serde_json::from_str::<Value>(&email_json)
                .ok()
                .and_then(|v| v.get("content").and_then(Value::as_str).map(str::to_string))
                .ok_or_else(|| {
                    OrchestratorError::UnrecognizedTrigger(
                        "trimmed email has no content".to_string(),
                    )
                })?;

            let function_name = body
                .lines()
                .next()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty());

            Ok(Command {
                classroom_id,
                email: sender,
                function_name,
                credential_blob: Some(body),
            })
        }
    }
}

fn string_field(payload: &Value, name: &str) -> Option<String> {
    payload.get(name).and_then(Value::as_str).map(str::to_string)
}

fn required_str(message: &Value, name: &str) -> Result<String, OrchestratorError> {
    message
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            OrchestratorError::UnrecognizedTrigger(format!("inbound message has no {name}"))
        })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_support::FakeStore;

    fn queue_event(message: &Value) -> Value {
        let body = json!({ "Message": message.to_string() }).to_string();
        json!({ "Records": [{ "messageId": "m-1", "body": body }] })
    }

    #[tokio::test]
    async fn direct_invocation_passes_through() {
        let store = FakeStore::default();
        let event = json!({ "classroomId": "algo101", "email": "a@x.com", "functionName": "gradeLab3" });

        let command = normalize(&event, &store).await.expect("direct should normalize");
        assert_eq!(command.classroom_id, "algo101");
        assert_eq!(command.email.as_deref(), Some("a@x.com"));
        assert_eq!(command.function_name.as_deref(), Some("gradeLab3"));
        assert_eq!(command.credential_blob, None);
    }

    #[tokio::test]
    async fn scheduled_envelope_normalizes() {
        let store = FakeStore::default();
        let event = queue_event(&json!({
            "Source": "Calendar-Trigger",
            "desc": "{\"classroomId\":\"c1\",\"functionName\":\"f1\"}",
        }));

        let command = normalize(&event, &store)
            .await
            .expect("scheduled trigger should normalize");
        assert_eq!(command.classroom_id, "c1");
        assert_eq!(command.function_name.as_deref(), Some("f1"));
        assert_eq!(command.email, None);
    }

    #[tokio::test]
    async fn inbound_email_normalizes_first_line_and_keeps_body() {
        let store = FakeStore::default();
        let body = "  gradeAll  \naws_access_key_id=AKIAEXAMPLE\naws_secret_access_key=secret";
        store.put(
            "inbox-bucket",
            "emails/e1.json",
            json!({ "content": body }).to_string(),
        );

        let event = queue_event(&json!({
            "inboxBucket": "inbox-bucket",
            "trimedEmailJson": "emails/e1.json",
            "sender": "a@x.com",
            "slots": { "classroomId": "algo101" },
        }));

        let command = normalize(&event, &store)
            .await
            .expect("email trigger should normalize");
        assert_eq!(command.classroom_id, "algo101");
        assert_eq!(command.email.as_deref(), Some("a@x.com"));
        assert_eq!(command.function_name.as_deref(), Some("gradeAll"));
        assert_eq!(command.credential_blob.as_deref(), Some(body));
    }

    #[tokio::test]
    async fn unknown_message_shape_is_rejected() {
        let store = FakeStore::default();
        let event = queue_event(&json!({ "somethingElse": true }));

        let error = normalize(&event, &store)
            .await
            .expect_err("unknown shape should be rejected");
        assert!(matches!(error, OrchestratorError::UnrecognizedTrigger(_)));
    }

    #[tokio::test]
    async fn direct_invocation_without_classroom_is_rejected() {
        let store = FakeStore::default();
        let event = json!({ "functionName": "gradeLab3" });

        let error = normalize(&event, &store)
            .await
            .expect_err("classroom-less direct call should be rejected");
        assert!(matches!(error, OrchestratorError::UnrecognizedTrigger(_)));
    }
}

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;

use crate::error::OrchestratorError;
use crate::types::StudentAccountRecord;

// Attribute names are camelCase in the table; `classroomId` is the one
// canonical partition-key name across every component.
const CLASSROOM_ID: &str = "classroomId";
const EMAIL: &str = "email";

/// Typed access to the student-account registry.
#[async_trait]
pub trait StudentRegistry: Send + Sync {
    async fn get(
        &self,
        classroom_id: &str,
        email: &str,
    ) -> Result<Option<StudentAccountRecord>, OrchestratorError>;

    /// Upsert; an existing record for the same key is overwritten.
    async fn put(&self, record: &StudentAccountRecord) -> Result<(), OrchestratorError>;

    /// Every record in the classroom partition.
    async fn query_classroom(
        &self,
        classroom_id: &str,
    ) -> Result<Vec<StudentAccountRecord>, OrchestratorError>;
}

pub struct DynamoStudentRegistry {
    client: DynamoClient,
    table_name: String,
}

impl DynamoStudentRegistry {
    pub fn new(config: &aws_config::SdkConfig, table_name: impl Into<String>) -> Self {
        Self {
            client: DynamoClient::new(config),
            table_name: table_name.into(),
        }
    }
}

#[async_trait]
impl StudentRegistry for DynamoStudentRegistry {
    async fn get(
        &self,
        classroom_id: &str,
        email: &str,
    ) -> Result<Option<StudentAccountRecord>, OrchestratorError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(CLASSROOM_ID, AttributeValue::S(classroom_id.to_string()))
            .key(EMAIL, AttributeValue::S(email.to_string()))
            .send()
            .await
            .map_err(|e| OrchestratorError::Registry(e.to_string()))?;

        result.item().map(record_from_item).transpose()
    }

    async fn put(&self, record: &StudentAccountRecord) -> Result<(), OrchestratorError> {
        let mut request = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .item(CLASSROOM_ID, AttributeValue::S(record.classroom_id.clone()))
            .item(EMAIL, AttributeValue::S(record.email.clone()))
            .item(
                "studentAccountArn",
                AttributeValue::S(record.student_account_arn.clone()),
            )
            .item(
                "awsAccountId",
                AttributeValue::S(record.aws_account_id.clone()),
            )
            .item(
                "labStackCreationCompleteTopic",
                AttributeValue::S(record.lab_stack_creation_complete_topic.clone()),
            )
            .item(
                "notifyStudentTopic",
                AttributeValue::S(record.notify_student_topic.clone()),
            )
            .item(
                "keyProviderUrl",
                AttributeValue::S(record.key_provider_url.clone()),
            )
            .item("keyPair", AttributeValue::S(record.key_pair.clone()));

        if let Some(access_key_id) = &record.access_key_id {
            request = request.item("accessKeyId", AttributeValue::S(access_key_id.clone()));
        }
        if let Some(secret_access_key) = &record.secret_access_key {
            request = request.item(
                "secretAccessKey",
                AttributeValue::S(secret_access_key.clone()),
            );
        }

        request
            .send()
            .await
            .map_err(|e| OrchestratorError::Registry(e.to_string()))?;
        Ok(())
    }

    async fn query_classroom(
        &self,
        classroom_id: &str,
    ) -> Result<Vec<StudentAccountRecord>, OrchestratorError> {
        let result = self
            .client
            .query()
            .table_name(&self.table_name)
            .key_condition_expression("classroomId = :hkey")
            .expression_attribute_values(":hkey", AttributeValue::S(classroom_id.to_string()))
            .send()
            .await
            .map_err(|e| OrchestratorError::Registry(e.to_string()))?;

        result.items().iter().map(record_from_item).collect()
    }
}

fn record_from_item(
    item: &HashMap<String, AttributeValue>,
) -> Result<StudentAccountRecord, OrchestratorError> {
    Ok(StudentAccountRecord {
        classroom_id: required(item, CLASSROOM_ID)?,
        email: required(item, EMAIL)?,
        student_account_arn: required(item, "studentAccountArn")?,
        aws_account_id: required(item, "awsAccountId")?,
        lab_stack_creation_complete_topic: required(item, "labStackCreationCompleteTopic")?,
        notify_student_topic: required(item, "notifyStudentTopic")?,
        key_provider_url: required(item, "keyProviderUrl")?,
        key_pair: required(item, "keyPair")?,
        access_key_id: optional(item, "accessKeyId"),
        secret_access_key: optional(item, "secretAccessKey"),
    })
}

fn required(
    item: &HashMap<String, AttributeValue>,
    name: &str,
) -> Result<String, OrchestratorError> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .map(|s| s.to_string())
        .ok_or_else(|| OrchestratorError::Registry(format!("record missing attribute {name}")))
}

fn optional(item: &HashMap<String, AttributeValue>, name: &str) -> Option<String> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .map(|s| s.to_string())
}

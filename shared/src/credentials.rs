use async_trait::async_trait;
use aws_sdk_sts::Client as StsClient;
use chrono::{DateTime, Utc};

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::types::{CallerIdentity, DelegatedSession, SessionCredentials};

/// Obtains short-lived delegated credentials and resolves principal
/// identities.
///
/// Every `delegate` call is a fresh remote delegation: sessions are never
/// cached or reused across operations, so a leaked session bounds the blast
/// radius to the one call it scoped.
#[async_trait]
pub trait IdentityBroker: Send + Sync {
    async fn delegate(&self, role_arn: &str) -> Result<DelegatedSession, OrchestratorError>;

    /// Identity behind the given credentials, or the ambient operator
    /// identity when none are supplied.
    async fn caller_identity(
        &self,
        credentials: Option<&SessionCredentials>,
    ) -> Result<CallerIdentity, OrchestratorError>;
}

pub struct StsIdentityBroker {
    config: aws_config::SdkConfig,
    session_name: String,
}

impl StsIdentityBroker {
    pub fn new(config: &aws_config::SdkConfig, orchestrator: &OrchestratorConfig) -> Self {
        Self {
            config: config.clone(),
            session_name: orchestrator.delegation_session_name.clone(),
        }
    }

    fn client(&self, credentials: Option<&SessionCredentials>) -> StsClient {
        match credentials {
            Some(creds) => {
                let provider = aws_sdk_sts::config::Credentials::new(
                    creds.access_key_id.clone(),
                    creds.secret_access_key.clone(),
                    creds.session_token.clone(),
                    None,
                    "scoped-session",
                );
                let conf = aws_sdk_sts::config::Builder::from(&self.config)
                    .credentials_provider(provider)
                    .build();
                StsClient::from_conf(conf)
            }
            None => StsClient::new(&self.config),
        }
    }
}

#[async_trait]
impl IdentityBroker for StsIdentityBroker {
    async fn delegate(&self, role_arn: &str) -> Result<DelegatedSession, OrchestratorError> {
        let response = self
            .client(None)
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(&self.session_name)
            .send()
            .await
            .map_err(|e| OrchestratorError::Delegation(format!("assume {role_arn}: {e}")))?;

        let credentials = response.credentials().ok_or_else(|| {
            OrchestratorError::Delegation(format!("assume {role_arn}: no credentials returned"))
        })?;

        let expiration = credentials.expiration();
        let expiry = DateTime::<Utc>::from_timestamp(expiration.secs(), expiration.subsec_nanos())
            .ok_or_else(|| {
                OrchestratorError::Delegation(format!("assume {role_arn}: expiry out of range"))
            })?;

        Ok(DelegatedSession {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().to_string(),
            expiry,
        })
    }

    async fn caller_identity(
        &self,
        credentials: Option<&SessionCredentials>,
    ) -> Result<CallerIdentity, OrchestratorError> {
        let response = self
            .client(credentials)
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| OrchestratorError::Delegation(format!("get-caller-identity: {e}")))?;

        Ok(CallerIdentity {
            account_id: response.account().unwrap_or_default().to_string(),
            arn: response.arn().unwrap_or_default().to_string(),
        })
    }
}

const ACCESS_KEY_TOKEN: &str = "aws_access_key_id=";
const SECRET_KEY_TOKEN: &str = "aws_secret_access_key=";
const SESSION_TOKEN_TOKEN: &str = "aws_session_token=";

const CREDENTIAL_TOKENS: [&str; 3] = [ACCESS_KEY_TOKEN, SECRET_KEY_TOKEN, SESSION_TOKEN_TOKEN];

/// Parse the pasted delegated-credential text into a usable triple.
///
/// Fields may appear in any order and values may wrap across line breaks;
/// a value ends at the next known field token or at end of input.
pub fn parse_credential_blob(raw: &str) -> Result<SessionCredentials, OrchestratorError> {
    let access_key_id = extract_field(raw, ACCESS_KEY_TOKEN)
        .ok_or(OrchestratorError::MalformedCredentials("aws_access_key_id"))?;
    let secret_access_key = extract_field(raw, SECRET_KEY_TOKEN).ok_or(
        OrchestratorError::MalformedCredentials("aws_secret_access_key"),
    )?;
    let session_token = extract_field(raw, SESSION_TOKEN_TOKEN)
        .ok_or(OrchestratorError::MalformedCredentials("aws_session_token"))?;

    Ok(SessionCredentials {
        access_key_id,
        secret_access_key,
        session_token: Some(session_token),
    })
}

fn extract_field(raw: &str, token: &str) -> Option<String> {
    let start = raw.find(token)? + token.len();
    let rest = &raw[start..];
    let end = CREDENTIAL_TOKENS
        .iter()
        .filter(|t| **t != token)
        .filter_map(|t| rest.find(t))
        .min()
        .unwrap_or(rest.len());
    let value: String = rest[..end].split_whitespace().collect();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_blob_in_canonical_order() {
        let blob = "aws_access_key_id=AKIAEXAMPLE\r\n\
                    aws_secret_access_key=wJalrXUtnFEMIK7MDENG\r\n\
                    aws_session_token=FwoGZXIvYXdzEBYaDHJK\r\n";

        let credentials = parse_credential_blob(blob).expect("blob should parse");
        assert_eq!(credentials.access_key_id, "AKIAEXAMPLE");
        assert_eq!(credentials.secret_access_key, "wJalrXUtnFEMIK7MDENG");
        assert_eq!(credentials.session_token.as_deref(), Some("FwoGZXIvYXdzEBYaDHJK"));
    }

    #[test]
    fn parses_blob_with_reordered_fields() {
        let blob = "aws_session_token=FwoGZXIvYXdzEBYaDHJK\n\
                    aws_access_key_id=AKIAEXAMPLE\n\
                    aws_secret_access_key=wJalrXUtnFEMIK7MDENG";

        let credentials = parse_credential_blob(blob).expect("blob should parse");
        assert_eq!(credentials.access_key_id, "AKIAEXAMPLE");
        assert_eq!(credentials.secret_access_key, "wJalrXUtnFEMIK7MDENG");
        assert_eq!(credentials.session_token.as_deref(), Some("FwoGZXIvYXdzEBYaDHJK"));
    }

    #[test]
    fn joins_values_wrapped_across_line_breaks() {
        let blob = "aws_access_key_id=AKIAEXAMPLE\n\
                    aws_secret_access_key=wJalrXUtn\r\nFEMIK7MDENG\n\
                    aws_session_token=FwoGZXIvYXdz\nEBYaDHJK\nZZZZ";

        let credentials = parse_credential_blob(blob).expect("blob should parse");
        assert_eq!(credentials.secret_access_key, "wJalrXUtnFEMIK7MDENG");
        assert_eq!(
            credentials.session_token.as_deref(),
            Some("FwoGZXIvYXdzEBYaDHJKZZZZ")
        );
    }

    #[test]
    fn missing_session_token_is_an_error() {
        let blob = "aws_access_key_id=AKIAEXAMPLE\n\
                    aws_secret_access_key=wJalrXUtnFEMIK7MDENG";

        let error = parse_credential_blob(blob).expect_err("blob should be rejected");
        assert!(matches!(
            error,
            OrchestratorError::MalformedCredentials("aws_session_token")
        ));
    }
}

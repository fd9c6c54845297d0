//! Secret resolution
//!
//! The vector index API key is looked up every time it is needed. Nothing
//! here caches a resolved value.

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_secretsmanager::error::DisplayErrorContext;
use aws_sdk_secretsmanager::Client as SecretsClient;
use serde_json::Value;
use tracing::debug;

/// Resolves a credential by identifier at call time
#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn resolve(&self) -> Result<String>;
}

/// Secrets Manager backed provider.
///
/// A secret stored as a JSON object yields the configured field; any other
/// secret string is returned as-is.
pub struct AwsSecretProvider {
    client: SecretsClient,
    secret_id: String,
    field: String,
}

impl AwsSecretProvider {
    pub fn new(client: SecretsClient, secret_id: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            client,
            secret_id: secret_id.into(),
            field: field.into(),
        }
    }
}

#[async_trait]
impl SecretProvider for AwsSecretProvider {
    async fn resolve(&self) -> Result<String> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(&self.secret_id)
            .send()
            .await
            .map_err(|e| AppError::SecretUnavailable {
                message: format!(
                    "Failed to read secret {}: {}",
                    self.secret_id,
                    DisplayErrorContext(&e)
                ),
            })?;

        let raw = output.secret_string.ok_or_else(|| AppError::SecretUnavailable {
            message: format!("Secret {} has no string value", self.secret_id),
        })?;

        debug!(secret_id = %self.secret_id, "Secret resolved");
        extract_field(&raw, &self.field).ok_or_else(|| AppError::SecretUnavailable {
            message: format!("Secret {} has no usable {} field", self.secret_id, self.field),
        })
    }
}

/// A fixed value, for local runs and tests
pub struct StaticSecretProvider {
    value: String,
}

impl StaticSecretProvider {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[async_trait]
impl SecretProvider for StaticSecretProvider {
    async fn resolve(&self) -> Result<String> {
        Ok(self.value.clone())
    }
}

fn extract_field(raw: &str, field: &str) -> Option<String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map
            .get(field)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(str::to_string),
        _ => Some(raw.trim().to_string()).filter(|v| !v.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_secret_field() {
        let raw = r#"{"pineconeApiKey": "pk-123", "other": "x"}"#;
        assert_eq!(extract_field(raw, "pineconeApiKey").as_deref(), Some("pk-123"));
        assert_eq!(extract_field(raw, "missing"), None);
    }

    #[test]
    fn test_plain_secret_string() {
        assert_eq!(extract_field("  pk-raw \n", "pineconeApiKey").as_deref(), Some("pk-raw"));
        assert_eq!(extract_field("", "pineconeApiKey"), None);
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticSecretProvider::new("local-key");
        assert_eq!(provider.resolve().await.unwrap(), "local-key");
    }
}

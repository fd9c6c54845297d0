//! SQS queue integration for asynchronous ingestion
//!
//! Provides:
//! - SQS client wrapper with retry on send
//! - Typed message (de)serialization
//! - The `IngestJob` message carried between the upload path and the worker

use crate::config::QueueConfig;
use crate::db::models::{NewDocument, DOC_ID_PREFIX};
use crate::errors::{AppError, Result};
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::Client as SqsClient;
use backoff::{future::retry, ExponentialBackoff};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_MAX_MESSAGES: i32 = 10;
const DEFAULT_WAIT_TIME_SECS: i32 = 20;
const DEFAULT_VISIBILITY_TIMEOUT_SECS: i32 = 60;

fn queue_error(message: impl Into<String>) -> AppError {
    AppError::Queue {
        message: message.into(),
    }
}

/// SQS Queue client wrapper
pub struct Queue {
    client: SqsClient,
    url: String,
    max_messages: i32,
    visibility_timeout: i32,
    wait_time_seconds: i32,
}

impl Queue {
    /// Connect to the ingest queue named in configuration
    pub async fn from_config(config: &QueueConfig) -> Result<Self> {
        let url = config
            .ingest_queue_url
            .clone()
            .ok_or_else(|| AppError::Configuration {
                message: "queue.ingest_queue_url is not set".to_string(),
            })?;
        let aws_config = crate::load_aws_config(None).await;
        Ok(Self::with_client(SqsClient::new(&aws_config), url, config))
    }

    /// Create with an existing SQS client
    pub fn with_client(client: SqsClient, url: String, config: &QueueConfig) -> Self {
        Self {
            client,
            url,
            // SQS accepts 1..=10 messages per receive
            max_messages: config.batch_size.unwrap_or(DEFAULT_MAX_MESSAGES).clamp(1, 10),
            visibility_timeout: config
                .visibility_timeout_secs
                .unwrap_or(DEFAULT_VISIBILITY_TIMEOUT_SECS),
            wait_time_seconds: config
                .poll_timeout_secs
                .unwrap_or(DEFAULT_WAIT_TIME_SECS)
                .clamp(0, 20),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send a message, retrying transient failures
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<String> {
        let body = serde_json::to_string(message)
            .map_err(|e| queue_error(format!("Failed to serialize message: {}", e)))?;

        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_elapsed_time: Some(Duration::from_secs(15)),
            ..Default::default()
        };

        let (client, url, body) = (&self.client, self.url.as_str(), body.as_str());
        let result = retry(policy, || async move {
            client
                .send_message()
                .queue_url(url)
                .message_body(body)
                .send()
                .await
                .map_err(|e| {
                    warn!(error = %DisplayErrorContext(&e), "Send to queue failed, retrying");
                    backoff::Error::transient(e)
                })
        })
        .await
        .map_err(|e| queue_error(format!("Failed to send message: {}", DisplayErrorContext(&e))))?;

        let message_id = result.message_id.unwrap_or_default();
        debug!(message_id = %message_id, "Message sent to queue");

        Ok(message_id)
    }

    /// Long-poll for messages, returning each parsed body with its receipt
    /// handle. Bodies that do not parse are logged and left for the DLQ.
    pub async fn receive<T: DeserializeOwned>(&self) -> Result<Vec<(T, String)>> {
        let result = self
            .client
            .receive_message()
            .queue_url(&self.url)
            .max_number_of_messages(self.max_messages)
            .visibility_timeout(self.visibility_timeout)
            .wait_time_seconds(self.wait_time_seconds)
            .send()
            .await
            .map_err(|e| {
                queue_error(format!("Failed to receive messages: {}", DisplayErrorContext(&e)))
            })?;

        let messages = result.messages.unwrap_or_default();
        debug!(count = messages.len(), "Received messages from queue");

        let mut parsed = Vec::with_capacity(messages.len());
        for message in messages {
            let Some(receipt) = message.receipt_handle else {
                warn!(message_id = ?message.message_id, "Message without receipt handle");
                continue;
            };
            match parse_body::<T>(message.body.as_deref()) {
                Ok(body) => parsed.push((body, receipt)),
                Err(e) => warn!(
                    message_id = ?message.message_id,
                    error = %e,
                    "Skipping unparseable message"
                ),
            }
        }

        Ok(parsed)
    }

    /// Delete a message after processing
    pub async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| {
                queue_error(format!("Failed to delete message: {}", DisplayErrorContext(&e)))
            })?;

        debug!("Message deleted from queue");
        Ok(())
    }
}

/// Parse a message body as JSON
pub fn parse_body<T: DeserializeOwned>(body: Option<&str>) -> Result<T> {
    let body = body.ok_or_else(|| queue_error("Message has no body"))?;
    serde_json::from_str(body).map_err(|e| queue_error(format!("Failed to parse message: {}", e)))
}

/// Ingest request handed from an upload flow to the indexer worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestJob {
    pub job_id: uuid::Uuid,

    pub documents: Vec<NewDocument>,

    /// Target namespace; the index default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl IngestJob {
    /// Documents without an id get one now, so a redelivered job writes
    /// over its own earlier partial attempt instead of beside it
    pub fn new(documents: Vec<NewDocument>, namespace: Option<String>) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4(),
            documents: documents
                .into_iter()
                .map(|doc| doc.or_generated_id(DOC_ID_PREFIX))
                .collect(),
            namespace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_job_message() {
        let job = IngestJob::new(
            vec![NewDocument::new("ます form").with_language("japanese")],
            None,
        );

        let json = serde_json::to_string(&job).unwrap();
        assert!(!json.contains("namespace"));

        let parsed: IngestJob = parse_body(Some(&json)).unwrap();
        assert_eq!(parsed, job);
    }

    #[test]
    fn test_job_ids_fixed_at_construction() {
        let job = IngestJob::new(
            vec![
                NewDocument::new("Lesson 1"),
                NewDocument::new("Lesson 2").with_id("doc_lesson_2"),
                NewDocument::new("Lesson 3").with_id("  "),
            ],
            None,
        );

        let ids: Vec<&str> = job.documents.iter().filter_map(|d| d.id.as_deref()).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids[0].starts_with("doc_"));
        assert_eq!(ids[1], "doc_lesson_2");
        assert!(ids[2].starts_with("doc_"));
        assert_ne!(ids[0], ids[2]);

        // A redelivered message carries the same ids
        let redelivered: IngestJob = parse_body(Some(&serde_json::to_string(&job).unwrap())).unwrap();
        assert_eq!(redelivered.documents, job.documents);
    }

    #[test]
    fn test_bad_bodies_are_queue_errors() {
        assert!(matches!(
            parse_body::<IngestJob>(None),
            Err(AppError::Queue { .. })
        ));
        assert!(matches!(
            parse_body::<IngestJob>(Some("{not json")),
            Err(AppError::Queue { .. })
        ));
    }
}

//! Language model invocation
//!
//! `ModelInvoker` owns the request/response contract (Anthropic messages
//! format on Bedrock) and the error taxonomy. The `LanguageModel` trait is
//! only the transport: bytes in, bytes out, failures pre-classified.

use super::prompt::Prompt;
use crate::config::ModelSettings;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_bedrockruntime::error::{DisplayErrorContext, SdkError};
use aws_sdk_bedrockruntime::operation::invoke_model::InvokeModelError;
use aws_sdk_bedrockruntime::primitives::Blob;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use validator::Validate;

pub const TIMEOUT_MESSAGE: &str =
    "The language model took too long to respond. Please try a shorter query.";
pub const VALIDATION_MESSAGE: &str =
    "Invalid request to the language model. Please check your query and try again.";
pub const NOT_READY_MESSAGE: &str =
    "The language model is currently not available. Please try again later.";
pub const INVOCATION_MESSAGE: &str =
    "The language model could not produce a response. Please try again later.";

/// Upstream failure, classified by the transport. The payload is detail
/// for logs only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamFailure {
    Timeout(String),
    Validation(String),
    NotReady(String),
    Other(String),
}

impl UpstreamFailure {
    fn detail(&self) -> &str {
        match self {
            UpstreamFailure::Timeout(d)
            | UpstreamFailure::Validation(d)
            | UpstreamFailure::NotReady(d)
            | UpstreamFailure::Other(d) => d,
        }
    }

    fn into_error(self) -> AppError {
        match self {
            UpstreamFailure::Timeout(_) => AppError::ModelTimeout {
                message: TIMEOUT_MESSAGE.to_string(),
            },
            UpstreamFailure::Validation(_) => AppError::ModelValidation {
                message: VALIDATION_MESSAGE.to_string(),
            },
            UpstreamFailure::NotReady(_) => AppError::ModelNotReady {
                message: NOT_READY_MESSAGE.to_string(),
            },
            UpstreamFailure::Other(_) => AppError::ModelInvocation {
                message: INVOCATION_MESSAGE.to_string(),
            },
        }
    }
}

/// Transport to a model endpoint
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Send a JSON request body, return the raw response body
    async fn invoke(&self, model_id: &str, body: Vec<u8>) -> std::result::Result<Vec<u8>, UpstreamFailure>;
}

/// Per-call overrides; anything left `None` takes the configured default
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct ModelParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1))]
    pub model_id: Option<String>,
}

/// Parameters after defaults are applied
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedParams {
    pub model_id: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl ModelParams {
    pub fn resolve(&self, defaults: &ModelSettings) -> ResolvedParams {
        ResolvedParams {
            model_id: self
                .model_id
                .clone()
                .unwrap_or_else(|| defaults.model_id.clone()),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
        }
    }
}

pub struct ModelInvoker {
    model: Arc<dyn LanguageModel>,
    defaults: ModelSettings,
    session_persona: String,
}

impl ModelInvoker {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        defaults: ModelSettings,
        session_persona: impl Into<String>,
    ) -> Self {
        Self {
            model,
            defaults,
            session_persona: session_persona.into(),
        }
    }

    pub fn defaults(&self) -> &ModelSettings {
        &self.defaults
    }

    fn request_body(&self, prompt: &Prompt, params: &ResolvedParams, session_present: bool) -> Value {
        let mut body = json!({
            "anthropic_version": self.defaults.anthropic_version,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "top_p": params.top_p,
            "messages": [
                { "role": "user", "content": prompt.as_str() }
            ]
        });
        if session_present {
            body["system"] = Value::String(self.session_persona.clone());
        }
        body
    }

    /// Send the prompt as the single user turn and return the answer text.
    /// No retries here.
    pub async fn invoke(
        &self,
        prompt: &Prompt,
        params: &ModelParams,
        session_present: bool,
    ) -> Result<String> {
        let resolved = params.resolve(&self.defaults);
        let body = serde_json::to_vec(&self.request_body(prompt, &resolved, session_present))?;

        debug!(
            model_id = %resolved.model_id,
            prompt_chars = prompt.as_str().chars().count(),
            session_present,
            "Invoking language model"
        );

        let start = Instant::now();
        let result = match self.model.invoke(&resolved.model_id, body).await {
            Ok(raw) => extract_text(&raw),
            Err(failure) => {
                error!(
                    model_id = %resolved.model_id,
                    detail = failure.detail(),
                    "Language model call failed"
                );
                Err(failure.into_error())
            }
        };

        let outcome = match &result {
            Ok(_) => "success".to_string(),
            Err(e) => e.code().as_code().to_string(),
        };
        crate::metrics::record_model_invocation(start.elapsed().as_secs_f64(), &resolved.model_id, &outcome);

        if let Ok(text) = &result {
            info!(
                model_id = %resolved.model_id,
                response_chars = text.chars().count(),
                "Language model answered"
            );
        }
        result
    }
}

/// First content segment's text, or `ResponseParse`
fn extract_text(raw: &[u8]) -> Result<String> {
    let parse_error = |message: &str| AppError::ResponseParse {
        message: message.to_string(),
    };

    let body: Value =
        serde_json::from_slice(raw).map_err(|_| parse_error("response body is not JSON"))?;

    body.get("content")
        .and_then(Value::as_array)
        .and_then(|segments| segments.first())
        .and_then(|segment| segment.get("text"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| parse_error("response has no content[0].text"))
}

/// Amazon Bedrock runtime transport
pub struct BedrockModel {
    client: aws_sdk_bedrockruntime::Client,
}

impl BedrockModel {
    pub fn new(client: aws_sdk_bedrockruntime::Client) -> Self {
        Self { client }
    }
}

fn classify(err: SdkError<InvokeModelError>) -> UpstreamFailure {
    let detail = DisplayErrorContext(&err).to_string();
    if matches!(err, SdkError::TimeoutError(_)) {
        return UpstreamFailure::Timeout(detail);
    }
    match err.as_service_error() {
        Some(InvokeModelError::ModelTimeoutException(_)) => UpstreamFailure::Timeout(detail),
        Some(InvokeModelError::ValidationException(_)) => UpstreamFailure::Validation(detail),
        Some(InvokeModelError::ModelNotReadyException(_)) => UpstreamFailure::NotReady(detail),
        _ => UpstreamFailure::Other(detail),
    }
}

#[async_trait]
impl LanguageModel for BedrockModel {
    async fn invoke(&self, model_id: &str, body: Vec<u8>) -> std::result::Result<Vec<u8>, UpstreamFailure> {
        let output = self
            .client
            .invoke_model()
            .model_id(model_id)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(body))
            .send()
            .await
            .map_err(classify)?;

        Ok(output.body.into_inner())
    }
}

/// Offline transport that answers every prompt with a fixed-shape reply.
/// Keeps the last request body so callers can inspect what was sent.
#[derive(Default)]
pub struct MockModel {
    last_request: Mutex<Option<Value>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn last_request(&self) -> Option<Value> {
        self.last_request.lock().await.clone()
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    async fn invoke(&self, model_id: &str, body: Vec<u8>) -> std::result::Result<Vec<u8>, UpstreamFailure> {
        let request: Value = serde_json::from_slice(&body)
            .map_err(|e| UpstreamFailure::Validation(format!("malformed request: {}", e)))?;

        let prompt_chars = request["messages"][0]["content"]
            .as_str()
            .map(|p| p.chars().count())
            .unwrap_or(0);
        *self.last_request.lock().await = Some(request);

        let reply = json!({
            "id": "msg_mock",
            "type": "message",
            "role": "assistant",
            "model": model_id,
            "content": [{
                "type": "text",
                "text": format!("## Answer\n\n(mock tutor reply to a {prompt_chars}-character prompt)\n\n## Practice\n\n1. Try it in a sentence of your own.")
            }],
            "stop_reason": "end_turn"
        });
        serde_json::to_vec(&reply).map_err(|e| UpstreamFailure::Other(e.to_string()))
    }
}

/// Create a model transport based on configuration
pub async fn create_language_model(settings: &ModelSettings) -> Result<Arc<dyn LanguageModel>> {
    match settings.provider.as_str() {
        "bedrock" => {
            let aws_config = crate::load_aws_config(settings.region.as_deref()).await;
            Ok(Arc::new(BedrockModel::new(aws_sdk_bedrockruntime::Client::new(
                &aws_config,
            ))))
        }
        "mock" => Ok(Arc::new(MockModel::new())),
        other => Err(AppError::Configuration {
            message: format!("Unknown model provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tutor::prompt::PromptAssembler;

    /// Returns one canned outcome for every call
    struct Scripted(std::result::Result<Vec<u8>, UpstreamFailure>);

    #[async_trait]
    impl LanguageModel for Scripted {
        async fn invoke(&self, _: &str, _: Vec<u8>) -> std::result::Result<Vec<u8>, UpstreamFailure> {
            self.0.clone()
        }
    }

    fn prompt() -> Prompt {
        PromptAssembler::default().assemble("How do I use 'the'?", Some("english"), None, None, &[])
    }

    fn invoker(model: Arc<dyn LanguageModel>) -> ModelInvoker {
        ModelInvoker::new(model, ModelSettings::default(), "persona")
    }

    #[tokio::test]
    async fn test_missing_content_is_parse_error() {
        for body in [
            r#"{"content": []}"#,
            r#"{"content": [{"type": "image"}]}"#,
            r#"{"completion": "old format"}"#,
            "not json",
        ] {
            let invoker = invoker(Arc::new(Scripted(Ok(body.as_bytes().to_vec()))));
            let err = invoker.invoke(&prompt(), &ModelParams::default(), false).await.unwrap_err();
            assert!(matches!(err, AppError::ResponseParse { .. }), "body {body:?} gave {err:?}");
        }
    }

    #[tokio::test]
    async fn test_first_segment_text_is_returned() {
        let body = r#"{"content": [{"type": "text", "text": "first"}, {"type": "text", "text": "second"}]}"#;
        let invoker = invoker(Arc::new(Scripted(Ok(body.as_bytes().to_vec()))));
        let text = invoker.invoke(&prompt(), &ModelParams::default(), false).await.unwrap();
        assert_eq!(text, "first");
    }

    #[tokio::test]
    async fn test_failure_taxonomy() {
        let cases = [
            (UpstreamFailure::Timeout("read timeout".into()), TIMEOUT_MESSAGE),
            (UpstreamFailure::Validation("bad max_tokens".into()), VALIDATION_MESSAGE),
            (UpstreamFailure::NotReady("cold".into()), NOT_READY_MESSAGE),
            (UpstreamFailure::Other("500 from upstream".into()), INVOCATION_MESSAGE),
        ];

        for (failure, message) in cases {
            let detail = failure.detail().to_string();
            let invoker = invoker(Arc::new(Scripted(Err(failure))));
            let err = invoker.invoke(&prompt(), &ModelParams::default(), false).await.unwrap_err();
            assert!(err.is_model_failure());
            assert_eq!(err.to_string(), message);
            assert!(!err.to_string().contains(&detail));
        }
    }

    #[tokio::test]
    async fn test_request_body_and_defaults() {
        let model = Arc::new(MockModel::new());
        let invoker = ModelInvoker::new(model.clone(), ModelSettings::default(), "tutor persona");

        invoker.invoke(&prompt(), &ModelParams::default(), false).await.unwrap();
        let sent = model.last_request().await.unwrap();
        assert_eq!(sent["anthropic_version"], "bedrock-2023-05-31");
        assert_eq!(sent["max_tokens"], 2000);
        assert_eq!(sent["messages"][0]["role"], "user");
        assert_eq!(sent["messages"][0]["content"], prompt().as_str());
        assert!(sent.get("system").is_none());

        let overrides = ModelParams {
            max_tokens: Some(300),
            ..Default::default()
        };
        invoker.invoke(&prompt(), &overrides, true).await.unwrap();
        let sent = model.last_request().await.unwrap();
        assert_eq!(sent["max_tokens"], 300);
        assert_eq!(sent["system"], "tutor persona");
    }

    #[test]
    fn test_caller_params_take_precedence() {
        let defaults = ModelSettings::default();
        let resolved = ModelParams {
            temperature: Some(0.1),
            model_id: Some("anthropic.claude-3-haiku-20240307-v1:0".into()),
            ..Default::default()
        }
        .resolve(&defaults);

        assert_eq!(resolved.temperature, 0.1);
        assert_eq!(resolved.top_p, 0.9);
        assert_eq!(resolved.max_tokens, 2000);
        assert_eq!(resolved.model_id, "anthropic.claude-3-haiku-20240307-v1:0");
    }

    #[test]
    fn test_params_validation() {
        let bad = ModelParams {
            temperature: Some(1.5),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(ModelParams::default().validate().is_ok());
    }
}

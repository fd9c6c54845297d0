//! Query pipeline: retrieve, assemble, invoke, log
//!
//! Only a model failure fails `answer`. Retrieval degrades to fewer
//! passages and interaction logging is best-effort.

use super::invoker::{ModelInvoker, ModelParams};
use super::prompt::{resolve_languages, PromptAssembler};
use super::retriever::{ContextPassage, Retriever};
use crate::config::ModelSettings;
use crate::db::models::{generate_id, FeedbackEntry, InteractionLog, MetadataRecord};
use crate::db::{MetadataStore, PageRequest, ScanFilter, ScanPage};
use crate::errors::{AppError, Result};
use crate::index::MetadataFilter;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use validator::Validate;

const INTERACTION_ID_SUFFIX_LEN: usize = 8;
const ANONYMOUS_STUDENT: &str = "anonymous";

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct QueryRequest {
    #[validate(length(min = 1, max = 4000))]
    pub query: String,

    /// Target language; defaults to english
    #[serde(default)]
    pub language: Option<String>,

    /// Defaults to the target language
    #[serde(default, alias = "explanationLanguage")]
    pub explanation_language: Option<String>,

    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,

    /// Enables interaction logging when present
    #[serde(default, alias = "studentId")]
    pub student_id: Option<String>,

    #[serde(default, alias = "modelParams")]
    #[validate(nested)]
    pub model_params: Option<ModelParams>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub response: String,

    pub language: String,

    #[serde(rename = "explanationLanguage")]
    pub explanation_language: String,

    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,

    /// Id of the logged interaction, for attaching feedback
    #[serde(rename = "interactionId", skip_serializing_if = "Option::is_none")]
    pub interaction_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct FeedbackRequest {
    #[validate(length(min = 1, max = 4000))]
    pub feedback: String,

    #[serde(alias = "responseId")]
    #[validate(length(min = 1))]
    pub response_id: String,

    #[serde(default, alias = "studentId")]
    pub student_id: Option<String>,

    #[serde(default)]
    #[validate(range(min = 1, max = 5))]
    pub rating: Option<u8>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn validation_error(e: validator::ValidationErrors) -> AppError {
    AppError::InvalidInput {
        message: e.to_string(),
    }
}

pub struct QueryPipeline {
    retriever: Retriever,
    assembler: PromptAssembler,
    invoker: ModelInvoker,
    store: Arc<dyn MetadataStore>,
    top_k: usize,
}

impl QueryPipeline {
    pub fn new(
        retriever: Retriever,
        assembler: PromptAssembler,
        invoker: ModelInvoker,
        store: Arc<dyn MetadataStore>,
        top_k: usize,
    ) -> Self {
        Self {
            retriever,
            assembler,
            invoker,
            store,
            top_k,
        }
    }

    /// Defaults applied to model calls that do not override them
    pub fn model_settings(&self) -> &ModelSettings {
        self.invoker.defaults()
    }

    /// Answer one student question
    #[instrument(skip(self, request), fields(language = ?request.language, session = ?request.session_id))]
    pub async fn answer(&self, request: QueryRequest) -> Result<QueryResponse> {
        if request.query.trim().is_empty() {
            return Err(AppError::InvalidQuery {
                message: "Query is required".to_string(),
            });
        }
        request.validate().map_err(validation_error)?;

        let start = Instant::now();
        let (language, explanation_language) =
            resolve_languages(request.language.as_deref(), request.explanation_language.as_deref());
        let session_id = present(&request.session_id);

        let passages = self.context(&request.query, &language).await?;

        let prompt = self.assembler.assemble(
            &request.query,
            Some(language.as_str()),
            Some(explanation_language.as_str()),
            session_id,
            &passages,
        );

        let params = request.model_params.clone().unwrap_or_default();
        let response = self.invoker.invoke(&prompt, &params, session_id.is_some()).await?;

        let interaction_id = match present(&request.student_id) {
            Some(student_id) => {
                self.log_interaction(
                    student_id,
                    &request.query,
                    &response,
                    &language,
                    &explanation_language,
                    session_id,
                )
                .await
            }
            None => None,
        };

        info!(
            passages = passages.len(),
            logged = interaction_id.is_some(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Answered query"
        );

        Ok(QueryResponse {
            response,
            language,
            explanation_language,
            session_id: session_id.map(str::to_string),
            interaction_id,
        })
    }

    /// Retrieval that only fails for caller mistakes
    async fn context(&self, query: &str, language: &str) -> Result<Vec<ContextPassage>> {
        match self
            .retriever
            .retrieve(query, language, self.top_k, &MetadataFilter::new())
            .await
        {
            Ok(passages) => Ok(passages),
            Err(e) if e.is_caller_error() => Err(e),
            Err(e) => {
                warn!(error = %e, "Retrieval failed, answering without context");
                Ok(Vec::new())
            }
        }
    }

    async fn log_interaction(
        &self,
        student_id: &str,
        query: &str,
        response: &str,
        language: &str,
        explanation_language: &str,
        session_id: Option<&str>,
    ) -> Option<String> {
        let id = generate_id("interaction", INTERACTION_ID_SUFFIX_LEN);
        let entry = InteractionLog {
            id: id.clone(),
            student_id: student_id.to_string(),
            query: query.to_string(),
            response: response.to_string(),
            language: language.to_string(),
            explanation_language: explanation_language.to_string(),
            session_id: session_id.map(str::to_string).unwrap_or_else(|| id.clone()),
            timestamp: Utc::now(),
        };

        match self.store.put(MetadataRecord::Interaction(entry)).await {
            Ok(()) => Some(id),
            Err(e) => {
                warn!(error = %e, student_id, "Could not log interaction");
                crate::metrics::record_interaction_log_failure("interaction");
                None
            }
        }
    }

    /// Store feedback on an earlier answer. Unlike interaction logging,
    /// a failed write is returned to the caller.
    #[instrument(skip(self, request), fields(response_id = %request.response_id))]
    pub async fn record_feedback(&self, request: FeedbackRequest) -> Result<FeedbackEntry> {
        if request.feedback.trim().is_empty() || request.response_id.trim().is_empty() {
            return Err(AppError::invalid_input("Feedback and response id are required"));
        }
        request.validate().map_err(validation_error)?;

        let response_id = request.response_id.trim();
        let entry = FeedbackEntry {
            id: FeedbackEntry::id_for(response_id),
            feedback: request.feedback.clone(),
            response_id: response_id.to_string(),
            student_id: present(&request.student_id)
                .unwrap_or(ANONYMOUS_STUDENT)
                .to_string(),
            rating: request.rating,
            timestamp: Utc::now(),
        };

        if let Err(e) = self.store.put(MetadataRecord::Feedback(entry.clone())).await {
            crate::metrics::record_interaction_log_failure("feedback");
            return Err(e);
        }
        info!(feedback_id = %entry.id, "Feedback recorded");
        Ok(entry)
    }

    /// One page of stored learning material. Logs and feedback sharing the
    /// table are left out of the page.
    pub async fn list_materials(&self, filter: &ScanFilter, page: &PageRequest) -> Result<ScanPage> {
        let mut result = self.store.scan(filter, page).await?;
        result
            .records
            .retain(|record| matches!(record, MetadataRecord::Document(_)));
        Ok(result)
    }
}

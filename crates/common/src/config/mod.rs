//! Configuration management for LingoForge services
//!
//! `AppConfig::load` layers, lowest precedence first:
//! - Built-in defaults
//! - `config/default`, `config/{APP_ENV}` and `config/local` (any format the
//!   `config` crate reads; every file is optional)
//! - Environment variables prefixed with `APP__`, e.g. `APP__MODEL__TEMPERATURE`
//!
//! `AppConfig::from_file` replaces the three files with one explicit path.
//!
//! The result is an immutable `AppConfig` handed to each component's
//! constructor; nothing below reads the environment on its own.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Language model defaults
    #[serde(default)]
    pub model: ModelSettings,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector index configuration
    #[serde(default)]
    pub vector_index: VectorIndexConfig,

    /// Metadata store configuration
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Retrieval tuning
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Prompt persona settings
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Queue configuration (SQS)
    #[serde(default)]
    pub queue: QueueConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Defaults applied to every model call unless the caller overrides them
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    /// Model provider: bedrock, mock
    pub provider: String,

    /// Model identifier sent to the endpoint
    pub model_id: String,

    pub temperature: f32,

    /// Nucleus sampling
    pub top_p: f32,

    /// Maximum output tokens
    pub max_tokens: u32,

    /// Anthropic messages API version expected by Bedrock
    pub anthropic_version: String,

    /// AWS region override
    pub region: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding provider: reference, openai
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    pub model: String,

    /// Embedding dimension
    pub dimension: usize,

    /// Inputs longer than this (in characters) are rejected
    pub max_input_chars: usize,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum retries
    pub max_retries: u32,

    /// Version tag stored alongside every vector
    pub version: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VectorIndexConfig {
    /// Index provider: pinecone, memory
    pub provider: String,

    /// Index host, e.g. https://my-index-abc123.svc.us-west1-gcp.pinecone.io
    pub host: Option<String>,

    /// Secrets Manager id holding the API key
    pub api_key_secret_id: Option<String>,

    /// Static API key (local development only)
    pub api_key: Option<String>,

    /// Field to read when the secret is a JSON object
    pub api_key_field: String,

    /// Namespace used when a caller does not name one
    pub default_namespace: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Vectors per upsert request
    pub upsert_batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Store provider: dynamodb, memory
    pub provider: String,

    /// DynamoDB table name
    pub table_name: String,

    /// Keys per batch read round trip
    pub batch_get_size: usize,

    /// Items per batch write round trip
    pub batch_write_size: usize,

    /// AWS region override
    pub region: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Passages requested per query
    pub top_k: usize,

    /// Restrict matches to the query's target language
    pub filter_by_language: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Where the students come from, used in the persona line
    pub student_origin: String,

    /// The students' primary language
    pub student_language: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// SQS ingest queue URL
    pub ingest_queue_url: Option<String>,

    /// Dead letter queue URL
    pub dlq_url: Option<String>,

    /// Maximum messages to receive per poll
    pub batch_size: Option<i32>,

    /// Long polling timeout in seconds
    pub poll_timeout_secs: Option<i32>,

    /// Visibility timeout in seconds
    pub visibility_timeout_secs: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    pub log_level: String,

    /// Enable JSON logging
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    pub metrics_port: u16,

    /// Service name for tracing
    pub service_name: String,
}

// Default value functions
fn default_model_provider() -> String { "bedrock".to_string() }
fn default_model_id() -> String { "anthropic.claude-3-sonnet-20240229-v1:0".to_string() }
fn default_temperature() -> f32 { 0.7 }
fn default_top_p() -> f32 { 0.9 }
fn default_max_tokens() -> u32 { 2000 }
fn default_anthropic_version() -> String { "bedrock-2023-05-31".to_string() }
fn default_embedding_provider() -> String { "reference".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_max_input_chars() -> usize { 8192 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_embedding_version() -> String { "reference-v1".to_string() }
fn default_index_provider() -> String { "pinecone".to_string() }
fn default_api_key_field() -> String { "pineconeApiKey".to_string() }
fn default_namespace() -> String { "default".to_string() }
fn default_index_timeout() -> u64 { 10 }
fn default_upsert_batch_size() -> usize { 100 }
fn default_metadata_provider() -> String { "dynamodb".to_string() }
fn default_table_name() -> String { "lingoforge-metadata".to_string() }
fn default_batch_get_size() -> usize { crate::db::BATCH_GET_LIMIT }
fn default_batch_write_size() -> usize { crate::db::BATCH_WRITE_LIMIT }
fn default_top_k() -> usize { 5 }
fn default_student_origin() -> String { "mainland China".to_string() }
fn default_student_language() -> String { "Simple Chinese (简体中文)".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "lingoforge".to_string() }

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            provider: default_model_provider(),
            model_id: default_model_id(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            anthropic_version: default_anthropic_version(),
            region: None,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            max_input_chars: default_max_input_chars(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            version: default_embedding_version(),
        }
    }
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            provider: default_index_provider(),
            host: None,
            api_key_secret_id: None,
            api_key: None,
            api_key_field: default_api_key_field(),
            default_namespace: default_namespace(),
            timeout_secs: default_index_timeout(),
            upsert_batch_size: default_upsert_batch_size(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            provider: default_metadata_provider(),
            table_name: default_table_name(),
            batch_get_size: default_batch_get_size(),
            batch_write_size: default_batch_write_size(),
            region: None,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            filter_by_language: false,
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            student_origin: default_student_origin(),
            student_language: default_student_language(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__MODEL__TEMPERATURE=0.2
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would only fail later, deep inside a request
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding.dimension == 0 {
            return Err(ConfigError::Message("embedding.dimension must be positive".into()));
        }
        if self.embedding.max_input_chars == 0 {
            return Err(ConfigError::Message("embedding.max_input_chars must be positive".into()));
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Message("retrieval.top_k must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.model.top_p) {
            return Err(ConfigError::Message("model.top_p must be within 0.0..=1.0".into()));
        }
        if self.model.max_tokens == 0 {
            return Err(ConfigError::Message("model.max_tokens must be positive".into()));
        }
        if self.metadata.batch_get_size == 0 || self.metadata.batch_write_size == 0 {
            return Err(ConfigError::Message("metadata batch sizes must be positive".into()));
        }
        if self.vector_index.upsert_batch_size == 0 {
            return Err(ConfigError::Message("vector_index.upsert_batch_size must be positive".into()));
        }
        Ok(())
    }

    /// Configuration wired entirely to in-process backends
    pub fn local() -> Self {
        let mut config = AppConfig::default();
        config.model.provider = "mock".to_string();
        config.vector_index.provider = "memory".to_string();
        config.metadata.provider = "memory".to_string();
        config
    }
}

//! Tutoring components: read path, write path and the query pipeline
//!
//! Read path: `Retriever` -> `PromptAssembler` -> `ModelInvoker`, composed by
//! `QueryPipeline`. Write path: `Indexer`, reached synchronously or through
//! an `IngestDispatcher`.

pub mod dispatch;
pub mod indexer;
pub mod invoker;
pub mod pipeline;
pub mod prompt;
pub mod retriever;
mod services;

pub use dispatch::{trigger_ingest, IngestDispatcher, QueueDispatcher, TaskDispatcher};
pub use indexer::{IngestResult, Indexer};
pub use invoker::{BedrockModel, LanguageModel, MockModel, ModelInvoker, ModelParams};
pub use pipeline::{FeedbackRequest, QueryPipeline, QueryRequest, QueryResponse};
pub use prompt::{Prompt, PromptAssembler};
pub use retriever::{ContextPassage, Retriever};
pub use services::TutorServices;

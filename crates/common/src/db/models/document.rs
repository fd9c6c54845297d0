//! Learning material documents

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Target language assumed when none is given
pub const DEFAULT_LANGUAGE: &str = "english";

/// Category assumed when none is given
pub const DEFAULT_KIND: &str = "general";

/// Provenance assumed for directly ingested documents
pub const DEFAULT_SOURCE: &str = "user_uploaded";

/// Provenance reported when neither store knows it
pub const UNKNOWN_SOURCE: &str = "unknown";

/// A document as submitted for ingestion.
///
/// Only `content` is required. A missing `id` is generated by the indexer;
/// the remaining tags fall back to the defaults above.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl NewDocument {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Fill in a generated id unless one is already set. Jobs that may be
    /// delivered more than once get their ids here, before they leave the
    /// caller, so every delivery writes the same ids.
    pub fn or_generated_id(mut self, prefix: &str) -> Self {
        if self.id.as_deref().map_or(true, |id| id.trim().is_empty()) {
            self.id = Some(super::generate_id(prefix, super::DOC_ID_SUFFIX_LEN));
        }
        self
    }
}

/// A stored document. `id` is the join key shared with the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,

    pub content: String,

    pub language: String,

    #[serde(rename = "type")]
    pub kind: String,

    pub source: String,

    /// Set once when the document is written
    pub timestamp: DateTime<Utc>,
}

impl Document {
    /// Resolve a submitted document into its stored form
    pub fn from_new(doc: NewDocument, id: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            content: doc.content,
            language: non_empty_or(doc.language, DEFAULT_LANGUAGE),
            kind: non_empty_or(doc.kind, DEFAULT_KIND),
            source: non_empty_or(doc.source, DEFAULT_SOURCE),
            timestamp,
        }
    }
}

fn non_empty_or(value: Option<String>, fallback: &str) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_tags() {
        let doc = Document::from_new(NewDocument::new("Hello"), "doc_1".into(), Utc::now());
        assert_eq!(doc.language, "english");
        assert_eq!(doc.kind, "general");
        assert_eq!(doc.source, "user_uploaded");
    }

    #[test]
    fn test_type_field_name_on_the_wire() {
        let doc: NewDocument =
            serde_json::from_str(r#"{"content": "は", "language": "japanese", "type": "grammar"}"#)
                .unwrap();
        assert_eq!(doc.kind.as_deref(), Some("grammar"));
        assert!(doc.id.is_none());
    }
}

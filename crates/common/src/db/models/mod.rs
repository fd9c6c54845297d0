//! Metadata store records
//!
//! The metadata table holds three record shapes keyed by `id`: learning
//! material documents, interaction logs and feedback entries.

mod document;
mod interaction;

pub use document::{
    Document, NewDocument, DEFAULT_KIND, DEFAULT_LANGUAGE, DEFAULT_SOURCE, UNKNOWN_SOURCE,
};
pub use interaction::{FeedbackEntry, InteractionLog};

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Prefix and random-suffix length of generated document ids
pub const DOC_ID_PREFIX: &str = "doc";
pub const DOC_ID_SUFFIX_LEN: usize = 13;

/// Any record stored in the metadata table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
pub enum MetadataRecord {
    Document(Document),
    Interaction(InteractionLog),
    Feedback(FeedbackEntry),
}

impl MetadataRecord {
    pub fn id(&self) -> &str {
        match self {
            MetadataRecord::Document(doc) => &doc.id,
            MetadataRecord::Interaction(log) => &log.id,
            MetadataRecord::Feedback(entry) => &entry.id,
        }
    }

    pub fn language(&self) -> Option<&str> {
        match self {
            MetadataRecord::Document(doc) => Some(&doc.language),
            MetadataRecord::Interaction(log) => Some(&log.language),
            MetadataRecord::Feedback(_) => None,
        }
    }

    pub fn kind(&self) -> Option<&str> {
        match self {
            MetadataRecord::Document(doc) => Some(&doc.kind),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            MetadataRecord::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn into_document(self) -> Option<Document> {
        match self {
            MetadataRecord::Document(doc) => Some(doc),
            _ => None,
        }
    }
}

impl From<Document> for MetadataRecord {
    fn from(doc: Document) -> Self {
        MetadataRecord::Document(doc)
    }
}

impl From<InteractionLog> for MetadataRecord {
    fn from(log: InteractionLog) -> Self {
        MetadataRecord::Interaction(log)
    }
}

impl From<FeedbackEntry> for MetadataRecord {
    fn from(entry: FeedbackEntry) -> Self {
        MetadataRecord::Feedback(entry)
    }
}

/// Generate `<prefix>_<unix millis>_<random base36>`
pub fn generate_id(prefix: &str, suffix_len: usize) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..suffix_len)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{}_{}_{}", prefix, Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_id_shape() {
        let id = generate_id("doc", 13);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "doc");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 13);
        assert!(parts[2].bytes().all(|b| ID_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_record_tagging() {
        let doc = Document::from_new(NewDocument::new("text"), "doc_1".into(), Utc::now());
        let record = MetadataRecord::from(doc.clone());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["record_type"], "document");
        assert_eq!(json["type"], "general");

        let back: MetadataRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.into_document(), Some(doc));
    }
}

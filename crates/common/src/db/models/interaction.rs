//! Interaction log entries and feedback
//!
//! Both are write-once records; nothing updates them after the first put.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One answered query, logged when the caller identified themselves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionLog {
    pub id: String,

    pub student_id: String,

    pub query: String,

    pub response: String,

    pub language: String,

    pub explanation_language: String,

    /// Falls back to the interaction id for session-less queries
    pub session_id: String,

    pub timestamp: DateTime<Utc>,
}

/// Student feedback on a previous answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    /// Always `feedback_<response_id>`
    pub id: String,

    pub feedback: String,

    pub response_id: String,

    pub student_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,

    pub timestamp: DateTime<Utc>,
}

impl FeedbackEntry {
    pub fn id_for(response_id: &str) -> String {
        format!("feedback_{}", response_id)
    }
}

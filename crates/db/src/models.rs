//! Row types returned by the repository functions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "tool" => Some(MessageRole::Tool),
            _ => None,
        }
    }
}

/// A row in the `messages` table. Immutable once inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub thread_id: Uuid,
    /// Caller-supplied idempotency key, unique within the thread.
    pub message_id: String,
    pub role: MessageRole,
    pub content: Option<serde_json::Value>,
    pub tool_name: Option<String>,
    pub tool_input: Option<serde_json::Value>,
    pub tool_output: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// One-to-one process-default override row for a thread.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadConfig {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
    pub context_window: Option<u32>,
    pub settings: Option<serde_json::Value>,
}

/// A metadata record referencing exactly one blob, scoped to a thread and
/// a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub fingerprint: String,
    pub filename: String,
    pub mime: String,
    pub size_bytes: i64,
    pub session_id: String,
    pub run_id: String,
    pub tool_call_id: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Input to an artifact insert before the row id/timestamp are assigned.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub thread_id: Uuid,
    pub fingerprint: String,
    pub filename: String,
    pub mime: String,
    pub size_bytes: i64,
    pub session_id: String,
    pub run_id: String,
    pub tool_call_id: String,
    pub metadata: Option<serde_json::Value>,
}

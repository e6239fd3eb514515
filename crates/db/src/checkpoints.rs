//! Durable conversation state — the agent's own view of history, which may
//! diverge from the `messages` table (summarization prunes it, the
//! `messages` table never does). One row per thread.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use cx_domain::error::{Error, Result};

/// One entry in the agent's durable message log. Distinct from
/// `cx_domain::tool::Message` in that it carries a stable `id` so the
/// summarizer can prune by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMessage {
    pub id: String,
    pub role: cx_domain::tool::Role,
    pub content: cx_domain::tool::MessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<CheckpointMessage>,
    pub token_count: i64,
    pub summary: String,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            token_count: 0,
            summary: String::new(),
        }
    }
}

pub async fn load(pool: &SqlitePool, thread_id: Uuid) -> Result<ConversationState> {
    let row = sqlx::query_as::<_, StateRow>(
        "SELECT messages, token_count, summary FROM conversation_states WHERE thread_id = ?",
    )
    .bind(thread_id.to_string())
    .fetch_optional(pool)
    .await
    .map_err(|e| Error::Database(e.to_string()))?;

    match row {
        Some(r) => Ok(ConversationState {
            messages: serde_json::from_str(&r.messages)?,
            token_count: r.token_count,
            summary: r.summary,
        }),
        None => Ok(ConversationState::default()),
    }
}

pub async fn save(pool: &SqlitePool, thread_id: Uuid, state: &ConversationState) -> Result<()> {
    let messages = serde_json::to_string(&state.messages)?;
    sqlx::query(
        "INSERT INTO conversation_states (thread_id, messages, token_count, summary, updated_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(thread_id) DO UPDATE SET
            messages = excluded.messages,
            token_count = excluded.token_count,
            summary = excluded.summary,
            updated_at = excluded.updated_at",
    )
    .bind(thread_id.to_string())
    .bind(messages)
    .bind(state.token_count)
    .bind(&state.summary)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .map_err(|e| Error::Database(e.to_string()))?;

    Ok(())
}

#[derive(sqlx::FromRow)]
struct StateRow {
    messages: String,
    token_count: i64,
    summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cx_domain::tool::{MessageContent, Role};

    async fn test_pool() -> SqlitePool {
        crate::pool::connect("sqlite::memory:", 1).await.unwrap()
    }

    async fn new_thread(pool: &SqlitePool) -> Uuid {
        crate::threads::create(pool, "alice", "thread").await.unwrap().id
    }

    #[tokio::test]
    async fn load_without_prior_save_returns_default() {
        let pool = test_pool().await;
        let thread_id = new_thread(&pool).await;
        let state = load(&pool, thread_id).await.unwrap();
        assert!(state.messages.is_empty());
        assert_eq!(state.token_count, 0);
        assert_eq!(state.summary, "");
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let pool = test_pool().await;
        let thread_id = new_thread(&pool).await;

        let state = ConversationState {
            messages: vec![CheckpointMessage {
                id: "m1".into(),
                role: Role::User,
                content: MessageContent::Text("hi".into()),
            }],
            token_count: 42,
            summary: "greeting exchanged".into(),
        };
        save(&pool, thread_id, &state).await.unwrap();

        let loaded = load(&pool, thread_id).await.unwrap();
        assert_eq!(loaded.token_count, 42);
        assert_eq!(loaded.summary, "greeting exchanged");
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.messages[0].id, "m1");
    }

    #[tokio::test]
    async fn save_overwrites_previous_state() {
        let pool = test_pool().await;
        let thread_id = new_thread(&pool).await;

        save(&pool, thread_id, &ConversationState { token_count: 1, ..Default::default() })
            .await
            .unwrap();
        save(&pool, thread_id, &ConversationState { token_count: 2, ..Default::default() })
            .await
            .unwrap();

        let loaded = load(&pool, thread_id).await.unwrap();
        assert_eq!(loaded.token_count, 2);
    }
}

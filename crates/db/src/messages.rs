//! Message insertion and retrieval.
//!
//! Idempotency relies solely on the unique constraint on
//! `(thread_id, message_id)`; a violation is surfaced as [`Error::Conflict`]
//! so the caller can return 409 without a prior existence check (avoids a
//! check-then-insert race).

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use cx_domain::error::{Error, Result};

use crate::models::{Message, MessageRole};

fn map_sqlx(thread_id: Uuid, message_id: &str, e: sqlx::Error) -> Error {
    if is_unique_violation(&e) {
        Error::Conflict(format!(
            "message {message_id} already exists in thread {thread_id}"
        ))
    } else {
        Error::Database(e.to_string())
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub struct NewMessage {
    pub thread_id: Uuid,
    pub message_id: String,
    pub role: MessageRole,
    pub content: Option<serde_json::Value>,
    pub tool_name: Option<String>,
    pub tool_input: Option<serde_json::Value>,
    pub tool_output: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
}

/// Insert one message row. On a `(thread_id, message_id)` collision this
/// returns [`Error::Conflict`] and the row is left untouched.
pub async fn insert(pool: &SqlitePool, msg: NewMessage) -> Result<Message> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let content = msg.content.as_ref().map(serde_json::to_string).transpose()?;
    let tool_input = msg
        .tool_input
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let tool_output = msg
        .tool_output
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let metadata = msg
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        "INSERT INTO messages
            (id, thread_id, message_id, role, content, tool_name, tool_input, tool_output, metadata, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(msg.thread_id.to_string())
    .bind(&msg.message_id)
    .bind(msg.role.as_str())
    .bind(&content)
    .bind(&msg.tool_name)
    .bind(&tool_input)
    .bind(&tool_output)
    .bind(&metadata)
    .bind(now.to_rfc3339())
    .execute(pool)
    .await
    .map_err(|e| map_sqlx(msg.thread_id, &msg.message_id, e))?;

    Ok(Message {
        id,
        thread_id: msg.thread_id,
        message_id: msg.message_id,
        role: msg.role,
        content: msg.content,
        tool_name: msg.tool_name,
        tool_input: msg.tool_input,
        tool_output: msg.tool_output,
        metadata: msg.metadata,
        created_at: now,
    })
}

/// Same as [`insert`] but runs against an open transaction, so callers can
/// batch several message rows into one commit.
pub async fn insert_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    msg: NewMessage,
) -> Result<Message> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let content = msg.content.as_ref().map(serde_json::to_string).transpose()?;
    let tool_input = msg
        .tool_input
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let tool_output = msg
        .tool_output
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let metadata = msg
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        "INSERT INTO messages
            (id, thread_id, message_id, role, content, tool_name, tool_input, tool_output, metadata, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(msg.thread_id.to_string())
    .bind(&msg.message_id)
    .bind(msg.role.as_str())
    .bind(&content)
    .bind(&msg.tool_name)
    .bind(&tool_input)
    .bind(&tool_output)
    .bind(&metadata)
    .bind(now.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx(msg.thread_id, &msg.message_id, e))?;

    Ok(Message {
        id,
        thread_id: msg.thread_id,
        message_id: msg.message_id,
        role: msg.role,
        content: msg.content,
        tool_name: msg.tool_name,
        tool_input: msg.tool_input,
        tool_output: msg.tool_output,
        metadata: msg.metadata,
        created_at: now,
    })
}

pub async fn list_for_thread(pool: &SqlitePool, thread_id: Uuid) -> Result<Vec<Message>> {
    let rows = sqlx::query_as::<_, MessageRow>(
        "SELECT id, thread_id, message_id, role, content, tool_name, tool_input, tool_output, metadata, created_at
         FROM messages WHERE thread_id = ? ORDER BY created_at ASC",
    )
    .bind(thread_id.to_string())
    .fetch_all(pool)
    .await
    .map_err(|e| Error::Database(e.to_string()))?;

    rows.into_iter().map(TryInto::try_into).collect()
}

/// The canonical synthetic message_id for the assistant row produced by
/// a given user turn.
pub fn assistant_message_id(user_message_id: &str) -> String {
    format!("assistant:{user_message_id}")
}

/// The canonical synthetic message_id for the Nth tool-call row produced
/// by a given user turn.
pub fn tool_message_id(user_message_id: &str, idx: usize) -> String {
    format!("tool:{user_message_id}:{idx}")
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    thread_id: String,
    message_id: String,
    role: String,
    content: Option<String>,
    tool_name: Option<String>,
    tool_input: Option<String>,
    tool_output: Option<String>,
    metadata: Option<String>,
    created_at: String,
}

impl TryFrom<MessageRow> for Message {
    type Error = Error;

    fn try_from(r: MessageRow) -> Result<Self> {
        Ok(Message {
            id: Uuid::parse_str(&r.id).unwrap_or_default(),
            thread_id: Uuid::parse_str(&r.thread_id).unwrap_or_default(),
            message_id: r.message_id,
            role: MessageRole::parse(&r.role)
                .ok_or_else(|| Error::Database(format!("unknown role {}", r.role)))?,
            content: r.content.and_then(|s| serde_json::from_str(&s).ok()),
            tool_name: r.tool_name,
            tool_input: r.tool_input.and_then(|s| serde_json::from_str(&s).ok()),
            tool_output: r.tool_output.and_then(|s| serde_json::from_str(&s).ok()),
            metadata: r.metadata.and_then(|s| serde_json::from_str(&s).ok()),
            created_at: chrono::DateTime::parse_from_rfc3339(&r.created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> SqlitePool {
        crate::pool::connect("sqlite::memory:", 1).await.unwrap()
    }

    fn user_message(thread_id: Uuid, message_id: &str, text: &str) -> NewMessage {
        NewMessage {
            thread_id,
            message_id: message_id.to_owned(),
            role: MessageRole::User,
            content: Some(serde_json::json!({ "text": text })),
            tool_name: None,
            tool_input: None,
            tool_output: None,
            metadata: None,
        }
    }

    async fn new_thread(pool: &SqlitePool) -> Uuid {
        crate::threads::create(pool, "alice", "thread").await.unwrap().id
    }

    #[tokio::test]
    async fn insert_and_list_in_order() {
        let pool = test_pool().await;
        let thread_id = new_thread(&pool).await;

        insert(&pool, user_message(thread_id, "m1", "hello")).await.unwrap();
        insert(&pool, user_message(thread_id, "m2", "world")).await.unwrap();

        let messages = list_for_thread(&pool, thread_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message_id, "m1");
        assert_eq!(messages[1].message_id, "m2");
    }

    #[tokio::test]
    async fn duplicate_message_id_in_same_thread_conflicts() {
        let pool = test_pool().await;
        let thread_id = new_thread(&pool).await;

        insert(&pool, user_message(thread_id, "dup", "first")).await.unwrap();
        let err = insert(&pool, user_message(thread_id, "dup", "second")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // The original row is untouched.
        let messages = list_for_thread(&pool, thread_id).await.unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn same_message_id_allowed_across_threads() {
        let pool = test_pool().await;
        let t1 = new_thread(&pool).await;
        let t2 = new_thread(&pool).await;

        insert(&pool, user_message(t1, "shared", "a")).await.unwrap();
        insert(&pool, user_message(t2, "shared", "b")).await.unwrap();

        assert_eq!(list_for_thread(&pool, t1).await.unwrap().len(), 1);
        assert_eq!(list_for_thread(&pool, t2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn insert_tx_commits_with_transaction() {
        let pool = test_pool().await;
        let thread_id = new_thread(&pool).await;

        let mut tx = pool.begin().await.unwrap();
        insert_tx(&mut tx, user_message(thread_id, "tx-m1", "hi")).await.unwrap();
        tx.commit().await.unwrap();

        let messages = list_for_thread(&pool, thread_id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_id, "tx-m1");
    }

    #[test]
    fn synthetic_ids_are_namespaced_per_role() {
        assert_eq!(assistant_message_id("m1"), "assistant:m1");
        assert_eq!(tool_message_id("m1", 0), "tool:m1:0");
        assert_ne!(assistant_message_id("m1"), tool_message_id("m1", 0));
    }
}

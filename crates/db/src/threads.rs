//! Thread CRUD and per-thread config overrides.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use cx_domain::error::{Error, Result};

use crate::models::{Thread, ThreadConfig};

fn map_sqlx(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}

pub async fn create(pool: &SqlitePool, user_id: &str, title: &str) -> Result<Thread> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO threads (id, user_id, title, archived_at, created_at, updated_at)
         VALUES (?, ?, ?, NULL, ?, ?)",
    )
    .bind(id.to_string())
    .bind(user_id)
    .bind(title)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await
    .map_err(map_sqlx)?;

    Ok(Thread {
        id,
        user_id: user_id.to_owned(),
        title: title.to_owned(),
        archived_at: None,
        created_at: now,
        updated_at: now,
    })
}

pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<Option<Thread>> {
    let row = sqlx::query_as::<_, ThreadRow>(
        "SELECT id, user_id, title, archived_at, created_at, updated_at
         FROM threads WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx)?;

    Ok(row.map(Into::into))
}

pub async fn require(pool: &SqlitePool, id: Uuid) -> Result<Thread> {
    get(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("thread {id} not found")))
}

pub async fn list(pool: &SqlitePool, user_id: &str, include_archived: bool) -> Result<Vec<Thread>> {
    let query = if include_archived {
        "SELECT id, user_id, title, archived_at, created_at, updated_at
         FROM threads WHERE user_id = ? ORDER BY updated_at DESC"
    } else {
        "SELECT id, user_id, title, archived_at, created_at, updated_at
         FROM threads WHERE user_id = ? AND archived_at IS NULL ORDER BY updated_at DESC"
    };
    let rows = sqlx::query_as::<_, ThreadRow>(query)
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(map_sqlx)?;
    Ok(rows.into_iter().map(Into::into).collect())
}

pub async fn set_title(pool: &SqlitePool, id: Uuid, title: &str) -> Result<()> {
    sqlx::query("UPDATE threads SET title = ?, updated_at = ? WHERE id = ?")
        .bind(title)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(map_sqlx)?;
    Ok(())
}

pub async fn set_archived(pool: &SqlitePool, id: Uuid, archived: bool) -> Result<()> {
    let archived_at = archived.then(|| Utc::now().to_rfc3339());
    sqlx::query("UPDATE threads SET archived_at = ?, updated_at = ? WHERE id = ?")
        .bind(archived_at)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(map_sqlx)?;
    Ok(())
}

/// Delete a thread and cascade to its messages, config, artifacts, and
/// conversation state (all declared `ON DELETE CASCADE`). Blobs are never
/// touched — they may be shared by artifacts in other threads.
pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM threads WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(map_sqlx)?;
    Ok(())
}

pub async fn get_config(pool: &SqlitePool, thread_id: Uuid) -> Result<ThreadConfig> {
    let row = sqlx::query_as::<_, ThreadConfigRow>(
        "SELECT model, temperature, system_prompt, context_window, settings
         FROM thread_configs WHERE thread_id = ?",
    )
    .bind(thread_id.to_string())
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx)?;

    Ok(row.map(Into::into).unwrap_or_default())
}

pub async fn upsert_config(pool: &SqlitePool, thread_id: Uuid, cfg: &ThreadConfig) -> Result<()> {
    let settings = cfg
        .settings
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        "INSERT INTO thread_configs (thread_id, model, temperature, system_prompt, context_window, settings)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(thread_id) DO UPDATE SET
            model = excluded.model,
            temperature = excluded.temperature,
            system_prompt = excluded.system_prompt,
            context_window = excluded.context_window,
            settings = excluded.settings",
    )
    .bind(thread_id.to_string())
    .bind(&cfg.model)
    .bind(cfg.temperature)
    .bind(&cfg.system_prompt)
    .bind(cfg.context_window)
    .bind(settings)
    .execute(pool)
    .await
    .map_err(map_sqlx)?;

    Ok(())
}

#[derive(sqlx::FromRow)]
struct ThreadRow {
    id: String,
    user_id: String,
    title: String,
    archived_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<ThreadRow> for Thread {
    fn from(r: ThreadRow) -> Self {
        Thread {
            id: Uuid::parse_str(&r.id).unwrap_or_default(),
            user_id: r.user_id,
            title: r.title,
            archived_at: r
                .archived_at
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            created_at: chrono::DateTime::parse_from_rfc3339(&r.created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: chrono::DateTime::parse_from_rfc3339(&r.updated_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ThreadConfigRow {
    model: Option<String>,
    temperature: Option<f32>,
    system_prompt: Option<String>,
    context_window: Option<i64>,
    settings: Option<String>,
}

impl From<ThreadConfigRow> for ThreadConfig {
    fn from(r: ThreadConfigRow) -> Self {
        ThreadConfig {
            model: r.model,
            temperature: r.temperature,
            system_prompt: r.system_prompt,
            context_window: r.context_window.map(|w| w as u32),
            settings: r.settings.and_then(|s| serde_json::from_str(&s).ok()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> SqlitePool {
        crate::pool::connect("sqlite::memory:", 1).await.unwrap()
    }

    #[tokio::test]
    async fn create_and_get_roundtrip() {
        let pool = test_pool().await;
        let created = create(&pool, "alice", "New chat").await.unwrap();

        let fetched = get(&pool, created.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.user_id, "alice");
        assert_eq!(fetched.title, "New chat");
        assert!(fetched.archived_at.is_none());
    }

    #[tokio::test]
    async fn require_missing_thread_is_not_found() {
        let pool = test_pool().await;
        let err = require(&pool, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn list_excludes_archived_by_default() {
        let pool = test_pool().await;
        let t1 = create(&pool, "bob", "first").await.unwrap();
        let t2 = create(&pool, "bob", "second").await.unwrap();
        set_archived(&pool, t1.id, true).await.unwrap();

        let active = list(&pool, "bob", false).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, t2.id);

        let all = list(&pool, "bob", true).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn list_is_scoped_to_user() {
        let pool = test_pool().await;
        create(&pool, "carol", "carol's thread").await.unwrap();
        create(&pool, "dave", "dave's thread").await.unwrap();

        let carol_threads = list(&pool, "carol", true).await.unwrap();
        assert_eq!(carol_threads.len(), 1);
        assert_eq!(carol_threads[0].user_id, "carol");
    }

    #[tokio::test]
    async fn delete_removes_thread() {
        let pool = test_pool().await;
        let t = create(&pool, "erin", "bye").await.unwrap();
        delete(&pool, t.id).await.unwrap();
        assert!(get(&pool, t.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn config_defaults_when_unset() {
        let pool = test_pool().await;
        let t = create(&pool, "frank", "thread").await.unwrap();
        let cfg = get_config(&pool, t.id).await.unwrap();
        assert!(cfg.model.is_none());
        assert!(cfg.temperature.is_none());
    }

    #[tokio::test]
    async fn upsert_config_overwrites_existing() {
        let pool = test_pool().await;
        let t = create(&pool, "grace", "thread").await.unwrap();

        let cfg = ThreadConfig {
            model: Some("gpt-4o".into()),
            temperature: Some(0.5),
            system_prompt: None,
            context_window: Some(8000),
            settings: None,
        };
        upsert_config(&pool, t.id, &cfg).await.unwrap();

        let cfg2 = ThreadConfig {
            temperature: Some(0.9),
            ..cfg
        };
        upsert_config(&pool, t.id, &cfg2).await.unwrap();

        let fetched = get_config(&pool, t.id).await.unwrap();
        assert_eq!(fetched.model.as_deref(), Some("gpt-4o"));
        assert_eq!(fetched.temperature, Some(0.9));
    }
}

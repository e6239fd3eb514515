//! Artifact row CRUD. The blob itself lives in `cx-blobstore`; this module
//! only manages the metadata rows that reference it.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use cx_domain::error::{Error, Result};

use crate::models::{Artifact, NewArtifact};

fn map_sqlx(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}

pub async fn insert(pool: &SqlitePool, new: NewArtifact) -> Result<Artifact> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    let metadata = new
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        "INSERT INTO artifacts
            (id, thread_id, fingerprint, filename, mime, size_bytes, session_id, run_id, tool_call_id, metadata, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(new.thread_id.to_string())
    .bind(&new.fingerprint)
    .bind(&new.filename)
    .bind(&new.mime)
    .bind(new.size_bytes)
    .bind(&new.session_id)
    .bind(&new.run_id)
    .bind(&new.tool_call_id)
    .bind(&metadata)
    .bind(now.to_rfc3339())
    .execute(pool)
    .await
    .map_err(map_sqlx)?;

    Ok(Artifact {
        id,
        thread_id: new.thread_id,
        fingerprint: new.fingerprint,
        filename: new.filename,
        mime: new.mime,
        size_bytes: new.size_bytes,
        session_id: new.session_id,
        run_id: new.run_id,
        tool_call_id: new.tool_call_id,
        metadata: new.metadata,
        created_at: now,
    })
}

/// Same as [`insert`] but runs against an open transaction, so callers can
/// batch several artifact rows into one commit.
pub async fn insert_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    new: NewArtifact,
) -> Result<Artifact> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    let metadata = new
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        "INSERT INTO artifacts
            (id, thread_id, fingerprint, filename, mime, size_bytes, session_id, run_id, tool_call_id, metadata, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(new.thread_id.to_string())
    .bind(&new.fingerprint)
    .bind(&new.filename)
    .bind(&new.mime)
    .bind(new.size_bytes)
    .bind(&new.session_id)
    .bind(&new.run_id)
    .bind(&new.tool_call_id)
    .bind(&metadata)
    .bind(now.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx)?;

    Ok(Artifact {
        id,
        thread_id: new.thread_id,
        fingerprint: new.fingerprint,
        filename: new.filename,
        mime: new.mime,
        size_bytes: new.size_bytes,
        session_id: new.session_id,
        run_id: new.run_id,
        tool_call_id: new.tool_call_id,
        metadata: new.metadata,
        created_at: now,
    })
}

pub async fn get_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Artifact>> {
    let row = sqlx::query_as::<_, ArtifactRow>(
        "SELECT id, thread_id, fingerprint, filename, mime, size_bytes, session_id, run_id, tool_call_id, metadata, created_at
         FROM artifacts WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx)?;

    Ok(row.map(Into::into))
}

pub async fn find_by_fingerprint(pool: &SqlitePool, fingerprint: &str) -> Result<Vec<Artifact>> {
    let rows = sqlx::query_as::<_, ArtifactRow>(
        "SELECT id, thread_id, fingerprint, filename, mime, size_bytes, session_id, run_id, tool_call_id, metadata, created_at
         FROM artifacts WHERE fingerprint = ?",
    )
    .bind(fingerprint)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx)?;

    Ok(rows.into_iter().map(Into::into).collect())
}

#[derive(sqlx::FromRow)]
struct ArtifactRow {
    id: String,
    thread_id: String,
    fingerprint: String,
    filename: String,
    mime: String,
    size_bytes: i64,
    session_id: String,
    run_id: String,
    tool_call_id: String,
    metadata: Option<String>,
    created_at: String,
}

impl From<ArtifactRow> for Artifact {
    fn from(r: ArtifactRow) -> Self {
        Artifact {
            id: Uuid::parse_str(&r.id).unwrap_or_default(),
            thread_id: Uuid::parse_str(&r.thread_id).unwrap_or_default(),
            fingerprint: r.fingerprint,
            filename: r.filename,
            mime: r.mime,
            size_bytes: r.size_bytes,
            session_id: r.session_id,
            run_id: r.run_id,
            tool_call_id: r.tool_call_id,
            metadata: r.metadata.and_then(|s| serde_json::from_str(&s).ok()),
            created_at: chrono::DateTime::parse_from_rfc3339(&r.created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> SqlitePool {
        crate::pool::connect("sqlite::memory:", 1).await.unwrap()
    }

    async fn new_thread(pool: &SqlitePool) -> Uuid {
        crate::threads::create(pool, "alice", "thread").await.unwrap().id
    }

    fn new_artifact(thread_id: Uuid, fingerprint: &str) -> NewArtifact {
        NewArtifact {
            thread_id,
            fingerprint: fingerprint.to_owned(),
            filename: "report.csv".into(),
            mime: "text/csv".into(),
            size_bytes: 1024,
            session_id: "sess-1".into(),
            run_id: "run-1".into(),
            tool_call_id: "tc-1".into(),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let pool = test_pool().await;
        let thread_id = new_thread(&pool).await;
        let created = insert(&pool, new_artifact(thread_id, "abc123")).await.unwrap();

        let fetched = get_by_id(&pool, created.id).await.unwrap().unwrap();
        assert_eq!(fetched.fingerprint, "abc123");
        assert_eq!(fetched.filename, "report.csv");
        assert_eq!(fetched.size_bytes, 1024);
    }

    #[tokio::test]
    async fn get_by_id_missing_returns_none() {
        let pool = test_pool().await;
        assert!(get_by_id(&pool, Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_by_fingerprint_returns_all_sharing_blob() {
        let pool = test_pool().await;
        let t1 = new_thread(&pool).await;
        let t2 = new_thread(&pool).await;

        insert(&pool, new_artifact(t1, "shared-hash")).await.unwrap();
        insert(&pool, new_artifact(t2, "shared-hash")).await.unwrap();
        insert(&pool, new_artifact(t1, "other-hash")).await.unwrap();

        let shared = find_by_fingerprint(&pool, "shared-hash").await.unwrap();
        assert_eq!(shared.len(), 2);

        let other = find_by_fingerprint(&pool, "other-hash").await.unwrap();
        assert_eq!(other.len(), 1);
    }

    #[tokio::test]
    async fn insert_tx_commits_with_transaction() {
        let pool = test_pool().await;
        let thread_id = new_thread(&pool).await;

        let mut tx = pool.begin().await.unwrap();
        let created = insert_tx(&mut tx, new_artifact(thread_id, "tx-hash")).await.unwrap();
        tx.commit().await.unwrap();

        let fetched = get_by_id(&pool, created.id).await.unwrap().unwrap();
        assert_eq!(fetched.fingerprint, "tx-hash");
    }

    #[tokio::test]
    async fn artifacts_are_deleted_when_thread_is_deleted() {
        let pool = test_pool().await;
        let thread_id = new_thread(&pool).await;
        let created = insert(&pool, new_artifact(thread_id, "cascade-hash")).await.unwrap();

        crate::threads::delete(&pool, thread_id).await.unwrap();

        assert!(get_by_id(&pool, created.id).await.unwrap().is_none());
    }
}

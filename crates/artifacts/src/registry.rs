//! Metadata layer over the blob store: per-reference artifact rows, dedup
//! via content fingerprint, and ingestion from a sandbox session's staging
//! directory.

use std::path::{Path, PathBuf};

use sqlx::SqlitePool;
use uuid::Uuid;

use cx_blobstore::BlobStore;
use cx_db::models::{Artifact, NewArtifact};

use crate::tokens::DownloadTokenService;

/// Result of attempting to ingest one host path. Always produced, even on
/// failure, so the caller can report a per-file outcome back to the tool
/// that staged it.
#[derive(Debug, Clone)]
pub struct IngestDescriptor {
    pub filename: String,
    pub outcome: IngestOutcome,
}

enum Prepared {
    Ready(NewArtifact),
    Failed(IngestDescriptor),
}

#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Ok {
        artifact: Artifact,
        download_url: Option<String>,
    },
    SizeExceeded {
        size_bytes: u64,
        max_bytes: u64,
    },
    Error(String),
}

pub struct ArtifactRegistry {
    pool: SqlitePool,
    blobs: BlobStore,
    tokens: Option<DownloadTokenService>,
    max_bytes: u64,
}

impl ArtifactRegistry {
    pub fn new(
        pool: SqlitePool,
        blobs: BlobStore,
        tokens: Option<DownloadTokenService>,
        max_bytes: u64,
    ) -> Self {
        Self {
            pool,
            blobs,
            tokens,
            max_bytes,
        }
    }

    /// Ingests every file at `host_paths` into the blob store and records one
    /// artifact row per path, scoped to `thread_id` / `session_id` / `run_id`
    /// / `tool_call_id`.
    ///
    /// Per-file steps (size check, fingerprint, blob copy) happen
    /// independently so one bad file doesn't block the rest of the batch.
    /// The resulting artifact rows are then inserted in a single
    /// transaction; on commit failure the blobs already written are left in
    /// place since they're content-addressed and safe to re-ingest.
    pub async fn ingest(
        &self,
        thread_id: Uuid,
        session_id: &str,
        run_id: &str,
        tool_call_id: &str,
        host_paths: &[PathBuf],
    ) -> Vec<IngestDescriptor> {
        let mut prepared = Vec::with_capacity(host_paths.len());
        for path in host_paths {
            prepared.push(
                self.prepare_one(thread_id, session_id, run_id, tool_call_id, path)
                    .await,
            );
        }

        let ready_rows: Vec<NewArtifact> = prepared
            .iter()
            .filter_map(|p| match p {
                Prepared::Ready(new_artifact) => Some(new_artifact.clone()),
                Prepared::Failed(_) => None,
            })
            .collect();

        let inserted = match self.insert_all(ready_rows).await {
            Ok(rows) => rows,
            Err(e) => {
                let msg = e.to_string();
                return prepared
                    .into_iter()
                    .map(|p| match p {
                        Prepared::Ready(new_artifact) => IngestDescriptor {
                            filename: new_artifact.filename,
                            outcome: IngestOutcome::Error(format!(
                                "artifact insert transaction failed: {msg}"
                            )),
                        },
                        Prepared::Failed(d) => d,
                    })
                    .collect();
            }
        };

        // `inserted` is in the same relative order as the `Ready` entries of
        // `prepared` — walk both in lockstep.
        let mut inserted = inserted.into_iter();
        let mut out = Vec::with_capacity(prepared.len());
        for (path, p) in host_paths.iter().zip(prepared.into_iter()) {
            match p {
                Prepared::Failed(d) => out.push(d),
                Prepared::Ready(new_artifact) => {
                    let filename = new_artifact.filename;
                    let artifact = inserted
                        .next()
                        .expect("one inserted row per Ready entry, in order");
                    if let Err(e) = tokio::fs::remove_file(path).await {
                        tracing::warn!(path = %path.display(), error = %e, "failed to remove staged artifact file");
                    }
                    let download_url = self.tokens.as_ref().map(|t| {
                        format!("/v1/artifacts/{}?token={}", artifact.id, t.issue(artifact.id))
                    });
                    out.push(IngestDescriptor {
                        filename,
                        outcome: IngestOutcome::Ok {
                            artifact,
                            download_url,
                        },
                    });
                }
            }
        }
        out
    }

    async fn prepare_one(
        &self,
        thread_id: Uuid,
        session_id: &str,
        run_id: &str,
        tool_call_id: &str,
        path: &Path,
    ) -> Prepared {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());

        // 1. Stat size; reject oversized files before touching the blob store.
        let size_bytes = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                return Prepared::Failed(IngestDescriptor {
                    filename,
                    outcome: IngestOutcome::Error(format!("stat failed: {e}")),
                });
            }
        };
        if size_bytes > self.max_bytes {
            return Prepared::Failed(IngestDescriptor {
                filename,
                outcome: IngestOutcome::SizeExceeded {
                    size_bytes,
                    max_bytes: self.max_bytes,
                },
            });
        }

        // 2. Fingerprint + MIME sniff (extension-based; content sniffing is
        // not attempted, matching the declared-MIME model in the data model).
        let fingerprint = match BlobStore::fingerprint(path).await {
            Ok(fp) => fp,
            Err(e) => {
                return Prepared::Failed(IngestDescriptor {
                    filename,
                    outcome: IngestOutcome::Error(format!("fingerprint failed: {e}")),
                });
            }
        };
        let mime = mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string();

        // 3. Copy into the blob store. Idempotent: a matching fingerprint
        // already on disk is left untouched.
        if let Err(e) = self.blobs.put(path, &fingerprint).await {
            return Prepared::Failed(IngestDescriptor {
                filename,
                outcome: IngestOutcome::Error(format!("blob store put failed: {e}")),
            });
        }

        Prepared::Ready(NewArtifact {
            thread_id,
            fingerprint,
            filename,
            mime,
            size_bytes: size_bytes as i64,
            session_id: session_id.to_string(),
            run_id: run_id.to_string(),
            tool_call_id: tool_call_id.to_string(),
            metadata: None,
        })
    }

    /// Inserts every prepared row inside one transaction; all succeed or
    /// all roll back.
    async fn insert_all(&self, rows: Vec<NewArtifact>) -> cx_domain::error::Result<Vec<Artifact>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| cx_domain::error::Error::Database(e.to_string()))?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let artifact = cx_db::artifacts::insert_tx(&mut tx, row).await?;
            out.push(artifact);
        }
        tx.commit()
            .await
            .map_err(|e| cx_domain::error::Error::Database(e.to_string()))?;
        Ok(out)
    }

    pub async fn get_by_id(&self, id: Uuid) -> cx_domain::error::Result<Option<Artifact>> {
        cx_db::artifacts::get_by_id(&self.pool, id).await
    }

    pub async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> cx_domain::error::Result<Vec<Artifact>> {
        cx_db::artifacts::find_by_fingerprint(&self.pool, fingerprint).await
    }

    pub fn blob_path_for(&self, fingerprint: &str) -> PathBuf {
        self.blobs.path_for(fingerprint)
    }

    pub fn tokens(&self) -> Option<&DownloadTokenService> {
        self.tokens.as_ref()
    }
}

//! Shared application state passed to all API handlers.

use std::sync::Arc;

use cx_artifacts::ArtifactRegistry;
use cx_blobstore::BlobStore;
use cx_db::SqlitePool;
use cx_domain::config::Config;
use cx_providers::ProviderRegistry;
use cx_sandbox::SessionManager;

use crate::runtime::session_lock::ThreadLockTable;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: SqlitePool,
    pub blobs: Arc<BlobStore>,
    pub artifacts: Arc<ArtifactRegistry>,
    pub llm: Arc<ProviderRegistry>,
    pub sandbox: Arc<SessionManager>,
    pub thread_locks: Arc<ThreadLockTable>,

    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
}

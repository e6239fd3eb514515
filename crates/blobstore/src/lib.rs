//! Content-addressed byte storage on a local filesystem.
//!
//! Files are keyed by the SHA-256 fingerprint of their bytes and sharded
//! two levels deep to avoid a single directory holding every blob:
//! `<root>/<fp[0:2]>/<fp[2:4]>/<fp>`.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use cx_domain::error::{Error, Result};

/// 1 MiB chunks when hashing, so fingerprinting a large file never holds
/// more than one chunk in memory.
const HASH_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// The deterministic on-disk path for a given fingerprint. Does not
    /// guarantee the file exists.
    pub fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.root
            .join(&fingerprint[0..2])
            .join(&fingerprint[2..4])
            .join(fingerprint)
    }

    /// Compute the lowercase-hex SHA-256 of a file's bytes, reading in
    /// bounded chunks so the call doesn't load the whole file into memory.
    pub async fn fingerprint(path: &Path) -> Result<String> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; HASH_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Idempotently copy `source_path` into the sharded destination for
    /// `fingerprint`. If the destination already exists, this is a no-op
    /// (content is identical by construction — the fingerprint says so).
    ///
    /// Writes to a temp file in the same shard directory and renames into
    /// place, so concurrent readers never observe a partially written blob.
    pub async fn put(&self, source_path: &Path, fingerprint: &str) -> Result<PathBuf> {
        let dest = self.path_for(fingerprint);

        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            return Ok(dest);
        }

        let shard_dir = dest
            .parent()
            .ok_or_else(|| Error::Other("blob path has no parent directory".into()))?;
        tokio::fs::create_dir_all(shard_dir).await?;

        let tmp_path = shard_dir.join(format!(".{fingerprint}.tmp-{}", uuid_like_suffix()));
        tokio::fs::copy(source_path, &tmp_path).await?;

        match tokio::fs::rename(&tmp_path, &dest).await {
            Ok(()) => Ok(dest),
            Err(e) => {
                // Another writer may have raced us to the same fingerprint;
                // content is identical either way, so treat "now exists" as
                // success and clean up our temp file.
                let _ = tokio::fs::remove_file(&tmp_path).await;
                if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
                    Ok(dest)
                } else {
                    Err(Error::Io(e))
                }
            }
        }
    }

    /// Best-effort delete. Never raises — a missing or unremovable file is
    /// logged and swallowed.
    pub async fn delete(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "blob delete failed");
            }
        }
    }

    pub async fn exists(&self, fingerprint: &str) -> bool {
        tokio::fs::try_exists(self.path_for(fingerprint))
            .await
            .unwrap_or(false)
    }
}

/// Cheap process-unique suffix for temp file names — doesn't need to be a
/// real UUID, just distinct across concurrent `put` calls in this process.
fn uuid_like_suffix() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", std::process::id(), n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn store_with_file(contents: &[u8]) -> (BlobStore, PathBuf, String) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("blobs")).await.unwrap();

        let src_dir = tempfile::tempdir().unwrap();
        let src_path = src_dir.path().join("source.bin");
        {
            let mut f = std::fs::File::create(&src_path).unwrap();
            f.write_all(contents).unwrap();
        }
        let fp = BlobStore::fingerprint(&src_path).await.unwrap();
        // keep tempdir alive by leaking it — fine for a short-lived test
        std::mem::forget(src_dir);
        (store, src_path, fp)
    }

    #[tokio::test]
    async fn fingerprint_is_sha256_hex() {
        let (_, path, fp) = store_with_file(b"hello world").await;
        let expected = {
            use sha2::{Digest, Sha256};
            hex::encode(Sha256::digest(b"hello world"))
        };
        assert_eq!(fp, expected);
        assert_eq!(fp.len(), 64);
        let _ = path;
    }

    #[tokio::test]
    async fn put_is_idempotent_and_shards_by_prefix() {
        let (store, src, fp) = store_with_file(b"some artifact bytes").await;
        let p1 = store.put(&src, &fp).await.unwrap();
        let p2 = store.put(&src, &fp).await.unwrap();
        assert_eq!(p1, p2);
        assert!(p1.ends_with(&fp));
        assert!(store.exists(&fp).await);

        let bytes = tokio::fs::read(&p1).await.unwrap();
        assert_eq!(bytes, b"some artifact bytes");
    }

    #[tokio::test]
    async fn delete_missing_file_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).await.unwrap();
        store.delete(&dir.path().join("nonexistent")).await;
    }
}

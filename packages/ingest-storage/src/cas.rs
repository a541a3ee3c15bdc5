//! Local filesystem content-addressed store.
//!
//! Layout: `<root>/<hex[0:2]>/<hex[2:4]>/<hex>.bin`. Writes go to a temp
//! file beside the target and are renamed into place, so two writers
//! racing on the same hash both succeed and agree on the final bytes.

use async_trait::async_trait;
use ingest_model::{CasStore, ModelError, ErrorKind as ModelErrorKind};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Chunk size `put` reads and hashes at a time, bounding memory use for
/// large attachments (§4.1).
const STREAM_CHUNK_BYTES: usize = 1024 * 1024;

pub struct LocalCasStore {
    root: PathBuf,
}

impl LocalCasStore {
    /// Use `root` if it (or its nearest existing ancestor) is writable;
    /// otherwise fall back to a fresh directory under the system temp
    /// root and log once (§4.1).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        if Self::probe_writable(&root) {
            return Self { root };
        }
        let fallback = std::env::temp_dir().join("ingest-cas-fallback");
        warn!(
            requested_root = %root.display(),
            fallback_root = %fallback.display(),
            "cas root is not writable, falling back to a temporary directory"
        );
        Self { root: fallback }
    }

    fn probe_writable(root: &Path) -> bool {
        if std::fs::create_dir_all(root).is_err() {
            return false;
        }
        let probe = root.join(".write-probe");
        let writable = std::fs::write(&probe, b"").is_ok();
        let _ = std::fs::remove_file(&probe);
        writable
    }

    fn relative_path(hash: &[u8; 32]) -> String {
        let hex = hex::encode(hash);
        format!("{}/{}/{}.bin", &hex[0..2], &hex[2..4], hex)
    }

    fn absolute_path(&self, hash: &[u8; 32]) -> PathBuf {
        self.root.join(Self::relative_path(hash))
    }
}

fn io_err(message: impl Into<String>) -> ModelError {
    ModelError::new(ModelErrorKind::InvalidHash, message.into())
}

#[async_trait]
impl CasStore for LocalCasStore {
    async fn put(&self, local_path: &Path) -> ingest_model::Result<([u8; 32], String, u64)> {
        let local_path = local_path.to_path_buf();
        let staging_dir = self.root.join(".staging");

        // Single pass: hash and copy each chunk into a staging temp file
        // before the final, hash-addressed destination is known.
        let (hash, size, tmp) = tokio::task::spawn_blocking({
            let local_path = local_path.clone();
            move || -> std::io::Result<([u8; 32], u64, tempfile::NamedTempFile)> {
                std::fs::create_dir_all(&staging_dir)?;
                let mut src = std::fs::File::open(&local_path)?;
                let mut tmp = tempfile::NamedTempFile::new_in(&staging_dir)?;
                let mut hasher = Sha256::new();
                let mut buf = vec![0u8; STREAM_CHUNK_BYTES];
                let mut size = 0u64;
                loop {
                    let n = src.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                    tmp.write_all(&buf[..n])?;
                    size += n as u64;
                }
                tmp.as_file().sync_all()?;
                Ok((hasher.finalize().into(), size, tmp))
            }
        })
        .await
        .map_err(|e| io_err(format!("cas stream task panicked: {e}")))?
        .map_err(|e| io_err(format!("streaming {} into cas: {e}", local_path.display())))?;

        let rel = Self::relative_path(&hash);
        let dest = self.root.join(&rel);

        if tokio::fs::metadata(&dest).await.is_ok() {
            return Ok((hash, rel, size));
        }

        let parent = dest.parent().expect("cas path always has a parent").to_path_buf();
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| io_err(format!("creating cas dir {}: {e}", parent.display())))?;

        let dest_owned = dest.clone();
        tokio::task::spawn_blocking(move || match tmp.persist(&dest_owned) {
            Ok(_) => Ok(()),
            Err(e) if dest_owned.exists() => {
                let _ = e;
                Ok(())
            }
            Err(e) => Err(io_err(format!("persisting cas object: {e}"))),
        })
        .await
        .map_err(|e| io_err(format!("cas persist task panicked: {e}")))??;

        Ok((hash, rel, size))
    }

    async fn get(&self, hash: &[u8; 32]) -> ingest_model::Result<Option<Vec<u8>>> {
        let path = self.absolute_path(hash);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(format!("reading cas object {}: {e}", path.display()))),
        }
    }

    async fn exists(&self, hash: &[u8; 32]) -> ingest_model::Result<bool> {
        Ok(tokio::fs::metadata(self.absolute_path(hash)).await.is_ok())
    }

    fn path_for(&self, hash: &[u8; 32]) -> String {
        Self::relative_path(hash)
    }
}

pub fn is_within(root: &Path, candidate: &Path) -> bool {
    candidate.starts_with(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_source(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        tokio::fs::write(&path, bytes).await.unwrap();
        path
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalCasStore::new(dir.path());
        let src = write_source(dir.path(), "a.bin", b"hello world").await;
        let (hash, rel, size) = store.put(&src).await.unwrap();
        assert!(rel.ends_with(".bin"));
        assert_eq!(size, 11);
        let back = store.get(&hash).await.unwrap();
        assert_eq!(back, Some(b"hello world".to_vec()));
    }

    #[tokio::test]
    async fn put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalCasStore::new(dir.path());
        let src = write_source(dir.path(), "a.bin", b"same bytes").await;
        let (h1, p1, _) = store.put(&src).await.unwrap();
        let (h2, p2, _) = store.put(&src).await.unwrap();
        assert_eq!(h1, h2);
        assert_eq!(p1, p2);
    }

    #[tokio::test]
    async fn put_streams_content_spanning_multiple_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalCasStore::new(dir.path());
        let bytes = vec![0xAB; STREAM_CHUNK_BYTES * 2 + 17];
        let src = write_source(dir.path(), "big.bin", &bytes).await;
        let (hash, _, size) = store.put(&src).await.unwrap();
        assert_eq!(size, bytes.len() as u64);
        assert_eq!(store.get(&hash).await.unwrap(), Some(bytes));
    }

    #[tokio::test]
    async fn missing_hash_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalCasStore::new(dir.path());
        let hash = [0u8; 32];
        assert_eq!(store.get(&hash).await.unwrap(), None);
        assert!(!store.exists(&hash).await.unwrap());
    }

    #[test]
    fn falls_back_to_temp_dir_when_root_unwritable() {
        let dir = tempfile::tempdir().unwrap();
        let unwritable = dir.path().join("locked");
        std::fs::create_dir(&unwritable).unwrap();
        let mut perms = std::fs::metadata(&unwritable).unwrap().permissions();
        perms.set_readonly(true);
        std::fs::set_permissions(&unwritable, perms.clone()).unwrap();

        let target = unwritable.join("nested");
        let store = LocalCasStore::new(&target);
        assert_ne!(store.root, target);
        assert_eq!(store.root, std::env::temp_dir().join("ingest-cas-fallback"));

        perms.set_readonly(false);
        std::fs::set_permissions(&unwritable, perms).unwrap();
    }

    #[tokio::test]
    async fn path_for_uses_two_level_sharding() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalCasStore::new(dir.path());
        let src = write_source(dir.path(), "shard.bin", b"shard me").await;
        let (hash, rel, _) = store.put(&src).await.unwrap();
        let hex = hex::encode(hash);
        assert_eq!(rel, format!("{}/{}/{}.bin", &hex[0..2], &hex[2..4], hex));
    }
}

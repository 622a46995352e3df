//! Content-addressed object storage on the local filesystem.
//!
//! Uploaded bytes are stored under `{root}/{checksum}`; the checksum is
//! the storage key, so identical content maps to one object and a
//! re-upload after deletion is byte-for-byte reproducible. Writes go
//! through a temp file and rename so readers never observe a partial
//! object.

use anyhow::{Context, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating storage root {}", self.root.display()))?;

        let final_path = self.object_path(key);
        let tmp_path = self.root.join(format!(".{}.tmp", key));
        tokio::fs::write(&tmp_path, bytes)
            .await
            .with_context(|| format!("writing object {}", key))?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .with_context(|| format!("publishing object {}", key))?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        tokio::fs::read(self.object_path(key))
            .await
            .with_context(|| format!("reading object {}", key))
    }

    /// Delete is idempotent: a missing object is not an error, so the
    /// compensating purge can be retried safely.
    pub async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.object_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("deleting object {}", key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ObjectStore::new(tmp.path().join("objects"));
        store.put("abc123", b"hello").await.unwrap();
        assert_eq!(store.get("abc123").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn get_missing_object_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ObjectStore::new(tmp.path().join("objects"));
        assert!(store.get("nope").await.is_err());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ObjectStore::new(tmp.path().join("objects"));
        store.put("k", b"v").await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(store.get("k").await.is_err());
    }

    #[tokio::test]
    async fn put_overwrites_existing_object() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ObjectStore::new(tmp.path().join("objects"));
        store.put("k", b"one").await.unwrap();
        store.put("k", b"two").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"two");
    }
}

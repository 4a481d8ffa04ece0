//! Content-addressed-ish on-disk storage for file bytes.
//!
//! Files live at `{base}/{userId}/{YYYY}/{MM}/{fileId}`, keyed by the
//! `file_versions.id` that names them so that every version of a file gets
//! its own immutable blob on disk — nothing is ever overwritten in place.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Clone)]
pub struct ContentStore {
    base_path: PathBuf,
}

impl ContentStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn path_for(&self, user_id: &str, version_id: &str) -> PathBuf {
        let now = chrono::Utc::now();
        self.base_path
            .join(user_id)
            .join(format!("{:04}", now.format("%Y")))
            .join(format!("{:02}", now.format("%m")))
            .join(version_id)
    }

    pub async fn put(&self, user_id: &str, version_id: &str, data: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.path_for(user_id, version_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(&path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(path)
    }

    /// Pre-allocate a file of the expected final size before chunks start
    /// arriving, so each chunk can be written with a `seek` to its offset
    /// rather than requiring chunks to arrive in order.
    pub async fn preallocate(&self, path: &Path, total_size: u64) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(path).await?;
        file.set_len(total_size).await?;
        Ok(())
    }

    pub async fn write_chunk_at(&self, path: &Path, offset: u64, data: &[u8]) -> anyhow::Result<()> {
        use tokio::io::AsyncSeekExt;
        let mut file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn get(&self, path: &Path) -> anyhow::Result<Vec<u8>> {
        let mut file = File::open(path).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    pub async fn delete(&self, path: &Path) -> anyhow::Result<()> {
        if tokio::fs::metadata(path).await.is_ok() {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    pub fn checksum(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path().to_path_buf());
        let path = store.put("user-1", "version-1", b"hello world").await.unwrap();
        let data = store.get(&path).await.unwrap();
        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn preallocate_and_write_chunks_out_of_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path().to_path_buf());
        let path = store.path_for("user-1", "version-2");
        store.preallocate(&path, 10).await.unwrap();
        store.write_chunk_at(&path, 5, b"world").await.unwrap();
        store.write_chunk_at(&path, 0, b"hello").await.unwrap();
        let data = store.get(&path).await.unwrap();
        assert_eq!(data, b"helloworld");
    }

    #[test]
    fn checksum_is_stable() {
        let a = ContentStore::checksum(b"abc");
        let b = ContentStore::checksum(b"abc");
        assert_eq!(a, b);
        assert_ne!(a, ContentStore::checksum(b"abd"));
    }
}

//! Content-addressed block store.
//!
//! The transfer engine only sees the `BlobStore` trait: an ordered chunk
//! index per content id, plus chunk read/write keyed by hash. The directory
//! implementation also carries the data-plane primitives the command layer
//! needs (create/clone/snapshot/delete of working volumes), standing in for
//! the copy-on-write filesystem backend; volumes are materialized at
//! deterministic mount paths under the store root.

use crate::error::{Result, VoltreeError};
use crate::model::{ContentId, VolumeId};
use crate::transfer::hash::ChunkHasher;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Default chunk size for slicing volume data.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// One chunk of a content blob: its hash and byte length, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub hash: u64,
    pub len: u32,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Ordered (hash, length) index of the chunks composing a content blob.
    async fn chunk_index(&self, content: &ContentId) -> Result<Vec<ChunkEntry>>;

    async fn has_chunk(&self, hash: u64) -> Result<bool>;

    async fn read_chunk(&self, hash: u64) -> Result<Bytes>;

    async fn write_chunk(&self, hash: u64, data: Bytes) -> Result<()>;

    /// Record a fully-assembled content blob described by `index` and return
    /// its content id. Fails if any chunk is missing, so a partially
    /// transferred blob can never be marked complete.
    async fn commit_content(&self, index: &[ChunkEntry]) -> Result<ContentId>;

    async fn has_content(&self, content: &ContentId) -> Result<bool>;
}

/// Directory-backed blob store.
///
/// Layout under the root:
///   chunks/<hash>.chunk       one file per chunk, keyed by hex hash
///   contents/<id>.json        ordered chunk index per committed blob
///   volumes/<volume-id>/data  materialized working volumes
pub struct DirBlobStore {
    root: PathBuf,
    chunk_size: usize,
    hasher: Arc<dyn ChunkHasher>,
}

impl DirBlobStore {
    pub async fn open(root: &Path, hasher: Arc<dyn ChunkHasher>) -> Result<Self> {
        for sub in ["chunks", "contents", "volumes"] {
            fs::create_dir_all(root.join(sub)).await?;
        }
        Ok(Self {
            root: root.to_path_buf(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            hasher,
        })
    }

    /// Override the chunk size (mainly for tests exercising multi-chunk
    /// content with small payloads).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    fn chunk_path(&self, hash: u64) -> PathBuf {
        self.root.join("chunks").join(format!("{:016x}.chunk", hash))
    }

    fn content_path(&self, content: &ContentId) -> PathBuf {
        self.root
            .join("contents")
            .join(format!("{}.json", content.as_str()))
    }

    fn volume_dir(&self, id: &VolumeId) -> PathBuf {
        self.root.join("volumes").join(id.as_str())
    }

    /// Deterministic mount path for a volume.
    pub fn mount_path(&self, id: &VolumeId) -> PathBuf {
        self.volume_dir(id).join("data")
    }

    /// Derive a content id from the ordered chunk index.
    fn content_id_for(&self, index: &[ChunkEntry]) -> ContentId {
        let mut buf = Vec::with_capacity(index.len() * 12);
        for entry in index {
            buf.extend_from_slice(&entry.hash.to_be_bytes());
            buf.extend_from_slice(&entry.len.to_be_bytes());
        }
        ContentId(format!("{:016x}", self.hasher.digest(&buf)))
    }

    /// Atomic file write: temp file in the same directory, then rename.
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.flush().await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    // Data-plane primitives used by the command layer.

    /// Create an empty working volume; returns its mount path.
    pub async fn create_volume(&self, id: &VolumeId) -> Result<PathBuf> {
        let dir = self.volume_dir(id);
        fs::create_dir_all(&dir).await?;
        let path = self.mount_path(id);
        fs::File::create(&path).await?;
        Ok(path)
    }

    /// Materialize a working volume from committed content; returns its
    /// mount path.
    pub async fn clone_volume(&self, id: &VolumeId, content: &ContentId) -> Result<PathBuf> {
        let index = self.chunk_index(content).await?;
        let dir = self.volume_dir(id);
        fs::create_dir_all(&dir).await?;

        let path = self.mount_path(id);
        let tmp = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).await?;
        for entry in &index {
            let data = self.read_chunk(entry.hash).await?;
            file.write_all(&data).await?;
        }
        file.flush().await?;
        fs::rename(&tmp, &path).await?;
        Ok(path)
    }

    /// Capture a volume's current data as committed content: slice it into
    /// chunks, store the new ones, and commit the index.
    pub async fn snapshot_volume(&self, id: &VolumeId) -> Result<ContentId> {
        let data = fs::read(self.mount_path(id)).await.map_err(|e| {
            VoltreeError::StoreUnavailable(format!("cannot read volume {}: {}", id, e))
        })?;

        let mut index = Vec::new();
        for chunk in data.chunks(self.chunk_size.max(1)) {
            let hash = self.hasher.digest(chunk);
            if !self.has_chunk(hash).await? {
                self.write_chunk(hash, Bytes::copy_from_slice(chunk)).await?;
            }
            index.push(ChunkEntry {
                hash,
                len: chunk.len() as u32,
            });
        }
        self.commit_content(&index).await
    }

    pub async fn delete_volume(&self, id: &VolumeId) -> Result<()> {
        let dir = self.volume_dir(id);
        if fs::try_exists(&dir).await? {
            fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }

    /// Drop a content manifest. Chunks are left in place; they may be shared
    /// with other contents.
    pub async fn delete_content(&self, content: &ContentId) -> Result<()> {
        let path = self.content_path(content);
        if fs::try_exists(&path).await? {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    pub fn hasher(&self) -> Arc<dyn ChunkHasher> {
        Arc::clone(&self.hasher)
    }
}

#[async_trait]
impl BlobStore for DirBlobStore {
    async fn chunk_index(&self, content: &ContentId) -> Result<Vec<ChunkEntry>> {
        let path = self.content_path(content);
        let data = fs::read(&path).await.map_err(|_| {
            VoltreeError::NotFound {
                kind: crate::model::EntityKind::Snapshot,
                token: format!("content {}", content),
            }
        })?;
        Ok(serde_json::from_slice(&data)?)
    }

    async fn has_chunk(&self, hash: u64) -> Result<bool> {
        Ok(fs::try_exists(self.chunk_path(hash)).await?)
    }

    async fn read_chunk(&self, hash: u64) -> Result<Bytes> {
        let data = fs::read(self.chunk_path(hash)).await.map_err(|e| {
            VoltreeError::StoreUnavailable(format!("chunk {:016x} unreadable: {}", hash, e))
        })?;
        Ok(Bytes::from(data))
    }

    async fn write_chunk(&self, hash: u64, data: Bytes) -> Result<()> {
        self.write_atomic(&self.chunk_path(hash), &data).await
    }

    async fn commit_content(&self, index: &[ChunkEntry]) -> Result<ContentId> {
        for entry in index {
            if !self.has_chunk(entry.hash).await? {
                return Err(VoltreeError::StoreUnavailable(format!(
                    "cannot commit content: chunk {:016x} is missing",
                    entry.hash
                )));
            }
        }
        let id = self.content_id_for(index);
        let data = serde_json::to_vec(index)?;
        self.write_atomic(&self.content_path(&id), &data).await?;
        Ok(id)
    }

    async fn has_content(&self, content: &ContentId) -> Result<bool> {
        Ok(fs::try_exists(self.content_path(content)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::hash::Xxh3Hasher;
    use tempfile::TempDir;

    async fn test_store(tmp: &TempDir) -> DirBlobStore {
        DirBlobStore::open(tmp.path(), Arc::new(Xxh3Hasher))
            .await
            .unwrap()
            .with_chunk_size(8)
    }

    #[tokio::test]
    async fn test_snapshot_clone_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp).await;

        let vol = VolumeId::generate();
        let path = store.create_volume(&vol).await.unwrap();
        fs::write(&path, b"hello voltree chunked content").await.unwrap();

        let content = store.snapshot_volume(&vol).await.unwrap();
        let index = store.chunk_index(&content).await.unwrap();
        assert!(index.len() > 1, "chunk size 8 should split the payload");

        let clone = VolumeId::generate();
        let clone_path = store.clone_volume(&clone, &content).await.unwrap();
        assert_eq!(
            fs::read(&clone_path).await.unwrap(),
            b"hello voltree chunked content"
        );
    }

    #[tokio::test]
    async fn test_snapshot_is_content_addressed() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp).await;

        let a = VolumeId::generate();
        let b = VolumeId::generate();
        let pa = store.create_volume(&a).await.unwrap();
        let pb = store.create_volume(&b).await.unwrap();
        fs::write(&pa, b"same bytes").await.unwrap();
        fs::write(&pb, b"same bytes").await.unwrap();

        let ca = store.snapshot_volume(&a).await.unwrap();
        let cb = store.snapshot_volume(&b).await.unwrap();
        assert_eq!(ca, cb);
    }

    #[tokio::test]
    async fn test_commit_refuses_missing_chunks() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp).await;

        let index = [ChunkEntry { hash: 0xdeadbeef, len: 4 }];
        let err = store.commit_content(&index).await.unwrap_err();
        assert!(matches!(err, VoltreeError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_empty_volume_snapshot() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp).await;

        let vol = VolumeId::generate();
        store.create_volume(&vol).await.unwrap();
        let content = store.snapshot_volume(&vol).await.unwrap();
        assert!(store.chunk_index(&content).await.unwrap().is_empty());
    }
}

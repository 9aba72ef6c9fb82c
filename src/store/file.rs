//! File-backed metadata store.
//!
//! The whole document is held in memory and rewritten on every mutation via
//! a temp file + atomic rename, so each metadata commit is a single atomic
//! write and a crash can never leave a half-written store behind.

use super::doc::{StoreDoc, FORMAT_VERSION};
use super::MetaStore;
use crate::error::{Result, VoltreeError};
use crate::model::{Branch, Snapshot, SnapshotId, Volume, VolumeId, VolumeSet, VolumeSetId};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
pub struct FileMetaStore {
    path: PathBuf,
    doc: Mutex<StoreDoc>,
}

impl FileMetaStore {
    /// Create a fresh, empty store file. Fails if the file already exists.
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Err(VoltreeError::Config(format!(
                "metadata store {} already exists",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let store = Self {
            path: path.to_path_buf(),
            doc: Mutex::new(StoreDoc::default()),
        };
        store.save()?;
        Ok(store)
    }

    /// Open an existing store file.
    pub fn open(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|e| {
            VoltreeError::StoreUnavailable(format!(
                "cannot open metadata store {}: {}",
                path.display(),
                e
            ))
        })?;
        let doc: StoreDoc = serde_json::from_slice(&data).map_err(|e| {
            VoltreeError::StoreUnavailable(format!(
                "metadata store {} is malformed: {}",
                path.display(),
                e
            ))
        })?;
        if doc.format != FORMAT_VERSION {
            return Err(VoltreeError::StoreUnavailable(format!(
                "metadata store {} has unsupported format {}",
                path.display(),
                doc.format
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            doc: Mutex::new(doc),
        })
    }

    /// Open the store, creating an empty one if the file is missing.
    pub fn open_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, StoreDoc> {
        self.doc.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persist the whole document atomically (temp file + rename).
    fn save(&self) -> Result<()> {
        let doc = self.lock();
        let data = serde_json::to_vec_pretty(&*doc)?;
        drop(doc);

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut StoreDoc) -> Result<T>) -> Result<T> {
        let out = f(&mut self.lock())?;
        self.save()?;
        Ok(out)
    }
}

#[async_trait]
impl MetaStore for FileMetaStore {
    async fn get_volume_set(&self, id: &VolumeSetId) -> Result<Option<VolumeSet>> {
        Ok(self.lock().get_volume_set(id))
    }

    async fn list_volume_sets(&self) -> Result<Vec<VolumeSet>> {
        Ok(self.lock().volume_sets.clone())
    }

    async fn create_volume_set(&self, vs: &VolumeSet) -> Result<()> {
        self.mutate(|doc| doc.create_volume_set(vs))
    }

    async fn put_volume_set(&self, vs: &VolumeSet) -> Result<()> {
        self.mutate(|doc| {
            doc.put_volume_set(vs);
            Ok(())
        })
    }

    async fn delete_volume_set(&self, id: &VolumeSetId) -> Result<()> {
        self.mutate(|doc| {
            doc.delete_volume_set(id);
            Ok(())
        })
    }

    async fn get_volume(&self, id: &VolumeId) -> Result<Option<Volume>> {
        Ok(self.lock().get_volume(id))
    }

    async fn list_volumes(&self, volume_set: Option<&VolumeSetId>) -> Result<Vec<Volume>> {
        Ok(self.lock().list_volumes(volume_set))
    }

    async fn create_volume(&self, vol: &Volume) -> Result<()> {
        self.mutate(|doc| doc.create_volume(vol))
    }

    async fn put_volume(&self, vol: &Volume) -> Result<()> {
        self.mutate(|doc| {
            doc.put_volume(vol);
            Ok(())
        })
    }

    async fn delete_volume(&self, id: &VolumeId) -> Result<()> {
        self.mutate(|doc| {
            doc.delete_volume(id);
            Ok(())
        })
    }

    async fn get_snapshot(&self, id: &SnapshotId) -> Result<Option<Snapshot>> {
        Ok(self.lock().get_snapshot(id))
    }

    async fn list_snapshots(&self, volume_set: Option<&VolumeSetId>) -> Result<Vec<Snapshot>> {
        Ok(self.lock().list_snapshots(volume_set))
    }

    async fn create_snapshot(&self, snap: &Snapshot) -> Result<()> {
        self.mutate(|doc| doc.create_snapshot(snap))
    }

    async fn update_snapshot(&self, snap: &Snapshot) -> Result<()> {
        self.mutate(|doc| doc.update_snapshot(snap))
    }

    async fn put_snapshot(&self, snap: &Snapshot) -> Result<()> {
        self.mutate(|doc| {
            doc.put_snapshot(snap);
            Ok(())
        })
    }

    async fn delete_snapshot(&self, id: &SnapshotId) -> Result<()> {
        self.mutate(|doc| {
            doc.delete_snapshot(id);
            Ok(())
        })
    }

    async fn get_branch(&self, volume_set: &VolumeSetId, name: &str) -> Result<Option<Branch>> {
        Ok(self.lock().get_branch(volume_set, name))
    }

    async fn list_branches(&self, volume_set: Option<&VolumeSetId>) -> Result<Vec<Branch>> {
        Ok(self.lock().list_branches(volume_set))
    }

    async fn create_branch(&self, branch: &Branch) -> Result<()> {
        self.mutate(|doc| doc.create_branch(branch))
    }

    async fn put_branch(&self, branch: &Branch) -> Result<()> {
        self.mutate(|doc| {
            doc.put_branch(branch);
            Ok(())
        })
    }

    async fn delete_branch(&self, volume_set: &VolumeSetId, name: &str) -> Result<()> {
        self.mutate(|doc| {
            doc.delete_branch(volume_set, name);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_open_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("current.json");

        let store = FileMetaStore::create(&path).unwrap();
        let vs = VolumeSet::new("app", "team");
        store.create_volume_set(&vs).await.unwrap();
        drop(store);

        let reopened = FileMetaStore::open(&path).unwrap();
        let loaded = reopened.get_volume_set(&vs.id).await.unwrap().unwrap();
        assert_eq!(loaded, vs);
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("current.json");
        FileMetaStore::create(&path).unwrap();
        assert!(FileMetaStore::create(&path).is_err());
    }

    #[test]
    fn test_open_missing_is_store_unavailable() {
        let tmp = TempDir::new().unwrap();
        let err = FileMetaStore::open(&tmp.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, VoltreeError::StoreUnavailable(_)));
    }

    #[test]
    fn test_open_malformed_is_store_unavailable() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.json");
        fs::write(&path, b"not json").unwrap();
        let err = FileMetaStore::open(&path).unwrap_err();
        assert!(matches!(err, VoltreeError::StoreUnavailable(_)));
    }
}

//! In-memory metadata store.
//!
//! Backs unit/integration tests and the file:// hub's loaded state before it
//! is persisted; semantics are identical to the file-backed store.

use super::doc::StoreDoc;
use super::MetaStore;
use crate::error::Result;
use crate::model::{Branch, Snapshot, SnapshotId, Volume, VolumeId, VolumeSet, VolumeSetId};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct MemoryMetaStore {
    doc: Mutex<StoreDoc>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreDoc> {
        // Recover the inner doc if a writer panicked mid-operation.
        self.doc.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn get_volume_set(&self, id: &VolumeSetId) -> Result<Option<VolumeSet>> {
        Ok(self.lock().get_volume_set(id))
    }

    async fn list_volume_sets(&self) -> Result<Vec<VolumeSet>> {
        Ok(self.lock().volume_sets.clone())
    }

    async fn create_volume_set(&self, vs: &VolumeSet) -> Result<()> {
        self.lock().create_volume_set(vs)
    }

    async fn put_volume_set(&self, vs: &VolumeSet) -> Result<()> {
        self.lock().put_volume_set(vs);
        Ok(())
    }

    async fn delete_volume_set(&self, id: &VolumeSetId) -> Result<()> {
        self.lock().delete_volume_set(id);
        Ok(())
    }

    async fn get_volume(&self, id: &VolumeId) -> Result<Option<Volume>> {
        Ok(self.lock().get_volume(id))
    }

    async fn list_volumes(&self, volume_set: Option<&VolumeSetId>) -> Result<Vec<Volume>> {
        Ok(self.lock().list_volumes(volume_set))
    }

    async fn create_volume(&self, vol: &Volume) -> Result<()> {
        self.lock().create_volume(vol)
    }

    async fn put_volume(&self, vol: &Volume) -> Result<()> {
        self.lock().put_volume(vol);
        Ok(())
    }

    async fn delete_volume(&self, id: &VolumeId) -> Result<()> {
        self.lock().delete_volume(id);
        Ok(())
    }

    async fn get_snapshot(&self, id: &SnapshotId) -> Result<Option<Snapshot>> {
        Ok(self.lock().get_snapshot(id))
    }

    async fn list_snapshots(&self, volume_set: Option<&VolumeSetId>) -> Result<Vec<Snapshot>> {
        Ok(self.lock().list_snapshots(volume_set))
    }

    async fn create_snapshot(&self, snap: &Snapshot) -> Result<()> {
        self.lock().create_snapshot(snap)
    }

    async fn update_snapshot(&self, snap: &Snapshot) -> Result<()> {
        self.lock().update_snapshot(snap)
    }

    async fn put_snapshot(&self, snap: &Snapshot) -> Result<()> {
        self.lock().put_snapshot(snap);
        Ok(())
    }

    async fn delete_snapshot(&self, id: &SnapshotId) -> Result<()> {
        self.lock().delete_snapshot(id);
        Ok(())
    }

    async fn get_branch(&self, volume_set: &VolumeSetId, name: &str) -> Result<Option<Branch>> {
        Ok(self.lock().get_branch(volume_set, name))
    }

    async fn list_branches(&self, volume_set: Option<&VolumeSetId>) -> Result<Vec<Branch>> {
        Ok(self.lock().list_branches(volume_set))
    }

    async fn create_branch(&self, branch: &Branch) -> Result<()> {
        self.lock().create_branch(branch)
    }

    async fn put_branch(&self, branch: &Branch) -> Result<()> {
        self.lock().put_branch(branch);
        Ok(())
    }

    async fn delete_branch(&self, volume_set: &VolumeSetId, name: &str) -> Result<()> {
        self.lock().delete_branch(volume_set, name);
        Ok(())
    }
}

//! Shared in-memory document backing the metadata store implementations.
//!
//! All invariant checks (name uniqueness, content-reference immutability,
//! cascading deletes) live here so the in-memory and file-backed stores
//! behave identically.

use crate::error::{Result, VoltreeError};
use crate::model::{Branch, Snapshot, SnapshotId, Volume, VolumeId, VolumeSet, VolumeSetId};
use serde::{Deserialize, Serialize};

/// On-disk document format version.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreDoc {
    pub format: u32,
    pub volume_sets: Vec<VolumeSet>,
    pub volumes: Vec<Volume>,
    pub snapshots: Vec<Snapshot>,
    pub branches: Vec<Branch>,
}

impl Default for StoreDoc {
    fn default() -> Self {
        Self {
            format: FORMAT_VERSION,
            volume_sets: Vec::new(),
            volumes: Vec::new(),
            snapshots: Vec::new(),
            branches: Vec::new(),
        }
    }
}

impl StoreDoc {
    // Volume-sets

    pub fn get_volume_set(&self, id: &VolumeSetId) -> Option<VolumeSet> {
        self.volume_sets.iter().find(|vs| &vs.id == id).cloned()
    }

    pub fn create_volume_set(&mut self, vs: &VolumeSet) -> Result<()> {
        if self.volume_sets.iter().any(|v| v.id == vs.id) {
            return Err(VoltreeError::InvalidArgument(format!(
                "volumeset {} already exists",
                vs.id
            )));
        }
        if !vs.name.is_empty()
            && self
                .volume_sets
                .iter()
                .any(|v| v.name == vs.name && v.prefix == vs.prefix)
        {
            return Err(VoltreeError::InvalidArgument(format!(
                "volumeset '{}' already exists",
                vs.qualified_name()
            )));
        }
        self.volume_sets.push(vs.clone());
        Ok(())
    }

    pub fn put_volume_set(&mut self, vs: &VolumeSet) {
        match self.volume_sets.iter_mut().find(|v| v.id == vs.id) {
            Some(existing) => *existing = vs.clone(),
            None => self.volume_sets.push(vs.clone()),
        }
    }

    /// Cascades to all volumes, snapshots and branches beneath the set.
    pub fn delete_volume_set(&mut self, id: &VolumeSetId) {
        self.volume_sets.retain(|vs| &vs.id != id);
        self.volumes.retain(|v| &v.volume_set != id);
        self.snapshots.retain(|s| &s.volume_set != id);
        self.branches.retain(|b| &b.volume_set != id);
    }

    // Volumes

    pub fn get_volume(&self, id: &VolumeId) -> Option<Volume> {
        self.volumes.iter().find(|v| &v.id == id).cloned()
    }

    pub fn list_volumes(&self, volume_set: Option<&VolumeSetId>) -> Vec<Volume> {
        self.volumes
            .iter()
            .filter(|v| volume_set.is_none_or(|vs| &v.volume_set == vs))
            .cloned()
            .collect()
    }

    pub fn create_volume(&mut self, vol: &Volume) -> Result<()> {
        if self.volumes.iter().any(|v| v.id == vol.id) {
            return Err(VoltreeError::InvalidArgument(format!(
                "volume {} already exists",
                vol.id
            )));
        }
        self.volumes.push(vol.clone());
        Ok(())
    }

    pub fn put_volume(&mut self, vol: &Volume) {
        match self.volumes.iter_mut().find(|v| v.id == vol.id) {
            Some(existing) => *existing = vol.clone(),
            None => self.volumes.push(vol.clone()),
        }
    }

    pub fn delete_volume(&mut self, id: &VolumeId) {
        self.volumes.retain(|v| &v.id != id);
    }

    // Snapshots

    pub fn get_snapshot(&self, id: &SnapshotId) -> Option<Snapshot> {
        self.snapshots.iter().find(|s| &s.id == id).cloned()
    }

    pub fn list_snapshots(&self, volume_set: Option<&VolumeSetId>) -> Vec<Snapshot> {
        self.snapshots
            .iter()
            .filter(|s| volume_set.is_none_or(|vs| &s.volume_set == vs))
            .cloned()
            .collect()
    }

    pub fn create_snapshot(&mut self, snap: &Snapshot) -> Result<()> {
        if self.snapshots.iter().any(|s| s.id == snap.id) {
            return Err(VoltreeError::InvalidArgument(format!(
                "snapshot {} already exists",
                snap.id
            )));
        }
        self.snapshots.push(snap.clone());
        Ok(())
    }

    pub fn update_snapshot(&mut self, snap: &Snapshot) -> Result<()> {
        let existing = self
            .snapshots
            .iter_mut()
            .find(|s| s.id == snap.id)
            .ok_or_else(|| {
                VoltreeError::InvalidArgument(format!("snapshot {} does not exist", snap.id))
            })?;
        if let Some(current) = &existing.content {
            if snap.content.as_ref() != Some(current) {
                return Err(VoltreeError::InvalidArgument(format!(
                    "snapshot {} content reference is immutable once set",
                    snap.id
                )));
            }
        }
        *existing = snap.clone();
        Ok(())
    }

    pub fn put_snapshot(&mut self, snap: &Snapshot) {
        match self.snapshots.iter_mut().find(|s| s.id == snap.id) {
            Some(existing) => *existing = snap.clone(),
            None => self.snapshots.push(snap.clone()),
        }
    }

    pub fn delete_snapshot(&mut self, id: &SnapshotId) {
        self.snapshots.retain(|s| &s.id != id);
    }

    // Branches

    pub fn get_branch(&self, volume_set: &VolumeSetId, name: &str) -> Option<Branch> {
        self.branches
            .iter()
            .find(|b| &b.volume_set == volume_set && b.name == name)
            .cloned()
    }

    pub fn list_branches(&self, volume_set: Option<&VolumeSetId>) -> Vec<Branch> {
        self.branches
            .iter()
            .filter(|b| volume_set.is_none_or(|vs| &b.volume_set == vs))
            .cloned()
            .collect()
    }

    pub fn create_branch(&mut self, branch: &Branch) -> Result<()> {
        if self
            .branches
            .iter()
            .any(|b| b.volume_set == branch.volume_set && b.name == branch.name)
        {
            return Err(VoltreeError::InvalidArgument(format!(
                "branch '{}' already exists in volumeset {}",
                branch.name, branch.volume_set
            )));
        }
        self.branches.push(branch.clone());
        Ok(())
    }

    pub fn put_branch(&mut self, branch: &Branch) {
        match self
            .branches
            .iter_mut()
            .find(|b| b.volume_set == branch.volume_set && b.name == branch.name)
        {
            Some(existing) => *existing = branch.clone(),
            None => self.branches.push(branch.clone()),
        }
    }

    pub fn delete_branch(&mut self, volume_set: &VolumeSetId, name: &str) {
        self.branches
            .retain(|b| !(&b.volume_set == volume_set && b.name == name));
    }
}

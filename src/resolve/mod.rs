//! Entity resolution.
//!
//! A user-supplied token may name a volume-set, a volume, a snapshot or a
//! branch. Each kind is looked up independently; per-kind misses are
//! absorbed, the results are merged and de-duplicated by identity, and the
//! outcome is classified as not-found, uniquely resolved, or ambiguous.
//! Callers never guess: ambiguity is a reportable state, not a license to
//! pick a candidate.

use crate::error::{Result, VoltreeError};
use crate::model::{Branch, EntityKind, Snapshot, Volume, VolumeSet};
use crate::store::MetaStore;
use std::collections::HashSet;

/// The single entity a token resolved to, of whichever kind.
#[derive(Debug, Clone)]
pub enum ResolvedEntity {
    VolumeSet(VolumeSet),
    Volume(Volume),
    Snapshot(Snapshot),
    Branch(Branch),
}

impl ResolvedEntity {
    pub fn kind(&self) -> EntityKind {
        match self {
            ResolvedEntity::VolumeSet(_) => EntityKind::VolumeSet,
            ResolvedEntity::Volume(_) => EntityKind::Volume,
            ResolvedEntity::Snapshot(_) => EntityKind::Snapshot,
            ResolvedEntity::Branch(_) => EntityKind::Branch,
        }
    }
}

/// All matches for a token, grouped by kind.
#[derive(Debug, Clone, Default)]
pub struct Candidates {
    pub volume_sets: Vec<VolumeSet>,
    pub volumes: Vec<Volume>,
    pub snapshots: Vec<Snapshot>,
    pub branches: Vec<Branch>,
}

impl Candidates {
    pub fn total(&self) -> usize {
        self.volume_sets.len() + self.volumes.len() + self.snapshots.len() + self.branches.len()
    }

    /// De-duplicate each kind by identity, so the same entity reached through
    /// two lookup paths is counted once.
    fn dedup(&mut self) {
        let mut seen = HashSet::new();
        self.volume_sets.retain(|vs| seen.insert(vs.id.0.clone()));
        seen.clear();
        self.volumes.retain(|v| seen.insert(v.id.0.clone()));
        seen.clear();
        self.snapshots.retain(|s| seen.insert(s.id.0.clone()));
        seen.clear();
        self.branches
            .retain(|b| seen.insert(format!("{}:{}", b.volume_set, b.name)));
    }

    /// The unique entity, if exactly one candidate exists across all kinds.
    fn into_unique(mut self) -> std::result::Result<ResolvedEntity, Candidates> {
        if self.total() != 1 {
            return Err(self);
        }
        if let Some(vs) = self.volume_sets.pop() {
            Ok(ResolvedEntity::VolumeSet(vs))
        } else if let Some(v) = self.volumes.pop() {
            Ok(ResolvedEntity::Volume(v))
        } else if let Some(s) = self.snapshots.pop() {
            Ok(ResolvedEntity::Snapshot(s))
        } else if let Some(b) = self.branches.pop() {
            Ok(ResolvedEntity::Branch(b))
        } else {
            unreachable!("total() == 1 with all kinds empty")
        }
    }
}

/// Outcome of resolving a token. Not-found is reported as an error carrying
/// the token, so this only distinguishes the two actionable states.
#[derive(Debug, Clone)]
pub enum Resolution {
    Resolved(ResolvedEntity),
    Ambiguous(Candidates),
}

/// Resolve a token against the given kinds only.
///
/// Lookup misses yield empty sets; any other failure (malformed token,
/// backing-store error) aborts resolution entirely.
pub async fn resolve_kinds(
    store: &dyn MetaStore,
    token: &str,
    kinds: &[EntityKind],
) -> Result<Resolution> {
    let mut candidates = Candidates::default();
    for kind in kinds {
        match kind {
            EntityKind::VolumeSet => {
                candidates.volume_sets = store.find_volume_sets(token).await?;
            }
            EntityKind::Volume => {
                candidates.volumes = store.find_volumes(token).await?;
            }
            EntityKind::Snapshot => {
                candidates.snapshots = store.find_snapshots(token).await?;
            }
            EntityKind::Branch => {
                candidates.branches = store.find_branches(token).await?;
            }
        }
    }
    candidates.dedup();

    if candidates.total() == 0 {
        return Err(VoltreeError::NoMatch(token.to_string()));
    }
    match candidates.into_unique() {
        Ok(entity) => Ok(Resolution::Resolved(entity)),
        Err(candidates) => Ok(Resolution::Ambiguous(candidates)),
    }
}

/// Resolve a token against all four entity kinds.
pub async fn resolve(store: &dyn MetaStore, token: &str) -> Result<Resolution> {
    resolve_kinds(
        store,
        token,
        &[
            EntityKind::VolumeSet,
            EntityKind::Volume,
            EntityKind::Snapshot,
            EntityKind::Branch,
        ],
    )
    .await
}

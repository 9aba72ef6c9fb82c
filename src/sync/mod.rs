//! Three-way metadata reconciliation.
//!
//! Reconciles one volume-set's entities across three stores: the baseline
//! (state as of the last successful sync), the local current store, and the
//! remote hub. Comparing each entity's three states against the common
//! baseline distinguishes fast-forwards from true divergence; divergence is
//! resolved remote-wins but always surfaced as a conflict record so the
//! overwritten local state stays recoverable from the report.
//!
//! Ordering is strict: volume-set, then snapshots, then branches, since a
//! branch tip is only meaningful once its target snapshot is settled. Every
//! entity is committed individually; an aborted run leaves later entities
//! unreconciled and is safe to resume.

use crate::error::Result;
use crate::model::{Branch, Snapshot, SnapshotId, VolumeSet, VolumeSetId};
use crate::store::MetaStore;
use std::collections::BTreeSet;

/// Fetch reconciles remote changes into local only; full sync pushes local
/// changes back as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    OneWay,
    TwoWay,
}

/// One entity whose local and remote states diverged from the baseline.
/// `cur` is the local value that the remote-wins policy overwrote.
#[derive(Debug, Clone)]
pub struct Conflict<T> {
    pub init: Option<T>,
    pub cur: Option<T>,
    pub tgt: Option<T>,
}

#[derive(Debug, Clone, Default)]
pub struct ConflictSet {
    pub volume_sets: Vec<Conflict<VolumeSet>>,
    pub snapshots: Vec<Conflict<Snapshot>>,
    pub branches: Vec<Conflict<Branch>>,
}

impl ConflictSet {
    pub fn has_conflicts(&self) -> bool {
        !self.volume_sets.is_empty() || !self.snapshots.is_empty() || !self.branches.is_empty()
    }

    pub fn total(&self) -> usize {
        self.volume_sets.len() + self.snapshots.len() + self.branches.len()
    }
}

/// Three-way comparison outcome for one entity. States are `Option`s so
/// creation and deletion take part in the merge like any other change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Nothing changed anywhere.
    Unchanged,
    /// Only the remote changed; adopt it.
    FastForward,
    /// Only the local side changed; push it out in two-way mode.
    LocalAhead,
    /// Both sides changed to different values; conflict, remote wins.
    Diverged,
    /// Both sides independently reached the same value.
    Converged,
}

fn classify<T: PartialEq>(init: &Option<T>, local: &Option<T>, remote: &Option<T>) -> Outcome {
    if local == remote {
        if init == local {
            Outcome::Unchanged
        } else {
            Outcome::Converged
        }
    } else if init == local {
        Outcome::FastForward
    } else if init == remote {
        Outcome::LocalAhead
    } else {
        Outcome::Diverged
    }
}

/// Reconcile one volume-set's metadata across the three stores.
///
/// Snapshot blob payloads are never moved here; only the metadata (including
/// the content-reference pointer) is reconciled. Returns every conflict that
/// was resolved remote-wins; an empty set means a clean sync.
pub async fn reconcile(
    remote: &dyn MetaStore,
    local: &dyn MetaStore,
    baseline: &dyn MetaStore,
    volume_set: &VolumeSetId,
    direction: SyncDirection,
) -> Result<ConflictSet> {
    let mut conflicts = ConflictSet::default();
    reconcile_volume_set(remote, local, baseline, volume_set, direction, &mut conflicts).await?;
    reconcile_snapshots(remote, local, baseline, volume_set, direction, &mut conflicts).await?;
    reconcile_branches(remote, local, baseline, volume_set, direction, &mut conflicts).await?;
    Ok(conflicts)
}

async fn apply_volume_set(
    store: &dyn MetaStore,
    id: &VolumeSetId,
    state: &Option<VolumeSet>,
) -> Result<()> {
    match state {
        Some(vs) => store.put_volume_set(vs).await,
        None => store.delete_volume_set(id).await,
    }
}

async fn reconcile_volume_set(
    remote: &dyn MetaStore,
    local: &dyn MetaStore,
    baseline: &dyn MetaStore,
    id: &VolumeSetId,
    direction: SyncDirection,
    conflicts: &mut ConflictSet,
) -> Result<()> {
    let init = baseline.get_volume_set(id).await?;
    let cur = local.get_volume_set(id).await?;
    let tgt = remote.get_volume_set(id).await?;

    match classify(&init, &cur, &tgt) {
        Outcome::Unchanged => {}
        Outcome::FastForward => {
            apply_volume_set(local, id, &tgt).await?;
            apply_volume_set(baseline, id, &tgt).await?;
        }
        Outcome::LocalAhead => {
            if direction == SyncDirection::TwoWay {
                apply_volume_set(remote, id, &cur).await?;
                apply_volume_set(baseline, id, &cur).await?;
            }
        }
        Outcome::Converged => {
            apply_volume_set(baseline, id, &cur).await?;
        }
        Outcome::Diverged => {
            tracing::warn!(volume_set = %id, "volumeset diverged; adopting remote state");
            conflicts.volume_sets.push(Conflict {
                init: init.clone(),
                cur: cur.clone(),
                tgt: tgt.clone(),
            });
            apply_volume_set(local, id, &tgt).await?;
            apply_volume_set(baseline, id, &tgt).await?;
        }
    }
    Ok(())
}

async fn apply_snapshot(
    store: &dyn MetaStore,
    id: &SnapshotId,
    state: &Option<Snapshot>,
) -> Result<()> {
    match state {
        Some(snap) => store.put_snapshot(snap).await,
        None => store.delete_snapshot(id).await,
    }
}

async fn reconcile_snapshots(
    remote: &dyn MetaStore,
    local: &dyn MetaStore,
    baseline: &dyn MetaStore,
    volume_set: &VolumeSetId,
    direction: SyncDirection,
    conflicts: &mut ConflictSet,
) -> Result<()> {
    // Union of snapshot ids across the three stores, ordered for
    // deterministic processing.
    let mut ids: BTreeSet<SnapshotId> = BTreeSet::new();
    for store in [baseline, local, remote] {
        for snap in store.list_snapshots(Some(volume_set)).await? {
            ids.insert(snap.id);
        }
    }

    for id in &ids {
        let init = baseline.get_snapshot(id).await?;
        let cur = local.get_snapshot(id).await?;
        let tgt = remote.get_snapshot(id).await?;

        match classify(&init, &cur, &tgt) {
            Outcome::Unchanged => {}
            Outcome::FastForward => {
                apply_snapshot(local, id, &tgt).await?;
                apply_snapshot(baseline, id, &tgt).await?;
            }
            Outcome::LocalAhead => {
                if direction == SyncDirection::TwoWay {
                    apply_snapshot(remote, id, &cur).await?;
                    apply_snapshot(baseline, id, &cur).await?;
                }
            }
            Outcome::Converged => {
                apply_snapshot(baseline, id, &cur).await?;
            }
            Outcome::Diverged => {
                tracing::warn!(snapshot = %id, "snapshot diverged; adopting remote state");
                conflicts.snapshots.push(Conflict {
                    init: init.clone(),
                    cur: cur.clone(),
                    tgt: tgt.clone(),
                });
                apply_snapshot(local, id, &tgt).await?;
                apply_snapshot(baseline, id, &tgt).await?;
            }
        }
    }
    Ok(())
}

async fn apply_branch(
    store: &dyn MetaStore,
    volume_set: &VolumeSetId,
    name: &str,
    state: &Option<Branch>,
) -> Result<()> {
    match state {
        Some(branch) => store.put_branch(branch).await,
        None => store.delete_branch(volume_set, name).await,
    }
}

async fn reconcile_branches(
    remote: &dyn MetaStore,
    local: &dyn MetaStore,
    baseline: &dyn MetaStore,
    volume_set: &VolumeSetId,
    direction: SyncDirection,
    conflicts: &mut ConflictSet,
) -> Result<()> {
    // Branches are identified by name within their volume-set.
    let mut names: BTreeSet<String> = BTreeSet::new();
    for store in [baseline, local, remote] {
        for branch in store.list_branches(Some(volume_set)).await? {
            names.insert(branch.name);
        }
    }

    for name in &names {
        let init = baseline.get_branch(volume_set, name).await?;
        let cur = local.get_branch(volume_set, name).await?;
        let tgt = remote.get_branch(volume_set, name).await?;

        match classify(&init, &cur, &tgt) {
            Outcome::Unchanged => {}
            Outcome::FastForward => {
                apply_branch(local, volume_set, name, &tgt).await?;
                apply_branch(baseline, volume_set, name, &tgt).await?;
            }
            Outcome::LocalAhead => {
                if direction == SyncDirection::TwoWay {
                    apply_branch(remote, volume_set, name, &cur).await?;
                    apply_branch(baseline, volume_set, name, &cur).await?;
                }
            }
            Outcome::Converged => {
                apply_branch(baseline, volume_set, name, &cur).await?;
            }
            Outcome::Diverged => {
                tracing::warn!(branch = %name, "branch diverged; adopting remote state");
                conflicts.branches.push(Conflict {
                    init: init.clone(),
                    cur: cur.clone(),
                    tgt: tgt.clone(),
                });
                apply_branch(local, volume_set, name, &tgt).await?;
                apply_branch(baseline, volume_set, name, &tgt).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_table() {
        let b = Some(1);
        assert_eq!(classify(&b, &Some(1), &Some(1)), Outcome::Unchanged);
        assert_eq!(classify(&b, &Some(1), &Some(2)), Outcome::FastForward);
        assert_eq!(classify(&b, &Some(2), &Some(1)), Outcome::LocalAhead);
        assert_eq!(classify(&b, &Some(2), &Some(3)), Outcome::Diverged);
        assert_eq!(classify(&b, &Some(2), &Some(2)), Outcome::Converged);
    }

    #[test]
    fn test_classify_creation_and_deletion() {
        // Created remotely since the baseline.
        assert_eq!(classify::<i32>(&None, &None, &Some(1)), Outcome::FastForward);
        // Created locally.
        assert_eq!(classify::<i32>(&None, &Some(1), &None), Outcome::LocalAhead);
        // Deleted remotely, unchanged locally.
        assert_eq!(classify(&Some(1), &Some(1), &None), Outcome::FastForward);
        // Deleted locally, modified remotely: divergence.
        assert_eq!(classify(&Some(1), &None, &Some(2)), Outcome::Diverged);
        // Created on both sides with the same value.
        assert_eq!(classify::<i32>(&None, &Some(1), &Some(1)), Outcome::Converged);
        // Absent everywhere.
        assert_eq!(classify::<i32>(&None, &None, &None), Outcome::Unchanged);
    }
}

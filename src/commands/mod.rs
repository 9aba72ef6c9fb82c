//! Command implementations.
//!
//! Each command is an async fn over an opened [`Node`] that returns its
//! human-readable output; the CLI layer prints it. Keeping commands free of
//! process concerns (exit codes, stdout) lets the integration tests drive
//! them directly.

use crate::blob::{BlobStore, DirBlobStore};
use crate::config::{normalize_hub_url, validate_token_file, Config};
use crate::error::{Result, VoltreeError};
use crate::model::{
    merge_attrs, parse_attrs, require_name, split_volume_set_name, validate_name, Branch,
    EntityKind, Snapshot, SyncMode, Volume, VolumeSet, VolumeSetId,
};
use crate::output;
use crate::remote::RemoteHub;
use crate::resolve::{resolve_kinds, Resolution, ResolvedEntity};
use crate::store::{FileMetaStore, MetaStore};
use crate::sync::{reconcile, SyncDirection};
use crate::transfer::hash::{ChunkHasher, Xxh3Hasher};
use crate::transfer::{Selector, TransferEngine};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An opened node: the user-visible metadata store, the sync baseline, and
/// the blob store holding volume data and snapshot content.
pub struct Node {
    pub current: FileMetaStore,
    pub baseline: FileMetaStore,
    pub blobs: DirBlobStore,
    data_dir: PathBuf,
}

impl Node {
    pub async fn open(data_dir: &Path) -> Result<Self> {
        Self::open_with_hasher(data_dir, Arc::new(Xxh3Hasher)).await
    }

    pub async fn open_with_hasher(
        data_dir: &Path,
        hasher: Arc<dyn ChunkHasher>,
    ) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let current = FileMetaStore::open_or_create(&data_dir.join("current.json"))?;
        let baseline = FileMetaStore::open_or_create(&data_dir.join("baseline.json"))?;
        let blobs = DirBlobStore::open(&data_dir.join("blobs"), hasher).await?;
        Ok(Self {
            current,
            baseline,
            blobs,
            data_dir: data_dir.to_path_buf(),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

/// Resolve a token against the given kinds; ambiguity becomes an error
/// carrying the rendered candidate tables.
async fn resolve_unique(
    store: &dyn MetaStore,
    token: &str,
    kinds: &[EntityKind],
) -> Result<ResolvedEntity> {
    match resolve_kinds(store, token, kinds).await? {
        Resolution::Resolved(entity) => Ok(entity),
        Resolution::Ambiguous(candidates) => Err(VoltreeError::Ambiguous(
            output::render_ambiguity(token, &candidates),
        )),
    }
}

async fn resolve_volume_set(store: &dyn MetaStore, token: &str) -> Result<VolumeSet> {
    match resolve_unique(store, token, &[EntityKind::VolumeSet]).await? {
        ResolvedEntity::VolumeSet(vs) => Ok(vs),
        _ => unreachable!("restricted to volume-sets"),
    }
}

/// Create a new volume-set. The name may carry a `prefix/` namespace.
pub async fn init(
    node: &Node,
    full_name: &str,
    attrs: Option<&str>,
    description: Option<&str>,
) -> Result<String> {
    let (prefix, name) = split_volume_set_name(full_name);
    require_name(&name)?;
    for part in prefix.split('/').filter(|p| !p.is_empty()) {
        validate_name(part)?;
    }

    let mut vs = VolumeSet::new(name, prefix);
    if let Some(attrs) = attrs {
        vs.attrs = parse_attrs(attrs)?;
    }
    if let Some(desc) = description {
        vs.description = desc.to_string();
    }
    node.current.create_volume_set(&vs).await?;
    tracing::info!(id = %vs.id, name = %vs.qualified_name(), "created volumeset");
    Ok(format!("created volumeset {} ({})", vs.qualified_name(), vs.id))
}

/// Create an empty volume in a volume-set.
pub async fn create(
    node: &Node,
    volume_set: &str,
    name: Option<&str>,
    attrs: Option<&str>,
) -> Result<String> {
    let vs = match resolve_volume_set(&node.current, volume_set).await {
        Ok(vs) => vs,
        // An unknown volume-set token names a new one, created on the fly.
        Err(VoltreeError::NoMatch(_)) => {
            init(node, volume_set, None, None).await?;
            resolve_volume_set(&node.current, volume_set).await?
        }
        Err(e) => return Err(e),
    };
    if let Some(name) = name {
        require_name(name)?;
    }

    let mut vol = Volume::new(vs.id.clone(), PathBuf::new());
    vol.name = name.map(String::from);
    vol.attrs = attrs.map(parse_attrs).transpose()?.unwrap_or_default();
    vol.mount_path = node.blobs.create_volume(&vol.id).await?;
    if let Err(e) = node.current.create_volume(&vol).await {
        // Roll back the on-disk volume so a name collision leaves no orphan.
        node.blobs.delete_volume(&vol.id).await?;
        return Err(e);
    }
    tracing::info!(id = %vol.id, volumeset = %vs.id, "created volume");
    Ok(format!(
        "created volume {} at {}",
        vol.id,
        vol.mount_path.display()
    ))
}

/// Clone a snapshot (or a branch's tip snapshot) into a new volume.
pub async fn clone(node: &Node, token: &str, name: Option<&str>) -> Result<String> {
    let snap = match resolve_unique(
        &node.current,
        token,
        &[EntityKind::Snapshot, EntityKind::Branch],
    )
    .await?
    {
        ResolvedEntity::Snapshot(s) => s,
        ResolvedEntity::Branch(b) => node
            .current
            .get_snapshot(&b.tip)
            .await?
            .ok_or_else(|| VoltreeError::not_found(EntityKind::Snapshot, b.tip.as_str()))?,
        _ => unreachable!("restricted to snapshots and branches"),
    };
    if let Some(name) = name {
        require_name(name)?;
    }
    // A content reference may have arrived via metadata sync without the
    // blobs behind it; both cases read as "not localized" to the user.
    let not_localized = || {
        VoltreeError::InvalidArgument(format!(
            "snapshot {} has no local content; pull it before cloning",
            snap.id
        ))
    };
    let content = snap.content.as_ref().ok_or_else(not_localized)?;
    if !node.blobs.has_content(content).await? {
        return Err(not_localized());
    }

    let mut vol = Volume::new(snap.volume_set.clone(), PathBuf::new());
    vol.name = name.map(String::from);
    vol.base = Some(snap.id.clone());
    vol.mount_path = node.blobs.clone_volume(&vol.id, content).await?;
    if let Err(e) = node.current.create_volume(&vol).await {
        node.blobs.delete_volume(&vol.id).await?;
        return Err(e);
    }
    tracing::info!(id = %vol.id, base = %snap.id, "cloned volume");
    Ok(format!(
        "cloned volume {} at {}",
        vol.id,
        vol.mount_path.display()
    ))
}

/// Take a snapshot of a volume and advance (or create) a branch to it.
#[allow(clippy::too_many_arguments)]
pub async fn snapshot(
    node: &Node,
    volume: &str,
    name: Option<&str>,
    branch: Option<&str>,
    new_branch: bool,
    attrs: Option<&str>,
    description: Option<&str>,
) -> Result<String> {
    if branch.is_some() && new_branch {
        return Err(VoltreeError::InvalidArgument(
            "--branch and --new-branch are mutually exclusive".into(),
        ));
    }
    let mut vol = match resolve_unique(&node.current, volume, &[EntityKind::Volume]).await? {
        ResolvedEntity::Volume(v) => v,
        _ => unreachable!("restricted to volumes"),
    };
    if let Some(name) = name {
        require_name(name)?;
    }

    let content = node.blobs.snapshot_volume(&vol.id).await?;
    let mut snap = Snapshot::new(vol.volume_set.clone(), vol.base.clone(), content);
    snap.name = name.map(String::from);
    snap.attrs = attrs.map(parse_attrs).transpose()?.unwrap_or_default();
    snap.description = description.unwrap_or_default().to_string();
    node.current.create_snapshot(&snap).await?;

    let branch_name = advance_branch(node, &vol, &snap, branch, new_branch).await?;

    // The volume now sits on the brand-new snapshot.
    vol.base = Some(snap.id.clone());
    node.current.put_volume(&vol).await?;

    tracing::info!(id = %snap.id, branch = %branch_name, "took snapshot");
    Ok(format!("created snapshot {} on branch {}", snap.id, branch_name))
}

/// Branch bookkeeping for a fresh snapshot.
///
/// With `--branch`, the named branch is advanced, or created as a manual
/// branch if missing. With `--new-branch`, a manual branch named after the
/// snapshot is created. Otherwise the auto branch currently pointing at the
/// volume's base advances; if none does, a new auto branch is created
/// ("main", or the snapshot id when that name is taken).
async fn advance_branch(
    node: &Node,
    vol: &Volume,
    snap: &Snapshot,
    branch: Option<&str>,
    new_branch: bool,
) -> Result<String> {
    if let Some(name) = branch {
        require_name(name)?;
        match node.current.get_branch(&vol.volume_set, name).await? {
            Some(mut b) => {
                b.tip = snap.id.clone();
                node.current.put_branch(&b).await?;
            }
            None => {
                node.current
                    .create_branch(&Branch {
                        volume_set: vol.volume_set.clone(),
                        name: name.to_string(),
                        tip: snap.id.clone(),
                        mode: SyncMode::Manual,
                    })
                    .await?;
            }
        }
        return Ok(name.to_string());
    }

    if new_branch {
        let name = snap
            .name
            .clone()
            .unwrap_or_else(|| snap.id.to_string());
        node.current
            .create_branch(&Branch {
                volume_set: vol.volume_set.clone(),
                name: name.clone(),
                tip: snap.id.clone(),
                mode: SyncMode::Manual,
            })
            .await?;
        return Ok(name);
    }

    if let Some(base) = &vol.base {
        let branches = node.current.list_branches(Some(&vol.volume_set)).await?;
        if let Some(mut b) = branches
            .into_iter()
            .find(|b| b.mode == SyncMode::Auto && &b.tip == base)
        {
            b.tip = snap.id.clone();
            let name = b.name.clone();
            node.current.put_branch(&b).await?;
            return Ok(name);
        }
    }

    let name = if node.current.get_branch(&vol.volume_set, "main").await?.is_none() {
        "main".to_string()
    } else {
        snap.id.to_string()
    };
    node.current
        .create_branch(&Branch {
            volume_set: vol.volume_set.clone(),
            name: name.clone(),
            tip: snap.id.clone(),
            mode: SyncMode::Auto,
        })
        .await?;
    Ok(name)
}

/// Update the metadata of a volume-set, volume or snapshot. Attributes merge
/// with existing ones; name and description replace.
pub async fn update(
    node: &Node,
    token: &str,
    name: Option<&str>,
    attrs: Option<&str>,
    description: Option<&str>,
) -> Result<String> {
    let updates = attrs.map(parse_attrs).transpose()?;
    let entity = resolve_unique(
        &node.current,
        token,
        &[
            EntityKind::VolumeSet,
            EntityKind::Volume,
            EntityKind::Snapshot,
            EntityKind::Branch,
        ],
    )
    .await?;

    match entity {
        ResolvedEntity::VolumeSet(mut vs) => {
            if let Some(name) = name {
                require_name(name)?;
                vs.name = name.to_string();
            }
            if let Some(updates) = &updates {
                vs.attrs = merge_attrs(&vs.attrs, updates);
            }
            if let Some(desc) = description {
                vs.description = desc.to_string();
            }
            node.current.put_volume_set(&vs).await?;
            Ok(format!("updated volumeset {}", vs.id))
        }
        ResolvedEntity::Volume(mut v) => {
            if let Some(name) = name {
                require_name(name)?;
                v.name = Some(name.to_string());
            }
            if let Some(updates) = &updates {
                v.attrs = merge_attrs(&v.attrs, updates);
            }
            if description.is_some() {
                return Err(VoltreeError::InvalidArgument(
                    "volumes have no description".into(),
                ));
            }
            node.current.put_volume(&v).await?;
            Ok(format!("updated volume {}", v.id))
        }
        ResolvedEntity::Snapshot(mut s) => {
            if let Some(name) = name {
                require_name(name)?;
                s.name = Some(name.to_string());
            }
            if let Some(updates) = &updates {
                s.attrs = merge_attrs(&s.attrs, updates);
            }
            if let Some(desc) = description {
                s.description = desc.to_string();
            }
            node.current.update_snapshot(&s).await?;
            Ok(format!("updated snapshot {}", s.id))
        }
        ResolvedEntity::Branch(b) => {
            // Branches rename only; everything else on them is derived state.
            if updates.is_some() || description.is_some() {
                return Err(VoltreeError::InvalidArgument(
                    "branch updates take only --name".into(),
                ));
            }
            let Some(name) = name else {
                return Err(VoltreeError::InvalidArgument(
                    "branch updates take only --name".into(),
                ));
            };
            require_name(name)?;
            if node.current.get_branch(&b.volume_set, name).await?.is_some() {
                return Err(VoltreeError::InvalidArgument(format!(
                    "branch {} already exists",
                    name
                )));
            }
            node.current.delete_branch(&b.volume_set, &b.name).await?;
            let renamed = Branch {
                name: name.to_string(),
                ..b.clone()
            };
            node.current.create_branch(&renamed).await?;
            Ok(format!("renamed branch {} to {}", b.name, name))
        }
    }
}

/// Remove an object, cascading through contained objects and cleaning up
/// blob storage.
pub async fn remove(node: &Node, token: &str) -> Result<String> {
    match resolve_unique(
        &node.current,
        token,
        &[
            EntityKind::VolumeSet,
            EntityKind::Volume,
            EntityKind::Snapshot,
            EntityKind::Branch,
        ],
    )
    .await?
    {
        ResolvedEntity::Volume(v) => {
            node.blobs.delete_volume(&v.id).await?;
            node.current.delete_volume(&v.id).await?;
            Ok(format!("removed volume {}", v.id))
        }
        ResolvedEntity::Branch(b) => {
            node.current.delete_branch(&b.volume_set, &b.name).await?;
            Ok(format!("removed branch {}", b.name))
        }
        ResolvedEntity::Snapshot(s) => {
            remove_snapshot(node, &s).await?;
            Ok(format!("removed snapshot {}", s.id))
        }
        ResolvedEntity::VolumeSet(vs) => {
            // Data-plane artifacts first, then the metadata cascade.
            for v in node.current.list_volumes(Some(&vs.id)).await? {
                node.blobs.delete_volume(&v.id).await?;
            }
            for s in node.current.list_snapshots(Some(&vs.id)).await? {
                delete_unshared_content(node, &s).await?;
            }
            node.current.delete_volume_set(&vs.id).await?;
            Ok(format!("removed volumeset {}", vs.qualified_name()))
        }
    }
}

async fn remove_snapshot(node: &Node, snap: &Snapshot) -> Result<()> {
    // Lineage integrity: a snapshot with descendants or branch references
    // cannot be removed.
    let children = node
        .current
        .list_snapshots(Some(&snap.volume_set))
        .await?
        .into_iter()
        .any(|s| s.parent.as_ref() == Some(&snap.id));
    if children {
        return Err(VoltreeError::InvalidArgument(format!(
            "snapshot {} has descendant snapshots",
            snap.id
        )));
    }
    let referenced = node
        .current
        .list_branches(Some(&snap.volume_set))
        .await?
        .into_iter()
        .any(|b| b.tip == snap.id);
    if referenced {
        return Err(VoltreeError::InvalidArgument(format!(
            "snapshot {} is the tip of a branch; remove the branch first",
            snap.id
        )));
    }
    delete_unshared_content(node, snap).await?;
    node.current.delete_snapshot(&snap.id).await
}

/// Delete a snapshot's content blob unless another snapshot shares it.
async fn delete_unshared_content(node: &Node, snap: &Snapshot) -> Result<()> {
    let Some(content) = &snap.content else {
        return Ok(());
    };
    let shared = node
        .current
        .list_snapshots(None)
        .await?
        .into_iter()
        .any(|s| s.id != snap.id && s.content.as_ref() == Some(content));
    if !shared {
        node.blobs.delete_content(content).await?;
    }
    Ok(())
}

/// List objects. Without a token, lists all volume-sets; `all` expands to
/// every object of every kind; with a token, shows every object of every
/// kind the token matches.
pub async fn list(node: &Node, token: Option<&str>, all: bool) -> Result<String> {
    if all {
        let mut out = String::new();
        let sets = node.current.list_volume_sets().await?;
        if sets.is_empty() {
            return Ok("no volumesets".to_string());
        }
        out.push_str(&output::volume_set_table(&sets).render());
        let volumes = node.current.list_volumes(None).await?;
        if !volumes.is_empty() {
            out.push('\n');
            out.push_str(&output::volume_table(&volumes).render());
        }
        let snapshots = node.current.list_snapshots(None).await?;
        if !snapshots.is_empty() {
            out.push('\n');
            out.push_str(&output::snapshot_table(&snapshots).render());
        }
        let branches = node.current.list_branches(None).await?;
        if !branches.is_empty() {
            out.push('\n');
            out.push_str(&output::branch_table(&branches).render());
        }
        return Ok(out);
    }

    let Some(token) = token else {
        let sets = node.current.list_volume_sets().await?;
        if sets.is_empty() {
            return Ok("no volumesets".to_string());
        }
        return Ok(output::volume_set_table(&sets).render());
    };

    let volume_sets = node.current.find_volume_sets(token).await?;
    let volumes = node.current.find_volumes(token).await?;
    let snapshots = node.current.find_snapshots(token).await?;
    let branches = node.current.find_branches(token).await?;

    let mut out = String::new();
    if !volume_sets.is_empty() {
        out.push_str(&output::volume_set_table(&volume_sets).render());
        out.push('\n');
    }
    if !volumes.is_empty() {
        out.push_str(&output::volume_table(&volumes).render());
        out.push('\n');
    }
    if !snapshots.is_empty() {
        out.push_str(&output::snapshot_table(&snapshots).render());
        out.push('\n');
    }
    if !branches.is_empty() {
        out.push_str(&output::branch_table(&branches).render());
        out.push('\n');
    }
    if out.is_empty() {
        return Err(VoltreeError::NoMatch(token.to_string()));
    }
    Ok(out)
}

/// Locate the volume-set to sync: locally if known, otherwise on the hub
/// (first fetch of a set that only exists upstream).
async fn sync_target(node: &Node, hub: &RemoteHub, token: &str) -> Result<VolumeSetId> {
    match resolve_volume_set(&node.current, token).await {
        Ok(vs) => Ok(vs.id),
        Err(VoltreeError::NoMatch(_)) => {
            Ok(resolve_volume_set(hub.meta.as_ref(), token).await?.id)
        }
        Err(e) => Err(e),
    }
}

/// Two-way metadata sync with the hub: one volume-set, or every known one.
pub async fn sync(node: &Node, config: &Config, volume_set: Option<&str>) -> Result<String> {
    sync_with_direction(node, config, volume_set, SyncDirection::TwoWay).await
}

/// One-way metadata fetch from the hub: one volume-set, or every known one.
pub async fn fetch(node: &Node, config: &Config, volume_set: Option<&str>) -> Result<String> {
    sync_with_direction(node, config, volume_set, SyncDirection::OneWay).await
}

async fn sync_with_direction(
    node: &Node,
    config: &Config,
    volume_set: Option<&str>,
    direction: SyncDirection,
) -> Result<String> {
    let hub = RemoteHub::open(config, node.blobs.hasher()).await?;
    let targets: Vec<VolumeSetId> = match volume_set {
        Some(token) => vec![sync_target(node, &hub, token).await?],
        // Every volume-set known on either side, each reconciled on its own;
        // conflicts in one never block the others.
        None => {
            let mut ids = BTreeSet::new();
            for vs in node.current.list_volume_sets().await? {
                ids.insert(vs.id);
            }
            for vs in hub.meta.list_volume_sets().await? {
                ids.insert(vs.id);
            }
            ids.into_iter().collect()
        }
    };
    if targets.is_empty() {
        return Ok("no volumesets to synchronize".to_string());
    }

    let mut out = String::new();
    for vsid in &targets {
        let conflicts = reconcile(
            hub.meta.as_ref(),
            &node.current,
            &node.baseline,
            vsid,
            direction,
        )
        .await?;
        out.push_str(&format!("synchronized volumeset {}\n", vsid));
        if conflicts.has_conflicts() {
            out.push_str(&output::render_conflicts(&conflicts));
        }
    }
    Ok(out)
}

/// Resolve a push/pull argument to a transfer selector.
async fn transfer_selector(store: &dyn MetaStore, token: &str) -> Result<Selector> {
    match resolve_unique(store, token, &[EntityKind::Snapshot, EntityKind::VolumeSet]).await? {
        ResolvedEntity::Snapshot(s) => Ok(Selector::Snapshot(s.id)),
        ResolvedEntity::VolumeSet(vs) => Ok(Selector::VolumeSet(vs.id)),
        _ => unreachable!("restricted to snapshots and volume-sets"),
    }
}

/// Push snapshot content (one snapshot, or a whole volume-set) to the hub.
pub async fn push(node: &Node, config: &Config, token: &str) -> Result<String> {
    let hub = RemoteHub::open(config, node.blobs.hasher()).await?;
    let selector = transfer_selector(&node.current, token).await?;
    let engine = TransferEngine::default();
    let stats = engine
        .push(
            &node.current,
            &node.blobs,
            hub.meta.as_ref(),
            hub.blobs.as_ref(),
            &selector,
        )
        .await?;
    Ok(format!(
        "pushed {} snapshot(s): {} chunk(s) sent ({} bytes), {} already present",
        stats.snapshots, stats.chunks_sent, stats.bytes_sent, stats.chunks_skipped
    ))
}

/// Pull snapshot content from the hub.
pub async fn pull(node: &Node, config: &Config, token: &str) -> Result<String> {
    let hub = RemoteHub::open(config, node.blobs.hasher()).await?;
    let selector = transfer_selector(hub.meta.as_ref(), token).await?;
    let engine = TransferEngine::default();
    let stats = engine
        .pull(
            hub.meta.as_ref(),
            hub.blobs.as_ref(),
            &node.current,
            &node.blobs,
            &selector,
        )
        .await?;
    Ok(format!(
        "pulled {} snapshot(s): {} chunk(s) received ({} bytes), {} already present",
        stats.snapshots, stats.chunks_sent, stats.bytes_sent, stats.chunks_skipped
    ))
}

/// First-time hub setup: endpoint plus auth token, validated and saved.
pub fn setup(config_path: &Path, url: &str, token_file: &Path) -> Result<String> {
    let url = normalize_hub_url(url)?;
    validate_token_file(token_file)?;

    let mut config = Config::load(config_path)?;
    config.hub_url = Some(url.clone());
    config.token_file = Some(token_file.to_path_buf());
    config.save(config_path)?;
    Ok(format!("configured hub {}", url))
}

/// Show or update individual config settings.
pub fn config_cmd(
    config_path: &Path,
    url: Option<&str>,
    token_file: Option<&Path>,
) -> Result<String> {
    let mut config = Config::load(config_path)?;
    if url.is_none() && token_file.is_none() {
        return Ok(format!(
            "hub:        {}\ntoken file: {}\ndata dir:   {}\n",
            config.hub_url.as_deref().unwrap_or("(unset)"),
            config
                .token_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(unset)".to_string()),
            config.resolved_data_dir()?.display(),
        ));
    }
    if let Some(url) = url {
        config.hub_url = Some(normalize_hub_url(url)?);
    }
    if let Some(token_file) = token_file {
        validate_token_file(token_file)?;
        config.token_file = Some(token_file.to_path_buf());
    }
    config.save(config_path)?;
    Ok("configuration updated".to_string())
}

pub fn version() -> String {
    format!("voltree {}", env!("CARGO_PKG_VERSION"))
}

/// Node summary: paths, hub, object counts.
pub async fn info(node: &Node, config: &Config) -> Result<String> {
    let volume_sets = node.current.list_volume_sets().await?.len();
    let volumes = node.current.list_volumes(None).await?.len();
    let snapshots = node.current.list_snapshots(None).await?.len();
    let branches = node.current.list_branches(None).await?.len();
    Ok(format!(
        "data dir:   {}\nhub:        {}\nvolumesets: {}\nvolumes:    {}\nsnapshots:  {}\nbranches:   {}\n",
        node.data_dir().display(),
        config.hub_url.as_deref().unwrap_or("(unset)"),
        volume_sets,
        volumes,
        snapshots,
        branches,
    ))
}

/// Write a diagnostics bundle: version, config (token path only, never the
/// token itself), and both metadata store dumps.
pub async fn diagnostics(node: &Node, config: &Config, out_dir: &Path) -> Result<String> {
    std::fs::create_dir_all(out_dir)?;
    std::fs::write(out_dir.join("version.txt"), format!("{}\n", version()))?;
    std::fs::write(out_dir.join("info.txt"), info(node, config).await?)?;
    for (name, store) in [
        ("current.json", &node.current),
        ("baseline.json", &node.baseline),
    ] {
        if store.path().is_file() {
            std::fs::copy(store.path(), out_dir.join(name))?;
        }
    }
    Ok(format!("wrote diagnostics to {}", out_dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn node(dir: &TempDir) -> Node {
        Node::open(&dir.path().join("node")).await.unwrap()
    }

    #[tokio::test]
    async fn test_init_create_snapshot_flow() {
        let dir = TempDir::new().unwrap();
        let node = node(&dir).await;

        init(&node, "team/app", Some("env=dev"), None).await.unwrap();
        create(&node, "app", Some("work"), None).await.unwrap();

        // Write data into the volume, then snapshot it.
        let vol = &node.current.find_volumes("work").await.unwrap()[0];
        std::fs::write(&vol.mount_path, b"hello").unwrap();
        let out = snapshot(&node, "work", Some("s1"), None, false, None, None)
            .await
            .unwrap();
        assert!(out.contains("on branch main"));

        let snaps = node.current.find_snapshots("s1").await.unwrap();
        assert_eq!(snaps.len(), 1);
        assert!(snaps[0].content.is_some());
        assert!(snaps[0].parent.is_none());

        // The auto branch advances on the next snapshot.
        std::fs::write(&vol.mount_path, b"hello again").unwrap();
        snapshot(&node, "work", Some("s2"), None, false, None, None)
            .await
            .unwrap();
        let b = node
            .current
            .get_branch(&snaps[0].volume_set, "main")
            .await
            .unwrap()
            .unwrap();
        let s2 = &node.current.find_snapshots("s2").await.unwrap()[0];
        assert_eq!(b.tip, s2.id);
        assert_eq!(s2.parent.as_ref(), Some(&snaps[0].id));
    }

    #[tokio::test]
    async fn test_snapshot_new_branch_is_manual() {
        let dir = TempDir::new().unwrap();
        let node = node(&dir).await;
        init(&node, "app", None, None).await.unwrap();
        create(&node, "app", Some("work"), None).await.unwrap();

        snapshot(&node, "work", Some("feature"), None, true, None, None)
            .await
            .unwrap();
        let branches = node.current.list_branches(None).await.unwrap();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].name, "feature");
        assert_eq!(branches[0].mode, SyncMode::Manual);
    }

    #[tokio::test]
    async fn test_snapshot_branch_flags_conflict() {
        let dir = TempDir::new().unwrap();
        let node = node(&dir).await;
        init(&node, "app", None, None).await.unwrap();
        create(&node, "app", Some("work"), None).await.unwrap();

        let err = snapshot(&node, "work", None, Some("b"), true, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VoltreeError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_clone_from_branch_tip() {
        let dir = TempDir::new().unwrap();
        let node = node(&dir).await;
        init(&node, "app", None, None).await.unwrap();
        create(&node, "app", Some("work"), None).await.unwrap();
        let vol = &node.current.find_volumes("work").await.unwrap()[0];
        std::fs::write(&vol.mount_path, b"payload").unwrap();
        snapshot(&node, "work", Some("s1"), None, false, None, None)
            .await
            .unwrap();

        clone(&node, "main", Some("copy")).await.unwrap();
        let copy = &node.current.find_volumes("copy").await.unwrap()[0];
        assert_eq!(std::fs::read(&copy.mount_path).unwrap(), b"payload");
        let s1 = &node.current.find_snapshots("s1").await.unwrap()[0];
        assert_eq!(copy.base.as_ref(), Some(&s1.id));
    }

    #[tokio::test]
    async fn test_remove_snapshot_with_branch_tip_rejected() {
        let dir = TempDir::new().unwrap();
        let node = node(&dir).await;
        init(&node, "app", None, None).await.unwrap();
        create(&node, "app", Some("work"), None).await.unwrap();
        snapshot(&node, "work", Some("s1"), None, false, None, None)
            .await
            .unwrap();

        let err = remove(&node, "s1").await.unwrap_err();
        assert!(matches!(err, VoltreeError::InvalidArgument(_)));

        // After removing the branch, the snapshot goes.
        remove(&node, "main").await.unwrap();
        remove(&node, "s1").await.unwrap();
        assert!(node.current.find_snapshots("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_volumeset_cascades() {
        let dir = TempDir::new().unwrap();
        let node = node(&dir).await;
        init(&node, "app", None, None).await.unwrap();
        create(&node, "app", Some("work"), None).await.unwrap();
        snapshot(&node, "work", Some("s1"), None, false, None, None)
            .await
            .unwrap();

        remove(&node, "app").await.unwrap();
        assert!(node.current.list_volume_sets().await.unwrap().is_empty());
        assert!(node.current.list_volumes(None).await.unwrap().is_empty());
        assert!(node.current.list_snapshots(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_merges_attrs() {
        let dir = TempDir::new().unwrap();
        let node = node(&dir).await;
        init(&node, "app", Some("a=1,b=2"), None).await.unwrap();
        update(&node, "app", None, Some("b=3,c=4"), None).await.unwrap();

        let vs = &node.current.find_volume_sets("app").await.unwrap()[0];
        assert_eq!(vs.attrs.get("a").map(String::as_str), Some("1"));
        assert_eq!(vs.attrs.get("b").map(String::as_str), Some("3"));
        assert_eq!(vs.attrs.get("c").map(String::as_str), Some("4"));
    }

    #[tokio::test]
    async fn test_ambiguous_token_is_an_error() {
        let dir = TempDir::new().unwrap();
        let node = node(&dir).await;
        init(&node, "app", None, None).await.unwrap();
        create(&node, "app", Some("db"), None).await.unwrap();
        snapshot(&node, "db", Some("db"), None, false, None, None)
            .await
            .unwrap();

        let err = remove(&node, "db").await.unwrap_err();
        assert!(matches!(err, VoltreeError::Ambiguous(_)));
    }

    #[tokio::test]
    async fn test_create_makes_missing_volumeset() {
        let dir = TempDir::new().unwrap();
        let node = node(&dir).await;
        create(&node, "team/fresh", Some("work"), None).await.unwrap();

        let sets = node.current.find_volume_sets("team/fresh").await.unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(node.current.find_volumes("work").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_renames_branch() {
        let dir = TempDir::new().unwrap();
        let node = node(&dir).await;
        init(&node, "app", None, None).await.unwrap();
        create(&node, "app", Some("work"), None).await.unwrap();
        snapshot(&node, "work", Some("s1"), None, false, None, None)
            .await
            .unwrap();

        update(&node, "main", Some("stable"), None, None).await.unwrap();
        let branches = node.current.list_branches(None).await.unwrap();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].name, "stable");

        // Anything but a rename is rejected.
        let err = update(&node, "stable", None, Some("k=v"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VoltreeError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_list_all_shows_every_kind() {
        let dir = TempDir::new().unwrap();
        let node = node(&dir).await;
        init(&node, "app", None, None).await.unwrap();
        create(&node, "app", Some("work"), None).await.unwrap();
        snapshot(&node, "work", Some("s1"), None, false, None, None)
            .await
            .unwrap();

        let out = list(&node, None, true).await.unwrap();
        assert!(out.contains("app"));
        assert!(out.contains("work"));
        assert!(out.contains("s1"));
        assert!(out.contains("main"));
    }

    #[tokio::test]
    async fn test_list_without_token() {
        let dir = TempDir::new().unwrap();
        let node = node(&dir).await;
        assert_eq!(list(&node, None, false).await.unwrap(), "no volumesets");
        init(&node, "team/app", None, None).await.unwrap();
        let out = list(&node, None, false).await.unwrap();
        assert!(out.contains("team/app"));
    }

    #[tokio::test]
    async fn test_setup_and_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        let token = dir.path().join("token");
        std::fs::write(&token, "secret").unwrap();

        setup(&config_path, "hub.example.com", &token).unwrap();
        let out = config_cmd(&config_path, None, None).unwrap();
        assert!(out.contains("https://hub.example.com"));
        assert!(out.contains("token"));
    }
}

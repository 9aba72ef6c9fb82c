//! Entity model: volume-sets, branches, snapshots, working volumes.
//!
//! A volume-set is a named lineage container. Branches are mutable named
//! pointers to tip snapshots, snapshots are immutable content-addressed
//! captures, and volumes are mutable mounted working instances.

use crate::error::{Result, VoltreeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Free-form key/value attributes attached to entities.
pub type Attrs = BTreeMap<String, String>;

/// Separator between a volume-set qualifier and an object name in search
/// tokens (`<volumeset>:<name>`).
pub const QUALIFIER_SEPARATOR: char = ':';

/// Separator between a volume-set prefix (namespace) and its name.
pub const PREFIX_SEPARATOR: char = '/';

macro_rules! id_type {
    ($name:ident) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a fresh identifier.
            pub fn generate() -> Self {
                Self(ulid::Ulid::new().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

id_type!(VolumeSetId);
id_type!(SnapshotId);
id_type!(VolumeId);

/// Identifier of an assembled content blob in the block store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(pub String);

impl ContentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The four entity kinds handled by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    VolumeSet,
    Volume,
    Snapshot,
    Branch,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::VolumeSet => "volumeset",
            EntityKind::Volume => "volume",
            EntityKind::Snapshot => "snapshot",
            EntityKind::Branch => "branch",
        };
        f.write_str(s)
    }
}

/// Named lineage container grouping branches, snapshots and volumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSet {
    pub id: VolumeSetId,
    pub name: String,
    /// Optional namespace prefix; `(prefix, name)` is unique within a store.
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub attrs: Attrs,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl VolumeSet {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            id: VolumeSetId::generate(),
            name: name.into(),
            prefix: prefix.into(),
            attrs: Attrs::new(),
            description: String::new(),
            created_at: Utc::now(),
        }
    }

    /// `prefix/name`, or just `name` when there is no prefix.
    pub fn qualified_name(&self) -> String {
        if self.prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{}{}{}", self.prefix, PREFIX_SEPARATOR, self.name)
        }
    }
}

/// How a branch advances when snapshots are taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Advanced implicitly by snapshots taken without an explicit branch.
    Auto,
    /// Only advanced by a snapshot naming this branch.
    Manual,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Auto => f.write_str("auto"),
            SyncMode::Manual => f.write_str("manual"),
        }
    }
}

/// Mutable named pointer to a tip snapshot within one volume-set.
///
/// Identity is `(volume_set, name)`; there is no separate id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub volume_set: VolumeSetId,
    pub name: String,
    pub tip: SnapshotId,
    pub mode: SyncMode,
}

/// Immutable point-in-time capture of a volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub volume_set: VolumeSetId,
    /// Lineage parent; `None` for a root snapshot.
    pub parent: Option<SnapshotId>,
    /// Blob reference. `None` until the content has been localized; once set
    /// it never changes.
    pub content: Option<ContentId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub attrs: Attrs,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// A fresh snapshot of `content`, taken now.
    pub fn new(
        volume_set: VolumeSetId,
        parent: Option<SnapshotId>,
        content: ContentId,
    ) -> Self {
        Self {
            id: SnapshotId::generate(),
            volume_set,
            parent,
            content: Some(content),
            name: None,
            attrs: Attrs::new(),
            description: String::new(),
            created_at: Utc::now(),
        }
    }
}

/// Mutable mounted working instance derived from a snapshot (or empty).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,
    pub volume_set: VolumeSetId,
    #[serde(default)]
    pub name: Option<String>,
    /// Snapshot this volume was cloned from; the parent of its next snapshot.
    pub base: Option<SnapshotId>,
    pub mount_path: PathBuf,
    #[serde(default)]
    pub attrs: Attrs,
    pub created_at: DateTime<Utc>,
}

impl Volume {
    pub fn new(volume_set: VolumeSetId, mount_path: PathBuf) -> Self {
        Self {
            id: VolumeId::generate(),
            volume_set,
            name: None,
            base: None,
            mount_path,
            attrs: Attrs::new(),
            created_at: Utc::now(),
        }
    }
}

/// Validate a user-assigned entity name.
///
/// Empty is accepted here; operations that require a name check for that
/// separately. Names must be safe as a filesystem path component and as a
/// search token, so the qualifier separator and path separators are rejected.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Ok(());
    }
    let ok = name.chars().all(|c| {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
    });
    if !ok {
        return Err(VoltreeError::InvalidArgument(format!(
            "invalid name '{}': only alphanumerics, '-', '_' and '.' are allowed",
            name
        )));
    }
    Ok(())
}

/// Require a non-empty, valid entity name.
pub fn require_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(VoltreeError::InvalidArgument("name must not be empty".into()));
    }
    validate_name(name)
}

/// Split a volume-set name into `(prefix, name)` on the first `/`.
pub fn split_volume_set_name(full: &str) -> (String, String) {
    match full.split_once(PREFIX_SEPARATOR) {
        Some((prefix, name)) => (prefix.to_string(), name.to_string()),
        None => (String::new(), full.to_string()),
    }
}

/// Parse a comma-separated `key=value` attribute string.
pub fn parse_attrs(s: &str) -> Result<Attrs> {
    let mut attrs = Attrs::new();
    if s.is_empty() {
        return Ok(attrs);
    }
    for pair in s.split(',') {
        let (k, v) = pair.split_once('=').ok_or_else(|| {
            VoltreeError::InvalidArgument(format!(
                "invalid attribute '{}': expected key=value",
                pair
            ))
        })?;
        if k.is_empty() {
            return Err(VoltreeError::InvalidArgument(format!(
                "invalid attribute '{}': empty key",
                pair
            )));
        }
        attrs.insert(k.to_string(), v.to_string());
    }
    Ok(attrs)
}

/// Merge new attributes into existing ones; new values win.
pub fn merge_attrs(existing: &Attrs, updates: &Attrs) -> Attrs {
    let mut merged = existing.clone();
    for (k, v) in updates {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

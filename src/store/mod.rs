//! Metadata store contract shared by the local ("current"), baseline
//! ("initial") and remote hub stores.
//!
//! The baseline store is never user-mutated; only the sync reconciler writes
//! to it. All three stores expose the same shape so the reconciler can treat
//! them uniformly.
//!
//! Finders return zero-or-more matches; an empty result is the non-fatal
//! "not found" the resolver absorbs. Malformed tokens are real errors.

mod doc;
pub mod file;
pub mod memory;

pub use file::FileMetaStore;
pub use memory::MemoryMetaStore;

use crate::error::{Result, VoltreeError};
use crate::model::{
    Branch, Snapshot, SnapshotId, Volume, VolumeId, VolumeSet, VolumeSetId,
    QUALIFIER_SEPARATOR,
};
use async_trait::async_trait;

/// A parsed search token.
///
/// A free-form token may be an entity id, a bare name, or a
/// `<volumeset>:<name>` qualified name. Ids and names are not syntactically
/// distinguishable, so finders match either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchToken {
    /// Bare id-or-name; empty matches all volume-sets.
    Plain(String),
    /// `<volumeset>:<name>`; an empty name matches every object of the kind
    /// within the volume-set.
    Qualified { volume_set: String, name: String },
}

/// Parse a search token, rejecting malformed input.
pub fn parse_token(token: &str) -> Result<SearchToken> {
    match token.split_once(QUALIFIER_SEPARATOR) {
        None => Ok(SearchToken::Plain(token.to_string())),
        Some((vs, name)) => {
            if name.contains(QUALIFIER_SEPARATOR) {
                return Err(VoltreeError::InvalidArgument(format!(
                    "malformed search token '{}': more than one '{}'",
                    token, QUALIFIER_SEPARATOR
                )));
            }
            if vs.is_empty() {
                return Err(VoltreeError::InvalidArgument(format!(
                    "malformed search token '{}': empty volume-set qualifier",
                    token
                )));
            }
            Ok(SearchToken::Qualified {
                volume_set: vs.to_string(),
                name: name.to_string(),
            })
        }
    }
}

#[async_trait]
pub trait MetaStore: Send + Sync {
    // Volume-sets

    async fn get_volume_set(&self, id: &VolumeSetId) -> Result<Option<VolumeSet>>;
    async fn list_volume_sets(&self) -> Result<Vec<VolumeSet>>;
    /// Create a new volume-set; `(prefix, name)` must be unique.
    async fn create_volume_set(&self, vs: &VolumeSet) -> Result<()>;
    /// Unconditionally create-or-replace. Used by the sync reconciler.
    async fn put_volume_set(&self, vs: &VolumeSet) -> Result<()>;
    /// Delete a volume-set and everything beneath it.
    async fn delete_volume_set(&self, id: &VolumeSetId) -> Result<()>;

    // Volumes

    async fn get_volume(&self, id: &VolumeId) -> Result<Option<Volume>>;
    async fn list_volumes(&self, volume_set: Option<&VolumeSetId>) -> Result<Vec<Volume>>;
    async fn create_volume(&self, vol: &Volume) -> Result<()>;
    async fn put_volume(&self, vol: &Volume) -> Result<()>;
    async fn delete_volume(&self, id: &VolumeId) -> Result<()>;

    // Snapshots

    async fn get_snapshot(&self, id: &SnapshotId) -> Result<Option<Snapshot>>;
    async fn list_snapshots(&self, volume_set: Option<&VolumeSetId>) -> Result<Vec<Snapshot>>;
    async fn create_snapshot(&self, snap: &Snapshot) -> Result<()>;
    /// Update an existing snapshot. A content reference, once set, is
    /// immutable; changing it is rejected.
    async fn update_snapshot(&self, snap: &Snapshot) -> Result<()>;
    /// Unconditionally create-or-replace. Used by the sync reconciler.
    async fn put_snapshot(&self, snap: &Snapshot) -> Result<()>;
    async fn delete_snapshot(&self, id: &SnapshotId) -> Result<()>;

    // Branches (identified by volume-set + name)

    async fn get_branch(&self, volume_set: &VolumeSetId, name: &str) -> Result<Option<Branch>>;
    async fn list_branches(&self, volume_set: Option<&VolumeSetId>) -> Result<Vec<Branch>>;
    /// Create a new branch; the name must be unique within its volume-set.
    async fn create_branch(&self, branch: &Branch) -> Result<()>;
    async fn put_branch(&self, branch: &Branch) -> Result<()>;
    async fn delete_branch(&self, volume_set: &VolumeSetId, name: &str) -> Result<()>;

    // Search. Default implementations match against the listings above, so
    // every backend gets identical token semantics.

    async fn find_volume_sets(&self, token: &str) -> Result<Vec<VolumeSet>> {
        let parsed = parse_token(token)?;
        let all = self.list_volume_sets().await?;
        match parsed {
            SearchToken::Plain(t) => {
                if t.is_empty() {
                    return Ok(all);
                }
                Ok(all
                    .into_iter()
                    .filter(|vs| {
                        vs.id.as_str() == t || vs.name == t || vs.qualified_name() == t
                    })
                    .collect())
            }
            // A qualified token names an object inside a volume-set, never
            // the volume-set itself.
            SearchToken::Qualified { .. } => Ok(Vec::new()),
        }
    }

    async fn find_snapshots(&self, token: &str) -> Result<Vec<Snapshot>> {
        match parse_token(token)? {
            SearchToken::Plain(t) => {
                if t.is_empty() {
                    return Ok(Vec::new());
                }
                Ok(self
                    .list_snapshots(None)
                    .await?
                    .into_iter()
                    .filter(|s| s.id.as_str() == t || s.name.as_deref() == Some(&t))
                    .collect())
            }
            SearchToken::Qualified { volume_set, name } => {
                let mut found = Vec::new();
                for vs in self.find_volume_sets(&volume_set).await? {
                    for s in self.list_snapshots(Some(&vs.id)).await? {
                        if name.is_empty()
                            || s.id.as_str() == name
                            || s.name.as_deref() == Some(&name)
                        {
                            found.push(s);
                        }
                    }
                }
                Ok(found)
            }
        }
    }

    async fn find_branches(&self, token: &str) -> Result<Vec<Branch>> {
        match parse_token(token)? {
            SearchToken::Plain(t) => {
                if t.is_empty() {
                    return Ok(Vec::new());
                }
                Ok(self
                    .list_branches(None)
                    .await?
                    .into_iter()
                    .filter(|b| b.name == t)
                    .collect())
            }
            SearchToken::Qualified { volume_set, name } => {
                let mut found = Vec::new();
                for vs in self.find_volume_sets(&volume_set).await? {
                    for b in self.list_branches(Some(&vs.id)).await? {
                        if name.is_empty() || b.name == name {
                            found.push(b);
                        }
                    }
                }
                Ok(found)
            }
        }
    }

    async fn find_volumes(&self, token: &str) -> Result<Vec<Volume>> {
        match parse_token(token)? {
            SearchToken::Plain(t) => {
                if t.is_empty() {
                    return Ok(Vec::new());
                }
                Ok(self
                    .list_volumes(None)
                    .await?
                    .into_iter()
                    .filter(|v| v.id.as_str() == t || v.name.as_deref() == Some(&t))
                    .collect())
            }
            SearchToken::Qualified { volume_set, name } => {
                let mut found = Vec::new();
                for vs in self.find_volume_sets(&volume_set).await? {
                    for v in self.list_volumes(Some(&vs.id)).await? {
                        if name.is_empty()
                            || v.id.as_str() == name
                            || v.name.as_deref() == Some(&name)
                        {
                            found.push(v);
                        }
                    }
                }
                Ok(found)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token_plain() {
        assert_eq!(parse_token("db").unwrap(), SearchToken::Plain("db".into()));
        assert_eq!(parse_token("").unwrap(), SearchToken::Plain(String::new()));
    }

    #[test]
    fn test_parse_token_qualified() {
        assert_eq!(
            parse_token("myapp:main").unwrap(),
            SearchToken::Qualified {
                volume_set: "myapp".into(),
                name: "main".into()
            }
        );
        // Empty name selects every object of the kind within the volume-set.
        assert_eq!(
            parse_token("myapp:").unwrap(),
            SearchToken::Qualified {
                volume_set: "myapp".into(),
                name: String::new()
            }
        );
    }

    #[test]
    fn test_parse_token_malformed() {
        assert!(parse_token("a:b:c").is_err());
        assert!(parse_token(":name").is_err());
    }
}

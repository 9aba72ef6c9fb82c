//! Remote hub access.
//!
//! A hub is an upstream peer holding the authoritative metadata catalog and
//! blob storage. `file://` URLs (and bare paths) open a hub rooted on a local
//! or mounted filesystem, which is also how tests exercise the full sync and
//! transfer paths. HTTP hubs are configured and validated here but need a
//! transport that is not part of this crate.

use crate::blob::{BlobStore, DirBlobStore};
use crate::config::{normalize_hub_url, validate_token_file, Config};
use crate::error::{Result, VoltreeError};
use crate::store::{FileMetaStore, MetaStore};
use crate::transfer::hash::ChunkHasher;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An opened hub: its metadata catalog plus its blob store.
pub struct RemoteHub {
    pub meta: Box<dyn MetaStore>,
    pub blobs: Box<dyn BlobStore>,
}

impl std::fmt::Debug for RemoteHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteHub").finish_non_exhaustive()
    }
}

impl RemoteHub {
    /// Open the hub named by the config, validating the endpoint and token
    /// settings first.
    pub async fn open(config: &Config, hasher: Arc<dyn ChunkHasher>) -> Result<Self> {
        let raw = config.hub_url.as_deref().ok_or_else(|| {
            VoltreeError::Config("no hub configured; run 'voltree config --url <hub>'".into())
        })?;
        let url = normalize_hub_url(raw)?;
        if let Some(token_file) = &config.token_file {
            validate_token_file(token_file)?;
        }

        if let Some(root) = file_hub_root(&url) {
            return Self::open_dir(&root, hasher).await;
        }
        Err(VoltreeError::StoreUnavailable(format!(
            "hub {} requires an HTTP transport, which is not available; \
             use a file:// hub or a mounted path",
            url
        )))
    }

    /// Open a filesystem-rooted hub, creating it on first use.
    pub async fn open_dir(root: &Path, hasher: Arc<dyn ChunkHasher>) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let meta = FileMetaStore::open_or_create(&root.join("meta.json"))?;
        let blobs = DirBlobStore::open(&root.join("blobs"), hasher).await?;
        Ok(Self {
            meta: Box::new(meta),
            blobs: Box::new(blobs),
        })
    }
}

/// Extract the filesystem root from a `file://` URL or a bare absolute path.
fn file_hub_root(url: &str) -> Option<PathBuf> {
    if let Some(path) = url.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    // normalize_hub_url prefixed bare hosts with https://, so a path that
    // survived as absolute was given explicitly.
    if url.starts_with('/') {
        return Some(PathBuf::from(url));
    }
    None
}

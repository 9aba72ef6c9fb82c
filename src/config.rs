//! CLI configuration: hub endpoint, auth token location, data directory.
//!
//! Stored as TOML under the user's config directory and written atomically,
//! so a crash mid-save never leaves a truncated config behind.

use crate::error::{Result, VoltreeError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Hub endpoint URL. Bare host[:port] values are normalized to https://.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_url: Option<String>,
    /// Absolute path to the file holding the hub auth token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_file: Option<PathBuf>,
    /// Node data directory (metadata stores and blob storage). Defaults to
    /// the user data dir when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl Config {
    /// Default config file path: `<user config dir>/voltree/config.toml`.
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| VoltreeError::Config("cannot determine config directory".into()))?;
        Ok(base.join("voltree").join("config.toml"))
    }

    /// Default data directory: `<user data dir>/voltree`.
    pub fn default_data_dir() -> Result<PathBuf> {
        let base = dirs::data_dir()
            .ok_or_else(|| VoltreeError::Config("cannot determine data directory".into()))?;
        Ok(base.join("voltree"))
    }

    /// Load the config, or return defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(s) => toml::from_str(&s)
                .map_err(|e| VoltreeError::Config(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Save the config, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = toml::to_string_pretty(self)
            .map_err(|e| VoltreeError::Config(e.to_string()))?;
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Resolved data directory, falling back to the platform default.
    pub fn resolved_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Self::default_data_dir(),
        }
    }
}

/// Normalize a hub endpoint: bare `host[:port]` becomes `https://host[:port]`.
pub fn normalize_hub_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(VoltreeError::Config("hub URL must not be empty".into()));
    }
    // Absolute paths name a filesystem-rooted hub and pass through as-is.
    if trimmed.contains("://") || trimmed.starts_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("https://{}", trimmed))
    }
}

/// Validate a token file setting: must be an absolute path to an existing file.
pub fn validate_token_file(path: &Path) -> Result<()> {
    if !path.is_absolute() {
        return Err(VoltreeError::Config(format!(
            "token file path must be absolute: {}",
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(VoltreeError::Config(format!(
            "token file does not exist: {}",
            path.display()
        )));
    }
    Ok(())
}

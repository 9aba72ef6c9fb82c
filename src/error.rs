//! Crate error type.
//!
//! Per-kind "not found" during multi-kind resolution is absorbed by the
//! resolver and never surfaces as `NoMatch`; everything else propagates
//! verbatim to the command layer.

use crate::model::EntityKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VoltreeError>;

#[derive(Debug, Error)]
pub enum VoltreeError {
    /// A single-kind lookup found nothing.
    #[error("{kind} '{token}' not found")]
    NotFound { kind: EntityKind, token: String },

    /// A multi-kind resolution found nothing in any kind.
    #[error("no matching objects found for '{0}'")]
    NoMatch(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A token matched more than one object. The message carries the
    /// rendered candidate tables.
    #[error("{0}")]
    Ambiguous(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A transferred chunk failed its hash check on receipt. Recovery is a
    /// re-fetch of that chunk, never of the whole snapshot.
    #[error("chunk {hash:016x} failed integrity verification")]
    TransferIntegrity { hash: u64 },

    #[error("configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl VoltreeError {
    pub fn not_found(kind: EntityKind, token: impl Into<String>) -> Self {
        VoltreeError::NotFound {
            kind,
            token: token.into(),
        }
    }

    /// Whether this error is a per-kind "not found" that multi-kind
    /// resolution may absorb.
    pub fn is_not_found(&self) -> bool {
        matches!(self, VoltreeError::NotFound { .. })
    }
}

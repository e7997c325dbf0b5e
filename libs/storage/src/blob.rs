//! Versioned blob storage port
//!
//! Snapshot documents and rendered artifacts live in a [`BlobStore`].
//! Every stored blob carries a monotonically increasing version token and
//! a SHA-256 etag, and writes are conditional: a synchronizer that read
//! version `n` writes back with [`PutCondition::IfVersion`]`(n)`, so a
//! concurrent writer surfaces as a typed conflict instead of a silently
//! clobbered update.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("blob {key} is not valid JSON: {reason}")]
    MalformedBlob { key: String, reason: String },

    #[error("blob {key} failed its version check: expected {expected}, stored {stored:?}")]
    VersionConflict {
        key: String,
        expected: u64,
        stored: Option<u64>,
    },

    #[error("blob {key} already exists")]
    AlreadyExists { key: String },

    #[error("blob {key} integrity check failed: expected {expected}, got {actual}")]
    IntegrityFailure {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("invalid blob key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("blob {key} has unreadable metadata: {reason}")]
    MalformedMeta { key: String, reason: String },

    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },
}

impl StorageError {
    /// Conflicts that a compare-and-swap retry loop can resolve by
    /// re-reading and re-applying
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::VersionConflict { .. } | StorageError::AlreadyExists { .. }
        )
    }
}

// ── Blob metadata ───────────────────────────────────────────────────

/// Content and cache headers stored with a blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMeta {
    pub content_type: String,
    pub cache_control: Option<String>,
}

impl BlobMeta {
    /// JSON snapshot document
    pub fn json() -> Self {
        Self {
            content_type: "application/json".to_string(),
            cache_control: None,
        }
    }

    /// Rendered HTML artifact, always refetched by viewers
    pub fn html_no_cache() -> Self {
        Self {
            content_type: "text/html".to_string(),
            cache_control: Some("no-cache".to_string()),
        }
    }
}

/// A blob together with the version token used for conditional writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedBlob {
    pub body: Vec<u8>,
    /// Increments by one on every successful put
    pub version: u64,
    /// SHA-256 hex digest of the body
    pub etag: String,
    pub meta: BlobMeta,
}

/// Write precondition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutCondition {
    /// Unconditional write
    Overwrite,
    /// Create only; fails if the key already exists
    IfAbsent,
    /// Replace only if the stored version matches
    IfVersion(u64),
}

/// Compute the SHA-256 hex etag for a blob body
pub fn compute_etag(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    format!("{:x}", hasher.finalize())
}

/// Resolve the version a conditional put will install, or the conflict
/// that forbids it
pub fn next_version(
    key: &str,
    current: Option<u64>,
    condition: PutCondition,
) -> Result<u64, StorageError> {
    match condition {
        PutCondition::Overwrite => Ok(current.unwrap_or(0) + 1),
        PutCondition::IfAbsent => match current {
            None => Ok(1),
            Some(_) => Err(StorageError::AlreadyExists {
                key: key.to_string(),
            }),
        },
        PutCondition::IfVersion(expected) => match current {
            Some(stored) if stored == expected => Ok(stored + 1),
            stored => Err(StorageError::VersionConflict {
                key: key.to_string(),
                expected,
                stored,
            }),
        },
    }
}

// ── Store port ──────────────────────────────────────────────────────

/// Versioned blob storage
pub trait BlobStore: Send + Sync {
    /// Fetch a blob with its version token, or None when absent
    fn get(&self, key: &str) -> Result<Option<VersionedBlob>, StorageError>;

    /// Store a blob under the given precondition, returning the version
    /// it was written as
    fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        meta: BlobMeta,
        condition: PutCondition,
    ) -> Result<u64, StorageError>;
}

/// Load and parse a JSON blob, returning the value and its version, or
/// None when the key is absent
pub fn load_json<T: DeserializeOwned>(
    store: &dyn BlobStore,
    key: &str,
) -> Result<Option<(T, u64)>, StorageError> {
    let blob = match store.get(key)? {
        Some(blob) => blob,
        None => return Ok(None),
    };
    let value = serde_json::from_slice(&blob.body).map_err(|e| StorageError::MalformedBlob {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Some((value, blob.version)))
}

/// Serialize and store a JSON blob under the given precondition
pub fn store_json<T: Serialize>(
    store: &dyn BlobStore,
    key: &str,
    value: &T,
    condition: PutCondition,
) -> Result<u64, StorageError> {
    let body =
        serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
    store.put(key, body, BlobMeta::json(), condition)
}

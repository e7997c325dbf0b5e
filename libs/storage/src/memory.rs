//! In-memory blob store

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::blob::{
    compute_etag, next_version, BlobMeta, BlobStore, PutCondition, StorageError, VersionedBlob,
};

#[derive(Debug, Clone)]
struct StoredBlob {
    body: Vec<u8>,
    version: u64,
    etag: String,
    meta: BlobMeta,
}

/// Blob store backed by a process-local map
///
/// Uses BTreeMap so key iteration is deterministic.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, StoredBlob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, StoredBlob>>, StorageError> {
        self.blobs.lock().map_err(|_| StorageError::Unavailable {
            reason: "blob store mutex poisoned".to_string(),
        })
    }

    /// Keys currently stored, in name order
    pub fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> Result<Option<VersionedBlob>, StorageError> {
        let blobs = self.lock()?;
        Ok(blobs.get(key).map(|stored| VersionedBlob {
            body: stored.body.clone(),
            version: stored.version,
            etag: stored.etag.clone(),
            meta: stored.meta.clone(),
        }))
    }

    fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        meta: BlobMeta,
        condition: PutCondition,
    ) -> Result<u64, StorageError> {
        let mut blobs = self.lock()?;
        let current = blobs.get(key).map(|stored| stored.version);
        let version = next_version(key, current, condition)?;
        let etag = compute_etag(&body);
        blobs.insert(
            key.to_string(),
            StoredBlob {
                body,
                version,
                etag,
                meta,
            },
        );
        Ok(version)
    }
}

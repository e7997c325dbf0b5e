//! Filesystem blob store
//!
//! One file per key plus a `<key>.meta.json` sidecar holding the version
//! token, etag, and content headers. Writes go through a tmp file, fsync,
//! and rename; reads verify the body against the sidecar etag.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::blob::{
    compute_etag, next_version, BlobMeta, BlobStore, PutCondition, StorageError, VersionedBlob,
};

#[derive(Debug, Serialize, Deserialize)]
struct SidecarMeta {
    version: u64,
    etag: String,
    content_type: String,
    cache_control: Option<String>,
}

/// Blob store rooted at a directory, one file per key
pub struct FsBlobStore {
    root: PathBuf,
    writes: Mutex<()>,
}

impl FsBlobStore {
    /// Store rooted at `root`; the directory is created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writes: Mutex::new(()),
        }
    }

    /// Directory the store writes under
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn meta_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(format!("{}.meta.json", key)))
    }

    fn read_sidecar(&self, key: &str) -> Result<Option<SidecarMeta>, StorageError> {
        let path = self.meta_path(key)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::MalformedMeta {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason: "empty key".to_string(),
        });
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason: "key must be a relative path".to_string(),
        });
    }
    if key.split('/').any(|part| part.is_empty() || part == "..") {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason: "key must not traverse directories".to_string(),
        });
    }
    Ok(())
}

/// Write to a tmp file, fsync, rename
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), io::Error> {
    let tmp_path = match path.file_name() {
        Some(name) => path.with_file_name(format!("{}.tmp", name.to_string_lossy())),
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "path has no file name",
            ))
        }
    };
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

impl BlobStore for FsBlobStore {
    fn get(&self, key: &str) -> Result<Option<VersionedBlob>, StorageError> {
        let path = self.blob_path(key)?;
        let body = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let sidecar = match self.read_sidecar(key)? {
            Some(sidecar) => sidecar,
            None => {
                return Err(StorageError::MalformedMeta {
                    key: key.to_string(),
                    reason: "blob exists without sidecar".to_string(),
                })
            }
        };

        let actual = compute_etag(&body);
        if actual != sidecar.etag {
            return Err(StorageError::IntegrityFailure {
                key: key.to_string(),
                expected: sidecar.etag,
                actual,
            });
        }

        Ok(Some(VersionedBlob {
            body,
            version: sidecar.version,
            etag: sidecar.etag,
            meta: BlobMeta {
                content_type: sidecar.content_type,
                cache_control: sidecar.cache_control,
            },
        }))
    }

    fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        meta: BlobMeta,
        condition: PutCondition,
    ) -> Result<u64, StorageError> {
        let _guard = self.writes.lock().map_err(|_| StorageError::Unavailable {
            reason: "blob store write mutex poisoned".to_string(),
        })?;

        let blob_path = self.blob_path(key)?;
        let current = if blob_path.exists() {
            match self.read_sidecar(key)? {
                Some(sidecar) => Some(sidecar.version),
                None => {
                    return Err(StorageError::MalformedMeta {
                        key: key.to_string(),
                        reason: "blob exists without sidecar".to_string(),
                    })
                }
            }
        } else {
            None
        };

        let version = next_version(key, current, condition)?;
        let etag = compute_etag(&body);

        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&blob_path, &body)?;

        let sidecar = SidecarMeta {
            version,
            etag,
            content_type: meta.content_type,
            cache_control: meta.cache_control,
        };
        let sidecar_bytes = serde_json::to_vec(&sidecar)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        write_atomic(&self.meta_path(key)?, &sidecar_bytes)?;

        debug!(key, version, "Wrote blob");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_then_get_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path());

        let version = store
            .put(
                "readings.json",
                b"[]".to_vec(),
                BlobMeta::json(),
                PutCondition::IfAbsent,
            )
            .unwrap();
        assert_eq!(version, 1);

        let blob = store.get("readings.json").unwrap().unwrap();
        assert_eq!(blob.body, b"[]");
        assert_eq!(blob.version, 1);
        assert_eq!(blob.meta.content_type, "application/json");
    }

    #[test]
    fn test_version_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = FsBlobStore::new(tmp.path());
            store
                .put("k", b"a".to_vec(), BlobMeta::json(), PutCondition::Overwrite)
                .unwrap();
            store
                .put("k", b"b".to_vec(), BlobMeta::json(), PutCondition::IfVersion(1))
                .unwrap();
        }

        let reopened = FsBlobStore::new(tmp.path());
        let blob = reopened.get("k").unwrap().unwrap();
        assert_eq!(blob.version, 2);
        assert_eq!(blob.body, b"b");
    }

    #[test]
    fn test_stale_version_conflicts() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path());
        store
            .put("k", b"a".to_vec(), BlobMeta::json(), PutCondition::Overwrite)
            .unwrap();
        store
            .put("k", b"b".to_vec(), BlobMeta::json(), PutCondition::IfVersion(1))
            .unwrap();

        let err = store
            .put("k", b"c".to_vec(), BlobMeta::json(), PutCondition::IfVersion(1))
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_tampered_body_fails_integrity_check() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path());
        store
            .put("k", b"original".to_vec(), BlobMeta::json(), PutCondition::Overwrite)
            .unwrap();

        fs::write(tmp.path().join("k"), b"tampered").unwrap();

        let err = store.get("k").unwrap_err();
        assert!(matches!(err, StorageError::IntegrityFailure { .. }));
    }

    #[test]
    fn test_absent_key_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path());
        assert!(store.get("missing.json").unwrap().is_none());
    }

    #[test]
    fn test_traversal_keys_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path());

        for key in ["", "/etc/passwd", "../escape", "a/../b"] {
            let err = store
                .put(key, b"x".to_vec(), BlobMeta::json(), PutCondition::Overwrite)
                .unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey { .. }), "key {:?}", key);
        }
    }

    #[test]
    fn test_no_cache_meta_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path());
        store
            .put(
                "meter-map.html",
                b"<html></html>".to_vec(),
                BlobMeta::html_no_cache(),
                PutCondition::Overwrite,
            )
            .unwrap();

        let blob = store.get("meter-map.html").unwrap().unwrap();
        assert_eq!(blob.meta.cache_control.as_deref(), Some("no-cache"));
    }
}

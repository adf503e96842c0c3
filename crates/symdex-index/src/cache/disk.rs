//! Durable cache tier: one JSON file per key.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::CacheError;

const RECORD_EXTENSION: &str = "json";

/// A persisted cache record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DiskRecord {
    /// Original key, kept for inspection.
    pub key: String,
    pub value: serde_json::Value,
    /// Unix milliseconds.
    pub inserted_at: u64,
    /// Unix milliseconds.
    pub expires_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl DiskRecord {
    pub(crate) fn new(key: &str, value: serde_json::Value, ttl: Duration, version: Option<&str>) -> Self {
        let inserted_at = now_millis();
        Self {
            key: key.to_string(),
            value,
            inserted_at,
            expires_at: inserted_at.saturating_add(ttl.as_millis() as u64),
            version: version.map(str::to_string),
        }
    }

    pub(crate) fn is_expired(&self) -> bool {
        now_millis() > self.expires_at
    }

    pub(crate) fn matches_version(&self, requested: Option<&str>) -> bool {
        match (self.version.as_deref(), requested) {
            (Some(stored), Some(requested)) => stored == requested,
            _ => true,
        }
    }

    pub(crate) fn remaining_ttl(&self) -> Duration {
        Duration::from_millis(self.expires_at.saturating_sub(now_millis()))
    }
}

/// Directory-backed key/value store.
#[derive(Debug)]
pub(crate) struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    /// Open (creating if needed) the store directory.
    pub(crate) fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;
        debug!("Opened disk cache at {:?}", dir);
        Ok(Self { dir })
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir
            .join(format!("{}.{}", hex::encode(digest), RECORD_EXTENSION))
    }

    /// Write a record atomically (temp file, then rename).
    pub(crate) fn write(&self, record: &DiskRecord) -> Result<(), CacheError> {
        let path = self.path_for(&record.key);
        let tmp = path.with_extension("tmp");
        let bytes = serde_json::to_vec(record)?;
        fs::write(&tmp, bytes).map_err(|source| CacheError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| CacheError::Io { path, source })
    }

    /// Read the record for `key`; `Ok(None)` when absent.
    pub(crate) fn read(&self, key: &str) -> Result<Option<DiskRecord>, CacheError> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub(crate) fn remove(&self, key: &str) -> Result<(), CacheError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }

    /// Delete every record file. Returns how many were removed.
    pub(crate) fn clear(&self) -> Result<usize, CacheError> {
        let io_err = |source| CacheError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let is_record = path
                .extension()
                .is_some_and(|ext| ext == RECORD_EXTENSION || ext == "tmp");
            if is_record {
                fs::remove_file(&path).map_err(|source| CacheError::Io {
                    path: path.clone(),
                    source,
                })?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_read_remove() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path().join("cache")).unwrap();

        let record = DiskRecord::new(
            "symbols:sol1",
            serde_json::json!({"answer": 42}),
            Duration::from_secs(60),
            Some("v1"),
        );
        store.write(&record).unwrap();

        let loaded = store.read("symbols:sol1").unwrap().unwrap();
        assert_eq!(loaded.value["answer"], 42);
        assert_eq!(loaded.version.as_deref(), Some("v1"));
        assert!(!loaded.is_expired());
        assert!(loaded.matches_version(Some("v1")));
        assert!(!loaded.matches_version(Some("v2")));

        store.remove("symbols:sol1").unwrap();
        assert!(store.read("symbols:sol1").unwrap().is_none());
        store.remove("symbols:sol1").unwrap();
    }

    #[test]
    fn test_file_names_are_hashed() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let record = DiskRecord::new("a/../weird key", serde_json::Value::Null, Duration::ZERO, None);
        store.write(&record).unwrap();

        let names: Vec<String> = fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].len(), 64 + ".json".len());
        assert_eq!(store.clear().unwrap(), 1);
    }

    #[test]
    fn test_corrupt_record_is_error() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        fs::write(store.path_for("k"), b"not json").unwrap();
        assert!(matches!(store.read("k"), Err(CacheError::Serialization(_))));
    }
}

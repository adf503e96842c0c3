use std::fs::{self, Metadata};
use std::io;
use std::path::Path;
use std::time::SystemTime;

/// Metadata fingerprint of a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStatus {
    pub last_modified: SystemTime,
    pub file_size: u64,
    /// When this record was taken.
    pub last_checked: SystemTime,
}

impl FileStatus {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            last_modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            file_size: metadata.len(),
            last_checked: SystemTime::now(),
        }
    }

    /// Read the fingerprint of `path` from the file system.
    pub fn read(path: &Path) -> io::Result<Self> {
        fs::metadata(path).map(|m| Self::from_metadata(&m))
    }

    /// True when modification time or size differ.
    pub fn differs_from(&self, other: &FileStatus) -> bool {
        self.last_modified != other.last_modified || self.file_size != other.file_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_status_tracks_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.cs");
        fs::write(&path, "class A").unwrap();
        let first = FileStatus::read(&path).unwrap();
        assert_eq!(first.file_size, 7);
        assert!(!first.differs_from(&FileStatus::read(&path).unwrap()));

        fs::write(&path, "class A {}").unwrap();
        assert!(first.differs_from(&FileStatus::read(&path).unwrap()));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = FileStatus::read(&dir.path().join("gone.cs")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}

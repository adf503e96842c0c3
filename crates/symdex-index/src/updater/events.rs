//! Update events and listener traits.

use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::index::IndexDelta;

/// How a file changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Created,
    ContentChanged,
    Deleted,
}

impl FileChangeKind {
    /// Combine an earlier and a later change to the same path.
    ///
    /// A trailing deletion wins. A path that reappears after a deletion
    /// (an atomic save) changed in place. A creation followed by edits is
    /// still a creation.
    pub fn merge(self, later: FileChangeKind) -> FileChangeKind {
        use FileChangeKind::*;
        match (self, later) {
            (_, Deleted) => Deleted,
            (Deleted, _) => ContentChanged,
            (Created, _) | (_, Created) => Created,
            (ContentChanged, ContentChanged) => ContentChanged,
        }
    }
}

impl fmt::Display for FileChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileChangeKind::Created => "created",
            FileChangeKind::ContentChanged => "content_changed",
            FileChangeKind::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// A detected or reported change to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUpdateEvent {
    pub path: PathBuf,
    pub kind: FileChangeKind,
    /// Owning project, when known.
    pub project: Option<String>,
    pub timestamp: SystemTime,
}

impl FileUpdateEvent {
    pub fn new(path: impl Into<PathBuf>, kind: FileChangeKind, project: Option<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            project,
            timestamp: SystemTime::now(),
        }
    }
}

/// Raised after one project's slice of a re-index task was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexUpdateEvent {
    /// Shared by every project re-indexed by the same task.
    pub task_id: Uuid,
    pub project: String,
    pub affected_files: Vec<PathBuf>,
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
}

impl IndexUpdateEvent {
    pub(crate) fn new(task_id: Uuid, project: String, affected_files: Vec<PathBuf>, delta: IndexDelta) -> Self {
        Self {
            task_id,
            project,
            affected_files,
            added: delta.added,
            removed: delta.removed,
            updated: delta.updated,
        }
    }
}

/// Receives file change notifications synchronously.
pub trait FileUpdateListener: Send + Sync {
    fn on_file_updated(&self, event: &FileUpdateEvent);
}

impl<F> FileUpdateListener for F
where
    F: Fn(&FileUpdateEvent) + Send + Sync,
{
    fn on_file_updated(&self, event: &FileUpdateEvent) {
        self(event)
    }
}

/// Receives index update notifications from re-index tasks.
pub trait IndexUpdateListener: Send + Sync {
    fn on_index_updated(&self, event: &IndexUpdateEvent);
}

impl<F> IndexUpdateListener for F
where
    F: Fn(&IndexUpdateEvent) + Send + Sync,
{
    fn on_index_updated(&self, event: &IndexUpdateEvent) {
        self(event)
    }
}

//! Native file watching.
//!
//! Wraps a `notify` watcher on a root directory. Raw events are filtered by
//! extension, coalesced per path until the path has been quiet for the
//! debounce period, and then handed to
//! [`IncrementalUpdater::notify_file_changed`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{FileChangeKind, IncrementalUpdater};

/// Errors that can occur in the file watcher.
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Failed to create watcher: {0}")]
    CreateError(String),

    #[error("Failed to watch path: {0}")]
    WatchError(String),
}

/// Configuration for the file watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Quiet period per path before its change is forwarded.
    pub debounce: Duration,

    /// File extensions to watch
    pub extensions: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(200),
            extensions: vec!["cs".to_string(), "vb".to_string(), "fs".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingChange {
    kind: FileChangeKind,
    last_seen: Instant,
}

/// File watcher that forwards settled changes to an updater.
pub struct FileWatcher {
    config: WatcherConfig,
    root_path: PathBuf,
    watcher: Option<RecommendedWatcher>,
    forwarder: Option<JoinHandle<()>>,
}

impl FileWatcher {
    /// Create a new file watcher. Nothing is watched until [`start`](Self::start).
    pub fn new(root_path: impl Into<PathBuf>, config: WatcherConfig) -> Self {
        Self {
            config,
            root_path: root_path.into(),
            watcher: None,
            forwarder: None,
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Start watching. Must be called from within a tokio runtime.
    pub fn start(&mut self, updater: Arc<IncrementalUpdater>) -> Result<(), WatcherError> {
        self.stop();

        let (raw_tx, raw_rx) = mpsc::channel::<(PathBuf, FileChangeKind)>(256);
        let extensions = self.config.extensions.clone();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                for change in convert_event(event, &extensions) {
                    // Best effort; a full channel drops the event.
                    let _ = raw_tx.blocking_send(change);
                }
            }
        })
        .map_err(|e| WatcherError::CreateError(e.to_string()))?;

        watcher
            .watch(&self.root_path, RecursiveMode::Recursive)
            .map_err(|e| WatcherError::WatchError(e.to_string()))?;

        let debounce = self.config.debounce;
        self.forwarder = Some(tokio::spawn(async move {
            forward_settled(raw_rx, debounce, |path, kind| {
                updater.notify_file_changed(path, kind)
            })
            .await;
        }));
        self.watcher = Some(watcher);

        info!("Started watching {:?} with {:?} debounce", self.root_path, debounce);
        Ok(())
    }

    /// Stop watching.
    pub fn stop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if self.watcher.take().is_some() {
            info!("Stopped watching {:?}", self.root_path);
        }
    }

    /// Check if a path should be watched based on its extension.
    pub fn should_watch(path: &Path, extensions: &[String]) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Coalesce raw changes per path and call `sink` once a path has been quiet
/// for `debounce`. Remaining changes are flushed when the channel closes.
async fn forward_settled<F>(mut raw_rx: mpsc::Receiver<(PathBuf, FileChangeKind)>, debounce: Duration, sink: F)
where
    F: Fn(PathBuf, FileChangeKind),
{
    let mut pending: HashMap<PathBuf, PendingChange> = HashMap::new();
    let tick = Duration::from_millis(50).min(debounce.max(Duration::from_millis(1)));

    loop {
        match tokio::time::timeout(tick, raw_rx.recv()).await {
            Ok(Some((path, kind))) => {
                let now = Instant::now();
                pending
                    .entry(path)
                    .and_modify(|p| {
                        p.kind = p.kind.merge(kind);
                        p.last_seen = now;
                    })
                    .or_insert(PendingChange { kind, last_seen: now });
            }
            Ok(None) => {
                for (path, change) in pending.drain() {
                    sink(path, change.kind);
                }
                return;
            }
            Err(_) => {}
        }

        let now = Instant::now();
        let settled: Vec<(PathBuf, FileChangeKind)> = pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.last_seen) >= debounce)
            .map(|(path, p)| (path.clone(), p.kind))
            .collect();
        for (path, kind) in settled {
            pending.remove(&path);
            debug!("Forwarding {} change for {:?}", kind, path);
            sink(path, kind);
        }
    }
}

/// Convert a notify event into per-path changes for watched extensions.
fn convert_event(event: Event, extensions: &[String]) -> Vec<(PathBuf, FileChangeKind)> {
    let kinds: Vec<FileChangeKind> = match event.kind {
        EventKind::Create(_) => vec![FileChangeKind::Created],
        EventKind::Remove(_) => vec![FileChangeKind::Deleted],
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => vec![FileChangeKind::Deleted],
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => vec![FileChangeKind::Created],
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            vec![FileChangeKind::Deleted, FileChangeKind::Created]
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => vec![FileChangeKind::ContentChanged],
        _ => Vec::new(),
    };
    if kinds.is_empty() {
        return Vec::new();
    }

    event
        .paths
        .into_iter()
        .enumerate()
        .filter(|(_, path)| FileWatcher::should_watch(path, extensions))
        // Renames list the old path first and the new path second.
        .filter_map(|(i, path)| kinds.get(i).or(kinds.last()).map(|kind| (path, *kind)))
        .collect()
}

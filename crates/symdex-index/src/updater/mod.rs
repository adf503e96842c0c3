//! Incremental re-indexing driven by file changes.
//!
//! The updater fingerprints every tracked file, turns polled or reported
//! changes into [`FileUpdateEvent`]s, widens each change to the projects that
//! depend on the changed project, and re-indexes the affected files on the
//! tokio runtime. Reported changes are debounced so a burst of edits becomes
//! one re-index task.

mod events;
mod status;
pub mod watcher;

pub use events::{FileChangeKind, FileUpdateEvent, FileUpdateListener, IndexUpdateEvent, IndexUpdateListener};
pub use status::FileStatus;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collector::{ProjectDescription, ProjectManager, SymbolCollector};
use crate::index::SymbolIndexer;

/// Errors raised when constructing an updater.
#[derive(Error, Debug)]
pub enum UpdaterError {
    #[error("Incremental updater requires a tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Updater configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Quiet period before reported changes are re-indexed as one batch.
    pub debounce: Duration,
    /// How long `shutdown` waits for running tasks before aborting them.
    pub shutdown_grace: Duration,
    /// Re-list project files during `detect_changes` to pick up new files.
    pub scan_for_new_files: bool,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(5),
            scan_for_new_files: false,
        }
    }
}

impl UpdaterConfig {
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_scan_for_new_files(mut self, enabled: bool) -> Self {
        self.scan_for_new_files = enabled;
        self
    }
}

/// Updater counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdaterStats {
    pub cycles_run: u64,
    /// `detect_changes` calls that overlapped a running cycle.
    pub cycles_skipped: u64,
    pub events_raised: u64,
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_cancelled: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cycles_run: AtomicU64,
    cycles_skipped: AtomicU64,
    events_raised: AtomicU64,
    tasks_submitted: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_cancelled: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn snapshot(&self) -> UpdaterStats {
        UpdaterStats {
            cycles_run: self.cycles_run.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            events_raised: self.events_raised.load(Ordering::Relaxed),
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_cancelled: self.tasks_cancelled.load(Ordering::Relaxed),
        }
    }
}

/// File tracking state owned by the updater.
#[derive(Debug, Default)]
struct TrackingState {
    statuses: HashMap<PathBuf, FileStatus>,
    file_projects: HashMap<PathBuf, String>,
    project_files: HashMap<String, BTreeSet<PathBuf>>,
    projects: BTreeMap<String, ProjectDescription>,
}

impl TrackingState {
    fn track(&mut self, path: PathBuf, project: &str, status: FileStatus) {
        self.statuses.insert(path.clone(), status);
        self.project_files
            .entry(project.to_string())
            .or_default()
            .insert(path.clone());
        self.file_projects.insert(path, project.to_string());
    }

    fn untrack(&mut self, path: &Path) {
        self.statuses.remove(path);
        if let Some(project) = self.file_projects.remove(path) {
            if let Some(files) = self.project_files.get_mut(&project) {
                files.remove(path);
            }
        }
    }

    /// Tracked owner, else the project with the longest root containing `path`.
    fn project_of(&self, path: &Path) -> Option<String> {
        if let Some(project) = self.file_projects.get(path) {
            return Some(project.clone());
        }
        self.projects
            .values()
            .filter(|p| path.starts_with(&p.root))
            .max_by_key(|p| p.root.components().count())
            .map(|p| p.name.clone())
    }
}

/// Changes waiting for the debounce timer.
#[derive(Debug, Default)]
struct PendingBatch {
    changes: BTreeMap<PathBuf, FileUpdateEvent>,
    armed: bool,
}

/// Decrements the in-flight count when dropped, including on abort.
struct InFlight(Arc<Shared>);

impl InFlight {
    fn enter(shared: &Arc<Shared>) -> Self {
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(shared))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Clears the detection flag when a cycle ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Shared {
    indexer: Arc<SymbolIndexer>,
    collector: Arc<SymbolCollector>,
    project_manager: Arc<dyn ProjectManager>,
    /// Project -> projects that depend on it directly.
    dependents: HashMap<String, HashSet<String>>,
    config: UpdaterConfig,
    handle: Handle,
    state: Mutex<TrackingState>,
    pending: Mutex<PendingBatch>,
    detecting: AtomicBool,
    file_listeners: RwLock<Vec<Arc<dyn FileUpdateListener>>>,
    index_listeners: RwLock<Vec<Arc<dyn IndexUpdateListener>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    in_flight: AtomicUsize,
    idle: Notify,
    cancel: CancellationToken,
    counters: Counters,
}

impl Shared {
    fn state(&self) -> std::sync::MutexGuard<'_, TrackingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn broadcast(&self, events: &[FileUpdateEvent]) {
        Counters::bump(&self.counters.events_raised, events.len() as u64);
        let listeners = self
            .file_listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for event in events {
            for listener in &listeners {
                listener.on_file_updated(event);
            }
        }
    }

    fn raise_index_update(&self, event: &IndexUpdateEvent) {
        let listeners = self
            .index_listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &listeners {
            listener.on_index_updated(event);
        }
    }

    fn track_task(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    /// Group events by project, add direct dependents, and spawn one
    /// re-index task for the whole batch.
    fn submit(self: &Arc<Self>, events: Vec<FileUpdateEvent>) -> Option<Uuid> {
        if self.cancel.is_cancelled() || events.is_empty() {
            return None;
        }

        let mut work: BTreeMap<String, BTreeSet<PathBuf>> = BTreeMap::new();
        {
            let state = self.state();
            for event in &events {
                let project = event
                    .project
                    .clone()
                    .or_else(|| state.project_of(&event.path));
                let Some(project) = project else {
                    debug!("No project owns {:?}, ignoring", event.path);
                    continue;
                };
                work.entry(project).or_default().insert(event.path.clone());
            }

            let changed: Vec<String> = work.keys().cloned().collect();
            for project in changed {
                let Some(dependents) = self.dependents.get(&project) else {
                    continue;
                };
                for dependent in dependents {
                    let files = state
                        .project_files
                        .get(dependent)
                        .cloned()
                        .unwrap_or_default();
                    work.entry(dependent.clone()).or_default().extend(files);
                }
            }
        }
        if work.is_empty() {
            return None;
        }

        let task_id = Uuid::new_v4();
        Counters::bump(&self.counters.tasks_submitted, 1);
        info!(
            "Submitting re-index task {} for {} project(s) from {} change(s)",
            task_id,
            work.len(),
            events.len()
        );

        let guard = InFlight::enter(self);
        let shared = Arc::clone(self);
        let task = self.handle.spawn(async move {
            let _guard = guard;
            shared.reindex(task_id, work).await;
        });
        self.track_task(task);
        Some(task_id)
    }

    async fn reindex(self: Arc<Self>, task_id: Uuid, work: BTreeMap<String, BTreeSet<PathBuf>>) {
        for (project, files) in work {
            let files: Vec<PathBuf> = files.into_iter().collect();
            let collector = Arc::clone(&self.collector);
            let parse_project = project.clone();
            let parse_files = files.clone();
            let parse = tokio::task::spawn_blocking(move || collector.collect_files(&parse_project, &parse_files));

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    Counters::bump(&self.counters.tasks_cancelled, 1);
                    debug!("Re-index task {} cancelled", task_id);
                    return;
                }
                outcome = parse => outcome,
            };
            let (symbols, errors) = match outcome {
                Ok(parsed) => parsed,
                Err(e) => {
                    error!("Re-index of {} failed in task {}: {}", project, task_id, e);
                    continue;
                }
            };
            for e in &errors {
                warn!("Failed to parse {:?} in {}: {}", e.file, e.project, e.message);
            }

            let delta = self.indexer.replace_files(&files, symbols);
            debug!("Re-indexed {} ({} files): {:?}", project, files.len(), delta);
            self.raise_index_update(&IndexUpdateEvent::new(task_id, project, files, delta));
        }
        Counters::bump(&self.counters.tasks_completed, 1);
    }

    /// Add an event to the debounce buffer, arming the timer if idle.
    fn enqueue(self: &Arc<Self>, event: FileUpdateEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        if self.config.debounce.is_zero() {
            self.submit(vec![event]);
            return;
        }

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.changes.get_mut(&event.path) {
            Some(existing) => {
                existing.kind = existing.kind.merge(event.kind);
                existing.timestamp = event.timestamp;
                if existing.project.is_none() {
                    existing.project = event.project;
                }
            }
            None => {
                pending.changes.insert(event.path.clone(), event);
            }
        }
        if pending.armed {
            return;
        }
        pending.armed = true;
        drop(pending);

        let guard = InFlight::enter(self);
        let shared = Arc::clone(self);
        let timer = self.handle.spawn(async move {
            let _guard = guard;
            tokio::select! {
                _ = shared.cancel.cancelled() => return,
                _ = tokio::time::sleep(shared.config.debounce) => {}
            }
            let batch: Vec<FileUpdateEvent> = {
                let mut pending = shared.pending.lock().unwrap_or_else(PoisonError::into_inner);
                pending.armed = false;
                std::mem::take(&mut pending.changes).into_values().collect()
            };
            debug!("Debounce elapsed with {} pending change(s)", batch.len());
            shared.submit(batch);
        });
        self.track_task(timer);
    }
}

/// Tracks file fingerprints and keeps the index current as files change.
pub struct IncrementalUpdater {
    shared: Arc<Shared>,
}

impl IncrementalUpdater {
    /// Create an updater bound to the current tokio runtime.
    pub fn new(
        indexer: Arc<SymbolIndexer>,
        collector: Arc<SymbolCollector>,
        project_manager: Arc<dyn ProjectManager>,
        dependency_graph: HashMap<String, HashSet<String>>,
        config: UpdaterConfig,
    ) -> Result<Self, UpdaterError> {
        let handle = Handle::try_current()?;

        let mut dependents: HashMap<String, HashSet<String>> = HashMap::new();
        for (project, dependencies) in &dependency_graph {
            for dependency in dependencies {
                dependents
                    .entry(dependency.clone())
                    .or_default()
                    .insert(project.clone());
            }
        }

        Ok(Self {
            shared: Arc::new(Shared {
                indexer,
                collector,
                project_manager,
                dependents,
                config,
                handle,
                state: Mutex::new(TrackingState::default()),
                pending: Mutex::new(PendingBatch::default()),
                detecting: AtomicBool::new(false),
                file_listeners: RwLock::new(Vec::new()),
                index_listeners: RwLock::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                cancel: CancellationToken::new(),
                counters: Counters::default(),
            }),
        })
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.shared.config
    }

    /// Record a fingerprint for every source file of `project`. Returns the
    /// number of files tracked.
    pub fn initialize_project_state(&self, project: &ProjectDescription) -> Result<usize> {
        let files = self
            .shared
            .project_manager
            .source_files(project)
            .with_context(|| format!("Failed to list files of project {}", project.name))?;

        let mut tracked = Vec::with_capacity(files.len());
        for path in files {
            match FileStatus::read(&path) {
                Ok(status) => tracked.push((path, status)),
                Err(e) => debug!("Not tracking {:?}: {}", path, e),
            }
        }

        let count = tracked.len();
        let mut state = self.shared.state();
        state
            .projects
            .insert(project.name.clone(), project.clone());
        for (path, status) in tracked {
            state.track(path, &project.name, status);
        }
        info!("Tracking {} files for project {}", count, project.name);
        Ok(count)
    }

    /// Compare every tracked file against its fingerprint and re-index what
    /// changed. Returns `None` when another cycle is already running.
    pub fn detect_changes(&self) -> Option<Vec<FileUpdateEvent>> {
        let shared = &self.shared;
        if shared
            .detecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            Counters::bump(&shared.counters.cycles_skipped, 1);
            debug!("Change detection already running, skipping");
            return None;
        }
        let _cycle = CycleGuard(&shared.detecting);

        let tracked: Vec<(PathBuf, FileStatus)> = shared
            .state()
            .statuses
            .iter()
            .map(|(path, status)| (path.clone(), *status))
            .collect();

        let mut deleted = Vec::new();
        let mut changed = Vec::new();
        for (path, previous) in tracked {
            match FileStatus::read(&path) {
                Ok(current) if current.differs_from(&previous) => changed.push((path, current)),
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => deleted.push(path),
                Err(e) => warn!("Failed to read metadata of {:?}, skipping this cycle: {}", path, e),
            }
        }

        let created = if shared.config.scan_for_new_files {
            self.scan_new_files()
        } else {
            Vec::new()
        };

        let mut events = Vec::new();
        {
            let mut state = shared.state();
            for path in deleted {
                let project = state.project_of(&path);
                state.untrack(&path);
                events.push(FileUpdateEvent::new(path, FileChangeKind::Deleted, project));
            }
            for (path, status) in changed {
                let project = state.project_of(&path);
                state.statuses.insert(path.clone(), status);
                events.push(FileUpdateEvent::new(path, FileChangeKind::ContentChanged, project));
            }
            for (path, project, status) in created {
                if state.statuses.contains_key(&path) {
                    continue;
                }
                state.track(path.clone(), &project, status);
                events.push(FileUpdateEvent::new(path, FileChangeKind::Created, Some(project)));
            }
        }
        events.sort_by(|a, b| a.path.cmp(&b.path));

        Counters::bump(&shared.counters.cycles_run, 1);
        if !events.is_empty() {
            info!("Detected {} file change(s)", events.len());
            shared.broadcast(&events);
            shared.submit(events.clone());
        }
        Some(events)
    }

    fn scan_new_files(&self) -> Vec<(PathBuf, String, FileStatus)> {
        let (projects, known): (Vec<ProjectDescription>, HashSet<PathBuf>) = {
            let state = self.shared.state();
            (
                state.projects.values().cloned().collect(),
                state.statuses.keys().cloned().collect(),
            )
        };

        let mut created = Vec::new();
        for project in projects {
            let files = match self.shared.project_manager.source_files(&project) {
                Ok(files) => files,
                Err(e) => {
                    warn!("Failed to list files of project {}: {:#}", project.name, e);
                    continue;
                }
            };
            for path in files {
                if known.contains(&path) || !self.shared.project_manager.is_source_file(&path) {
                    continue;
                }
                if let Ok(status) = FileStatus::read(&path) {
                    created.push((path, project.name.clone(), status));
                }
            }
        }
        created
    }

    /// Report an externally observed change. Listeners are told immediately;
    /// re-indexing happens after the debounce period.
    pub fn notify_file_changed(&self, path: impl Into<PathBuf>, kind: FileChangeKind) {
        let path = path.into();
        let project = {
            let mut state = self.shared.state();
            let project = state.project_of(&path);
            match kind {
                FileChangeKind::Deleted => state.untrack(&path),
                FileChangeKind::Created | FileChangeKind::ContentChanged => match FileStatus::read(&path) {
                    Ok(status) => match &project {
                        Some(project) => state.track(path.clone(), project, status),
                        None => {
                            state.statuses.insert(path.clone(), status);
                        }
                    },
                    Err(e) => debug!("Failed to read metadata of {:?}: {}", path, e),
                },
            }
            project
        };

        let event = FileUpdateEvent::new(path, kind, project);
        self.shared.broadcast(std::slice::from_ref(&event));
        self.shared.enqueue(event);
    }

    /// Wait until no re-index task or debounce batch is outstanding. Returns
    /// false if `timeout` elapsed first.
    pub async fn wait_for_updates(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.in_flight.load(Ordering::SeqCst) == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.shared.in_flight.load(Ordering::SeqCst) == 0;
            }
        }
    }

    /// Cancel outstanding work, wait up to the grace period, abort stragglers
    /// and drop all tracking state.
    pub async fn shutdown(&self) {
        let shared = &self.shared;
        shared.cancel.cancel();

        let tasks = std::mem::take(&mut *shared.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        let deadline = tokio::time::Instant::now() + shared.config.shutdown_grace;
        let mut aborted = 0;
        for mut task in tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                task.abort();
                aborted += 1;
            }
        }
        Counters::bump(&shared.counters.tasks_cancelled, aborted);

        *shared.state() = TrackingState::default();
        *shared.pending.lock().unwrap_or_else(PoisonError::into_inner) = PendingBatch::default();
        info!("Incremental updater shut down ({} task(s) aborted)", aborted);
    }

    pub fn add_file_update_listener(&self, listener: Arc<dyn FileUpdateListener>) {
        self.shared
            .file_listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn add_index_update_listener(&self, listener: Arc<dyn IndexUpdateListener>) {
        self.shared
            .index_listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Owning project of `path`, by tracked file or by containing root.
    pub fn project_of(&self, path: &Path) -> Option<String> {
        self.shared.state().project_of(path)
    }

    pub fn tracked_files(&self) -> usize {
        self.shared.state().statuses.len()
    }

    pub fn file_status(&self, path: &Path) -> Option<FileStatus> {
        self.shared.state().statuses.get(path).copied()
    }

    pub fn stats(&self) -> UpdaterStats {
        self.shared.counters.snapshot()
    }
}

//! Symbol collection across a solution.
//!
//! The collector asks a [`ProjectManager`] for each project's source files,
//! hands every supported file to a [`FileParser`], and gathers the output into
//! a [`SymbolCollectionResult`]. Projects are processed in parallel and files
//! within a project are parsed in parallel on a rayon pool. Failures are
//! recorded as data and never abort collection.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use dashmap::DashMap;
use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::symbol::{CollectionError, Symbol, SymbolCollectionResult};

/// A project inside a solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDescription {
    pub name: String,
    /// Directory containing the project's sources.
    pub root: PathBuf,
    /// Names of projects this one depends on.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
}

impl ProjectDescription {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            dependencies: BTreeSet::new(),
        }
    }

    /// Declare a dependency on another project.
    pub fn depends_on(mut self, project: impl Into<String>) -> Self {
        self.dependencies.insert(project.into());
        self
    }
}

/// A set of projects loaded together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solution {
    pub name: String,
    pub projects: Vec<ProjectDescription>,
}

impl Solution {
    pub fn new(name: impl Into<String>, projects: Vec<ProjectDescription>) -> Self {
        Self {
            name: name.into(),
            projects,
        }
    }

    /// Project name to the names of the projects it depends on.
    pub fn dependency_graph(&self) -> HashMap<String, HashSet<String>> {
        self.projects
            .iter()
            .map(|p| (p.name.clone(), p.dependencies.iter().cloned().collect()))
            .collect()
    }

    pub fn project(&self, name: &str) -> Option<&ProjectDescription> {
        self.projects.iter().find(|p| p.name == name)
    }
}

/// Knows which files make up a project.
pub trait ProjectManager: Send + Sync {
    /// Candidate source files of the project, in a stable order.
    fn source_files(&self, project: &ProjectDescription) -> Result<Vec<PathBuf>>;

    /// Whether the path looks like a source file this manager would list.
    fn is_source_file(&self, path: &Path) -> bool;
}

/// Extracts symbols from one source file.
pub trait FileParser: Send + Sync {
    fn parse_file(&self, path: &Path, project: &str) -> Result<Vec<Symbol>>;

    /// Lowercase file extensions without the leading dot.
    fn supported_extensions(&self) -> &[&str];

    fn supports(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.supported_extensions().iter().any(|s| *s == ext)
            })
            .unwrap_or(false)
    }
}

/// Directory names never descended into by [`DirectoryProjectManager`].
const SKIPPED_DIRS: &[&str] = &["target", "node_modules", ".git", "vendor", "bin", "obj"];

/// Lists a project's files by walking its root directory.
#[derive(Debug, Clone)]
pub struct DirectoryProjectManager {
    extensions: Vec<String>,
    respect_gitignore: bool,
}

impl DirectoryProjectManager {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            respect_gitignore: true,
        }
    }

    pub fn with_gitignore(mut self, enabled: bool) -> Self {
        self.respect_gitignore = enabled;
        self
    }
}

impl ProjectManager for DirectoryProjectManager {
    fn source_files(&self, project: &ProjectDescription) -> Result<Vec<PathBuf>> {
        if !project.root.is_dir() {
            anyhow::bail!("project root {:?} is not a directory", project.root);
        }

        let walker = WalkBuilder::new(&project.root)
            .hidden(true)
            .git_ignore(self.respect_gitignore)
            .git_global(self.respect_gitignore)
            .filter_entry(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| !SKIPPED_DIRS.contains(&name))
                    .unwrap_or(true)
            })
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.with_context(|| format!("walking {:?}", project.root))?;
            let path = entry.path();
            if path.is_file() && self.is_source_file(path) {
                files.push(path.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }

    fn is_source_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            })
            .unwrap_or(false)
    }
}

/// Collects symbols for whole solutions or for individual files.
pub struct SymbolCollector {
    project_manager: Arc<dyn ProjectManager>,
    parser: Arc<dyn FileParser>,
    pool: Option<rayon::ThreadPool>,
}

impl SymbolCollector {
    pub fn new(project_manager: Arc<dyn ProjectManager>, parser: Arc<dyn FileParser>) -> Self {
        Self {
            project_manager,
            parser,
            pool: None,
        }
    }

    /// Run collection on a dedicated pool of `threads` workers instead of the
    /// global rayon pool.
    pub fn with_parallelism(mut self, threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("symdex-collect-{i}"))
            .build()
            .context("failed to build collector thread pool")?;
        self.pool = Some(pool);
        Ok(self)
    }

    pub fn project_manager(&self) -> &Arc<dyn ProjectManager> {
        &self.project_manager
    }

    pub fn parser(&self) -> &Arc<dyn FileParser> {
        &self.parser
    }

    /// Collect every project of the solution. Blocks until all projects finish.
    pub fn collect(&self, solution: &Solution) -> SymbolCollectionResult {
        let start = Instant::now();
        info!(
            "Collecting symbols for solution {:?} ({} projects)",
            solution.name,
            solution.projects.len()
        );

        let per_project: DashMap<String, Vec<Symbol>> = DashMap::new();
        let errors: Mutex<Vec<CollectionError>> = Mutex::new(Vec::new());

        let work = || {
            solution.projects.par_iter().for_each(|project| {
                let (symbols, project_errors) = self.collect_project(project);
                if !project_errors.is_empty() {
                    if let Ok(mut errors) = errors.lock() {
                        errors.extend(project_errors);
                    }
                }
                per_project.insert(project.name.clone(), symbols);
            });
        };
        self.run(work);

        let projects: BTreeMap<String, Vec<Symbol>> = per_project.into_iter().collect();
        let mut errors = errors.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        errors.sort_by(|a, b| (&a.project, &a.file).cmp(&(&b.project, &b.file)));

        let result = SymbolCollectionResult::new(projects, errors);
        info!(
            "Collected {} symbols with {} errors in {}ms",
            result.total_symbols(),
            result.errors().len(),
            start.elapsed().as_millis()
        );
        result
    }

    /// Parse exactly `files` for one project. Files that no longer exist or
    /// that the parser does not support are skipped.
    pub fn collect_files(&self, project: &str, files: &[PathBuf]) -> (Vec<Symbol>, Vec<CollectionError>) {
        let candidates: Vec<&PathBuf> = files
            .iter()
            .filter(|path| path.is_file() && self.parser.supports(path))
            .collect();

        let mut outcome = Vec::new();
        self.run(|| {
            outcome = candidates
                .par_iter()
                .map(|path| self.parse_one(project, path))
                .collect();
        });
        split_outcomes(outcome)
    }

    fn collect_project(&self, project: &ProjectDescription) -> (Vec<Symbol>, Vec<CollectionError>) {
        let files = match self.project_manager.source_files(project) {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to list files for project {}: {:#}", project.name, e);
                return (
                    Vec::new(),
                    vec![CollectionError {
                        project: project.name.clone(),
                        file: None,
                        message: format!("{e:#}"),
                    }],
                );
            }
        };

        let supported: Vec<&PathBuf> = files.iter().filter(|f| self.parser.supports(f)).collect();
        debug!(
            "Project {}: {} of {} files supported by parser",
            project.name,
            supported.len(),
            files.len()
        );

        let outcome: Vec<_> = supported
            .par_iter()
            .map(|path| self.parse_one(&project.name, path))
            .collect();
        split_outcomes(outcome)
    }

    fn parse_one(&self, project: &str, path: &Path) -> std::result::Result<Vec<Symbol>, CollectionError> {
        self.parser.parse_file(path, project).map_err(|e| {
            debug!("Failed to parse {:?}: {:#}", path, e);
            CollectionError {
                project: project.to_string(),
                file: Some(path.to_path_buf()),
                message: format!("{e:#}"),
            }
        })
    }

    fn run<F: FnOnce() + Send>(&self, work: F) {
        match &self.pool {
            Some(pool) => pool.install(work),
            None => work(),
        }
    }
}

fn split_outcomes(
    outcome: Vec<std::result::Result<Vec<Symbol>, CollectionError>>,
) -> (Vec<Symbol>, Vec<CollectionError>) {
    let mut symbols = Vec::new();
    let mut errors = Vec::new();
    for item in outcome {
        match item {
            Ok(parsed) => symbols.extend(parsed),
            Err(e) => errors.push(e),
        }
    }
    (symbols, errors)
}

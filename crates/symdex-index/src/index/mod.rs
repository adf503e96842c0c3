//! In-memory symbol indices.
//!
//! The indexer keeps five coordinated maps (name, qualified name, kind,
//! project, file) and a prefix trie inside one immutable [`IndexSnapshot`].
//! Readers clone the current snapshot's `Arc` and never wait on each other.
//! A full rebuild is assembled off-lock and swapped in; incremental updates
//! copy-on-write the snapshot under the write lock.

mod query;
mod trie;

pub use query::IndexQuery;
pub use trie::PrefixTrie;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::symbol::{Symbol, SymbolCollectionResult, SymbolIdentity, SymbolKind};

/// Errors returned by structured index queries.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Invalid name pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Counts describing one index snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Snapshot generation.
    pub generation: u64,
    /// Distinct symbols.
    pub symbols: usize,
    /// Files with at least one symbol.
    pub files: usize,
    pub projects: usize,
    /// Distinct lowercased names.
    pub names: usize,
    /// Trie nodes including the root.
    pub trie_nodes: usize,
}

/// Outcome of an incremental file replacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDelta {
    /// Identities present only after the update.
    pub added: usize,
    /// Identities present only before the update.
    pub removed: usize,
    /// Identities present both before and after.
    pub updated: usize,
}

impl IndexDelta {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.updated == 0
    }
}

/// One consistent state of every index.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    generation: u64,
    by_name: HashMap<String, Vec<Arc<Symbol>>>,
    by_fqn: HashMap<String, Arc<Symbol>>,
    by_kind: HashMap<SymbolKind, Vec<Arc<Symbol>>>,
    by_project: HashMap<String, Vec<Arc<Symbol>>>,
    by_file: HashMap<PathBuf, Vec<Arc<Symbol>>>,
    trie: PrefixTrie,
}

impl IndexSnapshot {
    fn build<'a, I>(symbols: I, generation: u64) -> Self
    where
        I: IntoIterator<Item = &'a Symbol>,
    {
        // Later duplicates replace earlier ones in place.
        let mut order: Vec<Arc<Symbol>> = Vec::new();
        let mut positions: HashMap<SymbolIdentity, usize> = HashMap::new();
        for symbol in symbols {
            let symbol = Arc::new(symbol.clone());
            match positions.get(&symbol.identity()) {
                Some(&i) => order[i] = symbol,
                None => {
                    positions.insert(symbol.identity(), order.len());
                    order.push(symbol);
                }
            }
        }

        let mut snapshot = Self {
            generation,
            ..Self::default()
        };
        for symbol in order {
            snapshot.insert(symbol);
        }
        snapshot
    }

    fn insert(&mut self, symbol: Arc<Symbol>) {
        self.by_name
            .entry(symbol.name.to_lowercase())
            .or_default()
            .push(Arc::clone(&symbol));
        if let Some(fqn) = &symbol.fully_qualified_name {
            self.by_fqn.insert(fqn.clone(), Arc::clone(&symbol));
        }
        self.by_kind
            .entry(symbol.kind)
            .or_default()
            .push(Arc::clone(&symbol));
        self.by_project
            .entry(symbol.project_name.clone())
            .or_default()
            .push(Arc::clone(&symbol));
        self.by_file
            .entry(symbol.file_path.clone())
            .or_default()
            .push(Arc::clone(&symbol));
        self.trie.insert(symbol);
    }

    /// Drop the given symbols (matched by pointer) from every index.
    fn remove_all(&mut self, doomed: &[Arc<Symbol>]) {
        if doomed.is_empty() {
            return;
        }
        let ptrs: HashSet<*const Symbol> = doomed.iter().map(Arc::as_ptr).collect();
        let is_doomed = |s: &Arc<Symbol>| ptrs.contains(&Arc::as_ptr(s));

        let names: HashSet<String> = doomed.iter().map(|s| s.name.to_lowercase()).collect();
        let kinds: HashSet<SymbolKind> = doomed.iter().map(|s| s.kind).collect();
        let projects: HashSet<&str> = doomed.iter().map(|s| s.project_name.as_str()).collect();
        let files: HashSet<&Path> = doomed.iter().map(|s| s.file()).collect();

        for name in &names {
            retain_or_remove(&mut self.by_name, name, |s| !is_doomed(s));
            self.trie
                .remove_where(name, |s| ptrs.contains(&(s as *const Symbol)));
        }
        for kind in kinds {
            retain_or_remove(&mut self.by_kind, &kind, |s| !is_doomed(s));
        }
        for project in projects {
            retain_or_remove(&mut self.by_project, project, |s| !is_doomed(s));
        }
        for file in files {
            retain_or_remove(&mut self.by_file, file, |s| !is_doomed(s));
        }

        // A qualified name owned by a removed symbol falls back to a surviving
        // symbol of the same name and qualified name (partial declarations).
        for symbol in doomed {
            let Some(fqn) = &symbol.fully_qualified_name else {
                continue;
            };
            let owned = self
                .by_fqn
                .get(fqn)
                .is_some_and(|current| ptrs.contains(&Arc::as_ptr(current)));
            if !owned {
                continue;
            }
            let survivor = self
                .by_name
                .get(&symbol.name.to_lowercase())
                .and_then(|list| {
                    list.iter()
                        .rev()
                        .find(|s| s.fully_qualified_name.as_deref() == Some(fqn.as_str()))
                })
                .cloned();
            match survivor {
                Some(s) => {
                    self.by_fqn.insert(fqn.clone(), s);
                }
                None => {
                    self.by_fqn.remove(fqn);
                }
            }
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn find_by_name(&self, name: &str) -> Vec<Arc<Symbol>> {
        self.by_name
            .get(&name.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    pub fn find_by_fully_qualified_name(&self, fqn: &str) -> Option<Arc<Symbol>> {
        self.by_fqn.get(fqn).cloned()
    }

    pub fn find_by_kind(&self, kind: SymbolKind) -> Vec<Arc<Symbol>> {
        self.by_kind.get(&kind).cloned().unwrap_or_default()
    }

    pub fn find_by_project(&self, project: &str) -> Vec<Arc<Symbol>> {
        self.by_project.get(project).cloned().unwrap_or_default()
    }

    pub fn find_by_file(&self, file: &Path) -> Vec<Arc<Symbol>> {
        self.by_file.get(file).cloned().unwrap_or_default()
    }

    pub fn find_by_prefix(&self, prefix: &str) -> Vec<Arc<Symbol>> {
        self.trie.find_prefix(prefix)
    }

    /// Every symbol, grouped by file.
    pub fn all_symbols(&self) -> Vec<Arc<Symbol>> {
        self.by_file.values().flatten().cloned().collect()
    }

    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.by_file.keys().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.by_file.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_file.is_empty()
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            generation: self.generation,
            symbols: self.len(),
            files: self.by_file.len(),
            projects: self.by_project.len(),
            names: self.by_name.len(),
            trie_nodes: self.trie.node_count(),
        }
    }

    /// Evaluate a structured query against this snapshot.
    pub fn search(&self, query: &IndexQuery) -> Result<Vec<Arc<Symbol>>, IndexError> {
        let pattern = match &query.name_pattern {
            Some(pattern) => Some(
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| IndexError::InvalidPattern {
                        pattern: pattern.clone(),
                        source,
                    })?,
            ),
            None => None,
        };

        // Start from the most selective index available.
        let candidates = if let Some(fqn) = &query.fully_qualified_name {
            self.find_by_fully_qualified_name(fqn).into_iter().collect()
        } else if let Some(file) = &query.file {
            self.find_by_file(file)
        } else if let Some(name) = &query.name {
            self.find_by_name(name)
        } else if let Some(prefix) = &query.prefix {
            self.find_by_prefix(prefix)
        } else if let Some(project) = &query.project {
            self.find_by_project(project)
        } else if let Some(kind) = query.kind {
            self.find_by_kind(kind)
        } else {
            self.all_symbols()
        };

        let name = query.name.as_ref().map(|n| n.to_lowercase());
        let prefix = query.prefix.as_ref().map(|p| p.to_lowercase());

        Ok(candidates
            .into_iter()
            .filter(|s| {
                query
                    .fully_qualified_name
                    .as_ref()
                    .map_or(true, |fqn| s.fully_qualified_name.as_ref() == Some(fqn))
            })
            .filter(|s| query.file.as_ref().map_or(true, |f| &s.file_path == f))
            .filter(|s| name.as_ref().map_or(true, |n| &s.name.to_lowercase() == n))
            .filter(|s| {
                prefix
                    .as_ref()
                    .map_or(true, |p| s.name.to_lowercase().starts_with(p.as_str()))
            })
            .filter(|s| query.project.as_ref().map_or(true, |p| &s.project_name == p))
            .filter(|s| query.kind.map_or(true, |k| s.kind == k))
            .filter(|s| pattern.as_ref().map_or(true, |re| re.is_match(&s.name)))
            .collect())
    }
}

fn retain_or_remove<K, Q, F>(map: &mut HashMap<K, Vec<Arc<Symbol>>>, key: &Q, keep: F)
where
    K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
    Q: std::hash::Hash + Eq + ?Sized,
    F: Fn(&Arc<Symbol>) -> bool,
{
    if let Some(list) = map.get_mut(key) {
        list.retain(|s| keep(s));
        if list.is_empty() {
            map.remove(key);
        }
    }
}

/// Thread-safe owner of the current [`IndexSnapshot`].
#[derive(Debug, Default)]
pub struct SymbolIndexer {
    current: RwLock<Arc<IndexSnapshot>>,
}

impl SymbolIndexer {
    /// Create an empty indexer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot. Holding it gives consistent reads across several
    /// queries even while updates land.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation
    }

    /// Replace all indices with the contents of `result`.
    pub fn build_index(&self, result: &SymbolCollectionResult) {
        let start = Instant::now();
        let generation = self.generation() + 1;
        let mut snapshot = IndexSnapshot::build(result.symbols(), generation);

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        // Another writer may have advanced the generation meanwhile.
        snapshot.generation = snapshot.generation.max(current.generation + 1);
        *current = Arc::new(snapshot);
        info!(
            "Index built: {:?} in {:?}",
            current.stats(),
            start.elapsed()
        );
    }

    /// Remove every symbol attributed to `files`, then insert `symbols`, as one
    /// atomic step.
    pub fn replace_files(&self, files: &[PathBuf], symbols: Vec<Symbol>) -> IndexDelta {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let snapshot = Arc::make_mut(&mut *current);

        let mut doomed: Vec<Arc<Symbol>> = Vec::new();
        for file in files {
            if let Some(list) = snapshot.by_file.get(file) {
                doomed.extend(list.iter().cloned());
            }
        }

        // Deduplicate the incoming batch, last occurrence wins.
        let mut incoming: Vec<Arc<Symbol>> = Vec::new();
        let mut positions: HashMap<SymbolIdentity, usize> = HashMap::new();
        for symbol in symbols {
            let identity = symbol.identity();
            let symbol = Arc::new(symbol);
            match positions.get(&identity) {
                Some(&i) => incoming[i] = symbol,
                None => {
                    positions.insert(identity, incoming.len());
                    incoming.push(symbol);
                }
            }
        }

        // Incoming symbols attributed to files outside `files` replace any
        // existing symbol with the same identity.
        let replaced_files: HashSet<&PathBuf> = files.iter().collect();
        for symbol in &incoming {
            if replaced_files.contains(&symbol.file_path) {
                continue;
            }
            if let Some(list) = snapshot.by_file.get(&symbol.file_path) {
                if let Some(existing) = list.iter().find(|s| ***s == **symbol) {
                    if !doomed.iter().any(|d| Arc::ptr_eq(d, existing)) {
                        doomed.push(Arc::clone(existing));
                    }
                }
            }
        }

        let before: HashSet<SymbolIdentity> = doomed.iter().map(|s| s.identity()).collect();
        let updated = incoming.iter().filter(|s| before.contains(&s.identity())).count();
        let delta = IndexDelta {
            added: incoming.len() - updated,
            removed: before.len() - updated,
            updated,
        };

        snapshot.remove_all(&doomed);
        for symbol in incoming {
            snapshot.insert(symbol);
        }
        snapshot.generation += 1;

        debug!(
            "Replaced {} file(s): {:?} (generation {})",
            files.len(),
            delta,
            snapshot.generation
        );
        delta
    }

    /// Remove every symbol attributed to `files`.
    pub fn remove_files(&self, files: &[PathBuf]) -> IndexDelta {
        self.replace_files(files, Vec::new())
    }

    /// Drop every symbol.
    pub fn clear(&self) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let generation = current.generation + 1;
        *current = Arc::new(IndexSnapshot {
            generation,
            ..IndexSnapshot::default()
        });
    }

    pub fn find_by_name(&self, name: &str) -> Vec<Arc<Symbol>> {
        self.snapshot().find_by_name(name)
    }

    pub fn find_by_fully_qualified_name(&self, fqn: &str) -> Option<Arc<Symbol>> {
        self.snapshot().find_by_fully_qualified_name(fqn)
    }

    pub fn find_by_kind(&self, kind: SymbolKind) -> Vec<Arc<Symbol>> {
        self.snapshot().find_by_kind(kind)
    }

    pub fn find_by_project(&self, project: &str) -> Vec<Arc<Symbol>> {
        self.snapshot().find_by_project(project)
    }

    pub fn find_by_file(&self, file: &Path) -> Vec<Arc<Symbol>> {
        self.snapshot().find_by_file(file)
    }

    pub fn find_by_prefix(&self, prefix: &str) -> Vec<Arc<Symbol>> {
        self.snapshot().find_by_prefix(prefix)
    }

    pub fn search(&self, query: &IndexQuery) -> Result<Vec<Arc<Symbol>>, IndexError> {
        self.snapshot().search(query)
    }

    pub fn all_symbols(&self) -> Vec<Arc<Symbol>> {
        self.snapshot().all_symbols()
    }

    pub fn stats(&self) -> IndexStats {
        self.snapshot().stats()
    }
}

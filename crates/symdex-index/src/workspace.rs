//! Wiring of collector, cache, indexer and searcher for one solution.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::cache::SymbolCache;
use crate::collector::{Solution, SymbolCollector};
use crate::index::SymbolIndexer;
use crate::search::SymbolSearcher;
use crate::symbol::SymbolCollectionResult;

/// Loads solutions into a shared index, reusing cached collection results.
pub struct SymbolWorkspace {
    collector: Arc<SymbolCollector>,
    cache: Arc<SymbolCache>,
    indexer: Arc<SymbolIndexer>,
    searcher: Arc<SymbolSearcher>,
}

impl SymbolWorkspace {
    /// Create a new workspace. The searcher is built over `indexer`.
    pub fn new(collector: Arc<SymbolCollector>, cache: Arc<SymbolCache>, indexer: Arc<SymbolIndexer>) -> Self {
        let searcher = Arc::new(SymbolSearcher::new(Arc::clone(&indexer)));
        Self {
            collector,
            cache,
            indexer,
            searcher,
        }
    }

    /// Collect `solution` (or reuse the cached result for `version`) and
    /// rebuild the index from it.
    pub fn load_solution(&self, solution: &Solution, version: Option<&str>) -> Arc<SymbolCollectionResult> {
        let start = Instant::now();
        let result = match self.cache.get_symbol_result(&solution.name, version) {
            Some(cached) => {
                debug!("Using cached symbols for solution {}", solution.name);
                cached
            }
            None => {
                let collected = self.collector.collect(solution);
                self.cache.cache_symbol_result(&solution.name, &collected, version);
                Arc::new(collected)
            }
        };

        self.indexer.build_index(&result);
        info!(
            "Loaded solution {}: {} symbols, {} errors in {:?}",
            solution.name,
            result.total_symbols(),
            result.errors().len(),
            start.elapsed()
        );
        result
    }

    pub fn collector(&self) -> &Arc<SymbolCollector> {
        &self.collector
    }

    pub fn cache(&self) -> &Arc<SymbolCache> {
        &self.cache
    }

    pub fn indexer(&self) -> &Arc<SymbolIndexer> {
        &self.indexer
    }

    pub fn searcher(&self) -> &Arc<SymbolSearcher> {
        &self.searcher
    }
}

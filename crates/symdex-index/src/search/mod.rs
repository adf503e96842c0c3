//! Ranked symbol search.
//!
//! A query runs through up to four strategies against one index snapshot:
//! exact lookups in exact mode, otherwise the prefix trie, fuzzy
//! edit-distance matching and a regular expression, in that order, stopping
//! as soon as enough candidates exist. Candidates are deduplicated by
//! identity, filtered, scored, sorted and cached per index generation.

mod options;
pub mod scoring;

pub use options::{SearchOptions, SortStrategy};

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use dashmap::DashMap;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::index::{IndexSnapshot, SymbolIndexer};
use crate::symbol::{Symbol, SymbolIdentity};
use options::OptionsKey;
use scoring::{fuzzy_score, prefix_score, tie_break, EXACT_FQN_SCORE, EXACT_NAME_SCORE, REGEX_SCORE};

/// Cached result lists kept per generation before the cache is reset.
const RESULT_CACHE_LIMIT: usize = 1024;

/// Which strategy produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Exact,
    Prefix,
    Fuzzy,
    Regex,
}

/// A scored search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub symbol: Arc<Symbol>,
    /// Relevance in `[0, 1]`.
    pub score: f32,
    pub strategy: MatchStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    generation: u64,
    query: String,
    options: OptionsKey,
}

/// Collects hits, dropping repeated identities and inadmissible symbols.
struct Candidates<'a> {
    options: &'a SearchOptions,
    seen: HashSet<SymbolIdentity>,
    hits: Vec<SearchHit>,
}

impl<'a> Candidates<'a> {
    fn new(options: &'a SearchOptions) -> Self {
        Self {
            options,
            seen: HashSet::new(),
            hits: Vec::new(),
        }
    }

    fn offer(&mut self, symbol: &Arc<Symbol>, score: f32, strategy: MatchStrategy) {
        if score < self.options.min_score || !self.options.allows(symbol.kind, &symbol.project_name) {
            return;
        }
        if self.seen.insert(symbol.identity()) {
            self.hits.push(SearchHit {
                symbol: Arc::clone(symbol),
                score,
                strategy,
            });
        }
    }

    fn is_full(&self) -> bool {
        self.hits.len() >= self.options.max_results
    }
}

/// Multi-strategy ranked search over a [`SymbolIndexer`].
pub struct SymbolSearcher {
    indexer: Arc<SymbolIndexer>,
    results: DashMap<CacheKey, Arc<Vec<SearchHit>>>,
    cached_generation: AtomicU64,
}

impl SymbolSearcher {
    /// Create a new searcher over `indexer`.
    pub fn new(indexer: Arc<SymbolIndexer>) -> Self {
        Self {
            indexer,
            results: DashMap::new(),
            cached_generation: AtomicU64::new(0),
        }
    }

    pub fn indexer(&self) -> &Arc<SymbolIndexer> {
        &self.indexer
    }

    /// Search for `query`. Repeated calls with the same query and options
    /// return the same list until the index changes.
    pub fn search(&self, query: &str, options: &SearchOptions) -> Arc<Vec<SearchHit>> {
        let snapshot = self.indexer.snapshot();
        let generation = snapshot.generation();
        if self.cached_generation.swap(generation, AtomicOrdering::AcqRel) != generation {
            self.results.clear();
        }

        // Keyed as typed: qualified-name lookups and regex escapes are
        // case-significant even in case-insensitive searches.
        let query = query.trim();
        let key = CacheKey {
            generation,
            query: query.to_string(),
            options: options.key(),
        };
        if let Some(cached) = self.results.get(&key) {
            return Arc::clone(cached.value());
        }

        let hits = Arc::new(Self::run(&snapshot, query, options));
        debug!("Search {:?} produced {} hit(s)", query, hits.len());

        if self.results.len() >= RESULT_CACHE_LIMIT {
            self.results.clear();
        }
        self.results.insert(key, Arc::clone(&hits));
        hits
    }

    fn run(snapshot: &IndexSnapshot, query: &str, options: &SearchOptions) -> Vec<SearchHit> {
        if query.is_empty() || options.max_results == 0 {
            return Vec::new();
        }
        let mut candidates = Candidates::new(options);

        if options.exact_match {
            Self::exact(snapshot, query, options, &mut candidates);
        } else {
            if options.prefix {
                Self::prefix(snapshot, query, options, &mut candidates);
            }
            if options.fuzzy && !candidates.is_full() {
                Self::fuzzy(snapshot, query, options, &mut candidates);
            }
            if options.regex && !candidates.is_full() {
                Self::regex(snapshot, query, options, &mut candidates);
            }
        }

        let mut hits = candidates.hits;
        sort_hits(&mut hits, options.sort);
        hits.truncate(options.max_results);
        hits
    }

    fn exact(snapshot: &IndexSnapshot, query: &str, options: &SearchOptions, out: &mut Candidates<'_>) {
        if let Some(symbol) = snapshot.find_by_fully_qualified_name(query) {
            out.offer(&symbol, EXACT_FQN_SCORE, MatchStrategy::Exact);
        }
        for symbol in snapshot.find_by_name(query) {
            if !options.case_sensitive || symbol.name == query {
                out.offer(&symbol, EXACT_NAME_SCORE, MatchStrategy::Exact);
            }
        }
    }

    fn prefix(snapshot: &IndexSnapshot, query: &str, options: &SearchOptions, out: &mut Candidates<'_>) {
        let mut scored: Vec<(Arc<Symbol>, f32)> = snapshot
            .find_by_prefix(query)
            .into_iter()
            .filter_map(|s| prefix_score(&s, query, options.case_sensitive).map(|score| (s, score)))
            .collect();
        sort_scored(&mut scored);
        for (symbol, score) in scored {
            out.offer(&symbol, score, MatchStrategy::Prefix);
        }
    }

    fn fuzzy(snapshot: &IndexSnapshot, query: &str, options: &SearchOptions, out: &mut Candidates<'_>) {
        let mut scored: Vec<(Arc<Symbol>, f32)> = snapshot
            .all_symbols()
            .into_iter()
            .filter_map(|s| fuzzy_score(&s, query, options.case_sensitive).map(|score| (s, score)))
            .collect();
        sort_scored(&mut scored);
        for (symbol, score) in scored {
            out.offer(&symbol, score, MatchStrategy::Fuzzy);
        }
    }

    fn regex(snapshot: &IndexSnapshot, query: &str, options: &SearchOptions, out: &mut Candidates<'_>) {
        let pattern = match RegexBuilder::new(query)
            .case_insensitive(!options.case_sensitive)
            .build()
        {
            Ok(pattern) => pattern,
            Err(e) => {
                warn!("Skipping regex strategy for {:?}: {}", query, e);
                return;
            }
        };
        let mut matched: Vec<(Arc<Symbol>, f32)> = snapshot
            .all_symbols()
            .into_iter()
            .filter(|s| pattern.is_match(&s.name))
            .map(|s| (s, REGEX_SCORE))
            .collect();
        sort_scored(&mut matched);
        for (symbol, score) in matched {
            out.offer(&symbol, score, MatchStrategy::Regex);
        }
    }

    /// Drop every cached result list.
    pub fn clear_cache(&self) {
        self.results.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.results.len()
    }
}

/// Best first, so the strategy's strongest candidates are admitted before the
/// result bound is reached.
fn sort_scored(scored: &mut [(Arc<Symbol>, f32)]) {
    scored.sort_by(|(a, sa), (b, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(Ordering::Equal)
            .then_with(|| tie_break(a, b))
    });
}

fn sort_hits(hits: &mut [SearchHit], strategy: SortStrategy) {
    hits.sort_by(|a, b| {
        let (x, y) = (&a.symbol, &b.symbol);
        let primary = match strategy {
            SortStrategy::Relevance => b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal),
            SortStrategy::Name => x.name.to_lowercase().cmp(&y.name.to_lowercase()),
            SortStrategy::Location => x
                .file_path
                .cmp(&y.file_path)
                .then_with(|| x.range.cmp(&y.range)),
            SortStrategy::Kind => x.kind.cmp(&y.kind),
            SortStrategy::Project => x.project_name.cmp(&y.project_name),
        };
        primary
            .then_with(|| tie_break(x, y))
            .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{SymbolCollectionResult, SymbolKind};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn sym(name: &str, kind: SymbolKind, fqn: &str, file: &str, project: &str) -> Symbol {
        Symbol::new(name, kind, file, project).with_fqn(fqn)
    }

    fn indexer() -> Arc<SymbolIndexer> {
        let mut projects = BTreeMap::new();
        projects.insert(
            "App".to_string(),
            vec![
                sym("Program", SymbolKind::Class, "App.Program", "app/Program.cs", "App"),
                sym("ProgramOptions", SymbolKind::Class, "App.ProgramOptions", "app/Options.cs", "App"),
                sym("Main", SymbolKind::Method, "App.Program.Main", "app/Program.cs", "App")
                    .with_range(3, 5, 9, 5),
                sym("Progress", SymbolKind::Property, "App.Program.Progress", "app/Program.cs", "App")
                    .with_range(12, 5, 12, 40),
            ],
        );
        projects.insert(
            "Lib".to_string(),
            vec![
                sym("Widget", SymbolKind::Class, "Lib.Widget", "lib/Widget.cs", "Lib"),
                sym("WidgetFactory", SymbolKind::Class, "Lib.WidgetFactory", "lib/Widget.cs", "Lib")
                    .with_range(20, 1, 40, 1),
                sym("Program", SymbolKind::Class, "Lib.Program", "lib/Program.cs", "Lib"),
            ],
        );
        let indexer = Arc::new(SymbolIndexer::new());
        indexer.build_index(&SymbolCollectionResult::new(projects, Vec::new()));
        indexer
    }

    fn names(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.symbol.name.as_str()).collect()
    }

    #[test]
    fn test_prefix_ranking() {
        let searcher = SymbolSearcher::new(indexer());
        let hits = searcher.search("Prog", &SearchOptions::default().with_strategies(true, false, false));

        assert_eq!(names(&hits), vec!["Program", "Program", "Progress", "ProgramOptions"]);
        assert!(hits.iter().all(|h| h.score >= 0.8));
        assert!(hits.iter().all(|h| h.strategy == MatchStrategy::Prefix));
    }

    #[test]
    fn test_exact_mode_keeps_fqn_score() {
        let searcher = SymbolSearcher::new(indexer());
        let options = SearchOptions::default().with_exact_match(true);

        let hits = searcher.search("App.Program", &options);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].score, EXACT_FQN_SCORE);

        let hits = searcher.search("program", &options);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.score == EXACT_NAME_SCORE));

        let hits = searcher.search("program", &options.clone().with_case_sensitive(true));
        assert!(hits.is_empty());
    }

    #[test]
    fn test_fuzzy_finds_typos() {
        let searcher = SymbolSearcher::new(indexer());
        let hits = searcher.search("Widgte", &SearchOptions::default().with_strategies(false, true, false));
        assert_eq!(names(&hits)[0], "Widget");
        assert!(hits.iter().all(|h| h.strategy == MatchStrategy::Fuzzy));
    }

    #[test]
    fn test_regex_strategy_and_invalid_pattern() {
        let searcher = SymbolSearcher::new(indexer());
        let regex_only = SearchOptions::default().with_strategies(false, false, true);

        let hits = searcher.search("^widget.*y$", &regex_only);
        assert_eq!(names(&hits), vec!["WidgetFactory"]);
        assert_eq!(hits[0].score, REGEX_SCORE);

        assert!(searcher.search("(unclosed", &regex_only).is_empty());
    }

    #[test]
    fn test_allow_lists_and_sorting() {
        let searcher = SymbolSearcher::new(indexer());
        let options = SearchOptions::default()
            .with_project("App")
            .with_kind(SymbolKind::Class)
            .with_sort(SortStrategy::Location);
        let hits = searcher.search("prog", &options);

        assert!(hits
            .iter()
            .all(|h| h.symbol.project_name == "App" && h.symbol.kind == SymbolKind::Class));
        let files: Vec<&PathBuf> = hits.iter().map(|h| &h.symbol.file_path).collect();
        let mut sorted = files.clone();
        sorted.sort();
        assert_eq!(files, sorted);
    }

    #[test]
    fn test_max_results_short_circuits() {
        let searcher = SymbolSearcher::new(indexer());
        let hits = searcher.search("Prog", &SearchOptions::default().with_max_results(2));
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.strategy == MatchStrategy::Prefix));
        assert_eq!(names(&hits), vec!["Program", "Program"]);
    }

    #[test]
    fn test_cache_is_stable_until_index_changes() {
        let indexer = indexer();
        let searcher = SymbolSearcher::new(Arc::clone(&indexer));
        let options = SearchOptions::default();

        let first = searcher.search("Widget", &options);
        let second = searcher.search("  Widget ", &options);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(searcher.cache_len(), 1);

        indexer.remove_files(&[PathBuf::from("lib/Widget.cs")]);
        let third = searcher.search("Widget", &options);
        assert!(!Arc::ptr_eq(&first, &third));
        assert!(third.iter().all(|h| h.symbol.name != "Widget"));
        assert_eq!(searcher.cache_len(), 1);
    }

    #[test]
    fn test_cache_does_not_fold_query_case() {
        let warmed = SymbolSearcher::new(indexer());
        let fresh = SymbolSearcher::new(indexer());

        let exact = SearchOptions::default().with_exact_match(true);
        assert_eq!(warmed.search("App.Program", &exact).len(), 1);
        assert_eq!(
            warmed.search("app.program", &exact).len(),
            fresh.search("app.program", &exact).len()
        );
        assert!(warmed.search("app.program", &exact).is_empty());

        let regex_only = SearchOptions::default().with_strategies(false, false, true);
        assert!(!warmed.search(r"\w", &regex_only).is_empty());
        assert_eq!(
            names(&warmed.search(r"\W", &regex_only)),
            names(&fresh.search(r"\W", &regex_only))
        );
        assert!(warmed.search(r"\W", &regex_only).is_empty());
    }

    #[test]
    fn test_min_score_and_empty_query() {
        let searcher = SymbolSearcher::new(indexer());
        let hits = searcher.search("Prog", &SearchOptions::default().with_min_score(0.95));
        assert!(hits.iter().all(|h| h.score >= 0.95));
        assert!(searcher.search("   ", &SearchOptions::default()).is_empty());
    }

    #[test]
    fn test_sort_by_name_and_kind() {
        let searcher = SymbolSearcher::new(indexer());
        let by_name = searcher.search("Prog", &SearchOptions::default().with_sort(SortStrategy::Name));
        let lowered: Vec<String> = by_name.iter().map(|h| h.symbol.name.to_lowercase()).collect();
        let mut sorted = lowered.clone();
        sorted.sort();
        assert_eq!(lowered, sorted);

        let by_kind = searcher.search("Prog", &SearchOptions::default().with_sort(SortStrategy::Kind));
        let kinds: Vec<SymbolKind> = by_kind.iter().map(|h| h.symbol.kind).collect();
        let mut sorted = kinds.clone();
        sorted.sort();
        assert_eq!(kinds, sorted);
    }
}

//! symdex command line.
//!
//! Symbols are read from per-file JSON dumps (one array of symbols per
//! source file) produced by an external extractor.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use symdex_config::Config;
use symdex_index::{
    CacheConfig, DirectoryProjectManager, FileParser, FileWatcher, IncrementalUpdater, IndexQuery,
    IndexUpdateEvent, ProjectManager, SearchOptions, Solution, SortStrategy, Symbol, SymbolCache,
    SymbolCollectionResult, SymbolCollector, SymbolIndexer, SymbolKind, SymbolSearcher, SymbolWorkspace,
    UpdaterConfig, WatcherConfig,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// symdex - symbol indexing and ranked search
#[derive(Parser, Debug)]
#[command(name = "symdex", version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./symdex.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect a solution and write its symbols as a JSON snapshot
    Collect {
        /// Solution description (JSON)
        #[arg(long)]
        solution: PathBuf,
        /// Snapshot output path
        #[arg(long, short)]
        output: PathBuf,
        /// Version tag used for the symbol cache
        #[arg(long)]
        version: Option<String>,
    },
    /// Ranked search over a snapshot
    Search {
        #[arg(long)]
        snapshot: PathBuf,
        query: String,
        #[arg(long)]
        max_results: Option<usize>,
        #[arg(long)]
        exact: bool,
        #[arg(long)]
        case_sensitive: bool,
        /// relevance, name, location, kind or project
        #[arg(long)]
        sort: Option<String>,
        #[arg(long = "kind")]
        kinds: Vec<String>,
        #[arg(long = "project")]
        projects: Vec<String>,
    },
    /// Structured index lookup over a snapshot
    Lookup {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        fqn: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
        /// Case-insensitive regex over names
        #[arg(long)]
        pattern: Option<String>,
    },
    /// Print index statistics for a snapshot
    Stats {
        #[arg(long)]
        snapshot: PathBuf,
    },
    /// Index a solution and keep it current until interrupted
    Watch {
        #[arg(long)]
        solution: PathBuf,
    },
}

/// Reads a JSON array of symbols, attributing every symbol to the dump file
/// and the owning project.
struct JsonSymbolParser {
    extensions: Vec<&'static str>,
}

impl JsonSymbolParser {
    /// Extensions are lowercased and interned for the life of the process.
    fn new(extensions: &[String]) -> Self {
        Self {
            extensions: extensions
                .iter()
                .map(|e| -> &'static str { e.trim_start_matches('.').to_ascii_lowercase().leak() })
                .collect(),
        }
    }
}

impl FileParser for JsonSymbolParser {
    fn parse_file(&self, path: &Path, project: &str) -> Result<Vec<Symbol>> {
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let mut symbols: Vec<Symbol> =
            serde_json::from_str(&text).with_context(|| format!("Failed to parse symbols in {:?}", path))?;
        for symbol in &mut symbols {
            symbol.file_path = path.to_path_buf();
            symbol.project_name = project.to_string();
        }
        Ok(symbols)
    }

    fn supported_extensions(&self) -> &[&str] {
        &self.extensions
    }
}

fn cache_config(config: &Config) -> CacheConfig {
    let settings = &config.cache;
    CacheConfig {
        max_entries: settings.max_entries,
        eviction_ratio: settings.eviction_ratio,
        default_ttl: Duration::from_secs(settings.default_ttl_secs),
        cleanup_interval: Duration::from_secs(settings.cleanup_interval_secs),
        disk_dir: settings.disk_dir_path(),
    }
}

fn updater_config(config: &Config) -> UpdaterConfig {
    UpdaterConfig {
        debounce: Duration::from_millis(config.updater.debounce_ms),
        shutdown_grace: Duration::from_secs(config.updater.shutdown_grace_secs),
        scan_for_new_files: config.updater.scan_for_new_files,
    }
}

fn base_search_options(config: &Config) -> Result<SearchOptions> {
    let settings = &config.search;
    let sort: SortStrategy = settings.sort.parse().map_err(anyhow::Error::msg)?;
    Ok(SearchOptions::default()
        .with_max_results(settings.max_results)
        .with_case_sensitive(settings.case_sensitive)
        .with_sort(sort)
        .with_strategies(settings.prefix, settings.fuzzy, settings.regex)
        .with_min_score(settings.min_score))
}

fn parse_kind(kind: &str) -> Result<SymbolKind> {
    kind.parse().map_err(anyhow::Error::msg)
}

fn build_collector(config: &Config) -> Result<(Arc<dyn ProjectManager>, Arc<SymbolCollector>)> {
    let extensions = &config.collector.extensions;
    let manager: Arc<dyn ProjectManager> = Arc::new(
        DirectoryProjectManager::new(extensions.iter().cloned())
            .with_gitignore(config.collector.respect_gitignore),
    );
    let mut collector = SymbolCollector::new(Arc::clone(&manager), Arc::new(JsonSymbolParser::new(extensions)));
    if let Some(threads) = config.collector.parallelism {
        collector = collector.with_parallelism(threads)?;
    }
    Ok((manager, Arc::new(collector)))
}

fn read_solution(path: &Path) -> Result<Solution> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read solution {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid solution file {:?}", path))
}

fn load_snapshot(path: &Path) -> Result<Arc<SymbolIndexer>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read snapshot {:?}", path))?;
    let result: SymbolCollectionResult =
        serde_json::from_str(&text).with_context(|| format!("Invalid snapshot {:?}", path))?;
    let indexer = Arc::new(SymbolIndexer::new());
    indexer.build_index(&result);
    Ok(indexer)
}

fn print_symbol(symbol: &Symbol) {
    println!(
        "{:<14} {:<40} {}:{}",
        symbol.kind.as_str(),
        symbol.fully_qualified_name.as_deref().unwrap_or(&symbol.name),
        symbol.file_path.display(),
        symbol.range.start_line
    );
}

async fn watch(config: &Config, solution: Solution) -> Result<()> {
    let (manager, collector) = build_collector(config)?;
    let cache = Arc::new(SymbolCache::new(cache_config(config)));
    let workspace = SymbolWorkspace::new(Arc::clone(&collector), cache, Arc::new(SymbolIndexer::new()));
    workspace.load_solution(&solution, None);

    let updater = Arc::new(IncrementalUpdater::new(
        Arc::clone(workspace.indexer()),
        collector,
        manager,
        solution.dependency_graph(),
        updater_config(config),
    )?);
    for project in &solution.projects {
        updater.initialize_project_state(project)?;
    }
    updater.add_index_update_listener(Arc::new(|event: &IndexUpdateEvent| {
        info!(
            "Re-indexed {} ({} files): +{} -{} ~{}",
            event.project,
            event.affected_files.len(),
            event.added,
            event.removed,
            event.updated
        );
    }));

    let watcher_config = WatcherConfig {
        debounce: Duration::from_millis(config.updater.watch_debounce_ms),
        extensions: config.collector.extensions.clone(),
    };
    let mut watchers = Vec::new();
    for project in &solution.projects {
        let mut watcher = FileWatcher::new(&project.root, watcher_config.clone());
        match watcher.start(Arc::clone(&updater)) {
            Ok(()) => watchers.push(watcher),
            Err(e) => warn!("Not watching project {}: {}", project.name, e),
        }
    }

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    for watcher in &mut watchers {
        watcher.stop();
    }
    updater.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Collect {
            solution,
            output,
            version,
        } => {
            let solution = read_solution(&solution)?;
            let (_, collector) = build_collector(&config)?;
            let cache = Arc::new(SymbolCache::new(cache_config(&config)));
            let workspace = SymbolWorkspace::new(collector, cache, Arc::new(SymbolIndexer::new()));
            let result = workspace.load_solution(&solution, version.as_deref());
            for error in result.errors() {
                warn!("{}: {:?}: {}", error.project, error.file, error.message);
            }
            let json = serde_json::to_string_pretty(&*result)?;
            std::fs::write(&output, json).with_context(|| format!("Failed to write {:?}", output))?;
            println!("{} symbols written to {}", result.total_symbols(), output.display());
        }
        Command::Search {
            snapshot,
            query,
            max_results,
            exact,
            case_sensitive,
            sort,
            kinds,
            projects,
        } => {
            let searcher = SymbolSearcher::new(load_snapshot(&snapshot)?);
            let mut options = base_search_options(&config)?;
            if let Some(max) = max_results {
                options = options.with_max_results(max);
            }
            if let Some(sort) = sort {
                options = options.with_sort(sort.parse().map_err(anyhow::Error::msg)?);
            }
            let case_sensitive = case_sensitive || options.case_sensitive;
            options = options
                .with_exact_match(exact)
                .with_case_sensitive(case_sensitive);
            for kind in &kinds {
                options = options.with_kind(parse_kind(kind)?);
            }
            for project in projects {
                options = options.with_project(project);
            }

            for hit in searcher.search(&query, &options).iter() {
                print!("{:.2} {:<7} ", hit.score, format!("{:?}", hit.strategy).to_lowercase());
                print_symbol(&hit.symbol);
            }
        }
        Command::Lookup {
            snapshot,
            fqn,
            name,
            prefix,
            kind,
            project,
            file,
            pattern,
        } => {
            let indexer = load_snapshot(&snapshot)?;
            let query = IndexQuery {
                fully_qualified_name: fqn,
                name,
                prefix,
                kind: kind.as_deref().map(parse_kind).transpose()?,
                project,
                file,
                name_pattern: pattern,
            };
            for symbol in indexer.search(&query)? {
                print_symbol(&symbol);
            }
        }
        Command::Stats { snapshot } => {
            let indexer = load_snapshot(&snapshot)?;
            println!("{}", serde_json::to_string_pretty(&indexer.stats())?);
        }
        Command::Watch { solution } => {
            let solution = read_solution(&solution)?;
            watch(&config, solution).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_parser_reports_configured_extensions() {
        let parser = JsonSymbolParser::new(&["SYMS".to_string(), ".dump".to_string()]);
        assert_eq!(parser.supported_extensions(), ["syms", "dump"]);
        assert!(parser.supports(Path::new("a.SYMS")));
        assert!(parser.supports(Path::new("b.dump")));
        assert!(!parser.supports(Path::new("c.json")));
    }

    #[test]
    fn test_json_parser_attributes_symbols_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Widget.syms");
        let symbol = Symbol::new("Widget", SymbolKind::Class, "elsewhere.cs", "Other");
        std::fs::write(&path, serde_json::to_string(&vec![symbol]).unwrap()).unwrap();

        let parser = JsonSymbolParser::new(&["syms".to_string()]);
        let symbols = parser.parse_file(&path, "Core").unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].file_path, path);
        assert_eq!(symbols[0].project_name, "Core");
    }
}

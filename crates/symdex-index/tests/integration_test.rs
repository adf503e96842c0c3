//! Integration tests for symdex-index.
//!
//! These tests drive the public API end to end: collection, indexing,
//! caching, incremental updates and ranked search.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::tempdir;

use symdex_index::{
    CacheConfig, DirectoryProjectManager, FileChangeKind, FileParser, IncrementalUpdater, IndexUpdateEvent,
    ProjectDescription, ProjectManager, SearchOptions, Solution, Symbol, SymbolCache, SymbolCollector,
    SymbolIndexer, SymbolKind, SymbolWorkspace, UpdaterConfig,
};

/// Parses lines of the form `kind Name` into symbols qualified by project.
struct LineParser;

impl FileParser for LineParser {
    fn parse_file(&self, path: &Path, project: &str) -> anyhow::Result<Vec<Symbol>> {
        let text = fs::read_to_string(path)?;
        let mut symbols = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let Some((kind, name)) = line.trim().split_once(' ') else {
                continue;
            };
            let kind: SymbolKind = kind.parse().map_err(|e| anyhow::anyhow!("{e}"))?;
            let line_no = i as u32 + 1;
            symbols.push(
                Symbol::new(name, kind, path, project)
                    .with_fqn(format!("{project}.{name}"))
                    .with_range(line_no, 1, line_no, 1 + line.len() as u32),
            );
        }
        Ok(symbols)
    }

    fn supported_extensions(&self) -> &[&str] {
        &["sym"]
    }
}

struct Setup {
    _dir: tempfile::TempDir,
    solution: Solution,
    manager: Arc<dyn ProjectManager>,
    collector: Arc<SymbolCollector>,
}

impl Setup {
    fn root(&self, project: &str) -> PathBuf {
        self.solution.project(project).map(|p| p.root.clone()).unwrap()
    }
}

fn setup() -> Setup {
    let dir = tempdir().unwrap();
    let core = dir.path().join("core");
    let app = dir.path().join("app");
    fs::create_dir_all(&core).unwrap();
    fs::create_dir_all(&app).unwrap();

    fs::write(core.join("Widget.sym"), "class Widget\nmethod Render\n").unwrap();
    fs::write(core.join("Util.sym"), "class Util\nfield Count\n").unwrap();
    fs::write(app.join("Program.sym"), "class Program\nmethod Main\n").unwrap();
    fs::write(app.join("Options.sym"), "class ProgramOptions\nproperty Verbose\n").unwrap();
    fs::write(app.join("notes.txt"), "class Ignored\n").unwrap();

    let solution = Solution::new(
        "sol1",
        vec![
            ProjectDescription::new("Core", &core),
            ProjectDescription::new("App", &app).depends_on("Core"),
        ],
    );
    let manager: Arc<dyn ProjectManager> = Arc::new(DirectoryProjectManager::new(["sym"]));
    let collector = Arc::new(SymbolCollector::new(Arc::clone(&manager), Arc::new(LineParser)));

    Setup {
        _dir: dir,
        solution,
        manager,
        collector,
    }
}

#[test]
fn test_two_project_solution_kind_lookup() {
    let s = setup();
    let result = s.collector.collect(&s.solution);
    assert!(result.errors().is_empty());
    assert_eq!(result.total_symbols(), 8);

    let indexer = SymbolIndexer::new();
    indexer.build_index(&result);

    let classes: BTreeSet<String> = indexer
        .find_by_kind(SymbolKind::Class)
        .iter()
        .map(|s| format!("{}:{}", s.project_name, s.name))
        .collect();
    let expected: BTreeSet<String> = ["App:Program", "App:ProgramOptions", "Core:Util", "Core:Widget"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(classes, expected);

    let widget = result
        .project_symbols("Core")
        .iter()
        .find(|s| s.name == "Widget")
        .unwrap();
    let by_fqn = indexer.find_by_fully_qualified_name("Core.Widget").unwrap();
    assert_eq!(by_fqn.identity(), widget.identity());
}

#[test]
fn test_prefix_search_ranks_shorter_name_first() {
    let s = setup();
    let indexer = Arc::new(SymbolIndexer::new());
    indexer.build_index(&s.collector.collect(&s.solution));
    let searcher = symdex_index::SymbolSearcher::new(Arc::clone(&indexer));

    let hits = searcher.search("Prog", &SearchOptions::default());
    let program = hits.iter().position(|h| h.symbol.name == "Program").unwrap();
    let options = hits.iter().position(|h| h.symbol.name == "ProgramOptions").unwrap();
    assert!(program < options);
    assert!(hits[program].score >= 0.8);
    assert!(hits[options].score >= 0.8);

    // Identical until the index changes.
    let again = searcher.search("Prog", &SearchOptions::default());
    let names = |hits: &[symdex_index::SearchHit]| hits.iter().map(|h| h.symbol.identity()).collect::<Vec<_>>();
    assert_eq!(names(hits.as_slice()), names(again.as_slice()));
}

#[test]
fn test_cached_result_version_mismatch_misses() {
    let s = setup();
    let cache = SymbolCache::new(CacheConfig::default());
    let result = s.collector.collect(&s.solution);

    cache.cache_symbol_result("sol1", &result, Some("v1"));
    assert!(cache.get_symbol_result("sol1", Some("v1")).is_some());
    assert!(cache.get_symbol_result("sol1", Some("v2")).is_none());

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[test]
fn test_disk_tier_survives_restart() {
    let s = setup();
    let cache_dir = tempdir().unwrap();
    let config = CacheConfig::default().with_disk_dir(cache_dir.path());
    let result = s.collector.collect(&s.solution);

    {
        let cache = SymbolCache::open(config.clone()).unwrap();
        cache.cache_symbol_result("sol1", &result, Some("v1"));
        cache.close();
    }

    let cache = SymbolCache::open(config).unwrap();
    let restored = cache.get_symbol_result("sol1", Some("v1")).unwrap();
    assert_eq!(*restored, result);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_workspace_reuses_cached_collection() {
    let s = setup();
    let workspace = SymbolWorkspace::new(
        Arc::clone(&s.collector),
        Arc::new(SymbolCache::new(CacheConfig::default())),
        Arc::new(SymbolIndexer::new()),
    );

    let first = workspace.load_solution(&s.solution, Some("v1"));
    let second = workspace.load_solution(&s.solution, Some("v1"));
    assert_eq!(*first, *second);
    assert_eq!(workspace.cache().stats().hits, 1);
    assert_eq!(workspace.indexer().stats().symbols, 8);
}

#[tokio::test]
async fn test_modified_file_reindexes_project_and_dependents() {
    let s = setup();
    let indexer = Arc::new(SymbolIndexer::new());
    indexer.build_index(&s.collector.collect(&s.solution));

    let updater = IncrementalUpdater::new(
        Arc::clone(&indexer),
        Arc::clone(&s.collector),
        Arc::clone(&s.manager),
        s.solution.dependency_graph(),
        UpdaterConfig::default(),
    )
    .unwrap();
    for project in &s.solution.projects {
        updater.initialize_project_state(project).unwrap();
    }

    let updates: Arc<Mutex<Vec<IndexUpdateEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    updater.add_index_update_listener(Arc::new(move |e: &IndexUpdateEvent| {
        sink.lock().unwrap().push(e.clone());
    }));

    let widget = s.root("Core").join("Widget.sym");
    fs::write(&widget, "class Widget\nmethod Render\nmethod Resize\n").unwrap();

    let events = updater.detect_changes().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, FileChangeKind::ContentChanged);
    assert_eq!(events[0].path, widget);

    assert!(updater.wait_for_updates(Duration::from_secs(5)).await);
    assert_eq!(updater.stats().tasks_submitted, 1);
    assert_eq!(indexer.find_by_name("Resize").len(), 1);
    // Untouched files keep their symbols.
    assert_eq!(indexer.find_by_file(&s.root("Core").join("Util.sym")).len(), 2);

    let updates = updates.lock().unwrap();
    let projects: BTreeSet<&str> = updates.iter().map(|u| u.project.as_str()).collect();
    assert_eq!(projects, BTreeSet::from(["App", "Core"]));

    drop(updates);
    updater.shutdown().await;
}

#[tokio::test]
async fn test_deleted_file_leaves_other_files_intact() {
    let s = setup();
    let indexer = Arc::new(SymbolIndexer::new());
    indexer.build_index(&s.collector.collect(&s.solution));

    let updater = IncrementalUpdater::new(
        Arc::clone(&indexer),
        Arc::clone(&s.collector),
        Arc::clone(&s.manager),
        s.solution.dependency_graph(),
        UpdaterConfig::default().with_debounce(Duration::from_millis(20)),
    )
    .unwrap();
    for project in &s.solution.projects {
        updater.initialize_project_state(project).unwrap();
    }

    let options = s.root("App").join("Options.sym");
    fs::remove_file(&options).unwrap();
    updater.notify_file_changed(&options, FileChangeKind::Deleted);

    assert!(updater.wait_for_updates(Duration::from_secs(5)).await);

    assert!(indexer.find_by_file(&options).is_empty());
    assert!(indexer.find_by_fully_qualified_name("App.ProgramOptions").is_none());
    assert_eq!(indexer.find_by_file(&s.root("App").join("Program.sym")).len(), 2);
    assert_eq!(indexer.find_by_project("Core").len(), 4);

    updater.shutdown().await;
}

//! Symbol indexing and search for symdex.
//!
//! This crate provides:
//! - A language-neutral symbol model and parallel symbol collection
//! - In-memory indices by name, qualified name, kind, project and file, plus
//!   a prefix trie
//! - A two-tier (memory and disk) cache with TTLs and version checks
//! - Incremental re-indexing driven by file status polling or notifications
//! - Ranked search combining exact, prefix, fuzzy and regex strategies

pub mod cache;
pub mod collector;
pub mod index;
pub mod search;
pub mod symbol;
pub mod updater;
pub mod workspace;

// Re-exports
pub use cache::{CacheConfig, CacheError, CacheStats, SymbolCache};
pub use collector::{
    DirectoryProjectManager, FileParser, ProjectDescription, ProjectManager, Solution, SymbolCollector,
};
pub use index::{IndexDelta, IndexError, IndexQuery, IndexSnapshot, IndexStats, SymbolIndexer};
pub use search::{MatchStrategy, SearchHit, SearchOptions, SortStrategy, SymbolSearcher};
pub use symbol::{
    CollectionError, SourceRange, Symbol, SymbolCollectionResult, SymbolDetails, SymbolIdentity, SymbolKind,
};
pub use updater::watcher::{FileWatcher, WatcherConfig, WatcherError};
pub use updater::{
    FileChangeKind, FileStatus, FileUpdateEvent, FileUpdateListener, IncrementalUpdater, IndexUpdateEvent,
    IndexUpdateListener, UpdaterConfig, UpdaterError, UpdaterStats,
};
pub use workspace::SymbolWorkspace;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::symbol::SymbolKind;

/// Result ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortStrategy {
    /// Highest score first.
    #[default]
    Relevance,
    Name,
    /// File, then position.
    Location,
    Kind,
    Project,
}

impl SortStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortStrategy::Relevance => "relevance",
            SortStrategy::Name => "name",
            SortStrategy::Location => "location",
            SortStrategy::Kind => "kind",
            SortStrategy::Project => "project",
        }
    }
}

impl fmt::Display for SortStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relevance" => Ok(SortStrategy::Relevance),
            "name" => Ok(SortStrategy::Name),
            "location" => Ok(SortStrategy::Location),
            "kind" => Ok(SortStrategy::Kind),
            "project" => Ok(SortStrategy::Project),
            other => Err(format!("unknown sort strategy: {other}")),
        }
    }
}

/// Options for [`SymbolSearcher::search`](super::SymbolSearcher::search).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub case_sensitive: bool,
    /// Only exact qualified-name or name matches.
    pub exact_match: bool,
    pub max_results: usize,
    pub sort: SortStrategy,
    /// Allowed kinds; empty allows all.
    pub kinds: BTreeSet<SymbolKind>,
    /// Allowed projects; empty allows all.
    pub projects: BTreeSet<String>,
    /// Trie prefix strategy
    pub prefix: bool,
    /// Edit-distance strategy
    pub fuzzy: bool,
    /// Regular-expression strategy
    pub regex: bool,
    /// Hits scoring below this are dropped.
    pub min_score: f32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            exact_match: false,
            max_results: 100,
            sort: SortStrategy::Relevance,
            kinds: BTreeSet::new(),
            projects: BTreeSet::new(),
            prefix: true,
            fuzzy: true,
            regex: true,
            min_score: 0.0,
        }
    }
}

impl SearchOptions {
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_sort(mut self, sort: SortStrategy) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_exact_match(mut self, exact: bool) -> Self {
        self.exact_match = exact;
        self
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn with_kind(mut self, kind: SymbolKind) -> Self {
        self.kinds.insert(kind);
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.projects.insert(project.into());
        self
    }

    pub fn with_strategies(mut self, prefix: bool, fuzzy: bool, regex: bool) -> Self {
        self.prefix = prefix;
        self.fuzzy = fuzzy;
        self.regex = regex;
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub(crate) fn allows(&self, kind: SymbolKind, project: &str) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&kind))
            && (self.projects.is_empty() || self.projects.contains(project))
    }

    pub(crate) fn key(&self) -> OptionsKey {
        OptionsKey {
            case_sensitive: self.case_sensitive,
            exact_match: self.exact_match,
            max_results: self.max_results,
            sort: self.sort,
            kinds: self.kinds.clone(),
            projects: self.projects.clone(),
            strategies: (self.prefix, self.fuzzy, self.regex),
            min_score_bits: self.min_score.to_bits(),
        }
    }
}

/// Hashable form of [`SearchOptions`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct OptionsKey {
    case_sensitive: bool,
    exact_match: bool,
    max_results: usize,
    sort: SortStrategy,
    kinds: BTreeSet<SymbolKind>,
    projects: BTreeSet<String>,
    strategies: (bool, bool, bool),
    min_score_bits: u32,
}

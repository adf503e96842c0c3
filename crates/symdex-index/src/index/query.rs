//! Structured index queries.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::symbol::SymbolKind;

/// A conjunction of optional predicates evaluated by
/// [`SymbolIndexer::search`](super::SymbolIndexer::search).
///
/// An empty query matches every indexed symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexQuery {
    /// Exact fully-qualified name.
    pub fully_qualified_name: Option<String>,
    /// Exact name, case-insensitive.
    pub name: Option<String>,
    /// Name prefix, case-insensitive.
    pub prefix: Option<String>,
    pub kind: Option<SymbolKind>,
    pub project: Option<String>,
    pub file: Option<PathBuf>,
    /// Case-insensitive regular expression matched against the name.
    pub name_pattern: Option<String>,
}

impl IndexQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fully_qualified_name(mut self, fqn: impl Into<String>) -> Self {
        self.fully_qualified_name = Some(fqn.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_kind(mut self, kind: SymbolKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_name_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.name_pattern = Some(pattern.into());
        self
    }

    /// True when no predicate is set.
    pub fn is_empty(&self) -> bool {
        self.fully_qualified_name.is_none()
            && self.name.is_none()
            && self.prefix.is_none()
            && self.kind.is_none()
            && self.project.is_none()
            && self.file.is_none()
            && self.name_pattern.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_default_is_empty() {
        assert!(IndexQuery::default().is_empty());
        assert!(!IndexQuery::new().with_kind(SymbolKind::Class).is_empty());
    }
}

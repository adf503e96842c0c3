//! Symbol model: the immutable facts extracted for a single declaration.
//!
//! A [`Symbol`] carries the common attributes every declaration has (name,
//! qualified name, kind, source range, owning project) plus a kind-specific
//! payload in [`SymbolDetails`]. Equality and hashing use the symbol's
//! [`SymbolIdentity`], so two extractions of the same declaration compare
//! equal even if their ranges moved.
//!
//! # Example
//!
//! ```
//! use symdex_index::symbol::{Symbol, SymbolKind};
//!
//! let symbol = Symbol::new("Program", SymbolKind::Class, "src/Program.cs", "App")
//!     .with_fqn("Foo.Program")
//!     .with_range(3, 1, 20, 2);
//!
//! assert_eq!(symbol.last_segment(), Some("Program"));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of declared symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Namespace,
    Class,
    Interface,
    Struct,
    Enum,
    EnumMember,
    Field,
    Property,
    Method,
    Constructor,
    Destructor,
    Event,
    Delegate,
    LocalVariable,
    Parameter,
    TypeParameter,
    Module,
    Other,
}

impl SymbolKind {
    /// Every kind, in declaration order.
    pub const ALL: [SymbolKind; 18] = [
        SymbolKind::Namespace,
        SymbolKind::Class,
        SymbolKind::Interface,
        SymbolKind::Struct,
        SymbolKind::Enum,
        SymbolKind::EnumMember,
        SymbolKind::Field,
        SymbolKind::Property,
        SymbolKind::Method,
        SymbolKind::Constructor,
        SymbolKind::Destructor,
        SymbolKind::Event,
        SymbolKind::Delegate,
        SymbolKind::LocalVariable,
        SymbolKind::Parameter,
        SymbolKind::TypeParameter,
        SymbolKind::Module,
        SymbolKind::Other,
    ];

    /// Snake-case name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Namespace => "namespace",
            SymbolKind::Class => "class",
            SymbolKind::Interface => "interface",
            SymbolKind::Struct => "struct",
            SymbolKind::Enum => "enum",
            SymbolKind::EnumMember => "enum_member",
            SymbolKind::Field => "field",
            SymbolKind::Property => "property",
            SymbolKind::Method => "method",
            SymbolKind::Constructor => "constructor",
            SymbolKind::Destructor => "destructor",
            SymbolKind::Event => "event",
            SymbolKind::Delegate => "delegate",
            SymbolKind::LocalVariable => "local_variable",
            SymbolKind::Parameter => "parameter",
            SymbolKind::TypeParameter => "type_parameter",
            SymbolKind::Module => "module",
            SymbolKind::Other => "other",
        }
    }

    /// Whether this kind declares a type.
    pub fn is_type(&self) -> bool {
        matches!(
            self,
            SymbolKind::Class
                | SymbolKind::Interface
                | SymbolKind::Struct
                | SymbolKind::Enum
                | SymbolKind::Delegate
        )
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SymbolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        SymbolKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| format!("unknown symbol kind: {s}"))
    }
}

/// Declared accessibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Internal,
    Protected,
    ProtectedInternal,
    PrivateProtected,
    #[default]
    Private,
}

/// One formal parameter of a method.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub type_name: String,
    #[serde(default)]
    pub is_ref: bool,
    #[serde(default)]
    pub is_out: bool,
    #[serde(default)]
    pub is_params: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    /// Whether the parameter declares a default value.
    pub fn has_default(&self) -> bool {
        self.default_value.is_some()
    }
}

/// Facts specific to methods, constructors and destructors.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MethodDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub type_parameters: Vec<String>,
    #[serde(default)]
    pub modifiers: Vec<String>,
    #[serde(default)]
    pub visibility: Visibility,
}

/// Facts specific to type declarations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypeDetails {
    #[serde(default)]
    pub base_types: Vec<String>,
    /// Names of nested members, in declaration order.
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub modifiers: Vec<String>,
    #[serde(default)]
    pub visibility: Visibility,
}

/// Facts specific to properties.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PropertyDetails {
    pub property_type: String,
    #[serde(default)]
    pub has_getter: bool,
    #[serde(default)]
    pub has_setter: bool,
    #[serde(default)]
    pub modifiers: Vec<String>,
    #[serde(default)]
    pub visibility: Visibility,
}

/// Kind-specific payload of a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "detail", rename_all = "snake_case")]
pub enum SymbolDetails {
    #[default]
    None,
    Method(MethodDetails),
    Type(TypeDetails),
    Property(PropertyDetails),
}

impl SymbolDetails {
    /// Declared visibility, if the payload carries one.
    pub fn visibility(&self) -> Option<Visibility> {
        match self {
            SymbolDetails::None => None,
            SymbolDetails::Method(m) => Some(m.visibility),
            SymbolDetails::Type(t) => Some(t.visibility),
            SymbolDetails::Property(p) => Some(p.visibility),
        }
    }

    /// Declared modifiers (`static`, `abstract`, ...).
    pub fn modifiers(&self) -> &[String] {
        match self {
            SymbolDetails::None => &[],
            SymbolDetails::Method(m) => &m.modifiers,
            SymbolDetails::Type(t) => &t.modifiers,
            SymbolDetails::Property(p) => &p.modifiers,
        }
    }
}

/// 1-based source range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceRange {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl Default for SourceRange {
    fn default() -> Self {
        Self {
            start_line: 1,
            start_column: 1,
            end_line: 1,
            end_column: 1,
        }
    }
}

/// The fields that decide whether two symbols are the same logical entity.
///
/// Anonymous symbols (no qualified name) also carry their name and start
/// position, otherwise every local of one kind in a file would collapse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolIdentity {
    pub fully_qualified_name: Option<String>,
    pub kind: SymbolKind,
    pub file_path: PathBuf,
    pub anchor: Option<(String, u32, u32)>,
}

/// A declared symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fully_qualified_name: Option<String>,
    pub kind: SymbolKind,
    pub file_path: PathBuf,
    #[serde(default)]
    pub range: SourceRange,
    pub project_name: String,
    #[serde(default)]
    pub details: SymbolDetails,
}

impl Symbol {
    /// Create a symbol with a default range and no payload.
    pub fn new(
        name: impl Into<String>,
        kind: SymbolKind,
        file_path: impl Into<PathBuf>,
        project_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            fully_qualified_name: None,
            kind,
            file_path: file_path.into(),
            range: SourceRange::default(),
            project_name: project_name.into(),
            details: SymbolDetails::None,
        }
    }

    /// Set the fully-qualified name.
    pub fn with_fqn(mut self, fqn: impl Into<String>) -> Self {
        self.fully_qualified_name = Some(fqn.into());
        self
    }

    /// Set the source range.
    pub fn with_range(mut self, start_line: u32, start_column: u32, end_line: u32, end_column: u32) -> Self {
        self.range = SourceRange {
            start_line,
            start_column,
            end_line,
            end_column,
        };
        self
    }

    /// Attach a kind-specific payload.
    pub fn with_details(mut self, details: SymbolDetails) -> Self {
        self.details = details;
        self
    }

    pub fn identity(&self) -> SymbolIdentity {
        let anchor = match self.fully_qualified_name {
            Some(_) => None,
            None => Some((
                self.name.clone(),
                self.range.start_line,
                self.range.start_column,
            )),
        };
        SymbolIdentity {
            fully_qualified_name: self.fully_qualified_name.clone(),
            kind: self.kind,
            file_path: self.file_path.clone(),
            anchor,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file_path
    }

    /// Segments of the qualified name split on `.`, `::` and `+`.
    pub fn fqn_segments(&self) -> Vec<&str> {
        match &self.fully_qualified_name {
            Some(fqn) => fqn
                .split(['.', ':', '+'])
                .filter(|segment| !segment.is_empty())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Last segment of the qualified name.
    pub fn last_segment(&self) -> Option<&str> {
        self.fqn_segments().last().copied()
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.fully_qualified_name == other.fully_qualified_name
            && self.kind == other.kind
            && self.file_path == other.file_path
            && (self.fully_qualified_name.is_some()
                || (self.name == other.name
                    && self.range.start_line == other.range.start_line
                    && self.range.start_column == other.range.start_column))
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}:{}:{})",
            self.kind,
            self.fully_qualified_name.as_deref().unwrap_or(&self.name),
            self.file_path.display(),
            self.range.start_line,
            self.range.start_column
        )
    }
}

/// A file or project that failed during collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionError {
    pub project: String,
    /// `None` when the whole project failed (e.g. its file list was unreadable).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    pub message: String,
}

/// Immutable snapshot of everything collected for a solution.
///
/// Only projects and errors are stored; the symbol total is derived on load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredCollection")]
pub struct SymbolCollectionResult {
    projects: BTreeMap<String, Vec<Symbol>>,
    errors: Vec<CollectionError>,
    #[serde(skip_serializing)]
    total_symbols: usize,
}

#[derive(Deserialize)]
struct StoredCollection {
    #[serde(default)]
    projects: BTreeMap<String, Vec<Symbol>>,
    #[serde(default)]
    errors: Vec<CollectionError>,
}

impl From<StoredCollection> for SymbolCollectionResult {
    fn from(stored: StoredCollection) -> Self {
        Self::new(stored.projects, stored.errors)
    }
}

impl SymbolCollectionResult {
    pub fn new(projects: BTreeMap<String, Vec<Symbol>>, errors: Vec<CollectionError>) -> Self {
        let total_symbols = projects.values().map(Vec::len).sum();
        Self {
            projects,
            errors,
            total_symbols,
        }
    }

    pub fn projects(&self) -> &BTreeMap<String, Vec<Symbol>> {
        &self.projects
    }

    pub fn project_symbols(&self, project: &str) -> &[Symbol] {
        self.projects.get(project).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn project_names(&self) -> impl Iterator<Item = &str> {
        self.projects.keys().map(String::as_str)
    }

    pub fn errors(&self) -> &[CollectionError] {
        &self.errors
    }

    pub fn total_symbols(&self) -> usize {
        self.total_symbols
    }

    pub fn is_empty(&self) -> bool {
        self.total_symbols == 0
    }

    /// All symbols, project by project in name order.
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.projects.values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_kind_round_trip_through_str() {
        for kind in SymbolKind::ALL {
            assert_eq!(kind.as_str().parse::<SymbolKind>().unwrap(), kind);
        }
        assert_eq!("Enum-Member".parse::<SymbolKind>().unwrap(), SymbolKind::EnumMember);
        assert!("widget".parse::<SymbolKind>().is_err());
    }

    #[test]
    fn test_identity_ignores_range_for_qualified_symbols() {
        let a = Symbol::new("Main", SymbolKind::Method, "a.cs", "A")
            .with_fqn("Foo.Program.Main")
            .with_range(3, 5, 10, 6);
        let b = Symbol::new("Main", SymbolKind::Method, "a.cs", "A")
            .with_fqn("Foo.Program.Main")
            .with_range(30, 1, 40, 2);

        assert_eq!(a, b);
        let set: HashSet<Symbol> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_identity_distinguishes_kind_and_file() {
        let base = Symbol::new("Item", SymbolKind::Property, "a.cs", "A").with_fqn("N.T.Item");
        let other_kind = Symbol { kind: SymbolKind::Field, ..base.clone() };
        let other_file = Symbol { file_path: PathBuf::from("b.cs"), ..base.clone() };

        assert_ne!(base, other_kind);
        assert_ne!(base, other_file);
    }

    #[test]
    fn test_anonymous_locals_keep_distinct_identities() {
        let x = Symbol::new("x", SymbolKind::LocalVariable, "a.cs", "A").with_range(4, 9, 4, 10);
        let y = Symbol::new("y", SymbolKind::LocalVariable, "a.cs", "A").with_range(5, 9, 5, 10);

        assert_ne!(x, y);
        assert_ne!(x.identity(), y.identity());
    }

    #[test]
    fn test_fqn_segments() {
        let symbol = Symbol::new("Inner", SymbolKind::Class, "a.cs", "A").with_fqn("Outer.Ns+Inner");
        assert_eq!(symbol.fqn_segments(), vec!["Outer", "Ns", "Inner"]);
        assert_eq!(symbol.last_segment(), Some("Inner"));

        let rusty = Symbol::new("run", SymbolKind::Method, "a.rs", "A").with_fqn("crate::app::run");
        assert_eq!(rusty.fqn_segments(), vec!["crate", "app", "run"]);
    }

    #[test]
    fn test_details_serde_is_tagged() {
        let symbol = Symbol::new("Main", SymbolKind::Method, "p.cs", "A")
            .with_fqn("Foo.Program.Main")
            .with_details(SymbolDetails::Method(MethodDetails {
                return_type: Some("void".into()),
                parameters: vec![Parameter {
                    is_params: true,
                    ..Parameter::new("args", "string[]")
                }],
                modifiers: vec!["static".into()],
                visibility: Visibility::Public,
                ..MethodDetails::default()
            }));

        let json = serde_json::to_value(&symbol).unwrap();
        assert_eq!(json["details"]["detail"], "method");
        assert_eq!(json["kind"], "method");

        let back: Symbol = serde_json::from_value(json).unwrap();
        assert_eq!(back.details, symbol.details);
        assert_eq!(back.details.visibility(), Some(Visibility::Public));
        assert_eq!(back.details.modifiers(), ["static".to_string()]);
    }

    #[test]
    fn test_collection_result_totals() {
        let mut projects = BTreeMap::new();
        projects.insert(
            "A".to_string(),
            vec![
                Symbol::new("Program", SymbolKind::Class, "a.cs", "A"),
                Symbol::new("Main", SymbolKind::Method, "a.cs", "A"),
            ],
        );
        projects.insert("B".to_string(), vec![Symbol::new("Util", SymbolKind::Class, "b.cs", "B")]);

        let result = SymbolCollectionResult::new(projects, Vec::new());
        assert_eq!(result.total_symbols(), 3);
        assert_eq!(result.symbols().count(), 3);
        assert_eq!(result.project_symbols("B").len(), 1);
        assert!(result.project_symbols("C").is_empty());
        assert_eq!(result.project_names().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn test_collection_result_total_is_derived_on_load() {
        let json = r#"{
            "projects": {
                "A": [
                    {"name": "Program", "kind": "class", "file_path": "a.cs", "project_name": "A"},
                    {"name": "Main", "kind": "method", "file_path": "a.cs", "project_name": "A"}
                ]
            },
            "errors": [],
            "total_symbols": 99
        }"#;
        let result: SymbolCollectionResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.total_symbols(), 2);

        let stored = serde_json::to_value(&result).unwrap();
        assert!(stored.get("total_symbols").is_none());
        let reloaded: SymbolCollectionResult = serde_json::from_value(stored).unwrap();
        assert_eq!(reloaded, result);
    }
}

// Row types shared by the repositories

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A tracked source file, keyed by (project, file_path).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub project: String,
    /// Relative, unix-style path under the project root.
    pub file_path: String,
    /// Modification time in milliseconds (fractional part preserved).
    pub mtime_ms: f64,
    pub size: i64,
    /// blake3 hex digest of the file contents.
    pub content_hash: String,
    /// ISO-8601 timestamp of the last record update.
    pub updated_at: String,
    pub line_count: Option<i64>,
}

/// Kind of an extracted symbol. Stored as a lowercase string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Class,
    Interface,
    Variable,
    Const,
    Type,
    Enum,
    Method,
    Property,
    Other,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Class => "class",
            SymbolKind::Interface => "interface",
            SymbolKind::Variable => "variable",
            SymbolKind::Const => "const",
            SymbolKind::Type => "type",
            SymbolKind::Enum => "enum",
            SymbolKind::Method => "method",
            SymbolKind::Property => "property",
            SymbolKind::Other => "other",
        }
    }

    pub fn parse(value: &str) -> SymbolKind {
        match value {
            "function" => SymbolKind::Function,
            "class" => SymbolKind::Class,
            "interface" => SymbolKind::Interface,
            "variable" => SymbolKind::Variable,
            "const" => SymbolKind::Const,
            "type" => SymbolKind::Type,
            "enum" => SymbolKind::Enum,
            "method" => SymbolKind::Method,
            "property" => SymbolKind::Property,
            _ => SymbolKind::Other,
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted symbol row. The id is the SQLite rowid and is monotonic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub id: i64,
    pub project: String,
    pub file_path: String,
    pub kind: SymbolKind,
    pub name: String,
    pub start_line: i64,
    pub start_column: i64,
    pub end_line: i64,
    pub end_column: i64,
    pub is_exported: bool,
    pub signature: Option<String>,
    /// Content hash of the declaration text, used by diffing.
    pub fingerprint: Option<String>,
    /// Nested detail (members, jsDoc, parameters, decorators, ...).
    pub detail_json: Option<serde_json::Value>,
    /// The file's content hash at indexing time.
    pub content_hash: String,
    pub indexed_at: String,
    pub resolved_type: Option<String>,
}

/// Extractor-facing symbol, before persistence assigns id / content hash /
/// indexing timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSymbol {
    pub kind: SymbolKind,
    pub name: String,
    pub start_line: i64,
    pub start_column: i64,
    pub end_line: i64,
    pub end_column: i64,
    pub is_exported: bool,
    pub signature: Option<String>,
    pub fingerprint: Option<String>,
    pub detail_json: Option<serde_json::Value>,
    pub resolved_type: Option<String>,
}

/// Kind of a relation row. Stored as a lowercase string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationType {
    Imports,
    Calls,
    Extends,
    Implements,
    References,
    Other,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Imports => "imports",
            RelationType::Calls => "calls",
            RelationType::Extends => "extends",
            RelationType::Implements => "implements",
            RelationType::References => "references",
            RelationType::Other => "other",
        }
    }

    pub fn parse(value: &str) -> RelationType {
        match value {
            "imports" => RelationType::Imports,
            "calls" => RelationType::Calls,
            "extends" => RelationType::Extends,
            "implements" => RelationType::Implements,
            "references" => RelationType::References,
            _ => RelationType::Other,
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted relation row. A NULL src_symbol_name marks a module-level
/// relation that applies to every symbol in the source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRecord {
    pub id: i64,
    pub project: String,
    pub kind: RelationType,
    pub src_file_path: String,
    pub src_symbol_name: Option<String>,
    pub dst_project: String,
    pub dst_file_path: String,
    pub dst_symbol_name: Option<String>,
    pub meta_json: Option<serde_json::Value>,
}

/// Extractor-facing relation. A missing dst_project defaults to the
/// source project at persistence time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRelation {
    pub kind: RelationType,
    pub src_symbol_name: Option<String>,
    pub dst_project: Option<String>,
    pub dst_file_path: String,
    pub dst_symbol_name: Option<String>,
    pub meta_json: Option<serde_json::Value>,
}

/// The singleton watcher_owner row (id = 1). Timestamps are epoch ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerRow {
    pub pid: i64,
    pub started_at: i64,
    pub heartbeat_at: i64,
}

/// Aggregate counts for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub file_count: i64,
    pub symbol_count: i64,
    pub relation_count: i64,
}

/// Flexible symbol search options. Conditions compose with AND; an omitted
/// filter imposes no constraint. `project: None` searches across projects.
#[derive(Debug, Clone, Default)]
pub struct SymbolQuery {
    /// FTS5 MATCH expression against the symbols_fts shadow, verbatim.
    pub fts_query: Option<String>,
    pub exact_name: Option<String>,
    pub project: Option<String>,
    pub kind: Option<SymbolKind>,
    pub file_path: Option<String>,
    pub is_exported: Option<bool>,
    /// Matches `$.decorators[*].name` inside detail_json.
    pub decorator: Option<String>,
    pub resolved_type: Option<String>,
    /// In-process regular-expression filter on the symbol name. An invalid
    /// pattern yields an empty result, never an error.
    pub regex: Option<String>,
    pub limit: Option<usize>,
}

/// Flexible relation search options, AND-composed like [`SymbolQuery`].
#[derive(Debug, Clone, Default)]
pub struct RelationQuery {
    pub project: Option<String>,
    pub kind: Option<RelationType>,
    pub src_file_path: Option<String>,
    pub src_symbol_name: Option<String>,
    pub dst_file_path: Option<String>,
    pub dst_symbol_name: Option<String>,
    pub limit: Option<usize>,
}

/// Retargeting spec for moved or renamed relation destinations. A None
/// `old_symbol` matches rows whose dst_symbol_name IS NULL.
#[derive(Debug, Clone)]
pub struct RetargetSpec {
    pub dst_project: String,
    pub old_file: String,
    pub old_symbol: Option<String>,
    pub new_file: String,
    pub new_symbol: Option<String>,
}

/// Map from relative path to its stored file record.
pub type FilesMap = HashMap<String, FileRecord>;

pub(crate) const DEFAULT_QUERY_LIMIT: usize = 100;

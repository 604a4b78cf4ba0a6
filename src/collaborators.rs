// Collaborator seams
//
// Parsing, extraction, watch-event generation, pattern search, and the
// semantic layer are external subsystems. The engine consumes them
// through these narrow interfaces; hosts inject implementations via
// OpenOptions, and the notify-backed watcher in watch.rs is the only
// built-in default.

use crate::boundaries::ProjectBoundary;
use crate::database::{NewRelation, NewSymbol};
use crate::tsconfig::PathMappings;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Parsed syntax-tree bundle held by the parse cache. The AST root is an
/// opaque JSON document owned by the parser collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedSource {
    pub file_path: String,
    pub source: String,
    pub root: serde_json::Value,
    pub errors: Vec<String>,
    pub comments: Vec<String>,
}

/// Parses source text into a [`ParsedSource`] bundle.
pub trait SourceParser: Send + Sync {
    fn parse(&self, file_path: &str, source: &str) -> Result<ParsedSource>;
}

/// Extracts symbol declarations from a parsed file.
pub trait SymbolExtractor: Send + Sync {
    fn extract_symbols(&self, parsed: &ParsedSource) -> Result<Vec<NewSymbol>>;
}

/// Extracts import/call/heritage relations from a parsed file. Receives
/// the tsconfig path mappings so import specifiers resolve to canonical
/// file paths.
pub trait RelationExtractor: Send + Sync {
    fn extract_relations(
        &self,
        parsed: &ParsedSource,
        path_mappings: &PathMappings,
    ) -> Result<Vec<NewRelation>>;
}

/// Optional semantic layer notified of file changes. Failures on the
/// notification paths are logged, never propagated.
pub trait SemanticLayer: Send + Sync {
    fn file_changed(&self, file_path: &str, source: Option<&str>) -> Result<()>;
    fn file_deleted(&self, file_path: &str) -> Result<()>;
    fn dispose(&self) -> Result<()>;
}

/// A running filesystem watcher. Closing stops event delivery.
pub trait FileWatcher: Send {
    fn close(&mut self) -> Result<()>;
}

/// Filesystem change event delivered by a watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Create,
    Update,
    Delete,
}

/// A match produced by the pattern-search collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub file_path: String,
    pub line: i64,
    pub column: i64,
    pub text: String,
}

/// Callback the watcher delivers events into; safe to call from any thread.
pub type WatchSink = Arc<dyn Fn(WatchEvent) + Send + Sync>;

pub type WatcherFactory =
    Arc<dyn Fn(&Path, WatchSink) -> Result<Box<dyn FileWatcher>> + Send + Sync>;

pub type SemanticFactory = Arc<dyn Fn(&Path) -> Result<Arc<dyn SemanticLayer>> + Send + Sync>;

pub type PatternSearchFn =
    Arc<dyn Fn(&Path, &str, usize) -> Result<Vec<PatternMatch>> + Send + Sync>;

pub type DiscoverProjectsFn = Arc<dyn Fn(&Path) -> Result<Vec<ProjectBoundary>> + Send + Sync>;

/// The injected collaborator set resolved at open.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub parser: Option<Arc<dyn SourceParser>>,
    pub symbol_extractor: Option<Arc<dyn SymbolExtractor>>,
    pub relation_extractor: Option<Arc<dyn RelationExtractor>>,
    pub pattern_search: Option<PatternSearchFn>,
}

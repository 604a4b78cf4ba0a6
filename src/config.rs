// Open-time configuration
//
// A closed record with enumerated keys; absent keys take the stated
// defaults. Collaborator injection points let hosts (and tests) swap any
// external subsystem.

use crate::cache::DEFAULT_PARSE_CACHE_CAPACITY;
use crate::collaborators::{
    DiscoverProjectsFn, PatternSearchFn, RelationExtractor, SemanticFactory, SourceParser,
    SymbolExtractor, WatcherFactory,
};
use crate::ownership::STALE_OWNER_MS;
use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_DATA_DIR: &str = ".gildash";
pub const DEFAULT_DB_FILE: &str = "index.db";
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// Options accepted by [`crate::Gildash::open`].
#[derive(Clone)]
pub struct OpenOptions {
    /// Absolute, existing directory to index.
    pub project_root: PathBuf,
    /// File extensions to index, leading dot included.
    pub extensions: Vec<String>,
    /// Glob-style patterns excluded from the walk and the watcher.
    pub ignore_patterns: Vec<String>,
    pub parse_cache_capacity: usize,
    /// Watch mode drives the single-writer election, the filesystem
    /// watcher, and the signal handlers.
    pub watch_mode: bool,
    /// Create the semantic collaborator at open (fail-fast on its errors).
    pub semantic: bool,
    /// Directory under the project root holding the database.
    pub data_dir: String,
    pub db_file: String,
    /// Delete the database and its WAL companions during close.
    pub cleanup_on_close: bool,
    pub stale_threshold_ms: i64,
    pub debounce_ms: u64,

    // Collaborator injection points. Parsing and extraction default to
    // absent (files are fingerprinted but yield no symbols); the watcher
    // defaults to the notify-backed implementation.
    pub parser: Option<Arc<dyn SourceParser>>,
    pub symbol_extractor: Option<Arc<dyn SymbolExtractor>>,
    pub relation_extractor: Option<Arc<dyn RelationExtractor>>,
    pub watcher_factory: Option<WatcherFactory>,
    pub semantic_factory: Option<SemanticFactory>,
    pub pattern_search: Option<PatternSearchFn>,
    pub discover_projects: Option<DiscoverProjectsFn>,
}

impl OpenOptions {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            extensions: vec![".ts".to_string(), ".mts".to_string(), ".cts".to_string()],
            ignore_patterns: vec!["**/node_modules/**".to_string()],
            parse_cache_capacity: DEFAULT_PARSE_CACHE_CAPACITY,
            watch_mode: true,
            semantic: false,
            data_dir: DEFAULT_DATA_DIR.to_string(),
            db_file: DEFAULT_DB_FILE.to_string(),
            cleanup_on_close: false,
            stale_threshold_ms: STALE_OWNER_MS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            parser: None,
            symbol_extractor: None,
            relation_extractor: None,
            watcher_factory: None,
            semantic_factory: None,
            pattern_search: None,
            discover_projects: None,
        }
    }

    pub(crate) fn resolve(&self) -> Result<ResolvedConfig> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.ignore_patterns {
            let glob = Glob::new(pattern)
                .with_context(|| format!("Invalid ignore pattern '{pattern}'"))?;
            builder.add(glob);
        }
        // The engine's own data directory is never indexed.
        builder.add(
            Glob::new(&format!("{}/**", self.data_dir))
                .with_context(|| "Invalid data dir ignore pattern")?,
        );
        let ignore_set = builder.build()?;

        Ok(ResolvedConfig {
            project_root: self.project_root.clone(),
            extensions: self.extensions.clone(),
            ignore_set,
            data_dir: self.data_dir.clone(),
            db_file: self.db_file.clone(),
            watch_mode: self.watch_mode,
            cleanup_on_close: self.cleanup_on_close,
            stale_threshold_ms: self.stale_threshold_ms,
            debounce: Duration::from_millis(self.debounce_ms),
        })
    }
}

/// Validated configuration shared across the context's components.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub project_root: PathBuf,
    pub extensions: Vec<String>,
    pub ignore_set: GlobSet,
    pub data_dir: String,
    pub db_file: String,
    pub watch_mode: bool,
    pub cleanup_on_close: bool,
    pub stale_threshold_ms: i64,
    pub debounce: Duration,
}

impl ResolvedConfig {
    pub fn db_path(&self) -> PathBuf {
        self.project_root.join(&self.data_dir).join(&self.db_file)
    }

    /// Whether a relative, unix-style path is eligible for indexing.
    pub fn is_indexable(&self, rel_path: &str) -> bool {
        if self.ignore_set.is_match(rel_path) {
            return false;
        }
        self.extensions
            .iter()
            .any(|ext| rel_path.ends_with(ext.as_str()))
    }
}

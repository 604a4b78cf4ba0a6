// Gildash - Local Incremental Code-Intelligence Engine
//!
//! Gildash maintains a persistent symbol/relation index over one project
//! tree: an embedded SQLite store with an FTS5 symbol shadow, a
//! fingerprint-driven incremental indexer fed by a debounced file
//! watcher, a single-writer election so several processes can share one
//! index, and an on-demand dependency-graph analyzer. Hosts talk to it
//! through the [`Gildash`] context, whose every operation returns a
//! tagged [`GildashError`] on failure.

pub mod boundaries;
pub mod cache;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod database;
pub mod diff;
pub mod error;
pub mod events;
pub mod graph;
pub mod indexer;
pub mod ownership;
pub mod tsconfig;
pub mod watch;

#[cfg(test)]
pub mod tests;

// Re-export the host-facing surface.
pub use boundaries::ProjectBoundary;
pub use collaborators::{
    FileWatcher, ParsedSource, PatternMatch, RelationExtractor, SemanticLayer, SourceParser,
    SymbolExtractor, WatchEvent, WatchEventKind,
};
pub use config::OpenOptions;
pub use context::Gildash;
pub use context::queries::{
    FileStats, FullSymbol, HeritageEntry, ModuleInterface, RelationSearch, SymbolSearch,
};
pub use database::{
    FileRecord, IndexStats, NewRelation, NewSymbol, RelationRecord, RelationType, SymbolKind,
    SymbolRecord,
};
pub use diff::{SymbolDiff, SymbolModification};
pub use error::{ErrorKind, GildashError, GildashResult};
pub use events::{IndexResult, ListenerHandle};
pub use graph::{DependencyGraph, FanMetrics, ImportGraph};
pub use ownership::WatcherRole;

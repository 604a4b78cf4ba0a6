// Query facade: parse, extract, search, file info, lifecycle controls
//
// Every entry point checks the closed flag first and converts collaborator
// or repository failures into the tagged error set.

use super::Gildash;
use crate::boundaries::ProjectBoundary;
use crate::collaborators::{ParsedSource, PatternMatch};
use crate::database::{
    FileRecord, IndexStats, RelationQuery, RelationRecord, RelationType, SymbolQuery,
    SymbolRecord,
};
use crate::diff::{self, SymbolDiff};
use crate::error::{GildashError, GildashResult};
use crate::events::{IndexListener, IndexResult, ListenerHandle};
use crate::ownership::WatcherRole;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

const FILE_SCOPED_LIMIT: usize = 10_000;

/// Facade-level symbol search. `text` becomes a prefix query against the
/// FTS shadow; the remaining filters map straight onto the repository
/// query. `project: None` falls back to the default project — use
/// [`Gildash::search_all_symbols`] for a cross-project search.
#[derive(Debug, Clone, Default)]
pub struct SymbolSearch {
    pub text: Option<String>,
    pub exact_name: Option<String>,
    pub kind: Option<crate::database::SymbolKind>,
    pub file_path: Option<String>,
    pub is_exported: Option<bool>,
    pub decorator: Option<String>,
    pub resolved_type: Option<String>,
    pub regex: Option<String>,
    pub project: Option<String>,
    pub limit: Option<usize>,
}

/// Facade-level relation search with the same project-defaulting rule.
#[derive(Debug, Clone, Default)]
pub struct RelationSearch {
    pub kind: Option<RelationType>,
    pub src_file_path: Option<String>,
    pub src_symbol_name: Option<String>,
    pub dst_file_path: Option<String>,
    pub dst_symbol_name: Option<String>,
    pub project: Option<String>,
    pub limit: Option<usize>,
}

/// Per-file aggregate returned by get_file_stats.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileStats {
    pub record: FileRecord,
    pub symbol_count: usize,
    pub outgoing_relations: usize,
    pub incoming_relations: usize,
}

/// The exported surface of one module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleInterface {
    pub file_path: String,
    pub exports: Vec<SymbolRecord>,
}

/// A symbol together with the relations touching it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FullSymbol {
    pub symbol: SymbolRecord,
    pub outgoing: Vec<RelationRecord>,
    pub incoming: Vec<RelationRecord>,
}

/// One hop in a heritage walk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeritageEntry {
    pub name: String,
    pub file_path: String,
    pub relation: RelationType,
    pub depth: usize,
}

impl Gildash {
    fn default_project(&self) -> String {
        self.inner.default_project.clone()
    }

    /// `query.project ?? defaultProject`; the empty string stays a
    /// distinct project name.
    fn effective_project(&self, requested: Option<String>) -> Option<String> {
        Some(requested.unwrap_or_else(|| self.default_project()))
    }

    // ------------------------------------------------------------------
    // Parse & extract
    // ------------------------------------------------------------------

    /// Parse source text through the parser collaborator and cache the
    /// bundle under `file_path`.
    pub fn parse_source(&self, file_path: &str, source: &str) -> GildashResult<Arc<ParsedSource>> {
        self.ensure_open()?;
        let Some(parser) = &self.inner.collaborators.parser else {
            return Err(GildashError::validation("no parser collaborator configured"));
        };
        let parsed = parser
            .parse(file_path, source)
            .map(Arc::new)
            .map_err(GildashError::parse)?;
        self.inner.parse_cache.set(file_path, Arc::clone(&parsed));
        Ok(parsed)
    }

    /// Parse many files by path. Files that cannot be read or parsed are
    /// silently excluded from the returned map.
    pub async fn batch_parse(
        &self,
        paths: &[String],
    ) -> GildashResult<HashMap<String, Arc<ParsedSource>>> {
        self.ensure_open()?;
        let Some(parser) = &self.inner.collaborators.parser else {
            return Err(GildashError::validation("no parser collaborator configured"));
        };

        let parser = Arc::clone(parser);
        let root = self.inner.config.project_root.clone();
        let cache = Arc::clone(&self.inner.parse_cache);
        let paths: Vec<String> = paths.to_vec();

        let parsed_map = tokio::task::spawn_blocking(move || {
            let mut out: HashMap<String, Arc<ParsedSource>> = HashMap::new();
            for path in paths {
                let abs = if std::path::Path::new(&path).is_absolute() {
                    std::path::PathBuf::from(&path)
                } else {
                    root.join(&path)
                };
                let Ok(source) = std::fs::read_to_string(&abs) else {
                    debug!("batch_parse: skipping unreadable '{}'", path);
                    continue;
                };
                match parser.parse(&path, &source) {
                    Ok(parsed) => {
                        let parsed = Arc::new(parsed);
                        cache.set(&*path, Arc::clone(&parsed));
                        out.insert(path, parsed);
                    }
                    Err(e) => {
                        debug!("batch_parse: skipping '{}': {}", path, e);
                    }
                }
            }
            out
        })
        .await
        .map_err(GildashError::parse)?;

        Ok(parsed_map)
    }

    /// Cache-only AST lookup; never parses.
    pub fn get_parsed_ast(&self, path: &str) -> GildashResult<Option<Arc<ParsedSource>>> {
        self.ensure_open()?;
        Ok(self.inner.parse_cache.get(path))
    }

    pub fn extract_symbols(
        &self,
        parsed: &ParsedSource,
    ) -> GildashResult<Vec<crate::database::NewSymbol>> {
        self.ensure_open()?;
        let Some(extractor) = &self.inner.collaborators.symbol_extractor else {
            return Err(GildashError::validation(
                "no symbol extractor collaborator configured",
            ));
        };
        extractor.extract_symbols(parsed).map_err(GildashError::parse)
    }

    /// Relation extraction receives the current tsconfig path mappings.
    pub fn extract_relations(
        &self,
        parsed: &ParsedSource,
    ) -> GildashResult<Vec<crate::database::NewRelation>> {
        self.ensure_open()?;
        let Some(extractor) = &self.inner.collaborators.relation_extractor else {
            return Err(GildashError::validation(
                "no relation extractor collaborator configured",
            ));
        };
        let mappings = self.inner.path_mappings.lock().unwrap().clone();
        extractor
            .extract_relations(parsed, &mappings)
            .map_err(GildashError::parse)
    }

    // ------------------------------------------------------------------
    // Symbol & relation search
    // ------------------------------------------------------------------

    pub fn search_symbols(&self, query: SymbolSearch) -> GildashResult<Vec<SymbolRecord>> {
        self.ensure_open()?;
        let project = self.effective_project(query.project.clone());
        self.run_symbol_search(query, project)
    }

    /// Cross-project variant: no project constraint at all.
    pub fn search_all_symbols(&self, query: SymbolSearch) -> GildashResult<Vec<SymbolRecord>> {
        self.ensure_open()?;
        self.run_symbol_search(query, None)
    }

    fn run_symbol_search(
        &self,
        query: SymbolSearch,
        project: Option<String>,
    ) -> GildashResult<Vec<SymbolRecord>> {
        let db_query = SymbolQuery {
            fts_query: query.text.as_deref().map(prefix_fts_query),
            exact_name: query.exact_name,
            project,
            kind: query.kind,
            file_path: query.file_path,
            is_exported: query.is_exported,
            decorator: query.decorator,
            resolved_type: query.resolved_type,
            regex: query.regex,
            limit: query.limit,
        };
        let db = self.inner.db.lock().unwrap();
        db.search_symbols_by_query(&db_query)
            .map_err(GildashError::search)
    }

    pub fn search_relations(&self, query: RelationSearch) -> GildashResult<Vec<RelationRecord>> {
        self.ensure_open()?;
        let project = self.effective_project(query.project.clone());
        self.run_relation_search(query, project)
    }

    pub fn search_all_relations(
        &self,
        query: RelationSearch,
    ) -> GildashResult<Vec<RelationRecord>> {
        self.ensure_open()?;
        self.run_relation_search(query, None)
    }

    fn run_relation_search(
        &self,
        query: RelationSearch,
        project: Option<String>,
    ) -> GildashResult<Vec<RelationRecord>> {
        let db_query = RelationQuery {
            project,
            kind: query.kind,
            src_file_path: query.src_file_path,
            src_symbol_name: query.src_symbol_name,
            dst_file_path: query.dst_file_path,
            dst_symbol_name: query.dst_symbol_name,
            limit: query.limit,
        };
        let db = self.inner.db.lock().unwrap();
        db.search_relations_by_query(&db_query)
            .map_err(GildashError::search)
    }

    /// Every symbol of one file, across projects.
    pub fn get_symbols_by_file(&self, file_path: &str) -> GildashResult<Vec<SymbolRecord>> {
        self.ensure_open()?;
        self.run_symbol_search(
            SymbolSearch {
                file_path: Some(file_path.to_string()),
                limit: Some(FILE_SCOPED_LIMIT),
                ..Default::default()
            },
            None,
        )
    }

    /// Relations whose source and destination are both `file_path`.
    pub fn get_internal_relations(&self, file_path: &str) -> GildashResult<Vec<RelationRecord>> {
        self.ensure_open()?;
        let project = self.effective_project(None);
        self.run_relation_search(
            RelationSearch {
                src_file_path: Some(file_path.to_string()),
                dst_file_path: Some(file_path.to_string()),
                limit: Some(FILE_SCOPED_LIMIT),
                ..Default::default()
            },
            project,
        )
    }

    // ------------------------------------------------------------------
    // File info
    // ------------------------------------------------------------------

    pub fn get_file_info(&self, file_path: &str) -> GildashResult<Option<FileRecord>> {
        self.ensure_open()?;
        let db = self.inner.db.lock().unwrap();
        db.get_file(&self.inner.default_project, file_path)
            .map_err(GildashError::search)
    }

    pub fn get_file_stats(&self, file_path: &str) -> GildashResult<Option<FileStats>> {
        self.ensure_open()?;
        let project = self.default_project();
        let db = self.inner.db.lock().unwrap();

        let Some(record) = db
            .get_file(&project, file_path)
            .map_err(GildashError::search)?
        else {
            return Ok(None);
        };

        let symbols = db
            .get_file_symbols(&project, file_path)
            .map_err(GildashError::search)?;
        let outgoing = db
            .get_outgoing(&project, file_path, None)
            .map_err(GildashError::search)?;
        let incoming = db
            .get_incoming(&project, file_path)
            .map_err(GildashError::search)?;

        Ok(Some(FileStats {
            record,
            symbol_count: symbols.len(),
            outgoing_relations: outgoing.len(),
            incoming_relations: incoming.len(),
        }))
    }

    pub fn list_indexed_files(&self) -> GildashResult<Vec<FileRecord>> {
        self.ensure_open()?;
        let db = self.inner.db.lock().unwrap();
        db.get_all_files(&self.inner.default_project)
            .map_err(GildashError::search)
    }

    pub fn get_stats(&self) -> GildashResult<IndexStats> {
        self.ensure_open()?;
        let db = self.inner.db.lock().unwrap();
        db.get_stats(&self.inner.default_project)
            .map_err(GildashError::search)
    }

    /// The exported symbols of a module, in declaration order.
    pub fn get_module_interface(&self, file_path: &str) -> GildashResult<ModuleInterface> {
        self.ensure_open()?;
        let project = self.default_project();
        let db = self.inner.db.lock().unwrap();
        let mut exports = db
            .get_file_symbols(&project, file_path)
            .map_err(GildashError::search)?;
        exports.retain(|s| s.is_exported);
        Ok(ModuleInterface {
            file_path: file_path.to_string(),
            exports,
        })
    }

    // ------------------------------------------------------------------
    // Advanced lookups
    // ------------------------------------------------------------------

    /// A symbol row together with its outgoing and incoming relations.
    pub fn get_full_symbol(&self, id: i64) -> GildashResult<Option<FullSymbol>> {
        self.ensure_open()?;
        let db = self.inner.db.lock().unwrap();

        let Some(symbol) = db.get_symbol_by_id(id).map_err(GildashError::search)? else {
            return Ok(None);
        };

        let outgoing = db
            .get_outgoing(&symbol.project, &symbol.file_path, Some(&symbol.name))
            .map_err(GildashError::search)?;
        let incoming = db
            .get_incoming(&symbol.project, &symbol.file_path)
            .map_err(GildashError::search)?
            .into_iter()
            .filter(|r| {
                r.dst_symbol_name.is_none()
                    || r.dst_symbol_name.as_deref() == Some(symbol.name.as_str())
            })
            .collect();

        Ok(Some(FullSymbol {
            symbol,
            outgoing,
            incoming,
        }))
    }

    /// Follow a single-hop re-export chain from (file_path, name) to the
    /// defining symbol. A hop is an `imports` relation for the symbol
    /// whose meta carries `"reExport": true`. Cycles surface as a search
    /// error.
    pub fn resolve_symbol(
        &self,
        name: &str,
        file_path: &str,
    ) -> GildashResult<Option<SymbolRecord>> {
        self.ensure_open()?;
        let project = self.default_project();
        let db = self.inner.db.lock().unwrap();

        let mut visited: HashSet<(String, String)> = HashSet::new();
        let mut current_file = file_path.to_string();
        let mut current_name = name.to_string();

        loop {
            if !visited.insert((current_file.clone(), current_name.clone())) {
                return Err(GildashError::Search(format!(
                    "re-export cycle detected at '{current_name}' in '{current_file}'"
                )));
            }

            let hop = db
                .get_outgoing(&project, &current_file, Some(&current_name))
                .map_err(GildashError::search)?
                .into_iter()
                .find(|r| {
                    r.kind == RelationType::Imports
                        && r.src_symbol_name.as_deref() == Some(current_name.as_str())
                        && r.meta_json
                            .as_ref()
                            .and_then(|m| m.get("reExport"))
                            .and_then(|v| v.as_bool())
                            .unwrap_or(false)
                });

            match hop {
                Some(relation) => {
                    current_name = relation
                        .dst_symbol_name
                        .clone()
                        .unwrap_or(current_name);
                    current_file = relation.dst_file_path;
                }
                None => {
                    let symbol = db
                        .search_symbols_by_query(&SymbolQuery {
                            exact_name: Some(current_name),
                            project: Some(project),
                            file_path: Some(current_file),
                            limit: Some(1),
                            ..Default::default()
                        })
                        .map_err(GildashError::search)?
                        .into_iter()
                        .next();
                    return Ok(symbol);
                }
            }
        }
    }

    /// Walk extends/implements upward from (file_path, name) in BFS
    /// order. A visited set cuts cycles: re-entered nodes truncate the
    /// walk instead of erroring.
    pub async fn get_heritage_chain(
        &self,
        name: &str,
        file_path: &str,
    ) -> GildashResult<Vec<HeritageEntry>> {
        self.ensure_open()?;
        let inner = Arc::clone(&self.inner);
        let name = name.to_string();
        let file_path = file_path.to_string();

        tokio::task::spawn_blocking(move || {
            let project = inner.default_project.clone();
            let db = inner.db.lock().unwrap();

            let mut chain = Vec::new();
            let mut visited: HashSet<(String, String)> = HashSet::new();
            let mut queue: VecDeque<(String, String, usize)> = VecDeque::new();

            visited.insert((file_path.clone(), name.clone()));
            queue.push_back((file_path, name, 0));

            while let Some((current_file, current_name, depth)) = queue.pop_front() {
                let relations = db
                    .get_outgoing(&project, &current_file, Some(&current_name))
                    .map_err(GildashError::search)?;

                for relation in relations {
                    if relation.kind != RelationType::Extends
                        && relation.kind != RelationType::Implements
                    {
                        continue;
                    }
                    // Heritage hops are symbol-specific; module-level
                    // rows do not contribute parents.
                    if relation.src_symbol_name.as_deref() != Some(current_name.as_str()) {
                        continue;
                    }
                    let Some(parent_name) = relation.dst_symbol_name.clone() else {
                        continue;
                    };
                    let parent_file = relation.dst_file_path.clone();

                    chain.push(HeritageEntry {
                        name: parent_name.clone(),
                        file_path: parent_file.clone(),
                        relation: relation.kind,
                        depth: depth + 1,
                    });

                    if visited.insert((parent_file.clone(), parent_name.clone())) {
                        queue.push_back((parent_file, parent_name, depth + 1));
                    }
                }
            }

            Ok(chain)
        })
        .await
        .map_err(GildashError::search)?
    }

    /// Delegates to the pattern-search collaborator.
    pub async fn find_pattern(
        &self,
        pattern: &str,
        limit: usize,
    ) -> GildashResult<Vec<PatternMatch>> {
        self.ensure_open()?;
        let Some(search) = &self.inner.collaborators.pattern_search else {
            return Err(GildashError::validation(
                "no pattern-search collaborator configured",
            ));
        };
        let search = Arc::clone(search);
        let root = self.inner.config.project_root.clone();
        let pattern = pattern.to_string();

        tokio::task::spawn_blocking(move || search(&root, &pattern, limit))
            .await
            .map_err(GildashError::search)?
            .map_err(GildashError::search)
    }

    // ------------------------------------------------------------------
    // Lifecycle & control
    // ------------------------------------------------------------------

    /// Run a full reindex. Owner-only: readers get an `index` error.
    pub async fn reindex(&self) -> GildashResult<IndexResult> {
        self.ensure_open()?;

        if *self.inner.role.lock().unwrap() != WatcherRole::Owner {
            return Err(GildashError::Index(
                "reindex requires the owner role; this context is a reader".to_string(),
            ));
        }

        let coordinator = self.inner.coordinator.lock().unwrap().clone();
        let Some(coordinator) = coordinator else {
            return Err(GildashError::Index(
                "no index coordinator is running".to_string(),
            ));
        };

        tokio::task::spawn_blocking(move || coordinator.full_index())
            .await
            .map_err(GildashError::index)?
            .map_err(GildashError::index)
    }

    /// Subscribe to index batches; the handle unsubscribes explicitly.
    pub fn on_indexed(&self, listener: IndexListener) -> GildashResult<ListenerHandle> {
        self.ensure_open()?;
        Ok(self.inner.listeners.subscribe(listener))
    }

    pub fn diff_symbols(
        &self,
        before: &[SymbolRecord],
        after: &[SymbolRecord],
    ) -> GildashResult<SymbolDiff> {
        self.ensure_open()?;
        Ok(diff::diff_symbols(before, after))
    }

    pub fn role(&self) -> GildashResult<WatcherRole> {
        self.ensure_open()?;
        Ok(*self.inner.role.lock().unwrap())
    }

    /// Defensive copy of the discovered project boundaries.
    pub fn projects(&self) -> GildashResult<Vec<ProjectBoundary>> {
        self.ensure_open()?;
        Ok(self.inner.boundaries.clone())
    }
}

/// Quoted prefix query for the FTS shadow: `helper` becomes `"helper"*`.
fn prefix_fts_query(text: &str) -> String {
    let escaped = text.replace('"', "\"\"");
    format!("\"{escaped}\"*")
}

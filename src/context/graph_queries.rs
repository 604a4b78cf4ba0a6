// Query facade: dependency-graph operations
//
// Graphs build lazily from the persisted `imports` relations and live in
// a per-project cache that every index batch clears. Direct
// dependency/dependent lookups are synchronous; the traversals that may
// rebuild from the store run on the blocking pool.

use super::{ContextInner, Gildash};
use crate::database::RelationType;
use crate::error::{GildashError, GildashResult};
use crate::graph::{DependencyGraph, FanMetrics, ImportGraph};
use std::sync::Arc;

fn graph_for_project(
    inner: &ContextInner,
    project: &str,
) -> anyhow::Result<Arc<DependencyGraph>> {
    if let Some(graph) = inner.graph_cache.lock().unwrap().get(project) {
        return Ok(Arc::clone(graph));
    }

    let relations = {
        let db = inner.db.lock().unwrap();
        db.get_relations_by_type(project, RelationType::Imports)?
    };
    let graph = Arc::new(DependencyGraph::from_relations(&relations));

    inner
        .graph_cache
        .lock()
        .unwrap()
        .insert(project.to_string(), Arc::clone(&graph));
    Ok(graph)
}

impl Gildash {
    fn cached_graph(&self) -> GildashResult<Arc<DependencyGraph>> {
        graph_for_project(&self.inner, &self.inner.default_project)
            .map_err(GildashError::search)
    }

    async fn graph_blocking(&self) -> GildashResult<Arc<DependencyGraph>> {
        self.ensure_open()?;
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            graph_for_project(&inner, &inner.default_project).map_err(GildashError::search)
        })
        .await
        .map_err(GildashError::search)?
    }

    /// Files `file` imports directly. Unknown files yield `[]`.
    pub fn get_dependencies(&self, file: &str) -> GildashResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.cached_graph()?.get_dependencies(file))
    }

    /// Files importing `file` directly. Unknown files yield `[]`.
    pub fn get_dependents(&self, file: &str) -> GildashResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.cached_graph()?.get_dependents(file))
    }

    /// Union of the transitive dependents of every input file.
    pub async fn get_affected(&self, files: &[String]) -> GildashResult<Vec<String>> {
        let graph = self.graph_blocking().await?;
        Ok(graph.get_affected_by_change(files))
    }

    pub async fn has_cycle(&self) -> GildashResult<bool> {
        let graph = self.graph_blocking().await?;
        Ok(graph.has_cycle())
    }

    pub async fn get_import_graph(&self) -> GildashResult<ImportGraph> {
        let graph = self.graph_blocking().await?;
        Ok(graph.to_import_graph())
    }

    pub async fn get_transitive_dependencies(&self, file: &str) -> GildashResult<Vec<String>> {
        let graph = self.graph_blocking().await?;
        Ok(graph.get_transitive_dependencies(file))
    }

    pub async fn get_transitive_dependents(&self, file: &str) -> GildashResult<Vec<String>> {
        let graph = self.graph_blocking().await?;
        Ok(graph.get_transitive_dependents(file))
    }

    /// Up to `max_cycles` simple import cycles as path arrays.
    pub async fn get_cycle_paths(
        &self,
        max_cycles: Option<usize>,
    ) -> GildashResult<Vec<Vec<String>>> {
        let graph = self.graph_blocking().await?;
        Ok(graph.get_cycle_paths(max_cycles))
    }

    pub async fn get_fan_metrics(&self, file: &str) -> GildashResult<FanMetrics> {
        let graph = self.graph_blocking().await?;
        Ok(graph.get_fan_metrics(file))
    }
}

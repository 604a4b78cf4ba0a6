// Incremental indexer & watcher-event coordination
//
// One coordinator exists per owner context. It walks the tree, diffs
// content fingerprints, rewrites each changed file's rows inside a single
// transaction, tombstones vanished files, and coalesces watcher events in
// a short debounce window. Every batch ends with one IndexResult on the
// listener bus.

pub mod walk;

use crate::cache::ParseCache;
use crate::collaborators::{Collaborators, ParsedSource, WatchEvent, WatchEventKind};
use crate::config::ResolvedConfig;
use crate::database::{FileRecord, IndexDatabase, NewRelation, NewSymbol};
use crate::events::{IndexResult, ListenerBus};
use crate::tsconfig::{self, PathMappings};
use anyhow::{Result, anyhow};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use walk::{hash_content, relative_unix_path, stat_file, walk_project_tree};

/// Hash sentinel for freshly seeded file rows whose symbols have not been
/// written yet. Never equal to a real digest, so a crash between seeding
/// and the per-file replace forces re-extraction on the next run.
const PENDING_HASH: &str = "";

enum SingleOutcome {
    Changed,
    Unchanged,
    Missing,
}

struct Candidate {
    abs_path: PathBuf,
    rel_path: String,
    mtime_ms: f64,
    size: i64,
    hash: String,
    content: String,
    line_count: i64,
}

pub struct IndexCoordinator {
    db: Arc<Mutex<IndexDatabase>>,
    parse_cache: Arc<ParseCache>,
    config: Arc<ResolvedConfig>,
    default_project: String,
    collaborators: Arc<Collaborators>,
    path_mappings: Arc<Mutex<PathMappings>>,
    listeners: ListenerBus,
    event_tx: Mutex<Option<mpsc::UnboundedSender<WatchEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Serializes batches so listeners never see overlapping results.
    index_lock: Mutex<()>,
}

impl IndexCoordinator {
    /// Construct the coordinator and spawn its debounce worker. Must run
    /// on a tokio runtime.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Mutex<IndexDatabase>>,
        parse_cache: Arc<ParseCache>,
        config: Arc<ResolvedConfig>,
        default_project: String,
        collaborators: Arc<Collaborators>,
        path_mappings: Arc<Mutex<PathMappings>>,
        listeners: ListenerBus,
    ) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let debounce = config.debounce;

        let coordinator = Arc::new(Self {
            db,
            parse_cache,
            config,
            default_project,
            collaborators,
            path_mappings,
            listeners,
            event_tx: Mutex::new(Some(event_tx)),
            worker: Mutex::new(None),
            index_lock: Mutex::new(()),
        });

        let worker = tokio::spawn(debounce_loop(Arc::clone(&coordinator), event_rx, debounce));
        *coordinator.worker.lock().unwrap() = Some(worker);

        coordinator
    }

    /// Enqueue a single watcher event. Silently dropped after shutdown.
    pub fn handle_watcher_event(&self, event: WatchEvent) {
        if let Some(tx) = self.event_tx.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Drain and stop the debounce worker. Pending events are flushed
    /// before the worker exits.
    pub async fn shutdown(&self) -> Result<()> {
        let tx = self.event_tx.lock().unwrap().take();
        drop(tx);

        let worker = self.worker.lock().unwrap().take();
        if let Some(handle) = worker {
            handle
                .await
                .map_err(|e| anyhow!("Debounce worker join error: {}", e))?;
        }
        debug!("Index coordinator shut down");
        Ok(())
    }

    /// Scan the whole tree, reindex what changed, tombstone what
    /// disappeared, and emit the aggregate result.
    pub fn full_index(&self) -> Result<IndexResult> {
        let _batch = self.index_lock.lock().unwrap();
        let started = Instant::now();
        let project = self.default_project.clone();

        let walked = walk_project_tree(&self.config);
        let disk_set: HashSet<String> = walked.iter().map(|f| f.rel_path.clone()).collect();

        let stored = {
            let db = self.db.lock().unwrap();
            db.get_files_map(&project)?
        };

        // (mtime, size) fast path: files whose stat matches are skipped
        // without touching their bytes.
        let mut stat_candidates = Vec::new();
        for file in walked {
            let Ok((mtime_ms, size)) = stat_file(&file.abs_path) else {
                continue;
            };
            if let Some(prev) = stored.get(&file.rel_path) {
                if prev.mtime_ms == mtime_ms && prev.size == size {
                    continue;
                }
            }
            stat_candidates.push((file, mtime_ms, size));
        }

        // Parallel read + hash; unreadable files drop out of the batch.
        let candidates: Vec<Candidate> = stat_candidates
            .into_par_iter()
            .filter_map(|(file, mtime_ms, size)| {
                let bytes = match std::fs::read(&file.abs_path) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("Failed to read {}: {}", file.abs_path.display(), e);
                        return None;
                    }
                };
                let hash = hash_content(&bytes);
                let content = String::from_utf8_lossy(&bytes).into_owned();
                let line_count = content.lines().count() as i64;
                Some(Candidate {
                    abs_path: file.abs_path,
                    rel_path: file.rel_path,
                    mtime_ms,
                    size,
                    hash,
                    content,
                    line_count,
                })
            })
            .collect();

        // Same content hash means mtime/size drifted without an edit.
        let mut touches = Vec::new();
        let mut changed = Vec::new();
        for candidate in candidates {
            match stored.get(&candidate.rel_path) {
                Some(prev) if prev.content_hash == candidate.hash => touches.push(candidate),
                _ => changed.push(candidate),
            }
        }

        // Parse and extract outside any transaction, in parallel.
        let mappings = self.path_mappings.lock().unwrap().clone();
        let extracted: Vec<(Candidate, Option<ParsedSource>, Vec<NewSymbol>, Vec<NewRelation>)> =
            changed
                .into_par_iter()
                .map(|candidate| {
                    let (parsed, symbols, relations) = self.parse_and_extract(
                        &candidate.rel_path,
                        &candidate.content,
                        &mappings,
                    );
                    (candidate, parsed, symbols, relations)
                })
                .collect();

        let mut changed_files = Vec::new();
        let mut deleted_files = Vec::new();
        let stats;

        // Destinations a relation may point at without violating the
        // files foreign key: everything already stored plus every
        // candidate that actually got read and will be seeded below.
        let mut known_local: HashSet<String> = stored.keys().cloned().collect();
        known_local.extend(extracted.iter().map(|(c, _, _, _)| c.rel_path.clone()));

        {
            let db = self.db.lock().unwrap();

            // Seed rows for brand-new files first so relations between
            // two new files satisfy their foreign keys regardless of
            // write order. Seeded rows carry the pending hash.
            db.transaction(|db| {
                for (candidate, _, _, _) in &extracted {
                    if !stored.contains_key(&candidate.rel_path) {
                        db.upsert_file(&FileRecord {
                            project: project.clone(),
                            file_path: candidate.rel_path.clone(),
                            mtime_ms: candidate.mtime_ms,
                            size: candidate.size,
                            content_hash: PENDING_HASH.to_string(),
                            updated_at: now_iso(),
                            line_count: None,
                        })?;
                    }
                }
                Ok(())
            })?;

            for candidate in &touches {
                let prev = &stored[&candidate.rel_path];
                db.upsert_file(&FileRecord {
                    project: project.clone(),
                    file_path: candidate.rel_path.clone(),
                    mtime_ms: candidate.mtime_ms,
                    size: candidate.size,
                    content_hash: candidate.hash.clone(),
                    updated_at: now_iso(),
                    line_count: prev.line_count,
                })?;
            }

            for (candidate, parsed, symbols, relations) in extracted {
                let relations = self.retain_resolvable_relations(&db, relations, |dst| {
                    known_local.contains(dst)
                });

                db.transaction(|db| {
                    db.upsert_file(&FileRecord {
                        project: project.clone(),
                        file_path: candidate.rel_path.clone(),
                        mtime_ms: candidate.mtime_ms,
                        size: candidate.size,
                        content_hash: candidate.hash.clone(),
                        updated_at: now_iso(),
                        line_count: Some(candidate.line_count),
                    })?;
                    db.replace_file_symbols(
                        &project,
                        &candidate.rel_path,
                        &candidate.hash,
                        &symbols,
                    )?;
                    db.replace_file_relations(&project, &candidate.rel_path, &relations)?;
                    Ok(())
                })?;

                if let Some(parsed) = parsed {
                    self.parse_cache
                        .set(candidate.abs_path.to_string_lossy(), Arc::new(parsed));
                }
                changed_files.push(candidate.rel_path);
            }

            // Tombstone stored files that vanished from disk; the cascade
            // removes their symbols and relations on both sides.
            let mut vanished: Vec<&String> = stored
                .keys()
                .filter(|rel| !disk_set.contains(*rel))
                .collect();
            vanished.sort();
            for rel in vanished {
                db.transaction(|db| {
                    db.delete_file(&project, rel)?;
                    Ok(())
                })?;
                self.parse_cache
                    .invalidate(&self.config.project_root.join(rel).to_string_lossy());
                deleted_files.push(rel.clone());
            }

            db.checkpoint();
            stats = db.get_stats(&project)?;
        }

        let result = IndexResult {
            indexed_files: changed_files.len(),
            removed_files: deleted_files.len(),
            total_symbols: stats.symbol_count,
            total_relations: stats.relation_count,
            duration_ms: started.elapsed().as_millis() as u64,
            changed_files,
            deleted_files,
        };

        info!(
            "Full index complete: {} changed, {} removed, {} symbols in {} ms",
            result.indexed_files, result.removed_files, result.total_symbols, result.duration_ms
        );

        self.listeners.emit(&result);
        Ok(result)
    }

    /// Process one debounced batch of watcher events.
    fn process_event_batch(&self, batch: Vec<(PathBuf, WatchEventKind)>) -> Result<IndexResult> {
        let _batch_guard = self.index_lock.lock().unwrap();
        let started = Instant::now();
        let project = self.default_project.clone();
        let root = self.config.project_root.clone();

        let mut changed_files = Vec::new();
        let mut deleted_files = Vec::new();
        let stats;

        {
            let db = self.db.lock().unwrap();

            for (path, kind) in batch {
                let Some(rel_path) = relative_unix_path(&path, &root) else {
                    continue;
                };

                if rel_path == "tsconfig.json" {
                    self.reload_path_mappings();
                    continue;
                }
                if !self.config.is_indexable(&rel_path) {
                    continue;
                }

                match kind {
                    WatchEventKind::Delete => {
                        if db.delete_file(&project, &rel_path)? {
                            deleted_files.push(rel_path);
                        }
                        self.parse_cache.invalidate(&path.to_string_lossy());
                    }
                    WatchEventKind::Create | WatchEventKind::Update => {
                        match self.index_one_file(&db, &path, &rel_path)? {
                            SingleOutcome::Changed => changed_files.push(rel_path),
                            SingleOutcome::Unchanged => {}
                            SingleOutcome::Missing => {
                                // Raced a delete; tombstone instead.
                                if db.delete_file(&project, &rel_path)? {
                                    deleted_files.push(rel_path);
                                }
                            }
                        }
                    }
                }
            }

            stats = db.get_stats(&project)?;
        }

        let result = IndexResult {
            indexed_files: changed_files.len(),
            removed_files: deleted_files.len(),
            total_symbols: stats.symbol_count,
            total_relations: stats.relation_count,
            duration_ms: started.elapsed().as_millis() as u64,
            changed_files,
            deleted_files,
        };

        if result.indexed_files > 0 || result.removed_files > 0 {
            self.listeners.emit(&result);
        }
        Ok(result)
    }

    /// Read, hash, compare, and (when the fingerprint moved) re-extract a
    /// single file inside one transaction.
    fn index_one_file(
        &self,
        db: &IndexDatabase,
        abs_path: &Path,
        rel_path: &str,
    ) -> Result<SingleOutcome> {
        let project = &self.default_project;

        let Ok((mtime_ms, size)) = stat_file(abs_path) else {
            return Ok(SingleOutcome::Missing);
        };
        let bytes = match std::fs::read(abs_path) {
            Ok(bytes) => bytes,
            Err(_) => return Ok(SingleOutcome::Missing),
        };

        let hash = hash_content(&bytes);
        let stored = db.get_file(project, rel_path)?;

        if let Some(prev) = &stored {
            if prev.content_hash == hash {
                db.upsert_file(&FileRecord {
                    project: project.clone(),
                    file_path: rel_path.to_string(),
                    mtime_ms,
                    size,
                    content_hash: hash,
                    updated_at: now_iso(),
                    line_count: prev.line_count,
                })?;
                return Ok(SingleOutcome::Unchanged);
            }
        }

        let content = String::from_utf8_lossy(&bytes).into_owned();
        let line_count = content.lines().count() as i64;
        let mappings = self.path_mappings.lock().unwrap().clone();
        let (parsed, symbols, relations) = self.parse_and_extract(rel_path, &content, &mappings);
        let relations =
            self.retain_resolvable_relations(db, relations, |dst| dst == rel_path);

        db.transaction(|db| {
            db.upsert_file(&FileRecord {
                project: project.clone(),
                file_path: rel_path.to_string(),
                mtime_ms,
                size,
                content_hash: hash.clone(),
                updated_at: now_iso(),
                line_count: Some(line_count),
            })?;
            db.replace_file_symbols(project, rel_path, &hash, &symbols)?;
            db.replace_file_relations(project, rel_path, &relations)?;
            Ok(())
        })?;

        let parsed = parsed.map(Arc::new);
        if let Some(parsed) = parsed {
            self.parse_cache.set(abs_path.to_string_lossy(), parsed);
        }

        Ok(SingleOutcome::Changed)
    }

    /// Relations whose destination row would violate the files foreign
    /// key are dropped; external modules simply have no file record.
    fn retain_resolvable_relations(
        &self,
        db: &IndexDatabase,
        relations: Vec<NewRelation>,
        known_local: impl Fn(&str) -> bool,
    ) -> Vec<NewRelation> {
        let project = &self.default_project;
        relations
            .into_iter()
            .filter(|relation| {
                let dst_project = relation.dst_project.as_deref().unwrap_or(project);
                if dst_project == project && known_local(&relation.dst_file_path) {
                    return true;
                }
                match db.get_file(dst_project, &relation.dst_file_path) {
                    Ok(Some(_)) => true,
                    Ok(None) => {
                        debug!(
                            "Dropping relation to unindexed destination '{}'",
                            relation.dst_file_path
                        );
                        false
                    }
                    Err(e) => {
                        warn!("Relation destination lookup failed: {}", e);
                        false
                    }
                }
            })
            .collect()
    }

    fn parse_and_extract(
        &self,
        rel_path: &str,
        content: &str,
        mappings: &PathMappings,
    ) -> (Option<ParsedSource>, Vec<NewSymbol>, Vec<NewRelation>) {
        let Some(parser) = &self.collaborators.parser else {
            return (None, Vec::new(), Vec::new());
        };

        let parsed = match parser.parse(rel_path, content) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Parse failed for '{}': {}", rel_path, e);
                return (None, Vec::new(), Vec::new());
            }
        };

        let symbols = match &self.collaborators.symbol_extractor {
            Some(extractor) => match extractor.extract_symbols(&parsed) {
                Ok(symbols) => symbols,
                Err(e) => {
                    warn!("Symbol extraction failed for '{}': {}", rel_path, e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let relations = match &self.collaborators.relation_extractor {
            Some(extractor) => match extractor.extract_relations(&parsed, mappings) {
                Ok(relations) => relations,
                Err(e) => {
                    warn!("Relation extraction failed for '{}': {}", rel_path, e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        (Some(parsed), symbols, relations)
    }

    fn reload_path_mappings(&self) {
        match tsconfig::load_path_mappings(&self.config.project_root) {
            Ok(mappings) => {
                *self.path_mappings.lock().unwrap() = mappings;
                debug!("Reloaded tsconfig path mappings");
            }
            Err(e) => warn!("Failed to reload tsconfig path mappings: {}", e),
        }
    }
}

#[cfg(test)]
impl IndexCoordinator {
    /// Abort the debounce worker in place so the next shutdown() joins a
    /// cancelled task, for close-error aggregation tests.
    pub(crate) fn abort_worker(&self) {
        if let Some(handle) = self.worker.lock().unwrap().as_ref() {
            handle.abort();
        }
    }
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Coalesce events per path within the debounce window, then run the
/// single-file pipeline for each survivor off the runtime.
async fn debounce_loop(
    coordinator: Arc<IndexCoordinator>,
    mut rx: mpsc::UnboundedReceiver<WatchEvent>,
    debounce: Duration,
) {
    loop {
        let Some(first) = rx.recv().await else {
            break;
        };

        let mut pending: Vec<(PathBuf, WatchEventKind)> = Vec::new();
        merge_event(&mut pending, first);

        let mut channel_closed = false;
        loop {
            match tokio::time::timeout(debounce, rx.recv()).await {
                Ok(Some(event)) => merge_event(&mut pending, event),
                Ok(None) => {
                    channel_closed = true;
                    break;
                }
                Err(_elapsed) => break,
            }
        }

        let batch_coordinator = Arc::clone(&coordinator);
        let join = tokio::task::spawn_blocking(move || {
            batch_coordinator.process_event_batch(pending)
        })
        .await;

        match join {
            Ok(Ok(_result)) => {}
            Ok(Err(e)) => error!("Watcher batch indexing failed: {}", e),
            Err(e) => error!("Watcher batch task failed: {}", e),
        }

        if channel_closed {
            break;
        }
    }

    debug!("Debounce worker stopped");
}

/// Per-path coalescing. A later event generally wins, except that an
/// update arriving after a create keeps the create.
fn merge_event(pending: &mut Vec<(PathBuf, WatchEventKind)>, event: WatchEvent) {
    for (path, kind) in pending.iter_mut() {
        if *path == event.path {
            *kind = match (*kind, event.kind) {
                (WatchEventKind::Create, WatchEventKind::Update) => WatchEventKind::Create,
                (_, new_kind) => new_kind,
            };
            return;
        }
    }
    pending.push((event.path, event.kind));
}

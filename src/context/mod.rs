// Gildash context
//
// The context owns the database handle, the parse cache, the tsconfig
// path mappings, the graph cache, and every timer. Open wires the
// components in dependency order, elects the single-writer role, and in
// watch mode installs signal handlers; close (lifecycle.rs) unwinds in
// the contractual order.

pub mod graph_queries;
pub mod lifecycle;
pub mod queries;

use crate::boundaries::{ProjectBoundary, directory_basename, discover_project_boundaries};
use crate::cache::ParseCache;
use crate::collaborators::{
    Collaborators, FileWatcher, SemanticLayer, WatchEvent, WatchEventKind, WatchSink,
};
use crate::config::{OpenOptions, ResolvedConfig};
use crate::database::IndexDatabase;
use crate::error::{GildashError, GildashResult};
use crate::events::ListenerBus;
use crate::graph::DependencyGraph;
use crate::indexer::IndexCoordinator;
use crate::indexer::walk::relative_unix_path;
use crate::ownership::{AcquireOptions, WatcherRole, acquire_watcher_role, update_heartbeat};
use crate::tsconfig::{self, PathMappings};
use crate::watch::spawn_notify_watcher;
use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A local code-intelligence engine bound to one project root.
///
/// Cloning shares the underlying context; `close` affects every clone.
#[derive(Clone)]
pub struct Gildash {
    pub(crate) inner: Arc<ContextInner>,
}

impl std::fmt::Debug for Gildash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gildash").finish_non_exhaustive()
    }
}

pub(crate) struct ContextInner {
    pub(crate) options: OpenOptions,
    pub(crate) config: Arc<ResolvedConfig>,
    pub(crate) collaborators: Arc<Collaborators>,
    pub(crate) db: Arc<Mutex<IndexDatabase>>,
    pub(crate) db_path: PathBuf,
    pub(crate) boundaries: Vec<ProjectBoundary>,
    pub(crate) default_project: String,
    pub(crate) parse_cache: Arc<ParseCache>,
    pub(crate) path_mappings: Arc<Mutex<PathMappings>>,
    pub(crate) graph_cache: Mutex<HashMap<String, Arc<DependencyGraph>>>,
    pub(crate) listeners: ListenerBus,
    pub(crate) coordinator: Mutex<Option<Arc<IndexCoordinator>>>,
    pub(crate) watcher: Mutex<Option<Box<dyn FileWatcher>>>,
    pub(crate) semantic: Mutex<Option<Arc<dyn SemanticLayer>>>,
    pub(crate) heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    pub(crate) healthcheck_task: Mutex<Option<JoinHandle<()>>>,
    pub(crate) signal_tasks: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) role: Mutex<WatcherRole>,
    pub(crate) closed: AtomicBool,
    pub(crate) close_lock: tokio::sync::Mutex<()>,
    pub(crate) pid: i64,
}

impl Gildash {
    /// Open a context against `options.project_root`.
    pub async fn open(options: OpenOptions) -> GildashResult<Gildash> {
        if !options.project_root.is_absolute() {
            return Err(GildashError::validation(format!(
                "project root must be an absolute path: {}",
                options.project_root.display()
            )));
        }
        if !options.project_root.is_dir() {
            return Err(GildashError::validation(format!(
                "project root does not exist: {}",
                options.project_root.display()
            )));
        }

        let config = Arc::new(
            options
                .resolve()
                .map_err(|e| GildashError::validation(e.to_string()))?,
        );

        let db_path = config.db_path();
        let open_path = db_path.clone();
        let db = tokio::task::spawn_blocking(move || IndexDatabase::open(&open_path))
            .await
            .map_err(GildashError::store)?
            .map_err(GildashError::store)?;

        let boundaries = match &options.discover_projects {
            Some(discover) => discover(&config.project_root),
            None => discover_project_boundaries(&config.project_root),
        }
        .map_err(GildashError::store)?;
        let default_project = boundaries
            .first()
            .map(|b| b.project.clone())
            .unwrap_or_else(|| directory_basename(&config.project_root));

        let parse_cache = Arc::new(ParseCache::new(options.parse_cache_capacity));

        let path_mappings = tsconfig::load_path_mappings(&config.project_root)
            .map_err(GildashError::store)?;

        // The semantic layer fails fast: its initialization error closes
        // the database handle before surfacing.
        let semantic: Option<Arc<dyn SemanticLayer>> = if options.semantic {
            let Some(factory) = &options.semantic_factory else {
                drop(db);
                return Err(GildashError::semantic(
                    "semantic mode enabled but no semantic factory configured",
                ));
            };
            match factory(&config.project_root) {
                Ok(layer) => Some(layer),
                Err(e) => {
                    drop(db);
                    return Err(GildashError::semantic(e));
                }
            }
        } else {
            None
        };

        let collaborators = Arc::new(Collaborators {
            parser: options.parser.clone(),
            symbol_extractor: options.symbol_extractor.clone(),
            relation_extractor: options.relation_extractor.clone(),
            pattern_search: options.pattern_search.clone(),
        });

        let watch_mode = config.watch_mode;
        let stale_threshold_ms = config.stale_threshold_ms;
        let pid = std::process::id() as i64;

        let inner = Arc::new(ContextInner {
            options,
            config,
            collaborators,
            db: Arc::new(Mutex::new(db)),
            db_path,
            boundaries,
            default_project,
            parse_cache,
            path_mappings: Arc::new(Mutex::new(path_mappings)),
            graph_cache: Mutex::new(HashMap::new()),
            listeners: ListenerBus::new(),
            coordinator: Mutex::new(None),
            watcher: Mutex::new(None),
            semantic: Mutex::new(semantic),
            heartbeat_task: Mutex::new(None),
            healthcheck_task: Mutex::new(None),
            signal_tasks: Mutex::new(Vec::new()),
            role: Mutex::new(WatcherRole::Reader),
            closed: AtomicBool::new(false),
            close_lock: tokio::sync::Mutex::new(()),
            pid,
        });

        // Every index batch drops the graph snapshots.
        {
            let weak = Arc::downgrade(&inner);
            inner.listeners.subscribe(Arc::new(move |_result| {
                if let Some(inner) = weak.upgrade() {
                    inner.graph_cache.lock().unwrap().clear();
                }
            }));
        }

        let context = Gildash {
            inner: Arc::clone(&inner),
        };

        // Role election happens only in watch mode; a non-watching
        // context indexes on demand and acts as its own owner.
        let role = if watch_mode {
            let db = Arc::clone(&inner.db);
            let acquire_options = AcquireOptions { stale_threshold_ms };
            tokio::task::spawn_blocking(move || {
                let db = db.lock().unwrap();
                acquire_watcher_role(&db, pid, &acquire_options)
            })
            .await
            .map_err(GildashError::store)?
            .map_err(GildashError::store)?
        } else {
            WatcherRole::Owner
        };
        *inner.role.lock().unwrap() = role;
        debug!("Opened with role {:?}", role);

        match role {
            WatcherRole::Owner => {
                if let Err(e) = setup_owner_infrastructure(&inner, watch_mode).await {
                    let message = e.to_string();
                    if let Err(close_err) = context.close().await {
                        warn!("Teardown after failed open also failed: {}", close_err);
                    }
                    return Err(GildashError::index(message));
                }
            }
            WatcherRole::Reader => {
                lifecycle::install_healthcheck(&inner);
            }
        }

        if watch_mode {
            lifecycle::install_signal_handlers(&inner);
            lifecycle::register_exit_hook(&inner);
        }

        info!(
            "Gildash open at {} (project '{}', role {:?})",
            inner.config.project_root.display(),
            inner.default_project,
            role
        );
        Ok(context)
    }

    pub(crate) fn ensure_open(&self) -> GildashResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            Err(GildashError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Bring up the owner-side machinery: coordinator first (published before
/// any watcher event can arrive), then watcher and heartbeat in watch
/// mode, then the initial full index. Any failure tears down whatever
/// started and propagates.
pub(crate) async fn setup_owner_infrastructure(
    inner: &Arc<ContextInner>,
    watch_mode: bool,
) -> Result<()> {
    let coordinator = IndexCoordinator::new(
        Arc::clone(&inner.db),
        Arc::clone(&inner.parse_cache),
        Arc::clone(&inner.config),
        inner.default_project.clone(),
        Arc::clone(&inner.collaborators),
        Arc::clone(&inner.path_mappings),
        inner.listeners.clone(),
    );
    *inner.coordinator.lock().unwrap() = Some(Arc::clone(&coordinator));

    if watch_mode {
        let sink = make_watch_sink(inner);
        let root = inner.config.project_root.clone();
        let watcher_result = match &inner.options.watcher_factory {
            Some(factory) => factory(&root, sink),
            None => spawn_notify_watcher(&root, sink),
        };

        match watcher_result {
            Ok(watcher) => {
                *inner.watcher.lock().unwrap() = Some(watcher);
            }
            Err(e) => {
                teardown_owner_infrastructure(inner).await;
                return Err(anyhow!("watcher start failed: {e}"));
            }
        }

        *inner.heartbeat_task.lock().unwrap() = Some(spawn_heartbeat(inner));
    }

    let index_coordinator = Arc::clone(&coordinator);
    let index_result =
        tokio::task::spawn_blocking(move || index_coordinator.full_index()).await;

    let result = match index_result {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            teardown_owner_infrastructure(inner).await;
            return Err(e);
        }
        Err(e) => {
            teardown_owner_infrastructure(inner).await;
            return Err(anyhow!("full index task failed: {e}"));
        }
    };

    // Feed the semantic layer, best-effort.
    let semantic = inner.semantic.lock().unwrap().clone();
    if let Some(layer) = semantic {
        for rel_path in &result.changed_files {
            let source = std::fs::read_to_string(inner.config.project_root.join(rel_path)).ok();
            if let Err(e) = layer.file_changed(rel_path, source.as_deref()) {
                debug!("Semantic feed failed for '{}': {}", rel_path, e);
            }
        }
    }

    Ok(())
}

/// Undo a partial owner setup: shut the coordinator, close the watcher,
/// stop the heartbeat. All best-effort.
pub(crate) async fn teardown_owner_infrastructure(inner: &Arc<ContextInner>) {
    let coordinator = inner.coordinator.lock().unwrap().take();
    if let Some(coordinator) = coordinator {
        if let Err(e) = coordinator.shutdown().await {
            warn!("Coordinator shutdown during rollback failed: {}", e);
        }
    }

    let watcher = inner.watcher.lock().unwrap().take();
    if let Some(mut watcher) = watcher {
        if let Err(e) = watcher.close() {
            warn!("Watcher close during rollback failed: {}", e);
        }
    }

    if let Some(handle) = inner.heartbeat_task.lock().unwrap().take() {
        handle.abort();
    }
}

/// The callback handed to the watcher: filters, notifies the semantic
/// layer best-effort, and forwards to whichever coordinator is current.
fn make_watch_sink(inner: &Arc<ContextInner>) -> WatchSink {
    let weak = Arc::downgrade(inner);
    Arc::new(move |event: WatchEvent| {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }

        let Some(rel_path) = relative_unix_path(&event.path, &inner.config.project_root) else {
            return;
        };
        if rel_path != "tsconfig.json" && !inner.config.is_indexable(&rel_path) {
            return;
        }

        let semantic = inner.semantic.lock().unwrap().clone();
        if let Some(layer) = semantic {
            let outcome = match event.kind {
                WatchEventKind::Delete => layer.file_deleted(&rel_path),
                WatchEventKind::Create | WatchEventKind::Update => {
                    let source = std::fs::read_to_string(&event.path).ok();
                    layer.file_changed(&rel_path, source.as_deref())
                }
            };
            if let Err(e) = outcome {
                debug!("Semantic notification failed for '{}': {}", rel_path, e);
            }
        }

        let coordinator = inner.coordinator.lock().unwrap().clone();
        if let Some(coordinator) = coordinator {
            coordinator.handle_watcher_event(event);
        }
    })
}

/// 30 s owner heartbeat. Losing the row (someone took over) is logged;
/// the next health cycle of the usurped process sorts the roles out.
fn spawn_heartbeat(inner: &Arc<ContextInner>) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(crate::ownership::HEARTBEAT_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if inner.closed.load(Ordering::SeqCst) {
                break;
            }

            let db = Arc::clone(&inner.db);
            let pid = inner.pid;
            let touched = tokio::task::spawn_blocking(move || {
                let db = db.lock().unwrap();
                update_heartbeat(&db, pid)
            })
            .await;

            match touched {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => warn!("Heartbeat found the owner row gone; ownership lost"),
                Ok(Err(e)) => warn!("Heartbeat update failed: {}", e),
                Err(e) => error!("Heartbeat task join failed: {}", e),
            }
        }
    })
}

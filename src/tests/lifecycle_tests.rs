// Close ordering, error aggregation, closed monotonicity, role guards.

use super::test_utils::*;
use crate::collaborators::{FileWatcher, SemanticLayer};
use crate::error::{ErrorKind, GildashError};
use crate::ownership::WatcherRole;
use crate::{Gildash, SymbolSearch};
use anyhow::Result;
use serial_test::serial;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

struct RecordingSemantic {
    log: Arc<Mutex<Vec<String>>>,
    fail_dispose: bool,
}

impl SemanticLayer for RecordingSemantic {
    fn file_changed(&self, _file_path: &str, _source: Option<&str>) -> Result<()> {
        Ok(())
    }
    fn file_deleted(&self, _file_path: &str) -> Result<()> {
        Ok(())
    }
    fn dispose(&self) -> Result<()> {
        self.log.lock().unwrap().push("semantic.dispose".to_string());
        if self.fail_dispose {
            anyhow::bail!("semantic dispose exploded");
        }
        Ok(())
    }
}

struct RecordingWatcher {
    log: Arc<Mutex<Vec<String>>>,
    root: PathBuf,
    context_slot: Arc<Mutex<Option<Gildash>>>,
    fail_close: bool,
}

impl FileWatcher for RecordingWatcher {
    fn close(&mut self) -> Result<()> {
        self.log.lock().unwrap().push("watcher.close".to_string());

        // The coordinator must already be shut down when the watcher
        // closes.
        if let Some(context) = self.context_slot.lock().unwrap().as_ref() {
            if context.inner.coordinator.lock().unwrap().is_none() {
                self.log
                    .lock()
                    .unwrap()
                    .push("coordinator-already-shut".to_string());
            }
        }

        // Ownership is released only after the watcher closed.
        let db = open_raw_db(&self.root)?;
        if db.select_owner()?.is_some() {
            self.log
                .lock()
                .unwrap()
                .push("owner-present-at-watcher-close".to_string());
        }

        if self.fail_close {
            anyhow::bail!("watcher close exploded");
        }
        Ok(())
    }
}

fn watched_options(
    root: &std::path::Path,
    log: Arc<Mutex<Vec<String>>>,
    context_slot: Arc<Mutex<Option<Gildash>>>,
    fail_watcher_close: bool,
    fail_semantic_dispose: bool,
) -> crate::OpenOptions {
    let mut options = base_options(root);
    options.watch_mode = true;

    let watcher_log = Arc::clone(&log);
    let watcher_root = root.to_path_buf();
    options.watcher_factory = Some(Arc::new(move |_root, _sink| {
        Ok(Box::new(RecordingWatcher {
            log: Arc::clone(&watcher_log),
            root: watcher_root.clone(),
            context_slot: Arc::clone(&context_slot),
            fail_close: fail_watcher_close,
        }) as Box<dyn FileWatcher>)
    }));

    options.semantic = true;
    let semantic_log = Arc::clone(&log);
    options.semantic_factory = Some(Arc::new(move |_root| {
        Ok(Arc::new(RecordingSemantic {
            log: Arc::clone(&semantic_log),
            fail_dispose: fail_semantic_dispose,
        }) as Arc<dyn SemanticLayer>)
    }));

    options
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn close_runs_in_contractual_order() {
    let workspace = create_test_workspace().unwrap();
    create_test_file(workspace.path(), "src/a.ts", "export function a() {}\n").unwrap();

    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let slot: Arc<Mutex<Option<Gildash>>> = Arc::new(Mutex::new(None));

    let context = Gildash::open(watched_options(
        workspace.path(),
        Arc::clone(&log),
        Arc::clone(&slot),
        false,
        false,
    ))
    .await
    .unwrap();
    *slot.lock().unwrap() = Some(context.clone());
    assert_eq!(context.role().unwrap(), WatcherRole::Owner);

    context.close().await.unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "semantic.dispose",
            "watcher.close",
            "coordinator-already-shut",
            "owner-present-at-watcher-close",
        ]
    );

    // Ownership released after the watcher closed.
    let db = open_raw_db(workspace.path()).unwrap();
    assert!(db.select_owner().unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn close_aggregates_errors_but_still_releases() {
    let workspace = create_test_workspace().unwrap();
    create_test_file(workspace.path(), "src/a.ts", "export function a() {}\n").unwrap();

    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let slot: Arc<Mutex<Option<Gildash>>> = Arc::new(Mutex::new(None));

    let context = Gildash::open(watched_options(
        workspace.path(),
        Arc::clone(&log),
        Arc::clone(&slot),
        true,
        true,
    ))
    .await
    .unwrap();

    let err = context.close().await.unwrap_err();
    let GildashError::Close { causes } = &err else {
        panic!("expected close error, got {err:?}");
    };
    assert!(causes.len() >= 2, "causes: {causes:?}");
    assert!(causes[0].contains("semantic dispose"));
    assert!(causes[1].contains("watcher close"));

    // Resources are released regardless.
    let db = open_raw_db(workspace.path()).unwrap();
    assert!(db.select_owner().unwrap().is_none());
    assert!(matches!(context.get_stats(), Err(GildashError::Closed)));
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn close_collects_coordinator_and_db_close_failures() {
    let workspace = create_test_workspace().unwrap();
    create_test_file(workspace.path(), "src/a.ts", "export function a() {}\n").unwrap();

    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let slot: Arc<Mutex<Option<Gildash>>> = Arc::new(Mutex::new(None));
    let context = Gildash::open(watched_options(
        workspace.path(),
        log,
        slot,
        false,
        false,
    ))
    .await
    .unwrap();

    // Wedge both the coordinator worker and the connection close.
    context
        .inner
        .coordinator
        .lock()
        .unwrap()
        .as_ref()
        .unwrap()
        .abort_worker();
    context.inner.db.lock().unwrap().inject_close_failure();

    let err = context.close().await.unwrap_err();
    let GildashError::Close { causes } = &err else {
        panic!("expected close error, got {err:?}");
    };
    assert!(causes.len() >= 2, "causes: {causes:?}");
    assert!(causes.iter().any(|c| c.contains("coordinator shutdown")));
    assert!(causes.iter().any(|c| c.contains("db close")));
    // Ordered as the close sequence ran them.
    let coordinator_index = causes
        .iter()
        .position(|c| c.contains("coordinator shutdown"))
        .unwrap();
    let db_index = causes.iter().position(|c| c.contains("db close")).unwrap();
    assert!(coordinator_index < db_index);

    // Resources were still released: ownership row gone, context closed.
    let db = open_raw_db(workspace.path()).unwrap();
    assert!(db.select_owner().unwrap().is_none());
    assert!(matches!(context.get_stats(), Err(GildashError::Closed)));
}

#[tokio::test]
async fn close_is_idempotent() {
    let workspace = create_test_workspace().unwrap();
    create_test_file(workspace.path(), "src/a.ts", "export function a() {}\n").unwrap();

    let context = open_project(workspace.path()).await;
    context.close().await.unwrap();
    // Second close is a no-op, even through a clone.
    context.clone().close().await.unwrap();
    context.close().await.unwrap();
}

#[tokio::test]
async fn every_entry_point_is_closed_after_close() {
    let workspace = create_test_workspace().unwrap();
    create_test_file(workspace.path(), "src/a.ts", "export function a() {}\n").unwrap();

    let context = open_project(workspace.path()).await;
    context.close().await.unwrap();

    let is_closed = |err: GildashError| matches!(err, GildashError::Closed);

    assert!(is_closed(context.search_symbols(SymbolSearch::default()).unwrap_err()));
    assert!(is_closed(context.search_all_symbols(SymbolSearch::default()).unwrap_err()));
    assert!(is_closed(context.list_indexed_files().unwrap_err()));
    assert!(is_closed(context.get_stats().unwrap_err()));
    assert!(is_closed(context.get_file_info("src/a.ts").unwrap_err()));
    assert!(is_closed(context.get_symbols_by_file("src/a.ts").unwrap_err()));
    assert!(is_closed(context.get_module_interface("src/a.ts").unwrap_err()));
    assert!(is_closed(context.get_dependencies("src/a.ts").unwrap_err()));
    assert!(is_closed(context.get_dependents("src/a.ts").unwrap_err()));
    assert!(is_closed(context.has_cycle().await.unwrap_err()));
    assert!(is_closed(context.get_affected(&[]).await.unwrap_err()));
    assert!(is_closed(context.get_import_graph().await.unwrap_err()));
    assert!(is_closed(context.get_cycle_paths(None).await.unwrap_err()));
    assert!(is_closed(context.get_fan_metrics("src/a.ts").await.unwrap_err()));
    assert!(is_closed(context.reindex().await.unwrap_err()));
    assert!(is_closed(context.resolve_symbol("a", "src/a.ts").unwrap_err()));
    assert!(is_closed(context.get_heritage_chain("a", "src/a.ts").await.unwrap_err()));
    assert!(is_closed(context.get_parsed_ast("src/a.ts").unwrap_err()));
    assert!(is_closed(context.parse_source("x.ts", "").unwrap_err()));
    assert!(is_closed(context.batch_parse(&[]).await.unwrap_err()));
    assert!(is_closed(context.find_pattern("x", 1).await.unwrap_err()));
    assert!(is_closed(context.role().unwrap_err()));
    assert!(is_closed(context.projects().unwrap_err()));
    assert!(is_closed(
        context.on_indexed(Arc::new(|_| {})).unwrap_err()
    ));
}

#[tokio::test]
async fn reindex_is_owner_only() {
    let workspace = create_test_workspace().unwrap();
    create_test_file(workspace.path(), "src/a.ts", "export function a() {}\n").unwrap();

    let context = open_project(workspace.path()).await;

    // Force the reader role the way a lost election would.
    *context.inner.role.lock().unwrap() = WatcherRole::Reader;

    let err = context.reindex().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Index);
    assert!(err.to_string().contains("owner"));

    context.close().await.unwrap();
}

#[tokio::test]
async fn cleanup_on_close_removes_database_files() {
    let workspace = create_test_workspace().unwrap();
    create_test_file(workspace.path(), "src/a.ts", "export function a() {}\n").unwrap();

    let mut options = base_options(workspace.path());
    options.cleanup_on_close = true;
    let context = Gildash::open(options).await.unwrap();

    let db_path = workspace.path().join(".gildash").join("index.db");
    assert!(db_path.exists());

    context.close().await.unwrap();
    assert!(!db_path.exists());
}

#[tokio::test]
async fn semantic_initialization_failure_fails_open() {
    let workspace = create_test_workspace().unwrap();
    create_test_file(workspace.path(), "src/a.ts", "export function a() {}\n").unwrap();

    let mut options = base_options(workspace.path());
    options.semantic = true;
    options.semantic_factory = Some(Arc::new(|_root| anyhow::bail!("model load failed")));

    let err = Gildash::open(options).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Semantic);

    // Semantic mode without a factory is also a semantic failure.
    let mut options = base_options(workspace.path());
    options.semantic = true;
    let err = Gildash::open(options).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Semantic);
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn failed_watcher_start_rolls_back_open() {
    let workspace = create_test_workspace().unwrap();
    create_test_file(workspace.path(), "src/a.ts", "export function a() {}\n").unwrap();

    let mut options = base_options(workspace.path());
    options.watch_mode = true;
    options.watcher_factory = Some(Arc::new(|_root, _sink| {
        anyhow::bail!("inotify limit reached")
    }));

    let err = Gildash::open(options).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Index);

    // The failed open released its ownership claim; a fresh open works.
    let db = open_raw_db(workspace.path()).unwrap();
    assert!(db.select_owner().unwrap().is_none());
    drop(db);

    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let slot: Arc<Mutex<Option<Gildash>>> = Arc::new(Mutex::new(None));
    let context = Gildash::open(watched_options(
        workspace.path(),
        log,
        slot,
        false,
        false,
    ))
    .await
    .unwrap();
    assert_eq!(context.role().unwrap(), WatcherRole::Owner);
    context.close().await.unwrap();
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn watch_mode_registers_signal_and_exit_handlers_and_close_removes_them() {
    use crate::context::lifecycle::exit_hook_registered;

    let workspace = create_test_workspace().unwrap();
    create_test_file(workspace.path(), "src/a.ts", "export function a() {}\n").unwrap();

    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let slot: Arc<Mutex<Option<Gildash>>> = Arc::new(Mutex::new(None));
    let context = Gildash::open(watched_options(
        workspace.path(),
        log,
        slot,
        false,
        false,
    ))
    .await
    .unwrap();

    assert_eq!(context.inner.signal_tasks.lock().unwrap().len(), 2);
    assert!(exit_hook_registered(&context.inner));

    context.close().await.unwrap();
    assert!(context.inner.signal_tasks.lock().unwrap().is_empty());
    assert!(!exit_hook_registered(&context.inner));
}

#[tokio::test]
async fn non_watch_mode_skips_election_and_signals() {
    let workspace = create_test_workspace().unwrap();
    create_test_file(workspace.path(), "src/a.ts", "export function a() {}\n").unwrap();

    let context = open_project(workspace.path()).await;

    assert_eq!(context.role().unwrap(), WatcherRole::Owner);
    assert!(context.inner.signal_tasks.lock().unwrap().is_empty());
    #[cfg(unix)]
    assert!(!crate::context::lifecycle::exit_hook_registered(&context.inner));

    // No owner row was ever written.
    assert!(context.inner.db.lock().unwrap().select_owner().unwrap().is_none());

    context.close().await.unwrap();
}

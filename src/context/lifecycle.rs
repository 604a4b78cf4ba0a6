// Close sequence, reader health-check loop, and signal handlers
//
// Close order is contractual: coordinator.shutdown -> watcher.close ->
// release ownership -> db close. Errors along the way are collected, not
// thrown; the caller gets one `close` error carrying the ordered list.

use super::{Gildash, setup_owner_infrastructure, teardown_owner_infrastructure};
use crate::context::ContextInner;
use crate::database::remove_database_with_companions;
use crate::error::{GildashError, GildashResult};
use crate::ownership::{
    AcquireOptions, HEALTHCHECK_INTERVAL, MAX_HEALTHCHECK_RETRIES, WatcherRole,
    acquire_watcher_role, release_watcher_role,
};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, error, info, warn};

impl Gildash {
    /// Close the context and release every resource. Idempotent: the
    /// second and later calls are no-ops. Never throws mid-way; collected
    /// errors come back as one `close` error after everything released.
    pub async fn close(&self) -> GildashResult<()> {
        let inner = &self.inner;
        let _serialize = inner.close_lock.lock().await;

        if inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Closing Gildash context");

        let mut causes: Vec<String> = Vec::new();

        // Signal handlers go first so a signal during close cannot
        // re-enter; the process-exit hook entry goes with them.
        for handle in inner.signal_tasks.lock().unwrap().drain(..) {
            handle.abort();
        }
        unregister_exit_hook(inner);

        let semantic = inner.semantic.lock().unwrap().take();
        if let Some(layer) = semantic {
            if let Err(e) = layer.dispose() {
                causes.push(format!("semantic dispose: {e}"));
            }
        }

        let coordinator = inner.coordinator.lock().unwrap().take();
        if let Some(coordinator) = coordinator {
            if let Err(e) = coordinator.shutdown().await {
                causes.push(format!("coordinator shutdown: {e}"));
            }
        }

        let watcher = inner.watcher.lock().unwrap().take();
        if let Some(mut watcher) = watcher {
            if let Err(e) = watcher.close() {
                causes.push(format!("watcher close: {e}"));
            }
        }

        if let Some(handle) = inner.heartbeat_task.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = inner.healthcheck_task.lock().unwrap().take() {
            handle.abort();
        }

        if inner.config.watch_mode {
            let db = Arc::clone(&inner.db);
            let pid = inner.pid;
            let released = tokio::task::spawn_blocking(move || {
                let db = db.lock().unwrap();
                release_watcher_role(&db, pid)
            })
            .await;
            match released {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => causes.push(format!("release ownership: {e}")),
                Err(e) => causes.push(format!("release ownership: {e}")),
            }
        }

        // Real connection close; SQLite can refuse, and that error is
        // part of the aggregate.
        {
            let db = Arc::clone(&inner.db);
            let closed = tokio::task::spawn_blocking(move || {
                let mut db = db.lock().unwrap();
                db.close()
            })
            .await;
            match closed {
                Ok(Ok(())) => {}
                Ok(Err(e)) => causes.push(format!("db close: {e}")),
                Err(e) => causes.push(format!("db close: {e}")),
            }
        }

        if inner.config.cleanup_on_close {
            remove_database_with_companions(&inner.db_path);
        }

        info!("Gildash context closed ({} error(s))", causes.len());
        if causes.is_empty() {
            Ok(())
        } else {
            Err(GildashError::Close { causes })
        }
    }
}

/// Reader-side health check: every 60 s retry the election. A win
/// promotes this context to owner; a failed promotion rolls back and
/// keeps checking; repeated acquire failures self-close.
pub(crate) fn install_healthcheck(inner: &Arc<ContextInner>) {
    let weak = Arc::downgrade(inner);
    let handle = tokio::spawn(async move {
        let mut failures: u32 = 0;
        let mut interval = tokio::time::interval(HEALTHCHECK_INTERVAL);
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
            let acquire_options = AcquireOptions {
                stale_threshold_ms: inner.config.stale_threshold_ms,
            };
            let acquired = tokio::task::spawn_blocking(move || {
                let db = db.lock().unwrap();
                acquire_watcher_role(&db, pid, &acquire_options)
            })
            .await;

            match acquired {
                Ok(Ok(WatcherRole::Reader)) => {
                    failures = 0;
                }
                Ok(Ok(WatcherRole::Owner)) => {
                    info!("Reader promoted to owner");
                    *inner.role.lock().unwrap() = WatcherRole::Owner;
                    match setup_owner_infrastructure(&inner, inner.config.watch_mode).await {
                        Ok(()) => {
                            // Owner now; the health check retires. The
                            // listener bus carried every subscriber over
                            // to the new coordinator.
                            break;
                        }
                        Err(e) => {
                            warn!("Owner setup after promotion failed, rolling back: {}", e);
                            teardown_owner_infrastructure(&inner).await;
                            *inner.role.lock().unwrap() = WatcherRole::Reader;
                        }
                    }
                }
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(
                        "Health check failed ({}/{}): {}",
                        failures, MAX_HEALTHCHECK_RETRIES, e
                    );
                    if failures >= MAX_HEALTHCHECK_RETRIES {
                        error!("Too many consecutive health-check failures; closing context");
                        let context = Gildash {
                            inner: Arc::clone(&inner),
                        };
                        // Close from a fresh task: close aborts this one.
                        tokio::spawn(async move {
                            if let Err(close_err) = context.close().await {
                                error!("Self-close after health failures: {}", close_err);
                            }
                        });
                        break;
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        "Health check task failed ({}/{}): {}",
                        failures, MAX_HEALTHCHECK_RETRIES, e
                    );
                    if failures >= MAX_HEALTHCHECK_RETRIES {
                        error!("Too many consecutive health-check failures; closing context");
                        let context = Gildash {
                            inner: Arc::clone(&inner),
                        };
                        tokio::spawn(async move {
                            if let Err(close_err) = context.close().await {
                                error!("Self-close after health failures: {}", close_err);
                            }
                        });
                        break;
                    }
                }
            }
        }
    });
    *inner.healthcheck_task.lock().unwrap() = Some(handle);
}

/// Process-exit hook registry: the closest analog of a `beforeExit`
/// handler. An atexit callback walks the still-open contexts and does the
/// synchronous best-effort part of close (mark closed, release the owner
/// row, checkpoint); async teardown cannot run that late. Contexts
/// remove themselves on close, so repeated open/close cycles do not
/// accumulate entries; the atexit registration itself is one-time and
/// process-wide.
#[cfg(unix)]
static EXIT_CONTEXTS: std::sync::Mutex<Vec<std::sync::Weak<ContextInner>>> =
    std::sync::Mutex::new(Vec::new());
#[cfg(unix)]
static EXIT_HOOK: std::sync::Once = std::sync::Once::new();

#[cfg(unix)]
extern "C" fn run_exit_hooks() {
    let contexts: Vec<std::sync::Weak<ContextInner>> = match EXIT_CONTEXTS.lock() {
        Ok(mut guard) => guard.drain(..).collect(),
        Err(_) => return,
    };

    for weak in contexts {
        let Some(inner) = weak.upgrade() else {
            continue;
        };
        if inner.closed.swap(true, Ordering::SeqCst) {
            continue;
        }
        // try_lock only: another thread wedged on the database must not
        // deadlock process exit.
        if let Ok(db) = inner.db.try_lock() {
            if inner.config.watch_mode {
                let _ = release_watcher_role(&db, inner.pid);
            }
            db.checkpoint();
        }
    }
}

pub(crate) fn register_exit_hook(inner: &Arc<ContextInner>) {
    #[cfg(unix)]
    {
        EXIT_HOOK.call_once(|| unsafe {
            libc::atexit(run_exit_hooks);
        });
        EXIT_CONTEXTS.lock().unwrap().push(Arc::downgrade(inner));
    }
    #[cfg(not(unix))]
    {
        let _ = inner;
    }
}

pub(crate) fn unregister_exit_hook(inner: &Arc<ContextInner>) {
    #[cfg(unix)]
    {
        EXIT_CONTEXTS
            .lock()
            .unwrap()
            .retain(|weak| !std::ptr::eq(weak.as_ptr(), Arc::as_ptr(inner)));
    }
    #[cfg(not(unix))]
    {
        let _ = inner;
    }
}

#[cfg(all(test, unix))]
pub(crate) fn exit_hook_registered(inner: &Arc<ContextInner>) -> bool {
    EXIT_CONTEXTS
        .lock()
        .unwrap()
        .iter()
        .any(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(inner)))
}

/// SIGTERM/SIGINT handlers that close the context. The tasks are tracked
/// and aborted during close so repeated open/close cycles do not stack
/// handlers.
pub(crate) fn install_signal_handlers(inner: &Arc<ContextInner>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        for (kind, label) in [
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::interrupt(), "SIGINT"),
        ] {
            let weak = Arc::downgrade(inner);
            match signal(kind) {
                Ok(mut stream) => {
                    let handle = tokio::spawn(async move {
                        if stream.recv().await.is_some() {
                            let Some(inner) = weak.upgrade() else {
                                return;
                            };
                            info!("{} received; closing context", label);
                            let context = Gildash { inner };
                            // Close from a fresh task: close aborts the
                            // signal tasks, this one included.
                            tokio::spawn(async move {
                                if let Err(e) = context.close().await {
                                    error!("Close on {} failed: {}", label, e);
                                }
                            });
                        }
                    });
                    inner.signal_tasks.lock().unwrap().push(handle);
                }
                Err(e) => warn!("Failed to install {} handler: {}", label, e),
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = inner;
    }
}

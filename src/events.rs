// Index-batch events
//
// Every indexing batch (full index or a debounced watcher batch) emits
// one IndexResult to the listener bus after its commits. The bus is owned
// by the context and survives coordinator turnover, so subscribers keep
// receiving events across a reader-to-owner promotion.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// Aggregate summary of one indexing batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexResult {
    pub indexed_files: usize,
    pub removed_files: usize,
    pub total_symbols: i64,
    pub total_relations: i64,
    pub duration_ms: u64,
    pub changed_files: Vec<String>,
    pub deleted_files: Vec<String>,
}

pub type IndexListener = Arc<dyn Fn(&IndexResult) + Send + Sync>;

type ListenerSlot = (u64, IndexListener);

/// Registry of onIndexed subscribers.
#[derive(Clone, Default)]
pub struct ListenerBus {
    listeners: Arc<Mutex<Vec<ListenerSlot>>>,
    next_id: Arc<AtomicU64>,
}

impl ListenerBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: IndexListener) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().unwrap().push((id, listener));
        ListenerHandle {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Fire all listeners. Runs after the commit that produced `result`
    /// and before the next batch starts.
    pub fn emit(&self, result: &IndexResult) {
        let listeners: Vec<IndexListener> = {
            let guard = self.listeners.lock().unwrap();
            guard.iter().map(|(_, l)| l.clone()).collect()
        };
        debug!(
            "Emitting index result to {} listener(s): {} changed, {} deleted",
            listeners.len(),
            result.changed_files.len(),
            result.deleted_files.len()
        );
        for listener in listeners {
            listener(result);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Subscription handle returned by onIndexed. Unsubscribe is explicit;
/// dropping the handle keeps the listener attached.
#[derive(Debug)]
pub struct ListenerHandle {
    id: u64,
    listeners: Weak<Mutex<Vec<ListenerSlot>>>,
}

impl ListenerHandle {
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().unwrap().retain(|(id, _)| *id != self.id);
        }
    }
}

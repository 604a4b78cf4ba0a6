// Bounded LRU cache of parsed syntax-tree bundles
//
// Instance-scoped: each context owns its own cache; sharing across
// contexts is not allowed.

use crate::collaborators::ParsedSource;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub const DEFAULT_PARSE_CACHE_CAPACITY: usize = 500;

pub struct ParseCache {
    entries: Mutex<LruCache<String, Arc<ParsedSource>>>,
}

impl ParseCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(DEFAULT_PARSE_CACHE_CAPACITY).unwrap());
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn set(&self, path: impl Into<String>, parsed: Arc<ParsedSource>) {
        let path = path.into();
        let mut entries = self.entries.lock().unwrap();
        entries.put(path, parsed);
    }

    /// Returns the cached bundle and refreshes its recency. Never parses.
    pub fn get(&self, path: &str) -> Option<Arc<ParsedSource>> {
        let mut entries = self.entries.lock().unwrap();
        entries.get(path).cloned()
    }

    pub fn invalidate(&self, path: &str) {
        let mut entries = self.entries.lock().unwrap();
        if entries.pop(path).is_some() {
            debug!("Invalidated parse cache entry for '{}'", path);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

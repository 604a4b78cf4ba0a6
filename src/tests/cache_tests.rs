// Parse cache LRU behavior

use crate::cache::ParseCache;
use crate::collaborators::ParsedSource;
use serde_json::json;
use std::sync::Arc;

fn bundle(path: &str) -> Arc<ParsedSource> {
    Arc::new(ParsedSource {
        file_path: path.to_string(),
        source: format!("// {path}"),
        root: json!({}),
        errors: Vec::new(),
        comments: Vec::new(),
    })
}

#[test]
fn get_returns_cached_bundle() {
    let cache = ParseCache::new(4);
    cache.set("src/a.ts", bundle("src/a.ts"));

    let hit = cache.get("src/a.ts").unwrap();
    assert_eq!(hit.file_path, "src/a.ts");
    assert!(cache.get("src/missing.ts").is_none());
}

#[test]
fn capacity_evicts_least_recently_used() {
    let cache = ParseCache::new(2);
    cache.set("a", bundle("a"));
    cache.set("b", bundle("b"));

    // Touch "a" so "b" is the eviction candidate.
    assert!(cache.get("a").is_some());
    cache.set("c", bundle("c"));

    assert!(cache.get("a").is_some());
    assert!(cache.get("b").is_none());
    assert!(cache.get("c").is_some());
    assert_eq!(cache.len(), 2);
}

#[test]
fn invalidate_removes_a_single_entry() {
    let cache = ParseCache::new(4);
    cache.set("a", bundle("a"));
    cache.set("b", bundle("b"));

    cache.invalidate("a");
    assert!(cache.get("a").is_none());
    assert!(cache.get("b").is_some());
}

#[test]
fn set_replaces_existing_entry() {
    let cache = ParseCache::new(4);
    cache.set("a", bundle("a"));
    cache.set(
        "a",
        Arc::new(ParsedSource {
            source: "updated".to_string(),
            ..(*bundle("a")).clone()
        }),
    );

    assert_eq!(cache.get("a").unwrap().source, "updated");
    assert_eq!(cache.len(), 1);
}

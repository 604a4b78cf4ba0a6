// diff_symbols laws

use super::test_utils::*;
use crate::database::{SymbolKind, SymbolRecord};
use crate::diff::diff_symbols;

fn record(name: &str, file_path: &str, fingerprint: Option<&str>) -> SymbolRecord {
    SymbolRecord {
        id: 0,
        project: "app".to_string(),
        file_path: file_path.to_string(),
        kind: SymbolKind::Function,
        name: name.to_string(),
        start_line: 1,
        start_column: 0,
        end_line: 1,
        end_column: 10,
        is_exported: true,
        signature: None,
        fingerprint: fingerprint.map(|f| f.to_string()),
        detail_json: None,
        content_hash: "h".to_string(),
        indexed_at: chrono::Utc::now().to_rfc3339(),
        resolved_type: None,
    }
}

#[test]
fn diff_of_identical_lists_is_empty() {
    let symbols = vec![
        record("a", "src/a.ts", Some("fp1")),
        record("b", "src/a.ts", None),
    ];
    let diff = diff_symbols(&symbols, &symbols);
    assert!(diff.added.is_empty());
    assert!(diff.removed.is_empty());
    assert!(diff.modified.is_empty());
}

#[test]
fn diff_from_empty_adds_everything() {
    let after = vec![record("a", "src/a.ts", Some("fp1"))];
    let diff = diff_symbols(&[], &after);
    assert_eq!(diff.added, after);
    assert!(diff.removed.is_empty());
}

#[test]
fn diff_to_empty_removes_everything() {
    let before = vec![record("a", "src/a.ts", Some("fp1"))];
    let diff = diff_symbols(&before, &[]);
    assert_eq!(diff.removed, before);
    assert!(diff.added.is_empty());
}

#[test]
fn changed_fingerprint_is_a_modification() {
    let before = vec![record("a", "src/a.ts", Some("fp1"))];
    let after = vec![record("a", "src/a.ts", Some("fp2"))];

    let diff = diff_symbols(&before, &after);
    assert!(diff.added.is_empty());
    assert!(diff.removed.is_empty());
    assert_eq!(diff.modified.len(), 1);
    assert_eq!(diff.modified[0].before.fingerprint.as_deref(), Some("fp1"));
    assert_eq!(diff.modified[0].after.fingerprint.as_deref(), Some("fp2"));
}

#[test]
fn both_absent_fingerprints_are_unchanged() {
    let before = vec![record("a", "src/a.ts", None)];
    let after = vec![record("a", "src/a.ts", None)];
    let diff = diff_symbols(&before, &after);
    assert!(diff.modified.is_empty());
}

#[test]
fn same_name_in_different_files_are_distinct_keys() {
    let before = vec![record("a", "src/a.ts", Some("fp1"))];
    let after = vec![record("a", "src/b.ts", Some("fp1"))];

    let diff = diff_symbols(&before, &after);
    assert_eq!(diff.added.len(), 1);
    assert_eq!(diff.removed.len(), 1);
    assert!(diff.modified.is_empty());
}

#[test]
fn swapping_arguments_swaps_added_and_removed() {
    let left = vec![
        record("only-left", "src/a.ts", Some("fp1")),
        record("shared", "src/a.ts", Some("fp-same")),
        record("drifted", "src/a.ts", Some("fp-old")),
    ];
    let right = vec![
        record("only-right", "src/a.ts", Some("fp2")),
        record("shared", "src/a.ts", Some("fp-same")),
        record("drifted", "src/a.ts", Some("fp-new")),
    ];

    let forward = diff_symbols(&left, &right);
    let backward = diff_symbols(&right, &left);

    assert_eq!(forward.added, backward.removed);
    assert_eq!(forward.removed, backward.added);
    assert_eq!(forward.modified.len(), 1);
    assert_eq!(backward.modified.len(), 1);
    assert_eq!(forward.modified[0].before, backward.modified[0].after);
    assert_eq!(forward.modified[0].after, backward.modified[0].before);
}

#[tokio::test]
async fn facade_diff_is_closed_guarded() {
    let workspace = create_test_workspace().unwrap();
    create_test_file(workspace.path(), "src/a.ts", "export function a() {}\n").unwrap();
    let context = open_project(workspace.path()).await;

    assert!(context.diff_symbols(&[], &[]).is_ok());
    context.close().await.unwrap();
    assert!(matches!(
        context.diff_symbols(&[], &[]),
        Err(crate::error::GildashError::Closed)
    ));
}

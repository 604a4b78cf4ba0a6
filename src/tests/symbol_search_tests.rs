// Symbol search filter composition

use super::test_utils::*;
use crate::database::{NewSymbol, SymbolKind, SymbolQuery};
use serde_json::json;

fn seeded_db(workspace: &tempfile::TempDir) -> crate::database::IndexDatabase {
    let db = open_raw_db(workspace.path()).unwrap();

    db.upsert_file(&file_record("app", "src/a.ts", "ha")).unwrap();
    db.upsert_file(&file_record("app", "src/b.ts", "hb")).unwrap();
    db.upsert_file(&file_record("lib", "src/c.ts", "hc")).unwrap();

    let decorated = NewSymbol {
        detail_json: Some(json!({
            "decorators": [{ "name": "Injectable" }, { "name": "Deprecated" }]
        })),
        resolved_type: Some("UserService".to_string()),
        ..new_symbol("UserService", SymbolKind::Class, 3, true)
    };

    db.replace_file_symbols(
        "app",
        "src/a.ts",
        "ha",
        &[
            new_symbol("helper", SymbolKind::Function, 1, true),
            new_symbol("hidden", SymbolKind::Function, 8, false),
            decorated,
        ],
    )
    .unwrap();
    db.replace_file_symbols(
        "app",
        "src/b.ts",
        "hb",
        &[new_symbol("helperTwo", SymbolKind::Const, 2, true)],
    )
    .unwrap();
    db.replace_file_symbols(
        "lib",
        "src/c.ts",
        "hc",
        &[new_symbol("helper", SymbolKind::Function, 1, true)],
    )
    .unwrap();

    db
}

#[test]
fn filters_compose_with_and() {
    let workspace = create_test_workspace().unwrap();
    let db = seeded_db(&workspace);

    let results = db
        .search_symbols_by_query(&SymbolQuery {
            exact_name: Some("helper".to_string()),
            project: Some("app".to_string()),
            kind: Some(SymbolKind::Function),
            is_exported: Some(true),
            ..Default::default()
        })
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].file_path, "src/a.ts");
    assert!(results[0].is_exported);
}

#[test]
fn omitted_project_searches_across_projects() {
    let workspace = create_test_workspace().unwrap();
    let db = seeded_db(&workspace);

    let results = db
        .search_symbols_by_query(&SymbolQuery {
            exact_name: Some("helper".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(results.len(), 2);

    let projects: Vec<&str> = results.iter().map(|s| s.project.as_str()).collect();
    assert!(projects.contains(&"app"));
    assert!(projects.contains(&"lib"));
}

#[test]
fn results_are_ordered_by_name_and_limited() {
    let workspace = create_test_workspace().unwrap();
    let db = seeded_db(&workspace);

    let all = db
        .search_symbols_by_query(&SymbolQuery::default())
        .unwrap();
    let names: Vec<&str> = all.iter().map(|s| s.name.as_str()).collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);

    let limited = db
        .search_symbols_by_query(&SymbolQuery {
            limit: Some(2),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(limited.len(), 2);
}

#[test]
fn decorator_filter_reads_detail_json() {
    let workspace = create_test_workspace().unwrap();
    let db = seeded_db(&workspace);

    let results = db
        .search_symbols_by_query(&SymbolQuery {
            decorator: Some("Injectable".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name, "UserService");

    let none = db
        .search_symbols_by_query(&SymbolQuery {
            decorator: Some("Unknown".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert!(none.is_empty());
}

#[test]
fn resolved_type_filter() {
    let workspace = create_test_workspace().unwrap();
    let db = seeded_db(&workspace);

    let results = db
        .search_symbols_by_query(&SymbolQuery {
            resolved_type: Some("UserService".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].kind, SymbolKind::Class);
}

#[test]
fn regex_filter_matches_names() {
    let workspace = create_test_workspace().unwrap();
    let db = seeded_db(&workspace);

    let results = db
        .search_symbols_by_query(&SymbolQuery {
            regex: Some("^helper(Two)?$".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|s| s.name.starts_with("helper")));
}

#[test]
fn invalid_regex_yields_empty_result_not_error() {
    let workspace = create_test_workspace().unwrap();
    let db = seeded_db(&workspace);

    let results = db
        .search_symbols_by_query(&SymbolQuery {
            regex: Some("[unclosed".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert!(results.is_empty());
}

#[test]
fn empty_string_project_is_distinct() {
    let workspace = create_test_workspace().unwrap();
    let db = seeded_db(&workspace);

    db.upsert_file(&file_record("", "src/d.ts", "hd")).unwrap();
    db.replace_file_symbols(
        "",
        "src/d.ts",
        "hd",
        &[new_symbol("anon", SymbolKind::Function, 1, false)],
    )
    .unwrap();

    let results = db
        .search_symbols_by_query(&SymbolQuery {
            project: Some(String::new()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name, "anon");
}

#[test]
fn fingerprint_lookup_finds_moved_declarations() {
    let workspace = create_test_workspace().unwrap();
    let db = open_raw_db(workspace.path()).unwrap();

    db.upsert_file(&file_record("app", "src/a.ts", "ha")).unwrap();
    db.upsert_file(&file_record("app", "src/b.ts", "hb")).unwrap();

    let mut moved = new_symbol("shared", SymbolKind::Function, 1, true);
    moved.fingerprint = Some("same-fingerprint".to_string());
    db.replace_file_symbols("app", "src/a.ts", "ha", std::slice::from_ref(&moved))
        .unwrap();
    db.replace_file_symbols("app", "src/b.ts", "hb", &[moved]).unwrap();

    let found = db.get_by_fingerprint("app", "same-fingerprint").unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].file_path, "src/a.ts");
    assert_eq!(found[1].file_path, "src/b.ts");
}

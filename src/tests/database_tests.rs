// Storage engine tests: schema, FTS shadow parity, cascades,
// transaction nesting, corruption recovery, owner primitives.

use super::test_utils::*;
use crate::database::{IndexDatabase, SymbolKind, SymbolQuery};

#[test]
fn open_creates_schema_and_data_dir() {
    let workspace = create_test_workspace().unwrap();
    let db = open_raw_db(workspace.path()).unwrap();

    assert!(workspace.path().join(".gildash").join("index.db").exists());
    for table in ["files", "symbols", "relations", "watcher_owner", "schema_version"] {
        let count = db
            .count_rows(&format!(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='{table}'"
            ))
            .unwrap();
        assert_eq!(count, 1, "missing table {table}");
    }
}

#[test]
fn reopen_is_idempotent_and_keeps_data() {
    let workspace = create_test_workspace().unwrap();
    {
        let db = open_raw_db(workspace.path()).unwrap();
        db.upsert_file(&file_record("app", "src/a.ts", "h1")).unwrap();
    }
    let db = open_raw_db(workspace.path()).unwrap();
    let record = db.get_file("app", "src/a.ts").unwrap().unwrap();
    assert_eq!(record.content_hash, "h1");
}

#[test]
fn upsert_file_updates_without_firing_cascade() {
    let workspace = create_test_workspace().unwrap();
    let db = open_raw_db(workspace.path()).unwrap();

    db.upsert_file(&file_record("app", "src/a.ts", "h1")).unwrap();
    db.replace_file_symbols(
        "app",
        "src/a.ts",
        "h1",
        &[new_symbol("helper", SymbolKind::Function, 1, true)],
    )
    .unwrap();

    // A second upsert must not delete-and-reinsert the row.
    let mut updated = file_record("app", "src/a.ts", "h2");
    updated.mtime_ms = 2_000.0;
    db.upsert_file(&updated).unwrap();

    let symbols = db.get_file_symbols("app", "src/a.ts").unwrap();
    assert_eq!(symbols.len(), 1, "upsert must not cascade away symbols");
    assert_eq!(db.get_file("app", "src/a.ts").unwrap().unwrap().content_hash, "h2");
}

#[test]
fn fts_shadow_stays_in_parity_through_insert_update_delete() {
    let workspace = create_test_workspace().unwrap();
    let db = open_raw_db(workspace.path()).unwrap();

    db.upsert_file(&file_record("app", "src/a.ts", "h1")).unwrap();
    db.replace_file_symbols(
        "app",
        "src/a.ts",
        "h1",
        &[
            new_symbol("alpha", SymbolKind::Function, 1, true),
            new_symbol("beta", SymbolKind::Class, 5, false),
        ],
    )
    .unwrap();

    let assert_parity = |db: &IndexDatabase| {
        let symbol_count = db.count_rows("SELECT COUNT(*) FROM symbols").unwrap();
        let entries = db.fts_entries().unwrap();
        assert_eq!(entries.len() as i64, symbol_count);
        for (rowid, name, file_path, kind) in &entries {
            let matching = db
                .count_rows(&format!(
                    "SELECT COUNT(*) FROM symbols WHERE id = {rowid} AND name = '{name}' \
                     AND file_path = '{file_path}' AND kind = '{kind}'"
                ))
                .unwrap();
            assert_eq!(matching, 1, "fts row {rowid} out of sync");
        }
    };
    assert_parity(&db);

    // Replace (delete + insert through triggers).
    db.replace_file_symbols(
        "app",
        "src/a.ts",
        "h2",
        &[new_symbol("gamma", SymbolKind::Interface, 2, true)],
    )
    .unwrap();
    assert_parity(&db);

    // Cascade delete.
    db.delete_file("app", "src/a.ts").unwrap();
    assert_parity(&db);
    assert!(db.fts_entries().unwrap().is_empty());
}

#[test]
fn fts_match_finds_symbols_by_prefix() {
    let workspace = create_test_workspace().unwrap();
    let db = open_raw_db(workspace.path()).unwrap();

    db.upsert_file(&file_record("app", "src/a.ts", "h1")).unwrap();
    db.replace_file_symbols(
        "app",
        "src/a.ts",
        "h1",
        &[
            new_symbol("getUserData", SymbolKind::Function, 1, true),
            new_symbol("setUserData", SymbolKind::Function, 2, true),
        ],
    )
    .unwrap();

    let results = db
        .search_symbols_by_query(&SymbolQuery {
            fts_query: Some("\"getUserData\"*".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name, "getUserData");
}

#[test]
fn deleting_a_file_cascades_to_symbols_and_both_relation_sides() {
    let workspace = create_test_workspace().unwrap();
    let db = open_raw_db(workspace.path()).unwrap();

    db.upsert_file(&file_record("app", "src/a.ts", "ha")).unwrap();
    db.upsert_file(&file_record("app", "src/b.ts", "hb")).unwrap();
    db.replace_file_symbols(
        "app",
        "src/a.ts",
        "ha",
        &[new_symbol("fromA", SymbolKind::Function, 1, true)],
    )
    .unwrap();
    // a -> b and b -> a so both FK directions get exercised.
    db.replace_file_relations("app", "src/a.ts", &[import_relation("src/b.ts")])
        .unwrap();
    db.replace_file_relations("app", "src/b.ts", &[import_relation("src/a.ts")])
        .unwrap();

    assert!(db.delete_file("app", "src/a.ts").unwrap());

    assert!(db.get_file_symbols("app", "src/a.ts").unwrap().is_empty());
    assert_eq!(db.count_rows("SELECT COUNT(*) FROM relations").unwrap(), 0);
    // b survives untouched.
    assert!(db.get_file("app", "src/b.ts").unwrap().is_some());
}

#[test]
fn replace_file_symbols_with_empty_set_clears_the_file() {
    let workspace = create_test_workspace().unwrap();
    let db = open_raw_db(workspace.path()).unwrap();

    db.upsert_file(&file_record("app", "src/a.ts", "h1")).unwrap();
    db.replace_file_symbols(
        "app",
        "src/a.ts",
        "h1",
        &[new_symbol("helper", SymbolKind::Function, 1, true)],
    )
    .unwrap();
    db.replace_file_symbols("app", "src/a.ts", "h2", &[]).unwrap();

    assert!(db.get_file_symbols("app", "src/a.ts").unwrap().is_empty());
    assert!(db.fts_entries().unwrap().is_empty());
}

#[test]
fn nested_transaction_rolls_back_to_savepoint_only() {
    let workspace = create_test_workspace().unwrap();
    let db = open_raw_db(workspace.path()).unwrap();

    let outcome: anyhow::Result<()> = db.transaction(|db| {
        db.upsert_file(&file_record("app", "outer.ts", "h1"))?;

        let inner: anyhow::Result<()> = db.transaction(|db| {
            db.upsert_file(&file_record("app", "inner.ts", "h2"))?;
            anyhow::bail!("inner failure");
        });
        assert!(inner.is_err(), "inner transaction must fail");

        // Outer work continues after the savepoint rollback.
        db.upsert_file(&file_record("app", "outer2.ts", "h3"))?;
        Ok(())
    });
    outcome.unwrap();

    assert!(db.get_file("app", "outer.ts").unwrap().is_some());
    assert!(db.get_file("app", "outer2.ts").unwrap().is_some());
    assert!(db.get_file("app", "inner.ts").unwrap().is_none());
    assert_eq!(db.transaction_depth(), 0);
}

#[test]
fn outer_failure_rolls_back_everything() {
    let workspace = create_test_workspace().unwrap();
    let db = open_raw_db(workspace.path()).unwrap();

    let outcome: anyhow::Result<()> = db.transaction(|db| {
        db.upsert_file(&file_record("app", "outer.ts", "h1"))?;
        anyhow::bail!("outer failure");
    });
    assert!(outcome.is_err());
    assert!(db.get_file("app", "outer.ts").unwrap().is_none());
}

#[test]
fn immediate_transaction_nests_as_savepoint() {
    let workspace = create_test_workspace().unwrap();
    let db = open_raw_db(workspace.path()).unwrap();

    db.transaction(|db| {
        // Must not attempt a second BEGIN.
        db.immediate_transaction(|db| {
            db.upsert_file(&file_record("app", "nested.ts", "h1"))?;
            Ok(())
        })?;
        Ok(())
    })
    .unwrap();

    assert!(db.get_file("app", "nested.ts").unwrap().is_some());
}

#[test]
fn corrupted_database_file_is_recreated_once() {
    let workspace = create_test_workspace().unwrap();
    let db_path = workspace.path().join(".gildash").join("index.db");
    std::fs::create_dir_all(db_path.parent().unwrap()).unwrap();
    std::fs::write(&db_path, b"this is definitely not a sqlite file").unwrap();

    let db = IndexDatabase::open(&db_path).unwrap();
    db.upsert_file(&file_record("app", "src/a.ts", "h1")).unwrap();
    assert!(db.get_file("app", "src/a.ts").unwrap().is_some());
}

#[test]
fn owner_row_primitives_are_pid_guarded() {
    let workspace = create_test_workspace().unwrap();
    let db = open_raw_db(workspace.path()).unwrap();

    assert!(db.select_owner().unwrap().is_none());

    db.insert_owner(101).unwrap();
    let row = db.select_owner().unwrap().unwrap();
    assert_eq!(row.pid, 101);
    assert_eq!(row.started_at, row.heartbeat_at);

    // Second insert violates the singleton constraint.
    assert!(db.insert_owner(202).is_err());

    // Touch and delete only act for the owning pid.
    assert!(!db.touch_owner(202).unwrap());
    assert!(db.touch_owner(101).unwrap());
    assert!(!db.delete_owner(202).unwrap());
    assert!(db.select_owner().unwrap().is_some());

    db.replace_owner(202).unwrap();
    assert_eq!(db.select_owner().unwrap().unwrap().pid, 202);
    assert!(db.delete_owner(202).unwrap());
    assert!(db.select_owner().unwrap().is_none());
}

/// Replace atomicity under a concurrent reader on a second connection:
/// every read observes a complete generation, never a mix.
#[test]
fn concurrent_reader_never_observes_partial_replace() {
    let workspace = create_test_workspace().unwrap();
    let writer_db = open_raw_db(workspace.path()).unwrap();
    writer_db
        .upsert_file(&file_record("app", "src/hot.ts", "h0"))
        .unwrap();

    let generation_symbols = |generation: usize| -> Vec<crate::database::NewSymbol> {
        let count = if generation % 2 == 0 { 3 } else { 5 };
        (0..count)
            .map(|i| new_symbol(&format!("g{generation}_s{i}"), SymbolKind::Function, i as i64 + 1, true))
            .collect()
    };
    writer_db
        .replace_file_symbols("app", "src/hot.ts", "h0", &generation_symbols(0))
        .unwrap();

    let root = workspace.path().to_path_buf();
    let writer = std::thread::spawn(move || {
        for generation in 1..30 {
            writer_db
                .replace_file_symbols(
                    "app",
                    "src/hot.ts",
                    &format!("h{generation}"),
                    &generation_symbols(generation),
                )
                .unwrap();
        }
    });

    let reader_db = open_raw_db(&root).unwrap();
    for _ in 0..200 {
        let symbols = reader_db.get_file_symbols("app", "src/hot.ts").unwrap();
        assert!(
            symbols.len() == 3 || symbols.len() == 5,
            "observed partial set of {} symbols",
            symbols.len()
        );
        let generations: std::collections::HashSet<&str> = symbols
            .iter()
            .map(|s| s.name.split('_').next().unwrap())
            .collect();
        assert_eq!(generations.len(), 1, "observed symbols from mixed generations");
    }

    writer.join().unwrap();
}

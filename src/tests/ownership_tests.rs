// Single-writer election: insert, keep, stale/dead takeover, release.

use super::test_utils::*;
use crate::ownership::{
    AcquireOptions, WatcherRole, acquire_watcher_role, is_process_alive, release_watcher_role,
    update_heartbeat,
};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A pid that does not exist on any sane test machine.
const DEAD_PID: i64 = 3_999_999;

fn live_pid() -> i64 {
    std::process::id() as i64
}

#[test]
fn first_acquire_inserts_and_owns() {
    let workspace = create_test_workspace().unwrap();
    let db = open_raw_db(workspace.path()).unwrap();

    let role = acquire_watcher_role(&db, live_pid(), &AcquireOptions::default()).unwrap();
    assert_eq!(role, WatcherRole::Owner);

    let row = db.select_owner().unwrap().unwrap();
    assert_eq!(row.pid, live_pid());
}

#[test]
fn reacquire_by_the_same_pid_touches_and_stays_owner() {
    let workspace = create_test_workspace().unwrap();
    let db = open_raw_db(workspace.path()).unwrap();
    let pid = live_pid();

    acquire_watcher_role(&db, pid, &AcquireOptions::default()).unwrap();
    db.set_owner_heartbeat(now_ms() - 10_000).unwrap();
    let stale_heartbeat = db.select_owner().unwrap().unwrap().heartbeat_at;

    let role = acquire_watcher_role(&db, pid, &AcquireOptions::default()).unwrap();
    assert_eq!(role, WatcherRole::Owner);
    assert!(
        db.select_owner().unwrap().unwrap().heartbeat_at > stale_heartbeat,
        "re-acquire must refresh the heartbeat"
    );
}

#[test]
fn live_fresh_owner_makes_contenders_readers() {
    let workspace = create_test_workspace().unwrap();
    let db = open_raw_db(workspace.path()).unwrap();

    // The current process is the live owner; a (fake) contender loses.
    acquire_watcher_role(&db, live_pid(), &AcquireOptions::default()).unwrap();
    let role = acquire_watcher_role(&db, DEAD_PID, &AcquireOptions::default()).unwrap();
    assert_eq!(role, WatcherRole::Reader);
    assert_eq!(db.select_owner().unwrap().unwrap().pid, live_pid());
}

#[test]
fn stale_heartbeat_permits_takeover() {
    let workspace = create_test_workspace().unwrap();
    let db = open_raw_db(workspace.path()).unwrap();

    acquire_watcher_role(&db, live_pid(), &AcquireOptions::default()).unwrap();
    db.set_owner_heartbeat(now_ms() - 120_000).unwrap();

    let role = acquire_watcher_role(&db, DEAD_PID, &AcquireOptions::default()).unwrap();
    assert_eq!(role, WatcherRole::Owner);
    assert_eq!(db.select_owner().unwrap().unwrap().pid, DEAD_PID);
}

#[test]
fn custom_stale_threshold_is_honored() {
    let workspace = create_test_workspace().unwrap();
    let db = open_raw_db(workspace.path()).unwrap();

    acquire_watcher_role(&db, live_pid(), &AcquireOptions::default()).unwrap();
    db.set_owner_heartbeat(now_ms() - 5_000).unwrap();

    // 5 s old heartbeat: fresh under the default threshold...
    let role = acquire_watcher_role(&db, DEAD_PID, &AcquireOptions::default()).unwrap();
    assert_eq!(role, WatcherRole::Reader);

    // ...stale under a 1 s threshold.
    let role = acquire_watcher_role(
        &db,
        DEAD_PID,
        &AcquireOptions {
            stale_threshold_ms: 1_000,
        },
    )
    .unwrap();
    assert_eq!(role, WatcherRole::Owner);
}

#[cfg(unix)]
#[test]
fn dead_owner_is_replaced_despite_fresh_heartbeat() {
    let workspace = create_test_workspace().unwrap();
    let db = open_raw_db(workspace.path()).unwrap();

    db.insert_owner(DEAD_PID).unwrap();

    let role = acquire_watcher_role(&db, live_pid(), &AcquireOptions::default()).unwrap();
    assert_eq!(role, WatcherRole::Owner);
    assert_eq!(db.select_owner().unwrap().unwrap().pid, live_pid());
}

#[cfg(unix)]
#[test]
fn liveness_probe_distinguishes_self_from_ghost() {
    assert!(is_process_alive(live_pid()));
    assert!(!is_process_alive(DEAD_PID));
    assert!(!is_process_alive(0));
    assert!(!is_process_alive(-1));
}

#[test]
fn heartbeat_update_is_owner_only() {
    let workspace = create_test_workspace().unwrap();
    let db = open_raw_db(workspace.path()).unwrap();
    let pid = live_pid();

    acquire_watcher_role(&db, pid, &AcquireOptions::default()).unwrap();
    db.set_owner_heartbeat(now_ms() - 10_000).unwrap();
    let before = db.select_owner().unwrap().unwrap().heartbeat_at;

    assert!(update_heartbeat(&db, pid).unwrap());
    assert!(db.select_owner().unwrap().unwrap().heartbeat_at > before);

    // A non-owner pid cannot refresh.
    assert!(!update_heartbeat(&db, DEAD_PID).unwrap());
}

#[test]
fn release_removes_only_the_owners_row() {
    let workspace = create_test_workspace().unwrap();
    let db = open_raw_db(workspace.path()).unwrap();
    let pid = live_pid();

    acquire_watcher_role(&db, pid, &AcquireOptions::default()).unwrap();

    assert!(!release_watcher_role(&db, DEAD_PID).unwrap());
    assert!(db.select_owner().unwrap().is_some());

    assert!(release_watcher_role(&db, pid).unwrap());
    assert!(db.select_owner().unwrap().is_none());

    // Releasing again is a harmless no-op.
    assert!(!release_watcher_role(&db, pid).unwrap());
}

/// Contending processes (modeled as separate connections) serialize on
/// the immediate transaction: with a live fresh owner, every contender
/// comes away a reader.
#[test]
fn contenders_on_separate_connections_never_co_own() {
    let workspace = create_test_workspace().unwrap();
    let db = open_raw_db(workspace.path()).unwrap();
    acquire_watcher_role(&db, live_pid(), &AcquireOptions::default()).unwrap();

    let root = workspace.path().to_path_buf();
    let contenders: Vec<std::thread::JoinHandle<WatcherRole>> = (0..4)
        .map(|i| {
            let root = root.clone();
            std::thread::spawn(move || {
                let db = open_raw_db(&root).unwrap();
                acquire_watcher_role(&db, DEAD_PID + i, &AcquireOptions::default()).unwrap()
            })
        })
        .collect();

    for contender in contenders {
        assert_eq!(contender.join().unwrap(), WatcherRole::Reader);
    }
    assert_eq!(db.select_owner().unwrap().unwrap().pid, live_pid());
}

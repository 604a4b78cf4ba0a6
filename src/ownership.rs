// Single-writer coordination
//
// Multiple processes may share one index database; exactly one of them
// holds the watcher/indexer role at a time. The election runs inside an
// immediate transaction so contenders serialize on the database write
// lock, and a dead or silent owner is replaced once its heartbeat goes
// stale or its pid stops answering.

use crate::database::IndexDatabase;
use anyhow::Result;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

/// Heartbeats older than this mark the owner stale.
pub const STALE_OWNER_MS: i64 = 90_000;

/// Owner heartbeat cadence.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Reader re-election cadence.
pub const HEALTHCHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Consecutive health-check failures tolerated before the context gives
/// up and self-closes.
pub const MAX_HEALTHCHECK_RETRIES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatcherRole {
    Owner,
    Reader,
}

#[derive(Debug, Clone, Copy)]
pub struct AcquireOptions {
    pub stale_threshold_ms: i64,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            stale_threshold_ms: STALE_OWNER_MS,
        }
    }
}

/// Try to take (or keep) the owner role for `pid`.
///
/// Runs entirely inside BEGIN IMMEDIATE so two processes never both see
/// "no owner" and both insert.
pub fn acquire_watcher_role(
    db: &IndexDatabase,
    pid: i64,
    options: &AcquireOptions,
) -> Result<WatcherRole> {
    db.immediate_transaction(|db| {
        let Some(row) = db.select_owner()? else {
            db.insert_owner(pid)?;
            info!("Acquired watcher ownership (pid {})", pid);
            return Ok(WatcherRole::Owner);
        };

        if row.pid == pid {
            db.touch_owner(pid)?;
            return Ok(WatcherRole::Owner);
        }

        let age_ms = chrono::Utc::now().timestamp_millis() - row.heartbeat_at;
        if age_ms > options.stale_threshold_ms || !is_process_alive(row.pid) {
            db.replace_owner(pid)?;
            info!(
                "Took over watcher ownership from pid {} (heartbeat {} ms old)",
                row.pid, age_ms
            );
            return Ok(WatcherRole::Owner);
        }

        debug!(
            "Owner pid {} is live (heartbeat {} ms old), staying reader",
            row.pid, age_ms
        );
        Ok(WatcherRole::Reader)
    })
}

/// Refresh the owner heartbeat. Returns false when the row no longer
/// belongs to `pid`, meaning someone took over.
pub fn update_heartbeat(db: &IndexDatabase, pid: i64) -> Result<bool> {
    db.touch_owner(pid)
}

/// Give up ownership on close. Returns whether a row was actually
/// released.
pub fn release_watcher_role(db: &IndexDatabase, pid: i64) -> Result<bool> {
    let released = db.delete_owner(pid)?;
    if released {
        debug!("Released watcher ownership (pid {})", pid);
    }
    Ok(released)
}

/// Liveness probe: signal 0 checks existence without delivering anything.
#[cfg(unix)]
pub fn is_process_alive(pid: i64) -> bool {
    if pid <= 0 || pid > i32::MAX as i64 {
        return false;
    }
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

/// Without a cheap probe, takeover relies on heartbeat staleness alone.
#[cfg(not(unix))]
pub fn is_process_alive(_pid: i64) -> bool {
    true
}

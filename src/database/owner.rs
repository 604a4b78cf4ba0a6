// watcher_owner row primitives
//
// The singleton row (id = 1) arbitrates the single-writer role across
// processes. Callers wrap these in immediate_transaction; see ownership.rs.

use super::{IndexDatabase, OwnerRow};
use anyhow::Result;
use rusqlite::params;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl IndexDatabase {
    pub fn select_owner(&self) -> Result<Option<OwnerRow>> {
        let mut stmt = self
            .conn()?
            .prepare("SELECT pid, started_at, heartbeat_at FROM watcher_owner WHERE id = 1")?;

        match stmt.query_row([], |row| {
            Ok(OwnerRow {
                pid: row.get(0)?,
                started_at: row.get(1)?,
                heartbeat_at: row.get(2)?,
            })
        }) {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Insert the owner row. Fails with a CHECK/PK violation when a row
    /// already exists; the election treats that as losing the race.
    pub fn insert_owner(&self, pid: i64) -> Result<()> {
        let now = now_ms();
        self.conn()?.execute(
            "INSERT INTO watcher_owner (id, pid, started_at, heartbeat_at)
             VALUES (1, ?1, ?2, ?2)",
            params![pid, now],
        )?;
        Ok(())
    }

    /// Take over the row unconditionally (stale or dead previous owner).
    pub fn replace_owner(&self, pid: i64) -> Result<()> {
        let now = now_ms();
        self.conn()?.execute(
            "INSERT OR REPLACE INTO watcher_owner (id, pid, started_at, heartbeat_at)
             VALUES (1, ?1, ?2, ?2)",
            params![pid, now],
        )?;
        Ok(())
    }

    /// Refresh heartbeat_at, but only while the row still belongs to `pid`.
    /// Returns whether a row was updated.
    pub fn touch_owner(&self, pid: i64) -> Result<bool> {
        let updated = self.conn()?.execute(
            "UPDATE watcher_owner SET heartbeat_at = ?1 WHERE id = 1 AND pid = ?2",
            params![now_ms(), pid],
        )?;
        Ok(updated > 0)
    }

    /// Delete the row, conditional on it still belonging to `pid`.
    pub fn delete_owner(&self, pid: i64) -> Result<bool> {
        let deleted = self.conn()?.execute(
            "DELETE FROM watcher_owner WHERE id = 1 AND pid = ?1",
            params![pid],
        )?;
        Ok(deleted > 0)
    }

    #[cfg(test)]
    pub(crate) fn set_owner_heartbeat(&self, heartbeat_at: i64) -> Result<()> {
        self.conn()?.execute(
            "UPDATE watcher_owner SET heartbeat_at = ?1 WHERE id = 1",
            params![heartbeat_at],
        )?;
        Ok(())
    }
}

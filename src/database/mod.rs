// Gildash storage engine
//
// One rusqlite connection per context: WAL journal, foreign keys on,
// versioned migrations, an FTS5 shadow over symbols, and the repositories
// layered on top as impl blocks split per concern.

pub mod files;
pub mod migrations;
pub mod owner;
pub mod relations;
pub mod schema;
pub mod symbols;
pub mod transactions;
pub mod types;

pub use types::*;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use rusqlite::Connection;
use rusqlite::functions::FunctionFlags;
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const BUSY_TIMEOUT_MS: u64 = 5000;

/// The on-disk index: symbols, relations, file fingerprints, and the
/// watcher_owner coordination row.
pub struct IndexDatabase {
    /// None once close() has run; every operation fails cleanly after.
    conn: Option<Connection>,
    db_path: PathBuf,
    /// Whether the regexp() scalar registered; search falls back to an
    /// in-process post-filter when it did not.
    regex_support: bool,
    /// Transaction nesting depth for the savepoint ladder.
    txn_depth: Cell<u32>,
    #[cfg(test)]
    fail_close: bool,
}

impl IndexDatabase {
    /// Open (creating if needed) the database at `db_path`.
    ///
    /// A failure whose message looks like on-disk corruption deletes the
    /// database file and its WAL companions and retries exactly once.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory {}", parent.display()))?;
        }

        match Self::open_connection(&db_path) {
            Ok(db) => Ok(db),
            Err(err) if is_corruption_error(&err) && db_path.exists() => {
                warn!(
                    "Database at {} looks corrupted ({}), recreating",
                    db_path.display(),
                    err
                );
                remove_database_files(&db_path);
                Self::open_connection(&db_path)
            }
            Err(err) => Err(err),
        }
    }

    fn open_connection(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

        // WAL first so migrations and schema changes run under it.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;

        let regex_support = register_regexp_function(&conn);

        let mut db = Self {
            conn: Some(conn),
            db_path: db_path.to_path_buf(),
            regex_support,
            txn_depth: Cell::new(0),
            #[cfg(test)]
            fail_close: false,
        };

        db.run_migrations()?;
        db.initialize_schema()?;

        Ok(db)
    }

    /// The live connection, or an error once the handle has been closed.
    fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| anyhow!("database handle is closed"))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn has_regex_support(&self) -> bool {
        self.regex_support
    }

    /// TRUNCATE-checkpoint the WAL to bound its growth after batch work.
    /// Failures are logged, never propagated.
    pub fn checkpoint(&self) {
        let Ok(conn) = self.conn() else {
            return;
        };
        match conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
            Ok((row.get::<_, i32>(0)?, row.get::<_, i32>(1)?))
        }) {
            Ok((busy, log)) => debug!("WAL checkpoint: busy={}, log={}", busy, log),
            Err(e) => debug!("WAL checkpoint failed (non-fatal): {}", e),
        }
    }

    /// Close the connection for real. SQLite can refuse (unfinalized
    /// statements, open blobs); on failure the handle is restored so the
    /// caller may retry, and the error propagates for close-time
    /// aggregation. Closing an already-closed handle is a no-op.
    pub fn close(&mut self) -> Result<()> {
        #[cfg(test)]
        if self.fail_close {
            anyhow::bail!("injected close failure");
        }

        let Some(conn) = self.conn.take() else {
            return Ok(());
        };

        // Bound the WAL before the handle goes away.
        if let Err(e) = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(())) {
            debug!("Final WAL checkpoint failed (non-fatal): {}", e);
        }

        match conn.close() {
            Ok(()) => {
                debug!("Database connection closed");
                Ok(())
            }
            Err((conn, e)) => {
                self.conn = Some(conn);
                Err(anyhow!("Failed to close database: {e}"))
            }
        }
    }
}

/// Register `regexp(pattern, value)` so symbol search can filter in SQL.
/// Returns false when the driver refuses, which routes search through the
/// in-process fallback instead.
fn register_regexp_function(conn: &Connection) -> bool {
    type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

    let registered = conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let pattern: Arc<Regex> = ctx.get_or_create_aux(0, |vr| -> Result<_, BoxError> {
                Ok(Regex::new(vr.as_str()?)?)
            })?;
            let value = ctx
                .get_raw(1)
                .as_str()
                .map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
            Ok(pattern.is_match(value))
        },
    );

    match registered {
        Ok(()) => true,
        Err(e) => {
            warn!("regexp() registration failed, using post-filter path: {}", e);
            false
        }
    }
}

fn is_corruption_error(err: &anyhow::Error) -> bool {
    // Matches the corruption signatures SQLite surfaces through the driver.
    let pattern = Regex::new(r"(?i)malformed|corrupt|not a database|disk i/o error|sqlite_corrupt")
        .expect("static corruption pattern");
    pattern.is_match(&format!("{err:#}"))
}

fn remove_database_files(db_path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut target = db_path.as_os_str().to_owned();
        target.push(suffix);
        let target = PathBuf::from(target);
        if target.exists() {
            if let Err(e) = std::fs::remove_file(&target) {
                warn!("Failed to remove {}: {}", target.display(), e);
            }
        }
    }
}

/// Delete the database file and its WAL companions. Best-effort; used by
/// `cleanup: true` on close.
pub fn remove_database_with_companions(db_path: &Path) {
    remove_database_files(db_path);
}

#[cfg(test)]
impl IndexDatabase {
    pub(crate) fn count_rows(&self, sql: &str) -> Result<i64> {
        Ok(self.conn()?.query_row(sql, [], |row| row.get(0))?)
    }

    pub(crate) fn fts_entries(&self) -> Result<Vec<(i64, String, String, String)>> {
        let mut stmt = self
            .conn()?
            .prepare("SELECT rowid, name, file_path, kind FROM symbols_fts ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Make the next close() fail, for close-error aggregation tests.
    pub(crate) fn inject_close_failure(&mut self) {
        self.fail_close = true;
    }
}

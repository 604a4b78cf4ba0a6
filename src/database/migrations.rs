// Schema migration system for database versioning

use super::*;
use anyhow::{Result, anyhow};
use rusqlite::params;
use tracing::{debug, info};

/// Current schema version - increment when adding migrations
pub const LATEST_SCHEMA_VERSION: i32 = 3;

impl IndexDatabase {
    /// Run all pending schema migrations sequentially.
    pub(super) fn run_migrations(&mut self) -> Result<()> {
        self.create_schema_version_table()?;

        let current_version = self.get_schema_version()?;
        let target_version = LATEST_SCHEMA_VERSION;

        if current_version >= target_version {
            debug!(
                "Database schema is up-to-date at version {}",
                current_version
            );
            return Ok(());
        }

        info!(
            "Running schema migrations: version {} -> {}",
            current_version, target_version
        );

        for version in (current_version + 1)..=target_version {
            self.apply_migration(version)?;
            self.record_migration(version)?;
            debug!("Migration to version {} completed", version);
        }

        Ok(())
    }

    fn create_schema_version_table(&self) -> Result<()> {
        self.conn()?.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL,
                description TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Get the current schema version
    pub fn get_schema_version(&self) -> Result<i32> {
        let table_exists: bool = self.conn()?.query_row(
            "SELECT COUNT(*) FROM sqlite_master
             WHERE type='table' AND name='schema_version'",
            [],
            |row| {
                let count: i32 = row.get(0)?;
                Ok(count > 0)
            },
        )?;

        if !table_exists {
            return Ok(0);
        }

        let version: Result<i32, rusqlite::Error> = self.conn()?.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        );

        Ok(version.unwrap_or(0))
    }

    fn apply_migration(&mut self, version: i32) -> Result<()> {
        match version {
            1 => self.migration_001_initial_schema()?,
            2 => self.migration_002_add_line_count()?,
            3 => self.migration_003_add_fts_prefix_indexes()?,
            _ => return Err(anyhow!("Unknown migration version: {}", version)),
        }
        Ok(())
    }

    fn record_migration(&self, version: i32) -> Result<()> {
        let description = match version {
            1 => "Initial schema",
            2 => "Add line_count column to files",
            3 => "Add FTS5 prefix indexes for faster prefix queries",
            _ => "Unknown migration",
        };

        self.conn()?.execute(
            "INSERT OR REPLACE INTO schema_version (version, applied_at, description)
             VALUES (?, ?, ?)",
            params![
                version,
                chrono::Utc::now().timestamp(),
                description
            ],
        )?;

        Ok(())
    }

    /// Helper: Check if a column exists in a table
    pub fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        let mut stmt = self
            .conn()?
            .prepare(&format!("PRAGMA table_info({})", table))?;

        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(columns.contains(&column.to_string()))
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let exists: bool = self.conn()?.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            params![table],
            |row| row.get::<_, i32>(0).map(|c| c > 0),
        )?;
        Ok(exists)
    }

    // ============================================================
    // INDIVIDUAL MIGRATIONS
    // ============================================================

    /// Migration 001: Initial schema (for tracking purposes)
    /// Note: This is a no-op as the schema is created by initialize_schema
    fn migration_001_initial_schema(&self) -> Result<()> {
        Ok(())
    }

    /// Migration 002: Add line_count column to files table
    fn migration_002_add_line_count(&mut self) -> Result<()> {
        if !self.table_exists("files")? {
            debug!("Files table doesn't exist yet (fresh database), skipping migration");
            return Ok(());
        }

        if self.has_column("files", "line_count")? {
            debug!("line_count column already exists, skipping migration");
            return Ok(());
        }

        self.conn()?
            .execute("ALTER TABLE files ADD COLUMN line_count INTEGER", [])?;

        info!("line_count column added to files table");
        Ok(())
    }

    /// Migration 003: Recreate symbols_fts with prefix indexes and rebuild
    /// it from the base table. Fresh databases skip this; initialize_schema
    /// creates the virtual table with prefix indexes directly.
    fn migration_003_add_fts_prefix_indexes(&mut self) -> Result<()> {
        if !self.table_exists("symbols")? || !self.table_exists("symbols_fts")? {
            debug!("Skipping migration 003: symbols/symbols_fts not present yet");
            return Ok(());
        }

        for trigger in &["symbols_ai", "symbols_ad", "symbols_au"] {
            self.conn()?
                .execute(&format!("DROP TRIGGER IF EXISTS {trigger}"), [])?;
        }
        self.conn()?.execute("DROP TABLE IF EXISTS symbols_fts", [])?;

        self.create_symbols_fts_table()?;
        self.create_symbols_fts_triggers()?;
        self.rebuild_symbols_fts()?;

        info!("FTS5 prefix indexes added");
        Ok(())
    }
}

// Schema initialization and FTS5 shadow maintenance

use super::*;
use anyhow::Result;
use tracing::debug;

impl IndexDatabase {
    /// Create the complete schema. Every statement is idempotent so this
    /// runs on both fresh and already-migrated databases.
    pub(super) fn initialize_schema(&mut self) -> Result<()> {
        debug!("Creating database schema");

        self.create_files_table()?;
        self.create_symbols_table()?;
        self.create_relations_table()?;
        self.create_owner_table()?;

        self.create_symbols_fts_table()?;
        self.create_symbols_fts_triggers()?;

        debug!("Database schema created successfully");
        Ok(())
    }

    /// Files are the anchor for every cascade: deleting a file row removes
    /// its symbols and any relation touching it on either side.
    pub(crate) fn create_files_table(&self) -> Result<()> {
        self.conn()?.execute(
            "CREATE TABLE IF NOT EXISTS files (
                project TEXT NOT NULL,
                file_path TEXT NOT NULL,
                mtime_ms REAL NOT NULL,
                size INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                line_count INTEGER,
                PRIMARY KEY (project, file_path)
            )",
            [],
        )?;

        debug!("Created files table");
        Ok(())
    }

    pub(crate) fn create_symbols_table(&self) -> Result<()> {
        self.conn()?.execute(
            "CREATE TABLE IF NOT EXISTS symbols (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project TEXT NOT NULL,
                file_path TEXT NOT NULL,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                start_column INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                end_column INTEGER NOT NULL,
                is_exported INTEGER NOT NULL DEFAULT 0,
                signature TEXT,
                fingerprint TEXT,
                detail_json TEXT,
                content_hash TEXT NOT NULL,
                indexed_at TEXT NOT NULL,
                resolved_type TEXT,
                FOREIGN KEY (project, file_path)
                    REFERENCES files(project, file_path) ON DELETE CASCADE
            )",
            [],
        )?;

        self.conn()?.execute(
            "CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(project, file_path)",
            [],
        )?;
        self.conn()?.execute(
            "CREATE INDEX IF NOT EXISTS idx_symbols_kind ON symbols(project, kind)",
            [],
        )?;
        self.conn()?.execute(
            "CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(project, name)",
            [],
        )?;
        self.conn()?.execute(
            "CREATE INDEX IF NOT EXISTS idx_symbols_fingerprint ON symbols(project, fingerprint)",
            [],
        )?;

        debug!("Created symbols table and indexes");
        Ok(())
    }

    pub(crate) fn create_relations_table(&self) -> Result<()> {
        self.conn()?.execute(
            "CREATE TABLE IF NOT EXISTS relations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project TEXT NOT NULL,
                type TEXT NOT NULL,
                src_file_path TEXT NOT NULL,
                src_symbol_name TEXT,
                dst_project TEXT NOT NULL,
                dst_file_path TEXT NOT NULL,
                dst_symbol_name TEXT,
                meta_json TEXT,
                FOREIGN KEY (project, src_file_path)
                    REFERENCES files(project, file_path) ON DELETE CASCADE,
                FOREIGN KEY (dst_project, dst_file_path)
                    REFERENCES files(project, file_path) ON DELETE CASCADE
            )",
            [],
        )?;

        self.conn()?.execute(
            "CREATE INDEX IF NOT EXISTS idx_relations_src ON relations(project, src_file_path)",
            [],
        )?;
        self.conn()?.execute(
            "CREATE INDEX IF NOT EXISTS idx_relations_dst ON relations(dst_project, dst_file_path)",
            [],
        )?;
        self.conn()?.execute(
            "CREATE INDEX IF NOT EXISTS idx_relations_type ON relations(project, type)",
            [],
        )?;

        debug!("Created relations table and indexes");
        Ok(())
    }

    /// Single-row table arbitrating the cross-process writer role.
    /// The CHECK makes a second insert fail by design.
    pub(crate) fn create_owner_table(&self) -> Result<()> {
        self.conn()?.execute(
            "CREATE TABLE IF NOT EXISTS watcher_owner (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                pid INTEGER NOT NULL,
                started_at INTEGER NOT NULL,
                heartbeat_at INTEGER NOT NULL
            )",
            [],
        )?;

        debug!("Created watcher_owner table");
        Ok(())
    }

    /// External-content FTS5 shadow over symbols for prefix search.
    pub(crate) fn create_symbols_fts_table(&self) -> Result<()> {
        self.conn()?.execute(
            r#"CREATE VIRTUAL TABLE IF NOT EXISTS symbols_fts USING fts5(
                name,
                file_path,
                kind,
                tokenize = "unicode61 separators '_::->.'",
                prefix='2 3 4',
                content='symbols',
                content_rowid='id'
            )"#,
            [],
        )?;
        debug!("Created symbols_fts virtual table");
        Ok(())
    }

    /// The three sync triggers that keep exactly one FTS row per symbol
    /// row. External-content tables require the 'delete'-command form for
    /// removal and update.
    pub(crate) fn create_symbols_fts_triggers(&self) -> Result<()> {
        self.conn()?.execute(
            "CREATE TRIGGER IF NOT EXISTS symbols_ai AFTER INSERT ON symbols BEGIN
                INSERT INTO symbols_fts(rowid, name, file_path, kind)
                VALUES (new.id, new.name, new.file_path, new.kind);
            END",
            [],
        )?;

        self.conn()?.execute(
            "CREATE TRIGGER IF NOT EXISTS symbols_ad AFTER DELETE ON symbols BEGIN
                INSERT INTO symbols_fts(symbols_fts, rowid, name, file_path, kind)
                VALUES('delete', old.id, old.name, old.file_path, old.kind);
            END",
            [],
        )?;

        self.conn()?.execute(
            "CREATE TRIGGER IF NOT EXISTS symbols_au AFTER UPDATE ON symbols BEGIN
                INSERT INTO symbols_fts(symbols_fts, rowid, name, file_path, kind)
                VALUES('delete', old.id, old.name, old.file_path, old.kind);
                INSERT INTO symbols_fts(rowid, name, file_path, kind)
                VALUES (new.id, new.name, new.file_path, new.kind);
            END",
            [],
        )?;

        debug!("Created symbols_fts synchronization triggers");
        Ok(())
    }

    /// Rebuild the FTS shadow from the base table. Used after migrations
    /// that recreate the virtual table.
    pub(crate) fn rebuild_symbols_fts(&self) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO symbols_fts(symbols_fts) VALUES('rebuild')",
            [],
        )?;
        debug!("Rebuilt symbols_fts from base table");
        Ok(())
    }
}

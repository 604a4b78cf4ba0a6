// File repository

use super::*;
use anyhow::Result;
use rusqlite::{Row, params};
use std::collections::HashMap;
use tracing::debug;

fn row_to_file(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        project: row.get(0)?,
        file_path: row.get(1)?,
        mtime_ms: row.get(2)?,
        size: row.get(3)?,
        content_hash: row.get(4)?,
        updated_at: row.get(5)?,
        line_count: row.get(6)?,
    })
}

const FILE_COLUMNS: &str =
    "project, file_path, mtime_ms, size, content_hash, updated_at, line_count";

impl IndexDatabase {
    /// Insert or update by (project, file_path). A plain REPLACE would
    /// delete-and-reinsert the row, firing the symbol cascade, so this is
    /// an UPSERT.
    pub fn upsert_file(&self, record: &FileRecord) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO files (project, file_path, mtime_ms, size, content_hash, updated_at, line_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(project, file_path) DO UPDATE SET
                 mtime_ms = excluded.mtime_ms,
                 size = excluded.size,
                 content_hash = excluded.content_hash,
                 updated_at = excluded.updated_at,
                 line_count = excluded.line_count",
            params![
                record.project,
                record.file_path,
                record.mtime_ms,
                record.size,
                record.content_hash,
                record.updated_at,
                record.line_count,
            ],
        )?;

        debug!("Upserted file record for: {}", record.file_path);
        Ok(())
    }

    pub fn get_file(&self, project: &str, file_path: &str) -> Result<Option<FileRecord>> {
        let mut stmt = self.conn()?.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE project = ?1 AND file_path = ?2"
        ))?;

        match stmt.query_row(params![project, file_path], row_to_file) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_all_files(&self, project: &str) -> Result<Vec<FileRecord>> {
        let mut stmt = self.conn()?.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE project = ?1 ORDER BY file_path"
        ))?;

        let rows = stmt.query_map(params![project], row_to_file)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// All of a project's file records keyed by path, for fingerprint
    /// diffing during a full index.
    pub fn get_files_map(&self, project: &str) -> Result<FilesMap> {
        let mut map = HashMap::new();
        for record in self.get_all_files(project)? {
            map.insert(record.file_path.clone(), record);
        }
        debug!("Retrieved {} file records for project '{}'", map.len(), project);
        Ok(map)
    }

    /// Delete the file row; symbols and relations referencing it go with
    /// it through the cascade. Returns whether a row was deleted.
    pub fn delete_file(&self, project: &str, file_path: &str) -> Result<bool> {
        let count = self.conn()?.execute(
            "DELETE FROM files WHERE project = ?1 AND file_path = ?2",
            params![project, file_path],
        )?;

        debug!(
            "Deleted file record for '{}' ({} rows affected)",
            file_path, count
        );
        Ok(count > 0)
    }
}

// Symbol lookups and statistics

use super::super::*;
use super::{SYMBOL_COLUMNS, row_to_symbol};
use anyhow::Result;
use rusqlite::params;

impl IndexDatabase {
    pub fn get_file_symbols(&self, project: &str, file_path: &str) -> Result<Vec<SymbolRecord>> {
        let mut stmt = self.conn()?.prepare(&format!(
            "SELECT {SYMBOL_COLUMNS} FROM symbols
             WHERE project = ?1 AND file_path = ?2
             ORDER BY start_line, start_column"
        ))?;

        let rows = stmt.query_map(params![project, file_path], row_to_symbol)?;

        let mut symbols = Vec::new();
        for row in rows {
            symbols.push(row?);
        }
        Ok(symbols)
    }

    pub fn get_symbol_by_id(&self, id: i64) -> Result<Option<SymbolRecord>> {
        let mut stmt = self
            .conn()?
            .prepare(&format!("SELECT {SYMBOL_COLUMNS} FROM symbols WHERE id = ?1"))?;

        match stmt.query_row(params![id], row_to_symbol) {
            Ok(symbol) => Ok(Some(symbol)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Symbols whose declaration fingerprint matches, used to find moved
    /// declarations across files.
    pub fn get_by_fingerprint(&self, project: &str, fingerprint: &str) -> Result<Vec<SymbolRecord>> {
        let mut stmt = self.conn()?.prepare(&format!(
            "SELECT {SYMBOL_COLUMNS} FROM symbols
             WHERE project = ?1 AND fingerprint = ?2
             ORDER BY file_path, start_line"
        ))?;

        let rows = stmt.query_map(params![project, fingerprint], row_to_symbol)?;

        let mut symbols = Vec::new();
        for row in rows {
            symbols.push(row?);
        }
        Ok(symbols)
    }

    pub fn get_stats(&self, project: &str) -> Result<IndexStats> {
        let file_count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM files WHERE project = ?1",
            params![project],
            |row| row.get(0),
        )?;
        let symbol_count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM symbols WHERE project = ?1",
            params![project],
            |row| row.get(0),
        )?;
        let relation_count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM relations WHERE project = ?1",
            params![project],
            |row| row.get(0),
        )?;

        Ok(IndexStats {
            file_count,
            symbol_count,
            relation_count,
        })
    }
}

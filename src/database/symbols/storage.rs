// Symbol storage and deletion operations

use super::super::*;
use anyhow::Result;
use rusqlite::params;
use tracing::debug;

impl IndexDatabase {
    /// Atomically replace the symbol set of one file: delete every symbol
    /// row for (project, file_path), then insert the new set, all inside
    /// one transaction so concurrent readers observe either snapshot but
    /// never a gap. An empty `symbols` slice clears the file.
    pub fn replace_file_symbols(
        &self,
        project: &str,
        file_path: &str,
        content_hash: &str,
        symbols: &[NewSymbol],
    ) -> Result<()> {
        let indexed_at = chrono::Utc::now().to_rfc3339();

        self.transaction(|db| {
            db.conn()?.execute(
                "DELETE FROM symbols WHERE project = ?1 AND file_path = ?2",
                params![project, file_path],
            )?;

            if symbols.is_empty() {
                return Ok(());
            }

            let mut stmt = db.conn()?.prepare(
                "INSERT INTO symbols
                 (project, file_path, kind, name, start_line, start_column,
                  end_line, end_column, is_exported, signature, fingerprint,
                  detail_json, content_hash, indexed_at, resolved_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;

            for symbol in symbols {
                let detail_json = symbol
                    .detail_json
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;

                stmt.execute(params![
                    project,
                    file_path,
                    symbol.kind.as_str(),
                    symbol.name,
                    symbol.start_line,
                    symbol.start_column,
                    symbol.end_line,
                    symbol.end_column,
                    symbol.is_exported as i64,
                    symbol.signature,
                    symbol.fingerprint,
                    detail_json,
                    content_hash,
                    indexed_at,
                    symbol.resolved_type,
                ])?;
            }

            Ok(())
        })?;

        debug!(
            "Replaced symbols for '{}' ({} rows)",
            file_path,
            symbols.len()
        );
        Ok(())
    }

    pub fn delete_file_symbols(&self, project: &str, file_path: &str) -> Result<usize> {
        let count = self.conn()?.execute(
            "DELETE FROM symbols WHERE project = ?1 AND file_path = ?2",
            params![project, file_path],
        )?;
        debug!("Deleted {} symbols for file '{}'", count, file_path);
        Ok(count)
    }
}

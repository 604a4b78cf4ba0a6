// Symbol repository, split by concern

pub mod queries;
pub mod search;
pub mod storage;

use rusqlite::Row;

use super::types::{SymbolKind, SymbolRecord};

pub(crate) const SYMBOL_COLUMNS: &str = "id, project, file_path, kind, name, \
     start_line, start_column, end_line, end_column, is_exported, \
     signature, fingerprint, detail_json, content_hash, indexed_at, resolved_type";

pub(crate) fn row_to_symbol(row: &Row<'_>) -> rusqlite::Result<SymbolRecord> {
    let kind: String = row.get(3)?;
    let is_exported: i64 = row.get(9)?;
    let detail_json: Option<String> = row.get(12)?;

    Ok(SymbolRecord {
        id: row.get(0)?,
        project: row.get(1)?,
        file_path: row.get(2)?,
        kind: SymbolKind::parse(&kind),
        name: row.get(4)?,
        start_line: row.get(5)?,
        start_column: row.get(6)?,
        end_line: row.get(7)?,
        end_column: row.get(8)?,
        is_exported: is_exported != 0,
        signature: row.get(10)?,
        fingerprint: row.get(11)?,
        detail_json: detail_json.and_then(|raw| serde_json::from_str(&raw).ok()),
        content_hash: row.get(13)?,
        indexed_at: row.get(14)?,
        resolved_type: row.get(15)?,
    })
}

// Flexible symbol search
//
// Conditions compose with AND; omitted filters impose no constraint. The
// regex filter runs in SQL when the regexp() scalar registered, otherwise
// a bounded candidate set is post-filtered in process.

use super::super::*;
use super::{SYMBOL_COLUMNS, row_to_symbol};
use anyhow::Result;
use regex::Regex;
use rusqlite::ToSql;
use tracing::debug;

/// Candidate floor for the post-filter path: enough rows that a selective
/// regex over a broad name space still fills the requested limit.
const REGEX_CANDIDATE_FLOOR: usize = 5000;

impl IndexDatabase {
    pub fn search_symbols_by_query(&self, query: &SymbolQuery) -> Result<Vec<SymbolRecord>> {
        let limit = query.limit.unwrap_or(DEFAULT_QUERY_LIMIT);

        // An invalid regex yields an empty result, never an error.
        let compiled_regex = match &query.regex {
            Some(pattern) => match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    debug!("Invalid symbol search regex '{}': {}", pattern, e);
                    return Ok(Vec::new());
                }
            },
            None => None,
        };

        let mut conditions: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(fts) = &query.fts_query {
            conditions.push(
                "id IN (SELECT rowid FROM symbols_fts WHERE symbols_fts MATCH ?)".to_string(),
            );
            values.push(Box::new(fts.clone()));
        }
        if let Some(name) = &query.exact_name {
            conditions.push("name = ?".to_string());
            values.push(Box::new(name.clone()));
        }
        if let Some(project) = &query.project {
            conditions.push("project = ?".to_string());
            values.push(Box::new(project.clone()));
        }
        if let Some(kind) = &query.kind {
            conditions.push("kind = ?".to_string());
            values.push(Box::new(kind.as_str().to_string()));
        }
        if let Some(file_path) = &query.file_path {
            conditions.push("file_path = ?".to_string());
            values.push(Box::new(file_path.clone()));
        }
        if let Some(is_exported) = query.is_exported {
            conditions.push("is_exported = ?".to_string());
            values.push(Box::new(if is_exported { 1i64 } else { 0i64 }));
        }
        if let Some(decorator) = &query.decorator {
            conditions.push(
                "id IN (SELECT s.id FROM symbols s, json_each(s.detail_json, '$.decorators') je \
                 WHERE json_extract(je.value, '$.name') = ?)"
                    .to_string(),
            );
            values.push(Box::new(decorator.clone()));
        }
        if let Some(resolved_type) = &query.resolved_type {
            conditions.push("resolved_type = ?".to_string());
            values.push(Box::new(resolved_type.clone()));
        }

        let sql_regex = compiled_regex.is_some() && self.regex_support;
        if sql_regex {
            conditions.push("name REGEXP ?".to_string());
            values.push(Box::new(
                query.regex.clone().unwrap_or_default(),
            ));
        }

        // Without SQL-side regex support we over-fetch and filter here.
        let fetch_limit = if compiled_regex.is_some() && !sql_regex {
            (limit * 50).max(REGEX_CANDIDATE_FLOOR)
        } else {
            limit
        };

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT {SYMBOL_COLUMNS} FROM symbols{where_clause} ORDER BY name LIMIT ?"
        );
        values.push(Box::new(fetch_limit as i64));

        let mut stmt = self.conn()?.prepare(&sql)?;
        let params = rusqlite::params_from_iter(values.iter().map(|v| v.as_ref()));
        let rows = stmt.query_map(params, row_to_symbol)?;

        let mut symbols = Vec::new();
        for row in rows {
            symbols.push(row?);
        }

        if let Some(re) = &compiled_regex {
            if !sql_regex {
                symbols.retain(|s| re.is_match(&s.name));
                symbols.truncate(limit);
            }
        }

        debug!("Symbol search returned {} rows", symbols.len());
        Ok(symbols)
    }
}

// Relation repository

use super::*;
use anyhow::Result;
use rusqlite::{Row, ToSql, params};
use tracing::debug;

const RELATION_COLUMNS: &str = "id, project, type, src_file_path, src_symbol_name, \
     dst_project, dst_file_path, dst_symbol_name, meta_json";

fn row_to_relation(row: &Row<'_>) -> rusqlite::Result<RelationRecord> {
    let kind: String = row.get(2)?;
    let meta_json: Option<String> = row.get(8)?;

    Ok(RelationRecord {
        id: row.get(0)?,
        project: row.get(1)?,
        kind: RelationType::parse(&kind),
        src_file_path: row.get(3)?,
        src_symbol_name: row.get(4)?,
        dst_project: row.get(5)?,
        dst_file_path: row.get(6)?,
        dst_symbol_name: row.get(7)?,
        meta_json: meta_json.and_then(|raw| serde_json::from_str(&raw).ok()),
    })
}

impl IndexDatabase {
    /// Atomically replace every relation originating from one file.
    /// An empty `relations` slice just clears.
    pub fn replace_file_relations(
        &self,
        project: &str,
        src_file_path: &str,
        relations: &[NewRelation],
    ) -> Result<()> {
        self.transaction(|db| {
            db.conn()?.execute(
                "DELETE FROM relations WHERE project = ?1 AND src_file_path = ?2",
                params![project, src_file_path],
            )?;

            if relations.is_empty() {
                return Ok(());
            }

            let mut stmt = db.conn()?.prepare(
                "INSERT INTO relations
                 (project, type, src_file_path, src_symbol_name,
                  dst_project, dst_file_path, dst_symbol_name, meta_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;

            for relation in relations {
                let meta_json = relation
                    .meta_json
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;

                stmt.execute(params![
                    project,
                    relation.kind.as_str(),
                    src_file_path,
                    relation.src_symbol_name,
                    relation.dst_project.as_deref().unwrap_or(project),
                    relation.dst_file_path,
                    relation.dst_symbol_name,
                    meta_json,
                ])?;
            }

            Ok(())
        })?;

        debug!(
            "Replaced relations for '{}' ({} rows)",
            src_file_path,
            relations.len()
        );
        Ok(())
    }

    /// Relations leaving a file. With a symbol name, module-level rows
    /// (src_symbol_name IS NULL) are included: they apply to every symbol
    /// in the file.
    pub fn get_outgoing(
        &self,
        project: &str,
        src_file_path: &str,
        src_symbol_name: Option<&str>,
    ) -> Result<Vec<RelationRecord>> {
        let mut sql = format!(
            "SELECT {RELATION_COLUMNS} FROM relations
             WHERE project = ?1 AND src_file_path = ?2"
        );
        if src_symbol_name.is_some() {
            sql.push_str(" AND (src_symbol_name = ?3 OR src_symbol_name IS NULL)");
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = self.conn()?.prepare(&sql)?;
        let mut relations = Vec::new();

        let rows = match src_symbol_name {
            Some(name) => stmt.query_map(params![project, src_file_path, name], row_to_relation)?,
            None => stmt.query_map(params![project, src_file_path], row_to_relation)?,
        };
        for row in rows {
            relations.push(row?);
        }
        Ok(relations)
    }

    pub fn get_incoming(
        &self,
        dst_project: &str,
        dst_file_path: &str,
    ) -> Result<Vec<RelationRecord>> {
        let mut stmt = self.conn()?.prepare(&format!(
            "SELECT {RELATION_COLUMNS} FROM relations
             WHERE dst_project = ?1 AND dst_file_path = ?2
             ORDER BY id"
        ))?;

        let rows = stmt.query_map(params![dst_project, dst_file_path], row_to_relation)?;

        let mut relations = Vec::new();
        for row in rows {
            relations.push(row?);
        }
        Ok(relations)
    }

    pub fn get_relations_by_type(
        &self,
        project: &str,
        kind: RelationType,
    ) -> Result<Vec<RelationRecord>> {
        let mut stmt = self.conn()?.prepare(&format!(
            "SELECT {RELATION_COLUMNS} FROM relations
             WHERE project = ?1 AND type = ?2
             ORDER BY id"
        ))?;

        let rows = stmt.query_map(params![project, kind.as_str()], row_to_relation)?;

        let mut relations = Vec::new();
        for row in rows {
            relations.push(row?);
        }
        Ok(relations)
    }

    pub fn delete_file_relations(&self, project: &str, src_file_path: &str) -> Result<usize> {
        let count = self.conn()?.execute(
            "DELETE FROM relations WHERE project = ?1 AND src_file_path = ?2",
            params![project, src_file_path],
        )?;
        debug!("Deleted {} relations for file '{}'", count, src_file_path);
        Ok(count)
    }

    pub fn search_relations_by_query(&self, query: &RelationQuery) -> Result<Vec<RelationRecord>> {
        let limit = query.limit.unwrap_or(DEFAULT_QUERY_LIMIT);

        let mut conditions: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(project) = &query.project {
            conditions.push("project = ?".to_string());
            values.push(Box::new(project.clone()));
        }
        if let Some(kind) = &query.kind {
            conditions.push("type = ?".to_string());
            values.push(Box::new(kind.as_str().to_string()));
        }
        if let Some(src_file) = &query.src_file_path {
            conditions.push("src_file_path = ?".to_string());
            values.push(Box::new(src_file.clone()));
        }
        if let Some(src_symbol) = &query.src_symbol_name {
            conditions.push("src_symbol_name = ?".to_string());
            values.push(Box::new(src_symbol.clone()));
        }
        if let Some(dst_file) = &query.dst_file_path {
            conditions.push("dst_file_path = ?".to_string());
            values.push(Box::new(dst_file.clone()));
        }
        if let Some(dst_symbol) = &query.dst_symbol_name {
            conditions.push("dst_symbol_name = ?".to_string());
            values.push(Box::new(dst_symbol.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let sql =
            format!("SELECT {RELATION_COLUMNS} FROM relations{where_clause} ORDER BY id LIMIT ?");
        values.push(Box::new(limit as i64));

        let mut stmt = self.conn()?.prepare(&sql)?;
        let params = rusqlite::params_from_iter(values.iter().map(|v| v.as_ref()));
        let rows = stmt.query_map(params, row_to_relation)?;

        let mut relations = Vec::new();
        for row in rows {
            relations.push(row?);
        }
        Ok(relations)
    }

    /// Point relations at a moved or renamed destination. A None
    /// old_symbol matches module-level rows via IS NULL.
    pub fn retarget_relations(&self, spec: &RetargetSpec) -> Result<usize> {
        let updated = match &spec.old_symbol {
            Some(old_symbol) => self.conn()?.execute(
                "UPDATE relations
                 SET dst_file_path = ?1, dst_symbol_name = ?2
                 WHERE dst_project = ?3 AND dst_file_path = ?4 AND dst_symbol_name = ?5",
                params![
                    spec.new_file,
                    spec.new_symbol,
                    spec.dst_project,
                    spec.old_file,
                    old_symbol
                ],
            )?,
            None => self.conn()?.execute(
                "UPDATE relations
                 SET dst_file_path = ?1, dst_symbol_name = ?2
                 WHERE dst_project = ?3 AND dst_file_path = ?4 AND dst_symbol_name IS NULL",
                params![spec.new_file, spec.new_symbol, spec.dst_project, spec.old_file],
            )?,
        };

        debug!(
            "Retargeted {} relations from '{}' to '{}'",
            updated, spec.old_file, spec.new_file
        );
        Ok(updated)
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `SqlitePersistence`: the sole concrete `Persistence` implementation,
//! grounded on `original_source/src/agent/multitype_queue/include/sqlitestorage.hpp`
//! (table-per-type storage, criteria-based select/update/remove, explicit
//! transactions for multi-row writes).

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::error::PersistenceError;
use crate::persistence::{Column, Criteria, OrderType, Persistence, Row, Value};

/// SQLite-backed `Persistence`. Cheaply cloneable; all instances sharing a
/// `Connection` share the same serialized write path.
#[derive(Clone)]
pub struct SqlitePersistence {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePersistence {
    /// Open (creating if absent) the single-file database at `path`.
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// In-memory database, used by tests and by any module that only needs
    /// process-local scratch storage.
    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Run `f` against the connection inside a `BEGIN`/`COMMIT` bracket,
    /// rolling back on error. `f` is a plain synchronous closure, so the
    /// transaction structurally cannot span an `.await` (§5).
    pub async fn with_transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<T>,
    ) -> Result<T, PersistenceError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn table_exists(&self, table: &str) -> Result<bool, PersistenceError> {
        let conn = self.conn.lock().await;
        let exists = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1",
                [table],
                |_| Ok(()),
            )
            .is_ok();
        Ok(exists)
    }

    async fn create_table(&self, table: &str, columns: &[Column]) -> Result<(), PersistenceError> {
        let conn = self.conn.lock().await;
        let defs: Vec<String> = columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", c.name, c.sql_type);
                if c.primary_key {
                    def.push_str(" PRIMARY KEY");
                }
                if c.not_null && !c.primary_key {
                    def.push_str(" NOT NULL");
                }
                def
            })
            .collect();
        let sql = format!("CREATE TABLE IF NOT EXISTS {table} ({})", defs.join(", "));
        conn.execute(&sql, [])?;
        Ok(())
    }

    async fn insert(&self, table: &str, values: &Row) -> Result<i64, PersistenceError> {
        let conn = self.conn.lock().await;
        let columns: Vec<&String> = values.keys().collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", "),
            placeholders.join(", ")
        );
        let params: Vec<&Value> = columns.iter().map(|c| &values[*c]).collect();
        conn.execute(&sql, rusqlite::params_from_iter(params))?;
        Ok(conn.last_insert_rowid())
    }

    async fn update(&self, table: &str, fields: &Row, criteria: &Criteria) -> Result<usize, PersistenceError> {
        let conn = self.conn.lock().await;
        let columns: Vec<&String> = fields.keys().collect();
        let assignments: Vec<String> = columns.iter().map(|c| format!("{c} = ?")).collect();
        let (where_sql, where_params) = criteria.to_sql();
        let sql = format!("UPDATE {table} SET {}{where_sql}", assignments.join(", "));
        let mut params: Vec<Value> = columns.iter().map(|c| fields[*c].clone()).collect();
        params.extend(where_params);
        let affected = conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?;
        Ok(affected)
    }

    async fn remove(&self, table: &str, criteria: &Criteria) -> Result<usize, PersistenceError> {
        let conn = self.conn.lock().await;
        let (where_sql, where_params) = criteria.to_sql();
        let sql = format!("DELETE FROM {table}{where_sql}");
        let affected = conn.execute(&sql, rusqlite::params_from_iter(where_params.iter()))?;
        Ok(affected)
    }

    async fn select(
        &self,
        table: &str,
        columns: &[&str],
        criteria: Option<&Criteria>,
        order_by: Option<(&str, OrderType)>,
        limit: Option<usize>,
    ) -> Result<Vec<Row>, PersistenceError> {
        let conn = self.conn.lock().await;
        let column_list = if columns.is_empty() { "*".to_owned() } else { columns.join(", ") };
        let (where_sql, where_params) = criteria.map(Criteria::to_sql).unwrap_or_default();
        let mut sql = format!("SELECT {column_list} FROM {table}{where_sql}");
        if let Some((column, order)) = order_by {
            let direction = match order {
                OrderType::Asc => "ASC",
                OrderType::Desc => "DESC",
            };
            sql.push_str(&format!(" ORDER BY {column} {direction}"));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = conn.prepare(&sql)?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let rows = stmt.query_map(rusqlite::params_from_iter(where_params.iter()), |row| {
            let mut out = Row::new();
            for (i, name) in column_names.iter().enumerate() {
                out.insert(name.clone(), row.get(i)?);
            }
            Ok(out)
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    async fn get_count(&self, table: &str, criteria: Option<&Criteria>) -> Result<i64, PersistenceError> {
        let conn = self.conn.lock().await;
        let (where_sql, where_params) = criteria.map(Criteria::to_sql).unwrap_or_default();
        let sql = format!("SELECT COUNT(*) FROM {table}{where_sql}");
        let count: i64 = conn.query_row(&sql, rusqlite::params_from_iter(where_params.iter()), |row| row.get(0))?;
        Ok(count)
    }

    async fn get_size(&self, table: &str) -> Result<i64, PersistenceError> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT COALESCE(SUM(size), 0) FROM {table}");
        let size: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::Op;

    fn messages_table() -> Vec<Column> {
        vec![
            Column::new("id", "INTEGER").primary_key(),
            Column::new("payload", "TEXT").not_null(),
            Column::new("size", "INTEGER").not_null(),
        ]
    }

    #[tokio::test]
    async fn create_insert_select_roundtrip() {
        let db = SqlitePersistence::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        db.create_table("messages", &messages_table()).await.unwrap_or_else(|e| panic!("create: {e}"));
        assert!(db.table_exists("messages").await.unwrap_or(false));

        let mut values = Row::new();
        values.insert("payload".to_owned(), Value::Text("hello".to_owned()));
        values.insert("size".to_owned(), Value::Integer(5));
        let id = db.insert("messages", &values).await.unwrap_or_else(|e| panic!("insert: {e}"));
        assert_eq!(id, 1);

        let rows = db.select("messages", &[], None, None, None).await.unwrap_or_else(|e| panic!("select: {e}"));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["payload"], Value::Text("hello".to_owned()));
    }

    #[tokio::test]
    async fn criteria_filters_rows() {
        let db = SqlitePersistence::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        db.create_table("messages", &messages_table()).await.unwrap_or_else(|e| panic!("create: {e}"));
        for (payload, size) in [("a", 1), ("b", 2), ("c", 3)] {
            let mut values = Row::new();
            values.insert("payload".to_owned(), Value::Text(payload.to_owned()));
            values.insert("size".to_owned(), Value::Integer(size));
            db.insert("messages", &values).await.unwrap_or_else(|e| panic!("insert: {e}"));
        }

        let criteria = Criteria::and().with("size", Op::Gt, 1);
        let count = db.get_count("messages", Some(&criteria)).await.unwrap_or(-1);
        assert_eq!(count, 2);

        let total_size = db.get_size("messages").await.unwrap_or(-1);
        assert_eq!(total_size, 6);
    }

    #[tokio::test]
    async fn transaction_rolls_back_on_error() {
        let db = SqlitePersistence::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        db.create_table("messages", &messages_table()).await.unwrap_or_else(|e| panic!("create: {e}"));

        let result: Result<(), PersistenceError> = db
            .with_transaction(|tx| {
                tx.execute("INSERT INTO messages (payload, size) VALUES ('x', 1)", [])?;
                Err(rusqlite::Error::ExecuteReturnedResults)
            })
            .await;
        assert!(result.is_err());

        let count = db.get_count("messages", None).await.unwrap_or(-1);
        assert_eq!(count, 0, "failed transaction must not leave a partial row");
    }
}

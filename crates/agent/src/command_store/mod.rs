// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable record of command executions (§4.C): idempotent insert on `id`,
//! mutable-field updates, status queries, and crash recovery of rows left
//! `IN_PROGRESS` by an unclean shutdown.

use crate::error::CommandStoreError;
use crate::persistence::{Column, Criteria, Op, Persistence, Row, SqlitePersistence, Value};

const TABLE: &str = "command_store";

/// Execution mode recorded on a command (§3 Command entry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sync,
    Async,
}

impl ExecutionMode {
    fn as_i64(self) -> i64 {
        match self {
            ExecutionMode::Sync => 0,
            ExecutionMode::Async => 1,
        }
    }

    fn from_i64(value: i64) -> Self {
        if value == 1 { ExecutionMode::Async } else { ExecutionMode::Sync }
    }
}

/// Terminal and intermediate status for a command entry (§3 Command entry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Unknown,
    InProgress,
    Success,
    Failure,
    Timeout,
}

impl Status {
    fn as_i64(self) -> i64 {
        match self {
            Status::Unknown => 0,
            Status::InProgress => 1,
            Status::Success => 2,
            Status::Failure => 3,
            Status::Timeout => 4,
        }
    }

    fn from_i64(value: i64) -> Self {
        match value {
            1 => Status::InProgress,
            2 => Status::Success,
            3 => Status::Failure,
            4 => Status::Timeout,
            _ => Status::Unknown,
        }
    }

    /// Wire name used on reported result events (§4.F "report").
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Unknown => "UNKNOWN",
            Status::InProgress => "IN_PROGRESS",
            Status::Success => "SUCCESS",
            Status::Failure => "FAILURE",
            Status::Timeout => "TIMEOUT",
        }
    }
}

/// Durable record of a single accepted command (§3 Command entry).
#[derive(Debug, Clone)]
pub struct CommandEntry {
    pub id: String,
    pub module: String,
    pub command: String,
    pub parameters: serde_json::Value,
    pub execution_mode: ExecutionMode,
    pub time: f64,
    pub status: Status,
    pub result_message: String,
}

pub struct CommandStore {
    persistence: SqlitePersistence,
}

impl CommandStore {
    pub async fn new(persistence: SqlitePersistence) -> Result<Self, CommandStoreError> {
        persistence
            .create_table(
                TABLE,
                &[
                    Column::new("id", "TEXT").primary_key(),
                    Column::new("module", "TEXT").not_null(),
                    Column::new("command", "TEXT").not_null(),
                    Column::new("parameters", "TEXT").not_null(),
                    Column::new("execution_mode", "INTEGER").not_null(),
                    Column::new("time", "REAL").not_null(),
                    Column::new("status", "INTEGER").not_null(),
                    Column::new("result_message", "TEXT").not_null(),
                ],
            )
            .await
            .map_err(CommandStoreError::Persistence)?;
        Ok(Self { persistence })
    }

    /// Idempotent on `id`: fails if a row with the same id already exists
    /// (used to reject replayed commands).
    pub async fn store(&self, entry: &CommandEntry) -> Result<(), CommandStoreError> {
        let existing = Criteria::and().with("id", Op::Eq, entry.id.as_str());
        let count = self.persistence.get_count(TABLE, Some(&existing)).await.map_err(CommandStoreError::Persistence)?;
        if count > 0 {
            return Err(CommandStoreError::AlreadyStored(entry.id.clone()));
        }

        let row = to_row(entry);
        self.persistence.insert(TABLE, &row).await.map_err(CommandStoreError::Persistence)?;
        Ok(())
    }

    /// Rewrite the mutable fields (status, result_message) of an existing entry.
    pub async fn update(&self, id: &str, status: Status, result_message: &str) -> Result<(), CommandStoreError> {
        let mut fields = Row::new();
        fields.insert("status".to_owned(), Value::Integer(status.as_i64()));
        fields.insert("result_message".to_owned(), Value::Text(result_message.to_owned()));
        let criteria = Criteria::and().with("id", Op::Eq, id);
        let affected = self.persistence.update(TABLE, &fields, &criteria).await.map_err(CommandStoreError::Persistence)?;
        if affected == 0 {
            return Err(CommandStoreError::NotFound(id.to_owned()));
        }
        Ok(())
    }

    pub async fn get_by_status(&self, status: Status) -> Result<Vec<CommandEntry>, CommandStoreError> {
        let criteria = Criteria::and().with("status", Op::Eq, status.as_i64());
        let rows = self.persistence.select(TABLE, &[], Some(&criteria), None, None).await.map_err(CommandStoreError::Persistence)?;
        Ok(rows.into_iter().map(to_entry).collect())
    }

    pub async fn get_count(&self) -> Result<i64, CommandStoreError> {
        self.persistence.get_count(TABLE, None).await.map_err(CommandStoreError::Persistence)
    }

    pub async fn delete(&self, id: &str) -> Result<(), CommandStoreError> {
        let criteria = Criteria::and().with("id", Op::Eq, id);
        self.persistence.remove(TABLE, &criteria).await.map_err(CommandStoreError::Persistence)?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), CommandStoreError> {
        let criteria = Criteria::and();
        self.persistence.remove(TABLE, &criteria).await.map_err(CommandStoreError::Persistence)?;
        Ok(())
    }

    /// Scan for rows left `IN_PROGRESS` by an unclean shutdown and rewrite
    /// each to `FAILURE` with a fixed message (§4.C crash recovery). Called
    /// once at command-handler startup; returns the recovered entries so
    /// the caller can report each one as a result event.
    pub async fn recover_in_progress(&self) -> Result<Vec<CommandEntry>, CommandStoreError> {
        let mut stuck = self.get_by_status(Status::InProgress).await?;
        for entry in &mut stuck {
            self.update(&entry.id, Status::Failure, "Agent stopped during execution").await?;
            entry.status = Status::Failure;
            entry.result_message = "Agent stopped during execution".to_owned();
        }
        Ok(stuck)
    }
}

fn to_row(entry: &CommandEntry) -> Row {
    let mut row = Row::new();
    row.insert("id".to_owned(), Value::Text(entry.id.clone()));
    row.insert("module".to_owned(), Value::Text(entry.module.clone()));
    row.insert("command".to_owned(), Value::Text(entry.command.clone()));
    row.insert("parameters".to_owned(), Value::Text(entry.parameters.to_string()));
    row.insert("execution_mode".to_owned(), Value::Integer(entry.execution_mode.as_i64()));
    row.insert("time".to_owned(), Value::Real(entry.time));
    row.insert("status".to_owned(), Value::Integer(entry.status.as_i64()));
    row.insert("result_message".to_owned(), Value::Text(entry.result_message.clone()));
    row
}

fn to_entry(row: Row) -> CommandEntry {
    let text = |key: &str| match row.get(key) {
        Some(Value::Text(s)) => s.clone(),
        _ => String::new(),
    };
    let integer = |key: &str| match row.get(key) {
        Some(Value::Integer(n)) => *n,
        _ => 0,
    };
    let real = |key: &str| match row.get(key) {
        Some(Value::Real(n)) => *n,
        Some(Value::Integer(n)) => *n as f64,
        _ => 0.0,
    };
    CommandEntry {
        id: text("id"),
        module: text("module"),
        command: text("command"),
        parameters: serde_json::from_str(&text("parameters")).unwrap_or(serde_json::Value::Null),
        execution_mode: ExecutionMode::from_i64(integer("execution_mode")),
        time: real("time"),
        status: Status::from_i64(integer("status")),
        result_message: text("result_message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> CommandEntry {
        CommandEntry {
            id: id.to_owned(),
            module: "logcollector".to_owned(),
            command: "restart".to_owned(),
            parameters: serde_json::json!({}),
            execution_mode: ExecutionMode::Sync,
            time: 100.0,
            status: Status::InProgress,
            result_message: String::new(),
        }
    }

    #[tokio::test]
    async fn store_rejects_duplicate_id() {
        let persistence = SqlitePersistence::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        let store = CommandStore::new(persistence).await.unwrap_or_else(|e| panic!("new: {e}"));
        store.store(&sample("cmd-1")).await.unwrap_or_else(|e| panic!("store: {e}"));

        let result = store.store(&sample("cmd-1")).await;
        assert!(matches!(result, Err(CommandStoreError::AlreadyStored(_))));
    }

    #[tokio::test]
    async fn recover_in_progress_marks_failure() {
        let persistence = SqlitePersistence::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        let store = CommandStore::new(persistence).await.unwrap_or_else(|e| panic!("new: {e}"));
        store.store(&sample("cmd-2")).await.unwrap_or_else(|e| panic!("store: {e}"));

        let recovered = store.recover_in_progress().await.unwrap_or_default();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].status, Status::Failure);

        let rows = store.get_by_status(Status::Failure).await.unwrap_or_default();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].result_message, "Agent stopped during execution");
    }

    #[tokio::test]
    async fn update_unknown_id_errors() {
        let persistence = SqlitePersistence::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        let store = CommandStore::new(persistence).await.unwrap_or_else(|e| panic!("new: {e}"));
        let result = store.update("missing", Status::Success, "ok").await;
        assert!(matches!(result, Err(CommandStoreError::NotFound(_))));
    }
}

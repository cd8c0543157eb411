// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Embedded relational persistence (§4.A): a small criteria-based query
//! layer over a single SQLite file, shared by the message queue and the
//! command store.

mod sqlite;

use std::collections::HashMap;

pub use rusqlite::types::Value;
pub use sqlite::SqlitePersistence;

use crate::error::PersistenceError;

/// Column definition for `create_table`.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: &'static str,
    pub primary_key: bool,
    pub not_null: bool,
}

impl Column {
    pub const fn new(name: &'static str, sql_type: &'static str) -> Self {
        Self { name, sql_type, primary_key: false, not_null: false }
    }

    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub const fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }
}

/// Comparison operator for a single criteria clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Op {
    fn as_sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
        }
    }
}

/// How successive criteria clauses combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// A `WHERE` clause built from one or more `(column, op, value)` triples,
/// all joined by the same logical operator (§4.A).
#[derive(Debug, Clone, Default)]
pub struct Criteria {
    op: LogicalOp,
    clauses: Vec<(&'static str, Op, Value)>,
}

impl Default for LogicalOp {
    fn default() -> Self {
        LogicalOp::And
    }
}

impl Criteria {
    pub fn and() -> Self {
        Self { op: LogicalOp::And, clauses: Vec::new() }
    }

    pub fn or() -> Self {
        Self { op: LogicalOp::Or, clauses: Vec::new() }
    }

    pub fn with(mut self, column: &'static str, op: Op, value: impl IntoCriteriaValue) -> Self {
        self.clauses.push((column, op, value.into_value()));
        self
    }

    fn to_sql(&self) -> (String, Vec<Value>) {
        if self.clauses.is_empty() {
            return (String::new(), Vec::new());
        }
        let joiner = match self.op {
            LogicalOp::And => " AND ",
            LogicalOp::Or => " OR ",
        };
        let mut params = Vec::with_capacity(self.clauses.len());
        let fragments: Vec<String> = self
            .clauses
            .iter()
            .map(|(column, op, value)| {
                params.push(value.clone());
                format!("{column} {} ?", op.as_sql())
            })
            .collect();
        (format!(" WHERE {}", fragments.join(joiner)), params)
    }
}

/// Converts common literal types into a `Criteria` value without depending
/// on `rusqlite`'s own (narrower) `From` impls for `Value`.
pub trait IntoCriteriaValue {
    fn into_value(self) -> Value;
}

impl IntoCriteriaValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl IntoCriteriaValue for i64 {
    fn into_value(self) -> Value {
        Value::Integer(self)
    }
}

impl IntoCriteriaValue for i32 {
    fn into_value(self) -> Value {
        Value::Integer(self as i64)
    }
}

impl IntoCriteriaValue for usize {
    fn into_value(self) -> Value {
        Value::Integer(self as i64)
    }
}

impl IntoCriteriaValue for bool {
    fn into_value(self) -> Value {
        Value::Integer(self as i64)
    }
}

impl IntoCriteriaValue for &str {
    fn into_value(self) -> Value {
        Value::Text(self.to_owned())
    }
}

impl IntoCriteriaValue for String {
    fn into_value(self) -> Value {
        Value::Text(self)
    }
}

/// Row ordering for `select`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Asc,
    Desc,
}

/// A single result row, column name to value.
pub type Row = HashMap<String, Value>;

/// Embedded relational store contract (§4.A). All methods are async so
/// callers never block the runtime thread for longer than one SQLite call;
/// the underlying connection is serialized behind a `tokio::sync::Mutex`
/// that is held only for the duration of that call, never across an
/// `.await` (§5: "never hold (A)'s write lock across a suspension").
#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    async fn table_exists(&self, table: &str) -> Result<bool, PersistenceError>;

    async fn create_table(&self, table: &str, columns: &[Column]) -> Result<(), PersistenceError>;

    async fn insert(&self, table: &str, values: &Row) -> Result<i64, PersistenceError>;

    async fn update(&self, table: &str, fields: &Row, criteria: &Criteria) -> Result<usize, PersistenceError>;

    async fn remove(&self, table: &str, criteria: &Criteria) -> Result<usize, PersistenceError>;

    async fn select(
        &self,
        table: &str,
        columns: &[&str],
        criteria: Option<&Criteria>,
        order_by: Option<(&str, OrderType)>,
        limit: Option<usize>,
    ) -> Result<Vec<Row>, PersistenceError>;

    async fn get_count(&self, table: &str, criteria: Option<&Criteria>) -> Result<i64, PersistenceError>;

    /// Sum of the `size` column, used by the message queue to enforce its
    /// byte-size cap without loading every row.
    async fn get_size(&self, table: &str) -> Result<i64, PersistenceError>;
}

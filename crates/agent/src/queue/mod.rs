// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed, bounded, persistent FIFO (§4.B). One `(type, module)` lane is
//! strict FIFO; no ordering is guaranteed across modules. Every mutation
//! goes through the shared `SqlitePersistence` handle (§4.A), so the queue
//! survives a process restart with no message loss.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::QueueError;
use crate::persistence::{Column, Criteria, Op, OrderType, Persistence, SqlitePersistence, Value};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The three typed sub-queues (§3 Message).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Stateful,
    Stateless,
    Command,
}

impl MessageType {
    pub const ALL: [MessageType; 3] = [MessageType::Stateful, MessageType::Stateless, MessageType::Command];

    fn table(self) -> &'static str {
        match self {
            MessageType::Stateful => "queue_stateful",
            MessageType::Stateless => "queue_stateless",
            MessageType::Command => "queue_command",
        }
    }
}

/// A message on its way into the queue (§3 Message).
#[derive(Debug, Clone)]
pub struct Message {
    pub message_type: MessageType,
    pub module_name: String,
    pub module_type: String,
    pub metadata: Option<serde_json::Value>,
    pub payload: serde_json::Value,
}

impl Message {
    fn byte_size(&self) -> i64 {
        self.payload.to_string().len() as i64
    }
}

/// A stored message as read back from the queue (§3 Queue record).
#[derive(Debug, Clone)]
pub struct QueueRecord {
    pub rowid: i64,
    pub module_name: String,
    pub module_type: String,
    pub metadata: Option<serde_json::Value>,
    pub payload: serde_json::Value,
    pub byte_size: i64,
}

/// Per-type capacity budget: the full-condition trips on whichever limit is
/// reached first (§4.B).
#[derive(Debug, Clone, Copy)]
pub struct QueueLimits {
    pub max_count: i64,
    pub max_bytes: i64,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self { max_count: 10_000, max_bytes: 50 * 1024 * 1024 }
    }
}

/// Typed multi-queue, backed by one SQLite table per `MessageType`.
pub struct MessageQueue {
    persistence: SqlitePersistence,
    limits: HashMap<MessageType, QueueLimits>,
    notify: HashMap<MessageType, Arc<Notify>>,
}

impl MessageQueue {
    /// Create the queue and its backing tables (idempotent).
    pub async fn new(persistence: SqlitePersistence, limits: HashMap<MessageType, QueueLimits>) -> Result<Self, QueueError> {
        let queue = Self {
            persistence,
            limits,
            notify: MessageType::ALL.into_iter().map(|t| (t, Arc::new(Notify::new()))).collect(),
        };
        for message_type in MessageType::ALL {
            queue
                .persistence
                .create_table(
                    message_type.table(),
                    &[
                        Column::new("id", "INTEGER").primary_key(),
                        Column::new("module_name", "TEXT").not_null(),
                        Column::new("module_type", "TEXT").not_null(),
                        Column::new("metadata", "TEXT"),
                        Column::new("payload", "TEXT").not_null(),
                        Column::new("size", "INTEGER").not_null(),
                    ],
                )
                .await?;
        }
        Ok(queue)
    }

    fn limits_for(&self, message_type: MessageType) -> QueueLimits {
        self.limits.get(&message_type).copied().unwrap_or_default()
    }

    /// Returns `true` once either the count or the byte budget is reached.
    pub async fn is_full(&self, message_type: MessageType) -> Result<bool, QueueError> {
        let limits = self.limits_for(message_type);
        let count = self.persistence.get_count(message_type.table(), None).await?;
        if count >= limits.max_count {
            return Ok(true);
        }
        let size = self.persistence.get_size(message_type.table()).await?;
        Ok(size >= limits.max_bytes)
    }

    pub async fn is_empty(&self, message_type: MessageType) -> Result<bool, QueueError> {
        Ok(self.persistence.get_count(message_type.table(), None).await? == 0)
    }

    pub async fn stored_items(&self, message_type: MessageType) -> Result<i64, QueueError> {
        Ok(self.persistence.get_count(message_type.table(), None).await?)
    }

    pub async fn size_per_type(&self, message_type: MessageType) -> Result<i64, QueueError> {
        Ok(self.persistence.get_size(message_type.table()).await?)
    }

    /// Insert `messages` atomically: either every message fits within the
    /// count/byte budget or none is inserted. Returns the number inserted
    /// (0 if the queue was full and `should_wait` was false).
    pub async fn push(&self, messages: &[Message], should_wait: bool) -> Result<usize, QueueError> {
        if should_wait {
            return self.push_awaitable(messages).await;
        }
        self.try_push(messages).await
    }

    async fn try_push(&self, messages: &[Message]) -> Result<usize, QueueError> {
        if messages.is_empty() {
            return Ok(0);
        }
        let message_type = messages[0].message_type;
        let limits = self.limits_for(message_type);
        let table = message_type.table();

        let additional_bytes: i64 = messages.iter().map(Message::byte_size).sum();
        let current_count = self.persistence.get_count(table, None).await?;
        let current_size = self.persistence.get_size(table).await?;

        if current_count + messages.len() as i64 > limits.max_count || current_size + additional_bytes > limits.max_bytes {
            return Ok(0);
        }

        for message in messages {
            let mut row = crate::persistence::Row::new();
            row.insert("module_name".to_owned(), Value::Text(message.module_name.clone()));
            row.insert("module_type".to_owned(), Value::Text(message.module_type.clone()));
            row.insert(
                "metadata".to_owned(),
                match &message.metadata {
                    Some(m) => Value::Text(m.to_string()),
                    None => Value::Null,
                },
            );
            row.insert("payload".to_owned(), Value::Text(message.payload.to_string()));
            row.insert("size".to_owned(), Value::Integer(message.byte_size()));
            self.persistence.insert(table, &row).await?;
        }

        if let Some(notify) = self.notify.get(&message_type) {
            notify.notify_waiters();
        }
        Ok(messages.len())
    }

    /// Same contract as `push`, but suspends the task instead of returning
    /// 0, polling the full-condition on a 100 ms timer (§4.B).
    pub async fn push_awaitable(&self, messages: &[Message]) -> Result<usize, QueueError> {
        loop {
            let pushed = self.try_push(messages).await?;
            if pushed > 0 || messages.is_empty() {
                return Ok(pushed);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn module_criteria(module: Option<&str>) -> Option<Criteria> {
        module.map(|m| Criteria::and().with("module_name", Op::Eq, m))
    }

    /// Oldest message of `message_type`, optionally filtered by module.
    /// Does not remove it.
    pub async fn get_next(&self, message_type: MessageType, module: Option<&str>) -> Result<Option<QueueRecord>, QueueError> {
        let criteria = Self::module_criteria(module);
        let rows = self
            .persistence
            .select(message_type.table(), &[], criteria.as_ref(), Some(("id", OrderType::Asc)), Some(1))
            .await?;
        Ok(rows.into_iter().next().map(to_record))
    }

    /// Longest contiguous FIFO prefix whose combined size stays within
    /// `budget_bytes`; waits if the sub-queue is currently empty.
    pub async fn get_next_bytes_awaitable(
        &self,
        message_type: MessageType,
        budget_bytes: i64,
        module: Option<&str>,
    ) -> Result<Vec<QueueRecord>, QueueError> {
        loop {
            let criteria = Self::module_criteria(module);
            let rows = self
                .persistence
                .select(message_type.table(), &[], criteria.as_ref(), Some(("id", OrderType::Asc)), None)
                .await?;
            if !rows.is_empty() {
                let mut prefix = Vec::new();
                let mut total = 0i64;
                for row in rows {
                    let record = to_record(row);
                    if total + record.byte_size > budget_bytes && !prefix.is_empty() {
                        break;
                    }
                    total += record.byte_size;
                    prefix.push(record);
                    if total >= budget_bytes {
                        break;
                    }
                }
                return Ok(prefix);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Remove the oldest message of `message_type`, optionally filtered by module.
    pub async fn pop(&self, message_type: MessageType, module: Option<&str>) -> Result<usize, QueueError> {
        self.pop_n(message_type, 1, module).await
    }

    /// Remove the oldest `n` messages of `message_type`.
    pub async fn pop_n(&self, message_type: MessageType, n: usize, module: Option<&str>) -> Result<usize, QueueError> {
        let criteria = Self::module_criteria(module);
        let rows = self
            .persistence
            .select(message_type.table(), &["id"], criteria.as_ref(), Some(("id", OrderType::Asc)), Some(n))
            .await?;
        let mut removed = 0;
        for row in rows {
            if let Some(Value::Integer(id)) = row.get("id") {
                let criteria = Criteria::and().with("id", Op::Eq, *id);
                removed += self.persistence.remove(message_type.table(), &criteria).await?;
            }
        }
        Ok(removed)
    }
}

fn to_record(row: crate::persistence::Row) -> QueueRecord {
    let rowid = match row.get("id") {
        Some(Value::Integer(id)) => *id,
        _ => 0,
    };
    let module_name = match row.get("module_name") {
        Some(Value::Text(s)) => s.clone(),
        _ => String::new(),
    };
    let module_type = match row.get("module_type") {
        Some(Value::Text(s)) => s.clone(),
        _ => String::new(),
    };
    let metadata = match row.get("metadata") {
        Some(Value::Text(s)) => serde_json::from_str(s).ok(),
        _ => None,
    };
    let payload = match row.get("payload") {
        Some(Value::Text(s)) => serde_json::from_str(s).unwrap_or(serde_json::Value::Null),
        _ => serde_json::Value::Null,
    };
    let byte_size = match row.get("size") {
        Some(Value::Integer(n)) => *n,
        _ => 0,
    };
    QueueRecord { rowid, module_name, module_type, metadata, payload, byte_size }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(payload: &str) -> Message {
        Message {
            message_type: MessageType::Stateful,
            module_name: "logcollector".to_owned(),
            module_type: "collector".to_owned(),
            metadata: None,
            payload: serde_json::json!({ "line": payload }),
        }
    }

    #[tokio::test]
    async fn push_then_pop_preserves_fifo_order() {
        let persistence = SqlitePersistence::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        let queue = MessageQueue::new(persistence, HashMap::new()).await.unwrap_or_else(|e| panic!("new: {e}"));

        queue.push(&[sample("a"), sample("b")], false).await.unwrap_or_else(|e| panic!("push: {e}"));
        let next = queue.get_next(MessageType::Stateful, None).await.unwrap_or(None);
        assert_eq!(next.map(|r| r.payload), Some(serde_json::json!({ "line": "a" })));

        let popped = queue.pop_n(MessageType::Stateful, 1, None).await.unwrap_or(0);
        assert_eq!(popped, 1);
        assert_eq!(queue.stored_items(MessageType::Stateful).await.unwrap_or(-1), 1);
    }

    #[tokio::test]
    async fn push_rejects_when_full_without_wait() {
        let persistence = SqlitePersistence::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        let mut limits = HashMap::new();
        limits.insert(MessageType::Stateful, QueueLimits { max_count: 1, max_bytes: 1_000_000 });
        let queue = MessageQueue::new(persistence, limits).await.unwrap_or_else(|e| panic!("new: {e}"));

        let first = queue.push(&[sample("a")], false).await.unwrap_or(0);
        assert_eq!(first, 1);
        let second = queue.push(&[sample("b")], false).await.unwrap_or(99);
        assert_eq!(second, 0, "queue at max_count must reject without blocking");
    }

    #[tokio::test]
    async fn get_next_bytes_awaitable_returns_budget_prefix() {
        let persistence = SqlitePersistence::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        let queue = MessageQueue::new(persistence, HashMap::new()).await.unwrap_or_else(|e| panic!("new: {e}"));
        queue.push(&[sample("a"), sample("b"), sample("c")], false).await.unwrap_or_else(|e| panic!("push: {e}"));

        let one_record_budget = sample("a").byte_size();
        let prefix = queue
            .get_next_bytes_awaitable(MessageType::Stateful, one_record_budget, None)
            .await
            .unwrap_or_else(|e| panic!("get_next_bytes: {e}"));
        assert_eq!(prefix.len(), 1);
    }
}

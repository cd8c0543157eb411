// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command Handler (§4.F): table-driven validation, then a processing loop
//! that persists accepted commands in the command store and dispatches
//! them to the module manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::command_store::{CommandEntry, CommandStore, ExecutionMode, Status};
use crate::modules::PushMessageFn;
use crate::queue::{Message, MessageQueue, MessageType};

const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Argument type tag used by `CommandTable` validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    String,
    Array,
    Object,
    Number,
    Bool,
}

impl ArgType {
    fn matches(self, value: &serde_json::Value) -> bool {
        match self {
            ArgType::String => value.is_string(),
            ArgType::Array => value.is_array(),
            ArgType::Object => value.is_object(),
            ArgType::Number => value.is_number(),
            ArgType::Bool => value.is_boolean(),
        }
    }
}

/// One row of the closed command table (§4.F).
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub module: &'static str,
    pub execution_mode: ExecutionMode,
    pub required_args: &'static [(&'static str, ArgType)],
}

/// Closed map from command verb to its routing/validation spec.
pub struct CommandTable(HashMap<&'static str, CommandSpec>);

impl Default for CommandTable {
    fn default() -> Self {
        let mut table = HashMap::new();
        table.insert(
            "set-group",
            CommandSpec { module: "centralized_configuration", execution_mode: ExecutionMode::Sync, required_args: &[("groups", ArgType::Array)] },
        );
        table.insert(
            "update-group",
            CommandSpec { module: "centralized_configuration", execution_mode: ExecutionMode::Sync, required_args: &[] },
        );
        Self(table)
    }
}

impl CommandTable {
    pub fn lookup(&self, command: &str) -> Option<&CommandSpec> {
        self.0.get(command)
    }
}

/// Outcome of one dispatched command, fed back into the command store.
#[derive(Debug, Clone)]
pub struct CommandExecutionResult {
    pub status: Status,
    pub message: String,
}

/// Callback that routes an accepted command to its target module and
/// returns the execution outcome — supplied by the module manager (§4.F:
/// "`dispatch(cmd)` is supplied by the module manager").
#[async_trait::async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, entry: &CommandEntry) -> CommandExecutionResult;
}

pub struct CommandHandler<D: Dispatcher> {
    queue: Arc<MessageQueue>,
    store: Arc<CommandStore>,
    table: CommandTable,
    dispatcher: Arc<D>,
    report: PushMessageFn,
    stopped: Arc<AtomicBool>,
}

impl<D: Dispatcher + 'static> CommandHandler<D> {
    pub fn new(queue: Arc<MessageQueue>, store: Arc<CommandStore>, dispatcher: Arc<D>, report: PushMessageFn) -> Self {
        Self { queue, store, table: CommandTable::default(), dispatcher, report, stopped: Arc::new(AtomicBool::new(false)) }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Emit a STATELESS result event for a terminal command outcome (§4.F
    /// "report"; `original_source/.../command_handler.cpp:80,93,136`).
    fn report_result(&self, id: &str, status: Status, message: &str) {
        (self.report)(Message {
            message_type: MessageType::Stateless,
            module_name: "command_handler".to_owned(),
            module_type: "core".to_owned(),
            metadata: None,
            payload: serde_json::json!({ "id": id, "status": status.as_str(), "message": message }),
        });
    }

    /// Validate a raw command payload against the closed table (§4.F).
    /// Returns the populated entry on success, or a human-readable reason.
    pub fn validate(&self, id: String, command: String, parameters: serde_json::Value, time: f64) -> Result<CommandEntry, String> {
        let spec = self.table.lookup(&command).ok_or_else(|| format!("unknown command '{command}'"))?;

        let args = parameters.as_object().cloned().unwrap_or_default();
        for (name, arg_type) in spec.required_args {
            match args.get(*name) {
                Some(value) if arg_type.matches(value) => {}
                Some(_) => return Err(format!("argument '{name}' has the wrong type")),
                None => return Err(format!("missing required argument '{name}'")),
            }
        }

        Ok(CommandEntry {
            id,
            module: spec.module.to_owned(),
            command,
            parameters,
            execution_mode: spec.execution_mode,
            time,
            status: Status::Unknown,
            result_message: String::new(),
        })
    }

    /// Run the processing loop until `stop()` is called (§4.F steps 1-7).
    pub async fn run(&self) {
        let recovered = self.store.recover_in_progress().await.unwrap_or_default();
        if !recovered.is_empty() {
            tracing::info!(recovered = recovered.len(), "recovered IN_PROGRESS commands as FAILURE after restart");
            for entry in &recovered {
                self.report_result(&entry.id, entry.status, &entry.result_message);
            }
        }

        while !self.stopped.load(Ordering::SeqCst) {
            let Ok(Some(record)) = self.queue.get_next(MessageType::Command, None).await else {
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                continue;
            };

            let id = record.payload.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_owned();
            let command = record.payload.get("command").and_then(|v| v.as_str()).unwrap_or_default().to_owned();
            let parameters = record.payload.get("parameters").cloned().unwrap_or(serde_json::Value::Null);
            let time = now_secs();

            let entry = match self.validate(id.clone(), command.clone(), parameters.clone(), time) {
                Ok(entry) => entry,
                Err(reason) => {
                    tracing::warn!(id, reason, "command failed validation");
                    let module = self.table.lookup(&command).map(|spec| spec.module.to_owned()).unwrap_or_else(|| "command_handler".to_owned());
                    let failed = CommandEntry {
                        id: id.clone(),
                        module,
                        command,
                        parameters,
                        execution_mode: ExecutionMode::Sync,
                        time,
                        status: Status::Failure,
                        result_message: "Command is not valid".to_owned(),
                    };
                    if let Err(err) = self.store.store(&failed).await {
                        tracing::warn!(id, %err, "failed to persist invalid command");
                    }
                    self.report_result(&failed.id, Status::Failure, "Command is not valid");
                    let _ = self.queue.pop(MessageType::Command, None).await;
                    continue;
                }
            };

            let mut entry = entry;
            entry.status = Status::InProgress;
            if let Err(err) = self.store.store(&entry).await {
                tracing::warn!(id = entry.id, %err, "failed to persist command");
                let _ = self.queue.pop(MessageType::Command, None).await;
                continue;
            }

            let _ = self.queue.pop(MessageType::Command, None).await;

            match entry.execution_mode {
                ExecutionMode::Sync => {
                    let result = self.dispatcher.dispatch(&entry).await;
                    let _ = self.store.update(&entry.id, result.status, &result.message).await;
                    self.report_result(&entry.id, result.status, &result.message);
                }
                ExecutionMode::Async => {
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let store = Arc::clone(&self.store);
                    let report = Arc::clone(&self.report);
                    let entry = entry.clone();
                    tokio::spawn(async move {
                        let result = dispatcher.dispatch(&entry).await;
                        let _ = store.update(&entry.id, result.status, &result.message).await;
                        report(Message {
                            message_type: MessageType::Stateless,
                            module_name: "command_handler".to_owned(),
                            module_type: "core".to_owned(),
                            metadata: None,
                            payload: serde_json::json!({ "id": entry.id, "status": result.status.as_str(), "message": result.message }),
                        });
                    });
                }
            }
        }
    }
}

fn now_secs() -> f64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex as StdMutex;

    use crate::persistence::SqlitePersistence;

    struct EchoDispatcher;

    #[async_trait::async_trait]
    impl Dispatcher for EchoDispatcher {
        async fn dispatch(&self, _entry: &CommandEntry) -> CommandExecutionResult {
            CommandExecutionResult { status: Status::Success, message: "ok".to_owned() }
        }
    }

    fn no_op_report() -> PushMessageFn {
        Arc::new(|_msg: Message| {})
    }

    async fn handler() -> CommandHandler<EchoDispatcher> {
        let persistence = SqlitePersistence::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        let queue = Arc::new(MessageQueue::new(persistence.clone(), StdHashMap::new()).await.unwrap_or_else(|e| panic!("queue: {e}")));
        let store = Arc::new(CommandStore::new(persistence).await.unwrap_or_else(|e| panic!("store: {e}")));
        CommandHandler::new(queue, store, Arc::new(EchoDispatcher), no_op_report())
    }

    #[tokio::test]
    async fn validate_rejects_unknown_command() {
        let handler = handler().await;
        let result = handler.validate("1".to_owned(), "bogus".to_owned(), serde_json::json!({}), 0.0);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn validate_rejects_missing_required_arg() {
        let handler = handler().await;
        let result = handler.validate("1".to_owned(), "set-group".to_owned(), serde_json::json!({}), 0.0);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn validate_accepts_well_formed_command() {
        let handler = handler().await;
        let entry = handler
            .validate("1".to_owned(), "set-group".to_owned(), serde_json::json!({ "groups": ["default"] }), 0.0)
            .unwrap_or_else(|e| panic!("validate: {e}"));
        assert_eq!(entry.module, "centralized_configuration");
    }

    #[tokio::test]
    async fn invalid_command_is_stored_and_reported_as_failure() {
        let persistence = SqlitePersistence::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        let queue = Arc::new(MessageQueue::new(persistence.clone(), StdHashMap::new()).await.unwrap_or_else(|e| panic!("queue: {e}")));
        let store = Arc::new(CommandStore::new(persistence).await.unwrap_or_else(|e| panic!("store: {e}")));

        let reported: Arc<StdMutex<Vec<Message>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        let report: PushMessageFn = Arc::new(move |msg: Message| sink.lock().unwrap_or_else(|e| e.into_inner()).push(msg));

        let handler = CommandHandler::new(Arc::clone(&queue), Arc::clone(&store), Arc::new(EchoDispatcher), report);
        queue
            .push(&[Message {
                message_type: MessageType::Command,
                module_name: "communicator".to_owned(),
                module_type: "core".to_owned(),
                metadata: None,
                payload: serde_json::json!({ "id": "1", "command": "bogus", "parameters": {} }),
            }], false)
            .await
            .unwrap_or_else(|e| panic!("push: {e}"));

        let run = tokio::spawn(async move { handler.run().await });
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let failed = store.get_by_status(Status::Failure).await.unwrap_or_default();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "1");
        assert_eq!(failed[0].result_message, "Command is not valid");

        let messages = reported.lock().unwrap_or_else(|e| e.into_inner());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload["status"], "FAILURE");
        assert_eq!(messages[0].payload["message"], "Command is not valid");

        run.abort();
    }
}

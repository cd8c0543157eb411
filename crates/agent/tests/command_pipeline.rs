// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests exercising the command pipeline end-to-end: queue →
//! command handler → module manager → command store, without a live
//! manager connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use agent_core::centralized_configuration::{CentralizedConfiguration, CentralizedConfigurationModule};
use agent_core::command_handler::CommandHandler;
use agent_core::command_store::{CommandStore, Status};
use agent_core::modules::{ModuleManager, PushMessageFn};
use agent_core::persistence::SqlitePersistence;
use agent_core::queue::{Message, MessageQueue, MessageType};

/// A `PushMessageFn` that records every pushed message instead of forwarding
/// it anywhere, so tests can assert on the result events the command
/// handler reports.
fn recording_report() -> (PushMessageFn, Arc<StdMutex<Vec<Message>>>) {
    let reported: Arc<StdMutex<Vec<Message>>> = Arc::new(StdMutex::new(Vec::new()));
    let sink = Arc::clone(&reported);
    let report: PushMessageFn = Arc::new(move |msg: Message| sink.lock().unwrap_or_else(|e| e.into_inner()).push(msg));
    (report, reported)
}

async fn wiring() -> (Arc<MessageQueue>, Arc<CommandStore>, Arc<CommandHandler<ModuleManager>>, Arc<StdMutex<Vec<Message>>>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
    let persistence = SqlitePersistence::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
    let queue = Arc::new(MessageQueue::new(persistence.clone(), HashMap::new()).await.unwrap_or_else(|e| panic!("queue: {e}")));
    let store = Arc::new(CommandStore::new(persistence).await.unwrap_or_else(|e| panic!("store: {e}")));

    let centralized_config = Arc::new(CentralizedConfiguration::new(dir.path().join("shared"), dir.path().join("tmp")));
    centralized_config.set_downloader(Arc::new(|_id: &str, dst: &std::path::Path| {
        std::fs::write(dst, b"group: ok").map_err(|_| agent_core::error::CentralizedConfigError::DownloadFailed("io".to_owned()))
    }));
    centralized_config.set_validator(Arc::new(|_path: &std::path::Path| Ok(())));

    let mut modules = ModuleManager::new();
    modules
        .add_module(Arc::new(CentralizedConfigurationModule::new(Arc::clone(&centralized_config))))
        .unwrap_or_else(|e| panic!("add_module: {e}"));

    let (report, reported) = recording_report();
    let handler = Arc::new(CommandHandler::new(Arc::clone(&queue), Arc::clone(&store), Arc::new(modules), report));
    (queue, store, handler, reported, dir)
}

fn command_message(id: &str, command: &str, parameters: serde_json::Value) -> Message {
    Message {
        message_type: MessageType::Command,
        module_name: "communicator".to_owned(),
        module_type: "core".to_owned(),
        metadata: None,
        payload: serde_json::json!({ "id": id, "command": command, "parameters": parameters }),
    }
}

#[tokio::test]
async fn set_group_command_installs_files_and_records_success() {
    let (queue, store, handler, _reported, dir) = wiring().await;
    queue
        .push(&[command_message("cmd-1", "set-group", serde_json::json!({ "groups": ["default"] }))], false)
        .await
        .unwrap_or_else(|e| panic!("push: {e}"));

    let run = tokio::spawn(async move { handler.run().await });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let entries = store.get_by_status(Status::Success).await.unwrap_or_default();
    assert_eq!(entries.len(), 1, "set-group should have completed successfully");
    assert_eq!(entries[0].id, "cmd-1");
    assert!(dir.path().join("shared/default.conf").exists());

    run.abort();
}

#[tokio::test]
async fn invalid_command_is_recorded_as_failure_and_reported_once() {
    let (queue, store, handler, reported, _dir) = wiring().await;
    queue.push(&[command_message("cmd-2", "bogus-command", serde_json::json!({}))], false).await.unwrap_or_else(|e| panic!("push: {e}"));

    let run = tokio::spawn(async move { handler.run().await });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let failed = store.get_by_status(Status::Failure).await.unwrap_or_default();
    assert_eq!(failed.len(), 1, "an invalid command must still be recorded as FAILURE");
    assert_eq!(failed[0].id, "cmd-2");
    assert_eq!(failed[0].result_message, "Command is not valid");
    assert_eq!(queue.stored_items(MessageType::Command).await.unwrap_or(-1), 0, "invalid command must still be popped off the queue");

    let messages = reported.lock().unwrap_or_else(|e| e.into_inner());
    assert_eq!(messages.len(), 1, "a result event must be emitted exactly once");
    assert_eq!(messages[0].payload["id"], "cmd-2");
    assert_eq!(messages[0].payload["status"], "FAILURE");
    assert_eq!(messages[0].payload["message"], "Command is not valid");

    run.abort();
}

#[tokio::test]
async fn crash_recovery_marks_stale_in_progress_commands_as_failed() {
    let persistence = SqlitePersistence::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
    let store = CommandStore::new(persistence).await.unwrap_or_else(|e| panic!("store: {e}"));

    store
        .store(&agent_core::command_store::CommandEntry {
            id: "stale-1".to_owned(),
            module: "centralized_configuration".to_owned(),
            command: "set-group".to_owned(),
            parameters: serde_json::json!({ "groups": ["default"] }),
            execution_mode: agent_core::command_store::ExecutionMode::Sync,
            time: 0.0,
            status: Status::InProgress,
            result_message: String::new(),
        })
        .await
        .unwrap_or_else(|e| panic!("store: {e}"));

    let recovered = store.recover_in_progress().await.unwrap_or_else(|e| panic!("recover: {e}"));
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].id, "stale-1");
    assert_eq!(recovered[0].status, Status::Failure);

    let failed = store.get_by_status(Status::Failure).await.unwrap_or_default();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].result_message, "Agent stopped during execution");
}

#[tokio::test]
async fn crash_recovery_reports_a_result_event_exactly_once() {
    let (queue, store, handler, reported, _dir) = wiring().await;
    store
        .store(&agent_core::command_store::CommandEntry {
            id: "stale-2".to_owned(),
            module: "centralized_configuration".to_owned(),
            command: "set-group".to_owned(),
            parameters: serde_json::json!({ "groups": ["default"] }),
            execution_mode: agent_core::command_store::ExecutionMode::Sync,
            time: 0.0,
            status: Status::InProgress,
            result_message: String::new(),
        })
        .await
        .unwrap_or_else(|e| panic!("store: {e}"));

    let run = tokio::spawn(async move { handler.run().await });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let messages = reported.lock().unwrap_or_else(|e| e.into_inner());
    assert_eq!(messages.len(), 1, "crash-recovered command must be reported exactly once");
    assert_eq!(messages[0].payload["id"], "stale-2");
    assert_eq!(messages[0].payload["status"], "FAILURE");
    assert_eq!(messages[0].payload["message"], "Agent stopped during execution");
    drop(messages);

    assert_eq!(queue.stored_items(MessageType::Command).await.unwrap_or(-1), 0);
    run.abort();
}

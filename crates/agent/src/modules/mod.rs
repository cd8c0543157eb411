// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Module Manager (§4.J): owns the set of collector modules, wires each
//! one to the message-queue producer interface, and is the `dispatch`
//! callback the command handler (§4.F) uses to route accepted commands.

use std::collections::HashMap;
use std::sync::Arc;

use crate::command_handler::{CommandExecutionResult, Dispatcher};
use crate::command_store::{CommandEntry, Status};
use crate::queue::Message;

/// A function a module calls to push a produced message into the queue.
pub type PushMessageFn = Arc<dyn Fn(Message) + Send + Sync>;

/// Capability set every collector module satisfies (§4.J).
#[async_trait::async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    /// Apply this module's configuration subtree; invoked once before `run`.
    async fn setup(&self, config: serde_yaml::Value) -> Result<(), String>;

    /// Long-running loop, spawned as its own task by `ModuleManager::start`.
    async fn run(&self);

    async fn stop(&self);

    async fn execute_command(&self, name: &str, params: serde_json::Value) -> CommandExecutionResult;

    fn set_push_message_function(&self, push: PushMessageFn);
}

/// Owns every registered module and routes accepted commands to them.
pub struct ModuleManager {
    modules: HashMap<String, Arc<dyn Module>>,
    order: Vec<String>,
}

impl ModuleManager {
    pub fn new() -> Self {
        Self { modules: HashMap::new(), order: Vec::new() }
    }

    /// Register a module, rejecting duplicate names (§4.J).
    pub fn add_module(&mut self, module: Arc<dyn Module>) -> Result<(), String> {
        let name = module.name().to_owned();
        if self.modules.contains_key(&name) {
            return Err(format!("module '{name}' already registered"));
        }
        self.order.push(name.clone());
        self.modules.insert(name, module);
        Ok(())
    }

    /// Invoke `setup` once on every registered module, in registration order.
    pub async fn setup_all(&self, config: &std::collections::BTreeMap<String, serde_yaml::Value>) -> Result<(), String> {
        for name in &self.order {
            let module = &self.modules[name];
            let module_config = config.get(name).cloned().unwrap_or(serde_yaml::Value::Null);
            module.setup(module_config).await?;
        }
        Ok(())
    }

    /// Spawn each module's `run` as an independent task.
    pub fn start_all(&self) -> Vec<tokio::task::JoinHandle<()>> {
        self.order
            .iter()
            .map(|name| {
                let module = Arc::clone(&self.modules[name]);
                tokio::spawn(async move { module.run().await })
            })
            .collect()
    }

    /// Call `stop` on every module in registration order.
    pub async fn stop_all(&self) {
        for name in &self.order {
            self.modules[name].stop().await;
        }
    }

    pub fn set_push_message_function(&self, push: PushMessageFn) {
        for name in &self.order {
            self.modules[name].set_push_message_function(Arc::clone(&push));
        }
    }
}

impl Default for ModuleManager {
    fn default() -> Self {
        Self::new()
    }
}

/// `execute_command` is the `dispatch` callback handed to the command
/// handler (§4.F): look up by the entry's `module` field and forward.
#[async_trait::async_trait]
impl Dispatcher for ModuleManager {
    async fn dispatch(&self, entry: &CommandEntry) -> CommandExecutionResult {
        match self.modules.get(&entry.module) {
            Some(module) => module.execute_command(&entry.command, entry.parameters.clone()).await,
            None => CommandExecutionResult { status: Status::Failure, message: format!("no module named '{}'", entry.module) },
        }
    }
}

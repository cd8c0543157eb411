// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Endpoint agent core: runtime, communicator, message queue, command
//! handler/store, centralized configuration, and the module manager
//! contract collector modules are built against.

pub mod agent_info;
pub mod centralized_configuration;
pub mod command_handler;
pub mod command_store;
pub mod communicator;
pub mod config;
pub mod control;
pub mod error;
pub mod http;
pub mod instance;
pub mod modules;
pub mod persistence;
pub mod queue;
pub mod task_manager;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

use crate::agent_info::AgentInfo;
use crate::centralized_configuration::{CentralizedConfiguration, CentralizedConfigurationModule};
use crate::command_handler::CommandHandler;
use crate::command_store::CommandStore;
use crate::communicator::{Communicator, CommunicatorConfig, Credentials};
use crate::config::AgentConfig;
use crate::http::HttpClient;
use crate::instance::InstanceHandler;
use crate::modules::{ModuleManager, PushMessageFn};
use crate::persistence::SqlitePersistence;
use crate::queue::{Message, MessageQueue};
use crate::task_manager::TaskManager;

/// Everything the running agent needs to shut down cleanly, in the reverse
/// order it was brought up (§2 control flow).
pub struct Agent {
    _instance: InstanceHandler,
    communicator: Arc<Communicator>,
    command_handler_stop: Arc<dyn Fn() + Send + Sync>,
    modules: Arc<ModuleManager>,
    control_cancellation: CancellationToken,
    task_manager: Arc<TaskManager>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_requested: CancellationToken,
    restart_requested: Arc<AtomicBool>,
}

impl Agent {
    /// Assemble persistence, queue/command-store, HTTP client, communicator,
    /// command handler, module manager, and the local control channel, then
    /// spawn every long-running coroutine (§2).
    pub async fn start(config: AgentConfig, credentials: Credentials) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.agent.path.data)?;
        std::fs::create_dir_all(&config.agent.path.run)?;

        let instance = InstanceHandler::try_acquire(&config.agent.path.run)?;

        let db_path = config.agent.path.data.join("agent.db");
        let persistence = SqlitePersistence::open(&db_path)?;

        let queue = Arc::new(MessageQueue::new(persistence.clone(), HashMap::new()).await?);
        let command_store = Arc::new(CommandStore::new(persistence.clone()).await?);
        let agent_info = Arc::new(AgentInfo::new(persistence.clone()).await?);

        let http = Arc::new(HttpClient::new());

        let endpoint = crate::agent_info::EndpointInfo::collect();
        let communicator = Arc::new(Communicator::new(
            Arc::clone(&http),
            Arc::clone(&queue),
            CommunicatorConfig {
                server_url: config.agent.server_url.clone(),
                retry_interval: config.retry_interval(),
                batch_interval: config.batch_interval(),
                batch_size: config.batch_size(),
                verification_mode: config.agent.verification_mode,
                user_agent: agent_info.user_agent(&endpoint),
                request_timeout: config.retry_interval(),
            },
            credentials,
        ));

        // The downloader/validator closures are the seam where a group-file
        // fetch (`HttpClient::perform_download` against `/groups/<id>/files`)
        // and a config-format validator plug in; `CentralizedConfiguration`
        // only needs them to be synchronous, so the concrete HTTP fetch is
        // left to the collector module that owns the group-sync schedule
        // rather than wired in here.
        let shared_dir = config.agent.path.data.join("shared");
        let tmp_dir = config.agent.path.data.join("tmp");
        let centralized_config = Arc::new(CentralizedConfiguration::new(shared_dir, tmp_dir));

        let mut modules = ModuleManager::new();
        modules
            .add_module(Arc::new(CentralizedConfigurationModule::new(Arc::clone(&centralized_config))))
            .map_err(anyhow::Error::msg)?;

        // Produced/result messages (collector events, command-handler
        // reports) all land back on the same queue the communicator drains.
        let push_message: PushMessageFn = {
            let queue = Arc::clone(&queue);
            Arc::new(move |msg: Message| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    let _ = queue.push(&[msg], false).await;
                });
            })
        };
        modules.set_push_message_function(Arc::clone(&push_message));
        modules.setup_all(&config.modules).await.map_err(anyhow::Error::msg)?;
        let modules = Arc::new(modules);

        let command_handler = Arc::new(CommandHandler::new(
            Arc::clone(&queue),
            Arc::clone(&command_store),
            Arc::clone(&modules),
            Arc::clone(&push_message),
        ));
        let command_handler_stop: Arc<dyn Fn() + Send + Sync> = {
            let handler = Arc::clone(&command_handler);
            Arc::new(move || handler.stop())
        };

        // The task manager owns the coroutine scheduling surface (§4.G); the
        // binary entrypoint already runs a `#[tokio::main]` multi-thread
        // runtime, so the task manager rides the caller's current-thread
        // handle rather than spinning up a second pool.
        let task_manager = Arc::new(TaskManager::new());
        task_manager.run_single_thread();

        let mut tasks = Vec::new();
        tasks.push(task_manager.enqueue_coroutine("communicator.token_lifecycle", token_lifecycle(Arc::clone(&communicator))));
        tasks.push(task_manager.enqueue_coroutine("communicator.command_fetch", command_fetch(Arc::clone(&communicator))));
        tasks.push(task_manager.enqueue_coroutine("communicator.stateful_push", stateful_push(Arc::clone(&communicator))));
        tasks.push(task_manager.enqueue_coroutine("communicator.stateless_push", stateless_push(Arc::clone(&communicator))));
        tasks.extend(modules.start_all());
        {
            let command_handler = Arc::clone(&command_handler);
            tasks.push(task_manager.enqueue_coroutine("command_handler.run", async move { command_handler.run().await }));
        }

        let control_cancellation = CancellationToken::new();
        let shutdown_requested = CancellationToken::new();
        let restart_requested = Arc::new(AtomicBool::new(false));
        let socket_path = config.agent.path.run.join("agent.sock");
        tasks.push(tokio::spawn(control::run(
            socket_path,
            Arc::new(AgentControlHandler {
                communicator: Arc::clone(&communicator),
                shutdown_requested: shutdown_requested.clone(),
                restart_requested: Arc::clone(&restart_requested),
            }),
            control_cancellation.clone(),
        )));

        Ok(Self {
            _instance: instance,
            communicator,
            command_handler_stop,
            modules,
            control_cancellation,
            task_manager,
            tasks,
            shutdown_requested,
            restart_requested,
        })
    }

    /// Block until a stop or restart is requested (control socket command or
    /// `Ctrl-C`), returning `true` when the caller should start a new `Agent`
    /// rather than exit (§4.I restart vs. stop).
    pub async fn run_until_stopped(&self) -> bool {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = self.shutdown_requested.cancelled() => {}
        }
        self.restart_requested.load(Ordering::SeqCst)
    }

    /// Reverse-order shutdown: control channel, command handler, modules,
    /// communicator, task manager (§2).
    pub async fn shutdown(self) {
        self.control_cancellation.cancel();
        (self.command_handler_stop)();
        self.modules.stop_all().await;
        self.communicator.stop();
        self.task_manager.stop();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

async fn token_lifecycle(communicator: Arc<Communicator>) {
    let _ = communicator.spawn_token_lifecycle().await;
}

async fn command_fetch(communicator: Arc<Communicator>) {
    let _ = communicator.spawn_command_fetch().await;
}

async fn stateful_push(communicator: Arc<Communicator>) {
    let _ = communicator.spawn_stateful_push().await;
}

async fn stateless_push(communicator: Arc<Communicator>) {
    let _ = communicator.spawn_stateless_push().await;
}

struct AgentControlHandler {
    communicator: Arc<Communicator>,
    shutdown_requested: CancellationToken,
    restart_requested: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl control::ControlHandler for AgentControlHandler {
    async fn handle(&self, command: control::ControlCommand) -> String {
        match command {
            control::ControlCommand::Status => "running".to_owned(),
            control::ControlCommand::Restart => {
                self.restart_requested.store(true, Ordering::SeqCst);
                self.communicator.stop();
                self.shutdown_requested.cancel();
                "restarting".to_owned()
            }
            control::ControlCommand::Stop => {
                self.communicator.stop();
                self.shutdown_requested.cancel();
                "stopping".to_owned()
            }
        }
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized Configuration (§4.K): `set-group` / `update-group` command
//! handling. Downloads a group file into a temp path, validates it, then
//! atomically renames it into the shared configuration directory so the
//! directory never contains a partially-written file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use crate::command_handler::{CommandExecutionResult, Dispatcher};
use crate::command_store::{CommandEntry, Status};
use crate::error::CentralizedConfigError;

/// Downloads `<id>.conf` into `dst_path`. Supplied by the agent runtime
/// (wraps `HttpClient::perform_download` against `/groups/<id>/files`).
pub type DownloaderFn = Arc<dyn Fn(&str, &Path) -> Result<(), CentralizedConfigError> + Send + Sync>;

/// Validates a staged group file before it is installed.
pub type ValidatorFn = Arc<dyn Fn(&Path) -> Result<(), CentralizedConfigError> + Send + Sync>;

pub struct CentralizedConfiguration {
    shared_dir: PathBuf,
    tmp_dir: PathBuf,
    downloader: StdMutex<Option<DownloaderFn>>,
    validator: StdMutex<Option<ValidatorFn>>,
    group_ids: StdMutex<Vec<String>>,
}

impl CentralizedConfiguration {
    pub fn new(shared_dir: PathBuf, tmp_dir: PathBuf) -> Self {
        Self { shared_dir, tmp_dir, downloader: StdMutex::new(None), validator: StdMutex::new(None), group_ids: StdMutex::new(Vec::new()) }
    }

    pub fn set_downloader(&self, downloader: DownloaderFn) {
        *self.downloader.lock().unwrap_or_else(|e| e.into_inner()) = Some(downloader);
    }

    pub fn set_validator(&self, validator: ValidatorFn) {
        *self.validator.lock().unwrap_or_else(|e| e.into_inner()) = Some(validator);
    }

    fn set_group_ids(&self, ids: Vec<String>) {
        *self.group_ids.lock().unwrap_or_else(|e| e.into_inner()) = ids;
    }

    fn get_group_ids(&self) -> Vec<String> {
        self.group_ids.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// `set-group(params)`: `params.groups` is an array of group-id strings (§4.K).
    pub async fn set_group(&self, params: &serde_json::Value) -> Result<(), CentralizedConfigError> {
        let ids: Vec<String> = params
            .get("groups")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
            .unwrap_or_default();
        if ids.is_empty() {
            return Err(CentralizedConfigError::EmptyGroupIds);
        }
        self.set_group_ids(ids.clone());
        self.install_groups(&ids).await
    }

    /// `update-group()`: same pipeline, group ids from `get_group_ids()` (§4.K).
    pub async fn update_group(&self) -> Result<(), CentralizedConfigError> {
        let ids = self.get_group_ids();
        if ids.is_empty() {
            return Err(CentralizedConfigError::EmptyGroupIds);
        }
        self.install_groups(&ids).await
    }

    async fn install_groups(&self, ids: &[String]) -> Result<(), CentralizedConfigError> {
        let downloader = self.downloader.lock().unwrap_or_else(|e| e.into_inner()).clone().ok_or(CentralizedConfigError::CapabilityMissing("downloader"))?;
        let validator = self.validator.lock().unwrap_or_else(|e| e.into_inner()).clone().ok_or(CentralizedConfigError::CapabilityMissing("validator"))?;

        std::fs::create_dir_all(&self.tmp_dir)?;
        std::fs::create_dir_all(&self.shared_dir)?;

        for id in ids {
            let staged = self.tmp_dir.join(format!("{id}.conf"));
            downloader(id, &staged).map_err(|_| CentralizedConfigError::DownloadFailed(id.clone()))?;
            validator(&staged).map_err(|_| CentralizedConfigError::ValidationFailed(id.clone()))?;

            let installed = self.shared_dir.join(format!("{id}.conf"));
            std::fs::rename(&staged, &installed)?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Dispatcher for CentralizedConfiguration {
    async fn dispatch(&self, entry: &CommandEntry) -> CommandExecutionResult {
        let result = match entry.command.as_str() {
            "set-group" => self.set_group(&entry.parameters).await,
            "update-group" => self.update_group().await,
            other => Err(CentralizedConfigError::ValidationFailed(format!("unsupported command '{other}'"))),
        };
        match result {
            Ok(()) => CommandExecutionResult { status: Status::Success, message: "group configuration installed".to_owned() },
            Err(err) => CommandExecutionResult { status: Status::Failure, message: err.to_string() },
        }
    }
}

/// Adapts `CentralizedConfiguration` to the `Module` capability set so it
/// can be registered in the `ModuleManager` under the name the command
/// table routes `set-group`/`update-group` to.
pub struct CentralizedConfigurationModule {
    inner: Arc<CentralizedConfiguration>,
}

impl CentralizedConfigurationModule {
    pub fn new(inner: Arc<CentralizedConfiguration>) -> Self {
        Self { inner }
    }
}

#[async_trait::async_trait]
impl crate::modules::Module for CentralizedConfigurationModule {
    fn name(&self) -> &str {
        "centralized_configuration"
    }

    async fn setup(&self, _config: serde_yaml::Value) -> Result<(), String> {
        Ok(())
    }

    async fn run(&self) {}

    async fn stop(&self) {}

    async fn execute_command(&self, name: &str, params: serde_json::Value) -> CommandExecutionResult {
        let entry = CommandEntry {
            id: String::new(),
            module: "centralized_configuration".to_owned(),
            command: name.to_owned(),
            parameters: params,
            execution_mode: crate::command_store::ExecutionMode::Sync,
            time: 0.0,
            status: Status::Unknown,
            result_message: String::new(),
        };
        self.inner.dispatch(&entry).await
    }

    fn set_push_message_function(&self, _push: crate::modules::PushMessageFn) {}
}

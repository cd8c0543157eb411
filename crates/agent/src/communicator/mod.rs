// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Communicator (§4.E): owns the auth token and the three long-running
//! coroutines that keep the agent talking to the manager — command fetch,
//! stateful push, stateless push — plus the token-lifecycle coroutine that
//! keeps all three authenticated.

mod token;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::http::{Auth, HttpClient, RequestParams, VerificationMode};
use crate::queue::{Message, MessageQueue, MessageType};
pub use token::TokenState;

/// How the communicator re-authenticates when its token expires or a
/// request comes back 401.
#[derive(Debug, Clone)]
pub enum Credentials {
    UserPassword { user: String, password: String },
    UuidAndKey { uuid: String, key: String },
}

/// Configuration knobs recognized by the communicator (§4.E).
#[derive(Debug, Clone)]
pub struct CommunicatorConfig {
    pub server_url: String,
    pub retry_interval: Duration,
    pub batch_interval: Duration,
    pub batch_size: usize,
    pub verification_mode: VerificationMode,
    pub user_agent: String,
    pub request_timeout: Duration,
}

pub struct Communicator {
    http: Arc<HttpClient>,
    queue: Arc<MessageQueue>,
    config: CommunicatorConfig,
    credentials: Credentials,
    token: Arc<RwLock<TokenState>>,
    authenticating: Arc<Mutex<()>>,
    stopped: Arc<AtomicBool>,
    cancellation: CancellationToken,
}

impl Communicator {
    pub fn new(http: Arc<HttpClient>, queue: Arc<MessageQueue>, config: CommunicatorConfig, credentials: Credentials) -> Self {
        Self {
            http,
            queue,
            config,
            credentials,
            token: Arc::new(RwLock::new(TokenState::default())),
            authenticating: Arc::new(Mutex::new(())),
            stopped: Arc::new(AtomicBool::new(false)),
            cancellation: CancellationToken::new(),
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst) || self.cancellation.is_cancelled()
    }

    /// Authenticate against the manager, serialized so at most one attempt
    /// is in flight even if several coroutines detect a 401 at once (§4.E,
    /// §5 "authentication is serialized by a mutex and a flag").
    async fn authenticate(&self) -> bool {
        let _guard = self.authenticating.lock().await;
        if self.token.read().await.remaining() > Duration::ZERO {
            return true;
        }
        let bearer = match &self.credentials {
            Credentials::UserPassword { user, password } => {
                self.http.authenticate_with_user_password(&self.config.server_url, user, password).await
            }
            Credentials::UuidAndKey { uuid, key } => {
                self.http.authenticate_with_uuid_and_key(&self.config.server_url, uuid, key).await
            }
        };
        match bearer {
            Some(bearer) => {
                self.token.write().await.set(bearer);
                true
            }
            None => false,
        }
    }

    /// A request came back 401 with `rejected_bearer` attached. Invalidate
    /// the stored token before calling `authenticate()`, so the fast path in
    /// `authenticate()` (skip if `remaining() > 0`) doesn't no-op forever on
    /// a token the manager has already rejected. If another coroutine has
    /// already replaced the token (its bearer no longer matches
    /// `rejected_bearer`), skip the clear — that 401 is stale (§4.E, §5).
    async fn reauthenticate_after_unauthorized(&self, rejected_bearer: &Option<String>) -> bool {
        {
            let mut token = self.token.write().await;
            if token.bearer == *rejected_bearer {
                token.clear();
            }
        }
        self.authenticate().await
    }

    /// `wait_for_token_expiration_and_authenticate()` (§4.E).
    pub fn spawn_token_lifecycle(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while !this.is_stopped() {
                let remaining = this.token.read().await.remaining();
                tokio::select! {
                    _ = tokio::time::sleep(remaining) => {}
                    _ = this.cancellation.cancelled() => break,
                }
                if this.is_stopped() {
                    break;
                }
                if !this.authenticate().await {
                    tokio::select! {
                        _ = tokio::time::sleep(this.config.retry_interval) => {}
                        _ = this.cancellation.cancelled() => break,
                    }
                }
            }
        })
    }

    fn request_params(&self, method: reqwest::Method, endpoint: &str, body: Option<serde_json::Value>, bearer: Option<String>) -> Option<RequestParams> {
        let url = reqwest::Url::parse(&self.config.server_url).ok()?;
        Some(RequestParams {
            method,
            host: url.host_str()?.to_owned(),
            port: url.port(),
            endpoint: endpoint.to_owned(),
            tls: url.scheme() == "https",
            auth: bearer.map(Auth::Bearer).unwrap_or(Auth::None),
            body,
            verification_mode: self.config.verification_mode,
            user_agent: self.config.user_agent.clone(),
            request_timeout: self.config.request_timeout,
        })
    }

    /// `GET /commands`: pushes each element of `commands[]` as a COMMAND
    /// message into the queue (§4.E Command fetch).
    pub fn spawn_command_fetch(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while !this.is_stopped() {
                let bearer = this.token.read().await.bearer.clone();
                let Some(params) = this.request_params(reqwest::Method::GET, "/commands", None, bearer) else {
                    tokio::time::sleep(this.config.retry_interval).await;
                    continue;
                };
                match this.http.perform(&params).await {
                    Ok((401, _)) => {
                        this.reauthenticate_after_unauthorized(&bearer).await;
                        tokio::time::sleep(this.config.retry_interval).await;
                    }
                    Ok((status, body)) if (200..300).contains(&status) => {
                        this.ingest_commands(&body).await;
                    }
                    _ => {
                        tokio::time::sleep(this.config.retry_interval).await;
                    }
                }
            }
        })
    }

    async fn ingest_commands(&self, body: &str) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else { return };
        let Some(commands) = value.get("commands").and_then(|c| c.as_array()) else { return };
        if commands.is_empty() {
            return;
        }
        let messages: Vec<Message> = commands
            .iter()
            .map(|payload| Message {
                message_type: MessageType::Command,
                module_name: "communicator".to_owned(),
                module_type: "core".to_owned(),
                metadata: None,
                payload: payload.clone(),
            })
            .collect();
        let _ = self.queue.push_awaitable(&messages).await;
    }

    fn spawn_push(self: &Arc<Self>, message_type: MessageType, endpoint: &'static str) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while !this.is_stopped() {
                let batch = match this.queue.get_next_bytes_awaitable(message_type, this.config.batch_size as i64, None).await {
                    Ok(batch) if !batch.is_empty() => batch,
                    _ => {
                        tokio::time::sleep(this.config.batch_interval).await;
                        continue;
                    }
                };
                let events: Vec<serde_json::Value> = batch.iter().map(|r| r.payload.clone()).collect();
                let body = serde_json::json!({ "events": events });
                let bearer = this.token.read().await.bearer.clone();
                let Some(params) = this.request_params(reqwest::Method::POST, endpoint, Some(body), bearer) else {
                    tokio::time::sleep(this.config.retry_interval).await;
                    continue;
                };
                match this.http.perform(&params).await {
                    Ok((401, _)) => {
                        this.reauthenticate_after_unauthorized(&bearer).await;
                    }
                    Ok((status, _)) if (200..300).contains(&status) => {
                        let _ = this.queue.pop_n(message_type, batch.len(), None).await;
                    }
                    _ => {
                        tracing::debug!(endpoint, "push batch rejected, will retry");
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(this.config.batch_interval) => {}
                    _ = this.cancellation.cancelled() => break,
                }
            }
        })
    }

    /// `queue.get_next_bytes_awaitable(STATEFUL, batch_size)` → `/events/stateful` (§4.E).
    pub fn spawn_stateful_push(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.spawn_push(MessageType::Stateful, "/events/stateful")
    }

    /// Symmetrical to `spawn_stateful_push`, targeting `/events/stateless` (§4.E).
    pub fn spawn_stateless_push(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.spawn_push(MessageType::Stateless, "/events/stateless")
    }

    /// Flips the stop flag and cancels the shared token; all three
    /// coroutines observe this between iterations and return (§4.E Stop).
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.cancellation.cancel();
    }
}

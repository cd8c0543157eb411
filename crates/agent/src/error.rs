// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types shared across the agent runtime components.

use thiserror::Error;

/// Errors surfaced by the embedded persistence layer (§4.A).
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transaction already closed")]
    TransactionClosed,
}

/// Errors surfaced by the message queue (§4.B).
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("queue is full")]
    Full,

    #[error("push timed out")]
    Timeout,
}

/// Errors surfaced by the command store (§4.C).
#[derive(Debug, Error)]
pub enum CommandStoreError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("command '{0}' already stored")]
    AlreadyStored(String),

    #[error("command '{0}' not found")]
    NotFound(String),
}

/// Errors surfaced by the HTTP client (§4.D).
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request timed out")]
    Timeout,

    #[error("unauthorized (401)")]
    Unauthorized,

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("response parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by centralized configuration (§4.K).
#[derive(Debug, Error)]
pub enum CentralizedConfigError {
    #[error("required capability '{0}' is not set")]
    CapabilityMissing(&'static str),

    #[error("no group ids provided")]
    EmptyGroupIds,

    #[error("download failed for group '{0}'")]
    DownloadFailed(String),

    #[error("validation failed for group '{0}'")]
    ValidationFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by agent info / enrollment (§4.L).
#[derive(Debug, Error)]
pub enum AgentInfoError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("invalid key: must be 32 alphanumeric characters")]
    InvalidKey,

    #[error("enrollment authentication failed")]
    AuthenticationFailed,

    #[error("enrollment request failed with status {0}")]
    EnrollmentFailed(u16),

    #[error(transparent)]
    Http(#[from] HttpError),
}

/// Errors surfaced by the single-instance lock (§4.H).
#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("another instance is already running")]
    AlreadyRunning,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported on this platform")]
    Unsupported,
}

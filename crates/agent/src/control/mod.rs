// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local Control Channel (§4.I): a Unix domain socket accepting one
//! newline-terminated text command per connection (`status`, `restart`,
//! `stop`), grounded on `other_examples/...oddjobs__crates-daemon-src-
//! listener-mod.rs`'s accept-loop-plus-spawn-per-connection shape.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

const BIND_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// The three control verbs recognized on the socket (§4.I).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Status,
    Restart,
    Stop,
}

impl ControlCommand {
    fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "status" => Some(Self::Status),
            "restart" => Some(Self::Restart),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }
}

/// Callback invoked for each parsed command; returns the text reply.
#[async_trait::async_trait]
pub trait ControlHandler: Send + Sync {
    async fn handle(&self, command: ControlCommand) -> String;
}

/// Listens on `socket_path`, retrying bind every second on failure, and
/// dispatches one command per connection until `cancellation` fires.
pub async fn run<H: ControlHandler + 'static>(socket_path: PathBuf, handler: Arc<H>, cancellation: CancellationToken) {
    loop {
        if cancellation.is_cancelled() {
            return;
        }
        match bind(&socket_path) {
            Ok(listener) => {
                accept_loop(listener, handler, cancellation.clone()).await;
                let _ = std::fs::remove_file(&socket_path);
                return;
            }
            Err(err) => {
                tracing::warn!(%err, path = %socket_path.display(), "failed to bind control socket, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(BIND_RETRY_INTERVAL) => {}
                    _ = cancellation.cancelled() => return,
                }
            }
        }
    }
}

fn bind(socket_path: &Path) -> std::io::Result<UnixListener> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(socket_path)?;
    set_socket_permissions(socket_path)?;
    Ok(listener)
}

#[cfg(unix)]
fn set_socket_permissions(socket_path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let permissions = std::fs::Permissions::from_mode(0o660);
    std::fs::set_permissions(socket_path, permissions)
}

#[cfg(not(unix))]
fn set_socket_permissions(_socket_path: &Path) -> std::io::Result<()> {
    Ok(())
}

async fn accept_loop<H: ControlHandler + 'static>(listener: UnixListener, handler: Arc<H>, cancellation: CancellationToken) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, handler.as_ref()).await {
                                tracing::debug!(%err, "control connection error");
                            }
                        });
                    }
                    Err(err) => tracing::warn!(%err, "control socket accept error"),
                }
            }
            _ = cancellation.cancelled() => return,
        }
    }
}

async fn handle_connection<H: ControlHandler>(stream: UnixStream, handler: &H) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let reply = match ControlCommand::parse(&line) {
        Some(command) => handler.handle(command).await,
        None => "error: unknown command".to_owned(),
    };
    writer.write_all(reply.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait::async_trait]
    impl ControlHandler for EchoHandler {
        async fn handle(&self, command: ControlCommand) -> String {
            match command {
                ControlCommand::Status => "running".to_owned(),
                ControlCommand::Restart => "restarting".to_owned(),
                ControlCommand::Stop => "stopping".to_owned(),
            }
        }
    }

    #[test]
    fn parses_known_commands_only() {
        assert_eq!(ControlCommand::parse("status\n"), Some(ControlCommand::Status));
        assert_eq!(ControlCommand::parse("stop"), Some(ControlCommand::Stop));
        assert_eq!(ControlCommand::parse("bogus"), None);
    }

    #[tokio::test]
    async fn round_trips_a_status_request() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let socket_path = dir.path().join("agent.sock");
        let cancellation = CancellationToken::new();

        let server = tokio::spawn(run(socket_path.clone(), Arc::new(EchoHandler), cancellation.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut stream = UnixStream::connect(&socket_path).await.unwrap_or_else(|e| panic!("connect: {e}"));
        stream.write_all(b"status\n").await.unwrap_or_else(|e| panic!("write: {e}"));
        let mut reader = BufReader::new(stream);
        let mut reply = String::new();
        reader.read_line(&mut reply).await.unwrap_or_else(|e| panic!("read: {e}"));
        assert_eq!(reply.trim(), "running");

        cancellation.cancel();
        let _ = server.await;
    }
}

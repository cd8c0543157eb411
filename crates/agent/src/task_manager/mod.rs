// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task Manager (§4.G): a cooperative scheduler abstraction over a thread
//! pool (or a single-thread executor, for parity with a hypothetical
//! Windows-service entrypoint). Owns the tokio runtime the rest of the
//! agent's coroutines are spawned onto.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::runtime::{Handle, Runtime};
use tokio_util::sync::CancellationToken;

/// Execution mode: a worker-thread pool, or the caller's current-thread
/// runtime (§4.G: "single-thread mode, used by the Windows service main
/// thread").
enum Executor {
    ThreadPool(Runtime),
    CurrentThread(Handle),
}

/// Cooperative scheduler owning either a thread pool or the calling
/// current-thread runtime. Calling `start_thread_pool`/`run_single_thread`
/// a second time is a no-op with a warning (§4.G).
pub struct TaskManager {
    executor: std::sync::Mutex<Option<Executor>>,
    started: AtomicBool,
    cancellation: CancellationToken,
}

impl TaskManager {
    pub fn new() -> Self {
        Self { executor: std::sync::Mutex::new(None), started: AtomicBool::new(false), cancellation: CancellationToken::new() }
    }

    /// Start a worker-thread pool of size `n`.
    pub fn start_thread_pool(&self, n: usize) -> std::io::Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("task manager already started, ignoring start_thread_pool");
            return Ok(());
        }
        let runtime = tokio::runtime::Builder::new_multi_thread().worker_threads(n.max(1)).enable_all().build()?;
        *self.executor.lock().unwrap_or_else(|e| e.into_inner()) = Some(Executor::ThreadPool(runtime));
        Ok(())
    }

    /// Run on the caller's current-thread runtime instead of spawning a pool.
    pub fn run_single_thread(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("task manager already started, ignoring run_single_thread");
            return;
        }
        *self.executor.lock().unwrap_or_else(|e| e.into_inner()) = Some(Executor::CurrentThread(Handle::current()));
    }

    /// Post a plain function for execution; panics are caught and logged
    /// with the task id rather than unwinding the executor (§4.G).
    pub fn enqueue_task(&self, task_id: &str, f: impl FnOnce() + Send + 'static) {
        let task_id = task_id.to_owned();
        let handle = self.handle();
        handle.spawn_blocking(move || {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).is_err() {
                tracing::error!(task_id, "task panicked");
            }
        });
    }

    /// Post an async task; errors escaping user code are logged with the task id.
    pub fn enqueue_coroutine<F>(&self, task_id: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task_id = task_id.to_owned();
        let cancellation = self.cancellation.clone();
        self.handle().spawn(async move {
            tokio::select! {
                () = future => {}
                () = cancellation.cancelled() => {
                    tracing::debug!(task_id, "coroutine cancelled by task manager stop");
                }
            }
        })
    }

    /// A cancellable timer bound to the executor; `stop()` cancels all
    /// outstanding timers (§4.G).
    pub async fn create_steady_timer(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancellation.cancelled() => false,
        }
    }

    fn handle(&self) -> Handle {
        match self.executor.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(Executor::ThreadPool(runtime)) => runtime.handle().clone(),
            Some(Executor::CurrentThread(handle)) => handle.clone(),
            None => Handle::current(),
        }
    }

    /// Cancel outstanding timers/coroutines. Safe to call from any thread
    /// and multiple times (§4.G).
    pub fn stop(&self) {
        self.cancellation.cancel();
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience wrapper matching the spec's `Arc<TaskManager>` ownership
/// shape used by the runtime wiring in `lib.rs`.
pub type SharedTaskManager = Arc<TaskManager>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_cancels_steady_timer() {
        let manager = TaskManager::new();
        manager.stop();
        let completed = manager.create_steady_timer(Duration::from_secs(60)).await;
        assert!(!completed, "a timer started after stop() must not complete normally");
    }

    #[tokio::test]
    async fn enqueue_coroutine_runs_to_completion() {
        let manager = TaskManager::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        manager.enqueue_coroutine("probe", async move {
            let _ = tx.send(());
        });
        rx.await.unwrap_or_else(|e| panic!("coroutine did not run: {e}"));
    }
}

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::TaskError;
use crate::guard::{ShutdownGuard, ShutdownSignal};

struct TrackedTask {
    name: String,
    handle: JoinHandle<()>,
}

struct Shared {
    tasks: Mutex<Vec<TrackedTask>>,
    failures: Mutex<Vec<TaskError>>,
    shutdown_tx: watch::Sender<bool>,
}

/// Owns the shutdown signal and the set of tasks spawned against it.
/// Reconstructed from call sites across `bin/strata-client/src/main.rs`
/// and the worker functions it hands a `ShutdownGuard`/`ShutdownSignal` to
/// (`TaskManager::new`, `.executor()`, `.shutdown_signal()`,
/// `.start_signal_listeners()`, `.monitor(..)`) -- the teacher's own
/// `strata_tasks`/`express_tasks` crate is an external dependency with no
/// source in this retrieval pack.
pub struct TaskManager {
    handle: Handle,
    shutdown_rx: watch::Receiver<bool>,
    shared: Arc<Shared>,
}

impl TaskManager {
    pub fn new(handle: Handle) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            handle,
            shutdown_rx,
            shared: Arc::new(Shared {
                tasks: Mutex::new(Vec::new()),
                failures: Mutex::new(Vec::new()),
                shutdown_tx,
            }),
        }
    }

    pub fn executor(&self) -> TaskExecutor {
        TaskExecutor {
            handle: self.handle.clone(),
            shutdown_rx: self.shutdown_rx.clone(),
            shared: self.shared.clone(),
        }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal::new(self.shared.shutdown_tx.clone())
    }

    pub fn shutdown_guard(&self) -> ShutdownGuard {
        ShutdownGuard::new(self.shutdown_rx.clone())
    }

    /// Spawns a task that requests shutdown on Ctrl-C (and, on unix, on
    /// SIGTERM too).
    pub fn start_signal_listeners(&self) {
        let shutdown_tx = self.shared.shutdown_tx.clone();
        self.handle.spawn(async move {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        tokio::select! {
                            _ = tokio::signal::ctrl_c() => {}
                            _ = sigterm.recv() => {}
                        }
                    }
                    Err(err) => {
                        warn!(%err, "failed to install SIGTERM listener, watching Ctrl-C only");
                        let _ = tokio::signal::ctrl_c().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        });
    }

    /// Blocks until shutdown is requested (externally, by a signal
    /// listener, or by a critical task's own failure), then waits a brief
    /// grace period for tasks to observe it and exit. Returns the first
    /// recorded critical-task failure, if any.
    pub async fn monitor(&self, poll_interval: Option<Duration>) -> Result<(), TaskError> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        while !*shutdown_rx.borrow() {
            match poll_interval {
                Some(interval) => {
                    tokio::select! {
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(interval) => {
                            let running = self.shared.tasks.lock().iter().filter(|t| !t.handle.is_finished()).count();
                            info!(running, "task manager monitor tick");
                        }
                    }
                }
                None => {
                    let _ = shutdown_rx.changed().await;
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        for task in self.shared.tasks.lock().iter() {
            if !task.handle.is_finished() {
                warn!(name = %task.name, "task still running after shutdown grace period");
            }
        }

        let mut failures = self.shared.failures.lock();
        if let Some(err) = failures.drain(..).next() {
            return Err(err);
        }
        Ok(())
    }
}

/// Spawns tasks against a shared [`TaskManager`]'s shutdown signal and
/// failure ledger. Cheap to clone and hand to independent subsystem
/// setup functions, matching the teacher's `&executor` call sites.
#[derive(Clone)]
pub struct TaskExecutor {
    handle: Handle,
    shutdown_rx: watch::Receiver<bool>,
    shared: Arc<Shared>,
}

impl TaskExecutor {
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn shutdown_guard(&self) -> ShutdownGuard {
        ShutdownGuard::new(self.shutdown_rx.clone())
    }

    /// Spawns an async task. A task's own failure is fatal to the whole
    /// manager: the error is recorded and shutdown is requested for every
    /// other task.
    pub fn spawn_critical_async<F, E>(&self, name: impl Into<String>, fut: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let name = name.into();
        let shared = self.shared.clone();
        let task_name = name.clone();
        let handle = self.handle.spawn(async move {
            match fut.await {
                Ok(()) => info!(task = %task_name, "critical task exited cleanly"),
                Err(err) => {
                    error!(task = %task_name, %err, "critical task failed, requesting shutdown");
                    shared.failures.lock().push(TaskError::Critical {
                        name: task_name.clone(),
                        message: err.to_string(),
                    });
                    let _ = shared.shutdown_tx.send(true);
                }
            }
        });
        self.shared.tasks.lock().push(TrackedTask { name, handle });
    }

    /// Spawns a blocking task body, handed a [`ShutdownGuard`] so it can
    /// poll for shutdown inside a loop with no `.await` points.
    pub fn spawn_critical<F, E>(&self, name: impl Into<String>, f: F)
    where
        F: FnOnce(ShutdownGuard) -> Result<(), E> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let name = name.into();
        let guard = ShutdownGuard::new(self.shutdown_rx.clone());
        let shared = self.shared.clone();
        let task_name = name.clone();
        let handle = self.handle.spawn_blocking(move || match f(guard) {
            Ok(()) => info!(task = %task_name, "critical task exited cleanly"),
            Err(err) => {
                error!(task = %task_name, %err, "critical task failed, requesting shutdown");
                shared.failures.lock().push(TaskError::Critical {
                    name: task_name.clone(),
                    message: err.to_string(),
                });
                let _ = shared.shutdown_tx.send(true);
            }
        });
        self.shared.tasks.lock().push(TrackedTask { name, handle });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn critical_async_failure_records_error_and_requests_shutdown() {
        let manager = TaskManager::new(Handle::current());
        let executor = manager.executor();
        executor.spawn_critical_async::<_, String>("boom", async { Err("kaboom".to_string()) });

        let result = manager.monitor(None).await;
        assert!(matches!(result, Err(TaskError::Critical { .. })));
    }

    #[tokio::test]
    async fn monitor_returns_ok_when_shutdown_requested_cleanly() {
        let manager = TaskManager::new(Handle::current());
        let signal = manager.shutdown_signal();
        signal.send();
        assert!(manager.monitor(None).await.is_ok());
    }

    #[tokio::test]
    async fn spawn_critical_sync_observes_shutdown_guard() {
        let manager = TaskManager::new(Handle::current());
        let executor = manager.executor();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();

        let rt = Handle::current();
        executor.spawn_critical::<_, String>("sync-loop", move |mut guard| {
            rt.block_on(guard.wait_for_shutdown());
            ran_clone.store(true, Ordering::SeqCst);
            Ok(())
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.shutdown_signal().send();
        assert!(manager.monitor(None).await.is_ok());
        assert!(ran.load(Ordering::SeqCst));
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::thread;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{panic_message, ExportWorker, WorkerCore, WorkerState};
use crate::errors::{Creation, WorkerError};
use crate::timeout::Timeout;

/// Export worker running as a task on a multi-thread tokio runtime.
///
/// Each export call runs on the runtime's blocking pool so a slow exporter
/// never stalls the async workers. Passes are awaited one after the other,
/// which keeps a single reader on the buffer.
///
/// The runtime needs its time driver enabled for the scheduled delay.
pub struct TaskWorker<T> {
    shared: Arc<Shared<T>>,
    runtime: Handle,
}

struct Shared<T> {
    core: WorkerCore<T>,
    trigger: Notify,
    shutdown: CancellationToken,
    stopped: CancellationToken,
    exported: watch::Sender<u64>,
}

impl<T: Send + 'static> TaskWorker<T> {
    /// Binds the worker to the runtime the caller is running in.
    pub fn new(core: WorkerCore<T>) -> Result<Self, Creation> {
        let runtime = Handle::try_current().map_err(|e| {
            Creation::UnsupportedRuntime(format!("task worker needs a tokio runtime: {e}"))
        })?;
        Self::with_runtime(core, runtime)
    }

    pub fn with_runtime(core: WorkerCore<T>, runtime: Handle) -> Result<Self, Creation> {
        if runtime.runtime_flavor() != RuntimeFlavor::MultiThread {
            return Err(Creation::UnsupportedRuntime(format!(
                "task worker needs a multi-thread runtime, got {:?}",
                runtime.runtime_flavor()
            )));
        }

        let (exported, _) = watch::channel(0);
        Ok(Self {
            shared: Arc::new(Shared {
                core,
                trigger: Notify::new(),
                shutdown: CancellationToken::new(),
                stopped: CancellationToken::new(),
                exported,
            }),
            runtime,
        })
    }

    /// Async counterpart of [`ExportWorker::wait_for_export`].
    pub async fn wait_for_export_async(&self, timeout: Timeout) -> bool {
        let shared = &self.shared;
        let core = &shared.core;
        let Some(target) = core.flush_target() else {
            return true;
        };

        if !self.trigger_export()
            && (shared.stopped.is_cancelled() || core.is_flush_cut_short(target))
        {
            return false;
        }

        if timeout.is_zero() {
            return false;
        }

        let mut exported = shared.exported.subscribe();
        let poll_interval = core.settings().poll_interval;
        let deadline = timeout.deadline();
        loop {
            if core.buffer().removed_count() >= target {
                return true;
            }
            if shared.stopped.is_cancelled() || core.is_flush_cut_short(target) {
                return false;
            }
            if deadline.is_expired() {
                return false;
            }

            tokio::select! {
                _ = exported.changed() => {}
                _ = shared.stopped.cancelled() => {}
                _ = tokio::time::sleep(deadline.slice(poll_interval)) => {}
            }
        }
    }

    /// Async counterpart of [`ExportWorker::shutdown`].
    pub async fn shutdown_async(&self, timeout: Timeout) -> bool {
        if self.signal_shutdown(timeout) {
            return true;
        }
        self.wait_stopped(timeout).await
    }

    /// Fixes the drain target and wakes the loop. Returns true when there is
    /// nothing left to wait for.
    fn signal_shutdown(&self, timeout: Timeout) -> bool {
        let running = self.shared.core.request_shutdown();
        self.shared.shutdown.cancel();
        !running || timeout.is_zero() || self.shared.stopped.is_cancelled()
    }

    async fn wait_stopped(&self, timeout: Timeout) -> bool {
        match timeout.deadline().remaining() {
            None => {
                self.shared.stopped.cancelled().await;
                true
            }
            Some(remaining) => {
                tokio::time::timeout(remaining, self.shared.stopped.cancelled())
                    .await
                    .is_ok()
            }
        }
    }

    /// Runs `future` to completion from synchronous code.
    ///
    /// Inside a multi-thread runtime the current worker is handed off with
    /// `block_in_place`. A current-thread runtime cannot block, so the future
    /// runs on a scoped helper thread instead.
    fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send,
        F::Output: Send,
    {
        match Handle::try_current() {
            Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| current.block_on(future))
            }
            Ok(_) => thread::scope(|scope| {
                scope
                    .spawn(|| self.runtime.block_on(future))
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            }),
            Err(_) => self.runtime.block_on(future),
        }
    }
}

impl<T: Send + 'static> Shared<T> {
    async fn run(self: Arc<Self>) {
        debug!(
            exporter = self.core.exporter_name(),
            "Export worker task started"
        );

        loop {
            if self.core.should_wait() && !self.shutdown.is_cancelled() {
                tokio::select! {
                    _ = self.trigger.notified() => {}
                    _ = tokio::time::sleep(self.core.settings().scheduled_delay) => {}
                    _ = self.shutdown.cancelled() => {}
                }
            }

            let shared = Arc::clone(&self);
            if let Err(e) = tokio::task::spawn_blocking(move || shared.core.export_pass()).await {
                let reason = if e.is_panic() {
                    panic_message(e.into_panic().as_ref())
                } else {
                    e.to_string()
                };
                error!(
                    exporter = self.core.exporter_name(),
                    "Export worker stopped after an unexpected failure: {reason}"
                );
                break;
            }
            self.exported.send_modify(|generation| *generation += 1);

            if self.core.is_drained() {
                break;
            }
        }

        debug!(
            exporter = self.core.exporter_name(),
            "Export worker task stopped"
        );
    }
}

/// Moved into the spawned loop future so the worker reads as stopped however
/// that future ends, including a panic or its runtime dropping it unpolled.
struct StopGuard<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Drop for StopGuard<T> {
    fn drop(&mut self) {
        self.shared.core.mark_stopped();
        self.shared.stopped.cancel();
    }
}

impl<T: Send + 'static> ExportWorker<T> for TaskWorker<T> {
    fn start(&self) -> Result<(), WorkerError> {
        self.shared.core.mark_started()?;
        let guard = StopGuard {
            shared: Arc::clone(&self.shared),
        };
        self.runtime.spawn(async move {
            Arc::clone(&guard.shared).run().await;
            drop(guard);
        });
        Ok(())
    }

    fn trigger_export(&self) -> bool {
        if self.shared.core.is_shutdown_requested()
            || self.shared.core.state() == WorkerState::Stopped
        {
            return false;
        }
        // a stored permit makes repeated triggers collapse into one wake
        self.shared.trigger.notify_one();
        true
    }

    fn wait_for_export(&self, timeout: Timeout) -> bool {
        let core = &self.shared.core;
        let Some(target) = core.flush_target() else {
            return true;
        };
        // the runtime may be gone along with the loop, so answer without it
        if self.shared.stopped.is_cancelled() {
            return core.buffer().removed_count() >= target;
        }
        self.block_on(self.wait_for_export_async(timeout))
    }

    fn shutdown(&self, timeout: Timeout) -> bool {
        if self.signal_shutdown(timeout) {
            return true;
        }
        self.block_on(self.wait_stopped(timeout))
    }

    fn state(&self) -> WorkerState {
        self.shared.core.state()
    }

    fn shutdown_drain_target(&self) -> Option<u64> {
        self.shared.core.shutdown_drain_target()
    }
}

impl<T> fmt::Debug for TaskWorker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskWorker")
            .field("core", &self.shared.core)
            .field("stopped", &self.shared.stopped.is_cancelled())
            .finish_non_exhaustive()
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle, Thread};
use std::time::Instant;

use tracing::{debug, error};

use super::sync::Notifier;
use super::{panic_message, ExportWorker, WorkerCore, WorkerState};
use crate::errors::WorkerError;
use crate::timeout::Timeout;

/// Export worker backed by a dedicated OS thread.
///
/// The thread parks between passes. A trigger is an atomic flag plus an
/// unpark, which behaves like an auto-reset event: any number of triggers
/// raised before the thread wakes collapse into one pass. Shutdown is a
/// sticky flag, so once set the thread stops parking and keeps exporting
/// until the drain target is reached.
pub struct ThreadWorker<T> {
    shared: Arc<Shared<T>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct Shared<T> {
    core: WorkerCore<T>,
    export_requested: AtomicBool,
    shutdown_requested: AtomicBool,
    thread: OnceLock<Thread>,
    notifier: Notifier,
}

impl<T: Send + 'static> ThreadWorker<T> {
    pub fn new(core: WorkerCore<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                core,
                export_requested: AtomicBool::new(false),
                shutdown_requested: AtomicBool::new(false),
                thread: OnceLock::new(),
                notifier: Notifier::default(),
            }),
            handle: Mutex::new(None),
        }
    }

    fn join(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            // the loop catches exporter panics itself, so join only fails
            // if the bookkeeping after the loop panicked
            if handle.join().is_err() {
                error!("Export worker thread terminated abnormally");
            }
        }
    }
}

impl<T> Shared<T> {
    fn wake(&self) {
        if let Some(thread) = self.thread.get() {
            thread.unpark();
        }
    }

    fn run(&self) {
        let _ = self.thread.set(thread::current());
        debug!(
            exporter = self.core.exporter_name(),
            "Export worker thread started"
        );

        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.export_loop())) {
            error!(
                exporter = self.core.exporter_name(),
                "Export worker stopped after an unexpected failure: {}",
                panic_message(panic.as_ref())
            );
        }

        self.core.mark_stopped();
        self.notifier.stop();
        debug!(
            exporter = self.core.exporter_name(),
            "Export worker thread stopped"
        );
    }

    fn export_loop(&self) {
        loop {
            if self.core.should_wait() {
                self.wait_for_work();
            }

            self.core.export_pass();
            self.notifier.pulse();

            if self.core.is_drained() {
                break;
            }
        }
    }

    /// Parks until a trigger, shutdown, or the scheduled delay elapses.
    fn wait_for_work(&self) {
        let deadline = Instant::now() + self.core.settings().scheduled_delay;
        loop {
            if self.export_requested.swap(false, Ordering::AcqRel)
                || self.shutdown_requested.load(Ordering::Acquire)
            {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            // spurious wakeups land back here and re-check the flags
            thread::park_timeout(deadline - now);
        }
    }
}

impl<T: Send + 'static> ExportWorker<T> for ThreadWorker<T> {
    fn start(&self) -> Result<(), WorkerError> {
        self.shared.core.mark_started()?;

        let shared = Arc::clone(&self.shared);
        let name = format!("batch-export-{}", self.shared.core.exporter_name());
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || shared.run())
            .map_err(|e| {
                self.shared.core.mark_stopped();
                self.shared.notifier.stop();
                WorkerError::Spawn(e.to_string())
            })?;

        let _ = self.shared.thread.set(handle.thread().clone());
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    fn trigger_export(&self) -> bool {
        if self.shared.core.is_shutdown_requested()
            || self.shared.core.state() == WorkerState::Stopped
        {
            return false;
        }
        self.shared.export_requested.store(true, Ordering::Release);
        self.shared.wake();
        true
    }

    fn wait_for_export(&self, timeout: Timeout) -> bool {
        let core = &self.shared.core;
        let Some(target) = core.flush_target() else {
            return true;
        };

        // during shutdown the loop keeps exporting on its own, so a refused
        // trigger only matters once the drain target falls short
        if !self.trigger_export()
            && (self.shared.notifier.is_stopped() || core.is_flush_cut_short(target))
        {
            return false;
        }

        if timeout.is_zero() {
            return false;
        }

        let poll_interval = core.settings().poll_interval;
        let deadline = timeout.deadline();
        loop {
            if deadline.is_expired() {
                return core.buffer().removed_count() >= target;
            }

            // the loop may have pulsed before this wait started, so never
            // wait longer than one polling slice
            let seen = self.shared.notifier.generation();
            if core.buffer().removed_count() >= target {
                return true;
            }
            self.shared
                .notifier
                .wait_pulse(seen, deadline.slice(poll_interval));

            if core.buffer().removed_count() >= target {
                return true;
            }
            if self.shared.notifier.is_stopped() || core.is_flush_cut_short(target) {
                return false;
            }
        }
    }

    fn shutdown(&self, timeout: Timeout) -> bool {
        let running = self.shared.core.request_shutdown();
        self.shared.shutdown_requested.store(true, Ordering::Release);
        self.shared.wake();

        if !running {
            return true;
        }

        if timeout.is_zero() {
            return true;
        }
        // an unrepresentable deadline has no remaining bound and waits forever
        let stopped = self
            .shared
            .notifier
            .wait_stopped(timeout.deadline().remaining());
        if stopped {
            self.join();
        }
        stopped
    }

    fn state(&self) -> WorkerState {
        self.shared.core.state()
    }

    fn shutdown_drain_target(&self) -> Option<u64> {
        self.shared.core.shutdown_drain_target()
    }
}

impl<T> fmt::Debug for ThreadWorker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadWorker")
            .field("core", &self.shared.core)
            .finish_non_exhaustive()
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background drain loop that turns buffered items into export calls.
//!
//! Two interchangeable backends implement [`ExportWorker`]:
//! - [`thread::ThreadWorker`] owns a dedicated OS thread that parks between
//!   passes.
//! - [`task::TaskWorker`] runs as a tokio task and hands each export call to
//!   the blocking pool.
//!
//! Both share [`WorkerCore`], which holds the buffer, the exporter, the
//! shutdown drain target and the state machine, so the loop body is the same
//! in either case: wait for a trigger, the scheduled delay or shutdown (unless
//! a full batch is already waiting), export one batch, notify waiters, and
//! stop once the drain target is reached.

pub mod sync;
pub mod task;
pub mod thread;

use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, error};

use crate::batch::Batch;
use crate::errors::{Creation, WorkerError};
use crate::exporter::{ExportResult, Exporter};
use crate::ring_buffer::RingBuffer;
use crate::timeout::Timeout;

/// Drain target before shutdown is requested.
const UNBOUNDED: u64 = u64::MAX;

pub trait ExportWorker<T>: Send + Sync {
    /// Launches the background drain context. Only the first call succeeds.
    fn start(&self) -> Result<(), WorkerError>;

    /// Asks for an export pass as soon as possible.
    ///
    /// Triggers coalesce into a single pending wake. Returns false once
    /// shutdown has been requested.
    fn trigger_export(&self) -> bool;

    /// Waits until every item added before this call has been exported.
    fn wait_for_export(&self, timeout: Timeout) -> bool;

    /// Fixes the drain target and waits for the loop to exit.
    ///
    /// A zero timeout only signals. The loop keeps draining in the
    /// background when the timeout expires first.
    fn shutdown(&self, timeout: Timeout) -> bool;

    fn state(&self) -> WorkerState;

    /// Added count captured when shutdown was first requested.
    fn shutdown_drain_target(&self) -> Option<u64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Created = 0,
    Running = 1,
    ShuttingDown = 2,
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Created,
            1 => WorkerState::Running,
            2 => WorkerState::ShuttingDown,
            _ => WorkerState::Stopped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Thread,
    Task,
}

impl WorkerKind {
    /// Picks the task worker inside a multi-thread tokio runtime and a
    /// dedicated thread everywhere else.
    pub fn detect() -> Self {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                WorkerKind::Task
            }
            _ => WorkerKind::Thread,
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Thread => write!(f, "thread"),
            WorkerKind::Task => write!(f, "task"),
        }
    }
}

impl FromStr for WorkerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "thread" => Ok(WorkerKind::Thread),
            "task" => Ok(WorkerKind::Task),
            other => Err(format!("unknown worker kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub max_export_batch_size: usize,
    pub scheduled_delay: Duration,
    pub exporter_timeout: Duration,
    pub poll_interval: Duration,
}

/// State shared by both worker backends.
pub struct WorkerCore<T> {
    buffer: Arc<RingBuffer<T>>,
    exporter: Arc<dyn Exporter<T>>,
    settings: WorkerSettings,
    shutdown_drain_target: AtomicU64,
    state: AtomicU8,
}

impl<T> WorkerCore<T> {
    pub fn new(
        buffer: Arc<RingBuffer<T>>,
        exporter: Arc<dyn Exporter<T>>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            buffer,
            exporter,
            settings,
            shutdown_drain_target: AtomicU64::new(UNBOUNDED),
            state: AtomicU8::new(WorkerState::Created as u8),
        }
    }

    pub fn buffer(&self) -> &RingBuffer<T> {
        &self.buffer
    }

    pub fn exporter_name(&self) -> &str {
        self.exporter.name()
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn mark_started(&self) -> Result<(), WorkerError> {
        match self.transition(WorkerState::Created, WorkerState::Running) {
            Ok(()) => Ok(()),
            Err(WorkerState::Running | WorkerState::ShuttingDown) => {
                Err(WorkerError::AlreadyStarted)
            }
            Err(_) => Err(WorkerError::NotRunning),
        }
    }

    pub(crate) fn mark_stopped(&self) {
        self.state.store(WorkerState::Stopped as u8, Ordering::Release);
    }

    /// Fixes the drain target to the current added count, once.
    ///
    /// Returns true if a drain loop was running (or starting) and has to be
    /// waited for.
    pub(crate) fn request_shutdown(&self) -> bool {
        let _ = self.shutdown_drain_target.compare_exchange(
            UNBOUNDED,
            self.buffer.added_count(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        // never started: nothing will ever drain, so stop right away
        if self
            .transition(WorkerState::Created, WorkerState::Stopped)
            .is_ok()
        {
            return false;
        }
        let _ = self.transition(WorkerState::Running, WorkerState::ShuttingDown);
        true
    }

    pub fn shutdown_drain_target(&self) -> Option<u64> {
        match self.shutdown_drain_target.load(Ordering::Acquire) {
            UNBOUNDED => None,
            target => Some(target),
        }
    }

    pub(crate) fn is_shutdown_requested(&self) -> bool {
        self.shutdown_drain_target().is_some()
    }

    /// Only wait for a trigger while less than a full batch is queued.
    pub(crate) fn should_wait(&self) -> bool {
        self.buffer.count() < self.settings.max_export_batch_size as u64
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.buffer.removed_count() >= self.shutdown_drain_target.load(Ordering::Acquire)
    }

    /// Added count to wait for in a flush, or `None` when nothing is pending.
    pub(crate) fn flush_target(&self) -> Option<u64> {
        let removed = self.buffer.removed_count();
        let added = self.buffer.added_count();
        (added > removed).then_some(added)
    }

    /// Whether a flush waiting for `target` can no longer succeed because
    /// shutdown stopped short of it.
    pub(crate) fn is_flush_cut_short(&self, target: u64) -> bool {
        matches!(self.shutdown_drain_target(), Some(drain) if drain < target)
    }

    /// Forms one batch and hands it to the exporter.
    ///
    /// Must only run on the drain loop, the buffer's single reader.
    pub(crate) fn export_pass(&self) {
        if self.buffer.is_empty() {
            return;
        }

        let mut batch = match Batch::from_buffer(&self.buffer, self.settings.max_export_batch_size)
        {
            Ok(batch) => batch,
            Err(e) => {
                error!("Failed to reserve export batch: {e}");
                return;
            }
        };

        let len = batch.len();
        debug!("Exporting batch of {len} items");
        match self
            .exporter
            .export(&mut batch, self.settings.exporter_timeout)
        {
            ExportResult::Success => {}
            ExportResult::Failure => {
                debug!(
                    exporter = self.exporter.name(),
                    "Export of {len} items failed, batch dropped"
                );
            }
        }
        // dropping the batch drains whatever the exporter left behind
    }

    fn transition(&self, from: WorkerState, to: WorkerState) -> Result<(), WorkerState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(WorkerState::from_u8)
    }
}

impl<T> fmt::Debug for WorkerCore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerCore")
            .field("exporter", &self.exporter.name())
            .field("buffer", &self.buffer)
            .field("settings", &self.settings)
            .field("state", &self.state())
            .field("shutdown_drain_target", &self.shutdown_drain_target())
            .finish()
    }
}

/// Builds the requested backend without starting it.
pub fn build<T: Send + 'static>(
    kind: WorkerKind,
    core: WorkerCore<T>,
    runtime: Option<Handle>,
) -> Result<Box<dyn ExportWorker<T>>, Creation> {
    match kind {
        WorkerKind::Thread => Ok(Box::new(thread::ThreadWorker::new(core))),
        WorkerKind::Task => {
            let worker = match runtime {
                Some(handle) => task::TaskWorker::with_runtime(core, handle)?,
                None => task::TaskWorker::new(core)?,
            };
            Ok(Box::new(worker))
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

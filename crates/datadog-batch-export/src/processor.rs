// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Producer-facing entry point of the pipeline.
//!
//! [`BatchExportProcessor`] owns the staging buffer and the export worker.
//! Producers hand finished items to [`BatchExportProcessor::on_end`], which
//! never blocks: when the buffer is full or too contended the item is dropped
//! and counted. The worker exports in the background, and callers can force a
//! flush or shut the pipeline down within a deadline.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::config::BatchExportConfig;
use crate::constants::DEFAULT_MAX_SPIN_COUNT;
use crate::errors::Creation;
use crate::exporter::Exporter;
use crate::ring_buffer::RingBuffer;
use crate::timeout::Timeout;
use crate::worker::{self, ExportWorker, WorkerCore, WorkerKind, WorkerState};

pub struct BatchExportProcessor<T> {
    buffer: Arc<RingBuffer<T>>,
    exporter: Arc<dyn Exporter<T>>,
    worker: Box<dyn ExportWorker<T>>,
    worker_kind: WorkerKind,
    max_export_batch_size: u64,
    dropped_count: AtomicU64,
    shutdown_called: AtomicBool,
}

impl<T: Send + 'static> BatchExportProcessor<T> {
    /// Validates `config`, then builds and starts the export worker.
    ///
    /// Without an explicit `worker_kind` the task worker is used inside a
    /// multi-thread tokio runtime and a dedicated thread otherwise.
    pub fn new(exporter: Arc<dyn Exporter<T>>, config: BatchExportConfig) -> Result<Self, Creation> {
        config.validate()?;
        let kind = config.worker_kind.unwrap_or_else(WorkerKind::detect);
        Self::build(exporter, &config, kind, None)
    }

    /// Runs the export worker as a task on `runtime`, whatever
    /// `config.worker_kind` says.
    pub fn with_runtime(
        exporter: Arc<dyn Exporter<T>>,
        config: BatchExportConfig,
        runtime: Handle,
    ) -> Result<Self, Creation> {
        config.validate()?;
        Self::build(exporter, &config, WorkerKind::Task, Some(runtime))
    }

    fn build(
        exporter: Arc<dyn Exporter<T>>,
        config: &BatchExportConfig,
        kind: WorkerKind,
        runtime: Option<Handle>,
    ) -> Result<Self, Creation> {
        let buffer = Arc::new(RingBuffer::new(config.max_queue_size)?);
        let core = WorkerCore::new(
            Arc::clone(&buffer),
            Arc::clone(&exporter),
            config.worker_settings(),
        );
        let worker = worker::build(kind, core, runtime)?;
        worker.start()?;

        debug!(
            exporter = exporter.name(),
            "Started batch export processor with {kind} worker, queue size {}, batch size {}",
            config.max_queue_size,
            config.max_export_batch_size
        );

        Ok(Self {
            buffer,
            exporter,
            worker,
            worker_kind: kind,
            max_export_batch_size: config.max_export_batch_size as u64,
            dropped_count: AtomicU64::new(0),
            shutdown_called: AtomicBool::new(false),
        })
    }

    /// Enqueues a finished item for export.
    ///
    /// A full batch wakes the worker right away. Items that cannot be queued
    /// are dropped and show up in [`dropped_count`](Self::dropped_count).
    pub fn on_end(&self, item: T) {
        match self.buffer.try_add(item, DEFAULT_MAX_SPIN_COUNT) {
            Ok(()) => {
                if self.buffer.count() >= self.max_export_batch_size {
                    self.worker.trigger_export();
                }
            }
            Err(_dropped) => {
                self.dropped_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Waits until everything queued before this call is exported, then
    /// flushes the exporter with whatever time is left.
    pub fn force_flush(&self, timeout: Timeout) -> bool {
        let deadline = timeout.deadline();
        if !self.worker.wait_for_export(timeout) {
            return false;
        }
        self.exporter.force_flush(deadline.as_timeout())
    }

    /// Drains the queue and shuts the exporter down.
    ///
    /// Only the first call has an effect. Later calls return false.
    pub fn shutdown(&self, timeout: Timeout) -> bool {
        if self.shutdown_called.swap(true, Ordering::AcqRel) {
            return false;
        }

        let deadline = timeout.deadline();
        let drained = self.worker.shutdown(timeout);
        if !drained {
            warn!(
                exporter = self.exporter.name(),
                "Batch export shutdown timed out with {} items still queued",
                self.buffer.count()
            );
        }
        let exporter_closed = self.exporter.shutdown(deadline.as_timeout());
        drained && exporter_closed
    }
}

impl<T> BatchExportProcessor<T> {
    /// Items rejected because the queue was full or too contended.
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    /// Every item passed to `on_end`, queued or dropped.
    pub fn received_count(&self) -> u64 {
        self.buffer.added_count() + self.dropped_count()
    }

    /// Items taken out of the queue by the worker, exported or not.
    pub fn processed_count(&self) -> u64 {
        self.buffer.removed_count()
    }

    pub fn queue_len(&self) -> u64 {
        self.buffer.count()
    }

    pub fn worker_kind(&self) -> WorkerKind {
        self.worker_kind
    }

    pub fn worker_state(&self) -> WorkerState {
        self.worker.state()
    }

    pub fn shutdown_drain_target(&self) -> Option<u64> {
        self.worker.shutdown_drain_target()
    }
}

impl<T> Drop for BatchExportProcessor<T> {
    fn drop(&mut self) {
        if !self.shutdown_called.swap(true, Ordering::AcqRel) {
            self.worker.shutdown(Timeout::ZERO);
        }
    }
}

impl<T> fmt::Debug for BatchExportProcessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchExportProcessor")
            .field("exporter", &self.exporter.name())
            .field("worker_kind", &self.worker_kind)
            .field("queue_len", &self.queue_len())
            .field("dropped_count", &self.dropped_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::batch::Batch;
    use crate::errors::Range;
    use crate::exporter::ExportResult;
    use std::sync::{mpsc, Mutex};
    use std::time::Duration;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct Collecting {
        items: Mutex<Vec<u32>>,
        flushes: AtomicU64,
        shutdowns: AtomicU64,
    }

    impl Exporter<u32> for Collecting {
        fn export(&self, batch: &mut Batch<'_, u32>, _timeout: Duration) -> ExportResult {
            self.items.lock().unwrap().extend(batch);
            ExportResult::Success
        }

        fn force_flush(&self, _timeout: Timeout) -> bool {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn shutdown(&self, _timeout: Timeout) -> bool {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn thread_config() -> BatchExportConfig {
        BatchExportConfig {
            max_queue_size: 8,
            max_export_batch_size: 4,
            scheduled_delay: Duration::from_secs(60),
            poll_interval: Duration::from_millis(50),
            worker_kind: Some(WorkerKind::Thread),
            ..Default::default()
        }
    }

    fn range_error(config: BatchExportConfig) -> Range {
        match BatchExportProcessor::<u32>::new(Arc::new(Collecting::default()), config) {
            Err(Creation::Range(range)) => range,
            other => panic!("expected a range error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        let cases = [
            (
                BatchExportConfig {
                    max_queue_size: 0,
                    ..thread_config()
                },
                "max_queue_size",
            ),
            (
                BatchExportConfig {
                    max_export_batch_size: 0,
                    ..thread_config()
                },
                "max_export_batch_size",
            ),
            (
                BatchExportConfig {
                    max_export_batch_size: 9,
                    ..thread_config()
                },
                "max_export_batch_size",
            ),
            (
                BatchExportConfig {
                    scheduled_delay: Duration::ZERO,
                    ..thread_config()
                },
                "scheduled_delay",
            ),
        ];
        for (config, name) in cases {
            assert_eq!(range_error(config).name, name);
        }
    }

    #[test]
    #[traced_test]
    fn test_start_is_logged() {
        let processor =
            BatchExportProcessor::new(Arc::new(Collecting::default()), thread_config()).unwrap();
        assert_eq!(processor.worker_kind(), WorkerKind::Thread);
        assert_eq!(processor.worker_state(), WorkerState::Running);
        assert!(logs_contain("Started batch export processor with thread worker"));
    }

    struct Gated {
        release: Mutex<mpsc::Receiver<()>>,
        inner: Collecting,
    }

    impl Exporter<u32> for Gated {
        fn export(&self, batch: &mut Batch<'_, u32>, timeout: Duration) -> ExportResult {
            // hold the reserved items in the queue until the test lets go
            let _ = self.release.lock().unwrap().recv();
            self.inner.export(batch, timeout)
        }
    }

    #[test]
    fn test_full_queue_drops_and_counts() {
        let (release, gate) = mpsc::channel();
        let exporter = Arc::new(Gated {
            release: Mutex::new(gate),
            inner: Collecting::default(),
        });
        let processor = BatchExportProcessor::new(
            exporter.clone(),
            BatchExportConfig {
                max_export_batch_size: 8,
                ..thread_config()
            },
        )
        .unwrap();

        for i in 0..10 {
            processor.on_end(i);
        }
        assert_eq!(processor.dropped_count(), 2);
        assert_eq!(processor.received_count(), 10);

        release.send(()).unwrap();
        assert!(processor.force_flush(Timeout::from_millis(5_000)));
        assert_eq!(
            *exporter.inner.items.lock().unwrap(),
            (0..8).collect::<Vec<_>>()
        );
        assert_eq!(processor.processed_count(), 8);
    }

    #[test]
    fn test_full_batch_triggers_export() {
        let exporter = Arc::new(Collecting::default());
        let processor = BatchExportProcessor::new(exporter.clone(), thread_config()).unwrap();
        for i in 0..4 {
            processor.on_end(i);
        }

        let start = std::time::Instant::now();
        while exporter.items.lock().unwrap().len() < 4 {
            assert!(start.elapsed() < Duration::from_secs(5));
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(processor.queue_len(), 0);
    }

    #[test]
    fn test_force_flush_with_nothing_queued() {
        let exporter = Arc::new(Collecting::default());
        let processor = BatchExportProcessor::new(exporter.clone(), thread_config()).unwrap();
        assert!(processor.force_flush(Timeout::ZERO));
        assert_eq!(exporter.flushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_second_shutdown_is_a_no_op() {
        let exporter = Arc::new(Collecting::default());
        let processor = BatchExportProcessor::new(exporter.clone(), thread_config()).unwrap();
        processor.on_end(1);

        assert!(processor.shutdown(Timeout::Infinite));
        assert!(!processor.shutdown(Timeout::Infinite));
        assert_eq!(exporter.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(processor.shutdown_drain_target(), Some(1));
        assert_eq!(*exporter.items.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_drop_without_shutdown_signals_worker() {
        let exporter = Arc::new(Collecting::default());
        let processor = BatchExportProcessor::new(exporter.clone(), thread_config()).unwrap();
        processor.on_end(5);
        drop(processor);

        let start = std::time::Instant::now();
        while exporter.items.lock().unwrap().is_empty() {
            assert!(start.elapsed() < Duration::from_secs(5));
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(exporter.shutdowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_detects_task_worker_in_runtime() {
        let processor = BatchExportProcessor::<u32>::new(
            Arc::new(Collecting::default()),
            BatchExportConfig {
                worker_kind: None,
                ..thread_config()
            },
        )
        .unwrap();
        assert_eq!(processor.worker_kind(), WorkerKind::Task);
        assert!(processor.shutdown(Timeout::from_millis(5_000)));
    }
}

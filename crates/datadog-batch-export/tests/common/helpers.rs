// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helpers for building processors on either worker backend

use datadog_batch_export::{BatchExportConfig, BatchExportProcessor, Exporter, WorkerKind};
use std::ops::Deref;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use tokio::runtime::{Builder, Runtime};

/// A processor plus the runtime backing its task worker, if any.
///
/// The processor is declared first so it is dropped before the runtime.
pub struct TestProcessor {
    processor: BatchExportProcessor<u64>,
    _runtime: Option<Runtime>,
}

impl Deref for TestProcessor {
    type Target = BatchExportProcessor<u64>;

    fn deref(&self) -> &Self::Target {
        &self.processor
    }
}

pub fn config(max_queue_size: usize, max_export_batch_size: usize) -> BatchExportConfig {
    BatchExportConfig {
        max_queue_size,
        max_export_batch_size,
        poll_interval: Duration::from_millis(50),
        ..Default::default()
    }
}

pub fn processor(
    kind: WorkerKind,
    exporter: Arc<dyn Exporter<u64>>,
    config: BatchExportConfig,
) -> TestProcessor {
    match kind {
        WorkerKind::Thread => TestProcessor {
            processor: BatchExportProcessor::new(
                exporter,
                BatchExportConfig {
                    worker_kind: Some(WorkerKind::Thread),
                    ..config
                },
            )
            .unwrap(),
            _runtime: None,
        },
        WorkerKind::Task => {
            let runtime = Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();
            let processor =
                BatchExportProcessor::with_runtime(exporter, config, runtime.handle().clone())
                    .unwrap();
            TestProcessor {
                processor,
                _runtime: Some(runtime),
            }
        }
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while !condition() {
        if start.elapsed() > timeout {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    true
}

/// Runs `call` on a helper thread and gives up on it after `timeout`.
///
/// A call that hangs leaves its thread behind but fails the test instead of
/// blocking it forever.
pub fn returns_within<R: Send + 'static>(
    timeout: Duration,
    call: impl FnOnce() -> R + Send + 'static,
) -> Option<R> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(call());
    });
    rx.recv_timeout(timeout).ok()
}

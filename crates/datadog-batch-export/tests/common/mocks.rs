// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Exporter doubles used by the integration tests

use datadog_batch_export::{Batch, ExportResult, Exporter, Timeout};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Collects every exported item in order
#[derive(Default)]
pub struct InMemoryExporter {
    pub items: Arc<Mutex<Vec<u64>>>,
    pub batch_sizes: Mutex<Vec<usize>>,
    pub shutdown_calls: AtomicUsize,
}

impl InMemoryExporter {
    pub fn exported(&self) -> Vec<u64> {
        self.items.lock().unwrap().clone()
    }

    pub fn exported_len(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}

impl Exporter<u64> for InMemoryExporter {
    fn export(&self, batch: &mut Batch<'_, u64>, _timeout: Duration) -> ExportResult {
        let mut items = self.items.lock().unwrap();
        let before = items.len();
        items.extend(batch);
        self.batch_sizes.lock().unwrap().push(items.len() - before);
        ExportResult::Success
    }

    fn name(&self) -> &str {
        "in-memory"
    }

    fn shutdown(&self, _timeout: Timeout) -> bool {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// Fails every export without looking at the batch
#[derive(Default)]
pub struct FailureExporter {
    pub calls: AtomicUsize,
}

impl Exporter<u64> for FailureExporter {
    fn export(&self, _batch: &mut Batch<'_, u64>, _timeout: Duration) -> ExportResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ExportResult::Failure
    }
}

/// Sleeps on every export and tracks how many calls overlap
pub struct SlowExporter {
    pub delay: Duration,
    pub exported: AtomicUsize,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl SlowExporter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            exported: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl Exporter<u64> for SlowExporter {
    fn export(&self, batch: &mut Batch<'_, u64>, _timeout: Duration) -> ExportResult {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        thread::sleep(self.delay);
        self.exported.fetch_add(batch.count(), Ordering::SeqCst);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        ExportResult::Success
    }
}

/// Panics on the first export
pub struct PanicExporter;

impl Exporter<u64> for PanicExporter {
    fn export(&self, _batch: &mut Batch<'_, u64>, _timeout: Duration) -> ExportResult {
        panic!("exporter blew up");
    }
}

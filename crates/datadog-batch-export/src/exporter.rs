// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::batch::Batch;
use crate::timeout::Timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportResult {
    Success,
    Failure,
}

impl ExportResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExportResult::Success)
    }
}

/// Ships batches of telemetry to a backend.
///
/// `export` is called from the worker's single drain context, never
/// concurrently with itself. A failure is reported through the return value;
/// the batch is considered consumed either way and is not retried. A panic
/// inside `export` stops the worker.
pub trait Exporter<T>: Send + Sync {
    /// Sends the items of `batch`, taking no longer than `timeout`.
    ///
    /// Items left unconsumed in the batch are discarded once this returns.
    fn export(&self, batch: &mut Batch<'_, T>, timeout: Duration) -> ExportResult;

    /// Name used for the worker thread and in log lines.
    fn name(&self) -> &str {
        let full = std::any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base)
    }

    fn force_flush(&self, _timeout: Timeout) -> bool {
        true
    }

    fn shutdown(&self, _timeout: Timeout) -> bool {
        true
    }
}

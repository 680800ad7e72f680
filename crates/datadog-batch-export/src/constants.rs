// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Queue capacity. Items arriving while the queue is full are dropped.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 2048;

/// Upper bound for the number of items handed to a single export call.
pub const DEFAULT_MAX_EXPORT_BATCH_SIZE: usize = 512;

/// Delay between two scheduled export passes.
pub const DEFAULT_SCHEDULED_DELAY: Duration = Duration::from_millis(5000);

/// Time an exporter is allowed to spend on a single batch.
pub const DEFAULT_EXPORTER_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Slice used when waiting for the worker, so a notification raised just
/// before the waiter started waiting can never block it forever.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// CAS retries a producer performs before giving up and dropping the item.
pub const DEFAULT_MAX_SPIN_COUNT: u32 = 50_000;

pub const ENV_MAX_QUEUE_SIZE: &str = "OTEL_BSP_MAX_QUEUE_SIZE";
pub const ENV_MAX_EXPORT_BATCH_SIZE: &str = "OTEL_BSP_MAX_EXPORT_BATCH_SIZE";
pub const ENV_SCHEDULE_DELAY: &str = "OTEL_BSP_SCHEDULE_DELAY";
pub const ENV_EXPORT_TIMEOUT: &str = "OTEL_BSP_EXPORT_TIMEOUT";
pub const ENV_WORKER_KIND: &str = "DD_BATCH_EXPORT_WORKER";

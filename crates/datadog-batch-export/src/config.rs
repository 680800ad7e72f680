// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use tracing::warn;

use crate::constants::{
    DEFAULT_EXPORTER_TIMEOUT, DEFAULT_MAX_EXPORT_BATCH_SIZE, DEFAULT_MAX_QUEUE_SIZE,
    DEFAULT_POLL_INTERVAL, DEFAULT_SCHEDULED_DELAY, ENV_EXPORT_TIMEOUT,
    ENV_MAX_EXPORT_BATCH_SIZE, ENV_MAX_QUEUE_SIZE, ENV_SCHEDULE_DELAY, ENV_WORKER_KIND,
};
use crate::errors::{ConfigError, Range};
use crate::worker::{WorkerKind, WorkerSettings};

/// Tuning for a [`BatchExportProcessor`](crate::processor::BatchExportProcessor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchExportConfig {
    /// Capacity of the staging buffer
    pub max_queue_size: usize,
    /// Largest batch handed to one export call
    pub max_export_batch_size: usize,
    /// Delay between scheduled export passes
    pub scheduled_delay: Duration,
    /// Budget passed to every export call
    pub exporter_timeout: Duration,
    /// Upper bound on a single wait slice in flush and shutdown
    pub poll_interval: Duration,
    /// Forces a worker backend. `None` picks one from the calling context.
    pub worker_kind: Option<WorkerKind>,
}

impl Default for BatchExportConfig {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_export_batch_size: DEFAULT_MAX_EXPORT_BATCH_SIZE,
            scheduled_delay: DEFAULT_SCHEDULED_DELAY,
            exporter_timeout: DEFAULT_EXPORTER_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            worker_kind: None,
        }
    }
}

impl BatchExportConfig {
    /// Create configuration from the `OTEL_BSP_*` environment variables
    ///
    /// Values that do not parse fall back to their default. Negative values
    /// are rejected.
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_queue_size = read_size(ENV_MAX_QUEUE_SIZE)?.unwrap_or(DEFAULT_MAX_QUEUE_SIZE);
        let max_export_batch_size =
            read_size(ENV_MAX_EXPORT_BATCH_SIZE)?.unwrap_or(DEFAULT_MAX_EXPORT_BATCH_SIZE);
        let scheduled_delay = read_non_negative(ENV_SCHEDULE_DELAY)?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SCHEDULED_DELAY);
        let exporter_timeout = read_non_negative(ENV_EXPORT_TIMEOUT)?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_EXPORTER_TIMEOUT);
        let worker_kind = env::var(ENV_WORKER_KIND)
            .ok()
            .and_then(|val| match val.parse::<WorkerKind>() {
                Ok(kind) => Some(kind),
                Err(e) => {
                    warn!("Ignoring {ENV_WORKER_KIND}: {e}");
                    None
                }
            });

        let config = Self {
            max_queue_size,
            max_export_batch_size,
            scheduled_delay,
            exporter_timeout,
            worker_kind,
            ..Default::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Range> {
        if self.max_queue_size == 0 {
            return Err(Range::new("max_queue_size", 0, "should be greater than zero"));
        }

        if self.max_export_batch_size == 0 {
            return Err(Range::new("max_export_batch_size", 0, "should be greater than zero"));
        }

        if self.max_export_batch_size > self.max_queue_size {
            return Err(Range::new(
                "max_export_batch_size",
                self.max_export_batch_size as u64,
                "should not exceed max_queue_size",
            ));
        }

        if self.scheduled_delay < Duration::from_millis(1) {
            return Err(Range::new(
                "scheduled_delay",
                self.scheduled_delay.as_millis() as u64,
                "should be at least one millisecond",
            ));
        }

        if self.poll_interval < Duration::from_millis(1) {
            return Err(Range::new(
                "poll_interval",
                self.poll_interval.as_millis() as u64,
                "should be at least one millisecond",
            ));
        }

        Ok(())
    }

    pub(crate) fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            max_export_batch_size: self.max_export_batch_size,
            scheduled_delay: self.scheduled_delay,
            exporter_timeout: self.exporter_timeout,
            poll_interval: self.poll_interval,
        }
    }
}

fn read_size(var: &'static str) -> Result<Option<usize>, ConfigError> {
    read_non_negative(var)?
        .map(|value| to_size(var, value))
        .transpose()
}

/// Values wider than the platform's `usize` are rejected rather than
/// truncated.
fn to_size(var: &'static str, value: u64) -> Result<usize, ConfigError> {
    usize::try_from(value).map_err(|_| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
    })
}

/// Reads an integer variable, returning `None` when it is unset or does not
/// parse.
fn read_non_negative(var: &'static str) -> Result<Option<u64>, ConfigError> {
    let Ok(raw) = env::var(var) else {
        return Ok(None);
    };
    match raw.trim().parse::<i64>() {
        Ok(value) if value < 0 => Err(ConfigError::InvalidValue { var, value: raw }),
        Ok(value) => Ok(Some(value.unsigned_abs())),
        Err(_) => {
            warn!("Ignoring unparsable {var}={raw}, using default");
            Ok(None)
        }
    }
}

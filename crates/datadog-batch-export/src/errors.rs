// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the batch export pipeline.
//!
//! Only programmer misuse is reported through these types. Runtime conditions
//! such as a full queue or a failed export are surfaced through counters and
//! boolean results instead.

/// An argument was outside the range accepted by the callee.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name} is out of range ({value}): {reason}")]
pub struct Range {
    pub name: &'static str,
    pub value: i128,
    pub reason: &'static str,
}

impl Range {
    pub(crate) fn new(name: &'static str, value: impl Into<i128>, reason: &'static str) -> Self {
        Self {
            name,
            value: value.into(),
            reason,
        }
    }
}

/// Errors raised while building a buffer, worker or processor.
#[derive(Debug, thiserror::Error)]
pub enum Creation {
    #[error(transparent)]
    Range(#[from] Range),

    #[error("Unsupported runtime: {0}")]
    UnsupportedRuntime(String),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Errors returned by worker lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    #[error("Export worker already started")]
    AlreadyStarted,

    #[error("Export worker not running")]
    NotRunning,

    #[error("Failed to spawn export worker: {0}")]
    Spawn(String),
}

/// Errors raised while reading configuration from the environment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },

    #[error(transparent)]
    Range(#[from] Range),
}

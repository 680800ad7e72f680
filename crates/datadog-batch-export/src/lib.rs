// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Datadog Batch Export
//!
//! Bounded staging between telemetry producers and a network exporter.
//!
//! Producers call [`BatchExportProcessor::on_end`] from any thread. Items land
//! in a lock-free [`RingBuffer`] and a background worker hands them to an
//! [`Exporter`] in batches of at most `max_export_batch_size`, either when a
//! full batch is waiting, when the scheduled delay elapses, or when a caller
//! flushes or shuts down. A full buffer drops the item and counts it rather
//! than blocking the producer.
//!
//! The worker runs on a dedicated OS thread, or as a tokio task when the
//! processor is created inside a multi-thread runtime. Both behave the same.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use datadog_batch_export::{
//!     Batch, BatchExportConfig, BatchExportProcessor, ExportResult, Exporter, Timeout,
//! };
//!
//! struct Stdout;
//!
//! impl Exporter<String> for Stdout {
//!     fn export(&self, batch: &mut Batch<'_, String>, _timeout: Duration) -> ExportResult {
//!         for line in batch {
//!             println!("{line}");
//!         }
//!         ExportResult::Success
//!     }
//! }
//!
//! let processor = BatchExportProcessor::new(Arc::new(Stdout), BatchExportConfig::default())?;
//! processor.on_end("hello".to_string());
//! processor.shutdown(Timeout::from_millis(1000));
//! # Ok::<(), datadog_batch_export::errors::Creation>(())
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batch;
pub mod config;
pub mod constants;
pub mod errors;
pub mod exporter;
pub mod processor;
pub mod ring_buffer;
pub mod timeout;
pub mod worker;

pub use batch::Batch;
pub use config::BatchExportConfig;
pub use exporter::{ExportResult, Exporter};
pub use processor::BatchExportProcessor;
pub use ring_buffer::RingBuffer;
pub use timeout::Timeout;
pub use worker::{WorkerKind, WorkerState};

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use datadog_batch_export::{
    Batch, BatchExportConfig, BatchExportProcessor, ExportResult, Exporter, Timeout,
};

const DEFAULT_PRODUCERS: usize = 4;
const DEFAULT_ITEMS_PER_PRODUCER: u64 = 100_000;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

struct Span {
    producer: usize,
    sequence: u64,
}

/// Counts what it receives and checks per-producer ordering.
struct LoggingExporter {
    exported: AtomicU64,
    batches: AtomicU64,
    last_sequence: Vec<AtomicU64>,
    out_of_order: AtomicU64,
}

impl LoggingExporter {
    fn new(producers: usize) -> Self {
        Self {
            exported: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            last_sequence: (0..producers).map(|_| AtomicU64::new(0)).collect(),
            out_of_order: AtomicU64::new(0),
        }
    }
}

impl Exporter<Span> for LoggingExporter {
    fn export(&self, batch: &mut Batch<'_, Span>, _timeout: Duration) -> ExportResult {
        let mut count = 0;
        for span in batch {
            count += 1;
            if let Some(last) = self.last_sequence.get(span.producer) {
                if last.swap(span.sequence, Ordering::Relaxed) > span.sequence {
                    self.out_of_order.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.exported.fetch_add(count, Ordering::Relaxed);
        self.batches.fetch_add(1, Ordering::Relaxed);
        debug!("Exported batch of {count} spans");
        ExportResult::Success
    }

    fn name(&self) -> &str {
        "logging"
    }
}

#[tokio::main]
pub async fn main() {
    let log_level = env::var("DD_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(true)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let producers = env::var("STRESS_PRODUCERS")
        .ok()
        .and_then(|val| val.parse::<usize>().ok())
        .unwrap_or(DEFAULT_PRODUCERS);
    let items_per_producer = env::var("STRESS_ITEMS_PER_PRODUCER")
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .unwrap_or(DEFAULT_ITEMS_PER_PRODUCER);

    let config = match BatchExportConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid batch export configuration: {e}");
            return;
        }
    };

    let exporter = Arc::new(LoggingExporter::new(producers));
    let processor = match BatchExportProcessor::new(exporter.clone(), config) {
        Ok(processor) => Arc::new(processor),
        Err(e) => {
            error!("Failed to start batch export processor: {e}");
            return;
        }
    };
    info!(
        "Running {producers} producers with {items_per_producer} spans each on a {} worker",
        processor.worker_kind()
    );

    let stop = Arc::new(AtomicBool::new(false));
    let start = Instant::now();
    let mut tasks = JoinSet::new();
    for producer in 0..producers {
        let processor = Arc::clone(&processor);
        let stop = Arc::clone(&stop);
        tasks.spawn_blocking(move || {
            for sequence in 1..=items_per_producer {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                processor.on_end(Span { producer, sequence });
            }
        });
    }

    let interrupted = tokio::select! {
        _ = async { while tasks.join_next().await.is_some() {} } => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        warn!("Interrupted, stopping producers");
        stop.store(true, Ordering::Relaxed);
        while tasks.join_next().await.is_some() {}
    }
    let produced_in = start.elapsed();

    if !processor.shutdown(Timeout::After(DEFAULT_SHUTDOWN_TIMEOUT)) {
        warn!("Shutdown did not complete within {DEFAULT_SHUTDOWN_TIMEOUT:?}");
    }

    info!(
        received = processor.received_count(),
        processed = processor.processed_count(),
        dropped = processor.dropped_count(),
        exported = exporter.exported.load(Ordering::Relaxed),
        batches = exporter.batches.load(Ordering::Relaxed),
        out_of_order = exporter.out_of_order.load(Ordering::Relaxed),
        "Produced in {produced_in:?}, drained in {:?}",
        start.elapsed()
    );
}

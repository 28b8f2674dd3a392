//! Chain run orchestrator: wires parser, worker and writer together.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use bytes::Bytes;

use crate::errors::ChainError;
use crate::execution::RunOptions;
use crate::parser::StreamParser;
use crate::pool::ConfigPool;
use crate::result::RunSummary;
use crate::ring::RingBuffer;
use crate::scanner;
use crate::transport::Transport;
use crate::worker::Worker;
use crate::writer::{self, OutputWriter};

/// Closes a ring when the owning stage exits, including by panic, so the
/// stage on the other side never waits forever.
struct CloseOnDrop<'a, T>(&'a RingBuffer<T>);

impl<T> Drop for CloseOnDrop<'_, T> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Execute every request in the chain document at `path` and rewrite the
/// document in place with the responses.
///
/// Reference structure is validated before any request is sent; on a
/// [`ChainError::Format`] from that check the file is untouched.
///
/// # Errors
///
/// Returns [`ChainError::Format`] for a malformed document,
/// [`ChainError::Writer`] if the output could not be persisted (recovery is
/// attempted first), and [`ChainError::Infrastructure`] for read failures or
/// panicked stages. Writer failures take precedence over format failures.
pub async fn run_chain(
    path: &Path,
    options: &RunOptions,
    transport: Arc<dyn Transport>,
) -> Result<RunSummary, ChainError> {
    let start = Instant::now();
    tracing::info!(path = %path.display(), "Starting chain run");

    let source = Bytes::from(
        tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read chain document {}", path.display()))?,
    );
    let records = scanner::scan(&source)?;
    let pool = Arc::new(ConfigPool::new(options.pool_capacity));
    let parser = StreamParser::new(source.clone(), records, Arc::clone(&pool))?;
    let record_count = parser.len();
    let worker = Worker::new(
        transport,
        Arc::clone(&pool),
        parser.retained().clone(),
        options,
    );
    let output = OutputWriter::create(source, path, options.flush_every)?;

    let intake = Arc::new(RingBuffer::new(options.queue_capacity));
    let outtake = Arc::new(RingBuffer::new(options.queue_capacity));

    let parser_task = {
        let intake = Arc::clone(&intake);
        tokio::task::spawn_blocking(move || {
            let _close = CloseOnDrop(&*intake);
            parser.run(&intake)
        })
    };
    let worker_task = {
        let intake = Arc::clone(&intake);
        let outtake = Arc::clone(&outtake);
        tokio::task::spawn_blocking(move || {
            let _close_in = CloseOnDrop(&*intake);
            let _close_out = CloseOnDrop(&*outtake);
            worker.run(&intake, &outtake)
        })
    };
    let writer_task = {
        let outtake = Arc::clone(&outtake);
        let pool = Arc::clone(&pool);
        tokio::task::spawn_blocking(move || {
            let _close = CloseOnDrop(&*outtake);
            writer::run_stage(output, &outtake, &pool)
        })
    };

    let parsed = parser_task.await;
    let stats = worker_task.await;
    let written = writer_task.await;

    let parsed = parsed.map_err(|e| {
        ChainError::Infrastructure(anyhow::anyhow!("Parser task panicked: {e}"))
    })?;
    let stats = stats.map_err(|e| {
        ChainError::Infrastructure(anyhow::anyhow!("Worker task panicked: {e}"))
    })?;
    let written = written.map_err(|e| {
        ChainError::Infrastructure(anyhow::anyhow!("Writer task panicked: {e}"))
    })?;

    let records_written = written.inspect_err(|e| {
        tracing::error!(error = %e, "Output write failed");
    })?;
    let parsed = parsed.inspect_err(|e| {
        tracing::error!(
            error = %e,
            records_written,
            "Chain document invalid mid-stream, remaining records left untouched"
        );
    })?;

    let summary = RunSummary {
        records: record_count,
        parsed,
        executed: stats.executed,
        transport_failures: stats.transport_failures,
        resolution_warnings: stats.resolution_warnings,
        records_written,
        duration_secs: start.elapsed().as_secs_f64(),
    };
    tracing::info!(
        path = %path.display(),
        records = summary.records,
        executed = summary.executed,
        transport_failures = summary.transport_failures,
        resolution_warnings = summary.resolution_warnings,
        records_written = summary.records_written,
        duration_secs = summary.duration_secs,
        "Chain run completed"
    );
    Ok(summary)
}

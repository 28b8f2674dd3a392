//! Chain run result types.

use serde::Serialize;

/// Aggregate counts for one chain run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Records in the source document.
    pub records: usize,
    /// Records handed to the worker by the parser.
    pub parsed: usize,
    /// Requests that completed with an outcome.
    pub executed: usize,
    /// Requests whose transport call failed.
    pub transport_failures: usize,
    /// Dependency substitutions or overrides skipped.
    pub resolution_warnings: usize,
    /// Records serialized into the output document.
    pub records_written: usize,
    pub duration_secs: f64,
}

/// Counters kept by the worker stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: usize,
    pub executed: usize,
    pub transport_failures: usize,
    pub resolution_warnings: usize,
}

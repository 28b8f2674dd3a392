//! Run options for chain execution.

use std::time::Duration;

/// Runtime knobs for one chain run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Deadline applied to every transport call.
    pub request_timeout: Duration,
    /// Number of records the writer buffers between flushes.
    pub flush_every: usize,
    /// Capacity of the stage queues (rounded up to a power of two).
    pub queue_capacity: usize,
    /// Blank instances seeded per variant in each config pool.
    pub pool_capacity: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(2),
            flush_every: 5,
            queue_capacity: 64,
            pool_capacity: 10,
        }
    }
}

impl RunOptions {
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Values below 1 are treated as 1.
    #[must_use]
    pub fn with_flush_every(mut self, records: usize) -> Self {
        self.flush_every = records.max(1);
        self
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_options_defaults() {
        let opts = RunOptions::default();
        assert_eq!(opts.request_timeout, Duration::from_secs(2));
        assert_eq!(opts.flush_every, 5);
        assert_eq!(opts.queue_capacity, 64);
        assert_eq!(opts.pool_capacity, 10);
    }

    #[test]
    fn flush_every_is_at_least_one() {
        let opts = RunOptions::default().with_flush_every(0);
        assert_eq!(opts.flush_every, 1);
    }
}

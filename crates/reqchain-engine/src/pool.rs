//! Recycling arenas for configs and outcomes.
//!
//! Every pool is a [`RingBuffer`] of pre-seeded blank instances, so each one
//! inherits the SPSC discipline: one thread acquires, one thread releases.
//! In a run the parser acquires live configs and the worker releases them;
//! the worker acquires output clones and the writer releases them.

use reqchain_types::{Config, ConfigType, Outcome};

use crate::ring::RingBuffer;

fn slot(ty: ConfigType) -> usize {
    match ty {
        ConfigType::Http => 0,
        ConfigType::Grpc => 1,
        ConfigType::Repeat => 2,
    }
}

fn seeded(ty: ConfigType, capacity: usize) -> RingBuffer<Config> {
    let ring = RingBuffer::new(capacity);
    for _ in 0..capacity {
        if ring.try_push(Config::blank(ty)).is_err() {
            break;
        }
    }
    ring
}

// ---------------------------------------------------------------------------
// ConfigPool
// ---------------------------------------------------------------------------

/// Per-variant config pools: one for live pipeline copies, one for
/// serialization clones headed to the writer.
///
/// Neither side ever blocks. `acquire` on an empty pool allocates a fresh
/// blank config, and `release` into a full pool drops the instance.
#[derive(Debug)]
pub struct ConfigPool {
    live: [RingBuffer<Config>; 3],
    clones: [RingBuffer<Config>; 3],
}

impl ConfigPool {
    /// Seed `capacity` blank instances per variant in each pool.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            live: ConfigType::ALL.map(|ty| seeded(ty, capacity)),
            clones: ConfigType::ALL.map(|ty| seeded(ty, capacity)),
        }
    }

    /// Take a blank live config of the given variant.
    #[must_use]
    pub fn acquire(&self, ty: ConfigType) -> Config {
        self.live[slot(ty)]
            .try_pop()
            .unwrap_or_else(|| Config::blank(ty))
    }

    /// Reset a live config and return it to its pool.
    pub fn release(&self, mut config: Config) {
        config.reset();
        let _ = self.live[slot(config.config_type())].try_push(config);
    }

    /// Deep-copy `source` into a config drawn from the clone pool.
    #[must_use]
    pub fn clone_for_output(&self, source: &Config) -> Config {
        let ty = source.config_type();
        let mut clone = self.clones[slot(ty)]
            .try_pop()
            .unwrap_or_else(|| Config::blank(ty));
        clone.copy_for_output(source);
        clone
    }

    /// Reset a serialized clone and return it to the clone pool.
    pub fn release_clone(&self, mut config: Config) {
        config.reset();
        let _ = self.clones[slot(config.config_type())].try_push(config);
    }

    /// Live configs currently idle in the pool of `ty`.
    #[must_use]
    pub fn idle(&self, ty: ConfigType) -> usize {
        self.live[slot(ty)].len()
    }

    /// Output clones currently idle in the pool of `ty`.
    #[must_use]
    pub fn idle_clones(&self, ty: ConfigType) -> usize {
        self.clones[slot(ty)].len()
    }
}

// ---------------------------------------------------------------------------
// OutcomePool
// ---------------------------------------------------------------------------

/// Reusable outcome buffers for the worker.
#[derive(Debug)]
pub struct OutcomePool {
    ring: RingBuffer<Outcome>,
}

impl OutcomePool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let ring = RingBuffer::new(capacity);
        for _ in 0..capacity {
            if ring.try_push(Outcome::default()).is_err() {
                break;
            }
        }
        Self { ring }
    }

    #[must_use]
    pub fn acquire(&self) -> Outcome {
        self.ring.try_pop().unwrap_or_default()
    }

    pub fn release(&self, mut outcome: Outcome) {
        outcome.reset();
        let _ = self.ring.try_push(outcome);
    }

    #[must_use]
    pub fn idle(&self) -> usize {
        self.ring.len()
    }
}

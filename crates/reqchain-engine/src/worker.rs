//! Worker stage: resolve, dispatch, record.
//!
//! Consumes configs strictly in source order. For each one the worker takes
//! an output clone of the declaration, resolves its dependencies against the
//! [`ResultHub`], unwraps repeats, executes the concrete request, and hands
//! the clone (now carrying the response) to the writer.

use std::sync::Arc;
use std::time::Duration;

use bitvec::prelude::*;
use reqchain_types::{Config, ConfigType};

use crate::execution::RunOptions;
use crate::pool::{ConfigPool, OutcomePool};
use crate::resolver::{DependencyResolver, ResultHub};
use crate::result::WorkerStats;
use crate::ring::RingBuffer;
use crate::transport::Transport;

/// Sequential request executor.
pub struct Worker {
    transport: Arc<dyn Transport>,
    pool: Arc<ConfigPool>,
    outcomes: OutcomePool,
    hub: ResultHub,
    resolver: DependencyResolver,
    timeout: Duration,
    stats: WorkerStats,
}

impl Worker {
    /// `retained` is the parser's retention bitmap.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        pool: Arc<ConfigPool>,
        retained: BitVec,
        options: &RunOptions,
    ) -> Self {
        Self {
            transport,
            pool,
            outcomes: OutcomePool::new(options.pool_capacity),
            hub: ResultHub::new(retained),
            resolver: DependencyResolver::new(),
            timeout: options.request_timeout,
            stats: WorkerStats::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Process one config and return its output clone.
    ///
    /// The live config goes back to the pool. On transport failure the clone
    /// keeps the response it was declared with.
    pub fn process(&mut self, mut config: Config) -> Config {
        let mut output = self.pool.clone_for_output(&config);
        self.stats.processed += 1;
        self.stats.resolution_warnings += self.resolver.resolve(&mut config, &self.hub);

        let unwrapped;
        let concrete = if config.config_type() == ConfigType::Repeat {
            match self.resolver.unwrap_repeat(&config, &self.hub) {
                Ok((c, warnings)) => {
                    self.stats.resolution_warnings += warnings;
                    unwrapped = c;
                    &unwrapped
                }
                Err(warning) => {
                    self.stats.resolution_warnings += 1;
                    tracing::warn!(record = config.id, warning = %warning, "Repeat not executed");
                    self.pool.release(config);
                    return output;
                }
            }
        } else {
            &config
        };

        let mut outcome = self.outcomes.acquire();
        match self.transport.execute(concrete, self.timeout, &mut outcome) {
            Ok(()) => {
                self.stats.executed += 1;
                tracing::info!(
                    record = config.id,
                    name = %config.name,
                    status = outcome.status,
                    bytes = outcome.raw.len(),
                    "Request executed"
                );
                output.response.clear();
                output.response.extend_from_slice(&outcome.raw);
                if !outcome.cookie.is_empty() {
                    output.cookie.clear();
                    output.cookie.extend_from_slice(&outcome.cookie);
                }
                if let Some(unread) = self.hub.store(config.id, outcome) {
                    self.outcomes.release(unread);
                }
            }
            Err(e) => {
                self.stats.transport_failures += 1;
                tracing::warn!(
                    record = config.id,
                    name = %config.name,
                    error = %e,
                    "Request failed"
                );
                self.outcomes.release(outcome);
            }
        }

        self.pool.release(config);
        output
    }

    /// Drain `intake` until it closes, forwarding output clones to `outtake`.
    ///
    /// If the writer closes `outtake`, the worker closes `intake` so the
    /// parser stops, and returns without dispatching anything else.
    pub fn run(mut self, intake: &RingBuffer<Config>, outtake: &RingBuffer<Config>) -> WorkerStats {
        while let Some(config) = intake.read() {
            let output = self.process(config);
            if let Err(output) = outtake.write(output) {
                tracing::warn!(
                    record = output.id,
                    "Writer stopped, cancelling remaining requests"
                );
                intake.close();
                break;
            }
        }
        outtake.close();

        while let Some(config) = intake.try_pop() {
            self.pool.release(config);
        }
        tracing::debug!(
            processed = self.stats.processed,
            retained_outcomes = self.hub.len(),
            "Worker finished"
        );
        self.stats
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("timeout", &self.timeout)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use reqchain_types::{FieldKey, Outcome, Payload, TransportError};

    use crate::marker::extract_markers;

    /// Answers with a fixed body per URL and records what it was asked.
    #[derive(Default)]
    struct Scripted {
        replies: Vec<(&'static str, Result<&'static str, TransportError>)>,
        seen: Mutex<Vec<String>>,
    }

    impl Transport for Scripted {
        fn execute(
            &self,
            config: &Config,
            _timeout: Duration,
            outcome: &mut Outcome,
        ) -> Result<(), TransportError> {
            let url = String::from_utf8_lossy(config.field(FieldKey::Url).unwrap_or_default())
                .into_owned();
            self.seen.lock().unwrap().push(url.clone());
            let reply = self
                .replies
                .iter()
                .find(|(u, _)| *u == url)
                .map(|(_, r)| r.clone())
                .unwrap_or(Err(TransportError::Request("no route".into())));
            let body = reply?;
            outcome.raw.extend_from_slice(body.as_bytes());
            outcome.cookie.extend_from_slice(b"sid=7");
            outcome.status = Some(200);
            Ok(())
        }
    }

    fn http(id: usize, url: &str) -> Config {
        let mut cfg = Config::blank(ConfigType::Http);
        cfg.id = id;
        cfg.name = format!("cfg{id}");
        cfg.set_field(FieldKey::Url, url.as_bytes()).unwrap();
        extract_markers(id, FieldKey::Url, url.as_bytes(), &mut cfg.deps).unwrap();
        cfg
    }

    fn worker(transport: Arc<dyn Transport>, retained: BitVec) -> Worker {
        Worker::new(
            transport,
            Arc::new(ConfigPool::new(2)),
            retained,
            &RunOptions::default(),
        )
    }

    #[test]
    fn chain_resolves_from_previous_response() {
        let transport = Arc::new(Scripted {
            replies: vec![
                ("http://a", Ok(r#"{"id":"42"}"#)),
                ("http://b/42", Ok("done")),
            ],
            ..Scripted::default()
        });
        let mut w = worker(transport.clone(), bitvec![1, 0]);

        let out0 = w.process(http(0, "http://a"));
        let out1 = w.process(http(1, "http://b/{RESPONSE id=0 json:id}"));

        assert_eq!(out0.response, br#"{"id":"42"}"#);
        assert_eq!(out0.cookie, b"sid=7");
        assert_eq!(out1.response, b"done");
        // The output keeps the declared template.
        assert_eq!(
            out1.field(FieldKey::Url),
            Some(&b"http://b/{RESPONSE id=0 json:id}"[..])
        );
        assert_eq!(
            *transport.seen.lock().unwrap(),
            vec!["http://a".to_string(), "http://b/42".to_string()]
        );
        assert_eq!(w.stats().executed, 2);
        assert_eq!(w.stats().resolution_warnings, 0);
    }

    #[test]
    fn transport_failure_keeps_declared_response() {
        let transport = Arc::new(Scripted {
            replies: vec![("http://a", Err(TransportError::Timeout { after_ms: 2000 }))],
            ..Scripted::default()
        });
        let mut w = worker(transport, bitvec![1, 0]);

        let mut declared = http(0, "http://a");
        declared.response.extend_from_slice(b"previous");
        let out0 = w.process(declared);
        assert_eq!(out0.response, b"previous");

        // The dependent still runs, with its marker left in place.
        let out1 = w.process(http(1, "http://b/{RESPONSE id=0}"));
        assert!(out1.response.is_empty());
        let stats = w.stats();
        assert_eq!(stats.transport_failures, 2);
        assert_eq!(stats.resolution_warnings, 1);
        assert_eq!(stats.executed, 0);
    }

    #[test]
    fn repeat_executes_base_with_overrides() {
        let transport = Arc::new(Scripted {
            replies: vec![("http://a", Ok("first")), ("https://x", Ok("second"))],
            ..Scripted::default()
        });
        let mut w = worker(transport.clone(), bitvec![1, 0]);

        let base = http(0, "http://a");
        let mut repeat = Config::blank(ConfigType::Repeat);
        repeat.id = 1;
        repeat
            .set_field(FieldKey::Replace, br#"{"url":"https://x"}"#)
            .unwrap();
        if let Payload::Repeat(r) = &mut repeat.payload {
            r.target_id = 0;
            r.base = Some(Box::new(base.clone()));
        }

        w.process(base);
        let out = w.process(repeat);
        assert_eq!(out.config_type(), ConfigType::Repeat);
        assert_eq!(out.response, b"second");
        assert_eq!(
            transport.seen.lock().unwrap().last().map(String::as_str),
            Some("https://x")
        );
    }

    #[test]
    fn closed_outtake_cancels_intake() {
        let transport = Arc::new(Scripted {
            replies: vec![("http://a", Ok("x"))],
            ..Scripted::default()
        });
        let w = worker(transport.clone(), bitvec![0; 3]);
        let intake = RingBuffer::new(4);
        let outtake = RingBuffer::new(4);
        for id in 0..3 {
            intake.try_push(http(id, "http://a")).unwrap();
        }
        outtake.close();

        let stats = w.run(&intake, &outtake);
        assert_eq!(stats.processed, 1);
        assert!(intake.is_closed());
        assert!(intake.is_empty());
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn run_forwards_in_order_and_closes_outtake() {
        let transport = Arc::new(Scripted {
            replies: vec![("http://a", Ok("x"))],
            ..Scripted::default()
        });
        let w = worker(transport, bitvec![0; 3]);
        let intake = RingBuffer::new(4);
        let outtake = RingBuffer::new(4);
        for id in 0..3 {
            intake.try_push(http(id, "http://a")).unwrap();
        }
        intake.close();

        let stats = w.run(&intake, &outtake);
        assert_eq!(stats.executed, 3);
        assert!(outtake.is_closed());
        let ids: Vec<usize> = std::iter::from_fn(|| outtake.read()).map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}

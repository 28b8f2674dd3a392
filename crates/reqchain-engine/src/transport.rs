//! Request execution seam.

use std::time::Duration;

use reqchain_types::{Config, Outcome, TransportError};

/// Executes one resolved, concrete config.
///
/// Called from the worker's blocking thread, one request at a time. The
/// implementation writes the response body and header-ready cookie bytes
/// into `outcome`, which arrives reset. Repeat configs never reach a
/// transport; the worker unwraps them first.
pub trait Transport: Send + Sync {
    /// Execute `config`, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the request cannot be built, fails
    /// in flight, times out, or the config type is not supported.
    fn execute(
        &self,
        config: &Config,
        timeout: Duration,
        outcome: &mut Outcome,
    ) -> Result<(), TransportError>;
}

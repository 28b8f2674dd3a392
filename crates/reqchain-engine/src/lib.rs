//! Core pipeline crate for reqchain document execution.
//!
//! A run streams records out of a chain document ([`parser`]), resolves inline
//! dependency markers against earlier outcomes and dispatches each request
//! ([`worker`]), then rewrites the document in place ([`writer`]). The three
//! stages are joined by bounded [`ring::RingBuffer`]s and driven by
//! [`orchestrator::run_chain`].

pub mod errors;
pub mod execution;
pub mod extract;
pub mod marker;
pub mod orchestrator;
pub mod parser;
pub mod pool;
pub mod resolver;
pub mod result;
pub mod ring;
pub mod scanner;
pub mod transport;
pub mod worker;
pub mod writer;

// Re-export public API for convenience
pub use errors::ChainError;
pub use execution::RunOptions;
pub use orchestrator::run_chain;
pub use result::RunSummary;
pub use transport::Transport;

//! Network transports for reqchain runs.
//!
//! [`HttpTransport`] implements the engine's [`reqchain_engine::Transport`]
//! seam over `reqwest`. gRPC configs are reported as unsupported.

#![warn(clippy::pedantic)]

pub mod http;
pub mod request;

pub use http::{HttpOptions, HttpTransport};

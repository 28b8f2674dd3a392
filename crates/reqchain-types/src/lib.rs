//! Shared reqchain data model and error types.
//!
//! Pure data: request declarations, inter-request dependencies, execution
//! outcomes and the typed errors exchanged between engine stages.

#![warn(clippy::pedantic)]

pub mod config;
pub mod dependency;
pub mod error;
pub mod outcome;

pub use config::{Config, ConfigType, FieldKey, GrpcConfig, HttpConfig, Payload, RepeatConfig};
pub use dependency::{Dependencies, Dependency, Extraction, Instruction, INLINE_DEPENDENCIES};
pub use error::{FormatError, SpliceError, TransportError, WriterError};
pub use outcome::Outcome;

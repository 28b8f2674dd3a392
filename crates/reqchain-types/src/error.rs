//! Typed errors shared between reqchain stages.
//!
//! - [`FormatError`]: malformed source document; fatal, parse-time only.
//! - [`TransportError`]: one concrete config failed to execute; isolated.
//! - [`WriterError`]: persisting the rewritten document failed.
//! - [`SpliceError`]: a byte-range substitution did not fit the field.

use crate::config::FieldKey;

/// Malformed record, bad marker, unknown type or invalid repeat target.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// The document does not follow the record grammar.
    #[error("line {line}: {reason}")]
    Syntax { line: usize, reason: String },

    /// A record has no `Type` field.
    #[error("record {record}: missing Type")]
    MissingType { record: usize },

    /// `Type` is not one of `http`, `grpc`, `repeat`.
    #[error("record {record}: unknown config type {tag:?}")]
    UnknownType { record: usize, tag: String },

    /// A repeat record has no `Target_ID` field.
    #[error("record {record}: repeat without Target_ID")]
    MissingRepeatTarget { record: usize },

    /// `Target_ID` is negative or not a number.
    #[error("record {record}: invalid repeat target {value:?}")]
    InvalidRepeatTarget { record: usize, value: String },

    /// A repeat target or marker id does not point strictly backwards.
    #[error("record {record}: reference to {target} is not strictly earlier")]
    ForwardReference { record: usize, target: usize },

    /// An inline instruction marker could not be parsed.
    #[error("record {record}: malformed marker in {field} at byte {offset}: {reason}")]
    MalformedMarker {
        record: usize,
        field: FieldKey,
        offset: usize,
        reason: &'static str,
    },

    /// A repeat's `Replace` field is not a JSON object of strings.
    #[error("record {record}: invalid Replace map: {reason}")]
    InvalidReplace { record: usize, reason: String },
}

impl FormatError {
    /// Index of the offending record, when the error is record-scoped.
    #[must_use]
    pub fn record(&self) -> Option<usize> {
        match self {
            Self::Syntax { .. } => None,
            Self::MissingType { record }
            | Self::UnknownType { record, .. }
            | Self::MissingRepeatTarget { record }
            | Self::InvalidRepeatTarget { record, .. }
            | Self::ForwardReference { record, .. }
            | Self::MalformedMarker { record, .. }
            | Self::InvalidReplace { record, .. } => Some(*record),
        }
    }
}

/// Execution failure for one concrete config.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The per-request deadline elapsed.
    #[error("request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The request could not be built from the config.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request was sent but failed in flight.
    #[error("request failed: {0}")]
    Request(String),

    /// The transport cannot execute this kind of config.
    #[error("unsupported config type: {0}")]
    Unsupported(&'static str),
}

/// Failure while persisting the rewritten document.
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    /// File-system I/O failure.
    #[error("{op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The writer stage panicked; recovery ran with the given outcome.
    #[error("writer panicked: {0}")]
    Panicked(String),
}

impl WriterError {
    /// Wrap an I/O error with the failing operation.
    #[must_use]
    pub fn io(op: &'static str, source: std::io::Error) -> Self {
        Self::Io { op, source }
    }
}

/// A splice range that does not fit the current field contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SpliceError {
    /// The config variant has no such field.
    #[error("config has no {0} field")]
    MissingField(FieldKey),

    /// `start > end` or `end` past the field length.
    #[error("range {start}..{end} outside field of length {len}")]
    OutOfRange { start: usize, end: usize, len: usize },
}

//! Chain run error model.

use reqchain_types::{FormatError, WriterError};

// ---------------------------------------------------------------------------
// ChainError
// ---------------------------------------------------------------------------

/// Why a chain run failed.
///
/// Per-record problems (transport failures, skipped substitutions) never
/// appear here; they are logged and counted in the run summary.
#[derive(Debug)]
pub enum ChainError {
    /// The source document is malformed. Raised before any request is sent,
    /// or mid-stream after the records already executed were written out.
    Format(FormatError),
    /// Persisting the rewritten document failed; recovery was attempted.
    Writer(WriterError),
    /// Infrastructure error (file read, task join, etc.)
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Format(e) => write!(f, "invalid chain document: {e}"),
            Self::Writer(e) => write!(f, "output write failed: {e}"),
            Self::Infrastructure(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ChainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Format(e) => Some(e),
            Self::Writer(e) => Some(e),
            Self::Infrastructure(e) => Some(&**e),
        }
    }
}

impl From<anyhow::Error> for ChainError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<FormatError> for ChainError {
    fn from(e: FormatError) -> Self {
        Self::Format(e)
    }
}

impl From<WriterError> for ChainError {
    fn from(e: WriterError) -> Self {
        Self::Writer(e)
    }
}

impl ChainError {
    /// Returns `true` if the document itself is at fault.
    #[must_use]
    pub fn is_fatal_format(&self) -> bool {
        matches!(self, Self::Format(_))
    }

    /// Returns the format error if this is a `Format` variant.
    #[must_use]
    pub fn as_format_error(&self) -> Option<&FormatError> {
        match self {
            Self::Format(e) => Some(e),
            _ => None,
        }
    }
}

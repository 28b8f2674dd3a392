//! Result of executing one concrete config.

/// Outcome of a single transport call.
///
/// Buffers are recycled through the engine's outcome pool, so [`Outcome::reset`]
/// clears contents but keeps capacity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Raw response body.
    pub raw: Vec<u8>,
    /// Header-ready cookie bytes (`name=value; name2=value2`).
    pub cookie: Vec<u8>,
    /// Whether the response declared a JSON content type.
    pub is_json: bool,
    /// Transport status code, when the protocol has one.
    pub status: Option<u16>,
}

impl Outcome {
    /// Clear all fields back to their zero value.
    pub fn reset(&mut self) {
        self.raw.clear();
        self.cookie.clear();
        self.is_json = false;
        self.status = None;
    }

    /// `true` when nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty() && self.cookie.is_empty()
    }
}

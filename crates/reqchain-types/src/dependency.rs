//! Inter-request dependency model.
//!
//! A [`Dependency`] records one inline instruction marker found while parsing:
//! "replace bytes `[start, end)` of field `key` with data derived from the
//! outcome of request `target_id`".

use std::fmt;

use smallvec::SmallVec;

use crate::config::FieldKey;

/// Number of dependencies stored inline before spilling to the heap.
pub const INLINE_DEPENDENCIES: usize = 6;

/// Dependency list of one config: six inline slots plus heap overflow.
pub type Dependencies = SmallVec<[Dependency; INLINE_DEPENDENCIES]>;

/// How a `RESPONSE` marker turns raw response bytes into replacement text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extraction {
    /// `none`: strip structural JSON punctuation and whitespace.
    Flatten,
    /// `json:<dot.path>`: walk parsed JSON by key/index and return the leaf.
    JsonPath(String),
}

impl fmt::Display for Extraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flatten => f.write_str("none"),
            Self::JsonPath(path) => write!(f, "json:{path}"),
        }
    }
}

/// Instruction keyword of a marker and its policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// `{RESPONSE id=N <policy>}`
    Response(Extraction),
    /// `{COOKIES id=N}`
    Cookies,
}

impl Instruction {
    /// Marker keyword as written in documents.
    #[must_use]
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Response(_) => "RESPONSE",
            Self::Cookies => "COOKIES",
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response(policy) => write!(f, "RESPONSE {policy}"),
            Self::Cookies => f.write_str("COOKIES"),
        }
    }
}

/// One pending byte-range substitution.
///
/// `start` and `end` are relative to the start of field `key`'s value.
/// `start == end` is a pure insertion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub target_id: usize,
    pub start: usize,
    pub end: usize,
    pub key: FieldKey,
    pub instruction: Instruction,
}

impl Dependency {
    /// Width of the marker span in bytes.
    #[must_use]
    pub fn span_len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(target_id: usize) -> Dependency {
        Dependency {
            target_id,
            start: 0,
            end: 4,
            key: FieldKey::Url,
            instruction: Instruction::Cookies,
        }
    }

    #[test]
    fn six_dependencies_stay_inline() {
        let mut deps = Dependencies::new();
        for i in 0..INLINE_DEPENDENCIES {
            deps.push(dep(i));
        }
        assert!(!deps.spilled());

        deps.push(dep(6));
        assert!(deps.spilled());
        assert_eq!(deps.len(), 7);
    }

    #[test]
    fn instruction_display_includes_policy() {
        let ins = Instruction::Response(Extraction::JsonPath("data.token".into()));
        assert_eq!(ins.to_string(), "RESPONSE json:data.token");
        assert_eq!(Instruction::Response(Extraction::Flatten).to_string(), "RESPONSE none");
        assert_eq!(Instruction::Cookies.keyword(), "COOKIES");
    }

    #[test]
    fn span_len_of_insertion_is_zero() {
        let mut d = dep(0);
        d.start = 3;
        d.end = 3;
        assert_eq!(d.span_len(), 0);
    }
}

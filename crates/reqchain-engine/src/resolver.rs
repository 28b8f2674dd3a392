//! Dependency resolution against earlier outcomes.
//!
//! [`ResultHub`] holds the outcome of every executed record that a later
//! record reads. [`DependencyResolver`] splices marker spans with bytes
//! extracted from those outcomes and unwraps repeat configs into the
//! concrete request they stand for. Problems here are never fatal: each one
//! is logged as a [`ResolutionWarning`] and the marker text stays in place.

use bitvec::prelude::*;
use reqchain_types::{
    Config, Dependency, Extraction, FieldKey, Instruction, Outcome, Payload, SpliceError,
};

use crate::extract::{self, ExtractError};

// ---------------------------------------------------------------------------
// ResultHub
// ---------------------------------------------------------------------------

/// Append-only outcome store indexed by record sequence ID.
///
/// Only records flagged in the retention bitmap are kept; everything else is
/// handed back to the caller for recycling. Single writer (the worker).
#[derive(Debug)]
pub struct ResultHub {
    slots: Vec<Option<Outcome>>,
    retained: BitVec,
    held: usize,
}

impl ResultHub {
    #[must_use]
    pub fn new(retained: BitVec) -> Self {
        Self {
            slots: vec![None; retained.len()],
            retained,
            held: 0,
        }
    }

    /// Whether a later record reads the outcome of `id`.
    #[must_use]
    pub fn is_retained(&self, id: usize) -> bool {
        self.retained.get(id).is_some_and(|bit| *bit)
    }

    /// Outcome of `id`, if it executed successfully and is retained.
    #[must_use]
    pub fn get(&self, id: usize) -> Option<&Outcome> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    /// Record the outcome of `id`.
    ///
    /// Returns the outcome back when nothing reads it (or the slot is already
    /// filled) so the caller can recycle its buffers.
    pub fn store(&mut self, id: usize, outcome: Outcome) -> Option<Outcome> {
        if !self.is_retained(id) {
            return Some(outcome);
        }
        match self.slots.get_mut(id) {
            Some(slot) if slot.is_none() => {
                *slot = Some(outcome);
                self.held += 1;
                None
            }
            _ => Some(outcome),
        }
    }

    /// Number of outcomes currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.held
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held == 0
    }
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Non-fatal resolution problem; the affected substitution is skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionWarning {
    #[error("no outcome recorded for record {target}")]
    MissingOutcome { target: usize },

    #[error("record {target} produced no {what}")]
    EmptyPayload { target: usize, what: &'static str },

    #[error("extraction from record {target} failed: {source}")]
    Extraction {
        target: usize,
        #[source]
        source: ExtractError,
    },

    #[error(transparent)]
    Splice(#[from] SpliceError),

    #[error("Replace no longer parses after substitution: {0}")]
    InvalidReplace(String),

    #[error("override of {0} does not apply to the repeated config")]
    InapplicableOverride(FieldKey),

    #[error("repeat has no base declaration")]
    MissingBase,
}

// ---------------------------------------------------------------------------
// DependencyResolver
// ---------------------------------------------------------------------------

/// Splices dependency markers in place, reusing its scratch buffers.
#[derive(Debug, Default)]
pub struct DependencyResolver {
    scratch: Vec<u8>,
    escaped: Vec<u8>,
    order: Vec<usize>,
}

impl DependencyResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every dependency of `config` against `hub`.
    ///
    /// Dependencies are applied from the highest start offset down so the
    /// ranges of the remaining ones stay valid. Returns how many were skipped.
    pub fn resolve(&mut self, config: &mut Config, hub: &ResultHub) -> usize {
        let deps = std::mem::take(&mut config.deps);
        let mut order = std::mem::take(&mut self.order);
        order.clear();
        order.extend(0..deps.len());
        order.sort_by(|&a, &b| deps[b].start.cmp(&deps[a].start));

        let mut skipped = 0;
        for &i in &order {
            let dep = &deps[i];
            if let Err(warning) = self.apply(config, dep, hub) {
                skipped += 1;
                tracing::warn!(
                    record = config.id,
                    target_id = dep.target_id,
                    field = %dep.key,
                    instruction = %dep.instruction,
                    warning = %warning,
                    "Dependency skipped"
                );
            }
        }
        config.deps = deps;
        self.order = order;
        skipped
    }

    fn apply(
        &mut self,
        config: &mut Config,
        dep: &Dependency,
        hub: &ResultHub,
    ) -> Result<(), ResolutionWarning> {
        let target = dep.target_id;
        let outcome = hub
            .get(target)
            .ok_or(ResolutionWarning::MissingOutcome { target })?;

        self.scratch.clear();
        match &dep.instruction {
            Instruction::Cookies => {
                if outcome.cookie.is_empty() {
                    return Err(ResolutionWarning::EmptyPayload {
                        target,
                        what: "cookies",
                    });
                }
                self.scratch.extend_from_slice(&outcome.cookie);
            }
            Instruction::Response(policy) => {
                if outcome.raw.is_empty() {
                    return Err(ResolutionWarning::EmptyPayload {
                        target,
                        what: "response",
                    });
                }
                match policy {
                    Extraction::Flatten => extract::flatten(&outcome.raw, &mut self.scratch),
                    Extraction::JsonPath(path) => {
                        extract::json_path(&outcome.raw, path, &mut self.scratch)
                            .map_err(|source| ResolutionWarning::Extraction { target, source })?;
                    }
                }
                if self.scratch.is_empty() {
                    return Err(ResolutionWarning::EmptyPayload {
                        target,
                        what: "extractable response",
                    });
                }
            }
        }

        let replacement = if dep.key == FieldKey::Replace {
            self.escaped.clear();
            extract::json_escape(&self.scratch, &mut self.escaped);
            &self.escaped
        } else {
            &self.scratch
        };
        config.splice(dep.key, dep.start, dep.end, replacement)?;
        Ok(())
    }

    /// Build the concrete request a resolved repeat stands for.
    ///
    /// Clones the repeat's base declaration, overlays its `Replace` map,
    /// drops base dependencies anchored in overridden fields, and resolves
    /// the rest. Returns the concrete config and the number of warnings.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionWarning::MissingBase`] if `repeat` has no base.
    pub fn unwrap_repeat(
        &mut self,
        repeat: &Config,
        hub: &ResultHub,
    ) -> Result<(Config, usize), ResolutionWarning> {
        let Payload::Repeat(r) = &repeat.payload else {
            return Err(ResolutionWarning::MissingBase);
        };
        let base = r.base.as_deref().ok_or(ResolutionWarning::MissingBase)?;

        let mut concrete = base.clone();
        concrete.name.clear();
        concrete.name.push_str(&repeat.name);
        concrete.id = repeat.id;
        concrete.cookie.clear();
        concrete.cookie.extend_from_slice(&repeat.cookie);

        let mut warnings = 0;
        match extract::parse_replace(&r.replace) {
            Ok(overrides) => {
                for key in concrete.apply_overrides(&overrides.fields) {
                    warnings += 1;
                    tracing::warn!(
                        record = repeat.id,
                        warning = %ResolutionWarning::InapplicableOverride(key),
                        "Override ignored"
                    );
                }
            }
            Err(reason) => {
                warnings += 1;
                tracing::warn!(
                    record = repeat.id,
                    warning = %ResolutionWarning::InvalidReplace(reason),
                    "Overrides skipped"
                );
            }
        }

        warnings += self.resolve(&mut concrete, hub);
        Ok((concrete, warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqchain_types::{ConfigType, Dependencies};

    fn hub_with(outcomes: &[(usize, &str, &str)], len: usize) -> ResultHub {
        let mut hub = ResultHub::new(bitvec![1; len]);
        for &(id, raw, cookie) in outcomes {
            let outcome = Outcome {
                raw: raw.as_bytes().to_vec(),
                cookie: cookie.as_bytes().to_vec(),
                is_json: true,
                status: Some(200),
            };
            assert!(hub.store(id, outcome).is_none());
        }
        hub
    }

    fn with_markers(ty: ConfigType, id: usize, fields: &[(FieldKey, &str)]) -> Config {
        let mut cfg = Config::blank(ty);
        cfg.id = id;
        for &(key, value) in fields {
            cfg.set_field(key, value.as_bytes()).unwrap();
            let mut deps = Dependencies::new();
            crate::marker::extract_markers(id, key, value.as_bytes(), &mut deps).unwrap();
            cfg.deps.extend(deps);
        }
        cfg
    }

    fn text(cfg: &Config, key: FieldKey) -> &str {
        std::str::from_utf8(cfg.field(key).unwrap()).unwrap()
    }

    #[test]
    fn hub_keeps_only_retained_outcomes() {
        let mut hub = ResultHub::new(bitvec![1, 0]);
        assert!(hub.is_empty());
        assert!(hub.store(0, Outcome::default()).is_none());
        assert!(hub.store(1, Outcome::default()).is_some());
        assert!(hub.store(0, Outcome::default()).is_some());
        assert!(hub.store(7, Outcome::default()).is_some());
        assert_eq!(hub.len(), 1);
        assert!(hub.get(0).is_some());
        assert!(hub.get(1).is_none());
    }

    #[test]
    fn json_path_splice_touches_only_marker_span() {
        let hub = hub_with(&[(0, r#"{"id":"42"}"#, "")], 2);
        let mut cfg = with_markers(
            ConfigType::Http,
            1,
            &[(FieldKey::Url, "http://b/{RESPONSE id=0 json:id}")],
        );
        let skipped = DependencyResolver::new().resolve(&mut cfg, &hub);
        assert_eq!(skipped, 0);
        assert_eq!(text(&cfg, FieldKey::Url), "http://b/42");
        assert_eq!(cfg.deps.len(), 1);
    }

    #[test]
    fn multiple_markers_in_one_field_resolve_right_to_left() {
        let hub = hub_with(&[(0, r#"{"a":"first","b":"second-longer"}"#, "sid=9")], 2);
        let mut cfg = with_markers(
            ConfigType::Http,
            1,
            &[
                (
                    FieldKey::Body,
                    "x={RESPONSE id=0 json:a}&y={RESPONSE id=0 json:b}&c={COOKIES id=0}",
                ),
                (FieldKey::Headers, "Cookie: {COOKIES id=0}"),
            ],
        );
        let skipped = DependencyResolver::new().resolve(&mut cfg, &hub);
        assert_eq!(skipped, 0);
        assert_eq!(text(&cfg, FieldKey::Body), "x=first&y=second-longer&c=sid=9");
        assert_eq!(text(&cfg, FieldKey::Headers), "Cookie: sid=9");
    }

    #[test]
    fn missing_or_empty_results_leave_template_text() {
        let mut hub = ResultHub::new(bitvec![1; 3]);
        hub.store(1, Outcome::default());
        let template = "{RESPONSE id=0}/{COOKIES id=1}/{RESPONSE id=1 json:x}";
        let mut cfg = with_markers(ConfigType::Http, 2, &[(FieldKey::Url, template)]);
        let skipped = DependencyResolver::new().resolve(&mut cfg, &hub);
        assert_eq!(skipped, 3);
        assert_eq!(text(&cfg, FieldKey::Url), template);
    }

    #[test]
    fn failed_extraction_is_skipped() {
        let hub = hub_with(&[(0, "not json", "")], 2);
        let template = "{RESPONSE id=0 json:token}";
        let mut cfg = with_markers(ConfigType::Http, 1, &[(FieldKey::Body, template)]);
        assert_eq!(DependencyResolver::new().resolve(&mut cfg, &hub), 1);
        assert_eq!(text(&cfg, FieldKey::Body), template);
    }

    #[test]
    fn out_of_range_dependency_is_a_no_op() {
        let hub = hub_with(&[(0, r#"{"id":"1"}"#, "")], 2);
        let mut cfg = with_markers(ConfigType::Http, 1, &[(FieldKey::Url, "short")]);
        cfg.deps.push(Dependency {
            target_id: 0,
            start: 3,
            end: 50,
            key: FieldKey::Url,
            instruction: Instruction::Response(Extraction::JsonPath("id".into())),
        });
        assert_eq!(DependencyResolver::new().resolve(&mut cfg, &hub), 1);
        assert_eq!(text(&cfg, FieldKey::Url), "short");
    }

    #[test]
    fn replace_substitutions_are_json_escaped() {
        let hub = hub_with(&[(0, r#"{"v":"a\\b"}"#, "")], 2);
        let mut cfg = with_markers(
            ConfigType::Repeat,
            1,
            &[(FieldKey::Replace, r#"{"body": "{RESPONSE id=0 json:v}"}"#)],
        );
        DependencyResolver::new().resolve(&mut cfg, &hub);
        let overrides = extract::parse_replace(cfg.field(FieldKey::Replace).unwrap()).unwrap();
        assert_eq!(overrides.fields, vec![(FieldKey::Body, br"a\b".to_vec())]);
    }

    fn repeat_of(base: Config, id: usize, replace: &str) -> Config {
        let mut repeat = with_markers(ConfigType::Repeat, id, &[(FieldKey::Replace, replace)]);
        repeat.name.push_str("again");
        if let Payload::Repeat(r) = &mut repeat.payload {
            r.target_id = base.id;
            r.base = Some(Box::new(base));
        }
        repeat
    }

    #[test]
    fn repeat_overrides_url_and_keeps_declared_fields() {
        let mut base = with_markers(
            ConfigType::Http,
            0,
            &[
                (FieldKey::Url, "http://a/{COOKIES id=0}"),
                (FieldKey::Method, "POST"),
                (FieldKey::Body, "{\"q\":1}"),
            ],
        );
        base.id = 0;
        let hub = hub_with(&[(0, r#"{"id":"1"}"#, "sid=1")], 2);
        let mut repeat = repeat_of(base, 1, r#"{"url":"https://x"}"#);

        let mut resolver = DependencyResolver::new();
        assert_eq!(resolver.resolve(&mut repeat, &hub), 0);
        let (concrete, warnings) = resolver.unwrap_repeat(&repeat, &hub).unwrap();

        assert_eq!(warnings, 0);
        assert_eq!(concrete.config_type(), ConfigType::Http);
        assert_eq!(concrete.id, 1);
        assert_eq!(concrete.name, "again");
        assert_eq!(text(&concrete, FieldKey::Url), "https://x");
        assert_eq!(text(&concrete, FieldKey::Method), "POST");
        assert_eq!(text(&concrete, FieldKey::Body), "{\"q\":1}");
        assert!(concrete.deps.is_empty());
    }

    #[test]
    fn repeat_resolves_remaining_base_dependencies() {
        let base = with_markers(
            ConfigType::Http,
            1,
            &[
                (FieldKey::Url, "http://a"),
                (FieldKey::Headers, "Authorization: {RESPONSE id=0 json:token}"),
            ],
        );
        let hub = hub_with(&[(0, r#"{"token":"T1"}"#, "")], 3);
        let mut repeat = repeat_of(base, 2, r#"{"url":"http://b/{RESPONSE id=0 json:token}"}"#);

        let mut resolver = DependencyResolver::new();
        resolver.resolve(&mut repeat, &hub);
        let (concrete, warnings) = resolver.unwrap_repeat(&repeat, &hub).unwrap();
        assert_eq!(warnings, 0);
        assert_eq!(text(&concrete, FieldKey::Url), "http://b/T1");
        assert_eq!(text(&concrete, FieldKey::Headers), "Authorization: T1");
    }

    #[test]
    fn broken_replace_executes_base_unchanged() {
        let base = with_markers(ConfigType::Http, 0, &[(FieldKey::Url, "http://a")]);
        let hub = hub_with(&[], 2);
        let mut repeat = repeat_of(base, 1, "{\"url\": ");
        repeat.deps.clear();
        let (concrete, warnings) = DependencyResolver::new()
            .unwrap_repeat(&repeat, &hub)
            .unwrap();
        assert_eq!(warnings, 1);
        assert_eq!(text(&concrete, FieldKey::Url), "http://a");
    }

    #[test]
    fn inapplicable_override_is_counted() {
        let base = with_markers(ConfigType::Http, 0, &[(FieldKey::Url, "http://a")]);
        let hub = hub_with(&[], 2);
        let repeat = repeat_of(base, 1, r#"{"endpoint":"svc/M"}"#);
        let (_, warnings) = DependencyResolver::new()
            .unwrap_repeat(&repeat, &hub)
            .unwrap();
        assert_eq!(warnings, 1);
    }

    #[test]
    fn repeat_without_base_is_reported() {
        let repeat = Config::blank(ConfigType::Repeat);
        let err = DependencyResolver::new()
            .unwrap_repeat(&repeat, &ResultHub::new(BitVec::new()))
            .unwrap_err();
        assert_eq!(err, ResolutionWarning::MissingBase);
    }
}

//! Streaming materialization of scanned records into pooled [`Config`]s.
//!
//! Construction runs a validation pre-scan over every record (types, repeat
//! targets, markers) and sizes the retention bitmap: bit `i` is set when a
//! later record references record `i` through a marker or a repeat. The
//! parser itself is then a forward-only iterator; each record is populated
//! into a config drawn from the [`ConfigPool`] in source order.

use std::sync::Arc;

use bitvec::prelude::*;
use bytes::Bytes;
use reqchain_types::{Config, ConfigType, Dependencies, FieldKey, FormatError, Payload};

use crate::extract::{self, Overrides};
use crate::marker::extract_markers;
use crate::pool::ConfigPool;
use crate::ring::RingBuffer;
use crate::scanner::RawRecord;

/// Per-record facts established by the pre-scan.
#[derive(Debug)]
struct RecordPlan {
    ty: ConfigType,
    repeat_target: Option<usize>,
    deps: Dependencies,
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn check_targets(record: usize, deps: &Dependencies) -> Result<(), FormatError> {
    match deps.iter().find(|d| d.target_id >= record) {
        Some(dep) => Err(FormatError::ForwardReference {
            record,
            target: dep.target_id,
        }),
        None => Ok(()),
    }
}

fn plan_record(source: &[u8], index: usize, record: &RawRecord) -> Result<RecordPlan, FormatError> {
    let tag = record
        .value(source, "Type")
        .ok_or(FormatError::MissingType { record: index })?;
    let ty = ConfigType::from_tag(tag).ok_or_else(|| FormatError::UnknownType {
        record: index,
        tag: lossy(tag),
    })?;

    let repeat_target = if ty == ConfigType::Repeat {
        let raw = record
            .value(source, "Target_ID")
            .ok_or(FormatError::MissingRepeatTarget { record: index })?;
        let target = std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .ok_or_else(|| FormatError::InvalidRepeatTarget {
                record: index,
                value: lossy(raw),
            })?;
        if target >= index {
            return Err(FormatError::ForwardReference {
                record: index,
                target,
            });
        }
        Some(target)
    } else {
        None
    };

    let mut deps = Dependencies::new();
    for &key in FieldKey::for_type(ty) {
        if let Some(value) = record.value(source, key.name()) {
            extract_markers(index, key, value, &mut deps)?;
        }
    }
    check_targets(index, &deps)?;

    Ok(RecordPlan {
        ty,
        repeat_target,
        deps,
    })
}

// ---------------------------------------------------------------------------
// StreamParser
// ---------------------------------------------------------------------------

/// Lazy, non-restartable sequence of populated configs.
pub struct StreamParser {
    source: Bytes,
    records: Vec<RawRecord>,
    plans: Vec<RecordPlan>,
    /// Records referenced by any later marker or repeat.
    retained: BitVec,
    /// Records aliased by a later repeat; their declarations are snapshotted.
    repeat_targets: BitVec,
    snapshots: Vec<Option<Config>>,
    pool: Arc<ConfigPool>,
    next: usize,
    failed: bool,
}

impl StreamParser {
    /// Validate every record and prepare the stream.
    ///
    /// # Errors
    ///
    /// Returns the first [`FormatError`] in source order: missing or unknown
    /// `Type`, missing/invalid/forward repeat target, malformed marker, or a
    /// marker referencing a record that is not strictly earlier.
    pub fn new(
        source: Bytes,
        records: Vec<RawRecord>,
        pool: Arc<ConfigPool>,
    ) -> Result<Self, FormatError> {
        let count = records.len();
        let mut retained = bitvec![0; count];
        let mut repeat_targets = bitvec![0; count];
        let mut plans = Vec::with_capacity(count);

        for (index, record) in records.iter().enumerate() {
            let plan = plan_record(&source, index, record)?;
            if let Some(target) = plan.repeat_target {
                retained.set(target, true);
                repeat_targets.set(target, true);
            }
            for dep in &plan.deps {
                retained.set(dep.target_id, true);
            }
            plans.push(plan);
        }

        tracing::debug!(
            records = count,
            retained = retained.count_ones(),
            repeat_targets = repeat_targets.count_ones(),
            "Chain pre-scan complete"
        );

        Ok(Self {
            source,
            records,
            plans,
            retained,
            repeat_targets,
            snapshots: vec![None; count],
            pool,
            next: 0,
            failed: false,
        })
    }

    /// Total number of records in the document.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Retention bitmap: which outcomes later records will read.
    #[must_use]
    pub fn retained(&self) -> &BitVec {
        &self.retained
    }

    fn materialize(&mut self, index: usize) -> Result<Config, FormatError> {
        let record = &self.records[index];
        let plan = &self.plans[index];
        let source: &[u8] = &self.source;

        let mut cfg = self.pool.acquire(plan.ty);
        cfg.name.push_str(&record.name);
        cfg.id = index;
        cfg.start_offset = record.start;
        cfg.end_offset = record.end;

        for field in &record.fields {
            let value = &source[field.value.clone()];
            if let Some(key) = FieldKey::from_key(field.key.as_bytes()) {
                if cfg.set_field(key, value).is_ok() {
                    continue;
                }
            }
            let key = field.key.as_str();
            if key.eq_ignore_ascii_case("Type")
                || (plan.ty == ConfigType::Repeat && key.eq_ignore_ascii_case("Target_ID"))
            {
                continue;
            }
            if key.eq_ignore_ascii_case("Response") {
                cfg.response.clear();
                cfg.response.extend_from_slice(value);
            } else if key.eq_ignore_ascii_case("Cookie") {
                cfg.cookie.clear();
                cfg.cookie.extend_from_slice(value);
            } else {
                cfg.extra.push((field.key.clone(), value.to_vec()));
            }
        }
        cfg.deps.extend(plan.deps.iter().cloned());

        let overrides = match plan.repeat_target {
            Some(target) => {
                let replace = cfg.field(FieldKey::Replace).unwrap_or_default();
                let overrides = extract::parse_replace(replace).map_err(|reason| {
                    FormatError::InvalidReplace {
                        record: index,
                        reason,
                    }
                })?;
                for key in &overrides.unknown {
                    tracing::warn!(record = index, key = %key, "Replace key names no field, ignored");
                }
                let base = self.snapshots[target]
                    .as_ref()
                    .ok_or(FormatError::ForwardReference {
                        record: index,
                        target,
                    })?;
                if let Payload::Repeat(repeat) = &mut cfg.payload {
                    repeat.target_id = target;
                    repeat.base = Some(Box::new(base.clone()));
                }
                Some(overrides)
            }
            None => None,
        };

        if self.repeat_targets[index] {
            let snapshot = match &overrides {
                Some(overrides) => flatten_repeat(&cfg, overrides)?,
                None => declaration_of(&cfg),
            };
            self.snapshots[index] = Some(snapshot);
        }

        tracing::debug!(
            record = index,
            name = %cfg.name,
            kind = %plan.ty,
            deps = cfg.deps.len(),
            "Record parsed"
        );
        Ok(cfg)
    }

    /// Drive the stream into `intake`, closing it when done.
    ///
    /// Stops early when the consumer closes the ring.
    ///
    /// # Errors
    ///
    /// Returns the first materialization error after closing `intake`.
    pub fn run(self, intake: &RingBuffer<Config>) -> Result<usize, FormatError> {
        let mut emitted = 0;
        for item in self {
            let cfg = match item {
                Ok(cfg) => cfg,
                Err(e) => {
                    intake.close();
                    return Err(e);
                }
            };
            if intake.write(cfg).is_err() {
                tracing::debug!(emitted, "Intake closed by worker, parser stopping");
                break;
            }
            emitted += 1;
        }
        intake.close();
        Ok(emitted)
    }
}

impl Iterator for StreamParser {
    type Item = Result<Config, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next >= self.records.len() {
            return None;
        }
        let index = self.next;
        self.next += 1;
        let item = self.materialize(index);
        self.failed = item.is_err();
        Some(item)
    }
}

impl std::fmt::Debug for StreamParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamParser")
            .field("records", &self.records.len())
            .field("next", &self.next)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

/// Declared request of a concrete record, without run-time state.
fn declaration_of(cfg: &Config) -> Config {
    let mut snapshot = cfg.clone();
    snapshot.response.clear();
    snapshot.cookie.clear();
    snapshot.extra.clear();
    snapshot
}

/// Declared request a repeat stands for: its base with its own overrides
/// applied. Markers inside the overrides become dependencies of the
/// overridden fields.
fn flatten_repeat(repeat: &Config, overrides: &Overrides) -> Result<Config, FormatError> {
    let Payload::Repeat(r) = &repeat.payload else {
        return Ok(declaration_of(repeat));
    };
    let Some(base) = r.base.as_deref() else {
        return Ok(declaration_of(repeat));
    };

    let mut snapshot = declaration_of(base);
    for key in snapshot.apply_overrides(&overrides.fields) {
        tracing::warn!(record = repeat.id, field = %key, "Override names a field the base lacks");
    }
    for (key, value) in &overrides.fields {
        if snapshot.field(*key).is_some() {
            extract_markers(repeat.id, *key, value, &mut snapshot.deps)?;
        }
    }
    check_targets(repeat.id, &snapshot.deps)?;
    Ok(snapshot)
}

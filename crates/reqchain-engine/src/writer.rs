//! Writer stage: crash-consistent rewrite of the chain document.
//!
//! Records are copied from the source with only their `Response` and
//! `Cookie` fields rewritten, buffered, and appended to a sibling temp file
//! (`<target>.out.tmp`) every `flush_every` records. Bytes between records
//! are copied as well, so untouched regions stay identical.
//! Finishing (normally or after a failure) always appends the unprocessed
//! tail of the source before the temp file is synced and renamed over the
//! target: the result is an updated prefix followed by an untouched suffix.

use std::any::Any;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use reqchain_types::{Config, WriterError};

use crate::pool::ConfigPool;
use crate::ring::RingBuffer;
use crate::scanner::{is_fence, scan, RawField};

/// Temp file path used while rewriting `target`.
#[must_use]
pub fn temp_path(target: &Path) -> PathBuf {
    let mut os = target.as_os_str().to_owned();
    os.push(".out.tmp");
    PathBuf::from(os)
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

fn needs_quotes(value: &[u8]) -> bool {
    value.trim_ascii().len() != value.len() || value.first() == Some(&b'"') || is_fence(value)
}

/// Shortest backtick fence that no line of `value` can close early.
fn fence_len(value: &[u8]) -> usize {
    value
        .split(|&b| b == b'\n')
        .map(<[u8]>::trim_ascii)
        .filter(|line| is_fence(line))
        .map(<[u8]>::len)
        .max()
        .map_or(1, |longest| longest + 1)
}

fn write_field(key: &[u8], value: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(key);
    out.push(b':');
    if value.contains(&b'\n') {
        let fence = fence_len(value);
        out.resize(out.len() + fence, b'`');
        out.push(b'\n');
        out.extend_from_slice(value);
        out.push(b'\n');
        out.resize(out.len() + fence, b'`');
        out.push(b'\n');
    } else if needs_quotes(value) {
        out.push(b'"');
        out.extend_from_slice(value);
        out.extend_from_slice(b"\"\n");
    } else {
        out.extend_from_slice(value);
        out.push(b'\n');
    }
}

fn declared<'a>(record: &'a [u8], fields: &[RawField], at: Option<usize>) -> &'a [u8] {
    at.map_or(&b""[..], |i| &record[fields[i].value.clone()])
}

/// Append `record` (the record's own source bytes) to `out` with the
/// `Response` and `Cookie` fields set to those of `config`.
///
/// Everything else is copied verbatim. An existing field is rewritten in
/// place (earlier duplicates are dropped); a missing one is inserted before
/// the closing tag. Returns `false`, writing nothing, if `record` is not a
/// single well-formed record.
fn rewrite_record(record: &[u8], config: &Config, out: &mut Vec<u8>) -> bool {
    let Ok(mut records) = scan(record) else {
        return false;
    };
    let Some(rec) = records.pop().filter(|_| records.is_empty()) else {
        return false;
    };

    let last = |key: &str| rec.fields.iter().rposition(|f| f.key.eq_ignore_ascii_case(key));
    let (response_at, cookie_at) = (last("Response"), last("Cookie"));
    if declared(record, &rec.fields, response_at) == config.response.as_slice()
        && declared(record, &rec.fields, cookie_at) == config.cookie.as_slice()
    {
        out.extend_from_slice(record);
        return true;
    }

    let replace = |field: &RawField, value: &[u8], out: &mut Vec<u8>| {
        if record[field.value.clone()] == *value {
            out.extend_from_slice(&record[field.span.clone()]);
        } else if !value.is_empty() {
            write_field(field.key.as_bytes(), value, out);
        }
    };
    let mut pos = 0;
    for (i, field) in rec.fields.iter().enumerate() {
        let value = if Some(i) == response_at {
            Some(config.response.as_slice())
        } else if Some(i) == cookie_at {
            Some(config.cookie.as_slice())
        } else if field.key.eq_ignore_ascii_case("Response")
            || field.key.eq_ignore_ascii_case("Cookie")
        {
            None
        } else {
            continue;
        };
        out.extend_from_slice(&record[pos..field.span.start]);
        pos = field.span.end;
        if let Some(value) = value {
            replace(field, value, out);
        }
    }
    out.extend_from_slice(&record[pos..rec.close]);
    if response_at.is_none() && !config.response.is_empty() {
        write_field(b"Response", &config.response, out);
    }
    if cookie_at.is_none() && !config.cookie.is_empty() {
        write_field(b"Cookie", &config.cookie, out);
    }
    out.extend_from_slice(&record[rec.close..]);
    true
}

/// Append the canonical document form of `config` to `out`. Used for
/// configs that carry no source span.
///
/// Layout: `[name]`, `Type`, `Target_ID` for repeats, non-empty payload
/// fields in canonical order, unknown keys in declared order, `Response`
/// and `Cookie` when set, then `[\name]`.
pub fn serialize_record(config: &Config, out: &mut Vec<u8>) {
    out.push(b'[');
    out.extend_from_slice(config.name.as_bytes());
    out.extend_from_slice(b"]\n");
    write_field(b"Type", config.config_type().as_str().as_bytes(), out);
    if let Some(target) = config.repeat_target() {
        write_field(b"Target_ID", target.to_string().as_bytes(), out);
    }
    for (key, value) in config.fields() {
        if !value.is_empty() {
            write_field(key.name().as_bytes(), value, out);
        }
    }
    for (key, value) in &config.extra {
        write_field(key.as_bytes(), value, out);
    }
    if !config.response.is_empty() {
        write_field(b"Response", &config.response, out);
    }
    if !config.cookie.is_empty() {
        write_field(b"Cookie", &config.cookie, out);
    }
    out.extend_from_slice(b"[\\");
    out.extend_from_slice(config.name.as_bytes());
    out.extend_from_slice(b"]\n");
}

// ---------------------------------------------------------------------------
// OutputWriter
// ---------------------------------------------------------------------------

/// Buffered rewriter for one chain document.
#[derive(Debug)]
pub struct OutputWriter {
    source: Bytes,
    target: PathBuf,
    tmp: PathBuf,
    file: File,
    pending: Vec<u8>,
    /// Length of `pending` at the end of the last complete record.
    complete: usize,
    pending_records: usize,
    flush_every: usize,
    /// Source offset up to which output has been produced.
    cursor: usize,
    /// `cursor` as of the last successful flush.
    flushed_cursor: usize,
    /// Bytes known to be in the temp file.
    committed_len: u64,
    written: usize,
    flushed_written: usize,
}

impl OutputWriter {
    /// Open the temp file next to `target`.
    ///
    /// # Errors
    ///
    /// Fails if the temp file cannot be created.
    pub fn create(source: Bytes, target: &Path, flush_every: usize) -> Result<Self, WriterError> {
        let tmp = temp_path(target);
        let file = File::create(&tmp).map_err(|e| WriterError::io("create temp file", e))?;
        Ok(Self {
            source,
            target: target.to_path_buf(),
            tmp,
            file,
            pending: Vec::with_capacity(4096),
            complete: 0,
            pending_records: 0,
            flush_every: flush_every.max(1),
            cursor: 0,
            flushed_cursor: 0,
            committed_len: 0,
            written: 0,
            flushed_written: 0,
        })
    }

    /// Records serialized so far, flushed or not.
    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }

    /// Append one finished record, preceded by the source bytes since the
    /// previous one.
    ///
    /// # Errors
    ///
    /// Fails if a periodic flush fails.
    pub fn write_record(&mut self, config: &Config) -> Result<(), WriterError> {
        let gap_end = config.start_offset.clamp(self.cursor, self.source.len());
        let record_end = config.end_offset.clamp(gap_end, self.source.len());
        self.pending
            .extend_from_slice(&self.source[self.cursor..gap_end]);
        let record = &self.source[gap_end..record_end];
        if record.is_empty() || !rewrite_record(record, config, &mut self.pending) {
            serialize_record(config, &mut self.pending);
        }
        self.complete = self.pending.len();
        self.cursor = record_end;
        self.written += 1;
        self.pending_records += 1;
        if self.pending_records >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    /// Append buffered records to the temp file.
    ///
    /// # Errors
    ///
    /// Fails on any write error; the buffer is kept for recovery.
    pub fn flush(&mut self) -> Result<(), WriterError> {
        self.pending.truncate(self.complete);
        if !self.pending.is_empty() {
            self.file
                .write_all(&self.pending)
                .map_err(|e| WriterError::io("write temp file", e))?;
            self.file
                .flush()
                .map_err(|e| WriterError::io("flush temp file", e))?;
        }
        self.committed_len += self.pending.len() as u64;
        self.pending.clear();
        self.complete = 0;
        self.pending_records = 0;
        self.flushed_cursor = self.cursor;
        self.flushed_written = self.written;
        Ok(())
    }

    /// Flush, append the source tail, sync and rename over the target.
    /// Returns the number of records written.
    ///
    /// # Errors
    ///
    /// Fails on any I/O error; the temp file is removed in that case.
    pub fn finish(mut self) -> Result<usize, WriterError> {
        let result = self.flush().and_then(|()| self.commit());
        match result {
            Ok(()) => Ok(self.written),
            Err(e) => {
                self.discard();
                Err(e)
            }
        }
    }

    /// Finalize after a failure: keep every record that can still be flushed,
    /// fall back to the last successful flush otherwise, then append the
    /// untouched tail. Returns the number of records that made it.
    ///
    /// # Errors
    ///
    /// Fails if the output cannot be finalized; the target is left as it was
    /// and the temp file is removed.
    pub fn recover(mut self) -> Result<usize, WriterError> {
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "Pending records lost, rolling back to last flush");
            self.pending.clear();
            self.complete = 0;
            self.cursor = self.flushed_cursor;
            self.written = self.flushed_written;
            // The failed handle may be unusable; continue on a fresh one.
            let rollback = OpenOptions::new()
                .write(true)
                .open(&self.tmp)
                .and_then(|file| {
                    file.set_len(self.committed_len)?;
                    self.file = file;
                    self.file.seek(SeekFrom::Start(self.committed_len)).map(drop)
                });
            if let Err(e) = rollback {
                self.discard();
                return Err(WriterError::io("truncate temp file", e));
            }
        }
        match self.commit() {
            Ok(()) => Ok(self.written),
            Err(e) => {
                self.discard();
                Err(e)
            }
        }
    }

    fn commit(&mut self) -> Result<(), WriterError> {
        let tail = &self.source[self.cursor.min(self.source.len())..];
        self.file
            .write_all(tail)
            .map_err(|e| WriterError::io("copy source tail", e))?;
        self.file
            .sync_all()
            .map_err(|e| WriterError::io("sync temp file", e))?;
        fs::rename(&self.tmp, &self.target).map_err(|e| WriterError::io("rename temp file", e))?;
        tracing::debug!(
            target_path = %self.target.display(),
            records = self.written,
            tail_bytes = tail.len(),
            "Output committed"
        );
        Ok(())
    }

    fn discard(&self) {
        if let Err(e) = fs::remove_file(&self.tmp) {
            tracing::warn!(path = %self.tmp.display(), error = %e, "Could not remove temp file");
        }
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Drain `outtake` into `writer` and finalize the output.
///
/// On a write failure or a panic the ring is closed (which cancels the
/// worker) and the crash-consistent recovery path runs before the error is
/// returned. Returns the number of records written.
///
/// # Errors
///
/// Returns the write failure, or [`WriterError::Panicked`] if serialization
/// panicked.
pub fn run_stage(
    mut writer: OutputWriter,
    outtake: &RingBuffer<Config>,
    pool: &ConfigPool,
) -> Result<usize, WriterError> {
    let drained = panic::catch_unwind(AssertUnwindSafe(|| -> Result<(), WriterError> {
        while let Some(config) = outtake.read() {
            let result = writer.write_record(&config);
            pool.release_clone(config);
            result?;
        }
        Ok(())
    }));

    let failure = match drained {
        Ok(Ok(())) => return writer.finish(),
        Ok(Err(e)) => e,
        Err(payload) => WriterError::Panicked(panic_message(payload.as_ref())),
    };
    outtake.close();
    tracing::error!(error = %failure, "Writer failed, recovering output");
    match writer.recover() {
        Ok(records) => tracing::warn!(records, "Output recovered with untouched tail"),
        Err(e) => tracing::error!(error = %e, "Output recovery failed"),
    }
    Err(failure)
}

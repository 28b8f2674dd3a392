//! Line-oriented scanner for chain documents.
//!
//! Splits a source document into [`RawRecord`]s: a record name, its byte span
//! in the source, and the byte range of every `Key:value` field inside it.
//! No values are copied; everything is addressed by offset into the source.
//!
//! ```text
//! # comment
//! [login]
//! Type:http
//! URL:"http://localhost/login"
//! Body:`
//! {"user": "admin"}
//! `
//! [\login]
//! ```
//!
//! A block value opens with a fence of one or more backticks and closes at
//! the next line holding exactly the same fence, so a longer fence can wrap
//! content that contains shorter ones.

use std::ops::Range;

use reqchain_types::FormatError;

/// One `Key:value` line (or block) inside a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawField {
    /// Key as written in the source.
    pub key: String,
    /// Byte range of the value in the source.
    pub value: Range<usize>,
    /// Whole field in the source: from the key line through the closing
    /// fence of a block, line terminator included.
    pub span: Range<usize>,
}

/// One delimited record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub name: String,
    /// 1-based line of the opening tag.
    pub line: usize,
    /// Offset of the opening line.
    pub start: usize,
    /// Offset just past the closing line, newline included.
    pub end: usize,
    /// Offset of the closing tag line.
    pub close: usize,
    pub fields: Vec<RawField>,
}

impl RawRecord {
    /// Last field whose key matches `key` (ASCII case-insensitive).
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&RawField> {
        self.fields
            .iter()
            .rev()
            .find(|f| f.key.eq_ignore_ascii_case(key))
    }

    /// Value bytes of `key`, if present.
    #[must_use]
    pub fn value<'a>(&self, source: &'a [u8], key: &str) -> Option<&'a [u8]> {
        self.field(key).map(|f| &source[f.value.clone()])
    }
}

// ---------------------------------------------------------------------------
// Lines
// ---------------------------------------------------------------------------

struct Line<'a> {
    number: usize,
    /// Offset of the first byte of the line.
    start: usize,
    /// Offset of the first byte of the next line.
    next: usize,
    /// Content without the line terminator.
    text: &'a [u8],
}

struct Lines<'a> {
    source: &'a [u8],
    pos: usize,
    number: usize,
}

impl<'a> Iterator for Lines<'a> {
    type Item = Line<'a>;

    fn next(&mut self) -> Option<Line<'a>> {
        if self.pos >= self.source.len() {
            return None;
        }
        let start = self.pos;
        let rest = &self.source[start..];
        let (len, next) = match rest.iter().position(|&b| b == b'\n') {
            Some(i) => (i, start + i + 1),
            None => (rest.len(), self.source.len()),
        };
        let mut text = &rest[..len];
        if let [head @ .., b'\r'] = text {
            text = head;
        }
        self.pos = next;
        self.number += 1;
        Some(Line {
            number: self.number,
            start,
            next,
            text,
        })
    }
}

fn syntax(line: usize, reason: impl Into<String>) -> FormatError {
    FormatError::Syntax {
        line,
        reason: reason.into(),
    }
}

fn is_key_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// A run of one or more backticks and nothing else.
#[must_use]
pub fn is_fence(text: &[u8]) -> bool {
    !text.is_empty() && text.iter().all(|&b| b == b'`')
}

/// `[name]` -> `Some((false, name))`, `[\name]` or `[/name]` -> `Some((true, name))`.
fn parse_tag(trimmed: &[u8]) -> Option<(bool, &[u8])> {
    let inner = trimmed.strip_prefix(b"[")?.strip_suffix(b"]")?;
    match inner.first() {
        Some(b'\\' | b'/') => Some((true, inner[1..].trim_ascii())),
        _ => Some((false, inner.trim_ascii())),
    }
}

/// Range of `sub` within `source`; `sub` must be a subslice of it.
fn offset_of(source: &[u8], sub: &[u8]) -> usize {
    sub.as_ptr() as usize - source.as_ptr() as usize
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

struct OpenRecord {
    name: String,
    line: usize,
    start: usize,
    fields: Vec<RawField>,
}

struct OpenBlock {
    key: String,
    line: usize,
    /// Offset of the key line.
    field_start: usize,
    value_start: usize,
    fence: usize,
}

/// Scan a whole document into records, in source order.
///
/// # Errors
///
/// Returns [`FormatError::Syntax`] for stray content outside records,
/// malformed field lines, mismatched or missing closing tags, and
/// unterminated block values.
pub fn scan(source: &[u8]) -> Result<Vec<RawRecord>, FormatError> {
    let mut records = Vec::new();
    let mut open: Option<OpenRecord> = None;
    let mut block: Option<OpenBlock> = None;
    let lines = Lines {
        source,
        pos: 0,
        number: 0,
    };

    for line in lines {
        let trimmed = line.text.trim_ascii();

        if let Some(b) = block.take() {
            if trimmed.len() != b.fence || !is_fence(trimmed) {
                block = Some(b);
                continue;
            }
            // Exclude the line break before the closing backtick.
            let mut end = line.start.max(b.value_start);
            if end > b.value_start && source[end - 1] == b'\n' {
                end -= 1;
                if end > b.value_start && source[end - 1] == b'\r' {
                    end -= 1;
                }
            }
            if let Some(rec) = open.as_mut() {
                rec.fields.push(RawField {
                    key: b.key,
                    value: b.value_start..end,
                    span: b.field_start..line.next,
                });
            }
            continue;
        }

        if open.is_none() {
            if trimmed.is_empty() || trimmed.starts_with(b"#") {
                continue;
            }
            match parse_tag(trimmed) {
                Some((false, name)) if !name.is_empty() => {
                    open = Some(OpenRecord {
                        name: String::from_utf8_lossy(name).into_owned(),
                        line: line.number,
                        start: line.start,
                        fields: Vec::new(),
                    });
                }
                Some((true, name)) => {
                    return Err(syntax(
                        line.number,
                        format!(
                            "closing tag [\\{}] outside a record",
                            String::from_utf8_lossy(name)
                        ),
                    ));
                }
                _ => return Err(syntax(line.number, "expected a [name] record header")),
            }
            continue;
        }
        let Some(rec) = open.as_mut() else {
            continue;
        };

        if trimmed.is_empty() {
            continue;
        }

        if let Some((closing, name)) = parse_tag(trimmed) {
            let name = String::from_utf8_lossy(name);
            if !closing {
                return Err(syntax(
                    line.number,
                    format!("record [{}] opened before [{}] was closed", name, rec.name),
                ));
            }
            if name.as_ref() != rec.name.as_str() {
                return Err(syntax(
                    line.number,
                    format!("closing tag [\\{}] does not match [{}]", name, rec.name),
                ));
            }
            if let Some(rec) = open.take() {
                records.push(RawRecord {
                    name: rec.name,
                    line: rec.line,
                    start: rec.start,
                    end: line.next,
                    close: line.start,
                    fields: rec.fields,
                });
            }
            continue;
        }

        let Some(colon) = line.text.iter().position(|&b| b == b':') else {
            return Err(syntax(line.number, "expected Key:value"));
        };
        let key = line.text[..colon].trim_ascii();
        if key.is_empty() || !key.iter().all(|&b| is_key_byte(b)) {
            return Err(syntax(
                line.number,
                format!("invalid key {:?}", String::from_utf8_lossy(key)),
            ));
        }
        let key = String::from_utf8_lossy(key).into_owned();

        let mut value = line.text[colon + 1..].trim_ascii();
        if is_fence(value) {
            block = Some(OpenBlock {
                key,
                line: line.number,
                field_start: line.start,
                value_start: line.next,
                fence: value.len(),
            });
            continue;
        }
        if value.len() >= 2 && value.starts_with(b"\"") && value.ends_with(b"\"") {
            value = &value[1..value.len() - 1];
        }
        let start = offset_of(source, value);
        rec.fields.push(RawField {
            key,
            value: start..start + value.len(),
            span: line.start..line.next,
        });
    }

    if let Some(b) = block {
        return Err(syntax(
            b.line,
            format!("block value for {} is never closed", b.key),
        ));
    }
    if let Some(rec) = open {
        return Err(syntax(
            rec.line,
            format!("record [{}] is never closed", rec.name),
        ));
    }
    Ok(records)
}

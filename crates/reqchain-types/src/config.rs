//! Request declaration model.
//!
//! A [`Config`] is one record of the source document: shared metadata plus a
//! variant [`Payload`]. Configs are recycled through pools, so every
//! variable-length field is a byte buffer that [`Config::reset`] clears
//! without freeing.

use std::fmt;

use crate::dependency::Dependencies;
use crate::error::SpliceError;

// ---------------------------------------------------------------------------
// ConfigType
// ---------------------------------------------------------------------------

/// Declared `Type` of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigType {
    Http,
    Grpc,
    Repeat,
}

impl ConfigType {
    /// All variants, in pool order.
    pub const ALL: [ConfigType; 3] = [Self::Http, Self::Grpc, Self::Repeat];

    /// Tag as written in documents.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Grpc => "grpc",
            Self::Repeat => "repeat",
        }
    }

    /// Parse a `Type` value (ASCII case-insensitive, surrounding whitespace ignored).
    #[must_use]
    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        let tag = tag.trim_ascii();
        Self::ALL
            .into_iter()
            .find(|ty| tag.eq_ignore_ascii_case(ty.as_str().as_bytes()))
    }
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// FieldKey
// ---------------------------------------------------------------------------

/// Payload field that may carry instruction markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKey {
    Url,
    Method,
    Headers,
    Body,
    Target,
    Endpoint,
    Data,
    Metadata,
    ProtoPath,
    Replace,
}

impl FieldKey {
    const HTTP: [FieldKey; 4] = [Self::Url, Self::Method, Self::Headers, Self::Body];
    const GRPC: [FieldKey; 5] = [
        Self::Target,
        Self::Endpoint,
        Self::Data,
        Self::Metadata,
        Self::ProtoPath,
    ];
    const REPEAT: [FieldKey; 1] = [Self::Replace];

    /// Canonical key spelling used when serializing.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Url => "URL",
            Self::Method => "Method",
            Self::Headers => "Headers",
            Self::Body => "Body",
            Self::Target => "Target",
            Self::Endpoint => "Endpoint",
            Self::Data => "Data",
            Self::Metadata => "Metadata",
            Self::ProtoPath => "Proto_Path",
            Self::Replace => "Replace",
        }
    }

    /// Look up a document key (ASCII case-insensitive).
    #[must_use]
    pub fn from_key(key: &[u8]) -> Option<Self> {
        Self::HTTP
            .into_iter()
            .chain(Self::GRPC)
            .chain(Self::REPEAT)
            .find(|k| key.eq_ignore_ascii_case(k.name().as_bytes()))
    }

    /// Fields carried by a variant, in serialization order.
    #[must_use]
    pub fn for_type(ty: ConfigType) -> &'static [FieldKey] {
        match ty {
            ConfigType::Http => &Self::HTTP,
            ConfigType::Grpc => &Self::GRPC,
            ConfigType::Repeat => &Self::REPEAT,
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Variant payloads
// ---------------------------------------------------------------------------

/// HTTP request declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpConfig {
    pub url: Vec<u8>,
    pub method: Vec<u8>,
    pub headers: Vec<u8>,
    pub body: Vec<u8>,
}

/// gRPC request declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrpcConfig {
    pub target: Vec<u8>,
    pub endpoint: Vec<u8>,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
    pub proto_path: Vec<u8>,
}

/// Alias of an earlier declaration with field overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepeatConfig {
    /// Sequence ID of the aliased record; always lower than the repeat's own.
    pub target_id: usize,
    /// Raw `Replace` JSON object (field name -> replacement value).
    pub replace: Vec<u8>,
    /// Snapshot of the target's original declaration, attached by the parser.
    pub base: Option<Box<Config>>,
}

/// Variant-specific part of a [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Http(HttpConfig),
    Grpc(GrpcConfig),
    Repeat(RepeatConfig),
}

impl Payload {
    fn blank(ty: ConfigType) -> Self {
        match ty {
            ConfigType::Http => Self::Http(HttpConfig::default()),
            ConfigType::Grpc => Self::Grpc(GrpcConfig::default()),
            ConfigType::Repeat => Self::Repeat(RepeatConfig::default()),
        }
    }

    fn field(&self, key: FieldKey) -> Option<&Vec<u8>> {
        match (self, key) {
            (Self::Http(h), FieldKey::Url) => Some(&h.url),
            (Self::Http(h), FieldKey::Method) => Some(&h.method),
            (Self::Http(h), FieldKey::Headers) => Some(&h.headers),
            (Self::Http(h), FieldKey::Body) => Some(&h.body),
            (Self::Grpc(g), FieldKey::Target) => Some(&g.target),
            (Self::Grpc(g), FieldKey::Endpoint) => Some(&g.endpoint),
            (Self::Grpc(g), FieldKey::Data) => Some(&g.data),
            (Self::Grpc(g), FieldKey::Metadata) => Some(&g.metadata),
            (Self::Grpc(g), FieldKey::ProtoPath) => Some(&g.proto_path),
            (Self::Repeat(r), FieldKey::Replace) => Some(&r.replace),
            _ => None,
        }
    }

    fn field_mut(&mut self, key: FieldKey) -> Option<&mut Vec<u8>> {
        match (self, key) {
            (Self::Http(h), FieldKey::Url) => Some(&mut h.url),
            (Self::Http(h), FieldKey::Method) => Some(&mut h.method),
            (Self::Http(h), FieldKey::Headers) => Some(&mut h.headers),
            (Self::Http(h), FieldKey::Body) => Some(&mut h.body),
            (Self::Grpc(g), FieldKey::Target) => Some(&mut g.target),
            (Self::Grpc(g), FieldKey::Endpoint) => Some(&mut g.endpoint),
            (Self::Grpc(g), FieldKey::Data) => Some(&mut g.data),
            (Self::Grpc(g), FieldKey::Metadata) => Some(&mut g.metadata),
            (Self::Grpc(g), FieldKey::ProtoPath) => Some(&mut g.proto_path),
            (Self::Repeat(r), FieldKey::Replace) => Some(&mut r.replace),
            _ => None,
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Http(h) => {
                h.url.clear();
                h.method.clear();
                h.headers.clear();
                h.body.clear();
            }
            Self::Grpc(g) => {
                g.target.clear();
                g.endpoint.clear();
                g.data.clear();
                g.metadata.clear();
                g.proto_path.clear();
            }
            Self::Repeat(r) => {
                r.target_id = 0;
                r.replace.clear();
                r.base = None;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// One parsed request declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Record name (the `[name]` tag).
    pub name: String,
    /// Position in the source document; assigned once by the parser.
    pub id: usize,
    /// Byte offset where the record starts in the source.
    pub start_offset: usize,
    /// Byte offset just past the record's closing line in the source.
    pub end_offset: usize,
    /// Most recent response bytes.
    pub response: Vec<u8>,
    /// Cookie bytes.
    pub cookie: Vec<u8>,
    /// Unrecognized `key:value` pairs, preserved in declared order.
    pub extra: Vec<(String, Vec<u8>)>,
    /// Markers found in payload fields, in source order.
    pub deps: Dependencies,
    pub payload: Payload,
}

impl Config {
    /// A zero-valued config of the given variant.
    #[must_use]
    pub fn blank(ty: ConfigType) -> Self {
        Self {
            name: String::new(),
            id: 0,
            start_offset: 0,
            end_offset: 0,
            response: Vec::new(),
            cookie: Vec::new(),
            extra: Vec::new(),
            deps: Dependencies::new(),
            payload: Payload::blank(ty),
        }
    }

    #[must_use]
    pub fn config_type(&self) -> ConfigType {
        match self.payload {
            Payload::Http(_) => ConfigType::Http,
            Payload::Grpc(_) => ConfigType::Grpc,
            Payload::Repeat(_) => ConfigType::Repeat,
        }
    }

    /// Current bytes of a payload field, `None` if the variant lacks it.
    #[must_use]
    pub fn field(&self, key: FieldKey) -> Option<&[u8]> {
        self.payload.field(key).map(Vec::as_slice)
    }

    pub fn field_mut(&mut self, key: FieldKey) -> Option<&mut Vec<u8>> {
        self.payload.field_mut(key)
    }

    /// Overwrite a payload field.
    ///
    /// # Errors
    ///
    /// Returns [`SpliceError::MissingField`] if the variant has no such field.
    pub fn set_field(&mut self, key: FieldKey, value: &[u8]) -> Result<(), SpliceError> {
        let buf = self
            .payload
            .field_mut(key)
            .ok_or(SpliceError::MissingField(key))?;
        buf.clear();
        buf.extend_from_slice(value);
        Ok(())
    }

    /// Payload fields of this variant in serialization order.
    pub fn fields(&self) -> impl Iterator<Item = (FieldKey, &[u8])> + '_ {
        FieldKey::for_type(self.config_type())
            .iter()
            .filter_map(move |&key| self.field(key).map(|v| (key, v)))
    }

    /// Replace bytes `[start, end)` of `key` with `replacement`.
    ///
    /// The field buffer grows or shrinks to the new size; no other byte of the
    /// field changes. `start == end` inserts.
    ///
    /// # Errors
    ///
    /// Returns an error, leaving the field untouched, if the field is missing
    /// or the range does not fit its current length.
    pub fn splice(
        &mut self,
        key: FieldKey,
        start: usize,
        end: usize,
        replacement: &[u8],
    ) -> Result<(), SpliceError> {
        let buf = self
            .payload
            .field_mut(key)
            .ok_or(SpliceError::MissingField(key))?;
        if start > end || end > buf.len() {
            return Err(SpliceError::OutOfRange {
                start,
                end,
                len: buf.len(),
            });
        }
        buf.splice(start..end, replacement.iter().copied());
        Ok(())
    }

    /// Overwrite fields verbatim and drop dependencies anchored in them.
    ///
    /// Returns the keys this variant does not carry.
    pub fn apply_overrides(&mut self, overrides: &[(FieldKey, Vec<u8>)]) -> Vec<FieldKey> {
        let mut unknown = Vec::new();
        for (key, value) in overrides {
            if self.set_field(*key, value).is_err() {
                unknown.push(*key);
                continue;
            }
            self.deps.retain(|d| d.key != *key);
        }
        unknown
    }

    /// Target of a repeat config.
    #[must_use]
    pub fn repeat_target(&self) -> Option<usize> {
        match &self.payload {
            Payload::Repeat(r) => Some(r.target_id),
            _ => None,
        }
    }

    /// Reset every field to its zero value, keeping buffer capacity and variant.
    pub fn reset(&mut self) {
        self.name.clear();
        self.id = 0;
        self.start_offset = 0;
        self.end_offset = 0;
        self.response.clear();
        self.cookie.clear();
        self.extra.clear();
        self.deps.clear();
        self.payload.reset();
    }

    /// Deep-copy everything the writer serializes from `other` into `self`,
    /// reusing this instance's buffers. The repeat base snapshot and the
    /// dependency list are not copied.
    pub fn copy_for_output(&mut self, other: &Config) {
        self.reset();
        if self.config_type() != other.config_type() {
            self.payload = Payload::blank(other.config_type());
        }
        self.name.push_str(&other.name);
        self.id = other.id;
        self.start_offset = other.start_offset;
        self.end_offset = other.end_offset;
        self.response.extend_from_slice(&other.response);
        self.cookie.extend_from_slice(&other.cookie);
        self.extra
            .extend(other.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        for (key, value) in other.fields() {
            if let Some(buf) = self.payload.field_mut(key) {
                buf.extend_from_slice(value);
            }
        }
        if let (Payload::Repeat(dst), Payload::Repeat(src)) = (&mut self.payload, &other.payload) {
            dst.target_id = src.target_id;
        }
    }
}

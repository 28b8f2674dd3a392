//! Translation between config fields and HTTP request/response parts.

/// Parse a `Headers` field: one `Key: Value` per line.
///
/// Blank lines and `{` / `}` framing are ignored, as is leading indentation.
/// Lines without a colon are skipped.
#[must_use]
pub fn parse_headers(block: &[u8]) -> Vec<(String, String)> {
    let mut headers = Vec::new();
    for line in block.split(|&b| b == b'\n') {
        let line = line.trim_ascii();
        if matches!(line, b"" | b"{" | b"}" | b"{}") {
            continue;
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            tracing::debug!(line = %String::from_utf8_lossy(line), "Skipping header line without ':'");
            continue;
        };
        let name = line[..colon].trim_ascii();
        if name.is_empty() {
            continue;
        }
        headers.push((
            String::from_utf8_lossy(name).into_owned(),
            String::from_utf8_lossy(line[colon + 1..].trim_ascii()).into_owned(),
        ));
    }
    headers
}

/// Whether the declared headers mark the body as JSON.
#[must_use]
pub fn is_json_content_type(headers: &[(String, String)]) -> bool {
    headers.iter().any(|(name, value)| {
        name.eq_ignore_ascii_case("content-type") && value.to_ascii_lowercase().contains("json")
    })
}

/// Strip per-line leading indentation and trim the whole body.
#[must_use]
pub fn normalize_body(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    for (i, line) in body.split(|&b| b == b'\n').enumerate() {
        if i > 0 {
            out.push(b'\n');
        }
        let start = line
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(line.len());
        out.extend_from_slice(&line[start..]);
    }
    out.trim_ascii().to_vec()
}

/// Append `name=value` pairs from `Set-Cookie` values to `out`, `; `
/// separated, ready for use as a `Cookie` header.
pub fn append_cookie_pairs<'a>(set_cookies: impl IntoIterator<Item = &'a [u8]>, out: &mut Vec<u8>) {
    for value in set_cookies {
        let pair = value
            .split(|&b| b == b';')
            .next()
            .unwrap_or_default()
            .trim_ascii();
        if pair.is_empty() || !pair.contains(&b'=') {
            continue;
        }
        if !out.is_empty() {
            out.extend_from_slice(b"; ");
        }
        out.extend_from_slice(pair);
    }
}

//! Inline instruction marker extraction.
//!
//! Markers look like `{RESPONSE id=<N> [none|json:<path>]}` or
//! `{COOKIES id=<N>}`. Any other brace is ordinary text, so JSON bodies can
//! carry markers without escaping.

use reqchain_types::{Dependencies, Dependency, Extraction, FieldKey, FormatError, Instruction};

const RESPONSE: &[u8] = b"RESPONSE";
const COOKIES: &[u8] = b"COOKIES";

/// Keyword at `value[pos..]` if a marker opens at `pos` (which holds `{`).
fn keyword_at(value: &[u8], pos: usize) -> Option<&'static [u8]> {
    let rest = &value[pos + 1..];
    [RESPONSE, COOKIES].into_iter().find(|kw| {
        rest.starts_with(kw)
            && rest
                .get(kw.len())
                .is_some_and(|&b| b == b'}' || b.is_ascii_whitespace())
    })
}

fn parse_instruction(keyword: &[u8], tokens: &[&[u8]]) -> Result<Instruction, &'static str> {
    if keyword == COOKIES {
        return match tokens {
            [] => Ok(Instruction::Cookies),
            _ => Err("COOKIES takes no extraction policy"),
        };
    }
    match tokens {
        [] | [b"none"] => Ok(Instruction::Response(Extraction::Flatten)),
        [policy] => match policy.strip_prefix(b"json:") {
            Some(path) if !path.is_empty() => Ok(Instruction::Response(Extraction::JsonPath(
                String::from_utf8_lossy(path).into_owned(),
            ))),
            Some(_) => Err("empty json path"),
            None => Err("unknown extraction policy"),
        },
        _ => Err("unexpected tokens after policy"),
    }
}

/// Append every marker in `value` to `out` as a dependency of field `key`.
///
/// Ranges are relative to the start of `value`. Target validation is left to
/// the caller, which knows the referencing record's position.
///
/// # Errors
///
/// Returns [`FormatError::MalformedMarker`] for a missing `id=`, a
/// non-numeric id, a bad policy, or a marker with no closing brace.
pub fn extract_markers(
    record: usize,
    key: FieldKey,
    value: &[u8],
    out: &mut Dependencies,
) -> Result<(), FormatError> {
    let malformed = |offset: usize, reason: &'static str| FormatError::MalformedMarker {
        record,
        field: key,
        offset,
        reason,
    };

    let mut pos = 0;
    while let Some(found) = value[pos..].iter().position(|&b| b == b'{') {
        let start = pos + found;
        let Some(keyword) = keyword_at(value, start) else {
            pos = start + 1;
            continue;
        };

        let body_start = start + 1 + keyword.len();
        let close = value[body_start..]
            .iter()
            .position(|&b| matches!(b, b'}' | b'{' | b'\n'))
            .map(|i| body_start + i)
            .filter(|&i| value[i] == b'}')
            .ok_or_else(|| malformed(start, "unterminated marker"))?;

        let tokens: Vec<&[u8]> = value[body_start..close]
            .split(u8::is_ascii_whitespace)
            .filter(|t| !t.is_empty())
            .collect();
        let Some((id_token, rest)) = tokens.split_first() else {
            return Err(malformed(start, "missing id="));
        };
        let Some(digits) = id_token.strip_prefix(b"id=") else {
            return Err(malformed(start, "missing id="));
        };
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return Err(malformed(start, "non-numeric id"));
        }
        let target_id = std::str::from_utf8(digits)
            .ok()
            .and_then(|d| d.parse::<usize>().ok())
            .ok_or_else(|| malformed(start, "non-numeric id"))?;
        let instruction = parse_instruction(keyword, rest).map_err(|r| malformed(start, r))?;

        out.push(Dependency {
            target_id,
            start,
            end: close + 1,
            key,
            instruction,
        });
        pos = close + 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn markers(value: &str) -> Result<Dependencies, FormatError> {
        let mut out = Dependencies::new();
        extract_markers(3, FieldKey::Url, value.as_bytes(), &mut out)?;
        Ok(out)
    }

    #[rstest]
    #[case("{RESPONSE id=0}", 0, Instruction::Response(Extraction::Flatten))]
    #[case("{RESPONSE id=1 none}", 1, Instruction::Response(Extraction::Flatten))]
    #[case(
        "{RESPONSE id=2 json:data.token}",
        2,
        Instruction::Response(Extraction::JsonPath("data.token".into()))
    )]
    #[case("{COOKIES id=12}", 12, Instruction::Cookies)]
    fn single_marker(#[case] value: &str, #[case] target: usize, #[case] instruction: Instruction) {
        let deps = markers(value).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].target_id, target);
        assert_eq!(deps[0].start, 0);
        assert_eq!(deps[0].end, value.len());
        assert_eq!(deps[0].instruction, instruction);
    }

    #[rstest]
    #[case("{RESPONSE}", "missing id=")]
    #[case("{RESPONSE json:a}", "missing id=")]
    #[case("{COOKIES id=}", "non-numeric id")]
    #[case("{COOKIES id=-1}", "non-numeric id")]
    #[case("{RESPONSE id=x1 none}", "non-numeric id")]
    #[case("{RESPONSE id=0 json:a", "unterminated marker")]
    #[case("{RESPONSE id=0 {\"a\":1}", "unterminated marker")]
    #[case("{RESPONSE id=0 xml:a}", "unknown extraction policy")]
    #[case("{RESPONSE id=0 json:}", "empty json path")]
    #[case("{RESPONSE id=0 none json:a}", "unexpected tokens after policy")]
    #[case("{COOKIES id=0 none}", "COOKIES takes no extraction policy")]
    fn malformed_marker(#[case] value: &str, #[case] reason: &str) {
        match markers(value) {
            Err(FormatError::MalformedMarker {
                record,
                field,
                offset,
                reason: got,
            }) => {
                assert_eq!(record, 3);
                assert_eq!(field, FieldKey::Url);
                assert_eq!(offset, 0);
                assert_eq!(got, reason);
            }
            other => panic!("expected malformed marker, got {other:?}"),
        }
    }

    #[test]
    fn ranges_are_field_relative_and_ordered() {
        let value = "http://b/{RESPONSE id=0 json:id}/x?c={COOKIES id=1}";
        let deps = markers(value).unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(&value[deps[0].start..deps[0].end], "{RESPONSE id=0 json:id}");
        assert_eq!(&value[deps[1].start..deps[1].end], "{COOKIES id=1}");
        assert!(deps[0].end <= deps[1].start);
    }

    #[test]
    fn plain_json_braces_are_ignored() {
        let value = r#"{"user": {"name": "a"}, "token": "{RESPONSE id=0 json:t}"}"#;
        let deps = markers(value).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(&value[deps[0].start..deps[0].end], "{RESPONSE id=0 json:t}");
    }

    #[test]
    fn lowercase_keyword_is_text() {
        assert!(markers("{response id=0}").unwrap().is_empty());
        assert!(markers("{RESPONSEX id=0}").unwrap().is_empty());
        assert!(markers("{ RESPONSE id=0}").unwrap().is_empty());
    }
}

//! Extraction of `BODY[HEADER]` data from FETCH responses.

use crate::types::SeqNum;
use crate::{Error, Result};

const SECTION: &[u8] = b"BODY[HEADER]";

/// Extracts the header bytes for `seq` from a raw FETCH response.
///
/// Returns `Ok(None)` if the response is not a FETCH for `seq`, does not
/// carry a `BODY[HEADER]` item, or carries `NIL`.
pub fn header_section(response: &[u8], seq: SeqNum) -> Result<Option<Vec<u8>>> {
    let prefix = format!("* {seq} FETCH ");
    if !starts_with_ignore_case(response, prefix.as_bytes()) {
        return Ok(None);
    }

    let Some(start) = find_ignore_case(response, SECTION) else {
        return Ok(None);
    };
    let mut rest = &response[start + SECTION.len()..];
    while let [b' ', tail @ ..] = rest {
        rest = tail;
    }

    match rest.first() {
        Some(b'{') => read_literal(rest).map(Some),
        Some(b'"') => read_quoted(rest).map(Some),
        _ if starts_with_ignore_case(rest, b"NIL") => Ok(None),
        _ => Err(Error::Parse(format!(
            "unexpected BODY[HEADER] value for message {seq}"
        ))),
    }
}

fn read_literal(data: &[u8]) -> Result<Vec<u8>> {
    let close = data
        .iter()
        .position(|&b| b == b'}')
        .ok_or_else(|| Error::Parse("unterminated literal length".to_string()))?;
    let digits = &data[1..close];
    let digits = digits.strip_suffix(b"+").unwrap_or(digits);
    let len: usize = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Parse("invalid literal length".to_string()))?;

    let body = data[close + 1..]
        .strip_prefix(b"\r\n")
        .or_else(|| data[close + 1..].strip_prefix(b"\n"))
        .ok_or_else(|| Error::Parse("literal length not followed by newline".to_string()))?;

    body.get(..len)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| Error::Parse("literal shorter than announced".to_string()))
}

fn read_quoted(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut escaped = false;
    for &b in &data[1..] {
        match (escaped, b) {
            (true, _) => {
                out.push(b);
                escaped = false;
            }
            (false, b'\\') => escaped = true,
            (false, b'"') => return Ok(out),
            (false, _) => out.push(b),
        }
    }
    Err(Error::Parse("unterminated quoted string".to_string()))
}

fn starts_with_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .get(..needle.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(needle))
}

fn find_ignore_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn seq(n: u32) -> SeqNum {
        SeqNum::new(n).unwrap()
    }

    #[test]
    fn test_literal_header() {
        let raw = b"* 3085 FETCH (BODY[HEADER] {22}\r\nSubject: hi\r\nTo: a\r\n\r\n)\r\n";
        let header = header_section(raw, seq(3085)).unwrap().unwrap();
        assert_eq!(header, b"Subject: hi\r\nTo: a\r\n\r\n");
    }

    #[test]
    fn test_other_items_before_section() {
        let raw = b"* 7 FETCH (FLAGS (\\Recent) body[header] {5}\r\nA: b\n)\r\n";
        assert_eq!(header_section(raw, seq(7)).unwrap().unwrap(), b"A: b\n");
    }

    #[test]
    fn test_quoted_and_nil() {
        let raw = b"* 2 FETCH (BODY[HEADER] \"X: \\\"y\\\"\")\r\n";
        assert_eq!(header_section(raw, seq(2)).unwrap().unwrap(), b"X: \"y\"");
        let nil = b"* 2 FETCH (BODY[HEADER] NIL)\r\n";
        assert!(header_section(nil, seq(2)).unwrap().is_none());
    }

    #[test]
    fn test_other_message_ignored() {
        let raw = b"* 30 FETCH (BODY[HEADER] {4}\r\nA: b)\r\n";
        assert!(header_section(raw, seq(3)).unwrap().is_none());
        assert!(header_section(b"* 3 FETCH (FLAGS ())\r\n", seq(3)).unwrap().is_none());
    }

    #[test]
    fn test_truncated_literal() {
        let raw = b"* 3 FETCH (BODY[HEADER] {40}\r\nA: b)\r\n";
        assert!(header_section(raw, seq(3)).is_err());
    }
}

//! Parsing of fetched `BODY[HEADER]` blobs.
//!
//! Field names and raw values come from a small tokenizer that keeps keys
//! exactly as received and lets later occurrences overwrite earlier ones.
//! `mail-parser` supplies the decoded subject and the declared content types.

use std::collections::BTreeMap;

use mail_parser::{Message, MimeHeaders};

use crate::{Error, Result};

/// Structured view of one message header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedHeader {
    /// Raw `Date` value, or empty.
    pub date: String,
    /// Decoded subject, or empty.
    pub subject: String,
    /// Field name to unfolded value; the last occurrence wins.
    pub headers: BTreeMap<String, String>,
    /// Content types declared by the message's parts, in order.
    pub mime_types: Vec<String>,
}

/// Parses a raw header blob.
///
/// # Errors
///
/// Returns [`Error::MalformedHeader`] when the bytes do not form an
/// internet message header.
pub fn parse_header(raw: &[u8]) -> Result<ParsedHeader> {
    let text = String::from_utf8_lossy(raw);
    let headers = tokenize(&text)?;

    let message = Message::parse(raw)
        .ok_or_else(|| Error::MalformedHeader("unparseable message header".to_string()))?;

    let subject = message
        .subject()
        .map(str::to_string)
        .or_else(|| headers.get("Subject").cloned())
        .unwrap_or_default();
    let date = headers.get("Date").cloned().unwrap_or_default();

    let mime_types = message
        .parts
        .iter()
        .filter_map(|part| part.content_type())
        .map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub).to_ascii_lowercase(),
            None => ct.ctype().to_ascii_lowercase(),
        })
        .collect();

    Ok(ParsedHeader {
        date,
        subject,
        headers,
        mime_types,
    })
}

pub(crate) fn tokenize(text: &str) -> Result<BTreeMap<String, String>> {
    let mut headers = BTreeMap::new();
    let mut current: Option<(String, String)> = None;

    for line in text.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            break;
        }

        if line.starts_with([' ', '\t']) {
            let Some((_, value)) = current.as_mut() else {
                return Err(Error::MalformedHeader(
                    "continuation line before first field".to_string(),
                ));
            };
            if !value.is_empty() {
                value.push(' ');
            }
            value.push_str(line.trim());
            continue;
        }

        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::MalformedHeader(format!("line without field name: {line:?}")));
        };
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(Error::MalformedHeader(format!("invalid field name: {name:?}")));
        }

        if let Some((name, value)) = current.take() {
            headers.insert(name, value);
        }
        current = Some((name.to_string(), value.trim().to_string()));
    }

    if let Some((name, value)) = current {
        headers.insert(name, value);
    }

    if headers.is_empty() {
        return Err(Error::MalformedHeader("no header fields".to_string()));
    }
    Ok(headers)
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

    const HEADER: &[u8] = b"Return-Path: <mail@test.adp>\r\n\
Date: Fri, 25 Aug 2023 02:53:48 +0000\r\n\
From: YAMB <mail@test.adp>\r\n\
To: \"mailbot\" <email@none.bot>\r\n\
Cc: mailbot2 <bot@none.mail>\r\n\
Subject: =?utf-8?B?5rWL6K+V6YKu5Lu2Nw==?=\r\n\
Message-ID: <1111>\r\n\
Content-Type: multipart/mixed;\r\n\
\tboundary=\"b1\"\r\n\
\r\n";

    #[test]
    fn test_parse_header() {
        let parsed = parse_header(HEADER).unwrap();
        assert_eq!(parsed.date, "Fri, 25 Aug 2023 02:53:48 +0000");
        assert_eq!(parsed.subject, "测试邮件7");
        assert_eq!(parsed.headers["From"], "YAMB <mail@test.adp>");
        assert_eq!(parsed.headers["Message-ID"], "<1111>");
        assert_eq!(
            parsed.headers["Content-Type"],
            "multipart/mixed; boundary=\"b1\""
        );
        assert_eq!(parsed.mime_types.first().unwrap(), "multipart/mixed");
    }

    #[test]
    fn test_last_occurrence_wins() {
        let raw = b"Received: from a\r\nReceived: from b\r\nSubject: x\r\n\r\n";
        let parsed = parse_header(raw).unwrap();
        assert_eq!(parsed.headers["Received"], "from b");
    }

    #[test]
    fn test_keys_keep_case() {
        let raw = b"message-id: <2>\r\nSubject: x\r\n\r\n";
        let parsed = parse_header(raw).unwrap();
        assert!(parsed.headers.contains_key("message-id"));
        assert!(!parsed.headers.contains_key("Message-ID"));
    }

    #[test]
    fn test_missing_fields_are_empty() {
        let parsed = parse_header(b"X-Mailer: test\r\n\r\n").unwrap();
        assert_eq!(parsed.date, "");
        assert_eq!(parsed.subject, "");
        assert!(parsed.mime_types.is_empty());
    }

    #[test]
    fn test_body_after_blank_line_ignored() {
        let raw = b"Subject: hi\n\nthis is: not a header\n";
        let parsed = parse_header(raw).unwrap();
        assert_eq!(parsed.headers.len(), 1);
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(parse_header(b""), Err(Error::MalformedHeader(_))));
        assert!(matches!(
            parse_header(b"not a header at all\r\n\r\n"),
            Err(Error::MalformedHeader(_))
        ));
        assert!(matches!(
            parse_header(b" folded: first\r\n\r\n"),
            Err(Error::MalformedHeader(_))
        ));
        assert!(matches!(
            parse_header(b"Bad Name: x\r\n\r\n"),
            Err(Error::MalformedHeader(_))
        ));
    }
}

//! IMAP response parser.
//!
//! A line-level parser covering the responses seen while logging in,
//! selecting a mailbox and idling. Literal payloads are left in the raw
//! bytes; [`fetch`] extracts them for FETCH responses.

pub mod fetch;

use crate::types::{SeqNum, Status};
use crate::{Error, Result};

/// A parsed server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Tagged completion of a command.
    Tagged {
        /// Command tag.
        tag: String,
        /// Completion status.
        status: Status,
        /// Human-readable text (including any response code).
        text: String,
    },
    /// Untagged (`*`) data.
    Untagged(Untagged),
    /// Continuation request (`+`).
    Continuation {
        /// Text following the `+`.
        text: String,
    },
}

/// Untagged response data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Untagged {
    /// Status response (`* OK`, `* NO`, `* BAD`, `* PREAUTH`, `* BYE`).
    Status {
        /// Status keyword.
        status: Status,
        /// Remaining text.
        text: String,
    },
    /// `* n EXISTS`.
    Exists(u32),
    /// `* n RECENT`.
    Recent(u32),
    /// `* n EXPUNGE`.
    Expunge(SeqNum),
    /// `* n FETCH (...)`.
    Fetch {
        /// Message sequence number.
        seq: SeqNum,
    },
    /// `* CAPABILITY ...`.
    Capability(Vec<String>),
    /// Anything else, with the first line kept as text.
    Other(String),
}

impl Response {
    /// Parses a complete response as returned by the framed stream.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let line = first_line(bytes);
        let mut parts = line.splitn(2, ' ');
        let head = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default();

        match head {
            "" => Err(Error::Parse("empty response".to_string())),
            "+" => Ok(Self::Continuation {
                text: rest.to_string(),
            }),
            "*" => Ok(Self::Untagged(parse_untagged(rest))),
            tag => {
                let (word, text) = split_word(rest);
                let status = Status::from_keyword(word)
                    .ok_or_else(|| Error::Parse(format!("invalid tagged response: {line}")))?;
                Ok(Self::Tagged {
                    tag: tag.to_string(),
                    status,
                    text: text.to_string(),
                })
            }
        }
    }
}

fn parse_untagged(rest: &str) -> Untagged {
    let (first, tail) = split_word(rest);

    if let Some(status) = Status::from_keyword(first) {
        return Untagged::Status {
            status,
            text: tail.to_string(),
        };
    }

    if first.eq_ignore_ascii_case("CAPABILITY") {
        return Untagged::Capability(tail.split_whitespace().map(str::to_string).collect());
    }

    if let Ok(n) = first.parse::<u32>() {
        let (keyword, _) = split_word(tail);
        let parsed = match keyword.to_ascii_uppercase().as_str() {
            "EXISTS" => Some(Untagged::Exists(n)),
            "RECENT" => Some(Untagged::Recent(n)),
            "EXPUNGE" => SeqNum::new(n).map(Untagged::Expunge),
            "FETCH" => SeqNum::new(n).map(|seq| Untagged::Fetch { seq }),
            _ => None,
        };
        if let Some(untagged) = parsed {
            return untagged;
        }
    }

    Untagged::Other(rest.to_string())
}

/// Returns the first line of a response as text, without the line ending.
pub(crate) fn first_line(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(bytes.len());
    let line = &bytes[..end];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

fn split_word(s: &str) -> (&str, &str) {
    s.split_once(' ').unwrap_or((s, ""))
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

    #[test]
    fn test_parse_tagged() {
        let response = Response::parse(b"A0001 NO [AUTHENTICATIONFAILED] nope\r\n").unwrap();
        assert_eq!(
            response,
            Response::Tagged {
                tag: "A0001".to_string(),
                status: Status::No,
                text: "[AUTHENTICATIONFAILED] nope".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_greeting() {
        let response = Response::parse(b"* OK [CAPABILITY IMAP4rev1 IDLE] ready\r\n").unwrap();
        assert!(matches!(
            response,
            Response::Untagged(Untagged::Status {
                status: Status::Ok,
                ..
            })
        ));
    }

    #[test]
    fn test_parse_counts() {
        assert_eq!(
            Response::parse(b"* 3085 EXISTS\r\n").unwrap(),
            Response::Untagged(Untagged::Exists(3085))
        );
        assert_eq!(
            Response::parse(b"* 2 recent\r\n").unwrap(),
            Response::Untagged(Untagged::Recent(2))
        );
        assert_eq!(
            Response::parse(b"* 4 EXPUNGE\r\n").unwrap(),
            Response::Untagged(Untagged::Expunge(SeqNum::new(4).unwrap()))
        );
    }

    #[test]
    fn test_parse_fetch_with_literal() {
        let raw = b"* 12 FETCH (BODY[HEADER] {4}\r\nA: b)\r\n";
        assert_eq!(
            Response::parse(raw).unwrap(),
            Response::Untagged(Untagged::Fetch {
                seq: SeqNum::new(12).unwrap()
            })
        );
    }

    #[test]
    fn test_parse_capability_and_other() {
        assert_eq!(
            Response::parse(b"* CAPABILITY IMAP4rev1 IDLE\r\n").unwrap(),
            Response::Untagged(Untagged::Capability(vec![
                "IMAP4rev1".to_string(),
                "IDLE".to_string()
            ]))
        );
        assert_eq!(
            Response::parse(b"* FLAGS (\\Seen)\r\n").unwrap(),
            Response::Untagged(Untagged::Other("FLAGS (\\Seen)".to_string()))
        );
    }

    #[test]
    fn test_parse_continuation() {
        assert_eq!(
            Response::parse(b"+ idling\r\n").unwrap(),
            Response::Continuation {
                text: "idling".to_string()
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(Response::parse(b"\r\n").is_err());
        assert!(Response::parse(b"A0001 MAYBE\r\n").is_err());
    }
}

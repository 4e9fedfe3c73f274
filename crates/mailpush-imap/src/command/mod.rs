//! IMAP command builder.
//!
//! Only the commands the push loop needs are modelled. Anything else goes
//! through [`Command::Raw`].

mod tag_generator;

pub use tag_generator::TagGenerator;

use crate::types::SeqNum;

/// IMAP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// LOGOUT command.
    Logout,
    /// LOGIN command.
    Login {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
    /// SELECT command.
    Select {
        /// Mailbox to select.
        mailbox: String,
    },
    /// FETCH of the header section of a single message.
    FetchHeader {
        /// Message sequence number.
        seq: SeqNum,
    },
    /// IDLE command (RFC 2177).
    Idle,
    /// DONE (terminates IDLE, sent without a tag).
    Done,
    /// Arbitrary command. Arguments are written verbatim, separated by spaces.
    Raw {
        /// Command name.
        name: String,
        /// Command arguments.
        args: Vec<String>,
    },
}

impl Command {
    /// Serializes the command with the given tag, including the trailing CRLF.
    #[must_use]
    pub fn serialize(&self, tag: &str) -> Vec<u8> {
        let mut buf = Vec::new();

        // DONE doesn't get a tag (it's sent during IDLE)
        if !matches!(self, Self::Done) {
            buf.extend_from_slice(tag.as_bytes());
            buf.push(b' ');
        }

        match self {
            Self::Logout => buf.extend_from_slice(b"LOGOUT"),
            Self::Login { username, password } => {
                buf.extend_from_slice(b"LOGIN ");
                write_astring(&mut buf, username);
                buf.push(b' ');
                write_astring(&mut buf, password);
            }
            Self::Select { mailbox } => {
                buf.extend_from_slice(b"SELECT ");
                write_astring(&mut buf, mailbox);
            }
            Self::FetchHeader { seq } => {
                buf.extend_from_slice(format!("FETCH {seq} BODY[HEADER]").as_bytes());
            }
            Self::Idle => buf.extend_from_slice(b"IDLE"),
            Self::Done => buf.extend_from_slice(b"DONE"),
            Self::Raw { name, args } => {
                buf.extend_from_slice(name.to_ascii_uppercase().as_bytes());
                for arg in args {
                    buf.push(b' ');
                    buf.extend_from_slice(arg.as_bytes());
                }
            }
        }

        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// Returns a loggable form of the command with credentials masked.
    #[must_use]
    pub fn redacted(&self) -> String {
        match self {
            Self::Login { username, .. } => format!("LOGIN {username} ****"),
            Self::Raw { name, .. } => name.to_ascii_uppercase(),
            other => {
                let bytes = other.serialize("");
                String::from_utf8_lossy(&bytes).trim().to_string()
            }
        }
    }
}

/// Writes an astring (atom or quoted string).
pub(crate) fn write_astring(buf: &mut Vec<u8>, s: &str) {
    if s.is_empty() || s.bytes().any(needs_quoting) {
        buf.push(b'"');
        for b in s.bytes() {
            if b == b'"' || b == b'\\' {
                buf.push(b'\\');
            }
            buf.push(b);
        }
        buf.push(b'"');
    } else {
        buf.extend_from_slice(s.as_bytes());
    }
}

/// Returns true if the byte needs quoting.
const fn needs_quoting(b: u8) -> bool {
    matches!(b, b' ' | b'"' | b'\\' | b'(' | b')' | b'{' | b'%' | b'*') || b < 0x20 || b == 0x7F
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
    fn test_login_command() {
        let cmd = Command::Login {
            username: "email@none.bot".to_string(),
            password: "pass word".to_string(),
        };
        assert_eq!(
            cmd.serialize("A0000"),
            b"A0000 LOGIN email@none.bot \"pass word\"\r\n"
        );
        assert_eq!(cmd.redacted(), "LOGIN email@none.bot ****");
    }

    #[test]
    fn test_select_quotes_spaces() {
        let cmd = Command::Select {
            mailbox: "Sent Items".to_string(),
        };
        assert_eq!(cmd.serialize("A0001"), b"A0001 SELECT \"Sent Items\"\r\n");
        let inbox = Command::Select {
            mailbox: "INBOX".to_string(),
        };
        assert_eq!(inbox.serialize("A0001"), b"A0001 SELECT INBOX\r\n");
    }

    #[test]
    fn test_fetch_header() {
        let cmd = Command::FetchHeader {
            seq: SeqNum::new(3085).unwrap(),
        };
        assert_eq!(cmd.serialize("A0003"), b"A0003 FETCH 3085 BODY[HEADER]\r\n");
    }

    #[test]
    fn test_idle_and_done() {
        assert_eq!(Command::Idle.serialize("A0002"), b"A0002 IDLE\r\n");
        assert_eq!(Command::Done.serialize("A0002"), b"DONE\r\n");
    }

    #[test]
    fn test_raw_command() {
        let cmd = Command::Raw {
            name: "search".to_string(),
            args: vec!["UNSEEN".to_string(), "SINCE 1-Aug-2023".to_string()],
        };
        assert_eq!(
            cmd.serialize("A0004"),
            b"A0004 SEARCH UNSEEN SINCE 1-Aug-2023\r\n"
        );
        assert_eq!(cmd.redacted(), "SEARCH");
    }
}

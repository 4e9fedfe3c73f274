//! Classification of server pushes received while idling.

use crate::types::SeqNum;

/// Marker produced when an IDLE wait ends without server data.
pub const STOP_WAIT_SERVER_PUSH: &str = "stop_wait_server_push";

/// A server push, classified once and consumed exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Push {
    /// The wait ended without news. Idle should simply be renewed.
    Sentinel,
    /// The mailbox grew; the sequence number is the newest message.
    SizeChanged(SeqNum),
    /// Anything else, kept as text for logging.
    Unknown(String),
}

impl Push {
    /// Classifies a raw push line.
    #[must_use]
    pub fn classify(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();
        let body = line.strip_prefix("* ").unwrap_or(line).trim();

        if body.eq_ignore_ascii_case(STOP_WAIT_SERVER_PUSH) {
            return Self::Sentinel;
        }

        if let Some((count, keyword)) = body.split_once(' ')
            && keyword.trim().eq_ignore_ascii_case("EXISTS")
            && let Some(seq) = count.parse::<u32>().ok().and_then(SeqNum::new)
        {
            return Self::SizeChanged(seq);
        }

        Self::Unknown(line.to_string())
    }
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
    fn test_exists() {
        assert_eq!(
            Push::classify(b"* 3085 EXISTS\r\n"),
            Push::SizeChanged(SeqNum::new(3085).unwrap())
        );
        assert_eq!(
            Push::classify(b"3085 exists"),
            Push::SizeChanged(SeqNum::new(3085).unwrap())
        );
        assert!(matches!(Push::classify(b"* 1 EXISTS"), Push::SizeChanged(_)));
    }

    #[test]
    fn test_sentinel() {
        assert_eq!(Push::classify(b"stop_wait_server_push"), Push::Sentinel);
        assert_eq!(Push::classify(b"STOP_WAIT_SERVER_PUSH\r\n"), Push::Sentinel);
    }

    #[test]
    fn test_unknown() {
        assert_eq!(
            Push::classify(b"* 3 EXPUNGE\r\n"),
            Push::Unknown("* 3 EXPUNGE".to_string())
        );
        assert_eq!(
            Push::classify(b"* 0 EXISTS"),
            Push::Unknown("* 0 EXISTS".to_string())
        );
        assert_eq!(
            Push::classify(b"* many EXISTS"),
            Push::Unknown("* many EXISTS".to_string())
        );
        assert!(matches!(Push::classify(b"* 2 RECENT"), Push::Unknown(_)));
    }
}

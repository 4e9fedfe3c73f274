//! Error types for the core library.

use thiserror::Error;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Opening, greeting, LOGIN or SELECT failed. The attempt is abandoned
    /// and retried after the connect backoff.
    #[error("Connect failure: {0}")]
    ConnectFailure(#[source] mailpush_imap::Error),

    /// The live session broke while idling or fetching. The session is torn
    /// down and re-established after the session backoff.
    #[error("Protocol exception: {0}")]
    ProtocolException(#[source] mailpush_imap::Error),

    /// A passthrough command was rejected by the server.
    #[error("Command failed: {0}")]
    Command(#[source] mailpush_imap::Error),

    /// A fetched header blob could not be parsed.
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// No live session is registered for the identity.
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// The configured identity is not a structurally valid email address.
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// SMTP submission failed.
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

impl Error {
    /// Returns the log phase this error belongs to.
    #[must_use]
    pub const fn phase(&self) -> &'static str {
        match self {
            Self::ConnectFailure(_) => "connect",
            Self::ProtocolException(_) => "session",
            Self::Command(_) => "command",
            Self::MalformedHeader(_) => "parse",
            Self::UnknownSession(_) | Self::Delivery(_) => "dispatch",
            Self::InvalidIdentity(_) | Self::Config(_) | Self::Io(_) | Self::Json(_) => "config",
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase() {
        let err = Error::ConnectFailure(mailpush_imap::Error::Bye("busy".into()));
        assert_eq!(err.phase(), "connect");
        assert_eq!(err.to_string(), "Connect failure: Server sent BYE: busy");
        assert_eq!(Error::UnknownSession("a@b.c".into()).phase(), "dispatch");
    }
}

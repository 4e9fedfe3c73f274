//! Where and how to reach the server.

use std::time::Duration;

/// Transport security.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// Plaintext TCP, conventionally port 143.
    Plaintext,
    /// TLS from the first byte, conventionally port 993.
    #[default]
    Implicit,
}

impl Security {
    /// Maps a "use TLS" flag to a mode.
    #[must_use]
    pub const fn from_tls_flag(use_tls: bool) -> Self {
        if use_tls { Self::Implicit } else { Self::Plaintext }
    }

    /// Conventional port for the mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Plaintext => 143,
            Self::Implicit => 993,
        }
    }
}

/// Transport settings for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Server host name, also used for TLS verification.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Transport security.
    pub security: Security,
    /// Bound on TCP connect plus TLS handshake.
    pub connect_timeout: Duration,
}

impl Config {
    /// Implicit TLS on port 993 with a 30 second connect bound.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        let security = Security::default();
        Self {
            host: host.into(),
            port: security.default_port(),
            security,
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Overrides the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Overrides the security mode. The port is left as is.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Overrides the connect bound.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_implicit_tls() {
        let config = Config::new("imap.none.bot");
        assert_eq!(config.port, 993);
        assert_eq!(config.security, Security::Implicit);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_tls_flag() {
        assert_eq!(Security::from_tls_flag(true), Security::Implicit);
        assert_eq!(Security::from_tls_flag(false), Security::Plaintext);
        assert_eq!(Security::Plaintext.default_port(), 143);

        let config = Config::new("localhost")
            .security(Security::Plaintext)
            .port(1143)
            .connect_timeout(Duration::from_secs(10));
        assert_eq!(config.port, 1143);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }
}

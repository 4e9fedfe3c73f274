//! Configuration model types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validation::{ValidationError, validate_config};
use crate::{Error, Result};

const fn default_true() -> bool {
    true
}

const fn default_imap_port() -> u16 {
    993
}

const fn default_login_timeout() -> u64 {
    10
}

/// RFC 2177 asks clients to renew IDLE at least every 29 minutes.
const fn default_idle_timeout() -> u64 {
    29 * 60
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

const fn default_connect_backoff() -> u64 {
    10
}

const fn default_session_backoff() -> u64 {
    5
}

const fn default_shutdown_grace() -> u64 {
    5
}

/// Mailbox and server settings.
///
/// Durations are given in whole seconds. Unknown keys are ignored.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Mailbox user; also the session identity.
    pub user: String,
    /// Password or app credential, shared by IMAP and SMTP.
    pub password: String,
    /// SMTP server host.
    pub smtp_host: String,
    /// SMTP server port. `None` uses 465 with TLS and 25 without.
    #[serde(default)]
    pub smtp_port: Option<u16>,
    /// Use implicit TLS for SMTP.
    #[serde(default = "default_true")]
    pub smtp_use_tls: bool,
    /// IMAP server host.
    pub imap_host: String,
    /// IMAP server port.
    #[serde(default = "default_imap_port")]
    pub imap_port: u16,
    /// Bound on connecting, greeting, LOGIN and SELECT (seconds).
    #[serde(default = "default_login_timeout")]
    pub imap_login_timeout: u64,
    /// How long one IDLE lasts before it is renewed (seconds).
    #[serde(default = "default_idle_timeout")]
    pub imap_idle_timeout: u64,
    /// Use implicit TLS for IMAP.
    #[serde(default = "default_true")]
    pub imap_use_tls: bool,
    /// Mailbox to watch.
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    /// Delay after a failed connection attempt (seconds).
    #[serde(default = "default_connect_backoff")]
    pub connect_backoff: u64,
    /// Delay after an established session broke (seconds).
    #[serde(default = "default_session_backoff")]
    pub session_backoff: u64,
    /// How long shutdown waits for the supervisor (seconds).
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("user", &self.user)
            .field("password", &"****")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_use_tls", &self.smtp_use_tls)
            .field("imap_host", &self.imap_host)
            .field("imap_port", &self.imap_port)
            .field("imap_login_timeout", &self.imap_login_timeout)
            .field("imap_idle_timeout", &self.imap_idle_timeout)
            .field("imap_use_tls", &self.imap_use_tls)
            .field("mailbox", &self.mailbox)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Parses and validates a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] for malformed JSON, [`Error::InvalidIdentity`]
    /// for a bad `user`, and [`Error::Config`] for any other invalid field.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, otherwise the same
    /// errors as [`Config::from_json`].
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Default configuration file location: `<config dir>/mailpush/config.json`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mailpush").join("config.json"))
    }

    /// Checks every field, reporting an invalid identity ahead of anything else.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentity`] or [`Error::Config`].
    pub fn validate(&self) -> Result<()> {
        let Err(errors) = validate_config(self) else {
            return Ok(());
        };

        if errors
            .iter()
            .any(|e| matches!(e, ValidationError::EmptyUser | ValidationError::InvalidUser))
        {
            return Err(Error::InvalidIdentity(self.user.clone()));
        }

        let message = errors
            .iter()
            .map(|e| format!("{}: {}", e.field(), e.message()))
            .collect::<Vec<_>>()
            .join("; ");
        Err(Error::Config(message))
    }

    /// Builds the immutable connection request for the IMAP session.
    #[must_use]
    pub fn connect_request(&self) -> ConnectRequest {
        ConnectRequest {
            identity: self.user.clone(),
            password: self.password.clone(),
            host: self.imap_host.clone(),
            port: self.imap_port,
            use_tls: self.imap_use_tls,
            login_timeout: Duration::from_secs(self.imap_login_timeout),
            idle_timeout: Duration::from_secs(self.imap_idle_timeout),
            mailbox: self.mailbox.clone(),
        }
    }

    /// Builds SMTP delivery options from the configuration.
    #[must_use]
    pub fn delivery_options(&self) -> crate::DeliveryOptions {
        crate::DeliveryOptions {
            host: self.smtp_host.clone(),
            port: self.smtp_port,
            username: None,
            password: self.password.clone(),
            use_tls: self.smtp_use_tls,
            timeout: Duration::from_secs(self.imap_login_timeout),
        }
    }

    /// Reconnect delays for the supervisor.
    #[must_use]
    pub const fn backoff(&self) -> crate::Backoff {
        crate::Backoff {
            connect: Duration::from_secs(self.connect_backoff),
            session: Duration::from_secs(self.session_backoff),
        }
    }

    /// Bound on waiting for the supervisor at shutdown.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace)
    }
}

/// Immutable parameters for one IMAP session.
#[derive(Clone)]
pub struct ConnectRequest {
    /// Session identity (the mailbox user).
    pub identity: String,
    /// Credential used for LOGIN.
    pub password: String,
    /// IMAP server host.
    pub host: String,
    /// IMAP server port.
    pub port: u16,
    /// Implicit TLS when set, plaintext otherwise.
    pub use_tls: bool,
    /// Bound on connecting, greeting, LOGIN and SELECT.
    pub login_timeout: Duration,
    /// Lifetime of one IDLE before renewal.
    pub idle_timeout: Duration,
    /// Mailbox to select.
    pub mailbox: String,
}

impl std::fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("identity", &self.identity)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_tls", &self.use_tls)
            .field("login_timeout", &self.login_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("mailbox", &self.mailbox)
            .finish_non_exhaustive()
    }
}

impl ConnectRequest {
    /// Transport settings for the IMAP client.
    #[must_use]
    pub fn imap_config(&self) -> mailpush_imap::Config {
        mailpush_imap::Config::new(self.host.clone())
            .port(self.port)
            .security(mailpush_imap::Security::from_tls_flag(self.use_tls))
            .connect_timeout(self.login_timeout)
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

    const MINIMAL: &str = r#"{
        "user": "email@none.bot",
        "password": "secret",
        "smtp_host": "smtp.none.bot",
        "imap_host": "imap.none.bot",
        "log_level": "TRACE"
    }"#;

    #[test]
    fn test_defaults() {
        let config = Config::from_json(MINIMAL).unwrap();
        assert_eq!(config.imap_port, 993);
        assert!(config.imap_use_tls);
        assert!(config.smtp_use_tls);
        assert_eq!(config.smtp_port, None);
        assert_eq!(config.imap_login_timeout, 10);
        assert_eq!(config.imap_idle_timeout, 1740);
        assert_eq!(config.mailbox, "INBOX");
        assert_eq!(config.backoff().connect, Duration::from_secs(10));
        assert_eq!(config.backoff().session, Duration::from_secs(5));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_identity() {
        let text = MINIMAL.replace("email@none.bot", "not-an-address");
        let err = Config::from_json(&text).unwrap_err();
        assert!(matches!(err, Error::InvalidIdentity(user) if user == "not-an-address"));
    }

    #[test]
    fn test_other_problems_are_config_errors() {
        let text = MINIMAL.replace("\"imap.none.bot\"", "\"\"");
        let err = Config::from_json(&text).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("imap_host")));
    }

    #[test]
    fn test_missing_field_is_json_error() {
        let err = Config::from_json(r#"{"user": "email@none.bot"}"#).unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_connect_request() {
        let config = Config::from_json(MINIMAL).unwrap();
        let request = config.connect_request();
        assert_eq!(request.identity, "email@none.bot");
        assert_eq!(request.idle_timeout, Duration::from_secs(1740));
        assert_eq!(request.login_timeout, Duration::from_secs(10));

        let imap = request.imap_config();
        assert_eq!(imap.port, 993);
        assert_eq!(imap.security, mailpush_imap::Security::Implicit);
    }

    #[test]
    fn test_debug_hides_password() {
        let config = Config::from_json(MINIMAL).unwrap();
        assert!(!format!("{config:?}").contains("secret"));
        assert!(!format!("{:?}", config.connect_request()).contains("secret"));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("mailpush-config-{}.json", std::process::id()));
        std::fs::write(&path, MINIMAL).unwrap();
        let config = Config::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.user, "email@none.bot");

        assert!(matches!(Config::load(&path), Err(Error::Io(_))));
    }

    #[test]
    fn test_default_path() {
        if let Some(path) = Config::default_path() {
            assert!(path.ends_with("mailpush/config.json"));
        }
    }
}

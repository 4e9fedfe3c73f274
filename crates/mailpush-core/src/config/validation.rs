//! Configuration validation.

use super::model::Config;

/// Validation error for configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// User (identity) is empty.
    EmptyUser,
    /// User is not a structurally valid email address.
    InvalidUser,
    /// Password is empty.
    EmptyPassword,
    /// SMTP host is empty.
    EmptySmtpHost,
    /// SMTP port is 0.
    InvalidSmtpPort,
    /// IMAP host is empty.
    EmptyImapHost,
    /// IMAP port is 0.
    InvalidImapPort,
    /// IMAP login timeout is 0.
    InvalidLoginTimeout,
    /// IMAP idle timeout is 0.
    InvalidIdleTimeout,
    /// Mailbox name is empty.
    EmptyMailbox,
}

impl ValidationError {
    /// Get human-readable error message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::EmptyUser => "User is required",
            Self::InvalidUser => "User must be a valid email address",
            Self::EmptyPassword => "Password is required",
            Self::EmptySmtpHost => "SMTP server is required",
            Self::InvalidSmtpPort => "SMTP port must be 1-65535",
            Self::EmptyImapHost => "IMAP server is required",
            Self::InvalidImapPort => "IMAP port must be 1-65535",
            Self::InvalidLoginTimeout => "IMAP login timeout must be at least one second",
            Self::InvalidIdleTimeout => "IMAP idle timeout must be at least one second",
            Self::EmptyMailbox => "Mailbox is required",
        }
    }

    /// Get the field name this error relates to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::EmptyUser | Self::InvalidUser => "user",
            Self::EmptyPassword => "password",
            Self::EmptySmtpHost => "smtp_host",
            Self::InvalidSmtpPort => "smtp_port",
            Self::EmptyImapHost => "imap_host",
            Self::InvalidImapPort => "imap_port",
            Self::InvalidLoginTimeout => "imap_login_timeout",
            Self::InvalidIdleTimeout => "imap_idle_timeout",
            Self::EmptyMailbox => "mailbox",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ValidationError {}

/// Result of validating a configuration.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Validate a configuration.
///
/// Returns `Ok(())` if valid, or `Err(Vec<ValidationError>)` with all errors.
///
/// # Errors
///
/// Returns a vector of `ValidationError` if any fields are invalid.
pub fn validate_config(config: &Config) -> ValidationResult {
    let mut errors = Vec::new();

    if config.user.trim().is_empty() {
        errors.push(ValidationError::EmptyUser);
    } else if !is_valid_email(&config.user) {
        errors.push(ValidationError::InvalidUser);
    }
    if config.password.is_empty() {
        errors.push(ValidationError::EmptyPassword);
    }

    if config.smtp_host.trim().is_empty() {
        errors.push(ValidationError::EmptySmtpHost);
    }
    if config.smtp_port == Some(0) {
        errors.push(ValidationError::InvalidSmtpPort);
    }

    if config.imap_host.trim().is_empty() {
        errors.push(ValidationError::EmptyImapHost);
    }
    if config.imap_port == 0 {
        errors.push(ValidationError::InvalidImapPort);
    }
    if config.imap_login_timeout == 0 {
        errors.push(ValidationError::InvalidLoginTimeout);
    }
    if config.imap_idle_timeout == 0 {
        errors.push(ValidationError::InvalidIdleTimeout);
    }
    if config.mailbox.trim().is_empty() {
        errors.push(ValidationError::EmptyMailbox);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Structural email check: one `@`, a non-empty local part without
/// whitespace, and a dotted domain with no empty labels.
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    if email != email.trim() || email.chars().any(char::is_whitespace) {
        return false;
    }

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }

    domain.contains('.') && domain.split('.').all(|label| !label.is_empty())
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

    fn config() -> Config {
        serde_json::from_str(
            r#"{"user": "email@none.bot", "password": "p",
                "smtp_host": "smtp.none.bot", "imap_host": "imap.none.bot"}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_email() {
        assert!(is_valid_email("email@none.bot"));
        assert!(is_valid_email("user.name@sub.example.com"));
    }

    #[test]
    fn test_invalid_email() {
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("user"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@"));
        assert!(!is_valid_email("user@example"));
        assert!(!is_valid_email("user@@example.com"));
        assert!(!is_valid_email("user@example..com"));
        assert!(!is_valid_email(" user@example.com"));
        assert!(!is_valid_email("us er@example.com"));
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&config()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = config();
        config.user = "nobody".to_string();
        config.imap_port = 0;
        config.smtp_port = Some(0);
        config.imap_idle_timeout = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::InvalidUser,
                ValidationError::InvalidSmtpPort,
                ValidationError::InvalidImapPort,
                ValidationError::InvalidIdleTimeout,
            ]
        );
        assert_eq!(errors[0].field(), "user");
    }
}

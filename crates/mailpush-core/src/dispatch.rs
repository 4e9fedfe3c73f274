//! Outbound SMTP dispatch on behalf of a live session.

use std::future::Future;
use std::time::Duration;

use lettre::address::{Address, Envelope};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::{debug, info, warn};

use crate::event::split_entries;
use crate::header::tokenize;
use crate::registry::SessionRegistry;
use crate::{Error, Result};

/// Where and how to submit a message.
#[derive(Clone)]
pub struct DeliveryOptions {
    /// SMTP server host.
    pub host: String,
    /// SMTP server port. `None` uses 465 with TLS and 25 without.
    pub port: Option<u16>,
    /// Login name. `None` uses the session identity.
    pub username: Option<String>,
    /// Login secret.
    pub password: String,
    /// Implicit TLS when set, plaintext otherwise.
    pub use_tls: bool,
    /// Bound on each SMTP exchange.
    pub timeout: Duration,
}

impl std::fmt::Debug for DeliveryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("use_tls", &self.use_tls)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A prepared message: envelope plus the exact bytes to transmit.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    envelope: Envelope,
    payload: Vec<u8>,
}

impl OutboundMessage {
    /// Builds a message from an explicit envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Delivery`] when `recipients` is empty.
    pub fn new(from: Option<Address>, recipients: Vec<Address>, payload: Vec<u8>) -> Result<Self> {
        let envelope = Envelope::new(from, recipients)
            .map_err(|e| Error::Delivery(format!("invalid envelope: {e}")))?;
        Ok(Self { envelope, payload })
    }

    /// Builds a message from a complete RFC 5322 document.
    ///
    /// The sender comes from `From`; recipients from `To`, `Cc` and `Bcc`.
    /// `Bcc` lines are removed from the transmitted bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedHeader`] if the header cannot be read, and
    /// [`Error::Delivery`] for a bad address or no recipients.
    pub fn from_rfc5322(raw: &[u8]) -> Result<Self> {
        let headers = tokenize(&String::from_utf8_lossy(raw))?;
        let field = |name: &str| {
            headers
                .iter()
                .filter(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str())
                .collect::<Vec<_>>()
        };

        let from = field("From")
            .first()
            .map(|value| addresses(value))
            .transpose()?
            .and_then(|list| list.into_iter().next());

        let mut recipients = Vec::new();
        for name in ["To", "Cc", "Bcc"] {
            for value in field(name) {
                for address in addresses(value)? {
                    if !recipients.contains(&address) {
                        recipients.push(address);
                    }
                }
            }
        }

        Self::new(from, recipients, strip_bcc(raw))
    }

    /// The SMTP envelope.
    #[must_use]
    pub const fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Bytes sent after DATA.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

fn addresses(value: &str) -> Result<Vec<Address>> {
    split_entries(value)
        .into_iter()
        .map(|entry| {
            let entry = entry.trim();
            let bare = match (entry.rfind('<'), entry.rfind('>')) {
                (Some(open), Some(close)) if open < close => &entry[open + 1..close],
                _ => entry,
            };
            bare.trim()
                .parse::<Address>()
                .map_err(|e| Error::Delivery(format!("invalid address {entry:?}: {e}")))
        })
        .collect()
}

/// Removes `Bcc` fields, folded continuations included, from the header.
fn strip_bcc(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut in_header = true;
    let mut skipping = false;

    for line in raw.split_inclusive(|&b| b == b'\n') {
        if in_header {
            let content = line.strip_suffix(b"\n").unwrap_or(line);
            let content = content.strip_suffix(b"\r").unwrap_or(content);

            if content.is_empty() {
                in_header = false;
            } else if content.starts_with(b" ") || content.starts_with(b"\t") {
                if skipping {
                    continue;
                }
            } else {
                skipping = content.len() >= 4 && content[..4].eq_ignore_ascii_case(b"bcc:");
                if skipping {
                    continue;
                }
            }
        }
        out.extend_from_slice(line);
    }
    out
}

/// Submits prepared messages.
pub trait MailTransport: Send + Sync {
    /// Sends `message` on behalf of `identity`.
    fn send(
        &self,
        identity: &str,
        message: &OutboundMessage,
        options: &DeliveryOptions,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// SMTP submission through `lettre`, one connection per message.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmtpTransport;

impl MailTransport for SmtpTransport {
    async fn send(
        &self,
        identity: &str,
        message: &OutboundMessage,
        options: &DeliveryOptions,
    ) -> Result<()> {
        let username = options
            .username
            .clone()
            .unwrap_or_else(|| identity.to_string());
        let credentials = Credentials::new(username, options.password.clone());

        let builder = if options.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&options.host)
                .map_err(|e| Error::Delivery(format!("SMTP relay error: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&options.host)
        };
        let mut builder = builder
            .credentials(credentials)
            .timeout(Some(options.timeout));
        if let Some(port) = options.port {
            builder = builder.port(port);
        }

        debug!(%identity, host = %options.host, port = ?options.port, "submitting message");
        builder
            .build()
            .send_raw(message.envelope(), message.payload())
            .await
            .map_err(|e| Error::Delivery(format!("SMTP send error: {e}")))?;
        Ok(())
    }
}

/// Sends mail for identities that have a live session.
#[derive(Debug, Clone)]
pub struct Outbound<T> {
    registry: SessionRegistry,
    transport: T,
}

impl<T: MailTransport> Outbound<T> {
    /// Creates a dispatcher over `registry`.
    #[must_use]
    pub const fn new(registry: SessionRegistry, transport: T) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// Sends `message` as `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSession`] without touching the network if
    /// `identity` has no live session, and [`Error::Delivery`] if submission
    /// fails.
    pub async fn send_to(
        &self,
        identity: &str,
        message: &OutboundMessage,
        options: &DeliveryOptions,
    ) -> Result<()> {
        if !self.registry.contains(identity).await {
            warn!(%identity, "no live session; message not sent");
            return Err(Error::UnknownSession(identity.to_string()));
        }

        self.transport.send(identity, message, options).await?;
        info!(%identity, recipients = message.envelope().to().len(), "message sent");
        Ok(())
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
    use std::sync::Mutex;

    use tokio::sync::mpsc;

    use super::*;
    use crate::registry::SessionHandle;

    const MESSAGE: &[u8] = b"From: mailbot <email@none.bot>\r\n\
To: \"Doe, Jane\" <jane@x.org>, bob@y.org\r\n\
Cc: mailbot2 <bot@none.mail>\r\n\
Bcc: secret@z.org,\r\n\
\x20hidden@z.org\r\n\
Subject: hi\r\n\
\r\n\
Bcc: this line is body text\r\n";

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<(String, Option<String>)>>,
    }

    impl MailTransport for Recording {
        async fn send(
            &self,
            identity: &str,
            _message: &OutboundMessage,
            options: &DeliveryOptions,
        ) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((identity.to_string(), options.username.clone()));
            Ok(())
        }
    }

    fn options() -> DeliveryOptions {
        DeliveryOptions {
            host: "smtp.none.bot".to_string(),
            port: None,
            username: None,
            password: "secret".to_string(),
            use_tls: true,
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_envelope_from_headers() {
        let message = OutboundMessage::from_rfc5322(MESSAGE).unwrap();
        let envelope = message.envelope();

        assert_eq!(envelope.from().unwrap().to_string(), "email@none.bot");
        let to: Vec<_> = envelope.to().iter().map(ToString::to_string).collect();
        assert_eq!(
            to,
            vec![
                "jane@x.org",
                "bob@y.org",
                "bot@none.mail",
                "secret@z.org",
                "hidden@z.org"
            ]
        );
    }

    #[test]
    fn test_bcc_stripped_from_payload() {
        let message = OutboundMessage::from_rfc5322(MESSAGE).unwrap();
        let payload = String::from_utf8(message.payload().to_vec()).unwrap();

        assert!(!payload.contains("secret@z.org"));
        assert!(!payload.contains("hidden@z.org"));
        assert!(payload.contains("Subject: hi\r\n\r\n"));
        assert!(payload.ends_with("Bcc: this line is body text\r\n"));
    }

    #[test]
    fn test_no_recipients() {
        let err = OutboundMessage::from_rfc5322(b"From: a@b.org\r\nSubject: x\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::Delivery(_)));
    }

    #[test]
    fn test_bad_address() {
        let err = OutboundMessage::from_rfc5322(b"To: not an address\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::Delivery(_)));
    }

    #[test]
    fn test_debug_hides_password() {
        assert!(!format!("{:?}", options()).contains("secret"));
    }

    #[tokio::test]
    async fn test_unknown_identity_sends_nothing() {
        let outbound = Outbound::new(SessionRegistry::new(), Recording::default());
        let message = OutboundMessage::from_rfc5322(MESSAGE).unwrap();

        let err = outbound
            .send_to("email@none.bot", &message, &options())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSession(_)));
        assert_eq!(err.phase(), "dispatch");
        assert!(outbound.transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_registered_identity_sends() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        registry
            .register(SessionHandle::new("email@none.bot", tx))
            .await;

        let outbound = Outbound::new(registry, Recording::default());
        let message = OutboundMessage::from_rfc5322(MESSAGE).unwrap();
        outbound
            .send_to("email@none.bot", &message, &options())
            .await
            .unwrap();

        let sent = outbound.transport.sent.lock().unwrap();
        assert_eq!(sent.as_slice(), &[("email@none.bot".to_string(), None)]);
    }
}

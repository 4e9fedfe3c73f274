//! `mailpush` - watch a mailbox and log every new message as it arrives.
//!
//! ```text
//! mailpush [--config PATH] [--send FILE]
//! ```
//!
//! Without `--send` the process idles until Ctrl-C. With `--send` it waits
//! for the session to come up, submits the RFC 5322 message in `FILE`, and
//! exits.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mailpush_core::{
    Config, MailboxEvent, NetworkConnector, Outbound, OutboundMessage, SessionRegistry, Signal,
    SignalHandler, SignalReceiver, SmtpTransport, Supervisor, run_signal_worker, signal_channel,
};

#[derive(Debug, Parser)]
#[command(name = "mailpush", version, about = "Stream new-mail events from an IMAP mailbox")]
struct Args {
    /// Configuration file (defaults to `<config dir>/mailpush/config.json`)
    #[arg(short, long, env = "MAILPUSH_CONFIG")]
    config: Option<PathBuf>,

    /// Submit this RFC 5322 message once the session is up, then exit
    #[arg(long, value_name = "FILE")]
    send: Option<PathBuf>,
}

/// Logs every signal.
struct LoggingHandler;

impl SignalHandler for LoggingHandler {
    async fn on_event(&self, event: MailboxEvent) {
        info!(
            identity = %event.identity,
            mail_id = %event.mail_id,
            from = %event.sender(),
            to_self = event.is_addressed_to_self(),
            cc_self = event.is_copied_to_self(),
            "{}",
            event.event_name()
        );
        debug!("\n{}", event.summary());
        match serde_json::to_string(&event) {
            Ok(json) => debug!(%json, "event payload"),
            Err(e) => warn!(error = %e, "event payload not serializable"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailpush=debug,mailpush_core=debug,mailpush_imap=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let path = match args.config {
        Some(path) => path,
        None => Config::default_path().context("no configuration directory on this platform")?,
    };
    let config =
        Config::load(&path).with_context(|| format!("loading configuration from {}", path.display()))?;
    info!(identity = %config.user, config = %path.display(), "starting mailpush");

    let registry = SessionRegistry::new();
    let (signals, received) = signal_channel();
    let handle = Supervisor::new(
        config.connect_request(),
        NetworkConnector,
        registry.clone(),
        signals,
    )
    .backoff(config.backoff())
    .spawn();

    let outcome = match args.send {
        Some(file) => send_once(&config, registry, received, &file).await,
        None => {
            tokio::spawn(run_signal_worker(received, Arc::new(LoggingHandler)));
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            info!("interrupted");
            Ok(())
        }
    };

    handle.shutdown(config.shutdown_grace()).await;
    info!("mailpush stopped");
    outcome
}

/// Waits for the session, then submits one message through it.
async fn send_once(
    config: &Config,
    registry: SessionRegistry,
    mut received: SignalReceiver,
    file: &std::path::Path,
) -> Result<()> {
    let raw = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let message = OutboundMessage::from_rfc5322(&raw)?;

    loop {
        tokio::select! {
            signal = received.recv() => match signal {
                Some(Signal::Connected(_)) => break,
                Some(_) => {}
                None => bail!("supervisor stopped before a session came up"),
            },
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for Ctrl-C")?;
                bail!("interrupted before the session came up");
            }
        }
    }

    Outbound::new(registry, SmtpTransport)
        .send_to(&config.user, &message, &config.delivery_options())
        .await?;
    info!(file = %file.display(), "message submitted");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_command_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from(["mailpush", "-c", "/tmp/mp.json", "--send", "out.eml"])
            .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/tmp/mp.json")));
        assert_eq!(args.send, Some(PathBuf::from("out.eml")));

        let args = Args::try_parse_from(["mailpush", "--config", "a.json"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("a.json")));
        assert!(args.send.is_none());
    }

    #[test]
    fn test_rejects_unknown_argument() {
        assert!(Args::try_parse_from(["mailpush", "--verbose"]).is_err());
        assert!(Args::try_parse_from(["mailpush", "--send"]).is_err());
    }
}

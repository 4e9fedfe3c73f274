//! # mailpush-core
//!
//! Turns an IMAP mailbox into a stream of new-mail events.
//!
//! This crate provides:
//! - Configuration loading and validation
//! - Header parsing and the [`MailboxEvent`] model
//! - A session driver that idles, fetches new headers and serves
//!   passthrough commands
//! - A reconnect supervisor with lifecycle signals
//! - A registry of live sessions and outbound SMTP dispatch through it

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod dispatch;
pub mod driver;
mod error;
pub mod event;
pub mod header;
pub mod registry;
pub mod signal;
pub mod supervisor;

pub use config::{Config, ConnectRequest, ValidationError, ValidationResult, validate_config};
pub use dispatch::{DeliveryOptions, MailTransport, Outbound, OutboundMessage, SmtpTransport};
pub use driver::{SessionDriver, establish};
pub use error::{Error, Result};
pub use event::{Emailer, MailboxEvent};
pub use header::{ParsedHeader, parse_header};
pub use registry::{SessionHandle, SessionRegistry, SessionRequest};
pub use signal::{
    Signal, SignalHandler, SignalReceiver, SignalSender, run_signal_worker, signal_channel,
};
pub use supervisor::{Backoff, Connector, NetworkConnector, Supervisor, SupervisorHandle};

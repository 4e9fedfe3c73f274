//! # mailpush-imap
//!
//! The IMAP side of mailpush: a small async client that logs in, selects a
//! mailbox, idles and fetches message headers.
//!
//! ## Features
//!
//! - **Type-state connection management**: Compile-time enforcement of valid
//!   IMAP state transitions (`NotAuthenticated` → `Authenticated` → `Selected`)
//! - **IDLE support**: push notifications via RFC 2177, with deadline-based
//!   renewal and a cancel-safe wait
//! - **Push classification**: every line received while idling becomes a
//!   [`Push`]
//! - **TLS via rustls**: Secure connections without OpenSSL dependency
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use mailpush_imap::{Client, Config, Push, Security};
//!
//! #[tokio::main]
//! async fn main() -> mailpush_imap::Result<()> {
//!     let config = Config::new("imap.example.com").security(Security::Implicit);
//!     let stream = mailpush_imap::connection::connect(&config).await?;
//!     let client = Client::from_stream(stream).await?;
//!     let client = client.login("user@example.com", "password").await?;
//!     let mut client = client.select("INBOX").await?;
//!
//!     let mut idle = client.idle(Duration::from_secs(29 * 60)).await?;
//!     let push = idle.wait().await?;
//!     idle.done().await?;
//!
//!     if let Push::SizeChanged(seq) = push {
//!         let header = client.fetch_header(seq).await?;
//!         println!("{} header bytes", header.map_or(0, |h| h.len()));
//!     }
//!
//!     client.logout().await
//! }
//! ```
//!
//! ## Connection States
//!
//! ```text
//! NotAuthenticated ── login() ──→ Authenticated ── select() ──→ Selected
//!                                                                 │
//!                                         idle() ──→ IdleHandle ──┘ done()
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod push;
pub mod types;

pub use command::{Command, TagGenerator};
pub use connection::{
    Authenticated, Client, Config, FramedStream, IdleHandle, ImapStream, NotAuthenticated,
    ResponseAccumulator, Security, Selected,
};
pub use error::{Error, Result};
pub use parser::{Response, Untagged};
pub use push::{Push, STOP_WAIT_SERVER_PUSH};
pub use types::{SeqNum, Status};

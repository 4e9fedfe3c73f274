//! Supervisor integration tests.
//!
//! Connectors hand out scripted `tokio_test` streams; time is paused so
//! backoff delays pass instantly.

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_test::io::{Builder, Mock};

use mailpush_core::{
    Backoff, ConnectRequest, Connector, SessionRegistry, Signal, SignalReceiver, Supervisor,
    signal_channel,
};

const HEADER: &[u8] = b"Date: Fri, 25 Aug 2023 02:53:48 +0000\r\n\
From: YAMB <mail@test.adp>\r\n\
To: \"mailbot\" <email@none.bot>\r\n\
Subject: hello\r\n\
\r\n";

fn request() -> ConnectRequest {
    ConnectRequest {
        identity: "email@none.bot".to_string(),
        password: "secret".to_string(),
        host: "imap.none.bot".to_string(),
        port: 993,
        use_tls: true,
        login_timeout: Duration::from_secs(10),
        idle_timeout: Duration::from_secs(60),
        mailbox: "INBOX".to_string(),
    }
}

fn handshake() -> Builder {
    let mut builder = Builder::new();
    builder
        .read(b"* OK [CAPABILITY IMAP4rev1 IDLE] ready\r\n")
        .write(b"A0000 LOGIN email@none.bot secret\r\n")
        .read(b"A0000 OK logged in\r\n")
        .write(b"A0001 SELECT INBOX\r\n")
        .read(b"A0001 OK [READ-WRITE] done\r\n");
    builder
}

/// Hands out scripted streams in order, then refuses.
#[derive(Clone, Default)]
struct Scripted {
    streams: Arc<Mutex<VecDeque<Mock>>>,
    attempts: Arc<AtomicUsize>,
}

impl Scripted {
    fn new(streams: Vec<Mock>) -> Self {
        Self {
            streams: Arc::new(Mutex::new(streams.into())),
            attempts: Arc::default(),
        }
    }
}

impl Connector for Scripted {
    type Stream = Mock;

    async fn connect(&self, _request: &ConnectRequest) -> mailpush_imap::Result<Mock> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.streams.lock().unwrap().pop_front();
        next.ok_or_else(|| {
            mailpush_imap::Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            ))
        })
    }
}

fn drain(signals: &mut SignalReceiver) -> Vec<Signal> {
    let mut seen = Vec::new();
    while let Ok(signal) = signals.try_recv() {
        seen.push(signal);
    }
    seen
}

#[tokio::test(start_paused = true)]
async fn test_connect_failures_retry_with_backoff() {
    let connector = Scripted::default();
    let registry = SessionRegistry::new();
    let (signals, mut received) = signal_channel();

    let handle = Supervisor::new(request(), connector.clone(), registry.clone(), signals).spawn();
    tokio::time::sleep(Duration::from_secs(35)).await;

    // Attempts at 0, 10, 20 and 30 seconds.
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 4);
    assert!(registry.is_empty().await);

    handle.shutdown(Duration::from_secs(5)).await;
    assert!(drain(&mut received).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_session_lifecycle_and_reconnect() {
    let mut fetch = format!("* 3085 FETCH (BODY[HEADER] {{{}}}\r\n", HEADER.len()).into_bytes();
    fetch.extend_from_slice(HEADER);
    fetch.extend_from_slice(b")\r\nA0003 OK FETCH completed\r\n");

    let first = handshake()
        .write(b"A0002 IDLE\r\n")
        .read(b"+ idling\r\n* 3085 EXISTS\r\n")
        .write(b"DONE\r\n")
        .read(b"A0002 OK IDLE terminated\r\n")
        .write(b"A0003 FETCH 3085 BODY[HEADER]\r\n")
        .read(&fetch)
        .write(b"A0004 IDLE\r\n")
        .read(b"+ idling\r\n* BYE server restarting\r\n")
        .build();
    let second = handshake()
        .write(b"A0002 IDLE\r\n")
        .read(b"+ idling\r\n")
        .write(b"DONE\r\n")
        .read(b"A0002 OK IDLE terminated\r\n")
        .write(b"A0003 LOGOUT\r\n")
        .read(b"* BYE logging out\r\nA0003 OK LOGOUT completed\r\n")
        .build();

    let connector = Scripted::new(vec![first, second]);
    let registry = SessionRegistry::new();
    let (signals, mut received) = signal_channel();

    let handle = Supervisor::new(request(), connector.clone(), registry.clone(), signals)
        .backoff(Backoff {
            connect: Duration::from_secs(10),
            session: Duration::from_secs(5),
        })
        .spawn();

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(registry.len().await, 1);
    assert!(registry.get("email@none.bot").await.is_some());

    // The live session logs out before the supervisor exits.
    handle.shutdown(Duration::from_secs(5)).await;
    assert!(registry.is_empty().await);

    let seen = drain(&mut received);
    let identity = "email@none.bot".to_string();
    assert_eq!(seen.len(), 5, "{seen:?}");
    assert_eq!(seen[0], Signal::Connected(identity.clone()));
    assert!(matches!(&seen[1], Signal::Event(event) if event.mail_id == "3085"));
    assert_eq!(seen[2], Signal::Disconnected(identity.clone()));
    assert_eq!(seen[3], Signal::Connected(identity.clone()));
    assert_eq!(seen[4], Signal::Disconnected(identity));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_login_is_a_connect_failure() {
    let rejected = Builder::new()
        .read(b"* OK ready\r\n")
        .write(b"A0000 LOGIN email@none.bot secret\r\n")
        .read(b"A0000 NO [AUTHENTICATIONFAILED] invalid\r\n")
        .build();

    let connector = Scripted::new(vec![rejected]);
    let registry = SessionRegistry::new();
    let (signals, mut received) = signal_channel();

    let handle = Supervisor::new(request(), connector.clone(), registry.clone(), signals).spawn();

    // The retry after a failed login waits the connect backoff, not the
    // session one.
    tokio::time::sleep(Duration::from_secs(8)).await;
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);

    handle.shutdown(Duration::from_secs(5)).await;
    assert!(drain(&mut received).is_empty());
}

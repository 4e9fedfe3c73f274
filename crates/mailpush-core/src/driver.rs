//! The per-connection session driver.
//!
//! A driver owns one selected IMAP client. It idles, leaves IDLE whenever
//! there is work (new mail, a passthrough command or a renewal), does that
//! work, and idles again. It returns once the session is broken, or after
//! logging out when asked to stop.

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout_at;
use tracing::{debug, trace, warn};

use mailpush_imap::{Client, Push, Response, Selected, SeqNum, Untagged};

use crate::config::ConnectRequest;
use crate::event::MailboxEvent;
use crate::header::parse_header;
use crate::registry::SessionRequest;
use crate::signal::{Signal, SignalSender};
use crate::{Error, Result};

/// Slack allowed past the IDLE deadline before a silent server is given up on.
const RECEIVE_GRACE: Duration = Duration::from_secs(5);

/// Greets, logs in and selects the mailbox over an open stream.
///
/// The whole exchange is bounded by the request's login timeout.
///
/// # Errors
///
/// Returns [`Error::ConnectFailure`] wrapping whatever went wrong.
pub async fn establish<S>(stream: S, request: &ConnectRequest) -> Result<Client<S, Selected>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handshake = async {
        let client = Client::from_stream(stream).await?;
        let client = client.login(&request.identity, &request.password).await?;
        client.select(&request.mailbox).await
    };

    let client = match tokio::time::timeout(request.login_timeout, handshake).await {
        Ok(result) => result.map_err(Error::ConnectFailure)?,
        Err(_) => {
            return Err(Error::ConnectFailure(mailpush_imap::Error::Timeout(
                request.login_timeout,
            )));
        }
    };

    if !client.supports_idle() {
        warn!(
            identity = %request.identity,
            "server does not advertise IDLE; trying anyway"
        );
    }
    Ok(client)
}

/// What ended one IDLE wait.
enum Wake {
    Renew,
    Mail,
    Command(SessionRequest),
    Stop,
}

/// Mailbox size as last announced, and the messages still to fetch.
///
/// EXISTS carries the new total, so every sequence number between the old
/// and the new size is a message to fetch.
#[derive(Debug)]
struct Arrivals {
    known: Option<u32>,
    queue: VecDeque<SeqNum>,
}

impl Arrivals {
    const fn new(known: Option<u32>) -> Self {
        Self {
            known,
            queue: VecDeque::new(),
        }
    }

    fn resize(&mut self, exists: u32) {
        let first = match self.known {
            Some(known) if exists > known => known + 1,
            Some(_) => {
                // Shrunk without the EXPUNGEs reaching us.
                self.queue.retain(|seq| seq.get() <= exists);
                self.known = Some(exists);
                return;
            }
            // No baseline: only the newest message is known to be new.
            None => exists,
        };

        for seq in (first..=exists).filter_map(SeqNum::new) {
            if !self.queue.contains(&seq) {
                self.queue.push_back(seq);
            }
        }
        self.known = Some(exists);
    }

    fn expunge(&mut self, gone: SeqNum) {
        self.known = self.known.map(|known| known.saturating_sub(1));
        self.queue.retain(|seq| *seq != gone);
        for seq in &mut self.queue {
            if *seq > gone
                && let Some(lower) = SeqNum::new(seq.get() - 1)
            {
                *seq = lower;
            }
        }
    }

    fn note(&mut self, untagged: &Untagged) {
        match untagged {
            Untagged::Exists(n) => self.resize(*n),
            Untagged::Expunge(seq) => self.expunge(*seq),
            _ => {}
        }
    }

    fn push(&mut self, push: &Push) {
        match push {
            Push::SizeChanged(seq) => self.resize(seq.get()),
            Push::Unknown(line) => {
                if let Ok(Response::Untagged(untagged)) = Response::parse(line.as_bytes()) {
                    self.note(&untagged);
                }
            }
            Push::Sentinel => {}
        }
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn next(&mut self) -> Option<SeqNum> {
        self.queue.pop_front()
    }
}

/// Drives one live session until it breaks or is stopped.
pub struct SessionDriver<S> {
    client: Client<S, Selected>,
    identity: String,
    idle_timeout: Duration,
    logout_timeout: Duration,
    arrivals: Arrivals,
    requests: mpsc::Receiver<SessionRequest>,
    signals: SignalSender,
}

impl<S> SessionDriver<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an established client.
    ///
    /// Mail is counted from the mailbox size SELECT reported.
    #[must_use]
    pub fn new(
        client: Client<S, Selected>,
        request: &ConnectRequest,
        requests: mpsc::Receiver<SessionRequest>,
        signals: SignalSender,
    ) -> Self {
        let arrivals = Arrivals::new(client.exists());
        Self {
            client,
            identity: request.identity.clone(),
            idle_timeout: request.idle_timeout,
            logout_timeout: request.login_timeout,
            arrivals,
            requests,
            signals,
        }
    }

    /// Runs the idle loop until the session breaks or `stop` turns true.
    ///
    /// A stop leaves IDLE and logs out before returning `Ok`. Dropping the
    /// sender counts as a stop.
    ///
    /// # Errors
    ///
    /// Returns the [`Error::ProtocolException`] that ended the session.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> Result<()> {
        debug!(identity = %self.identity, mailbox = self.client.mailbox(), "session running");
        loop {
            match self.cycle(&mut stop).await? {
                ControlFlow::Continue(()) => {}
                ControlFlow::Break(()) => break,
            }
        }
        self.logout().await;
        Ok(())
    }

    /// One IDLE, then whatever work woke it.
    async fn cycle(&mut self, stop: &mut watch::Receiver<bool>) -> Result<ControlFlow<()>> {
        let stopped = *stop.borrow();
        if stopped {
            return Ok(ControlFlow::Break(()));
        }

        let (wake, late) = {
            let mut idle = self
                .client
                .idle(self.idle_timeout)
                .await
                .map_err(Error::ProtocolException)?;
            let guard = idle.deadline() + RECEIVE_GRACE;

            let wake = loop {
                tokio::select! {
                    push = timeout_at(guard, idle.wait()) => match push {
                        Err(_) => {
                            warn!(identity = %self.identity, "no answer past the IDLE deadline");
                            break Wake::Renew;
                        }
                        Ok(Err(e)) => return Err(Error::ProtocolException(e)),
                        Ok(Ok(Push::Sentinel)) => break Wake::Renew,
                        Ok(Ok(push)) => {
                            if let Push::Unknown(line) = &push {
                                warn!(identity = %self.identity, %line, "unrecognized push");
                            }
                            self.arrivals.push(&push);
                            if !self.arrivals.is_empty() {
                                break Wake::Mail;
                            }
                        }
                    },
                    Some(request) = self.requests.recv() => break Wake::Command(request),
                    _ = stop.wait_for(|stopped| *stopped) => break Wake::Stop,
                }
            };

            // IDLE must end before any other command goes out.
            let late = idle.done().await.map_err(Error::ProtocolException)?;
            (wake, late)
        };

        for push in &late {
            self.arrivals.push(push);
        }

        match wake {
            Wake::Renew => trace!(identity = %self.identity, "renewing IDLE"),
            Wake::Mail => {}
            Wake::Command(request) => self.serve(request).await?,
            Wake::Stop => return Ok(ControlFlow::Break(())),
        }

        self.drain().await?;
        Ok(ControlFlow::Continue(()))
    }

    /// Fetches every queued message, including any announced while fetching.
    async fn drain(&mut self) -> Result<()> {
        loop {
            for untagged in self.client.take_unsolicited() {
                self.arrivals.note(&untagged);
            }
            let Some(seq) = self.arrivals.next() else {
                return Ok(());
            };
            self.fetch(seq).await?;
        }
    }

    /// Fetches one header and emits its event.
    ///
    /// Only transport failures are returned; a message that cannot be read
    /// or parsed is logged and skipped.
    async fn fetch(&mut self, seq: SeqNum) -> Result<()> {
        let raw = match self.client.fetch_header(seq).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                warn!(identity = %self.identity, %seq, "server returned no header");
                return Ok(());
            }
            Err(e) if e.is_transport() => return Err(Error::ProtocolException(e)),
            Err(e) => {
                warn!(identity = %self.identity, %seq, error = %e, "header fetch refused");
                return Ok(());
            }
        };

        match parse_header(&raw) {
            Ok(parsed) => {
                let event = MailboxEvent::new(self.identity.as_str(), seq.to_string(), parsed);
                debug!(identity = %self.identity, mail_id = %event.mail_id, "new mail");
                if self.signals.send(Signal::Event(event)).is_err() {
                    debug!(identity = %self.identity, "signal queue closed; event dropped");
                }
            }
            Err(e) => warn!(
                identity = %self.identity,
                %seq,
                phase = e.phase(),
                error = %e,
                "dropping message"
            ),
        }
        Ok(())
    }

    /// Runs a passthrough command and replies to its caller.
    async fn serve(&mut self, request: SessionRequest) -> Result<()> {
        let SessionRequest::Command { name, args, reply } = request;
        debug!(identity = %self.identity, command = %name, "passthrough command");

        let outcome = self.client.raw(&name, &args).await;
        let broken = match &outcome {
            Err(e) if e.is_transport() => Some(format!("{name} failed: {e}")),
            _ => None,
        };

        if reply.send(outcome).is_err() {
            debug!(identity = %self.identity, command = %name, "caller went away");
        }

        match broken {
            Some(message) => Err(Error::ProtocolException(
                mailpush_imap::Error::Protocol(message),
            )),
            None => Ok(()),
        }
    }

    /// Best-effort LOGOUT, bounded by the login timeout.
    async fn logout(self) {
        let identity = self.identity;
        match tokio::time::timeout(self.logout_timeout, self.client.logout()).await {
            Ok(Ok(())) => debug!(%identity, "logged out"),
            Ok(Err(e)) => debug!(%identity, error = %e, "logout failed"),
            Err(_) => warn!(%identity, "logout timed out"),
        }
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
    use tokio_test::io::{Builder, Mock};

    use super::*;
    use crate::registry::SessionHandle;
    use crate::signal::signal_channel;

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

    /// Greeting, LOGIN (A0000) and SELECT (A0001).
    fn handshake() -> Builder {
        let mut builder = Builder::new();
        builder
            .read(b"* OK [CAPABILITY IMAP4rev1 IDLE] ready\r\n")
            .write(b"A0000 LOGIN email@none.bot secret\r\n")
            .read(b"A0000 OK logged in\r\n")
            .write(b"A0001 SELECT INBOX\r\n")
            .read(b"* 3084 EXISTS\r\nA0001 OK [READ-WRITE] done\r\n");
        builder
    }

    fn fetch_response(seq: u32, tag: &str, header: &[u8]) -> Vec<u8> {
        let mut bytes =
            format!("* {seq} FETCH (BODY[HEADER] {{{}}}\r\n", header.len()).into_bytes();
        bytes.extend_from_slice(header);
        bytes.extend_from_slice(format!(")\r\n{tag} OK FETCH completed\r\n").as_bytes());
        bytes
    }

    async fn run(mock: Mock) -> (Error, Vec<Signal>) {
        let (_tx, rx) = mpsc::channel(1);
        run_with(mock, rx).await
    }

    async fn run_with(mock: Mock, requests: mpsc::Receiver<SessionRequest>) -> (Error, Vec<Signal>) {
        let (_stop, stopped) = watch::channel(false);
        let (outcome, seen) = drive(mock, requests, stopped).await;
        (outcome.unwrap_err(), seen)
    }

    async fn drive(
        mock: Mock,
        requests: mpsc::Receiver<SessionRequest>,
        stop: watch::Receiver<bool>,
    ) -> (Result<()>, Vec<Signal>) {
        let request = request();
        let client = establish(mock, &request).await.unwrap();
        let (signals, mut received) = signal_channel();
        let outcome = SessionDriver::new(client, &request, requests, signals)
            .run(stop)
            .await;

        let mut seen = Vec::new();
        while let Ok(signal) = received.try_recv() {
            seen.push(signal);
        }
        (outcome, seen)
    }

    fn mail_ids(signals: &[Signal]) -> Vec<&str> {
        signals
            .iter()
            .filter_map(|s| match s {
                Signal::Event(e) => Some(e.mail_id.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_mail_fetched_after_done() {
        let fetch = fetch_response(3085, "A0003", HEADER);
        let mock = handshake()
            .write(b"A0002 IDLE\r\n")
            .read(b"+ idling\r\n* 3085 EXISTS\r\n")
            .write(b"DONE\r\n")
            .read(b"A0002 OK IDLE terminated\r\n")
            .write(b"A0003 FETCH 3085 BODY[HEADER]\r\n")
            .read(&fetch)
            .write(b"A0004 IDLE\r\n")
            .read(b"+ idling\r\n* BYE going away\r\n")
            .build();

        let (err, signals) = run(mock).await;
        assert!(matches!(
            err,
            Error::ProtocolException(mailpush_imap::Error::Bye(_))
        ));

        assert_eq!(signals.len(), 1);
        let Signal::Event(event) = &signals[0] else {
            panic!("expected an event, got {signals:?}");
        };
        assert_eq!(event.mail_id, "3085");
        assert_eq!(event.identity, "email@none.bot");
        assert_eq!(event.subject, "hello");
        assert!(event.is_addressed_to_self());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_renewed_on_timeout() {
        let mock = handshake()
            .write(b"A0002 IDLE\r\n")
            .read(b"+ idling\r\n")
            .wait(Duration::from_secs(61))
            .write(b"DONE\r\n")
            .read(b"A0002 OK IDLE terminated\r\n")
            .write(b"A0003 IDLE\r\n")
            .read(b"+ idling\r\n* BYE going away\r\n")
            .build();

        let (_, signals) = run(mock).await;
        assert!(signals.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_and_sentinel_pushes_emit_nothing() {
        let mock = handshake()
            .write(b"A0002 IDLE\r\n")
            .read(b"+ idling\r\n* 2 RECENT\r\n* 0 EXISTS\r\n* stop_wait_server_push\r\n")
            .write(b"DONE\r\n")
            .read(b"A0002 OK IDLE terminated\r\n")
            .write(b"A0003 IDLE\r\n")
            .read(b"+ idling\r\n* BYE going away\r\n")
            .build();

        let (_, signals) = run(mock).await;
        assert!(signals.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_header_is_dropped() {
        let fetch = fetch_response(3085, "A0003", b"this is not a header\r\n\r\n");
        let mock = handshake()
            .write(b"A0002 IDLE\r\n")
            .read(b"+ idling\r\n* 3085 EXISTS\r\n")
            .write(b"DONE\r\n")
            .read(b"A0002 OK IDLE terminated\r\n")
            .write(b"A0003 FETCH 3085 BODY[HEADER]\r\n")
            .read(&fetch)
            .write(b"A0004 IDLE\r\n")
            .read(b"+ idling\r\n* BYE going away\r\n")
            .build();

        let (err, signals) = run(mock).await;
        assert!(matches!(err, Error::ProtocolException(_)));
        assert!(signals.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_fetch_is_dropped() {
        let mock = handshake()
            .write(b"A0002 IDLE\r\n")
            .read(b"+ idling\r\n* 3085 EXISTS\r\n")
            .write(b"DONE\r\n")
            .read(b"A0002 OK IDLE terminated\r\n")
            .write(b"A0003 FETCH 3085 BODY[HEADER]\r\n")
            .read(b"A0003 NO message is gone\r\n")
            .write(b"A0004 IDLE\r\n")
            .read(b"+ idling\r\n* BYE going away\r\n")
            .build();

        let (_, signals) = run(mock).await;
        assert!(signals.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_push_during_done_is_fetched() {
        let first = fetch_response(3085, "A0003", HEADER);
        let second = fetch_response(3086, "A0004", HEADER);
        let mock = handshake()
            .write(b"A0002 IDLE\r\n")
            .read(b"+ idling\r\n* 3085 EXISTS\r\n")
            .write(b"DONE\r\n")
            .read(b"* 3086 EXISTS\r\nA0002 OK IDLE terminated\r\n")
            .write(b"A0003 FETCH 3085 BODY[HEADER]\r\n")
            .read(&first)
            .write(b"A0004 FETCH 3086 BODY[HEADER]\r\n")
            .read(&second)
            .write(b"A0005 IDLE\r\n")
            .read(b"+ idling\r\n* BYE going away\r\n")
            .build();

        let (_, signals) = run(mock).await;
        assert_eq!(mail_ids(&signals), vec!["3085", "3086"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_inside_fetch_response_is_fetched() {
        let mut first = format!("* 3085 FETCH (BODY[HEADER] {{{}}}\r\n", HEADER.len()).into_bytes();
        first.extend_from_slice(HEADER);
        first.extend_from_slice(b")\r\n* 3086 EXISTS\r\nA0003 OK FETCH completed\r\n");
        let second = fetch_response(3086, "A0004", HEADER);
        let mock = handshake()
            .write(b"A0002 IDLE\r\n")
            .read(b"+ idling\r\n* 3085 EXISTS\r\n")
            .write(b"DONE\r\n")
            .read(b"A0002 OK IDLE terminated\r\n")
            .write(b"A0003 FETCH 3085 BODY[HEADER]\r\n")
            .read(&first)
            .write(b"A0004 FETCH 3086 BODY[HEADER]\r\n")
            .read(&second)
            .write(b"A0005 IDLE\r\n")
            .read(b"+ idling\r\n* BYE going away\r\n")
            .build();

        let (_, signals) = run(mock).await;
        assert_eq!(mail_ids(&signals), vec!["3085", "3086"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_jump_fetches_every_new_message() {
        let mock = handshake()
            .write(b"A0002 IDLE\r\n")
            .read(b"+ idling\r\n* 3087 EXISTS\r\n")
            .write(b"DONE\r\n")
            .read(b"A0002 OK IDLE terminated\r\n")
            .write(b"A0003 FETCH 3085 BODY[HEADER]\r\n")
            .read(&fetch_response(3085, "A0003", HEADER))
            .write(b"A0004 FETCH 3086 BODY[HEADER]\r\n")
            .read(&fetch_response(3086, "A0004", HEADER))
            .write(b"A0005 FETCH 3087 BODY[HEADER]\r\n")
            .read(&fetch_response(3087, "A0005", HEADER))
            .write(b"A0006 IDLE\r\n")
            .read(b"+ idling\r\n* 3087 EXISTS\r\n* BYE going away\r\n")
            .build();

        let (_, signals) = run(mock).await;
        // The repeated size announces nothing new.
        assert_eq!(mail_ids(&signals), vec!["3085", "3086", "3087"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expunge_renumbers_pending_mail() {
        let mock = handshake()
            .write(b"A0002 IDLE\r\n")
            .read(b"+ idling\r\n* 3086 EXISTS\r\n")
            .write(b"DONE\r\n")
            .read(b"* 3085 EXPUNGE\r\nA0002 OK IDLE terminated\r\n")
            .write(b"A0003 FETCH 3085 BODY[HEADER]\r\n")
            .read(&fetch_response(3085, "A0003", HEADER))
            .write(b"A0004 IDLE\r\n")
            .read(b"+ idling\r\n* 3086 EXISTS\r\n")
            .write(b"DONE\r\n")
            .read(b"A0004 OK IDLE terminated\r\n")
            .write(b"A0005 FETCH 3086 BODY[HEADER]\r\n")
            .read(&fetch_response(3086, "A0005", HEADER))
            .write(b"A0006 IDLE\r\n")
            .read(b"+ idling\r\n* BYE going away\r\n")
            .build();

        let (_, signals) = run(mock).await;
        assert_eq!(mail_ids(&signals), vec!["3085", "3086"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_leaves_idle_and_logs_out() {
        let mock = handshake()
            .write(b"A0002 IDLE\r\n")
            .read(b"+ idling\r\n")
            .write(b"DONE\r\n")
            .read(b"A0002 OK IDLE terminated\r\n")
            .write(b"A0003 LOGOUT\r\n")
            .read(b"* BYE logging out\r\nA0003 OK LOGOUT completed\r\n")
            .build();

        let (_tx, rx) = mpsc::channel(1);
        let (stop, stopped) = watch::channel(false);
        let driver = tokio::spawn(async move { drive(mock, rx, stopped).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        stop.send_replace(true);

        let (outcome, signals) = driver.await.unwrap();
        assert!(outcome.is_ok());
        assert!(signals.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_passthrough_command_interrupts_idle() {
        let mock = handshake()
            .write(b"A0002 IDLE\r\n")
            .read(b"+ idling\r\n")
            .wait(Duration::from_secs(30))
            .write(b"DONE\r\n")
            .read(b"A0002 OK IDLE terminated\r\n")
            .write(b"A0003 SEARCH UNSEEN\r\n")
            .read(b"* SEARCH 4\r\n* 3085 EXISTS\r\nA0003 OK SEARCH completed\r\n")
            .write(b"A0004 FETCH 3085 BODY[HEADER]\r\n")
            .read(&fetch_response(3085, "A0004", HEADER))
            .write(b"A0005 IDLE\r\n")
            .read(b"+ idling\r\n* BYE going away\r\n")
            .build();

        let (tx, rx) = mpsc::channel(1);
        let handle = SessionHandle::new("email@none.bot", tx);
        let driver = tokio::spawn(async move { run_with(mock, rx).await });

        let lines = handle.call("SEARCH", &["UNSEEN"]).await.unwrap();
        assert_eq!(
            lines,
            vec!["* SEARCH 4", "* 3085 EXISTS", "A0003 OK SEARCH completed"]
        );

        // Mail announced in the command's answer is not lost.
        let (err, signals) = driver.await.unwrap();
        assert!(matches!(err, Error::ProtocolException(_)));
        assert_eq!(mail_ids(&signals), vec!["3085"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_establish_login_rejected() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 LOGIN email@none.bot secret\r\n")
            .read(b"A0000 NO [AUTHENTICATIONFAILED] invalid\r\n")
            .build();

        let err = establish(mock, &request()).await.err().unwrap();
        assert!(matches!(
            err,
            Error::ConnectFailure(mailpush_imap::Error::No(_))
        ));
        assert_eq!(err.phase(), "connect");
    }

    #[tokio::test(start_paused = true)]
    async fn test_establish_times_out() {
        let mock = Builder::new().wait(Duration::from_secs(30)).build();

        let err = establish(mock, &request()).await.err().unwrap();
        assert!(matches!(
            err,
            Error::ConnectFailure(mailpush_imap::Error::Timeout(_))
        ));
    }
}

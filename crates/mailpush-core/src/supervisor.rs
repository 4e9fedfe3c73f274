//! Keeps one session alive for an identity.
//!
//! The supervisor connects, registers the session, runs its driver, and when
//! anything fails it tears the session down and tries again after a delay.
//! It only stops when asked to.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use mailpush_imap::ImapStream;

use crate::{Error, Result};
use crate::config::ConnectRequest;
use crate::driver::{SessionDriver, establish};
use crate::registry::{SessionHandle, SessionRegistry};
use crate::signal::{Signal, SignalSender};

/// Pending passthrough commands a session accepts before callers wait.
const REQUEST_QUEUE: usize = 16;

/// Opens the byte stream a session runs over.
pub trait Connector: Send + Sync + 'static {
    /// The stream type produced.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Opens a fresh stream to the server named in `request`.
    fn connect(
        &self,
        request: &ConnectRequest,
    ) -> impl Future<Output = mailpush_imap::Result<Self::Stream>> + Send;
}

/// Connects over TCP, with TLS unless the request disables it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkConnector;

impl Connector for NetworkConnector {
    type Stream = ImapStream;

    async fn connect(&self, request: &ConnectRequest) -> mailpush_imap::Result<ImapStream> {
        mailpush_imap::connection::connect(&request.imap_config()).await
    }
}

/// Reconnect delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay after a connection attempt failed.
    pub connect: Duration,
    /// Delay after an established session broke.
    pub session: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            session: Duration::from_secs(5),
        }
    }
}

impl Backoff {
    /// Delay to apply after `error` ended an attempt.
    #[must_use]
    pub const fn after(&self, error: &Error) -> Duration {
        match error {
            Error::ConnectFailure(_) => self.connect,
            _ => self.session,
        }
    }
}

/// Reconnect loop for one identity.
pub struct Supervisor<C> {
    request: ConnectRequest,
    connector: C,
    registry: SessionRegistry,
    signals: SignalSender,
    backoff: Backoff,
}

impl<C: Connector> Supervisor<C> {
    /// Creates a supervisor with the default backoff.
    #[must_use]
    pub fn new(
        request: ConnectRequest,
        connector: C,
        registry: SessionRegistry,
        signals: SignalSender,
    ) -> Self {
        Self {
            request,
            connector,
            registry,
            signals,
            backoff: Backoff::default(),
        }
    }

    /// Sets the reconnect delays.
    #[must_use]
    pub const fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Starts the loop on the runtime.
    ///
    /// Dropping the returned handle also stops the loop, the same way
    /// [`SupervisorHandle::shutdown`] does but without waiting.
    #[must_use]
    pub fn spawn(self) -> SupervisorHandle {
        let (stop, stopped) = watch::channel(false);
        let task = tokio::spawn(self.run(stopped));
        SupervisorHandle { stop, task }
    }

    async fn run(self, mut stop: watch::Receiver<bool>) {
        let identity = self.request.identity.clone();
        info!(%identity, host = %self.request.host, port = self.request.port, "supervisor started");

        loop {
            let error = match self.attempt(&mut stop).await {
                Ok(()) => break,
                Err(error) => error,
            };

            let delay = self.backoff.after(&error);
            error!(
                %identity,
                phase = error.phase(),
                error = %error,
                retry_in = ?delay,
                "session ended"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = stop.wait_for(|stopped| *stopped) => break,
            }
        }

        info!(%identity, "supervisor stopped");
    }

    /// One connect-and-run attempt.
    ///
    /// Returns `Ok` only when stopped. Connecting is abandoned outright; a
    /// live session logs out first.
    async fn attempt(&self, stop: &mut watch::Receiver<bool>) -> Result<()> {
        let request = &self.request;
        let identity = &request.identity;

        let setup = async {
            let stream = self
                .connector
                .connect(request)
                .await
                .map_err(Error::ConnectFailure)?;
            establish(stream, request).await
        };
        let client = tokio::select! {
            client = setup => client?,
            _ = stop.wait_for(|stopped| *stopped) => return Ok(()),
        };

        let (requests, inbox) = mpsc::channel(REQUEST_QUEUE);
        if self
            .registry
            .register(SessionHandle::new(identity.as_str(), requests))
            .await
            .is_some()
        {
            warn!(%identity, "replaced a stale session");
        }
        info!(%identity, mailbox = %request.mailbox, "session established");
        self.emit(Signal::Connected(identity.clone()));

        let outcome = SessionDriver::new(client, request, inbox, self.signals.clone())
            .run(stop.clone())
            .await;

        self.registry.deregister(identity).await;
        self.emit(Signal::Disconnected(identity.clone()));
        outcome
    }

    fn emit(&self, signal: Signal) {
        if self.signals.send(signal).is_err() {
            debug!(identity = %self.request.identity, "signal queue closed");
        }
    }
}

/// Handle to a running supervisor.
#[derive(Debug)]
pub struct SupervisorHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Returns true once the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Asks the loop to stop and waits up to `grace` for it.
    ///
    /// A live session leaves IDLE and logs out first. A loop that does not
    /// stop in time is aborted; its session is then dropped without a
    /// `Disconnected` signal.
    pub async fn shutdown(self, grace: Duration) {
        let Self { stop, mut task } = self;
        stop.send_replace(true);

        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(())) => debug!("supervisor joined"),
            Ok(Err(e)) => warn!(error = %e, "supervisor task failed"),
            Err(_) => {
                warn!(?grace, "supervisor did not stop in time; aborting");
                task.abort();
            }
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
    use super::*;

    #[test]
    fn test_backoff_by_error_kind() {
        let backoff = Backoff::default();
        let connect = Error::ConnectFailure(mailpush_imap::Error::Timeout(Duration::from_secs(10)));
        let session = Error::ProtocolException(mailpush_imap::Error::Bye("bye".into()));

        assert_eq!(backoff.after(&connect), Duration::from_secs(10));
        assert_eq!(backoff.after(&session), Duration::from_secs(5));
    }
}

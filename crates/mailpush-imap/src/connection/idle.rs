//! IMAP IDLE command support (RFC 2177).
//!
//! IDLE allows the client to receive real-time notifications from the server
//! about mailbox changes without polling. While idling no other command may
//! be sent; [`IdleHandle::done`] must complete before the client is usable
//! again, which the borrow on the client enforces.

#![allow(clippy::missing_errors_doc)]

use std::collections::VecDeque;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{Instant, timeout_at};

use super::client::{Client, Selected, status_to_result};
use super::framed::FramedStream;
use crate::command::Command;
use crate::parser::{Response, Untagged};
use crate::push::Push;
use crate::types::Status;
use crate::{Error, Result};

/// Handle for an active IDLE session.
///
/// Holds a mutable borrow of the client's stream. Call `wait()` to receive
/// pushes, and `done()` to leave IDLE.
pub struct IdleHandle<'a, S> {
    stream: &'a mut FramedStream<S>,
    tag: String,
    deadline: Instant,
    /// Pushes that arrived before the continuation request.
    pending: VecDeque<Vec<u8>>,
    /// Set once the server completed the IDLE command on its own.
    terminated: bool,
}

impl<'a, S> IdleHandle<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Returns the point at which this IDLE stops waiting.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Waits for the next server push.
    ///
    /// Returns [`Push::Sentinel`] once the idle deadline passes or the server
    /// ends IDLE itself. The future is cancel-safe.
    pub async fn wait(&mut self) -> Result<Push> {
        if let Some(raw) = self.pending.pop_front() {
            return self.interpret(&raw);
        }
        if self.terminated {
            return Ok(Push::Sentinel);
        }

        match timeout_at(self.deadline, self.stream.read_response()).await {
            Ok(response) => self.interpret(&response?),
            Err(_) => Ok(Push::Sentinel),
        }
    }

    fn interpret(&mut self, raw: &[u8]) -> Result<Push> {
        tracing::trace!(push = %crate::parser::first_line(raw), "idle push");

        match Response::parse(raw) {
            Ok(Response::Tagged { tag, status, text }) if tag == self.tag => {
                // Server ended IDLE on its own (unusual but valid).
                self.terminated = true;
                status_to_result(status, text).map(|()| Push::Sentinel)
            }
            Ok(Response::Tagged { tag, .. }) => Err(Error::Protocol(format!(
                "unexpected tag {tag} during IDLE"
            ))),
            Ok(Response::Untagged(Untagged::Status {
                status: Status::Bye,
                text,
            })) => Err(Error::Bye(text)),
            _ => Ok(Push::classify(raw)),
        }
    }

    /// Leaves IDLE by sending DONE and waiting for the tagged completion.
    ///
    /// Returns the pushes the server sent between the last `wait()` and the
    /// completion, so none is lost. Sentinels are left out.
    pub async fn done(mut self) -> Result<Vec<Push>> {
        let mut late: Vec<Push> = Vec::new();
        while let Some(raw) = self.pending.pop_front() {
            let push = self.interpret(&raw)?;
            if push != Push::Sentinel {
                late.push(push);
            }
        }
        if self.terminated {
            return Ok(late);
        }

        self.stream
            .write_command(&Command::Done.serialize(""))
            .await?;

        loop {
            let response = self.stream.read_response().await?;
            match Response::parse(&response) {
                Ok(Response::Tagged { tag, status, text }) if tag == self.tag => {
                    status_to_result(status, text)?;
                    return Ok(late);
                }
                _ => match Push::classify(&response) {
                    Push::Sentinel => {}
                    push => late.push(push),
                },
            }
        }
    }
}

impl<S> Client<S, Selected>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Enters IDLE mode for real-time notifications.
    ///
    /// The handle stops waiting `timeout` after this call; RFC 2177 asks
    /// clients to re-issue IDLE at least every 29 minutes.
    pub async fn idle(&mut self, timeout: Duration) -> Result<IdleHandle<'_, S>> {
        let tag = self.tag_gen.next_tag();
        tracing::trace!(%tag, "entering IDLE");
        self.stream
            .write_command(&Command::Idle.serialize(&tag))
            .await?;
        let deadline = Instant::now() + timeout;

        let mut pending = VecDeque::new();
        loop {
            let response = self.stream.read_response().await?;
            match Response::parse(&response)? {
                Response::Continuation { .. } => break,
                Response::Tagged {
                    tag: resp_tag,
                    status,
                    text,
                } if resp_tag == tag => {
                    status_to_result(status, text)?;
                    return Err(Error::Protocol(
                        "IDLE completed without continuation".to_string(),
                    ));
                }
                Response::Untagged(Untagged::Status {
                    status: Status::Bye,
                    text,
                }) => return Err(Error::Bye(text)),
                _ => pending.push_back(response),
            }
        }

        Ok(IdleHandle {
            stream: &mut self.stream,
            tag,
            deadline,
            pending,
            terminated: false,
        })
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
    use crate::TagGenerator;
    use crate::types::SeqNum;

    fn selected(mock: Mock) -> Client<Mock, Selected> {
        Client {
            stream: FramedStream::new(mock),
            tag_gen: TagGenerator::default(),
            capabilities: vec!["IDLE".to_string()],
            state: Selected::new("INBOX", None),
        }
    }

    #[tokio::test]
    async fn test_idle_exists_then_done() {
        let mock = Builder::new()
            .write(b"A0000 IDLE\r\n")
            .read(b"+ idling\r\n")
            .read(b"* 3085 EXISTS\r\n")
            .write(b"DONE\r\n")
            .read(b"A0000 OK IDLE terminated\r\n")
            .build();

        let mut client = selected(mock);
        let mut idle = client.idle(Duration::from_secs(60)).await.unwrap();
        let push = idle.wait().await.unwrap();
        assert_eq!(push, Push::SizeChanged(SeqNum::new(3085).unwrap()));
        assert!(idle.done().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_deadline_yields_sentinel() {
        let mock = Builder::new()
            .write(b"A0000 IDLE\r\n")
            .read(b"+ idling\r\n")
            .wait(Duration::from_secs(120))
            .write(b"DONE\r\n")
            .read(b"A0000 OK IDLE terminated\r\n")
            .build();

        let mut client = selected(mock);
        let mut idle = client.idle(Duration::from_secs(60)).await.unwrap();
        assert_eq!(idle.wait().await.unwrap(), Push::Sentinel);
        idle.done().await.unwrap();
    }

    #[tokio::test]
    async fn test_late_exists_during_done() {
        let mock = Builder::new()
            .write(b"A0000 IDLE\r\n")
            .read(b"+ idling\r\n")
            .write(b"DONE\r\n")
            .read(b"* 3 EXPUNGE\r\n* 12 EXISTS\r\n")
            .read(b"A0000 OK IDLE terminated\r\n")
            .build();

        let mut client = selected(mock);
        let idle = client.idle(Duration::from_secs(60)).await.unwrap();
        let late = idle.done().await.unwrap();
        assert_eq!(
            late,
            vec![
                Push::Unknown("* 3 EXPUNGE".to_string()),
                Push::SizeChanged(SeqNum::new(12).unwrap()),
            ]
        );
    }

    #[tokio::test]
    async fn test_push_before_continuation_is_kept() {
        let mock = Builder::new()
            .write(b"A0000 IDLE\r\n")
            .read(b"* 5 EXISTS\r\n")
            .read(b"+ idling\r\n")
            .write(b"DONE\r\n")
            .read(b"A0000 OK IDLE terminated\r\n")
            .build();

        let mut client = selected(mock);
        let mut idle = client.idle(Duration::from_secs(60)).await.unwrap();
        assert!(matches!(idle.wait().await.unwrap(), Push::SizeChanged(_)));
        idle.done().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_bye_while_idling() {
        let mock = Builder::new()
            .write(b"A0000 IDLE\r\n")
            .read(b"+ idling\r\n")
            .read(b"* BYE autologout\r\n")
            .build();

        let mut client = selected(mock);
        let mut idle = client.idle(Duration::from_secs(60)).await.unwrap();
        let err = idle.wait().await.unwrap_err();
        assert!(matches!(err, Error::Bye(_)));
    }

    #[tokio::test]
    async fn test_server_terminates_idle() {
        let mock = Builder::new()
            .write(b"A0000 IDLE\r\n")
            .read(b"+ idling\r\n")
            .read(b"A0000 OK IDLE timed out\r\n")
            .build();

        let mut client = selected(mock);
        let mut idle = client.idle(Duration::from_secs(60)).await.unwrap();
        assert_eq!(idle.wait().await.unwrap(), Push::Sentinel);
        // No DONE is written once the server has completed the command.
        idle.done().await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_rejected() {
        let mock = Builder::new()
            .write(b"A0000 IDLE\r\n")
            .read(b"A0000 BAD IDLE not supported\r\n")
            .build();

        let mut client = selected(mock);
        let err = client.idle(Duration::from_secs(60)).await.err().unwrap();
        assert!(matches!(err, Error::Bad(_)));
    }
}

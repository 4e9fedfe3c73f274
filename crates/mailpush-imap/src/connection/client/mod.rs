//! The client, typed by connection state.
//!
//! `NotAuthenticated` (greeting read) becomes `Authenticated` after LOGIN and
//! `Selected` after SELECT. IDLE and FETCH exist only on `Selected`.

#![allow(clippy::missing_errors_doc)]

mod authenticated;
mod not_authenticated;
mod selected;
mod states;

use tokio::io::{AsyncRead, AsyncWrite};

pub use self::states::{Authenticated, NotAuthenticated, Selected};
use super::framed::{FramedStream, ResponseAccumulator};
use crate::command::{Command, TagGenerator};
use crate::parser::Response;
use crate::types::Status;
use crate::{Error, Result};

/// An IMAP connection in state `State`.
pub struct Client<S, State> {
    pub(crate) stream: FramedStream<S>,
    pub(crate) tag_gen: TagGenerator,
    pub(crate) capabilities: Vec<String>,
    pub(crate) state: State,
}

impl<S, State: std::fmt::Debug> std::fmt::Debug for Client<S, State> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("tag_gen", &self.tag_gen)
            .field("capabilities", &self.capabilities)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Checks if the server advertised a capability (case-insensitive).
    #[must_use]
    pub fn has_capability(&self, cap: &str) -> bool {
        self.capabilities.iter().any(|c| c.eq_ignore_ascii_case(cap))
    }

    /// Returns true if the server advertised IDLE (RFC 2177).
    #[must_use]
    pub fn supports_idle(&self) -> bool {
        self.has_capability("IDLE")
    }

    /// Sends LOGOUT and closes the write half of the connection.
    pub async fn logout(mut self) -> Result<()> {
        let tag = self.tag_gen.next_tag();
        self.stream
            .write_command(&Command::Logout.serialize(&tag))
            .await?;

        // The server answers with BYE followed by the tagged OK.
        let responses = self.read_until_tagged(&tag).await?;
        Self::check_tagged_ok(&responses, &tag)?;
        self.stream.shutdown().await
    }

    /// Writes a command and collects responses up to its tagged completion.
    pub(crate) async fn execute(&mut self, command: &Command) -> Result<Vec<Vec<u8>>> {
        let (tag, responses) = self.exchange(command).await?;
        Self::check_tagged_ok(&responses, &tag)?;
        Ok(responses)
    }

    /// Like [`Self::execute`], but hands back the responses together with
    /// their tag without checking the completion status.
    pub(crate) async fn exchange(&mut self, command: &Command) -> Result<(String, Vec<Vec<u8>>)> {
        let tag = self.tag_gen.next_tag();
        tracing::trace!(%tag, command = %command.redacted(), "sending command");
        self.stream.write_command(&command.serialize(&tag)).await?;

        let responses = self.read_until_tagged(&tag).await?;
        Ok((tag, responses))
    }

    /// Reads responses until we get a tagged response matching our tag.
    pub(crate) async fn read_until_tagged(&mut self, tag: &str) -> Result<Vec<Vec<u8>>> {
        let mut accumulator = ResponseAccumulator::new(tag);
        accumulator.read_until_tagged(&mut self.stream).await
    }

    /// Records capabilities announced in untagged CAPABILITY responses or
    /// `[CAPABILITY ...]` response codes.
    pub(crate) fn absorb_capabilities(&mut self, responses: &[Vec<u8>]) {
        for bytes in responses {
            if let Some(caps) = capabilities_in(bytes) {
                self.capabilities = caps;
            }
        }
    }

    /// Moves the connection into another state.
    pub(crate) fn transition<Next>(self, state: Next) -> Client<S, Next> {
        Client {
            stream: self.stream,
            tag_gen: self.tag_gen,
            capabilities: self.capabilities,
            state,
        }
    }

    /// Checks that the tagged response is OK.
    pub(crate) fn check_tagged_ok(responses: &[Vec<u8>], tag: &str) -> Result<()> {
        // Find the tagged response (should be the last one)
        for response_bytes in responses.iter().rev() {
            if let Ok(Response::Tagged {
                tag: resp_tag,
                status,
                text,
            }) = Response::parse(response_bytes)
                && resp_tag == tag
            {
                return status_to_result(status, text);
            }
        }

        Err(Error::Protocol("missing tagged response".to_string()))
    }
}

/// Maps a completion status to a result.
pub(crate) fn status_to_result(status: Status, text: String) -> Result<()> {
    match status {
        Status::Ok | Status::PreAuth => Ok(()),
        Status::No => Err(Error::No(text)),
        Status::Bad => Err(Error::Bad(text)),
        Status::Bye => Err(Error::Bye(text)),
    }
}

fn capabilities_in(bytes: &[u8]) -> Option<Vec<String>> {
    let line = crate::parser::first_line(bytes);
    if let Ok(Response::Untagged(crate::parser::Untagged::Capability(caps))) =
        Response::parse(bytes)
    {
        return Some(caps);
    }

    let start = line.find("[CAPABILITY ")? + "[CAPABILITY ".len();
    let end = line[start..].find(']')? + start;
    Some(line[start..end].split_whitespace().map(str::to_string).collect())
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
    fn test_capabilities_in_code() {
        let caps = capabilities_in(b"* OK [CAPABILITY IMAP4rev1 IDLE] ready\r\n").unwrap();
        assert_eq!(caps, vec!["IMAP4rev1", "IDLE"]);
        assert!(capabilities_in(b"* OK ready\r\n").is_none());
    }

    #[test]
    fn test_check_tagged_ok() {
        type Mock = Client<tokio_test::io::Mock, NotAuthenticated>;
        let ok = vec![b"* 1 EXISTS\r\n".to_vec(), b"A0001 OK done\r\n".to_vec()];
        assert!(Mock::check_tagged_ok(&ok, "A0001").is_ok());

        let no = vec![b"A0001 NO [TRYCREATE] missing\r\n".to_vec()];
        assert!(matches!(
            Mock::check_tagged_ok(&no, "A0001"),
            Err(Error::No(text)) if text == "[TRYCREATE] missing"
        ));

        let other = vec![b"A0009 OK done\r\n".to_vec()];
        assert!(matches!(
            Mock::check_tagged_ok(&other, "A0001"),
            Err(Error::Protocol(_))
        ));
    }
}

//! Implementation for the selected state.

use tokio::io::{AsyncRead, AsyncWrite};

use super::Client;
use super::states::Selected;
use crate::command::Command;
use crate::parser::{Response, Untagged, fetch};
use crate::types::SeqNum;
use crate::{Error, Result};

impl<S> Client<S, Selected>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Returns the selected mailbox name.
    #[must_use]
    pub fn mailbox(&self) -> &str {
        self.state.mailbox()
    }

    /// Returns the message count reported when the mailbox was selected.
    #[must_use]
    pub const fn exists(&self) -> Option<u32> {
        self.state.exists()
    }

    /// Drains the EXISTS and EXPUNGE responses the server slipped into the
    /// answers to [`Self::fetch_header`] and [`Self::raw`], oldest first.
    pub fn take_unsolicited(&mut self) -> Vec<Untagged> {
        std::mem::take(&mut self.state.unsolicited)
    }

    /// Fetches the header section of one message.
    ///
    /// Returns `None` when the server answered OK but sent no header data
    /// for the message (for instance because it was expunged meanwhile).
    pub async fn fetch_header(&mut self, seq: SeqNum) -> Result<Option<Vec<u8>>> {
        let responses = self.execute_tracked(&Command::FetchHeader { seq }).await?;

        for bytes in &responses {
            if let Some(header) = fetch::header_section(bytes, seq)? {
                return Ok(Some(header));
            }
        }
        Ok(None)
    }

    /// Runs an arbitrary command and returns every response line it produced,
    /// including the tagged completion.
    ///
    /// IDLE, DONE and LOGOUT are refused: they would break the session's
    /// state tracking.
    pub async fn raw(&mut self, name: &str, args: &[String]) -> Result<Vec<String>> {
        validate_raw(name, args)?;

        let responses = self
            .execute_tracked(&Command::Raw {
                name: name.to_string(),
                args: args.to_vec(),
            })
            .await?;

        Ok(responses
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).trim_end().to_string())
            .collect())
    }

    /// Runs a command, keeping mailbox size changes even if it fails.
    async fn execute_tracked(&mut self, command: &Command) -> Result<Vec<Vec<u8>>> {
        let (tag, responses) = self.exchange(command).await?;
        self.state.unsolicited.extend(
            responses
                .iter()
                .filter_map(|bytes| match Response::parse(bytes) {
                    Ok(Response::Untagged(
                        untagged @ (Untagged::Exists(_) | Untagged::Expunge(_)),
                    )) => Some(untagged),
                    _ => None,
                }),
        );
        Self::check_tagged_ok(&responses, &tag)?;
        Ok(responses)
    }
}

fn validate_raw(name: &str, args: &[String]) -> Result<()> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'.') {
        return Err(Error::Protocol(format!("invalid command name: {name:?}")));
    }
    if ["IDLE", "DONE", "LOGOUT"]
        .iter()
        .any(|reserved| name.eq_ignore_ascii_case(reserved))
    {
        return Err(Error::Protocol(format!(
            "{} cannot be sent as a raw command",
            name.to_ascii_uppercase()
        )));
    }
    if args.iter().any(|arg| arg.contains(['\r', '\n'])) {
        return Err(Error::Protocol(
            "raw command arguments must not contain line breaks".to_string(),
        ));
    }
    Ok(())
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
    use crate::connection::framed::FramedStream;

    fn selected(mock: Mock) -> Client<Mock, Selected> {
        Client {
            stream: FramedStream::new(mock),
            // LOGIN and SELECT used A0000 and A0001.
            tag_gen: TagGenerator::starting_at(2),
            capabilities: Vec::new(),
            state: Selected::new("INBOX", Some(3084)),
        }
    }

    #[tokio::test]
    async fn test_fetch_header() {
        let mock = Builder::new()
            .write(b"A0002 FETCH 3085 BODY[HEADER]\r\n")
            .read(b"* 3085 FETCH (BODY[HEADER] {13}\r\nSubject: hi\r\n)\r\n")
            .read(b"A0002 OK FETCH completed\r\n")
            .build();

        let mut client = selected(mock);
        let header = client
            .fetch_header(SeqNum::new(3085).unwrap())
            .await
            .unwrap();
        assert_eq!(header.unwrap(), b"Subject: hi\r\n");
    }

    #[tokio::test]
    async fn test_fetch_header_absent() {
        let mock = Builder::new()
            .write(b"A0002 FETCH 9 BODY[HEADER]\r\n")
            .read(b"A0002 OK FETCH completed\r\n")
            .build();

        let mut client = selected(mock);
        let header = client.fetch_header(SeqNum::new(9).unwrap()).await.unwrap();
        assert!(header.is_none());
    }

    #[tokio::test]
    async fn test_size_changes_kept_from_fetch() {
        let mock = Builder::new()
            .write(b"A0002 FETCH 3085 BODY[HEADER]\r\n")
            .read(b"* 3085 FETCH (BODY[HEADER] {13}\r\nSubject: hi\r\n)\r\n")
            .read(b"* 3086 EXISTS\r\n* 1 RECENT\r\n")
            .read(b"A0002 OK FETCH completed\r\n")
            .write(b"A0003 FETCH 3086 BODY[HEADER]\r\n")
            .read(b"* 12 EXPUNGE\r\nA0003 NO message is gone\r\n")
            .build();

        let mut client = selected(mock);
        assert_eq!(client.exists(), Some(3084));
        assert!(client.take_unsolicited().is_empty());

        client
            .fetch_header(SeqNum::new(3085).unwrap())
            .await
            .unwrap();
        assert_eq!(client.take_unsolicited(), vec![Untagged::Exists(3086)]);
        assert!(client.take_unsolicited().is_empty());

        // A refused command still reports what changed.
        let err = client
            .fetch_header(SeqNum::new(3086).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::No(_)));
        assert_eq!(
            client.take_unsolicited(),
            vec![Untagged::Expunge(SeqNum::new(12).unwrap())]
        );
    }

    #[tokio::test]
    async fn test_raw_command() {
        let mock = Builder::new()
            .write(b"A0002 SEARCH UNSEEN\r\n")
            .read(b"* SEARCH 4 9\r\n")
            .read(b"A0002 OK SEARCH completed\r\n")
            .build();

        let mut client = selected(mock);
        let lines = client.raw("search", &["UNSEEN".to_string()]).await.unwrap();
        assert_eq!(lines, vec!["* SEARCH 4 9", "A0002 OK SEARCH completed"]);
        assert!(client.take_unsolicited().is_empty());
    }

    #[test]
    fn test_raw_validation() {
        assert!(validate_raw("NOOP", &[]).is_ok());
        assert!(validate_raw("", &[]).is_err());
        assert!(validate_raw("idle", &[]).is_err());
        assert!(validate_raw("FETCH 1", &[]).is_err());
        assert!(validate_raw("SEARCH", &["ALL\r\nA1 LOGOUT".to_string()]).is_err());
    }
}

//! Response framing.
//!
//! A response is one line, or a line ending in a `{n}` literal announcement
//! followed by `n` raw bytes and the rest of the line, repeated.
//!
//! [`FramedStream::read_response`] is cancel-safe: partially received data is
//! kept in the stream, so the future can be dropped (for instance by a
//! `select!` or a timeout) and the next call resumes where the last one left
//! off.

#![allow(clippy::missing_errors_doc)]

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{Error, Result};

const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Longest line accepted outside a literal.
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Largest literal accepted. Header blobs are far smaller.
const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024;

/// A stream split into complete server responses.
pub struct FramedStream<S> {
    reader: BufReader<S>,
    /// Bytes of the response currently being assembled.
    partial: Vec<u8>,
    /// Offset in `partial` where the current line starts.
    line_start: usize,
    /// Literal bytes still expected before line parsing resumes.
    literal_remaining: Option<usize>,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new framed stream.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
            partial: Vec::new(),
            line_start: 0,
            literal_remaining: None,
        }
    }

    /// Reads a complete IMAP response, handling literals.
    ///
    /// IMAP responses can contain literals in the format `{n}\r\n<n bytes>`.
    /// This method returns the entire response including any embedded literals.
    pub async fn read_response(&mut self) -> Result<Vec<u8>> {
        loop {
            // The only await point. Everything after it runs to completion.
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                )));
            }

            if let Some(remaining) = self.literal_remaining {
                let take = remaining.min(buf.len());
                self.partial.extend_from_slice(&buf[..take]);
                self.reader.consume(take);
                let left = remaining - take;
                if left == 0 {
                    self.literal_remaining = None;
                    self.line_start = self.partial.len();
                } else {
                    self.literal_remaining = Some(left);
                }
                continue;
            }

            if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                self.partial.extend_from_slice(&buf[..=pos]);
                self.reader.consume(pos + 1);
                self.check_line_length()?;

                match parse_literal_length(&self.partial[self.line_start..]) {
                    Some(len) if len > MAX_LITERAL_SIZE => {
                        self.reset();
                        return Err(Error::Protocol(format!(
                            "literal too large: {len} bytes (max {MAX_LITERAL_SIZE})"
                        )));
                    }
                    Some(0) => {
                        self.line_start = self.partial.len();
                    }
                    Some(len) => {
                        self.literal_remaining = Some(len);
                    }
                    None => {
                        let response = std::mem::take(&mut self.partial);
                        self.line_start = 0;
                        return Ok(response);
                    }
                }
            } else {
                let len = buf.len();
                self.partial.extend_from_slice(buf);
                self.reader.consume(len);
                self.check_line_length()?;
            }
        }
    }

    fn check_line_length(&mut self) -> Result<()> {
        if self.partial.len() - self.line_start > MAX_LINE_LENGTH {
            self.reset();
            return Err(Error::Protocol("line too long".to_string()));
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.partial.clear();
        self.line_start = 0;
        self.literal_remaining = None;
    }

    /// Writes a command to the stream.
    pub async fn write_command(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Shuts down the write half of the underlying stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.reader.get_mut().shutdown().await?;
        Ok(())
    }
}

/// Parses a literal length from the end of a line.
///
/// Matches patterns like `{123}\r\n` or `{123+}\r\n` (non-synchronizing).
fn parse_literal_length(line: &[u8]) -> Option<usize> {
    let line = line
        .strip_suffix(b"\r\n")
        .or_else(|| line.strip_suffix(b"\n"))?;
    let line = line.strip_suffix(b"}")?;
    let line = line.strip_suffix(b"+").unwrap_or(line);

    let open = line.iter().rposition(|&b| b == b'{')?;
    let digits = &line[open + 1..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }

    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Accumulates responses until the tagged completion for a command.
pub struct ResponseAccumulator {
    tag: String,
    responses: Vec<Vec<u8>>,
}

impl ResponseAccumulator {
    /// Creates a new response accumulator for the given tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            responses: Vec::new(),
        }
    }

    /// Reads responses until a tagged response matching our tag is found.
    pub async fn read_until_tagged<S>(
        &mut self,
        framed: &mut FramedStream<S>,
    ) -> Result<Vec<Vec<u8>>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let response = framed.read_response().await?;
            let is_tagged = is_tagged_with(&response, &self.tag);
            self.responses.push(response);
            if is_tagged {
                break;
            }
        }

        Ok(std::mem::take(&mut self.responses))
    }
}

/// Returns true if `response` is the tagged completion for `tag`.
pub(crate) fn is_tagged_with(response: &[u8], tag: &str) -> bool {
    response
        .get(..tag.len())
        .is_some_and(|prefix| prefix == tag.as_bytes())
        && response.get(tag.len()).is_some_and(|&b| b == b' ')
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
    use std::time::Duration;

    use tokio_test::io::Builder;

    use super::*;

    #[test]
    fn test_parse_literal_length() {
        assert_eq!(parse_literal_length(b"BODY {123}\r\n"), Some(123));
        assert_eq!(parse_literal_length(b"BODY {123+}\r\n"), Some(123));
        assert_eq!(parse_literal_length(b"{0}\r\n"), Some(0));
        assert_eq!(parse_literal_length(b"BODY[HEADER] {42}\n"), Some(42));
        assert_eq!(parse_literal_length(b"no literal\r\n"), None);
        assert_eq!(parse_literal_length(b"incomplete {123"), None);
        assert_eq!(parse_literal_length(b"wrong {abc}\r\n"), None);
        assert_eq!(parse_literal_length(b"empty {}\r\n"), None);
    }

    #[tokio::test]
    async fn test_framed_read_simple_line() {
        let mock = Builder::new().read(b"* OK ready\r\n").build();
        let mut framed = FramedStream::new(mock);

        let response = framed.read_response().await.unwrap();
        assert_eq!(response, b"* OK ready\r\n");
    }

    #[tokio::test]
    async fn test_framed_read_split_line() {
        let mock = Builder::new()
            .read(b"* 3085 EX")
            .read(b"ISTS\r\n* 1 RECENT\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        assert_eq!(framed.read_response().await.unwrap(), b"* 3085 EXISTS\r\n");
        assert_eq!(framed.read_response().await.unwrap(), b"* 1 RECENT\r\n");
    }

    #[tokio::test]
    async fn test_framed_read_with_literal() {
        let mock = Builder::new()
            .read(b"* 1 FETCH (BODY[HEADER] {7}\r\n")
            .read(b"A: b\r\n\n)\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let response = framed.read_response().await.unwrap();
        assert_eq!(response, b"* 1 FETCH (BODY[HEADER] {7}\r\nA: b\r\n\n)\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_survives_cancellation() {
        let mock = Builder::new()
            .read(b"* 12 EXI")
            .wait(Duration::from_secs(10))
            .read(b"STS\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let first = tokio::time::timeout(Duration::from_secs(1), framed.read_response()).await;
        assert!(first.is_err());

        let response = framed.read_response().await.unwrap();
        assert_eq!(response, b"* 12 EXISTS\r\n");
    }

    #[tokio::test]
    async fn test_framed_write_command() {
        let mock = Builder::new().write(b"A0000 LOGIN user pass\r\n").build();
        let mut framed = FramedStream::new(mock);

        framed
            .write_command(b"A0000 LOGIN user pass\r\n")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_response_accumulator() {
        let mock = Builder::new()
            .read(b"* 172 EXISTS\r\n")
            .read(b"* OK [UIDVALIDITY 3857529045] UIDs valid\r\n")
            .read(b"A0001 OK [READ-WRITE] SELECT completed\r\n")
            .build();

        let mut framed = FramedStream::new(mock);
        let mut accumulator = ResponseAccumulator::new("A0001");

        let responses = accumulator.read_until_tagged(&mut framed).await.unwrap();

        assert_eq!(responses.len(), 3);
        assert_eq!(responses[2], b"A0001 OK [READ-WRITE] SELECT completed\r\n");
    }

    #[tokio::test]
    async fn test_literal_size_validation() {
        let literal_size = MAX_LITERAL_SIZE + 1;
        let header = format!("* 1 FETCH (BODY {{{literal_size}}}\r\n");

        let mock = Builder::new().read(header.as_bytes()).build();
        let mut framed = FramedStream::new(mock);

        let result = framed.read_response().await;
        assert!(result.unwrap_err().to_string().contains("literal too large"));
    }

    #[tokio::test]
    async fn test_line_length_limit() {
        let long_line = "A".repeat(MAX_LINE_LENGTH + 100);
        let mock = Builder::new().read(long_line.as_bytes()).build();
        let mut framed = FramedStream::new(mock);

        let result = framed.read_response().await;
        assert!(result.unwrap_err().to_string().contains("line too long"));
    }

    #[tokio::test]
    async fn test_eof_is_io_error() {
        let mock = Builder::new().build();
        let mut framed = FramedStream::new(mock);

        let err = framed.read_response().await.unwrap_err();
        assert!(err.is_transport());
    }
}

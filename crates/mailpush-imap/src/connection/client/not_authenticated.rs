//! Implementation for the not-authenticated state.

use tokio::io::{AsyncRead, AsyncWrite};

use super::Client;
use super::states::{Authenticated, NotAuthenticated};
use crate::command::{Command, TagGenerator};
use crate::connection::framed::FramedStream;
use crate::parser::{Response, Untagged};
use crate::types::Status;
use crate::{Error, Result};

impl<S> Client<S, NotAuthenticated>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new client from a connected stream.
    ///
    /// Reads the server greeting and any capabilities it announces.
    pub async fn from_stream(stream: S) -> Result<Self> {
        let mut framed = FramedStream::new(stream);

        let greeting = framed.read_response().await?;
        match Response::parse(&greeting)? {
            Response::Untagged(Untagged::Status {
                status: Status::Bye,
                text,
            }) => return Err(Error::Bye(text)),
            Response::Untagged(Untagged::Status {
                status: Status::Ok | Status::PreAuth,
                ..
            }) => {}
            _ => {
                return Err(Error::Protocol(format!(
                    "unexpected greeting: {}",
                    crate::parser::first_line(&greeting)
                )));
            }
        }
        tracing::trace!(greeting = %crate::parser::first_line(&greeting), "server greeting");

        let mut client = Self {
            stream: framed,
            tag_gen: TagGenerator::default(),
            capabilities: Vec::new(),
            state: NotAuthenticated,
        };
        client.absorb_capabilities(&[greeting]);
        Ok(client)
    }

    /// Authenticates with the server using LOGIN.
    ///
    /// Consumes self and returns an authenticated client on success.
    pub async fn login(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<S, Authenticated>> {
        let responses = self
            .execute(&Command::Login {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await?;

        // Servers commonly refresh capabilities after login.
        self.absorb_capabilities(&responses);
        Ok(self.transition(Authenticated))
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
    use tokio_test::io::Builder;

    use super::*;

    #[tokio::test]
    async fn test_greeting_and_login() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] ready\r\n")
            .write(b"A0000 LOGIN email@none.bot secret\r\n")
            .read(b"A0000 OK [CAPABILITY IMAP4rev1 IDLE] logged in\r\n")
            .build();

        let client = Client::from_stream(mock).await.unwrap();
        assert!(!client.supports_idle());

        let client = client.login("email@none.bot", "secret").await.unwrap();
        assert!(client.supports_idle());
    }

    #[tokio::test]
    async fn test_bye_greeting() {
        let mock = Builder::new().read(b"* BYE too many connections\r\n").build();
        let err = Client::from_stream(mock).await.unwrap_err();
        assert!(matches!(err, Error::Bye(text) if text == "too many connections"));
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let mock = Builder::new()
            .read(b"* OK ready\r\n")
            .write(b"A0000 LOGIN user wrong\r\n")
            .read(b"A0000 NO [AUTHENTICATIONFAILED] invalid\r\n")
            .build();

        let client = Client::from_stream(mock).await.unwrap();
        let err = client.login("user", "wrong").await.unwrap_err();
        assert!(matches!(err, Error::No(_)));
        assert!(!err.is_transport());
    }
}

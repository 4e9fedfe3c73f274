//! Registry of live sessions, keyed by identity.
//!
//! The supervisor is the only writer. Dispatch and the passthrough API read
//! it; a missing entry is a normal outcome.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot};

use crate::{Error, Result};

/// Requests a running session serves between IDLE cycles.
#[derive(Debug)]
pub enum SessionRequest {
    /// Run a raw command and reply with its response lines.
    Command {
        /// Command name.
        name: String,
        /// Arguments, written verbatim.
        args: Vec<String>,
        /// Where the outcome goes.
        reply: oneshot::Sender<mailpush_imap::Result<Vec<String>>>,
    },
}

/// Cheap, cloneable handle to a live session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    identity: Arc<str>,
    requests: mpsc::Sender<SessionRequest>,
}

impl SessionHandle {
    /// Creates a handle that forwards requests into `requests`.
    #[must_use]
    pub fn new(identity: impl Into<Arc<str>>, requests: mpsc::Sender<SessionRequest>) -> Self {
        Self {
            identity: identity.into(),
            requests,
        }
    }

    /// The session identity.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Runs a raw IMAP command against the session.
    ///
    /// The session leaves IDLE, runs the command, and resumes idling.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSession`] if the session ended before
    /// answering, and [`Error::Command`] if the server rejected the command.
    pub async fn call(&self, name: &str, args: &[&str]) -> Result<Vec<String>> {
        let (reply, response) = oneshot::channel();
        let request = SessionRequest::Command {
            name: name.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            reply,
        };

        self.requests
            .send(request)
            .await
            .map_err(|_| Error::UnknownSession(self.identity.to_string()))?;

        response
            .await
            .map_err(|_| Error::UnknownSession(self.identity.to_string()))?
            .map_err(Error::Command)
    }
}

/// Shared map from identity to live session.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session, returning the one it replaced, if any.
    pub async fn register(&self, handle: SessionHandle) -> Option<SessionHandle> {
        let identity = handle.identity().to_string();
        self.inner.write().await.insert(identity, handle)
    }

    /// Removes the session for `identity`.
    pub async fn deregister(&self, identity: &str) -> Option<SessionHandle> {
        self.inner.write().await.remove(identity)
    }

    /// Looks up the session for `identity`.
    pub async fn get(&self, identity: &str) -> Option<SessionHandle> {
        self.inner.read().await.get(identity).cloned()
    }

    /// Returns true if a session is registered for `identity`.
    pub async fn contains(&self, identity: &str) -> bool {
        self.inner.read().await.contains_key(identity)
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Returns true if no session is registered.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
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

    #[tokio::test]
    async fn test_register_lookup_deregister() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);

        assert!(registry.get("email@none.bot").await.is_none());
        assert!(
            registry
                .register(SessionHandle::new("email@none.bot", tx.clone()))
                .await
                .is_none()
        );
        assert!(registry.contains("email@none.bot").await);

        // A second registration replaces the first; there is still one entry.
        assert!(
            registry
                .register(SessionHandle::new("email@none.bot", tx))
                .await
                .is_some()
        );
        assert_eq!(registry.len().await, 1);

        assert!(registry.deregister("email@none.bot").await.is_some());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = SessionHandle::new("email@none.bot", tx);

        let server = tokio::spawn(async move {
            let Some(SessionRequest::Command { name, args, reply }) = rx.recv().await else {
                panic!("expected a command");
            };
            assert_eq!(name, "SEARCH");
            assert_eq!(args, vec!["UNSEEN"]);
            reply.send(Ok(vec!["* SEARCH 4".to_string()])).unwrap();
        });

        let lines = handle.call("SEARCH", &["UNSEEN"]).await.unwrap();
        assert_eq!(lines, vec!["* SEARCH 4"]);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_call_after_session_ended() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = SessionHandle::new("email@none.bot", tx);

        let err = handle.call("NOOP", &[]).await.unwrap_err();
        assert!(matches!(err, Error::UnknownSession(id) if id == "email@none.bot"));
    }
}

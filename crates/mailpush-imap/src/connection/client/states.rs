//! Type-state markers for IMAP client connection states.
//!
//! `Selected` is not a bare marker: it carries what SELECT reported about
//! the mailbox, and the size changes the server announced since.

use std::sync::Arc;

use crate::parser::Untagged;

/// Marker type for the not-authenticated state.
///
/// In this state, only LOGIN is valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotAuthenticated;

/// Marker type for the authenticated state.
///
/// In this state, SELECT is valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authenticated;

/// State for a selected mailbox.
#[derive(Debug, Clone)]
pub struct Selected {
    /// The selected mailbox name.
    pub(crate) mailbox: Arc<str>,
    /// Message count reported by SELECT, if the server sent one.
    pub(crate) exists: Option<u32>,
    /// EXISTS and EXPUNGE responses that arrived alongside other commands.
    pub(crate) unsolicited: Vec<Untagged>,
}

impl Selected {
    /// Creates a new Selected state.
    #[must_use]
    pub fn new(mailbox: impl Into<Arc<str>>, exists: Option<u32>) -> Self {
        Self {
            mailbox: mailbox.into(),
            exists,
            unsolicited: Vec::new(),
        }
    }

    /// Returns the name of the selected mailbox.
    #[must_use]
    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// Returns the message count reported when the mailbox was selected.
    #[must_use]
    pub const fn exists(&self) -> Option<u32> {
        self.exists
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selected_accessors() {
        let state = Selected::new("INBOX", Some(172));
        assert_eq!(state.mailbox(), "INBOX");
        assert_eq!(state.exists(), Some(172));
        assert!(state.unsolicited.is_empty());
    }
}

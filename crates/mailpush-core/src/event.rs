//! New-mail events and their derived accessors.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::header::ParsedHeader;

/// A parsed `display-name <address>` pair.
///
/// The default value (both parts empty) stands for "no sender".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Emailer {
    /// Display name, without surrounding quotes.
    pub name: String,
    /// Address between the angle brackets.
    pub address: String,
}

impl Emailer {
    /// Parses one `name <address>` entry.
    ///
    /// Both parts must be present; anything else yields the empty value.
    /// A display name wrapped in double quotes loses them, so
    /// `"mailbot" <email@none.bot>` and `mailbot <email@none.bot>` parse to
    /// the same value. Quotes inside the name are kept.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        Self::try_parse(text).unwrap_or_default()
    }

    /// Parses a comma-separated list, skipping entries that do not match.
    #[must_use]
    pub fn parse_list(text: &str) -> Vec<Self> {
        split_entries(text)
            .into_iter()
            .filter_map(Self::try_parse)
            .collect()
    }

    fn try_parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let open = text.rfind(" <")?;
        let rest = &text[open + 2..];
        let close = rest.rfind('>')?;

        let name = unquote(text[..open].trim());
        let address = rest[..close].trim();
        if name.is_empty() || address.is_empty() {
            return None;
        }

        Some(Self {
            name: name.to_string(),
            address: address.to_string(),
        })
    }

    /// Returns true for the "no sender" value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.address.is_empty()
    }
}

impl fmt::Display for Emailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.address)
    }
}

fn unquote(name: &str) -> &str {
    name.strip_prefix('"')
        .and_then(|n| n.strip_suffix('"'))
        .unwrap_or(name)
}

/// Splits on commas that are outside quotes and angle brackets.
pub(crate) fn split_entries(text: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' if !in_quotes && !in_angle => {
                entries.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    entries.push(&text[start..]);

    entries.retain(|e| !e.trim().is_empty());
    entries
}

/// Notification of one new message, carrying header-level data only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailboxEvent {
    /// Identity of the session that observed the message.
    pub identity: String,
    /// Server sequence number of the message.
    pub mail_id: String,
    /// Raw `Date` header.
    pub date: String,
    /// Decoded subject.
    pub subject: String,
    /// Header fields; the last occurrence of a name wins.
    pub headers: BTreeMap<String, String>,
    /// Declared content types.
    pub mime_types: Vec<String>,
}

impl MailboxEvent {
    /// Builds an event from a parsed header.
    #[must_use]
    pub fn new(
        identity: impl Into<String>,
        mail_id: impl Into<String>,
        header: ParsedHeader,
    ) -> Self {
        Self {
            identity: identity.into(),
            mail_id: mail_id.into(),
            date: header.date,
            subject: header.subject,
            headers: header.headers,
            mime_types: header.mime_types,
        }
    }

    fn header(&self, name: &str) -> &str {
        self.headers.get(name).map_or("", String::as_str)
    }

    /// Sender from the `From` field.
    #[must_use]
    pub fn sender(&self) -> Emailer {
        Emailer::parse(self.header("From"))
    }

    /// Recipients from the `To` field.
    #[must_use]
    pub fn recipients(&self) -> Vec<Emailer> {
        Emailer::parse_list(self.header("To"))
    }

    /// Carbon-copy recipients from the `Cc` field.
    #[must_use]
    pub fn cc(&self) -> Vec<Emailer> {
        Emailer::parse_list(self.header("Cc"))
    }

    /// Raw `Message-ID`, or empty.
    #[must_use]
    pub fn message_id(&self) -> &str {
        self.header("Message-ID")
    }

    /// True if the identity is exactly one of the `To` addresses.
    #[must_use]
    pub fn is_addressed_to_self(&self) -> bool {
        self.recipients().iter().any(|r| r.address == self.identity)
    }

    /// True if the identity is exactly one of the `Cc` addresses.
    #[must_use]
    pub fn is_copied_to_self(&self) -> bool {
        self.cc().iter().any(|c| c.address == self.identity)
    }

    /// The date parsed with RFC 2822 rules.
    #[must_use]
    pub fn date_time(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc2822(&self.date).ok()
    }

    /// Sender address, or empty.
    #[must_use]
    pub fn user_id(&self) -> String {
        self.sender().address
    }

    /// Conversation key; same as [`Self::user_id`].
    #[must_use]
    pub fn session_id(&self) -> String {
        self.user_id()
    }

    /// Event kind.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        "new_mail"
    }

    /// Human-readable event name.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        "New Mail"
    }

    /// Multi-line summary of the message.
    #[must_use]
    pub fn summary(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MailboxEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |list: Vec<Emailer>| {
            list.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };

        writeln!(f, "Subject: {}", self.subject)?;
        writeln!(f, "From: {}", self.sender())?;
        writeln!(f, "To: {}", join(self.recipients()))?;
        let cc = self.cc();
        if !cc.is_empty() {
            writeln!(f, "Cc: {}", join(cc))?;
        }
        // Bcc recipients are not visible in a received header.
        writeln!(f, "Date: {}", self.date)
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
    use proptest::prelude::*;

    use super::*;

    fn sample() -> MailboxEvent {
        let headers = BTreeMap::from([
            ("To".to_string(), "\"mailbot\" <email@none.bot>".to_string()),
            ("From".to_string(), "YAMB <mail@test.adp>".to_string()),
            ("Cc".to_string(), "mailbot2 <bot@none.mail>".to_string()),
            ("Message-ID".to_string(), "<1111>".to_string()),
        ]);
        MailboxEvent {
            identity: "email@none.bot".to_string(),
            mail_id: "3124".to_string(),
            date: "Fri, 25 Aug 2023 02:53:48 +0000".to_string(),
            subject: "测试邮件7".to_string(),
            headers,
            mime_types: vec!["text/plain".to_string()],
        }
    }

    #[test]
    fn test_quoted_display_name() {
        let quoted = Emailer::parse("\"mailbot\" <email@none.bot>");
        assert_eq!(quoted, Emailer::parse("mailbot <email@none.bot>"));
        assert_eq!(quoted.name, "mailbot");

        let inner = Emailer::parse("Ann \"the bot\" <ann@none.bot>");
        assert_eq!(inner.name, "Ann \"the bot\"");
        assert_eq!(inner.to_string(), "Ann \"the bot\" <ann@none.bot>");
    }

    #[test]
    fn test_sender() {
        let event = sample();
        assert_eq!(
            event.sender(),
            Emailer {
                name: "YAMB".to_string(),
                address: "mail@test.adp".to_string()
            }
        );
        assert_eq!(event.user_id(), "mail@test.adp");
        assert_eq!(event.session_id(), "mail@test.adp");
    }

    #[test]
    fn test_missing_sender_is_empty() {
        let mut event = sample();
        event.headers.remove("From");
        assert!(event.sender().is_empty());
        assert_eq!(event.user_id(), "");

        event
            .headers
            .insert("From".to_string(), "mail@test.adp".to_string());
        assert!(event.sender().is_empty());
    }

    #[test]
    fn test_recipients_and_cc() {
        let event = sample();
        assert_eq!(event.recipients()[0].name, "mailbot");
        assert_eq!(event.recipients()[0].address, "email@none.bot");
        assert!(event.is_addressed_to_self());
        assert!(!event.is_copied_to_self());
        assert_eq!(event.message_id(), "<1111>");
    }

    #[test]
    fn test_list_with_commas_in_names() {
        let list = Emailer::parse_list("\"Doe, Jane\" <jane@x.org>, Bob <bob@y.org>, broken");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "Doe, Jane");
        assert_eq!(list[1].address, "bob@y.org");
    }

    #[test]
    fn test_case_sensitive_match() {
        let mut event = sample();
        event.identity = "Email@none.bot".to_string();
        assert!(!event.is_addressed_to_self());
    }

    #[test]
    fn test_copied_to_self() {
        let mut event = sample();
        event.identity = "bot@none.mail".to_string();
        assert!(event.is_copied_to_self());
        assert!(!event.is_addressed_to_self());
    }

    #[test]
    fn test_summary() {
        let event = sample();
        assert_eq!(
            event.summary(),
            "Subject: 测试邮件7\n\
             From: YAMB <mail@test.adp>\n\
             To: mailbot <email@none.bot>\n\
             Cc: mailbot2 <bot@none.mail>\n\
             Date: Fri, 25 Aug 2023 02:53:48 +0000\n"
        );

        let mut no_cc = sample();
        no_cc.headers.remove("Cc");
        assert!(!no_cc.summary().contains("Cc:"));
    }

    #[test]
    fn test_date_time() {
        let event = sample();
        let parsed = event.date_time().unwrap();
        assert_eq!(parsed.timestamp(), 1_692_932_028);

        let mut bad = sample();
        bad.date = "yesterday".to_string();
        assert!(bad.date_time().is_none());
    }

    #[test]
    fn test_serializes() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["mail_id"], "3124");
        assert_eq!(sample().event_type(), "new_mail");
    }

    proptest! {
        #[test]
        fn prop_emailer_roundtrip(
            name in "[A-Za-z][A-Za-z0-9 ]{0,15}[A-Za-z0-9]",
            local in "[a-z0-9.]{1,12}",
            domain in "[a-z]{1,8}\\.[a-z]{2,4}",
        ) {
            let address = format!("{local}@{domain}");
            let parsed = Emailer::parse(&format!("{name} <{address}>"));
            prop_assert_eq!(parsed.name, name);
            prop_assert_eq!(parsed.address, address);
        }

        #[test]
        fn prop_parse_never_panics(text in "\\PC{0,64}") {
            let parsed = Emailer::parse(&text);
            if !text.contains('<') {
                prop_assert!(parsed.is_empty());
            }
            let _ = Emailer::parse_list(&text);
        }

        #[test]
        fn prop_addressed_to_self_iff_listed(
            addresses in proptest::collection::vec("[a-z]{1,6}@[a-z]{1,6}\\.org", 0..5),
            identity in "[a-z]{1,6}@[a-z]{1,6}\\.org",
        ) {
            let to = addresses
                .iter()
                .enumerate()
                .map(|(i, a)| format!("user{i} <{a}>"))
                .collect::<Vec<_>>()
                .join(", ");
            let mut event = sample();
            event.identity = identity.clone();
            event.headers.insert("To".to_string(), to);
            prop_assert_eq!(event.is_addressed_to_self(), addresses.contains(&identity));
        }
    }
}

//! Chat entries on top of log messages.

use crate::types::{Entry, Message, Sequence, HEADER_TIMESTAMP, HEADER_USER};
use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;

/// A chat line as read back from the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub sequence: Sequence,
    /// Author from the `user` header; empty if the header is missing.
    pub author: String,
    pub body: String,
    /// Producer-assigned creation time; `None` if missing or unparseable.
    pub created_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn from_entry(entry: &Entry) -> Self {
        Self {
            sequence: entry.sequence,
            author: entry.header(HEADER_USER).unwrap_or_default().to_string(),
            body: String::from_utf8_lossy(entry.payload()).into_owned(),
            created_at: entry.header(HEADER_TIMESTAMP).and_then(parse_timestamp),
        }
    }

    /// `<author>: <body>`
    pub fn display_line(&self) -> String {
        format!("{}: {}", self.author, self.body)
    }
}

/// Build the log message for one chat line.
pub fn compose(channel: &str, author: &str, text: &str, now: DateTime<Utc>) -> Message {
    Message::new(channel, text.as_bytes().to_vec())
        .with_header(HEADER_USER, author)
        .with_header(HEADER_TIMESTAMP, format_timestamp(now))
}

/// RFC 3339, UTC, millisecond precision, `Z` suffix. Fixed width, so
/// lexicographic order matches chronological order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Client-side age filter for replayed entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetentionWindow {
    max_age: Duration,
}

impl RetentionWindow {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    /// True if an entry created at `created_at` is still inside the window.
    /// Entries without a usable timestamp are outside.
    pub fn admits(&self, created_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(created_at) = created_at else {
            return false;
        };
        match (now - created_at).to_std() {
            Ok(age) => age <= self.max_age,
            // Created in the future (clock skew): still fresh
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_compose_and_read_back() {
        let message = compose("room1", "alice", "hi", at(0));
        let entry = Entry {
            sequence: Sequence(4),
            appended_at: Timestamp::now(),
            message,
        };

        let chat = ChatMessage::from_entry(&entry);
        assert_eq!(chat.author, "alice");
        assert_eq!(chat.body, "hi");
        assert_eq!(chat.created_at, Some(at(0)));
        assert_eq!(chat.display_line(), "alice: hi");
    }

    #[test]
    fn test_timestamp_format() {
        assert_eq!(format_timestamp(at(0)), "2023-11-14T22:13:20.000Z");
        assert_eq!(parse_timestamp("2023-11-14T22:13:20Z"), Some(at(0)));
        assert_eq!(parse_timestamp("2023-11-14T23:13:20+01:00"), Some(at(0)));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_missing_headers() {
        let entry = Entry {
            sequence: Sequence(1),
            appended_at: Timestamp::now(),
            message: Message::new("room1", b"anon".to_vec()),
        };
        let chat = ChatMessage::from_entry(&entry);
        assert_eq!(chat.author, "");
        assert_eq!(chat.created_at, None);
    }

    #[test]
    fn test_window_edges() {
        let window = RetentionWindow::new(Duration::from_secs(3600));
        let now = at(10_000);
        assert!(window.admits(Some(at(10_000 - 3600)), now));
        assert!(!window.admits(Some(at(10_000 - 3601)), now));
        assert!(window.admits(Some(at(10_060)), now));
        assert!(!window.admits(None, now));
    }

    proptest! {
        #[test]
        fn prop_window_matches_age(age in 0i64..20_000, max in 1u64..10_000) {
            let window = RetentionWindow::new(Duration::from_secs(max));
            let now = at(50_000);
            prop_assert_eq!(window.admits(Some(at(50_000 - age)), now), age as u64 <= max);
        }

        #[test]
        fn prop_formatted_timestamps_sort_chronologically(a in 0i64..1_000_000, b in 0i64..1_000_000) {
            let (ta, tb) = (at(a), at(b));
            prop_assert_eq!(format_timestamp(ta).cmp(&format_timestamp(tb)), ta.cmp(&tb));
        }
    }
}

//! Core types shared by the durable log and the chat client.

use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Header carrying the author of a chat entry.
pub const HEADER_USER: &str = "user";

/// Header carrying the producer-assigned creation time of a chat entry.
pub const HEADER_TIMESTAMP: &str = "timestamp";

/// Position in a stream, assigned by the log. The first entry is `Seq(1)`;
/// `Seq(0)` means "before the first entry".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Sequence(pub u64);

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Sequence {
    pub fn next(self) -> Self {
        Sequence(self.0 + 1)
    }
}

/// Microseconds since Unix epoch, assigned by the log on append.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }

    /// Time elapsed between `self` and `now`, zero if `self` is in the future.
    pub fn age_at(self, now: Timestamp) -> Duration {
        Duration::from_micros(now.0.saturating_sub(self.0).max(0) as u64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Where a stream keeps its entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StorageType {
    /// Durable, file-backed storage.
    #[default]
    File,
}

/// Stream configuration, fixed at creation time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    pub subjects: Vec<String>,
    pub storage: StorageType,
    /// Entries appended longer ago than this are no longer delivered.
    pub max_age: Duration,
}

impl StreamConfig {
    /// A file-backed stream whose only subject is its own name.
    pub fn for_channel(name: impl Into<String>, max_age: Duration) -> Self {
        let name = name.into();
        Self {
            subjects: vec![name.clone()],
            name,
            storage: StorageType::File,
            max_age,
        }
    }

    pub fn accepts(&self, subject: &str) -> bool {
        self.subjects.iter().any(|s| s == subject)
    }
}

/// Stream metadata as stored by the log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamInfo {
    pub config: StreamConfig,
    pub created: Timestamp,
}

/// Where a new consumer starts reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliverPolicy {
    /// From the earliest retained entry.
    All,
    /// Only entries appended after the consumer is created.
    New,
    /// Entries with a sequence strictly greater than the given one.
    After(Sequence),
}

/// How deliveries are acknowledged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckPolicy {
    /// Every delivery must be acknowledged or it is redelivered.
    Explicit,
    /// Deliveries count as acknowledged as soon as they are handed out.
    None,
}

/// Durable consumer configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub durable_name: String,
    pub deliver_policy: DeliverPolicy,
    pub ack_policy: AckPolicy,
    /// Unacknowledged deliveries become eligible for redelivery after this.
    pub ack_wait: Duration,
}

impl ConsumerConfig {
    /// Durable, explicit-ack consumer reading from the start of the stream.
    pub fn durable(name: impl Into<String>, ack_wait: Duration) -> Self {
        Self {
            durable_name: name.into(),
            deliver_policy: DeliverPolicy::All,
            ack_policy: AckPolicy::Explicit,
            ack_wait,
        }
    }
}

/// Snapshot of a durable consumer's position.
#[derive(Clone, Debug)]
pub struct ConsumerInfo {
    pub stream: String,
    pub config: ConsumerConfig,
    /// Every entry at or below this sequence is acknowledged.
    pub ack_floor: Sequence,
    /// Highest sequence handed out so far.
    pub delivered: Sequence,
    /// Deliveries waiting for an acknowledgement.
    pub num_pending_acks: usize,
}

/// Input for a new entry (before sequence and append time are assigned).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub subject: String,
    pub headers: BTreeMap<String, String>,
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a message with a payload and no headers.
    pub fn new(subject: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            subject: subject.into(),
            headers: BTreeMap::new(),
            payload: payload.into(),
        }
    }

    /// Add a header to the message.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(|s| s.as_str())
    }
}

/// A single entry in a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    /// Position in the stream (assigned by the log).
    pub sequence: Sequence,

    /// When the log accepted the entry.
    pub appended_at: Timestamp,

    pub message: Message,
}

impl Entry {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.message.header(key)
    }

    pub fn payload(&self) -> &[u8] {
        &self.message.payload
    }
}

/// Check that a stream or channel name is usable as a subject and as a
/// directory name. Dotted names like `team.general` are fine; a leading dot
/// is not.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ChatError::InvalidName("name must not be empty".into()));
    }
    if name.starts_with('.') {
        return Err(ChatError::InvalidName(format!(
            "{name:?} must not start with '.'"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(ChatError::InvalidName(format!(
            "{name:?} may only contain ASCII letters, digits, '-', '_' and '.'"
        )));
    }
    Ok(())
}

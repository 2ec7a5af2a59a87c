//! History replay through a durable, per-user reader.

use super::message::{ChatMessage, RetentionWindow};
use super::output::Transcript;
use crate::error::{ChatError, Result};
use crate::log::LogClient;
use crate::types::{ConsumerConfig, Sequence};
use chrono::Utc;
use std::time::Duration;

/// Durable cursor bound to one user.
///
/// The first join creates it and replays from the earliest retained entry;
/// later joins resume after the last acknowledged entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReaderIdentity {
    durable_name: String,
}

impl ReaderIdentity {
    pub fn for_user(user: &str) -> Result<Self> {
        if user.trim().is_empty() {
            return Err(ChatError::InvalidName("user name must not be empty".into()));
        }
        Ok(Self {
            durable_name: format!("{user}_consumer"),
        })
    }

    pub fn durable_name(&self) -> &str {
        &self.durable_name
    }
}

/// Outcome of one replay.
#[derive(Clone, Debug, Default)]
pub struct Replay {
    /// Entries inside the retention window, in delivery order.
    pub messages: Vec<ChatMessage>,
    /// Fetched entries dropped by the age filter (still acknowledged).
    pub filtered: usize,
    /// Last sequence in the channel when the pull completed. Live delivery
    /// picks up strictly after it.
    pub head: Sequence,
    /// The deadline passed with nothing to fetch.
    pub timed_out: bool,
}

impl Replay {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Print every replayed message, marked as history.
    pub fn print(&self, transcript: &Transcript, prefix: &str) {
        for message in &self.messages {
            transcript.history(prefix, message);
        }
    }
}

/// Pulls a bounded batch of past entries for a reader identity.
pub struct HistoryReplayer<'a> {
    log: &'a LogClient,
    channel: &'a str,
    window: RetentionWindow,
    ack_wait: Duration,
}

impl<'a> HistoryReplayer<'a> {
    pub fn new(log: &'a LogClient, channel: &'a str, retention: Duration, ack_wait: Duration) -> Self {
        Self {
            log,
            channel,
            window: RetentionWindow::new(retention),
            ack_wait,
        }
    }

    /// Register the reader if needed, pull up to `batch_size` entries within
    /// `deadline`, acknowledge all of them and keep those inside the
    /// retention window.
    ///
    /// An empty pull at the deadline is "no history", not an error.
    pub fn replay_history(
        &self,
        reader: &ReaderIdentity,
        batch_size: usize,
        deadline: Duration,
    ) -> Result<Replay> {
        self.log.add_consumer(
            self.channel,
            ConsumerConfig::durable(reader.durable_name(), self.ack_wait),
        )?;

        let batch = self
            .log
            .fetch(self.channel, reader.durable_name(), batch_size, deadline)?;

        if batch.timed_out {
            tracing::info!(channel = self.channel, "no history found, continuing");
        }

        let now = Utc::now();
        let mut replay = Replay {
            head: batch.head,
            timed_out: batch.timed_out,
            ..Default::default()
        };

        for pulled in &batch.entries {
            let message = ChatMessage::from_entry(&pulled.entry);
            if self.window.admits(message.created_at, now) {
                replay.messages.push(message);
            } else {
                tracing::debug!(sequence = %pulled.entry.sequence, "dropping entry outside retention window");
                replay.filtered += 1;
            }

            // Acked regardless of the filter so the next join does not see it again
            if let Err(e) = pulled.ack() {
                tracing::warn!(sequence = %pulled.entry.sequence, error = %e, "failed to acknowledge history entry");
            }
        }

        tracing::debug!(
            channel = self.channel,
            shown = replay.messages.len(),
            filtered = replay.filtered,
            head = %replay.head,
            "history replayed"
        );
        Ok(replay)
    }
}

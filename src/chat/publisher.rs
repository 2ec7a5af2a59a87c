//! Turns local input lines into channel entries.

use super::message::compose;
use crate::error::Result;
use crate::log::LogClient;
use crate::types::Sequence;
use chrono::Utc;
use std::io::BufRead;

/// Counters for a finished publish loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub published: usize,
    pub failed: usize,
}

/// Publishes lines to one channel as one author.
#[derive(Clone)]
pub struct Publisher {
    log: LogClient,
    channel: String,
    author: String,
}

impl Publisher {
    pub fn new(log: LogClient, channel: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            log,
            channel: channel.into(),
            author: author.into(),
        }
    }

    /// Publish one line, stamped with the author and the current time.
    pub fn publish_line(&self, text: &str) -> Result<Sequence> {
        let message = compose(&self.channel, &self.author, text, Utc::now());
        Ok(self.log.publish(message)?.sequence)
    }

    /// Publish every line of `input` until EOF.
    ///
    /// A failed publish is reported and skipped; it never ends the loop.
    /// A read error does.
    pub fn run<R: BufRead>(&self, input: R) -> PublishStats {
        let mut stats = PublishStats::default();

        for line in input.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!(error = %e, "failed to read input, publishing stopped");
                    break;
                }
            };
            let text = line.strip_suffix('\r').unwrap_or(&line);

            match self.publish_line(text) {
                Ok(sequence) => {
                    tracing::trace!(%sequence, "sent");
                    stats.published += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, "error sending message");
                    stats.failed += 1;
                }
            }
        }

        tracing::debug!(published = stats.published, failed = stats.failed, "input closed");
        stats
    }
}
